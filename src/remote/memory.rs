use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;

use super::RemoteTree;
use crate::error::{AppError, AppResult};
use crate::model::{FileNode, FolderNode, PermissionGrant, MIME_FOLDER, MIME_FORM, MIME_SHORTCUT, MIME_SPREADSHEET, ROLE_OWNER};

/// Title prefix given to sheets created when a form is linked.
pub const RESPONSE_SHEET_PREFIX: &str = "Form Responses";

/// Mutating call recorded by the in-memory backend, in call order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Mutation {
    CreateFolder { name: String, parent: String },
    CopyFile { source: String, name: String, parent: String },
    CreateShortcut { target: String, name: String, parent: String },
    CreatePermission { file: String, email: String, role: String },
    UpdatePermission { file: String, grant: String, expiration: String },
    SetFormDestination { form: String, spreadsheet: String },
    MoveResponseSheet { spreadsheet: String, from: usize, to: usize },
    WriteCell { spreadsheet: String, row: u32, col: u32, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetTab {
    pub title: String,
    pub form_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub enum Document {
    #[default]
    Opaque,
    Form { destination: Option<String> },
    /// Cells of the first sheet, keyed by `R<row>C<col>`.
    Spreadsheet { tabs: Vec<SheetTab>, cells: BTreeMap<String, String> },
}

pub fn cell_key(row: u32, col: u32) -> String { format!("R{}C{}", row, col) }

#[derive(Debug, Clone, Serialize)]
struct Item {
    node: FileNode,
    permissions: Vec<PermissionGrant>,
    doc: Document,
}

#[derive(Debug, Default)]
struct Inner {
    // Insertion order is listing order.
    items: Vec<Item>,
    next_id: u64,
    journal: Vec<Mutation>,
    fail_on: Option<String>,
    form_linking_unsupported: bool,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn find(&self, id: &str) -> Option<&Item> { self.items.iter().find(|i| i.node.id == id) }
    fn find_mut(&mut self, id: &str) -> Option<&mut Item> { self.items.iter_mut().find(|i| i.node.id == id) }

    fn require(&self, op: &str, id: &str) -> AppResult<&Item> {
        self.find(id).ok_or_else(|| AppError::remote("not_found", format!("{}: no item '{}'", op, id)))
    }

    fn require_mut(&mut self, op: &str, id: &str) -> AppResult<&mut Item> {
        self.find_mut(id).ok_or_else(|| AppError::remote("not_found", format!("{}: no item '{}'", op, id)))
    }

    fn require_folder(&self, op: &str, id: &str) -> AppResult<()> {
        let it = self.require(op, id)?;
        if !it.node.is_folder() {
            return Err(AppError::remote("not_a_folder", format!("{}: '{}' is not a folder", op, id)));
        }
        Ok(())
    }

    /// Fail the call if a failure was armed for `op`; the failure is consumed.
    fn check_fail(&mut self, op: &str) -> AppResult<()> {
        if self.fail_on.as_deref() == Some(op) {
            self.fail_on = None;
            return Err(AppError::remote("injected_failure", format!("{} failed", op)));
        }
        Ok(())
    }

    fn insert(&mut self, prefix: &str, name: &str, mime: &str, parent: Option<&str>, doc: Document, owner: &str) -> FileNode {
        let id = self.next_id(prefix);
        let grant_id = self.next_id("perm");
        let node = FileNode {
            id,
            name: name.to_string(),
            mime_type: mime.to_string(),
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            trashed: false,
            shortcut_target: None,
        };
        let owner_grant = PermissionGrant { id: grant_id, email_address: Some(owner.to_string()), role: ROLE_OWNER.to_string(), expiration_time: None };
        self.items.push(Item { node: node.clone(), permissions: vec![owner_grant], doc });
        node
    }
}

/// In-process remote tree. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    inner: Arc<RwLock<Inner>>,
    owner: String,
}

impl Default for MemoryRemote {
    fn default() -> Self { Self::new("robot@woodcraft.org.uk") }
}

impl MemoryRemote {
    /// `owner` becomes the owner grant of every item this backend creates.
    pub fn new(owner: &str) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), owner: owner.to_string() }
    }

    // --- seeding helpers (not journaled) ---

    pub fn add_root(&self, name: &str) -> String {
        self.inner.write().insert("root", name, MIME_FOLDER, None, Document::Opaque, &self.owner).id
    }

    pub fn add_folder(&self, name: &str, parent: &str) -> String {
        self.inner.write().insert("fld", name, MIME_FOLDER, Some(parent), Document::Opaque, &self.owner).id
    }

    pub fn add_file(&self, name: &str, mime: &str, parent: &str) -> String {
        let doc = match mime {
            MIME_FORM => Document::Form { destination: None },
            MIME_SPREADSHEET => Document::Spreadsheet { tabs: vec![SheetTab { title: "Sheet1".into(), form_id: None }], cells: BTreeMap::new() },
            _ => Document::Opaque,
        };
        self.inner.write().insert("file", name, mime, Some(parent), doc, &self.owner).id
    }

    /// Spreadsheet with the given tab titles.
    pub fn add_spreadsheet(&self, name: &str, parent: &str, tabs: &[&str]) -> String {
        let tabs = tabs.iter().map(|t| SheetTab { title: t.to_string(), form_id: None }).collect();
        let doc = Document::Spreadsheet { tabs, cells: BTreeMap::new() };
        self.inner.write().insert("file", name, MIME_SPREADSHEET, Some(parent), doc, &self.owner).id
    }

    pub fn add_shortcut(&self, name: &str, target: &str, parent: &str) -> String {
        let mut w = self.inner.write();
        let node = w.insert("sc", name, MIME_SHORTCUT, Some(parent), Document::Opaque, &self.owner);
        if let Some(it) = w.find_mut(&node.id) { it.node.shortcut_target = Some(target.to_string()); }
        node.id
    }

    pub fn add_permission(&self, file: &str, email: Option<&str>, role: &str, expiration: Option<&str>) -> String {
        let mut w = self.inner.write();
        let id = w.next_id("perm");
        if let Some(it) = w.find_mut(file) {
            it.permissions.push(PermissionGrant {
                id: id.clone(),
                email_address: email.map(String::from),
                role: role.to_string(),
                expiration_time: expiration.map(String::from),
            });
        }
        id
    }

    pub fn trash(&self, id: &str) {
        if let Some(it) = self.inner.write().find_mut(id) { it.node.trashed = true; }
    }

    /// Arm a one-shot failure for the next call named `op` (e.g. "copy_file").
    pub fn fail_next(&self, op: &str) { self.inner.write().fail_on = Some(op.to_string()); }

    /// Behave like a backend that cannot bind form destinations.
    pub fn set_form_linking_unsupported(&self, unsupported: bool) {
        self.inner.write().form_linking_unsupported = unsupported;
    }

    // --- inspection ---

    pub fn journal(&self) -> Vec<Mutation> { self.inner.read().journal.clone() }
    pub fn mutation_count(&self) -> usize { self.inner.read().journal.len() }
    pub fn clear_journal(&self) { self.inner.write().journal.clear(); }

    pub fn node(&self, id: &str) -> Option<FileNode> { self.inner.read().find(id).map(|i| i.node.clone()) }
    pub fn document(&self, id: &str) -> Option<Document> { self.inner.read().find(id).map(|i| i.doc.clone()) }
    pub fn permissions(&self, id: &str) -> Vec<PermissionGrant> {
        self.inner.read().find(id).map(|i| i.permissions.clone()).unwrap_or_default()
    }

    /// Non-trashed children, any kind.
    pub fn children(&self, parent: &str) -> Vec<FileNode> {
        self.inner.read().items.iter()
            .filter(|i| !i.node.trashed && i.node.parents.iter().any(|p| p == parent))
            .map(|i| i.node.clone())
            .collect()
    }

    /// Child by exact name, first match.
    pub fn child_named(&self, parent: &str, name: &str) -> Option<FileNode> {
        self.children(parent).into_iter().find(|n| n.name == name)
    }

    /// Serialized view of the whole tree, for before/after comparisons.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(&self.inner.read().items).unwrap_or_default()
    }

    fn owner(&self) -> &str { &self.owner }
}

#[async_trait]
impl RemoteTree for MemoryRemote {
    async fn list_children(&self, parent_id: &str, name: Option<&str>, include_trashed: bool) -> AppResult<Vec<FileNode>> {
        let mut w = self.inner.write();
        w.check_fail("list_children")?;
        w.require("list_children", parent_id)?;
        Ok(w.items.iter()
            .filter(|i| i.node.parents.iter().any(|p| p == parent_id))
            .filter(|i| include_trashed || !i.node.trashed)
            .filter(|i| name.map(|n| i.node.name == n).unwrap_or(true))
            .map(|i| i.node.clone())
            .collect())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> AppResult<FolderNode> {
        let mut w = self.inner.write();
        w.check_fail("create_folder")?;
        w.require_folder("create_folder", parent_id)?;
        let node = w.insert("fld", name, MIME_FOLDER, Some(parent_id), Document::Opaque, self.owner());
        w.journal.push(Mutation::CreateFolder { name: name.into(), parent: parent_id.into() });
        Ok(node)
    }

    async fn copy_file(&self, source_id: &str, new_name: &str, parent_id: &str) -> AppResult<FileNode> {
        let mut w = self.inner.write();
        w.check_fail("copy_file")?;
        w.require_folder("copy_file", parent_id)?;
        let src = w.require("copy_file", source_id)?.clone();
        if src.node.is_folder() {
            return Err(AppError::remote("copy_folder", format!("copy_file: '{}' is a folder", source_id)));
        }
        // Copies do not keep form links.
        let doc = match src.doc {
            Document::Form { .. } => Document::Form { destination: None },
            Document::Spreadsheet { tabs, cells } => Document::Spreadsheet {
                tabs: tabs.into_iter().filter(|t| t.form_id.is_none()).collect(),
                cells,
            },
            Document::Opaque => Document::Opaque,
        };
        let node = w.insert("file", new_name, &src.node.mime_type, Some(parent_id), doc, self.owner());
        w.journal.push(Mutation::CopyFile { source: source_id.into(), name: new_name.into(), parent: parent_id.into() });
        Ok(node)
    }

    async fn create_shortcut(&self, target_id: &str, name: &str, parent_id: &str) -> AppResult<FileNode> {
        let mut w = self.inner.write();
        w.check_fail("create_shortcut")?;
        w.require_folder("create_shortcut", parent_id)?;
        w.require("create_shortcut", target_id)?;
        let mut node = w.insert("sc", name, MIME_SHORTCUT, Some(parent_id), Document::Opaque, self.owner());
        node.shortcut_target = Some(target_id.to_string());
        if let Some(it) = w.find_mut(&node.id) { it.node.shortcut_target = node.shortcut_target.clone(); }
        w.journal.push(Mutation::CreateShortcut { target: target_id.into(), name: name.into(), parent: parent_id.into() });
        Ok(node)
    }

    async fn get_file(&self, file_id: &str) -> AppResult<FileNode> {
        let mut w = self.inner.write();
        w.check_fail("get_file")?;
        Ok(w.require("get_file", file_id)?.node.clone())
    }

    async fn list_permissions(&self, file_id: &str) -> AppResult<Vec<PermissionGrant>> {
        let mut w = self.inner.write();
        w.check_fail("list_permissions")?;
        Ok(w.require("list_permissions", file_id)?.permissions.clone())
    }

    async fn create_permission(&self, file_id: &str, email: &str, role: &str) -> AppResult<PermissionGrant> {
        let mut w = self.inner.write();
        w.check_fail("create_permission")?;
        w.require("create_permission", file_id)?;
        let grant = PermissionGrant { id: w.next_id("perm"), email_address: Some(email.to_string()), role: role.to_string(), expiration_time: None };
        w.require_mut("create_permission", file_id)?.permissions.push(grant.clone());
        w.journal.push(Mutation::CreatePermission { file: file_id.into(), email: email.into(), role: role.into() });
        Ok(grant)
    }

    async fn update_permission(&self, file_id: &str, grant_id: &str, role: &str, expiration_time: &str) -> AppResult<PermissionGrant> {
        let mut w = self.inner.write();
        w.check_fail("update_permission")?;
        let item = w.require_mut("update_permission", file_id)?;
        let grant = item.permissions.iter_mut().find(|g| g.id == grant_id)
            .ok_or_else(|| AppError::remote("not_found", format!("update_permission: no grant '{}' on '{}'", grant_id, file_id)))?;
        grant.role = role.to_string();
        grant.expiration_time = Some(expiration_time.to_string());
        let out = grant.clone();
        w.journal.push(Mutation::UpdatePermission { file: file_id.into(), grant: grant_id.into(), expiration: expiration_time.into() });
        Ok(out)
    }

    async fn form_destination(&self, form_id: &str) -> AppResult<Option<String>> {
        let mut w = self.inner.write();
        w.check_fail("form_destination")?;
        match &w.require("form_destination", form_id)?.doc {
            Document::Form { destination } => Ok(destination.clone()),
            _ => Err(AppError::remote("not_a_form", format!("form_destination: '{}' is not a form", form_id))),
        }
    }

    async fn set_form_destination(&self, form_id: &str, spreadsheet_id: &str) -> AppResult<()> {
        let mut w = self.inner.write();
        w.check_fail("set_form_destination")?;
        if w.form_linking_unsupported {
            return Err(AppError::unsupported("form_destination_unsupported", format!("cannot link form '{}'", form_id)));
        }
        if !matches!(w.require("set_form_destination", form_id)?.doc, Document::Form { .. }) {
            return Err(AppError::remote("not_a_form", format!("set_form_destination: '{}' is not a form", form_id)));
        }
        match &mut w.require_mut("set_form_destination", spreadsheet_id)?.doc {
            Document::Spreadsheet { tabs, .. } => {
                if !tabs.iter().any(|t| t.form_id.as_deref() == Some(form_id)) {
                    let n = tabs.iter().filter(|t| t.title.starts_with(RESPONSE_SHEET_PREFIX)).count() + 1;
                    // Response sheets are inserted in front.
                    tabs.insert(0, SheetTab { title: format!("{} {}", RESPONSE_SHEET_PREFIX, n), form_id: Some(form_id.to_string()) });
                }
            }
            _ => return Err(AppError::remote("not_a_spreadsheet", format!("set_form_destination: '{}' is not a spreadsheet", spreadsheet_id))),
        }
        if let Some(Item { doc: Document::Form { destination }, .. }) = w.find_mut(form_id) {
            *destination = Some(spreadsheet_id.to_string());
        }
        w.journal.push(Mutation::SetFormDestination { form: form_id.into(), spreadsheet: spreadsheet_id.into() });
        Ok(())
    }

    async fn move_response_sheet(&self, spreadsheet_id: &str, form_id: &str, index: usize) -> AppResult<()> {
        let mut w = self.inner.write();
        w.check_fail("move_response_sheet")?;
        let (from, to) = match &mut w.require_mut("move_response_sheet", spreadsheet_id)?.doc {
            Document::Spreadsheet { tabs, .. } => {
                let from = tabs.iter().position(|t| t.form_id.as_deref() == Some(form_id))
                    .ok_or_else(|| AppError::remote("no_response_sheet", format!("move_response_sheet: '{}' has no sheet for form '{}'", spreadsheet_id, form_id)))?;
                let tab = tabs.remove(from);
                let to = index.min(tabs.len());
                tabs.insert(to, tab);
                (from, to)
            }
            _ => return Err(AppError::remote("not_a_spreadsheet", format!("move_response_sheet: '{}' is not a spreadsheet", spreadsheet_id))),
        };
        w.journal.push(Mutation::MoveResponseSheet { spreadsheet: spreadsheet_id.into(), from, to });
        Ok(())
    }

    async fn read_cell(&self, spreadsheet_id: &str, row: u32, col: u32) -> AppResult<Option<String>> {
        let mut w = self.inner.write();
        w.check_fail("read_cell")?;
        match &w.require("read_cell", spreadsheet_id)?.doc {
            Document::Spreadsheet { cells, .. } => Ok(cells.get(&cell_key(row, col)).cloned()),
            _ => Err(AppError::remote("not_a_spreadsheet", format!("read_cell: '{}' is not a spreadsheet", spreadsheet_id))),
        }
    }

    async fn write_cell(&self, spreadsheet_id: &str, row: u32, col: u32, value: &str) -> AppResult<()> {
        let mut w = self.inner.write();
        w.check_fail("write_cell")?;
        match &mut w.require_mut("write_cell", spreadsheet_id)?.doc {
            Document::Spreadsheet { cells, .. } => { cells.insert(cell_key(row, col), value.to_string()); }
            _ => return Err(AppError::remote("not_a_spreadsheet", format!("write_cell: '{}' is not a spreadsheet", spreadsheet_id))),
        }
        w.journal.push(Mutation::WriteCell { spreadsheet: spreadsheet_id.into(), row, col, value: value.into() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_children_filters_name_and_trash() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let a = m.add_file("A", "application/pdf", &root);
        let b = m.add_file("B", "application/pdf", &root);
        m.add_file("A", "application/pdf", &root);
        m.trash(&b);

        let all = m.list_children(&root, None, false).await.unwrap();
        assert_eq!(all.len(), 2);
        let named = m.list_children(&root, Some("A"), false).await.unwrap();
        assert_eq!(named.len(), 2);
        assert_eq!(named[0].id, a);
        let with_trash = m.list_children(&root, Some("B"), true).await.unwrap();
        assert_eq!(with_trash.len(), 1);
        assert!(with_trash[0].trashed);
    }

    #[tokio::test]
    async fn form_link_inserts_response_sheet_once() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let sheet = m.add_spreadsheet("Accounts", &root, &["Summary", "Data", "Notes"]);
        let form = m.add_file("Form", MIME_FORM, &root);

        m.set_form_destination(&form, &sheet).await.unwrap();
        m.set_form_destination(&form, &sheet).await.unwrap();
        assert_eq!(m.form_destination(&form).await.unwrap().as_deref(), Some(sheet.as_str()));

        let Some(Document::Spreadsheet { tabs, .. }) = m.document(&sheet) else { panic!("not a spreadsheet") };
        assert_eq!(tabs.len(), 4);
        assert_eq!(tabs[0].title, "Form Responses 1");

        m.move_response_sheet(&sheet, &form, 2).await.unwrap();
        let Some(Document::Spreadsheet { tabs, .. }) = m.document(&sheet) else { panic!("not a spreadsheet") };
        let titles: Vec<_> = tabs.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Summary", "Data", "Form Responses 1", "Notes"]);
    }

    #[tokio::test]
    async fn injected_failure_is_one_shot() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        m.fail_next("create_folder");
        let err = m.create_folder("x", &root).await.unwrap_err();
        assert_eq!(err.code_str(), "injected_failure");
        assert_eq!(m.mutation_count(), 0);
        m.create_folder("x", &root).await.unwrap();
        assert_eq!(m.mutation_count(), 1);
    }

    #[tokio::test]
    async fn copy_drops_form_link_and_keeps_cells() {
        let m = MemoryRemote::default();
        let root = m.add_root("root");
        let sheet = m.add_spreadsheet("Tpl", &root, &["Sheet1"]);
        m.write_cell(&sheet, 1, 1, "header").await.unwrap();
        let copy = m.copy_file(&sheet, "Copy", &root).await.unwrap();
        assert_eq!(m.read_cell(&copy.id, 1, 1).await.unwrap().as_deref(), Some("header"));
        assert_eq!(copy.mime_type, MIME_SPREADSHEET);
        assert!(m.copy_file(&root, "nope", &root).await.is_err());
    }
}
