//! Core data contracts shared by the sheet parsers, remote backends and reconcilers.
//! Keep this module purely about types/serde and light helpers.

use serde::{Deserialize, Serialize};

pub const MIME_FOLDER: &str = "application/vnd.google-apps.folder";
pub const MIME_SHORTCUT: &str = "application/vnd.google-apps.shortcut";
pub const MIME_SPREADSHEET: &str = "application/vnd.google-apps.spreadsheet";
pub const MIME_FORM: &str = "application/vnd.google-apps.form";

/// Drive v3 name for the editor role.
pub const ROLE_WRITER: &str = "writer";
pub const ROLE_OWNER: &str = "owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Shortcut,
    File,
}

/// One remote item. Built once at the backend boundary so callers never see raw API shapes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNode {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default)]
    pub shortcut_target: Option<String>,
}

/// Folders are `FileNode`s with the folder mime type.
pub type FolderNode = FileNode;

impl FileNode {
    pub fn kind(&self) -> NodeKind {
        match self.mime_type.as_str() {
            MIME_FOLDER => NodeKind::Folder,
            MIME_SHORTCUT => NodeKind::Shortcut,
            _ => NodeKind::File,
        }
    }
    pub fn is_folder(&self) -> bool { self.kind() == NodeKind::Folder }
    pub fn is_shortcut(&self) -> bool { self.kind() == NodeKind::Shortcut }
    pub fn is_plain_file(&self) -> bool { self.kind() == NodeKind::File }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGrant {
    pub id: String,
    /// Absent for `anyone`/`domain` grants.
    #[serde(default)]
    pub email_address: Option<String>,
    pub role: String,
    /// RFC 3339 as returned by the backend.
    #[serde(default)]
    pub expiration_time: Option<String>,
}

impl PermissionGrant {
    /// Internal when the principal's email contains `internal_domain` anywhere,
    /// so `x@woodcraft.org.uk.example.com` also counts as internal.
    pub fn is_internal(&self, internal_domain: &str) -> bool {
        self.email_address.as_deref().map(|e| e.contains(internal_domain)).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistrictRecord {
    pub name: String,
    pub number: String,
    pub owner_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub number: String,
    pub district_name: String,
    pub owner_email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    District,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Copy,
    Shortcut,
}

/// Wiring applied to a copied file after it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostProcessFlags(pub u32);

impl PostProcessFlags {
    /// Bit 0: the copy is a form whose responses go to the spreadsheet copied just before it.
    pub const LINK_FORM_DESTINATION: u32 = 1 << 0;
    /// Bit 1: the copy is a spreadsheet that records the id of an earlier copy
    /// (third from the end of the sequence once the spreadsheet itself is appended).
    pub const EMBED_UPSTREAM_REFERENCE: u32 = 1 << 1;

    pub fn contains(&self, bit: u32) -> bool { self.0 & bit == bit }
    pub fn is_empty(&self) -> bool { self.0 == 0 }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRule {
    /// File id, or any URL carrying `/d/<id>`.
    pub source_ref: String,
    pub scope: Scope,
    pub action: RuleAction,
    /// Blank means "use the scope's default file name template".
    pub name_template: String,
    pub flags: PostProcessFlags,
}

/// Files resolved during one group's copy pass, in rule order.
/// Positional offsets into this sequence are how later rules find earlier outputs.
#[derive(Debug, Clone, Default)]
pub struct CopiedFileSequence {
    files: Vec<FileNode>,
}

impl CopiedFileSequence {
    pub fn new() -> Self { Self::default() }

    /// Append and return the new entry's position.
    pub fn push(&mut self, node: FileNode) -> usize {
        self.files.push(node);
        self.files.len() - 1
    }

    /// The entry `back` positions before `index`, if the sequence reaches that far.
    pub fn before(&self, index: usize, back: usize) -> Option<&FileNode> {
        index.checked_sub(back).and_then(|i| self.files.get(i))
    }

    pub fn get(&self, index: usize) -> Option<&FileNode> { self.files.get(index) }
    pub fn len(&self) -> usize { self.files.len() }
    pub fn is_empty(&self) -> bool { self.files.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &FileNode> { self.files.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, mime: &str) -> FileNode {
        FileNode { id: id.into(), name: id.into(), mime_type: mime.into(), parents: vec![], trashed: false, shortcut_target: None }
    }

    #[test]
    fn node_kinds() {
        assert!(node("a", MIME_FOLDER).is_folder());
        assert!(node("b", MIME_SHORTCUT).is_shortcut());
        assert!(node("c", MIME_SPREADSHEET).is_plain_file());
        assert!(node("d", "application/pdf").is_plain_file());
    }

    #[test]
    fn internal_is_containment() {
        let g = |email: Option<&str>| PermissionGrant { id: "p".into(), email_address: email.map(String::from), role: "reader".into(), expiration_time: None };
        assert!(g(Some("leader@woodcraft.org.uk")).is_internal("woodcraft.org.uk"));
        assert!(g(Some("x@notwoodcraft.org.uk.evil.com")).is_internal("woodcraft.org.uk"));
        assert!(!g(Some("parent@gmail.com")).is_internal("woodcraft.org.uk"));
        assert!(!g(None).is_internal("woodcraft.org.uk"));
    }

    #[test]
    fn sequence_offsets() {
        let mut seq = CopiedFileSequence::new();
        assert_eq!(seq.push(node("sheet", MIME_SPREADSHEET)), 0);
        assert_eq!(seq.push(node("form", MIME_FORM)), 1);
        assert_eq!(seq.push(node("register", MIME_SPREADSHEET)), 2);
        assert_eq!(seq.before(1, 1).map(|n| n.id.as_str()), Some("sheet"));
        assert_eq!(seq.before(2, 2).map(|n| n.id.as_str()), Some("sheet"));
        assert!(seq.before(1, 2).is_none());
        assert!(seq.before(5, 1).is_none());
    }

    #[test]
    fn flag_bits() {
        let f = PostProcessFlags(3);
        assert!(f.contains(PostProcessFlags::LINK_FORM_DESTINATION));
        assert!(f.contains(PostProcessFlags::EMBED_UPSTREAM_REFERENCE));
        assert!(!PostProcessFlags(2).contains(PostProcessFlags::LINK_FORM_DESTINATION));
        assert!(PostProcessFlags::default().is_empty());
    }
}
