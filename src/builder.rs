//! District → group folder hierarchy reconciliation.
//!
//! A run is strictly sequential and two-phase:
//! 1. every district gets its folder under the root, its owner share, and the
//!    district-scoped templates (copies, then shortcuts);
//! 2. every group gets its folder under its district's folder, its owner share, the
//!    group-scoped copies (with post-copy wiring) and then the group shortcuts.
//!
//! Everything that can be checked without mutating the remote is checked first:
//! district references, post-processing positions and template sources. A remote
//! failure afterwards stops the run where it is; re-running resumes, because every
//! step looks for its result before creating it.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{
    CopiedFileSequence, DistrictRecord, FileNode, FolderNode, GroupRecord, PostProcessFlags, RuleAction, Scope,
    TemplateRule, ROLE_WRITER,
};
use crate::remote::RemoteTree;
use crate::resolver::{resolve_file, resolve_folder, resolve_shortcut, Resolution};
use crate::sheets::{
    ConfigTable, Workbook, KEY_DISTRICT_FILE_TEMPLATE, KEY_DISTRICT_FOLDER_TEMPLATE, KEY_GROUP_FILE_TEMPLATE,
    KEY_GROUP_FOLDER_TEMPLATE, KEY_ROOT_FOLDER,
};
use crate::template::{self, TOKEN_DISTRICT, TOKEN_FILE, TOKEN_GROUP, TOKEN_NUMBER, TOKEN_YEAR};

/// Position the form response sheet is moved to inside its destination spreadsheet.
pub const RESPONSE_SHEET_INDEX: usize = 2;
/// Cell (1-based) that receives the upstream file id.
pub const UPSTREAM_REFERENCE_CELL: (u32, u32) = (1, 2);
/// A linked form's destination is the copy immediately before it.
pub const FORM_DESTINATION_BACK: usize = 1;
/// The embedded reference is `len - 3` once the spreadsheet is appended, i.e. two copies back.
pub const UPSTREAM_REFERENCE_BACK: usize = 2;

/// Run parameters taken from the Config sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub root_folder_id: String,
    pub district_folder_template: String,
    pub group_folder_template: String,
    pub district_file_template: Option<String>,
    pub group_file_template: Option<String>,
    pub year: i32,
}

impl RunConfig {
    pub fn from_table(table: &ConfigTable, year: i32) -> AppResult<Self> {
        // Both file templates must be present; a blank value leaves rule names without a fallback.
        let file_template = |k: &str| -> AppResult<Option<String>> {
            let v = table.get(k)?.trim();
            Ok((!v.is_empty()).then(|| v.to_string()))
        };
        let root_folder_id = table.get(KEY_ROOT_FOLDER)?.trim().to_string();
        if root_folder_id.is_empty() {
            return Err(AppError::config("config_empty_value", format!("config key '{}' is empty", KEY_ROOT_FOLDER)));
        }
        Ok(Self {
            root_folder_id,
            district_folder_template: table.get(KEY_DISTRICT_FOLDER_TEMPLATE)?.to_string(),
            group_folder_template: table.get(KEY_GROUP_FOLDER_TEMPLATE)?.to_string(),
            district_file_template: file_template(KEY_DISTRICT_FILE_TEMPLATE)?,
            group_file_template: file_template(KEY_GROUP_FILE_TEMPLATE)?,
            year,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub folders_created: usize,
    pub folders_reused: usize,
    pub files_copied: usize,
    pub files_reused: usize,
    pub shortcuts_created: usize,
    pub shortcuts_reused: usize,
    pub shares_added: usize,
    pub shares_present: usize,
    pub forms_linked: usize,
    pub cells_written: usize,
}

impl SyncReport {
    /// Number of remote creates/shares/wiring writes performed.
    pub fn changes(&self) -> usize {
        self.folders_created + self.files_copied + self.shortcuts_created + self.shares_added + self.forms_linked + self.cells_written
    }
}

/// Every group must name a district present in the Districts sheet.
pub fn validate_references(districts: &[DistrictRecord], groups: &[GroupRecord]) -> AppResult<()> {
    for g in groups {
        if !districts.iter().any(|d| d.name == g.district_name) {
            warn!(target: "drivesync::builder", "District not found for group '{}' (district '{}')", g.name, g.district_name);
            return Err(AppError::config(
                "dangling_district",
                format!("district '{}' not found for group '{}'", g.district_name, g.name),
            ));
        }
    }
    Ok(())
}

/// Post-processing reaches back into the group copy sequence; the rules it needs must precede it.
pub fn validate_rule_order(templates: &[TemplateRule]) -> AppResult<()> {
    let group_copies = templates.iter().filter(|r| r.scope == Scope::Group && r.action == RuleAction::Copy);
    for (pos, rule) in group_copies.enumerate() {
        if rule.flags.contains(PostProcessFlags::LINK_FORM_DESTINATION) && pos < FORM_DESTINATION_BACK {
            return Err(AppError::config(
                "postprocess_position",
                format!("template '{}' links a form destination but no group copy precedes it", rule.source_ref),
            ));
        }
        if rule.flags.contains(PostProcessFlags::EMBED_UPSTREAM_REFERENCE) && pos < UPSTREAM_REFERENCE_BACK {
            return Err(AppError::config(
                "postprocess_position",
                format!("template '{}' embeds an upstream reference but fewer than {} group copies precede it", rule.source_ref, UPSTREAM_REFERENCE_BACK),
            ));
        }
    }
    for rule in templates.iter().filter(|r| !r.flags.is_empty() && (r.scope != Scope::Group || r.action != RuleAction::Copy)) {
        warn!(target: "drivesync::builder", "post-process flags on '{}' ignored: only group copies are post-processed", rule.source_ref);
    }
    Ok(())
}

/// Template source files, keyed by the rule's source reference.
pub type SourceFiles = HashMap<String, FileNode>;

/// Resolve every template source once, before anything is created.
pub async fn resolve_sources(remote: &dyn RemoteTree, templates: &[TemplateRule]) -> AppResult<SourceFiles> {
    let mut out = SourceFiles::new();
    for rule in templates {
        if out.contains_key(&rule.source_ref) {
            continue;
        }
        let id = template::source_id(&rule.source_ref).ok_or_else(|| {
            AppError::config("template_bad_source", format!("template source '{}' has no file id", rule.source_ref))
        })?;
        let node = remote
            .get_file(id)
            .await
            .map_err(|e| e.context(format!("template source '{}'", rule.source_ref)))?;
        out.insert(rule.source_ref.clone(), node);
    }
    Ok(out)
}

pub struct HierarchyBuilder<'a> {
    remote: &'a dyn RemoteTree,
    cfg: &'a RunConfig,
    sources: SourceFiles,
    report: SyncReport,
    /// Forms the backend could not link, as "'form' in 'folder' -> 'spreadsheet'".
    unlinked_forms: Vec<String>,
}

impl<'a> HierarchyBuilder<'a> {
    /// Run all read-only checks; no remote state is changed.
    pub async fn prepare(remote: &'a dyn RemoteTree, cfg: &'a RunConfig, book: &Workbook) -> AppResult<Self> {
        validate_references(&book.districts, &book.groups)?;
        validate_rule_order(&book.templates)?;
        let sources = resolve_sources(remote, &book.templates).await?;
        Ok(Self { remote, cfg, sources, report: SyncReport::default(), unlinked_forms: Vec::new() })
    }

    pub fn report(&self) -> &SyncReport { &self.report }
    pub fn into_report(self) -> SyncReport { self.report }

    fn source(&self, rule: &TemplateRule) -> AppResult<&FileNode> {
        self.sources.get(&rule.source_ref).ok_or_else(|| {
            AppError::invariant("source_unresolved", format!("template source '{}' was not resolved", rule.source_ref))
        })
    }

    fn tally_folder(&mut self, r: &Resolution) {
        if r.created { self.report.folders_created += 1 } else { self.report.folders_reused += 1 }
    }

    fn tally_file(&mut self, r: &Resolution) {
        if r.created { self.report.files_copied += 1 } else { self.report.files_reused += 1 }
    }

    fn tally_shortcut(&mut self, r: &Resolution) {
        if r.created { self.report.shortcuts_created += 1 } else { self.report.shortcuts_reused += 1 }
    }

    /// Give `email` writer access unless some grant on the folder already names it.
    async fn ensure_shared(&mut self, folder: &FolderNode, email: &str) -> AppResult<()> {
        let grants = self
            .remote
            .list_permissions(&folder.id)
            .await
            .map_err(|e| e.context(format!("permissions of '{}'", folder.name)))?;
        if grants.iter().any(|g| g.email_address.as_deref() == Some(email)) {
            info!(target: "drivesync::builder", "Folder '{}' already shared with {}", folder.name, email);
            self.report.shares_present += 1;
            return Ok(());
        }
        info!(target: "drivesync::builder", "Sharing folder '{}' with {}", folder.name, email);
        self.remote
            .create_permission(&folder.id, email, ROLE_WRITER)
            .await
            .map_err(|e| e.context(format!("share '{}' with {}", folder.name, email)))?;
        self.report.shares_added += 1;
        Ok(())
    }

    /// Phase 1. Returns each district's folder, keyed by district name.
    pub async fn build_districts(
        &mut self,
        districts: &[DistrictRecord],
        templates: &[TemplateRule],
    ) -> AppResult<HashMap<String, FolderNode>> {
        let year = self.cfg.year.to_string();
        let mut folders = HashMap::new();

        for d in districts {
            let folder_name = template::apply(
                &self.cfg.district_folder_template,
                &[(TOKEN_DISTRICT, d.name.as_str()), (TOKEN_NUMBER, d.number.as_str()), (TOKEN_YEAR, year.as_str())],
            );
            let r = resolve_folder(self.remote, &folder_name, &self.cfg.root_folder_id).await?;
            self.tally_folder(&r);
            let folder = r.node;

            self.ensure_shared(&folder, &d.owner_email).await?;
            info!(target: "drivesync::builder", "District folder ready, copying templates ({})", folder.id);

            for rule in templates.iter().filter(|t| t.scope == Scope::District && t.action == RuleAction::Copy) {
                let src = self.source(rule)?.clone();
                let pattern = self.name_pattern(rule, self.cfg.district_file_template.as_deref());
                let name = template::apply(
                    &pattern,
                    &[
                        (TOKEN_FILE, src.name.as_str()),
                        (TOKEN_DISTRICT, d.name.as_str()),
                        (TOKEN_NUMBER, d.number.as_str()),
                        (TOKEN_YEAR, year.as_str()),
                    ],
                );
                let r = resolve_file(self.remote, &src, &name, &folder.id).await?;
                self.tally_file(&r);
            }
            for rule in templates.iter().filter(|t| t.scope == Scope::District && t.action == RuleAction::Shortcut) {
                let src = self.source(rule)?.clone();
                let r = resolve_shortcut(self.remote, &src, &folder.id).await?;
                self.tally_shortcut(&r);
            }
            info!(target: "drivesync::builder", "Templates copied for district '{}'", d.name);

            folders.insert(d.name.clone(), folder);
        }
        Ok(folders)
    }

    /// Phase 2.
    pub async fn build_groups(
        &mut self,
        groups: &[GroupRecord],
        templates: &[TemplateRule],
        district_folders: &HashMap<String, FolderNode>,
    ) -> AppResult<()> {
        for g in groups {
            let parent = district_folders.get(&g.district_name).ok_or_else(|| {
                AppError::invariant(
                    "district_folder_missing",
                    format!("no folder for district '{}' of group '{}'", g.district_name, g.name),
                )
            })?;
            self.build_group(g, parent, templates).await?;
        }
        Ok(())
    }

    async fn build_group(&mut self, g: &GroupRecord, parent: &FolderNode, templates: &[TemplateRule]) -> AppResult<()> {
        let year = self.cfg.year.to_string();
        let folder_name = template::apply(
            &self.cfg.group_folder_template,
            &[
                (TOKEN_GROUP, g.name.as_str()),
                (TOKEN_NUMBER, g.number.as_str()),
                (TOKEN_DISTRICT, g.district_name.as_str()),
                (TOKEN_YEAR, year.as_str()),
            ],
        );
        let r = resolve_folder(self.remote, &folder_name, &parent.id).await?;
        self.tally_folder(&r);
        let folder = r.node;

        self.ensure_shared(&folder, &g.owner_email).await?;
        info!(target: "drivesync::builder", "Group folder ready, copying templates ({})", folder.id);

        let mut copied = CopiedFileSequence::new();
        for rule in templates.iter().filter(|t| t.scope == Scope::Group && t.action == RuleAction::Copy) {
            let src = self.source(rule)?.clone();
            let pattern = self.name_pattern(rule, self.cfg.group_file_template.as_deref());
            let name = template::apply(
                &pattern,
                &[
                    (TOKEN_FILE, src.name.as_str()),
                    (TOKEN_GROUP, g.name.as_str()),
                    (TOKEN_NUMBER, g.number.as_str()),
                    (TOKEN_DISTRICT, g.district_name.as_str()),
                    (TOKEN_YEAR, year.as_str()),
                ],
            );
            let r = resolve_file(self.remote, &src, &name, &folder.id).await?;
            self.tally_file(&r);
            // Reused files join the sequence too, or later offsets would shift.
            let index = copied.push(r.node);
            self.post_process(&folder, &copied, index, rule.flags).await?;
        }
        for rule in templates.iter().filter(|t| t.scope == Scope::Group && t.action == RuleAction::Shortcut) {
            let src = self.source(rule)?.clone();
            let r = resolve_shortcut(self.remote, &src, &folder.id).await?;
            self.tally_shortcut(&r);
        }
        info!(target: "drivesync::builder", "Templates copied for group '{}'", g.name);
        Ok(())
    }

    fn name_pattern(&self, rule: &TemplateRule, scope_default: Option<&str>) -> String {
        if !rule.name_template.trim().is_empty() {
            rule.name_template.clone()
        } else {
            scope_default.unwrap_or(TOKEN_FILE).to_string()
        }
    }

    /// Wire the copy at `index` according to `flags`. Each step reads the current state
    /// first and only writes when it differs. A backend that cannot link forms does not
    /// stop the run; the form is recorded and the run fails once every group is done.
    async fn post_process(
        &mut self,
        folder: &FolderNode,
        copied: &CopiedFileSequence,
        index: usize,
        flags: PostProcessFlags,
    ) -> AppResult<()> {
        let Some(current) = copied.get(index).cloned() else {
            return Err(AppError::invariant("sequence_index", format!("copy sequence has no entry {}", index)));
        };

        if flags.contains(PostProcessFlags::LINK_FORM_DESTINATION) {
            let sheet = copied.before(index, FORM_DESTINATION_BACK).ok_or_else(|| {
                AppError::invariant("sequence_offset", format!("no spreadsheet before form '{}'", current.name))
            })?;
            let existing = self
                .remote
                .form_destination(&current.id)
                .await
                .map_err(|e| e.context(format!("destination of form '{}'", current.name)))?;
            let mut linked = true;
            if existing.as_deref() != Some(sheet.id.as_str()) {
                info!(target: "drivesync::builder", "Linking form '{}' to spreadsheet '{}'", current.name, sheet.name);
                match self.remote.set_form_destination(&current.id, &sheet.id).await {
                    Ok(()) => self.report.forms_linked += 1,
                    Err(e @ AppError::Unsupported { .. }) => {
                        warn!(
                            target: "drivesync::builder",
                            "Form '{}' in folder '{}' must be linked to '{}' by hand: {}",
                            current.name, folder.name, sheet.name, e
                        );
                        self.unlinked_forms.push(format!("'{}' in '{}' -> '{}'", current.name, folder.name, sheet.name));
                        linked = false;
                    }
                    Err(e) => return Err(e.context(format!("link form '{}' to '{}'", current.name, sheet.name))),
                }
            }
            if linked {
                self.remote
                    .move_response_sheet(&sheet.id, &current.id, RESPONSE_SHEET_INDEX)
                    .await
                    .map_err(|e| e.context(format!("move response sheet in '{}'", sheet.name)))?;
            }
        }

        if flags.contains(PostProcessFlags::EMBED_UPSTREAM_REFERENCE) {
            let upstream = copied.before(index, UPSTREAM_REFERENCE_BACK).ok_or_else(|| {
                AppError::invariant("sequence_offset", format!("no upstream copy for '{}'", current.name))
            })?;
            let (row, col) = UPSTREAM_REFERENCE_CELL;
            let value = self
                .remote
                .read_cell(&current.id, row, col)
                .await
                .map_err(|e| e.context(format!("read reference cell of '{}'", current.name)))?;
            if value.as_deref() != Some(upstream.id.as_str()) {
                info!(target: "drivesync::builder", "Writing id of '{}' into '{}'", upstream.name, current.name);
                self.remote
                    .write_cell(&current.id, row, col, &upstream.id)
                    .await
                    .map_err(|e| e.context(format!("write reference cell of '{}'", current.name)))?;
                self.report.cells_written += 1;
            }
        }
        Ok(())
    }
}

/// Full hierarchy reconciliation for one workbook.
pub async fn sync_hierarchy(remote: &dyn RemoteTree, cfg: &RunConfig, book: &Workbook) -> AppResult<SyncReport> {
    let mut builder = HierarchyBuilder::prepare(remote, cfg, book).await?;
    let district_folders = builder.build_districts(&book.districts, &book.templates).await?;
    builder.build_groups(&book.groups, &book.templates, &district_folders).await?;
    if !builder.unlinked_forms.is_empty() {
        return Err(AppError::unsupported(
            "form_destination_unsupported",
            format!(
                "{} form(s) need linking by hand, then re-run: {}",
                builder.unlinked_forms.len(),
                builder.unlinked_forms.join("; ")
            ),
        ));
    }
    Ok(builder.into_report())
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
