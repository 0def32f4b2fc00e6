//! Tabular configuration sources: the Config, Districts, Groups and Templates sheets.
//!
//! Rows arrive as plain strings from a [`SheetSource`]. Every sheet has a header row,
//! which is dropped, and rows whose first cell is blank are ignored. The typed parsers
//! below reject malformed rows up front so that nothing is mutated remotely when the
//! configuration is broken.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::model::{DistrictRecord, GroupRecord, PostProcessFlags, RuleAction, Scope, TemplateRule};

pub const KEY_ROOT_FOLDER: &str = "Data root folder";
pub const KEY_DISTRICT_FOLDER_TEMPLATE: &str = "District Folder Name Template";
pub const KEY_GROUP_FOLDER_TEMPLATE: &str = "Group Folder Name Template";
pub const KEY_DISTRICT_FILE_TEMPLATE: &str = "District File Name Template";
pub const KEY_GROUP_FILE_TEMPLATE: &str = "Group File Name Template";
pub const KEY_EXPIRY: &str = "Expiry Datetime";
pub const KEY_INTERNAL_DOMAIN: &str = "Internal Domain";

pub type Rows = Vec<Vec<String>>;

/// Supplies raw rows for a named sheet, header included.
pub trait SheetSource {
    fn rows(&self, sheet: &str) -> AppResult<Rows>;
}

/// Reads `<dir>/<sheet>.csv` exports.
#[derive(Debug, Clone)]
pub struct CsvDirSource {
    dir: PathBuf,
}

impl CsvDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn path_for(&self, sheet: &str) -> PathBuf { self.dir.join(format!("{sheet}.csv")) }
}

impl SheetSource for CsvDirSource {
    fn rows(&self, sheet: &str) -> AppResult<Rows> {
        let path = self.path_for(sheet);
        read_csv(&path)
    }
}

fn read_csv(path: &Path) -> AppResult<Rows> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| AppError::io("sheet_open", format!("{}: {}", path.display(), e)))?;
    let mut out = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| AppError::config("sheet_parse", format!("{}: {}", path.display(), e)))?;
        out.push(rec.iter().map(|c| c.to_string()).collect());
    }
    Ok(out)
}

/// In-memory sheets, keyed by sheet name.
#[derive(Debug, Clone, Default)]
pub struct MemorySheets {
    sheets: HashMap<String, Rows>,
}

impl MemorySheets {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, sheet: &str, rows: &[&[&str]]) -> Self {
        self.insert(sheet, rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect());
        self
    }

    pub fn insert(&mut self, sheet: &str, rows: Rows) { self.sheets.insert(sheet.to_string(), rows); }
}

impl SheetSource for MemorySheets {
    fn rows(&self, sheet: &str) -> AppResult<Rows> {
        self.sheets
            .get(sheet)
            .cloned()
            .ok_or_else(|| AppError::config("sheet_missing", format!("sheet '{}' not found", sheet)))
    }
}

/// Data rows with their 1-based sheet row number. Header dropped; blank-leading rows dropped.
fn data_rows(rows: &Rows) -> Vec<(usize, Vec<String>)> {
    rows.iter()
        .enumerate()
        .skip(1)
        .map(|(i, r)| (i + 1, r.iter().map(|c| c.trim().to_string()).collect::<Vec<_>>()))
        .filter(|(_, r)| r.first().map(|c| !c.is_empty()).unwrap_or(false))
        .collect()
}

fn cell(sheet: &str, line: usize, row: &[String], idx: usize, what: &str, required: bool) -> AppResult<String> {
    let v = row.get(idx).cloned().unwrap_or_default();
    if required && v.is_empty() {
        return Err(AppError::config("sheet_cell_missing", format!("{} row {}: missing {}", sheet, line, what)));
    }
    Ok(v)
}

/// Key/value rows of the Config sheet.
#[derive(Debug, Clone, Default)]
pub struct ConfigTable {
    entries: Vec<(String, String)>,
}

impl ConfigTable {
    pub fn from_rows(rows: &Rows) -> AppResult<Self> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (line, r) in data_rows(rows) {
            let key = r[0].clone();
            if entries.iter().any(|(k, _)| *k == key) {
                return Err(AppError::config("config_duplicate_key", format!("Config row {}: duplicate key '{}'", line, key)));
            }
            entries.push((key, r.get(1).cloned().unwrap_or_default()));
        }
        Ok(Self { entries })
    }

    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get(&self, key: &str) -> AppResult<&str> {
        self.get_opt(key)
            .ok_or_else(|| AppError::config("config_missing_key", format!("config key '{}' not found", key)))
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

pub fn parse_districts(rows: &Rows) -> AppResult<Vec<DistrictRecord>> {
    const SHEET: &str = "Districts";
    data_rows(rows)
        .into_iter()
        .map(|(line, r)| {
            Ok(DistrictRecord {
                name: cell(SHEET, line, &r, 0, "name", true)?,
                number: cell(SHEET, line, &r, 1, "number", false)?,
                owner_email: cell(SHEET, line, &r, 2, "owner email", true)?,
            })
        })
        .collect()
}

pub fn parse_groups(rows: &Rows) -> AppResult<Vec<GroupRecord>> {
    const SHEET: &str = "Groups";
    data_rows(rows)
        .into_iter()
        .map(|(line, r)| {
            Ok(GroupRecord {
                name: cell(SHEET, line, &r, 0, "name", true)?,
                number: cell(SHEET, line, &r, 1, "number", false)?,
                district_name: cell(SHEET, line, &r, 2, "district", true)?,
                owner_email: cell(SHEET, line, &r, 3, "owner email", true)?,
            })
        })
        .collect()
}

fn parse_scope(line: usize, v: &str) -> AppResult<Scope> {
    match v.to_ascii_lowercase().as_str() {
        "district" => Ok(Scope::District),
        "group" => Ok(Scope::Group),
        other => Err(AppError::config("template_bad_scope", format!("Templates row {}: unknown scope '{}'", line, other))),
    }
}

fn parse_action(line: usize, v: &str) -> AppResult<RuleAction> {
    match v.to_ascii_lowercase().as_str() {
        "copy" => Ok(RuleAction::Copy),
        "shortcut" => Ok(RuleAction::Shortcut),
        other => Err(AppError::config("template_bad_action", format!("Templates row {}: unknown action '{}'", line, other))),
    }
}

fn parse_flags(line: usize, v: &str) -> AppResult<PostProcessFlags> {
    if v.is_empty() {
        return Ok(PostProcessFlags::default());
    }
    // Spreadsheet exports sometimes render integers as "2.0".
    let digits = v.strip_suffix(".0").unwrap_or(v);
    digits
        .parse::<u32>()
        .map(PostProcessFlags)
        .map_err(|_| AppError::config("template_bad_flags", format!("Templates row {}: flags '{}' is not a non-negative integer", line, v)))
}

pub fn parse_templates(rows: &Rows) -> AppResult<Vec<TemplateRule>> {
    const SHEET: &str = "Templates";
    data_rows(rows)
        .into_iter()
        .map(|(line, r)| {
            Ok(TemplateRule {
                source_ref: cell(SHEET, line, &r, 0, "source", true)?,
                scope: parse_scope(line, &cell(SHEET, line, &r, 1, "scope", true)?)?,
                action: parse_action(line, &cell(SHEET, line, &r, 2, "action", true)?)?,
                name_template: cell(SHEET, line, &r, 3, "name template", false)?,
                flags: parse_flags(line, &cell(SHEET, line, &r, 4, "flags", false)?)?,
            })
        })
        .collect()
}

/// All four sheets, parsed.
#[derive(Debug, Clone)]
pub struct Workbook {
    pub config: ConfigTable,
    pub districts: Vec<DistrictRecord>,
    pub groups: Vec<GroupRecord>,
    pub templates: Vec<TemplateRule>,
}

/// Sheet names to read from a source.
#[derive(Debug, Clone)]
pub struct SheetNames<'a> {
    pub config: &'a str,
    pub districts: &'a str,
    pub groups: &'a str,
    pub templates: &'a str,
}

impl Default for SheetNames<'_> {
    fn default() -> Self {
        Self { config: "Config", districts: "Districts", groups: "Groups", templates: "Templates" }
    }
}

impl Workbook {
    pub fn load(src: &dyn SheetSource, names: &SheetNames<'_>) -> AppResult<Self> {
        Ok(Self {
            config: ConfigTable::from_rows(&src.rows(names.config)?)?,
            districts: parse_districts(&src.rows(names.districts)?)?,
            groups: parse_groups(&src.rows(names.groups)?)?,
            templates: parse_templates(&src.rows(names.templates)?)?,
        })
    }

    /// Config sheet only; all the expiry pass needs.
    pub fn load_config(src: &dyn SheetSource, names: &SheetNames<'_>) -> AppResult<ConfigTable> {
        ConfigTable::from_rows(&src.rows(names.config)?)
    }
}

#[cfg(test)]
#[path = "sheets_tests.rs"]
mod tests;
