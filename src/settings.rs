use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::sheets::SheetNames;

pub const ENV_SETTINGS: &str = "DRIVESYNC_SETTINGS";
pub const ENV_SHEETS_DIR: &str = "DRIVESYNC_SHEETS_DIR";
pub const ENV_API_BASE: &str = "DRIVESYNC_API_BASE";
pub const ENV_SHEETS_API_BASE: &str = "DRIVESYNC_SHEETS_API_BASE";
pub const ENV_FORMS_API_BASE: &str = "DRIVESYNC_FORMS_API_BASE";
pub const ENV_ACCESS_TOKEN: &str = "DRIVESYNC_ACCESS_TOKEN";

/// Built-in settings applied unless overridden by a settings file or the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    pub sheets_dir: PathBuf,
    pub config_sheet: String,
    pub districts_sheet: String,
    pub groups_sheet: String,
    pub templates_sheet: String,

    pub drive_api_base: String,
    pub sheets_api_base: String,
    pub forms_api_base: String,
    pub request_timeout_ms: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            sheets_dir: PathBuf::from("sheets"),
            config_sheet: "Config".to_string(),
            districts_sheet: "Districts".to_string(),
            groups_sheet: "Groups".to_string(),
            templates_sheet: "Templates".to_string(),

            drive_api_base: "https://www.googleapis.com/drive/v3/".to_string(),
            sheets_api_base: "https://sheets.googleapis.com/v4/".to_string(),
            forms_api_base: "https://forms.googleapis.com/v1/".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Optional JSON settings file. Unspecified values inherit from Global.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SettingsFile {
    #[serde(default)]
    pub sheets_dir: Option<PathBuf>,
    #[serde(default)]
    pub config_sheet: Option<String>,
    #[serde(default)]
    pub districts_sheet: Option<String>,
    #[serde(default)]
    pub groups_sheet: Option<String>,
    #[serde(default)]
    pub templates_sheet: Option<String>,

    #[serde(default)]
    pub drive_api_base: Option<String>,
    #[serde(default)]
    pub sheets_api_base: Option<String>,
    #[serde(default)]
    pub forms_api_base: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Never logged.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> AppResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::io("settings_read", format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::config("settings_parse", format!("{}: {}", path.display(), e)))
    }
}

/// Environment overrides; the top layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvOverrides {
    pub sheets_dir: Option<PathBuf>,
    pub drive_api_base: Option<String>,
    pub sheets_api_base: Option<String>,
    pub forms_api_base: Option<String>,
    pub access_token: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            sheets_dir: var(ENV_SHEETS_DIR).map(PathBuf::from),
            drive_api_base: var(ENV_API_BASE),
            sheets_api_base: var(ENV_SHEETS_API_BASE),
            forms_api_base: var(ENV_FORMS_API_BASE),
            access_token: var(ENV_ACCESS_TOKEN),
        }
    }
}

/// Fully resolved settings used by the entry points.
#[derive(Clone, PartialEq)]
pub struct EffectiveSettings {
    pub sheets_dir: PathBuf,
    pub config_sheet: String,
    pub districts_sheet: String,
    pub groups_sheet: String,
    pub templates_sheet: String,

    pub drive_api_base: String,
    pub sheets_api_base: String,
    pub forms_api_base: String,
    pub request_timeout_ms: u64,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for EffectiveSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectiveSettings")
            .field("sheets_dir", &self.sheets_dir)
            .field("drive_api_base", &self.drive_api_base)
            .field("sheets_api_base", &self.sheets_api_base)
            .field("forms_api_base", &self.forms_api_base)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl EffectiveSettings {
    /// Build effective settings from Global + optional file + environment.
    pub fn from_layers(global: &GlobalSettings, file: Option<&SettingsFile>, env: &EnvOverrides) -> Self {
        let file_default = SettingsFile::default();
        let fl = file.unwrap_or(&file_default);

        let sheets_dir = env.sheets_dir.clone()
            .or_else(|| fl.sheets_dir.clone())
            .unwrap_or_else(|| global.sheets_dir.clone());
        let drive_api_base = env.drive_api_base.clone()
            .or_else(|| fl.drive_api_base.clone())
            .unwrap_or_else(|| global.drive_api_base.clone());
        let sheets_api_base = env.sheets_api_base.clone()
            .or_else(|| fl.sheets_api_base.clone())
            .unwrap_or_else(|| global.sheets_api_base.clone());
        let forms_api_base = env.forms_api_base.clone()
            .or_else(|| fl.forms_api_base.clone())
            .unwrap_or_else(|| global.forms_api_base.clone());
        let access_token = env.access_token.clone().or_else(|| fl.access_token.clone());

        Self {
            sheets_dir,
            config_sheet: fl.config_sheet.clone().unwrap_or_else(|| global.config_sheet.clone()),
            districts_sheet: fl.districts_sheet.clone().unwrap_or_else(|| global.districts_sheet.clone()),
            groups_sheet: fl.groups_sheet.clone().unwrap_or_else(|| global.groups_sheet.clone()),
            templates_sheet: fl.templates_sheet.clone().unwrap_or_else(|| global.templates_sheet.clone()),
            drive_api_base,
            sheets_api_base,
            forms_api_base,
            request_timeout_ms: fl.request_timeout_ms.unwrap_or(global.request_timeout_ms),
            access_token,
        }
    }

    /// Resolve from the process environment, loading the settings file named by
    /// `explicit_file` or `DRIVESYNC_SETTINGS` when present.
    pub fn resolve(explicit_file: Option<&Path>) -> AppResult<Self> {
        let env_file = std::env::var(ENV_SETTINGS).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        let file = match explicit_file.map(Path::to_path_buf).or(env_file) {
            Some(p) => Some(SettingsFile::load(&p)?),
            None => None,
        };
        Ok(Self::from_layers(&GlobalSettings::default(), file.as_ref(), &EnvOverrides::from_env()))
    }

    pub fn sheet_names(&self) -> SheetNames<'_> {
        SheetNames {
            config: &self.config_sheet,
            districts: &self.districts_sheet,
            groups: &self.groups_sheet,
            templates: &self.templates_sheet,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
