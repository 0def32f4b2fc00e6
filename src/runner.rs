//! Entry points: one function per command, each taking its collaborators explicitly.

use chrono::{Datelike, Local};
use tracing::info;

use crate::builder::{sync_hierarchy, RunConfig, SyncReport};
use crate::error::{AppError, AppResult};
use crate::expiry::{reconcile, ExpiryPolicy, ExpiryReport, DEFAULT_INTERNAL_DOMAIN};
use crate::remote::RemoteTree;
use crate::sheets::{SheetNames, SheetSource, Workbook, KEY_EXPIRY, KEY_INTERNAL_DOMAIN, KEY_ROOT_FOLDER};

/// Reconcile the district/group hierarchy described by `sheets`, naming files for the current year.
pub async fn sync(remote: &dyn RemoteTree, sheets: &dyn SheetSource, names: &SheetNames<'_>) -> AppResult<SyncReport> {
    sync_for_year(remote, sheets, names, Local::now().year()).await
}

pub async fn sync_for_year(
    remote: &dyn RemoteTree,
    sheets: &dyn SheetSource,
    names: &SheetNames<'_>,
    year: i32,
) -> AppResult<SyncReport> {
    let book = Workbook::load(sheets, names)?;
    let cfg = RunConfig::from_table(&book.config, year)?;
    info!(
        target: "drivesync::runner",
        "sync: {} districts, {} groups, {} template rules under {}",
        book.districts.len(), book.groups.len(), book.templates.len(), cfg.root_folder_id
    );
    let report = sync_hierarchy(remote, &cfg, &book).await?;
    info!(target: "drivesync::runner", "sync finished: {}", serde_json::to_string(&report).unwrap_or_default());
    Ok(report)
}

/// Normalize the expiration of every external grant under the configured root.
pub async fn update_external_share_expiry(
    remote: &dyn RemoteTree,
    sheets: &dyn SheetSource,
    names: &SheetNames<'_>,
) -> AppResult<ExpiryReport> {
    let config = Workbook::load_config(sheets, names)?;
    let root = config.get(KEY_ROOT_FOLDER)?.trim();
    if root.is_empty() {
        return Err(AppError::config("config_empty_value", format!("config key '{}' is empty", KEY_ROOT_FOLDER)));
    }
    let domain = config
        .get_opt(KEY_INTERNAL_DOMAIN)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_INTERNAL_DOMAIN);
    let policy = ExpiryPolicy::new(config.get(KEY_EXPIRY)?, domain)?;
    info!(target: "drivesync::runner", "update-expiry: target {} under {} (internal domain {})", policy.target_text(), root, domain);

    let report = reconcile(remote, root, &policy).await?;
    info!(target: "drivesync::runner", "update-expiry finished: {}", serde_json::to_string(&report).unwrap_or_default());
    Ok(report)
}
