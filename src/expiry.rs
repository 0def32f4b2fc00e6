//! External-share expiry reconciliation.
//!
//! Walks every plain file under a root and rewrites the expiration of each external
//! grant whose current expiration differs from the target. Role and principal are kept.
//! Updates are issued one grant at a time with no rollback; a re-run skips grants that
//! already conform.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::lister::list_files;
use crate::model::{PermissionGrant, ROLE_OWNER};
use crate::remote::RemoteTree;

/// Domain used to classify grants as internal when the config sheet does not name one.
pub const DEFAULT_INTERNAL_DOMAIN: &str = "woodcraft.org.uk";

/// Parse an expiry timestamp as written in the config sheet or returned by the backend.
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM:SS` (UTC) and bare dates (midnight UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryPolicy {
    pub target: DateTime<Utc>,
    pub internal_domain: String,
}

impl ExpiryPolicy {
    pub fn new(expiry_text: &str, internal_domain: &str) -> AppResult<Self> {
        let target = parse_timestamp(expiry_text)
            .ok_or_else(|| AppError::config("expiry_unparseable", format!("expiry timestamp '{}' is not a date/time", expiry_text)))?;
        Ok(Self { target, internal_domain: internal_domain.to_string() })
    }

    /// Target in the wire format sent to the backend.
    pub fn target_text(&self) -> String { self.target.to_rfc3339_opts(SecondsFormat::Millis, true) }

    /// External, not an owner, and expiring at some other instant (or never).
    /// Grants without an email principal (anyone/domain links) are left alone.
    pub fn needs_update(&self, grant: &PermissionGrant) -> bool {
        if grant.email_address.is_none() || grant.is_internal(&self.internal_domain) {
            return false;
        }
        if grant.role == ROLE_OWNER {
            return false;
        }
        match grant.expiration_time.as_deref().and_then(parse_timestamp) {
            Some(current) => current != self.target,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub files_scanned: usize,
    pub grants_seen: usize,
    pub grants_updated: usize,
}

/// Normalize external grant expirations on every file under `root_id`.
pub async fn reconcile(remote: &dyn RemoteTree, root_id: &str, policy: &ExpiryPolicy) -> AppResult<ExpiryReport> {
    let files = list_files(remote, root_id).await?;
    let target = policy.target_text();
    let mut report = ExpiryReport { files_scanned: files.len(), ..Default::default() };

    for f in &files {
        let grants = remote
            .list_permissions(&f.id)
            .await
            .map_err(|e| e.context(format!("permissions of '{}'", f.name)))?;
        report.grants_seen += grants.len();
        for g in grants.iter().filter(|g| policy.needs_update(g)) {
            let who = g.email_address.as_deref().unwrap_or("-");
            info!(
                target: "drivesync::expiry",
                "Updating expiry on '{}' for {} ({} -> {})",
                f.name, who, g.expiration_time.as_deref().unwrap_or("none"), target
            );
            remote
                .update_permission(&f.id, &g.id, &g.role, &target)
                .await
                .map_err(|e| e.context(format!("update grant {} on '{}'", g.id, f.name)))?;
            report.grants_updated += 1;
        }
        debug!(target: "drivesync::expiry", "checked '{}' ({} grants)", f.name, grants.len());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(email: Option<&str>, role: &str, exp: Option<&str>) -> PermissionGrant {
        PermissionGrant { id: "p".into(), email_address: email.map(String::from), role: role.into(), expiration_time: exp.map(String::from) }
    }

    #[test]
    fn timestamp_formats_agree() {
        let a = parse_timestamp("2025-01-01").unwrap();
        assert_eq!(parse_timestamp("2025-01-01T00:00:00.000Z"), Some(a));
        assert_eq!(parse_timestamp("2025-01-01 00:00:00"), Some(a));
        assert_eq!(parse_timestamp("2025-01-01T01:00:00+01:00"), Some(a));
        assert!(parse_timestamp("next tuesday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn policy_classification() {
        let p = ExpiryPolicy::new("2025-01-01", "woodcraft.org.uk").unwrap();
        assert!(!p.needs_update(&grant(Some("leader@woodcraft.org.uk"), "writer", None)));
        assert!(p.needs_update(&grant(Some("ext@other.com"), "reader", Some("2024-01-01T00:00:00Z"))));
        assert!(!p.needs_update(&grant(Some("ext2@other.com"), "reader", Some("2025-01-01T00:00:00.000Z"))));
        assert!(p.needs_update(&grant(Some("ext3@other.com"), "writer", None)));
        assert!(p.needs_update(&grant(Some("ext4@other.com"), "writer", Some("garbage"))));
        assert!(!p.needs_update(&grant(None, "reader", None)));
        assert!(!p.needs_update(&grant(Some("owner@other.com"), "owner", None)));
    }

    #[test]
    fn bad_target_is_config_error() {
        let err = ExpiryPolicy::new("soon", "woodcraft.org.uk").unwrap_err();
        assert_eq!(err.code_str(), "expiry_unparseable");
    }

    #[test]
    fn target_wire_format() {
        let p = ExpiryPolicy::new("2025-01-01", "x").unwrap();
        assert_eq!(p.target_text(), "2025-01-01T00:00:00.000Z");
    }
}
