//! Unified application error model.
//! Every layer (sheet parsing, remote backends, reconciliation) reports through `AppError`;
//! the binary maps it to a process exit code.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Missing config key, malformed row, dangling district reference. Raised before any mutation.
    Config { code: String, message: String },
    /// A capability call against the remote tree failed.
    Remote { code: String, message: String },
    /// Internal ordering guarantee broken (e.g. a group reached phase 2 without its district folder).
    Invariant { code: String, message: String },
    /// The backend does not offer the requested capability.
    Unsupported { code: String, message: String },
    Io { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Config { code, .. }
            | AppError::Remote { code, .. }
            | AppError::Invariant { code, .. }
            | AppError::Unsupported { code, .. }
            | AppError::Io { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Config { message, .. }
            | AppError::Remote { message, .. }
            | AppError::Invariant { message, .. }
            | AppError::Unsupported { message, .. }
            | AppError::Io { message, .. } => message.as_str(),
        }
    }

    pub fn config<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Config { code: code.into(), message: msg.into() } }
    pub fn remote<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Remote { code: code.into(), message: msg.into() } }
    pub fn invariant<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Invariant { code: code.into(), message: msg.into() } }
    pub fn unsupported<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Unsupported { code: code.into(), message: msg.into() } }
    pub fn io<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Io { code: code.into(), message: msg.into() } }

    pub fn is_config(&self) -> bool { matches!(self, AppError::Config { .. }) }
    pub fn is_remote(&self) -> bool { matches!(self, AppError::Remote { .. }) }

    /// Map to a process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config { .. } => 2,
            AppError::Remote { .. } => 3,
            AppError::Invariant { .. } | AppError::Unsupported { .. } | AppError::Io { .. } => 1,
        }
    }

    /// Prefix the message with the operation that failed, keeping variant and code.
    pub fn context(self, op: impl Display) -> Self {
        match self {
            AppError::Config { code, message } => AppError::Config { code, message: format!("{op}: {message}") },
            AppError::Remote { code, message } => AppError::Remote { code, message: format!("{op}: {message}") },
            AppError::Invariant { code, message } => AppError::Invariant { code, message: format!("{op}: {message}") },
            AppError::Unsupported { code, message } => AppError::Unsupported { code, message: format!("{op}: {message}") },
            AppError::Io { code, message } => AppError::Io { code, message: format!("{op}: {message}") },
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io { code: "io_error".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mapping() {
        assert_eq!(AppError::config("missing_key", "x").exit_code(), 2);
        assert_eq!(AppError::remote("list_failed", "x").exit_code(), 3);
        assert_eq!(AppError::invariant("no_folder", "x").exit_code(), 1);
        assert_eq!(AppError::unsupported("form_link", "x").exit_code(), 1);
        assert_eq!(AppError::io("io", "x").exit_code(), 1);
    }

    #[test]
    fn context_keeps_variant_and_code() {
        let e = AppError::remote("copy_failed", "HTTP 500").context("copy 'Register' into f1");
        assert!(e.is_remote());
        assert_eq!(e.code_str(), "copy_failed");
        assert_eq!(e.message(), "copy 'Register' into f1: HTTP 500");
        assert_eq!(e.to_string(), "copy_failed: copy 'Register' into f1: HTTP 500");
    }

    #[test]
    fn serde_tagging() {
        let v = serde_json::to_value(AppError::config("dangling_district", "Group A")).unwrap();
        assert_eq!(v["type"], "config");
        assert_eq!(v["code"], "dangling_district");
    }

    #[test]
    fn io_errors_map_to_io_variant() {
        let e: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(e, AppError::Io { .. }));
        assert_eq!(e.code_str(), "io_error");
        assert_eq!(e.exit_code(), 1);
    }
}
