//! ZP-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ZpError>;

/// Top-level error type for zeropad.
///
/// Nothing in the control loop retries: every variant that reaches
/// `run_daemon` is logged and ends the process with status 1.
#[derive(Debug, Error)]
pub enum ZpError {
    #[error("[ZP-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ZP-1002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ZP-1003] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ZP-2001] cannot acquire padding file {path}: {details}")]
    ResourceAcquisition { path: PathBuf, details: String },

    #[error("[ZP-3001] failed to stat filesystem holding {path}: {details}")]
    FilesystemQuery { path: PathBuf, details: String },

    #[error("[ZP-3002] failed to stat padding file {path}: {source}")]
    FileStat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ZP-3003] failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ZP-3004] padding file handle for {path} was already released")]
    HandleClosed { path: PathBuf },

    #[error("[ZP-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ZP-3900] runtime failure: {details}")]
    Runtime { details: String },

    #[error("[ZP-4001] interrupted by signal {signal}")]
    Interrupted { signal: i32 },
}

impl ZpError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ZP-1001",
            Self::ConfigParse { .. } => "ZP-1002",
            Self::MissingConfig { .. } => "ZP-1003",
            Self::ResourceAcquisition { .. } => "ZP-2001",
            Self::FilesystemQuery { .. } => "ZP-3001",
            Self::FileStat { .. } => "ZP-3002",
            Self::Io { .. } => "ZP-3003",
            Self::HandleClosed { .. } => "ZP-3004",
            Self::Serialization { .. } => "ZP-3101",
            Self::Runtime { .. } => "ZP-3900",
            Self::Interrupted { .. } => "ZP-4001",
        }
    }

    /// Whether the error was raised before any padding resource was held.
    ///
    /// Configuration failures never reach teardown, so there is nothing to
    /// close or remove for them.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::ConfigParse { .. } | Self::MissingConfig { .. }
        )
    }

    /// Convenience constructor for IO errors with a known operation and path.
    #[must_use]
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for ZpError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ZpError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<ZpError> {
        vec![
            ZpError::InvalidConfig {
                details: String::new(),
            },
            ZpError::ConfigParse {
                context: "",
                details: String::new(),
            },
            ZpError::MissingConfig {
                path: PathBuf::new(),
            },
            ZpError::ResourceAcquisition {
                path: PathBuf::new(),
                details: String::new(),
            },
            ZpError::FilesystemQuery {
                path: PathBuf::new(),
                details: String::new(),
            },
            ZpError::FileStat {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ZpError::Io {
                op: "write",
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            ZpError::HandleClosed {
                path: PathBuf::new(),
            },
            ZpError::Serialization {
                context: "",
                details: String::new(),
            },
            ZpError::Runtime {
                details: String::new(),
            },
            ZpError::Interrupted { signal: 15 },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(ZpError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_starts_with_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.starts_with(&format!("[{}]", err.code())),
                "display should lead with its code: {msg}"
            );
        }
    }

    #[test]
    fn io_convenience_constructor_names_operation() {
        let err = ZpError::io(
            "truncate",
            "/tmp/pad.bin",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code(), "ZP-3003");
        let msg = err.to_string();
        assert!(msg.contains("truncate"));
        assert!(msg.contains("/tmp/pad.bin"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn only_config_errors_are_configuration() {
        for err in all_variants() {
            let expected = err.code().starts_with("ZP-10");
            assert_eq!(err.is_configuration(), expected, "{err}");
        }
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: ZpError = toml_err.into();
        assert_eq!(err.code(), "ZP-1002");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ZpError = json_err.into();
        assert_eq!(err.code(), "ZP-3101");
    }
}
