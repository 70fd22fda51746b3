//! Error types for the procurement risk pipeline
//!
//! Each concern has its own thiserror enum; the orchestration layer wraps
//! them in `anyhow` with context. The taxonomy follows the failure policy
//! of the pipeline: configuration and input errors stop a
//! stage, while resolution misses, exhausted screening retries and
//! verification findings are recorded in reports instead of surfacing here.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Input table errors. Missing columns are configuration problems and
/// fatal for the stage; bad values in single rows never reach this type.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to open {table} table {}: {source}", .path.display())]
    Open {
        table: &'static str,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{table} table {} is missing required columns: {}", .path.display(), .missing.join(", "))]
    MissingColumns {
        table: &'static str,
        path: PathBuf,
        missing: Vec<String>,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Graph construction errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph belongs to jurisdiction {graph}, cannot extend it for {requested}")]
    JurisdictionMismatch { graph: String, requested: String },
}

/// Snapshot persistence errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Snapshot version mismatch: expected {expected}, got {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Snapshot content hash mismatch in {}", .path.display())]
    HashMismatch { path: PathBuf },

    #[error("Snapshot edge references unknown node '{node}'")]
    DanglingEdge { node: String },
}

/// Screening collaborator errors
#[derive(Error, Debug)]
pub enum ScreeningError {
    /// Worth retrying: timeouts, connection failures, throttling, 5xx
    #[error("Transient screening failure: {0}")]
    Transient(String),

    #[error("Screening request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode screening response: {0}")]
    Decode(String),

    #[error("Failed to build screening client: {0}")]
    Client(String),

    #[error("Checkpoint error on {}: {message}", .path.display())]
    Checkpoint { path: PathBuf, message: String },
}

impl ScreeningError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScreeningError::Transient(_))
    }
}

impl From<reqwest::Error> for ScreeningError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return ScreeningError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                return ScreeningError::Transient(err.to_string());
            }
            return ScreeningError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() {
            return ScreeningError::Decode(err.to_string());
        }
        ScreeningError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_message_lists_columns() {
        let err = TableError::MissingColumns {
            table: "procurement",
            path: PathBuf::from("awards.csv"),
            missing: vec!["WIN_NAME".into(), "ID_AWARD".into()],
        };
        assert_eq!(
            err.to_string(),
            "procurement table awards.csv is missing required columns: WIN_NAME, ID_AWARD"
        );
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(ScreeningError::Transient("timeout".into()).is_transient());
        assert!(!ScreeningError::Rejected {
            status: 400,
            message: "bad query".into()
        }
        .is_transient());
        assert!(!ScreeningError::Decode("eof".into()).is_transient());
    }
}
