//! Error types for the aider-mcp crate.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Caller-visible error classification, serialized as `errorType` in the
/// tool result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Malformed or missing input, rejected before any external call.
    #[serde(rename = "ValidationError")]
    Validation,
    /// A required model name, credential, or directory could not be resolved.
    #[serde(rename = "ConfigurationError")]
    Configuration,
    /// The subprocess could not be started at all.
    #[serde(rename = "ExecutionError")]
    Execution,
    /// The subprocess ran and exited non-zero.
    #[serde(rename = "AiderError")]
    Aider,
    /// The generative call failed or returned no text.
    #[serde(rename = "ApiError")]
    Api,
    /// Directory creation or file write failed.
    #[serde(rename = "FileSystemError")]
    FileSystem,
    /// A subprocess or API call exceeded its deadline.
    #[serde(rename = "TimedOut")]
    TimedOut,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "ValidationError",
            Self::Configuration => "ConfigurationError",
            Self::Execution => "ExecutionError",
            Self::Aider => "AiderError",
            Self::Api => "ApiError",
            Self::FileSystem => "FileSystemError",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(s)
    }
}

/// Bridge-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Tool arguments failed schema or semantic validation.
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// A required configuration value is missing from every source.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The external command could not be spawned.
    #[error("failed to start {command}: {source}")]
    Execution {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command started but its exit status could not be observed.
    #[error("lost track of {command} after it started: {source}")]
    Supervision {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external command ran and exited unsuccessfully.
    #[error("{command} exited with {}", describe_exit(.exit_code))]
    Aider {
        command: String,
        exit_code: Option<i32>,
    },

    /// The generative API call failed or produced no text.
    #[error("API error: {0}")]
    Api(String),

    /// Filesystem failure while persisting a report.
    #[error("I/O error on {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Deadline exceeded.
    #[error("{what} timed out after {}s", .after.as_secs())]
    TimedOut { what: String, after: Duration },
}

impl BridgeError {
    /// Classification reported to the caller.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Execution { .. } | Self::Supervision { .. } => ErrorKind::Execution,
            Self::Aider { .. } => ErrorKind::Aider,
            Self::Api(_) => ErrorKind::Api,
            Self::FileSystem { .. } => ErrorKind::FileSystem,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
        }
    }

    /// Single-line message safe to hand back over the wire.
    ///
    /// Filesystem errors drop the path; everything else keeps only the first
    /// line of its display text.
    pub fn safe_message(&self) -> String {
        match self {
            Self::FileSystem { source, .. } => {
                first_line(&format!("file system error: {source}"))
            }
            other => first_line(&other.to_string()),
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |c| format!("code {c}"))
}

/// First non-empty line of `text`, trimmed.
pub fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .to_owned()
}

/// Convenience result type for aider-mcp operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_with_error_suffix() {
        let json = serde_json::to_string(&ErrorKind::FileSystem).expect("serialize");
        assert_eq!(json, "\"FileSystemError\"");
        assert_eq!(ErrorKind::TimedOut.to_string(), "TimedOut");
    }

    #[test]
    fn safe_message_is_single_line_without_path() {
        let err = BridgeError::FileSystem {
            path: PathBuf::from("/secret/reports/x.md"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied\nmore"),
        };
        let msg = err.safe_message();
        assert!(!msg.contains('\n'));
        assert!(!msg.contains("/secret"));
        assert_eq!(err.kind(), ErrorKind::FileSystem);
    }

    #[test]
    fn supervision_failure_is_not_reported_as_a_failed_start() {
        let err = BridgeError::Supervision {
            command: "aider".to_owned(),
            source: std::io::Error::other("wait failed"),
        };
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().starts_with("lost track of aider after it started"));
        assert!(!err.to_string().contains("failed to start"));
    }

    #[test]
    fn aider_error_mentions_exit_code() {
        let err = BridgeError::Aider {
            command: "aider".to_owned(),
            exit_code: Some(7),
        };
        assert_eq!(err.to_string(), "aider exited with code 7");
        let err = BridgeError::Aider {
            command: "aider".to_owned(),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "aider exited with a signal");
    }
}
