use sessionq_filter::FilterError;
use sessionq_protocol::{ErrorCategory, ErrorEnvelope};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures that abort a query or a cleanup.
///
/// Per-record problems (malformed lines, evaluation errors, a single unreadable
/// file) never surface here; the executor counts and skips them.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid expression: {0}")]
    InvalidExpression(#[from] FilterError),

    #[error("no session files found: {0}")]
    NoSessionFiles(String),

    #[error("session lookup failed: {0}")]
    Locator(String),

    #[error("none of the {attempted} session files could be opened")]
    NoAccessibleFiles { attempted: usize },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidExpression(_) => ErrorCategory::InvalidExpression,
            Self::NoSessionFiles(_) => ErrorCategory::NoSessionFiles,
            Self::Locator(_) => ErrorCategory::Locator,
            Self::NoAccessibleFiles { .. } => ErrorCategory::FileAccess,
            Self::Serialize(_) => ErrorCategory::Serialization,
            Self::Write { .. } => ErrorCategory::WriteFailed,
            Self::Io(_) => ErrorCategory::Io,
            Self::InvalidRequest(_) => ErrorCategory::InvalidRequest,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        let envelope = ErrorEnvelope::new(self.category(), self.to_string());
        match self {
            Self::InvalidExpression(_) => {
                envelope.with_hint("Check the jq syntax; string literals need double quotes")
            }
            Self::NoSessionFiles(_) => {
                envelope.with_hint("Run from the project directory or set SESSIONQ_SESSION_DIR")
            }
            _ => envelope,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionq_filter::Filter;

    #[test]
    fn categories_are_stable() {
        let compile = Filter::compile(".a |").unwrap_err();
        assert_eq!(
            EngineError::from(compile).category(),
            ErrorCategory::InvalidExpression
        );
        assert_eq!(
            EngineError::NoAccessibleFiles { attempted: 2 }.category(),
            ErrorCategory::FileAccess
        );
        let write = EngineError::Write {
            path: PathBuf::from("/tmp/x.jsonl"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(write.category(), ErrorCategory::WriteFailed);
        assert_eq!(write.to_string(), "failed to write /tmp/x.jsonl: disk full");
    }

    #[test]
    fn envelope_carries_code_and_hint() {
        let envelope = EngineError::NoSessionFiles("/p".into()).to_envelope();
        assert_eq!(envelope.code, "no_session_files");
        assert!(envelope.hint.is_some());
        let envelope = EngineError::InvalidRequest("limit".into()).to_envelope();
        assert_eq!(envelope.code, "invalid_request");
        assert_eq!(envelope.message, "invalid request: limit");
        assert!(envelope.hint.is_none());
    }
}
