use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size threshold (bytes of line-delimited JSON) at or below which results are embedded inline.
pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 8 * 1024;

/// Which session files a query runs over.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Most recent session file only.
    Session,
    /// Every session file recorded for the current project.
    #[default]
    Project,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "project" => Ok(Self::Project),
            other => Err(format!(
                "unknown scope '{other}' (expected 'session' or 'project')"
            )),
        }
    }
}

/// Delivery channel for a result set.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Inline,
    FileRef,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::FileRef => "file_ref",
        }
    }

    /// Interpret a caller-supplied override. Anything other than a valid mode name means
    /// "select automatically".
    pub fn parse_override(raw: &str) -> Option<Self> {
        match raw.trim() {
            "inline" => Some(Self::Inline),
            "file_ref" => Some(Self::FileRef),
            _ => None,
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct FileSummary {
    pub record_count: usize,
    /// Compact JSON of the first record, truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Metadata describing a result set that was written to a side file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct FileReference {
    pub path: String,
    pub size_bytes: u64,
    pub line_count: usize,
    /// Alphabetical union of top-level field names across all records.
    pub fields: Vec<String>,
    pub summary: FileSummary,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryResponse {
    Inline { data: Vec<serde_json::Value> },
    FileRef { file_ref: FileReference },
}

impl QueryResponse {
    pub fn mode(&self) -> OutputMode {
        match self {
            Self::Inline { .. } => OutputMode::Inline,
            Self::FileRef { .. } => OutputMode::FileRef,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
pub struct CleanupReport {
    pub removed_count: usize,
    pub freed_bytes: u64,
    pub files: Vec<String>,
}

/// Stable, machine-checkable failure category.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    InvalidRequest,
    InvalidExpression,
    NoSessionFiles,
    Locator,
    FileAccess,
    Serialization,
    WriteFailed,
    Io,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidExpression => "invalid_expression",
            Self::NoSessionFiles => "no_session_files",
            Self::Locator => "locator",
            Self::FileAccess => "file_access",
            Self::Serialization => "serialization",
            Self::WriteFailed => "write_failed",
            Self::Io => "io",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code: category.as_str().to_string(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}
