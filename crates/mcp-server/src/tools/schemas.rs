use rmcp::schemars;
use serde::Deserialize;

/// Options every query-style tool accepts.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub scope: Option<String>,
    pub limit: Option<usize>,
    pub output_mode: Option<String>,
    pub inline_threshold_bytes: Option<u64>,
}

macro_rules! query_options {
    ($($request:ty),+ $(,)?) => {
        $(
            impl $request {
                pub fn options(&self) -> QueryOptions {
                    QueryOptions {
                        scope: self.scope.clone(),
                        limit: self.limit,
                        output_mode: self.output_mode.clone(),
                        inline_threshold_bytes: self.inline_threshold_bytes,
                    }
                }
            }
        )+
    };
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryRequest {
    /// Selection filter (jq syntax)
    #[schemars(
        description = "jq filter applied to every session record, e.g. 'select(.type == \"user\")'. Empty means '.'."
    )]
    pub jq_filter: Option<String>,

    /// Transform piped after the filter
    #[schemars(description = "Optional jq expression piped after jq_filter, e.g. '.message.content'.")]
    pub jq_transform: Option<String>,

    #[schemars(description = "'project' (default): every session of the current project; 'session': the newest session only.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode; anything else selects by size.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Results at or below this many bytes are returned inline (default 8192).")]
    pub inline_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct QueryRawRequest {
    #[schemars(description = "Complete jq expression evaluated against every session record.")]
    pub jq_expression: String,

    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UserMessagesRequest {
    #[schemars(description = "Regex matched against the message content.")]
    pub pattern: Option<String>,

    #[schemars(description = "'string' (default): typed prompts; 'array': block content such as tool results.")]
    pub content_type: Option<String>,

    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ToolsRequest {
    #[schemars(description = "Only records calling this tool, e.g. 'Bash'.")]
    pub tool_name: Option<String>,

    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SummariesRequest {
    #[schemars(description = "Case-insensitive regex matched against the summary text.")]
    pub keyword: Option<String>,

    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ToolBlocksRequest {
    #[schemars(description = "'tool_use' (default) or 'tool_result'.")]
    pub block_type: Option<String>,

    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

/// Parameters of the fixed-expression tools.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct PresetRequest {
    #[schemars(description = "'project' (default) or 'session'.")]
    pub scope: Option<String>,

    #[schemars(description = "Maximum number of results; 0 or omitted means unlimited.")]
    pub limit: Option<usize>,

    #[schemars(description = "'inline' or 'file_ref' to force a delivery mode.")]
    pub output_mode: Option<String>,

    #[schemars(description = "Inline size threshold in bytes.")]
    pub inline_threshold_bytes: Option<u64>,
}

query_options!(
    QueryRequest,
    QueryRawRequest,
    UserMessagesRequest,
    ToolsRequest,
    SummariesRequest,
    ToolBlocksRequest,
    PresetRequest,
);

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CleanupRequest {
    #[schemars(description = "Remove temp result files older than this many days (default 7).")]
    pub max_age_days: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn optional_fields_default_to_none() {
        let request: QueryRequest = serde_json::from_value(json!({})).expect("parse");
        let options = request.options();
        assert!(options.scope.is_none() && options.limit.is_none());
    }

    #[test]
    fn query_raw_requires_expression() {
        assert!(serde_json::from_value::<QueryRawRequest>(json!({"limit": 3})).is_err());
        let request: QueryRawRequest =
            serde_json::from_value(json!({"jq_expression": ".", "limit": 3, "scope": "session"}))
                .expect("parse");
        assert_eq!(request.options().limit, Some(3));
        assert_eq!(request.options().scope.as_deref(), Some("session"));
    }

    #[test]
    fn negative_limit_is_rejected() {
        assert!(serde_json::from_value::<PresetRequest>(json!({"limit": -1})).is_err());
    }
}
