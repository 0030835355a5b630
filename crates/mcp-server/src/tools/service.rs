//! MCP tool surface over the query engine.

use super::expressions::{self, BlockType};
use super::schemas::{
    CleanupRequest, PresetRequest, QueryOptions, QueryRawRequest, QueryRequest,
    SummariesRequest, ToolBlocksRequest, ToolsRequest, UserMessagesRequest,
};
use crate::config::ServerConfig;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler};
use serde::Serialize;
use sessionq_engine::{
    CancellationToken, DeliveryOptions, EngineError, ProjectsDirLocator, QueryExecutor,
    QueryService, StopReason,
};
use sessionq_protocol::{ErrorCategory, ErrorEnvelope, OutputMode, Scope};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CLEANUP_AGE_DAYS: u64 = 7;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Session history query service
#[derive(Clone)]
pub struct SessionQueryService {
    tool_router: ToolRouter<Self>,
    engine: Arc<QueryService>,
    config: Arc<ServerConfig>,
    grouping_hash: String,
    /// Cancelled on shutdown; every request runs under a child of it.
    shutdown: CancellationToken,
}

impl SessionQueryService {
    pub fn new(config: ServerConfig) -> Self {
        let mut locator = ProjectsDirLocator::new(&config.projects_root);
        if let Some(dir) = &config.session_dir {
            locator = locator.with_session_dir(dir);
        }
        let engine = QueryService::new(&config.engine, Arc::new(locator));
        Self {
            tool_router: Self::tool_router(),
            engine: Arc::new(engine),
            grouping_hash: config.grouping_hash(),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token for one request: cancelled when the client cancels the call or
    /// the server shuts down, whichever comes first.
    fn request_token(&self, client: &CancellationToken) -> CancellationToken {
        let token = self.shutdown.child_token();
        let linked = token.clone();
        let client = client.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = client.cancelled() => linked.cancel(),
                () = linked.cancelled() => {}
            }
        });
        token
    }

    async fn dispatch(
        &self,
        purpose: &str,
        plan: Plan,
        client: &CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        let (expression, options) = match plan {
            Ok(plan) => plan,
            Err(message) => return Ok(invalid_request(message)),
        };
        let scope = match options.scope.as_deref().map(str::trim) {
            None | Some("") => Scope::default(),
            Some(raw) => match raw.parse::<Scope>() {
                Ok(scope) => scope,
                Err(message) => return Ok(invalid_request(message)),
            },
        };
        let request = sessionq_engine::QueryRequest {
            scope,
            expression,
            limit: options.limit.unwrap_or(0),
            cwd: self.config.cwd.clone(),
        };
        let delivery = DeliveryOptions {
            mode_override: options
                .output_mode
                .as_deref()
                .and_then(OutputMode::parse_override),
            inline_threshold: options.inline_threshold_bytes,
            grouping_hash: self.grouping_hash.clone(),
            purpose: purpose.to_string(),
        };

        let cancel = self.request_token(client);
        // Finishing the request releases the forwarding task.
        let _release = cancel.clone().drop_guard();
        match self.engine.query(&request, &delivery, &cancel).await {
            Ok(reply) => {
                log::debug!(
                    "{purpose}: {} record(s) from {} file(s), stop={:?}",
                    reply.stats.record_count,
                    reply.stats.files_scanned,
                    reply.stop
                );
                if reply.stop == StopReason::Cancelled {
                    log::info!("{purpose}: cancelled, returning partial results");
                }
                json_result(&reply.response)
            }
            Err(err) => Ok(engine_error(purpose, &err)),
        }
    }
}

impl Default for SessionQueryService {
    fn default() -> Self {
        Self::new(ServerConfig::from_env())
    }
}

/// Expression and options a tool call resolves to, or why it was rejected.
type Plan = Result<(String, QueryOptions), String>;

fn plan_query(request: QueryRequest) -> Plan {
    let expression = QueryExecutor::build_expression(
        request.jq_filter.as_deref().unwrap_or(""),
        request.jq_transform.as_deref(),
    );
    Ok((expression, request.options()))
}

fn plan_query_raw(request: QueryRawRequest) -> Plan {
    if request.jq_expression.trim().is_empty() {
        return Err("jq_expression must not be empty".into());
    }
    let options = request.options();
    Ok((request.jq_expression, options))
}

fn plan_tool_blocks(request: ToolBlocksRequest) -> Plan {
    let block = BlockType::parse(request.block_type.as_deref())?;
    Ok((expressions::tool_blocks(block), request.options()))
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string(value).map_err(|err| {
        McpError::internal_error(format!("failed to serialize response: {err}"), None)
    })?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn tool_error_envelope(envelope: &ErrorEnvelope) -> CallToolResult {
    let text = serde_json::to_string(envelope)
        .unwrap_or_else(|_| format!("{{\"code\":\"{}\"}}", envelope.code));
    CallToolResult::error(vec![Content::text(text)])
}

fn invalid_request(message: impl Into<String>) -> CallToolResult {
    tool_error_envelope(&ErrorEnvelope::new(ErrorCategory::InvalidRequest, message))
}

fn engine_error(purpose: &str, err: &EngineError) -> CallToolResult {
    log::warn!("{purpose} failed: {err}");
    tool_error_envelope(&err.to_envelope())
}

#[tool_router]
impl SessionQueryService {
    #[tool(
        description = "Query session history with a jq filter (and optional transform). Results up to the inline threshold are returned as {\"mode\":\"inline\",\"data\":[...]}; larger results are written to a temp JSONL file and returned as {\"mode\":\"file_ref\",\"file_ref\":{...}}."
    )]
    pub async fn query(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch("query", plan_query(request), &context.ct).await
    }

    #[tool(description = "Run a complete jq expression against every session record.")]
    pub async fn query_raw(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<QueryRawRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch("query_raw", plan_query_raw(request), &context.ct)
            .await
    }

    #[tool(description = "User messages, optionally filtered by a regex over the content.")]
    pub async fn query_user_messages(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<UserMessagesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let expression = expressions::user_messages(
            request.pattern.as_deref(),
            request.content_type.as_deref(),
        );
        let plan = Ok((expression, request.options()));
        self.dispatch("query_user_messages", plan, &context.ct)
            .await
    }

    #[tool(description = "Assistant messages that call tools, optionally only a named tool.")]
    pub async fn query_tools(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<ToolsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((
            expressions::tools(request.tool_name.as_deref()),
            request.options(),
        ));
        self.dispatch("query_tools", plan, &context.ct).await
    }

    #[tool(description = "Messages carrying a tool result flagged as an error.")]
    pub async fn query_tool_errors(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::tool_errors(), request.options()));
        self.dispatch("query_tool_errors", plan, &context.ct).await
    }

    #[tool(description = "Assistant messages that report token usage.")]
    pub async fn query_token_usage(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::token_usage(), request.options()));
        self.dispatch("query_token_usage", plan, &context.ct).await
    }

    #[tool(description = "User and assistant turns in order.")]
    pub async fn query_conversation_flow(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::conversation_flow(), request.options()));
        self.dispatch("query_conversation_flow", plan, &context.ct)
            .await
    }

    #[tool(description = "System records reporting API errors.")]
    pub async fn query_system_errors(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::system_errors(), request.options()));
        self.dispatch("query_system_errors", plan, &context.ct)
            .await
    }

    #[tool(description = "File history snapshot records.")]
    pub async fn query_file_snapshots(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::file_snapshots(), request.options()));
        self.dispatch("query_file_snapshots", plan, &context.ct)
            .await
    }

    #[tool(description = "Records that carry a timestamp.")]
    pub async fn query_timestamps(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<PresetRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((expressions::timestamps(), request.options()));
        self.dispatch("query_timestamps", plan, &context.ct).await
    }

    #[tool(description = "Session summaries, optionally filtered by a case-insensitive keyword.")]
    pub async fn query_summaries(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<SummariesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let plan = Ok((
            expressions::summaries(request.keyword.as_deref()),
            request.options(),
        ));
        self.dispatch("query_summaries", plan, &context.ct).await
    }

    #[tool(description = "Individual tool_use or tool_result content blocks.")]
    pub async fn query_tool_blocks(
        &self,
        context: RequestContext<RoleServer>,
        Parameters(request): Parameters<ToolBlocksRequest>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch("query_tool_blocks", plan_tool_blocks(request), &context.ct)
            .await
    }

    #[tool(description = "Delete temp result files older than max_age_days (default 7).")]
    pub async fn cleanup_temp_files(
        &self,
        Parameters(request): Parameters<CleanupRequest>,
    ) -> Result<CallToolResult, McpError> {
        let days = request.max_age_days.unwrap_or(DEFAULT_CLEANUP_AGE_DAYS);
        let age = Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
        match self.engine.cleanup(age).await {
            Ok(report) => json_result(&report),
            Err(err) => Ok(engine_error("cleanup_temp_files", &err)),
        }
    }
}

#[tool_handler]
impl ServerHandler for SessionQueryService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Query agent session histories (JSONL) with jq expressions. Use 'query' or 'query_raw' for arbitrary expressions and the query_* tools for common questions. Large results come back as a file_ref pointing at a temp JSONL file; remove old ones with 'cleanup_temp_files'.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use sessionq_engine::EngineConfig;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn service(sessions: &Path, temp: &Path, threshold: u64) -> SessionQueryService {
        SessionQueryService::new(ServerConfig {
            engine: EngineConfig {
                inline_threshold_bytes: threshold,
                temp_dir: temp.to_path_buf(),
                ..EngineConfig::default()
            },
            projects_root: PathBuf::from("/unused"),
            session_dir: Some(sessions.to_path_buf()),
            grouping_id: Some("testhash".into()),
            cwd: PathBuf::from("/work"),
        })
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().expect("tempdir");
        let sessions = tmp.path().join("sessions");
        std::fs::create_dir_all(&sessions).expect("mkdir");
        let lines = [
            json!({"type": "user", "message": {"content": "hello there"}}),
            json!({"type": "assistant", "message": {"content": [{"type": "tool_use", "name": "Bash"}]}}),
            json!({"type": "summary", "summary": "Greeting"}),
        ];
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        std::fs::write(sessions.join("s.jsonl"), text).expect("write");
        tmp
    }

    fn text(result: &CallToolResult) -> Value {
        let raw = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .expect("text content");
        serde_json::from_str(&raw).expect("json")
    }

    fn preset() -> QueryOptions {
        PresetRequest::default().options()
    }

    async fn call(svc: &SessionQueryService, purpose: &str, plan: Plan) -> CallToolResult {
        svc.dispatch(purpose, plan, &CancellationToken::new())
            .await
            .expect("call")
    }

    fn raw(expression: &str) -> QueryRawRequest {
        QueryRawRequest {
            jq_expression: expression.into(),
            scope: None,
            limit: None,
            output_mode: None,
            inline_threshold_bytes: None,
        }
    }

    #[tokio::test]
    async fn query_returns_inline_payload() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);
        let plan = plan_query(QueryRequest {
            jq_filter: Some(r#"select(.type == "user")"#.into()),
            jq_transform: Some(".message.content".into()),
            scope: None,
            limit: None,
            output_mode: None,
            inline_threshold_bytes: None,
        });
        let result = call(&svc, "query", plan).await;
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text(&result), json!({"mode": "inline", "data": ["hello there"]}));
    }

    #[tokio::test]
    async fn parameter_threshold_beats_config() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);
        let plan = plan_query_raw(QueryRawRequest {
            scope: Some("session".into()),
            inline_threshold_bytes: Some(1),
            ..raw(".")
        });
        let body = text(&call(&svc, "query_raw", plan).await);
        assert_eq!(body["mode"], "file_ref");
        assert_eq!(body["file_ref"]["line_count"], 3);
        let path = body["file_ref"]["path"].as_str().expect("path");
        assert!(path.contains("sessionq-mcp-testhash-"), "{path}");
        assert!(path.ends_with("-query_raw.jsonl"), "{path}");
    }

    #[tokio::test]
    async fn convenience_tools_run_their_presets() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);

        let tools = call(&svc, "query_tools", Ok((expressions::tools(Some("Bash")), preset()))).await;
        assert_eq!(text(&tools)["data"].as_array().map(Vec::len), Some(1));

        let flow = call(
            &svc,
            "query_conversation_flow",
            Ok((expressions::conversation_flow(), preset())),
        )
        .await;
        assert_eq!(text(&flow)["data"].as_array().map(Vec::len), Some(2));

        let errors = call(
            &svc,
            "query_system_errors",
            Ok((expressions::system_errors(), preset())),
        )
        .await;
        assert_eq!(text(&errors), json!({"mode": "inline", "data": []}));
    }

    #[tokio::test]
    async fn errors_carry_a_stable_code() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);

        let bad = call(&svc, "query_raw", plan_query_raw(raw("select(.type =="))).await;
        assert_eq!(bad.is_error, Some(true));
        assert_eq!(text(&bad)["code"], "invalid_expression");

        let blank = call(&svc, "query_raw", plan_query_raw(raw("  "))).await;
        assert_eq!(text(&blank)["code"], "invalid_request");

        let options = PresetRequest {
            scope: Some("everything".into()),
            ..PresetRequest::default()
        }
        .options();
        let scope = call(&svc, "query_tool_errors", Ok((expressions::tool_errors(), options))).await;
        assert_eq!(text(&scope)["code"], "invalid_request");

        let blocks = plan_tool_blocks(ToolBlocksRequest {
            block_type: Some("text".into()),
            scope: None,
            limit: None,
            output_mode: None,
            inline_threshold_bytes: None,
        });
        let blocks = call(&svc, "query_tool_blocks", blocks).await;
        assert_eq!(text(&blocks)["code"], "invalid_request");
    }

    #[tokio::test]
    async fn missing_sessions_report_no_session_files() {
        let tmp = TempDir::new().expect("tempdir");
        let svc = service(&tmp.path().join("absent"), &tmp.path().join("out"), 8192);
        let result = call(&svc, "query_timestamps", Ok((expressions::timestamps(), preset()))).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text(&result)["code"], "no_session_files");
    }

    #[tokio::test]
    async fn request_token_follows_client_and_shutdown() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);

        let client = CancellationToken::new();
        let token = svc.request_token(&client);
        assert!(!token.is_cancelled());
        client.cancel();
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("client cancellation reaches the request");

        let pending = svc.request_token(&CancellationToken::new());
        svc.shutdown_token().cancel();
        assert!(pending.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_client_gets_an_empty_result() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);
        let client = CancellationToken::new();
        client.cancel();
        let result = svc
            .dispatch("query_raw", plan_query_raw(raw(".")), &client)
            .await
            .expect("call");
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text(&result), json!({"mode": "inline", "data": []}));
    }

    #[tokio::test]
    async fn cleanup_reports_removed_files() {
        let tmp = fixture();
        let svc = service(&tmp.path().join("sessions"), &tmp.path().join("out"), 8192);
        let result = svc
            .cleanup_temp_files(Parameters(CleanupRequest { max_age_days: None }))
            .await
            .expect("call");
        assert_eq!(
            text(&result),
            json!({"removed_count": 0, "freed_bytes": 0, "files": []})
        );
    }
}
