//! sessionq MCP server
//!
//! Lets AI agents query their own session histories (JSONL records) with jq
//! expressions over the MCP stdio transport.
//!
//! ## Tools
//!
//! - `query` / `query_raw` - arbitrary jq filters
//! - `query_user_messages`, `query_tools`, `query_tool_errors`, ... - common questions
//! - `cleanup_temp_files` - remove old file_ref artifacts
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "sessionq": {
//!       "command": "sessionq-mcp"
//!     }
//!   }
//! }
//! ```

pub mod config;
pub mod tools;

use anyhow::Result;
use rmcp::transport::stdio;
use rmcp::ServiceExt;

pub use config::ServerConfig;
pub use tools::SessionQueryService;

pub async fn main_entry() -> Result<()> {
    // Configure logging to stderr only (stdout is for MCP protocol)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = ServerConfig::from_env();
    log::info!(
        "Starting sessionq MCP server (cwd {}, temp dir {})",
        config.cwd.display(),
        config.engine.temp_dir.display()
    );

    let service = SessionQueryService::new(config);
    let shutdown = service.shutdown_token();
    let server = service.serve(stdio()).await?;

    // Wait for the client to disconnect or an interrupt; either way every
    // in-flight query is cancelled and answers with what it has so far.
    tokio::select! {
        reason = server.waiting() => {
            shutdown.cancel();
            reason?;
        }
        interrupt = tokio::signal::ctrl_c() => {
            shutdown.cancel();
            interrupt?;
            log::info!("interrupted, shutting down");
        }
    }

    log::info!("sessionq MCP server stopped");
    Ok(())
}
