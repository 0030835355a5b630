//! sessionq MCP tool surface: request schemas, preset expressions and the
//! service that routes tool calls into the engine.

mod expressions;
mod schemas;
mod service;

pub use service::SessionQueryService;
