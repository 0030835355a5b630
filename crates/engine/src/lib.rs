//! Query-and-delivery pipeline over line-delimited JSON session histories.
//!
//! A request flows through four stages:
//!
//! 1. [`QueryExecutor::compile`] turns the expression into a [`Filter`](sessionq_filter::Filter),
//!    reusing compiled filters from the [`ExpressionCache`].
//! 2. A [`SessionLocator`] resolves the scope to candidate files.
//! 3. [`QueryExecutor::evaluate`] streams every file newest-first through the
//!    filter until the limit is reached or cancellation is requested.
//! 4. [`ResponseBuilder::build`] measures the result set and delivers it
//!    inline or through a [`TempFileStore`] side file.
//!
//! [`QueryService`] wires the stages together from an [`EngineConfig`].

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod jsonl;
pub mod locator;
pub mod mode;
pub mod response;
pub mod service;
pub mod temp_store;

pub use cache::{ExpressionCache, DEFAULT_CACHE_CAPACITY};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use executor::{QueryExecutor, QueryOutcome, QueryRequest, StopReason, StreamLimits};
pub use locator::{default_projects_root, project_dir_name, ProjectsDirLocator, SessionLocator};
pub use mode::ModeSelector;
pub use response::{DeliveryOptions, ResponseBuilder};
pub use service::{grouping_hash, QueryReply, QueryService, QueryStats};
pub use temp_store::{TempFileStore, DEFAULT_TEMP_PREFIX};

pub use tokio_util::sync::CancellationToken;
