use crate::cache::ExpressionCache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::executor::{QueryExecutor, QueryOutcome, QueryRequest, StopReason, StreamLimits};
use crate::locator::SessionLocator;
use crate::mode::ModeSelector;
use crate::response::{DeliveryOptions, ResponseBuilder};
use crate::temp_store::TempFileStore;
use serde::Serialize;
use sessionq_protocol::{CleanupReport, QueryResponse};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const GROUPING_HASH_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub record_count: usize,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub lines_skipped: usize,
    pub eval_errors: usize,
}

impl From<&QueryOutcome> for QueryStats {
    fn from(outcome: &QueryOutcome) -> Self {
        Self {
            record_count: outcome.records.len(),
            files_scanned: outcome.files_scanned,
            files_failed: outcome.files_failed,
            lines_skipped: outcome.lines_skipped,
            eval_errors: outcome.eval_errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryReply {
    pub response: QueryResponse,
    pub stop: StopReason,
    pub stats: QueryStats,
}

/// Evaluation plus delivery behind one object. Holds the expression cache and
/// the temp-file store, so one instance should serve every request.
pub struct QueryService {
    executor: QueryExecutor,
    responses: ResponseBuilder,
}

impl QueryService {
    pub fn new(config: &EngineConfig, locator: Arc<dyn SessionLocator>) -> Self {
        let executor = QueryExecutor::new(
            Arc::new(ExpressionCache::new(config.cache_capacity)),
            locator,
            StreamLimits {
                max_line_bytes: config.max_line_bytes,
            },
        );
        let responses = ResponseBuilder::new(
            ModeSelector::new(config.inline_threshold_bytes),
            Arc::new(TempFileStore::new(&config.temp_dir, &config.temp_prefix)),
        );
        Self::from_parts(executor, responses)
    }

    pub fn from_parts(executor: QueryExecutor, responses: ResponseBuilder) -> Self {
        Self {
            executor,
            responses,
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn responses(&self) -> &ResponseBuilder {
        &self.responses
    }

    /// Runs the query to completion (or the limit, or cancellation) and
    /// delivers whatever was collected. Failures never carry partial data.
    pub async fn query(
        &self,
        request: &QueryRequest,
        delivery: &DeliveryOptions,
        cancel: &CancellationToken,
    ) -> Result<QueryReply> {
        let outcome = self.executor.evaluate(request, cancel).await?;
        let stats = QueryStats::from(&outcome);
        if outcome.stop == StopReason::Cancelled {
            log::info!("query cancelled after {} record(s)", stats.record_count);
        }
        let response = self.responses.build(outcome.records, delivery).await?;
        Ok(QueryReply {
            response,
            stop: outcome.stop,
            stats,
        })
    }

    pub async fn cleanup(&self, max_age: Duration) -> Result<CleanupReport> {
        self.responses.store().cleanup_older_than(max_age).await
    }
}

/// Short identifier grouping temp artifacts by session or project: the first
/// eight characters of `explicit` when given, else of the SHA-256 of `cwd`.
pub fn grouping_hash(explicit: Option<&str>, cwd: &Path) -> String {
    if let Some(explicit) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return explicit.chars().take(GROUPING_HASH_LEN).collect();
    }
    let digest = Sha256::digest(cwd.to_string_lossy().as_bytes());
    let mut out = String::with_capacity(GROUPING_HASH_LEN);
    for byte in digest.iter().take(GROUPING_HASH_LEN / 2) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_hash_prefers_explicit_id() {
        assert_eq!(
            grouping_hash(Some("0123456789abcdef"), Path::new("/x")),
            "01234567"
        );
        assert_eq!(grouping_hash(Some("abc"), Path::new("/x")), "abc");
    }

    #[test]
    fn grouping_hash_falls_back_to_cwd_digest() {
        let a = grouping_hash(None, Path::new("/work/a"));
        let b = grouping_hash(Some("  "), Path::new("/work/a"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, grouping_hash(None, Path::new("/work/b")));
    }
}
