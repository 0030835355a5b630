use crate::cache::ExpressionCache;
use crate::error::{EngineError, Result};
use crate::jsonl::{JsonlReader, LineEvent, DEFAULT_MAX_LINE_BYTES};
use crate::locator::{sort_newest_first, SessionLocator};
use serde::Serialize;
use serde_json::Value;
use sessionq_filter::{EvalError, Filter};
use sessionq_protocol::Scope;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Longest accepted line; longer lines are skipped.
    pub max_line_bytes: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub scope: Scope,
    pub expression: String,
    /// Maximum number of outputs; `0` means unlimited.
    pub limit: usize,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The limit was reached; remaining input was not read.
    Capped,
    /// Every candidate file was read to the end.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub records: Vec<Value>,
    pub stop: StopReason,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub lines_skipped: usize,
    pub eval_errors: usize,
}

impl QueryOutcome {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            stop: StopReason::Exhausted,
            files_scanned: 0,
            files_failed: 0,
            lines_skipped: 0,
            eval_errors: 0,
        }
    }
}

enum FileEnd {
    Eof,
    Capped,
    Cancelled,
}

/// Compiles expressions through the shared cache and streams candidate
/// session files through them.
pub struct QueryExecutor {
    cache: Arc<ExpressionCache>,
    locator: Arc<dyn SessionLocator>,
    limits: StreamLimits,
}

impl QueryExecutor {
    pub fn new(
        cache: Arc<ExpressionCache>,
        locator: Arc<dyn SessionLocator>,
        limits: StreamLimits,
    ) -> Self {
        Self {
            cache,
            locator,
            limits,
        }
    }

    pub fn cache(&self) -> &Arc<ExpressionCache> {
        &self.cache
    }

    /// Joins a selection filter and an optional transform into one pipeline.
    pub fn build_expression(filter: &str, transform: Option<&str>) -> String {
        let filter = filter.trim();
        let filter = if filter.is_empty() { "." } else { filter };
        match transform.map(str::trim) {
            Some(transform) if !transform.is_empty() => format!("{filter} | {transform}"),
            _ => filter.to_string(),
        }
    }

    pub fn compile(&self, raw: &str) -> Result<Arc<Filter>> {
        let key = match raw.trim() {
            "" => ".",
            trimmed => trimmed,
        };
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit);
        }
        let compiled = Arc::new(Filter::compile(key)?);
        self.cache.put(key, compiled.clone());
        Ok(compiled)
    }

    pub async fn evaluate(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryOutcome> {
        let filter = self.compile(&request.expression)?;
        let candidates = self.locator.locate(request.scope, &request.cwd).await?;
        let files = order_by_mtime(candidates).await;

        let mut outcome = QueryOutcome::empty();
        for path in &files {
            if cancel.is_cancelled() {
                outcome.stop = StopReason::Cancelled;
                return Ok(outcome);
            }
            let file = match tokio::fs::File::open(path).await {
                Ok(file) => file,
                Err(err) => {
                    log::warn!("skipping {}: {err}", path.display());
                    outcome.files_failed += 1;
                    continue;
                }
            };
            outcome.files_scanned += 1;
            match self
                .scan_file(path, file, &filter, request.limit, cancel, &mut outcome)
                .await
            {
                FileEnd::Eof => {}
                FileEnd::Capped => {
                    outcome.stop = StopReason::Capped;
                    return Ok(outcome);
                }
                FileEnd::Cancelled => {
                    outcome.stop = StopReason::Cancelled;
                    return Ok(outcome);
                }
            }
        }

        if outcome.files_scanned == 0 && !files.is_empty() {
            return Err(EngineError::NoAccessibleFiles {
                attempted: files.len(),
            });
        }
        log::debug!(
            "query scanned {} file(s), {} record(s), {} skipped line(s), {} evaluation error(s)",
            outcome.files_scanned,
            outcome.records.len(),
            outcome.lines_skipped,
            outcome.eval_errors
        );
        Ok(outcome)
    }

    async fn scan_file(
        &self,
        path: &Path,
        file: tokio::fs::File,
        filter: &Filter,
        limit: usize,
        cancel: &CancellationToken,
        outcome: &mut QueryOutcome,
    ) -> FileEnd {
        let mut reader = JsonlReader::new(BufReader::new(file), self.limits.max_line_bytes);
        loop {
            if cancel.is_cancelled() {
                return FileEnd::Cancelled;
            }
            let record = match reader.next_event().await {
                Ok(Some(LineEvent::Record(record))) => record,
                Ok(Some(LineEvent::Skipped(reason))) => {
                    log::debug!("skipped {reason:?} line in {}", path.display());
                    outcome.lines_skipped += 1;
                    continue;
                }
                Ok(None) => return FileEnd::Eof,
                Err(err) => {
                    log::warn!("read error in {}: {err}", path.display());
                    outcome.files_failed += 1;
                    return FileEnd::Eof;
                }
            };

            if filter.is_identity() {
                outcome.records.push(record);
                if limit > 0 && outcome.records.len() >= limit {
                    return FileEnd::Capped;
                }
                continue;
            }
            let mut capped = false;
            let evaluated = filter.for_each_until(&record, &|| cancel.is_cancelled(), |value| {
                outcome.records.push(value);
                if limit > 0 && outcome.records.len() >= limit {
                    capped = true;
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            });
            match evaluated {
                Ok(()) if capped => return FileEnd::Capped,
                Ok(()) => {}
                Err(EvalError::Interrupted) => return FileEnd::Cancelled,
                Err(err) => {
                    log::debug!("evaluation error in {}: {err}", path.display());
                    outcome.eval_errors += 1;
                }
            }
        }
    }
}

async fn order_by_mtime(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut stamped = Vec::with_capacity(paths.len());
    for path in paths {
        let modified = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.modified().ok(),
            Err(_) => None,
        };
        stamped.push((modified, path));
    }
    sort_newest_first(&mut stamped);
    stamped.into_iter().map(|(_, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedLocator(Vec<PathBuf>);

    #[async_trait]
    impl SessionLocator for FixedLocator {
        async fn locate(&self, _scope: Scope, _cwd: &Path) -> Result<Vec<PathBuf>> {
            if self.0.is_empty() {
                return Err(EngineError::NoSessionFiles("fixed".into()));
            }
            Ok(self.0.clone())
        }
    }

    fn executor(files: Vec<PathBuf>) -> QueryExecutor {
        QueryExecutor::new(
            Arc::new(ExpressionCache::new(4)),
            Arc::new(FixedLocator(files)),
            StreamLimits::default(),
        )
    }

    fn request(expression: &str, limit: usize) -> QueryRequest {
        QueryRequest {
            scope: Scope::Project,
            expression: expression.to_string(),
            limit,
            cwd: PathBuf::from("/"),
        }
    }

    fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n") + "\n").expect("write");
        path
    }

    #[test]
    fn build_expression_joins_filter_and_transform() {
        assert_eq!(QueryExecutor::build_expression("", None), ".");
        assert_eq!(QueryExecutor::build_expression("  ", Some(" ")), ".");
        assert_eq!(
            QueryExecutor::build_expression("select(.a)", Some(".b")),
            "select(.a) | .b"
        );
        assert_eq!(QueryExecutor::build_expression("", Some(".b")), ". | .b");
    }

    #[test]
    fn compile_uses_the_cache() {
        let exec = executor(Vec::new());
        let first = exec.compile(" .type ").expect("compile");
        let second = exec.compile(".type").expect("compile");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(exec.cache().contains(".type"));

        exec.compile("").expect("identity");
        assert!(exec.cache().contains("."));
    }

    #[tokio::test]
    async fn syntax_error_is_fatal_before_reading() {
        let exec = executor(Vec::new());
        let err = exec
            .evaluate(&request("select(", 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidExpression(_)), "{err:?}");
        assert_eq!(exec.cache().len(), 0);
    }

    #[tokio::test]
    async fn locator_errors_propagate() {
        let exec = executor(Vec::new());
        let err = exec
            .evaluate(&request(".", 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoSessionFiles(_)));
    }

    #[tokio::test]
    async fn collects_fan_out_and_counts_problems() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_lines(
            tmp.path(),
            "s.jsonl",
            &[
                r#"{"items":[1,2]}"#,
                "not json",
                "",
                r#"{"items":"oops"}"#,
                r#"{"items":[3]}"#,
            ],
        );
        let exec = executor(vec![path]);
        let outcome = exec
            .evaluate(&request(".items[]", 0), &CancellationToken::new())
            .await
            .expect("evaluate");
        assert_eq!(outcome.records, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.files_scanned, 1);
        assert_eq!(outcome.lines_skipped, 1);
        assert_eq!(outcome.eval_errors, 1);
    }

    #[tokio::test]
    async fn limit_stops_mid_record_fan_out() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_lines(tmp.path(), "s.jsonl", &["[1,2,3]", "[4,5]"]);
        let exec = executor(vec![path]);
        let outcome = exec
            .evaluate(&request(".[]", 2), &CancellationToken::new())
            .await
            .expect("evaluate");
        assert_eq!(outcome.records, vec![json!(1), json!(2)]);
        assert_eq!(outcome.stop, StopReason::Capped);
    }

    #[tokio::test]
    async fn unreadable_files_are_skipped_but_not_all_of_them() {
        let tmp = TempDir::new().expect("tempdir");
        let good = write_lines(tmp.path(), "good.jsonl", &[r#"{"n":1}"#]);
        let missing = tmp.path().join("missing.jsonl");
        let exec = executor(vec![missing.clone(), good]);
        let outcome = exec
            .evaluate(&request(".n", 0), &CancellationToken::new())
            .await
            .expect("evaluate");
        assert_eq!(outcome.records, vec![json!(1)]);
        assert_eq!(outcome.files_failed, 1);

        let exec = executor(vec![missing]);
        let err = exec
            .evaluate(&request(".n", 0), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NoAccessibleFiles { attempted: 1 }));
    }

    #[tokio::test]
    async fn cancelled_token_returns_partial_outcome() {
        let tmp = TempDir::new().expect("tempdir");
        let path = write_lines(tmp.path(), "s.jsonl", &["1", "2"]);
        let exec = executor(vec![path]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = exec
            .evaluate(&request(".", 0), &cancel)
            .await
            .expect("evaluate");
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_interrupts_a_running_filter_and_skips_later_files() {
        let tmp = TempDir::new().expect("tempdir");
        let first = write_lines(tmp.path(), "first.jsonl", &[r#""a""#, r#""spin""#, r#""b""#]);
        // Missing files sort last; opening it would count as a failure.
        let second = tmp.path().join("second.jsonl");
        let exec = executor(vec![first, second]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(100));
            trigger.cancel();
        });
        let outcome = exec
            .evaluate(
                &request(r#"if . == "spin" then last(repeat(1)) else . end"#, 0),
                &cancel,
            )
            .await
            .expect("evaluate");
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(outcome.records, vec![json!("a")]);
        assert_eq!(outcome.files_scanned, 1);
        assert_eq!(outcome.files_failed, 0);
        assert_eq!(outcome.eval_errors, 0);
    }
}
