use crate::error::Result;
use crate::mode::ModeSelector;
use crate::temp_store::TempFileStore;
use serde_json::Value;
use sessionq_protocol::{OutputMode, QueryResponse};
use std::sync::Arc;

/// Per-request delivery settings.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    pub mode_override: Option<OutputMode>,
    /// Overrides the builder's threshold for this request only.
    pub inline_threshold: Option<u64>,
    pub grouping_hash: String,
    /// Tool or command name recorded in artifact file names.
    pub purpose: String,
}

/// Turns a finished result set into the outbound response, writing a side
/// file when the data is too large to embed.
pub struct ResponseBuilder {
    selector: ModeSelector,
    store: Arc<TempFileStore>,
}

impl ResponseBuilder {
    pub fn new(selector: ModeSelector, store: Arc<TempFileStore>) -> Self {
        Self { selector, store }
    }

    pub fn selector(&self) -> ModeSelector {
        self.selector
    }

    pub fn store(&self) -> &Arc<TempFileStore> {
        &self.store
    }

    pub async fn build(&self, records: Vec<Value>, options: &DeliveryOptions) -> Result<QueryResponse> {
        let selector = options
            .inline_threshold
            .map(ModeSelector::new)
            .unwrap_or(self.selector);
        let size = ModeSelector::measure(&records)?;
        let mode = selector.decide(size, options.mode_override);
        log::debug!(
            "{} record(s), {size} bytes, threshold {} -> {mode}",
            records.len(),
            selector.threshold_bytes()
        );

        match mode {
            OutputMode::Inline => Ok(QueryResponse::Inline { data: records }),
            OutputMode::FileRef => {
                let path = self
                    .store
                    .write(&options.grouping_hash, &options.purpose, &records)
                    .await?;
                let file_ref = self.store.summarize(&path, &records).await?;
                Ok(QueryResponse::FileRef { file_ref })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn builder(dir: &std::path::Path, threshold: u64) -> ResponseBuilder {
        ResponseBuilder::new(
            ModeSelector::new(threshold),
            Arc::new(TempFileStore::new(dir, "sessionq-test")),
        )
    }

    fn options() -> DeliveryOptions {
        DeliveryOptions {
            grouping_hash: "abcd1234".into(),
            purpose: "query".into(),
            ..DeliveryOptions::default()
        }
    }

    #[tokio::test]
    async fn small_results_are_inline() {
        let tmp = TempDir::new().expect("tempdir");
        let builder = builder(tmp.path(), 1024);
        let response = builder
            .build(vec![json!({"a": 1})], &options())
            .await
            .expect("build");
        assert_eq!(
            serde_json::to_value(&response).expect("json"),
            json!({"mode": "inline", "data": [{"a": 1}]})
        );
        assert_eq!(std::fs::read_dir(tmp.path()).expect("dir").count(), 0);
    }

    #[tokio::test]
    async fn empty_results_are_inline() {
        let tmp = TempDir::new().expect("tempdir");
        let response = builder(tmp.path(), 0)
            .build(Vec::new(), &options())
            .await
            .expect("build");
        assert_eq!(response, QueryResponse::Inline { data: Vec::new() });
    }

    #[tokio::test]
    async fn large_results_go_to_a_file() {
        let tmp = TempDir::new().expect("tempdir");
        let builder = builder(tmp.path(), 10);
        let records = vec![json!({"type": "user", "n": 1}), json!({"type": "assistant"})];
        let response = builder.build(records, &options()).await.expect("build");
        let QueryResponse::FileRef { file_ref } = response else {
            panic!("expected file_ref");
        };
        assert_eq!(file_ref.line_count, 2);
        assert_eq!(file_ref.fields, vec!["n", "type"]);
        let written = std::fs::read(&file_ref.path).expect("read");
        assert_eq!(written.len() as u64, file_ref.size_bytes);
        assert!(file_ref.path.contains("sessionq-test-abcd1234-"));
    }

    #[tokio::test]
    async fn overrides_beat_the_threshold() {
        let tmp = TempDir::new().expect("tempdir");
        let builder = builder(tmp.path(), 10);
        let big = vec![json!({"text": "x".repeat(100)})];

        let inline = DeliveryOptions {
            mode_override: Some(OutputMode::Inline),
            ..options()
        };
        let response = builder.build(big.clone(), &inline).await.expect("build");
        assert_eq!(response.mode(), OutputMode::Inline);

        let raised = DeliveryOptions {
            inline_threshold: Some(1_000),
            ..options()
        };
        let response = builder.build(big, &raised).await.expect("build");
        assert_eq!(response.mode(), OutputMode::Inline);

        let forced = DeliveryOptions {
            mode_override: Some(OutputMode::FileRef),
            ..options()
        };
        let response = builder
            .build(vec![json!(1)], &forced)
            .await
            .expect("build");
        assert_eq!(response.mode(), OutputMode::FileRef);
    }
}
