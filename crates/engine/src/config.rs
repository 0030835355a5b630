use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::jsonl::DEFAULT_MAX_LINE_BYTES;
use crate::temp_store::DEFAULT_TEMP_PREFIX;
use sessionq_protocol::DEFAULT_INLINE_THRESHOLD_BYTES;
use std::path::PathBuf;

/// Settings for one [`QueryService`](crate::QueryService). The engine never
/// reads the environment; front ends fill this in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub inline_threshold_bytes: u64,
    pub cache_capacity: usize,
    pub temp_dir: PathBuf,
    pub temp_prefix: String,
    pub max_line_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inline_threshold_bytes: DEFAULT_INLINE_THRESHOLD_BYTES as u64,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            temp_dir: std::env::temp_dir(),
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}
