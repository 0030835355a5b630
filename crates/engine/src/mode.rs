use crate::error::Result;
use crate::jsonl;
use serde_json::Value;
use sessionq_protocol::{OutputMode, DEFAULT_INLINE_THRESHOLD_BYTES};

/// Picks the delivery channel for a result set from its exact serialized size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSelector {
    threshold_bytes: u64,
}

impl ModeSelector {
    pub fn new(threshold_bytes: u64) -> Self {
        Self { threshold_bytes }
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// An explicit mode always wins; otherwise results at or below the
    /// threshold are delivered inline.
    pub fn decide(&self, size_bytes: u64, explicit: Option<OutputMode>) -> OutputMode {
        match explicit {
            Some(mode) => mode,
            None if size_bytes <= self.threshold_bytes => OutputMode::Inline,
            None => OutputMode::FileRef,
        }
    }

    pub fn measure(records: &[Value]) -> Result<u64> {
        Ok(jsonl::serialized_len(records)?)
    }
}

impl Default for ModeSelector {
    fn default() -> Self {
        Self::new(DEFAULT_INLINE_THRESHOLD_BYTES as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn threshold_boundary_is_inclusive() {
        let selector = ModeSelector::new(100);
        assert_eq!(selector.decide(100, None), OutputMode::Inline);
        assert_eq!(selector.decide(101, None), OutputMode::FileRef);
        assert_eq!(selector.decide(0, None), OutputMode::Inline);
    }

    #[test]
    fn explicit_mode_wins_both_ways() {
        let selector = ModeSelector::new(100);
        assert_eq!(
            selector.decide(10, Some(OutputMode::FileRef)),
            OutputMode::FileRef
        );
        assert_eq!(
            selector.decide(10_000, Some(OutputMode::Inline)),
            OutputMode::Inline
        );
    }

    #[test]
    fn default_threshold_is_8k() {
        assert_eq!(ModeSelector::default().threshold_bytes(), 8192);
    }

    #[test]
    fn measure_counts_compact_json_plus_newlines() {
        assert_eq!(ModeSelector::measure(&[]).expect("measure"), 0);
        let records = vec![json!({"a": 1}), json!("xy")];
        // {"a":1}\n"xy"\n
        assert_eq!(ModeSelector::measure(&records).expect("measure"), 13);
    }

    #[test]
    fn measured_size_drives_the_decision() {
        let record = json!({"text": "x".repeat(50)});
        let size = ModeSelector::measure(std::slice::from_ref(&record)).expect("measure");
        assert_eq!(ModeSelector::new(size).decide(size, None), OutputMode::Inline);
        assert_eq!(
            ModeSelector::new(size - 1).decide(size, None),
            OutputMode::FileRef
        );
    }
}
