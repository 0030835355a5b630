//! Line-delimited JSON helpers: a bounded async record reader and the exact
//! serialized-size measure shared by mode selection and the temp-file writer.

use serde_json::Value;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest line accepted by default. Session records embedding tool output
/// or file contents routinely exceed a megabyte.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Lines shorter than this are never treated as oversized.
pub const MIN_MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Malformed,
    Oversized,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Record(Value),
    Skipped(SkipReason),
}

enum RawLine {
    Complete,
    Oversized,
}

/// Reads one JSON value per line. Blank lines are ignored; lines that do not
/// parse or exceed the byte limit are reported as skipped, the latter without
/// ever being buffered in full.
pub struct JsonlReader<R> {
    inner: R,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> JsonlReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            max_line_bytes: max_line_bytes.max(MIN_MAX_LINE_BYTES),
            buf: Vec::new(),
        }
    }

    pub async fn next_event(&mut self) -> io::Result<Option<LineEvent>> {
        loop {
            let Some(raw) = self.next_line().await? else {
                return Ok(None);
            };
            if let RawLine::Oversized = raw {
                return Ok(Some(LineEvent::Skipped(SkipReason::Oversized)));
            }
            let line = trim_ascii_whitespace(&self.buf);
            if line.is_empty() {
                continue;
            }
            return Ok(Some(match serde_json::from_slice::<Value>(line) {
                Ok(mut value) => {
                    sessionq_filter::canonicalize(&mut value);
                    LineEvent::Record(value)
                }
                Err(_) => LineEvent::Skipped(SkipReason::Malformed),
            }));
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        self.buf.clear();
        let mut oversized = false;
        let mut seen_any = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !seen_any {
                    return Ok(None);
                }
                break;
            }
            seen_any = true;
            let (chunk_len, consumed, done) = match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i, i + 1, true),
                None => (available.len(), available.len(), false),
            };
            if !oversized {
                if self.buf.len() + chunk_len > self.max_line_bytes {
                    oversized = true;
                    self.buf = Vec::new();
                } else {
                    self.buf.extend_from_slice(&available[..chunk_len]);
                }
            }
            self.inner.consume(consumed);
            if done {
                break;
            }
        }
        Ok(Some(if oversized {
            RawLine::Oversized
        } else {
            RawLine::Complete
        }))
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

struct ByteCounter(u64);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bytes the records occupy as line-delimited JSON: compact encoding of each
/// record plus one newline.
pub fn serialized_len(records: &[Value]) -> serde_json::Result<u64> {
    let mut counter = ByteCounter(0);
    for record in records {
        serde_json::to_writer(&mut counter, record)?;
        counter.0 += 1;
    }
    Ok(counter.0)
}

pub fn encode(records: &[Value]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn events(input: &[u8], max: usize) -> Vec<LineEvent> {
        let mut reader = JsonlReader::new(input, max);
        let mut out = Vec::new();
        while let Some(event) = reader.next_event().await.expect("read") {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn skips_blank_and_malformed_lines() {
        let input = b"{\"a\":1}\n\n   \n{not json}\r\n{\"a\":2}";
        assert_eq!(
            events(input, DEFAULT_MAX_LINE_BYTES).await,
            vec![
                LineEvent::Record(json!({"a": 1})),
                LineEvent::Skipped(SkipReason::Malformed),
                LineEvent::Record(json!({"a": 2})),
            ]
        );
    }

    #[tokio::test]
    async fn integral_floats_read_as_integers() {
        let input = b"{\"n\":1.0,\"m\":[2.50,1e2]}\n{\"huge\":1e1000}\n";
        assert_eq!(
            events(input, DEFAULT_MAX_LINE_BYTES).await,
            vec![
                LineEvent::Record(json!({"n": 1, "m": [2.5, 100]})),
                LineEvent::Skipped(SkipReason::Malformed),
            ]
        );
    }

    #[tokio::test]
    async fn oversized_line_is_skipped_and_reading_continues() {
        let big = format!("{{\"blob\":\"{}\"}}", "x".repeat(MIN_MAX_LINE_BYTES + 10));
        let input = format!("{{\"a\":1}}\n{big}\n{{\"a\":2}}\n");
        assert_eq!(
            events(input.as_bytes(), MIN_MAX_LINE_BYTES).await,
            vec![
                LineEvent::Record(json!({"a": 1})),
                LineEvent::Skipped(SkipReason::Oversized),
                LineEvent::Record(json!({"a": 2})),
            ]
        );
    }

    #[tokio::test]
    async fn large_lines_under_the_limit_are_accepted() {
        let big = format!("{{\"blob\":\"{}\"}}", "y".repeat(2 * 1024 * 1024));
        let parsed = events(big.as_bytes(), DEFAULT_MAX_LINE_BYTES).await;
        assert_eq!(parsed.len(), 1);
        assert!(matches!(&parsed[0], LineEvent::Record(v) if v["blob"].as_str().map(str::len) == Some(2 * 1024 * 1024)));
    }

    #[test]
    fn serialized_len_matches_encoding() {
        let records = vec![json!({"a": 1}), json!("é"), json!([1, 2])];
        let encoded = encode(&records).expect("encode");
        assert_eq!(serialized_len(&records).expect("measure"), encoded.len() as u64);
        assert_eq!(serialized_len(&[]).expect("measure"), 0);
    }
}
