//! Side files for result sets too large to return inline.
//!
//! Artifacts are named `<prefix>-<grouping-hash>-<nanos>-<purpose>.jsonl` and
//! land in one directory, so cleanup can find them with a single glob derived
//! from the same prefix.

use crate::error::{EngineError, Result};
use crate::jsonl;
use globset::GlobBuilder;
use serde_json::Value;
use sessionq_protocol::{CleanupReport, FileReference, FileSummary};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const DEFAULT_TEMP_PREFIX: &str = "sessionq-mcp";

const PREVIEW_MAX_CHARS: usize = 100;
const PREVIEW_KEEP_CHARS: usize = 97;

pub struct TempFileStore {
    dir: PathBuf,
    prefix: String,
    last_nanos: AtomicU64,
    write_lock: Mutex<()>,
    #[cfg(test)]
    fail_before_rename: std::sync::atomic::AtomicBool,
}

impl TempFileStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        let prefix = sanitize(prefix, true);
        Self {
            dir: dir.into(),
            prefix: if prefix.is_empty() {
                DEFAULT_TEMP_PREFIX.to_string()
            } else {
                prefix
            },
            last_nanos: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            #[cfg(test)]
            fail_before_rename: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A fresh artifact path. Timestamps are strictly increasing within one
    /// store, so two calls never collide.
    pub fn path_for(&self, grouping_hash: &str, purpose: &str) -> PathBuf {
        let hash = non_empty(sanitize(grouping_hash, false));
        let purpose = non_empty(sanitize(purpose, false));
        let nanos = self.next_nanos();
        self.dir
            .join(format!("{}-{hash}-{nanos}-{purpose}.jsonl", self.prefix))
    }

    fn next_nanos(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let prev = self
            .last_nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(prev + 1)
    }

    /// Writes one JSON value per line under a fresh name. The data goes to a
    /// `.tmp` sibling first and is renamed into place only after it is synced;
    /// on failure the sibling is removed and nothing exists under the final name.
    pub async fn write(&self, grouping_hash: &str, purpose: &str, data: &[Value]) -> Result<PathBuf> {
        let bytes = jsonl::encode(data)?;
        let path = self.path_for(grouping_hash, purpose);
        let tmp = tmp_sibling(&path);

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| EngineError::Write {
                path: path.clone(),
                source,
            })?;
        if let Err(source) = self.write_then_rename(&tmp, &path, &bytes).await {
            if let Err(err) = tokio::fs::remove_file(&tmp).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to remove {}: {err}", tmp.display());
                }
            }
            return Err(EngineError::Write { path, source });
        }
        log::debug!("wrote {} record(s) to {}", data.len(), path.display());
        Ok(path)
    }

    async fn write_then_rename(&self, tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        #[cfg(test)]
        if self.fail_before_rename.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("injected failure before rename"));
        }
        tokio::fs::rename(tmp, path).await
    }

    /// Describes a written artifact: size on disk, record count, the sorted
    /// union of top-level field names and a short preview of the first record.
    pub async fn summarize(&self, path: &Path, data: &[Value]) -> Result<FileReference> {
        let size_bytes = tokio::fs::metadata(path).await?.len();
        let fields: BTreeSet<&str> = data
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|object| object.keys().map(String::as_str))
            .collect();
        let preview = match data.first() {
            Some(first) => Some(truncate_preview(serde_json::to_string(first)?)),
            None => None,
        };
        Ok(FileReference {
            path: path.display().to_string(),
            size_bytes,
            line_count: data.len(),
            fields: fields.into_iter().map(str::to_string).collect(),
            summary: FileSummary {
                record_count: data.len(),
                preview,
            },
        })
    }

    pub async fn cleanup_older_than(&self, age: Duration) -> Result<CleanupReport> {
        self.cleanup_older_than_at(SystemTime::now(), age).await
    }

    /// Removes artifacts of this store's prefix last modified before `now - age`.
    /// Entries that cannot be inspected or removed are left alone.
    pub async fn cleanup_older_than_at(&self, now: SystemTime, age: Duration) -> Result<CleanupReport> {
        let matcher = GlobBuilder::new(&format!("{}-*.jsonl", self.prefix))
            .literal_separator(true)
            .build()
            .map_err(|err| EngineError::InvalidRequest(format!("invalid temp prefix: {err}")))?
            .compile_matcher();
        let cutoff = now.checked_sub(age).unwrap_or(UNIX_EPOCH);

        let mut report = CleanupReport::default();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !matcher.is_match(name) {
                continue;
            }
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(err) => {
                    log::debug!("cannot stat {}: {err}", path.display());
                    continue;
                }
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    report.freed_bytes += meta.len();
                    report.files.push(path.display().to_string());
                }
                Err(err) => log::warn!("cannot remove {}: {err}", path.display()),
            }
        }

        report.files.sort();
        report.removed_count = report.files.len();
        if report.removed_count > 0 {
            log::info!(
                "removed {} temp file(s), {} bytes freed",
                report.removed_count,
                report.freed_bytes
            );
        }
        Ok(report)
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), DEFAULT_TEMP_PREFIX)
    }
}

fn sanitize(raw: &str, allow_dash: bool) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn non_empty(value: String) -> String {
    if value.is_empty() {
        "none".to_string()
    } else {
        value
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn truncate_preview(text: String) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text;
    }
    let mut out: String = text.chars().take(PREVIEW_KEEP_CHARS).collect();
    out.push_str("...");
    out
}
