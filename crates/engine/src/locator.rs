use crate::error::{EngineError, Result};
use async_trait::async_trait;
use sessionq_protocol::Scope;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Resolves a scope to the session history files it covers.
#[async_trait]
pub trait SessionLocator: Send + Sync {
    /// Absolute paths of the candidate files, or `NoSessionFiles` when there
    /// are none.
    async fn locate(&self, scope: Scope, cwd: &Path) -> Result<Vec<PathBuf>>;
}

/// `~/.claude/projects`, or a relative fallback when the home directory is unknown.
pub fn default_projects_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}

/// Directory name a project's sessions are stored under: the absolute working
/// directory with every separator replaced by `-`.
pub fn project_dir_name(cwd: &Path) -> String {
    cwd.to_string_lossy()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '-',
            other => other,
        })
        .collect()
}

/// Finds `*.jsonl` session files in `<projects_root>/<project_dir_name(cwd)>`,
/// or directly in `session_dir_override` when set.
#[derive(Debug, Clone)]
pub struct ProjectsDirLocator {
    pub projects_root: PathBuf,
    pub session_dir_override: Option<PathBuf>,
}

impl ProjectsDirLocator {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
            session_dir_override: None,
        }
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir_override = Some(dir.into());
        self
    }

    pub fn session_dir(&self, cwd: &Path) -> PathBuf {
        match &self.session_dir_override {
            Some(dir) => dir.clone(),
            None => self.projects_root.join(project_dir_name(cwd)),
        }
    }
}

impl Default for ProjectsDirLocator {
    fn default() -> Self {
        Self::new(default_projects_root())
    }
}

#[async_trait]
impl SessionLocator for ProjectsDirLocator {
    async fn locate(&self, scope: Scope, cwd: &Path) -> Result<Vec<PathBuf>> {
        let dir = self.session_dir(cwd);
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NoSessionFiles(dir.display().to_string()));
            }
            Err(err) => {
                return Err(EngineError::Locator(format!(
                    "cannot list {}: {err}",
                    dir.display()
                )));
            }
        };

        let mut found: Vec<(Option<SystemTime>, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                found.push((None, path));
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            found.push((meta.modified().ok(), path));
        }

        if found.is_empty() {
            return Err(EngineError::NoSessionFiles(dir.display().to_string()));
        }

        sort_newest_first(&mut found);
        if scope == Scope::Session {
            found.truncate(1);
        }
        log::debug!(
            "located {} session file(s) for scope {scope} in {}",
            found.len(),
            dir.display()
        );
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }
}

/// Newest first, ties broken by path, entries without a timestamp last.
pub(crate) fn sort_newest_first(files: &mut [(Option<SystemTime>, PathBuf)]) {
    files.sort_by(|(a_time, a_path), (b_time, b_path)| match (a_time, b_time) {
        (Some(a), Some(b)) => b.cmp(a).then_with(|| a_path.cmp(b_path)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a_path.cmp(b_path),
    });
}
