use sessionq_engine::{default_projects_root, grouping_hash, EngineConfig};
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_INLINE_THRESHOLD: &str = "SESSIONQ_INLINE_THRESHOLD";
pub const ENV_CACHE_CAPACITY: &str = "SESSIONQ_CACHE_CAPACITY";
pub const ENV_TEMP_DIR: &str = "SESSIONQ_TEMP_DIR";
pub const ENV_PROJECTS_ROOT: &str = "SESSIONQ_PROJECTS_ROOT";
pub const ENV_SESSION_DIR: &str = "SESSIONQ_SESSION_DIR";
pub const ENV_SESSION_ID: &str = "SESSIONQ_SESSION_ID";
pub const ENV_PROJECT_HASH: &str = "SESSIONQ_PROJECT_HASH";

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub engine: EngineConfig,
    pub projects_root: PathBuf,
    pub session_dir: Option<PathBuf>,
    /// Session or project identifier used to group temp artifacts.
    pub grouping_id: Option<String>,
    pub cwd: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_lookup(|key| std::env::var(key).ok(), cwd)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, cwd: PathBuf) -> Self {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut engine = EngineConfig::default();
        if let Some(threshold) = parse_or_warn::<u64>(ENV_INLINE_THRESHOLD, value(ENV_INLINE_THRESHOLD)) {
            engine.inline_threshold_bytes = threshold;
        }
        if let Some(capacity) = parse_or_warn::<usize>(ENV_CACHE_CAPACITY, value(ENV_CACHE_CAPACITY)) {
            engine.cache_capacity = capacity;
        }
        if let Some(dir) = value(ENV_TEMP_DIR) {
            engine.temp_dir = PathBuf::from(dir);
        }

        Self {
            engine,
            projects_root: value(ENV_PROJECTS_ROOT)
                .map(PathBuf::from)
                .unwrap_or_else(default_projects_root),
            session_dir: value(ENV_SESSION_DIR).map(PathBuf::from),
            grouping_id: value(ENV_SESSION_ID).or_else(|| value(ENV_PROJECT_HASH)),
            cwd,
        }
    }

    pub fn grouping_hash(&self) -> String {
        grouping_hash(self.grouping_id.as_deref(), &self.cwd)
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a valid number");
            None
        }
    }
}
