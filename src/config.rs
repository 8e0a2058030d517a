//! Editor configuration
//!
//! Loaded from an optional JSON file, then overridden by `ATELIER_*`
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields a usable configuration.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Default GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Default autosave interval in milliseconds.
const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;

/// Default number of API calls allowed per window.
const DEFAULT_API_RATE_LIMIT: usize = 30;

/// Default rate limit window in milliseconds.
const DEFAULT_API_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Extra wait added on top of the computed rate limit wait.
const DEFAULT_RATE_LIMIT_MARGIN_MS: u64 = 100;

/// Editor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub repo: String,

    /// Branch edits are written to.
    pub branch: String,

    /// Production branch, read when a file is missing on `branch`.
    pub main_branch: String,

    /// Base URL of the content API.
    pub api_url: String,

    /// Interval between autosave ticks.
    pub autosave_interval_ms: u64,

    /// Maximum API calls per rate limit window.
    pub api_rate_limit: usize,

    /// Length of the rate limit window.
    pub api_rate_limit_window_ms: u64,

    /// Margin added to rate limit waits.
    pub rate_limit_margin_ms: u64,

    /// Number of commits fetched per history listing.
    pub commit_history_limit: usize,

    /// Maximum undo levels kept in memory.
    pub undo_limit: usize,

    /// Maximum number of trashed elements kept.
    pub trash_limit: usize,

    /// Maximum number of offline queue items.
    pub offline_queue_limit: usize,

    /// First retry delay after a failed offline drain.
    pub drain_backoff_base_ms: u64,

    /// Upper bound for the drain retry delay.
    pub drain_backoff_max_ms: u64,

    /// Lifetime of a stored access token, in seconds.
    pub token_ttl_secs: u64,

    /// Directory holding local backups and tokens.
    pub state_dir: PathBuf,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            owner: "atelier".to_string(),
            repo: "website".to_string(),
            branch: "site-edits".to_string(),
            main_branch: "main".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            autosave_interval_ms: DEFAULT_AUTOSAVE_INTERVAL_MS,
            api_rate_limit: DEFAULT_API_RATE_LIMIT,
            api_rate_limit_window_ms: DEFAULT_API_RATE_LIMIT_WINDOW_MS,
            rate_limit_margin_ms: DEFAULT_RATE_LIMIT_MARGIN_MS,
            commit_history_limit: 10,
            undo_limit: 50,
            trash_limit: 20,
            offline_queue_limit: 50,
            drain_backoff_base_ms: 5_000,
            drain_backoff_max_ms: 300_000,
            token_ttl_secs: 8 * 60 * 60,
            state_dir: PathBuf::from(".atelier"),
        }
    }
}

impl EditorConfig {
    /// Load configuration from `path` (if given) and apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EditorError::StorageRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `ATELIER_*` environment variable overrides.
    pub fn apply_env(&mut self) {
        if let Ok(owner) = env::var("ATELIER_OWNER") {
            self.owner = owner;
        }
        if let Ok(repo) = env::var("ATELIER_REPO") {
            self.repo = repo;
        }
        if let Ok(branch) = env::var("ATELIER_BRANCH") {
            self.branch = branch;
        }
        if let Ok(main_branch) = env::var("ATELIER_MAIN_BRANCH") {
            self.main_branch = main_branch;
        }
        if let Ok(url) = env::var("ATELIER_API_URL") {
            self.api_url = url;
        }
        if let Some(ms) = env::var("ATELIER_AUTOSAVE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.autosave_interval_ms = ms;
        }
        if let Ok(dir) = env::var("ATELIER_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
    }

    /// Reject configurations the editor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
            ("main_branch", &self.main_branch),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EditorError::InvalidConfig {
                    reason: format!("{} must not be empty", name),
                });
            }
        }
        if self.autosave_interval_ms == 0 {
            return Err(EditorError::InvalidConfig {
                reason: "autosave_interval_ms must be positive".to_string(),
            });
        }
        if self.api_rate_limit == 0 || self.api_rate_limit_window_ms == 0 {
            return Err(EditorError::InvalidConfig {
                reason: "rate limit and window must be positive".to_string(),
            });
        }
        if self.offline_queue_limit == 0 || self.undo_limit == 0 {
            return Err(EditorError::InvalidConfig {
                reason: "offline_queue_limit and undo_limit must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.api_rate_limit_window_ms)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_millis(self.rate_limit_margin_ms)
    }

    /// Directory for this repository's local state.
    pub fn site_state_dir(&self) -> PathBuf {
        self.state_dir.join(format!("{}__{}", self.owner, self.repo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EditorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
        assert_eq!(config.api_rate_limit, 30);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("atelier.json");
        fs::write(&path, r#"{ "owner": "acme", "autosave_interval_ms": 5000 }"#).unwrap();

        let config = EditorConfig::from_file(&path).unwrap();
        assert_eq!(config.owner, "acme");
        assert_eq!(config.autosave_interval_ms, 5000);
        assert_eq!(config.repo, "website");
        assert_eq!(config.main_branch, "main");
    }

    #[test]
    fn test_validate_rejects_empty_branch() {
        let config = EditorConfig {
            branch: "  ".to_string(),
            ..EditorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let config = EditorConfig {
            api_rate_limit: 0,
            ..EditorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_site_state_dir_is_repo_scoped() {
        let config = EditorConfig {
            owner: "acme".into(),
            repo: "site".into(),
            state_dir: PathBuf::from("/tmp/state"),
            ..EditorConfig::default()
        };
        assert_eq!(config.site_state_dir(), PathBuf::from("/tmp/state/acme__site"));
    }
}
