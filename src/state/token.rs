//! Access token storage
//!
//! Tokens live in their own short-lived store, separate from backups, and
//! expire after a configurable lifetime. A token found under the legacy
//! long-lived key is migrated once and then deleted there.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::state::storage::KeyValueStore;

/// Key in the session store.
pub const TOKEN_KEY: &str = "auth_token";

/// Key used by older versions in the long-lived store.
pub const LEGACY_TOKEN_KEY: &str = "github_token";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Only personal access tokens in GitHub's formats are accepted.
pub fn looks_like_token(token: &str) -> bool {
    let token = token.trim();
    (token.starts_with("ghp_") || token.starts_with("github_pat_")) && token.len() > 10
}

/// Short-lived token store with one-time legacy migration.
#[derive(Clone)]
pub struct TokenStore {
    session: Arc<dyn KeyValueStore>,
    legacy: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(
        session: Arc<dyn KeyValueStore>,
        legacy: Arc<dyn KeyValueStore>,
        ttl: std::time::Duration,
    ) -> Self {
        Self {
            session,
            legacy,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(8)),
        }
    }

    /// Store a token, replacing any previous one. Returns false if the token
    /// is not in an accepted format.
    pub fn save(&self, token: &str) -> Result<bool> {
        if !looks_like_token(token) {
            return Ok(false);
        }
        let stored = StoredToken {
            token: token.trim().to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.session.set(TOKEN_KEY, &serde_json::to_string(&stored)?)?;
        self.legacy.remove(LEGACY_TOKEN_KEY)?;
        Ok(true)
    }

    /// Load a valid, unexpired token, migrating a legacy one if needed.
    pub fn load(&self) -> Result<Option<String>> {
        if let Some(raw) = self.session.get(TOKEN_KEY)? {
            match serde_json::from_str::<StoredToken>(&raw) {
                Ok(stored) if stored.expires_at > Utc::now() && looks_like_token(&stored.token) => {
                    return Ok(Some(stored.token));
                }
                Ok(_) => {
                    debug!("stored token expired or invalid, removing it");
                    self.session.remove(TOKEN_KEY)?;
                }
                Err(e) => {
                    debug!(error = %e, "stored token unreadable, removing it");
                    self.session.remove(TOKEN_KEY)?;
                }
            }
        }

        if let Some(legacy) = self.legacy.get(LEGACY_TOKEN_KEY)? {
            let legacy = legacy.trim().to_string();
            if self.save(&legacy)? {
                info!("migrated access token from legacy storage");
                return Ok(Some(legacy));
            }
        }

        Ok(None)
    }

    /// Expiry of the stored token, if one is stored.
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .session
            .get(TOKEN_KEY)?
            .and_then(|raw| serde_json::from_str::<StoredToken>(&raw).ok())
            .map(|stored| stored.expires_at))
    }

    /// Remove the token from every location.
    pub fn clear(&self) -> Result<()> {
        self.session.remove(TOKEN_KEY)?;
        self.legacy.remove(LEGACY_TOKEN_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::storage::MemoryStore;
    use test_case::test_case;

    const TOKEN: &str = "ghp_abcdefghijklmnop";

    fn stores() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
        (Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    #[test_case("ghp_abcdefghijkl", true ; "classic token")]
    #[test_case("github_pat_11ABCDEFG", true ; "fine grained token")]
    #[test_case("gho_abcdefghijkl", false ; "oauth token")]
    #[test_case("ghp_", false ; "prefix only")]
    #[test_case("", false ; "empty")]
    fn test_token_format(token: &str, expected: bool) {
        assert_eq!(looks_like_token(token), expected);
    }

    #[test]
    fn test_save_and_load() {
        let (session, legacy) = stores();
        let tokens = TokenStore::new(session, legacy, std::time::Duration::from_secs(60));

        assert!(tokens.save(TOKEN).unwrap());
        assert_eq!(tokens.load().unwrap().as_deref(), Some(TOKEN));
        assert!(tokens.expires_at().unwrap().unwrap() > Utc::now());
    }

    #[test]
    fn test_rejects_malformed_token() {
        let (session, legacy) = stores();
        let tokens = TokenStore::new(session.clone(), legacy, std::time::Duration::from_secs(60));
        assert!(!tokens.save("not-a-token").unwrap());
        assert_eq!(session.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_expired_token_is_removed() {
        let (session, legacy) = stores();
        let expired = StoredToken {
            token: TOKEN.to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        };
        session
            .set(TOKEN_KEY, &serde_json::to_string(&expired).unwrap())
            .unwrap();

        let tokens = TokenStore::new(session.clone(), legacy, std::time::Duration::from_secs(60));
        assert_eq!(tokens.load().unwrap(), None);
        assert_eq!(session.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_legacy_token_migrates_once() {
        let (session, legacy) = stores();
        legacy.set(LEGACY_TOKEN_KEY, TOKEN).unwrap();

        let tokens = TokenStore::new(session.clone(), legacy.clone(), std::time::Duration::from_secs(60));
        assert_eq!(tokens.load().unwrap().as_deref(), Some(TOKEN));
        assert_eq!(legacy.get(LEGACY_TOKEN_KEY).unwrap(), None);
        assert!(session.get(TOKEN_KEY).unwrap().is_some());
    }

    #[test]
    fn test_invalid_legacy_token_stays_unused() {
        let (session, legacy) = stores();
        legacy.set(LEGACY_TOKEN_KEY, "garbage").unwrap();
        let tokens = TokenStore::new(session, legacy, std::time::Duration::from_secs(60));
        assert_eq!(tokens.load().unwrap(), None);
    }

    #[test]
    fn test_clear_removes_all_locations() {
        let (session, legacy) = stores();
        legacy.set(LEGACY_TOKEN_KEY, "garbage").unwrap();
        let tokens = TokenStore::new(session.clone(), legacy.clone(), std::time::Duration::from_secs(60));
        tokens.save(TOKEN).unwrap();

        tokens.clear().unwrap();
        assert_eq!(tokens.load().unwrap(), None);
        assert_eq!(legacy.get(LEGACY_TOKEN_KEY).unwrap(), None);
    }
}
