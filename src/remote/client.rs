//! Persistence client
//!
//! Reads and writes site files on the editing branch with optimistic
//! concurrency. The client remembers the last version token it observed for
//! each path and sends it as the condition of the next write; the backend
//! rejects the write if the file moved on in the meantime. Conflicts are
//! surfaced, never merged.
//!
//! Every backend call goes through the [`RateLimiter`]. A rate-limit reply
//! from the server is absorbed here by sleeping and retrying, so callers
//! only ever see added latency.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::remote::backend::{CommitInfo, ContentBackend, RemoteFile, WriteReceipt, WriteRequest};
use crate::remote::rate_limiter::RateLimiter;

/// Client for the versioned hosting backend.
pub struct PersistenceClient {
    backend: Arc<dyn ContentBackend>,
    limiter: RateLimiter,
    branch: String,
    main_branch: String,
    tokens: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for PersistenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceClient")
            .field("branch", &self.branch)
            .field("main_branch", &self.main_branch)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

/// Decode the payload of a `data:<mime>;base64,<payload>` URL. A bare
/// base64 string is accepted as well.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let payload = match data_url.find("base64,") {
        Some(pos) => &data_url[pos + "base64,".len()..],
        None if data_url.starts_with("data:") => return None,
        None => data_url,
    };
    BASE64.decode(payload.trim()).ok()
}

fn into_text(path: &str, file: RemoteFile) -> Result<String> {
    String::from_utf8(file.content).map_err(|_| EditorError::InvalidContent {
        path: path.to_string(),
        reason: "file is not valid UTF-8".to_string(),
    })
}

impl PersistenceClient {
    pub fn new(
        backend: Arc<dyn ContentBackend>,
        limiter: RateLimiter,
        branch: impl Into<String>,
        main_branch: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            limiter,
            branch: branch.into(),
            main_branch: main_branch.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EditorConfig, backend: Arc<dyn ContentBackend>) -> Self {
        Self::new(
            backend,
            RateLimiter::from_config(config),
            config.branch.clone(),
            config.main_branch.clone(),
        )
    }

    /// Editing branch all writes go to.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Production branch used as the read fallback.
    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last version token observed for `path`.
    pub fn version_token(&self, path: &str) -> Option<String> {
        self.tokens().get(path).cloned()
    }

    /// Drop the recorded token, so the next write is unconditional creation.
    pub fn forget_token(&self, path: &str) -> Option<String> {
        self.tokens().remove(path)
    }

    fn record_token(&self, path: &str, sha: String) {
        self.tokens().insert(path.to_string(), sha);
    }

    /// Run one backend call under the rate limiter, absorbing server-side
    /// rate-limit replies.
    async fn call<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match self.limiter.throttle(|| attempt()).await {
                Err(EditorError::RateLimited { retry_after }) => {
                    let wait = retry_after.unwrap_or_else(|| self.limiter.window());
                    warn!(
                        operation,
                        wait_ms = wait.as_millis() as u64,
                        "Backend rate limit hit, retrying"
                    );
                    sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn read_at(&self, path: &str, git_ref: &str) -> Result<RemoteFile> {
        let backend = self.backend.as_ref();
        self.call("read", move || backend.read_file(path, git_ref)).await
    }

    /// Read `path` from the editing branch, falling back to production.
    ///
    /// Records the version token when the file exists on the editing
    /// branch. A production fallback records nothing, so the next write
    /// creates the file on the editing branch.
    pub async fn get_file(&self, path: &str) -> Result<String> {
        match self.read_at(path, &self.branch).await {
            Ok(file) => {
                debug!(path, sha = %file.sha, "Read file from editing branch");
                self.record_token(path, file.sha.clone());
                into_text(path, file)
            }
            Err(EditorError::NotFound { .. }) => {
                debug!(path, branch = %self.main_branch, "Not on editing branch, trying production");
                let file = self.read_at(path, &self.main_branch).await?;
                into_text(path, file)
            }
            Err(e) => Err(e),
        }
    }

    /// Write text content to `path` on the editing branch.
    pub async fn save_file(&self, path: &str, content: &str, message: &str) -> Result<WriteReceipt> {
        self.save_bytes(path, content.as_bytes().to_vec(), message).await
    }

    /// Write raw bytes to `path`, conditioned on the last recorded token.
    pub async fn save_bytes(
        &self,
        path: &str,
        content: Vec<u8>,
        message: &str,
    ) -> Result<WriteReceipt> {
        let request = WriteRequest {
            path: path.to_string(),
            content,
            message: message.to_string(),
            branch: self.branch.clone(),
            sha: self.version_token(path),
        };
        let backend = self.backend.as_ref();
        let result = self
            .call("write", || backend.write_file(request.clone()))
            .await;

        match result {
            Ok(receipt) => {
                info!(path, commit = %receipt.commit_id, commit_message = message, "Saved file");
                self.record_token(path, receipt.content_sha.clone());
                Ok(receipt)
            }
            Err(e) => {
                if matches!(e, EditorError::Conflict { .. }) {
                    warn!(path, "Remote file changed since last read");
                }
                Err(e)
            }
        }
    }

    /// Commit history of the editing branch, newest first.
    pub async fn get_commits(&self, path: Option<&str>, limit: usize) -> Result<Vec<CommitInfo>> {
        let backend = self.backend.as_ref();
        let branch = self.branch.as_str();
        self.call("list_commits", move || backend.list_commits(branch, path, limit))
            .await
    }

    /// Content of `path` as of commit `id`.
    pub async fn get_file_at_commit(&self, path: &str, id: &str) -> Result<String> {
        let file = self.read_at(path, id).await?;
        into_text(path, file)
    }

    /// Capability probe for setup screens.
    pub async fn validate_access(&self) -> bool {
        let backend = self.backend.as_ref();
        match self.call("probe", move || backend.probe()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Access check failed");
                false
            }
        }
    }

    /// Upload an inline asset to `<dir>/<file>`. Returns the repository path.
    pub async fn upload_asset(&self, dir: &str, file: &str, data_url: &str) -> Result<String> {
        let path = format!("{}/{}", dir.trim_end_matches('/'), file);
        let bytes = decode_data_url(data_url).ok_or_else(|| EditorError::InvalidContent {
            path: path.clone(),
            reason: "asset data is not a base64 data URL".to_string(),
        })?;

        if self.version_token(&path).is_none() {
            match self.read_at(&path, &self.branch).await {
                Ok(existing) => self.record_token(&path, existing.sha),
                Err(EditorError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        self.save_bytes(&path, bytes, &format!("Upload {}", file))
            .await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{Failure, MockBackend};
    use std::time::Duration;
    use tokio::time::Instant;

    fn client(backend: &Arc<MockBackend>) -> PersistenceClient {
        PersistenceClient::new(
            Arc::clone(backend) as Arc<dyn ContentBackend>,
            RateLimiter::new(30, Duration::from_secs(60), Duration::from_millis(100)),
            "site-edits",
            "main",
        )
    }

    #[tokio::test]
    async fn test_get_file_records_token() {
        let backend = Arc::new(MockBackend::new());
        let sha = backend.seed("site-edits", "index.html", "<p>Hello</p>");
        let client = client(&backend);

        let content = client.get_file("index.html").await.unwrap();
        assert_eq!(content, "<p>Hello</p>");
        assert_eq!(client.version_token("index.html"), Some(sha));
    }

    #[tokio::test]
    async fn test_production_fallback_records_no_token() {
        let backend = Arc::new(MockBackend::new());
        backend.seed("main", "about.html", "<p>About</p>");
        let client = client(&backend);

        let content = client.get_file("about.html").await.unwrap();
        assert_eq!(content, "<p>About</p>");
        assert_eq!(client.version_token("about.html"), None);

        client
            .save_file("about.html", "<p>About us</p>", "edit")
            .await
            .unwrap();
        assert_eq!(backend.writes()[0].sha, None);
        assert_eq!(
            backend.file("site-edits", "about.html").as_deref(),
            Some("<p>About us</p>")
        );
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_not_found() {
        let backend = Arc::new(MockBackend::new());
        let client = client(&backend);
        let err = client.get_file("nope.html").await.unwrap_err();
        assert!(matches!(err, EditorError::NotFound { path } if path == "nope.html"));
    }

    #[tokio::test]
    async fn test_other_read_errors_do_not_fall_back() {
        let backend = Arc::new(MockBackend::new());
        backend.seed("main", "index.html", "prod");
        backend.fail_next_read(Failure::Unauthorized);
        let client = client(&backend);

        let err = client.get_file("index.html").await.unwrap_err();
        assert!(matches!(err, EditorError::Unauthorized));
        assert_eq!(backend.read_count(), 1);
    }

    #[tokio::test]
    async fn test_sequential_saves_chain_tokens() {
        let backend = Arc::new(MockBackend::new());
        let fetched = backend.seed("site-edits", "index.html", "v0");
        let client = client(&backend);
        client.get_file("index.html").await.unwrap();

        let first = client.save_file("index.html", "v1", "one").await.unwrap();
        client.save_file("index.html", "v2", "two").await.unwrap();

        let writes = backend.writes();
        assert_eq!(writes[0].sha.as_deref(), Some(fetched.as_str()));
        assert_eq!(writes[1].sha.as_deref(), Some(first.content_sha.as_str()));
        assert_ne!(writes[1].sha.as_deref(), Some(fetched.as_str()));
    }

    #[tokio::test]
    async fn test_conflict_is_surfaced() {
        let backend = Arc::new(MockBackend::new());
        backend.seed("site-edits", "index.html", "v0");
        let client = client(&backend);
        client.get_file("index.html").await.unwrap();

        backend.remote_edit("site-edits", "index.html", "someone else");
        let err = client.save_file("index.html", "mine", "edit").await.unwrap_err();

        assert!(matches!(err, EditorError::Conflict { .. }));
        assert_eq!(
            backend.file("site-edits", "index.html").as_deref(),
            Some("someone else")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_reply_is_absorbed() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_next_write(Failure::RateLimited(Some(Duration::from_secs(3))));
        let client = client(&backend);

        let start = Instant::now();
        client.save_file("new.html", "x", "create").await.unwrap();

        assert!(Instant::now().duration_since(start) >= Duration::from_secs(3));
        assert_eq!(backend.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_history_and_point_in_time_read() {
        let backend = Arc::new(MockBackend::new());
        backend.seed("site-edits", "index.html", "v0");
        let client = client(&backend);
        client.get_file("index.html").await.unwrap();
        client.save_file("index.html", "v1", "first").await.unwrap();
        client.save_file("index.html", "v2", "second").await.unwrap();

        let commits = client.get_commits(Some("index.html"), 10).await.unwrap();
        let messages: Vec<_> = commits.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "first", "Add index.html"]);

        let old = client
            .get_file_at_commit("index.html", &commits[1].id)
            .await
            .unwrap();
        assert_eq!(old, "v1");
    }

    #[tokio::test]
    async fn test_validate_access() {
        let backend = Arc::new(MockBackend::new());
        let client = client(&backend);
        assert!(client.validate_access().await);

        backend.deny_probe(true);
        assert!(!client.validate_access().await);
    }

    #[tokio::test]
    async fn test_upload_asset_decodes_data_url() {
        let backend = Arc::new(MockBackend::new());
        let client = client(&backend);
        let data = format!("data:image/png;base64,{}", BASE64.encode(b"png-bytes"));

        let path = client.upload_asset("images", "logo.png", &data).await.unwrap();
        assert_eq!(path, "images/logo.png");
        assert_eq!(
            backend.file("site-edits", "images/logo.png").as_deref(),
            Some("png-bytes")
        );
        assert_eq!(backend.writes()[0].message, "Upload logo.png");
    }

    #[test]
    fn test_decode_data_url() {
        assert_eq!(decode_data_url("aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_data_url("data:text/plain;base64,aGk="), Some(b"hi".to_vec()));
        assert_eq!(decode_data_url("data:text/plain,hi"), None);
        assert_eq!(decode_data_url("data:;base64,***"), None);
    }
}
