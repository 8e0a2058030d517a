//! Content backend trait and core types
//!
//! Defines the interface every versioned hosting backend must implement:
//! read a file at a ref, conditionally write a file, list commits, and probe
//! access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A file read from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Raw file bytes.
    pub content: Vec<u8>,

    /// Version token (content hash) of this file revision.
    pub sha: String,
}

/// A conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub path: String,

    /// Raw file bytes.
    pub content: Vec<u8>,

    pub message: String,

    /// Branch the write goes to.
    pub branch: String,

    /// Version token the writer last observed. `None` creates a new file.
    pub sha: Option<String>,
}

/// Confirmation of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Version token of the new file revision.
    pub content_sha: String,

    /// Id of the commit that carries the write.
    pub commit_id: String,
}

/// One entry of a commit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

impl CommitInfo {
    /// Abbreviated commit id.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// Versioned hosting backend.
///
/// A write whose `sha` no longer matches the current server revision must
/// fail with [`EditorError::Conflict`](crate::error::EditorError::Conflict).
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Read `path` at `git_ref` (a branch name or commit id).
    async fn read_file(&self, path: &str, git_ref: &str) -> Result<RemoteFile>;

    /// Write a file, conditioned on `request.sha`.
    async fn write_file(&self, request: WriteRequest) -> Result<WriteReceipt>;

    /// Commits on `git_ref`, newest first, optionally restricted to `path`.
    async fn list_commits(
        &self,
        git_ref: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>>;

    /// Check that the credentials can reach the repository.
    async fn probe(&self) -> Result<()>;
}
