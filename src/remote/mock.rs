//! In-memory content backend
//!
//! Behaves like a versioned hosting API: files per branch with content
//! hashes, a commit log with point-in-time snapshots, and conditional writes
//! that fail with a conflict on a stale version token. Failures can be
//! injected to exercise retry and offline paths.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{EditorError, Result};
use crate::remote::backend::{CommitInfo, ContentBackend, RemoteFile, WriteReceipt, WriteRequest};

/// Author recorded on mock commits.
const MOCK_AUTHOR: &str = "atelier-mock";

/// Failure to inject into the next matching call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    Network,
    Unauthorized,
    Forbidden,
    RateLimited(Option<Duration>),
    Server(u16),
}

impl Failure {
    fn into_error(self) -> EditorError {
        match self {
            Failure::Network => EditorError::Network {
                reason: "connection reset".to_string(),
            },
            Failure::Unauthorized => EditorError::Unauthorized,
            Failure::Forbidden => EditorError::Forbidden {
                reason: "token lacks contents:write".to_string(),
            },
            Failure::RateLimited(retry_after) => EditorError::RateLimited { retry_after },
            Failure::Server(status) => EditorError::Backend {
                status,
                message: "injected failure".to_string(),
            },
        }
    }
}

/// A write as the backend received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub path: String,
    pub branch: String,
    pub message: String,
    pub content: String,
    /// Version condition sent by the client.
    pub sha: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: Vec<u8>,
    sha: String,
}

#[derive(Debug, Clone)]
struct StoredCommit {
    info: CommitInfo,
    branch: String,
    path: String,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<(String, String), StoredFile>,
    commits: Vec<StoredCommit>,
    writes: Vec<RecordedWrite>,
    reads: usize,
    read_failures: VecDeque<Failure>,
    write_failures: VecDeque<Failure>,
    path_failures: Vec<(String, Failure)>,
    probe_denied: bool,
    sequence: u64,
}

/// In-memory versioned backend.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

/// Git-style blob hash, used as the version token.
fn blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    let digest = hasher.finalize();
    digest.iter().take(20).map(|b| format!("{:02x}", b)).collect()
}

impl MockState {
    fn commit(&mut self, branch: &str, path: &str, message: &str, content: &[u8]) -> (String, String) {
        self.sequence += 1;
        let sha = blob_sha(content);
        let commit_id = blob_sha(format!("{}:{}:{}:{}", self.sequence, branch, path, message).as_bytes());

        self.files.insert(
            (branch.to_string(), path.to_string()),
            StoredFile {
                content: content.to_vec(),
                sha: sha.clone(),
            },
        );
        self.commits.push(StoredCommit {
            info: CommitInfo {
                id: commit_id.clone(),
                message: message.to_string(),
                author: MOCK_AUTHOR.to_string(),
                date: Utc::now(),
            },
            branch: branch.to_string(),
            path: path.to_string(),
            content: content.to_vec(),
        });
        (sha, commit_id)
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put a file on `branch` directly. Returns its version token.
    pub fn seed(&self, branch: &str, path: &str, content: &str) -> String {
        let message = format!("Add {}", path);
        self.state().commit(branch, path, &message, content.as_bytes()).0
    }

    /// Simulate another session writing the file. Returns the new token.
    pub fn remote_edit(&self, branch: &str, path: &str, content: &str) -> String {
        let message = format!("Edit {} elsewhere", path);
        self.state().commit(branch, path, &message, content.as_bytes()).0
    }

    /// Current content of a file, if present.
    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .map(|f| String::from_utf8_lossy(&f.content).into_owned())
    }

    /// Current version token of a file, if present.
    pub fn sha(&self, branch: &str, path: &str) -> Option<String> {
        self.state()
            .files
            .get(&(branch.to_string(), path.to_string()))
            .map(|f| f.sha.clone())
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state().writes.clone()
    }

    /// Number of read calls received.
    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Number of commits on any branch.
    pub fn commit_count(&self) -> usize {
        self.state().commits.len()
    }

    pub fn fail_next_read(&self, failure: Failure) {
        self.state().read_failures.push_back(failure);
    }

    pub fn fail_next_write(&self, failure: Failure) {
        self.state().write_failures.push_back(failure);
    }

    /// Fail the next write to `path` only.
    pub fn fail_next_write_to(&self, path: &str, failure: Failure) {
        self.state().path_failures.push((path.to_string(), failure));
    }

    pub fn deny_probe(&self, denied: bool) {
        self.state().probe_denied = denied;
    }
}

#[async_trait]
impl ContentBackend for MockBackend {
    async fn read_file(&self, path: &str, git_ref: &str) -> Result<RemoteFile> {
        let mut state = self.state();
        state.reads += 1;
        if let Some(failure) = state.read_failures.pop_front() {
            return Err(failure.into_error());
        }

        if let Some(file) = state.files.get(&(git_ref.to_string(), path.to_string())) {
            return Ok(RemoteFile {
                content: file.content.clone(),
                sha: file.sha.clone(),
            });
        }

        // A ref that is not a branch may be a commit id. The file is read
        // from its branch as of that commit.
        let not_found = || EditorError::NotFound {
            path: path.to_string(),
        };
        let position = state
            .commits
            .iter()
            .position(|c| c.info.id == git_ref)
            .ok_or_else(not_found)?;
        let branch = &state.commits[position].branch;
        state.commits[..=position]
            .iter()
            .rev()
            .find(|c| c.branch == *branch && c.path == path)
            .map(|c| RemoteFile {
                content: c.content.clone(),
                sha: blob_sha(&c.content),
            })
            .ok_or_else(not_found)
    }

    async fn write_file(&self, request: WriteRequest) -> Result<WriteReceipt> {
        let mut state = self.state();
        if let Some(failure) = state.write_failures.pop_front() {
            return Err(failure.into_error());
        }
        if let Some(pos) = state
            .path_failures
            .iter()
            .position(|(path, _)| *path == request.path)
        {
            let (_, failure) = state.path_failures.remove(pos);
            return Err(failure.into_error());
        }

        let current = state
            .files
            .get(&(request.branch.clone(), request.path.clone()))
            .map(|f| f.sha.clone());
        let accepted = match (&current, &request.sha) {
            (None, None) => true,
            (Some(current), Some(expected)) => current == expected,
            _ => false,
        };
        if !accepted {
            return Err(EditorError::Conflict { path: request.path });
        }

        let (content_sha, commit_id) =
            state.commit(&request.branch, &request.path, &request.message, &request.content);
        state.writes.push(RecordedWrite {
            path: request.path,
            branch: request.branch,
            message: request.message,
            content: String::from_utf8_lossy(&request.content).into_owned(),
            sha: request.sha,
        });

        Ok(WriteReceipt {
            content_sha,
            commit_id,
        })
    }

    async fn list_commits(
        &self,
        git_ref: &str,
        path: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CommitInfo>> {
        let state = self.state();
        Ok(state
            .commits
            .iter()
            .rev()
            .filter(|c| c.branch == git_ref)
            .filter(|c| path.map_or(true, |p| c.path == p))
            .take(limit)
            .map(|c| c.info.clone())
            .collect())
    }

    async fn probe(&self) -> Result<()> {
        if self.state().probe_denied {
            return Err(EditorError::Unauthorized);
        }
        Ok(())
    }
}
