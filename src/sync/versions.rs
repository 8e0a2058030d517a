//! Version history
//!
//! Read-only view of the commit log of a page. Rolling back re-applies old
//! content as a new write; history is never rewritten.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{EditorError, Result};
use crate::remote::{CommitInfo, PersistenceClient, WriteReceipt};

/// Outcome of a version restore: the new commit and the content it wrote.
#[derive(Debug, Clone)]
pub struct RestoredVersion {
    pub receipt: WriteReceipt,
    pub content: String,
}

/// A version picked for preview or restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedVersion {
    pub id: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Default)]
struct Listing {
    page: Option<String>,
    commits: Vec<CommitInfo>,
    selected: Option<SelectedVersion>,
}

/// Commit history of the current page.
#[derive(Debug)]
pub struct VersionHistory {
    client: Arc<PersistenceClient>,
    limit: usize,
    listing: Mutex<Listing>,
}

/// Message of the commit that restores `commit`.
pub fn restore_message(commit_id: &str) -> String {
    let short: String = commit_id.chars().take(7).collect();
    format!("Restore version from {}", short)
}

impl VersionHistory {
    pub fn new(client: Arc<PersistenceClient>, limit: usize) -> Self {
        Self {
            client,
            limit,
            listing: Mutex::new(Listing::default()),
        }
    }

    fn listing(&self) -> MutexGuard<'_, Listing> {
        self.listing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the newest commits touching `page`. Clears any selection.
    pub async fn load(&self, page: &str) -> Result<Vec<CommitInfo>> {
        let commits = self.client.get_commits(Some(page), self.limit).await?;
        let mut listing = self.listing();
        listing.page = Some(page.to_string());
        listing.commits = commits.clone();
        listing.selected = None;
        Ok(commits)
    }

    /// Commits from the last `load`.
    pub fn commits(&self) -> Vec<CommitInfo> {
        self.listing().commits.clone()
    }

    /// Stage a loaded version. Nothing else changes.
    pub fn select(&self, id: &str) -> Result<SelectedVersion> {
        let mut listing = self.listing();
        let commit = listing
            .commits
            .iter()
            .find(|c| c.id == id || (id.len() >= 7 && c.id.starts_with(id)))
            .ok_or_else(|| EditorError::VersionNotFound { id: id.to_string() })?;
        let selected = SelectedVersion {
            id: commit.id.clone(),
            date: commit.date,
            message: commit.message.clone(),
        };
        listing.selected = Some(selected.clone());
        Ok(selected)
    }

    pub fn selected(&self) -> Option<SelectedVersion> {
        self.listing().selected.clone()
    }

    pub fn clear_selection(&self) {
        self.listing().selected = None;
    }

    /// Content of `page` at commit `id`.
    pub async fn preview(&self, page: &str, id: &str) -> Result<String> {
        self.client.get_file_at_commit(page, id).await.map_err(|e| match e {
            EditorError::NotFound { .. } => EditorError::VersionNotFound { id: id.to_string() },
            other => other,
        })
    }

    /// Write the content of `page` at commit `id` as a new commit.
    pub async fn restore(&self, page: &str, id: &str) -> Result<RestoredVersion> {
        let content = self.preview(page, id).await?;
        if self.client.version_token(page).is_none() {
            self.client.get_file(page).await?;
        }
        let receipt = self
            .client
            .save_file(page, &content, &restore_message(id))
            .await?;
        info!(page, version = id, commit = %receipt.commit_id, "Version restored");

        let mut listing = self.listing();
        if listing.page.as_deref() == Some(page) {
            listing.selected = None;
        }
        Ok(RestoredVersion { receipt, content })
    }
}
