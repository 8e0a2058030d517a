//! Local Backup and Recovery
//!
//! Serializes the durable part of the [`ChangeStore`] into the local
//! key-value store and restores it after a reload. Restoring unsaved work
//! always requires an explicit confirmation from the editor.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::state::change::{Change, Note, OfflineQueueItem, TrashItem};
use crate::state::storage::KeyValueStore;
use crate::state::store::ChangeStore;

/// Key holding the serialized snapshot.
pub const BACKUP_KEY: &str = "backup";

/// Key holding the human-readable backup time.
pub const BACKUP_TIME_KEY: &str = "backup_time";

/// Asks the editor a yes/no question.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Durable subset of the editor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    pub page: Option<String>,
    #[serde(default)]
    pub pending_changes: Vec<Change>,
    #[serde(default)]
    pub trash: Vec<TrashItem>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub element_history: BTreeMap<String, Vec<Change>>,
    #[serde(default)]
    pub offline_queue: Vec<OfflineQueueItem>,
}

impl BackupSnapshot {
    /// Capture the durable fields of `store`.
    pub fn capture(store: &ChangeStore) -> Self {
        Self {
            timestamp: Utc::now(),
            page: store.current_page().map(str::to_string),
            pending_changes: store.pending_changes().to_vec(),
            trash: store.trash().to_vec(),
            notes: store.notes().to_vec(),
            element_history: store.all_element_history().clone(),
            offline_queue: store.offline_queue().to_vec(),
        }
    }

    /// True if restoring would bring back work that was never saved.
    pub fn has_unsaved_work(&self) -> bool {
        !self.pending_changes.is_empty() || !self.offline_queue.is_empty()
    }
}

/// Result of a restore attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No backup stored.
    NoBackup,

    /// A backup exists but holds no unsaved work.
    NothingToRestore,

    /// The editor declined the restore; the backup is left in place.
    Declined,

    /// Backup applied to the store.
    Restored { pending: usize, queued: usize },
}

/// Backup of the editor state in a local key-value store.
#[derive(Clone)]
pub struct LocalBackup {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackup").finish_non_exhaustive()
    }
}

impl LocalBackup {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Write a snapshot of `state`. Callers trigger this after every
    /// mutating operation.
    pub fn save(&self, state: &ChangeStore) -> Result<BackupSnapshot> {
        let snapshot = BackupSnapshot::capture(state);
        self.write(&snapshot)?;
        Ok(snapshot)
    }

    /// Write an existing snapshot.
    pub fn write(&self, snapshot: &BackupSnapshot) -> Result<()> {
        let content = serde_json::to_string(snapshot)?;
        self.store.set(BACKUP_KEY, &content)?;
        self.store.set(
            BACKUP_TIME_KEY,
            &snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )?;
        debug!(
            pending = snapshot.pending_changes.len(),
            queued = snapshot.offline_queue.len(),
            "local backup written"
        );
        Ok(())
    }

    /// Read the stored snapshot, if any.
    pub fn read(&self) -> Result<Option<BackupSnapshot>> {
        match self.store.get(BACKUP_KEY)? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Human-readable time of the stored backup.
    pub fn backup_time(&self) -> Result<Option<String>> {
        self.store.get(BACKUP_TIME_KEY)
    }

    /// Restore a stored backup into `state` after asking the editor.
    ///
    /// Pending changes are only restored when the backup names a page.
    /// Nothing in `state` is touched unless the editor confirms.
    pub fn load(&self, state: &mut ChangeStore, confirm: &dyn Confirm) -> Result<RestoreOutcome> {
        let snapshot = match self.read() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(RestoreOutcome::NoBackup),
            Err(e) => {
                warn!(error = %e, "local backup is unreadable");
                return Err(e);
            }
        };

        if !snapshot.has_unsaved_work() {
            return Ok(RestoreOutcome::NothingToRestore);
        }

        let when = self
            .backup_time()?
            .unwrap_or_else(|| "an unknown time".to_string());
        let prompt = format!(
            "A local backup from {} has {} unsaved change(s) and {} queued offline save(s). Restore it?",
            when,
            snapshot.pending_changes.len(),
            snapshot.offline_queue.len()
        );
        if !confirm.confirm(&prompt) {
            info!("local backup restore declined");
            return Ok(RestoreOutcome::Declined);
        }

        let queued = snapshot.offline_queue.len();
        state.restore_durable(
            snapshot.trash,
            snapshot.notes,
            snapshot.element_history,
            snapshot.offline_queue,
        );

        let pending = match snapshot.page {
            Some(page) if !snapshot.pending_changes.is_empty() => {
                let count = snapshot.pending_changes.len();
                state.restore_pending(page, snapshot.pending_changes);
                count
            }
            _ => 0,
        };

        info!(pending, queued, "local backup restored");
        Ok(RestoreOutcome::Restored { pending, queued })
    }

    /// Delete the stored backup.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(BACKUP_KEY)?;
        self.store.remove(BACKUP_TIME_KEY)
    }
}
