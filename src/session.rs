//! Editing session
//!
//! Owns the collaborators of one editor session and wires them together:
//! the change store, the persistence client, the local backup, the
//! autosave scheduler and the version history. Editing widgets and the CLI
//! talk to the session instead of reaching for shared globals.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::remote::{ContentBackend, PersistenceClient, WriteReceipt};
use crate::state::{
    lock, Change, ChangeStore, Confirm, KeyValueStore, LocalBackup, RestoreOutcome, SharedStore,
    StoreLimits,
};
use crate::sync::{
    AutosaveHandle, AutosaveScheduler, DocumentSource, DrainOutcome, SaveKind, SaveOutcome,
    VersionHistory,
};

/// One editor session on one site.
pub struct EditorSession {
    config: EditorConfig,
    store: SharedStore,
    client: Arc<PersistenceClient>,
    backup: Arc<LocalBackup>,
    scheduler: Arc<AutosaveScheduler>,
    versions: VersionHistory,
    document: Arc<dyn DocumentSource>,
}

impl std::fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorSession")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("client", &self.client)
            .field("scheduler", &self.scheduler)
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl EditorSession {
    /// Build a session from its external collaborators.
    pub fn new(
        config: EditorConfig,
        backend: Arc<dyn ContentBackend>,
        storage: Arc<dyn KeyValueStore>,
        document: Arc<dyn DocumentSource>,
    ) -> Self {
        let store = ChangeStore::shared(StoreLimits {
            undo_levels: config.undo_limit,
            trash: config.trash_limit,
            offline_queue: config.offline_queue_limit,
        });
        let client = Arc::new(PersistenceClient::from_config(&config, backend));
        let backup = Arc::new(LocalBackup::new(storage));
        let scheduler = Arc::new(AutosaveScheduler::from_config(
            &config,
            Arc::clone(&store),
            Arc::clone(&client),
            Arc::clone(&document),
            Arc::clone(&backup),
        ));
        let versions = VersionHistory::new(Arc::clone(&client), config.commit_history_limit);

        Self {
            config,
            store,
            client,
            backup,
            scheduler,
            versions,
            document,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn client(&self) -> &Arc<PersistenceClient> {
        &self.client
    }

    pub fn backup(&self) -> &LocalBackup {
        &self.backup
    }

    pub fn scheduler(&self) -> &Arc<AutosaveScheduler> {
        &self.scheduler
    }

    pub fn versions(&self) -> &VersionHistory {
        &self.versions
    }

    /// Load a page for editing. Returns its current content.
    pub async fn open_page(&self, page: &str) -> Result<String> {
        let content = self.client.get_file(page).await?;
        let mut state = lock(&self.store);
        if let Some(current) = state.current_page() {
            if current != page && state.has_unsaved_changes() {
                warn!(from = current, to = page, "Switching pages with unsaved changes");
            }
        }
        state.set_current_page(page);
        info!(page, bytes = content.len(), "Page opened");
        Ok(content)
    }

    /// Record one edit from an editing widget.
    ///
    /// The edit becomes pending, undoable and part of its element's
    /// history; while offline it is also queued. The backup is written in
    /// every case. A full offline queue is reported after the edit was kept.
    pub fn record_edit(&self, change: Change) -> Result<()> {
        let queued = {
            let mut state = lock(&self.store);
            if state.current_page().is_none() {
                return Err(EditorError::NoPageLoaded);
            }
            debug!(idx = %change.idx, kind = %change.kind, "Edit recorded");
            state.add_pending_change(change.clone());
            state.add_to_undo_stack(change.clone());
            state.add_to_element_history(change.idx.clone(), change.clone());
            if state.is_offline() {
                state.enqueue_offline(change)
            } else {
                Ok(())
            }
        };
        self.scheduler.save_backup();
        if let Err(e) = &queued {
            lock(&self.store).set_last_warning(Some(e.to_string()));
        }
        queued
    }

    pub fn undo(&self) -> Result<Change> {
        let change = lock(&self.store).undo()?;
        self.scheduler.save_backup();
        Ok(change)
    }

    pub fn redo(&self) -> Result<Change> {
        let change = lock(&self.store).redo()?;
        self.scheduler.save_backup();
        Ok(change)
    }

    /// Explicit save. Failures are returned for the caller to show.
    pub async fn save_now(&self) -> Result<SaveOutcome> {
        self.scheduler.flush(SaveKind::Manual).await
    }

    /// Feed the connectivity signal without a running autosave task.
    pub async fn set_online(&self, online: bool) -> Option<DrainOutcome> {
        self.scheduler.set_online(online).await
    }

    /// Start the autosave loop on the current runtime.
    pub fn spawn_autosave(&self) -> AutosaveHandle {
        let online = !lock(&self.store).is_offline();
        AutosaveHandle::spawn(Arc::clone(&self.scheduler), online)
    }

    /// Offer to restore the local backup.
    pub fn recover_backup(&self, confirm: &dyn Confirm) -> Result<RestoreOutcome> {
        let mut state = lock(&self.store);
        self.backup.load(&mut state, confirm)
    }

    /// Roll the current page back to commit `id` with a new commit.
    ///
    /// Unsaved changes would be lost, so the editor is asked first. Returns
    /// `None` if the editor declined. On success the live document is
    /// reloaded with the restored content and undo history is dropped, so
    /// later saves build on the restored page.
    pub async fn restore_version(
        &self,
        id: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<WriteReceipt>> {
        let (page, pending) = {
            let state = lock(&self.store);
            let page = state
                .current_page()
                .map(str::to_string)
                .ok_or(EditorError::NoPageLoaded)?;
            (page, state.pending_changes().len())
        };

        if pending > 0 {
            let prompt = format!(
                "Restoring this version discards {} unsaved change(s). Continue?",
                pending
            );
            if !confirm.confirm(&prompt) {
                info!(page = %page, "Version restore declined");
                return Ok(None);
            }
        }

        let restored = self.versions.restore(&page, id).await?;
        {
            let mut state = lock(&self.store);
            let discarded = state.discard_pending_changes();
            if !discarded.is_empty() {
                info!(page = %page, discarded = discarded.len(), "Discarded unsaved changes");
            }
            state.clear_undo_history();
        }
        self.scheduler.save_backup();
        self.document.reload(&page, &restored.content)?;
        Ok(Some(restored.receipt))
    }
}
