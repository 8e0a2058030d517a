//! Autosave scheduler
//!
//! Flushes pending changes through the persistence client on a timer, on
//! explicit request, and on connectivity changes. While offline it only
//! queues and backs up; when connectivity returns it drains the offline
//! queue once, resending the current full document for each queued page.
//!
//! A single saving guard keeps flushes from overlapping. It is an atomic
//! compare-and-swap held by an RAII guard, so it is sound on a
//! multi-threaded runtime as well. A flush that finds the guard taken is
//! dropped, not queued.

use std::collections::HashSet;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::remote::PersistenceClient;
use crate::state::{lock, BackupSnapshot, Change, ChangeKind, LocalBackup, OfflineQueueItem, SaveStatus, SharedStore};
use crate::sync::document::DocumentSource;

/// What triggered a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Autosave,
    Manual,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No page loaded or nothing pending.
    Nothing,
    /// Another flush was in flight; this one was dropped.
    Skipped,
    /// Offline: pending changes were queued and backed up.
    Queued,
    /// The page was written.
    Saved { commit_id: String, changes: usize },
}

/// Result of an offline queue drain.
#[derive(Debug)]
pub enum DrainOutcome {
    Empty,
    /// Another flush was in flight.
    Skipped,
    /// Every queued item was synced.
    Drained { items: usize },
    /// A save failed; that item and everything after it are still queued.
    Stopped {
        synced: usize,
        remaining: usize,
        error: EditorError,
    },
}

/// Commit message for a flush of `count` changes to `page`.
pub fn commit_message(kind: SaveKind, count: usize, page: &str) -> String {
    let noun = if count == 1 { "change" } else { "changes" };
    match kind {
        SaveKind::Autosave => format!("Autosave: {} {} to {}", count, noun, page),
        SaveKind::Manual => format!("{} {} to {}", count, noun, page),
    }
}

/// Commit message for a drained offline item.
pub fn offline_sync_message(count: usize, page: &str) -> String {
    let noun = if count == 1 { "change" } else { "changes" };
    format!("Offline sync: {} {} to {}", count, noun, page)
}

fn settled_status(unsaved: bool) -> SaveStatus {
    if unsaved {
        SaveStatus::Unsaved
    } else {
        SaveStatus::Saved
    }
}

fn asset_dir(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Video => "videos",
        _ => "images",
    }
}

/// Exponential backoff between failed drains.
#[derive(Debug, Clone)]
pub struct DrainBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl DrainBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
            next_attempt: None,
        }
    }

    /// Whether a timer-driven drain may run at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    /// Record a failed drain and return the delay before the next one.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let exponent = self.failures.min(16);
        self.failures = self.failures.saturating_add(1);
        let delay = self
            .base
            .saturating_mul(1u32 << exponent)
            .min(self.max);
        self.next_attempt = Some(now + delay);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Releases the saving flag when dropped.
struct SavingGuard<'a>(&'a AtomicBool);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Timer- and event-driven flush of the change store.
pub struct AutosaveScheduler {
    store: SharedStore,
    client: Arc<PersistenceClient>,
    document: Arc<dyn DocumentSource>,
    backup: Arc<LocalBackup>,
    interval: Duration,
    saving: AtomicBool,
    uploaded: Mutex<HashSet<Uuid>>,
    backoff: Mutex<DrainBackoff>,
}

impl std::fmt::Debug for AutosaveScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutosaveScheduler")
            .field("interval", &self.interval)
            .field("saving", &self.is_saving())
            .finish_non_exhaustive()
    }
}

impl AutosaveScheduler {
    pub fn new(
        store: SharedStore,
        client: Arc<PersistenceClient>,
        document: Arc<dyn DocumentSource>,
        backup: Arc<LocalBackup>,
        interval: Duration,
        backoff: DrainBackoff,
    ) -> Self {
        Self {
            store,
            client,
            document,
            backup,
            interval,
            saving: AtomicBool::new(false),
            uploaded: Mutex::new(HashSet::new()),
            backoff: Mutex::new(backoff),
        }
    }

    pub fn from_config(
        config: &EditorConfig,
        store: SharedStore,
        client: Arc<PersistenceClient>,
        document: Arc<dyn DocumentSource>,
        backup: Arc<LocalBackup>,
    ) -> Self {
        let backoff = DrainBackoff::new(
            Duration::from_millis(config.drain_backoff_base_ms),
            Duration::from_millis(config.drain_backoff_max_ms),
        );
        Self::new(store, client, document, backup, config.autosave_interval(), backoff)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while a flush or drain is in flight.
    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<SavingGuard<'_>> {
        self.saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SavingGuard(&self.saving))
    }

    fn backoff(&self) -> MutexGuard<'_, DrainBackoff> {
        self.backoff
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Failed drains since the last successful one.
    pub fn drain_failures(&self) -> u32 {
        self.backoff().failures()
    }

    /// Write the local backup, logging instead of failing.
    pub fn save_backup(&self) {
        let snapshot = BackupSnapshot::capture(&lock(&self.store));
        if let Err(e) = self.backup.write(&snapshot) {
            warn!(error = %e, "Could not write local backup");
        }
    }

    /// Queue every pending change while offline.
    fn queue_pending(&self) {
        let mut state = lock(&self.store);
        let pending = state.pending_changes().to_vec();
        for change in pending {
            if let Err(e) = state.enqueue_offline(change) {
                warn!(error = %e, "Offline queue is full, keeping edit in pending changes only");
                state.set_last_warning(Some(e.to_string()));
                break;
            }
        }
    }

    async fn upload_assets(&self, changes: &[Change]) -> Result<()> {
        for change in changes {
            let Some((file, data)) = change.pending_upload() else {
                continue;
            };
            if self.uploaded_contains(change.id) {
                continue;
            }
            let path = self
                .client
                .upload_asset(asset_dir(change.kind), file, data)
                .await?;
            debug!(path = %path, "Uploaded asset");
            self.uploaded_insert(change.id);
        }
        Ok(())
    }

    fn uploaded_contains(&self, id: Uuid) -> bool {
        self.uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&id)
    }

    fn uploaded_insert(&self, id: Uuid) {
        self.uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
    }

    /// Drop upload records of changes that were written.
    fn forget_uploads(&self, ids: &[Uuid]) {
        let mut uploaded = self
            .uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in ids {
            uploaded.remove(id);
        }
    }

    /// Number of changes whose asset was uploaded but whose page write has
    /// not succeeded yet.
    pub fn unconfirmed_uploads(&self) -> usize {
        self.uploaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Flush pending changes of the current page as one commit.
    ///
    /// Changes held by the offline queue are left to the queue drain. On
    /// failure pending changes stay untouched and the store's save status
    /// becomes `Error`; the error is returned to the caller.
    pub async fn flush(&self, kind: SaveKind) -> Result<SaveOutcome> {
        let (page, pending, offline) = {
            let state = lock(&self.store);
            let queued = state.queued_change_ids();
            (
                state.current_page().map(str::to_string),
                state
                    .pending_changes()
                    .iter()
                    .filter(|c| !queued.contains(&c.id))
                    .cloned()
                    .collect::<Vec<_>>(),
                state.is_offline(),
            )
        };
        let Some(page) = page else {
            return Ok(SaveOutcome::Nothing);
        };
        if pending.is_empty() {
            return Ok(SaveOutcome::Nothing);
        }

        if offline {
            self.queue_pending();
            self.save_backup();
            info!(page = %page, changes = pending.len(), "Offline, changes queued until reconnect");
            return Ok(SaveOutcome::Queued);
        }

        let Some(_guard) = self.try_begin() else {
            debug!(page = %page, "Save already in flight, dropping");
            return Ok(SaveOutcome::Skipped);
        };

        lock(&self.store).set_save_status(SaveStatus::Saving);
        let message = commit_message(kind, pending.len(), &page);
        let result = self.write_page(&page, &pending, &message).await;

        match result {
            Ok(commit_id) => {
                let ids: Vec<Uuid> = pending.iter().map(|c| c.id).collect();
                {
                    let mut state = lock(&self.store);
                    state.commit_flushed(&ids);
                    state.set_last_error(None);
                    let status = settled_status(state.has_unsaved_changes());
                    state.set_save_status(status);
                }
                self.forget_uploads(&ids);
                self.save_backup();
                info!(page = %page, changes = ids.len(), commit = %commit_id, "Saved");
                Ok(SaveOutcome::Saved {
                    commit_id,
                    changes: ids.len(),
                })
            }
            Err(e) => {
                {
                    let mut state = lock(&self.store);
                    state.set_save_status(SaveStatus::Error);
                    state.set_last_error(Some(e.to_string()));
                }
                match kind {
                    SaveKind::Autosave => {
                        warn!(page = %page, error = %e, "Autosave failed, retrying on next tick")
                    }
                    SaveKind::Manual => error!(page = %page, error = %e, "Save failed"),
                }
                Err(e)
            }
        }
    }

    async fn write_page(&self, page: &str, changes: &[Change], message: &str) -> Result<String> {
        self.upload_assets(changes).await?;
        let html = self.document.snapshot(page)?;
        let receipt = self.client.save_file(page, &html, message).await?;
        Ok(receipt.commit_id)
    }

    /// Resend the current document for every queued offline item, oldest
    /// first. Stops at the first failure, leaving that item and the rest
    /// of the queue untouched.
    pub async fn drain_offline_queue(&self) -> DrainOutcome {
        let Some(_guard) = self.try_begin() else {
            debug!("Save in flight, offline queue drain deferred");
            return DrainOutcome::Skipped;
        };

        let (items, current_page) = {
            let state = lock(&self.store);
            (
                state.offline_queue().to_vec(),
                state.current_page().map(str::to_string),
            )
        };
        if items.is_empty() {
            return DrainOutcome::Empty;
        }

        info!(items = items.len(), "Syncing offline queue");
        let mut synced = 0;
        for item in &items {
            if let Err(error) = self.sync_item(item).await {
                let remaining = items.len() - synced;
                let delay = self.backoff().record_failure(Instant::now());
                warn!(
                    page = %item.page,
                    remaining,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Offline sync stopped"
                );
                lock(&self.store).set_last_warning(Some(format!(
                    "{} offline item(s) could not be synced: {}",
                    remaining, error
                )));
                self.save_backup();
                return DrainOutcome::Stopped {
                    synced,
                    remaining,
                    error,
                };
            }

            let ids: Vec<Uuid> = item.changes.iter().map(|c| c.id).collect();
            {
                let mut state = lock(&self.store);
                state.remove_offline_items(slice::from_ref(item));
                if current_page.as_deref() == Some(item.page.as_str()) {
                    state.commit_flushed(&ids);
                }
            }
            self.forget_uploads(&ids);
            synced += 1;
        }

        self.backoff().reset();
        {
            let mut state = lock(&self.store);
            state.set_last_warning(None);
            let status = settled_status(state.has_unsaved_changes());
            state.set_save_status(status);
        }
        self.save_backup();
        info!(items = synced, "Offline queue synced");
        DrainOutcome::Drained { items: synced }
    }

    async fn sync_item(&self, item: &OfflineQueueItem) -> Result<()> {
        self.upload_assets(&item.changes).await?;
        let html = self.document.snapshot(&item.page)?;
        if self.client.version_token(&item.page).is_none() {
            // Learn the current token of a page this session never read.
            self.client.get_file(&item.page).await?;
        }
        let message = offline_sync_message(item.changes.len(), &item.page);
        self.client.save_file(&item.page, &html, &message).await?;
        Ok(())
    }

    /// Apply a connectivity change. Going online drains the queue once.
    pub async fn set_online(&self, online: bool) -> Option<DrainOutcome> {
        let was_offline = {
            let mut state = lock(&self.store);
            let was_offline = state.is_offline();
            state.set_offline(!online);
            was_offline
        };

        if !online {
            if !was_offline {
                info!("Connection lost, edits will be queued");
                self.queue_pending();
                self.save_backup();
            }
            return None;
        }
        if was_offline {
            info!("Connection restored");
            return Some(self.drain_offline_queue().await);
        }
        None
    }

    /// One timer tick.
    ///
    /// A queued item that keeps failing only delays its own changes; other
    /// pending edits are still autosaved.
    pub async fn tick(&self) {
        let (offline, queued) = {
            let state = lock(&self.store);
            (state.is_offline(), !state.offline_queue().is_empty())
        };
        if offline {
            return;
        }

        if queued {
            let due = self.backoff().is_due(Instant::now());
            if due {
                self.drain_offline_queue().await;
            }
        }

        let (unsaved, status) = {
            let state = lock(&self.store);
            (state.has_unsaved_changes(), state.save_status())
        };
        if unsaved {
            // Errors are recorded in the store; the next tick retries.
            let _ = self.flush(SaveKind::Autosave).await;
        } else if status == SaveStatus::Saved {
            lock(&self.store).set_save_status(SaveStatus::Idle);
        }
    }

    /// Drive the scheduler until `shutdown` fires or the connectivity
    /// sender is dropped.
    pub async fn run(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Autosave started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    self.set_online(online).await;
                }
                _ = &mut shutdown => break,
            }
        }
        info!("Autosave stopped");
    }
}

/// Handle to a running scheduler task.
#[derive(Debug)]
pub struct AutosaveHandle {
    connectivity: watch::Sender<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl AutosaveHandle {
    /// Spawn `scheduler` on the current runtime.
    pub fn spawn(scheduler: Arc<AutosaveScheduler>, online: bool) -> Self {
        let (connectivity, rx) = watch::channel(online);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(scheduler.run(rx, shutdown_rx));
        Self {
            connectivity,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Report the runtime's online/offline signal.
    pub fn set_online(&self, online: bool) {
        self.connectivity.send_replace(online);
    }

    /// Stop the loop and wait for it to finish the current step.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Autosave task ended abnormally");
        }
    }
}
