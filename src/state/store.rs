//! Change Store
//!
//! The canonical in-memory record of an editing session: pending edits,
//! the applied log, undo/redo, per-element history, the offline queue,
//! trash and notes. Every observable field change is published to the
//! registered listeners as `(key, new_value, old_value)`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EditorError, Result};
use crate::state::change::{Change, Note, OfflineQueueItem, TrashItem};
use crate::state::undo::{PendingRestore, RedoEntry, UndoHistory, DEFAULT_MAX_UNDO_LEVELS};

/// Default number of trashed elements kept.
pub const DEFAULT_TRASH_LIMIT: usize = 20;

/// Default bound on offline queue items.
pub const DEFAULT_OFFLINE_QUEUE_LIMIT: usize = 50;

/// Store shared between the session, the scheduler and editing widgets.
pub type SharedStore = Arc<Mutex<ChangeStore>>;

/// Lock a shared store, recovering the data from a poisoned lock.
///
/// The guard must not be held across an `.await`.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, ChangeStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Observable properties of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateKey {
    CurrentPage,
    PendingChanges,
    AppliedChanges,
    HasUnsavedChanges,
    UndoStack,
    RedoStack,
    ElementHistory,
    OfflineQueue,
    IsOffline,
    Trash,
    Notes,
    SaveStatus,
    LastError,
    LastWarning,
}

/// Save state shown to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Unsaved,
    Saving,
    Saved,
    Error,
}

/// Callback invoked with `(key, new_value, old_value)`.
pub type Listener = Box<dyn Fn(StateKey, &Value, &Value) + Send + Sync>;

/// Handle returned by [`ChangeStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Size bounds for the store's collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub undo_levels: usize,
    pub trash: usize,
    pub offline_queue: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            undo_levels: DEFAULT_MAX_UNDO_LEVELS,
            trash: DEFAULT_TRASH_LIMIT,
            offline_queue: DEFAULT_OFFLINE_QUEUE_LIMIT,
        }
    }
}

/// Canonical editor state for one session.
pub struct ChangeStore {
    current_page: Option<String>,
    pending: Vec<Change>,
    applied: Vec<Change>,
    has_unsaved_changes: bool,
    history: UndoHistory,
    element_history: BTreeMap<String, Vec<Change>>,
    offline_queue: Vec<OfflineQueueItem>,
    is_offline: bool,
    trash: Vec<TrashItem>,
    notes: Vec<Note>,
    save_status: SaveStatus,
    last_error: Option<String>,
    last_warning: Option<String>,
    limits: StoreLimits,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl Default for ChangeStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl fmt::Debug for ChangeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeStore")
            .field("current_page", &self.current_page)
            .field("pending", &self.pending.len())
            .field("applied", &self.applied.len())
            .field("has_unsaved_changes", &self.has_unsaved_changes)
            .field("offline_queue", &self.offline_queue.len())
            .field("is_offline", &self.is_offline)
            .field("save_status", &self.save_status)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChangeStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            current_page: None,
            pending: Vec::new(),
            applied: Vec::new(),
            has_unsaved_changes: false,
            history: UndoHistory::new(limits.undo_levels),
            element_history: BTreeMap::new(),
            offline_queue: Vec::new(),
            is_offline: false,
            trash: Vec::new(),
            notes: Vec::new(),
            save_status: SaveStatus::Idle,
            last_error: None,
            last_warning: None,
            limits,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Wrap a fresh store for sharing.
    pub fn shared(limits: StoreLimits) -> SharedStore {
        Arc::new(Mutex::new(Self::new(limits)))
    }

    // === Subscriptions ===

    /// Register a listener. Listeners run synchronously while the store is
    /// borrowed and must not call back into it.
    pub fn subscribe(
        &mut self,
        listener: impl Fn(StateKey, &Value, &Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sub, _)| *sub != id);
        self.listeners.len() != before
    }

    fn key_value(&self, key: StateKey) -> Value {
        let value = match key {
            StateKey::CurrentPage => serde_json::to_value(&self.current_page),
            StateKey::PendingChanges => serde_json::to_value(&self.pending),
            StateKey::AppliedChanges => serde_json::to_value(&self.applied),
            StateKey::HasUnsavedChanges => serde_json::to_value(self.has_unsaved_changes),
            StateKey::UndoStack => serde_json::to_value(self.history.undo_stack()),
            StateKey::RedoStack => serde_json::to_value(self.history.redo_stack()),
            StateKey::ElementHistory => serde_json::to_value(&self.element_history),
            StateKey::OfflineQueue => serde_json::to_value(&self.offline_queue),
            StateKey::IsOffline => serde_json::to_value(self.is_offline),
            StateKey::Trash => serde_json::to_value(&self.trash),
            StateKey::Notes => serde_json::to_value(&self.notes),
            StateKey::SaveStatus => serde_json::to_value(self.save_status),
            StateKey::LastError => serde_json::to_value(&self.last_error),
            StateKey::LastWarning => serde_json::to_value(&self.last_warning),
        };
        value.unwrap_or(Value::Null)
    }

    /// Run a mutation and notify listeners about every key in `keys` whose
    /// value changed.
    fn observe<R>(&mut self, keys: &[StateKey], mutate: impl FnOnce(&mut Self) -> R) -> R {
        if self.listeners.is_empty() {
            return mutate(self);
        }

        let before: Vec<Value> = keys.iter().map(|key| self.key_value(*key)).collect();
        let result = mutate(self);

        for (key, old) in keys.iter().zip(before) {
            let new = self.key_value(*key);
            if new != old {
                for (_, listener) in &self.listeners {
                    listener(*key, &new, &old);
                }
            }
        }
        result
    }

    // === Page ===

    pub fn current_page(&self) -> Option<&str> {
        self.current_page.as_deref()
    }

    pub fn set_current_page(&mut self, page: impl Into<String>) {
        let page = page.into();
        self.observe(&[StateKey::CurrentPage], |s| s.current_page = Some(page));
    }

    // === Pending changes ===

    /// Append an edit and mark the session dirty.
    pub fn add_pending_change(&mut self, change: Change) {
        self.observe(
            &[
                StateKey::PendingChanges,
                StateKey::HasUnsavedChanges,
                StateKey::SaveStatus,
            ],
            |s| {
                s.pending.push(change);
                s.has_unsaved_changes = true;
                s.save_status = SaveStatus::Unsaved;
            },
        );
    }

    /// Move every pending change into the applied log. Only call after the
    /// remote write covering them was confirmed.
    pub fn clear_pending_changes(&mut self) {
        self.observe(
            &[
                StateKey::PendingChanges,
                StateKey::AppliedChanges,
                StateKey::HasUnsavedChanges,
            ],
            |s| {
                s.applied.append(&mut s.pending);
                s.has_unsaved_changes = false;
            },
        );
    }

    /// Move exactly the changes in `ids` into the applied log, keeping edits
    /// made while the flush was in flight.
    pub fn commit_flushed(&mut self, ids: &[Uuid]) {
        self.observe(
            &[
                StateKey::PendingChanges,
                StateKey::AppliedChanges,
                StateKey::HasUnsavedChanges,
            ],
            |s| {
                let (flushed, kept): (Vec<Change>, Vec<Change>) = s
                    .pending
                    .drain(..)
                    .partition(|change| ids.contains(&change.id));
                s.applied.extend(flushed);
                s.pending = kept;
                s.has_unsaved_changes = !s.pending.is_empty();
            },
        );
    }

    /// Drop all pending changes without persisting them. Used only after the
    /// editor explicitly agreed to lose them.
    pub fn discard_pending_changes(&mut self) -> Vec<Change> {
        self.observe(
            &[StateKey::PendingChanges, StateKey::HasUnsavedChanges],
            |s| {
                s.has_unsaved_changes = false;
                std::mem::take(&mut s.pending)
            },
        )
    }

    /// Replace pending changes with restored ones.
    pub(crate) fn restore_pending(&mut self, page: String, pending: Vec<Change>) {
        self.observe(
            &[
                StateKey::CurrentPage,
                StateKey::PendingChanges,
                StateKey::HasUnsavedChanges,
                StateKey::SaveStatus,
            ],
            |s| {
                s.current_page = Some(page);
                s.has_unsaved_changes = !pending.is_empty();
                if s.has_unsaved_changes {
                    s.save_status = SaveStatus::Unsaved;
                }
                s.pending = pending;
            },
        );
    }

    pub fn pending_changes(&self) -> &[Change] {
        &self.pending
    }

    pub fn applied_changes(&self) -> &[Change] {
        &self.applied
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.has_unsaved_changes
    }

    // === Undo / Redo ===

    /// Record an edit as undoable. Clears the redo stack.
    pub fn add_to_undo_stack(&mut self, change: Change) {
        self.observe(&[StateKey::UndoStack, StateKey::RedoStack], |s| {
            s.history.push(change)
        });
    }

    /// Undo the most recent edit.
    ///
    /// A still-pending edit is removed from the pending list and from the
    /// offline queue so it is never persisted. An edit that was already saved
    /// gets an inverse change queued instead, so the revert reaches the
    /// remote too.
    pub fn undo(&mut self) -> Result<Change> {
        if !self.history.can_undo() {
            return Err(EditorError::NothingToUndo);
        }
        self.observe(
            &[
                StateKey::UndoStack,
                StateKey::RedoStack,
                StateKey::PendingChanges,
                StateKey::HasUnsavedChanges,
                StateKey::OfflineQueue,
                StateKey::LastWarning,
            ],
            |s| {
                let change = s.history.pop_undo().ok_or(EditorError::NothingToUndo)?;
                let restore = match s.pending.iter().position(|c| c.id == change.id) {
                    Some(position) => {
                        s.pending.remove(position);
                        let queued = s.unqueue_change(change.id);
                        PendingRestore::Reinsert { position, queued }
                    }
                    None => {
                        let inverse = change.inverse();
                        let inverse_id = inverse.id;
                        s.pending.push(inverse.clone());
                        if s.is_offline {
                            s.queue_or_warn(inverse);
                        }
                        PendingRestore::DropInverse { inverse_id }
                    }
                };
                s.history.push_redo(RedoEntry {
                    change: change.clone(),
                    restore,
                });
                s.has_unsaved_changes = !s.pending.is_empty();
                Ok(change)
            },
        )
    }

    /// Redo the most recently undone edit, reversing exactly what the undo
    /// did to the pending list.
    pub fn redo(&mut self) -> Result<Change> {
        if !self.history.can_redo() {
            return Err(EditorError::NothingToRedo);
        }
        self.observe(
            &[
                StateKey::UndoStack,
                StateKey::RedoStack,
                StateKey::PendingChanges,
                StateKey::HasUnsavedChanges,
                StateKey::OfflineQueue,
                StateKey::LastWarning,
            ],
            |s| {
                let entry = s.history.pop_redo().ok_or(EditorError::NothingToRedo)?;
                match entry.restore {
                    PendingRestore::Reinsert { position, queued } => {
                        let position = position.min(s.pending.len());
                        s.pending.insert(position, entry.change.clone());
                        if queued {
                            s.queue_or_warn(entry.change.clone());
                        }
                    }
                    PendingRestore::DropInverse { inverse_id } => {
                        match s.pending.iter().position(|c| c.id == inverse_id) {
                            Some(position) => {
                                s.pending.remove(position);
                                s.unqueue_change(inverse_id);
                            }
                            // The revert was saved meanwhile; re-apply the edit.
                            None => {
                                s.pending.push(entry.change.clone());
                                if s.is_offline {
                                    s.queue_or_warn(entry.change.clone());
                                }
                            }
                        }
                    }
                }
                s.history.push_redone(entry.change.clone());
                s.has_unsaved_changes = !s.pending.is_empty();
                Ok(entry.change)
            },
        )
    }

    /// Forget both undo stacks, e.g. after the page was replaced wholesale.
    pub fn clear_undo_history(&mut self) {
        self.observe(&[StateKey::UndoStack, StateKey::RedoStack], |s| {
            s.history.clear()
        });
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo_history(&self) -> &UndoHistory {
        &self.history
    }

    // === Element history ===

    /// Append to the audit trail of one element.
    pub fn add_to_element_history(&mut self, idx: impl Into<String>, change: Change) {
        let idx = idx.into();
        self.observe(&[StateKey::ElementHistory], |s| {
            s.element_history.entry(idx).or_default().push(change)
        });
    }

    pub fn element_history(&self, idx: &str) -> &[Change] {
        self.element_history
            .get(idx)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The last `limit` entries of an element's history, newest first.
    pub fn recent_element_history(&self, idx: &str, limit: usize) -> Vec<&Change> {
        self.element_history(idx).iter().rev().take(limit).collect()
    }

    /// Look up one history entry, e.g. to restore its original value.
    pub fn element_history_entry(&self, idx: &str, id: Uuid) -> Option<&Change> {
        self.element_history(idx).iter().find(|c| c.id == id)
    }

    pub fn all_element_history(&self) -> &BTreeMap<String, Vec<Change>> {
        &self.element_history
    }

    // === Offline ===

    pub fn is_offline(&self) -> bool {
        self.is_offline
    }

    pub fn set_offline(&mut self, offline: bool) {
        self.observe(&[StateKey::IsOffline], |s| s.is_offline = offline);
    }

    /// Add an edit made while offline to the queue. Edits on a page that
    /// already has a queued item join that item.
    pub fn enqueue_offline(&mut self, change: Change) -> Result<()> {
        self.observe(&[StateKey::OfflineQueue], |s| s.queue_change(change))
    }

    fn queue_change(&mut self, change: Change) -> Result<()> {
        if let Some(item) = self
            .offline_queue
            .iter_mut()
            .rev()
            .find(|item| item.page == change.page)
        {
            if !item.changes.iter().any(|c| c.id == change.id) {
                item.changes.push(change);
            }
            return Ok(());
        }
        let limit = self.limits.offline_queue;
        if self.offline_queue.len() >= limit {
            return Err(EditorError::OfflineQueueFull { limit });
        }
        let page = change.page.clone();
        self.offline_queue.push(OfflineQueueItem::save(page, vec![change]));
        Ok(())
    }

    fn queue_or_warn(&mut self, change: Change) {
        if let Err(e) = self.queue_change(change) {
            self.last_warning = Some(e.to_string());
        }
    }

    /// Take a change out of the offline queue, dropping an item it leaves
    /// empty. Returns false if it was not queued.
    fn unqueue_change(&mut self, id: Uuid) -> bool {
        let Some(position) = self
            .offline_queue
            .iter()
            .position(|item| item.changes.iter().any(|c| c.id == id))
        else {
            return false;
        };
        let item = &mut self.offline_queue[position];
        item.changes.retain(|c| c.id != id);
        if item.changes.is_empty() {
            self.offline_queue.remove(position);
        }
        true
    }

    pub fn offline_queue(&self) -> &[OfflineQueueItem] {
        &self.offline_queue
    }

    /// Ids of every change held by the offline queue.
    pub fn queued_change_ids(&self) -> HashSet<Uuid> {
        self.offline_queue
            .iter()
            .flat_map(|item| item.changes.iter().map(|c| c.id))
            .collect()
    }

    /// Remove queue items that were synced. Items that changed since the
    /// caller copied them are kept.
    pub fn remove_offline_items(&mut self, synced: &[OfflineQueueItem]) {
        self.observe(&[StateKey::OfflineQueue], |s| {
            for item in synced {
                if let Some(position) = s.offline_queue.iter().position(|q| q == item) {
                    s.offline_queue.remove(position);
                }
            }
        });
    }

    // === Trash ===

    /// Keep a deleted element, dropping the oldest beyond the trash limit.
    pub fn add_to_trash(&mut self, item: TrashItem) {
        let limit = self.limits.trash;
        self.observe(&[StateKey::Trash], |s| {
            s.trash.push(item);
            if s.trash.len() > limit {
                let excess = s.trash.len() - limit;
                s.trash.drain(..excess);
            }
        });
    }

    /// Take an element back out of the trash.
    pub fn restore_from_trash(&mut self, id: Uuid) -> Option<TrashItem> {
        self.observe(&[StateKey::Trash], |s| {
            let position = s.trash.iter().position(|item| item.id == id)?;
            Some(s.trash.remove(position))
        })
    }

    pub fn trash(&self) -> &[TrashItem] {
        &self.trash
    }

    // === Notes ===

    pub fn add_note(&mut self, note: Note) -> Uuid {
        let id = note.id;
        self.observe(&[StateKey::Notes], |s| s.notes.push(note));
        id
    }

    pub fn update_note_text(&mut self, id: Uuid, text: impl Into<String>) -> bool {
        let text = text.into();
        self.update_note(id, |note| note.text = text)
    }

    pub fn move_note(&mut self, id: Uuid, x: i32, y: i32) -> bool {
        self.update_note(id, |note| {
            note.x = x;
            note.y = y;
        })
    }

    pub fn toggle_note_minimized(&mut self, id: Uuid) -> bool {
        self.update_note(id, |note| note.minimized = !note.minimized)
    }

    pub fn remove_note(&mut self, id: Uuid) -> bool {
        self.observe(&[StateKey::Notes], |s| {
            let before = s.notes.len();
            s.notes.retain(|note| note.id != id);
            s.notes.len() != before
        })
    }

    fn update_note(&mut self, id: Uuid, apply: impl FnOnce(&mut Note)) -> bool {
        self.observe(&[StateKey::Notes], |s| {
            match s.notes.iter_mut().find(|note| note.id == id) {
                Some(note) => {
                    apply(note);
                    true
                }
                None => false,
            }
        })
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Notes pinned to `page`, plus notes without a page.
    pub fn notes_for_page(&self, page: &str) -> Vec<&Note> {
        self.notes
            .iter()
            .filter(|note| note.page.as_deref().map_or(true, |p| p == page))
            .collect()
    }

    // === Durable collections restored from a backup ===

    pub(crate) fn restore_durable(
        &mut self,
        trash: Vec<TrashItem>,
        notes: Vec<Note>,
        element_history: BTreeMap<String, Vec<Change>>,
        offline_queue: Vec<OfflineQueueItem>,
    ) {
        self.observe(
            &[
                StateKey::Trash,
                StateKey::Notes,
                StateKey::ElementHistory,
                StateKey::OfflineQueue,
            ],
            |s| {
                s.trash = trash;
                s.notes = notes;
                s.element_history = element_history;
                s.offline_queue = offline_queue;
            },
        );
    }

    // === Status ===

    pub fn save_status(&self) -> SaveStatus {
        self.save_status
    }

    pub fn set_save_status(&mut self, status: SaveStatus) {
        self.observe(&[StateKey::SaveStatus], |s| s.save_status = status);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_last_error(&mut self, error: Option<String>) {
        self.observe(&[StateKey::LastError], |s| s.last_error = error);
    }

    pub fn last_warning(&self) -> Option<&str> {
        self.last_warning.as_deref()
    }

    pub fn set_last_warning(&mut self, warning: Option<String>) {
        self.observe(&[StateKey::LastWarning], |s| s.last_warning = warning);
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    fn text(idx: &str, new_val: &str) -> Change {
        Change::text(idx, "orig", new_val, "index.html")
    }

    fn edit(store: &mut ChangeStore, change: Change) {
        store.add_pending_change(change.clone());
        store.add_to_undo_stack(change);
    }

    #[test]
    fn test_clear_moves_every_change_once() {
        let mut store = ChangeStore::default();
        let changes: Vec<Change> = (0..5).map(|i| text(&i.to_string(), "x")).collect();
        for change in &changes {
            store.add_pending_change(change.clone());
        }
        assert!(store.has_unsaved_changes());

        store.clear_pending_changes();

        assert!(store.pending_changes().is_empty());
        assert!(!store.has_unsaved_changes());
        for change in &changes {
            let count = store
                .applied_changes()
                .iter()
                .filter(|c| c.id == change.id)
                .count();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn test_commit_flushed_keeps_late_edits() {
        let mut store = ChangeStore::default();
        let a = text("a", "1");
        let b = text("b", "2");
        store.add_pending_change(a.clone());
        let flushed = vec![a.id];
        store.add_pending_change(b.clone());

        store.commit_flushed(&flushed);

        assert_eq!(store.pending_changes(), &[b]);
        assert_eq!(store.applied_changes(), &[a]);
        assert!(store.has_unsaved_changes());
    }

    #[test]
    fn test_undo_redo_round_trip_for_pending_edit() {
        let mut store = ChangeStore::default();
        edit(&mut store, text("a", "1"));
        edit(&mut store, text("b", "2"));
        edit(&mut store, text("c", "3"));
        let before = store.pending_changes().to_vec();

        let undone = store.undo().unwrap();
        assert_eq!(undone.idx, "c");
        assert_eq!(store.pending_changes().len(), 2);
        assert!(store.pending_changes().iter().all(|c| c.id != undone.id));

        store.redo().unwrap();
        assert_eq!(store.pending_changes(), before.as_slice());
    }

    #[test]
    fn test_undo_of_saved_edit_queues_inverse() {
        let mut store = ChangeStore::default();
        let change = text("a", "new");
        edit(&mut store, change.clone());
        store.clear_pending_changes();

        store.undo().unwrap();
        let pending = store.pending_changes();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].orig, "new");
        assert_eq!(pending[0].new.as_str(), "orig");
        assert!(store.has_unsaved_changes());

        store.redo().unwrap();
        assert!(store.pending_changes().is_empty());
        assert!(!store.has_unsaved_changes());
    }

    #[test]
    fn test_undo_on_empty_stack() {
        let mut store = ChangeStore::default();
        assert!(matches!(store.undo(), Err(EditorError::NothingToUndo)));
        assert!(matches!(store.redo(), Err(EditorError::NothingToRedo)));
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let mut store = ChangeStore::default();
        edit(&mut store, text("a", "1"));
        store.undo().unwrap();
        assert!(store.can_redo());

        edit(&mut store, text("b", "2"));
        assert!(!store.can_redo());
    }

    #[test]
    fn test_element_history_is_independent_of_undo() {
        let mut store = ChangeStore::default();
        let first = text("p1", "one");
        let second = text("p1", "two");
        store.add_to_element_history("p1", first.clone());
        store.add_to_element_history("p1", second.clone());
        edit(&mut store, second.clone());
        store.undo().unwrap();

        assert_eq!(store.element_history("p1").len(), 2);
        assert_eq!(store.recent_element_history("p1", 1)[0].id, second.id);
        assert_eq!(
            store.element_history_entry("p1", first.id).map(|c| c.orig.as_str()),
            Some("orig")
        );
        assert!(store.element_history("missing").is_empty());
    }

    #[test]
    fn test_offline_edits_coalesce_per_page() {
        let mut store = ChangeStore::default();
        for i in 0..3 {
            store.enqueue_offline(text(&i.to_string(), "x")).unwrap();
        }
        store
            .enqueue_offline(Change::text("9", "a", "b", "about.html"))
            .unwrap();

        assert_eq!(store.offline_queue().len(), 2);
        assert_eq!(store.offline_queue()[0].changes.len(), 3);
        assert_eq!(store.offline_queue()[1].page, "about.html");
    }

    #[test]
    fn test_undo_while_offline_updates_queue() {
        let mut store = ChangeStore::default();
        store.set_offline(true);
        let first = text("a", "1");
        let second = text("b", "2");
        for change in [&first, &second] {
            edit(&mut store, change.clone());
            store.enqueue_offline(change.clone()).unwrap();
        }

        store.undo().unwrap();
        assert_eq!(store.offline_queue()[0].changes, vec![first.clone()]);

        store.undo().unwrap();
        assert!(store.offline_queue().is_empty());
        assert!(store.queued_change_ids().is_empty());

        store.redo().unwrap();
        store.redo().unwrap();
        assert_eq!(store.offline_queue().len(), 1);
        assert_eq!(store.offline_queue()[0].changes, vec![first, second]);
        assert_eq!(store.pending_changes().len(), 2);
    }

    #[test]
    fn test_offline_undo_of_saved_edit_queues_inverse() {
        let mut store = ChangeStore::default();
        edit(&mut store, text("a", "new"));
        store.clear_pending_changes();
        store.set_offline(true);

        store.undo().unwrap();
        let inverse_id = store.pending_changes()[0].id;
        assert!(store.queued_change_ids().contains(&inverse_id));

        store.redo().unwrap();
        assert!(store.offline_queue().is_empty());
    }

    #[test]
    fn test_offline_queue_is_bounded() {
        let mut store = ChangeStore::new(StoreLimits {
            offline_queue: 1,
            ..StoreLimits::default()
        });
        store.enqueue_offline(text("1", "x")).unwrap();
        let err = store
            .enqueue_offline(Change::text("2", "a", "b", "about.html"))
            .unwrap_err();
        assert!(matches!(err, EditorError::OfflineQueueFull { limit: 1 }));
    }

    #[test]
    fn test_trash_keeps_most_recent() {
        let mut store = ChangeStore::new(StoreLimits {
            trash: 2,
            ..StoreLimits::default()
        });
        let items: Vec<TrashItem> = (0..3)
            .map(|i| TrashItem::new("index.html", i.to_string(), "<p></p>"))
            .collect();
        for item in &items {
            store.add_to_trash(item.clone());
        }
        assert_eq!(store.trash().len(), 2);
        assert_eq!(store.trash()[0].id, items[1].id);

        let restored = store.restore_from_trash(items[2].id).unwrap();
        assert_eq!(restored.idx, "2");
        assert_eq!(store.trash().len(), 1);
        assert!(store.restore_from_trash(items[0].id).is_none());
    }

    #[test]
    fn test_notes_lifecycle() {
        let mut store = ChangeStore::default();
        let id = store.add_note(Note::new(Some("index.html".into()), 10, 20, "check"));
        store.add_note(Note::new(None, 0, 0, "global"));
        store.add_note(Note::new(Some("about.html".into()), 0, 0, "other"));

        assert!(store.update_note_text(id, "checked"));
        assert!(store.move_note(id, 30, 40));
        assert!(store.toggle_note_minimized(id));
        assert_eq!(store.notes_for_page("index.html").len(), 2);

        let note = &store.notes()[0];
        assert_eq!((note.text.as_str(), note.x, note.y, note.minimized), ("checked", 30, 40, true));

        assert!(store.remove_note(id));
        assert!(!store.remove_note(id));
    }

    #[test]
    fn test_listeners_receive_new_and_old_values() {
        let mut store = ChangeStore::default();
        let seen: Arc<StdMutex<Vec<(StateKey, Value, Value)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let id = store.subscribe(move |key, new, old| {
            sink.lock().unwrap().push((key, new.clone(), old.clone()));
        });

        store.add_pending_change(text("a", "1"));

        let events = seen.lock().unwrap().clone();
        let keys: Vec<StateKey> = events.iter().map(|(k, _, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                StateKey::PendingChanges,
                StateKey::HasUnsavedChanges,
                StateKey::SaveStatus
            ]
        );
        assert_eq!(events[1].1, Value::Bool(true));
        assert_eq!(events[1].2, Value::Bool(false));

        assert!(store.unsubscribe(id));
        store.set_offline(true);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_unchanged_values_do_not_notify() {
        let mut store = ChangeStore::default();
        let count = Arc::new(StdMutex::new(0));
        let sink = Arc::clone(&count);
        store.subscribe(move |_, _, _| *sink.lock().unwrap() += 1);

        store.set_offline(false);
        store.set_save_status(SaveStatus::Idle);
        assert_eq!(*count.lock().unwrap(), 0);
    }
}
