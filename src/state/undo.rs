//! Undo/Redo stacks
//!
//! Two linear stacks of [`Change`] records. Pushing a new edit clears the
//! redo stack, so history never branches. Each redo entry remembers how the
//! undo touched the pending list, which lets redo put it back exactly.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::change::Change;

/// Default maximum number of undo levels to keep.
pub const DEFAULT_MAX_UNDO_LEVELS: usize = 50;

/// How an undo changed the pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum PendingRestore {
    /// The change was still pending and was removed from `position`.
    /// `queued` records that it was also taken out of the offline queue.
    Reinsert {
        position: usize,
        #[serde(default)]
        queued: bool,
    },

    /// The change had already been saved; an inverse change with this id was
    /// appended to the pending list so the revert gets persisted.
    DropInverse { inverse_id: Uuid },
}

/// An undone change waiting on the redo stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedoEntry {
    pub change: Change,
    pub restore: PendingRestore,
}

/// Undo/redo stacks for one editing session.
#[derive(Debug, Clone)]
pub struct UndoHistory {
    /// Edits that can be undone, most recent last.
    undo_stack: Vec<Change>,

    /// Undone edits that can be redone, most recently undone last.
    redo_stack: Vec<RedoEntry>,

    /// Maximum number of undo levels to keep.
    max_undo_levels: usize,

    /// IDs of the most recent changes that fell off the undo stack, at most
    /// `max_undo_levels` of them.
    discarded_ids: VecDeque<Uuid>,
}

impl Default for UndoHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UNDO_LEVELS)
    }
}

impl UndoHistory {
    pub fn new(max_levels: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_undo_levels: max_levels.max(1),
            discarded_ids: VecDeque::new(),
        }
    }

    /// Push a new edit. Clears the redo stack and trims to the level limit.
    pub fn push(&mut self, change: Change) {
        self.redo_stack.clear();
        self.undo_stack.push(change);
        self.trim_history();
    }

    /// Pop the most recent edit for undoing.
    pub fn pop_undo(&mut self) -> Option<Change> {
        self.undo_stack.pop()
    }

    /// Record an undone edit.
    pub fn push_redo(&mut self, entry: RedoEntry) {
        self.redo_stack.push(entry);
    }

    /// Pop the most recently undone edit for redoing.
    pub fn pop_redo(&mut self) -> Option<RedoEntry> {
        self.redo_stack.pop()
    }

    /// Put a redone edit back on the undo stack without touching redo.
    pub fn push_redone(&mut self, change: Change) {
        self.undo_stack.push(change);
        self.trim_history();
    }

    pub fn undo_stack(&self) -> &[Change] {
        &self.undo_stack
    }

    pub fn redo_stack(&self) -> &[RedoEntry] {
        &self.redo_stack
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn peek_undo(&self) -> Option<&Change> {
        self.undo_stack.last()
    }

    pub fn peek_redo(&self) -> Option<&Change> {
        self.redo_stack.last().map(|entry| &entry.change)
    }

    pub fn max_undo_levels(&self) -> usize {
        self.max_undo_levels
    }

    /// IDs of recently dropped edits, oldest first.
    pub fn discarded_ids(&self) -> Vec<Uuid> {
        self.discarded_ids.iter().copied().collect()
    }

    /// Drop both stacks.
    pub fn clear(&mut self) {
        let dropped: Vec<Uuid> = self
            .undo_stack
            .drain(..)
            .map(|change| change.id)
            .chain(self.redo_stack.drain(..).map(|entry| entry.change.id))
            .collect();
        self.record_discarded(dropped);
    }

    fn trim_history(&mut self) {
        if self.undo_stack.len() > self.max_undo_levels {
            let excess = self.undo_stack.len() - self.max_undo_levels;
            let dropped: Vec<Uuid> = self
                .undo_stack
                .drain(..excess)
                .map(|change| change.id)
                .collect();
            self.record_discarded(dropped);
        }
    }

    fn record_discarded(&mut self, ids: Vec<Uuid>) {
        self.discarded_ids.extend(ids);
        while self.discarded_ids.len() > self.max_undo_levels {
            self.discarded_ids.pop_front();
        }
    }
}
