//! State Management Module
//!
//! Provides the change model, the observable change store, undo/redo,
//! local storage, backup/recovery and token storage.

pub mod backup;
pub mod change;
pub mod storage;
pub mod store;
pub mod token;
pub mod undo;

pub use backup::{BackupSnapshot, Confirm, LocalBackup, RestoreOutcome};
pub use change::{Change, ChangeKind, NewValue, Note, OfflineQueueItem, TrashItem};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use store::{lock, ChangeStore, SaveStatus, SharedStore, StateKey, StoreLimits, SubscriptionId};
pub use token::TokenStore;
pub use undo::UndoHistory;
