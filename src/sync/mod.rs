//! Synchronization with the remote store
//!
//! Autosave and offline draining, the document source a flush reads from,
//! and the version history view.

pub mod autosave;
pub mod document;
pub mod versions;

pub use autosave::{
    commit_message, AutosaveHandle, AutosaveScheduler, DrainBackoff, DrainOutcome, SaveKind,
    SaveOutcome,
};
pub use document::{DocumentSource, FileDocument, SharedDocument};
pub use versions::{restore_message, RestoredVersion, SelectedVersion, VersionHistory};
