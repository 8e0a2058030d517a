//! Atelier - visual site editing core
//!
//! Keeps local editing state consistent with a remote, versioned,
//! rate-limited and intermittently reachable content store.
//!
//! # Architecture
//!
//! Components, leaves first:
//! - `remote`: rate limiter, content backends and the optimistic-concurrency
//!   persistence client
//! - `state`: change records, the observable change store with undo/redo and
//!   element history, local storage, backup and token storage
//! - `sync`: autosave with offline queueing, and version history
//! - `session`: wires one editing session together

pub mod cli;
pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod state;
pub mod sync;

pub use config::EditorConfig;
pub use error::{EditorError, Result};
pub use session::EditorSession;
