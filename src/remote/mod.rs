//! Remote persistence
//!
//! The backing API (GitHub or in-memory), the rate limiter in front of it,
//! and the optimistic-concurrency client the rest of the editor talks to.

pub mod backend;
pub mod client;
pub mod github;
pub mod mock;
pub mod rate_limiter;

pub use backend::{CommitInfo, ContentBackend, RemoteFile, WriteReceipt, WriteRequest};
pub use client::{decode_data_url, PersistenceClient};
pub use github::GitHubBackend;
pub use mock::{Failure, MockBackend, RecordedWrite};
pub use rate_limiter::RateLimiter;
