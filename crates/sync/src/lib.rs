//! `smartmaint-sync`
//!
//! **Responsibility:** local-first data synchronisation for the custody app.
//!
//! This crate provides:
//! - [`LocalCache`]: durable, synchronous whole-collection snapshots (SQLite)
//! - [`PendingWrites`]: ordered outbox of remote writes, replayed on reconnect
//! - [`RemoteStore`]: contract of the networked document store
//! - [`SyncCoordinator`]: connectivity decision, seeding, subscriptions and
//!   dual-write fan-out
//! - [`CheckoutSession`]: cart handling gated by the Smart Lock
//!
//! Local edits never wait on the network; the remote store converges
//! last-writer-wins.

pub mod cache;
pub mod checkout;
pub mod coordinator;
pub mod memory_remote;
pub mod outbox;
pub mod remote;
pub mod session;
pub mod settings;
pub mod types;

pub use cache::{CacheError, LocalCache};
pub use checkout::{CheckoutError, CheckoutOutcome, CheckoutSession};
pub use coordinator::{SyncCoordinator, SyncError};
pub use memory_remote::InMemoryRemoteStore;
pub use outbox::PendingWrites;
pub use remote::{CollectionCallback, DocumentCallback, RemoteError, RemoteStore, RemoteSubscription, WriteOp};
pub use session::{SessionError, SessionState};
pub use settings::{SettingsError, SyncSettings};
pub use types::{DrainReport, PendingStatus, PendingWrite, Snapshot, SyncMode};
