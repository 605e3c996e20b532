//! Persisted key-value store with pub/sub change notification.
//!
//! This crate is the single shared mutable resource of the Centime client:
//! every component reads through [`Store::get`] or a subscription and writes
//! through [`Store::set`] / [`Store::merge`] / [`Store::remove`]. Nothing
//! else is allowed to share state between components.
//!
//! - **[`Store`]** — JSON values over a durable substrate, with synchronous
//!   ordered subscriber notification, merge semantics per [`MergeStrategy`],
//!   and a capacity-eviction policy (largest never-accessed key first, then
//!   least-recently-accessed key without subscribers).
//!
//! - **[`StorageBackend`]** — the substrate trait (an async key → string
//!   map). On device this is the platform storage bridge; [`MemoryBackend`]
//!   is the in-process implementation.
//!
//! - **[`Mapping`] / [`Connection`]** — the subscription contract: UI code
//!   calls [`Store::connect`] with a singular key or a collection prefix and
//!   gets back an opaque handle to `disconnect()` on teardown.

pub mod backend;
pub mod keys;
mod store;
mod subscriber;

pub use backend::{BackendError, MemoryBackend, StorageBackend};
pub use store::{MergeStrategy, Store, StoreError, StoreUpdate, UpdateMethod};
pub use subscriber::{Connection, ConnectionId, Mapping};
