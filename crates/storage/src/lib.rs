//! Append-only event storage for ChatSnapshot.
//!
//! The [`EventStore`] trait is the single persistence contract of the event
//! log. Four interchangeable backends implement it:
//!
//! | Backend | Type | Durability |
//! |---------|------|------------|
//! | volatile | [`MemoryEventStore`] | none, lost on exit |
//! | log file | [`JsonlEventStore`] | one JSON object per line in `events.jsonl` |
//! | relational | `SqliteEventStore` (feature `sqlite`) | SQLite table with secondary indexes |
//! | document | `MongoEventStore` (feature `mongodb`) | MongoDB collection |
//!
//! Beside it sits the unrelated [`SnapshotStore`] contract: a plain
//! key-by-id save/load/list/delete store for snapshot records, with overwrite
//! and delete, and no append-only guarantee. Its backends are
//! [`MemorySnapshotStore`], [`JsonSnapshotStore`], `SqliteSnapshotStore` and
//! `MongoSnapshotStore`.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory_store;
pub mod jsonl_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
#[cfg(feature = "mongodb")]
pub mod mongodb_store;
pub mod snapshot_store;
pub mod config;

pub use trait_::{EventStore, StorageError, Result};
pub use memory_store::MemoryEventStore;
pub use jsonl_store::JsonlEventStore;
#[cfg(feature = "sqlite")]
pub use sqlite_store::{SqliteEventStore, SqliteSnapshotStore};
#[cfg(feature = "mongodb")]
pub use mongodb_store::{MongoEventStore, MongoSnapshotStore};
pub use snapshot_store::{JsonSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use config::{open_event_store, open_snapshot_store, StoreConfig};
