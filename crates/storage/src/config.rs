//! Backend selection.
//!
//! ```json
//! { "backend": "jsonl", "dir": "./chat-events" }
//! { "backend": "sqlite", "path": "./events.db" }
//! { "backend": "mongodb", "uri": "mongodb://localhost:27017" }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::jsonl_store::JsonlEventStore;
use super::memory_store::MemoryEventStore;
use super::snapshot_store::{JsonSnapshotStore, MemorySnapshotStore, SnapshotStore};
use super::trait_::{EventStore, Result, StorageError};

/// Default MongoDB database name.
pub const DEFAULT_DATABASE: &str = "chatsnapshot";

/// Default MongoDB collection name.
pub const DEFAULT_COLLECTION: &str = "events";

/// Default MongoDB collection for snapshots.
pub const DEFAULT_SNAPSHOT_COLLECTION: &str = "chat_snapshots";

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn default_snapshot_collection() -> String {
    DEFAULT_SNAPSHOT_COLLECTION.to_string()
}

/// Which store to open, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Volatile, in-process.
    Memory,

    /// JSON Lines file in a directory.
    Jsonl {
        /// Directory holding `events.jsonl`
        dir: PathBuf,
    },

    /// SQLite database file.
    Sqlite {
        /// Database file
        path: PathBuf,
    },

    /// MongoDB collection.
    Mongodb {
        /// Connection string
        uri: String,
        /// Database name
        #[serde(default = "default_database")]
        database: String,
        /// Collection name
        #[serde(default = "default_collection")]
        collection: String,
        /// Collection for snapshots
        #[serde(default = "default_snapshot_collection")]
        snapshot_collection: String,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

impl StoreConfig {
    /// Read a config from a JSON file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Backend name as it appears in the `backend` tag.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Jsonl { .. } => "jsonl",
            Self::Sqlite { .. } => "sqlite",
            Self::Mongodb { .. } => "mongodb",
        }
    }
}

/// Build the event store a config names. The store still needs `initialize`.
pub fn open_event_store(config: &StoreConfig) -> Result<Arc<dyn EventStore>> {
    let store: Arc<dyn EventStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryEventStore::new()),
        StoreConfig::Jsonl { dir } => Arc::new(JsonlEventStore::new(dir)),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite { path } => Arc::new(super::sqlite_store::SqliteEventStore::new(path)),
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite { .. } => {
            return Err(StorageError::Unsupported(
                "sqlite (built without the `sqlite` feature)".to_string(),
            ))
        }
        #[cfg(feature = "mongodb")]
        StoreConfig::Mongodb {
            uri,
            database,
            collection,
            ..
        } => Arc::new(super::mongodb_store::MongoEventStore::new(
            uri.as_str(),
            database.as_str(),
            collection.as_str(),
        )),
        #[cfg(not(feature = "mongodb"))]
        StoreConfig::Mongodb { .. } => {
            return Err(StorageError::Unsupported(
                "mongodb (built without the `mongodb` feature)".to_string(),
            ))
        }
    };
    Ok(store)
}

/// Open the snapshot store that sits next to a config's event store.
///
/// The log-file backend keeps snapshots in `<dir>/snapshots`, the relational
/// backend uses the same database file and the document backend a second
/// collection in the same database.
pub async fn open_snapshot_store(config: &StoreConfig) -> Result<Arc<dyn SnapshotStore>> {
    let store: Arc<dyn SnapshotStore> = match config {
        StoreConfig::Memory => Arc::new(MemorySnapshotStore::new()),
        StoreConfig::Jsonl { dir } => Arc::new(JsonSnapshotStore::new(dir.join("snapshots")).await?),
        #[cfg(feature = "sqlite")]
        StoreConfig::Sqlite { path } => {
            Arc::new(super::sqlite_store::SqliteSnapshotStore::new(path).await?)
        }
        #[cfg(not(feature = "sqlite"))]
        StoreConfig::Sqlite { .. } => {
            return Err(StorageError::Unsupported(
                "sqlite (built without the `sqlite` feature)".to_string(),
            ))
        }
        #[cfg(feature = "mongodb")]
        StoreConfig::Mongodb {
            uri,
            database,
            snapshot_collection,
            ..
        } => Arc::new(
            super::mongodb_store::MongoSnapshotStore::new(uri, database, snapshot_collection)
                .await?,
        ),
        #[cfg(not(feature = "mongodb"))]
        StoreConfig::Mongodb { .. } => {
            return Err(StorageError::Unsupported(
                "mongodb (built without the `mongodb` feature)".to_string(),
            ))
        }
    };
    Ok(store)
}
