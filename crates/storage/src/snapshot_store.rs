//! Key-by-id snapshot storage.
//!
//! Snapshots are derived records. Unlike the event log they are overwritten on
//! save and can be deleted, so this contract is kept apart from
//! [`EventStore`](crate::EventStore).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatsnapshot_core::{ChatSnapshot, SnapshotSummary};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::trait_::{Result, StorageError};

/// Save/load/list/delete storage for [`ChatSnapshot`] records.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot under its `chat_id`, replacing any previous one.
    async fn save(&self, snapshot: &ChatSnapshot) -> Result<()>;

    /// Load a snapshot by chat id.
    async fn load(&self, chat_id: &str) -> Result<Option<ChatSnapshot>>;

    /// Summaries of every stored snapshot, newest first.
    async fn list(&self) -> Result<Vec<SnapshotSummary>>;

    /// Remove a snapshot. Returns whether one existed.
    async fn delete(&self, chat_id: &str) -> Result<bool>;
}

/// Sort summaries by timestamp descending.
pub(crate) fn newest_first(mut summaries: Vec<SnapshotSummary>) -> Vec<SnapshotSummary> {
    summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    summaries
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, ChatSnapshot>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &ChatSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.chat_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, chat_id: &str) -> Result<Option<ChatSnapshot>> {
        Ok(self.snapshots.read().await.get(chat_id).cloned())
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let snapshots = self.snapshots.read().await;
        Ok(newest_first(snapshots.values().map(ChatSnapshot::summary).collect()))
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        Ok(self.snapshots.write().await.remove(chat_id).is_some())
    }
}

/// Snapshot store keeping one pretty-printed `<chat_id>.json` per snapshot.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    root: PathBuf,
}

impl JsonSnapshotStore {
    /// Create the store, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn snapshot_path(&self, chat_id: &str) -> Result<PathBuf> {
        validate_key(chat_id)?;
        Ok(self.root.join(format!("{}.json", chat_id)))
    }
}

/// Chat ids become file names, so anything that could escape the directory
/// is refused.
fn validate_key(chat_id: &str) -> Result<()> {
    let escapes = chat_id.is_empty()
        || chat_id == "."
        || chat_id.contains("..")
        || chat_id.contains(['/', '\\', '\0']);
    if escapes {
        return Err(StorageError::InvalidKey(chat_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn save(&self, snapshot: &ChatSnapshot) -> Result<()> {
        let path = self.snapshot_path(&snapshot.chat_id)?;
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&path, json.as_bytes()).await?;
        debug!(chat_id = %snapshot.chat_id, path = %path.display(), "snapshot saved");
        Ok(())
    }

    async fn load(&self, chat_id: &str) -> Result<Option<ChatSnapshot>> {
        read_json(&self.snapshot_path(chat_id)?).await
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let snapshots: Vec<ChatSnapshot> = list_dir(&self.root).await?;
        Ok(newest_first(snapshots.iter().map(ChatSnapshot::summary).collect()))
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        match fs::remove_file(self.snapshot_path(chat_id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
        }
    }
    Ok(items)
}

/// Behaviour shared by every snapshot backend.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use chatsnapshot_core::{ChatType, Payload};
    use chrono::TimeZone;
    use serde_json::json;

    fn snapshot(chat_id: &str, hour: u32) -> ChatSnapshot {
        let at = chrono::Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap();
        let mut snapshot = ChatSnapshot::new(chat_id, ChatType::Group, at);
        let mut message = Payload::new();
        message.insert("content".to_string(), json!("hi"));
        snapshot.messages.push(message);
        snapshot
    }

    pub(crate) async fn check_save_load_delete(store: &dyn SnapshotStore) {
        assert!(store.load("chat-1").await.unwrap().is_none());

        let mut first = snapshot("chat-1", 9);
        store.save(&first).await.unwrap();
        assert_eq!(store.load("chat-1").await.unwrap(), Some(first.clone()));

        first.is_terminated = true;
        first.termination_reason = Some("done".to_string());
        store.save(&first).await.unwrap();
        assert_eq!(store.load("chat-1").await.unwrap(), Some(first));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete("chat-1").await.unwrap());
        assert!(!store.delete("chat-1").await.unwrap());
        assert!(store.load("chat-1").await.unwrap().is_none());
    }

    pub(crate) async fn check_list_newest_first(store: &dyn SnapshotStore) {
        store.save(&snapshot("old", 8)).await.unwrap();
        store.save(&snapshot("new", 11)).await.unwrap();
        store.save(&snapshot("mid", 10)).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.chat_id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }
}
