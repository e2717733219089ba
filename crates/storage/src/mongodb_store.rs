//! MongoDB event and snapshot stores.
//!
//! Events: one document per event in a collection with a unique index on `event_id`
//! and secondary indexes on `correlation_id`, `event_type`, and `timestamp`.
//! Each document also carries a `seq` drawn from a counter document in
//! `<collection>_seq`, which breaks timestamp ties in append order. The
//! driver's `_id` and the `seq` field are stripped before documents are turned
//! back into envelopes.
//!
//! Snapshots: one document per chat keyed by `_id = chat_id`, replaced
//! wholesale on save.

use async_trait::async_trait;
use chatsnapshot_core::{timestamp, ChatSnapshot, EventEnvelope, EventType, SnapshotSummary, Time};
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot_store::{newest_first, SnapshotStore};
use super::trait_::{EventStore, Lifecycle, Result, StorageError};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone)]
struct Handles {
    client: Client,
    events: Collection<Document>,
    counters: Collection<Document>,
}

/// MongoDB event store.
#[derive(Debug)]
pub struct MongoEventStore {
    uri: String,
    database: String,
    collection: String,
    state: RwLock<Lifecycle<Handles>>,
}

impl MongoEventStore {
    /// Create a store for `database.collection` on the server at `uri`. The
    /// connection is made by `initialize`.
    pub fn new(
        uri: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            collection: collection.into(),
            state: RwLock::new(Lifecycle::Pending),
        }
    }

    async fn handles(&self) -> Result<Handles> {
        Ok(self.state.read().await.get()?.clone())
    }

    async fn next_seq(&self, handles: &Handles) -> Result<i64> {
        let counter = handles
            .counters
            .find_one_and_update(doc! { "_id": self.collection.as_str() }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;

        counter
            .and_then(|c| c.get_i64("seq").ok())
            .ok_or_else(|| StorageError::Corrupted {
                location: format!("{}_seq", self.collection),
                reason: "sequence counter missing".to_string(),
            })
    }

    async fn find(&self, filter: Document) -> Result<Vec<EventEnvelope>> {
        let handles = self.handles().await?;
        let cursor = handles
            .events
            .find(filter)
            .sort(doc! { "timestamp": 1, "seq": 1 })
            .await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        documents.into_iter().map(from_document).collect()
    }
}

fn to_document(event: &EventEnvelope, seq: i64) -> Result<Document> {
    let mut document = bson::to_document(event).map_err(|e| StorageError::Bson(e.to_string()))?;
    document.insert("seq", seq);
    Ok(document)
}

fn from_document(mut document: Document) -> Result<EventEnvelope> {
    let seq = document.get_i64("seq").unwrap_or_default();
    document.remove("_id");
    document.remove("seq");
    bson::from_document(document).map_err(|e| StorageError::Corrupted {
        location: format!("document seq {seq}"),
        reason: e.to_string(),
    })
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl EventStore for MongoEventStore {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.needs_open()? {
            return Ok(());
        }

        let client = Client::with_uri_str(&self.uri).await?;
        let db = client.database(&self.database);
        let events: Collection<Document> = db.collection(&self.collection);
        let counters: Collection<Document> = db.collection(&format!("{}_seq", self.collection));

        events
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "event_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;
        for field in ["correlation_id", "event_type", "timestamp"] {
            let mut keys = Document::new();
            keys.insert(field, 1);
            events
                .create_index(IndexModel::builder().keys(keys).build())
                .await?;
        }
        debug!(database = %self.database, collection = %self.collection, "opened mongodb event store");

        *state = Lifecycle::Open(Handles {
            client,
            events,
            counters,
        });
        Ok(())
    }

    async fn append(&self, event: &EventEnvelope) -> Result<()> {
        let handles = self.handles().await?;
        let seq = self.next_seq(&handles).await?;
        let document = to_document(event, seq)?;

        match handles.events.insert_one(document).await {
            Ok(_) => {
                debug!(event_id = %event.event_id, event_type = %event.event_type, seq, "event appended to mongodb");
                Ok(())
            }
            Err(e) if is_duplicate_key(&e) => {
                Err(StorageError::DuplicateEventId(event.event_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>> {
        self.find(doc! { "correlation_id": correlation_id }).await
    }

    async fn query_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>> {
        self.find(doc! { "event_type": event_type.as_str() }).await
    }

    async fn query_since(&self, since: Time) -> Result<Vec<EventEnvelope>> {
        self.find(doc! { "timestamp": { "$gte": timestamp::format(&since) } })
            .await
    }

    async fn get_all(&self) -> Result<Vec<EventEnvelope>> {
        self.find(doc! {}).await
    }

    async fn count(&self) -> Result<usize> {
        let handles = self.handles().await?;
        let count = handles.events.count_documents(doc! {}).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    async fn close(&self) -> Result<()> {
        let handles = self.state.write().await.close();
        if let Some(handles) = handles {
            handles.client.shutdown().await;
        }
        Ok(())
    }
}

/// MongoDB snapshot store.
#[derive(Debug, Clone)]
pub struct MongoSnapshotStore {
    client: Client,
    snapshots: Collection<Document>,
}

impl MongoSnapshotStore {
    /// Connect to `database.collection` on the server at `uri`.
    pub async fn new(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let snapshots = client.database(database).collection(collection);
        debug!(database, collection, "opened mongodb snapshot store");
        Ok(Self { client, snapshots })
    }

    /// Disconnect from the server.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

fn snapshot_to_document(snapshot: &ChatSnapshot) -> Result<Document> {
    let mut document =
        bson::to_document(snapshot).map_err(|e| StorageError::Bson(e.to_string()))?;
    document.insert("_id", snapshot.chat_id.as_str());
    Ok(document)
}

fn snapshot_from_document(mut document: Document) -> Result<ChatSnapshot> {
    let id = document
        .remove("_id")
        .map(|id| id.to_string())
        .unwrap_or_default();
    bson::from_document(document).map_err(|e| StorageError::Corrupted {
        location: format!("snapshot {id}"),
        reason: e.to_string(),
    })
}

#[async_trait]
impl SnapshotStore for MongoSnapshotStore {
    async fn save(&self, snapshot: &ChatSnapshot) -> Result<()> {
        let document = snapshot_to_document(snapshot)?;
        self.snapshots
            .replace_one(doc! { "_id": snapshot.chat_id.as_str() }, document)
            .upsert(true)
            .await?;
        debug!(chat_id = %snapshot.chat_id, "snapshot saved to mongodb");
        Ok(())
    }

    async fn load(&self, chat_id: &str) -> Result<Option<ChatSnapshot>> {
        self.snapshots
            .find_one(doc! { "_id": chat_id })
            .await?
            .map(snapshot_from_document)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let documents: Vec<Document> = self.snapshots.find(doc! {}).await?.try_collect().await?;
        let summaries = documents
            .into_iter()
            .map(|document| snapshot_from_document(document).map(|s| s.summary()))
            .collect::<Result<Vec<_>>>()?;
        Ok(newest_first(summaries))
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        let result = self.snapshots.delete_one(doc! { "_id": chat_id }).await?;
        Ok(result.deleted_count > 0)
    }
}
