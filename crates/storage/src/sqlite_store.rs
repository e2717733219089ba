//! SQLite storage backends.
//!
//! [`SqliteEventStore`] keeps the append-only event log in an `events` table
//! with secondary indexes on correlation id, event type, and timestamp. An
//! `AUTOINCREMENT` sequence column records append order and breaks timestamp
//! ties.
//!
//! [`SqliteSnapshotStore`] is the key-by-id snapshot table. Rows are replaced
//! on save and can be deleted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chatsnapshot_core::{
    timestamp, ChatSnapshot, EventEnvelope, EventId, EventSource, EventType, Payload,
    SnapshotSummary, Time,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::debug;

use super::snapshot_store::{newest_first, SnapshotStore};
use super::trait_::{EventStore, Lifecycle, Result, StorageError};

const EVENT_COLUMNS: &str =
    "seq, event_id, event_type, timestamp, correlation_id, causation_id, source, payload";

/// Where the database lives.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    async fn connect(&self) -> Result<SqlitePool> {
        let options = match self {
            Self::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
            Self::Memory => SqliteConnectOptions::new(),
        };

        // An in-memory database exists per connection, so it must be pinned
        // to exactly one that never gets recycled.
        let pool = match self {
            Self::File(_) => SqlitePoolOptions::new().max_connections(4),
            Self::Memory => SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>),
        };

        Ok(pool.connect_with(options).await?)
    }
}

/// SQLite event store.
#[derive(Debug)]
pub struct SqliteEventStore {
    location: Location,
    state: RwLock<Lifecycle<SqlitePool>>,
}

impl SqliteEventStore {
    /// Create a store backed by the database file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_location(Location::File(path.as_ref().to_path_buf()))
    }

    /// Create a store backed by a private in-memory database.
    pub fn in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Self {
        Self {
            location,
            state: RwLock::new(Lifecycle::Pending),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        Ok(self.state.read().await.get()?.clone())
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                event_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                causation_id TEXT,
                source TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)",
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        ] {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }

    /// Run a `SELECT` over the events table with an optional `WHERE` clause
    /// taking a single text parameter.
    async fn select(&self, clause: Option<(&str, String)>) -> Result<Vec<EventEnvelope>> {
        let pool = self.pool().await?;
        let rows = match clause {
            Some((condition, value)) => {
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE {condition} ORDER BY timestamp ASC, seq ASC"
                );
                sqlx::query(&sql).bind(value).fetch_all(&pool).await?
            }
            None => {
                let sql = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY timestamp ASC, seq ASC");
                sqlx::query(&sql).fetch_all(&pool).await?
            }
        };

        rows.iter().map(decode_event).collect()
    }
}

fn corrupted(seq: i64, reason: impl ToString) -> StorageError {
    StorageError::Corrupted {
        location: format!("events row {seq}"),
        reason: reason.to_string(),
    }
}

fn decode_event(row: &SqliteRow) -> Result<EventEnvelope> {
    let seq: i64 = row.try_get("seq")?;

    let event_type = row
        .try_get::<String, _>("event_type")?
        .parse::<EventType>()
        .map_err(|e| corrupted(seq, e))?;
    let timestamp = timestamp::parse(&row.try_get::<String, _>("timestamp")?)
        .map_err(|e| corrupted(seq, e))?;
    let source: EventSource = serde_json::from_str(&row.try_get::<String, _>("source")?)
        .map_err(|e| corrupted(seq, e))?;
    let payload: Payload = serde_json::from_str(&row.try_get::<String, _>("payload")?)
        .map_err(|e| corrupted(seq, e))?;
    let causation_id: Option<String> = row.try_get("causation_id")?;

    Ok(EventEnvelope {
        event_id: EventId::from(row.try_get::<String, _>("event_id")?),
        event_type,
        timestamp,
        source,
        correlation_id: row.try_get("correlation_id")?,
        payload,
        causation_id: causation_id.map(EventId::from),
    })
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.needs_open()? {
            return Ok(());
        }

        let pool = self.location.connect().await?;
        Self::init_schema(&pool).await?;
        debug!(location = ?self.location, "opened sqlite event store");

        *state = Lifecycle::Open(pool);
        Ok(())
    }

    async fn append(&self, event: &EventEnvelope) -> Result<()> {
        let pool = self.pool().await?;
        let source = serde_json::to_string(&event.source)?;
        let payload = serde_json::to_string(&event.payload)?;

        let inserted = sqlx::query(
            "INSERT INTO events (event_id, event_type, timestamp, correlation_id, causation_id, source, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event_id.as_str())
        .bind(event.event_type.as_str())
        .bind(timestamp::format(&event.timestamp))
        .bind(&event.correlation_id)
        .bind(event.causation_id.as_ref().map(EventId::as_str))
        .bind(source)
        .bind(payload)
        .execute(&pool)
        .await;

        match inserted {
            Ok(_) => {
                debug!(event_id = %event.event_id, event_type = %event.event_type, "event appended to sqlite");
                Ok(())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::DuplicateEventId(event.event_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>> {
        self.select(Some(("correlation_id = ?", correlation_id.to_string())))
            .await
    }

    async fn query_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>> {
        self.select(Some(("event_type = ?", event_type.as_str().to_string())))
            .await
    }

    async fn query_since(&self, since: Time) -> Result<Vec<EventEnvelope>> {
        self.select(Some(("timestamp >= ?", timestamp::format(&since))))
            .await
    }

    async fn get_all(&self) -> Result<Vec<EventEnvelope>> {
        self.select(None).await
    }

    async fn count(&self) -> Result<usize> {
        let pool = self.pool().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        let pool = self.state.write().await.close();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }
}

/// SQLite snapshot store.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Location::File(path.as_ref().to_path_buf())).await
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::open(Location::Memory).await
    }

    async fn open(location: Location) -> Result<Self> {
        let store = Self {
            pool: location.connect().await?,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_snapshots (
                chat_id TEXT PRIMARY KEY,
                chat_type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON chat_snapshots(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_type ON chat_snapshots(chat_type)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn decode(chat_id: &str, data: &str) -> Result<ChatSnapshot> {
        serde_json::from_str(data).map_err(|e| StorageError::Corrupted {
            location: format!("chat_snapshots row {chat_id}"),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &ChatSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;

        sqlx::query(
            "INSERT OR REPLACE INTO chat_snapshots (chat_id, chat_type, timestamp, data)
            VALUES (?, ?, ?, ?)",
        )
        .bind(&snapshot.chat_id)
        .bind(snapshot.chat_type.as_str())
        .bind(timestamp::format(&snapshot.timestamp))
        .bind(data)
        .execute(&self.pool)
        .await?;

        debug!(chat_id = %snapshot.chat_id, "snapshot saved to sqlite");
        Ok(())
    }

    async fn load(&self, chat_id: &str) -> Result<Option<ChatSnapshot>> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM chat_snapshots WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await?;

        data.map(|data| Self::decode(chat_id, &data)).transpose()
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let rows = sqlx::query("SELECT chat_id, data FROM chat_snapshots")
            .fetch_all(&self.pool)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            let chat_id: String = row.try_get("chat_id")?;
            let data: String = row.try_get("data")?;
            summaries.push(Self::decode(&chat_id, &data)?.summary());
        }
        Ok(newest_first(summaries))
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_snapshots WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
