//! JSON Lines event store.
//!
//! Every event is one self-describing JSON object on its own line of
//! `<dir>/events.jsonl`. Appends only ever add bytes to the end of the file.
//! Reads re-parse the whole file and sort it, which is O(n) per query and
//! fine for small and medium logs.
//!
//! A crash in the middle of an append leaves a torn final line. `initialize`
//! repairs it: a tail that still parses gets its missing newline, anything
//! else after the last newline is cut off. `append` checks the same before
//! writing, and a failed write is truncated back to where it started. Reads
//! skip a malformed final line and treat a malformed line anywhere else as
//! corruption.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatsnapshot_core::{EventEnvelope, EventId, EventType, Time};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::trait_::{chronological, EventStore, Lifecycle, Result, StorageError};

/// File name of the log inside the store directory.
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Default)]
struct JsonlLog {
    ids: HashSet<EventId>,
}

/// Append-only JSON Lines event store.
#[derive(Debug)]
pub struct JsonlEventStore {
    root: PathBuf,
    state: Mutex<Lifecycle<JsonlLog>>,
}

impl JsonlEventStore {
    /// Create a store rooted at `root`. Nothing touches the disk until
    /// `initialize`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            state: Mutex::new(Lifecycle::Pending),
        }
    }

    /// Path of the log file.
    pub fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    async fn select(&self, keep: impl Fn(&EventEnvelope) -> bool) -> Result<Vec<EventEnvelope>> {
        let state = self.state.lock().await;
        state.get()?;
        let events = read_log(&self.events_path()).await?;
        Ok(chronological(events.into_iter().filter(|e| keep(e)).collect()))
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.needs_open()? {
            return Ok(());
        }

        fs::create_dir_all(&self.root).await?;
        let path = self.events_path();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        repair_torn_tail(&path).await?;

        let events = read_log(&path).await?;
        let ids = events.into_iter().map(|e| e.event_id).collect::<HashSet<_>>();
        debug!(path = %path.display(), count = ids.len(), "opened event log");

        *state = Lifecycle::Open(JsonlLog { ids });
        Ok(())
    }

    async fn append(&self, event: &EventEnvelope) -> Result<()> {
        let mut state = self.state.lock().await;
        let log = state.get_mut()?;

        let mut line = event.to_json_line()?;
        line.push('\n');

        let path = self.events_path();
        let (start, recovered) = record_boundary(&path).await?;
        log.ids.extend(recovered);
        if log.ids.contains(&event.event_id) {
            return Err(StorageError::DuplicateEventId(event.event_id.clone()));
        }

        let mut file = OpenOptions::new().append(true).open(&path).await?;
        if let Err(e) = write_record(&mut file, line.as_bytes()).await {
            warn!(path = %path.display(), error = %e, "append failed, removing partial record");
            if let Err(undo) = truncate(&file, start).await {
                error!(path = %path.display(), error = %undo, "could not remove partial record");
            }
            return Err(e.into());
        }

        log.ids.insert(event.event_id.clone());
        debug!(event_id = %event.event_id, event_type = %event.event_type, "event appended to log file");
        Ok(())
    }

    async fn query(&self, correlation_id: &str) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.correlation_id == correlation_id).await
    }

    async fn query_by_type(&self, event_type: EventType) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.event_type == event_type).await
    }

    async fn query_since(&self, since: Time) -> Result<Vec<EventEnvelope>> {
        self.select(|e| e.timestamp >= since).await
    }

    async fn get_all(&self) -> Result<Vec<EventEnvelope>> {
        self.select(|_| true).await
    }

    async fn count(&self) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.get()?.ids.len())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.close();
        Ok(())
    }
}

async fn write_record(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn truncate(file: &fs::File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_data().await
}

/// Decode one line of the log.
fn parse_line(line: &[u8]) -> std::result::Result<EventEnvelope, String> {
    let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
    EventEnvelope::from_json_line(text.trim()).map_err(|e| e.to_string())
}

/// Length of the log once it ends on a record boundary, plus the id of a
/// complete record that was found without its newline.
async fn record_boundary(path: &Path) -> Result<(u64, Option<EventId>)> {
    let mut file = fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok((0, None));
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok((len, None));
    }

    let recovered = repair_torn_tail(path).await?;
    Ok((fs::metadata(path).await?.len(), recovered))
}

/// Parse every record of the log, in file order.
async fn read_log(path: &Path) -> Result<Vec<EventEnvelope>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<(usize, &[u8])> = bytes
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .collect();
    let last = lines.len().saturating_sub(1);

    let mut events = Vec::with_capacity(lines.len());
    for (position, (index, line)) in lines.into_iter().enumerate() {
        match parse_line(line) {
            Ok(event) => events.push(event),
            Err(e) if position == last => {
                warn!(path = %path.display(), line = index + 1, error = %e, "skipping incomplete final record");
            }
            Err(e) => {
                return Err(StorageError::Corrupted {
                    location: format!("{}:{}", path.display(), index + 1),
                    reason: e,
                });
            }
        }
    }
    Ok(events)
}

/// Fix up bytes left after the last newline by an interrupted append.
/// Returns the id of the final record when it was complete and kept.
async fn repair_torn_tail(path: &Path) -> Result<Option<EventId>> {
    let bytes = fs::read(path).await?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(None);
    }

    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);

    if let Ok(event) = parse_line(&bytes[keep..]) {
        warn!(path = %path.display(), "event log missing final newline, restoring it");
        let mut file = OpenOptions::new().append(true).open(path).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;
        return Ok(Some(event.event_id));
    }

    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "truncating torn final record of event log"
    );
    let file = OpenOptions::new().write(true).open(path).await?;
    truncate(&file, keep as u64).await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trait_::conformance;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, JsonlEventStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonlEventStore::new(dir.path());
        store.initialize().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_ordering() {
        let (_dir, store) = open_store().await;
        conformance::check_ordering(&store).await;
    }

    #[tokio::test]
    async fn test_tie_break() {
        let (_dir, store) = open_store().await;
        conformance::check_tie_break(&store).await;
    }

    #[tokio::test]
    async fn test_filters() {
        let (_dir, store) = open_store().await;
        conformance::check_filters(&store).await;
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (_dir, store) = open_store().await;
        conformance::check_duplicate_rejected(&store).await;
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dir = TempDir::new().unwrap();
        conformance::check_lifecycle(&JsonlEventStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn test_one_json_object_per_line() {
        let (_dir, store) = open_store().await;
        let event = conformance::event_at(EventType::Message, "s1", 0);
        store.append(&event).await.unwrap();
        store
            .append(&conformance::event_at(EventType::Handoff, "s1", 5))
            .await
            .unwrap();

        let content = fs::read_to_string(store.events_path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_id"], event.event_id.as_str());
        assert_eq!(first["event_type"], "execution.message");
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = TempDir::new().unwrap();
        let store = JsonlEventStore::new(dir.path());
        store.initialize().await.unwrap();

        let first = conformance::event_at(EventType::Message, "s1", 0);
        let second = conformance::event_at(EventType::ToolCall, "s1", 10);
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();
        store.close().await.unwrap();

        let reopened = JsonlEventStore::new(dir.path());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![first.clone(), second]);
        assert_eq!(reopened.count().await.unwrap(), 2);

        // Ids loaded from disk still count as taken.
        assert!(reopened.append(&first).await.unwrap_err().is_duplicate());
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let store = JsonlEventStore::new(dir.path());
        store.initialize().await.unwrap();
        let event = conformance::event_at(EventType::Message, "s1", 0);
        store.append(&event).await.unwrap();
        store.close().await.unwrap();

        let path = dir.path().join(EVENTS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(br#"{"event_id":"half-writ"#).await.unwrap();
        drop(file);

        let reopened = JsonlEventStore::new(dir.path());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![event]);

        let content = fs::read_to_string(&path).await.unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_complete_tail_without_newline_is_kept() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).await.unwrap();
        let event = conformance::event_at(EventType::Message, "s1", 0);
        fs::write(dir.path().join(EVENTS_FILE), event.to_json_line().unwrap())
            .await
            .unwrap();

        let store = JsonlEventStore::new(dir.path());
        store.initialize().await.unwrap();
        let next = conformance::event_at(EventType::Message, "s1", 1);
        store.append(&next).await.unwrap();

        assert_eq!(store.get_all().await.unwrap(), vec![event, next]);
    }

    #[tokio::test]
    async fn test_corruption_in_the_middle_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = JsonlEventStore::new(dir.path());
        store.initialize().await.unwrap();
        store
            .append(&conformance::event_at(EventType::Message, "s1", 0))
            .await
            .unwrap();

        let path = dir.path().join(EVENTS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(b"not json\n").await.unwrap();
        let line = conformance::event_at(EventType::Message, "s1", 1)
            .to_json_line()
            .unwrap();
        file.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        drop(file);

        let err = store.get_all().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupted { .. }), "unexpected error: {err}");
    }

    async fn write_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).await.unwrap();
        file.write_all(bytes).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_after_partial_write_starts_a_new_line() {
        let (dir, store) = open_store().await;
        let first = conformance::event_at(EventType::Message, "s1", 0);
        store.append(&first).await.unwrap();

        // What an interrupted write leaves behind.
        write_raw(&store.events_path(), br#"{"event_id":"half"#).await;

        let second = conformance::event_at(EventType::Message, "s1", 1);
        store.append(&second).await.unwrap();
        assert_eq!(store.get_all().await.unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(store.count().await.unwrap(), 2);

        let third = conformance::event_at(EventType::Message, "s1", 2);
        store.append(&third).await.unwrap();
        let expected = vec![first, second, third];
        assert_eq!(store.get_all().await.unwrap(), expected);
        store.close().await.unwrap();

        let reopened = JsonlEventStore::new(dir.path());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), expected);
        assert_eq!(reopened.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_complete_tail_written_behind_the_store_is_adopted() {
        let (_dir, store) = open_store().await;
        let outside = conformance::event_at(EventType::Message, "s1", 0);
        write_raw(&store.events_path(), outside.to_json_line().unwrap().as_bytes()).await;

        assert!(store.append(&outside).await.unwrap_err().is_duplicate());
        let next = conformance::event_at(EventType::Message, "s1", 1);
        store.append(&next).await.unwrap();
        assert_eq!(store.get_all().await.unwrap(), vec![outside, next]);
    }

    #[tokio::test]
    async fn test_truncate_removes_partial_record() {
        let (_dir, store) = open_store().await;
        let event = conformance::event_at(EventType::Message, "s1", 0);
        store.append(&event).await.unwrap();

        let path = store.events_path();
        let (start, recovered) = record_boundary(&path).await.unwrap();
        assert_eq!(recovered, None);

        let mut file = OpenOptions::new().append(true).open(&path).await.unwrap();
        file.write_all(br#"{"event_id":"cut-"#).await.unwrap();
        file.flush().await.unwrap();
        truncate(&file, start).await.unwrap();
        drop(file);

        let content = fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, format!("{}\n", event.to_json_line().unwrap()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_in_final_line_is_skipped() {
        let (_dir, store) = open_store().await;
        let event = conformance::event_at(EventType::Message, "s1", 0);
        store.append(&event).await.unwrap();

        write_raw(&store.events_path(), b"{\"event_id\":\"\xff\xfe").await;
        assert_eq!(store.get_all().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_in_the_middle_is_corruption() {
        let (_dir, store) = open_store().await;
        let path = store.events_path();
        write_raw(&path, b"\xff\xfe\n").await;
        let line = conformance::event_at(EventType::Message, "s1", 1)
            .to_json_line()
            .unwrap();
        write_raw(&path, format!("{line}\n").as_bytes()).await;

        let err = store.get_all().await.unwrap_err();
        assert!(
            matches!(&err, StorageError::Corrupted { location, .. } if location.ends_with(":1")),
            "unexpected error: {err}"
        );
    }
}
