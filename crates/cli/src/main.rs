//! chatsnap - record and inspect ChatSnapshot event logs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chatsnapshot_core::{timestamp, EventId, EventSource, EventType, Payload, RuntimeType};
use chatsnapshot_observer::Observer;
use chatsnapshot_projection::{
    MarkdownTranscriptProjection, Projection, SnapshotProjection, TranscriptConfig,
    TranscriptProjection,
};
use chatsnapshot_storage::config::{
    DEFAULT_COLLECTION, DEFAULT_DATABASE, DEFAULT_SNAPSHOT_COLLECTION,
};
use chatsnapshot_storage::{open_event_store, open_snapshot_store, StoreConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "CHATSNAP_LOG";

/// Directory used when no path is given.
const DEFAULT_DIR: &str = ".chatsnapshot";

#[derive(Parser)]
#[command(name = "chatsnap")]
#[command(about = "Record and inspect agent conversation event logs", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Jsonl,
    Sqlite,
    Mongodb,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Store configuration file (JSON); overrides the other store flags
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(long, value_enum, default_value = "jsonl", global = true)]
    backend: Backend,

    /// Log directory (jsonl) or database file (sqlite)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// MongoDB connection string
    #[arg(long, default_value = "mongodb://localhost:27017", global = true)]
    mongo_uri: String,

    /// MongoDB database
    #[arg(long, default_value = DEFAULT_DATABASE, global = true)]
    database: String,

    /// MongoDB collection
    #[arg(long, default_value = DEFAULT_COLLECTION, global = true)]
    collection: String,

    /// MongoDB collection for saved snapshots
    #[arg(long, default_value = DEFAULT_SNAPSHOT_COLLECTION, global = true)]
    snapshot_collection: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one event
    Record {
        /// Event type wire value, e.g. execution.message
        event_type: String,
        /// Session or run the event belongs to
        correlation_id: String,
        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Agent that produced the event
        #[arg(long)]
        agent: Option<String>,
        /// Runtime tag for the agent
        #[arg(long, default_value = "custom")]
        runtime: String,
        /// Id of the event that caused this one
        #[arg(long)]
        causation: Option<String>,
    },
    /// Print events as JSON Lines
    Events {
        /// Only this correlation id
        #[arg(long)]
        correlation_id: Option<String>,
        /// Only this event type
        #[arg(long)]
        event_type: Option<String>,
        /// Only events at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<String>,
    },
    /// Print the number of stored events
    Count,
    /// Project a conversation into a snapshot
    Snapshot {
        /// Correlation id of the conversation
        correlation_id: String,
        /// Also save the snapshot to the snapshot store
        #[arg(long)]
        save: bool,
    },
    /// List saved snapshots
    Snapshots,
    /// Render a conversation transcript
    Transcript {
        /// Correlation id of the conversation
        correlation_id: String,
        /// Render Markdown instead of plain text
        #[arg(long)]
        markdown: bool,
        /// Leave out per-line timestamps
        #[arg(long)]
        no_timestamps: bool,
        /// Leave out tool calls and results
        #[arg(long)]
        no_tools: bool,
        /// Show otherwise hidden events with their raw payload
        #[arg(long)]
        metadata: bool,
        /// strftime format for line timestamps
        #[arg(long, default_value = "%H:%M:%S")]
        time_format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = store_config(&cli.store).await?;
    debug!(backend = config.backend_name(), "opening event store");

    let store = open_event_store(&config)?;
    Observer::scoped(store, |observer| run(cli.command, config, observer)).await
}

async fn run(command: Commands, config: StoreConfig, observer: Arc<Observer>) -> Result<()> {
    match command {
        Commands::Record {
            event_type,
            correlation_id,
            payload,
            agent,
            runtime,
            causation,
        } => {
            let event_type: EventType = event_type.parse()?;
            let payload = parse_payload(&payload)?;
            let source = match agent {
                Some(name) => EventSource::agent(runtime.parse::<RuntimeType>()?, name),
                None => EventSource::system(),
            };

            let event = observer
                .record(
                    event_type,
                    &correlation_id,
                    payload,
                    Some(source),
                    causation.map(EventId::from),
                )
                .await?;
            info!(event_id = %event.event_id, "recorded");
            println!("{}", event.to_json_line()?);
        }
        Commands::Events {
            correlation_id,
            event_type,
            since,
        } => {
            let event_type = event_type.map(|t| t.parse::<EventType>()).transpose()?;
            let since = since.map(|s| timestamp::parse(&s)).transpose()?;

            let events = match (&correlation_id, event_type, since) {
                (Some(id), _, _) => observer.get_events(id).await?,
                (None, Some(kind), _) => observer.get_events_by_type(kind).await?,
                (None, None, Some(since)) => observer.get_events_since(since).await?,
                (None, None, None) => observer.get_all_events().await?,
            };

            let matching = events.iter().filter(|e| {
                event_type.map_or(true, |kind| e.event_type == kind)
                    && since.map_or(true, |since| e.timestamp >= since)
            });
            for event in matching {
                println!("{}", event.to_json_line()?);
            }
        }
        Commands::Count => {
            println!("{}", observer.count().await?);
        }
        Commands::Snapshot {
            correlation_id,
            save,
        } => {
            let events = observer.get_events(&correlation_id).await?;
            let snapshot = SnapshotProjection::new()
                .project(&events)
                .with_context(|| format!("no events for correlation id {correlation_id}"))?;

            if save {
                let snapshots = open_snapshot_store(&config).await?;
                snapshots.save(&snapshot).await?;
                info!(chat_id = %snapshot.chat_id, "snapshot saved");
            }
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Snapshots => {
            let snapshots = open_snapshot_store(&config).await?;
            let summaries = snapshots.list().await?;

            println!("Snapshots ({})", summaries.len());
            for summary in summaries {
                println!(
                    "  {} | {} | {} | {} messages{}",
                    summary.chat_id,
                    summary.chat_type,
                    timestamp::format(&summary.timestamp),
                    summary.message_count,
                    if summary.is_terminated { " | terminated" } else { "" },
                );
            }
        }
        Commands::Transcript {
            correlation_id,
            markdown,
            no_timestamps,
            no_tools,
            metadata,
            time_format,
        } => {
            let events = observer.get_events(&correlation_id).await?;
            let rendered = if markdown {
                MarkdownTranscriptProjection::new().project(&events)
            } else {
                TranscriptProjection::with_config(TranscriptConfig {
                    include_timestamps: !no_timestamps,
                    include_tool_calls: !no_tools,
                    include_metadata: metadata,
                    timestamp_format: time_format,
                })
                .project(&events)
            };
            println!("{rendered}");
        }
    }

    Ok(())
}

async fn store_config(args: &StoreArgs) -> Result<StoreConfig> {
    if let Some(path) = &args.config {
        return StoreConfig::from_file(path)
            .await
            .with_context(|| format!("reading store config {}", path.display()));
    }

    let dir = PathBuf::from(DEFAULT_DIR);
    Ok(match args.backend {
        Backend::Memory => StoreConfig::Memory,
        Backend::Jsonl => StoreConfig::Jsonl {
            dir: args.path.clone().unwrap_or(dir),
        },
        Backend::Sqlite => StoreConfig::Sqlite {
            path: args.path.clone().unwrap_or_else(|| dir.join("events.db")),
        },
        Backend::Mongodb => StoreConfig::Mongodb {
            uri: args.mongo_uri.clone(),
            database: args.database.clone(),
            collection: args.collection.clone(),
            snapshot_collection: args.snapshot_collection.clone(),
        },
    })
}

fn parse_payload(raw: &str) -> Result<Payload> {
    match serde_json::from_str(raw).context("payload is not valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("payload must be a JSON object, got {other}"),
    }
}
