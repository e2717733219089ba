//! Observer: the single entry point that records facts and fans them out.
//!
//! Every fact flows through [`Observer::record`] (or [`Observer::record_raw`]
//! for pre-built envelopes): it is validated, appended to the event store, and
//! only then delivered to live subscribers. Queries delegate to the store.
//!
//! [`MessageIngestor`] sits on top and turns chat-completion shaped JSON from
//! an agent runtime into envelopes with a causal chain.

#![warn(missing_docs)]

pub mod error;
pub mod subscriber;
pub mod observer;
pub mod ingest;

pub use error::{ObserverError, Result};
pub use subscriber::{subscriber_fn, FnSubscriber, Subscriber};
pub use observer::Observer;
pub use ingest::{IngestAdapter, MessageIngestor};
