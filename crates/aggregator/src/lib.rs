//! Event ingestion: applies click/show events from the queue to the
//! canonical counters, one event at a time.

#![warn(clippy::unwrap_used)]

pub mod dedupe;
pub mod pipeline;

pub use dedupe::RecentEvents;
pub use pipeline::{Aggregator, IngestStats};
