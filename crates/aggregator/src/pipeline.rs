//! Single-consumer ingestion loop.
//!
//! One puller task forwards events from the queue into a bounded channel;
//! the loop below drains that channel strictly in order, so the canonical
//! counters only ever see one writer from this process.

use crate::dedupe::RecentEvents;
use rotator_core::config::IngestConfig;
use rotator_core::store::{ActionWriter, GroupReader};
use rotator_core::{Event, EventSubscriber, RotatorError, RotatorResult, Shutdown};
use rotator_segmentation::SegmentResolver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Totals since the aggregator was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub applied: u64,
    pub failed: u64,
    pub duplicates: u64,
}

pub struct Aggregator {
    actions: Arc<dyn ActionWriter>,
    groups: Arc<dyn GroupReader>,
    subscriber: Arc<dyn EventSubscriber>,
    channel_capacity: usize,
    dedupe_window: usize,
    applied: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
}

impl Aggregator {
    pub fn new(
        actions: Arc<dyn ActionWriter>,
        groups: Arc<dyn GroupReader>,
        subscriber: Arc<dyn EventSubscriber>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            actions,
            groups,
            subscriber,
            channel_capacity: config.channel_capacity.max(1),
            dedupe_window: config.dedupe_window,
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }

    /// Consume until shutdown or until the queue ends. Events already in the
    /// internal channel are applied before returning.
    pub async fn run(&self, shutdown: Shutdown) -> RotatorResult<()> {
        let resolver = SegmentResolver::new(self.groups.groups().await?);
        let mut recent = RecentEvents::new(self.dedupe_window);

        let (sender, mut receiver) = mpsc::channel::<Event>(self.channel_capacity);
        let subscriber = self.subscriber.clone();
        let puller = tokio::spawn(async move { subscriber.pull(shutdown, sender).await });

        info!(
            channel_capacity = self.channel_capacity,
            dedupe_window = self.dedupe_window,
            "Aggregator started"
        );

        // Ends once the puller has returned and dropped its sender.
        while let Some(event) = receiver.recv().await {
            self.apply(&resolver, &mut recent, event).await;
        }

        let result = match puller.await {
            Ok(result) => result,
            Err(e) => Err(RotatorError::Queue(format!("event puller task failed: {e}"))),
        };
        if let Err(e) = &result {
            error!(error = %e, "Event puller stopped with an error");
        }

        let stats = self.stats();
        info!(
            applied = stats.applied,
            failed = stats.failed,
            duplicates = stats.duplicates,
            "Aggregator stopped"
        );
        result
    }

    async fn apply(&self, resolver: &SegmentResolver, recent: &mut RecentEvents, event: Event) {
        if !recent.insert(event.event_id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ingest.duplicates").increment(1);
            debug!(event_id = %event.event_id, "Skipping redelivered event");
            return;
        }

        let group = resolver.resolve(event.user_age, &event.user_sex);
        match self
            .actions
            .add_action(
                event.event_type,
                &event.page_url,
                event.slot_id,
                event.banner_id,
                group,
            )
            .await
        {
            Ok(()) => {
                self.applied.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("ingest.applied", "type" => event.event_type.to_string())
                    .increment(1);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("ingest.failed").increment(1);
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    page_url = %event.page_url,
                    slot_id = event.slot_id,
                    banner_id = event.banner_id,
                    group = %group,
                    error = %e,
                    "Failed to apply event, dropping it"
                );
            }
        }
    }
}
