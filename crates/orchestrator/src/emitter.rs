//! Bounded, non-blocking event emission with one background publisher.

use parking_lot::{Mutex, RwLock};
use rotator_core::{Event, EventPublisher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Hands events to a single worker that pushes them to the queue.
///
/// `emit` never waits: when the buffer is full, or after `shutdown`, the
/// event is dropped and counted.
pub struct EventEmitter {
    sender: RwLock<Option<mpsc::Sender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Spawn the publishing worker. Must be called inside a Tokio runtime.
    pub fn spawn(publisher: Arc<dyn EventPublisher>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Event>(capacity.max(1));
        let worker = tokio::spawn(publish_loop(publisher, receiver));

        info!(capacity = capacity, "Event emitter started");

        Self {
            sender: RwLock::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: Event) {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("rotator.events.dropped").increment(1);
            warn!(event_type = %event.event_type, "Event emitter is shut down, event dropped");
            return;
        };

        if let Err(e) = sender.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("rotator.events.dropped").increment(1);
            warn!("Event dropped: {}", e);
        } else {
            metrics::counter!("rotator.events.queued").increment(1);
        }
    }

    /// Events rejected so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// True until `shutdown` is called.
    pub fn is_running(&self) -> bool {
        self.sender.read().is_some()
    }

    /// Stop accepting events, push everything already queued, then join
    /// the worker. Later calls return immediately.
    pub async fn shutdown(&self) {
        // Dropping the only sender lets the worker drain and exit.
        drop(self.sender.write().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Event emitter worker panicked");
            }
            info!("Event emitter drained");
        }
    }
}

async fn publish_loop(publisher: Arc<dyn EventPublisher>, mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match publisher.push(&event).await {
            Ok(()) => {
                debug!(event_id = %event.event_id, event_type = %event.event_type, "Event pushed");
            }
            Err(e) => {
                metrics::counter!("rotator.events.push_errors").increment(1);
                error!(
                    event_type = %event.event_type,
                    page_url = %event.page_url,
                    slot_id = event.slot_id,
                    banner_id = event.banner_id,
                    error = %e,
                    "Failed to push event"
                );
            }
        }
    }
}
