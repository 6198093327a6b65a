//! Event transport contract: producer and consumer sides of the queue that
//! carries click/show outcomes from the serving path to the aggregator.
//!
//! Delivery is at-least-once; consumers must tolerate redelivery.

use crate::error::{RotatorError, RotatorResult};
use crate::types::{Event, EventType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

/// Cancellation signal. `true` (or a dropped sender) means shut down.
pub type Shutdown = watch::Receiver<bool>;

pub fn shutdown_channel() -> (watch::Sender<bool>, Shutdown) {
    watch::channel(false)
}

/// Resolves once shutdown has been requested.
pub async fn cancelled(shutdown: &mut Shutdown) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Producer side, used by the orchestrator.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn push(&self, event: &Event) -> RotatorResult<()>;
}

/// Consumer side, used by the aggregator.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Forward events into `events` until shutdown is signalled, the
    /// transport ends, or the receiving half of `events` is dropped.
    async fn pull(&self, shutdown: Shutdown, events: mpsc::Sender<Event>) -> RotatorResult<()>;
}

/// Publisher that records every pushed event, for tests.
#[derive(Default)]
pub struct CapturePublisher {
    events: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl CapturePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent push fail with a queue error.
    pub fn fail_pushes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventPublisher for CapturePublisher {
    async fn push(&self, event: &Event) -> RotatorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RotatorError::Queue("capture publisher is failing".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Convenience: create a capture publisher for tests.
pub fn capture_publisher() -> Arc<CapturePublisher> {
    Arc::new(CapturePublisher::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capture_publisher() {
        let publisher = capture_publisher();
        assert_eq!(publisher.count(), 0);

        publisher
            .push(&Event::new(EventType::Show, "site.com", 1, 1, 31, "man"))
            .await
            .unwrap();
        publisher
            .push(&Event::new(EventType::Click, "site.com", 1, 1, 31, "man"))
            .await
            .unwrap();

        assert_eq!(publisher.count(), 2);
        assert_eq!(publisher.count_type(EventType::Show), 1);
        assert_eq!(publisher.count_type(EventType::Click), 1);
        assert_eq!(publisher.events()[0].event_type, EventType::Show);
    }

    #[tokio::test]
    async fn test_failing_publisher() {
        let publisher = capture_publisher();
        publisher.fail_pushes(true);
        let result = publisher
            .push(&Event::new(EventType::Show, "site.com", 1, 1, 31, "man"))
            .await;
        assert!(matches!(result, Err(RotatorError::Queue(_))));
        assert_eq!(publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_signal_and_on_drop() {
        let (tx, mut rx) = shutdown_channel();
        tx.send(true).unwrap();
        cancelled(&mut rx).await;

        let (tx, mut rx) = shutdown_channel();
        drop(tx);
        cancelled(&mut rx).await;
    }
}
