//! In-process queue. Unbounded so the serving path never waits on the
//! consumer; a single `pull` at a time owns the receiving half.

use async_trait::async_trait;
use rotator_core::event_bus::cancelled;
use rotator_core::{Event, EventPublisher, EventSubscriber, RotatorError, RotatorResult, Shutdown};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Event>,
    receiver: Mutex<mpsc::UnboundedReceiver<Event>>,
    pushed: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pushed: AtomicU64::new(0),
        }
    }

    /// Events accepted since creation.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for MemoryQueue {
    async fn push(&self, event: &Event) -> RotatorResult<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| RotatorError::Queue("memory queue closed".into()))?;
        self.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryQueue {
    async fn pull(&self, mut shutdown: Shutdown, events: mpsc::Sender<Event>) -> RotatorResult<()> {
        let mut receiver = self.receiver.lock().await;
        debug!("Memory queue consumer attached");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                sent = events.send(event) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Memory queue consumer detached");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rotator_core::event_bus::shutdown_channel;
    use rotator_core::EventType;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_then_pull_preserves_order() {
        let queue = Arc::new(MemoryQueue::new());
        for banner_id in 1..=3 {
            queue
                .push(&Event::new(EventType::Show, "site.com", 1, banner_id, 20, "man"))
                .await
                .unwrap();
        }
        assert_eq!(queue.pushed(), 3);

        let (stop, shutdown) = shutdown_channel();
        let (tx, mut rx) = mpsc::channel(8);
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pull(shutdown, tx).await })
        };

        for expected in 1..=3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.banner_id, expected);
        }

        stop.send(true).unwrap();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_pull_returns_when_receiver_dropped() {
        let queue = Arc::new(MemoryQueue::new());
        let (_stop, shutdown) = shutdown_channel();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        queue
            .push(&Event::new(EventType::Click, "site.com", 1, 1, 20, "man"))
            .await
            .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), queue.pull(shutdown, tx)).await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pull_stops_on_dropped_shutdown_sender() {
        let queue = MemoryQueue::new();
        let (stop, shutdown) = shutdown_channel();
        let (tx, _rx) = mpsc::channel(1);
        drop(stop);
        let result = tokio::time::timeout(Duration::from_secs(1), queue.pull(shutdown, tx)).await;
        assert!(result.unwrap().is_ok());
    }
}
