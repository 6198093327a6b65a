//! NATS-backed queue. Events travel as JSON on one subject; consumers join a
//! queue group so each event reaches exactly one aggregator instance.

use async_trait::async_trait;
use rotator_core::config::NatsConfig;
use rotator_core::event_bus::cancelled;
use rotator_core::{Event, EventPublisher, EventSubscriber, RotatorError, RotatorResult, Shutdown};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

pub struct NatsQueue {
    client: async_nats::Client,
    subject: String,
    queue_group: String,
}

impl NatsQueue {
    pub fn new(client: async_nats::Client, subject: String, queue_group: String) -> Self {
        Self {
            client,
            subject,
            queue_group,
        }
    }

    /// Connect to every configured server and bind to the event subject.
    pub async fn connect(config: &NatsConfig) -> RotatorResult<Self> {
        let urls = config.urls.join(",");
        info!(url = %urls, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .max_reconnects(Some(config.max_reconnects))
            .connect(urls.as_str())
            .await
            .map_err(|e| RotatorError::Queue(format!("NATS connect failed: {e}")))?;

        info!("NATS connection established");
        Ok(Self::new(
            client,
            config.subject.clone(),
            config.queue_group.clone(),
        ))
    }
}

#[async_trait]
impl EventPublisher for NatsQueue {
    async fn push(&self, event: &Event) -> RotatorResult<()> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| RotatorError::Queue(format!("NATS publish failed: {e}")))
    }
}

#[async_trait]
impl EventSubscriber for NatsQueue {
    async fn pull(&self, mut shutdown: Shutdown, events: mpsc::Sender<Event>) -> RotatorResult<()> {
        let mut subscriber = self
            .client
            .queue_subscribe(self.subject.clone(), self.queue_group.clone())
            .await
            .map_err(|e| RotatorError::Queue(format!("NATS subscribe failed: {e}")))?;

        info!(
            subject = %self.subject,
            queue_group = %self.queue_group,
            "Subscribed to event subject"
        );

        loop {
            let msg = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                msg = subscriber.next() => match msg {
                    Some(msg) => msg,
                    None => {
                        warn!(subject = %self.subject, "NATS subscription ended");
                        break;
                    }
                },
            };

            let Some(event) = decode(&msg.payload) else {
                continue;
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

        if let Err(e) = subscriber.unsubscribe().await {
            warn!(error = %e, "NATS unsubscribe failed");
        }
        Ok(())
    }
}

/// Parse one message payload. Malformed payloads are logged, counted and
/// skipped; a payload without `event_id` gets a fresh one.
fn decode(payload: &[u8]) -> Option<Event> {
    match serde_json::from_slice(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Skipping malformed event");
            metrics::counter!("queue.malformed").increment(1);
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rotator_core::EventType;
    use serde_json::json;

    #[test]
    fn test_decode_round_trips_published_payload() {
        let event = Event::new(EventType::Click, "site.com", 1, 2, 31, "man");
        let payload = serde_json::to_vec(&event).unwrap();
        assert_eq!(decode(&payload), Some(event));
    }

    #[test]
    fn test_decode_skips_malformed_payload() {
        assert_eq!(decode(b"not json"), None);
        assert_eq!(decode(b""), None);
        // Well-formed JSON with the wrong shape.
        let wrong = json!({"event_type": "view", "page_url": "site.com"});
        assert_eq!(decode(wrong.to_string().as_bytes()), None);
    }

    #[test]
    fn test_decode_fills_missing_event_id() {
        let payload = json!({
            "event_type": "show",
            "timestamp": "2024-05-01T12:00:00Z",
            "page_url": "site.com",
            "slot_id": 1,
            "banner_id": 3,
            "user_age": 70,
            "user_sex": "woman"
        })
        .to_string();

        let first = decode(payload.as_bytes()).unwrap();
        let second = decode(payload.as_bytes()).unwrap();
        assert_eq!(first.event_type, EventType::Show);
        assert_eq!(first.banner_id, 3);
        assert_ne!(first.event_id, second.event_id);
    }
}
