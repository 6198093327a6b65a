//! Event queue backends: an in-process channel for single-node runs and
//! tests, and a NATS subject for multi-node deployments.

#![warn(clippy::unwrap_used)]

pub mod memory;
pub mod nats;

pub use memory::MemoryQueue;
pub use nats::NatsQueue;

use rotator_core::config::AppConfig;
use rotator_core::{EventPublisher, EventSubscriber, RotatorError, RotatorResult};
use std::sync::Arc;
use tracing::info;

/// Both halves of a queue, possibly backed by the same connection.
#[derive(Clone)]
pub struct QueueHandles {
    pub publisher: Arc<dyn EventPublisher>,
    pub subscriber: Arc<dyn EventSubscriber>,
}

/// Build the queue backend named by `queue.backend`.
pub async fn connect(config: &AppConfig) -> RotatorResult<QueueHandles> {
    match config.queue.backend.as_str() {
        "memory" => {
            let queue = Arc::new(MemoryQueue::new());
            info!(backend = "memory", "Event queue ready");
            Ok(QueueHandles {
                publisher: queue.clone(),
                subscriber: queue,
            })
        }
        "nats" => {
            let queue = Arc::new(NatsQueue::connect(&config.nats).await?);
            info!(backend = "nats", subject = %config.nats.subject, "Event queue ready");
            Ok(QueueHandles {
                publisher: queue.clone(),
                subscriber: queue,
            })
        }
        other => Err(RotatorError::Config(format!(
            "unknown queue backend {other:?} (expected \"memory\" or \"nats\")"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_backend_is_a_config_error() {
        let mut config = AppConfig::default();
        config.queue.backend = "kafka".into();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, RotatorError::Config(_)));
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let config = AppConfig::default();
        assert!(connect(&config).await.is_ok());
    }
}
