pub mod config;
pub mod error;
pub mod event_bus;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{RotatorError, RotatorResult};
pub use event_bus::{EventPublisher, EventSubscriber, Shutdown};
pub use types::{Event, EventType, SegmentKey, Snapshot};
