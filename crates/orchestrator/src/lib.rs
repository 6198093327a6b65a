//! Decision orchestrator: serving-time coordination of the segment
//! resolver and decision engine, staleness repair by snapshot reload, and
//! fire-and-forget emission of outcome events.

#![warn(clippy::unwrap_used)]

pub mod emitter;
pub mod rotator;

pub use emitter::EventEmitter;
pub use rotator::BannerRotator;
