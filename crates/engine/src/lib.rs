//! Decision engine: per-segment multi-armed bandits that answer "which
//! banner next" for a (page, slot, demographic group) and learn from
//! recorded shows and clicks.

pub mod random;
pub mod state;
pub mod ucb1;

pub use random::RandomEngine;
pub use state::{Arm, BanditState, SegmentState, SharedState};
pub use ucb1::Ucb1Engine;

use rotator_core::{RotatorError, RotatorResult, SegmentKey, Snapshot};
use std::sync::Arc;

/// Contract between the orchestrator and a bandit implementation.
///
/// Every failure caused by a segment or arm the engine does not know is
/// reported as [`RotatorError::UnknownSegment`], which tells the caller the
/// engine's view is older than the store's.
pub trait DecisionEngine: Send + Sync {
    /// Replace the entire state with one rebuilt from `snapshot`.
    fn initialize(&self, snapshot: &Snapshot);

    fn select_next(&self, key: &SegmentKey) -> RotatorResult<u32>;

    fn record_show(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()>;

    fn record_click(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()>;

    /// Copy of one segment's arms, totals and cached best arm.
    fn segment_stats(&self, key: &SegmentKey) -> Option<SegmentState>;

    fn name(&self) -> &'static str;
}

/// Build the engine named by `engine.algorithm`.
pub fn engine_for(algorithm: &str) -> RotatorResult<Arc<dyn DecisionEngine>> {
    match algorithm {
        "ucb1" => Ok(Arc::new(Ucb1Engine::new())),
        "random" => Ok(Arc::new(RandomEngine::new())),
        other => Err(RotatorError::Config(format!(
            "unknown decision algorithm {other:?}"
        ))),
    }
}
