//! Uniform-random baseline. Shares the UCB1 state and lock but ignores the
//! scores when choosing.

use crate::state::{SegmentState, SharedState};
use crate::DecisionEngine;
use rand::Rng;
use rotator_core::{RotatorError, RotatorResult, SegmentKey, Snapshot};

pub struct RandomEngine {
    state: SharedState,
}

impl RandomEngine {
    pub fn new() -> Self {
        Self {
            state: SharedState::default(),
        }
    }
}

impl Default for RandomEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine for RandomEngine {
    fn initialize(&self, snapshot: &Snapshot) {
        self.state.replace(snapshot);
    }

    fn select_next(&self, key: &SegmentKey) -> RotatorResult<u32> {
        let state = self.state.read();
        let segment = state.segment(key)?;
        if segment.arms.is_empty() {
            return Err(RotatorError::UnknownSegment(format!("no banners for {key}")));
        }
        let idx = rand::thread_rng().gen_range(0..segment.arms.len());
        segment
            .arms
            .keys()
            .nth(idx)
            .copied()
            .ok_or_else(|| RotatorError::UnknownSegment(format!("no banners for {key}")))
    }

    fn record_show(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.state.record_show(key, banner_id)
    }

    fn record_click(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.state.record_click(key, banner_id)
    }

    fn segment_stats(&self, key: &SegmentKey) -> Option<SegmentState> {
        self.state.segment_stats(key)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
