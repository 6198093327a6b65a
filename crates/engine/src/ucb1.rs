//! UCB1 (Upper Confidence Bound) bandit.
//!
//! Every recompute first looks for an arm that was never shown and picks
//! it, so each new banner is shown at least once before scoring starts.
//! Otherwise each arm scores `reward/tries + sqrt(2 ln(total) / tries)` and
//! the strictly greatest score wins. Arms are visited in ascending banner id,
//! so ties go to the lowest id.

use crate::state::{Arm, SegmentState, SharedState};
use crate::DecisionEngine;
use rotator_core::{RotatorResult, SegmentKey, Snapshot};
use std::collections::BTreeMap;
use tracing::debug;

pub fn score(arm: &Arm, total_tries: f64) -> f64 {
    arm.reward / arm.tries + (2.0 * total_tries.ln() / arm.tries).sqrt()
}

/// Best arm under UCB1, or `None` when there are no arms.
pub fn best_arm(arms: &BTreeMap<u32, Arm>, total_tries: f64) -> Option<u32> {
    if let Some((id, _)) = arms.iter().find(|(_, arm)| arm.tries == 0.0) {
        return Some(*id);
    }

    let mut best_score = f64::NEG_INFINITY;
    let mut best = None;
    for (id, arm) in arms {
        let s = score(arm, total_tries);
        if s > best_score {
            best_score = s;
            best = Some(*id);
        }
    }
    best
}

pub struct Ucb1Engine {
    state: SharedState,
}

impl Ucb1Engine {
    pub fn new() -> Self {
        Self {
            state: SharedState::default(),
        }
    }
}

impl Default for Ucb1Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionEngine for Ucb1Engine {
    fn initialize(&self, snapshot: &Snapshot) {
        let segments = self.state.replace(snapshot);
        debug!(segments = segments, "UCB1 state initialized");
    }

    fn select_next(&self, key: &SegmentKey) -> RotatorResult<u32> {
        Ok(self.state.read().segment(key)?.best)
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
        "ucb1"
    }
}
