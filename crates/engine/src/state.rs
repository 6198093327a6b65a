//! In-memory bandit state shared by every engine implementation.

use crate::ucb1;
use parking_lot::{RwLock, RwLockReadGuard};
use rotator_core::{RotatorError, RotatorResult, SegmentKey, Snapshot};
use std::collections::{BTreeMap, HashMap};

/// One selectable banner within a segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Arm {
    /// Times shown to this segment.
    pub tries: f64,
    /// Times clicked in this segment.
    pub reward: f64,
}

/// Arms of one segment. `total_tries` always equals the sum of the arms'
/// `tries`, and `best` is a key of `arms` whenever `arms` is non-empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentState {
    pub arms: BTreeMap<u32, Arm>,
    pub total_tries: f64,
    pub best: u32,
}

impl SegmentState {
    pub fn refresh_best(&mut self) {
        if let Some(best) = ucb1::best_arm(&self.arms, self.total_tries) {
            self.best = best;
        }
    }

    fn arm_mut(&mut self, key: &SegmentKey, banner_id: u32) -> RotatorResult<&mut Arm> {
        self.arms.get_mut(&banner_id).ok_or_else(|| {
            RotatorError::UnknownSegment(format!("banner {banner_id} is not an arm of {key}"))
        })
    }

    pub fn record_show(&mut self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.arm_mut(key, banner_id)?.tries += 1.0;
        self.total_tries += 1.0;
        self.refresh_best();
        Ok(())
    }

    pub fn record_click(&mut self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.arm_mut(key, banner_id)?.reward += 1.0;
        self.refresh_best();
        Ok(())
    }
}

/// Segment key → arm table, rebuilt wholesale from a snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BanditState {
    segments: HashMap<SegmentKey, SegmentState>,
}

impl BanditState {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut segments: HashMap<SegmentKey, SegmentState> = HashMap::new();

        for (page_url, page) in &snapshot.pages {
            for (slot_id, slot) in &page.slots {
                for (banner_id, banner) in &slot.banners {
                    for (group, action) in &banner.groups {
                        let state = segments
                            .entry(SegmentKey::new(page_url, *slot_id, group))
                            .or_default();
                        state.arms.insert(
                            *banner_id,
                            Arm {
                                tries: action.shows as f64,
                                reward: action.clicks as f64,
                            },
                        );
                        state.total_tries += action.shows as f64;
                    }
                }
            }
        }

        for state in segments.values_mut() {
            state.refresh_best();
        }

        Self { segments }
    }

    pub fn segment(&self, key: &SegmentKey) -> RotatorResult<&SegmentState> {
        self.segments
            .get(key)
            .ok_or_else(|| RotatorError::UnknownSegment(format!("no banners for {key}")))
    }

    pub fn segment_mut(&mut self, key: &SegmentKey) -> RotatorResult<&mut SegmentState> {
        self.segments
            .get_mut(key)
            .ok_or_else(|| RotatorError::UnknownSegment(format!("no banners for {key}")))
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// `BanditState` behind one reader/writer lock. Selection takes the read
/// lock, every mutation takes the write lock, and a reload swaps the whole
/// state at once.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: RwLock<BanditState>,
}

impl SharedState {
    /// Rebuild from `snapshot` and swap it in. Returns the segment count.
    pub fn replace(&self, snapshot: &Snapshot) -> usize {
        // Built outside the lock; readers see either the old or the new state.
        let fresh = BanditState::from_snapshot(snapshot);
        let segments = fresh.len();
        *self.inner.write() = fresh;
        segments
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BanditState> {
        self.inner.read()
    }

    pub fn record_show(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.inner.write().segment_mut(key)?.record_show(key, banner_id)
    }

    pub fn record_click(&self, key: &SegmentKey, banner_id: u32) -> RotatorResult<()> {
        self.inner.write().segment_mut(key)?.record_click(key, banner_id)
    }

    pub fn segment_stats(&self, key: &SegmentKey) -> Option<SegmentState> {
        self.inner.read().segment(key).ok().cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rotator_core::types::{Action, Banner, BannerStat, PageStat, Slot, SlotStat};

    fn snapshot() -> Snapshot {
        let mut page = PageStat::new("mysite.com");
        let mut banners = BTreeMap::new();
        for (id, shows, clicks) in [(1, 100, 10), (2, 10, 1), (3, 5, 0)] {
            let mut groups = BTreeMap::new();
            groups.insert("old man".to_string(), Action { clicks, shows });
            groups.insert("young man".to_string(), Action::default());
            banners.insert(
                id,
                BannerStat {
                    banner: Banner { banner_id: id, description: format!("{id}_banner") },
                    groups,
                },
            );
        }
        page.slots.insert(
            1,
            SlotStat {
                slot: Slot { slot_id: 1, description: "1_slot".into() },
                banners,
            },
        );
        let mut snapshot = Snapshot::default();
        snapshot.insert(page);
        snapshot
    }

    #[test]
    fn test_from_snapshot_builds_one_segment_per_group() {
        let state = BanditState::from_snapshot(&snapshot());
        assert_eq!(state.len(), 2);

        let old = state.segment(&SegmentKey::new("mysite.com", 1, "old man")).unwrap();
        assert_eq!(old.arms.len(), 3);
        assert_eq!(old.total_tries, 115.0);
        assert_eq!(old.arms[&1], Arm { tries: 100.0, reward: 10.0 });

        let young = state.segment(&SegmentKey::new("mysite.com", 1, "young man")).unwrap();
        assert_eq!(young.total_tries, 0.0);
        assert_eq!(young.best, 1);
    }

    #[test]
    fn test_unknown_segment() {
        let state = BanditState::from_snapshot(&snapshot());
        let err = state
            .segment(&SegmentKey::new("mysite.com", 2, "old man"))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_arm() {
        let mut state = BanditState::from_snapshot(&snapshot());
        let key = SegmentKey::new("mysite.com", 1, "old man");
        let err = state.segment_mut(&key).unwrap().record_show(&key, 9).unwrap_err();
        assert!(matches!(err, RotatorError::UnknownSegment(_)));
        assert_eq!(state.segment(&key).unwrap().total_tries, 115.0);
    }

    #[test]
    fn test_shared_state_updates_under_lock() {
        let shared = SharedState::default();
        assert_eq!(shared.replace(&snapshot()), 2);

        let key = SegmentKey::new("mysite.com", 1, "young man");
        shared.record_show(&key, 2).unwrap();
        shared.record_click(&key, 2).unwrap();
        let young = shared.segment_stats(&key).unwrap();
        assert_eq!(young.arms[&2], Arm { tries: 1.0, reward: 1.0 });
        assert_eq!(young.total_tries, 1.0);

        let missing = SegmentKey::new("mysite.com", 7, "young man");
        assert!(shared.record_click(&missing, 1).unwrap_err().is_retryable());
        assert!(shared.segment_stats(&missing).is_none());

        // A reload discards in-memory updates.
        shared.replace(&snapshot());
        assert_eq!(shared.segment_stats(&key).unwrap().total_tries, 0.0);
        assert_eq!(*shared.read(), BanditState::from_snapshot(&snapshot()));
    }
}
