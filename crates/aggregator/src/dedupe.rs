//! Bounded memory of recently applied event ids.

use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Remembers the last `capacity` ids in arrival order. A capacity of zero
/// disables deduplication.
#[derive(Debug, Default)]
pub struct RecentEvents {
    capacity: usize,
    seen: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seen: HashSet::with_capacity(capacity.min(1 << 16)),
            order: VecDeque::with_capacity(capacity.min(1 << 16)),
        }
    }

    /// Returns `false` if `id` is still inside the window.
    pub fn insert(&mut self, id: Uuid) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_inside_window_is_rejected() {
        let mut recent = RecentEvents::new(3);
        let id = Uuid::new_v4();
        assert!(recent.insert(id));
        assert!(!recent.insert(id));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut recent = RecentEvents::new(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            assert!(recent.insert(*id));
        }
        assert_eq!(recent.len(), 2);
        // The first id fell out of the window and is accepted again.
        assert!(recent.insert(ids[0]));
        assert!(!recent.insert(ids[2]));
    }

    #[test]
    fn test_zero_capacity_disables_dedupe() {
        let mut recent = RecentEvents::new(0);
        let id = Uuid::new_v4();
        assert!(recent.insert(id));
        assert!(recent.insert(id));
        assert!(recent.is_empty());
    }
}
