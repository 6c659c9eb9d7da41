use parking_lot::RwLock;
use std::collections::VecDeque;
use tracing::debug;

use crate::scoring::AnomalyVerdict;

pub const DEFAULT_RECENT_EVENTS_CAPACITY: usize = 50;

/// Fixed-capacity, most-recent-first buffer of anomaly verdicts.
///
/// One producer (the listener) and any number of readers. Readers always get
/// a consistent point-in-time copy.
pub struct RecentEvents {
    events: RwLock<VecDeque<AnomalyVerdict>>,
    capacity: usize,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry once full
    pub fn push(&self, verdict: AnomalyVerdict) {
        let mut events = self.events.write();
        events.push_front(verdict);
        if events.len() > self.capacity {
            if let Some(evicted) = events.pop_back() {
                debug!("Evicted verdict {} from recent events", evicted.instruction_id);
            }
        }
    }

    /// Copy of the current contents, most recent first
    pub fn snapshot(&self) -> Vec<AnomalyVerdict> {
        self.events.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RecentEvents {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_EVENTS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::models::SettlementStatus;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn verdict(n: usize) -> AnomalyVerdict {
        AnomalyVerdict {
            instruction_id: format!("id{}", n),
            expected_amount: Decimal::from(n),
            onchain_amount: Decimal::from(n),
            status: SettlementStatus::ReconciledSettled,
            is_anomaly: false,
            anomaly_score: 0.1,
        }
    }

    #[test]
    fn test_most_recent_first() {
        let recent = RecentEvents::new(5);
        recent.push(verdict(1));
        recent.push(verdict(2));

        let ids: Vec<_> = recent.snapshot().into_iter().map(|v| v.instruction_id).collect();
        assert_eq!(ids, vec!["id2", "id1"]);
    }

    #[test]
    fn test_sixty_into_fifty_keeps_latest() {
        let recent = RecentEvents::default();
        for n in 0..60 {
            recent.push(verdict(n));
        }

        let snapshot = recent.snapshot();
        assert_eq!(snapshot.len(), 50);
        assert_eq!(snapshot.first().unwrap().instruction_id, "id59");
        assert_eq!(snapshot.last().unwrap().instruction_id, "id10");

        let expected: Vec<String> = (10..60).rev().map(|n| format!("id{}", n)).collect();
        let ids: Vec<String> = snapshot.into_iter().map(|v| v.instruction_id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let recent = RecentEvents::new(3);
        for n in 0..10 {
            recent.push(verdict(n));
            assert!(recent.len() <= recent.capacity());
        }
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let recent = RecentEvents::new(0);
        recent.push(verdict(1));
        recent.push(verdict(2));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent.snapshot()[0].instruction_id, "id2");
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let recent = Arc::new(RecentEvents::new(10));

        let writer = {
            let recent = recent.clone();
            std::thread::spawn(move || {
                for n in 0..1_000 {
                    recent.push(verdict(n));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let recent = recent.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = recent.snapshot();
                        assert!(snapshot.len() <= 10);
                        // Consecutive, strictly descending ids within one snapshot
                        for pair in snapshot.windows(2) {
                            let a: usize = pair[0].instruction_id[2..].parse().unwrap();
                            let b: usize = pair[1].instruction_id[2..].parse().unwrap();
                            assert_eq!(a, b + 1);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(recent.snapshot()[0].instruction_id, "id999");
    }
}
