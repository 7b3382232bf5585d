use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Offset Tracker
// ============================================================================
//
// Kafka commits are cumulative: committing offset N marks everything below N
// as processed. Deliveries are acknowledged one by one, so the commit point
// of a partition may only advance to the lowest offset that was delivered
// but not yet acknowledged.
//
// The consume loop never leaves a hole behind: an unacknowledged delivery is
// either read again or dead-lettered and acknowledged before the next offset
// is pulled.
//
// ============================================================================

#[derive(Debug, Default)]
struct PartitionState {
    pending: BTreeSet<i64>,
    attempts: HashMap<i64, u32>,
    highest_acked: Option<i64>,
    committed: Option<i64>,
}

impl PartitionState {
    fn commit_point(&self, offset: i64) -> Option<i64> {
        if !self.pending.contains(&offset) {
            return None;
        }

        let highest = self.highest_acked.map_or(offset, |h| h.max(offset));
        let candidate = self
            .pending
            .iter()
            .copied()
            .find(|pending| *pending != offset)
            .unwrap_or(highest + 1);

        match self.committed {
            Some(committed) if committed >= candidate => None,
            _ => Some(candidate),
        }
    }
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a message was handed to a consumer handler.
    ///
    /// Returns how many times this offset has been delivered, starting at 1.
    pub fn delivered(&mut self, partition: i32, offset: i64) -> u32 {
        let state = self.partitions.entry(partition).or_default();
        state.pending.insert(offset);

        let attempts = state.attempts.entry(offset).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn is_pending(&self, partition: i32, offset: i64) -> bool {
        self.partitions
            .get(&partition)
            .is_some_and(|state| state.pending.contains(&offset))
    }

    /// Offset that acknowledging `offset` would commit, without recording
    /// anything. `None` when the commit point would not move.
    pub fn commit_point(&self, partition: i32, offset: i64) -> Option<i64> {
        self.partitions.get(&partition)?.commit_point(offset)
    }

    /// Mark an offset acknowledged.
    ///
    /// Returns the offset to commit (the next offset to read) when the
    /// commit point of the partition moved forward.
    pub fn acknowledge(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&partition)?;
        let commit_to = state.commit_point(offset);

        if !state.pending.remove(&offset) {
            return None;
        }
        state.attempts.remove(&offset);
        state.highest_acked = Some(state.highest_acked.map_or(offset, |h| h.max(offset)));

        if commit_to.is_some() {
            state.committed = commit_to;
        }
        commit_to
    }

    /// Number of delivered offsets still awaiting acknowledgment.
    pub fn pending(&self) -> usize {
        self.partitions.values().map(|p| p.pending.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_acks_commit_each_offset() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(0, 10);
        assert_eq!(tracker.acknowledge(0, 10), Some(11));

        tracker.delivered(0, 11);
        assert_eq!(tracker.acknowledge(0, 11), Some(12));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_unacked_offset_holds_commit_point() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(0, 5);
        tracker.delivered(0, 6);
        tracker.delivered(0, 7);

        // 5 failed and stays unacknowledged
        assert_eq!(tracker.acknowledge(0, 6), Some(5));
        assert_eq!(tracker.acknowledge(0, 7), None);
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn test_late_ack_releases_frontier() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(0, 1);
        tracker.delivered(0, 2);

        assert_eq!(tracker.acknowledge(0, 2), Some(1));
        assert_eq!(tracker.acknowledge(0, 1), Some(3));
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(0, 100);
        tracker.delivered(1, 7);

        assert_eq!(tracker.acknowledge(1, 7), Some(8));
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.acknowledge(0, 100), Some(101));
    }

    #[test]
    fn test_unknown_or_repeated_ack_is_ignored() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.acknowledge(3, 1), None);

        tracker.delivered(0, 4);
        assert_eq!(tracker.acknowledge(0, 4), Some(5));
        assert_eq!(tracker.acknowledge(0, 4), None);
    }

    #[test]
    fn test_redelivery_counts_attempts() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.delivered(0, 3), 1);
        assert_eq!(tracker.delivered(0, 3), 2);
        assert_eq!(tracker.delivered(0, 3), 3);
        assert_eq!(tracker.pending(), 1);

        assert_eq!(tracker.acknowledge(0, 3), Some(4));
        assert_eq!(tracker.delivered(0, 3), 1);
    }

    #[test]
    fn test_commit_point_does_not_record() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(2, 40);

        assert_eq!(tracker.commit_point(2, 40), Some(41));
        assert!(tracker.is_pending(2, 40));
        assert_eq!(tracker.commit_point(2, 41), None);
        assert_eq!(tracker.commit_point(9, 40), None);

        assert_eq!(tracker.acknowledge(2, 40), Some(41));
        assert!(!tracker.is_pending(2, 40));
    }

    #[test]
    fn test_settled_failure_releases_later_acks() {
        let mut tracker = OffsetTracker::new();
        tracker.delivered(0, 5);

        // 5 is read again, then settled (dead-lettered) before 6 is pulled
        tracker.delivered(0, 5);
        assert_eq!(tracker.acknowledge(0, 5), Some(6));

        for offset in 6..=10 {
            tracker.delivered(0, offset);
            assert_eq!(tracker.acknowledge(0, offset), Some(offset + 1));
        }
        assert_eq!(tracker.pending(), 0);
    }
}
