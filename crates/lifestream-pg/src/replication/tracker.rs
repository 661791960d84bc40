//! Acknowledged WAL position for one session.

/// Tracks the highest WAL position handed back to the server.
///
/// The loop calls [`PositionTracker::advance`] only after the message at that
/// position was fully processed (any record delivered to the sink), and
/// acknowledges every position it returns. Positions at or below the last
/// acknowledged one are dropped, so acknowledgments never go backwards.
#[derive(Debug, Clone, Copy)]
pub struct PositionTracker {
    acknowledged: u64,
}

impl PositionTracker {
    /// Start from the position the session resumed at.
    pub fn new(start_lsn: u64) -> Self {
        Self {
            acknowledged: start_lsn,
        }
    }

    /// Record a processed position; returns it if it should be acknowledged.
    pub fn advance(&mut self, lsn: u64) -> Option<u64> {
        if lsn > self.acknowledged {
            self.acknowledged = lsn;
            Some(lsn)
        } else {
            None
        }
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }
}
