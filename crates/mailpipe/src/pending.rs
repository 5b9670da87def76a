//! Acknowledgment bookkeeping for messages read from stdin.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use mailpipe_core::{AckOutcome, AckTracker, MessageId};

#[derive(Debug, Default)]
struct Counts {
    outstanding: HashSet<MessageId>,
    delivered: usize,
    requeued: usize,
}

/// Totals after draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub delivered: usize,
    pub requeued: usize,
    pub outstanding: usize,
}

/// Tracks which messages still wait for their acknowledgment.
#[derive(Debug, Default)]
pub struct PendingAcks {
    counts: Mutex<Counts>,
    changed: Condvar,
}

impl PendingAcks {
    /// Blocks until nothing is outstanding or `timeout` passes.
    ///
    /// Returns true if everything was acknowledged.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let (counts, _) = self
            .changed
            .wait_timeout_while(counts, timeout, |c| !c.outstanding.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        counts.outstanding.is_empty()
    }

    pub fn summary(&self) -> Summary {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        Summary {
            delivered: counts.delivered,
            requeued: counts.requeued,
            outstanding: counts.outstanding.len(),
        }
    }
}

impl AckTracker for PendingAcks {
    fn register(&self, id: MessageId) {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outstanding
            .insert(id);
    }

    fn acknowledge(&self, id: MessageId, outcome: AckOutcome) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        if !counts.outstanding.remove(&id) {
            return;
        }
        match outcome {
            AckOutcome::Delivered => counts.delivered += 1,
            AckOutcome::Requeued => counts.requeued += 1,
        }
        drop(counts);
        self.changed.notify_all();
    }
}
