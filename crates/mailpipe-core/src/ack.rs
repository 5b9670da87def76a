//! Acknowledgment paths between producers and the delivery worker.
//!
//! A producer that wants to know when its message has left the driver passes
//! an [`AckTracker`] in its [`PathOptions`]. The driver registers the message
//! with the tracker on enqueue and reports exactly one terminal outcome
//! later: [`AckOutcome::Delivered`] after a successful transfer, or
//! [`AckOutcome::Requeued`] when the driver stops with the message still
//! queued. Failed attempts that are retried produce no acknowledgment.

use std::fmt;
use std::sync::Arc;

use crate::message::MessageId;

/// Terminal outcome reported for a registered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The SMTP server accepted the message.
    Delivered,
    /// The driver stopped before the message was delivered; the producer
    /// keeps ownership and may send it again.
    Requeued,
}

/// Producer-side bookkeeping for in-flight messages.
pub trait AckTracker: Send + Sync {
    /// Called once on enqueue, before the message becomes visible to the worker.
    fn register(&self, id: MessageId);

    /// Called once per registered message with its outcome.
    fn acknowledge(&self, id: MessageId, outcome: AckOutcome);
}

/// Options accompanying a message through the pipeline.
#[derive(Clone, Default)]
pub struct PathOptions {
    /// Whether the producer waits for acknowledgments.
    pub flow_control_requested: bool,
    /// Tracker to notify.
    pub tracker: Option<Arc<dyn AckTracker>>,
}

impl PathOptions {
    /// Options requesting flow control through `tracker`.
    #[must_use]
    pub fn flow_controlled(tracker: Arc<dyn AckTracker>) -> Self {
        Self {
            flow_control_requested: true,
            tracker: Some(tracker),
        }
    }
}

impl fmt::Debug for PathOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathOptions")
            .field("flow_control_requested", &self.flow_control_requested)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

/// Acknowledgment path carried by a queued item.
pub(crate) struct AckPath {
    id: MessageId,
    tracker: Option<Arc<dyn AckTracker>>,
}

impl AckPath {
    /// Registers `id` with the producer's tracker.
    ///
    /// Without flow control the chain is broken here: nothing is registered
    /// and no outcome is ever reported.
    pub(crate) fn register(id: MessageId, options: &PathOptions) -> Self {
        let tracker = if options.flow_control_requested {
            options.tracker.clone()
        } else {
            None
        };
        if let Some(tracker) = &tracker {
            tracker.register(id);
        }
        Self { id, tracker }
    }

    pub(crate) fn delivered(self) {
        self.finish(AckOutcome::Delivered);
    }

    pub(crate) fn requeued(self) {
        self.finish(AckOutcome::Requeued);
    }

    fn finish(self, outcome: AckOutcome) {
        if let Some(tracker) = self.tracker {
            tracker.acknowledge(self.id, outcome);
        }
    }
}

impl fmt::Debug for AckPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckPath")
            .field("id", &self.id)
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}
