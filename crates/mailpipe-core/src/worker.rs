//! The dedicated delivery thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, error};

use crate::ack::AckPath;
use crate::envelope::EnvelopeRenderer;
use crate::message::{LogMessage, SequenceNumber};
use crate::queue::{DeliveryQueue, QueueNotify};
use crate::stats::StatsCounter;
use crate::suspend::SuspensionController;
use crate::transport::{Destination, TransferReport, Transport, TransportError};

/// Observable state of a driver's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for or delivering messages.
    Running,
    /// Cooling down after a failed delivery.
    Suspended,
    /// Asked to stop; finishing the current attempt.
    Terminating,
    /// No worker thread (driver not initialised).
    Stopped,
}

impl WorkerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Suspended,
            2 => Self::Terminating,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Suspended => 1,
            Self::Terminating => 2,
            Self::Stopped => 3,
        }
    }
}

/// A queued message and the path its acknowledgment takes.
pub struct QueueItem {
    message: Arc<LogMessage>,
    ack: AckPath,
}

impl QueueItem {
    pub(crate) const fn new(message: Arc<LogMessage>, ack: AckPath) -> Self {
        Self { message, ack }
    }

    /// The queued message.
    #[must_use]
    pub fn message(&self) -> &LogMessage {
        &self.message
    }

    pub(crate) fn into_ack(self) -> AckPath {
        self.ack
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("message", &self.message.id())
            .field("ack", &self.ack)
            .finish()
    }
}

/// State shared by producers, the lifecycle manager and the worker thread.
pub(crate) struct WorkerShared {
    pub(crate) queue: Arc<DeliveryQueue<QueueItem>>,
    pub(crate) suspension: SuspensionController,
    terminate: AtomicBool,
    state: AtomicU8,
}

impl WorkerShared {
    pub(crate) fn new(queue: Arc<DeliveryQueue<QueueItem>>) -> Self {
        Self {
            queue,
            suspension: SuspensionController::new(),
            terminate: AtomicBool::new(false),
            state: AtomicU8::new(WorkerState::Running.as_u8()),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Terminating is final; later transitions are ignored.
    fn set_state(&self, next: WorkerState) {
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != WorkerState::Terminating.as_u8()).then_some(next.as_u8())
            });
    }

    fn terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Sets the stop flag and wakes the worker wherever it is blocked.
    pub(crate) fn request_termination(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.state
            .store(WorkerState::Terminating.as_u8(), Ordering::SeqCst);
        self.suspension.wake();
        self.queue.wake();
    }
}

/// Queue notification hook that wakes the worker.
pub(crate) struct WorkerWaker(Weak<WorkerShared>);

impl WorkerWaker {
    pub(crate) fn new(shared: &Arc<WorkerShared>) -> Self {
        Self(Arc::downgrade(shared))
    }
}

impl QueueNotify for WorkerWaker {
    fn notify(&self) {
        if let Some(shared) = self.0.upgrade() {
            shared.queue.wake();
        }
    }
}

/// Worker-exclusive delivery state.
///
/// Moved into the worker thread on init and handed back when the thread is
/// joined, so the transport and the sequence number outlive a reload.
pub(crate) struct WorkerLoop {
    driver: String,
    destination: Destination,
    transport: Box<dyn Transport>,
    renderer: Arc<dyn EnvelopeRenderer>,
    time_reopen: Duration,
    seq: SequenceNumber,
}

impl WorkerLoop {
    pub(crate) fn new(
        driver: String,
        destination: Destination,
        transport: Box<dyn Transport>,
        renderer: Arc<dyn EnvelopeRenderer>,
        time_reopen: Duration,
    ) -> Self {
        Self {
            driver,
            destination,
            transport,
            renderer,
            time_reopen,
            seq: SequenceNumber::FIRST,
        }
    }

    /// Runs until termination is requested, then returns itself.
    pub(crate) fn run(mut self, shared: &WorkerShared, stored: &StatsCounter) -> Self {
        debug!(driver = %self.driver, "Worker thread started");

        while !shared.terminating() {
            if shared.suspension.is_suspended() {
                shared.set_state(WorkerState::Suspended);
                shared.suspension.wait(&shared.terminate);
                shared.set_state(WorkerState::Running);
                continue;
            }

            if !shared.queue.wait_for_items(&shared.terminate) {
                continue;
            }
            let Some(item) = shared.queue.pop_head() else {
                continue;
            };

            match self.attempt(item.message()) {
                Ok(report) => {
                    debug!(
                        driver = %self.driver,
                        seqnum = %self.seq,
                        accepted = report.accepted,
                        refused = report.refused,
                        "Message delivered"
                    );
                    stored.inc();
                    self.seq.advance();
                    item.into_ack().delivered();
                }
                Err(err) => {
                    error!(
                        driver = %self.driver,
                        host = %self.destination.host,
                        port = self.destination.port,
                        error = %err,
                        time_reopen = self.time_reopen.as_secs_f64(),
                        "SMTP server error, suspending"
                    );
                    shared.queue.push_head(item);
                    shared.suspension.suspend(self.time_reopen);
                    shared.set_state(WorkerState::Suspended);
                }
            }
        }

        debug!(driver = %self.driver, "Worker thread finished");
        self
    }

    fn attempt(&mut self, msg: &LogMessage) -> Result<TransferReport, TransportError> {
        let envelope = self.renderer.render(msg, self.seq)?;
        self.transport.send_once(&self.destination, &envelope)
    }
}
