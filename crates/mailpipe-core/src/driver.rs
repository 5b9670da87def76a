//! SMTP destination driver: producer entry point and lifecycle.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::ack::{AckPath, PathOptions};
use crate::config::DriverConfig;
use crate::envelope::{EnvelopeRenderer, TemplateRenderer};
use crate::error::{Error, Result};
use crate::message::LogMessage;
use crate::queue::QueuePool;
use crate::stats::{CounterKind, SMTP_DESTINATION, StatsCounter, StatsKey, StatsRegistry};
use crate::transport::{Destination, DriverMonitor, SmtpTransport, Transport};
use crate::worker::{QueueItem, WorkerLoop, WorkerShared, WorkerState, WorkerWaker};

/// Queue pool shared by SMTP drivers.
pub type SmtpQueuePool = QueuePool<QueueItem>;

/// Entry points the host pipeline calls.
pub trait LogPipe {
    /// Starts serving: acquires the queue and spawns the worker.
    ///
    /// # Errors
    ///
    /// Any error is fatal; the host must not start the driver.
    fn init(&mut self) -> Result<()>;

    /// Stops the worker, returns undelivered messages to their producers and
    /// releases the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is not running or the worker panicked.
    fn deinit(&mut self) -> Result<()>;

    /// Accepts a message for delivery. Never blocks on the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRunning`] before `init` or after `deinit`.
    fn enqueue(&self, msg: Arc<LogMessage>, options: &PathOptions) -> Result<()>;
}

struct Running {
    shared: Arc<WorkerShared>,
    waker: Arc<WorkerWaker>,
    handle: JoinHandle<WorkerLoop>,
    processed: Arc<StatsCounter>,
}

/// Builds an [`SmtpDriver`], optionally with a custom transport, renderer,
/// queue pool or stats registry.
#[must_use]
pub struct DriverBuilder {
    id: String,
    config: DriverConfig,
    transport: Option<Box<dyn Transport>>,
    renderer: Option<Arc<dyn EnvelopeRenderer>>,
    queues: Option<Arc<SmtpQueuePool>>,
    stats: Option<Arc<StatsRegistry>>,
}

impl DriverBuilder {
    /// Uses `transport` instead of SMTP.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses `renderer` instead of the configured templates.
    pub fn renderer(mut self, renderer: Arc<dyn EnvelopeRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Shares a queue pool with other drivers.
    pub fn queue_pool(mut self, queues: Arc<SmtpQueuePool>) -> Self {
        self.queues = Some(queues);
        self
    }

    /// Shares a stats registry with other drivers.
    pub fn stats(mut self, stats: Arc<StatsRegistry>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Validates the configuration, compiles templates and builds the driver.
    ///
    /// # Errors
    ///
    /// Returns a configuration, template or runtime error.
    pub fn build(self) -> Result<SmtpDriver> {
        let config = self.config.checked()?;
        let destination = Destination {
            host: config.host.clone(),
            port: config.port,
        };
        let time_reopen = config
            .time_reopen_duration()
            .ok_or_else(|| Error::Config("time_reopen must be a positive number of seconds".into()))?;

        let renderer = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(TemplateRenderer::new(&config)?),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let monitor = Arc::new(DriverMonitor::new(self.id.clone(), destination.clone()));
                Box::new(SmtpTransport::new(&config, monitor)?)
            }
        };

        Ok(SmtpDriver {
            persist_name: config.persist_name(),
            worker: Mutex::new(Some(WorkerLoop::new(
                self.id.clone(),
                destination.clone(),
                transport,
                renderer,
                time_reopen,
            ))),
            id: self.id,
            destination,
            queues: self.queues.unwrap_or_default(),
            stats: self.stats.unwrap_or_default(),
            running: None,
        })
    }
}

/// An SMTP destination.
///
/// Producers call [`enqueue`](LogPipe::enqueue) from any thread; a single
/// worker thread per driver delivers messages one at a time, in order. A
/// failed delivery puts the message back at the head of the queue and
/// suspends the worker for `time_reopen`.
pub struct SmtpDriver {
    id: String,
    persist_name: String,
    destination: Destination,
    queues: Arc<SmtpQueuePool>,
    stats: Arc<StatsRegistry>,
    // Parked here between deinit and init; only touched through &mut self
    worker: Mutex<Option<WorkerLoop>>,
    running: Option<Running>,
}

impl SmtpDriver {
    /// Starts building a driver named `id`.
    pub fn builder(id: impl Into<String>, config: DriverConfig) -> DriverBuilder {
        DriverBuilder {
            id: id.into(),
            config,
            transport: None,
            renderer: None,
            queues: None,
            stats: None,
        }
    }

    /// Builds a driver that delivers over SMTP.
    ///
    /// # Errors
    ///
    /// Returns a configuration, template or runtime error.
    pub fn new(id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        Self::builder(id, config).build()
    }

    /// Driver id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue and stats instance name, `smtp,<host>,<port>`.
    #[must_use]
    pub fn persist_name(&self) -> &str {
        &self.persist_name
    }

    /// Server the driver delivers to.
    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Stats registry the driver's counters live in.
    #[must_use]
    pub const fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    /// Key of one of this driver's counters.
    #[must_use]
    pub fn stats_key(&self, kind: CounterKind) -> StatsKey {
        StatsKey {
            component: SMTP_DESTINATION,
            id: self.id.clone(),
            instance: self.persist_name.clone(),
            kind,
        }
    }

    /// Current worker state.
    #[must_use]
    pub fn worker_state(&self) -> WorkerState {
        self.running
            .as_ref()
            .map_or(WorkerState::Stopped, |running| running.shared.state())
    }

    /// Number of messages waiting, including one being retried.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.shared.queue.len())
    }

    /// Returns true between a successful `init` and the next `deinit`.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stops the driver if needed and consumes it.
    ///
    /// # Errors
    ///
    /// Returns an error if stopping fails.
    pub fn destroy(mut self) -> Result<()> {
        debug!(driver = %self.id, "Destroying SMTP destination");
        if self.running.is_some() {
            self.deinit()?;
        }
        Ok(())
    }

    fn unregister_stats(&self) {
        for kind in [CounterKind::Stored, CounterKind::Dropped, CounterKind::Processed] {
            self.stats.unregister(&self.stats_key(kind));
        }
    }
}

impl LogPipe for SmtpDriver {
    fn init(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let parked = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = parked.take() else {
            return Err(Error::WorkerPanicked);
        };

        info!(
            driver = %self.id,
            host = %self.destination.host,
            port = self.destination.port,
            "Initializing SMTP destination"
        );

        let queue = match self.queues.acquire(&self.persist_name) {
            Ok(queue) => queue,
            Err(e) => {
                *parked = Some(worker);
                return Err(e);
            }
        };

        let stored = self.stats.register(self.stats_key(CounterKind::Stored));
        // Registered for visibility; nothing is ever dropped
        self.stats.register(self.stats_key(CounterKind::Dropped));
        let processed = self.stats.register(self.stats_key(CounterKind::Processed));

        let shared = Arc::new(WorkerShared::new(queue));
        let waker = Arc::new(WorkerWaker::new(&shared));

        let thread_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("smtp-{}", self.id))
            .spawn(move || worker.run(&thread_shared, &stored));

        match spawned {
            Ok(handle) => {
                self.running = Some(Running {
                    shared,
                    waker,
                    handle,
                    processed,
                });
                Ok(())
            }
            Err(e) => {
                self.queues.release(shared.queue.clone());
                self.unregister_stats();
                Err(Error::Spawn(e))
            }
        }
    }

    fn deinit(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(Error::NotRunning);
        };

        running.shared.request_termination();
        let joined = running.handle.join();

        let undelivered = running.shared.queue.drain();
        if !undelivered.is_empty() {
            warn!(
                driver = %self.id,
                count = undelivered.len(),
                "Returning undelivered messages to their producers"
            );
        }
        for item in undelivered {
            item.into_ack().requeued();
        }

        self.queues.release(running.shared.queue.clone());
        self.unregister_stats();

        match joined {
            Ok(worker) => {
                *self.worker.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(worker);
                Ok(())
            }
            Err(_) => Err(Error::WorkerPanicked),
        }
    }

    fn enqueue(&self, msg: Arc<LogMessage>, options: &PathOptions) -> Result<()> {
        let running = self.running.as_ref().ok_or(Error::NotRunning)?;
        let shared = &running.shared;

        let ack = AckPath::register(msg.id(), options);
        let was_empty = shared.queue.push_tail(QueueItem::new(msg, ack)) == 0;
        if was_empty && !shared.suspension.is_suspended() {
            shared.queue.enable_notify_on_non_empty(running.waker.clone());
        }
        running.processed.inc();
        Ok(())
    }
}

impl Drop for SmtpDriver {
    fn drop(&mut self) {
        if self.running.is_some()
            && let Err(e) = self.deinit()
        {
            warn!(driver = %self.id, error = %e, "Failed to stop SMTP destination");
        }
    }
}

impl std::fmt::Debug for SmtpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpDriver")
            .field("id", &self.id)
            .field("persist_name", &self.persist_name)
            .field("state", &self.worker_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{MailboxConfig, RecipientConfig, RecipientKind};
    use crate::envelope::Envelope;
    use crate::transport::{TransferReport, TransportError};

    struct NullTransport;

    impl Transport for NullTransport {
        fn send_once(
            &mut self,
            _: &Destination,
            _: &Envelope,
        ) -> std::result::Result<TransferReport, TransportError> {
            Ok(TransferReport::default())
        }
    }

    fn config() -> DriverConfig {
        DriverConfig {
            host: "mx.example.com".into(),
            port: 2525,
            from: MailboxConfig {
                phrase: None,
                address: "syslog@example.com".into(),
            },
            recipients: vec![RecipientConfig {
                kind: RecipientKind::To,
                phrase: None,
                address: "ops@example.com".into(),
            }],
            ..DriverConfig::default()
        }
    }

    fn driver(queues: &Arc<SmtpQueuePool>) -> SmtpDriver {
        SmtpDriver::builder("d_smtp", config())
            .transport(Box::new(NullTransport))
            .queue_pool(queues.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn lifecycle_states() {
        let queues = Arc::new(SmtpQueuePool::new());
        let mut d = driver(&queues);
        assert_eq!(d.persist_name(), "smtp,mx.example.com,2525");
        assert_eq!(d.worker_state(), WorkerState::Stopped);
        assert!(matches!(
            d.enqueue(Arc::new(LogMessage::new("x")), &PathOptions::default()),
            Err(Error::NotRunning)
        ));

        d.init().unwrap();
        assert!(d.is_running());
        assert!(matches!(d.init(), Err(Error::AlreadyRunning)));

        d.deinit().unwrap();
        assert_eq!(d.worker_state(), WorkerState::Stopped);
        assert!(matches!(d.deinit(), Err(Error::NotRunning)));

        // Worker state came back from the thread, so a reload works
        d.init().unwrap();
        d.destroy().unwrap();
    }

    #[test]
    fn second_driver_on_same_destination_fails() {
        let queues = Arc::new(SmtpQueuePool::new());
        let mut first = driver(&queues);
        let mut second = driver(&queues);

        first.init().unwrap();
        assert!(matches!(second.init(), Err(Error::QueueInUse(name)) if name == "smtp,mx.example.com,2525"));
        assert!(!second.is_running());

        first.deinit().unwrap();
        second.init().unwrap();
    }

    #[test]
    fn stats_registered_while_running() {
        let queues = Arc::new(SmtpQueuePool::new());
        let mut d = driver(&queues);
        let key = d.stats_key(CounterKind::Dropped);
        assert_eq!(d.stats().get(&key), None);

        d.init().unwrap();
        assert_eq!(d.stats().get(&key), Some(0));
        d.deinit().unwrap();
        assert_eq!(d.stats().get(&key), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = SmtpDriver::builder("d_smtp", DriverConfig::default())
            .transport(Box::new(NullTransport))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
