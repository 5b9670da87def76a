//! Statistics counters.
//!
//! Every increment goes to an OpenTelemetry counter tagged with the key's
//! component, id and instance, and to a local value the host can read back
//! through [`StatsRegistry::get`]. Registration is reference counted: the
//! same key registered twice yields the same counter, and the counter stays
//! visible until every registration is gone.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Meter};

/// Component label used by SMTP destinations.
pub const SMTP_DESTINATION: &str = "smtp destination";

/// Counter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    /// Messages handed to the driver.
    Processed,
    /// Messages delivered.
    Stored,
    /// Messages discarded.
    Dropped,
}

impl CounterKind {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Stored => "stored",
            Self::Dropped => "dropped",
        }
    }
}

/// Identifies one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    /// Kind of component, e.g. [`SMTP_DESTINATION`].
    pub component: &'static str,
    /// Driver id.
    pub id: String,
    /// Instance, e.g. `smtp,localhost,25`.
    pub instance: String,
    /// What is counted.
    pub kind: CounterKind,
}

impl StatsKey {
    fn attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("component", self.component),
            KeyValue::new("driver", self.id.clone()),
            KeyValue::new("instance", self.instance.clone()),
        ]
    }
}

impl fmt::Display for StatsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.component,
            self.id,
            self.instance,
            self.kind.as_str()
        )
    }
}

/// A monotonic counter.
pub struct StatsCounter {
    // Local value shared with `get` and snapshots
    value: AtomicU64,
    exported: Counter<u64>,
    attributes: Vec<KeyValue>,
}

impl StatsCounter {
    /// Adds one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
        self.exported.add(1, &self.attributes);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for StatsCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsCounter")
            .field("value", &self.get())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Registration {
    counter: Arc<StatsCounter>,
    refs: usize,
}

/// Process-wide table of counters.
pub struct StatsRegistry {
    counters: Mutex<HashMap<StatsKey, Registration>>,
    processed: Counter<u64>,
    stored: Counter<u64>,
    dropped: Counter<u64>,
}

impl StatsRegistry {
    /// Creates an empty registry exporting through the global meter provider.
    #[must_use]
    pub fn new() -> Self {
        Self::with_meter(&meter())
    }

    /// Creates an empty registry whose instruments come from `meter`.
    #[must_use]
    pub fn with_meter(meter: &Meter) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            processed: meter
                .u64_counter("mailpipe.destination.processed.total")
                .with_description("Messages handed to the destination")
                .build(),
            stored: meter
                .u64_counter("mailpipe.destination.stored.total")
                .with_description("Messages delivered")
                .build(),
            dropped: meter
                .u64_counter("mailpipe.destination.dropped.total")
                .with_description("Messages discarded")
                .build(),
        }
    }

    fn instrument(&self, kind: CounterKind) -> Counter<u64> {
        match kind {
            CounterKind::Processed => self.processed.clone(),
            CounterKind::Stored => self.stored.clone(),
            CounterKind::Dropped => self.dropped.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StatsKey, Registration>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `key` and returns its counter.
    pub fn register(&self, key: StatsKey) -> Arc<StatsCounter> {
        let mut counters = self.lock();
        let entry = counters.entry(key).or_insert_with_key(|key| Registration {
            counter: Arc::new(StatsCounter {
                value: AtomicU64::new(0),
                exported: self.instrument(key.kind),
                attributes: key.attributes(),
            }),
            refs: 0,
        });
        entry.refs += 1;
        entry.counter.clone()
    }

    /// Drops one registration of `key`.
    pub fn unregister(&self, key: &StatsKey) {
        let mut counters = self.lock();
        if let Some(entry) = counters.get_mut(key) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                counters.remove(key);
            }
        }
    }

    /// Current value of `key`, if registered.
    #[must_use]
    pub fn get(&self, key: &StatsKey) -> Option<u64> {
        self.lock().get(key).map(|entry| entry.counter.get())
    }

    /// Snapshot of every registered counter, sorted by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut values: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.counter.get()))
            .collect();
        values.sort();
        values
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsRegistry")
            .field("counters", &self.lock().len())
            .finish_non_exhaustive()
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("mailpipe.destination")
}
