//! Log messages handed to the driver by the host pipeline.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-driver delivery counter exposed to templates as `SEQNUM`.
///
/// Starts at 1, steps after every successful delivery and wraps back to 1
/// after `i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber(i32);

impl SequenceNumber {
    /// The first sequence number.
    pub const FIRST: Self = Self(1);

    /// Current value.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Moves to the next value.
    pub const fn advance(&mut self) {
        self.0 = if self.0 >= i32::MAX { 1 } else { self.0 + 1 };
    }
}

impl Default for SequenceNumber {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Syslog facility names indexed by facility code.
const FACILITY_NAMES: [&str; 24] = [
    "kern", "user", "mail", "daemon", "auth", "syslog", "lpr", "news", "uucp", "cron", "authpriv",
    "ftp", "ntp", "security", "console", "solaris-cron", "local0", "local1", "local2", "local3",
    "local4", "local5", "local6", "local7",
];

/// Syslog severity names indexed by severity code.
const SEVERITY_NAMES: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// A single log message.
///
/// Messages are immutable once built and shared between the producer and
/// the delivery worker behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LogMessage {
    id: MessageId,
    timestamp: DateTime<Local>,
    host: String,
    program: String,
    pid: Option<u32>,
    facility: u8,
    severity: u8,
    message: String,
    values: BTreeMap<String, String>,
}

impl LogMessage {
    /// Creates a message stamped with the current time.
    ///
    /// Facility defaults to `user`, severity to `notice`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            timestamp: Local::now(),
            host: String::new(),
            program: String::new(),
            pid: None,
            facility: 1,
            severity: 5,
            message: message.into(),
            values: BTreeMap::new(),
        }
    }

    /// Sets the originating host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the program name.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the process id.
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Sets facility and severity codes. Out-of-range values are clamped.
    #[must_use]
    pub fn with_priority(mut self, facility: u8, severity: u8) -> Self {
        self.facility = facility.min(23);
        self.severity = severity.min(7);
        self
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a name-value pair.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Message identifier.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Time the message was received.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Originating host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Process id, if known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Facility as a syslog keyword.
    #[must_use]
    pub fn facility_name(&self) -> &'static str {
        FACILITY_NAMES
            .get(usize::from(self.facility))
            .copied()
            .unwrap_or("user")
    }

    /// Severity as a syslog keyword.
    #[must_use]
    pub fn severity_name(&self) -> &'static str {
        SEVERITY_NAMES
            .get(usize::from(self.severity))
            .copied()
            .unwrap_or("notice")
    }

    /// Looks up a name-value pair.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}
