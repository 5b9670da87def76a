//! Session observation hooks.
//!
//! A [`SessionMonitor`] is handed to the [`Client`](crate::Client) when it is
//! created and receives lifecycle events and a line-by-line protocol trace.
//! Both methods default to no-ops, so an implementor only overrides what it
//! wants to see.

use crate::types::ReplyCode;

/// Lifecycle events of one SMTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Server greeting accepted.
    Connected {
        /// Hostname announced in the greeting.
        server: String,
    },
    /// Message data accepted by the server.
    MessageSent {
        /// Final reply code after the terminating dot.
        code: ReplyCode,
    },
    /// QUIT acknowledged, session closed.
    Disconnected,
}

/// Which side produced a traced protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDirection {
    /// Line written by the client.
    Client,
    /// Line read from the server.
    Server,
}

impl TraceDirection {
    /// Label used in log output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
        }
    }
}

/// Capability interface for observing a session.
pub trait SessionMonitor: Send + Sync {
    /// Called on session lifecycle transitions.
    fn on_event(&self, event: &SessionEvent) {
        let _ = event;
    }

    /// Called for every protocol line, without the trailing CRLF.
    fn on_trace(&self, direction: TraceDirection, line: &str) {
        let _ = (direction, line);
    }
}

/// Monitor that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl SessionMonitor for NoopMonitor {}
