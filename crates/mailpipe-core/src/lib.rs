//! # mailpipe-core
//!
//! SMTP destination for log pipelines.
//!
//! Producer threads hand messages to an [`SmtpDriver`]; the driver queues
//! them and a single dedicated worker thread delivers them one by one over
//! SMTP. A failed delivery never loses the message: it goes back to the head
//! of the queue and the worker pauses for the configured reopen interval
//! before trying again.
//!
//! ```text
//! producers ──enqueue──→ DeliveryQueue ──pop──→ worker ──send_once──→ SMTP server
//!     ↑                        ↑                  │
//!     └──────── ack ───────────┼──── success ─────┤
//!                              └── push_head ─────┘ failure → suspend
//! ```
//!
//! This crate provides:
//! - [`DeliveryQueue`] and [`QueuePool`]
//! - [`SuspensionController`]
//! - The worker loop and [`SmtpDriver`] lifecycle ([`LogPipe`])
//! - Acknowledgment paths ([`AckTracker`], [`PathOptions`])
//! - Templates, envelope rendering and the SMTP [`Transport`]
//! - Statistics counters and configuration

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod ack;
pub mod config;
mod driver;
pub mod envelope;
mod error;
mod message;
pub mod queue;
pub mod stats;
mod suspend;
pub mod template;
pub mod transport;
mod worker;

pub use ack::{AckOutcome, AckTracker, PathOptions};
pub use config::{DriverConfig, RecipientKind, Security};
pub use driver::{DriverBuilder, LogPipe, SmtpDriver, SmtpQueuePool};
pub use envelope::{Envelope, EnvelopeRenderer, RenderError, TemplateRenderer};
pub use error::{Error, Result};
pub use message::{LogMessage, MessageId, SequenceNumber};
pub use queue::{DeliveryQueue, QueueNotify, QueuePool};
pub use stats::{CounterKind, StatsKey, StatsRegistry};
pub use suspend::SuspensionController;
pub use template::Template;
pub use transport::{Destination, SmtpTransport, TransferReport, Transport, TransportError};
pub use worker::{QueueItem, WorkerState};
