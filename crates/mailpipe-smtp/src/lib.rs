//! # mailpipe-smtp
//!
//! SMTP submission client used by the mailpipe delivery worker (RFC 5321).
//!
//! Each delivery attempt is one short session: connect, greet, optionally
//! secure and authenticate, run a single mail transaction and quit.
//!
//! ## Features
//!
//! - **Type-state connection management**: invalid command orders do not compile
//! - **Per-recipient results**: refused recipients are reported, not fatal,
//!   as long as one recipient is accepted
//! - **TLS support**: implicit TLS and STARTTLS via rustls
//! - **Authentication**: AUTH PLAIN
//! - **Session monitoring**: lifecycle events and a protocol trace through
//!   [`SessionMonitor`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailpipe_smtp::{Address, Client};
//! use mailpipe_smtp::connection::connect;
//!
//! async fn deliver() -> mailpipe_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 25).await?;
//!     let client = Client::from_stream(stream).await?.ehlo("loghost").await?;
//!
//!     let from = Address::new("syslog@example.com")?;
//!     let to = [Address::new("ops@example.com")?];
//!     let message = b"Subject: disk full\r\n\r\n/var is at 100%\r\n";
//!
//!     let client = client.mail_from(from, Some(message.len())).await?;
//!     let (client, _statuses) = client.add_recipients(&to).await?;
//!     let (client, _reply) = client.data().await?.send_message(message).await?;
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── auth_plain() ───→ Authenticated
//! └──────────────┘                              │
//!        │                                      │
//!        └─── mail_from() ───→ MailTransaction ←┘
//!                                   │
//!                         add_recipients()
//!                                   ↓
//!                            RecipientAdded ─── data() ───→ Data
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod monitor;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, RecipientStatus,
    ServerInfo, SmtpConnection,
};
pub use error::{Error, Result};
pub use monitor::{NoopMonitor, SessionEvent, SessionMonitor, TraceDirection};
pub use types::{Address, AuthMechanism, Extension, Mailbox, Reply, ReplyClass, ReplyCode};
