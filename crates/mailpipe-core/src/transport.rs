//! Delivery transport: one self-contained send attempt per call.

use std::sync::Arc;
use std::time::Duration;

use mailpipe_smtp::connection::{connect, connect_tls};
use mailpipe_smtp::{
    Client, Connected, MailTransaction, SessionEvent, SessionMonitor, TraceDirection,
};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::config::{DriverConfig, Security};
use crate::envelope::{Envelope, RenderError};
use crate::error::{Error, Result};

/// Where messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
}

/// Why a delivery attempt failed. Every variant is retried after the cooldown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server refused or the session broke down.
    #[error("{0}")]
    Protocol(String),
    /// The attempt ran past its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The message could not be rendered.
    #[error("render failed: {0}")]
    Render(String),
}

impl From<RenderError> for TransportError {
    fn from(err: RenderError) -> Self {
        Self::Render(err.0)
    }
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Recipients the server accepted.
    pub accepted: usize,
    /// Recipients the server refused.
    pub refused: usize,
    /// Final reply after the message data.
    pub reply: String,
}

/// Sends one envelope per call, keeping no session state between calls.
pub trait Transport: Send {
    /// Attempts a single delivery.
    ///
    /// # Errors
    ///
    /// Returns the failure; the caller decides about retrying.
    fn send_once(
        &mut self,
        destination: &Destination,
        envelope: &Envelope,
    ) -> std::result::Result<TransferReport, TransportError>;
}

/// Forwards SMTP session events and protocol lines into `tracing`.
#[derive(Debug, Clone)]
pub struct DriverMonitor {
    driver: String,
    destination: Destination,
}

impl DriverMonitor {
    /// Creates a monitor labelled with the driver id.
    #[must_use]
    pub fn new(driver: impl Into<String>, destination: Destination) -> Self {
        Self {
            driver: driver.into(),
            destination,
        }
    }
}

impl SessionMonitor for DriverMonitor {
    fn on_event(&self, event: &SessionEvent) {
        let (host, port) = (&self.destination.host, self.destination.port);
        match event {
            SessionEvent::Connected { server } => {
                info!(driver = %self.driver, host = %host, port, server = %server, "Connected to SMTP server");
            }
            SessionEvent::MessageSent { code } => {
                debug!(driver = %self.driver, code = code.as_u16(), "SMTP message accepted");
            }
            SessionEvent::Disconnected => {
                info!(driver = %self.driver, host = %host, port, "Disconnected from SMTP server");
            }
        }
    }

    fn on_trace(&self, direction: TraceDirection, line: &str) {
        debug!(driver = %self.driver, direction = direction.as_str(), line, "SMTP session");
    }
}

/// [`Transport`] backed by the mailpipe SMTP client.
///
/// Owns a current-thread tokio runtime and blocks the calling (worker)
/// thread for the duration of the session.
pub struct SmtpTransport {
    runtime: Runtime,
    security: Security,
    credentials: Option<(String, String)>,
    helo_name: String,
    timeout: Duration,
    monitor: Arc<dyn SessionMonitor>,
}

impl std::fmt::Debug for SmtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpTransport")
            .field("security", &self.security)
            .field("authenticated", &self.credentials.is_some())
            .field("helo_name", &self.helo_name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SmtpTransport {
    /// Creates a transport for a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built or the timeout is invalid.
    pub fn new(config: &DriverConfig, monitor: Arc<dyn SessionMonitor>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let timeout = config
            .timeout_duration()
            .ok_or_else(|| Error::Config("timeout must be a positive number of seconds".into()))?;

        Ok(Self {
            runtime,
            security: config.security,
            credentials: config.username.clone().zip(config.password.clone()),
            helo_name: config.helo_name.clone(),
            timeout,
            monitor,
        })
    }

    async fn session(
        &self,
        destination: &Destination,
        envelope: &Envelope,
    ) -> std::result::Result<TransferReport, TransportError> {
        let (host, port) = (destination.host.as_str(), destination.port);
        let stream = match self.security {
            Security::Tls => connect_tls(host, port).await,
            Security::None | Security::StartTls => connect(host, port).await,
        }
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        let client = Client::from_stream_with_monitor(stream, self.monitor.clone())
            .await
            .map_err(protocol)?;
        let mut client: Client<Connected> = client.ehlo(&self.helo_name).await.map_err(protocol)?;
        if self.security == Security::StartTls {
            client = client
                .starttls(host, &self.helo_name)
                .await
                .map_err(protocol)?;
        }

        let message = envelope.to_message();
        let from = envelope.reverse_path.clone();
        let client: Client<MailTransaction> = match &self.credentials {
            Some((user, pass)) => {
                client
                    .auth_plain(user, pass)
                    .await
                    .map_err(protocol)?
                    .mail_from(from, Some(message.len()))
                    .await
            }
            None => client.mail_from(from, Some(message.len())).await,
        }
        .map_err(protocol)?;

        let (client, statuses) = client
            .add_recipients(&envelope.recipients)
            .await
            .map_err(protocol)?;
        for status in &statuses {
            debug!(
                recipient = %status.address,
                code = status.reply.code.as_u16(),
                accepted = status.is_accepted(),
                "SMTP recipient result"
            );
        }

        let (client, reply) = client
            .data()
            .await
            .map_err(protocol)?
            .send_message(message.as_bytes())
            .await
            .map_err(protocol)?;
        debug!(reply = %reply, "SMTP message status");

        // The server already took the message; a failed QUIT does not undo that
        if let Err(e) = client.quit().await {
            debug!(error = %e, "QUIT failed after delivery");
        }

        let accepted = statuses.iter().filter(|s| s.is_accepted()).count();
        Ok(TransferReport {
            accepted,
            refused: statuses.len() - accepted,
            reply: reply.to_string(),
        })
    }
}

fn protocol(err: mailpipe_smtp::Error) -> TransportError {
    TransportError::Protocol(err.to_string())
}

impl Transport for SmtpTransport {
    fn send_once(
        &mut self,
        destination: &Destination,
        envelope: &Envelope,
    ) -> std::result::Result<TransferReport, TransportError> {
        let deadline = self.timeout;
        self.runtime.block_on(async {
            tokio::time::timeout(deadline, self.session(destination, envelope))
                .await
                .map_err(|_| TransportError::Timeout(deadline))?
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{MailboxConfig, RecipientConfig, RecipientKind};
    use mailpipe_smtp::Address;
    use std::net::TcpListener;

    fn envelope() -> Envelope {
        Envelope {
            reverse_path: Address::new("syslog@example.com").unwrap(),
            recipients: vec![Address::new("ops@example.com").unwrap()],
            headers: vec![("Subject".into(), "test".into())],
            body: "hello".into(),
        }
    }

    fn transport(timeout: f64) -> SmtpTransport {
        let config = DriverConfig {
            from: MailboxConfig {
                phrase: None,
                address: "syslog@example.com".into(),
            },
            recipients: vec![RecipientConfig {
                kind: RecipientKind::To,
                phrase: None,
                address: "ops@example.com".into(),
            }],
            timeout,
            ..DriverConfig::default()
        };
        let destination = Destination {
            host: "127.0.0.1".into(),
            port: 25,
        };
        SmtpTransport::new(&config, Arc::new(DriverMonitor::new("test", destination))).unwrap()
    }

    #[test]
    fn refused_connection_is_connect_error() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let destination = Destination {
            host: "127.0.0.1".into(),
            port,
        };

        let err = transport(5.0)
            .send_once(&destination, &envelope())
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let destination = Destination {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
        };

        // Accepted by the kernel backlog, never greeted
        let err = transport(0.2)
            .send_once(&destination, &envelope())
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
        drop(listener);
    }

    #[test]
    fn render_error_converts() {
        let err: TransportError = RenderError("bad".into()).into();
        assert_eq!(err.to_string(), "render failed: bad");
    }
}
