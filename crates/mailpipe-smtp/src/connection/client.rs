//! Type-state SMTP client.

use super::{RecipientStatus, ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::monitor::{NoopMonitor, SessionEvent, SessionMonitor, TraceDirection};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for at least one recipient accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    monitor: Arc<dyn SessionMonitor>,
    _state: PhantomData<State>,
}

impl<S> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("stream", &self.stream)
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(stream: SmtpStream) -> Result<Self> {
        Self::from_stream_with_monitor(stream, Arc::new(NoopMonitor)).await
    }

    /// Creates a client that reports events and protocol lines to `monitor`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream_with_monitor(
        stream: SmtpStream,
        monitor: Arc<dyn SessionMonitor>,
    ) -> Result<Self> {
        let mut client = Self {
            stream,
            server_info: ServerInfo::default(),
            monitor,
            _state: PhantomData,
        };

        let greeting = client.read_reply().await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(greeting.into());
        }

        // Hostname is the first word after the code
        client.server_info.hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();

        client.monitor.on_event(&SessionEvent::Connected {
            server: client.server_info.hostname.clone(),
        });
        Ok(client)
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.discover_extensions(client_hostname).await?;
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, server_hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.expect_success(Command::StartTls).await?;
        self.stream = self.stream.upgrade_to_tls(server_hostname).await?;

        // Capabilities may differ once the channel is encrypted
        self.discover_extensions(client_hostname).await?;
        Ok(self)
    }

    /// Authenticates using PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not offer PLAIN or rejects the credentials.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        match self.server_info.auth_mechanisms() {
            None => return Err(Error::NotSupported("AUTH".into())),
            Some(mechanisms) if !mechanisms.contains(&AuthMechanism::Plain) => {
                return Err(Error::NotSupported("AUTH PLAIN".into()));
            }
            Some(_) => {}
        }

        // PLAIN response: \0username\0password
        let credentials = format!("\0{username}\0{password}");
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());

        self.expect_success(Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(encoded),
        })
        .await?;

        Ok(self.transition())
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the message is larger than the server allows or
    /// if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: Option<usize>) -> Result<Client<MailTransaction>> {
        self.start_transaction(from, size).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is larger than the server allows or
    /// if the MAIL FROM command fails.
    pub async fn mail_from(self, from: Address, size: Option<usize>) -> Result<Client<MailTransaction>> {
        self.start_transaction(from, size).await
    }
}

impl Client<MailTransaction> {
    /// Issues RCPT TO for every recipient and records each answer.
    ///
    /// Refused recipients do not abort the transaction; it proceeds as long
    /// as at least one recipient was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRecipientsAccepted`] if every recipient was refused
    /// (the session is closed with QUIT first), or an I/O or protocol error.
    pub async fn add_recipients(
        mut self,
        recipients: &[Address],
    ) -> Result<(Client<RecipientAdded>, Vec<RecipientStatus>)> {
        let mut statuses = Vec::with_capacity(recipients.len());
        for to in recipients {
            let reply = self
                .send_command(Command::RcptTo { to: to.clone() })
                .await?;
            statuses.push(RecipientStatus {
                address: to.clone(),
                reply,
            });
        }

        if statuses.iter().any(RecipientStatus::is_accepted) {
            return Ok((self.transition(), statuses));
        }

        // Nothing to deliver to; leave politely, the refusal is what matters
        let _ = self.quit().await;
        Err(Error::NoRecipientsAccepted(statuses))
    }
}

impl Client<RecipientAdded> {
    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(reply.into());
        }

        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted. Line endings are normalized to
    /// CRLF, lines starting with "." are dot-stuffed and the terminating "."
    /// line is added automatically. Returns the server's final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<(Client<Connected>, Reply)> {
        let payload = encode_data(message);

        for line in message.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                // Headers end at the first blank line; the body is not traced
                break;
            }
            self.monitor
                .on_trace(TraceDirection::Client, &String::from_utf8_lossy(line));
        }

        self.stream.write_all(&payload).await?;
        let reply = self.read_reply().await?;

        if !reply.is_success() {
            return Err(reply.into());
        }

        self.monitor
            .on_event(&SessionEvent::MessageSent { code: reply.code });
        Ok((self.transition(), reply))
    }
}

/// Normalizes line endings, dot-stuffs and appends the end-of-data marker.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let message = message.strip_suffix(b"\n").unwrap_or(message);
    let message = message.strip_suffix(b"\r").unwrap_or(message);

    let mut payload = Vec::with_capacity(message.len() + 64);
    if !message.is_empty() {
        for line in message.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                payload.push(b'.');
            }
            payload.extend_from_slice(line);
            payload.extend_from_slice(b"\r\n");
        }
    }
    payload.extend_from_slice(b".\r\n");
    payload
}

// Common implementation for all states
impl<S> Client<S> {
    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            monitor: self.monitor,
            _state: PhantomData,
        }
    }

    async fn start_transaction(
        mut self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        let advertised = self.server_info.max_message_size();
        if let (Some(size), Some(limit)) = (size, advertised)
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        // Only pass SIZE when the server announced the extension
        let size = size.filter(|_| {
            self.server_info
                .extensions
                .iter()
                .any(|ext| matches!(ext, Extension::Size(_)))
        });

        self.expect_success(Command::MailFrom { from, size }).await?;
        Ok(self.transition())
    }

    async fn discover_extensions(&mut self, client_hostname: &str) -> Result<()> {
        let reply = self
            .expect_success(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        // First line is the greeting, the rest are extensions
        self.server_info.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect::<HashSet<_>>();
        Ok(())
    }

    async fn expect_success(&mut self, cmd: Command) -> Result<Reply> {
        let reply = self.send_command(cmd).await?;
        if !reply.is_success() {
            return Err(reply.into());
        }
        Ok(reply)
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        self.monitor
            .on_trace(TraceDirection::Client, &cmd.trace_line());
        self.stream.write_all(&cmd.serialize()).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.stream.read_line().await?;
            if line.is_empty() {
                continue;
            }

            self.monitor.on_trace(TraceDirection::Server, &line);
            let is_last = is_last_reply_line(&line);
            lines.push(line);

            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if !reply.is_success() {
            return Err(reply.into());
        }

        self.monitor.on_event(&SessionEvent::Disconnected);
        Ok(())
    }
}
