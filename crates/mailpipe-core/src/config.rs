//! Driver configuration.

use std::path::Path;
use std::time::Duration;

use mailpipe_smtp::{Address, Mailbox};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Connection security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// Plain SMTP.
    #[default]
    None,
    /// Implicit TLS.
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

/// Role of a configured address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecipientKind {
    /// `To` header and envelope recipient.
    To,
    /// `Cc` header and envelope recipient.
    Cc,
    /// Envelope recipient only.
    Bcc,
    /// `Reply-To` header only.
    ReplyTo,
}

impl RecipientKind {
    /// Returns true if the address receives a copy of the message.
    #[must_use]
    pub const fn is_envelope_recipient(self) -> bool {
        matches!(self, Self::To | Self::Cc | Self::Bcc)
    }

    /// Header the address is listed in, if any.
    #[must_use]
    pub const fn header_name(self) -> Option<&'static str> {
        match self {
            Self::To => Some("To"),
            Self::Cc => Some("Cc"),
            Self::ReplyTo => Some("Reply-To"),
            Self::Bcc => None,
        }
    }
}

/// A display phrase and an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Display name.
    #[serde(default)]
    pub phrase: Option<String>,
    /// Mail address.
    pub address: String,
}

impl MailboxConfig {
    /// Parses into a mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn to_mailbox(&self) -> mailpipe_smtp::Result<Mailbox> {
        match &self.phrase {
            Some(phrase) => Mailbox::with_name(phrase.as_str(), self.address.as_str()),
            None => Mailbox::new(self.address.as_str()),
        }
    }

    /// Parses the address alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn to_address(&self) -> mailpipe_smtp::Result<Address> {
        Address::new(self.address.as_str())
    }

    fn wash(&mut self) {
        self.address = wash(&self.address);
        if let Some(phrase) = &mut self.phrase {
            *phrase = wash(phrase);
        }
    }
}

/// A configured recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientConfig {
    /// Role.
    pub kind: RecipientKind,
    /// Display name.
    #[serde(default)]
    pub phrase: Option<String>,
    /// Mail address.
    pub address: String,
}

impl RecipientConfig {
    /// Phrase and address as a [`MailboxConfig`].
    #[must_use]
    pub fn mailbox(&self) -> MailboxConfig {
        MailboxConfig {
            phrase: self.phrase.clone(),
            address: self.address.clone(),
        }
    }
}

/// A custom header whose value is a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Header name.
    pub name: String,
    /// Value template.
    pub value: String,
}

/// Headers the driver owns.
const RESERVED_HEADERS: [&str; 7] = ["to", "cc", "bcc", "from", "sender", "reply-to", "date"];

/// SMTP destination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Connection security.
    pub security: Security,
    /// AUTH PLAIN username.
    pub username: Option<String>,
    /// AUTH PLAIN password.
    pub password: Option<String>,
    /// Name sent with EHLO.
    pub helo_name: String,
    /// Sender.
    pub from: MailboxConfig,
    /// Recipients and reply-to addresses.
    pub recipients: Vec<RecipientConfig>,
    /// Subject template.
    pub subject: String,
    /// Body template.
    pub body: String,
    /// Custom headers.
    pub headers: Vec<HeaderConfig>,
    /// Seconds to wait after a failed delivery before retrying.
    pub time_reopen: f64,
    /// Seconds one delivery attempt may take.
    pub timeout: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25,
            security: Security::None,
            username: None,
            password: None,
            helo_name: "localhost".to_string(),
            from: MailboxConfig::default(),
            recipients: Vec::new(),
            subject: "syslog-ng message from $HOST".to_string(),
            body: "$MSG".to_string(),
            headers: Vec::new(),
            time_reopen: 60.0,
            timeout: 30.0,
        }
    }
}

/// A configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Host is empty.
    EmptyHost,
    /// Port is 0.
    InvalidPort,
    /// Sender address is missing or malformed.
    InvalidFrom(String),
    /// No To, Cc or Bcc recipient.
    NoRecipients,
    /// A recipient address is malformed.
    InvalidRecipient(String),
    /// A custom header uses a name the driver owns.
    ReservedHeader(String),
    /// A custom header name is empty or contains invalid characters.
    InvalidHeaderName(String),
    /// `time_reopen` is not a positive number of seconds.
    InvalidTimeReopen,
    /// `timeout` is not a positive number of seconds.
    InvalidTimeout,
    /// Only one of username and password is set.
    IncompleteCredentials,
}

impl ValidationError {
    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyHost => "host",
            Self::InvalidPort => "port",
            Self::InvalidFrom(_) => "from",
            Self::NoRecipients | Self::InvalidRecipient(_) => "recipients",
            Self::ReservedHeader(_) | Self::InvalidHeaderName(_) => "headers",
            Self::InvalidTimeReopen => "time_reopen",
            Self::InvalidTimeout => "timeout",
            Self::IncompleteCredentials => "username",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyHost => write!(f, "SMTP host is required"),
            Self::InvalidPort => write!(f, "SMTP port must be 1-65535"),
            Self::InvalidFrom(addr) => write!(f, "invalid sender address '{addr}'"),
            Self::NoRecipients => write!(f, "at least one To, Cc or Bcc recipient is required"),
            Self::InvalidRecipient(addr) => write!(f, "invalid recipient address '{addr}'"),
            Self::ReservedHeader(name) => {
                write!(f, "header '{name}' is set by the driver and cannot be overridden")
            }
            Self::InvalidHeaderName(name) => write!(f, "invalid header name '{name}'"),
            Self::InvalidTimeReopen => write!(f, "time_reopen must be a positive number of seconds"),
            Self::InvalidTimeout => write!(f, "timeout must be a positive number of seconds"),
            Self::IncompleteCredentials => {
                write!(f, "username and password must be set together")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating a configuration.
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

impl DriverConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Name identifying the destination: `smtp,<host>,<port>`.
    #[must_use]
    pub fn persist_name(&self) -> String {
        format!("smtp,{},{}", self.host, self.port)
    }

    /// Returns a copy with CR and LF replaced by spaces in every address
    /// and phrase.
    #[must_use]
    pub fn washed(&self) -> Self {
        let mut config = self.clone();
        config.from.wash();
        for rcpt in &mut config.recipients {
            rcpt.address = wash(&rcpt.address);
            if let Some(phrase) = &mut rcpt.phrase {
                *phrase = wash(phrase);
            }
        }
        config
    }

    /// Checks the configuration, collecting every problem.
    ///
    /// # Errors
    ///
    /// Returns all validation errors found.
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost);
        }
        if self.port == 0 {
            errors.push(ValidationError::InvalidPort);
        }

        if self.from.to_address().is_err() {
            errors.push(ValidationError::InvalidFrom(self.from.address.clone()));
        }

        for rcpt in &self.recipients {
            if Address::new(rcpt.address.as_str()).is_err() {
                errors.push(ValidationError::InvalidRecipient(rcpt.address.clone()));
            }
        }
        if !self
            .recipients
            .iter()
            .any(|rcpt| rcpt.kind.is_envelope_recipient())
        {
            errors.push(ValidationError::NoRecipients);
        }

        for header in &self.headers {
            if !is_valid_header_name(&header.name) {
                errors.push(ValidationError::InvalidHeaderName(header.name.clone()));
            } else if RESERVED_HEADERS.contains(&header.name.to_ascii_lowercase().as_str()) {
                errors.push(ValidationError::ReservedHeader(header.name.clone()));
            }
        }

        if self.time_reopen_duration().is_none() {
            errors.push(ValidationError::InvalidTimeReopen);
        }
        if self.timeout_duration().is_none() {
            errors.push(ValidationError::InvalidTimeout);
        }
        if self.username.is_some() != self.password.is_some() {
            errors.push(ValidationError::IncompleteCredentials);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validates and returns the washed configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every validation error.
    pub fn checked(&self) -> Result<Self> {
        let config = self.washed();
        config.validate().map_err(|errors| {
            Error::Config(
                errors
                    .iter()
                    .map(|e| format!("{}: {e}", e.field()))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        Ok(config)
    }

    /// Cooldown after a failed delivery.
    #[must_use]
    pub fn time_reopen_duration(&self) -> Option<Duration> {
        positive_seconds(self.time_reopen)
    }

    /// Deadline of one delivery attempt.
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        positive_seconds(self.timeout)
    }
}

fn positive_seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

/// Replaces CR and LF with spaces.
#[must_use]
pub fn wash(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
