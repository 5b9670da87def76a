//! Turning a log message into an SMTP envelope.

use std::fmt::Write;

use mailpipe_smtp::{Address, Mailbox};
use thiserror::Error;

use crate::config::{DriverConfig, RecipientKind, wash};
use crate::error::{Error, Result};
use crate::message::{LogMessage, SequenceNumber};
use crate::template::Template;

/// Why a message could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

/// Everything one SMTP transaction needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// MAIL FROM address.
    pub reverse_path: Address,
    /// RCPT TO addresses, in configuration order.
    pub recipients: Vec<Address>,
    /// Header fields, in output order.
    pub headers: Vec<(String, String)>,
    /// Message body.
    pub body: String,
}

impl Envelope {
    /// Value of the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// RFC 5322 message text: headers, a blank line, then the body.
    #[must_use]
    pub fn to_message(&self) -> String {
        let mut message = String::with_capacity(self.body.len() + 512);
        for (name, value) in &self.headers {
            let _ = write!(message, "{name}: {value}\r\n");
        }
        message.push_str("\r\n");
        message.push_str(&self.body);
        message
    }
}

/// Produces the envelope for one message.
pub trait EnvelopeRenderer: Send + Sync {
    /// Renders `msg` with the given sequence number.
    ///
    /// # Errors
    ///
    /// A render error fails the delivery attempt like a transport error.
    fn render(&self, msg: &LogMessage, seq: SequenceNumber) -> std::result::Result<Envelope, RenderError>;
}

/// Renders envelopes from the driver configuration.
///
/// Addresses and the From/To/Cc/Reply-To header values are built once here;
/// only the subject, body and custom header templates are evaluated per
/// message.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    reverse_path: Address,
    recipients: Vec<Address>,
    fixed_headers: Vec<(String, String)>,
    subject: Template,
    body: Template,
    custom_headers: Vec<(String, Template)>,
}

impl TemplateRenderer {
    /// Builds a renderer from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid or a template does not
    /// compile.
    pub fn new(config: &DriverConfig) -> Result<Self> {
        let invalid = |e: mailpipe_smtp::Error| Error::Config(e.to_string());

        let from = config.from.to_mailbox().map_err(invalid)?;
        let mut fixed_headers = vec![("From".to_string(), from.to_string())];

        let mut recipients = Vec::new();
        for kind in [RecipientKind::To, RecipientKind::Cc, RecipientKind::ReplyTo] {
            let mailboxes = config
                .recipients
                .iter()
                .filter(|rcpt| rcpt.kind == kind)
                .map(|rcpt| rcpt.mailbox().to_mailbox())
                .collect::<mailpipe_smtp::Result<Vec<Mailbox>>>()
                .map_err(invalid)?;
            if let (Some(name), false) = (kind.header_name(), mailboxes.is_empty()) {
                let value = mailboxes
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                fixed_headers.push((name.to_string(), value));
            }
        }
        for rcpt in &config.recipients {
            if rcpt.kind.is_envelope_recipient() {
                recipients.push(Address::new(rcpt.address.as_str()).map_err(invalid)?);
            }
        }

        let custom_headers = config
            .headers
            .iter()
            .map(|h| Ok((h.name.clone(), Template::compile(&h.value)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            reverse_path: from.address,
            recipients,
            fixed_headers,
            subject: Template::compile(&config.subject)?,
            body: Template::compile(&config.body)?,
            custom_headers,
        })
    }
}

impl EnvelopeRenderer for TemplateRenderer {
    fn render(&self, msg: &LogMessage, seq: SequenceNumber) -> std::result::Result<Envelope, RenderError> {
        let mut headers = self.fixed_headers.clone();
        headers.push(("Subject".to_string(), wash(&self.subject.render(msg, seq))));
        headers.push(("Date".to_string(), msg.timestamp().to_rfc2822()));
        headers.push((
            "Message-ID".to_string(),
            format!(
                "<{}.{}.{}@{}>",
                msg.timestamp().timestamp(),
                seq,
                std::process::id(),
                self.reverse_path.domain()
            ),
        ));
        headers.push((
            "X-Mailer".to_string(),
            format!("mailpipe {}", env!("CARGO_PKG_VERSION")),
        ));

        for (name, template) in &self.custom_headers {
            let value = wash(&template.render(msg, seq));
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value,
                None => headers.push((name.clone(), value)),
            }
        }

        let body = self.body.render(msg, seq);
        if body.contains('\0') {
            return Err(RenderError("rendered body contains a NUL byte".into()));
        }

        Ok(Envelope {
            reverse_path: self.reverse_path.clone(),
            recipients: self.recipients.clone(),
            headers,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::needless_collect)]
mod tests {
    use super::*;
    use crate::config::{HeaderConfig, MailboxConfig, RecipientConfig};

    fn rcpt(kind: RecipientKind, phrase: Option<&str>, address: &str) -> RecipientConfig {
        RecipientConfig {
            kind,
            phrase: phrase.map(String::from),
            address: address.into(),
        }
    }

    fn config() -> DriverConfig {
        DriverConfig {
            from: MailboxConfig {
                phrase: Some("Log Daemon".into()),
                address: "syslog@example.com".into(),
            },
            recipients: vec![
                rcpt(RecipientKind::To, Some("Ops"), "ops@example.com"),
                rcpt(RecipientKind::To, None, "noc@example.com"),
                rcpt(RecipientKind::Cc, None, "audit@example.com"),
                rcpt(RecipientKind::Bcc, None, "archive@example.com"),
                rcpt(RecipientKind::ReplyTo, None, "helpdesk@example.com"),
            ],
            subject: "[$LEVEL] $HOST".into(),
            body: "$MSG".into(),
            headers: vec![
                HeaderConfig {
                    name: "X-Seq".into(),
                    value: "$SEQNUM".into(),
                },
                HeaderConfig {
                    name: "x-mailer".into(),
                    value: "custom".into(),
                },
            ],
            ..DriverConfig::default()
        }
    }

    #[test]
    fn envelope_and_headers() {
        let renderer = TemplateRenderer::new(&config()).unwrap();
        let msg = LogMessage::new("disk full")
            .with_host("web01")
            .with_priority(1, 3);
        let env = renderer.render(&msg, SequenceNumber::FIRST).unwrap();

        assert_eq!(env.reverse_path.as_str(), "syslog@example.com");
        let rcpts: Vec<_> = env.recipients.iter().map(Address::as_str).collect();
        assert_eq!(
            rcpts,
            vec![
                "ops@example.com",
                "noc@example.com",
                "audit@example.com",
                "archive@example.com"
            ]
        );

        assert_eq!(env.header("From"), Some("Log Daemon <syslog@example.com>"));
        assert_eq!(
            env.header("To"),
            Some("Ops <ops@example.com>, <noc@example.com>")
        );
        assert_eq!(env.header("Cc"), Some("<audit@example.com>"));
        assert_eq!(env.header("Reply-To"), Some("<helpdesk@example.com>"));
        assert_eq!(env.header("Bcc"), None);
        assert_eq!(env.header("Subject"), Some("[err] web01"));
        assert_eq!(env.header("X-Seq"), Some("1"));
        assert_eq!(env.header("X-Mailer"), Some("custom"));
        assert_eq!(env.body, "disk full");

        let message_id = env.header("Message-ID").unwrap();
        assert!(message_id.ends_with("@example.com>"));
        assert!(message_id.contains(&format!(".1.{}@", std::process::id())));
    }

    #[test]
    fn subject_is_washed() {
        let renderer = TemplateRenderer::new(&config()).unwrap();
        let msg = LogMessage::new("x").with_host("a\r\nBcc: evil@example.com");
        let env = renderer.render(&msg, SequenceNumber::FIRST).unwrap();
        assert!(!env.header("Subject").unwrap().contains('\n'));
    }

    #[test]
    fn message_text_layout() {
        let renderer = TemplateRenderer::new(&config()).unwrap();
        let env = renderer
            .render(&LogMessage::new("line one"), SequenceNumber::FIRST)
            .unwrap();
        let text = env.to_message();
        assert!(text.starts_with("From: Log Daemon <syslog@example.com>\r\n"));
        assert!(text.ends_with("\r\n\r\nline one"));
    }

    #[test]
    fn nul_in_body_fails_render() {
        let renderer = TemplateRenderer::new(&config()).unwrap();
        let err = renderer
            .render(&LogMessage::new("bad\0byte"), SequenceNumber::FIRST)
            .unwrap_err();
        assert!(err.0.contains("NUL"));
    }

    #[test]
    fn bad_template_is_config_error() {
        let mut cfg = config();
        cfg.body = "${MSG".into();
        assert!(matches!(
            TemplateRenderer::new(&cfg),
            Err(Error::Template(_))
        ));
    }
}
