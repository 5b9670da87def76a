//! SMTP command builder.

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.to_line().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command line as it should appear in a protocol trace.
    ///
    /// Credentials sent with AUTH are masked.
    #[must_use]
    pub fn trace_line(&self) -> String {
        match self {
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => format!("AUTH {} ****", mechanism.as_str()),
            _ => self.to_line(),
        }
    }

    fn to_line(&self) -> String {
        match self {
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(resp) => format!("AUTH {} {resp}", mechanism.as_str()),
                None => format!("AUTH {}", mechanism.as_str()),
            },
            Self::MailFrom { from, size } => match size {
                Some(size) => format!("MAIL FROM:<{from}> SIZE={size}"),
                None => format!("MAIL FROM:<{from}>"),
            },
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ehlo_command() {
        let cmd = Command::Ehlo {
            hostname: "loghost.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"EHLO loghost.example.com\r\n");
    }

    #[test]
    fn test_auth_plain_is_masked_in_trace() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.trace_line(), "AUTH PLAIN ****");
    }

    #[test]
    fn test_mail_from_with_size() {
        let from = Address::new("syslog@example.com").unwrap();
        let plain = Command::MailFrom {
            from: from.clone(),
            size: None,
        };
        let sized = Command::MailFrom {
            from,
            size: Some(12345),
        };
        assert_eq!(plain.serialize(), b"MAIL FROM:<syslog@example.com>\r\n");
        assert_eq!(
            sized.serialize(),
            b"MAIL FROM:<syslog@example.com> SIZE=12345\r\n"
        );
    }

    #[test]
    fn test_rcpt_to_command() {
        let cmd = Command::RcptTo {
            to: Address::new("admin@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<admin@example.com>\r\n");
        assert_eq!(cmd.trace_line(), "RCPT TO:<admin@example.com>");
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }
}
