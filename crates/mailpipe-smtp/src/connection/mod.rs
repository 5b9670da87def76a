//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, SmtpConnection,
};
pub use stream::{SmtpStream, connect, connect_tls};

use crate::types::{Address, Extension, Reply};
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    ///
    /// `SIZE 0` means "no fixed limit" and is reported as `None`.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(Some(size)) if *size > 0 => Some(*size),
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms, or `None` without AUTH.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<&[crate::types::AuthMechanism]> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
            _ => None,
        })
    }
}

/// Server answer to one RCPT TO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientStatus {
    /// Recipient the command was issued for.
    pub address: Address,
    /// Reply returned by the server.
    pub reply: Reply,
}

impl RecipientStatus {
    /// Returns true if the server accepted the recipient.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.reply.is_success()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{AuthMechanism, ReplyCode};

    #[test]
    fn size_zero_means_unlimited() {
        let mut info = ServerInfo::default();
        info.extensions.insert(Extension::Size(Some(0)));
        assert_eq!(info.max_message_size(), None);

        info.extensions.insert(Extension::Size(Some(1024)));
        assert_eq!(info.max_message_size(), Some(1024));
    }

    #[test]
    fn auth_mechanisms_absent_without_auth() {
        let mut info = ServerInfo::default();
        assert!(info.auth_mechanisms().is_none());

        info.extensions
            .insert(Extension::Auth(vec![AuthMechanism::Login]));
        assert_eq!(info.auth_mechanisms(), Some(&[AuthMechanism::Login][..]));
    }

    #[test]
    fn recipient_status_acceptance() {
        let status = RecipientStatus {
            address: Address::new("ops@example.com").unwrap(),
            reply: Reply::new(ReplyCode::FORWARD, vec!["will forward".into()]),
        };
        assert!(status.is_accepted());

        let refused = RecipientStatus {
            reply: Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, vec!["no such user".into()]),
            ..status
        };
        assert!(!refused.is_accepted());
    }

    #[test]
    fn acceptance_is_usable_in_const_context() {
        const fn accepted(status: &RecipientStatus) -> bool {
            status.is_accepted()
        }
        let status = RecipientStatus {
            address: Address::new("ops@example.com").unwrap(),
            reply: Reply::new(ReplyCode::OK, vec![]),
        };
        assert!(accepted(&status));
    }
}
