//! Error types for SMTP operations.

use std::io;

use crate::connection::RecipientStatus;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected or malformed response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message exceeds the SIZE advertised by the server.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the rejected message.
        size: usize,
        /// Limit advertised in the EHLO response.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// Every RCPT TO of the transaction was refused.
    #[error("No recipient accepted ({} refused)", .0.len())]
    NoRecipientsAccepted(Vec<RecipientStatus>),

    /// Connection closed by the server.
    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns the server reply code, if the error came from a reply.
    #[must_use]
    pub const fn smtp_code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }
}
