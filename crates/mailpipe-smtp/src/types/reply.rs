//! SMTP reply types.

use std::fmt;

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Reply message lines.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code.class(), ReplyClass::Completed)
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message.join(" "))
    }
}

impl From<Reply> for crate::Error {
    fn from(reply: Reply) -> Self {
        Self::smtp_error(reply.code.as_u16(), reply.message_text())
    }
}

/// First digit of a reply code (RFC 5321 section 4.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyClass {
    /// 2xx
    Completed,
    /// 3xx
    Intermediate,
    /// 4xx; worth retrying later.
    Transient,
    /// 5xx
    Permanent,
    /// Anything outside 200..=599.
    Unknown,
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 251 User not local; will forward
    pub const FORWARD: Self = Self(251);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 550 Mailbox unavailable
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);

    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Classifies the code by its first digit.
    #[must_use]
    pub const fn class(self) -> ReplyClass {
        match self.0 / 100 {
            2 => ReplyClass::Completed,
            3 => ReplyClass::Intermediate,
            4 => ReplyClass::Transient,
            5 => ReplyClass::Permanent,
            _ => ReplyClass::Unknown,
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn class_follows_first_digit() {
        assert_eq!(ReplyCode::CLOSING.class(), ReplyClass::Completed);
        assert_eq!(ReplyCode::FORWARD.class(), ReplyClass::Completed);
        assert_eq!(ReplyCode::START_DATA.class(), ReplyClass::Intermediate);
        assert_eq!(ReplyCode::new(421).class(), ReplyClass::Transient);
        assert_eq!(ReplyCode::MAILBOX_UNAVAILABLE.class(), ReplyClass::Permanent);
        assert_eq!(ReplyCode::new(99).class(), ReplyClass::Unknown);
        assert_eq!(ReplyCode::new(600).class(), ReplyClass::Unknown);
    }

    #[test]
    fn only_completed_replies_succeed() {
        assert!(Reply::new(ReplyCode::OK, vec![]).is_success());
        assert!(!Reply::new(ReplyCode::START_DATA, vec![]).is_success());
    }

    #[test]
    fn converts_to_error_with_all_lines() {
        let reply = Reply::new(
            ReplyCode::new(452),
            vec!["4.3.1 Insufficient".into(), "system storage".into()],
        );
        let err = crate::Error::from(reply);
        assert_eq!(err.smtp_code(), Some(452));
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "SMTP error 452: 4.3.1 Insufficient\nsystem storage");
    }

    #[test]
    fn display_joins_lines() {
        let reply = Reply::new(ReplyCode::OK, vec!["2.0.0".into(), "queued as 42".into()]);
        assert_eq!(reply.to_string(), "250 2.0.0 queued as 42");
    }
}
