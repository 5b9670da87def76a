//! SMTP extension types.

/// SMTP extensions discovered from EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication
    Auth(Vec<AuthMechanism>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// Unknown extension
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from EHLO response.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(parts.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(parts.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn parse_starttls_any_case() {
        assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
    }

    #[test]
    fn parse_auth_skips_unknown_mechanisms() {
        assert_eq!(
            Extension::parse("AUTH CRAM-MD5 PLAIN LOGIN"),
            Extension::Auth(vec![AuthMechanism::Plain, AuthMechanism::Login])
        );
    }

    #[test]
    fn parse_size_with_and_without_limit() {
        assert_eq!(Extension::parse("SIZE 10240000"), Extension::Size(Some(10_240_000)));
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
    }

    #[test]
    fn parse_unknown_keeps_line() {
        assert_eq!(
            Extension::parse("X-VENDOR thing"),
            Extension::Unknown("X-VENDOR thing".to_string())
        );
        assert_eq!(Extension::parse(""), Extension::Unknown(String::new()));
    }

    #[test]
    fn mechanism_names() {
        assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
        assert_eq!(AuthMechanism::Login.as_str(), "LOGIN");
    }
}
