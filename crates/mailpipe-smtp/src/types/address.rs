//! Email address types.

use std::fmt;

use crate::error::{Error, Result};

/// Email address for SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Validates an email address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
            return Err(Error::InvalidAddress(format!(
                "Address contains whitespace or angle brackets: {addr}"
            )));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("Address must contain @: {addr}")));
        };

        if domain.contains('@') {
            return Err(Error::InvalidAddress(format!(
                "Address must have exactly one @: {addr}"
            )));
        }

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "Local and domain parts cannot be empty: {addr}"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mailbox (optional display name + address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a new mailbox with just an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: None,
            address: Address::new(address)?,
        })
    }

    /// Creates a new mailbox with a display name and address.
    ///
    /// An empty name is treated as no name.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Ok(Self {
            name: (!name.trim().is_empty()).then_some(name),
            address: Address::new(address)?,
        })
    }
}

/// Characters that force a display name into a quoted-string (RFC 5322 `specials`).
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

impl fmt::Display for Mailbox {
    /// Formats the mailbox for use in a `From`/`To`/`Cc` header.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(name) = &self.name else {
            return write!(f, "<{}>", self.address);
        };

        if name.contains(SPECIALS) {
            let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
            write!(f, "\"{escaped}\" <{}>", self.address)
        } else {
            write!(f, "{name} <{}>", self.address)
        }
    }
}
