//! Message templates.
//!
//! A template is literal text with macro references: `$NAME` (letters,
//! digits and `_`) or `${NAME}` (anything up to the closing brace). `$$`
//! produces a single `$`; a `$` followed by anything else is kept as is.
//!
//! Built-in macros:
//!
//! | Macro | Value |
//! |---|---|
//! | `MSG`, `MESSAGE` | message text |
//! | `HOST` | originating host |
//! | `PROGRAM` | program name |
//! | `PID` | process id (empty if unknown) |
//! | `FACILITY` | facility keyword |
//! | `PRIORITY`, `LEVEL` | severity keyword |
//! | `SEQNUM` | driver sequence number |
//! | `DATE` | `Oct 17 09:15:02` |
//! | `ISODATE` | RFC 3339 timestamp |
//! | `UNIXTIME` | seconds since the epoch |
//!
//! Any other name is looked up in the message's name-value pairs and renders
//! empty when absent.

use std::fmt::Write;

use thiserror::Error;

use crate::message::{LogMessage, SequenceNumber};

/// Template compilation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// `${` without a closing brace.
    #[error("unterminated macro reference at offset {0}")]
    Unterminated(usize),
    /// `${}`.
    #[error("empty macro name at offset {0}")]
    EmptyName(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Macro {
    Message,
    Host,
    Program,
    Pid,
    Facility,
    Level,
    SeqNum,
    Date,
    IsoDate,
    UnixTime,
    Value(String),
}

impl Macro {
    fn from_name(name: &str) -> Self {
        match name {
            "MSG" | "MESSAGE" => Self::Message,
            "HOST" => Self::Host,
            "PROGRAM" => Self::Program,
            "PID" => Self::Pid,
            "FACILITY" => Self::Facility,
            "PRIORITY" | "LEVEL" => Self::Level,
            "SEQNUM" => Self::SeqNum,
            "DATE" => Self::Date,
            "ISODATE" => Self::IsoDate,
            "UNIXTIME" => Self::UnixTime,
            other => Self::Value(other.to_string()),
        }
    }

    fn render(&self, msg: &LogMessage, seq: SequenceNumber, out: &mut String) {
        // Writing into a String cannot fail
        let _ = match self {
            Self::Message => write!(out, "{}", msg.message()),
            Self::Host => write!(out, "{}", msg.host()),
            Self::Program => write!(out, "{}", msg.program()),
            Self::Pid => match msg.pid() {
                Some(pid) => write!(out, "{pid}"),
                None => Ok(()),
            },
            Self::Facility => write!(out, "{}", msg.facility_name()),
            Self::Level => write!(out, "{}", msg.severity_name()),
            Self::SeqNum => write!(out, "{seq}"),
            Self::Date => write!(out, "{}", msg.timestamp().format("%b %e %H:%M:%S")),
            Self::IsoDate => write!(out, "{}", msg.timestamp().to_rfc3339()),
            Self::UnixTime => write!(out, "{}", msg.timestamp().timestamp()),
            Self::Value(name) => write!(out, "{}", msg.value(name).unwrap_or_default()),
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Macro(Macro),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compiles `source`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unterminated or empty `${...}` reference.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            if c != '$' {
                literal.push(c);
                continue;
            }

            let name = match chars.peek() {
                Some((_, '$')) => {
                    chars.next();
                    literal.push('$');
                    continue;
                }
                Some((_, '{')) => {
                    chars.next();
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, c)) => name.push(c),
                            None => return Err(TemplateError::Unterminated(offset)),
                        }
                    }
                    if name.is_empty() {
                        return Err(TemplateError::EmptyName(offset));
                    }
                    name
                }
                Some((_, c)) if c.is_ascii_alphanumeric() || *c == '_' => {
                    let mut name = String::new();
                    while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_') {
                        name.push(c);
                    }
                    name
                }
                _ => {
                    literal.push('$');
                    continue;
                }
            };

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Macro(Macro::from_name(&name)));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Source text the template was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the template for one message.
    #[must_use]
    pub fn render(&self, msg: &LogMessage, seq: SequenceNumber) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Macro(m) => m.render(msg, seq, &mut out),
            }
        }
        out
    }
}
