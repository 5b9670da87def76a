//! SMTP response parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// Every line of a multi-line reply must carry the same code.
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code = parse_code(first)?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Reply code changed inside multi-line reply: {line}"
            )));
        }

        match line.len() {
            3 => message.push(String::new()),
            n if n >= 4 => message.push(line.get(4..).unwrap_or_default().to_string()),
            _ => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(code, message))
}

fn parse_code(line: &str) -> Result<ReplyCode> {
    let code_str = line
        .get(0..3)
        .ok_or_else(|| Error::Protocol(format!("Reply too short: {line}")))?;

    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("Invalid reply code: {code_str}")));
    }

    code_str
        .parse::<u16>()
        .map(ReplyCode::new)
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {code_str}")))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last line.
/// A bare three-digit code is also a final line.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        Some(b' ') => true,
        Some(_) => false,
        None => line.len() == 3,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_single_line_reply() {
        let lines = vec!["250 OK".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let lines = vec![
            "250-mail.example.com".to_string(),
            "250-SIZE 1000".to_string(),
            "250 STARTTLS".to_string(),
        ];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["mail.example.com", "SIZE 1000", "STARTTLS"]);
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&["354".to_string()]).unwrap();
        assert_eq!(reply.code.as_u16(), 354);
        assert_eq!(reply.message, vec![String::new()]);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&["25".to_string()]).is_err());
        assert!(parse_reply(&["ABC OK".to_string()]).is_err());
        assert!(parse_reply(&["+25 OK".to_string()]).is_err());
    }

    #[test]
    fn test_parse_error_mixed_codes() {
        let lines = vec!["250-first".to_string(), "550 second".to_string()];
        assert!(parse_reply(&lines).is_err());
    }

    proptest! {
        #[test]
        fn any_three_digit_code_is_kept(code in 100u16..600, text in "[ -~]{0,40}") {
            let line = format!("{code} {text}");
            let reply = parse_reply(&[line]).unwrap();
            prop_assert_eq!(reply.code.as_u16(), code);
            prop_assert_eq!(reply.message[0].as_str(), text.as_str());
        }
    }
}
