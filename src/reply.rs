//! Keyword/value decoding of control port reply bodies.
//!
//! A body such as
//!
//! ```text
//! PROTOCOLINFO 1
//! AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE="/var/lib/tor/control_auth_cookie"
//! VERSION Tor="0.4.8.10"
//! OK
//! ```
//!
//! decodes to `{METHODS: "COOKIE,SAFECOOKIE", COOKIEFILE: "/var/lib/tor/control_auth_cookie",
//! Tor: "0.4.8.10"}`. Bare words carry no parameters and are dropped. Raw reply lines still
//! carrying their `250-` style status prefixes decode the same way.

use crate::error::TorError;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::iter::Peekable;

/// Decode every `KEY=VALUE` token of a reply body.
///
/// Values are split on the first `=` only, so base64 padding survives. Quoted values may contain
/// whitespace and backslash escapes; they are returned unquoted. A repeated key keeps its last
/// value.
pub fn parse_reply(body: &str) -> Result<HashMap<String, String>, TorError> {
    lazy_static! {
        static ref STATUS_PREFIX_REGEX: Regex = Regex::new(r"(?m)^\d{3}[ +-]").unwrap();
    }

    let body = STATUS_PREFIX_REGEX.replace_all(body, "");
    let mut params = HashMap::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_ascii_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_ascii_whitespace() && *c != '=') {
            key.push(c);
        }
        if chars.next_if_eq(&'=').is_none() {
            continue;
        }

        let value = if chars.next_if_eq(&'"').is_some() {
            parse_quoted_string(&mut chars, &key)?
        } else {
            let mut value = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_ascii_whitespace()) {
                value.push(c);
            }
            value
        };

        if !key.is_empty() {
            params.insert(key, value);
        }
    }

    Ok(params)
}

// Consumes up to and including the closing quote
fn parse_quoted_string<I: Iterator<Item = char>>(
    chars: &mut Peekable<I>,
    key: &str,
) -> Result<String, TorError> {
    let mut value = Vec::new();
    let mut buffer = [0u8; 4];

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                return String::from_utf8(value).map_err(|_| {
                    TorError::malformed_reply(&format!("Value of {} is not valid UTF-8", key))
                })
            }
            '\\' => match chars.next() {
                Some('n') => value.push(b'\n'),
                Some('r') => value.push(b'\r'),
                Some('t') => value.push(b'\t'),
                Some(digit @ '0'..='7') => {
                    let mut code = digit.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match chars.next_if(|c| c.is_digit(8)) {
                            Some(digit) => code = code * 8 + digit.to_digit(8).unwrap_or(0),
                            None => break,
                        }
                    }
                    let byte = u8::try_from(code).map_err(|_| {
                        TorError::malformed_reply(&format!("Bad octal escape in value of {}", key))
                    })?;
                    value.push(byte);
                }
                Some(other) => value.extend_from_slice(other.encode_utf8(&mut buffer).as_bytes()),
                None => break,
            },
            _ => value.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes()),
        }
    }

    Err(TorError::malformed_reply(&format!(
        "Unterminated quoted value for {}",
        key
    )))
}
