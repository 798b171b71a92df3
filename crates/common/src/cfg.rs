//! SAX-style parser for INI-like configuration files.
//!
//! Implements a flavour of INI-like key-value stores, inspired largely by
//! Python's `configparser` module. The caller has full control over how
//! individual values are consumed, validated, and stored. The following
//! rules apply:
//!
//! - Keys and values are always emitted as byte strings on the same line;
//!   multi-line values are not accepted.
//! - Keys are separated from their values by an equals-sign (`=`). Neither
//!   carries leading or trailing whitespace when emitted.
//! - Keys may be specified more than once; the behavior is left to the
//!   caller.
//! - Key-value pairs belong to named sections. Sections are defined by
//!   lines with a leading `[` at column 0 and a trailing `]`.
//! - Comments are lines whose first non-whitespace character is `;` or
//!   `#`; inline comments are not accepted.

use std::fmt;

use crate::str::{cut, trim_end, trim_start};

/// A key-value parse event.
#[derive(Clone, Copy, Debug)]
pub struct Event<'a> {
    /// Name of the section the pair belongs to.
    pub section: &'a [u8],
    /// Key, trimmed of surrounding whitespace.
    pub key: &'a [u8],
    /// Value, trimmed of surrounding whitespace. Empty when the line
    /// carries no separator.
    pub value: &'a [u8],
    /// 1-based line number of the pair.
    pub line: u32,
}

/// An error raised by the parser itself.
///
/// Handler errors are propagated through [`parse`] unchanged; `User`
/// carries messages from handlers that have no richer error type of their
/// own.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A key-value separator with no key in front of it.
    NoKey { line: u32 },
    /// A key-value pair before any section header, or a stray `]`.
    NoSec { line: u32 },
    /// A section header with no terminating `]`.
    UntermSec { line: u32, found: char },
    /// A section header that matches no registered section.
    UnknownSec { line: u32, name: String },
    /// A handler-defined error.
    User(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoKey { line } => {
                write!(f, "configuration:{}: expected key before value-assignment, but found none", line)
            }
            Error::NoSec { line } => {
                write!(f, "configuration:{}: expected section-header before first key-value pair", line)
            }
            Error::UntermSec { line, found } => {
                write!(f, "configuration:{}: expected section-header terminator, but found '{}'", line, found)
            }
            Error::UnknownSec { line, name } => {
                write!(f, "configuration:{}: expected known section-header, but found \"{}\"", line, name)
            }
            Error::User(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

/// Parses `text` as an INI-like configuration, emitting one [`Event`] per
/// key-value pair to `handler`.
///
/// `sections` lists the recognized section names; a header naming any
/// other section fails with [`Error::UnknownSec`]. Handler errors
/// propagate as-is; the parser's own errors convert into the handler's
/// error type. A UTF-8 byte-order mark is tolerated and skipped.
pub fn parse<E, F>(text: &[u8], sections: &[&str], mut handler: F) -> Result<(), E>
where
    E: From<Error>,
    F: FnMut(Event<'_>) -> Result<(), E>,
{
    let mut text = text;
    if text.starts_with(&[0xEF, 0xBB, 0xBF]) {
        text = &text[3..];
    }

    let mut section: Option<&[u8]> = None;
    for (num, line) in text.split(|&c| c == b'\n').enumerate() {
        let num = num as u32 + 1;
        let line = trim_end(line);
        let stripped = trim_start(line);
        if stripped.is_empty() {
            continue;
        }

        match stripped[0] {
            b'#' | b';' => continue,
            b'=' | b':' => return Err(Error::NoKey { line: num }.into()),
            b']' => return Err(Error::NoSec { line: num }.into()),
            // Section headers sit exactly at column 0.
            b'[' if line[0] == b'[' => {
                let last = line[line.len() - 1];
                if last != b']' {
                    return Err(Error::UntermSec { line: num, found: last as char }.into());
                }

                let name = &line[1..line.len() - 1];
                if !sections.iter().any(|s| s.as_bytes() == name) {
                    let name = String::from_utf8_lossy(name).into_owned();
                    return Err(Error::UnknownSec { line: num, name }.into());
                }
                section = Some(name);
            }
            _ => {
                let section = match section {
                    Some(section) => section,
                    None => return Err(Error::NoSec { line: num }.into()),
                };

                let (key, value) = cut(stripped, b'=');
                handler(Event {
                    section,
                    key: trim_end(key),
                    value: trim_start(value.unwrap_or(b"")),
                    line: num,
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECTIONS: [&str; 2] = ["Simple Values", "You Can Use Comments"];

    fn events(text: &[u8]) -> Result<Vec<(String, String, String, u32)>, Error> {
        let mut out = Vec::new();
        parse(text, &SECTIONS, |ev| {
            out.push((
                String::from_utf8_lossy(ev.section).into_owned(),
                String::from_utf8_lossy(ev.key).into_owned(),
                String::from_utf8_lossy(ev.value).into_owned(),
                ev.line,
            ));
            Ok::<(), Error>(())
        })?;
        Ok(out)
    }

    #[test]
    fn simple_values() {
        let text = b"\
[Simple Values]
key = value
spaces in keys = allowed
spaces in values = allowed as well
";
        let events = events(text).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ("Simple Values".into(), "key".into(), "value".into(), 2));
        assert_eq!(events[2].2, "allowed as well");
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let text = b"\
# a comment
; another comment

[You Can Use Comments]
spaces around the delimiter = obviously
";
        let events = events(text).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "spaces around the delimiter");
        assert_eq!(events[0].3, 5);
    }

    #[test]
    fn utf8_bom_is_skipped() {
        let text = b"\xEF\xBB\xBF[Simple Values]\nkey = value\n";
        assert_eq!(events(text).unwrap().len(), 1);
    }

    #[test]
    fn value_without_separator_is_empty() {
        let events = events(b"[Simple Values]\nlonely key\n").unwrap();
        assert_eq!(events[0].1, "lonely key");
        assert_eq!(events[0].2, "");
    }

    #[test]
    fn missing_key() {
        assert_eq!(events(b"[Simple Values]\n= value\n"), Err(Error::NoKey { line: 2 }));
        assert_eq!(events(b"[Simple Values]\n: value\n"), Err(Error::NoKey { line: 2 }));
    }

    #[test]
    fn missing_section() {
        assert_eq!(events(b"key = value\n"), Err(Error::NoSec { line: 1 }));
        assert_eq!(events(b"]\n"), Err(Error::NoSec { line: 1 }));
    }

    #[test]
    fn unterminated_section() {
        assert_eq!(
            events(b"[Simple Values\n"),
            Err(Error::UntermSec { line: 1, found: 's' })
        );
    }

    #[test]
    fn unknown_section() {
        assert_eq!(
            events(b"[No Such Section]\n"),
            Err(Error::UnknownSec { line: 1, name: "No Such Section".into() })
        );
    }

    #[test]
    fn handler_errors_propagate() {
        let result = parse(b"[Simple Values]\nkey = value\n", &SECTIONS, |_| {
            Err(Error::User("nope".into()))
        });
        assert_eq!(result, Err(Error::User("nope".into())));
    }

    // Every non-blank, non-comment, non-header line produces exactly one
    // event, in input order.
    #[test]
    fn events_cover_every_content_line() {
        let text = b"\
[Simple Values]
a = 1
# skip
b = 2

[You Can Use Comments]
c = 3
";
        let events = events(text).unwrap();
        assert_eq!(
            events.iter().map(|e| e.3).collect::<Vec<_>>(),
            vec![2, 4, 7],
        );
    }
}
