//! SAX-style parser for tabulated data files.
//!
//! Implements a flavour of tabulated data files, adapted from RFC 4180,
//! and delivers individual records to the caller, who has full control
//! over how fields within a record are validated and stored:
//!
//! - Records are delimited by a single-byte token, usually a line break.
//!   The last record may or may not carry a terminating delimiter.
//! - Records contain one or more fields separated by a single-byte token;
//!   each record must contain the same number of fields as the first.
//! - Fields may be enclosed in a single-byte encloser token. A field
//!   containing any of the three tokens must be enclosed, and an encloser
//!   inside an enclosed field is escaped by doubling it.
//!
//! For simplicity, a maximum of 64 fields is permitted.

use std::fmt;

/// Maximum number of fields permitted in a record.
pub const MAX_FIELDS: usize = 64;

/// Delimiter set for a parse.
#[derive(Clone, Copy, Debug)]
pub struct Dialect {
    /// Token separating records.
    pub record: u8,
    /// Token separating fields within a record.
    pub field: u8,
    /// Token optionally enclosing a single field.
    pub encloser: u8,
}

impl Dialect {
    /// Comma-separated values: `\n` records, `,` fields, `"` enclosers.
    pub const CSV: Dialect = Dialect { record: b'\n', field: b',', encloser: b'"' };
    /// Tab-separated values: `\n` records, `\t` fields, `"` enclosers.
    pub const TSV: Dialect = Dialect { record: b'\n', field: b'\t', encloser: b'"' };
}

/// A parsed record.
///
/// Enclosed fields are emitted without their enclosers but keep their
/// escape sequences; bit `i` of `enclosed` is set when field `i` was
/// enclosed.
#[derive(Clone, Debug, Default)]
pub struct Record<'a> {
    pub fields: Vec<&'a [u8]>,
    pub enclosed: u64,
}

/// An error raised by the parser itself.
///
/// Handler errors are propagated through [`parse`] unchanged; `User`
/// carries messages from handlers that have no richer error type of their
/// own.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A record whose field count differs from the first record's.
    NumFields { line: u32, expected: usize, found: usize },
    /// An encloser inside an unenclosed field.
    Unenclosed { line: u32 },
    /// An enclosed field with no closing encloser before end of input.
    Unterminated { line: u32 },
    /// A handler-defined error.
    User(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NumFields { line, expected, found } => {
                write!(f, "record {}: expected {} fields, but found {}", line, expected, found)
            }
            Error::Unenclosed { line } => {
                write!(f, "record {}: unexpected encloser in unenclosed field", line)
            }
            Error::Unterminated { line } => {
                write!(f, "record {}: expected paired encloser at end of field, but found none", line)
            }
            Error::User(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

/// Parses `text` as tabulated data, delivering every record (the first
/// included) to `handler` along with its 1-based record number.
///
/// The first record defines the expected field count. Handler errors
/// propagate as-is; the parser's own errors convert into the handler's
/// error type. A UTF-8 byte-order mark is tolerated and skipped.
pub fn parse<E, F>(text: &[u8], dialect: Dialect, mut handler: F) -> Result<(), E>
where
    E: From<Error>,
    F: FnMut(&Record<'_>, u32) -> Result<(), E>,
{
    let mut text = text;
    if text.starts_with(&[0xEF, 0xBB, 0xBF]) {
        text = &text[3..];
    }

    let mut expected = None;
    let mut line = 1;
    while !text.is_empty() {
        let (record, rest) = take_record(text, dialect, line).map_err(E::from)?;
        text = rest;

        match expected {
            None => expected = Some(record.fields.len()),
            Some(expected) if record.fields.len() != expected => {
                return Err(Error::NumFields { line, expected, found: record.fields.len() }.into());
            }
            Some(_) => {}
        }

        handler(&record, line)?;
        line += 1;
    }

    Ok(())
}

/// [`parse`] wrapper for typical comma-separated values (CSV) data.
pub fn csv<E, F>(text: &[u8], handler: F) -> Result<(), E>
where
    E: From<Error>,
    F: FnMut(&Record<'_>, u32) -> Result<(), E>,
{
    parse(text, Dialect::CSV, handler)
}

/// [`parse`] wrapper for typical tab-separated values (TSV) data.
pub fn tsv<E, F>(text: &[u8], handler: F) -> Result<(), E>
where
    E: From<Error>,
    F: FnMut(&Record<'_>, u32) -> Result<(), E>,
{
    parse(text, Dialect::TSV, handler)
}

fn take_record(text: &[u8], d: Dialect, line: u32) -> Result<(Record<'_>, &[u8]), Error> {
    let mut record = Record::default();
    let mut rest = text;

    loop {
        if record.fields.len() == MAX_FIELDS {
            return Err(Error::NumFields { line, expected: MAX_FIELDS, found: MAX_FIELDS + 1 });
        }

        let (field, enclosed, after) = take_field(rest, d, line)?;
        if enclosed {
            record.enclosed |= 1 << record.fields.len();
        }
        record.fields.push(field);

        match after.first() {
            Some(&c) if c == d.field => rest = &after[1..],
            Some(&c) if c == d.record => return Ok((record, &after[1..])),
            _ => return Ok((record, after)),
        }
    }
}

fn take_field(text: &[u8], d: Dialect, line: u32) -> Result<(&[u8], bool, &[u8]), Error> {
    if text.first() == Some(&d.encloser) {
        let inner = &text[1..];
        let mut i = 0;
        while i < inner.len() {
            if inner[i] != d.encloser {
                i += 1;
                continue;
            }
            match inner.get(i + 1) {
                // A doubled encloser stands for one literal encloser.
                Some(&c) if c == d.encloser => i += 2,
                // An encloser not followed by a delimiter is content.
                Some(&c) if c != d.record && c != d.field => i += 1,
                _ => return Ok((&inner[..i], true, &inner[i + 1..])),
            }
        }
        Err(Error::Unterminated { line })
    } else {
        let end = text
            .iter()
            .position(|&c| c == d.record || c == d.field)
            .unwrap_or(text.len());
        if text[..end].contains(&d.encloser) {
            return Err(Error::Unenclosed { line });
        }
        Ok((&text[..end], false, &text[end..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(text: &[u8], dialect: Dialect) -> Result<Vec<(Vec<Vec<u8>>, u64)>, Error> {
        let mut out = Vec::new();
        parse(text, dialect, |record, _line| {
            let fields = record.fields.iter().map(|f| f.to_vec()).collect();
            out.push((fields, record.enclosed));
            Ok::<(), Error>(())
        })?;
        Ok(out)
    }

    fn csv_records(text: &[u8]) -> Result<Vec<(Vec<Vec<u8>>, u64)>, Error> {
        records(text, Dialect::CSV)
    }

    #[test]
    fn simple_records() {
        let parsed = csv_records(b"a,b\nc,d\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(parsed[1].0, vec![b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn final_record_delimiter_is_optional() {
        assert_eq!(csv_records(b"a,b\nc,d").unwrap().len(), 2);
    }

    #[test]
    fn enclosed_fields_and_bitmask() {
        let parsed = csv_records(b"\"a,b\",c\n").unwrap();
        assert_eq!(parsed[0].0, vec![b"a,b".to_vec(), b"c".to_vec()]);
        assert_eq!(parsed[0].1, 0b01);
    }

    #[test]
    fn doubled_encloser_is_kept_escaped() {
        // '""""' is a field containing one escaped double-quote.
        let parsed = csv_records(b"\"\"\"\",x\n").unwrap();
        assert_eq!(parsed[0].0[0], b"\"\"".to_vec());
        assert_eq!(parsed[0].1, 0b01);
    }

    #[test]
    fn empty_enclosed_field() {
        let parsed = csv_records(b"\"\",x\n").unwrap();
        assert_eq!(parsed[0].0[0], b"".to_vec());
    }

    #[test]
    fn mismatched_field_count() {
        assert_eq!(
            csv_records(b"a,b\nc,d,e\n"),
            Err(Error::NumFields { line: 2, expected: 2, found: 3 })
        );
    }

    #[test]
    fn encloser_in_unenclosed_field() {
        assert_eq!(csv_records(b"a\"b,c\n"), Err(Error::Unenclosed { line: 1 }));
    }

    #[test]
    fn unterminated_enclosed_field() {
        assert_eq!(csv_records(b"\"abc\n"), Err(Error::Unterminated { line: 1 }));
    }

    #[test]
    fn tsv_dialect() {
        let parsed = records(b"a\tb\nc\td\n", Dialect::TSV).unwrap();
        assert_eq!(parsed[0].0, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn utf8_bom_is_skipped() {
        let parsed = csv_records(b"\xEF\xBB\xBFa,b\n").unwrap();
        assert_eq!(parsed[0].0[0], b"a".to_vec());
    }

    // Splitting the unparsed bytes of a well-formed input again yields the
    // same field sequence.
    #[test]
    fn reparse_is_idempotent() {
        let text = b"one,two\nthree,four\n";
        let first = csv_records(text).unwrap();
        let rejoined: Vec<u8> = first
            .iter()
            .flat_map(|(fields, _)| {
                let mut line: Vec<u8> = fields.join(&b","[..]);
                line.push(b'\n');
                line
            })
            .collect();
        assert_eq!(csv_records(&rejoined).unwrap(), first);
    }
}
