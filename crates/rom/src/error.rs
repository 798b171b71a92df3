use std::io;

use thiserror::Error;

use common::str::Utf16Error;
use common::{cfg, dsv};

/// Any error raised while building a ROM image.
///
/// Text-input errors carry the 1-based line of the offending input and the
/// offending text itself.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration scanner rejected its input.
    #[error(transparent)]
    Config(#[from] cfg::Error),
    /// The filesystem-listing scanner rejected its input.
    #[error(transparent)]
    Sheets(#[from] dsv::Error),

    #[error("configuration:{line}: expected unsigned base-10 numeric-literal, but found \"{found}\"")]
    ExpectedDecimal { line: u32, found: String },
    #[error("configuration:{line}: expected unsigned base-16 numeric-literal, but found \"{found}\"")]
    ExpectedHex { line: u32, found: String },
    #[error("configuration:{line}: expected boolean-literal, but found \"{found}\"")]
    ExpectedBool { line: u32, found: String },
    #[error("configuration:{line}: expected either \"MROM\" or \"PROM\", but found \"{found}\"")]
    ExpectedRomtype { line: u32, found: String },
    #[error("configuration:{line}: expected banner version to be 1, 2, or 3, but found \"{found}\"")]
    ExpectedBannerVersion { line: u32, found: String },
    #[error("configuration:{line}: {what} value {found} exceeds maximum of {max}")]
    OverMax { line: u32, what: &'static str, found: String, max: u32 },
    #[error("configuration:{line}: {what} \"{found}\" exceeds maximum length {max}")]
    TextTooLong { line: u32, what: &'static str, found: String, max: usize },
    #[error("configuration:{line}: expected Basic Multilingual Plane Unicode, but found \"{found}\"")]
    OutOfRange { line: u32, found: String },
    #[error("configuration:{line}: unexpected UTF-16 surrogate half in \"{found}\"")]
    SurrogateHalf { line: u32, found: String },
    #[error("configuration:{line}: expected a valid UTF-8 encoding, but found \"{found}\"")]
    InvalidPrefix { line: u32, found: String },
    #[error("configuration:{line}: unrecognized {section}-section key \"{key}\"")]
    UnknownKey { line: u32, section: &'static str, key: String },

    #[error("configuration:{line}: {message}")]
    OrderingViolation { line: u32, message: &'static str },
    #[error("configuration:{line}: {message}")]
    SizeExceeded { line: u32, message: String },
    #[error("{context}:{line}: could not open file \"{path}\"")]
    FileOpen { context: &'static str, line: u32, path: String },
    #[error("configuration:{line}: definitions file \"{path}\" is beneath the minimum size 0x10")]
    FileTooSmall { line: u32, path: String },
    #[error("configuration:{line}: {message}")]
    BadIcon { line: u32, message: String },

    #[error("computed ROM size {size:#010X} exceeds allowable maximum of {max:#010X}")]
    OverCapacity { size: u64, max: u64 },

    #[error("packer must be sealed before dumping")]
    Packing,
    #[error("packer is sealed and accepts no further input")]
    Sealed,
    #[error("packer contents were already dumped")]
    Dumped,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps a title-conversion error with its input line and text.
    pub(crate) fn from_utf16(err: Utf16Error, line: u32, found: &[u8]) -> Error {
        let found = String::from_utf8_lossy(found).into_owned();
        match err {
            Utf16Error::InvalidPrefix => Error::InvalidPrefix { line, found },
            Utf16Error::SurrogateHalf => Error::SurrogateHalf { line, found },
            Utf16Error::OutOfRange => Error::OutOfRange { line, found },
        }
    }
}
