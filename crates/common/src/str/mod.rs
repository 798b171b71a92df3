mod bytes;
mod utf16;

pub use self::bytes::{cmp_ignore_ascii_case, cut, trim, trim_end, trim_start};
pub use self::utf16::{code_units, CodeUnits, Utf16Error};
