mod crc;
mod file_size;

pub use self::crc::crc16;
pub use self::file_size::FileSize;
