//! Field offsets within the cartridge header.
//!
//! The packer owns the header as a raw buffer of [`HEADER_BSIZE`] bytes;
//! these constants name the fields it writes into that buffer. Offsets
//! follow GBATEK.
//!
//! <https://problemkaputt.de/gbatek.htm#dscartridgeheader>

/// Byte size of the header member. The header is the only constant-size
/// member in the image.
pub const HEADER_BSIZE: usize = 0x4000;

pub const OFS_TITLE: usize = 0x000;
pub const OFS_SERIAL: usize = 0x00C;
pub const OFS_MAKER: usize = 0x010;
pub const OFS_CAPACITY: usize = 0x014;
pub const OFS_REVISION: usize = 0x01E;

pub const LEN_TITLE: usize = 12;
pub const LEN_SERIAL: usize = 4;
pub const LEN_MAKER: usize = 2;

pub const OFS_ARM9_ROMOFFSET: usize = 0x020;
pub const OFS_ARM9_ENTRYPOINT: usize = 0x024;
pub const OFS_ARM9_LOADADDR: usize = 0x028;
pub const OFS_ARM9_LOADSIZE: usize = 0x02C;

pub const OFS_ARM7_ROMOFFSET: usize = 0x030;
pub const OFS_ARM7_ENTRYPOINT: usize = 0x034;
pub const OFS_ARM7_LOADADDR: usize = 0x038;
pub const OFS_ARM7_LOADSIZE: usize = 0x03C;

pub const OFS_FNTB_ROMOFFSET: usize = 0x040;
pub const OFS_FNTB_BSIZE: usize = 0x044;
pub const OFS_FATB_ROMOFFSET: usize = 0x048;
pub const OFS_FATB_BSIZE: usize = 0x04C;

pub const OFS_OVT9_ROMOFFSET: usize = 0x050;
pub const OFS_OVT9_BSIZE: usize = 0x054;
pub const OFS_OVT7_ROMOFFSET: usize = 0x058;
pub const OFS_OVT7_BSIZE: usize = 0x05C;

/// Port `0x40001A4` settings for normal and KEY1 commands.
pub const OFS_ROMCTRL_DEC: usize = 0x060;
pub const OFS_ROMCTRL_ENC: usize = 0x064;

pub const OFS_BANNER_ROMOFFSET: usize = 0x068;

pub const OFS_SECURE_CRC: usize = 0x06C;
/// Secure-area transfer delay, in 131 kHz units.
pub const OFS_SECURE_DELAY: usize = 0x06E;

pub const OFS_ARM9_AUTOLOADCB: usize = 0x070;
pub const OFS_ARM7_AUTOLOADCB: usize = 0x074;

pub const OFS_ROM_BSIZE: usize = 0x080;
pub const OFS_HEADER_BSIZE: usize = 0x084;
pub const OFS_ARM9_BUILDINFO: usize = 0x088;

/// The header checksum covers everything before its own field.
pub const OFS_HEADER_CRC: usize = 0x15E;

/// ROMCTRL and secure-delay values per storage type. MROM carts transfer
/// the secure area after a 10 ms delay, PROM carts after 26 ms.
pub const ROMCTRL_DEC_MROM: u32 = 0x0058_6000;
pub const ROMCTRL_ENC_MROM: u32 = 0x0018_08F8;
pub const SECURE_DELAY_MROM: u16 = 0x051E;

pub const ROMCTRL_DEC_PROM: u32 = 0x0041_6657;
pub const ROMCTRL_ENC_PROM: u32 = 0x0818_08F8;
pub const SECURE_DELAY_PROM: u16 = 0x0D7E;

/// Chip capacities start at 128 KB and double per shift, up to the
/// storage type's ceiling.
pub const TRY_CAPSHIFT_BASE: u64 = 0x0002_0000;
pub const MAX_CAPSHIFT_MROM: u32 = 9;
pub const MAX_CAPSHIFT_PROM: u32 = 5;
