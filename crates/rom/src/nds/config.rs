//! Configuration-event handlers.
//!
//! One handler per recognized section; each dispatches on the key and
//! funnels the value through the shape validators at the bottom of the
//! module.

use std::fs;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use phf::phf_map;

use common::cfg;
use common::str::code_units;

use crate::error::Error;
use crate::nds::packer::{lossy, to_path, Member, RomPacker};
use crate::nds::{banner, header};

static BOOLEANS: phf::Map<&'static str, bool> = phf_map! {
    "true" => true,
    "yes" => true,
    "on" => true,
    "false" => false,
    "no" => false,
    "off" => false,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RomType {
    Mrom,
    Prom,
}

static ROMTYPES: phf::Map<&'static str, RomType> = phf_map! {
    "MROM" => RomType::Mrom,
    "PROM" => RomType::Prom,
};

/// Which processor an `[arm9]`/`[arm7]` event applies to.
#[derive(Clone, Copy, Debug)]
enum Cpu {
    Arm9,
    Arm7,
}

impl Cpu {
    fn name(self) -> &'static str {
        match self {
            Cpu::Arm9 => "arm9",
            Cpu::Arm7 => "arm7",
        }
    }

    /// Header offsets receiving the four definition words, in file order:
    /// ram-load address, entry point, load size, autoload callback.
    fn defs_offsets(self) -> [usize; 4] {
        match self {
            Cpu::Arm9 => [
                header::OFS_ARM9_LOADADDR,
                header::OFS_ARM9_ENTRYPOINT,
                header::OFS_ARM9_LOADSIZE,
                header::OFS_ARM9_AUTOLOADCB,
            ],
            Cpu::Arm7 => [
                header::OFS_ARM7_LOADADDR,
                header::OFS_ARM7_ENTRYPOINT,
                header::OFS_ARM7_LOADSIZE,
                header::OFS_ARM7_AUTOLOADCB,
            ],
        }
    }
}

impl RomPacker {
    /// Configuration sections the packer registers with the scanner.
    pub const SECTIONS: [&'static str; 5] = ["header", "rom", "banner", "arm9", "arm7"];

    /// Applies one configuration event to the packer model.
    pub fn configure(&mut self, ev: &cfg::Event<'_>) -> Result<(), Error> {
        self.assert_open()?;

        match ev.section {
            b"header" => self.cfg_header(ev),
            b"rom" => self.cfg_rom(ev),
            b"banner" => self.cfg_banner(ev),
            b"arm9" => self.cfg_arm(ev, Cpu::Arm9),
            b"arm7" => self.cfg_arm(ev, Cpu::Arm7),
            _ => Err(cfg::Error::UnknownSec {
                line: ev.line,
                name: lossy(ev.section),
            }
            .into()),
        }
    }

    fn cfg_header(&mut self, ev: &cfg::Event<'_>) -> Result<(), Error> {
        match ev.key {
            b"template" => {
                let template = fs::read(to_path(ev.value)).map_err(|_| Error::FileOpen {
                    context: "configuration",
                    line: ev.line,
                    path: lossy(ev.value),
                })?;
                if template.len() > header::HEADER_BSIZE {
                    return Err(Error::SizeExceeded {
                        line: ev.line,
                        message: format!(
                            "template file \"{}\" size {:#010X} exceeds maximum size {:#06X}",
                            lossy(ev.value),
                            template.len(),
                            header::HEADER_BSIZE,
                        ),
                    });
                }

                self.header.bytes_mut()[..template.len()].copy_from_slice(&template);
                debug!("configuration:header: loaded \"{}\" as a template", lossy(ev.value));
                Ok(())
            }
            b"title" => self.put_header_text(ev, header::OFS_TITLE, header::LEN_TITLE, "title"),
            b"serial" => self.put_header_text(ev, header::OFS_SERIAL, header::LEN_SERIAL, "serial"),
            b"maker" => self.put_header_text(ev, header::OFS_MAKER, header::LEN_MAKER, "maker"),
            b"revision" => {
                let revision = parse_decimal(ev.value, 255, "revision", ev.line)?;
                self.header.bytes_mut()[header::OFS_REVISION] = revision as u8;
                debug!("configuration:header: set revision to {}", revision);
                Ok(())
            }
            b"secure-crc" => {
                let crc = parse_hex(ev.value, 0xFFFF, "secure-crc", ev.line)?;
                let buf = self.header.bytes_mut();
                LittleEndian::write_u16(&mut buf[header::OFS_SECURE_CRC..], crc as u16);
                debug!("configuration:header: set secure CRC to {:#06X}", crc);
                Ok(())
            }
            _ => Err(unknown_key(ev, "header")),
        }
    }

    fn put_header_text(
        &mut self,
        ev: &cfg::Event<'_>,
        ofs: usize,
        max: usize,
        what: &'static str,
    ) -> Result<(), Error> {
        if ev.value.len() > max {
            return Err(Error::TextTooLong {
                line: ev.line,
                what,
                found: lossy(ev.value),
                max,
            });
        }

        self.header.bytes_mut()[ofs..ofs + ev.value.len()].copy_from_slice(ev.value);
        debug!("configuration:header: set {} to \"{}\"", what, lossy(ev.value));
        Ok(())
    }

    fn cfg_rom(&mut self, ev: &cfg::Event<'_>) -> Result<(), Error> {
        match ev.key {
            b"storage-type" => {
                let romtype = parse_romtype(ev.value, ev.line)?;
                let (dec, enc, delay) = match romtype {
                    RomType::Mrom => (
                        header::ROMCTRL_DEC_MROM,
                        header::ROMCTRL_ENC_MROM,
                        header::SECURE_DELAY_MROM,
                    ),
                    RomType::Prom => (
                        header::ROMCTRL_DEC_PROM,
                        header::ROMCTRL_ENC_PROM,
                        header::SECURE_DELAY_PROM,
                    ),
                };

                let buf = self.header.bytes_mut();
                LittleEndian::write_u32(&mut buf[header::OFS_ROMCTRL_DEC..], dec);
                LittleEndian::write_u32(&mut buf[header::OFS_ROMCTRL_ENC..], enc);
                LittleEndian::write_u16(&mut buf[header::OFS_SECURE_DELAY..], delay);

                self.prom = romtype == RomType::Prom;
                debug!("configuration:rom: set storage type to {}", lossy(ev.value));
                Ok(())
            }
            b"fill-tail" => {
                self.filltail = parse_bool(ev.value, ev.line)?;
                debug!("configuration:rom: will fill final ROM to capacity");
                Ok(())
            }
            b"fill-with" => {
                self.fillwith = parse_hex(ev.value, 0xFF, "fill-with", ev.line)? as u8;
                debug!("configuration:rom: will fill padding with {:#04X}", self.fillwith);
                Ok(())
            }
            _ => Err(unknown_key(ev, "rom")),
        }
    }

    fn cfg_banner(&mut self, ev: &cfg::Event<'_>) -> Result<(), Error> {
        if self.banner.size == 0 && ev.key != b"version" {
            return Err(Error::OrderingViolation {
                line: ev.line,
                message: "attempted to set banner value before specifying the version",
            });
        }

        match ev.key {
            b"version" => {
                let version = parse_decimal(ev.value, 3, "banner version", ev.line).unwrap_or(0);
                let size = match banner::size_for_version(version) {
                    Some(size) => size,
                    None => {
                        return Err(Error::ExpectedBannerVersion {
                            line: ev.line,
                            found: lossy(ev.value),
                        })
                    }
                };

                self.bannerver = version as u8;
                self.banner = Member::buf("%BANNER%", vec![0; size]);
                self.banner.bytes_mut()[banner::OFS_VERSION] = version as u8;
                debug!("configuration:banner: set version to {}", version);
                Ok(())
            }
            b"icon4bpp" => self.put_banner_blob(
                ev,
                banner::OFS_ICON_BITMAP,
                banner::ICON_BITMAP_BSIZE,
                "icon bitmap",
            ),
            b"iconpal" => self.put_banner_blob(
                ev,
                banner::OFS_ICON_PALETTE,
                banner::ICON_PALETTE_BSIZE,
                "icon palette",
            ),
            b"icon" => self.cfg_banner_iconpng(ev),
            b"title" => {
                if self.endbannertitle != 0 {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set title after setting some other value",
                    });
                }

                self.put_banner_title(ev.value, ev.line)?;
                debug!("configuration:banner: set title to \"{}\"", lossy(ev.value));
                Ok(())
            }
            b"subtitle" => {
                if self.endbannertitle == 0 {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set subtitle before setting primary title",
                    });
                }
                if self.has_developer {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set subtitle after setting developer",
                    });
                }
                if self.has_subtitle {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set multiple subtitles",
                    });
                }

                self.put_title_unit(b'\n'.into());
                self.put_banner_title(ev.value, ev.line)?;
                self.has_subtitle = true;
                debug!("configuration:banner: set subtitle to \"{}\"", lossy(ev.value));
                Ok(())
            }
            b"developer" => {
                if self.endbannertitle == 0 {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set developer before setting primary title",
                    });
                }
                if self.has_developer {
                    return Err(Error::OrderingViolation {
                        line: ev.line,
                        message: "attempted to set multiple developers",
                    });
                }

                self.put_title_unit(b'\n'.into());
                self.put_banner_title(ev.value, ev.line)?;
                self.has_developer = true;
                debug!("configuration:banner: set developer to \"{}\"", lossy(ev.value));
                Ok(())
            }
            _ => Err(unknown_key(ev, "banner")),
        }
    }

    fn put_banner_blob(
        &mut self,
        ev: &cfg::Event<'_>,
        ofs: usize,
        max: usize,
        what: &'static str,
    ) -> Result<(), Error> {
        let blob = fs::read(to_path(ev.value)).map_err(|_| Error::FileOpen {
            context: "configuration",
            line: ev.line,
            path: lossy(ev.value),
        })?;
        if blob.len() > max {
            return Err(Error::SizeExceeded {
                line: ev.line,
                message: format!(
                    "{} file \"{}\" size {:#010X} exceeds maximum size {:#06X}",
                    what,
                    lossy(ev.value),
                    blob.len(),
                    max,
                ),
            });
        }

        self.banner.bytes_mut()[ofs..ofs + blob.len()].copy_from_slice(&blob);
        debug!("configuration:banner: loaded \"{}\" as the {}", lossy(ev.value), what);
        Ok(())
    }

    fn cfg_banner_iconpng(&mut self, ev: &cfg::Event<'_>) -> Result<(), Error> {
        let bad_icon = |message: String| Error::BadIcon { line: ev.line, message };
        let name = lossy(ev.value);

        let file = fs::File::open(to_path(ev.value)).map_err(|_| Error::FileOpen {
            context: "configuration",
            line: ev.line,
            path: name.clone(),
        })?;

        let mut decoder = png::Decoder::new(file);
        decoder.set_transformations(png::Transformations::IDENTITY);
        let mut reader = decoder
            .read_info()
            .map_err(|err| bad_icon(format!("icon file \"{}\" is not a PNG ({})", name, err)))?;

        let info = reader.info();
        if info.color_type != png::ColorType::Indexed {
            return Err(bad_icon(format!("icon file \"{}\" is not an indexed PNG", name)));
        }
        if info.bit_depth != png::BitDepth::Four {
            return Err(bad_icon(format!(
                "icon file \"{}\" has unsupported bitdepth {}",
                name, info.bit_depth as u8,
            )));
        }
        if info.width != banner::ICON_DIMEN || info.height != banner::ICON_DIMEN {
            return Err(bad_icon(format!(
                "icon file \"{}\" has invalid dimensions {}x{}",
                name, info.width, info.height,
            )));
        }

        let palette = match &info.palette {
            Some(palette) => palette.to_vec(),
            None => return Err(bad_icon(format!("icon file \"{}\" has no palette section", name))),
        };
        if palette.len() > 3 * 16 {
            return Err(bad_icon(format!("icon file \"{}\" has more than 16 colors", name)));
        }

        // Packed 4bpp rows: 16 bytes per row, 32 rows.
        let mut pixels = [0; banner::ICON_BITMAP_BSIZE];
        reader
            .next_frame(&mut pixels)
            .map_err(|err| bad_icon(format!("could not decode icon file \"{}\" ({})", name, err)))?;

        let buf = self.banner.bytes_mut();
        let tiles = banner::tile_4bpp(&pixels);
        buf[banner::OFS_ICON_BITMAP..banner::OFS_ICON_BITMAP + tiles.len()].copy_from_slice(&tiles);

        for (i, color) in palette.chunks(3).enumerate() {
            let packed = banner::bgr555(color[0], color[1], color[2]);
            let ofs = banner::OFS_ICON_PALETTE + 2 * i;
            LittleEndian::write_u16(&mut buf[ofs..ofs + 2], packed);
        }

        debug!("configuration:banner: loaded \"{}\" as the icon", name);
        Ok(())
    }

    /// Writes a title part into every active language slot, stopping at
    /// the slot capacity.
    fn put_banner_title(&mut self, value: &[u8], line: u32) -> Result<(), Error> {
        let mut units = code_units(value);

        while self.endbannertitle < banner::TITLE_BSIZE {
            match units.next() {
                None => return Ok(()),
                Some(Ok(unit)) => self.put_title_unit(unit),
                Some(Err(err)) => return Err(Error::from_utf16(err, line, value)),
            }
        }

        if units.next().is_some() {
            return Err(Error::SizeExceeded {
                line,
                message: format!(
                    "total banner title length is greater than the maximum allowable size {:#06X}",
                    banner::TITLE_BSIZE,
                ),
            });
        }
        Ok(())
    }

    /// Writes one UTF-16 code unit at the title cursor of every active
    /// language slot. A full slot swallows further units; the title
    /// writers report the overflow.
    fn put_title_unit(&mut self, unit: u16) {
        let cursor = self.endbannertitle;
        let version = self.bannerver;
        if cursor >= banner::TITLE_BSIZE {
            return;
        }

        let buf = self.banner.bytes_mut();
        for &slot in banner::title_slots(version) {
            LittleEndian::write_u16(&mut buf[slot + cursor..slot + cursor + 2], unit);
        }
        self.endbannertitle = cursor + 2;
    }

    fn cfg_arm(&mut self, ev: &cfg::Event<'_>, cpu: Cpu) -> Result<(), Error> {
        match ev.key {
            b"static-binary" => {
                let member = open_member(ev)?;
                debug!(
                    "configuration:{}: loaded \"{}\" as the static binary",
                    cpu.name(),
                    lossy(ev.value),
                );
                match cpu {
                    Cpu::Arm9 => self.arm9 = member,
                    Cpu::Arm7 => self.arm7 = member,
                }
                Ok(())
            }
            b"overlay-table" => {
                let member = open_member(ev)?;
                debug!(
                    "configuration:{}: loaded \"{}\" as the overlay table",
                    cpu.name(),
                    lossy(ev.value),
                );
                match cpu {
                    Cpu::Arm9 => self.ovt9 = member,
                    Cpu::Arm7 => self.ovt7 = member,
                }
                Ok(())
            }
            b"definitions" => self.cfg_arm_definitions(ev, cpu),
            _ => Err(unknown_key(ev, cpu.name())),
        }
    }

    /// Loads an ARM definitions file: a 0x10-byte header of little-endian
    /// words copied into the cartridge header, then a concatenation of
    /// null-terminated overlay filenames, each opened as a member.
    fn cfg_arm_definitions(&mut self, ev: &cfg::Event<'_>, cpu: Cpu) -> Result<(), Error> {
        let mut file = fs::File::open(to_path(ev.value)).map_err(|_| Error::FileOpen {
            context: "configuration",
            line: ev.line,
            path: lossy(ev.value),
        })?;
        let mut defs = Vec::new();
        file.read_to_end(&mut defs)?;

        if defs.len() < 0x10 {
            return Err(Error::FileTooSmall {
                line: ev.line,
                path: lossy(ev.value),
            });
        }

        // The definition words are stored little-endian already; they copy
        // into the header verbatim.
        let buf = self.header.bytes_mut();
        for (word, ofs) in defs[..0x10].chunks(4).zip(&cpu.defs_offsets()) {
            buf[*ofs..*ofs + 4].copy_from_slice(word);
        }

        let overlays = match cpu {
            Cpu::Arm9 => &mut self.ovy9,
            Cpu::Arm7 => &mut self.ovy7,
        };
        for name in defs[0x10..].split(|&c| c == 0) {
            if name.is_empty() {
                continue;
            }

            let member = Member::open(name).map_err(|_| Error::FileOpen {
                context: "configuration",
                line: ev.line,
                path: lossy(name),
            })?;
            debug!(
                "configuration:{}: loaded \"{}\" as an overlay",
                cpu.name(),
                lossy(name),
            );
            overlays.push(member);
        }

        Ok(())
    }
}

fn open_member(ev: &cfg::Event<'_>) -> Result<Member, Error> {
    Member::open(ev.value).map_err(|_| Error::FileOpen {
        context: "configuration",
        line: ev.line,
        path: lossy(ev.value),
    })
}

fn unknown_key(ev: &cfg::Event<'_>, section: &'static str) -> Error {
    Error::UnknownKey {
        line: ev.line,
        section,
        key: lossy(ev.key),
    }
}

fn parse_decimal(value: &[u8], max: u32, what: &'static str, line: u32) -> Result<u32, Error> {
    if value.is_empty() {
        return Err(Error::ExpectedDecimal { line, found: lossy(value) });
    }

    let mut result: u64 = 0;
    for &c in value {
        if !c.is_ascii_digit() {
            return Err(Error::ExpectedDecimal { line, found: lossy(value) });
        }

        result = result * 10 + u64::from(c - b'0');
        if result > u64::from(max) {
            return Err(Error::OverMax { line, what, found: lossy(value), max });
        }
    }
    Ok(result as u32)
}

fn parse_hex(value: &[u8], max: u32, what: &'static str, line: u32) -> Result<u32, Error> {
    let mut digits = value;
    if digits.len() > 2 && (digits.starts_with(b"0x") || digits.starts_with(b"0X")) {
        digits = &digits[2..];
    }
    if digits.is_empty() {
        return Err(Error::ExpectedHex { line, found: lossy(value) });
    }

    let mut result: u64 = 0;
    for &c in digits {
        let digit = match c {
            b'0'..=b'9' => c - b'0',
            b'A'..=b'F' => c - b'A' + 10,
            b'a'..=b'f' => c - b'a' + 10,
            _ => return Err(Error::ExpectedHex { line, found: lossy(value) }),
        };

        result = result * 16 + u64::from(digit);
        if result > u64::from(max) {
            return Err(Error::OverMax { line, what, found: lossy(value), max });
        }
    }
    Ok(result as u32)
}

fn parse_bool(value: &[u8], line: u32) -> Result<bool, Error> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| BOOLEANS.get(s))
        .copied()
        .ok_or_else(|| Error::ExpectedBool { line, found: lossy(value) })
}

fn parse_romtype(value: &[u8], line: u32) -> Result<RomType, Error> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| ROMTYPES.get(s))
        .copied()
        .ok_or_else(|| Error::ExpectedRomtype { line, found: lossy(value) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_values() {
        assert_eq!(parse_decimal(b"0", 255, "n", 1).unwrap(), 0);
        assert_eq!(parse_decimal(b"255", 255, "n", 1).unwrap(), 255);
        assert!(matches!(
            parse_decimal(b"256", 255, "n", 1),
            Err(Error::OverMax { max: 255, .. })
        ));
        assert!(matches!(parse_decimal(b"12a", 255, "n", 1), Err(Error::ExpectedDecimal { .. })));
        assert!(matches!(parse_decimal(b"", 255, "n", 1), Err(Error::ExpectedDecimal { .. })));
    }

    #[test]
    fn hex_values() {
        assert_eq!(parse_hex(b"0xFFFF", 0xFFFF, "n", 1).unwrap(), 0xFFFF);
        assert_eq!(parse_hex(b"ff", 0xFF, "n", 1).unwrap(), 0xFF);
        assert_eq!(parse_hex(b"0X1e", 0xFF, "n", 1).unwrap(), 0x1E);
        assert!(matches!(parse_hex(b"0x", 0xFF, "n", 1), Err(Error::ExpectedHex { .. })));
        assert!(matches!(parse_hex(b"0xZZ", 0xFF, "n", 1), Err(Error::ExpectedHex { .. })));
        assert!(matches!(
            parse_hex(b"0x100", 0xFF, "n", 1),
            Err(Error::OverMax { max: 0xFF, .. })
        ));
    }

    #[test]
    fn boolean_values() {
        assert_eq!(parse_bool(b"true", 1).unwrap(), true);
        assert_eq!(parse_bool(b"off", 1).unwrap(), false);
        assert!(matches!(parse_bool(b"maybe", 1), Err(Error::ExpectedBool { .. })));
    }

    #[test]
    fn romtype_values() {
        assert!(matches!(parse_romtype(b"MROM", 1), Ok(RomType::Mrom)));
        assert!(matches!(parse_romtype(b"PROM", 1), Ok(RomType::Prom)));
        assert!(matches!(parse_romtype(b"mrom", 1), Err(Error::ExpectedRomtype { .. })));
    }
}
