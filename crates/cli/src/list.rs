use std::error::Error;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};

/// List the components of a ROM image.
#[derive(clap::Args)]
pub struct Args {
    /// ROM image to inspect.
    rom: PathBuf,
}

const ROM_ALIGN: u32 = 0x200;
const HEADER_BSIZE: u32 = 0x4000;

/// A table recovered from the header: ROM offset and byte size.
#[derive(Clone, Copy, Debug)]
struct Table {
    offset: u32,
    size: u32,
}

impl Table {
    fn read(header: &[u8], ofs: usize) -> Table {
        Table {
            offset: LittleEndian::read_u32(&header[ofs..ofs + 4]),
            size: LittleEndian::read_u32(&header[ofs + 4..ofs + 8]),
        }
    }
}

pub fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut rom = File::open(&args.rom)
        .map_err(|err| format!("could not open input file \"{}\": {}", args.rom.display(), err))?;

    let mut header = [0; 0x200];
    rom.read_exact(&mut header)?;

    let arm9 = Table { offset: LittleEndian::read_u32(&header[0x020..]), size: LittleEndian::read_u32(&header[0x02C..]) };
    let arm7 = Table { offset: LittleEndian::read_u32(&header[0x030..]), size: LittleEndian::read_u32(&header[0x03C..]) };
    let fntb = Table::read(&header, 0x040);
    let fatb = Table::read(&header, 0x048);
    let ovt9 = Table::read(&header, 0x050);
    let ovt7 = Table::read(&header, 0x058);
    let banner_offset = LittleEndian::read_u32(&header[0x068..]);

    let mut fat = vec![0; fatb.size as usize];
    rom.seek(SeekFrom::Start(u64::from(fatb.offset)))?;
    rom.read_exact(&mut fat)?;

    println!("ROM Start,ROM End,Size,Padding,Component");
    row(0, HEADER_BSIZE, "% HEADER %");

    row(arm9.offset, arm9.offset + arm9.size, "% ARM9 %");
    overlays(&mut rom, ovt9, &fat, "OVT9", "OVY9")?;

    row(arm7.offset, arm7.offset + arm7.size, "% ARM7 %");
    overlays(&mut rom, ovt7, &fat, "OVT7", "OVY7")?;

    row(fntb.offset, fntb.offset + fntb.size, "% FNTB %");
    if fatb.size > 0 {
        row(fatb.offset, fatb.offset + fatb.size, "% FATB %");
    }
    if banner_offset > 0 {
        let size = banner_size(&mut rom, banner_offset)?;
        row(banner_offset, banner_offset + size, "% BANNER %");
    }

    // Whatever the overlay tables do not claim of the FAT belongs to the
    // filesystem; list those entries in image order.
    let overlays = (ovt9.size / 0x20 + ovt7.size / 0x20) as usize;
    let mut files = Vec::new();
    for (id, entry) in fat.chunks_exact(8).enumerate().skip(overlays) {
        let start = LittleEndian::read_u32(&entry[..4]);
        let end = LittleEndian::read_u32(&entry[4..]);
        files.push((start, end, id));
    }
    files.sort_unstable();

    for (start, end, id) in files {
        row(start, end, &format!("% FILE ID {} %", id));
    }

    Ok(())
}

fn row(start: u32, end: u32, component: &str) {
    let pad = end.wrapping_neg() & (ROM_ALIGN - 1);
    println!("{:#010X},{:#010X},{:#010X},{:#06X},{}", start, end, end - start, pad, component);
}

/// Prints one row per overlay-table entry, resolving each overlay's
/// position through its file id.
fn overlays(
    rom: &mut File,
    ovt: Table,
    fat: &[u8],
    table_tag: &str,
    overlay_tag: &str,
) -> Result<(), Box<dyn Error>> {
    if ovt.size == 0 {
        return Ok(());
    }
    row(ovt.offset, ovt.offset + ovt.size, &format!("% {} %", table_tag));

    let mut table = vec![0; ovt.size as usize];
    rom.seek(SeekFrom::Start(u64::from(ovt.offset)))?;
    rom.read_exact(&mut table)?;

    for entry in table.chunks_exact(0x20) {
        let overlay_id = LittleEndian::read_u32(&entry[..4]);
        let file_id = LittleEndian::read_u32(&entry[0x18..0x1C]) as usize;

        let start = LittleEndian::read_u32(&fat[8 * file_id..]);
        let end = LittleEndian::read_u32(&fat[8 * file_id + 4..]);
        row(start, end, &format!("% {}_{:#06X} %", overlay_tag, overlay_id));
    }

    Ok(())
}

/// Reads the banner version to recover the banner's size class.
fn banner_size(rom: &mut File, offset: u32) -> Result<u32, Box<dyn Error>> {
    let mut version = [0; 2];
    rom.seek(SeekFrom::Start(u64::from(offset)))?;
    rom.read_exact(&mut version)?;

    match LittleEndian::read_u16(&version) & 0xFF {
        1 => Ok(0x0840),
        2 => Ok(0x0940),
        3 => Ok(0x1240),
        v => Err(format!("unexpected banner version: {}", v).into()),
    }
}
