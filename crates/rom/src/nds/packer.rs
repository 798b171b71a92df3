use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use common::util::{crc16, FileSize};

use crate::error::Error;
use crate::nds::fnt::Fnt;
use crate::nds::{banner, fnt, header, pad_for};

/// Origin of a member's bytes: a buffer owned by the packer, or a file on
/// disk with a known size.
#[derive(Debug)]
pub(crate) enum Source {
    Buf(Vec<u8>),
    File(File),
}

/// A named byte region laid out inside the image.
#[derive(Debug)]
pub(crate) struct Member {
    /// Informational name for diagnostics.
    pub name: Vec<u8>,
    pub source: Source,
    pub size: u64,
    /// Fill bytes after the source up to the next alignment boundary.
    pub pad: u64,
    /// Absolute position in the image; assigned by `seal`.
    pub offset: u64,
}

impl Member {
    pub(crate) fn buf(name: &str, buf: Vec<u8>) -> Member {
        let size = buf.len() as u64;
        Member {
            name: name.as_bytes().to_vec(),
            source: Source::Buf(buf),
            size,
            pad: pad_for(size),
            offset: 0,
        }
    }

    fn empty(name: &str) -> Member {
        Member::buf(name, Vec::new())
    }

    /// Opens a file member. The handle stays open until the dump consumes
    /// it or the packer is dropped.
    pub(crate) fn open(name: &[u8]) -> io::Result<Member> {
        let file = File::open(to_path(name))?;
        let size = file.metadata()?.len();
        Ok(Member {
            name: name.to_vec(),
            source: Source::File(file),
            size,
            pad: pad_for(size),
            offset: 0,
        })
    }

    fn bytes(&self) -> &[u8] {
        match &self.source {
            Source::Buf(buf) => buf,
            Source::File(_) => &[],
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.source {
            Source::Buf(buf) => buf,
            Source::File(_) => &mut [],
        }
    }
}

/// A filesystem entry scheduled for packing.
///
/// Source files are not kept open; the upper bound of filesystem entries
/// the DS supports is quite large (61440), so each file opens lazily when
/// the dump reaches it.
#[derive(Clone, Debug)]
pub(crate) struct RomFile {
    pub source: Vec<u8>,
    pub target: Vec<u8>,
    pub size: u64,
    pub pad: u64,
    /// Insertion index; maps sort order back to input order.
    pub packing_id: usize,
    /// Sort rank plus the overlay count; assigned by `seal`.
    pub filesys_id: u16,
    pub offset: u64,
}

/// Packer lifecycle: input is accepted while `Open`; `seal` and `dump`
/// each fire exactly once.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Open,
    Sealed,
    Dumped,
}

/// Assembles a ROM image from configured members and a filesystem list.
///
/// The packer is populated through [`configure`] and [`add_file`], sealed
/// once with [`seal`] (which lays out every member, builds the filesystem
/// tables, and computes the integrity fields), and then written out once
/// with [`dump`].
///
/// [`configure`]: RomPacker::configure
/// [`add_file`]: RomPacker::add_file
/// [`seal`]: RomPacker::seal
/// [`dump`]: RomPacker::dump
#[derive(Debug)]
pub struct RomPacker {
    state: State,

    // Banner bookkeeping: the version gates every other banner key; the
    // title cursor and flags enforce title/subtitle/developer ordering.
    pub(crate) bannerver: u8,
    pub(crate) endbannertitle: usize,
    pub(crate) has_subtitle: bool,
    pub(crate) has_developer: bool,

    pub(crate) filltail: bool,
    pub(crate) fillwith: u8,
    pub(crate) prom: bool,
    tailsize: u64,
    romsize: u64,

    pub(crate) header: Member,
    pub(crate) arm9: Member,
    pub(crate) ovt9: Member,
    pub(crate) ovy9: Vec<Member>,
    pub(crate) arm7: Member,
    pub(crate) ovt7: Member,
    pub(crate) ovy7: Vec<Member>,
    fntb: Member,
    fatb: Member,
    pub(crate) banner: Member,
    pub(crate) filesys: Vec<RomFile>,
}

impl RomPacker {
    /// Creates an open, empty packer.
    pub fn new() -> RomPacker {
        RomPacker {
            state: State::Open,
            bannerver: 0,
            endbannertitle: 0,
            has_subtitle: false,
            has_developer: false,
            filltail: false,
            fillwith: 0xFF,
            prom: false,
            tailsize: 0,
            romsize: 0,
            // The header is the only constant-size member in the entire
            // image, so it can be allocated up front.
            header: Member::buf("%HEADER%", vec![0; header::HEADER_BSIZE]),
            arm9: Member::empty("%ARM9%"),
            ovt9: Member::empty("%OVT9%"),
            ovy9: Vec::new(),
            arm7: Member::empty("%ARM7%"),
            ovt7: Member::empty("%OVT7%"),
            ovy7: Vec::new(),
            fntb: Member::empty("%FNTB%"),
            fatb: Member::empty("%FATB%"),
            banner: Member::empty("%BANNER%"),
            filesys: Vec::new(),
        }
    }

    /// The sealed header buffer.
    pub fn header(&self) -> &[u8] {
        self.header.bytes()
    }

    /// The sealed banner buffer; empty when no banner was configured.
    pub fn banner(&self) -> &[u8] {
        self.banner.bytes()
    }

    /// The sealed file-name table.
    pub fn fntb(&self) -> &[u8] {
        self.fntb.bytes()
    }

    /// The sealed file-allocation table; empty when the image holds
    /// neither files nor overlays.
    pub fn fatb(&self) -> &[u8] {
        self.fatb.bytes()
    }

    /// Chip capacity computed by [`seal`](RomPacker::seal).
    pub fn tailsize(&self) -> u64 {
        self.tailsize
    }

    pub(crate) fn assert_open(&self) -> Result<(), Error> {
        match self.state {
            State::Open => Ok(()),
            _ => Err(Error::Sealed),
        }
    }

    /// Adds one filesystem record (`source,target`) from the DSV stream.
    ///
    /// The source file must exist; its current size determines the
    /// member's layout.
    pub fn add_file(&mut self, record: &common::dsv::Record<'_>, line: u32) -> Result<(), Error> {
        self.assert_open()?;

        if record.fields.len() != 2 {
            return Err(common::dsv::Error::NumFields {
                line,
                expected: 2,
                found: record.fields.len(),
            }
            .into());
        }

        let source = record.fields[0].to_vec();
        let target = record.fields[1].to_vec();
        let size = std::fs::metadata(to_path(&source))
            .map_err(|_| Error::FileOpen {
                context: "filesystem",
                line,
                path: lossy(&source),
            })?
            .len();

        debug!(
            "filesystem: {:#010X},{:#010X},{},{}",
            size,
            pad_for(size),
            lossy(&source),
            lossy(&target),
        );

        self.filesys.push(RomFile {
            size,
            pad: pad_for(size),
            packing_id: self.filesys.len(),
            filesys_id: 0,
            offset: 0,
            source,
            target,
        });
        Ok(())
    }

    /// Computes the final layout: member offsets, the filesystem tables,
    /// the chip capacity, and the header and banner checksums.
    ///
    /// Transitions the packer out of its input-accepting state; fails with
    /// [`Error::OverCapacity`] when the image outgrows the storage type.
    pub fn seal(&mut self) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::Sealed);
        }
        self.state = State::Sealed;

        debug!("rompacker: sealing the packer...");

        // One slot per overlay and per filesystem entry.
        let slots = self.ovy9.len() + self.ovy7.len() + self.filesys.len();
        if slots > 0 {
            self.fatb = Member::buf("%FATB%", vec![0; 8 * slots]);
        }

        let mut cursor = header::HEADER_BSIZE as u64;
        let mut last_pad = 0;
        let mut file_id = 0;

        // ARM9 block: static binary, overlay table, overlays.
        put_u32(&mut self.header, header::OFS_ARM9_ROMOFFSET, cursor as u32);
        advance(&mut cursor, &mut last_pad, &mut self.arm9);

        let ovt9_offset = if self.ovt9.size > 0 { cursor as u32 } else { 0 };
        put_u32(&mut self.header, header::OFS_OVT9_ROMOFFSET, ovt9_offset);
        put_u32(&mut self.header, header::OFS_OVT9_BSIZE, self.ovt9.size as u32);
        advance(&mut cursor, &mut last_pad, &mut self.ovt9);

        for ovy in &mut self.ovy9 {
            advance(&mut cursor, &mut last_pad, ovy);
            fat_entry(&mut self.fatb, file_id, ovy.offset, ovy.offset + ovy.size);
            file_id += 1;
        }

        // The same for the ARM7 block.
        put_u32(&mut self.header, header::OFS_ARM7_ROMOFFSET, cursor as u32);
        advance(&mut cursor, &mut last_pad, &mut self.arm7);

        let ovt7_offset = if self.ovt7.size > 0 { cursor as u32 } else { 0 };
        put_u32(&mut self.header, header::OFS_OVT7_ROMOFFSET, ovt7_offset);
        put_u32(&mut self.header, header::OFS_OVT7_BSIZE, self.ovt7.size as u32);
        advance(&mut cursor, &mut last_pad, &mut self.ovt7);

        for ovy in &mut self.ovy7 {
            advance(&mut cursor, &mut last_pad, ovy);
            fat_entry(&mut self.fatb, file_id, ovy.offset, ovy.offset + ovy.size);
            file_id += 1;
        }

        // Filesystem ids follow the case-insensitive target-path sort;
        // slots and layout keep the insertion order, so the table maps
        // sorted ids back to actual positions.
        let overlay_count = file_id as u16;
        let mut sorted = self.filesys.clone();
        sorted.sort_by(|a, b| fnt::cmp_target_paths(&a.target, &b.target));
        for (rank, file) in sorted.iter().enumerate() {
            self.filesys[file.packing_id].filesys_id = overlay_count + rank as u16;
        }

        let fnt = Fnt::build(sorted.iter().map(|f| f.target.as_slice()), overlay_count);
        self.fntb = Member::buf("%FNTB%", fnt.to_bytes());

        put_u32(&mut self.header, header::OFS_FNTB_ROMOFFSET, cursor as u32);
        put_u32(&mut self.header, header::OFS_FNTB_BSIZE, self.fntb.size as u32);
        advance(&mut cursor, &mut last_pad, &mut self.fntb);

        let fatb_offset = if self.fatb.size > 0 { cursor as u32 } else { 0 };
        put_u32(&mut self.header, header::OFS_FATB_ROMOFFSET, fatb_offset);
        put_u32(&mut self.header, header::OFS_FATB_BSIZE, self.fatb.size as u32);
        advance(&mut cursor, &mut last_pad, &mut self.fatb);

        let banner_offset = if self.banner.size > 0 { cursor as u32 } else { 0 };
        put_u32(&mut self.header, header::OFS_BANNER_ROMOFFSET, banner_offset);
        advance(&mut cursor, &mut last_pad, &mut self.banner);

        for file in &mut self.filesys {
            file.offset = cursor;
            fat_entry(&mut self.fatb, usize::from(file.filesys_id), cursor, cursor + file.size);
            cursor += file.size + file.pad;
            if file.size > 0 {
                last_pad = file.pad;
            }
        }

        // The trailing pad of the final member is not part of the image.
        let romsize = cursor - last_pad;
        self.romsize = romsize;

        // Smallest chip capacity that fits: 128 KB doubled up to the
        // storage type's ceiling.
        let max_shift = if self.prom {
            header::MAX_CAPSHIFT_PROM
        } else {
            header::MAX_CAPSHIFT_MROM
        };
        let shift = fit_capacity(romsize, max_shift).ok_or(Error::OverCapacity {
            size: romsize,
            max: header::TRY_CAPSHIFT_BASE << max_shift,
        })?;
        self.tailsize = header::TRY_CAPSHIFT_BASE << shift;

        self.header.bytes_mut()[header::OFS_CAPACITY] = shift as u8;
        put_u32(&mut self.header, header::OFS_ROM_BSIZE, romsize as u32);
        put_u32(&mut self.header, header::OFS_HEADER_BSIZE, header::HEADER_BSIZE as u32);
        put_u32(&mut self.header, header::OFS_ARM9_BUILDINFO, 0x0000_4BA0);

        // Banner checksums, one per size class the version reaches.
        if self.banner.size > 0 {
            let bannerver = self.bannerver;
            let buf = self.banner.bytes_mut();
            let crc = crc16(&buf[banner::OFS_CRC_REGION..banner::BANNER_BSIZE_V1]);
            LittleEndian::write_u16(&mut buf[banner::OFS_CRC_V1..banner::OFS_CRC_V1 + 2], crc);
            if bannerver >= 2 {
                let crc = crc16(&buf[banner::OFS_CRC_REGION..banner::BANNER_BSIZE_V2]);
                LittleEndian::write_u16(&mut buf[banner::OFS_CRC_V2..banner::OFS_CRC_V2 + 2], crc);
            }
            if bannerver >= 3 {
                let crc = crc16(&buf[banner::OFS_CRC_REGION..banner::BANNER_BSIZE_V3]);
                LittleEndian::write_u16(&mut buf[banner::OFS_CRC_V3..banner::OFS_CRC_V3 + 2], crc);
            }
        }

        let buf = self.header.bytes_mut();
        let crc = crc16(&buf[..header::OFS_HEADER_CRC]);
        LittleEndian::write_u16(&mut buf[header::OFS_HEADER_CRC..header::OFS_HEADER_CRC + 2], crc);

        debug!(
            "rompacker: sealed, romsize {:#010X} ({}), capacity {:#010X} ({})",
            romsize,
            FileSize(romsize),
            self.tailsize,
            FileSize(self.tailsize),
        );
        Ok(())
    }

    /// Streams the image to `sink` in member order, padding each member
    /// with the fill byte.
    ///
    /// Without the fill-tail option the image ends with the last member's
    /// content; with it, fill bytes extend the image to the chip
    /// capacity.
    pub fn dump<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<(), Error> {
        match self.state {
            State::Open => return Err(Error::Packing),
            State::Dumped => return Err(Error::Dumped),
            State::Sealed => {}
        }
        self.state = State::Dumped;

        debug!("rompacker: dumping contents...");

        enum Piece<'a> {
            Member(&'a Member),
            File(&'a RomFile),
        }

        let mut pieces = vec![Piece::Member(&self.header)];
        pieces.push(Piece::Member(&self.arm9));
        pieces.push(Piece::Member(&self.ovt9));
        pieces.extend(self.ovy9.iter().map(Piece::Member));
        pieces.push(Piece::Member(&self.arm7));
        pieces.push(Piece::Member(&self.ovt7));
        pieces.extend(self.ovy7.iter().map(Piece::Member));
        pieces.push(Piece::Member(&self.fntb));
        pieces.push(Piece::Member(&self.fatb));
        pieces.push(Piece::Member(&self.banner));
        pieces.extend(self.filesys.iter().map(Piece::File));
        pieces.retain(|piece| match piece {
            Piece::Member(member) => member.size > 0,
            Piece::File(file) => file.size > 0,
        });

        let mut scratch = [0; 4096];
        let last = pieces.len().saturating_sub(1);
        for (i, piece) in pieces.iter().enumerate() {
            let pad = match piece {
                Piece::Member(member) => {
                    debug!("rompacker: member {} at {:#010X}", lossy(&member.name), member.offset);
                    match &member.source {
                        Source::Buf(buf) => sink.write_all(buf)?,
                        Source::File(file) => stream(sink, file, member.size, &mut scratch)?,
                    }
                    member.pad
                }
                Piece::File(entry) => {
                    debug!("rompacker: file {} at {:#010X}", lossy(&entry.target), entry.offset);
                    let file = File::open(to_path(&entry.source))?;
                    stream(sink, &file, entry.size, &mut scratch)?;
                    entry.pad
                }
            };

            if i < last {
                fill(sink, self.fillwith, pad)?;
            }
        }

        if self.filltail {
            fill(sink, self.fillwith, self.tailsize - self.romsize)?;
        }

        Ok(())
    }
}

impl Default for RomPacker {
    fn default() -> RomPacker {
        RomPacker::new()
    }
}

/// Places a member at the cursor and advances past its content and pad.
///
/// Zero-size members occupy no space and leave the running last-pad
/// untouched.
fn advance(cursor: &mut u64, last_pad: &mut u64, member: &mut Member) {
    member.offset = *cursor;
    *cursor += member.size + member.pad;
    if member.size > 0 {
        *last_pad = member.pad;
    }
}

fn put_u32(member: &mut Member, ofs: usize, value: u32) {
    LittleEndian::write_u32(&mut member.bytes_mut()[ofs..ofs + 4], value);
}

fn fat_entry(fatb: &mut Member, slot: usize, start: u64, end: u64) {
    let buf = fatb.bytes_mut();
    LittleEndian::write_u32(&mut buf[8 * slot..8 * slot + 4], start as u32);
    LittleEndian::write_u32(&mut buf[8 * slot + 4..8 * slot + 8], end as u32);
}

/// Smallest capacity shift whose chip size holds `romsize`, if any.
fn fit_capacity(romsize: u64, max_shift: u32) -> Option<u32> {
    (0..=max_shift).find(|&shift| romsize < header::TRY_CAPSHIFT_BASE << shift)
}

fn stream<W: Write + ?Sized>(
    sink: &mut W,
    mut file: &File,
    size: u64,
    scratch: &mut [u8; 4096],
) -> io::Result<()> {
    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(scratch.len() as u64) as usize;
        file.read_exact(&mut scratch[..want])?;
        sink.write_all(&scratch[..want])?;
        remaining -= want as u64;
    }
    Ok(())
}

fn fill<W: Write + ?Sized>(sink: &mut W, with: u8, mut count: u64) -> io::Result<()> {
    let block = [with; 4096];
    while count > 0 {
        let n = count.min(block.len() as u64) as usize;
        sink.write_all(&block[..n])?;
        count -= n as u64;
    }
    Ok(())
}

pub(crate) fn to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_shift_search() {
        assert_eq!(fit_capacity(0x4C80, header::MAX_CAPSHIFT_MROM), Some(0));
        assert_eq!(fit_capacity(0x0002_0000, header::MAX_CAPSHIFT_MROM), Some(1));
        assert_eq!(fit_capacity(0x0400_0000 - 1, header::MAX_CAPSHIFT_MROM), Some(9));
        assert_eq!(fit_capacity(0x0400_0000, header::MAX_CAPSHIFT_MROM), None);
        assert_eq!(fit_capacity(0x1_0000_0001, header::MAX_CAPSHIFT_MROM), None);
        assert_eq!(fit_capacity(0x0040_0000, header::MAX_CAPSHIFT_PROM), None);
        assert_eq!(fit_capacity(0x003F_FFFF, header::MAX_CAPSHIFT_PROM), Some(5));
    }

    #[test]
    fn dump_requires_seal() {
        let mut packer = RomPacker::new();
        let mut sink = Vec::new();
        assert!(matches!(packer.dump(&mut sink), Err(Error::Packing)));
    }

    #[test]
    fn seal_fires_once() {
        let mut packer = RomPacker::new();
        packer.seal().unwrap();
        assert!(matches!(packer.seal(), Err(Error::Sealed)));
    }

    #[test]
    fn dump_fires_once() {
        let mut packer = RomPacker::new();
        packer.seal().unwrap();
        let mut sink = Vec::new();
        packer.dump(&mut sink).unwrap();
        assert!(matches!(packer.dump(&mut sink), Err(Error::Dumped)));
    }

    // An empty packer still carries its header and a root-only FNT.
    #[test]
    fn empty_packer_layout() {
        let mut packer = RomPacker::new();
        packer.seal().unwrap();

        let header = packer.header();
        assert_eq!(LittleEndian::read_u32(&header[header::OFS_FNTB_ROMOFFSET..]), 0x4000);
        assert_eq!(LittleEndian::read_u32(&header[header::OFS_FNTB_BSIZE..]), 9);
        assert_eq!(LittleEndian::read_u32(&header[header::OFS_FATB_ROMOFFSET..]), 0);
        assert_eq!(LittleEndian::read_u32(&header[header::OFS_FATB_BSIZE..]), 0);
        assert_eq!(LittleEndian::read_u32(&header[header::OFS_BANNER_ROMOFFSET..]), 0);
        assert_eq!(header[header::OFS_CAPACITY], 0);
        assert_eq!(packer.tailsize(), 0x0002_0000);

        let mut image = Vec::new();
        packer.dump(&mut image).unwrap();
        // Header plus the unpadded root-only FNT.
        assert_eq!(image.len(), 0x4000 + 9);
    }
}
