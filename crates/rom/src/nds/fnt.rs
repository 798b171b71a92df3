//! File-name table construction.
//!
//! The FNT encodes the virtual directory tree as two concatenated
//! sections, one entry of each per directory:
//!
//! - a header: `u32` offset to the directory's contents (from the start
//!   of the FNT), `u16` id of its first file, `u16` id of its parent
//!   (for the root, the count of directories);
//! - contents: a sequence of entries terminated by a `0x00` byte. Each
//!   entry is a tag byte (low 7 bits the name length, bit 7 set for a
//!   subdirectory), the name bytes, and for subdirectories a `u16`
//!   directory id.
//!
//! Directories live in a flat arena and reference each other by id only;
//! the tree carries upward parent ids, so back-pointers would cycle.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use common::str::cmp_ignore_ascii_case;

/// Directory id of the filesystem root. Further directories count up from
/// here in creation order.
pub const ROOT_ID: u16 = 0xF000;

/// A directory entry: a file leaf or a link down to a subdirectory.
#[derive(Clone, Debug)]
struct Node {
    name: Vec<u8>,
    /// `Some` holds the subdirectory id; `None` marks a file.
    subdir: Option<u16>,
}

#[derive(Clone, Debug)]
struct Directory {
    children: Vec<Node>,
    /// Id of the first file inside this directory or its descendants,
    /// snapshot at creation time.
    first_file_id: u16,
    /// Parent directory id; for the root, the directory count.
    parent: u16,
}

/// The constructed file-name table.
#[derive(Clone, Debug)]
pub struct Fnt {
    dirs: Vec<Directory>,
}

impl Fnt {
    /// Builds the directory tree for `targets`, an iterator of absolute
    /// target paths pre-sorted with [`cmp_target_paths`].
    ///
    /// File ids are assigned sequentially from `first_file_id` in
    /// iteration order; intermediate directories are created on first
    /// use.
    pub fn build<'a, I>(targets: I, first_file_id: u16) -> Fnt
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut dirs = vec![Directory {
            children: Vec::new(),
            first_file_id,
            parent: 0,
        }];

        let mut next_file = first_file_id;
        for target in targets {
            let path = target.strip_prefix(b"/").unwrap_or(target);
            let components: Vec<&[u8]> = path.split(|&c| c == b'/').collect();
            let (basename, dirnames) = match components.split_last() {
                Some(split) => split,
                None => continue,
            };

            let mut cur = 0;
            for &component in dirnames {
                cur = match find_subdir(&dirs[cur], component) {
                    Some(id) => usize::from(id & 0x0FFF),
                    None => {
                        let id = ROOT_ID | dirs.len() as u16;
                        let parent = dir_id(cur);
                        dirs[cur].children.push(Node {
                            name: component.to_vec(),
                            subdir: Some(id),
                        });
                        dirs.push(Directory {
                            children: Vec::new(),
                            first_file_id: next_file,
                            parent,
                        });
                        dirs.len() - 1
                    }
                };
            }

            dirs[cur].children.push(Node {
                name: basename.to_vec(),
                subdir: None,
            });
            next_file += 1;
        }

        dirs[0].parent = dirs.len() as u16;
        Fnt { dirs }
    }

    /// Number of directories, root included.
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Byte size of the serialized table.
    pub fn size(&self) -> usize {
        self.dirs
            .iter()
            .map(|dir| {
                // 8 header bytes and a contents terminator per directory.
                9 + dir
                    .children
                    .iter()
                    .map(|node| 1 + node.name.len() + if node.subdir.is_some() { 2 } else { 0 })
                    .sum::<usize>()
            })
            .sum()
    }

    /// Serializes the table.
    ///
    /// Both sections grow in tandem: the header cursor advances 8 bytes
    /// per directory while the contents cursor walks the entry lists.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0; self.size()];
        let mut header = 0;
        let mut contents = 8 * self.dirs.len();

        for dir in &self.dirs {
            LittleEndian::write_u32(&mut buf[header..header + 4], contents as u32);
            LittleEndian::write_u16(&mut buf[header + 4..header + 6], dir.first_file_id);
            LittleEndian::write_u16(&mut buf[header + 6..header + 8], dir.parent);
            header += 8;

            for node in &dir.children {
                let len = node.name.len();
                match node.subdir {
                    Some(id) => {
                        buf[contents] = 0x80 | len as u8;
                        buf[contents + 1..contents + 1 + len].copy_from_slice(&node.name);
                        contents += 1 + len;
                        LittleEndian::write_u16(&mut buf[contents..contents + 2], id);
                        contents += 2;
                    }
                    None => {
                        buf[contents] = len as u8;
                        buf[contents + 1..contents + 1 + len].copy_from_slice(&node.name);
                        contents += 1 + len;
                    }
                }
            }

            // The terminator byte is already zero.
            contents += 1;
        }

        buf
    }
}

fn dir_id(index: usize) -> u16 {
    ROOT_ID | index as u16
}

fn find_subdir(dir: &Directory, name: &[u8]) -> Option<u16> {
    dir.children
        .iter()
        .find(|node| node.subdir.is_some() && node.name == name)
        .and_then(|node| node.subdir)
}

/// Orders two absolute target paths for file-id assignment.
///
/// Paths compare component by component, ASCII case-insensitively. When
/// one path ends at a depth where the other descends further, the ending
/// path (a file) sorts first regardless of the component names.
pub fn cmp_target_paths(a: &[u8], b: &[u8]) -> Ordering {
    let av: Vec<&[u8]> = components(a).collect();
    let bv: Vec<&[u8]> = components(b).collect();

    let mut depth = 0;
    loop {
        let a_file = depth + 1 >= av.len();
        let b_file = depth + 1 >= bv.len();
        if a_file != b_file {
            return if a_file { Ordering::Less } else { Ordering::Greater };
        }

        match cmp_ignore_ascii_case(av[depth], bv[depth]) {
            Ordering::Equal if !a_file => depth += 1,
            order => return order,
        }
    }
}

fn components(path: &[u8]) -> impl Iterator<Item = &[u8]> {
    path.strip_prefix(b"/")
        .unwrap_or(path)
        .split(|&c| c == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort(mut paths: Vec<&[u8]>) -> Vec<&[u8]> {
        paths.sort_by(|a, b| cmp_target_paths(a, b));
        paths
    }

    #[test]
    fn files_precede_subdirectories() {
        let sorted = sort(vec![
            b"/data/z.bin",
            b"/data/a.bin",
            b"/data/sub/x.bin",
            b"/b.bin",
        ]);
        assert_eq!(
            sorted,
            vec![
                &b"/b.bin"[..],
                b"/data/a.bin",
                b"/data/z.bin",
                b"/data/sub/x.bin",
            ]
        );
    }

    #[test]
    fn file_wins_even_against_lesser_directory_name() {
        // "zebra.bin" is a file at depth 0, "apple" descends.
        assert_eq!(cmp_target_paths(b"/zebra.bin", b"/apple/x.bin"), Ordering::Less);
    }

    #[test]
    fn comparison_ignores_ascii_case() {
        assert_eq!(cmp_target_paths(b"/DATA/a.bin", b"/data/A.BIN"), Ordering::Equal);
        assert_eq!(cmp_target_paths(b"/data/a.bin", b"/DATA/b.bin"), Ordering::Less);
    }

    #[test]
    fn empty_filesystem_is_a_lone_root() {
        let fnt = Fnt::build(std::iter::empty(), 3);
        assert_eq!(fnt.dir_count(), 1);
        assert_eq!(fnt.size(), 9);

        let bytes = fnt.to_bytes();
        assert_eq!(bytes.len(), 9);
        // Contents at offset 8, first file id 3, parent = directory count.
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 8);
        assert_eq!(LittleEndian::read_u16(&bytes[4..6]), 3);
        assert_eq!(LittleEndian::read_u16(&bytes[6..8]), 1);
        assert_eq!(bytes[8], 0);
    }

    #[test]
    fn nested_directories() {
        let targets: [&[u8]; 4] = [
            b"/b.bin",
            b"/data/a.bin",
            b"/data/z.bin",
            b"/data/sub/x.bin",
        ];
        let fnt = Fnt::build(targets.iter().copied(), 0);
        assert_eq!(fnt.dir_count(), 3);

        let bytes = fnt.to_bytes();
        assert_eq!(bytes.len(), fnt.size());
        assert_eq!(bytes.len(), 0x40);

        // Root: contents after the three headers, parent is the count.
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 24);
        assert_eq!(LittleEndian::read_u16(&bytes[6..8]), 3);
        // "/data" was created when "/data/a.bin" (file id 1) was reached.
        assert_eq!(LittleEndian::read_u16(&bytes[12..14]), 1);
        assert_eq!(LittleEndian::read_u16(&bytes[14..16]), ROOT_ID);
        // "/data/sub" holds the last file, id 3, and hangs off 0xF001.
        assert_eq!(LittleEndian::read_u16(&bytes[20..22]), 3);
        assert_eq!(LittleEndian::read_u16(&bytes[22..24]), 0xF001);

        // Root contents: file "b.bin", then subdirectory "data" (0xF001).
        assert_eq!(bytes[24], 5);
        assert_eq!(&bytes[25..30], b"b.bin");
        assert_eq!(bytes[30], 0x80 | 4);
        assert_eq!(&bytes[31..35], b"data");
        assert_eq!(LittleEndian::read_u16(&bytes[35..37]), 0xF001);
        assert_eq!(bytes[37], 0);
    }

    #[test]
    fn duplicate_directories_are_reused() {
        let targets: [&[u8]; 2] = [b"/data/a.bin", b"/data/b.bin"];
        let fnt = Fnt::build(targets.iter().copied(), 0);
        assert_eq!(fnt.dir_count(), 2);
    }
}
