//! The 512-byte ustar header record.
//!
//! [`HeaderRecord`] is the exact on-disk layout, parsed and serialised with zerocopy.  [`Entry`]
//! is the typed metadata it encodes.  [`encode`] and [`decode`] convert between the two and are
//! pure: owner and group names are resolved by the caller and passed in on the entry.
//!
//! Numeric fields are right-justified, zero-padded octal ASCII followed by a NUL.  The checksum
//! is the unsigned sum of all header bytes with the checksum field itself counted as eight
//! spaces; it is stored as six octal digits followed by NUL and space.

use std::{
    ffi::OsString,
    mem::{offset_of, size_of},
    os::unix::ffi::{OsStrExt, OsStringExt},
    path::{Path, PathBuf},
};

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::HeaderError;

/// Size of a header record and of every content block.
pub const BLOCK_SIZE: usize = 512;

/// The end of an archive is marked by this many zero blocks.
pub const END_BLOCKS: usize = 2;

/// Permission bits kept in the mode field, including setuid, setgid and sticky.
pub const MODE_MASK: u32 = 0o7777;

const NAME_LEN: usize = 100;
const PREFIX_LEN: usize = 155;
const CHECKSUM_OFFSET: usize = 148;
const CHECKSUM_LEN: usize = 8;

const MAGIC: &[u8; 6] = b"ustar\0";
const VERSION: &[u8; 2] = b"00";

const REGTYPE: u8 = b'0';
const DIRTYPE: u8 = b'5';

#[derive(Clone, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct HeaderRecord {
    pub name: [u8; NAME_LEN],
    pub mode: [u8; 8],
    pub uid: [u8; 8],
    pub gid: [u8; 8],
    pub size: [u8; 12],
    pub mtime: [u8; 12],
    pub checksum: [u8; CHECKSUM_LEN],
    pub typeflag: u8,
    pub linkname: [u8; 100],
    pub magic: [u8; 6],
    pub version: [u8; 2],
    pub uname: [u8; 32],
    pub gname: [u8; 32],
    pub devmajor: [u8; 8],
    pub devminor: [u8; 8],
    pub prefix: [u8; PREFIX_LEN],
    pub pad: [u8; 12],
}

const _: () = assert!(size_of::<HeaderRecord>() == BLOCK_SIZE);
const _: () = assert!(offset_of!(HeaderRecord, mode) == 100);
const _: () = assert!(offset_of!(HeaderRecord, uid) == 108);
const _: () = assert!(offset_of!(HeaderRecord, gid) == 116);
const _: () = assert!(offset_of!(HeaderRecord, size) == 124);
const _: () = assert!(offset_of!(HeaderRecord, mtime) == 136);
const _: () = assert!(offset_of!(HeaderRecord, checksum) == CHECKSUM_OFFSET);
const _: () = assert!(offset_of!(HeaderRecord, typeflag) == 156);
const _: () = assert!(offset_of!(HeaderRecord, magic) == 257);
const _: () = assert!(offset_of!(HeaderRecord, uname) == 265);
const _: () = assert!(offset_of!(HeaderRecord, gname) == 297);
const _: () = assert!(offset_of!(HeaderRecord, prefix) == 345);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    RegularFile,
    Directory,
}

impl EntryKind {
    fn typeflag(self) -> u8 {
        match self {
            EntryKind::RegularFile => REGTYPE,
            EntryKind::Directory => DIRTYPE,
        }
    }
}

/// Metadata of one archive member.
///
/// File content is not part of the entry: the writer streams it from the source file and the
/// reader streams it into the destination file, one block at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Content length in bytes.  Always encoded as 0 for directories.
    pub size: u64,
    /// Seconds since the epoch.
    pub mtime: u64,
    pub user_name: Option<OsString>,
    pub group_name: Option<OsString>,
}

impl Entry {
    /// Number of content blocks that follow the header of this entry in the archive.
    pub fn content_blocks(&self) -> u64 {
        self.size.div_ceil(BLOCK_SIZE as u64)
    }
}

/// Returns the bytes of a NUL-terminated text field, or the whole field if it is full.
fn text(field: &[u8]) -> &[u8] {
    match field.iter().position(|&b| b == 0) {
        Some(end) => &field[..end],
        None => field,
    }
}

/// Copies as much of `value` as fits into `field`.
fn write_text(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
}

fn write_octal(field: &mut [u8], value: u64, name: &'static str) -> Result<(), HeaderError> {
    let width = field.len() - 1;
    let digits = format!("{value:0width$o}");
    if digits.len() > width {
        return Err(HeaderError::FieldOverflow { field: name, value });
    }
    field[..width].copy_from_slice(digits.as_bytes());
    field[width] = 0;
    Ok(())
}

/// Parses an octal field the way strtol() would: leading spaces are skipped, and the number ends
/// at the first non-octal byte.  A field without any digits is an error.
fn parse_octal(field: &[u8], name: &'static str) -> Result<u64, HeaderError> {
    let invalid = || HeaderError::InvalidField { field: name };

    let start = field
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(field.len());
    let digits: Vec<u8> = field[start..]
        .iter()
        .take_while(|b| (b'0'..=b'7').contains(*b))
        .map(|b| b - b'0')
        .collect();

    if digits.is_empty() {
        return Err(invalid());
    }

    digits.into_iter().try_fold(0u64, |acc, digit| {
        acc.checked_mul(8)
            .and_then(|acc| acc.checked_add(u64::from(digit)))
            .ok_or_else(invalid)
    })
}

/// Splits an encoded path into its `(prefix, name)` fields.
///
/// Paths shorter than the name field are stored unsplit.  Longer paths are split at the first
/// '/' that leaves a non-empty name short enough for the name field; that slash itself is not
/// stored.  Returns `None` if no such split exists or the prefix would not fit.
fn split_path(path: &[u8]) -> Option<(&[u8], &[u8])> {
    if path.len() < NAME_LEN {
        return Some((&[], path));
    }

    let (prefix, name) = path
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'/')
        .map(|(i, _)| (&path[..i], &path[i + 1..]))
        .find(|(_, name)| !name.is_empty() && name.len() < NAME_LEN)?;

    (!prefix.is_empty() && prefix.len() <= PREFIX_LEN).then_some((prefix, name))
}

impl HeaderRecord {
    /// An all-zero record marks the end of the archive.
    pub fn is_end(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// Computes the checksum of the record, counting the checksum field as eight spaces.
    pub fn compute_checksum(&self) -> u64 {
        let bytes = self.as_bytes();
        let blanked = u64::from(b' ') * CHECKSUM_LEN as u64;
        bytes[..CHECKSUM_OFFSET]
            .iter()
            .chain(&bytes[CHECKSUM_OFFSET + CHECKSUM_LEN..])
            .map(|&b| u64::from(b))
            .sum::<u64>()
            + blanked
    }

    pub(crate) fn set_checksum(&mut self) {
        let digits = format!("{:06o}", self.compute_checksum());
        self.checksum[..6].copy_from_slice(digits.as_bytes());
        self.checksum[6] = 0;
        self.checksum[7] = b' ';
    }

    fn is_ustar(&self) -> bool {
        self.magic[..5] == MAGIC[..5]
    }

    /// The full path stored in this record, joining the prefix and name fields.
    pub fn path(&self) -> PathBuf {
        let name = text(&self.name);
        let prefix = if self.is_ustar() {
            text(&self.prefix)
        } else {
            &[]
        };

        let bytes = if prefix.is_empty() {
            name.to_vec()
        } else {
            [prefix, b"/", name].concat()
        };
        PathBuf::from(OsString::from_vec(bytes))
    }
}

fn optional_text(field: &[u8]) -> Option<OsString> {
    match text(field) {
        [] => None,
        value => Some(OsString::from_vec(value.to_vec())),
    }
}

/// Encodes `entry` as a header record with a valid checksum.
///
/// Directory names get a trailing '/' if they lack one.  It is added after splitting and may fill
/// the name field completely.  Fails if the path cannot be split over the name and prefix fields,
/// or a numeric value does not fit its field.
pub fn encode(entry: &Entry) -> Result<HeaderRecord, HeaderError> {
    let mut header = HeaderRecord::new_zeroed();

    let (prefix, name) = split_path(entry.path.as_os_str().as_bytes())
        .ok_or_else(|| HeaderError::UnrepresentablePath(entry.path.clone()))?;
    // the split leaves the name shorter than its field, so the slash always fits
    let mut name = name.to_vec();
    if entry.kind == EntryKind::Directory && !name.ends_with(b"/") {
        name.push(b'/');
    }
    write_text(&mut header.name, &name);
    write_text(&mut header.prefix, prefix);

    let size = match entry.kind {
        EntryKind::RegularFile => entry.size,
        EntryKind::Directory => 0,
    };

    write_octal(&mut header.mode, u64::from(entry.mode & MODE_MASK), "mode")?;
    write_octal(&mut header.uid, u64::from(entry.uid), "uid")?;
    write_octal(&mut header.gid, u64::from(entry.gid), "gid")?;
    write_octal(&mut header.size, size, "size")?;
    write_octal(&mut header.mtime, entry.mtime, "mtime")?;
    header.typeflag = entry.kind.typeflag();

    header.magic = *MAGIC;
    header.version = *VERSION;
    if let Some(user) = &entry.user_name {
        write_text(&mut header.uname, user.as_bytes());
    }
    if let Some(group) = &entry.group_name {
        write_text(&mut header.gname, group.as_bytes());
    }
    write_octal(&mut header.devmajor, 0, "devmajor")?;
    write_octal(&mut header.devminor, 0, "devminor")?;

    header.set_checksum();
    Ok(header)
}

/// Decodes and validates a header record.
///
/// Returns `Ok(None)` for an all-zero record, which ends the archive.  Any type flag other than
/// `'0'` is read as a directory.  The uid and gid are informational and default to 0 if they
/// cannot be parsed.
pub fn decode(header: &HeaderRecord) -> Result<Option<Entry>, HeaderError> {
    if header.is_end() {
        return Ok(None);
    }

    let stored = parse_octal(&header.checksum, "checksum")?;
    let computed = header.compute_checksum();
    if stored != computed {
        return Err(HeaderError::ChecksumMismatch { stored, computed });
    }

    let mode = parse_octal(&header.mode, "mode")? as u32 & MODE_MASK;
    let size = parse_octal(&header.size, "size")?;
    let mtime = parse_octal(&header.mtime, "mtime")?;

    let kind = match header.typeflag {
        REGTYPE => EntryKind::RegularFile,
        _ => EntryKind::Directory,
    };

    Ok(Some(Entry {
        path: header.path(),
        kind,
        mode,
        uid: parse_octal(&header.uid, "uid").map_or(0, |uid| uid as u32),
        gid: parse_octal(&header.gid, "gid").map_or(0, |gid| gid as u32),
        size,
        mtime,
        user_name: optional_text(&header.uname),
        group_name: optional_text(&header.gname),
    }))
}

/// Makes an archived path relative so that it can be placed under a destination directory.
///
/// Leading '/' and '.' components are dropped.  A '..' component is rejected.
pub fn relative_path(path: &Path) -> Result<PathBuf, HeaderError> {
    use std::path::Component;

    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(HeaderError::UnsafePath(path.to_path_buf())),
        }
    }
    Ok(relative)
}
