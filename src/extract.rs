//! Archive extraction.
//!
//! [`ArchiveReader`] walks the stream one header at a time; [`extract_archive`] recreates each
//! entry through a [`Filesystem`].  Entries are processed strictly in stream order and the first
//! error stops extraction.  Whatever was extracted up to that point stays on disk.

use std::{
    cmp::Reverse,
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use zerocopy::{FromZeros, IntoBytes};

use crate::{
    error::{ArchiveError, HeaderError, Result},
    fs::Filesystem,
    header::{self, Entry, EntryKind, HeaderRecord, BLOCK_SIZE},
    util::{padding_for, read_exactish, skip_bytes},
    Options, LISTING_TARGET,
};

/// Mode for directories that are created implicitly as parents of an entry.  The umask applies.
const PARENT_DIR_MODE: u32 = 0o777;

/// Sequential reader over the records of an archive.
pub struct ArchiveReader<R: Read> {
    source: R,
    offset: u64,
    header_offset: u64,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(source: R) -> Self {
        ArchiveReader {
            source,
            offset: 0,
            header_offset: 0,
        }
    }

    /// Stream offset of the most recently read header.
    pub fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Reads and validates the next header.
    ///
    /// Returns `Ok(None)` at the end-of-archive marker, and also if the stream ends cleanly at a
    /// block boundary without one.  Nothing after the marker is read.  The content of the
    /// returned entry has to be consumed with [`Self::copy_content`] or [`Self::skip_content`]
    /// before the next call.
    pub fn next_entry(&mut self) -> Result<Option<Entry>> {
        let mut header = HeaderRecord::new_zeroed();
        let complete = read_exactish(&mut self.source, header.as_mut_bytes())
            .map_err(|err| ArchiveError::stream("read", err))?;

        self.header_offset = self.offset;
        if !complete {
            warn!("archive ends at offset {} without an end marker", self.offset);
            return Ok(None);
        }
        self.offset += BLOCK_SIZE as u64;

        header::decode(&header).map_err(|source| self.invalid(source))
    }

    fn invalid(&self, source: HeaderError) -> ArchiveError {
        ArchiveError::InvalidHeader {
            offset: self.header_offset,
            source,
        }
    }

    /// Copies `size` bytes of entry content to `out` and skips the padding after it.  `path` is
    /// only used to report errors writing to `out`.
    pub fn copy_content(&mut self, size: u64, out: &mut impl Write, path: &Path) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut remaining = size;

        while remaining > 0 {
            let n = remaining.min(BLOCK_SIZE as u64) as usize;
            self.source
                .read_exact(&mut block[..n])
                .map_err(|err| ArchiveError::stream("read", err))?;
            out.write_all(&block[..n])
                .map_err(|err| ArchiveError::io("write", path, err))?;
            remaining -= n as u64;
        }

        self.offset += size;
        self.skip_padding(size)
    }

    /// Skips `size` bytes of entry content and the padding after it.
    pub fn skip_content(&mut self, size: u64) -> Result<()> {
        skip_bytes(&mut self.source, size).map_err(|err| ArchiveError::stream("read", err))?;
        self.offset += size;
        self.skip_padding(size)
    }

    fn skip_padding(&mut self, size: u64) -> Result<()> {
        let padding = padding_for(size) as u64;
        skip_bytes(&mut self.source, padding).map_err(|err| ArchiveError::stream("read", err))?;
        self.offset += padding;
        Ok(())
    }
}

fn create_parents<F: Filesystem>(fs: &F, dir: &Path) -> Result<()> {
    let mut current = PathBuf::new();
    for component in dir.components() {
        current.push(component);
        match fs.create_dir(&current, PARENT_DIR_MODE) {
            Ok(()) => debug!("created {current:?}"),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(ArchiveError::io("mkdir", current, err)),
        }
    }
    Ok(())
}

/// Applies owner (if requested), mode and mtime.  The owner goes first because chown() may clear
/// the setuid and setgid bits.
fn apply_metadata<F: Filesystem>(
    fs: &F,
    path: &Path,
    entry: &Entry,
    options: &Options,
) -> Result<()> {
    if options.same_owner {
        fs.set_owner(path, entry.uid, entry.gid)
            .map_err(|err| ArchiveError::io("chown", path, err))?;
    }
    fs.set_mode(path, entry.mode)
        .map_err(|err| ArchiveError::io("chmod", path, err))?;
    fs.set_mtime(path, entry.mtime)
        .map_err(|err| ArchiveError::io("utime", path, err))
}

fn extract_file<R: Read, F: Filesystem>(
    reader: &mut ArchiveReader<R>,
    fs: &F,
    path: &Path,
    entry: &Entry,
    options: &Options,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_parents(fs, parent)?;
    }

    let mut out = match fs.create_new(path, entry.mode) {
        Ok(out) => out,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Err(ArchiveError::FileExists(path.to_path_buf()))
        }
        Err(err) => return Err(ArchiveError::io("create", path, err)),
    };

    reader.copy_content(entry.size, &mut out, path)?;
    out.flush()
        .map_err(|err| ArchiveError::io("write", path, err))?;
    drop(out);

    apply_metadata(fs, path, entry, options)
}

fn extract_entries<R: Read, F: Filesystem>(
    reader: &mut ArchiveReader<R>,
    fs: &F,
    options: &Options,
    directories: &mut Vec<(PathBuf, Entry)>,
) -> Result<()> {
    while let Some(entry) = reader.next_entry()? {
        if options.verbose {
            info!(target: LISTING_TARGET, "{}", entry.path.display());
        }

        let path = header::relative_path(&entry.path).map_err(|source| reader.invalid(source))?;

        match entry.kind {
            EntryKind::RegularFile => {
                if path.as_os_str().is_empty() {
                    return Err(reader.invalid(HeaderError::UnsafePath(entry.path)));
                }
                extract_file(reader, fs, &path, &entry, options)?;
            }
            EntryKind::Directory => {
                // other archivers may attach content to entries that end up here
                reader.skip_content(entry.size)?;
                if path.as_os_str().is_empty() {
                    debug!("not touching the destination directory itself");
                    continue;
                }
                create_parents(fs, &path)?;
                directories.push((path, entry));
            }
        }
    }

    Ok(())
}

/// Extracts every entry of the archive read from `source`.
///
/// Paths are made relative to the base of `fs`.  Existing files are never overwritten: that
/// fails with [`ArchiveError::FileExists`].  Directories that already exist are reused.  The mode
/// and mtime of directories are set after the last entry, so that adding their contents doesn't
/// disturb them.  This also happens when extraction stops on an error, for the directories
/// extracted up to that point.
pub fn extract_archive<R: Read, F: Filesystem>(source: R, fs: &F, options: &Options) -> Result<()> {
    let mut reader = ArchiveReader::new(source);
    let mut directories = vec![];

    let extracted = extract_entries(&mut reader, fs, options, &mut directories);
    if let Err(err) = &extracted {
        debug!(
            "restoring {} directories after error: {err}",
            directories.len()
        );
    }

    // deepest first, so that a parent's mtime is set after its children are done
    directories.sort_by_key(|(path, _)| Reverse(path.components().count()));
    let restored = directories
        .iter()
        .try_for_each(|(path, entry)| apply_metadata(fs, path, entry, options));

    // the extraction error takes precedence
    extracted.and(restored)
}
