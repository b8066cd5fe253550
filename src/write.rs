//! Archive creation.
//!
//! [`ArchiveWriter`] walks each root path depth-first, visiting directory children in sorted
//! order, and appends one header per regular file or directory.  Anything else is skipped.
//!
//! Problems with individual entries (a file that can't be opened, a path that doesn't fit in a
//! header, ...) are logged and collected, and the walk carries on.  Failing to write the archive
//! stream itself stops everything, since the stream can't be trusted after that.

use std::{
    collections::HashSet,
    io::{self, ErrorKind, Read, Write},
    path::{Component, Path, PathBuf},
};

use log::{debug, info, trace, warn};
use zerocopy::IntoBytes;

use crate::{
    error::{ArchiveError, HeaderError, Result},
    fs::{Filesystem, Metadata},
    header::{self, Entry, EntryKind, HeaderRecord, BLOCK_SIZE, END_BLOCKS},
    util::{read_to_fill, write_zeros},
    Options, LISTING_TARGET,
};

/// The outcome of a finished archive.
#[derive(Debug)]
pub struct CreateSummary {
    /// Number of header records written.
    pub entries: usize,
    /// Entries that were skipped or archived incompletely.
    pub errors: Vec<ArchiveError>,
}

pub struct ArchiveWriter<'fs, W: Write, F: Filesystem> {
    sink: W,
    fs: &'fs F,
    options: Options,
    visited: HashSet<PathBuf>,
    entries: usize,
    errors: Vec<ArchiveError>,
}

fn encode_error(path: &Path, err: HeaderError) -> ArchiveError {
    match err {
        HeaderError::UnrepresentablePath(path) => ArchiveError::UnrepresentablePath(path),
        HeaderError::FieldOverflow { field, value } => ArchiveError::FieldOverflow {
            path: path.to_path_buf(),
            field,
            value,
        },
        other => ArchiveError::InvalidHeader {
            offset: 0,
            source: other,
        },
    }
}

impl<'fs, W: Write, F: Filesystem> ArchiveWriter<'fs, W, F> {
    pub fn new(sink: W, fs: &'fs F, options: &Options) -> Self {
        ArchiveWriter {
            sink,
            fs,
            options: options.clone(),
            visited: HashSet::new(),
            entries: 0,
            errors: vec![],
        }
    }

    /// Errors collected so far.
    pub fn errors(&self) -> &[ArchiveError] {
        &self.errors
    }

    fn record(&mut self, err: ArchiveError) {
        warn!("{err}");
        self.errors.push(err);
    }

    /// Appends `root` and, if it is a directory, everything below it.
    ///
    /// Only a failure to write the archive is returned as an error.
    pub fn append_path(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let mut stack = vec![root.as_ref().to_path_buf()];

        while let Some(path) = stack.pop() {
            // "dir", "dir/" and "./dir" name the same node
            let key: PathBuf = path
                .components()
                .filter(|component| *component != Component::CurDir)
                .collect();
            if !self.visited.insert(key) {
                debug!("{path:?} was already archived");
                continue;
            }

            if self.options.verbose {
                info!(target: LISTING_TARGET, "{}", path.display());
            }

            let meta = match self.fs.stat(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    self.record(ArchiveError::io("stat", &path, err));
                    continue;
                }
            };

            match meta.kind {
                Some(EntryKind::RegularFile) => self.append_file(&path, &meta)?,
                Some(EntryKind::Directory) => {
                    let children = self.append_directory(&path, &meta)?;
                    // reversed, so that they come off the stack in sorted order
                    stack.extend(children.into_iter().rev());
                }
                None => debug!("skipping {path:?}: not a regular file or directory"),
            }
        }

        Ok(())
    }

    fn entry_for(&self, path: &Path, kind: EntryKind, meta: &Metadata) -> Entry {
        Entry {
            path: path.to_path_buf(),
            kind,
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            size: match kind {
                EntryKind::RegularFile => meta.size,
                EntryKind::Directory => 0,
            },
            // timestamps before the epoch are stored as the epoch
            mtime: u64::try_from(meta.mtime).unwrap_or(0),
            user_name: self.fs.user_name(meta.uid),
            group_name: self.fs.group_name(meta.gid),
        }
    }

    fn encode(&mut self, entry: &Entry) -> Option<HeaderRecord> {
        match header::encode(entry) {
            Ok(header) => Some(header),
            Err(err) => {
                self.record(encode_error(&entry.path, err));
                None
            }
        }
    }

    fn write_header(&mut self, header: &HeaderRecord) -> Result<()> {
        self.sink
            .write_all(header.as_bytes())
            .map_err(|err| ArchiveError::stream("write", err))?;
        self.entries += 1;
        Ok(())
    }

    fn append_file(&mut self, path: &Path, meta: &Metadata) -> Result<()> {
        let mut file = match self.fs.open(path) {
            Ok(file) => file,
            Err(err) => {
                self.record(ArchiveError::io("open", path, err));
                return Ok(());
            }
        };

        let entry = self.entry_for(path, EntryKind::RegularFile, meta);
        let Some(header) = self.encode(&entry) else {
            return Ok(());
        };

        self.write_header(&header)?;
        self.write_content(&mut file, path, entry.size)
    }

    /// Writes exactly `size` bytes of content, padded to a block boundary.
    ///
    /// The header is already out, so the block count can't change anymore: if the file comes up
    /// short or a read fails, the rest is filled with zeros and the error is recorded.
    fn write_content(&mut self, file: &mut impl Read, path: &Path, size: u64) -> Result<()> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut remaining = size;
        let mut failed = false;

        while remaining > 0 {
            let want = remaining.min(BLOCK_SIZE as u64) as usize;
            block.fill(0);

            if !failed {
                match read_to_fill(file, &mut block[..want]) {
                    Ok(n) if n < want => {
                        failed = true;
                        let missing = remaining - n as u64;
                        self.record(ArchiveError::io(
                            "read",
                            path,
                            io::Error::new(
                                ErrorKind::UnexpectedEof,
                                format!("file shrank by {missing} bytes; padding with zeros"),
                            ),
                        ));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        failed = true;
                        self.record(ArchiveError::io("read", path, err));
                    }
                }
            }

            self.sink
                .write_all(&block)
                .map_err(|err| ArchiveError::stream("write", err))?;
            remaining -= want as u64;
        }

        trace!("wrote {} content blocks for {path:?}", size.div_ceil(BLOCK_SIZE as u64));
        Ok(())
    }

    /// Writes the directory header and returns the paths of its children.
    fn append_directory(&mut self, path: &Path, meta: &Metadata) -> Result<Vec<PathBuf>> {
        let names = match self.fs.read_dir_sorted(path) {
            Ok(names) => names,
            Err(err) => {
                self.record(ArchiveError::io("scandir", path, err));
                return Ok(vec![]);
            }
        };

        let entry = self.entry_for(path, EntryKind::Directory, meta);
        if let Some(header) = self.encode(&entry) {
            self.write_header(&header)?;
        }

        // Path::join() adds a '/' only if `path` doesn't already end with one
        Ok(names.iter().map(|name| path.join(name)).collect())
    }

    /// Terminates the archive with two zero blocks.
    ///
    /// Fails with [`ArchiveError::EmptyArchive`] if no entry was written, in which case the
    /// terminator is not written either.
    pub fn finish(mut self) -> Result<CreateSummary> {
        if self.entries == 0 {
            return Err(ArchiveError::EmptyArchive);
        }

        write_zeros(&mut self.sink, BLOCK_SIZE * END_BLOCKS)
            .and_then(|()| self.sink.flush())
            .map_err(|err| ArchiveError::stream("write", err))?;

        debug!(
            "archived {} entries with {} errors",
            self.entries,
            self.errors.len()
        );

        Ok(CreateSummary {
            entries: self.entries,
            errors: self.errors,
        })
    }
}

/// Writes an archive of `roots` to `sink` and returns the number of entries that had errors.
///
/// Per-entry errors don't stop the archive; they are logged and counted.  Errors writing to
/// `sink`, or finding nothing to archive at all, are returned.
pub fn create_archive<W: Write, F: Filesystem, P: AsRef<Path>>(
    sink: W,
    roots: &[P],
    fs: &F,
    options: &Options,
) -> Result<usize> {
    let mut writer = ArchiveWriter::new(sink, fs, options);
    for root in roots {
        writer.append_path(root)?;
    }
    Ok(writer.finish()?.errors.len())
}
