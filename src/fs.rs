//! Filesystem access used by the archive writer and the extractor.
//!
//! Both operations go through the [`Filesystem`] trait so that tests can substitute their own
//! implementation.  [`HostFilesystem`] is the real one: every path is resolved relative to a base
//! directory file descriptor, which is the current directory unless another one is opened.

use std::{
    ffi::{OsStr, OsString},
    fs::File,
    io::{self, Read, Write},
    os::unix::ffi::OsStrExt,
    path::Path,
};

use rustix::{
    fd::{AsFd, BorrowedFd, OwnedFd},
    fs::{
        chmodat, chownat, mkdirat, openat, statat, utimensat, AtFlags, Dir, FileType, Gid, Mode,
        OFlags, Timespec, Timestamps, Uid, CWD,
    },
};

use crate::header::{EntryKind, MODE_MASK};

/// The subset of `stat()` results that ends up in a header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// `None` for anything that is neither a regular file nor a directory.
    pub kind: Option<EntryKind>,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: i64,
}

pub trait Filesystem {
    type Reader: Read;
    type Writer: Write;

    /// Returns the metadata of `path` without following a final symlink.
    fn stat(&self, path: &Path) -> io::Result<Metadata>;

    /// Opens a regular file for reading.
    fn open(&self, path: &Path) -> io::Result<Self::Reader>;

    /// Lists the names in a directory, excluding "." and "..", sorted bytewise.
    fn read_dir_sorted(&self, path: &Path) -> io::Result<Vec<OsString>>;

    /// Creates a new regular file.  Fails with `ErrorKind::AlreadyExists` if anything exists at
    /// `path`.
    fn create_new(&self, path: &Path, mode: u32) -> io::Result<Self::Writer>;

    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Sets the modification time and resets the access time to the epoch.
    fn set_mtime(&self, path: &Path, mtime: u64) -> io::Result<()>;

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    fn user_name(&self, _uid: u32) -> Option<OsString> {
        None
    }

    fn group_name(&self, _gid: u32) -> Option<OsString> {
        None
    }
}

#[derive(Debug)]
pub struct HostFilesystem {
    base: Option<OwnedFd>,
}

impl HostFilesystem {
    /// Resolves paths relative to the current working directory of the process.
    pub fn cwd() -> Self {
        HostFilesystem { base: None }
    }

    /// Resolves paths relative to `dir`.
    pub fn at(dir: impl AsRef<Path>) -> io::Result<Self> {
        let fd = openat(
            CWD,
            dir.as_ref(),
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(HostFilesystem { base: Some(fd) })
    }

    fn dirfd(&self) -> BorrowedFd<'_> {
        match &self.base {
            Some(fd) => fd.as_fd(),
            None => CWD,
        }
    }
}

impl Filesystem for HostFilesystem {
    type Reader = File;
    type Writer = File;

    fn stat(&self, path: &Path) -> io::Result<Metadata> {
        let buf = statat(self.dirfd(), path, AtFlags::SYMLINK_NOFOLLOW)?;

        let kind = match FileType::from_raw_mode(buf.st_mode) {
            FileType::RegularFile => Some(EntryKind::RegularFile),
            FileType::Directory => Some(EntryKind::Directory),
            _ => None,
        };

        Ok(Metadata {
            kind,
            mode: buf.st_mode & MODE_MASK,
            uid: buf.st_uid,
            gid: buf.st_gid,
            size: buf.st_size as u64,
            mtime: i64::from(buf.st_mtime),
        })
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        let fd = openat(
            self.dirfd(),
            path,
            OFlags::RDONLY | OFlags::NOFOLLOW | OFlags::CLOEXEC,
            Mode::empty(),
        )?;
        Ok(File::from(fd))
    }

    fn read_dir_sorted(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let fd = openat(
            self.dirfd(),
            path,
            OFlags::RDONLY | OFlags::DIRECTORY | OFlags::NOFOLLOW | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        let mut names = vec![];
        for item in Dir::read_from(&fd)? {
            let entry = item?;
            let name = OsStr::from_bytes(entry.file_name().to_bytes());

            if name == "." || name == ".." {
                continue;
            }

            names.push(name.to_os_string());
        }

        names.sort();
        Ok(names)
    }

    fn create_new(&self, path: &Path, mode: u32) -> io::Result<File> {
        let fd = openat(
            self.dirfd(),
            path,
            OFlags::CREATE | OFlags::EXCL | OFlags::WRONLY | OFlags::NOFOLLOW | OFlags::CLOEXEC,
            Mode::from_raw_mode(mode),
        )?;
        Ok(File::from(fd))
    }

    fn create_dir(&self, path: &Path, mode: u32) -> io::Result<()> {
        Ok(mkdirat(self.dirfd(), path, Mode::from_raw_mode(mode))?)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        Ok(chmodat(
            self.dirfd(),
            path,
            Mode::from_raw_mode(mode),
            AtFlags::empty(),
        )?)
    }

    fn set_mtime(&self, path: &Path, mtime: u64) -> io::Result<()> {
        let times = Timestamps {
            last_access: Timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            last_modification: Timespec {
                tv_sec: i64::try_from(mtime).unwrap_or(i64::MAX),
                tv_nsec: 0,
            },
        };
        Ok(utimensat(self.dirfd(), path, &times, AtFlags::empty())?)
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        Ok(chownat(
            self.dirfd(),
            path,
            Some(Uid::from_raw(uid)),
            Some(Gid::from_raw(gid)),
            AtFlags::SYMLINK_NOFOLLOW,
        )?)
    }

    fn user_name(&self, uid: u32) -> Option<OsString> {
        uzers::get_user_by_uid(uid).map(|user| user.name().to_os_string())
    }

    fn group_name(&self, gid: u32) -> Option<OsString> {
        uzers::get_group_by_gid(gid).map(|group| group.name().to_os_string())
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::ErrorKind, os::unix::fs::PermissionsExt, time::UNIX_EPOCH};

    use similar_asserts::assert_eq;

    use super::*;
    use crate::test::tempdir;

    #[test]
    fn test_create_and_stat() -> io::Result<()> {
        let td = tempdir();
        let host = HostFilesystem::at(td.path())?;

        let mut file = host.create_new(Path::new("testfile"), 0o600)?;
        file.write_all(b"new contents")?;
        drop(file);

        host.set_mode(Path::new("testfile"), 0o640)?;
        host.set_mtime(Path::new("testfile"), 1_234_567_890)?;

        let meta = host.stat(Path::new("testfile"))?;
        assert_eq!(meta.kind, Some(EntryKind::RegularFile));
        assert_eq!(meta.mode, 0o640);
        assert_eq!(meta.size, 12);
        assert_eq!(meta.mtime, 1_234_567_890);

        let std_meta = fs::metadata(td.path().join("testfile"))?;
        assert_eq!(std_meta.permissions().mode() & 0o7777, 0o640);
        assert_eq!(std_meta.accessed()?, UNIX_EPOCH);

        let mut contents = String::new();
        host.open(Path::new("testfile"))?
            .read_to_string(&mut contents)?;
        assert_eq!(contents, "new contents");
        Ok(())
    }

    #[test]
    fn test_create_new_is_exclusive() -> io::Result<()> {
        let td = tempdir();
        let host = HostFilesystem::at(td.path())?;

        fs::write(td.path().join("existing"), b"keep")?;
        let err = host.create_new(Path::new("existing"), 0o644).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(fs::read(td.path().join("existing"))?, b"keep");

        host.create_dir(Path::new("dir"), 0o755)?;
        let err = host.create_dir(Path::new("dir"), 0o755).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        Ok(())
    }

    #[test]
    fn test_read_dir_sorted() -> io::Result<()> {
        let td = tempdir();
        for name in ["b", "a", "C", "aa"] {
            fs::write(td.path().join(name), b"")?;
        }
        fs::create_dir(td.path().join("sub"))?;

        let host = HostFilesystem::at(td.path())?;
        let names = host.read_dir_sorted(Path::new("."))?;
        assert_eq!(names, ["C", "a", "aa", "b", "sub"].map(OsString::from));
        Ok(())
    }

    #[test]
    fn test_special_files_have_no_kind() -> io::Result<()> {
        let td = tempdir();
        std::os::unix::fs::symlink("target", td.path().join("link"))?;

        let host = HostFilesystem::at(td.path())?;
        assert_eq!(host.stat(Path::new("link"))?.kind, None);
        Ok(())
    }

    #[test]
    fn test_set_owner_without_read_permission() -> io::Result<()> {
        let td = tempdir();
        let host = HostFilesystem::at(td.path())?;
        drop(host.create_new(Path::new("write-only"), 0o200)?);

        // chown to ourselves is always permitted, even if the file can't be opened for reading
        let meta = host.stat(Path::new("write-only"))?;
        host.set_owner(Path::new("write-only"), meta.uid, meta.gid)?;
        assert_eq!(host.stat(Path::new("write-only"))?, meta);
        Ok(())
    }

    #[test]
    fn test_unknown_ids_have_no_name() {
        let host = HostFilesystem::cwd();
        assert_eq!(host.user_name(u32::MAX - 7), None);
        assert_eq!(host.group_name(u32::MAX - 7), None);
    }
}
