use std::{ffi::OsString, fs, os::unix::fs::PermissionsExt, path::Path};

use tempfile::TempDir;

use once_cell::sync::Lazy;

use crate::fs::{Filesystem, HostFilesystem};

static TMPDIR: Lazy<OsString> = Lazy::new(|| {
    if let Some(path) = std::env::var_os("MYTAR_TEST_TMPDIR") {
        eprintln!("temporary directory from $MYTAR_TEST_TMPDIR: {path:?}");
        path
    } else {
        std::env::temp_dir().into()
    }
});

pub fn tempdir() -> TempDir {
    TempDir::with_prefix_in("mytar-test-", TMPDIR.as_os_str()).unwrap()
}

/// Writes a file below `root`, creating missing parents, and pins its mode and mtime.
pub fn put_file(root: &Path, path: &str, contents: &[u8], mode: u32, mtime: u64) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&full, contents).unwrap();
    fs::set_permissions(&full, fs::Permissions::from_mode(mode)).unwrap();
    HostFilesystem::cwd().set_mtime(&full, mtime).unwrap();
}

/// Creates a directory below `root` with the given mode and mtime.  Set the mtime after the
/// last child was added.
pub fn put_dir(root: &Path, path: &str, mode: u32, mtime: u64) {
    let full = root.join(path);
    fs::create_dir_all(&full).unwrap();
    fs::set_permissions(&full, fs::Permissions::from_mode(mode)).unwrap();
    HostFilesystem::cwd().set_mtime(&full, mtime).unwrap();
}
