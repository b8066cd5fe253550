#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    fs,
    os::unix::fs::{MetadataExt, PermissionsExt},
    path::Path,
};

use mytar::fs::{Filesystem, HostFilesystem};

/// What a roundtrip has to preserve for a single node.
#[derive(Debug, PartialEq, Eq)]
pub enum Node {
    File {
        mode: u32,
        mtime: i64,
        contents: Vec<u8>,
    },
    Dir {
        mode: u32,
        mtime: i64,
    },
}

/// Records every node below `root`, keyed by its path relative to `root`.
pub fn snapshot(root: &Path) -> BTreeMap<String, Node> {
    let mut nodes = BTreeMap::new();
    walk(root, root, &mut nodes);
    nodes
}

fn walk(root: &Path, dir: &Path, nodes: &mut BTreeMap<String, Node>) {
    for item in fs::read_dir(dir).unwrap() {
        let path = item.unwrap().path();
        let meta = fs::symlink_metadata(&path).unwrap();
        let name = path.strip_prefix(root).unwrap().display().to_string();
        let mode = meta.permissions().mode() & 0o7777;

        if meta.is_dir() {
            walk(root, &path, nodes);
            nodes.insert(
                name,
                Node::Dir {
                    mode,
                    mtime: meta.mtime(),
                },
            );
        } else {
            nodes.insert(
                name,
                Node::File {
                    mode,
                    mtime: meta.mtime(),
                    contents: fs::read(&path).unwrap(),
                },
            );
        }
    }
}

pub fn put_file(root: &Path, path: &str, contents: &[u8], mode: u32, mtime: u64) {
    let full = root.join(path);
    fs::write(&full, contents).unwrap();
    fs::set_permissions(&full, fs::Permissions::from_mode(mode)).unwrap();
    HostFilesystem::cwd().set_mtime(&full, mtime).unwrap();
}

/// Creates a directory.  Its mtime is only stable once no more children are added.
pub fn put_dir(root: &Path, path: &str, mode: u32, mtime: u64) {
    let full = root.join(path);
    fs::create_dir(&full).unwrap();
    fs::set_permissions(&full, fs::Permissions::from_mode(mode)).unwrap();
    HostFilesystem::cwd().set_mtime(&full, mtime).unwrap();
}

/// Touches a directory again after its children were created.
pub fn pin_mtime(root: &Path, path: &str, mtime: u64) {
    HostFilesystem::cwd()
        .set_mtime(&root.join(path), mtime)
        .unwrap();
}
