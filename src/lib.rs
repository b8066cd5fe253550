//! Pack directory trees into ustar archives and unpack them again.
//!
//! [`create_archive`] walks files and directories and writes a header record for each, followed
//! by its content padded to whole 512-byte blocks.  [`extract_archive`] reads such a stream back
//! and recreates the files and directories with their permissions and modification times.  All
//! filesystem access goes through a [`Filesystem`](fs::Filesystem), normally
//! [`HostFilesystem`](fs::HostFilesystem).

pub mod error;
pub mod extract;
pub mod fs;
pub mod header;
pub mod write;

mod util;

#[cfg(test)]
mod test;

pub use error::{ArchiveError, HeaderError, Result};
pub use extract::{extract_archive, ArchiveReader};
pub use write::{create_archive, ArchiveWriter, CreateSummary};

/// Log target for the verbose listing of archived and extracted paths.
pub const LISTING_TARGET: &str = "mytar::listing";

/// Settings shared by archive creation and extraction.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Report every path as it is archived or extracted, on [`LISTING_TARGET`].
    pub verbose: bool,
    /// Restore the numeric owner and group of extracted entries.
    pub same_owner: bool,
}
