//! Directory listing collaborator.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

/// Error returned when a directory cannot be listed.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The directory could not be opened or read.
    #[error("cannot list {path}: {source}")]
    Unavailable {
        /// Directory that was being listed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Source of directory contents.
///
/// Both methods return bare entry names, not full paths. Implementations must be callable from
/// any thread.
pub trait Lister: Send + Sync + 'static {
    /// Names of every entry in `dir`.
    fn list_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError>;

    /// Names of the entries in `dir` that are directories.
    fn list_subdirectory_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError>;
}

/// [`Lister`] backed by [`std::fs::read_dir`].
///
/// Entries that fail to read mid-listing are skipped. Symlinks count as subdirectories when they
/// point at one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLister;

impl FsLister {
    fn read(dir: &Path) -> Result<fs::ReadDir, ListingError> {
        fs::read_dir(dir).map_err(|source| ListingError::Unavailable {
            path: dir.to_path_buf(),
            source,
        })
    }
}

impl Lister for FsLister {
    fn list_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError> {
        let names: Vec<OsString> = Self::read(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        trace!(dir = %dir.display(), count = names.len(), "listed entries");
        Ok(names)
    }

    fn list_subdirectory_names(&self, dir: &Path) -> Result<Vec<OsString>, ListingError> {
        Ok(Self::read(dir)?
            .filter_map(Result::ok)
            .filter(|entry| fs::metadata(entry.path()).is_ok_and(|meta| meta.is_dir()))
            .map(|entry| entry.file_name())
            .collect())
    }
}
