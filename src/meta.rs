//! Entry metadata record used by the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use bytesize::ByteSize;

/// What kind of filesystem object an entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
    /// `lstat` failed. Holds the error message.
    Unreadable(String),
}

impl EntryKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "link",
            Self::Other => "other",
            Self::Unreadable(_) => "error",
        }
    }
}

/// `lstat` result for one directory entry.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub len: u64,
}

impl EntryMeta {
    /// Read metadata for `path` without following symlinks. Never fails: an unreadable entry
    /// becomes [`EntryKind::Unreadable`].
    pub fn fetch(path: &Path) -> Self {
        match fs::symlink_metadata(path) {
            Ok(meta) => {
                let file_type = meta.file_type();
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else if file_type.is_dir() {
                    EntryKind::Dir
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                Self {
                    path: path.to_path_buf(),
                    kind,
                    len: meta.len(),
                }
            }
            Err(err) => Self {
                path: path.to_path_buf(),
                kind: EntryKind::Unreadable(err.to_string()),
                len: 0,
            },
        }
    }

    /// Final path component, lossily converted.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// One `ls` line: kind, human readable size, name.
    pub fn render(&self) -> String {
        let size = match self.kind {
            EntryKind::Dir | EntryKind::Unreadable(_) => "-".to_owned(),
            _ => ByteSize::b(self.len).to_string(),
        };
        match &self.kind {
            EntryKind::Unreadable(reason) => {
                format!("{:<5} {:>10}  {} ({reason})", self.kind.tag(), size, self.name())
            }
            _ => format!("{:<5} {:>10}  {}", self.kind.tag(), size, self.name()),
        }
    }
}
