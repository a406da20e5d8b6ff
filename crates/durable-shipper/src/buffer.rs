//! Discovery of buffer files and shared-access file opens.
//!
//! Buffer files are written by an external appender as `<prefix><suffix>.json`,
//! with a suffix chosen so lexical order equals chronological order.

use crate::config::BUFFER_FILE_EXTENSION;
use crate::dead_letter::DEAD_LETTER_PREFIX;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::warn;

/// The ordered set of buffer files matching `<folder>/<prefix>*.json`.
#[derive(Debug, Clone)]
pub struct BufferFileSet {
    folder: PathBuf,
    prefix: String,
}

impl BufferFileSet {
    pub fn new(folder: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            prefix: prefix.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// List matching files, oldest (lexically smallest) first.
    ///
    /// A missing folder means nothing has been buffered yet.
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.matches(name) {
                continue;
            }
            if entry.file_type()?.is_file() {
                files.push(self.folder.join(name));
            }
        }

        files.sort();
        Ok(files)
    }

    /// Dead letters share the folder and extension but are never buffer files.
    fn matches(&self, name: &str) -> bool {
        name.len() >= self.prefix.len() + BUFFER_FILE_EXTENSION.len()
            && name.starts_with(&self.prefix)
            && name.ends_with(BUFFER_FILE_EXTENSION)
            && !name.starts_with(DEAD_LETTER_PREFIX)
    }
}

/// Open a buffer file for reading without blocking a concurrent appender.
pub fn open_shared(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x1;
        const FILE_SHARE_WRITE: u32 = 0x2;
        options.share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE);
    }

    options.open(path)
}

/// Whether a buffer file has stopped growing past `offset`.
///
/// On Windows the file is opened for writing while only sharing reads, so an
/// appender still holding the file makes the open fail and the file counts as
/// live. Any failure is treated as "not settled".
pub fn is_settled(path: &Path, offset: u64) -> bool {
    match open_for_settle_check(path).and_then(|file| file.metadata()) {
        Ok(metadata) => metadata.len() <= offset,
        Err(e) => {
            if !is_lock_contention(&e) {
                warn!(
                    file = %path.display(),
                    error = %e,
                    "Unexpected I/O error while testing whether buffer file is settled"
                );
            }
            false
        }
    }
}

fn open_for_settle_check(path: &Path) -> io::Result<File> {
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x1;
        OpenOptions::new()
            .read(true)
            .write(true)
            .share_mode(FILE_SHARE_READ)
            .open(path)
    }

    #[cfg(not(windows))]
    {
        open_shared(path)
    }
}

fn is_lock_contention(error: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    matches!(error.raw_os_error(), Some(32) | Some(33)) && cfg!(windows)
}
