//! Persisted read position (bookmark) surviving process restarts.
//!
//! The checkpoint file holds a single line `"<offset>:::<path>"`. Only the
//! first line is ever trusted, so a file left with stale trailing bytes by an
//! interrupted or older writer still reads back correctly.

use crate::error::{ShipperError, ShipperResult};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Separator between offset and path in the checkpoint line.
pub const CHECKPOINT_SEPARATOR: &str = ":::";

/// Next unread byte position in a specific buffer file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Buffer file the offset refers to.
    pub file: PathBuf,
    /// Byte offset of the next unread record.
    pub offset: u64,
}

impl Checkpoint {
    pub fn new(file: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    /// Position at the start of a buffer file.
    pub fn start_of(file: impl Into<PathBuf>) -> Self {
        Self::new(file, 0)
    }

    /// Parse a single checkpoint line. Returns `None` when malformed.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line
            .trim_end_matches(['\r', '\n'])
            .split(CHECKPOINT_SEPARATOR)
            .filter(|part| !part.is_empty());

        let offset = parts.next()?.trim().parse::<u64>().ok()?;
        let file = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self::new(file, offset))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.offset,
            CHECKPOINT_SEPARATOR,
            self.file.to_string_lossy()
        )
    }
}

/// File-backed checkpoint store.
///
/// Owns one handle to the checkpoint file for its lifetime, opened lazily
/// with shared-read access so diagnostics can inspect the file at any time.
pub struct CheckpointStore {
    path: PathBuf,
    handle: Option<File>,
}

impl CheckpointStore {
    /// Create a store for the given checkpoint file. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: None,
        }
    }

    /// Path of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored checkpoint.
    ///
    /// An empty file yields `None`; a malformed first line is logged and also
    /// yields `None`. Only failures to open or read the file are errors.
    pub fn get(&mut self) -> ShipperResult<Option<Checkpoint>> {
        let result = self.read_first_line();
        if result.is_err() {
            self.handle = None;
        }

        let Some(line) = result? else {
            return Ok(None);
        };

        match Checkpoint::parse_line(&line) {
            Some(checkpoint) => Ok(Some(checkpoint)),
            None => {
                warn!(
                    path = %self.path.display(),
                    line = %line,
                    "Unable to parse checkpoint line, ignoring it"
                );
                Ok(None)
            }
        }
    }

    /// Persist a checkpoint, replacing whatever the file held.
    ///
    /// The line is written from byte 0 and the file is then cut to the new
    /// length, so an interruption between the two steps leaves at worst stale
    /// trailing bytes after a complete first line.
    pub fn update(&mut self, checkpoint: &Checkpoint) -> ShipperResult<()> {
        let line = format!("{checkpoint}\n");
        let result = self.write_line(line.as_bytes());
        if result.is_err() {
            self.handle = None;
        }
        result?;

        debug!(
            file = %checkpoint.file.display(),
            offset = checkpoint.offset,
            "Checkpoint persisted"
        );
        Ok(())
    }

    fn read_first_line(&mut self) -> ShipperResult<Option<String>> {
        let handle = self.ensure_open()?;
        handle.seek(SeekFrom::Start(0))?;

        let mut bytes = Vec::new();
        handle.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let first = match bytes.iter().position(|b| *b == b'\n') {
            Some(end) => &bytes[..end],
            None => &bytes[..],
        };
        Ok(Some(String::from_utf8_lossy(first).into_owned()))
    }

    fn write_line(&mut self, line: &[u8]) -> ShipperResult<()> {
        let handle = self.ensure_open()?;
        handle.seek(SeekFrom::Start(0))?;
        handle.write_all(line)?;
        handle.set_len(line.len() as u64)?;
        handle.flush()?;
        handle.sync_data()?;
        Ok(())
    }

    fn ensure_open(&mut self) -> ShipperResult<&mut File> {
        if self.handle.is_none() {
            let file = open_checkpoint_file(&self.path).map_err(|e| {
                ShipperError::Checkpoint(format!(
                    "cannot open checkpoint file {}: {e}",
                    self.path.display()
                ))
            })?;
            self.handle = Some(file);
        }

        self.handle
            .as_mut()
            .ok_or_else(|| ShipperError::Checkpoint("checkpoint handle unavailable".into()))
    }
}

fn open_checkpoint_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true).truncate(false);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_SHARE_READ: u32 = 0x1;
        options.share_mode(FILE_SHARE_READ);
    }

    options.open(path)
}
