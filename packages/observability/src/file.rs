//! Append-only JSONL log file shared by every writer in the process.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Default self-log location: `~/.durable-shipper/logs/selflog.jsonl`.
///
/// Falls back to the system temp directory when there is no home directory.
pub fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".durable-shipper")
        .join("logs")
        .join("selflog.jsonl")
}

/// Line-flushed appender to the self-log file.
#[derive(Clone)]
pub struct SelfLogWriter {
    path: PathBuf,
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl SelfLogWriter {
    /// Open (creating parent folders as needed) the file at `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for SelfLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        // Other processes tail this file; every line must land immediately.
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for SelfLogWriter {
    type Writer = SelfLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_writer_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("selflog.jsonl");
        std::fs::write(&path, "existing\n").unwrap();

        let mut writer = SelfLogWriter::open(&path).unwrap();
        writer.write_all(b"first\n").unwrap();
        let mut clone = writer.make_writer();
        clone.write_all(b"second\n").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\nfirst\nsecond\n");
    }

    #[test]
    fn test_writer_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deeply").join("nested").join("selflog.jsonl");

        let writer = SelfLogWriter::open(&path).unwrap();
        assert_eq!(writer.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_default_log_path() {
        let path = default_log_path();
        assert!(path.ends_with(".durable-shipper/logs/selflog.jsonl"));
    }
}
