//! Preservation of batches the collector permanently rejected.
//!
//! Each rejected batch becomes one `invalid-<timestamp>-<code>-<id>.json` file
//! next to the buffer files. An optional byte budget keeps the folder bounded
//! by removing the least recently used dead letters first.

use crate::error::{ShipperError, ShipperResult};
use crate::event::Event;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File name prefix of every dead-letter file.
pub const DEAD_LETTER_PREFIX: &str = "invalid-";

const DEAD_LETTER_EXTENSION: &str = ".json";

/// Writes rejected batches to disk.
#[derive(Debug, Clone)]
pub struct DeadLetterSink {
    folder: PathBuf,
    byte_budget: Option<u64>,
}

impl DeadLetterSink {
    pub fn new(folder: impl Into<PathBuf>, byte_budget: Option<u64>) -> Self {
        Self {
            folder: folder.into(),
            byte_budget,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Write `events` plus the rejection reason to a fresh dead-letter file.
    ///
    /// When a budget is set, older dead letters are pruned first to make room.
    /// Pruning problems are logged and never stop the write.
    pub fn preserve(&self, events: &[Event], code: &str, message: &str) -> ShipperResult<PathBuf> {
        let content = render(events, code, message);

        if let Some(budget) = self.byte_budget {
            self.prune(budget, content.len() as u64);
        }

        let path = self.folder.join(dead_letter_file_name(code));
        std::fs::write(&path, content.as_bytes()).map_err(|e| {
            ShipperError::DeadLetter(format!("cannot write {}: {e}", path.display()))
        })?;

        info!(
            file = %path.display(),
            events = events.len(),
            code = %code,
            "Preserved rejected batch"
        );
        Ok(path)
    }

    /// Delete dead letters until the newest ones plus `incoming` bytes fit in `budget`.
    fn prune(&self, budget: u64, incoming: u64) {
        let mut existing = match self.list() {
            Ok(existing) => existing,
            Err(e) => {
                warn!(
                    folder = %self.folder.display(),
                    error = %e,
                    "Unable to list dead-letter files for cleanup"
                );
                return;
            }
        };

        existing.sort_by(|a, b| b.last_used.cmp(&a.last_used));

        let allowance = budget.saturating_sub(incoming);
        let mut retained: u64 = 0;
        for file in existing {
            retained = retained.saturating_add(file.size);
            if retained <= allowance {
                continue;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => debug!(file = %file.path.display(), "Removed dead-letter file over budget"),
                Err(e) => warn!(
                    file = %file.path.display(),
                    error = %e,
                    "Unable to remove dead-letter file"
                ),
            }
        }
    }

    fn list(&self) -> std::io::Result<Vec<DeadLetterFile>> {
        let entries = match std::fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_dead_letter = name.to_str().is_some_and(|name| {
                name.starts_with(DEAD_LETTER_PREFIX) && name.ends_with(DEAD_LETTER_EXTENSION)
            });
            if !is_dead_letter {
                continue;
            }

            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let last_used = metadata
                .accessed()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            files.push(DeadLetterFile {
                path: entry.path(),
                size: metadata.len(),
                last_used,
            });
        }
        Ok(files)
    }
}

struct DeadLetterFile {
    path: PathBuf,
    size: u64,
    last_used: SystemTime,
}

fn render(events: &[Event], code: &str, message: &str) -> String {
    let mut content = String::new();
    for event in events {
        content.push_str(event.as_str());
        content.push('\n');
    }
    content.push_str(&format!(
        "Error info: HTTP shipping failed with {code}: {message}"
    ));
    content
}

fn dead_letter_file_name(code: &str) -> String {
    format!(
        "{DEAD_LETTER_PREFIX}{}-{}-{}{DEAD_LETTER_EXTENSION}",
        Utc::now().format("%Y%m%d%H%M%S"),
        sanitize_code(code),
        Uuid::new_v4().simple()
    )
}

fn sanitize_code(code: &str) -> String {
    let cleaned: String = code
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
