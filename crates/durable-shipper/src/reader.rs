//! Batched reading of buffer files from the persisted checkpoint.

use crate::buffer::{self, BufferFileSet};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::ShipperConfig;
use crate::error::ShipperResult;
use crate::event::{Batch, Event};
use crate::retention::{plan_advance, plan_fresh};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Bytes a record may carry around its body: a BOM and a CRLF terminator.
const RECORD_FRAMING_BYTES: u64 = 5;

/// Longest slice of a dropped record echoed into the log.
const DROPPED_PREVIEW_CHARS: usize = 256;

/// Reads successive batches of events, starting at the checkpoint.
///
/// A batch stays cached until [`commit`](Self::commit), so repeated calls to
/// [`next_batch`](Self::next_batch) hand back the same batch.
pub struct BatchReader {
    files: BufferFileSet,
    store: CheckpointStore,
    batch_limit: usize,
    event_body_limit_bytes: Option<u64>,
    retained_file_count: Option<usize>,
    current: Option<Checkpoint>,
    cached: Option<Arc<Batch>>,
}

impl BatchReader {
    pub fn new(
        files: BufferFileSet,
        store: CheckpointStore,
        batch_limit: usize,
        event_body_limit_bytes: Option<u64>,
        retained_file_count: Option<usize>,
    ) -> Self {
        Self {
            files,
            store,
            batch_limit,
            event_body_limit_bytes,
            retained_file_count,
            current: None,
            cached: None,
        }
    }

    /// Build a reader for the buffer described by `config`.
    pub fn from_config(config: &ShipperConfig) -> ShipperResult<Self> {
        config.validate()?;
        let files = BufferFileSet::new(config.buffer_folder()?, config.buffer_file_prefix()?);
        let store = CheckpointStore::new(config.bookmark_path()?);

        Ok(Self::new(
            files,
            store,
            config.batch_limit,
            config.event_body_limit_bytes,
            config.retained_file_count,
        ))
    }

    /// Position the reader is working from, if one has been established.
    pub fn current_checkpoint(&self) -> Option<&Checkpoint> {
        self.current.as_ref()
    }

    /// Whether a batch is waiting to be committed.
    pub fn has_pending_batch(&self) -> bool {
        self.cached.is_some()
    }

    /// Return the next batch, or the uncommitted one if it is still pending.
    ///
    /// Never fails on bad records: oversized, undecodable or non-object lines
    /// are logged and skipped, and the pending checkpoint still moves past them.
    pub fn next_batch(&mut self) -> ShipperResult<Arc<Batch>> {
        if let Some(batch) = &self.cached {
            return Ok(batch.clone());
        }

        let files = self.files.list()?;
        let Some(checkpoint) = self.resolve_checkpoint(&files)? else {
            return Ok(Arc::new(Batch::empty(self.batch_limit)));
        };

        // A later file exists, so the appender has rotated away from this one.
        let sealed = files.iter().any(|file| *file > checkpoint.file);
        let batch = self.read_batch(checkpoint, sealed)?;
        if batch.is_empty() {
            return Ok(Arc::new(batch));
        }

        debug!(
            events = batch.events().len(),
            records = batch.records_examined(),
            "Read batch from buffer"
        );

        let batch = Arc::new(batch);
        self.cached = Some(batch.clone());
        Ok(batch)
    }

    /// Persist the pending checkpoint of the cached batch and drop the batch.
    ///
    /// A no-op when there is no pending checkpoint. On failure the batch stays
    /// cached and will be handed out again.
    pub fn commit(&mut self) -> ShipperResult<()> {
        let Some(pending) = self
            .cached
            .as_ref()
            .and_then(|batch| batch.pending_checkpoint().cloned())
        else {
            self.cached = None;
            return Ok(());
        };

        self.store.update(&pending)?;
        self.current = Some(pending);
        self.cached = None;
        Ok(())
    }

    /// Called after an empty batch: roll to the next file once the current one
    /// has settled, enforce retention and remove consumed files.
    pub fn advance_if_idle(&mut self) -> ShipperResult<()> {
        if self.cached.is_some() {
            return Ok(());
        }

        let current = match self.current.clone() {
            Some(checkpoint) => checkpoint,
            None => match self.store.get()? {
                Some(checkpoint) => checkpoint,
                None => return Ok(()),
            },
        };

        let files = self.files.list()?;
        let plan = plan_advance(&files, &current, self.retained_file_count, |checkpoint| {
            buffer::is_settled(&checkpoint.file, checkpoint.offset)
        });

        if let Some(next) = plan.checkpoint {
            if !files.contains(&current.file) {
                warn!(
                    file = %current.file.display(),
                    next = %next.file.display(),
                    "Checkpoint references a file missing from the buffer set, restarting at the oldest retained file"
                );
            } else {
                info!(
                    from = %current.file.display(),
                    to = %next.file.display(),
                    "Advancing checkpoint to next buffer file"
                );
            }
            self.store.update(&next)?;
            self.current = Some(next);
        }

        delete_files(&plan.delete);
        Ok(())
    }

    fn resolve_checkpoint(&mut self, files: &[PathBuf]) -> ShipperResult<Option<Checkpoint>> {
        if let Some(current) = &self.current {
            if current.file.is_file() {
                return Ok(Some(current.clone()));
            }
            warn!(file = %current.file.display(), "Checkpointed buffer file disappeared");
            self.current = None;
        }

        if let Some(stored) = self.store.get()? {
            if stored.file.is_file() {
                self.current = Some(stored.clone());
                return Ok(Some(stored));
            }
            debug!(
                file = %stored.file.display(),
                "Stored checkpoint references a missing file, deriving a fresh one"
            );
        }

        let plan = plan_fresh(files, self.retained_file_count);
        if !plan.delete.is_empty() {
            info!(
                count = plan.delete.len(),
                "Dropping buffer files beyond the retained window"
            );
        }
        delete_files(&plan.delete);

        self.current = plan.checkpoint.clone();
        Ok(plan.checkpoint)
    }

    fn read_batch(&mut self, mut checkpoint: Checkpoint, sealed: bool) -> ShipperResult<Batch> {
        let mut file = buffer::open_shared(&checkpoint.file)?;
        let length = file.metadata()?.len();

        if length < checkpoint.offset {
            warn!(
                file = %checkpoint.file.display(),
                offset = checkpoint.offset,
                length = length,
                "Buffer file is shorter than the checkpoint, rereading it from the start"
            );
            checkpoint.offset = 0;
            self.current = Some(checkpoint.clone());
        }

        file.seek(SeekFrom::Start(checkpoint.offset))?;
        let mut lines = BufReader::new(file.take(length - checkpoint.offset));

        let mut offset = checkpoint.offset;
        let mut events = Vec::new();
        let mut examined = 0;
        let mut record = Vec::new();

        let cap = self
            .event_body_limit_bytes
            .map(|limit| limit.saturating_add(RECORD_FRAMING_BYTES));

        while examined < self.batch_limit {
            record.clear();
            let raw = read_record(&mut lines, cap, &mut record)?;
            if raw.consumed == 0 {
                break;
            }
            if !raw.terminated && !sealed {
                // The appender has not finished this record yet.
                break;
            }

            let record_start = offset;
            offset += raw.consumed as u64;
            examined += 1;

            if let Some(limit) = self.event_body_limit_bytes.filter(|_| raw.oversized) {
                warn!(
                    file = %checkpoint.file.display(),
                    offset = record_start,
                    size = raw.consumed,
                    limit = limit,
                    data = %preview(&record),
                    "Event exceeds the byte size limit and will be dropped"
                );
                continue;
            }

            if let Some(event) = self.decode_record(&record, record_start, &checkpoint.file) {
                events.push(event);
            }
        }

        let pending = (examined > 0).then(|| Checkpoint::new(&checkpoint.file, offset));
        Ok(Batch::new(events, pending, examined, self.batch_limit))
    }

    fn decode_record(&self, record: &[u8], record_start: u64, file: &Path) -> Option<Event> {
        let mut body = record;
        if let Some(stripped) = body.strip_suffix(b"\n") {
            body = stripped;
        }
        if let Some(stripped) = body.strip_suffix(b"\r") {
            body = stripped;
        }
        if record_start == 0 {
            if let Some(stripped) = body.strip_prefix(UTF8_BOM) {
                body = stripped;
            }
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            debug!(file = %file.display(), offset = record_start, "Skipping blank buffer line");
            return None;
        }

        if let Some(limit) = self.event_body_limit_bytes {
            if body.len() as u64 > limit {
                warn!(
                    file = %file.display(),
                    offset = record_start,
                    size = body.len(),
                    limit = limit,
                    data = %preview(body),
                    "Event exceeds the byte size limit and will be dropped"
                );
                return None;
            }
        }

        let text = match std::str::from_utf8(body) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    file = %file.display(),
                    offset = record_start,
                    error = %e,
                    "Event is not valid UTF-8 and will be dropped"
                );
                return None;
            }
        };

        match Event::from_json(text) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    file = %file.display(),
                    offset = record_start,
                    error = %e,
                    data = %preview(body),
                    "Unable to parse event JSON, event will be dropped"
                );
                None
            }
        }
    }
}

/// One line as pulled off the buffer file.
#[derive(Debug, PartialEq, Eq)]
struct RawRecord {
    /// Bytes consumed from the input, terminator included.
    consumed: usize,
    /// Ended in `\n` rather than at end of input.
    terminated: bool,
    /// Longer than the cap; `record` then holds only its first `cap` bytes.
    oversized: bool,
}

/// Read one `\n`-terminated record into `record`, storing at most `cap` bytes
/// of it. The rest of an oversized line is still consumed up to its newline.
fn read_record<R: BufRead>(
    input: &mut R,
    cap: Option<u64>,
    record: &mut Vec<u8>,
) -> io::Result<RawRecord> {
    let cap = cap.map_or(usize::MAX, |cap| usize::try_from(cap).unwrap_or(usize::MAX));
    let mut raw = RawRecord {
        consumed: 0,
        terminated: false,
        oversized: false,
    };

    loop {
        let available = match input.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(raw);
        }

        let (chunk, terminated) = match available.iter().position(|&b| b == b'\n') {
            Some(end) => (&available[..=end], true),
            None => (available, false),
        };

        if !raw.oversized {
            let room = cap.saturating_sub(record.len());
            if chunk.len() > room {
                record.extend_from_slice(&chunk[..room]);
                raw.oversized = true;
            } else {
                record.extend_from_slice(chunk);
            }
        }

        let used = chunk.len();
        input.consume(used);
        raw.consumed += used;

        if terminated {
            raw.terminated = true;
            return Ok(raw);
        }
    }
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .take(DROPPED_PREVIEW_CHARS)
        .collect()
}

fn delete_files(files: &[PathBuf]) {
    for file in files {
        match std::fs::remove_file(file) {
            Ok(()) => info!(file = %file.display(), "Deleted buffer file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                file = %file.display(),
                error = %e,
                "Unable to delete buffer file, will retry later"
            ),
        }
    }
}
