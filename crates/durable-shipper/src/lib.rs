//! Crash-recoverable shipping of disk-buffered JSON events.
//!
//! This crate provides:
//! - CheckpointStore: persisted `offset:::path` bookmark of delivery progress
//! - BatchReader: size-bounded batches read from rolling buffer files
//! - LogShipper: timer-driven delivery loop with exponential backoff
//! - DeadLetterSink: on-disk preservation of permanently rejected batches
//! - HttpBulkTransport: newline-delimited JSON over HTTP

mod backoff;
mod buffer;
mod checkpoint;
mod config;
mod dead_letter;
mod error;
mod event;
mod http;
mod level;
mod reader;
mod retention;
mod shipper;
mod transport;

pub use backoff::{BackoffSchedule, MAXIMUM_BACKOFF, MINIMUM_BACKOFF};
pub use buffer::{is_settled, open_shared, BufferFileSet};
pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_SEPARATOR};
pub use config::{
    ShipperConfig, BOOKMARK_SUFFIX, BUFFER_FILE_EXTENSION, DEFAULT_BATCH_LIMIT,
    DEFAULT_EVENT_BODY_LIMIT_BYTES, DEFAULT_POLL_PERIOD,
};
pub use dead_letter::{DeadLetterSink, DEAD_LETTER_PREFIX};
pub use error::{ShipperError, ShipperResult};
pub use event::{Batch, Event};
pub use http::{classify_failure, HttpBulkTransport, HttpTransportConfig, MINIMUM_LEVEL_HEADER};
pub use level::{parse_level_hint, ControlledLevelSwitch, LevelSwitch};
pub use reader::BatchReader;
pub use retention::{plan_advance, plan_fresh, window_start, RetentionPlan};
pub use shipper::LogShipper;
pub use transport::{BatchTransport, SendOutcome};
