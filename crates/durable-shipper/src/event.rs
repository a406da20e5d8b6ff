//! Buffered events and the batches they are shipped in.

use crate::checkpoint::Checkpoint;
use serde::Serialize;
use serde_json::value::RawValue;

/// One buffered record: a JSON object kept exactly as it was written.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Event {
    raw: Box<RawValue>,
}

impl Event {
    /// Parse a record, accepting only JSON objects.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let text = text.trim();
        if !text.starts_with('{') {
            return Err(<serde_json::Error as serde::de::Error>::custom(
                "event is not a JSON object",
            ));
        }
        let raw = RawValue::from_string(text.to_string())?;
        Ok(Self { raw })
    }

    /// Serialized JSON text of the event.
    pub fn as_str(&self) -> &str {
        self.raw.get()
    }

    /// Serialized size in bytes.
    pub fn len(&self) -> usize {
        self.as_str().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the event into a generic JSON value.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(self.as_str())
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Event {}

/// A size-bounded run of events plus the position just past them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    events: Vec<Event>,
    pending: Option<Checkpoint>,
    records_examined: usize,
    limit: usize,
}

impl Batch {
    pub(crate) fn new(
        events: Vec<Event>,
        pending: Option<Checkpoint>,
        records_examined: usize,
        limit: usize,
    ) -> Self {
        Self {
            events,
            pending,
            records_examined,
            limit,
        }
    }

    /// A batch with nothing to deliver.
    pub fn empty(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Events that parsed successfully, in file order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Checkpoint to commit once this batch has been handled.
    pub fn pending_checkpoint(&self) -> Option<&Checkpoint> {
        self.pending.as_ref()
    }

    /// Records read from the file, including dropped ones.
    pub fn records_examined(&self) -> usize {
        self.records_examined
    }

    /// True when no record was read at all.
    pub fn is_empty(&self) -> bool {
        self.records_examined == 0
    }

    /// True when records were read but every one of them was dropped.
    pub fn is_all_dropped(&self) -> bool {
        self.records_examined > 0 && self.events.is_empty()
    }

    /// True when the batch hit the configured limit, so more data is likely pending.
    pub fn is_full(&self) -> bool {
        self.limit > 0 && self.records_examined >= self.limit
    }

    /// Total serialized size of the events.
    pub fn payload_bytes(&self) -> usize {
        self.events.iter().map(Event::len).sum()
    }
}
