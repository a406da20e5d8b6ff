//! The delivery loop: read a batch, send it, act on the outcome, repeat.

use crate::backoff::BackoffSchedule;
use crate::config::ShipperConfig;
use crate::dead_letter::DeadLetterSink;
use crate::error::ShipperResult;
use crate::event::Batch;
use crate::level::{ControlledLevelSwitch, LevelSwitch};
use crate::reader::BatchReader;
use crate::transport::{BatchTransport, SendOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn, Level};

/// Ships buffered events to a collector on a timer.
///
/// Each tick drains full batches until the buffer runs dry, the collector
/// reports a transient failure, or an I/O problem occurs. Ticks never overlap.
pub struct LogShipper {
    inner: Arc<ShipperInner>,
}

struct ShipperInner {
    /// Held for the whole tick, so it doubles as the tick lock.
    reader: Mutex<BatchReader>,
    transport: Arc<dyn BatchTransport>,
    dead_letters: DeadLetterSink,
    schedule: parking_lot::Mutex<BackoffSchedule>,
    level: ControlledLevelSwitch,
    state: parking_lot::Mutex<LoopState>,
    wake: Notify,
}

#[derive(Default)]
struct LoopState {
    unloading: bool,
    timer: Option<JoinHandle<()>>,
}

/// What a single pass over one batch decided.
enum Step {
    Continue,
    Stop,
}

impl LogShipper {
    /// Create a shipper for the buffer described by `config`. Nothing runs
    /// until [`start`](Self::start) or [`tick`](Self::tick) is called.
    pub fn new(
        config: ShipperConfig,
        transport: Arc<dyn BatchTransport>,
        level_switch: Option<LevelSwitch>,
    ) -> ShipperResult<Self> {
        let reader = BatchReader::from_config(&config)?;
        let dead_letters = DeadLetterSink::new(config.buffer_folder()?, config.dead_letter_byte_budget);

        info!(
            buffer = %config.buffer_base.display(),
            batch_limit = config.batch_limit,
            poll_period_ms = config.poll_period.as_millis() as u64,
            "Log shipper created"
        );

        Ok(Self {
            inner: Arc::new(ShipperInner::new(
                reader,
                transport,
                dead_letters,
                config.poll_period,
                level_switch,
            )),
        })
    }

    /// Spawn the timer task. Calling it again, or after shutdown, does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if state.unloading || state.timer.is_some() {
            return;
        }

        let inner = self.inner.clone();
        state.timer = Some(tokio::spawn(run_timer(inner)));
        debug!("Log shipper timer started");
    }

    /// Whether the timer task is running.
    pub fn is_running(&self) -> bool {
        let state = self.inner.state.lock();
        !state.unloading && state.timer.is_some()
    }

    /// Run one delivery cycle now, waiting for any cycle already in progress.
    pub async fn tick(&self) {
        self.inner.on_tick().await;
    }

    /// Stop the timer, wait for an in-flight cycle, then run one final cycle.
    pub async fn shutdown(&self) {
        let timer = {
            let mut state = self.inner.state.lock();
            if state.unloading {
                return;
            }
            state.unloading = true;
            state.timer.take()
        };

        self.inner.wake.notify_one();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Log shipper timer task failed");
                }
            }
        }

        self.inner.on_tick().await;
        info!("Log shipper stopped");
    }

    /// Whether an event at `level` should be buffered under the current
    /// collector-controlled minimum level.
    pub fn is_included(&self, level: Level) -> bool {
        self.inner.level.is_included(level)
    }

    /// Delay the timer will wait before the next cycle.
    pub fn next_interval(&self) -> Duration {
        self.inner.schedule.lock().next_interval()
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.state.lock().timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(inner: Arc<ShipperInner>) {
    loop {
        let interval = inner.schedule.lock().next_interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = inner.wake.notified() => {}
        }

        if inner.is_unloading() {
            break;
        }
        inner.on_tick().await;
        if inner.is_unloading() {
            break;
        }
    }
    debug!("Log shipper timer exited");
}

impl ShipperInner {
    fn new(
        reader: BatchReader,
        transport: Arc<dyn BatchTransport>,
        dead_letters: DeadLetterSink,
        poll_period: Duration,
        level_switch: Option<LevelSwitch>,
    ) -> Self {
        Self {
            reader: Mutex::new(reader),
            transport,
            dead_letters,
            schedule: parking_lot::Mutex::new(BackoffSchedule::new(poll_period)),
            level: ControlledLevelSwitch::new(level_switch),
            state: parking_lot::Mutex::new(LoopState::default()),
            wake: Notify::new(),
        }
    }

    fn is_unloading(&self) -> bool {
        self.state.lock().unloading
    }

    async fn on_tick(&self) {
        let mut reader = self.reader.lock().await;
        let mut hint = None;

        loop {
            let batch = match reader.next_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    self.schedule.lock().mark_failure();
                    warn!(
                        error = %e,
                        next_interval_ms = self.next_interval_ms(),
                        "Unable to read buffered events"
                    );
                    break;
                }
            };

            if batch.is_empty() {
                self.schedule.lock().mark_success();
                if let Err(e) = reader.advance_if_idle() {
                    self.schedule.lock().mark_failure();
                    warn!(error = %e, "Unable to advance to the next buffer file");
                }
                break;
            }

            if let Step::Stop = self.deliver(&batch, &mut hint).await {
                break;
            }

            if let Err(e) = reader.commit() {
                self.schedule.lock().mark_failure();
                warn!(error = %e, "Unable to persist checkpoint, batch will be resent");
                break;
            }
            self.schedule.lock().mark_success();

            if !batch.is_full() {
                break;
            }
        }

        self.level.update(hint);
    }

    /// Send one batch and handle the outcome. `Stop` leaves the batch uncommitted.
    async fn deliver(&self, batch: &Batch, hint: &mut Option<LevelFilter>) -> Step {
        if batch.is_all_dropped() {
            debug!(
                records = batch.records_examined(),
                "Every record in the batch was dropped, skipping send"
            );
            return Step::Continue;
        }

        match self.transport.send(batch.events()).await {
            SendOutcome::Accepted { minimum_level } => {
                if minimum_level.is_some() {
                    *hint = minimum_level;
                }
                info!(
                    events = batch.events().len(),
                    bytes = batch.payload_bytes(),
                    "Batch accepted"
                );
                Step::Continue
            }
            SendOutcome::Rejected { code, message } => {
                warn!(
                    events = batch.events().len(),
                    code = %code,
                    reason = %message,
                    "Batch permanently rejected, moving it to a dead-letter file"
                );
                match self.dead_letters.preserve(batch.events(), &code, &message) {
                    Ok(_) => Step::Continue,
                    Err(e) => {
                        // Keep the batch pending so nothing is committed past it.
                        self.schedule.lock().mark_failure();
                        error!(
                            error = %e,
                            code = %code,
                            next_interval_ms = self.next_interval_ms(),
                            "Unable to preserve rejected batch, will retry"
                        );
                        Step::Stop
                    }
                }
            }
            SendOutcome::TransientFailure { code, message } => {
                self.schedule.lock().mark_failure();
                warn!(
                    code = %code,
                    reason = %message,
                    next_interval_ms = self.next_interval_ms(),
                    "Batch delivery failed, will retry"
                );
                Step::Stop
            }
        }
    }

    fn next_interval_ms(&self) -> u64 {
        self.schedule.lock().next_interval().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    /// Replays scripted outcomes and records what it was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: parking_lot::Mutex<VecDeque<SendOutcome>>,
        sent: parking_lot::Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<SendOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: parking_lot::Mutex::new(outcomes.into()),
                sent: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Vec<String>> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl BatchTransport for ScriptedTransport {
        async fn send(&self, events: &[Event]) -> SendOutcome {
            self.sent
                .lock()
                .push(events.iter().map(|e| e.as_str().to_string()).collect());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(SendOutcome::accepted)
        }
    }

    fn config(dir: &TempDir, batch_limit: usize) -> ShipperConfig {
        let mut config = ShipperConfig::new(dir.path().join("buffer"));
        config.batch_limit = batch_limit;
        config.poll_period = Duration::from_millis(50);
        config
    }

    fn append(path: &Path, count: usize, start: usize) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for i in start..start + count {
            writeln!(file, r#"{{"n":{i}}}"#).unwrap();
        }
    }

    fn bookmark(dir: &TempDir) -> String {
        std::fs::read_to_string(dir.path().join("buffer.bookmark")).unwrap_or_default()
    }

    fn dead_letter_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("invalid-")
            })
            .count()
    }

    #[tokio::test]
    async fn test_tick_drains_full_batches() {
        let dir = tempdir().unwrap();
        append(&dir.path().join("buffer-1.json"), 7, 0);
        let transport = ScriptedTransport::new(vec![]);
        let shipper = LogShipper::new(config(&dir, 3), transport.clone(), None).unwrap();

        shipper.tick().await;

        let sizes: Vec<usize> = transport.sent().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(shipper.next_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_checkpoint_and_backs_off() {
        let dir = tempdir().unwrap();
        append(&dir.path().join("buffer-1.json"), 2, 0);
        let transport = ScriptedTransport::new(vec![SendOutcome::transient("503", "busy")]);
        let shipper = LogShipper::new(config(&dir, 10), transport.clone(), None).unwrap();

        shipper.tick().await;
        assert_eq!(transport.sent().len(), 1);
        assert!(bookmark(&dir).is_empty());
        assert_eq!(shipper.next_interval(), Duration::from_secs(10));

        shipper.tick().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1], "same batch is resent");
        assert_eq!(shipper.next_interval(), Duration::from_millis(50));
        assert!(bookmark(&dir).starts_with("16:::"));
    }

    #[tokio::test]
    async fn test_rejected_batch_is_dead_lettered_and_committed() {
        let dir = tempdir().unwrap();
        append(&dir.path().join("buffer-1.json"), 2, 0);
        let transport = ScriptedTransport::new(vec![SendOutcome::rejected("400", "Bad Request")]);
        let shipper = LogShipper::new(config(&dir, 10), transport.clone(), None).unwrap();

        shipper.tick().await;

        assert_eq!(dead_letter_count(&dir), 1);
        assert!(bookmark(&dir).starts_with("16:::"));
        assert_eq!(shipper.next_interval(), Duration::from_millis(50));

        shipper.tick().await;
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_dead_letter_folder_keeps_batch_pending() {
        let dir = tempdir().unwrap();
        append(&dir.path().join("buffer-1.json"), 1, 0);
        let dead_letter_folder = dir.path().join("rejected");
        let transport = ScriptedTransport::new(vec![
            SendOutcome::rejected("400", "Bad Request"),
            SendOutcome::rejected("400", "Bad Request"),
        ]);
        let inner = ShipperInner::new(
            BatchReader::from_config(&config(&dir, 10)).unwrap(),
            transport.clone(),
            DeadLetterSink::new(&dead_letter_folder, None),
            Duration::from_millis(50),
            None,
        );

        inner.on_tick().await;
        assert!(bookmark(&dir).is_empty(), "checkpoint must not pass an unpreserved batch");
        assert!(inner.schedule.lock().next_interval() > Duration::from_millis(50));

        std::fs::create_dir(&dead_letter_folder).unwrap();
        inner.on_tick().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(std::fs::read_dir(&dead_letter_folder).unwrap().count(), 1);
        assert!(bookmark(&dir).starts_with("8:::"));
        assert_eq!(inner.schedule.lock().next_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_all_dropped_batch_is_committed_without_send() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("buffer-1.json"), "oops\n[1]\n").unwrap();
        let transport = ScriptedTransport::new(vec![]);
        let shipper = LogShipper::new(config(&dir, 10), transport.clone(), None).unwrap();

        shipper.tick().await;

        assert!(transport.sent().is_empty());
        assert!(bookmark(&dir).starts_with("9:::"));
    }

    #[tokio::test]
    async fn test_level_hint_updates_switch() {
        let dir = tempdir().unwrap();
        append(&dir.path().join("buffer-1.json"), 1, 0);
        let switch = LevelSwitch::new(LevelFilter::TRACE);
        let transport = ScriptedTransport::new(vec![SendOutcome::Accepted {
            minimum_level: Some(LevelFilter::WARN),
        }]);
        let shipper =
            LogShipper::new(config(&dir, 10), transport, Some(switch.clone())).unwrap();

        assert!(shipper.is_included(Level::DEBUG));
        shipper.tick().await;

        assert_eq!(switch.level(), LevelFilter::WARN);
        assert!(!shipper.is_included(Level::INFO));
        assert!(shipper.is_included(Level::ERROR));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_flushes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("buffer-1.json");
        let transport = ScriptedTransport::new(vec![]);
        let mut config = config(&dir, 10);
        config.poll_period = Duration::from_secs(3600);
        let shipper = LogShipper::new(config, transport.clone(), None).unwrap();

        shipper.start();
        shipper.start();
        assert!(shipper.is_running());

        append(&path, 3, 0);
        shipper.shutdown().await;

        assert!(!shipper.is_running());
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].len(), 3);

        shipper.start();
        assert!(!shipper.is_running());
    }
}
