//! Minimum-level gating driven by hints from the remote collector.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, Level};

/// Shared, cloneable minimum-level cell.
///
/// The host's buffer writer checks it before appending an event; the
/// delivery loop raises or lowers it when the collector asks.
#[derive(Debug, Clone)]
pub struct LevelSwitch {
    level: Arc<RwLock<LevelFilter>>,
}

impl LevelSwitch {
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level: Arc::new(RwLock::new(level)),
        }
    }

    pub fn level(&self) -> LevelFilter {
        *self.level.read()
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.level.write() = level;
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level <= self.level()
    }
}

impl Default for LevelSwitch {
    fn default() -> Self {
        Self::new(LevelFilter::TRACE)
    }
}

/// Optional [`LevelSwitch`] owned by the delivery loop.
#[derive(Debug, Clone, Default)]
pub struct ControlledLevelSwitch {
    switch: Option<LevelSwitch>,
}

impl ControlledLevelSwitch {
    pub fn new(switch: Option<LevelSwitch>) -> Self {
        Self { switch }
    }

    /// Whether an event at `level` should be buffered. Always true when no
    /// switch is attached.
    pub fn is_included(&self, level: Level) -> bool {
        self.switch
            .as_ref()
            .map_or(true, |switch| switch.is_enabled(level))
    }

    /// Apply the latest hint from the collector. `None` leaves the switch as is.
    pub fn update(&self, hint: Option<LevelFilter>) {
        let (Some(switch), Some(level)) = (&self.switch, hint) else {
            return;
        };
        if switch.level() != level {
            info!(from = %switch.level(), to = %level, "Collector adjusted minimum level");
            switch.set_level(level);
        }
    }
}

/// Parse a level name sent by a collector.
///
/// Accepts tracing names (`trace`, `info`, ...) plus the common aliases
/// `verbose`, `information`, `warning` and `fatal`, case-insensitively.
pub fn parse_level_hint(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "verbose" | "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "information" | "info" => Some(LevelFilter::INFO),
        "warning" | "warn" => Some(LevelFilter::WARN),
        "error" | "fatal" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}
