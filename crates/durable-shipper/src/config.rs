//! Configuration for the shipper.

use crate::error::{ShipperError, ShipperResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default maximum number of records examined per batch.
pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// Default time between delivery ticks.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(5);

/// Default maximum serialized size of a single event (1 MiB).
pub const DEFAULT_EVENT_BODY_LIMIT_BYTES: u64 = 1024 * 1024;

/// Suffix of the checkpoint file appended to the buffer base path.
pub const BOOKMARK_SUFFIX: &str = ".bookmark";

/// Extension shared by every buffer file.
pub const BUFFER_FILE_EXTENSION: &str = ".json";

/// Shipper configuration.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Base path of the buffer files. Buffer files are `<base><suffix>.json`
    /// and the checkpoint lives at `<base>.bookmark`.
    pub buffer_base: PathBuf,

    /// Maximum records examined (and so events sent) per batch.
    pub batch_limit: usize,

    /// Interval between ticks while deliveries succeed.
    pub poll_period: Duration,

    /// Records whose serialized size exceeds this are dropped.
    pub event_body_limit_bytes: Option<u64>,

    /// Soft cap on the bytes kept in dead-letter files.
    pub dead_letter_byte_budget: Option<u64>,

    /// Number of newest buffer files kept; older ones are skipped and deleted.
    pub retained_file_count: Option<usize>,
}

impl ShipperConfig {
    /// Create a configuration with default settings for the given buffer base.
    pub fn new(buffer_base: impl Into<PathBuf>) -> Self {
        Self {
            buffer_base: buffer_base.into(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            poll_period: DEFAULT_POLL_PERIOD,
            event_body_limit_bytes: Some(DEFAULT_EVENT_BODY_LIMIT_BYTES),
            dead_letter_byte_budget: None,
            retained_file_count: None,
        }
    }

    /// Build a configuration entirely from `SHIPPER_*` environment variables.
    ///
    /// `SHIPPER_BUFFER_BASE` is required; everything else falls back to the
    /// defaults.
    pub fn from_env() -> ShipperResult<Self> {
        let base = std::env::var("SHIPPER_BUFFER_BASE").map_err(|_| {
            ShipperError::Config("SHIPPER_BUFFER_BASE is not set".to_string())
        })?;
        let config = Self::new(base).with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `SHIPPER_*` environment variables.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Override settings from an arbitrary key lookup.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("SHIPPER_BUFFER_BASE") {
            self.buffer_base = PathBuf::from(base);
        }
        if let Some(limit) = parse_var(&lookup, "SHIPPER_BATCH_LIMIT") {
            self.batch_limit = limit;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SHIPPER_POLL_PERIOD_MS") {
            self.poll_period = Duration::from_millis(ms);
        }
        if let Some(bytes) = parse_var::<u64, _>(&lookup, "SHIPPER_EVENT_BODY_LIMIT_BYTES") {
            self.event_body_limit_bytes = (bytes > 0).then_some(bytes);
        }
        if let Some(bytes) = parse_var(&lookup, "SHIPPER_DEAD_LETTER_BUDGET_BYTES") {
            self.dead_letter_byte_budget = Some(bytes);
        }
        if let Some(count) = parse_var(&lookup, "SHIPPER_RETAINED_FILE_COUNT") {
            self.retained_file_count = Some(count);
        }
        self
    }

    /// Reject settings the delivery loop cannot work with.
    pub fn validate(&self) -> ShipperResult<()> {
        if self.batch_limit == 0 {
            return Err(ShipperError::Config("batch_limit must be greater than zero".into()));
        }
        if self.poll_period.is_zero() {
            return Err(ShipperError::Config("poll_period must be greater than zero".into()));
        }
        if self.retained_file_count == Some(0) {
            return Err(ShipperError::Config(
                "retained_file_count must be greater than zero".into(),
            ));
        }
        self.buffer_file_prefix()?;
        Ok(())
    }

    /// Absolute folder holding buffer files, the checkpoint and dead letters.
    pub fn buffer_folder(&self) -> ShipperResult<PathBuf> {
        let base = std::path::absolute(&self.buffer_base)?;
        base.parent().map(Path::to_path_buf).ok_or_else(|| {
            ShipperError::Config(format!("{} has no parent folder", base.display()))
        })
    }

    /// File name prefix shared by all buffer files.
    pub fn buffer_file_prefix(&self) -> ShipperResult<String> {
        self.buffer_base
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ShipperError::Config(format!(
                    "buffer base {} has no usable file name",
                    self.buffer_base.display()
                ))
            })
    }

    /// Absolute path of the checkpoint file.
    pub fn bookmark_path(&self) -> ShipperResult<PathBuf> {
        let prefix = self.buffer_file_prefix()?;
        Ok(self
            .buffer_folder()?
            .join(format!("{prefix}{BOOKMARK_SUFFIX}")))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_new_defaults() {
        let config = ShipperConfig::new("/var/buffer/app");

        assert_eq!(config.batch_limit, 10);
        assert_eq!(config.poll_period, Duration::from_secs(5));
        assert_eq!(config.event_body_limit_bytes, Some(1024 * 1024));
        assert!(config.dead_letter_byte_budget.is_none());
        assert!(config.retained_file_count.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let config = ShipperConfig::new("/var/buffer/app");

        assert_eq!(config.buffer_folder().unwrap(), PathBuf::from("/var/buffer"));
        assert_eq!(config.buffer_file_prefix().unwrap(), "app");
        assert_eq!(
            config.bookmark_path().unwrap(),
            PathBuf::from("/var/buffer/app.bookmark")
        );
    }

    #[test]
    fn test_relative_base_is_made_absolute() {
        let config = ShipperConfig::new("app-buffer");
        assert!(config.buffer_folder().unwrap().is_absolute());
        assert!(config.bookmark_path().unwrap().is_absolute());
    }

    #[test]
    fn test_overrides_apply() {
        let config = ShipperConfig::new("/tmp/a").with_overrides(lookup_from(&[
            ("SHIPPER_BUFFER_BASE", "/tmp/b/buffer"),
            ("SHIPPER_BATCH_LIMIT", "250"),
            ("SHIPPER_POLL_PERIOD_MS", "1500"),
            ("SHIPPER_EVENT_BODY_LIMIT_BYTES", "0"),
            ("SHIPPER_DEAD_LETTER_BUDGET_BYTES", "4096"),
            ("SHIPPER_RETAINED_FILE_COUNT", "31"),
        ]));

        assert_eq!(config.buffer_base, PathBuf::from("/tmp/b/buffer"));
        assert_eq!(config.batch_limit, 250);
        assert_eq!(config.poll_period, Duration::from_millis(1500));
        assert_eq!(config.event_body_limit_bytes, None);
        assert_eq!(config.dead_letter_byte_budget, Some(4096));
        assert_eq!(config.retained_file_count, Some(31));
    }

    #[test]
    fn test_unparseable_override_keeps_default() {
        let config = ShipperConfig::new("/tmp/a")
            .with_overrides(lookup_from(&[("SHIPPER_BATCH_LIMIT", "lots")]));
        assert_eq!(config.batch_limit, DEFAULT_BATCH_LIMIT);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ShipperConfig::new("/tmp/a");
        config.batch_limit = 0;
        assert!(matches!(config.validate(), Err(ShipperError::Config(_))));

        let mut config = ShipperConfig::new("/tmp/a");
        config.poll_period = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ShipperConfig::new("/tmp/a");
        config.retained_file_count = Some(0);
        assert!(config.validate().is_err());

        let config = ShipperConfig::new("/");
        assert!(config.validate().is_err());
    }
}
