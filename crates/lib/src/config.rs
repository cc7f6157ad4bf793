//! Configuration for opening an [`Instance`](crate::Instance).

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    clock::{Clock, SystemClock},
    constants::DEFAULT_EXPIRATION_INTERVAL_MS,
};

/// Settings applied when an [`Instance`](crate::Instance) is opened.
///
/// The plain fields round-trip through serde so they can live in an
/// application's own configuration file; the clock is runtime-only.
///
/// ```
/// use std::time::Duration;
/// use vellum::DatabaseConfig;
///
/// let config = DatabaseConfig::default()
///     .with_expiration_interval(Duration::from_millis(250))
///     .with_reaper(false);
/// assert_eq!(config.expiration_interval(), Duration::from_millis(250));
/// assert!(!config.reaper_enabled);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Period of the background expiration reaper, in milliseconds.
    pub expiration_interval_ms: u64,
    /// Whether the background reaper thread is started at all.
    ///
    /// With the reaper disabled, expired documents are only removed by
    /// explicit [`Database::reap_expired`](crate::Database::reap_expired) calls.
    pub reaper_enabled: bool,
    #[serde(skip, default = "default_clock")]
    clock: Arc<dyn Clock>,
}

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

impl DatabaseConfig {
    /// Replace the time source used for expiration deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the reaper period.
    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Enable or disable the background reaper.
    pub fn with_reaper(mut self, enabled: bool) -> Self {
        self.reaper_enabled = enabled;
        self
    }

    /// The reaper period as a [`Duration`].
    pub fn expiration_interval(&self) -> Duration {
        Duration::from_millis(self.expiration_interval_ms.max(1))
    }

    /// The configured time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            expiration_interval_ms: DEFAULT_EXPIRATION_INTERVAL_MS,
            reaper_enabled: true,
            clock: default_clock(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("expiration_interval_ms", &self.expiration_interval_ms)
            .field("reaper_enabled", &self.reaper_enabled)
            .field("clock", &self.clock)
            .finish()
    }
}
