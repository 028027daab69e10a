//! Race configuration

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipe::PipeMode;

/// How the attempt hands off from the descriptor generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopMode {
    /// Signal stop and read descriptor tables straight away; the generator
    /// may still be mid-tick while the inventory is taken
    #[default]
    FireAndForget,
    /// Signal stop and wait for the generator to hand back its descriptors
    /// before any inventory is read
    Acknowledged,
}

/// Configuration for a race run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Directory holding the container roots
    pub lxcpath: PathBuf,

    /// Container to start on every attempt
    pub container_name: String,

    /// Interval between pipe allocations in the generator
    pub tick_interval: Duration,

    /// How the generator allocates its pipes
    pub pipe_mode: PipeMode,

    /// Generator handoff after the container start returns
    pub stop_mode: StopMode,

    /// Upper bound on attempts (None = run until detected)
    pub max_attempts: Option<NonZeroU64>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            lxcpath: default_lxc_path(),
            container_name: "precise".into(),
            tick_interval: Duration::from_millis(10),
            pipe_mode: PipeMode::default(),
            stop_mode: StopMode::default(),
            max_attempts: None,
        }
    }
}

impl RaceConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> RaceConfigBuilder {
        RaceConfigBuilder::default()
    }
}

/// Builder for RaceConfig
#[derive(Debug, Default)]
pub struct RaceConfigBuilder {
    config: RaceConfig,
}

impl RaceConfigBuilder {
    #[must_use]
    pub fn lxcpath(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.lxcpath = path.into();
        self
    }

    #[must_use]
    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.config.container_name = name.into();
        self
    }

    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn tick_millis(self, millis: u64) -> Self {
        self.tick_interval(Duration::from_millis(millis))
    }

    #[must_use]
    pub fn pipe_mode(mut self, mode: PipeMode) -> Self {
        self.config.pipe_mode = mode;
        self
    }

    #[must_use]
    pub fn stop_mode(mut self, mode: StopMode) -> Self {
        self.config.stop_mode = mode;
        self
    }

    /// Bound the number of attempts; zero means unbounded
    #[must_use]
    pub fn max_attempts(mut self, attempts: u64) -> Self {
        self.config.max_attempts = NonZeroU64::new(attempts);
        self
    }

    /// Finish the config, rejecting values the attempt cannot run with
    pub fn build(self) -> crate::Result<RaceConfig> {
        let config = self.config;

        if config.container_name.is_empty() {
            return Err(crate::ForkraceError::Config(
                "container name must not be empty".into(),
            ));
        }

        // tokio::time::interval panics on a zero period
        if config.tick_interval.is_zero() {
            return Err(crate::ForkraceError::Config(
                "tick interval must be greater than zero".into(),
            ));
        }

        Ok(config)
    }
}

/// Get default container root from FORKRACE_LXCPATH env var or system default
///
/// Returns:
/// - `$FORKRACE_LXCPATH` if set
/// - `/var/lib/lxc` otherwise (the stock LXC install location)
pub fn default_lxc_path() -> PathBuf {
    std::env::var("FORKRACE_LXCPATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/lxc"))
}
