//! Engine configuration.
//!
//! Read from the environment with defaults for every key:
//!
//! | variable                                | default |
//! |-----------------------------------------|---------|
//! | `PROJECTOR_POLL_INTERVAL_MS`            | 250     |
//! | `PROJECTOR_BATCH_SIZE`                  | 512     |
//! | `PROJECTOR_PARALLEL_DISPATCH`           | true    |
//! | `PROJECTOR_REBUILD_ON_SIGNATURE_CHANGE` | true    |

use std::time::Duration;

use thiserror::Error;

pub const POLL_INTERVAL_ENV: &str = "PROJECTOR_POLL_INTERVAL_MS";
pub const BATCH_SIZE_ENV: &str = "PROJECTOR_BATCH_SIZE";
pub const PARALLEL_DISPATCH_ENV: &str = "PROJECTOR_PARALLEL_DISPATCH";
pub const REBUILD_ON_SIGNATURE_CHANGE_ENV: &str = "PROJECTOR_REBUILD_ON_SIGNATURE_CHANGE";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Pause between polling cycles of the dispatch worker.
    pub poll_interval: Duration,
    /// Maximum commits read from the event store per request.
    pub batch_size: usize,
    /// Run projections of one cycle on scoped threads.
    pub parallel_dispatch: bool,
    /// Rebuild a projection whose stored checkpoint carries another signature.
    pub rebuild_on_signature_change: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 512,
            parallel_dispatch: true,
            rebuild_on_signature_change: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = match parse::<u64>(&lookup, POLL_INTERVAL_ENV)? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.poll_interval,
        };

        let batch_size = parse::<usize>(&lookup, BATCH_SIZE_ENV)?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(ConfigError::Zero { key: BATCH_SIZE_ENV });
        }

        Ok(Self {
            poll_interval,
            batch_size,
            parallel_dispatch: parse(&lookup, PARALLEL_DISPATCH_ENV)?.unwrap_or(defaults.parallel_dispatch),
            rebuild_on_signature_change: parse(&lookup, REBUILD_ON_SIGNATURE_CHANGE_ENV)?
                .unwrap_or(defaults.rebuild_on_signature_change),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_parallel_dispatch(mut self, parallel_dispatch: bool) -> Self {
        self.parallel_dispatch = parallel_dispatch;
        self
    }

    pub fn with_rebuild_on_signature_change(mut self, rebuild: bool) -> Self {
        self.rebuild_on_signature_change = rebuild;
        self
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
