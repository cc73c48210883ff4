//! Configuration loading and representation.
//!
//! Every knob has a default; environment variables (`FINSIGHT_*`) override
//! them. Values that are present but unparsable are errors rather than
//! silently ignored.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use finsight_ai::{BatchPlanner, DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCHES};

use crate::jobs::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizerConfig {
    pub batch_size: usize,
    pub max_batches: usize,
    /// Pause between two consecutive batches of one job.
    pub inter_batch_delay: Duration,
    /// Hard limit for a single classifier call.
    pub batch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
            inter_batch_delay: Duration::from_secs(2),
            batch_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl CategorizerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests, alternative config sources).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        Ok(Self {
            batch_size: env
                .positive("FINSIGHT_BATCH_SIZE")?
                .unwrap_or(defaults.batch_size),
            max_batches: env
                .positive("FINSIGHT_MAX_BATCHES")?
                .unwrap_or(defaults.max_batches),
            inter_batch_delay: env
                .millis("FINSIGHT_INTER_BATCH_DELAY_MS")?
                .unwrap_or(defaults.inter_batch_delay),
            batch_timeout: env
                .parse("FINSIGHT_BATCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.batch_timeout),
            retry: RetryPolicy {
                max_retries: env
                    .parse("FINSIGHT_MAX_RETRIES")?
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: env
                    .millis("FINSIGHT_RETRY_BASE_DELAY_MS")?
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: env
                    .millis("FINSIGHT_RETRY_MAX_DELAY_MS")?
                    .unwrap_or(defaults.retry.max_delay),
                hint_buffer: env
                    .millis("FINSIGHT_RETRY_HINT_BUFFER_MS")?
                    .unwrap_or(defaults.retry.hint_buffer),
                strategy: env
                    .parse::<BackoffStrategy>("FINSIGHT_RETRY_STRATEGY")?
                    .unwrap_or(defaults.retry.strategy),
            },
        })
    }

    pub fn planner(&self) -> BatchPlanner {
        BatchPlanner::new(self.batch_size, self.max_batches)
    }
}

/// Where the remote classifier lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ClassifierEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("FINSIGHT_CLASSIFIER_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("FINSIGHT_CLASSIFIER_URL"))?;
        let api_key = lookup("FINSIGHT_CLASSIFIER_API_KEY").filter(|v| !v.is_empty());

        Ok(Self { base_url, api_key })
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    fn positive(&self, key: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.parse::<usize>(key)? {
            Some(0) => Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            }),
            value => Ok(value),
        }
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}
