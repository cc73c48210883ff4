//! Job state, progress, outcomes, and the rate-limit retry policy.

use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use finsight_ai::ProcessingError;
use finsight_core::JobId;

/// Progress snapshot of a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed_count: usize,
    pub total_count: usize,
    /// 1-based index of the batch being worked on (0 before the first one).
    pub current_batch: usize,
    pub total_batches: usize,
}

/// Per-user job state.
///
/// Invariants: `processing` implies `job_id.is_some()`; progress is only
/// present while processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub processing: bool,
    pub job_id: Option<JobId>,
    pub progress: Option<JobProgress>,
    pub last_error: Option<ProcessingError>,
}

impl JobState {
    /// State right after a job has been registered.
    pub fn started(job_id: JobId) -> Self {
        Self {
            processing: true,
            job_id: Some(job_id),
            progress: None,
            last_error: None,
        }
    }

    pub fn is_owned_by(&self, job_id: JobId) -> bool {
        self.processing && self.job_id == Some(job_id)
    }

    /// Transition to idle, recording `error` when the job aborted.
    pub fn finish(&mut self, error: Option<ProcessingError>) {
        self.processing = false;
        self.job_id = None;
        self.progress = None;
        self.last_error = error;
    }
}

/// Terminal result of a background run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        suggestions_saved: usize,
        batches: usize,
    },
    Aborted(ProcessingError),
}

/// Returned synchronously by a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StartedJob {
    pub job_id: JobId,
    pub uncategorized_count: usize,
}

/// Status surface consumed by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizationStatus {
    pub uncategorized_count: usize,
    pub is_processing: bool,
    pub pending_suggestions_count: usize,
    pub job_id: Option<JobId>,
    pub has_error: bool,
    pub error: Option<ProcessingError>,
    pub progress: Option<JobProgress>,
}

/// Backoff schedule used when no server hint is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff: base * (attempt + 1)
    Linear,
    /// Exponential backoff: base * 2^attempt
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Linear
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff strategy `{other}`")),
        }
    }
}

/// Retry policy for rate-limited classifier calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of resubmissions of one batch (0 = no retries)
    pub max_retries: u32,
    /// Base delay of the backoff schedule
    pub base_delay: Duration,
    /// Ceiling for every computed delay
    pub max_delay: Duration,
    /// Added on top of a server-suggested wait
    pub hint_buffer: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            hint_buffer: Duration::from_secs(2),
            strategy: BackoffStrategy::Linear,
        }
    }
}

static RETRY_HINTS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)retry\s+(?:in|after)\s+(\d+(?:\.\d+)?)\s*(?:s|secs?|seconds?)\b")
            .expect("retry hint pattern must compile"),
        Regex::new(r#"(?i)"?retry_?delay"?\s*[:=]\s*"?(\d+(?:\.\d+)?)s"#)
            .expect("retry delay pattern must compile"),
    ]
});

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before resubmitting after the `attempt`-th (0-based) rate-limited call.
    ///
    /// A server hint in `failure_text` wins over the backoff schedule.
    pub fn next_delay(&self, failure_text: &str, attempt: u32) -> Duration {
        match Self::server_hint(failure_text) {
            Some(hint) => hint.saturating_add(self.hint_buffer).min(self.max_delay),
            None => self.backoff_delay(attempt),
        }
    }

    /// Backoff schedule delay for a 0-based attempt, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => self
                .base_delay
                .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX)),
        };
        delay.min(self.max_delay)
    }

    /// Server-suggested wait parsed from failure text, rounded up to whole seconds.
    pub fn server_hint(failure_text: &str) -> Option<Duration> {
        RETRY_HINTS.iter().find_map(|re| {
            let secs: f64 = re.captures(failure_text)?.get(1)?.as_str().parse().ok()?;
            secs.is_finite().then(|| Duration::from_secs(secs.ceil() as u64))
        })
    }

    /// Check if another resubmission is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}
