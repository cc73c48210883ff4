//! Background categorization jobs.
//!
//! ## Components
//!
//! - `JobStateStore`: per-user single-flight state (in-memory or Redis)
//! - `RetryPolicy`: rate-limit backoff with server hints
//! - `TaskSpawner`: where background runs execute
//! - `CategorizationOrchestrator`: start / run / status

pub mod orchestrator;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod spawn;
pub mod store;
pub mod types;

pub use orchestrator::{CategorizationOrchestrator, Collaborators, StartError, StatusError};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobStateStore;
pub use spawn::{BackgroundTask, TaskSpawner, TokioSpawner};
pub use store::{InMemoryJobStateStore, JobStateStore, JobStoreError};
pub use types::{
    BackoffStrategy, CategorizationStatus, JobOutcome, JobProgress, JobState, RetryPolicy,
    StartedJob,
};
