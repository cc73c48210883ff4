//! Infrastructure layer: job state, orchestration, collaborators, config, external services.

pub mod config;
pub mod external;
pub mod jobs;
pub mod sources;


pub use config::{CategorizerConfig, ClassifierEndpoint, ConfigError};
pub use external::HttpClassifier;
pub use jobs::{
    CategorizationOrchestrator, CategorizationStatus, Collaborators, InMemoryJobStateStore,
    JobOutcome, JobProgress, JobState, JobStateStore, JobStoreError, RetryPolicy, StartError,
    StartedJob, StatusError, TaskSpawner, TokioSpawner,
};
pub use sources::{
    CategorySource, InMemoryLedger, InMemorySuggestionSink, SourceError, SuggestionSink,
    TransactionSource,
};
