//! Job state storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use finsight_ai::ProcessingError;
use finsight_core::{JobId, UserId};

use super::types::{JobProgress, JobState};

/// Per-user job state store.
///
/// Implementations must make [`JobStateStore::try_begin`] an atomic
/// check-and-set: it is the single-flight guarantee.
pub trait JobStateStore: Send + Sync {
    /// Register `job_id` as the user's active job.
    ///
    /// Returns `false` (and changes nothing) when a job is already active.
    /// On success any previous `last_error` is cleared.
    fn try_begin(&self, user_id: UserId, job_id: JobId) -> Result<bool, JobStoreError>;

    /// Current state (default/idle when the user has never run a job).
    fn get(&self, user_id: UserId) -> Result<JobState, JobStoreError>;

    /// Overwrite the progress snapshot of the active job.
    fn set_progress(
        &self,
        user_id: UserId,
        job_id: JobId,
        progress: JobProgress,
    ) -> Result<(), JobStoreError>;

    /// End the active job; `error` becomes `last_error` (None on success).
    fn finish(
        &self,
        user_id: UserId,
        job_id: JobId,
        error: Option<ProcessingError>,
    ) -> Result<(), JobStoreError>;

    fn is_processing(&self, user_id: UserId) -> Result<bool, JobStoreError> {
        Ok(self.get(user_id)?.processing)
    }
}

/// Job state store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {0} is not the active job for this user")]
    StaleJob(JobId),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl<S> JobStateStore for Arc<S>
where
    S: JobStateStore + ?Sized,
{
    fn try_begin(&self, user_id: UserId, job_id: JobId) -> Result<bool, JobStoreError> {
        (**self).try_begin(user_id, job_id)
    }

    fn get(&self, user_id: UserId) -> Result<JobState, JobStoreError> {
        (**self).get(user_id)
    }

    fn set_progress(
        &self,
        user_id: UserId,
        job_id: JobId,
        progress: JobProgress,
    ) -> Result<(), JobStoreError> {
        (**self).set_progress(user_id, job_id, progress)
    }

    fn finish(
        &self,
        user_id: UserId,
        job_id: JobId,
        error: Option<ProcessingError>,
    ) -> Result<(), JobStoreError> {
        (**self).finish(user_id, job_id, error)
    }
}

/// In-process job state store (state is lost on restart).
#[derive(Debug, Default)]
pub struct InMemoryJobStateStore {
    states: RwLock<HashMap<UserId, JobState>>,
}

impl InMemoryJobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job state lock poisoned".to_string())
    }

    fn with_active<F>(&self, user_id: UserId, job_id: JobId, f: F) -> Result<(), JobStoreError>
    where
        F: FnOnce(&mut JobState),
    {
        let mut states = self.states.write().map_err(|_| Self::poisoned())?;
        match states.get_mut(&user_id) {
            Some(state) if state.is_owned_by(job_id) => {
                f(state);
                Ok(())
            }
            _ => Err(JobStoreError::StaleJob(job_id)),
        }
    }
}

impl JobStateStore for InMemoryJobStateStore {
    fn try_begin(&self, user_id: UserId, job_id: JobId) -> Result<bool, JobStoreError> {
        let mut states = self.states.write().map_err(|_| Self::poisoned())?;
        let state = states.entry(user_id).or_default();
        if state.processing {
            return Ok(false);
        }
        *state = JobState::started(job_id);
        Ok(true)
    }

    fn get(&self, user_id: UserId) -> Result<JobState, JobStoreError> {
        let states = self.states.read().map_err(|_| Self::poisoned())?;
        Ok(states.get(&user_id).cloned().unwrap_or_default())
    }

    fn set_progress(
        &self,
        user_id: UserId,
        job_id: JobId,
        progress: JobProgress,
    ) -> Result<(), JobStoreError> {
        self.with_active(user_id, job_id, |state| state.progress = Some(progress))
    }

    fn finish(
        &self,
        user_id: UserId,
        job_id: JobId,
        error: Option<ProcessingError>,
    ) -> Result<(), JobStoreError> {
        self.with_active(user_id, job_id, |state| state.finish(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsight_ai::ErrorKind;

    #[test]
    fn single_flight_per_user() {
        let store = InMemoryJobStateStore::new();
        let user = UserId::new();
        let first = JobId::new();

        assert!(store.try_begin(user, first).unwrap());
        assert!(!store.try_begin(user, JobId::new()).unwrap());

        let state = store.get(user).unwrap();
        assert!(state.processing);
        assert_eq!(state.job_id, Some(first));

        // Other users are independent.
        assert!(store.try_begin(UserId::new(), JobId::new()).unwrap());
    }

    #[test]
    fn begin_clears_previous_error() {
        let store = InMemoryJobStateStore::new();
        let user = UserId::new();
        let job = JobId::new();

        store.try_begin(user, job).unwrap();
        store
            .finish(user, job, Some(ProcessingError::new(ErrorKind::AuthError)))
            .unwrap();
        assert_eq!(
            store.get(user).unwrap().last_error.map(|e| e.code),
            Some(ErrorKind::AuthError)
        );

        store.try_begin(user, JobId::new()).unwrap();
        assert!(store.get(user).unwrap().last_error.is_none());
    }

    #[test]
    fn stale_jobs_cannot_write() {
        let store = InMemoryJobStateStore::new();
        let user = UserId::new();
        let job = JobId::new();
        store.try_begin(user, job).unwrap();

        let other = JobId::new();
        assert!(matches!(
            store.set_progress(user, other, JobProgress::default()),
            Err(JobStoreError::StaleJob(id)) if id == other
        ));
        assert!(store.finish(user, other, None).is_err());
        assert!(store.get(user).unwrap().is_owned_by(job));
    }

    #[test]
    fn finish_resets_progress() {
        let store = InMemoryJobStateStore::arc();
        let user = UserId::new();
        let job = JobId::new();
        store.try_begin(user, job).unwrap();

        let progress = JobProgress {
            processed_count: 40,
            total_count: 45,
            current_batch: 2,
            total_batches: 2,
        };
        store.set_progress(user, job, progress).unwrap();
        assert_eq!(store.get(user).unwrap().progress, Some(progress));

        store.finish(user, job, None).unwrap();
        let state = store.get(user).unwrap();
        assert!(!store.is_processing(user).unwrap());
        assert_eq!(state.progress, None);
        assert_eq!(state.job_id, None);
    }

    #[test]
    fn unknown_user_is_idle() {
        let store = InMemoryJobStateStore::new();
        assert_eq!(store.get(UserId::new()).unwrap(), JobState::default());
    }
}
