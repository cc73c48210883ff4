//! Redis-backed job state store (optional, `redis` feature).
//!
//! Lets several API processes share one view of per-user jobs:
//!
//! - **Lease key** `{prefix}:{user}:lease` holds the active job id with a TTL.
//!   A crashed process releases the user once it expires.
//! - **State key** `{prefix}:{user}:state` holds the JSON-encoded [`JobState`].
//!
//! Both keys are written by one script when a job begins; the lease goes last,
//! so a failed begin never leaves a lease without a job behind it.
//!
//! The lease is refreshed on every progress update, so `lease` only needs to
//! exceed the longest gap between two batches (retry sleeps included).

use std::time::Duration;

use redis::Commands;

use finsight_ai::ProcessingError;
use finsight_core::{JobId, UserId};

use super::store::{JobStateStore, JobStoreError};
use super::types::{JobProgress, JobState};

/// Default key prefix
const DEFAULT_PREFIX: &str = "finsight:categorization";

/// Default lease duration
const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

/// Takes a free lease and writes the started state.
///
/// KEYS: lease, state. ARGV: job id, state JSON, lease seconds.
/// Returns 1 when the job began, 0 when the lease is held.
const BEGIN_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
    return 0
end
redis.call("SET", KEYS[2], ARGV[2])
redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[3])
return 1
"#;

/// Deletes the lease only if it still belongs to the caller.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisJobStateStore {
    client: redis::Client,
    prefix: String,
    lease: Duration,
}

impl RedisJobStateStore {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379").
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(Self {
            client,
            prefix: DEFAULT_PREFIX.to_string(),
            lease: DEFAULT_LEASE,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn lease_key(&self, user_id: UserId) -> String {
        format!("{}:{}:lease", self.prefix, user_id)
    }

    fn state_key(&self, user_id: UserId) -> String {
        format!("{}:{}:state", self.prefix, user_id)
    }

    fn lease_secs(&self) -> u64 {
        self.lease.as_secs().max(1)
    }

    fn connection(&self) -> Result<redis::Connection, JobStoreError> {
        self.client
            .get_connection()
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    fn read_state(
        &self,
        conn: &mut redis::Connection,
        user_id: UserId,
    ) -> Result<JobState, JobStoreError> {
        let raw: Option<String> = conn
            .get(self.state_key(user_id))
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| JobStoreError::Serialization(e.to_string())),
            None => Ok(JobState::default()),
        }
    }

    fn write_state(
        &self,
        conn: &mut redis::Connection,
        user_id: UserId,
        state: &JobState,
    ) -> Result<(), JobStoreError> {
        let json =
            serde_json::to_string(state).map_err(|e| JobStoreError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(self.state_key(user_id), json)
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    fn lease_holder(
        &self,
        conn: &mut redis::Connection,
        user_id: UserId,
    ) -> Result<Option<JobId>, JobStoreError> {
        let raw: Option<String> = conn
            .get(self.lease_key(user_id))
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

impl JobStateStore for RedisJobStateStore {
    fn try_begin(&self, user_id: UserId, job_id: JobId) -> Result<bool, JobStoreError> {
        let state = serde_json::to_string(&JobState::started(job_id))
            .map_err(|e| JobStoreError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;

        let began: i64 = redis::Script::new(BEGIN_SCRIPT)
            .key(self.lease_key(user_id))
            .key(self.state_key(user_id))
            .arg(job_id.to_string())
            .arg(state)
            .arg(self.lease_secs())
            .invoke(&mut conn)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        Ok(began == 1)
    }

    fn get(&self, user_id: UserId) -> Result<JobState, JobStoreError> {
        let mut conn = self.connection()?;
        let mut state = self.read_state(&mut conn, user_id)?;

        // An expired lease means the owning process died mid-job.
        if state.processing && self.lease_holder(&mut conn, user_id)? != state.job_id {
            let last_error = state.last_error.take();
            state.finish(last_error);
        }
        Ok(state)
    }

    fn set_progress(
        &self,
        user_id: UserId,
        job_id: JobId,
        progress: JobProgress,
    ) -> Result<(), JobStoreError> {
        let mut conn = self.connection()?;
        if self.lease_holder(&mut conn, user_id)? != Some(job_id) {
            return Err(JobStoreError::StaleJob(job_id));
        }

        let mut state = self.read_state(&mut conn, user_id)?;
        if !state.is_owned_by(job_id) {
            return Err(JobStoreError::StaleJob(job_id));
        }
        state.progress = Some(progress);
        self.write_state(&mut conn, user_id, &state)?;

        redis::cmd("EXPIRE")
            .arg(self.lease_key(user_id))
            .arg(self.lease_secs())
            .query::<()>(&mut conn)
            .map_err(|e| JobStoreError::Storage(e.to_string()))
    }

    fn finish(
        &self,
        user_id: UserId,
        job_id: JobId,
        error: Option<ProcessingError>,
    ) -> Result<(), JobStoreError> {
        let mut conn = self.connection()?;
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(self.lease_key(user_id))
            .arg(job_id.to_string())
            .invoke(&mut conn)
            .map_err(|e| JobStoreError::Storage(e.to_string()))?;

        if released == 0 {
            return Err(JobStoreError::StaleJob(job_id));
        }

        let mut state = self.read_state(&mut conn, user_id)?;
        state.finish(error);
        self.write_state(&mut conn, user_id, &state)
    }
}

/// These need a running Redis (`FINSIGHT_REDIS_URL`, default localhost) and
/// skip themselves when none is reachable.
#[cfg(test)]
mod tests {
    use super::*;
    use finsight_ai::ErrorKind;

    fn store() -> Option<RedisJobStateStore> {
        let url = std::env::var("FINSIGHT_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let store = RedisJobStateStore::new(url)
            .ok()?
            .with_prefix(format!("finsight:test:{}", JobId::new()));
        match store.connection() {
            Ok(_) => Some(store),
            Err(e) => {
                eprintln!("skipping redis test (not available): {e}");
                None
            }
        }
    }

    fn ttl(store: &RedisJobStateStore, key: String) -> i64 {
        let mut conn = store.connection().unwrap();
        redis::cmd("TTL").arg(key).query(&mut conn).unwrap()
    }

    #[test]
    fn begin_writes_lease_and_state_together() {
        let Some(store) = store() else { return };
        let user = UserId::new();
        let job = JobId::new();

        assert!(store.try_begin(user, job).unwrap());

        let state = store.get(user).unwrap();
        assert!(state.is_owned_by(job));
        let mut conn = store.connection().unwrap();
        assert_eq!(store.lease_holder(&mut conn, user).unwrap(), Some(job));
        assert!(ttl(&store, store.lease_key(user)) > 0);
        // the state outlives the lease
        assert_eq!(ttl(&store, store.state_key(user)), -1);
    }

    #[test]
    fn held_lease_blocks_begin_and_keeps_state() {
        let Some(store) = store() else { return };
        let user = UserId::new();
        let first = JobId::new();

        assert!(store.try_begin(user, first).unwrap());
        assert!(!store.try_begin(user, JobId::new()).unwrap());
        assert!(store.get(user).unwrap().is_owned_by(first));

        store
            .finish(user, first, Some(ProcessingError::new(ErrorKind::AuthError)))
            .unwrap();
        let state = store.get(user).unwrap();
        assert!(!state.processing);
        assert_eq!(state.last_error.map(|e| e.code), Some(ErrorKind::AuthError));

        let second = JobId::new();
        assert!(store.try_begin(user, second).unwrap());
        let state = store.get(user).unwrap();
        assert!(state.is_owned_by(second));
        assert!(state.last_error.is_none());
    }

    #[test]
    fn state_without_lease_is_not_processing() {
        let Some(store) = store() else { return };
        let user = UserId::new();
        let job = JobId::new();

        let mut conn = store.connection().unwrap();
        store
            .write_state(&mut conn, user, &JobState::started(job))
            .unwrap();

        assert!(!store.get(user).unwrap().processing);
        assert!(store.try_begin(user, JobId::new()).unwrap());
        assert!(matches!(
            store.finish(user, job, None),
            Err(JobStoreError::StaleJob(id)) if id == job
        ));
    }
}
