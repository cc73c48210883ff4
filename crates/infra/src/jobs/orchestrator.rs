//! Categorization job orchestrator.
//!
//! `start` validates and registers a job synchronously, then hands the batch
//! loop to the injected [`TaskSpawner`]. `run` drives the batches in order,
//! persisting suggestions after every batch so that an abort never loses
//! work that already succeeded.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use finsight_ai::{
    Batch, BatchPlanner, ClassificationResult, Classifier, ErrorKind, FailureClassifier,
    ProcessingError, TextFailureClassifier,
};
use finsight_core::{
    Category, CategoryId, CategoryOwner, ClassificationSuggestion, JobId, NewCategoryPayload,
    SuggestedCategory, TransactionForClassification, TransactionId, UserId,
};

use super::spawn::TaskSpawner;
use super::store::{JobStateStore, JobStoreError};
use super::types::{CategorizationStatus, JobOutcome, JobProgress, RetryPolicy, StartedJob};
use crate::config::CategorizerConfig;
use crate::sources::{CategorySource, SourceError, SuggestionSink, TransactionSource};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("a categorization job is already running for this user")]
    AlreadyProcessing,
    #[error("no uncategorized transactions")]
    NothingToCategorize,
    #[error("failed to load transactions: {0}")]
    Source(#[from] SourceError),
    #[error("job state store error: {0}")]
    Store(#[from] JobStoreError),
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to load categorization counts: {0}")]
    Source(#[from] SourceError),
    #[error("job state store error: {0}")]
    Store(#[from] JobStoreError),
}

/// External systems the orchestrator reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub transactions: Arc<dyn TransactionSource>,
    pub categories: Arc<dyn CategorySource>,
    pub classifier: Arc<dyn Classifier>,
    pub suggestions: Arc<dyn SuggestionSink>,
}

#[derive(Clone)]
pub struct CategorizationOrchestrator {
    store: Arc<dyn JobStateStore>,
    collaborators: Collaborators,
    spawner: Arc<dyn TaskSpawner>,
    failures: Arc<dyn FailureClassifier>,
    planner: Arc<BatchPlanner>,
    retry: RetryPolicy,
    inter_batch_delay: Duration,
    batch_timeout: Duration,
}

impl CategorizationOrchestrator {
    pub fn new(
        config: &CategorizerConfig,
        store: Arc<dyn JobStateStore>,
        collaborators: Collaborators,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            store,
            collaborators,
            spawner,
            failures: Arc::new(TextFailureClassifier),
            planner: Arc::new(config.planner()),
            retry: config.retry.clone(),
            inter_batch_delay: config.inter_batch_delay,
            batch_timeout: config.batch_timeout,
        }
    }

    /// Replace the text heuristic, e.g. with one that understands a typed client error.
    pub fn with_failure_classifier(mut self, failures: Arc<dyn FailureClassifier>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_planner(mut self, planner: BatchPlanner) -> Self {
        self.planner = Arc::new(planner);
        self
    }

    /// Start a background categorization job for `user_id`.
    ///
    /// Returns once the job is registered; the batches run on the spawner.
    pub async fn start(&self, user_id: UserId) -> Result<StartedJob, StartError> {
        if self.store.is_processing(user_id)? {
            return Err(StartError::AlreadyProcessing);
        }

        let uncategorized: Vec<TransactionForClassification> = self
            .collaborators
            .transactions
            .list_transactions(user_id)
            .await?
            .iter()
            .filter(|t| t.is_uncategorized())
            .map(|t| t.for_classification())
            .collect();

        if uncategorized.is_empty() {
            return Err(StartError::NothingToCategorize);
        }

        let job_id = JobId::new();
        if !self.store.try_begin(user_id, job_id)? {
            return Err(StartError::AlreadyProcessing);
        }

        let uncategorized_count = uncategorized.len();
        info!(
            user_id = %user_id,
            job_id = %job_id,
            uncategorized_count,
            classifier = self.collaborators.classifier.name(),
            "categorization job started"
        );

        let this = self.clone();
        self.spawner.spawn(Box::pin(async move {
            this.run(user_id, job_id, uncategorized).await;
        }));

        Ok(StartedJob {
            job_id,
            uncategorized_count,
        })
    }

    /// Run a registered job to its terminal state.
    ///
    /// The store is always released at the end, whatever the outcome. A panic
    /// inside the job aborts it with [`ErrorKind::UnknownError`].
    #[instrument(skip_all, fields(user_id = %user_id, job_id = %job_id))]
    pub async fn run(
        &self,
        user_id: UserId,
        job_id: JobId,
        transactions: Vec<TransactionForClassification>,
    ) -> JobOutcome {
        let saved = AtomicUsize::new(0);
        let outcome = match AssertUnwindSafe(self.process(user_id, job_id, transactions, &saved))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "categorization job panicked");
                JobOutcome::Aborted(
                    ProcessingError::new(ErrorKind::UnknownError)
                        .with_suggestions_saved(saved.load(Ordering::SeqCst)),
                )
            }
        };

        let last_error = match &outcome {
            JobOutcome::Completed {
                suggestions_saved,
                batches,
            } => {
                info!(suggestions_saved, batches, "categorization job completed");
                None
            }
            JobOutcome::Aborted(error) => {
                warn!(
                    code = %error.code,
                    suggestions_saved = error.suggestions_saved.unwrap_or(0),
                    "categorization job aborted"
                );
                Some(error.clone())
            }
        };

        if let Err(e) = self.store.finish(user_id, job_id, last_error) {
            error!(error = %e, "failed to record job completion");
        }

        outcome
    }

    async fn process(
        &self,
        user_id: UserId,
        job_id: JobId,
        transactions: Vec<TransactionForClassification>,
        saved: &AtomicUsize,
    ) -> JobOutcome {
        let categories = match self
            .collaborators
            .categories
            .list_categories(CategoryOwner::User(user_id))
            .await
        {
            Ok(categories) => categories,
            Err(e) => {
                warn!(error = %e, "failed to load categories");
                return JobOutcome::Aborted(self.failures.classify(&e));
            }
        };

        let plan = self.planner.plan(transactions);
        if plan.dropped > 0 {
            warn!(
                dropped = plan.dropped,
                planned = plan.planned_transactions(),
                max_batches = self.planner.max_batches(),
                "transactions over the batch cap left for a later run"
            );
        }

        let mut progress = JobProgress {
            processed_count: 0,
            total_count: plan.planned_transactions(),
            current_batch: 0,
            total_batches: plan.batches.len(),
        };
        self.report_progress(user_id, job_id, progress);

        for batch in &plan.batches {
            progress.current_batch = batch.index() + 1;
            self.report_progress(user_id, job_id, progress);

            if batch.index() > 0 && !self.inter_batch_delay.is_zero() {
                sleep(self.inter_batch_delay).await;
            }

            let results = match self.classify_batch(user_id, &categories, batch).await {
                Ok(results) => results,
                Err(error) => {
                    return JobOutcome::Aborted(
                        error.with_suggestions_saved(saved.load(Ordering::SeqCst)),
                    );
                }
            };

            let suggestions = build_suggestions(user_id, batch, &categories, results);
            let count = suggestions.len();
            if count > 0 {
                match self
                    .collaborators
                    .suggestions
                    .create_suggestions(suggestions)
                    .await
                {
                    Ok(()) => {
                        saved.fetch_add(count, Ordering::SeqCst);
                    }
                    Err(e) => warn!(
                        batch = batch.index(),
                        count,
                        error = %e,
                        "failed to save suggestions"
                    ),
                }
            }

            progress.processed_count += batch.len();
            self.report_progress(user_id, job_id, progress);
            debug!(
                batch = batch.index(),
                suggestions = count,
                processed = progress.processed_count,
                total = progress.total_count,
                "batch done"
            );
        }

        JobOutcome::Completed {
            suggestions_saved: saved.load(Ordering::SeqCst),
            batches: plan.batches.len(),
        }
    }

    /// Submit one batch, retrying rate limits per the retry policy.
    async fn classify_batch(
        &self,
        user_id: UserId,
        categories: &[Category],
        batch: &Batch,
    ) -> Result<Vec<ClassificationResult>, ProcessingError> {
        let mut attempt = 0u32;
        loop {
            let call = self
                .collaborators
                .classifier
                .classify(user_id, batch.transactions(), categories);

            let failure = match timeout(self.batch_timeout, call).await {
                Ok(Ok(results)) => return Ok(results),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "classifier call deadline exceeded after {:?}",
                    self.batch_timeout
                ),
            };

            let error = self.failures.classify(&failure);
            if !error.is_rate_limited() || !self.retry.should_retry(attempt) {
                warn!(
                    batch = batch.index(),
                    attempt,
                    code = %error.code,
                    failure = %failure,
                    "batch failed"
                );
                return Err(error);
            }

            let delay = self.retry.next_delay(&failure, attempt);
            warn!(
                batch = batch.index(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "rate limited, retrying batch"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    fn report_progress(&self, user_id: UserId, job_id: JobId, progress: JobProgress) {
        if let Err(e) = self.store.set_progress(user_id, job_id, progress) {
            warn!(error = %e, "failed to update job progress");
        }
    }

    /// Current job state plus live counts for the user.
    pub async fn get_status(&self, user_id: UserId) -> Result<CategorizationStatus, StatusError> {
        let state = self.store.get(user_id)?;

        let uncategorized_count = self
            .collaborators
            .transactions
            .list_transactions(user_id)
            .await?
            .iter()
            .filter(|t| t.is_uncategorized())
            .count();
        let pending_suggestions_count = self.collaborators.suggestions.count_pending(user_id).await?;

        Ok(CategorizationStatus {
            uncategorized_count,
            is_processing: state.processing,
            pending_suggestions_count,
            job_id: state.job_id,
            has_error: state.last_error.is_some(),
            error: state.last_error,
            progress: state.progress,
        })
    }
}

/// Turn classifier output into pending suggestions, dropping results that
/// do not fit the batch or the user's categories.
fn build_suggestions(
    user_id: UserId,
    batch: &Batch,
    categories: &[Category],
    results: Vec<ClassificationResult>,
) -> Vec<ClassificationSuggestion> {
    let in_batch: HashSet<TransactionId> = batch.transactions().iter().map(|t| t.id).collect();
    let known: HashSet<CategoryId> = categories.iter().map(|c| c.id).collect();

    results
        .into_iter()
        .filter_map(|result| to_suggestion(user_id, &in_batch, &known, result))
        .collect()
}

fn to_suggestion(
    user_id: UserId,
    in_batch: &HashSet<TransactionId>,
    known: &HashSet<CategoryId>,
    result: ClassificationResult,
) -> Option<ClassificationSuggestion> {
    let transaction_id = result.transaction_id;
    if !in_batch.contains(&transaction_id) {
        debug!(transaction_id = %transaction_id, "skipping result for a transaction outside the batch");
        return None;
    }

    let category = match (result.suggested_category_id, result.suggested_new_category) {
        (Some(category_id), _) if known.contains(&category_id) => {
            SuggestedCategory::Existing { category_id }
        }
        (_, Some(new)) => match NewCategoryPayload::new(new.name, new.icon, new.color) {
            Ok(payload) => SuggestedCategory::New(payload),
            Err(e) => {
                warn!(transaction_id = %transaction_id, error = %e, "skipping invalid new category");
                return None;
            }
        },
        (Some(category_id), None) => {
            warn!(
                transaction_id = %transaction_id,
                category_id = %category_id,
                "skipping result with unknown category"
            );
            return None;
        }
        (None, None) => {
            warn!(transaction_id = %transaction_id, "skipping result without a category");
            return None;
        }
    };

    let affected = result
        .affected_transaction_ids
        .into_iter()
        .filter(|id| in_batch.contains(id));

    Some(
        ClassificationSuggestion::pending(
            user_id,
            transaction_id,
            category,
            result.match_type,
            result.match_keyword,
            affected,
        )
        .with_confidence(result.confidence)
        .with_reasoning(result.reasoning),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use finsight_ai::SuggestedNewCategory;
    use finsight_core::{CategoryType, MatchType, TransactionType};

    fn projection(description: &str) -> TransactionForClassification {
        TransactionForClassification {
            id: TransactionId::new(),
            description: description.to_string(),
            amount: -1_990,
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            kind: TransactionType::Expense,
        }
    }

    fn category(user_id: UserId, name: &str) -> Category {
        Category {
            id: CategoryId::new(),
            owner: CategoryOwner::User(user_id),
            name: name.to_string(),
            kind: CategoryType::Expense,
            icon: "tag".to_string(),
            color: "#888888".to_string(),
        }
    }

    fn result(transaction_id: TransactionId) -> ClassificationResult {
        ClassificationResult {
            transaction_id,
            suggested_category_id: None,
            suggested_new_category: None,
            match_type: MatchType::Contains,
            match_keyword: "NETFLIX".to_string(),
            affected_transaction_ids: Vec::new(),
            confidence: 0.9,
            reasoning: "streaming subscription".to_string(),
        }
    }

    fn single_batch(transactions: Vec<TransactionForClassification>) -> Batch {
        let mut plan = BatchPlanner::new(100, 1).plan(transactions);
        plan.batches.remove(0)
    }

    #[test]
    fn existing_category_becomes_pending_suggestion() {
        let user = UserId::new();
        let streaming = category(user, "Streaming");
        let a = projection("NETFLIX.COM");
        let b = projection("NETFLIX.COM 2");
        let (a_id, b_id) = (a.id, b.id);
        let batch = single_batch(vec![a, b]);

        let mut res = result(a_id);
        res.suggested_category_id = Some(streaming.id);
        res.affected_transaction_ids = vec![b_id, TransactionId::new()];

        let suggestions = build_suggestions(user, &batch, &[streaming.clone()], vec![res]);
        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert!(s.is_pending());
        assert_eq!(
            s.category,
            SuggestedCategory::Existing {
                category_id: streaming.id
            }
        );
        assert_eq!(s.affected_transaction_ids, vec![a_id, b_id]);
        assert_eq!(s.reasoning, "streaming subscription");
    }

    #[test]
    fn unknown_category_falls_back_to_new_category() {
        let user = UserId::new();
        let tx = projection("SPOTIFY P1234");
        let tx_id = tx.id;
        let batch = single_batch(vec![tx]);

        let mut with_fallback = result(tx_id);
        with_fallback.suggested_category_id = Some(CategoryId::new());
        with_fallback.suggested_new_category = Some(SuggestedNewCategory {
            name: "Music".to_string(),
            icon: "music".to_string(),
            color: "#1db954".to_string(),
        });

        let suggestions = build_suggestions(user, &batch, &[], vec![with_fallback]);
        assert!(matches!(
            &suggestions[0].category,
            SuggestedCategory::New(p) if p.name == "Music"
        ));
    }

    #[test]
    fn invalid_results_are_skipped() {
        let user = UserId::new();
        let tx = projection("UBER TRIP");
        let tx_id = tx.id;
        let batch = single_batch(vec![tx]);

        let outside = {
            let mut r = result(TransactionId::new());
            r.suggested_new_category = Some(SuggestedNewCategory {
                name: "Transport".to_string(),
                icon: String::new(),
                color: String::new(),
            });
            r
        };
        let unknown = {
            let mut r = result(tx_id);
            r.suggested_category_id = Some(CategoryId::new());
            r
        };
        let empty = result(tx_id);
        let blank_name = {
            let mut r = result(tx_id);
            r.suggested_new_category = Some(SuggestedNewCategory {
                name: "  ".to_string(),
                icon: String::new(),
                color: String::new(),
            });
            r
        };

        let suggestions =
            build_suggestions(user, &batch, &[], vec![outside, unknown, empty, blank_name]);
        assert!(suggestions.is_empty());
    }
}
