//! One-shot categorization runner: loads a ledger fixture, runs a job against
//! a classifier and reports the final status.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use finsight_ai::Classifier;
use finsight_core::{Category, ClassificationSuggestion, JobId, Transaction, UserId};
use finsight_infra::{
    CategorizationOrchestrator, CategorizationStatus, CategorizerConfig, Collaborators,
    InMemoryJobStateStore, InMemoryLedger, InMemorySuggestionSink, JobStateStore, TokioSpawner,
};

/// Environment variable pointing at the fixture file.
pub const FIXTURE_ENV: &str = "FINSIGHT_FIXTURE";

/// A user's ledger as read from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub user_id: UserId,
    #[serde(default)]
    pub categories: Vec<Category>,
    pub transactions: Vec<Transaction>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self> {
        let fixture: Self = serde_json::from_str(json).context("invalid fixture")?;
        let foreign = fixture
            .transactions
            .iter()
            .filter(|t| t.user_id != fixture.user_id)
            .count();
        if foreign > 0 {
            warn!(
                user_id = %fixture.user_id,
                foreign,
                "fixture contains transactions of other users; they will be ignored"
            );
        }
        Ok(fixture)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn ledger(&self) -> Arc<InMemoryLedger> {
        let ledger = InMemoryLedger::arc();
        ledger.insert_categories(self.categories.iter().cloned());
        ledger.insert_transactions(self.transactions.iter().cloned());
        ledger
    }
}

/// What the runner prints once the job is over.
#[derive(Debug, Serialize)]
pub struct Report {
    pub job_id: JobId,
    pub status: CategorizationStatus,
    pub suggestions: Vec<ClassificationSuggestion>,
}

/// Job state store for this process: Redis when configured, in-memory otherwise.
pub fn job_store() -> Result<Arc<dyn JobStateStore>> {
    #[cfg(feature = "redis")]
    if let Ok(url) = std::env::var("FINSIGHT_REDIS_URL") {
        info!("using redis job state store");
        let store = finsight_infra::jobs::RedisJobStateStore::new(url)
            .context("failed to configure redis job state store")?;
        return Ok(Arc::new(store));
    }

    Ok(InMemoryJobStateStore::arc())
}

/// Run one job for the fixture's user and wait for it to finish.
pub async fn run_fixture(
    config: &CategorizerConfig,
    fixture: &Fixture,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn JobStateStore>,
    poll_interval: Duration,
) -> Result<Report> {
    let ledger = fixture.ledger();
    let suggestions = InMemorySuggestionSink::arc();

    let orchestrator = CategorizationOrchestrator::new(
        config,
        store,
        Collaborators {
            transactions: ledger.clone(),
            categories: ledger,
            classifier,
            suggestions: suggestions.clone(),
        },
        Arc::new(TokioSpawner::current()),
    );

    let started = orchestrator
        .start(fixture.user_id)
        .await
        .context("failed to start categorization")?;
    info!(
        job_id = %started.job_id,
        uncategorized_count = started.uncategorized_count,
        "waiting for job"
    );

    let status = wait_until_idle(&orchestrator, fixture.user_id, poll_interval).await?;

    Ok(Report {
        job_id: started.job_id,
        status,
        suggestions: suggestions.for_user(fixture.user_id),
    })
}

/// Poll the status surface until the user's job is no longer running.
pub async fn wait_until_idle(
    orchestrator: &CategorizationOrchestrator,
    user_id: UserId,
    poll_interval: Duration,
) -> Result<CategorizationStatus> {
    loop {
        let status = orchestrator.get_status(user_id).await?;
        if !status.is_processing {
            return Ok(status);
        }
        if let Some(progress) = status.progress {
            info!(
                batch = progress.current_batch,
                total_batches = progress.total_batches,
                processed = progress.processed_count,
                total = progress.total_count,
                "job running"
            );
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use finsight_ai::{ClassificationResult, ClassifierError, ErrorKind};
    use finsight_core::{MatchType, TransactionForClassification};

    const USER: &str = "0190f5a4-0000-7000-8000-000000000001";

    fn fixture_json() -> String {
        format!(
            r##"{{
                "user_id": "{USER}",
                "categories": [{{
                    "id": "0190f5a4-0000-7000-8000-0000000000c1",
                    "owner": {{ "owner_type": "user", "owner_id": "{USER}" }},
                    "name": "Streaming",
                    "type": "expense",
                    "icon": "tv",
                    "color": "#e50914"
                }}],
                "transactions": [
                    {{
                        "id": "0190f5a4-0000-7000-8000-0000000000a1",
                        "user_id": "{USER}",
                        "description": "NETFLIX.COM",
                        "amount": -3990,
                        "date": "2024-05-03",
                        "type": "expense",
                        "category_id": null
                    }},
                    {{
                        "id": "0190f5a4-0000-7000-8000-0000000000a2",
                        "user_id": "{USER}",
                        "description": "SALARY",
                        "amount": 500000,
                        "date": "2024-05-05",
                        "type": "income",
                        "category_id": "0190f5a4-0000-7000-8000-0000000000c9"
                    }}
                ]
            }}"##
        )
    }

    /// Puts every transaction into the first existing category.
    struct FirstCategory;

    #[async_trait]
    impl Classifier for FirstCategory {
        async fn classify(
            &self,
            _user_id: UserId,
            transactions: &[TransactionForClassification],
            existing_categories: &[Category],
        ) -> Result<Vec<ClassificationResult>, ClassifierError> {
            let category = existing_categories
                .first()
                .ok_or_else(|| ClassifierError::Other("no categories".to_string()))?;
            Ok(transactions
                .iter()
                .map(|t| ClassificationResult {
                    transaction_id: t.id,
                    suggested_category_id: Some(category.id),
                    suggested_new_category: None,
                    match_type: MatchType::Exact,
                    match_keyword: t.description.clone(),
                    affected_transaction_ids: Vec::new(),
                    confidence: 1.0,
                    reasoning: String::new(),
                })
                .collect())
        }

        fn name(&self) -> &str {
            "first-category"
        }
    }

    struct Unauthorized;

    #[async_trait]
    impl Classifier for Unauthorized {
        async fn classify(
            &self,
            _user_id: UserId,
            _transactions: &[TransactionForClassification],
            _existing_categories: &[Category],
        ) -> Result<Vec<ClassificationResult>, ClassifierError> {
            Err(ClassifierError::Status {
                status: 401,
                body: "API key not valid".to_string(),
            })
        }

        fn name(&self) -> &str {
            "unauthorized"
        }
    }

    #[test]
    fn parses_fixture() {
        let fixture = Fixture::from_json(&fixture_json()).unwrap();
        assert_eq!(fixture.user_id.to_string(), USER);
        assert_eq!(fixture.categories.len(), 1);
        assert_eq!(fixture.transactions.len(), 2);
        assert!(fixture.transactions[0].is_uncategorized());
        assert!(!fixture.transactions[1].is_uncategorized());
    }

    #[test]
    fn rejects_malformed_fixture() {
        assert!(Fixture::from_json(r#"{"user_id": "nope"}"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_fixture_to_completion() {
        let fixture = Fixture::from_json(&fixture_json()).unwrap();

        let report = run_fixture(
            &CategorizerConfig::default(),
            &fixture,
            Arc::new(FirstCategory),
            InMemoryJobStateStore::arc(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert!(!report.status.is_processing);
        assert!(!report.status.has_error);
        assert_eq!(report.status.uncategorized_count, 1);
        assert_eq!(report.status.pending_suggestions_count, 1);
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].match_keyword, "NETFLIX.COM");

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["is_processing"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_classifier_failure() {
        let fixture = Fixture::from_json(&fixture_json()).unwrap();

        let report = run_fixture(
            &CategorizerConfig::default(),
            &fixture,
            Arc::new(Unauthorized),
            InMemoryJobStateStore::arc(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert!(report.status.has_error);
        assert_eq!(
            report.status.error.map(|e| e.code),
            Some(ErrorKind::AuthError)
        );
        assert!(report.suggestions.is_empty());
    }
}
