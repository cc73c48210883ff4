use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use finsight_infra::{CategorizerConfig, ClassifierEndpoint, HttpClassifier};
use finsight_runner::{FIXTURE_ENV, Fixture, job_store, run_fixture};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    finsight_observability::init();

    let fixture_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(FIXTURE_ENV).ok())
        .with_context(|| format!("usage: finsight-runner <fixture.json> (or set {FIXTURE_ENV})"))?;

    let config = CategorizerConfig::from_env()?;
    let endpoint = ClassifierEndpoint::from_env()?;
    let fixture = Fixture::load(&fixture_path)?;

    tracing::info!(
        user_id = %fixture.user_id,
        transactions = fixture.transactions.len(),
        categories = fixture.categories.len(),
        classifier = %endpoint.base_url,
        "running categorization"
    );

    let classifier = Arc::new(HttpClassifier::new(endpoint)?);
    let report = run_fixture(
        &config,
        &fixture,
        classifier,
        job_store()?,
        Duration::from_millis(500),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(error) = &report.status.error {
        anyhow::bail!("categorization aborted: {error}");
    }
    Ok(())
}
