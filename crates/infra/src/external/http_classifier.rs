//! HTTP client for the remote classification service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use finsight_ai::{ClassificationResult, Classifier, ClassifierError};
use finsight_core::{Category, TransactionForClassification, UserId};

use crate::config::ClassifierEndpoint;

const CLASSIFY_PATH: &str = "/v1/classify";

/// Calls `POST {base_url}/v1/classify`.
///
/// Request deadlines are enforced by the orchestrator's batch timeout, so the
/// client only bounds connection setup.
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest<'a> {
    user_id: UserId,
    transactions: &'a [TransactionForClassification],
    categories: &'a [Category],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Wrapped { results: Vec<ClassificationResult> },
    Bare(Vec<ClassificationResult>),
}

impl ClassifyResponse {
    fn into_results(self) -> Vec<ClassificationResult> {
        match self {
            Self::Wrapped { results } | Self::Bare(results) => results,
        }
    }
}

impl HttpClassifier {
    pub fn new(endpoint: ClassifierEndpoint) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}{}", endpoint.base_url.trim_end_matches('/'), CLASSIFY_PATH),
            api_key: endpoint.api_key,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        user_id: UserId,
        transactions: &[TransactionForClassification],
        existing_categories: &[Category],
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let request = ClassifyRequest {
            user_id,
            transactions,
            categories: existing_categories,
        };

        let mut req = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<ClassifyResponse>(&body)
            .map(ClassifyResponse::into_results)
            .map_err(|e| ClassifierError::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(e: reqwest::Error) -> ClassifierError {
    if e.is_timeout() {
        ClassifierError::Timeout(e.to_string())
    } else {
        ClassifierError::Transport(e.to_string())
    }
}
