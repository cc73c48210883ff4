use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use finsight_core::{
    Category, CategoryId, MatchType, TransactionForClassification, TransactionId, UserId,
};

/// Remote text-classification service.
///
/// Implementations only promise a textual failure description; callers must
/// not depend on the concrete error variant to decide retry behavior.
#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    async fn classify(
        &self,
        user_id: UserId,
        transactions: &[TransactionForClassification],
        existing_categories: &[Category],
    ) -> Result<Vec<ClassificationResult>, ClassifierError>;

    fn name(&self) -> &str;
}

/// Category proposed by the classifier when no existing one fits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedNewCategory {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
}

/// One classifier output item.
///
/// This is a model output, not a domain record: it still has to be validated
/// against the batch and the user's categories before becoming a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub transaction_id: TransactionId,
    #[serde(default)]
    pub suggested_category_id: Option<CategoryId>,
    #[serde(default)]
    pub suggested_new_category: Option<SuggestedNewCategory>,
    pub match_type: MatchType,
    #[serde(default)]
    pub match_keyword: String,
    #[serde(default)]
    pub affected_transaction_ids: Vec<TransactionId>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// Failure reported by a classifier implementation.
///
/// The rendered text is the only channel the failure classifier and retry
/// policy read, so variants keep the remote wording intact.
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(String),

    #[error("classifier request timeout: {0}")]
    Timeout(String),

    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode classifier response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_result_with_optional_fields_missing() {
        let tx = TransactionId::new();
        let json = format!(
            r#"{{
                "transactionId": "{tx}",
                "suggestedNewCategory": {{ "name": "Streaming" }},
                "matchType": "startsWith",
                "matchKeyword": "NETFLIX"
            }}"#
        );

        let result: ClassificationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result.transaction_id, tx);
        assert_eq!(result.suggested_category_id, None);
        assert_eq!(result.match_type, MatchType::StartsWith);
        assert_eq!(
            result.suggested_new_category.map(|c| c.name),
            Some("Streaming".to_string())
        );
        assert!(result.affected_transaction_ids.is_empty());
    }

    #[test]
    fn status_error_text_carries_the_code() {
        let err = ClassifierError::Status {
            status: 429,
            body: "Too Many Requests".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "classifier returned status 429: Too Many Requests"
        );
    }
}
