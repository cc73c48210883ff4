//! Categorization suggestions awaiting human review.
//!
//! Suggestions are created by the categorization pipeline and then owned by
//! the suggestion store; approving or rejecting them happens elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CategoryId, TransactionId, UserId};

/// How a suggestion's keyword matches transaction descriptions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchType {
    Exact,
    StartsWith,
    Contains,
}

/// Payload for a category that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategoryPayload {
    pub name: String,
    pub icon: String,
    pub color: String,
}

impl NewCategoryPayload {
    pub fn new(
        name: impl Into<String>,
        icon: impl Into<String>,
        color: impl Into<String>,
    ) -> DomainResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DomainError::validation("new category name must not be empty"));
        }
        Ok(Self {
            name,
            icon: icon.into(),
            color: color.into(),
        })
    }
}

/// Target category of a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestedCategory {
    Existing { category_id: CategoryId },
    New(NewCategoryPayload),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
}

/// A proposed category assignment for one or more transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationSuggestion {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub category: SuggestedCategory,
    pub match_type: MatchType,
    pub match_keyword: String,
    /// Always contains `transaction_id`.
    pub affected_transaction_ids: Vec<TransactionId>,
    pub confidence: f64,
    pub reasoning: String,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

impl ClassificationSuggestion {
    /// Build a pending suggestion.
    ///
    /// `affected` is deduplicated (first occurrence wins) and the source
    /// transaction is prepended when missing.
    pub fn pending(
        user_id: UserId,
        transaction_id: TransactionId,
        category: SuggestedCategory,
        match_type: MatchType,
        match_keyword: impl Into<String>,
        affected: impl IntoIterator<Item = TransactionId>,
    ) -> Self {
        let mut affected_transaction_ids = vec![transaction_id];
        for id in affected {
            if !affected_transaction_ids.contains(&id) {
                affected_transaction_ids.push(id);
            }
        }

        Self {
            user_id,
            transaction_id,
            category,
            match_type,
            match_keyword: match_keyword.into(),
            affected_transaction_ids,
            confidence: 0.0,
            reasoning: String::new(),
            status: SuggestionStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == SuggestionStatus::Pending
    }
}
