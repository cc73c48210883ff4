//! Transaction records and the read-only projection sent to the classifier.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::id::{CategoryId, TransactionId, UserId};

/// Direction of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
}

/// A persisted transaction as exposed by the transaction source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub description: String,
    /// Amount in the smallest currency unit (negative for outflows is allowed).
    pub amount: i64,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category_id: Option<CategoryId>,
}

impl Transaction {
    pub fn is_uncategorized(&self) -> bool {
        self.category_id.is_none()
    }

    /// Project into the shape submitted to the remote classifier.
    pub fn for_classification(&self) -> TransactionForClassification {
        TransactionForClassification {
            id: self.id,
            description: self.description.clone(),
            amount: self.amount,
            date: self.date,
            kind: self.kind,
        }
    }
}

/// Read-only projection of a transaction, built once per job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionForClassification {
    pub id: TransactionId,
    pub description: String,
    pub amount: i64,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: TransactionType,
}
