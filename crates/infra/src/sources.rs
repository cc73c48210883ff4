//! Persistence collaborators consumed by the categorization pipeline.
//!
//! Real deployments back these with the application database; the in-memory
//! adapters serve tests, local runs and the fixture runner.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use finsight_core::{
    Category, CategoryId, CategoryOwner, ClassificationSuggestion, Transaction, TransactionId,
    UserId,
};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait TransactionSource: Send + Sync + 'static {
    /// All transactions of the user, categorized or not.
    async fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, SourceError>;
}

#[async_trait]
pub trait CategorySource: Send + Sync + 'static {
    async fn list_categories(&self, owner: CategoryOwner) -> Result<Vec<Category>, SourceError>;
}

/// Receives suggestions as soon as a batch has been classified.
#[async_trait]
pub trait SuggestionSink: Send + Sync + 'static {
    async fn create_suggestions(
        &self,
        suggestions: Vec<ClassificationSuggestion>,
    ) -> Result<(), SourceError>;

    async fn count_pending(&self, user_id: UserId) -> Result<usize, SourceError>;
}

fn poisoned() -> SourceError {
    SourceError::Storage("in-memory lock poisoned".to_string())
}

/// In-memory transactions and categories for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    transactions: RwLock<Vec<Transaction>>,
    categories: RwLock<Vec<Category>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn insert_transactions(&self, transactions: impl IntoIterator<Item = Transaction>) {
        if let Ok(mut all) = self.transactions.write() {
            all.extend(transactions);
        }
    }

    pub fn insert_categories(&self, categories: impl IntoIterator<Item = Category>) {
        if let Ok(mut all) = self.categories.write() {
            all.extend(categories);
        }
    }

    /// Assign a category, as an approved suggestion would. Returns false if unknown.
    pub fn assign_category(&self, transaction_id: TransactionId, category_id: CategoryId) -> bool {
        let Ok(mut all) = self.transactions.write() else {
            return false;
        };
        match all.iter_mut().find(|t| t.id == transaction_id) {
            Some(tx) => {
                tx.category_id = Some(category_id);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TransactionSource for InMemoryLedger {
    async fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, SourceError> {
        let all = self.transactions.read().map_err(|_| poisoned())?;
        Ok(all.iter().filter(|t| t.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl CategorySource for InMemoryLedger {
    async fn list_categories(&self, owner: CategoryOwner) -> Result<Vec<Category>, SourceError> {
        let all = self.categories.read().map_err(|_| poisoned())?;
        Ok(all.iter().filter(|c| c.owner == owner).cloned().collect())
    }
}

/// In-memory suggestion store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySuggestionSink {
    inner: Mutex<Vec<ClassificationSuggestion>>,
}

impl InMemorySuggestionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn all(&self) -> Vec<ClassificationSuggestion> {
        self.inner.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn for_user(&self, user_id: UserId) -> Vec<ClassificationSuggestion> {
        self.all()
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect()
    }
}

#[async_trait]
impl SuggestionSink for InMemorySuggestionSink {
    async fn create_suggestions(
        &self,
        suggestions: Vec<ClassificationSuggestion>,
    ) -> Result<(), SourceError> {
        self.inner.lock().map_err(|_| poisoned())?.extend(suggestions);
        Ok(())
    }

    async fn count_pending(&self, user_id: UserId) -> Result<usize, SourceError> {
        let all = self.inner.lock().map_err(|_| poisoned())?;
        Ok(all
            .iter()
            .filter(|s| s.user_id == user_id && s.is_pending())
            .count())
    }
}
