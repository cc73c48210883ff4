//! Batch planning for classifier submissions.
//!
//! Transactions are ordered by merchant key so repeated charges from the same
//! merchant tend to land in the same batch, then sliced into bounded batches.

use finsight_core::TransactionForClassification;

use crate::merchant::MerchantKeyExtractor;

pub const DEFAULT_BATCH_SIZE: usize = 40;
pub const DEFAULT_MAX_BATCHES: usize = 50;

/// An ordered, bounded slice of transactions submitted in one classifier call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    index: usize,
    transactions: Vec<TransactionForClassification>,
}

impl Batch {
    /// Zero-based position in the plan.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn transactions(&self) -> &[TransactionForClassification] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Output of [`BatchPlanner::plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<Batch>,
    /// Transactions left out of this run because of the batch-count cap.
    pub dropped: usize,
}

impl BatchPlan {
    pub fn planned_transactions(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct BatchPlanner {
    batch_size: usize,
    max_batches: usize,
    keys: MerchantKeyExtractor,
}

impl Default for BatchPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCHES)
    }
}

impl BatchPlanner {
    /// `batch_size` is clamped to at least 1.
    pub fn new(batch_size: usize, max_batches: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_batches,
            keys: MerchantKeyExtractor::default(),
        }
    }

    pub fn with_key_extractor(mut self, keys: MerchantKeyExtractor) -> Self {
        self.keys = keys;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_batches(&self) -> usize {
        self.max_batches
    }

    /// Deterministic: stable sort by merchant key, slice, cap.
    pub fn plan(&self, transactions: Vec<TransactionForClassification>) -> BatchPlan {
        let mut keyed: Vec<(String, TransactionForClassification)> = transactions
            .into_iter()
            .map(|tx| (self.keys.extract_key(&tx.description), tx))
            .collect();

        // `sort_by` is stable: equal keys keep their input order.
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        let capacity = self.batch_size.saturating_mul(self.max_batches);
        let dropped = keyed.len().saturating_sub(capacity);
        keyed.truncate(capacity);

        let mut batches = Vec::with_capacity(keyed.len().div_ceil(self.batch_size));
        let mut iter = keyed.into_iter().map(|(_, tx)| tx).peekable();
        while iter.peek().is_some() {
            let transactions: Vec<_> = iter.by_ref().take(self.batch_size).collect();
            batches.push(Batch {
                index: batches.len(),
                transactions,
            });
        }

        BatchPlan { batches, dropped }
    }
}
