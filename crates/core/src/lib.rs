//! `finsight-core`: domain records shared by the categorization pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod category;
pub mod error;
pub mod id;
pub mod suggestion;
pub mod transaction;

pub use category::{Category, CategoryOwner, CategoryType};
pub use error::{DomainError, DomainResult};
pub use id::{CategoryId, GroupId, JobId, TransactionId, UserId};
pub use suggestion::{
    ClassificationSuggestion, MatchType, NewCategoryPayload, SuggestedCategory, SuggestionStatus,
};
pub use transaction::{Transaction, TransactionForClassification, TransactionType};
