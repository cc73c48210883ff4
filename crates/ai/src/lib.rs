//! `finsight-ai`
//!
//! **Responsibility:** boundary to the remote text-classification service.
//!
//! - Defines the `Classifier` contract and its wire types.
//! - Plans batches (merchant-key grouping, size and count caps).
//! - Classifies classifier failures into a closed, user-facing taxonomy.
//!
//! This crate stays storage- and runtime-agnostic; orchestration lives in
//! `finsight-infra`.

pub mod batch;
pub mod classifier;
pub mod failure;
pub mod merchant;

pub use batch::{Batch, BatchPlan, BatchPlanner, DEFAULT_BATCH_SIZE, DEFAULT_MAX_BATCHES};
pub use classifier::{ClassificationResult, Classifier, ClassifierError, SuggestedNewCategory};
pub use failure::{ErrorKind, FailureClassifier, ProcessingError, TextFailureClassifier};
pub use merchant::{MerchantKeyExtractor, MerchantRule, extract_key};
