//! External service clients/adapters.

pub mod http_classifier;

pub use http_classifier::HttpClassifier;
