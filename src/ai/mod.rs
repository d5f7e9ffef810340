mod client;
pub mod inference;

use async_trait::async_trait;
use thiserror::Error;

pub use client::PerspectiveClient;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("no api key configured")]
    MissingApiKey,
    #[error("classification service returned an error: {0}")]
    Remote(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Scores a text fragment in `[0, 1]`.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn score(&self, text: &str) -> Result<f64, ClassifierError>;
}
