use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;

use crate::config::PerspectiveConfig;

use super::{
    inference::{aggregate_score, build_request, parse_response},
    Classifier, ClassifierError,
};

/// Perspective API scoring client. Every failure folds into a score of 0 so
/// an unreachable service never conceals anything.
pub struct PerspectiveClient {
    http: Client,
    config: PerspectiveConfig,
    api_key: RwLock<Option<String>>,
}

impl PerspectiveClient {
    pub fn new(http: Client, config: PerspectiveConfig) -> Self {
        let api_key = RwLock::new(config.api_key.clone());
        Self {
            http,
            config,
            api_key,
        }
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        tracing::info!(
            target: "classifier",
            configured = api_key.is_some(),
            "perspective api key updated"
        );
        *self.api_key.write() = api_key;
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.read().is_some()
    }

    pub async fn analyze(&self, text: &str) -> Result<f64, ClassifierError> {
        let api_key = self
            .api_key
            .read()
            .clone()
            .ok_or(ClassifierError::MissingApiKey)?;

        let request = build_request(text, &self.config.languages);
        let response = self
            .http
            .post(&self.config.api_url)
            .query(&[("key", api_key.as_str())])
            .timeout(self.config.timeout)
            .json(&request)
            .send()
            .await?;

        // Error payloads arrive with non-2xx statuses; the body is what matters.
        let status = response.status();
        let body = response.text().await?;
        let parsed = parse_response(&body).map_err(|err| {
            tracing::debug!(target: "classifier", %status, "undecodable response body");
            err
        })?;
        aggregate_score(&parsed)
    }
}

#[async_trait]
impl Classifier for PerspectiveClient {
    async fn score(&self, text: &str) -> Result<f64, ClassifierError> {
        match self.analyze(text).await {
            Ok(score) => Ok(score),
            Err(ClassifierError::MissingApiKey) => {
                tracing::warn!(target: "classifier", "no perspective api key set; treating text as safe");
                Ok(0.0)
            }
            Err(err) => {
                tracing::error!(target: "classifier", error = %err, "perspective analysis failed");
                Ok(0.0)
            }
        }
    }
}
