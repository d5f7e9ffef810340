use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::ClassifierError;

pub const PERSPECTIVE_API_URL: &str =
    "https://commentanalyzer.googleapis.com/v1alpha1/comments:analyze";

/// Attributes requested for every fragment. The usable score is their maximum.
pub const REQUESTED_ATTRIBUTES: [&str; 3] = ["TOXICITY", "SEVERE_TOXICITY", "INSULT"];

pub fn build_request(text: &str, languages: &[String]) -> AnalyzeRequest {
    AnalyzeRequest {
        comment: Comment {
            text: text.to_string(),
        },
        languages: languages.to_vec(),
        requested_attributes: REQUESTED_ATTRIBUTES
            .iter()
            .map(|name| (name.to_string(), AttributeRequest {}))
            .collect(),
    }
}

pub fn parse_response(body: &str) -> Result<AnalyzeResponse, ClassifierError> {
    Ok(serde_json::from_str(body)?)
}

/// Folds a response into one score in `[0, 1]`. Missing attributes count as 0;
/// an error payload is reported as [`ClassifierError::Remote`].
pub fn aggregate_score(response: &AnalyzeResponse) -> Result<f64, ClassifierError> {
    if let Some(error) = &response.error {
        return Err(ClassifierError::Remote(error.to_string()));
    }

    let Some(scores) = &response.attribute_scores else {
        return Ok(0.0);
    };
    let max = REQUESTED_ATTRIBUTES
        .iter()
        .map(|name| {
            scores
                .get(*name)
                .and_then(|score| score.summary_score.as_ref())
                .and_then(|summary| summary.value)
                .filter(|value| value.is_finite())
                .unwrap_or(0.0)
        })
        .fold(0.0_f64, f64::max);
    Ok(max.clamp(0.0, 1.0))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub comment: Comment,
    pub languages: Vec<String>,
    pub requested_attributes: BTreeMap<String, AttributeRequest>,
}

#[derive(Debug, Serialize)]
pub struct Comment {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct AttributeRequest {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub attribute_scores: Option<HashMap<String, AttributeScore>>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeScore {
    #[serde(default)]
    pub summary_score: Option<SummaryScore>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryScore {
    #[serde(default)]
    pub value: Option<f64>,
}
