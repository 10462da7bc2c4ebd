//! Remote emotion analysis.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::error::{ANALYSIS_FALLBACK_MESSAGE, AnalysisError};

/// One detected emotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    /// Emotion label (`HAPPY`, `CALM`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Display emoji.
    pub emoji: String,
    /// Confidence in percent, 0 to 100.
    pub confidence: f64,
}

/// Estimated age bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgeRange {
    /// Lower bound.
    pub low: Option<u32>,
    /// Upper bound.
    pub high: Option<u32>,
}

/// Attributes of the analysed face.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceInfo {
    /// Estimated age bounds.
    #[serde(default)]
    pub age_range: AgeRange,
    /// Detected gender label.
    #[serde(default)]
    pub gender: Option<String>,
    /// Confidence of `gender`, in percent.
    #[serde(default)]
    pub gender_confidence: f64,
    /// Whether the face smiles.
    #[serde(default)]
    pub smile: bool,
    /// Whether the face wears glasses.
    #[serde(default)]
    pub eyeglasses: bool,
}

/// Response of `POST /api/ml/emotion`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Highest-confidence emotion, if the service named one.
    #[serde(default)]
    pub dominant_emotion: Option<EmotionScore>,
    /// Every detected emotion.
    #[serde(default)]
    pub emotions: Vec<EmotionScore>,
    /// Attributes of the first face.
    #[serde(default)]
    pub face_info: FaceInfo,
    /// Number of faces in the frame.
    #[serde(default)]
    pub faces_detected: u32,
}

impl AnalysisResult {
    /// Emotions by descending confidence.
    #[must_use]
    pub fn ranked_emotions(&self) -> Vec<&EmotionScore> {
        let mut ranked: Vec<&EmotionScore> = self.emotions.iter().collect();
        ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        ranked
    }

    /// The dominant emotion, or the top ranked one when the service left it out.
    #[must_use]
    pub fn dominant(&self) -> Option<&EmotionScore> {
        self.dominant_emotion
            .as_ref()
            .or_else(|| self.ranked_emotions().into_iter().next())
    }
}

#[derive(Serialize)]
struct ImagePayload<'a> {
    image_base64: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Boxed future returned by [`EmotionAnalyzer::analyze`].
pub type AnalysisFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AnalysisResult, AnalysisError>> + Send + 'a>>;

/// Remote analysis of one encoded frame.
pub trait EmotionAnalyzer: Send + Sync {
    /// Analyse `image_data_url` (a `data:image/jpeg;base64,...` URL).
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success status.
    fn analyze(&self, image_data_url: String) -> AnalysisFuture<'_>;
}

/// Client of the emotion analysis endpoint.
#[derive(Clone, Debug)]
pub struct HttpEmotionAnalyzer {
    client: Client,
    endpoint: Url,
    timeout: Option<Duration>,
}

impl HttpEmotionAnalyzer {
    /// Create an analyzer posting to `endpoint`.
    #[must_use]
    pub const fn new(client: Client, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            timeout: None,
        }
    }

    /// Bound each request to `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl EmotionAnalyzer for HttpEmotionAnalyzer {
    fn analyze(&self, image_data_url: String) -> AnalysisFuture<'_> {
        Box::pin(async move {
            let mut request = self.client.post(self.endpoint.clone()).json(&ImagePayload {
                image_base64: &image_data_url,
            });
            if let Some(timeout) = self.timeout {
                request = request.timeout(timeout);
            }
            let response = request.send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = error_detail(&body);
                warn!(status = status.as_u16(), %message, "Emotion analysis rejected");
                return Err(AnalysisError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            let result: AnalysisResult = response.json().await?;
            debug!(
                faces = result.faces_detected,
                emotions = result.emotions.len(),
                "Emotion analysis received"
            );
            Ok(result)
        })
    }
}

/// `detail` string of an error body, or the generic fallback.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| match parsed.detail {
            Some(serde_json::Value::String(detail)) if !detail.trim().is_empty() => Some(detail),
            _ => None,
        })
        .unwrap_or_else(|| ANALYSIS_FALLBACK_MESSAGE.to_string())
}
