//! Configuration for the portfolio client.
//!
//! Defaults mirror the live site. Environment variables override a few
//! deployment-specific values (API location, daily cap).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable for the API base URL.
pub const API_URL_ENV: &str = "PORTFOLIO_API_URL";
/// Environment variable overriding the daily analysis cap.
pub const MAX_DAILY_USES_ENV: &str = "PORTFOLIO_MAX_DAILY_USES";

/// Default API base URL (local `FastAPI` service).
pub const DEFAULT_API_URL: &str = "http://localhost:8000";
/// Maximum number of successful emotion analyses per calendar day.
pub const MAX_DAILY_USES: u32 = 5;
/// Storage key of the persisted daily quota record.
pub const DEFAULT_QUOTA_KEY: &str = "emotion_detector_daily_usage";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The API base URL does not parse.
    #[error("invalid api url: {0}")]
    Url(#[from] url::ParseError),
}

/// Convenience result alias for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the portfolio API.
    pub api_base_url: String,
    /// Connection timeout for every request.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Whole-request timeout for JSON calls (not applied to the chat stream).
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Chat widget settings.
    pub chat: ChatConfig,
    /// Emotion capture settings.
    pub capture: CaptureConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            chat: ChatConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from defaults overridden by the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = std::env::var(API_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
        {
            config.api_base_url = url.trim().to_string();
        }

        if let Ok(raw) = std::env::var(MAX_DAILY_USES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(max) => config.capture.max_daily_uses = max,
                Err(err) => {
                    tracing::warn!(value = %raw, %err, "Ignoring unparsable PORTFOLIO_MAX_DAILY_USES");
                }
            }
        }

        config
    }

    /// Set the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the JSON request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Replace the chat settings.
    #[must_use]
    pub fn with_chat(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    /// Replace the capture settings.
    #[must_use]
    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any value is out of range or the base URL is invalid.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = Url::parse(&self.api_base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be http(s), got {}",
                url.scheme()
            )));
        }

        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be > 0".to_string()));
        }

        self.chat.validate()?;
        self.capture.validate()
    }
}

/// Chat widget settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Minimum trimmed question length (in chars) before the endpoint is called.
    pub min_question_chars: usize,
    /// Greeting bubble schedule.
    pub greeting: GreetingConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            min_question_chars: 3,
            greeting: GreetingConfig::default(),
        }
    }
}

impl ChatConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.min_question_chars == 0 {
            return Err(ConfigError::Invalid(
                "chat.min_question_chars must be > 0".to_string(),
            ));
        }
        self.greeting.validate()
    }
}

/// Greeting bubble schedule, relative to session start.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GreetingConfig {
    /// First appearance.
    #[serde(with = "duration_serde")]
    pub first_show_after: Duration,
    /// Second (and last) appearance.
    #[serde(with = "duration_serde")]
    pub second_show_after: Duration,
    /// How long each appearance stays visible.
    #[serde(with = "duration_serde")]
    pub visible_for: Duration,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            first_show_after: Duration::from_secs(5),
            second_show_after: Duration::from_secs(180),
            visible_for: Duration::from_secs(5),
        }
    }
}

impl GreetingConfig {
    /// Offsets of the two "show" events.
    #[must_use]
    pub const fn show_offsets(&self) -> [Duration; 2] {
        [self.first_show_after, self.second_show_after]
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.visible_for.is_zero() {
            return Err(ConfigError::Invalid(
                "chat.greeting.visible_for must be > 0".to_string(),
            ));
        }
        if self.second_show_after <= self.first_show_after {
            return Err(ConfigError::Invalid(
                "chat.greeting.second_show_after must come after first_show_after".to_string(),
            ));
        }
        Ok(())
    }
}

/// Emotion capture settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Inactivity timeout of an active camera session.
    #[serde(with = "duration_serde")]
    pub inactivity_timeout: Duration,
    /// Successful analyses allowed per calendar day.
    pub max_daily_uses: u32,
    /// Key of the persisted quota record.
    pub quota_key: String,
    /// JPEG quality of the captured frame (1..=100).
    pub jpeg_quality: u8,
    /// Requested video width.
    pub video_width: u32,
    /// Requested video height.
    pub video_height: u32,
    /// Analytics event emitted after each successful analysis.
    pub analytics_event: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30),
            max_daily_uses: MAX_DAILY_USES,
            quota_key: DEFAULT_QUOTA_KEY.to_string(),
            jpeg_quality: 85,
            video_width: 640,
            video_height: 480,
            analytics_event: "ml_emotion_test".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Set the daily cap.
    #[must_use]
    pub const fn with_max_daily_uses(mut self, max: u32) -> Self {
        self.max_daily_uses = max;
        self
    }

    /// Set the inactivity timeout.
    #[must_use]
    pub const fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Inactivity timeout in whole seconds (at least one).
    #[must_use]
    pub fn timeout_seconds(&self) -> u32 {
        u32::try_from(self.inactivity_timeout.as_secs())
            .unwrap_or(u32::MAX)
            .max(1)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_daily_uses == 0 {
            return Err(ConfigError::Invalid(
                "capture.max_daily_uses must be > 0".to_string(),
            ));
        }
        if self.inactivity_timeout.as_secs() == 0 {
            return Err(ConfigError::Invalid(
                "capture.inactivity_timeout must be at least one second".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "capture.jpeg_quality must be within 1..=100".to_string(),
            ));
        }
        if self.quota_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "capture.quota_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.chat.min_question_chars, 3);
        assert_eq!(config.capture.inactivity_timeout, Duration::from_secs(30));
        assert_eq!(config.capture.max_daily_uses, MAX_DAILY_USES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_api_base_url("https://api.example.org")
            .with_request_timeout(Duration::from_secs(5))
            .with_capture(CaptureConfig::default().with_max_daily_uses(2));

        assert_eq!(config.api_base_url, "https://api.example.org");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.capture.max_daily_uses, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = ClientConfig::new().with_api_base_url("not a url");
        assert!(matches!(bad_url.validate(), Err(ConfigError::Url(_))));

        let ftp = ClientConfig::new().with_api_base_url("ftp://example.org");
        assert!(matches!(ftp.validate(), Err(ConfigError::Invalid(_))));

        let no_uses =
            ClientConfig::new().with_capture(CaptureConfig::default().with_max_daily_uses(0));
        assert!(no_uses.validate().is_err());

        let mut quality = ClientConfig::new();
        quality.capture.jpeg_quality = 0;
        assert!(quality.validate().is_err());
    }

    #[test]
    fn test_duration_serde_roundtrip_in_seconds() {
        let config = GreetingConfig::default();
        let json = serde_json::to_value(&config).unwrap_or_default();
        assert_eq!(json["first_show_after"], 5);
        assert_eq!(json["second_show_after"], 180);

        let parsed: Result<GreetingConfig, _> = serde_json::from_value(json);
        assert!(parsed.is_ok_and(|g| g.visible_for == Duration::from_secs(5)));
    }

    #[test]
    fn test_timeout_seconds_floor() {
        let config = CaptureConfig::default().with_inactivity_timeout(Duration::from_millis(200));
        assert_eq!(config.timeout_seconds(), 1);
        assert_eq!(CaptureConfig::default().timeout_seconds(), 30);
    }
}
