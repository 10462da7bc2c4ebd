//! Startup helpers shared by the portfolio client binaries.
//!
//! Wires the HTTP adapters to the chat and capture components from a
//! [`ClientConfig`] loaded from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;

use crate::api::{ApiEndpoints, build_http_client};
use crate::capture::{
    CameraDevice, DailyUsage, HttpEmotionAnalyzer, JsonFileQuotaStore, LocalClock, QuotaStore,
    RateLimitedCapture,
};
use crate::chat::{HttpChatTransport, StreamingChatSession};
use crate::config::{ClientConfig, ConfigError};
use crate::telemetry::{HttpTelemetrySink, PageViewTracker, TelemetrySink};

/// Env var overriding the quota file location.
pub const QUOTA_FILE_ENV: &str = "PORTFOLIO_QUOTA_FILE";

/// Default quota file, relative to the working directory.
pub const DEFAULT_QUOTA_FILE: &str = "portfolio_quota.json";

/// Failures while assembling the client.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Install the `tracing` subscriber (`RUST_LOG` aware, INFO by default).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

/// Load and validate the configuration from the environment.
///
/// # Errors
/// Returns an error if the resulting configuration is invalid.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    let config = ClientConfig::from_env();
    config.validate()?;
    tracing::info!("Portfolio API: {}", config.api_base_url);
    Ok(config)
}

/// Quota file from the environment, or the default.
#[must_use]
pub fn quota_file() -> PathBuf {
    std::env::var(QUOTA_FILE_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_QUOTA_FILE), PathBuf::from)
}

/// Shared HTTP plumbing for the client components.
pub struct PortfolioClient {
    config: ClientConfig,
    endpoints: ApiEndpoints,
    http: Client,
    telemetry: Arc<dyn TelemetrySink>,
}

impl PortfolioClient {
    /// Resolve endpoints and build the HTTP client.
    ///
    /// # Errors
    /// Returns an error for an invalid configuration or if the client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let endpoints = ApiEndpoints::from_config(&config)?;
        let http = build_http_client(&config)?;
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(HttpTelemetrySink::new(
            http.clone(),
            endpoints.analytics().clone(),
            config.request_timeout,
        ));
        Ok(Self {
            config,
            endpoints,
            http,
            telemetry,
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolved endpoints.
    #[must_use]
    pub const fn endpoints(&self) -> &ApiEndpoints {
        &self.endpoints
    }

    /// Page view tracker posting to the analytics endpoint.
    #[must_use]
    pub fn page_views(&self) -> PageViewTracker {
        PageViewTracker::new(Arc::clone(&self.telemetry))
    }

    /// Chat session against the streaming RAG endpoint.
    #[must_use]
    pub fn chat_session(&self) -> StreamingChatSession {
        let transport = HttpChatTransport::new(self.http.clone(), self.endpoints.chat().clone());
        StreamingChatSession::new(Arc::new(transport), self.config.chat.clone())
    }

    /// Emotion capture over `camera`, with usage persisted in `store`.
    #[must_use]
    pub fn emotion_capture(
        &self,
        camera: Arc<dyn CameraDevice>,
        store: Arc<dyn QuotaStore>,
    ) -> RateLimitedCapture {
        let capture = &self.config.capture;
        let usage = DailyUsage::new(
            store,
            Arc::new(LocalClock),
            capture.quota_key.clone(),
            capture.max_daily_uses,
        );
        let analyzer = HttpEmotionAnalyzer::new(self.http.clone(), self.endpoints.emotion().clone())
            .with_timeout(self.config.request_timeout);
        RateLimitedCapture::new(
            camera,
            Arc::new(analyzer),
            Arc::clone(&self.telemetry),
            usage,
            capture.clone(),
        )
    }

    /// Emotion capture with usage persisted in the quota file.
    #[must_use]
    pub fn emotion_capture_with_file(&self, camera: Arc<dyn CameraDevice>) -> RateLimitedCapture {
        let path = quota_file();
        tracing::info!("Quota file: {}", path.display());
        self.emotion_capture(camera, Arc::new(JsonFileQuotaStore::new(path)))
    }
}
