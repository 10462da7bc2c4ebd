//! Endpoints of the portfolio API and the shared HTTP client.

use reqwest::Client;
use url::Url;

use crate::config::{ClientConfig, ConfigResult};

/// Resolved endpoint URLs of the portfolio API.
#[derive(Clone, Debug)]
pub struct ApiEndpoints {
    chat: Url,
    emotion: Url,
    analytics: Url,
}

impl ApiEndpoints {
    /// Resolve all endpoints against `base_url`.
    ///
    /// A base with a path prefix (`https://host/backend`) keeps the prefix.
    ///
    /// # Errors
    /// Returns an error if the base URL does not parse.
    pub fn new(base_url: &str) -> ConfigResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            chat: base.join("api/rag/chat")?,
            emotion: base.join("api/ml/emotion")?,
            analytics: base.join("api/analytics/")?,
        })
    }

    /// Build endpoints from a client configuration.
    ///
    /// # Errors
    /// Returns an error if the configured base URL does not parse.
    pub fn from_config(config: &ClientConfig) -> ConfigResult<Self> {
        Self::new(&config.api_base_url)
    }

    /// Streaming RAG chat endpoint.
    #[must_use]
    pub const fn chat(&self) -> &Url {
        &self.chat
    }

    /// Emotion analysis endpoint.
    #[must_use]
    pub const fn emotion(&self) -> &Url {
        &self.emotion
    }

    /// Analytics event endpoint.
    #[must_use]
    pub const fn analytics(&self) -> &Url {
        &self.analytics
    }
}

/// Build the HTTP client shared by every adapter.
///
/// Only the connect timeout is set here. Whole-request timeouts are applied
/// per JSON request and never to the chat stream.
///
/// # Errors
/// Returns an error if the HTTP client cannot be built.
pub fn build_http_client(config: &ClientConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .user_agent(concat!("portfolio-client/", env!("CARGO_PKG_VERSION")))
        .build()
}
