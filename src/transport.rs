use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::redirect;

use crate::config::NotifierConfig;
use crate::error::{ConfigError, TransportError};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// One delivery attempt against the notification target.
///
/// Implementations make exactly one request per call and release every
/// resource they opened before returning.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` and return the response status code.
    async fn post(&self, body: &str) -> Result<u16, TransportError>;

    /// Target description for log lines.
    fn target(&self) -> &str;
}

/// reqwest-backed transport.
///
/// Redirects are not followed and no idle connection is kept, so every
/// attempt opens and closes its own connection.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache; max-age=0"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|err| ConfigError::Client(err.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build from config; `None` when no target URL is configured.
    pub fn from_config(config: &NotifierConfig) -> Result<Option<Self>, ConfigError> {
        let Some(ref url) = config.target_url else {
            return Ok(None);
        };
        Self::new(url.clone(), config.connect_timeout(), config.read_timeout()).map(Some)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: &str) -> Result<u16, TransportError> {
        // A `Vec` body is sent with a fixed Content-Length.
        let response = self
            .client
            .post(&self.url)
            .body(body.as_bytes().to_vec())
            .send()
            .await?;

        let code = response.status().as_u16();

        // Read the body to completion so the connection shuts down cleanly;
        // dropping `response` on the error path closes it as well.
        response.bytes().await?;

        Ok(code)
    }

    fn target(&self) -> &str {
        &self.url
    }
}
