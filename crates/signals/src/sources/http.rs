use async_trait::async_trait;
use depthsync_core::{SignalBatch, SignalSource};
use governor::{clock::DefaultClock, state::direct::NotKeyed, state::InMemoryState, Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{parse_snapshot, SourceError};

/// Polls a JSON snapshot over HTTP.
///
/// The request timeout must stay below the timeout the registry puts around
/// `fetch_signals`; build it with `EngineConfig::http_timeout`.
pub struct HttpSignalSource {
    name: String,
    url: String,
    enabled: bool,
    http_client: Client,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl HttpSignalSource {
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        let quota = Quota::per_second(NonZeroU32::new(2).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            http_client,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN));
        self.rate_limiter = Arc::new(RateLimiter::direct(quota));
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// # Errors
    /// Returns error on transport failure, a non-success status, or an
    /// unparseable body.
    pub async fn get(&self) -> Result<SignalBatch, SourceError> {
        self.rate_limiter.until_ready().await;
        let response = self.http_client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }
        let body = response.bytes().await?;
        parse_snapshot(&body)
    }
}

#[async_trait]
impl SignalSource for HttpSignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn fetch_signals(&self) -> anyhow::Result<SignalBatch> {
        let batch = self.get().await?;
        tracing::debug!(source = %self.name, url = %self.url, symbols = batch.len(), "Fetched signals");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/signals"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn fetches_snapshot_over_http() {
        let server = server_with(200, r#"{"BTCUSDT":{"depth":-0.2,"price":61000}}"#).await;
        let source = HttpSignalSource::new(
            "remote",
            format!("{}/signals", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        let batch = source.fetch_signals().await.unwrap();
        assert!((batch["BTCUSDT"].depth + 0.2).abs() < 1e-12);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = server_with(503, "{}").await;
        let source = HttpSignalSource::new(
            "remote",
            format!("{}/signals", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(
            source.get().await,
            Err(SourceError::Status { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn slow_server_hits_client_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let source = HttpSignalSource::new("remote", server.uri(), Duration::from_millis(50)).unwrap();

        assert!(matches!(source.get().await, Err(SourceError::Http(_))));
    }
}
