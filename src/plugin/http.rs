//! Shared HTTP request helper for data hub backends.
//!
//! Centralizes timeout and user-agent policy, and maps every transport,
//! status and decoding failure to a provider-scoped [`PluginError`] so a
//! backend can never crash an orchestration call with a raw HTTP error.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::PluginError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 60;

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fluxnet/shuttle";

/// Connect/read timeouts for backend HTTP clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginHttpTimeouts {
    /// Connection establishment timeout.
    pub connect: Duration,
    /// Whole-request timeout.
    pub read: Duration,
}

impl Default for PluginHttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Returns the User-Agent sent by every backend request.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fluxnet-shuttle/{version} (+{PROJECT_UA_URL})")
}

/// HTTP client bound to one provider for error attribution.
///
/// Cheap to clone; clone it into the `'static` streams returned by
/// [`DataHubPlugin::get_sites`](super::DataHubPlugin::get_sites).
#[derive(Debug, Clone)]
pub struct PluginHttpClient {
    provider_id: String,
    client: Client,
    read_timeout: Duration,
}

impl PluginHttpClient {
    /// Builds a client with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Other`] when the underlying client cannot be built.
    pub fn new(provider_id: impl Into<String>) -> Result<Self, PluginError> {
        Self::with_timeouts(provider_id, PluginHttpTimeouts::default())
    }

    /// Builds a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Other`] when the underlying client cannot be built.
    pub fn with_timeouts(
        provider_id: impl Into<String>,
        timeouts: PluginHttpTimeouts,
    ) -> Result<Self, PluginError> {
        let provider_id = provider_id.into();
        let client = Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.read)
            .user_agent(default_user_agent())
            .gzip(true)
            .build()
            .map_err(|error| {
                PluginError::other(
                    &provider_id,
                    format!("HTTP client construction failed: {error}"),
                )
            })?;
        Ok(Self {
            provider_id,
            client,
            read_timeout: timeouts.read,
        })
    }

    /// Provider the client reports failures for.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// GETs `url` and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] for transport failures, timeouts, non-success
    /// statuses and undecodable bodies.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PluginError> {
        let response = self.send(self.client.get(url), url).await?;
        self.decode_json(response, url).await
    }

    /// GETs `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] for transport failures, timeouts and non-success statuses.
    pub async fn get_text(&self, url: &str) -> Result<String, PluginError> {
        let response = self.send(self.client.get(url), url).await?;
        response
            .text()
            .await
            .map_err(|error| self.map_transport_error(url, &error))
    }

    /// POSTs `body` as JSON to `url` and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] for transport failures, timeouts, non-success
    /// statuses and undecodable bodies.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, PluginError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.client.post(url).json(body), url).await?;
        self.decode_json(response, url).await
    }

    #[tracing::instrument(skip(self, request), fields(provider = %self.provider_id))]
    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, PluginError> {
        let response = request
            .send()
            .await
            .map_err(|error| self.map_transport_error(url, &error))?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Provider returned error status");
            return Err(PluginError::HttpStatus {
                provider: self.provider_id.clone(),
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(status = status.as_u16(), "Provider request succeeded");
        Ok(response)
    }

    async fn decode_json<T: DeserializeOwned>(
        &self,
        response: Response,
        url: &str,
    ) -> Result<T, PluginError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|error| self.map_transport_error(url, &error))?;
        serde_json::from_slice(&bytes).map_err(|error| {
            PluginError::invalid_response(&self.provider_id, format!("{url}: {error}"))
        })
    }

    fn map_transport_error(&self, url: &str, error: &reqwest::Error) -> PluginError {
        if error.is_timeout() {
            warn!(provider = %self.provider_id, url, "Provider request timed out");
            let elapsed_ms = u64::try_from(self.read_timeout.as_millis()).unwrap_or(u64::MAX);
            return PluginError::timeout(&self.provider_id, elapsed_ms);
        }
        warn!(provider = %self.provider_id, error = %error, "Provider request failed");
        PluginError::Http {
            provider: self.provider_id.clone(),
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_identifies_project() {
        let ua = default_user_agent();
        assert!(ua.starts_with("fluxnet-shuttle/"));
        assert!(ua.contains(PROJECT_UA_URL));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = PluginHttpTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(10));
        assert_eq!(timeouts.read, Duration::from_secs(60));
    }
}
