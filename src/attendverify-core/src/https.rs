//! HTTPS client for the HR back-end attendance API.
//!
//! ## Endpoints
//!
//! - `POST /v1/attendance/qr-token` - Issue a rotating presence token
//! - `POST /v1/attendance/pre-validate` - Pre-commit anomaly check
//!
//! Paths are configurable through [`EndpointConfig`].

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{IssuedToken, PrecommitValidator, TokenIssuer};
use crate::config::EndpointConfig;
use crate::error::VerifyError;
use crate::types::{PrecommitReport, PrecommitRequest};

/// HTTPS client for the attendance endpoints.
#[derive(Debug, Clone)]
pub struct HttpsClient {
    client: Client,
    base_url: String,
    token_path: String,
    prevalidate_path: String,
}

fn user_agent() -> String {
    format!("attendverify/{}", env!("CARGO_PKG_VERSION"))
}

impl HttpsClient {
    /// Create a client for `base_url` using the paths and timeout of `config`.
    pub fn new(base_url: &str, config: &EndpointConfig) -> Result<Self, VerifyError> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(std::time::Duration::from_secs(3)))
            .pool_idle_timeout(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .user_agent(user_agent())
            .build()
            .map_err(|e| VerifyError::Network {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_path: config.token_path.clone(),
            prevalidate_path: config.prevalidate_path.clone(),
        })
    }

    /// Build a client from `config`, if a base URL is configured.
    pub fn from_config(config: &EndpointConfig) -> Result<Option<Self>, VerifyError> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, config))
            .transpose()
    }

    /// Whether the base URL uses TLS.
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, VerifyError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, user_agent = %user_agent(), "HTTPS: POST");

        let response = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS request failed");
            VerifyError::Network {
                message: format!("Request to {} failed: {}", url, e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "HTTPS: Non-success status");
            return Err(VerifyError::Network {
                message: format!("HTTP {} from {}", status, url),
            });
        }

        response.json::<R>().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS: Failed to parse JSON response");
            VerifyError::Network {
                message: format!("Failed to parse response from {}: {}", url, e),
            }
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    store_id: &'a str,
}

#[async_trait]
impl TokenIssuer for HttpsClient {
    #[instrument(skip(self))]
    async fn issue(&self, store_id: &str) -> Result<IssuedToken, VerifyError> {
        let token: IssuedToken = self
            .post_json(&self.token_path, &TokenRequest { store_id })
            .await?;
        info!(store_id, expires_at = token.expires_at, "HTTPS: token issued");
        Ok(token)
    }
}

#[async_trait]
impl PrecommitValidator for HttpsClient {
    #[instrument(skip(self), fields(user_id = %request.user_id, store_id = %request.store_id))]
    async fn prevalidate(
        &self,
        request: &PrecommitRequest,
    ) -> Result<PrecommitReport, VerifyError> {
        let report: PrecommitReport = self.post_json(&self.prevalidate_path, request).await?;
        info!(warnings = report.warnings.len(), "HTTPS: pre-commit check done");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_base_url() {
        let config = EndpointConfig::default();
        assert!(HttpsClient::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = EndpointConfig::default();
        let client = HttpsClient::new("https://hr.example.com/", &config).unwrap();
        assert_eq!(client.base_url, "https://hr.example.com");
        assert!(client.is_secure());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let config = EndpointConfig {
            timeout: std::time::Duration::from_millis(500),
            ..EndpointConfig::default()
        };
        let client = HttpsClient::new("http://127.0.0.1:9", &config).unwrap();
        let err = client.issue("store-1").await.unwrap_err();
        assert!(matches!(err, VerifyError::Network { .. }));
        assert!(err.is_capability());
    }
}
