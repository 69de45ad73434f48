//! HTTP client abstraction for testability.

use super::ProviderError;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default request timeout for imagery downloads.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Trait for HTTP GET operations.
///
/// This seam allows dependency injection of a mock client in tests; the
/// production implementation is [`ReqwestClient`].
pub trait HttpClient: Send + Sync + 'static {
    /// Performs an HTTP GET request and returns the response body.
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'a>>;
}

/// Real HTTP client implementation using reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ProviderError::Http(format!("request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Http(format!("HTTP {} from {}", status, url)));
            }

            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| ProviderError::Http(format!("failed to read response: {}", e)))
        })
    }
}
