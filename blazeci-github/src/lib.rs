//! BlazeCI GitHub client
//!
//! A typed HTTP client for the slice of the GitHub REST API the fleet
//! needs: App installation tokens, runner registration tokens, and
//! workflow job listings, plus webhook signature verification.
//!
//! # Example
//!
//! ```no_run
//! use blazeci_github::GitHubClient;
//!
//! # async fn example() -> blazeci_github::Result<()> {
//! let client = GitHubClient::new("https://api.github.com");
//! let token = client.registration_token("some-token", "acme", "widgets").await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod error;
mod jobs;
mod runners;
pub mod signature;

// Re-export commonly used types
pub use app::AppAuth;
pub use error::{ClientError, Result};
pub use jobs::WorkflowJobBrief;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// User agent GitHub requires on every API call
const USER_AGENT: &str = concat!("blazeci/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the GitHub REST API
#[derive(Debug, Clone)]
pub struct GitHubClient {
    /// Base URL of the API (e.g. "https://api.github.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl GitHubClient {
    /// Create a new client against the given API base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a client with a custom reqwest Client (timeouts, proxies, ...)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with the standard GitHub headers applied
    pub(crate) fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        token: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    /// Handle an API response and deserialize JSON
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = GitHubClient::new("https://api.github.com/");
        assert_eq!(client.base_url(), "https://api.github.com");
    }
}
