//! GitHub App authentication
//!
//! The fleet authenticates as a GitHub App: a short-lived RS256 JWT signed
//! with the App's private key is exchanged for per-installation access
//! tokens, which are what the rest of the client uses. Installation tokens
//! live for an hour; we cache them and refresh shortly before expiry.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::GitHubClient;
use crate::error::{ClientError, Result};

/// Refresh installation tokens this long before GitHub expires them
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// App JWTs are valid for at most 10 minutes; stay under that
const JWT_LIFETIME_SECS: i64 = 540;

/// Backdate iat to tolerate clock skew between us and GitHub
const JWT_SKEW_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

/// GitHub App credentials and installation-token cache
pub struct AppAuth {
    app_id: String,
    key: EncodingKey,
    cache: Mutex<HashMap<i64, CachedToken>>,
}

impl AppAuth {
    /// Creates App credentials from the App id and its RSA private key PEM
    pub fn new(app_id: impl Into<String>, private_key_pem: &[u8]) -> Result<Self> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| ClientError::AuthError(format!("invalid App private key: {e}")))?;

        Ok(Self {
            app_id: app_id.into(),
            key,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Mints a short-lived App JWT for the `/app/*` endpoints
    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_SKEW_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.clone(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| ClientError::AuthError(format!("failed to sign App JWT: {e}")))
    }

    /// Returns an access token for the given installation
    ///
    /// Serves from cache while the token has more than a minute of life
    /// left; otherwise fetches a fresh one.
    pub async fn installation_token(
        &self,
        client: &GitHubClient,
        installation_id: i64,
    ) -> Result<String> {
        let now = Utc::now();

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&installation_id) {
            if cached.is_fresh(now) {
                return Ok(cached.token.clone());
            }
        }

        tracing::debug!("Fetching installation token for installation {installation_id}");

        let jwt = self.app_jwt()?;
        let response = client
            .request(
                reqwest::Method::POST,
                &format!("/app/installations/{installation_id}/access_tokens"),
                &jwt,
            )
            .send()
            .await?;

        let token: InstallationTokenResponse = client.handle_response(response).await?;

        cache.insert(
            installation_id,
            CachedToken {
                token: token.token.clone(),
                expires_at: token.expires_at,
            },
        );

        Ok(token.token)
    }
}

impl std::fmt::Debug for AppAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuth")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_token_freshness() {
        let now = Utc::now();
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::seconds(600),
        };
        let stale = CachedToken {
            token: "t".to_string(),
            expires_at: now + Duration::seconds(30),
        };

        assert!(fresh.is_fresh(now));
        // Inside the refresh margin counts as stale
        assert!(!stale.is_fresh(now));
    }

    #[test]
    fn test_invalid_key_is_rejected() {
        let result = AppAuth::new("12345", b"not a pem");
        assert!(matches!(result, Err(ClientError::AuthError(_))));
    }
}
