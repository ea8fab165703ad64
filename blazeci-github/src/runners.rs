//! Self-hosted runner endpoints

use serde::Deserialize;

use crate::GitHubClient;
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct RegistrationTokenResponse {
    token: String,
}

impl GitHubClient {
    /// Fetches a runner registration token for a repository
    ///
    /// The token is what an ephemeral runner presents to
    /// `config.sh --token ...` when it registers; it expires after an hour
    /// and is fetched fresh for every launch.
    ///
    /// # Arguments
    /// * `token` - An installation (or PAT) token with administration scope
    /// * `owner` / `repo` - The repository to register against
    pub async fn registration_token(&self, token: &str, owner: &str, repo: &str) -> Result<String> {
        let path = format!("/repos/{owner}/{repo}/actions/runners/registration-token");
        let response = self.request(reqwest::Method::POST, &path, token).send().await?;

        let body: RegistrationTokenResponse = self.handle_response(response).await?;
        Ok(body.token)
    }

    /// Removes a registered runner by id
    ///
    /// Best-effort cleanup for runners whose task was torn down before they
    /// could deregister themselves.
    pub async fn remove_runner(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        runner_id: i64,
    ) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/actions/runners/{runner_id}");
        let response = self
            .request(reqwest::Method::DELETE, &path, token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(crate::ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}
