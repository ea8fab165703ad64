//! Installation Service
//!
//! Applies GitHub App installation lifecycle events to persistent state.

use blazeci_core::domain::event::{InstallationAction, InstallationEvent};
use sqlx::PgPool;

use crate::repository::{installation_repository, repo_repository};

/// Apply an installation event
pub async fn apply(pool: &PgPool, event: &InstallationEvent) -> Result<(), sqlx::Error> {
    match event.action {
        InstallationAction::Created => {
            installation_repository::upsert(pool, event).await?;
            tracing::info!(
                "App installed for {} ({})",
                event.account_login,
                event.account_type
            );
        }
        InstallationAction::Deleted => {
            installation_repository::delete(pool, event.installation_id).await?;

            // Repositories under the installation keep their history but
            // stop being scaled.
            let deactivated =
                repo_repository::set_active_by_installation(pool, event.installation_id, false)
                    .await?;

            tracing::info!(
                "App uninstalled for {}; {} repo(s) deactivated",
                event.account_login,
                deactivated
            );
        }
    }

    Ok(())
}
