//! Persistence capability for the fleet
//!
//! The reconciliation core reads and writes runner records and repository
//! configuration through this seam so it can run against an in-memory
//! store in tests. The Postgres implementation delegates to the
//! repository layer.

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use blazeci_core::domain::repo::RepoConfig;
use blazeci_core::domain::runner::RunnerRecord;

use crate::repository::{repo_repository, runner_repository};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Runner record and repository configuration storage
#[async_trait]
pub trait RunnerStore: Send + Sync {
    /// Loads all non-terminal records for a repository
    async fn load_records(&self, repo_id: i64) -> Result<Vec<RunnerRecord>, StoreError>;

    /// Creates or updates a record
    async fn save_record(&self, record: &RunnerRecord) -> Result<(), StoreError>;

    /// Loads a repository's configuration, if the repository is known
    async fn load_repo_config(&self, repo_id: i64) -> Result<Option<RepoConfig>, StoreError>;
}

/// Postgres-backed store
pub struct PgRunnerStore {
    pool: PgPool,
}

impl PgRunnerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunnerStore for PgRunnerStore {
    async fn load_records(&self, repo_id: i64) -> Result<Vec<RunnerRecord>, StoreError> {
        Ok(runner_repository::list_non_terminal(&self.pool, repo_id).await?)
    }

    async fn save_record(&self, record: &RunnerRecord) -> Result<(), StoreError> {
        Ok(runner_repository::upsert(&self.pool, record).await?)
    }

    async fn load_repo_config(&self, repo_id: i64) -> Result<Option<RepoConfig>, StoreError> {
        Ok(repo_repository::find_by_id(&self.pool, repo_id).await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store for fleet tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub repos: Mutex<HashMap<i64, RepoConfig>>,
        pub records: Mutex<HashMap<Uuid, RunnerRecord>>,
    }

    impl MemoryStore {
        pub(crate) fn with_repo(repo: RepoConfig) -> Self {
            let store = Self::default();
            store.repos.lock().unwrap().insert(repo.id, repo);
            store
        }

        pub(crate) fn record(&self, id: Uuid) -> Option<RunnerRecord> {
            self.records.lock().unwrap().get(&id).cloned()
        }
    }

    #[async_trait]
    impl RunnerStore for MemoryStore {
        async fn load_records(&self, repo_id: i64) -> Result<Vec<RunnerRecord>, StoreError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.repo_id == repo_id && !r.state.is_terminal())
                .cloned()
                .collect())
        }

        async fn save_record(&self, record: &RunnerRecord) -> Result<(), StoreError> {
            self.records
                .lock()
                .unwrap()
                .insert(record.id, record.clone());
            Ok(())
        }

        async fn load_repo_config(&self, repo_id: i64) -> Result<Option<RepoConfig>, StoreError> {
            Ok(self.repos.lock().unwrap().get(&repo_id).cloned())
        }
    }
}
