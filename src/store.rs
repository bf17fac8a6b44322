//! Job Store - Durable keyed storage for Job aggregates
//!
//! The workflow always loads, mutates a copy, and saves with the version
//! observed at load time. A stale version fails the save with
//! `VersionConflict`, which the workflow retries under its per-job lock.

use crate::WorkflowResult;
use crate::error::WorkflowError;
use crate::models::Job;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A job together with the version observed at load time
#[derive(Debug, Clone)]
pub struct VersionedJob {
    pub job: Job,
    pub version: u64,
}

/// Durable keyed storage for Job aggregates
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job at version 1
    async fn insert(&self, job: Job) -> WorkflowResult<()>;

    /// Load a job with its current version
    async fn load(&self, job_id: Uuid) -> WorkflowResult<VersionedJob>;

    /// Persist a mutated job, failing on a stale expected version
    async fn save(&self, job: Job, expected_version: u64) -> WorkflowResult<u64>;

    /// Delete a job (status guards are the workflow's responsibility)
    async fn delete(&self, job_id: Uuid) -> WorkflowResult<()>;

    /// List jobs where the user is the client or the freelancer
    async fn list_for(&self, user_id: Uuid) -> WorkflowResult<Vec<Job>>;
}

/// In-memory job store for tests and embedders
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, VersionedJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> WorkflowResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(WorkflowError::internal(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, VersionedJob { job, version: 1 });
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> WorkflowResult<VersionedJob> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| WorkflowError::not_found(format!("job {}", job_id)))
    }

    async fn save(&self, job: Job, expected_version: u64) -> WorkflowResult<u64> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job.id)
            .ok_or_else(|| WorkflowError::not_found(format!("job {}", job.id)))?;

        if entry.version != expected_version {
            return Err(WorkflowError::VersionConflict(job.id));
        }

        entry.version += 1;
        entry.job = job;
        Ok(entry.version)
    }

    async fn delete(&self, job_id: Uuid) -> WorkflowResult<()> {
        self.jobs
            .write()
            .await
            .remove(&job_id)
            .map(|_| ())
            .ok_or_else(|| WorkflowError::not_found(format!("job {}", job_id)))
    }

    async fn list_for(&self, user_id: Uuid) -> WorkflowResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|v| v.job.client_id == user_id || v.job.freelancer_id == Some(user_id))
            .map(|v| v.job.clone())
            .collect())
    }
}
