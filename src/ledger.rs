//! Ledger Client - External settlement system integration
//!
//! Four operations mirror workflow state onto the external settlement
//! record. Only `release_funds` is load-bearing: its transaction id is
//! persisted into the milestone and its failure aborts the release. The
//! other three are best-effort audit mirrors that the workflow logs and
//! swallows on failure.

use crate::WorkflowResult;
use crate::error::WorkflowError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Settlement receipt returned by a successful fund release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    /// Opaque transaction identifier from the settlement ledger
    pub tx_id: String,
    pub settled_at: DateTime<Utc>,
}

/// External settlement ledger collaborator
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Mirror an evidence submission onto the settlement record
    async fn submit_work(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        evidence_hash: &str,
    ) -> WorkflowResult<()>;

    /// Mirror a reviewer assignment onto the settlement record
    async fn assign_reviewers(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        reviewers: &[Uuid],
    ) -> WorkflowResult<()>;

    /// Mirror a reviewer vote onto the settlement record
    async fn cast_vote(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        approve: bool,
        reviewer: Uuid,
    ) -> WorkflowResult<()>;

    /// Transfer the milestone amount to the freelancer
    async fn release_funds(
        &self,
        job_id: Uuid,
        milestone_index: usize,
    ) -> WorkflowResult<SettlementReceipt>;
}

/// A recorded ledger call, kept by [`InMemoryLedger`] for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    SubmitWork {
        job_id: Uuid,
        milestone_index: usize,
        evidence_hash: String,
    },
    AssignReviewers {
        job_id: Uuid,
        milestone_index: usize,
        reviewers: Vec<Uuid>,
    },
    CastVote {
        job_id: Uuid,
        milestone_index: usize,
        approve: bool,
        reviewer: Uuid,
    },
    ReleaseFunds {
        job_id: Uuid,
        milestone_index: usize,
    },
}

/// In-memory settlement ledger for tests and embedders
///
/// Records every call and mints opaque transaction ids. Releases can be
/// configured to fail or stall to exercise the workflow's error paths.
pub struct InMemoryLedger {
    calls: Arc<RwLock<Vec<LedgerCall>>>,
    release_failure: Arc<RwLock<Option<String>>>,
    release_delay: Arc<RwLock<Option<Duration>>>,
    mirror_failure: Arc<RwLock<bool>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            release_failure: Arc::new(RwLock::new(None)),
            release_delay: Arc::new(RwLock::new(None)),
            mirror_failure: Arc::new(RwLock::new(false)),
        }
    }

    /// Make subsequent `release_funds` calls fail with the given reason
    pub async fn fail_releases<S: Into<String>>(&self, reason: S) {
        *self.release_failure.write().await = Some(reason.into());
    }

    /// Clear a previously configured release failure
    pub async fn recover_releases(&self) {
        *self.release_failure.write().await = None;
    }

    /// Stall subsequent `release_funds` calls for the given duration
    pub async fn delay_releases(&self, delay: Duration) {
        *self.release_delay.write().await = Some(delay);
    }

    /// Make subsequent mirror calls fail (they should be swallowed upstream)
    pub async fn fail_mirrors(&self, fail: bool) {
        *self.mirror_failure.write().await = fail;
    }

    /// Snapshot of every recorded call
    pub async fn calls(&self) -> Vec<LedgerCall> {
        self.calls.read().await.clone()
    }

    async fn record_mirror(&self, call: LedgerCall) -> WorkflowResult<()> {
        if *self.mirror_failure.read().await {
            return Err(WorkflowError::ledger("mirror unavailable"));
        }
        self.calls.write().await.push(call);
        Ok(())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit_work(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        evidence_hash: &str,
    ) -> WorkflowResult<()> {
        self.record_mirror(LedgerCall::SubmitWork {
            job_id,
            milestone_index,
            evidence_hash: evidence_hash.to_string(),
        })
        .await
    }

    async fn assign_reviewers(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        reviewers: &[Uuid],
    ) -> WorkflowResult<()> {
        self.record_mirror(LedgerCall::AssignReviewers {
            job_id,
            milestone_index,
            reviewers: reviewers.to_vec(),
        })
        .await
    }

    async fn cast_vote(
        &self,
        job_id: Uuid,
        milestone_index: usize,
        approve: bool,
        reviewer: Uuid,
    ) -> WorkflowResult<()> {
        self.record_mirror(LedgerCall::CastVote {
            job_id,
            milestone_index,
            approve,
            reviewer,
        })
        .await
    }

    async fn release_funds(
        &self,
        job_id: Uuid,
        milestone_index: usize,
    ) -> WorkflowResult<SettlementReceipt> {
        if let Some(delay) = *self.release_delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.release_failure.read().await.clone() {
            return Err(WorkflowError::ledger(reason));
        }

        self.calls.write().await.push(LedgerCall::ReleaseFunds {
            job_id,
            milestone_index,
        });

        Ok(SettlementReceipt {
            tx_id: format!("tx-{}", Uuid::new_v4()),
            settled_at: Utc::now(),
        })
    }
}
