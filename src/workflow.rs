//! Workflow Façade - Coordinates the milestone escrow lifecycle
//!
//! This module is the externally callable API. It wraps the state machine,
//! the voting engine and the release gate, and coordinates the external
//! collaborators (job store, identity provider, settlement ledger,
//! notifier). All caller identities arrive as explicit parameters; nothing
//! is derived from ambient state.
//!
//! Every mutation of a job runs under that job's async mutex, so the
//! load -> guard -> mutate -> save sequence never interleaves with another
//! mutator of the same job. Mutations of different jobs do not block each
//! other. Saves still carry the version observed at load time; a conflict
//! (possible only for writers bypassing this façade) is retried a bounded
//! number of times.

use crate::WorkflowResult;
use crate::{
    error::WorkflowError,
    identity::IdentityProvider,
    ledger::LedgerClient,
    models::{Job, JobStatus, Milestone, MilestonePatch, Role, Verdict},
    notifier::{Notification, Notifier},
    store::{JobStore, VersionedJob},
    voting::{self, Tally},
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for the escrow workflow
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Bounded internal retries on a version conflict
    pub max_save_retries: u32,
    /// Timeout applied to the settlement ledger call inside `release`
    pub ledger_timeout: Duration,
    /// Fixed reward amount notified to each reviewer after a release
    pub reviewer_reward: i64,
    /// Maximum milestone amount in minor currency units
    pub max_milestone_amount: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_save_retries: 3,
            ledger_timeout: Duration::from_secs(30),
            reviewer_reward: 500,
            max_milestone_amount: 10_000_000,
        }
    }
}

/// Job creation request
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub client_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub skills: Vec<String>,
}

/// New milestone fields
#[derive(Debug, Clone)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub amount: i64,
    pub due_date: Option<chrono::DateTime<Utc>>,
}

/// Evidence submission request
#[derive(Debug, Clone)]
pub struct SubmitEvidenceRequest {
    pub job_id: Uuid,
    pub milestone_index: usize,
    pub freelancer_id: Uuid,
    pub evidence: Vec<String>,
}

/// Reviewer assignment request
#[derive(Debug, Clone)]
pub struct AssignReviewersRequest {
    pub job_id: Uuid,
    pub milestone_index: usize,
    pub client_id: Uuid,
    pub reviewer_ids: Vec<Uuid>,
}

/// Vote casting request
#[derive(Debug, Clone)]
pub struct CastVoteRequest {
    pub job_id: Uuid,
    pub milestone_index: usize,
    pub reviewer_id: Uuid,
    pub verdict: Verdict,
    pub feedback: String,
}

/// Fund release request
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub job_id: Uuid,
    pub milestone_index: usize,
    pub client_id: Uuid,
}

/// Main workflow façade coordinating the escrow lifecycle
pub struct EscrowWorkflow {
    config: WorkflowConfig,
    store: Arc<dyn JobStore>,
    identity: Arc<dyn IdentityProvider>,
    ledger: Arc<dyn LedgerClient>,
    notifier: Arc<dyn Notifier>,
    /// Per-job serialization locks, created lazily per job id
    job_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EscrowWorkflow {
    pub fn new(
        config: WorkflowConfig,
        store: Arc<dyn JobStore>,
        identity: Arc<dyn IdentityProvider>,
        ledger: Arc<dyn LedgerClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            identity,
            ledger,
            notifier,
            job_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new job in Draft
    pub async fn create_job(&self, request: CreateJobRequest) -> WorkflowResult<Job> {
        info!("Creating job: {}", request.title);

        if request.title.trim().is_empty() {
            return Err(WorkflowError::invalid("job title cannot be empty"));
        }

        let job = Job::new(
            request.client_id,
            request.title,
            request.description,
            request.skills,
        );
        self.store.insert(job.clone()).await?;

        self.notify_best_effort(
            job.client_id,
            Notification::JobCreated {
                job_id: job.id,
                title: job.title.clone(),
            },
        )
        .await;

        info!("Created job: {}", job.id);

        Ok(job)
    }

    /// Load a job projection
    pub async fn get_job(&self, job_id: Uuid) -> WorkflowResult<Job> {
        Ok(self.store.load(job_id).await?.job)
    }

    /// List jobs where the user is the client or the freelancer
    pub async fn list_jobs_for(&self, user_id: Uuid) -> WorkflowResult<Vec<Job>> {
        self.store.list_for(user_id).await
    }

    /// Delete a job while it is still in Draft
    pub async fn delete_job(&self, job_id: Uuid, client_id: Uuid) -> WorkflowResult<()> {
        let lock = self.job_lock(job_id).await;
        let _guard = lock.lock().await;

        let VersionedJob { job, .. } = self.store.load(job_id).await?;
        Self::require_client(&job, client_id)?;
        job.ensure_removable()?;

        self.store.delete(job_id).await?;
        info!("Deleted job: {}", job_id);

        Ok(())
    }

    /// Append a milestone to a Draft job
    pub async fn add_milestone(
        &self,
        job_id: Uuid,
        client_id: Uuid,
        milestone: NewMilestone,
    ) -> WorkflowResult<Job> {
        self.validate_milestone_input(&milestone.title, milestone.amount)?;

        self.with_job_mut(job_id, |job| {
            Self::require_client(job, client_id)?;
            job.add_milestone(Milestone::new(
                milestone.title.clone(),
                milestone.description.clone(),
                milestone.amount,
                milestone.due_date,
            ))
        })
        .await
    }

    /// Patch milestone fields on a Draft or InProgress job
    pub async fn update_milestone(
        &self,
        job_id: Uuid,
        client_id: Uuid,
        milestone_index: usize,
        patch: MilestonePatch,
    ) -> WorkflowResult<Job> {
        if let Some(amount) = patch.amount {
            if amount <= 0 {
                return Err(WorkflowError::invalid("milestone amount must be positive"));
            }
            if amount > self.config.max_milestone_amount {
                return Err(WorkflowError::invalid(format!(
                    "milestone amount {} exceeds maximum {}",
                    amount, self.config.max_milestone_amount
                )));
            }
        }

        self.with_job_mut(job_id, |job| {
            Self::require_client(job, client_id)?;
            job.update_milestone(milestone_index, patch.clone())
        })
        .await
    }

    /// Attach a freelancer and move the job to InProgress
    pub async fn activate(
        &self,
        job_id: Uuid,
        client_id: Uuid,
        freelancer_id: Uuid,
    ) -> WorkflowResult<Job> {
        info!("Activating job {} with freelancer {}", job_id, freelancer_id);

        // NotFound propagates unchanged; a wrong role is a validation error
        let role = self.identity.resolve_role(freelancer_id).await?;
        if role != Role::Freelancer {
            return Err(WorkflowError::invalid(format!(
                "user {} does not hold the Freelancer role",
                freelancer_id
            )));
        }

        let job = self
            .with_job_mut(job_id, |job| {
                Self::require_client(job, client_id)?;
                job.activate(freelancer_id)
            })
            .await?;

        self.notify_best_effort(
            freelancer_id,
            Notification::JobAssigned {
                job_id: job.id,
                title: job.title.clone(),
                freelancer_id,
            },
        )
        .await;

        Ok(job)
    }

    /// Explicit status change to Completed once every milestone is released
    pub async fn complete_job(&self, job_id: Uuid, client_id: Uuid) -> WorkflowResult<Job> {
        self.with_job_mut(job_id, |job| {
            Self::require_client(job, client_id)?;
            job.complete()
        })
        .await
    }

    /// Submit evidence for a milestone (freelancer)
    pub async fn submit_evidence(&self, request: SubmitEvidenceRequest) -> WorkflowResult<Job> {
        info!(
            "Submitting evidence for milestone {} of job {}",
            request.milestone_index, request.job_id
        );
        Self::validate_evidence(&request.evidence)?;

        let job = self
            .with_job_mut(request.job_id, |job| {
                job.submit_evidence(
                    request.milestone_index,
                    request.freelancer_id,
                    request.evidence.clone(),
                )
            })
            .await?;

        // Audit mirror, never on the critical path
        self.mirror_best_effort(
            "submit_work",
            self.ledger
                .submit_work(
                    request.job_id,
                    request.milestone_index,
                    &evidence_digest(&request.evidence),
                )
                .await,
        )
        .await;

        let milestone_title = job.milestone(request.milestone_index)?.title.clone();
        self.notify_best_effort(
            job.client_id,
            Notification::MilestoneSubmitted {
                job_id: job.id,
                milestone_index: request.milestone_index,
                milestone_title,
            },
        )
        .await;

        Ok(job)
    }

    /// Assign the reviewer set for a milestone (client, one-shot)
    pub async fn assign_reviewers(&self, request: AssignReviewersRequest) -> WorkflowResult<Job> {
        info!(
            "Assigning {} reviewers to milestone {} of job {}",
            request.reviewer_ids.len(),
            request.milestone_index,
            request.job_id
        );

        if request.reviewer_ids.is_empty() {
            return Err(WorkflowError::invalid("reviewer set cannot be empty"));
        }
        for (i, id) in request.reviewer_ids.iter().enumerate() {
            if request.reviewer_ids[..i].contains(id) {
                return Err(WorkflowError::invalid(format!(
                    "duplicate reviewer {}",
                    id
                )));
            }
        }

        // The entire set is validated before any assignment
        for reviewer_id in &request.reviewer_ids {
            match self.identity.resolve_role(*reviewer_id).await {
                Ok(Role::Reviewer) => {}
                Ok(_) | Err(WorkflowError::NotFound(_)) => {
                    return Err(WorkflowError::invalid(format!(
                        "user {} does not hold the Reviewer role",
                        reviewer_id
                    )));
                }
                Err(err) => return Err(err),
            }
        }

        let job = self
            .with_job_mut(request.job_id, |job| {
                job.assign_reviewers(
                    request.milestone_index,
                    request.client_id,
                    request.reviewer_ids.clone(),
                )
            })
            .await?;

        self.mirror_best_effort(
            "assign_reviewers",
            self.ledger
                .assign_reviewers(request.job_id, request.milestone_index, &request.reviewer_ids)
                .await,
        )
        .await;

        let milestone_title = job.milestone(request.milestone_index)?.title.clone();
        for reviewer_id in &request.reviewer_ids {
            self.notify_best_effort(
                *reviewer_id,
                Notification::ReviewerAssigned {
                    job_id: job.id,
                    milestone_index: request.milestone_index,
                    milestone_title: milestone_title.clone(),
                },
            )
            .await;
        }

        Ok(job)
    }

    /// Record a reviewer's verdict on a milestone
    pub async fn cast_vote(&self, request: CastVoteRequest) -> WorkflowResult<(Job, Tally)> {
        info!(
            "Recording {:?} vote from {} on milestone {} of job {}",
            request.verdict, request.reviewer_id, request.milestone_index, request.job_id
        );

        let job = self
            .with_job_mut(request.job_id, |job| {
                voting::cast_vote(
                    job,
                    request.milestone_index,
                    request.reviewer_id,
                    request.verdict,
                    request.feedback.clone(),
                )
                .map(|_| ())
            })
            .await?;

        let milestone = job.milestone(request.milestone_index)?;
        let tally = voting::tally(milestone);
        let milestone_title = milestone.title.clone();

        self.mirror_best_effort(
            "cast_vote",
            self.ledger
                .cast_vote(
                    request.job_id,
                    request.milestone_index,
                    request.verdict == Verdict::Approve,
                    request.reviewer_id,
                )
                .await,
        )
        .await;

        // Informational only, does not gate release
        if tally.full_set_voted() {
            let decided = Notification::MilestoneDecided {
                job_id: job.id,
                milestone_index: request.milestone_index,
                milestone_title,
                approved: tally.approved,
            };
            self.notify_best_effort(job.client_id, decided.clone()).await;
            if let Some(freelancer_id) = job.freelancer_id {
                self.notify_best_effort(freelancer_id, decided).await;
            }
        }

        Ok((job, tally))
    }

    /// Current vote standing for a milestone
    pub async fn tally(&self, job_id: Uuid, milestone_index: usize) -> WorkflowResult<Tally> {
        let job = self.get_job(job_id).await?;
        Ok(voting::tally(job.milestone(milestone_index)?))
    }

    /// Release Gate: settle a milestone's funds exactly once
    ///
    /// The per-job lock spans the quorum check, the ledger call and the
    /// completion write, so a concurrent release of the same milestone
    /// observes `AlreadyReleased` and a concurrent vote cannot produce a
    /// stale tally. On a ledger failure or timeout nothing is persisted.
    pub async fn release(&self, request: ReleaseRequest) -> WorkflowResult<Job> {
        info!(
            "Releasing milestone {} of job {}",
            request.milestone_index, request.job_id
        );

        let lock = self.job_lock(request.job_id).await;
        let _guard = lock.lock().await;

        let VersionedJob { mut job, version } = self.store.load(request.job_id).await?;
        Self::require_client(&job, request.client_id)?;

        let (amount, milestone_title, reviewers) = {
            let milestone = job.milestone(request.milestone_index)?;
            if milestone.is_completed {
                return Err(WorkflowError::AlreadyReleased {
                    job_id: job.id,
                    index: request.milestone_index,
                });
            }
            if job.status != JobStatus::InProgress {
                return Err(WorkflowError::invalid_state(format!(
                    "funds can only be released while job {} is InProgress, current status {:?}",
                    job.id, job.status
                )));
            }
            // Quorum is recomputed fresh from current votes; with no
            // reviewers assigned the client self-certifies
            if !milestone.reviewers.is_empty() {
                let tally = voting::tally(milestone);
                if !tally.approved {
                    return Err(WorkflowError::QuorumNotMet {
                        approvals: tally.approvals,
                        threshold: tally.threshold,
                    });
                }
            }
            (
                milestone.amount,
                milestone.title.clone(),
                milestone.reviewers.clone(),
            )
        };

        let receipt = match tokio::time::timeout(
            self.config.ledger_timeout,
            self.ledger
                .release_funds(request.job_id, request.milestone_index),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                error!(
                    "Ledger release failed for milestone {} of job {}: {}",
                    request.milestone_index, request.job_id, err
                );
                return Err(err);
            }
            Err(_) => {
                error!(
                    "Ledger release timed out for milestone {} of job {}",
                    request.milestone_index, request.job_id
                );
                return Err(WorkflowError::ledger(format!(
                    "release timed out after {:?}",
                    self.config.ledger_timeout
                )));
            }
        };

        job.record_release(
            request.milestone_index,
            receipt.tx_id.clone(),
            receipt.settled_at,
        )?;
        job.updated_at = Utc::now();
        self.store.save(job.clone(), version).await?;

        info!(
            "Released milestone {} of job {} ({})",
            request.milestone_index, request.job_id, receipt.tx_id
        );

        if let Some(freelancer_id) = job.freelancer_id {
            self.notify_best_effort(
                freelancer_id,
                Notification::PaymentReleased {
                    job_id: job.id,
                    milestone_index: request.milestone_index,
                    milestone_title,
                    amount,
                    tx_id: receipt.tx_id,
                },
            )
            .await;
        }
        for reviewer_id in reviewers {
            self.notify_best_effort(
                reviewer_id,
                Notification::ReviewerRewarded {
                    job_id: job.id,
                    milestone_index: request.milestone_index,
                    reward: self.config.reviewer_reward,
                },
            )
            .await;
        }

        Ok(job)
    }

    /// Fetch or create the serialization lock for a job id
    async fn job_lock(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.job_locks.lock().await;
        locks
            .entry(job_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run a load -> mutate -> save cycle under the job's lock
    ///
    /// Version conflicts are retried up to the configured bound; they can
    /// only arise from writers bypassing this façade, since workflow
    /// callers serialize on the per-job lock.
    async fn with_job_mut<F>(&self, job_id: Uuid, mut mutate: F) -> WorkflowResult<Job>
    where
        F: FnMut(&mut Job) -> WorkflowResult<()> + Send,
    {
        let lock = self.job_lock(job_id).await;
        let _guard = lock.lock().await;

        let mut attempts = 0;
        loop {
            let VersionedJob { mut job, version } = self.store.load(job_id).await?;
            mutate(&mut job)?;
            job.updated_at = Utc::now();

            match self.store.save(job.clone(), version).await {
                Ok(_) => return Ok(job),
                Err(WorkflowError::VersionConflict(_))
                    if attempts < self.config.max_save_retries =>
                {
                    attempts += 1;
                    warn!("Version conflict on job {}, retry {}", job_id, attempts);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn require_client(job: &Job, client_id: Uuid) -> WorkflowResult<()> {
        if job.client_id != client_id {
            return Err(WorkflowError::forbidden(format!(
                "user {} is not the client on job {}",
                client_id, job.id
            )));
        }
        Ok(())
    }

    fn validate_milestone_input(&self, title: &str, amount: i64) -> WorkflowResult<()> {
        if title.trim().is_empty() {
            return Err(WorkflowError::invalid("milestone title cannot be empty"));
        }
        if amount <= 0 {
            return Err(WorkflowError::invalid("milestone amount must be positive"));
        }
        if amount > self.config.max_milestone_amount {
            return Err(WorkflowError::invalid(format!(
                "milestone amount {} exceeds maximum {}",
                amount, self.config.max_milestone_amount
            )));
        }
        Ok(())
    }

    fn validate_evidence(evidence: &[String]) -> WorkflowResult<()> {
        if evidence.is_empty() {
            return Err(WorkflowError::invalid("evidence cannot be empty"));
        }
        for url in evidence {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(WorkflowError::invalid(format!(
                    "evidence URL must use HTTP/HTTPS: {}",
                    url
                )));
            }
        }
        Ok(())
    }

    async fn notify_best_effort(&self, recipient: Uuid, notification: Notification) {
        if let Err(err) = self.notifier.notify(recipient, notification).await {
            warn!("Notification delivery to {} failed: {}", recipient, err);
        }
    }

    async fn mirror_best_effort(&self, operation: &str, result: WorkflowResult<()>) {
        if let Err(err) = result {
            warn!("Ledger mirror {} failed: {}", operation, err);
        }
    }
}

/// Opaque digest of the evidence URLs for the ledger audit trail
fn evidence_digest(evidence: &[String]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    for url in evidence {
        url.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
