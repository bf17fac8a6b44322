//! Core data models for the escrow workflow
//!
//! This module contains the Job aggregate, its embedded Milestones and
//! Votes, and the state machine that validates every mutating operation
//! against the current Job/Milestone status.

use crate::WorkflowResult;
use crate::error::WorkflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job created, milestones still editable, no freelancer attached
    Draft,
    /// Freelancer attached, milestones progressing
    InProgress,
    /// Every milestone released
    Completed,
    /// Abandoned before any work started
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if this state allows appending milestones
    pub fn can_add_milestones(&self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Check if this state allows editing milestone fields
    pub fn can_edit_milestones(&self) -> bool {
        matches!(self, Self::Draft | Self::InProgress)
    }

    /// Check if this state allows deleting the job
    pub fn can_delete(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

/// Roles resolved by the external identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Freelancer,
    Reviewer,
}

/// Reviewer verdict on a milestone's evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Approve,
    Reject,
}

/// A reviewer's vote on a milestone
///
/// Exactly one vote exists per reviewer per milestone; re-voting replaces
/// the existing record in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub reviewer_id: Uuid,
    pub verdict: Verdict,
    pub feedback: String,
    pub cast_at: DateTime<Utc>,
}

/// A unit of payable work within a Job, gated by reviewer quorum
///
/// Milestones are owned by exactly one Job and addressed by index; the
/// order is fixed once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub title: String,
    pub description: String,
    /// Amount in minor currency units, always positive
    pub amount: i64,
    pub due_date: Option<DateTime<Utc>>,

    // Completion (set together by the release gate)
    pub is_completed: bool,
    pub completed_date: Option<DateTime<Utc>>,
    pub settlement_tx_id: Option<String>,

    // Review workflow
    /// Evidence URLs, empty until the freelancer submits
    pub evidence: Vec<String>,
    /// Assigned reviewer identities; unique, immutable once assigned
    pub reviewers: Vec<Uuid>,
    pub votes: Vec<Vote>,
}

impl Milestone {
    /// Create a new pending milestone
    pub fn new(
        title: String,
        description: String,
        amount: i64,
        due_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            title,
            description,
            amount,
            due_date,
            is_completed: false,
            completed_date: None,
            settlement_tx_id: None,
            evidence: Vec::new(),
            reviewers: Vec::new(),
            votes: Vec::new(),
        }
    }

    /// Look up a reviewer's existing vote
    pub fn vote_of(&self, reviewer_id: Uuid) -> Option<&Vote> {
        self.votes.iter().find(|v| v.reviewer_id == reviewer_id)
    }
}

/// Partial update for milestone fields; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MilestonePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<i64>,
    pub due_date: Option<DateTime<Utc>>,
}

/// A client-posted engagement decomposed into Milestones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: JobStatus,

    // Parties
    pub client_id: Uuid,
    pub freelancer_id: Option<Uuid>,

    // Milestones (index-addressed, order fixed once created)
    pub milestones: Vec<Milestone>,

    // Money accounting, maintained by every mutation:
    // total_amount == sum of milestone amounts
    // total_paid   == sum of released milestone amounts
    pub total_amount: i64,
    pub total_paid: i64,

    // Metadata
    pub skills: Vec<String>,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in Draft
    pub fn new(
        client_id: Uuid,
        title: String,
        description: Option<String>,
        skills: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description,
            status: JobStatus::Draft,
            client_id,
            freelancer_id: None,
            milestones: Vec::new(),
            total_amount: 0,
            total_paid: 0,
            skills,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Borrow a milestone by index
    pub fn milestone(&self, index: usize) -> WorkflowResult<&Milestone> {
        self.milestones.get(index).ok_or_else(|| {
            WorkflowError::not_found(format!("milestone {} of job {}", index, self.id))
        })
    }

    fn milestone_mut(&mut self, index: usize) -> WorkflowResult<&mut Milestone> {
        let id = self.id;
        self.milestones.get_mut(index).ok_or_else(|| {
            WorkflowError::not_found(format!("milestone {} of job {}", index, id))
        })
    }

    /// Append a milestone while the job is in Draft
    pub fn add_milestone(&mut self, milestone: Milestone) -> WorkflowResult<()> {
        if !self.status.can_add_milestones() {
            return Err(WorkflowError::invalid_state(format!(
                "milestones can only be added while job {} is in Draft, current status {:?}",
                self.id, self.status
            )));
        }

        self.total_amount += milestone.amount;
        self.milestones.push(milestone);

        Ok(())
    }

    /// Patch milestone fields, adjusting the job total on amount changes
    pub fn update_milestone(&mut self, index: usize, patch: MilestonePatch) -> WorkflowResult<()> {
        // Existence before status, so a bad index always reads as NotFound
        self.milestone(index)?;
        if !self.status.can_edit_milestones() {
            return Err(WorkflowError::invalid_state(format!(
                "milestones of job {} are not editable in status {:?}",
                self.id, self.status
            )));
        }

        let milestone = self.milestone_mut(index)?;
        if milestone.is_completed {
            return Err(WorkflowError::invalid_state(format!(
                "milestone {} is already released and can no longer be edited",
                index
            )));
        }

        let mut amount_delta = 0;
        if let Some(amount) = patch.amount {
            amount_delta = amount - milestone.amount;
            milestone.amount = amount;
        }
        if let Some(title) = patch.title {
            milestone.title = title;
        }
        if let Some(description) = patch.description {
            milestone.description = description;
        }
        if let Some(due_date) = patch.due_date {
            milestone.due_date = Some(due_date);
        }

        self.total_amount += amount_delta;

        Ok(())
    }

    /// Attach a freelancer and move the job to InProgress
    ///
    /// Freelancer eligibility (existence + Freelancer role) is validated by
    /// the workflow before this is called.
    pub fn activate(&mut self, freelancer_id: Uuid) -> WorkflowResult<()> {
        if self.status != JobStatus::Draft {
            return Err(WorkflowError::invalid_state(format!(
                "job {} cannot be activated from status {:?}",
                self.id, self.status
            )));
        }

        self.freelancer_id = Some(freelancer_id);
        self.status = JobStatus::InProgress;

        Ok(())
    }

    /// Explicit status change to Completed
    pub fn complete(&mut self) -> WorkflowResult<()> {
        if self.status != JobStatus::InProgress {
            return Err(WorkflowError::invalid_state(format!(
                "job {} cannot be completed from status {:?}",
                self.id, self.status
            )));
        }
        if !self.all_milestones_completed() {
            return Err(WorkflowError::invalid_state(format!(
                "job {} still has unreleased milestones",
                self.id
            )));
        }

        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());

        Ok(())
    }

    /// Check the job may be deleted (Draft only)
    pub fn ensure_removable(&self) -> WorkflowResult<()> {
        if !self.status.can_delete() {
            return Err(WorkflowError::invalid_state(format!(
                "job {} can only be deleted while in Draft, current status {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Replace a milestone's evidence (freelancer submission)
    pub fn submit_evidence(
        &mut self,
        index: usize,
        freelancer_id: Uuid,
        evidence: Vec<String>,
    ) -> WorkflowResult<()> {
        if self.status != JobStatus::InProgress {
            return Err(WorkflowError::invalid_state(format!(
                "evidence can only be submitted while job {} is InProgress, current status {:?}",
                self.id, self.status
            )));
        }
        if self.freelancer_id != Some(freelancer_id) {
            return Err(WorkflowError::forbidden(format!(
                "user {} is not the freelancer on job {}",
                freelancer_id, self.id
            )));
        }

        let milestone = self.milestone_mut(index)?;
        if milestone.is_completed {
            return Err(WorkflowError::invalid_state(format!(
                "milestone {} is already released",
                index
            )));
        }

        milestone.evidence = evidence;

        Ok(())
    }

    /// Assign the reviewer set for a milestone (one-shot)
    ///
    /// Reviewer role eligibility is validated for the entire set by the
    /// workflow before this is called.
    pub fn assign_reviewers(
        &mut self,
        index: usize,
        client_id: Uuid,
        reviewer_ids: Vec<Uuid>,
    ) -> WorkflowResult<()> {
        if self.client_id != client_id {
            return Err(WorkflowError::forbidden(format!(
                "user {} is not the client on job {}",
                client_id, self.id
            )));
        }
        if self.status != JobStatus::InProgress {
            return Err(WorkflowError::invalid_state(format!(
                "reviewers can only be assigned while job {} is InProgress, current status {:?}",
                self.id, self.status
            )));
        }

        let milestone = self.milestone_mut(index)?;
        if milestone.is_completed {
            return Err(WorkflowError::invalid_state(format!(
                "milestone {} is already released",
                index
            )));
        }
        if !milestone.reviewers.is_empty() {
            // Reviewer set is immutable once assigned
            return Err(WorkflowError::invalid_state(format!(
                "milestone {} already has reviewers assigned",
                index
            )));
        }
        if milestone.evidence.is_empty() {
            return Err(WorkflowError::invalid(format!(
                "milestone {} has no submitted evidence",
                index
            )));
        }

        milestone.reviewers = reviewer_ids;

        Ok(())
    }

    /// Record a successful ledger settlement for a milestone
    ///
    /// Sets completion fields atomically with the paid total, and moves the
    /// job to Completed once every milestone is released. Only the release
    /// gate calls this, after the ledger transfer succeeded.
    pub fn record_release(
        &mut self,
        index: usize,
        settlement_tx_id: String,
        settled_at: DateTime<Utc>,
    ) -> WorkflowResult<()> {
        let milestone = self.milestone_mut(index)?;
        let amount = milestone.amount;

        milestone.is_completed = true;
        milestone.completed_date = Some(settled_at);
        milestone.settlement_tx_id = Some(settlement_tx_id);

        self.total_paid += amount;

        if self.all_milestones_completed() {
            self.status = JobStatus::Completed;
            self.completed_at = Some(settled_at);
        }

        Ok(())
    }

    /// Check whether every milestone has been released
    pub fn all_milestones_completed(&self) -> bool {
        !self.milestones.is_empty() && self.milestones.iter().all(|m| m.is_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_job() -> Job {
        Job::new(
            Uuid::new_v4(),
            "Build a website".to_string(),
            Some("Landing page plus CMS".to_string()),
            vec!["rust".to_string(), "web".to_string()],
        )
    }

    fn milestone(amount: i64) -> Milestone {
        Milestone::new("Design".to_string(), "Mockups".to_string(), amount, None)
    }

    #[test]
    fn test_add_milestone_updates_total() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.add_milestone(milestone(250)).unwrap();

        assert_eq!(job.total_amount, 350);
        assert_eq!(job.milestones.len(), 2);
        assert_eq!(
            job.total_amount,
            job.milestones.iter().map(|m| m.amount).sum::<i64>()
        );
    }

    #[test]
    fn test_add_milestone_rejected_outside_draft() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.activate(Uuid::new_v4()).unwrap();

        let result = job.add_milestone(milestone(50));
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
        assert_eq!(job.total_amount, 100);
    }

    #[test]
    fn test_update_milestone_adjusts_total_by_delta() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.add_milestone(milestone(200)).unwrap();

        job.update_milestone(
            1,
            MilestonePatch {
                amount: Some(500),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(job.milestones[1].amount, 500);
        assert_eq!(job.total_amount, 600);
    }

    #[test]
    fn test_update_milestone_bad_index() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();

        let result = job.update_milestone(5, MilestonePatch::default());
        assert!(matches!(result, Err(WorkflowError::NotFound(_))));
    }

    #[test]
    fn test_activate_only_from_draft() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.activate(Uuid::new_v4()).unwrap();
        assert_eq!(job.status, JobStatus::InProgress);

        let result = job.activate(Uuid::new_v4());
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_submit_evidence_guards() {
        let freelancer = Uuid::new_v4();
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();

        // Draft job rejects evidence
        let result = job.submit_evidence(0, freelancer, vec!["https://x.test/a".to_string()]);
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));

        job.activate(freelancer).unwrap();

        // Wrong freelancer rejected
        let result = job.submit_evidence(0, Uuid::new_v4(), vec!["https://x.test/a".to_string()]);
        assert!(matches!(result, Err(WorkflowError::Forbidden(_))));

        job.submit_evidence(0, freelancer, vec!["https://x.test/a".to_string()])
            .unwrap();
        assert_eq!(job.milestones[0].evidence.len(), 1);

        // Released milestone rejects resubmission
        job.record_release(0, "tx-1".to_string(), Utc::now()).unwrap();
        let result = job.submit_evidence(0, freelancer, vec!["https://x.test/b".to_string()]);
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_submit_evidence_on_draft_is_invalid_state_for_own_freelancer() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        let freelancer = Uuid::new_v4();
        job.freelancer_id = Some(freelancer);

        let result = job.submit_evidence(0, freelancer, vec!["https://x.test/a".to_string()]);
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_assign_reviewers_requires_evidence() {
        let freelancer = Uuid::new_v4();
        let mut job = draft_job();
        let client = job.client_id;
        job.add_milestone(milestone(100)).unwrap();
        job.activate(freelancer).unwrap();

        let result = job.assign_reviewers(0, client, vec![Uuid::new_v4()]);
        assert!(matches!(result, Err(WorkflowError::Invalid(_))));

        job.submit_evidence(0, freelancer, vec!["https://x.test/a".to_string()])
            .unwrap();
        job.assign_reviewers(0, client, vec![Uuid::new_v4()]).unwrap();

        // Reviewer set is one-shot
        let result = job.assign_reviewers(0, client, vec![Uuid::new_v4()]);
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_record_release_accounting_and_completion() {
        let freelancer = Uuid::new_v4();
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.add_milestone(milestone(200)).unwrap();
        job.activate(freelancer).unwrap();

        job.record_release(0, "tx-1".to_string(), Utc::now()).unwrap();
        assert_eq!(job.total_paid, 100);
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.milestones[0].is_completed);
        assert!(job.milestones[0].completed_date.is_some());
        assert_eq!(job.milestones[0].settlement_tx_id.as_deref(), Some("tx-1"));

        job.record_release(1, "tx-2".to_string(), Utc::now()).unwrap();
        assert_eq!(job.total_paid, 300);
        assert_eq!(job.total_paid, job.total_amount);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_complete_requires_all_released() {
        let mut job = draft_job();
        job.add_milestone(milestone(100)).unwrap();
        job.activate(Uuid::new_v4()).unwrap();

        let result = job.complete();
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_ensure_removable_only_in_draft() {
        let mut job = draft_job();
        assert!(job.ensure_removable().is_ok());

        job.add_milestone(milestone(100)).unwrap();
        job.activate(Uuid::new_v4()).unwrap();
        assert!(matches!(
            job.ensure_removable(),
            Err(WorkflowError::InvalidState(_))
        ));
    }
}
