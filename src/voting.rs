//! Quorum Voting Engine - Records reviewer verdicts and computes approval
//!
//! The threshold is computed against the number of assigned reviewers, not
//! the number of votes cast, so a milestone can be decided before every
//! reviewer has responded (early decision): one side wins as soon as its
//! count is unreachable for the other side to overturn.

use crate::WorkflowResult;
use crate::error::WorkflowError;
use crate::models::{Job, JobStatus, Milestone, Verdict, Vote};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of a milestone's vote standing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Count of approve votes cast so far
    pub approvals: usize,
    /// Count of reject votes cast so far
    pub rejections: usize,
    /// Approvals required: ceil(assigned reviewers / 2)
    pub threshold: usize,
    /// Total votes cast so far
    pub votes_cast: usize,
    /// Number of assigned reviewers
    pub reviewers: usize,
    /// One side has reached an unreachable-to-overturn count
    pub decided: bool,
    /// Approvals reached the threshold
    pub approved: bool,
}

impl Tally {
    /// True once every assigned reviewer has voted
    pub fn full_set_voted(&self) -> bool {
        self.reviewers > 0 && self.votes_cast == self.reviewers
    }
}

/// Compute the current tally for a milestone
///
/// Recomputed fresh on every call; nothing here is cached.
pub fn tally(milestone: &Milestone) -> Tally {
    let reviewers = milestone.reviewers.len();
    // ceil(reviewers / 2)
    let threshold = reviewers.div_ceil(2);

    let approvals = milestone
        .votes
        .iter()
        .filter(|v| v.verdict == Verdict::Approve)
        .count();
    let rejections = milestone
        .votes
        .iter()
        .filter(|v| v.verdict == Verdict::Reject)
        .count();

    let approved = approvals >= threshold;
    // Enough rejections that the approval threshold can no longer be reached
    let rejected = rejections >= reviewers - threshold + 1;

    Tally {
        approvals,
        rejections,
        threshold,
        votes_cast: milestone.votes.len(),
        reviewers,
        decided: approved || rejected,
        approved,
    }
}

/// Record a reviewer's verdict on a milestone
///
/// Re-voting is permitted up to the moment funds are released: an existing
/// vote from the same reviewer is replaced in place, never appended twice.
pub fn cast_vote(
    job: &mut Job,
    index: usize,
    reviewer_id: Uuid,
    verdict: Verdict,
    feedback: String,
) -> WorkflowResult<Tally> {
    if job.status != JobStatus::InProgress {
        return Err(WorkflowError::invalid_state(format!(
            "votes can only be cast while job {} is InProgress, current status {:?}",
            job.id, job.status
        )));
    }

    let job_id = job.id;
    let milestone = job
        .milestones
        .get_mut(index)
        .ok_or_else(|| WorkflowError::not_found(format!("milestone {} of job {}", index, job_id)))?;

    if milestone.is_completed {
        return Err(WorkflowError::invalid_state(format!(
            "milestone {} is already released",
            index
        )));
    }
    if !milestone.reviewers.contains(&reviewer_id) {
        return Err(WorkflowError::forbidden(format!(
            "user {} is not an assigned reviewer on milestone {}",
            reviewer_id, index
        )));
    }

    let vote = Vote {
        reviewer_id,
        verdict,
        feedback,
        cast_at: Utc::now(),
    };

    match milestone
        .votes
        .iter_mut()
        .find(|v| v.reviewer_id == reviewer_id)
    {
        Some(existing) => *existing = vote,
        None => milestone.votes.push(vote),
    }

    Ok(tally(milestone))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Milestone;

    fn reviewed_job(reviewer_count: usize) -> (Job, Vec<Uuid>) {
        let reviewers: Vec<Uuid> = (0..reviewer_count).map(|_| Uuid::new_v4()).collect();
        let mut job = Job::new(Uuid::new_v4(), "Job".to_string(), None, vec![]);
        let mut milestone =
            Milestone::new("M1".to_string(), "work".to_string(), 100, None);
        milestone.evidence = vec!["https://x.test/proof".to_string()];
        milestone.reviewers = reviewers.clone();
        job.add_milestone(milestone).unwrap();
        job.activate(Uuid::new_v4()).unwrap();
        (job, reviewers)
    }

    #[test]
    fn test_threshold_is_ceil_half() {
        for (reviewers, expected) in [(1usize, 1usize), (2, 1), (3, 2), (4, 2), (5, 3)] {
            let (job, _) = reviewed_job(reviewers);
            assert_eq!(tally(job.milestone(0).unwrap()).threshold, expected);
        }
    }

    #[test]
    fn test_early_majority_approval_two_of_three() {
        let (mut job, reviewers) = reviewed_job(3);

        let t = cast_vote(&mut job, 0, reviewers[0], Verdict::Approve, "ok".into()).unwrap();
        assert!(!t.decided);

        let t = cast_vote(&mut job, 0, reviewers[1], Verdict::Approve, "ok".into()).unwrap();
        assert!(t.decided);
        assert!(t.approved);
        assert_eq!(t.approvals, 2);
        assert_eq!(t.votes_cast, 2);
        assert!(!t.full_set_voted());
    }

    #[test]
    fn test_early_majority_rejection_two_of_three() {
        let (mut job, reviewers) = reviewed_job(3);

        cast_vote(&mut job, 0, reviewers[0], Verdict::Reject, "no".into()).unwrap();
        let t = cast_vote(&mut job, 0, reviewers[1], Verdict::Reject, "no".into()).unwrap();

        // threshold 2 of 3: two rejections leave only one possible approval
        assert!(t.decided);
        assert!(!t.approved);
    }

    #[test]
    fn test_undecided_with_split_votes_of_four() {
        let (mut job, reviewers) = reviewed_job(4);

        cast_vote(&mut job, 0, reviewers[0], Verdict::Approve, "ok".into()).unwrap();
        let t = cast_vote(&mut job, 0, reviewers[1], Verdict::Reject, "no".into()).unwrap();

        // threshold 2 of 4, rejection needs 3: neither side has settled it
        assert!(!t.decided);
        assert!(!t.approved);
    }

    #[test]
    fn test_revote_replaces_in_place() {
        let (mut job, reviewers) = reviewed_job(3);

        cast_vote(&mut job, 0, reviewers[0], Verdict::Reject, "weak".into()).unwrap();
        let t = cast_vote(&mut job, 0, reviewers[0], Verdict::Approve, "fixed".into()).unwrap();

        let milestone = job.milestone(0).unwrap();
        assert_eq!(milestone.votes.len(), 1);
        assert_eq!(milestone.votes[0].verdict, Verdict::Approve);
        assert_eq!(milestone.votes[0].feedback, "fixed");
        assert_eq!(t.approvals, 1);
        assert_eq!(t.rejections, 0);
    }

    #[test]
    fn test_unassigned_reviewer_is_forbidden() {
        let (mut job, _) = reviewed_job(3);

        let result = cast_vote(&mut job, 0, Uuid::new_v4(), Verdict::Approve, "hi".into());
        assert!(matches!(result, Err(WorkflowError::Forbidden(_))));
    }

    #[test]
    fn test_vote_rejected_after_release() {
        let (mut job, reviewers) = reviewed_job(3);
        job.record_release(0, "tx-1".to_string(), Utc::now()).unwrap();

        let result = cast_vote(&mut job, 0, reviewers[0], Verdict::Approve, "late".into());
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
    }

    #[test]
    fn test_full_set_voted() {
        let (mut job, reviewers) = reviewed_job(3);

        cast_vote(&mut job, 0, reviewers[0], Verdict::Approve, "".into()).unwrap();
        cast_vote(&mut job, 0, reviewers[1], Verdict::Reject, "".into()).unwrap();
        let t = cast_vote(&mut job, 0, reviewers[2], Verdict::Approve, "".into()).unwrap();

        assert!(t.full_set_voted());
        assert!(t.decided);
        assert!(t.approved);
    }
}
