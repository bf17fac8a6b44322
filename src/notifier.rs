//! Notifier - Typed event delivery to workflow participants
//!
//! Notifications are fire-and-forget from the workflow's perspective:
//! delivery failures are logged and swallowed, never failing the operation
//! that produced them. At-least-once delivery is acceptable.

use crate::WorkflowResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Typed workflow event delivered to a specific recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    JobCreated {
        job_id: Uuid,
        title: String,
    },
    JobAssigned {
        job_id: Uuid,
        title: String,
        freelancer_id: Uuid,
    },
    MilestoneSubmitted {
        job_id: Uuid,
        milestone_index: usize,
        milestone_title: String,
    },
    ReviewerAssigned {
        job_id: Uuid,
        milestone_index: usize,
        milestone_title: String,
    },
    MilestoneDecided {
        job_id: Uuid,
        milestone_index: usize,
        milestone_title: String,
        approved: bool,
    },
    PaymentReleased {
        job_id: Uuid,
        milestone_index: usize,
        milestone_title: String,
        amount: i64,
        tx_id: String,
    },
    ReviewerRewarded {
        job_id: Uuid,
        milestone_index: usize,
        reward: i64,
    },
}

impl Notification {
    /// Stable event name for delivery channels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::JobAssigned { .. } => "job.assigned",
            Self::MilestoneSubmitted { .. } => "milestone.submitted",
            Self::ReviewerAssigned { .. } => "reviewer.assigned",
            Self::MilestoneDecided { .. } => "milestone.decided",
            Self::PaymentReleased { .. } => "payment.released",
            Self::ReviewerRewarded { .. } => "reviewer.rewarded",
        }
    }
}

/// External notification delivery collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: Uuid, notification: Notification) -> WorkflowResult<()>;
}

/// Notifier that only logs events, for embedders without push delivery
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: Uuid, notification: Notification) -> WorkflowResult<()> {
        info!(
            "Notification {} for {}: {}",
            notification.kind(),
            recipient,
            serde_json::to_string(&notification)?
        );
        Ok(())
    }
}

/// Recording notifier for tests
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<(Uuid, Notification)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of every delivered (recipient, notification) pair
    pub async fn sent(&self) -> Vec<(Uuid, Notification)> {
        self.sent.read().await.clone()
    }

    /// Notifications delivered to one recipient
    pub async fn sent_to(&self, recipient: Uuid) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|(r, _)| *r == recipient)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: Uuid, notification: Notification) -> WorkflowResult<()> {
        self.sent.write().await.push((recipient, notification));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier_filters_by_recipient() {
        let notifier = RecordingNotifier::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        notifier
            .notify(
                alice,
                Notification::JobCreated {
                    job_id,
                    title: "Job".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(notifier.sent_to(alice).await.len(), 1);
        assert!(notifier.sent_to(bob).await.is_empty());
    }

    #[test]
    fn test_notification_kinds_are_stable() {
        let n = Notification::PaymentReleased {
            job_id: Uuid::new_v4(),
            milestone_index: 0,
            milestone_title: "M".to_string(),
            amount: 100,
            tx_id: "tx-1".to_string(),
        };
        assert_eq!(n.kind(), "payment.released");
    }
}
