//! Milestone escrow workflow for client/freelancer engagements
//!
//! This crate implements the escrow core of a freelance marketplace:
//! - a Job/Milestone state machine guarding every lifecycle transition
//! - reviewer quorum voting with early-decision resolution
//! - a release gate that settles each milestone exactly once against an
//!   external settlement ledger
//!
//! Storage, identity resolution, settlement and notification delivery are
//! external collaborators behind traits; in-memory implementations are
//! provided for tests and embedders.

pub mod error;
pub mod identity;
pub mod ledger;
pub mod models;
pub mod notifier;
pub mod store;
pub mod voting;
pub mod workflow;

use error::WorkflowError;

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
