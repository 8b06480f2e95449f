//! Approval gate
//!
//! A pure decision over explicit commands. The gate never touches storage;
//! it checks the actor and the draft, applies the transition to the draft
//! value and reports the outcome. Persisting the result (and fanning out an
//! approved draft) is the caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PlexcastError, Result};
use crate::types::{Actor, DraftStatus, SocialDraft};

/// Approve a draft waiting for review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approve {
    pub draft_id: String,
    pub actor: Actor,
}

/// Send a draft back to its author with a reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reject {
    pub draft_id: String,
    pub actor: Actor,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalCommand {
    Approve(Approve),
    Reject(Reject),
}

impl ApprovalCommand {
    pub fn draft_id(&self) -> &str {
        match self {
            ApprovalCommand::Approve(c) => &c.draft_id,
            ApprovalCommand::Reject(c) => &c.draft_id,
        }
    }

    pub fn actor(&self) -> &Actor {
        match self {
            ApprovalCommand::Approve(c) => &c.actor,
            ApprovalCommand::Reject(c) => &c.actor,
        }
    }
}

impl From<Approve> for ApprovalCommand {
    fn from(command: Approve) -> Self {
        ApprovalCommand::Approve(command)
    }
}

impl From<Reject> for ApprovalCommand {
    fn from(command: Reject) -> Self {
        ApprovalCommand::Reject(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    /// No review required; the draft went straight to `approved`
    AutoApproved,
    /// The draft now waits in `pending_approval`
    NeedsHuman,
    Approved,
    Rejected,
}

/// Route a freshly submitted draft through the gate
///
/// The draft must be in `draft`. It ends in `approved` or
/// `pending_approval`; a previous rejection reason is cleared.
pub fn submit(draft: &mut SocialDraft, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
    if draft.status != DraftStatus::Draft {
        return Err(PlexcastError::InvalidState(format!(
            "Draft {} is {}, only drafts in draft can be submitted",
            draft.id, draft.status
        )));
    }

    draft.rejection_reason = None;

    if draft.requires_approval {
        draft.transition(DraftStatus::PendingApproval, now)?;
        Ok(ApprovalOutcome::NeedsHuman)
    } else {
        draft.transition(DraftStatus::Approved, now)?;
        draft.approved_at = Some(now);
        Ok(ApprovalOutcome::AutoApproved)
    }
}

/// Apply an approve or reject command to `draft`
///
/// # Errors
///
/// - `Validation` if the command names another draft or a rejection has no reason
/// - `Permission` if the actor may not approve
/// - `InvalidState` if the draft is not waiting for approval
pub fn decide(
    draft: &mut SocialDraft,
    command: &ApprovalCommand,
    now: DateTime<Utc>,
) -> Result<ApprovalOutcome> {
    if command.draft_id() != draft.id {
        return Err(PlexcastError::Validation(format!(
            "Command targets draft {}, not {}",
            command.draft_id(),
            draft.id
        )));
    }

    let actor = command.actor();
    if !actor.can_approve {
        return Err(PlexcastError::Permission(format!(
            "{} is not allowed to review drafts",
            actor.user_id
        )));
    }

    if draft.status != DraftStatus::PendingApproval {
        return Err(PlexcastError::InvalidState(format!(
            "Draft {} is {}, not pending_approval",
            draft.id, draft.status
        )));
    }

    match command {
        ApprovalCommand::Approve(approve) => {
            draft.transition(DraftStatus::Approved, now)?;
            draft.approved_at = Some(now);
            draft.approved_by = Some(approve.actor.user_id.clone());
            draft.rejection_reason = None;
            Ok(ApprovalOutcome::Approved)
        }
        ApprovalCommand::Reject(reject) => {
            let reason = reject.reason.trim();
            if reason.is_empty() {
                return Err(PlexcastError::Validation(
                    "A rejection needs a reason".to_string(),
                ));
            }
            draft.transition(DraftStatus::Draft, now)?;
            draft.rejection_reason = Some(reason.to_string());
            draft.approved_at = None;
            draft.approved_by = None;
            Ok(ApprovalOutcome::Rejected)
        }
    }
}
