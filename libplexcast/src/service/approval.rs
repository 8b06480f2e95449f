//! Approval service
//!
//! Loads the draft, runs the approval gate and persists the decision. An
//! approval is written together with the queue fan-out, so a draft is never
//! observed as approved without its items.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::events::{Event, EventBus};
use super::validation::ValidationService;
use crate::approval::{self, ApprovalCommand, ApprovalOutcome, Approve, Reject};
use crate::error::{PlexcastError, Result};
use crate::integrations::IntegrationRegistry;
use crate::scheduler::PublishScheduler;
use crate::store::Store;
use crate::types::{DraftStatus, SocialDraft};

#[derive(Clone)]
pub struct ApprovalService {
    store: Arc<dyn Store>,
    scheduler: PublishScheduler,
    integrations: IntegrationRegistry,
    events: EventBus,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: PublishScheduler,
        integrations: IntegrationRegistry,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            scheduler,
            integrations,
            events,
        }
    }

    /// Approve a pending draft and fan it out
    ///
    /// Integrations are checked again since they may have expired while the
    /// draft waited for review.
    pub async fn approve(&self, command: Approve, now: DateTime<Utc>) -> Result<SocialDraft> {
        let mut draft = self.load(&command.draft_id).await?;
        let command = ApprovalCommand::from(command);
        approval::decide(&mut draft, &command, now)?;

        ValidationService::new()
            .ensure_connected(&self.integrations, &draft.owner_id, &draft.platforms)
            .await?;

        let (draft, _items) = self
            .scheduler
            .enqueue(draft, DraftStatus::PendingApproval, now)
            .await?;

        info!(
            "Draft {} approved by {}",
            draft.id,
            command.actor().user_id
        );
        Ok(draft)
    }

    /// Send a pending draft back to its author
    pub async fn reject(&self, command: Reject, now: DateTime<Utc>) -> Result<SocialDraft> {
        let mut draft = self.load(&command.draft_id).await?;
        let command = ApprovalCommand::from(command);
        let outcome = approval::decide(&mut draft, &command, now)?;
        debug_assert_eq!(outcome, ApprovalOutcome::Rejected);

        if !self
            .store
            .update_draft_if(&draft, DraftStatus::PendingApproval)
            .await?
        {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} changed while rejecting",
                draft.id
            )));
        }

        info!(
            "Draft {} rejected by {}: {}",
            draft.id,
            command.actor().user_id,
            draft.rejection_reason.as_deref().unwrap_or_default()
        );
        self.events.emit(Event::DraftStatusChanged {
            draft_id: draft.id.clone(),
            from: DraftStatus::PendingApproval,
            to: DraftStatus::Draft,
        });
        Ok(draft)
    }

    async fn load(&self, id: &str) -> Result<SocialDraft> {
        self.store
            .get_draft(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Draft {}", id)))
    }
}
