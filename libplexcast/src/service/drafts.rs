//! Draft service for composing and submitting drafts
//!
//! Drafts are editable only while in `draft`. Submitting runs validation,
//! checks the owner's integrations and routes the draft through the approval
//! gate; auto-approved drafts are fanned out to the queue in the same step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::events::{Event, EventBus};
use super::validation::{ValidationRequest, ValidationService};
use crate::approval::{self, ApprovalOutcome};
use crate::error::{PlexcastError, Result};
use crate::integrations::IntegrationRegistry;
use crate::platforms::PlatformId;
use crate::scheduler::PublishScheduler;
use crate::store::{DraftFilter, Store};
use crate::types::{dedup_platforms, Actor, DraftStatus, MediaAttachment, SocialDraft};

/// Fields of a new draft
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDraft {
    pub content: String,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    pub platforms: Vec<PlatformId>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Changes to a draft; `None` leaves a field as it is
#[derive(Debug, Clone, Default)]
pub struct DraftUpdate {
    pub content: Option<String>,
    pub media: Option<Vec<MediaAttachment>>,
    pub platforms: Option<Vec<PlatformId>>,
    pub requires_approval: Option<bool>,
    /// `Some(None)` clears the schedule
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    pub priority: Option<i32>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct DraftService {
    store: Arc<dyn Store>,
    scheduler: PublishScheduler,
    integrations: IntegrationRegistry,
    validation: ValidationService,
    events: EventBus,
}

impl DraftService {
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
            validation: ValidationService::new(),
            events,
        }
    }

    /// Create a draft owned by `actor`
    pub async fn create(&self, new: NewDraft, actor: &Actor, now: DateTime<Utc>) -> Result<SocialDraft> {
        let mut draft = SocialDraft::new(actor.user_id.clone(), new.content, new.platforms, now);
        draft.media = new.media;
        draft.requires_approval = new.requires_approval;
        draft.scheduled_at = new.scheduled_at;
        draft.priority = new.priority;
        draft.tags = new.tags;

        self.store.insert_draft(&draft).await?;
        info!("Created draft {} for {}", draft.id, draft.owner_id);
        Ok(draft)
    }

    /// Edit a draft that has not been submitted
    ///
    /// # Errors
    ///
    /// - `NotFound` if the draft doesn't exist
    /// - `Permission` if `actor` is not the owner
    /// - `InvalidState` unless the draft is in `draft`
    pub async fn update(
        &self,
        id: &str,
        update: DraftUpdate,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<SocialDraft> {
        let mut draft = self.get(id).await?;
        check_owner(&draft, actor)?;

        if draft.status != DraftStatus::Draft {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} is {} and can no longer be edited",
                id, draft.status
            )));
        }

        if let Some(content) = update.content {
            draft.content = content;
        }
        if let Some(media) = update.media {
            draft.media = media;
        }
        if let Some(platforms) = update.platforms {
            draft.platforms = dedup_platforms(platforms);
        }
        if let Some(requires_approval) = update.requires_approval {
            draft.requires_approval = requires_approval;
        }
        if let Some(scheduled_at) = update.scheduled_at {
            draft.scheduled_at = scheduled_at;
        }
        if let Some(priority) = update.priority {
            draft.priority = priority;
        }
        if let Some(tags) = update.tags {
            draft.tags = tags;
        }
        draft.updated_at = now;

        if !self.store.update_draft_if(&draft, DraftStatus::Draft).await? {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} was submitted while editing",
                id
            )));
        }
        Ok(draft)
    }

    /// Submit a draft for publishing
    ///
    /// Drafts that need approval end in `pending_approval`. Others are
    /// approved and fanned out immediately, ending in `scheduled` or
    /// `publishing`.
    pub async fn submit(
        &self,
        id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(SocialDraft, ApprovalOutcome)> {
        let mut draft = self.get(id).await?;
        check_owner(&draft, actor)?;

        if draft.status != DraftStatus::Draft {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} is {}, only drafts in draft can be submitted",
                id, draft.status
            )));
        }

        self.validation.ensure_valid(&ValidationRequest {
            content: draft.content.clone(),
            media: draft.media.clone(),
            platforms: draft.platforms.clone(),
        })?;
        self.validation
            .ensure_connected(&self.integrations, &draft.owner_id, &draft.platforms)
            .await?;

        let outcome = approval::submit(&mut draft, now)?;
        self.events.emit(Event::DraftSubmitted {
            draft_id: draft.id.clone(),
            requires_approval: draft.requires_approval,
        });

        let draft = match outcome {
            ApprovalOutcome::AutoApproved => {
                let (draft, _items) = self
                    .scheduler
                    .enqueue(draft, DraftStatus::Draft, now)
                    .await?;
                draft
            }
            _ => {
                if !self.store.update_draft_if(&draft, DraftStatus::Draft).await? {
                    return Err(PlexcastError::InvalidState(format!(
                        "Draft {} changed while submitting",
                        id
                    )));
                }
                self.events.emit(Event::DraftStatusChanged {
                    draft_id: draft.id.clone(),
                    from: DraftStatus::Draft,
                    to: draft.status,
                });
                draft
            }
        };

        info!("Submitted draft {}: {}", draft.id, draft.status);
        Ok((draft, outcome))
    }

    pub async fn get(&self, id: &str) -> Result<SocialDraft> {
        self.store
            .get_draft(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Draft {}", id)))
    }

    /// Newest first
    pub async fn list(&self, filter: &DraftFilter) -> Result<Vec<SocialDraft>> {
        self.store.list_drafts(filter).await
    }
}

fn check_owner(draft: &SocialDraft, actor: &Actor) -> Result<()> {
    if draft.is_owned_by(actor) {
        Ok(())
    } else {
        Err(PlexcastError::Permission(format!(
            "{} does not own draft {}",
            actor.user_id, draft.id
        )))
    }
}
