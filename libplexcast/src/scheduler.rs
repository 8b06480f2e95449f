//! Publish scheduler
//!
//! Expands approved drafts into one queue item per target platform and
//! drives those items through `pending -> processing -> completed | failed`.
//!
//! Time only advances through [`PublishScheduler::tick_at`]. Each tick:
//!
//! 1. promotes `scheduled` drafts whose time has come to `publishing`
//! 2. selects due items ordered by `(priority, scheduled_at, seq)`
//! 3. claims each with a pending -> processing compare-and-swap and hands it
//!    to its platform's [`Publisher`](crate::platforms::Publisher), at most
//!    `concurrency` at a time
//! 4. records the outcome (ledger append, retry with backoff, or failure)
//! 5. re-aggregates every draft whose items changed
//!
//! Ticks are idempotent and safe to run concurrently: the claim is the only
//! way into `processing`, so an item is dispatched once per claim no matter
//! how many schedulers share a store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{PlexcastError, PublishError, Result};
use crate::integrations::IntegrationRegistry;
use crate::ledger::build_record;
use crate::platforms::{PublishReceipt, PublishRequest, PublisherRegistry};
use crate::retry::{FailureOutcome, RetryPolicy};
use crate::service::events::{Event, EventBus};
use crate::store::{ItemFilter, Store};
use crate::types::{
    Actor, AggregatePolicy, DraftStatus, IntegrationStatus, PublishQueueItem, QueueStatus,
    SocialDraft,
};

/// Scheduler tuning, usually built from [`Config::scheduler_settings`](crate::config::Config::scheduler_settings)
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Maximum publisher calls in flight per tick
    pub concurrency: usize,
    pub dispatch_timeout: Duration,
    /// Maximum items selected per tick
    pub batch_size: usize,
    /// Processing items older than this are treated as interrupted
    pub stale_after: Duration,
    pub aggregate_policy: AggregatePolicy,
    pub retry: RetryPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            dispatch_timeout: Duration::from_secs(30),
            batch_size: 100,
            stale_after: Duration::from_secs(600),
            aggregate_policy: AggregatePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Scheduled drafts moved to publishing
    pub promoted: usize,
    /// Items claimed and handed to a publisher
    pub dispatched: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    /// Results thrown away because the item was cancelled in flight
    pub discarded: usize,
    /// Drafts that reached a terminal status
    pub finalized: usize,
    /// Dispatches aborted by a storage error
    pub errors: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self == &TickReport::default()
    }
}

/// What to cancel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CancelTarget {
    /// A draft and all of its unfinished items
    Draft(String),
    /// A single queue item
    QueueItem(String),
}

/// Queue counts at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Pending items a tick would select right now
    pub due_now: usize,
    /// Pending items waiting out a retry backoff
    pub waiting_retry: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Completed,
    Retried,
    Failed,
    Discarded,
}

struct Dispatched {
    draft_id: String,
    resolution: Resolution,
}

/// One publisher call and what led up to it
struct Attempt {
    integration_id: Option<String>,
    content: String,
    outcome: std::result::Result<PublishReceipt, PublishError>,
}

impl Attempt {
    fn failed(error: PublishError) -> Self {
        Self {
            integration_id: None,
            content: String::new(),
            outcome: Err(error),
        }
    }
}

#[derive(Clone)]
pub struct PublishScheduler {
    store: Arc<dyn Store>,
    publishers: PublisherRegistry,
    integrations: IntegrationRegistry,
    settings: Arc<SchedulerSettings>,
    events: EventBus,
}

impl PublishScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        publishers: PublisherRegistry,
        integrations: IntegrationRegistry,
        settings: SchedulerSettings,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            publishers,
            integrations,
            settings: Arc::new(settings),
            events,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Fan an approved draft out into queue items
    ///
    /// `draft` must already be `approved` in memory; `expected` is the status
    /// the store must still hold (normally `approved`, or `pending_approval`
    /// when the approval itself is written in the same step). The draft moves
    /// to `scheduled` when its time is in the future, otherwise straight to
    /// `publishing`. The draft write and every item insert happen together
    /// or not at all.
    pub async fn enqueue(
        &self,
        mut draft: SocialDraft,
        expected: DraftStatus,
        now: DateTime<Utc>,
    ) -> Result<(SocialDraft, Vec<PublishQueueItem>)> {
        if draft.status != DraftStatus::Approved {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} is {}, only approved drafts can be enqueued",
                draft.id, draft.status
            )));
        }
        if draft.platforms.is_empty() {
            return Err(PlexcastError::Validation(format!(
                "Draft {} has no target platforms",
                draft.id
            )));
        }

        let next = match draft.scheduled_at {
            Some(at) if at > now => DraftStatus::Scheduled,
            _ => DraftStatus::Publishing,
        };
        let scheduled_at = draft.scheduled_at.unwrap_or(now);

        let items: Vec<PublishQueueItem> = draft
            .platforms
            .iter()
            .map(|platform| {
                PublishQueueItem::new(
                    draft.id.clone(),
                    *platform,
                    draft.priority,
                    scheduled_at,
                    self.settings.retry.max_retries_for(*platform),
                    now,
                )
            })
            .collect();

        draft.transition(next, now)?;

        if !self.store.enqueue_draft(&draft, expected, &items).await? {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} is no longer {}",
                draft.id, expected
            )));
        }

        info!(
            "Enqueued draft {} as {} items ({}), status {}",
            draft.id,
            items.len(),
            draft
                .platforms
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            draft.status
        );
        self.events.emit(Event::DraftStatusChanged {
            draft_id: draft.id.clone(),
            from: expected,
            to: draft.status,
        });

        Ok((draft, items))
    }

    /// Run one dispatch pass at the current wall-clock time
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one dispatch pass as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for draft in self.store.due_scheduled_drafts(now).await? {
            if self.promote(draft.clone(), now).await? {
                report.promoted += 1;
                // Every item of this draft may already be cancelled
                touched.insert(draft.id);
            }
        }

        let due = self.store.due_items(now, self.settings.batch_size).await?;
        if !due.is_empty() {
            debug!("{} items due at {}", due.len(), now);
        }

        // Permits are handed out in request order, so claims follow the
        // selection order even with a bounded pool
        let semaphore = Semaphore::new(self.settings.concurrency.max(1));
        let dispatches = due
            .into_iter()
            .map(|item| self.claim_and_dispatch(&semaphore, item, now));

        for result in join_all(dispatches).await {
            match result {
                Ok(Some(dispatched)) => {
                    report.dispatched += 1;
                    match dispatched.resolution {
                        Resolution::Completed => report.completed += 1,
                        Resolution::Retried => report.retried += 1,
                        Resolution::Failed => report.failed += 1,
                        Resolution::Discarded => report.discarded += 1,
                    }
                    if dispatched.resolution != Resolution::Retried {
                        touched.insert(dispatched.draft_id);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Dispatch aborted: {}", e);
                    report.errors += 1;
                }
            }
        }

        for draft_id in &touched {
            if self.finalize(draft_id, now).await?.is_some() {
                report.finalized += 1;
            }
        }

        if !report.is_idle() {
            info!(
                "Tick: {} promoted, {} dispatched ({} completed, {} retried, {} failed, {} discarded), {} drafts finalized",
                report.promoted,
                report.dispatched,
                report.completed,
                report.retried,
                report.failed,
                report.discarded,
                report.finalized
            );
        }

        Ok(report)
    }

    async fn promote(&self, mut draft: SocialDraft, now: DateTime<Utc>) -> Result<bool> {
        draft.transition(DraftStatus::Publishing, now)?;
        if !self
            .store
            .update_draft_if(&draft, DraftStatus::Scheduled)
            .await?
        {
            return Ok(false);
        }

        info!("Draft {} reached its scheduled time", draft.id);
        self.events.emit(Event::DraftStatusChanged {
            draft_id: draft.id,
            from: DraftStatus::Scheduled,
            to: DraftStatus::Publishing,
        });
        Ok(true)
    }

    async fn claim_and_dispatch(
        &self,
        semaphore: &Semaphore,
        item: PublishQueueItem,
        now: DateTime<Utc>,
    ) -> Result<Option<Dispatched>> {
        let Ok(_permit) = semaphore.acquire().await else {
            return Ok(None);
        };

        let Some(claimed) = self.store.claim_item(&item.id, now).await? else {
            debug!("Item {} was claimed elsewhere", item.id);
            return Ok(None);
        };

        self.dispatch(claimed, now).await.map(Some)
    }

    async fn dispatch(&self, item: PublishQueueItem, now: DateTime<Utc>) -> Result<Dispatched> {
        debug!(
            "Dispatching {} item {} (attempt {})",
            item.platform,
            item.id,
            item.retry_count + 1
        );
        self.events.emit(Event::ItemDispatched {
            item_id: item.id.clone(),
            draft_id: item.draft_id.clone(),
            platform: item.platform,
            attempt: item.retry_count + 1,
        });

        // The item is claimed: every path from here must record an outcome
        let attempt = match self.attempt(&item).await {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!("Storage error preparing item {}: {}", item.id, e);
                Attempt::failed(PublishError::Storage(e.to_string()))
            }
        };
        let (resolution, draft_id) = match attempt.outcome {
            Ok(receipt) => {
                // Attempts only succeed after resolving an integration
                let integration_id = attempt.integration_id.unwrap_or_default();
                self.record_success(item, &integration_id, &attempt.content, &receipt, now)
                    .await?
            }
            Err(error) => {
                if error.is_credential_failure() {
                    if let Some(integration_id) = &attempt.integration_id {
                        if let Err(e) = self
                            .integrations
                            .mark_expired(integration_id, &error.to_string(), now)
                            .await
                        {
                            error!(
                                "Failed to mark integration {} expired: {}",
                                integration_id, e
                            );
                        }
                    }
                }
                self.record_failure(item, &error, now).await?
            }
        };

        Ok(Dispatched {
            draft_id,
            resolution,
        })
    }

    /// Resolve draft, integration, credentials and publisher, then publish
    async fn attempt(&self, item: &PublishQueueItem) -> Result<Attempt> {
        let Some(draft) = self.store.get_draft(&item.draft_id).await? else {
            return Ok(Attempt::failed(PublishError::NotSupported(format!(
                "Draft {} no longer exists",
                item.draft_id
            ))));
        };

        let Some(integration) = self
            .store
            .active_integration(&draft.owner_id, item.platform)
            .await?
        else {
            return Ok(Attempt::failed(PublishError::Authentication(format!(
                "{} has no {} integration",
                draft.owner_id, item.platform
            ))));
        };

        if integration.status != IntegrationStatus::Connected {
            return Ok(Attempt::failed(PublishError::Authentication(format!(
                "{} integration {} is {}",
                item.platform, integration.id, integration.status
            ))));
        }

        let Some(credentials) = self.store.integration_credentials(&integration.id).await? else {
            return Ok(Attempt::failed(PublishError::Authentication(format!(
                "No credentials stored for integration {}",
                integration.id
            ))));
        };

        let Some(publisher) = self.publishers.get(item.platform) else {
            return Ok(Attempt::failed(PublishError::NotSupported(format!(
                "No publisher registered for {}",
                item.platform
            ))));
        };

        let request = PublishRequest {
            platform: item.platform,
            draft_id: &draft.id,
            queue_item_id: &item.id,
            credentials: &credentials,
            content: &draft.content,
            media: &draft.media,
        };

        let outcome =
            match tokio::time::timeout(self.settings.dispatch_timeout, publisher.publish(request))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(PublishError::Timeout(format!(
                    "{} did not answer within {}",
                    item.platform,
                    humantime::format_duration(self.settings.dispatch_timeout)
                ))),
            };

        Ok(Attempt {
            integration_id: Some(integration.id),
            content: draft.content,
            outcome,
        })
    }

    async fn record_success(
        &self,
        mut item: PublishQueueItem,
        integration_id: &str,
        content: &str,
        receipt: &PublishReceipt,
        now: DateTime<Utc>,
    ) -> Result<(Resolution, String)> {
        let record = build_record(&item, integration_id, content, receipt, now);

        item.status = QueueStatus::Completed;
        item.completed_at = Some(now);
        item.next_retry_at = None;
        item.published_id = Some(record.id.clone());

        if !self.store.complete_item(&item, &record).await? {
            info!(
                "Discarding {} result for item {}: cancelled while in flight",
                item.platform, item.id
            );
            return Ok((Resolution::Discarded, item.draft_id));
        }

        info!(
            "Published item {} to {}: {}",
            item.id, item.platform, record.platform_post_id
        );
        self.events.emit(Event::ItemCompleted {
            item_id: item.id.clone(),
            draft_id: item.draft_id.clone(),
            platform: item.platform,
            published_id: record.id,
            remote_post_id: record.platform_post_id,
        });
        Ok((Resolution::Completed, item.draft_id))
    }

    async fn record_failure(
        &self,
        mut item: PublishQueueItem,
        error: &PublishError,
        now: DateTime<Utc>,
    ) -> Result<(Resolution, String)> {
        let outcome = self.settings.retry.apply_failure(&mut item, error, now);

        if !self
            .store
            .update_item_if(&item, QueueStatus::Processing)
            .await?
        {
            info!(
                "Discarding {} failure for item {}: cancelled while in flight",
                item.platform, item.id
            );
            return Ok((Resolution::Discarded, item.draft_id));
        }

        match outcome {
            FailureOutcome::Retry {
                retry_count,
                next_retry_at,
            } => {
                self.events.emit(Event::ItemRetryScheduled {
                    item_id: item.id.clone(),
                    draft_id: item.draft_id.clone(),
                    platform: item.platform,
                    retry_count,
                    next_retry_at,
                    error: error.to_string(),
                });
                Ok((Resolution::Retried, item.draft_id))
            }
            FailureOutcome::Failed => {
                self.events.emit(Event::ItemFailed {
                    item_id: item.id.clone(),
                    draft_id: item.draft_id.clone(),
                    platform: item.platform,
                    error: error.to_string(),
                });
                Ok((Resolution::Failed, item.draft_id))
            }
        }
    }

    /// Re-aggregate a draft from its items
    ///
    /// A `publishing` draft becomes `published`, `failed` or `cancelled` once
    /// every item is terminal; a `scheduled` draft whose items were all
    /// cancelled becomes `cancelled`. Returns the new status if it changed.
    pub async fn finalize(&self, draft_id: &str, now: DateTime<Utc>) -> Result<Option<DraftStatus>> {
        let Some(mut draft) = self.store.get_draft(draft_id).await? else {
            return Ok(None);
        };

        let statuses: Vec<QueueStatus> = self
            .store
            .list_items(&ItemFilter {
                draft_id: Some(draft_id.to_string()),
                ..Default::default()
            })
            .await?
            .into_iter()
            .map(|item| item.status)
            .collect();

        let aggregate = self.settings.aggregate_policy.aggregate(&statuses);
        let next = match (draft.status, aggregate) {
            (DraftStatus::Publishing, Some(next)) => next,
            (DraftStatus::Scheduled, Some(DraftStatus::Cancelled)) => DraftStatus::Cancelled,
            _ => return Ok(None),
        };

        let from = draft.status;
        draft.transition(next, now)?;
        if !self.store.update_draft_if(&draft, from).await? {
            return Ok(None);
        }

        info!("Draft {} is {}", draft.id, next);
        self.events.emit(Event::DraftStatusChanged {
            draft_id: draft.id,
            from,
            to: next,
        });
        Ok(Some(next))
    }

    /// Cancel a draft or a single queue item on behalf of the draft's owner
    ///
    /// Completed items stay completed. A result that arrives for an item
    /// cancelled in flight is discarded.
    pub async fn cancel(&self, target: &CancelTarget, actor: &Actor, now: DateTime<Utc>) -> Result<()> {
        match target {
            CancelTarget::Draft(id) => self.cancel_draft(id, actor, now).await,
            CancelTarget::QueueItem(id) => self.cancel_item(id, actor, now).await,
        }
    }

    async fn cancel_draft(&self, draft_id: &str, actor: &Actor, now: DateTime<Utc>) -> Result<()> {
        let mut draft = self.require_draft(draft_id).await?;
        check_owner(&draft, actor)?;

        if draft.status.is_terminal() {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} is already {}",
                draft.id, draft.status
            )));
        }

        let from = draft.status;
        draft.transition(DraftStatus::Cancelled, now)?;
        let Some(cancelled) = self.store.cancel_draft(&draft, from).await? else {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} changed while cancelling",
                draft.id
            )));
        };

        self.events.emit(Event::DraftStatusChanged {
            draft_id: draft.id.clone(),
            from,
            to: DraftStatus::Cancelled,
        });
        for item in &cancelled {
            self.events.emit(Event::ItemCancelled {
                item_id: item.id.clone(),
                draft_id: item.draft_id.clone(),
                platform: item.platform,
            });
        }

        info!(
            "Cancelled draft {} ({} unfinished items cancelled)",
            draft.id,
            cancelled.len()
        );
        Ok(())
    }

    async fn cancel_item(&self, item_id: &str, actor: &Actor, now: DateTime<Utc>) -> Result<()> {
        let item = self.require_item(item_id).await?;
        let draft = self.require_draft(&item.draft_id).await?;
        check_owner(&draft, actor)?;

        if item.status.is_terminal() {
            return Err(PlexcastError::InvalidState(format!(
                "Queue item {} is already {}",
                item.id, item.status
            )));
        }

        if !self.cancel_one(item).await? {
            return Err(PlexcastError::InvalidState(format!(
                "Queue item {} finished while cancelling",
                item_id
            )));
        }
        info!("Cancelled queue item {}", item_id);

        self.finalize(&draft.id, now).await?;
        Ok(())
    }

    async fn cancel_one(&self, mut item: PublishQueueItem) -> Result<bool> {
        let expected = item.status;
        item.status = QueueStatus::Cancelled;
        item.next_retry_at = None;

        if !self.store.update_item_if(&item, expected).await? {
            return Ok(false);
        }

        self.events.emit(Event::ItemCancelled {
            item_id: item.id,
            draft_id: item.draft_id,
            platform: item.platform,
        });
        Ok(true)
    }

    /// Manually retry a failed queue item
    ///
    /// Resets the retry budget and makes the item due immediately. A `failed`
    /// draft is re-opened to `publishing`; a cancelled draft cannot be retried.
    pub async fn retry(
        &self,
        item_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<PublishQueueItem> {
        let mut item = self.require_item(item_id).await?;
        let mut draft = self.require_draft(&item.draft_id).await?;

        if !draft.is_owned_by(actor) && !actor.can_approve {
            return Err(PlexcastError::Permission(format!(
                "{} may not retry items of draft {}",
                actor.user_id, draft.id
            )));
        }

        if item.status != QueueStatus::Failed {
            return Err(PlexcastError::InvalidState(format!(
                "Queue item {} is {}, only failed items can be retried",
                item.id, item.status
            )));
        }

        if draft.status == DraftStatus::Cancelled {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} was cancelled",
                draft.id
            )));
        }

        let reopened = draft.status == DraftStatus::Failed;
        if reopened {
            draft.transition(DraftStatus::Publishing, now)?;
            if !self
                .store
                .update_draft_if(&draft, DraftStatus::Failed)
                .await?
            {
                return Err(PlexcastError::InvalidState(format!(
                    "Draft {} changed while retrying",
                    draft.id
                )));
            }
            self.events.emit(Event::DraftStatusChanged {
                draft_id: draft.id.clone(),
                from: DraftStatus::Failed,
                to: DraftStatus::Publishing,
            });
        }

        item.status = QueueStatus::Pending;
        item.retry_count = 0;
        item.next_retry_at = None;
        item.scheduled_at = now;
        item.started_at = None;

        if !self.store.update_item_if(&item, QueueStatus::Failed).await? {
            if reopened {
                // Put the draft back where its items say it belongs
                self.finalize(&draft.id, now).await?;
            }
            return Err(PlexcastError::InvalidState(format!(
                "Queue item {} changed while retrying",
                item.id
            )));
        }

        info!(
            "Manual retry of {} item {} (draft {})",
            item.platform, item.id, draft.id
        );
        Ok(item)
    }

    /// Fail items stuck in `processing` past `stale_after`
    ///
    /// Such items belong to a dispatcher that died mid-call. They are never
    /// re-dispatched automatically since the post may already be live; a
    /// human can use [`retry`](Self::retry) after checking.
    pub async fn recover_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .map_err(|e| PlexcastError::Validation(format!("Invalid stale_after: {}", e)))?;
        let cutoff = now - stale_after;

        let mut recovered = 0;
        let mut touched = BTreeSet::new();

        for mut item in self.store.stale_items(cutoff).await? {
            let started = item
                .started_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "an unknown time".to_string());
            let message = format!("Interrupted: processing started at {} never finished", started);

            item.status = QueueStatus::Failed;
            item.next_retry_at = None;
            item.last_error = Some(message.clone());

            if self
                .store
                .update_item_if(&item, QueueStatus::Processing)
                .await?
            {
                warn!("{} item {}: {}", item.platform, item.id, message);
                self.events.emit(Event::ItemFailed {
                    item_id: item.id.clone(),
                    draft_id: item.draft_id.clone(),
                    platform: item.platform,
                    error: message,
                });
                touched.insert(item.draft_id);
                recovered += 1;
            }
        }

        for draft_id in &touched {
            self.finalize(draft_id, now).await?;
        }

        Ok(recovered)
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let items = self.store.list_items(&ItemFilter::default()).await?;
        let mut stats = QueueStats::default();

        for item in &items {
            match item.status {
                QueueStatus::Pending => {
                    stats.pending += 1;
                    if item.is_due(now) {
                        stats.due_now += 1;
                    }
                    if item.next_retry_at.is_some_and(|at| at > now) {
                        stats.waiting_retry += 1;
                    }
                }
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
        }

        Ok(stats)
    }

    async fn require_draft(&self, id: &str) -> Result<SocialDraft> {
        self.store
            .get_draft(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Draft {}", id)))
    }

    async fn require_item(&self, id: &str) -> Result<PublishQueueItem> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| PlexcastError::NotFound(format!("Queue item {}", id)))
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
