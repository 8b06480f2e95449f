//! Persistence interface for the publishing pipeline
//!
//! The scheduler, approval flow and ledger only talk to a [`Store`]. Two
//! implementations ship with the library: [`MemoryStore`] for tests and
//! embedding, and [`crate::db::Database`] backed by SQLite.
//!
//! Operations that must be atomic are expressed as single trait methods so
//! every implementation can give them a transaction (or a single lock):
//!
//! - [`Store::enqueue_draft`]: draft status CAS plus insertion of all queue items
//! - [`Store::claim_item`]: pending to processing CAS
//! - [`Store::update_item_if`]: conditional item write
//! - [`Store::complete_item`]: item CAS plus ledger append
//! - [`Store::cancel_draft`]: draft status CAS plus cancellation of its unfinished items
//! - [`Store::replace_integration`]: retire the old row and insert the new one

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::error::Result;
use crate::platforms::PlatformId;
use crate::types::{
    DraftStatus, EngagementMetrics, IntegrationStatus, PublishQueueItem, QueueStatus, SocialDraft,
    SocialIntegration, SocialPublished,
};

pub mod memory;

pub use memory::MemoryStore;

/// Selection of drafts for listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftFilter {
    pub owner_id: Option<String>,
    pub status: Option<DraftStatus>,
    pub limit: Option<usize>,
}

/// Selection of queue items for listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    pub draft_id: Option<String>,
    pub status: Option<QueueStatus>,
    pub platform: Option<PlatformId>,
    pub limit: Option<usize>,
}

impl ItemFilter {
    pub fn matches(&self, item: &PublishQueueItem) -> bool {
        self.draft_id.as_deref().is_none_or(|id| id == item.draft_id)
            && self.status.is_none_or(|s| s == item.status)
            && self.platform.is_none_or(|p| p == item.platform)
    }
}

/// Selection of ledger records for listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerFilter {
    pub draft_id: Option<String>,
    pub platform: Option<PlatformId>,
    pub limit: Option<usize>,
}

impl LedgerFilter {
    pub fn matches(&self, record: &SocialPublished) -> bool {
        self.draft_id.as_deref().is_none_or(|id| id == record.draft_id)
            && self.platform.is_none_or(|p| p == record.platform)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // Integrations

    /// Insert a new integration together with its credential
    async fn insert_integration(
        &self,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()>;

    /// Mark `old_id` disconnected and insert `integration` in one step
    async fn replace_integration(
        &self,
        old_id: &str,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()>;

    async fn get_integration(&self, id: &str) -> Result<Option<SocialIntegration>>;

    /// The integration for (user, platform) that is not disconnected, if any
    async fn active_integration(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<SocialIntegration>>;

    /// All integrations of a user, oldest first, disconnected ones included
    async fn list_integrations(&self, user_id: &str) -> Result<Vec<SocialIntegration>>;

    /// Write `integration` only if the stored status is still `expected`
    async fn update_integration_if(
        &self,
        integration: &SocialIntegration,
        expected: IntegrationStatus,
    ) -> Result<bool>;

    async fn integration_credentials(&self, id: &str) -> Result<Option<SecretString>>;

    // Drafts

    async fn insert_draft(&self, draft: &SocialDraft) -> Result<()>;

    async fn get_draft(&self, id: &str) -> Result<Option<SocialDraft>>;

    /// Write `draft` only if the stored status is still `expected`
    async fn update_draft_if(&self, draft: &SocialDraft, expected: DraftStatus) -> Result<bool>;

    /// Newest first
    async fn list_drafts(&self, filter: &DraftFilter) -> Result<Vec<SocialDraft>>;

    /// Scheduled drafts whose `scheduled_at` has passed
    async fn due_scheduled_drafts(&self, now: DateTime<Utc>) -> Result<Vec<SocialDraft>>;

    /// Write `draft` if its stored status is `expected` and insert `items`
    ///
    /// Either everything is written or nothing is. Returns `false` when the
    /// status no longer matched.
    async fn enqueue_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
        items: &[PublishQueueItem],
    ) -> Result<bool>;

    /// Write the cancelled `draft` if its stored status is `expected` and
    /// cancel every pending or processing item of it
    ///
    /// Returns the items that were cancelled, or `None` when the status no
    /// longer matched and nothing was written. A result for one of those
    /// items arriving later finds it `cancelled` and is refused by
    /// [`Store::complete_item`].
    async fn cancel_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
    ) -> Result<Option<Vec<PublishQueueItem>>>;

    // Queue items

    async fn get_item(&self, id: &str) -> Result<Option<PublishQueueItem>>;

    /// Ordered by insertion
    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<PublishQueueItem>>;

    /// Dispatchable items ordered by (priority, scheduled_at, seq)
    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PublishQueueItem>>;

    /// Move a pending item to processing
    ///
    /// Sets `started_at` and clears `next_retry_at`. Returns the claimed item,
    /// or `None` when another worker got there first or the item left
    /// `pending`.
    async fn claim_item(&self, id: &str, now: DateTime<Utc>) -> Result<Option<PublishQueueItem>>;

    /// Write `item` only if the stored status is still `expected`
    async fn update_item_if(&self, item: &PublishQueueItem, expected: QueueStatus)
        -> Result<bool>;

    /// Write the completed `item` and append `record` to the ledger
    ///
    /// Only applies while the stored item is `processing`; returns `false`
    /// otherwise and writes nothing.
    async fn complete_item(&self, item: &PublishQueueItem, record: &SocialPublished)
        -> Result<bool>;

    /// Processing items whose `started_at` is before `started_before`
    async fn stale_items(&self, started_before: DateTime<Utc>) -> Result<Vec<PublishQueueItem>>;

    // Ledger

    async fn get_published(&self, id: &str) -> Result<Option<SocialPublished>>;

    /// Newest first
    async fn list_published(&self, filter: &LedgerFilter) -> Result<Vec<SocialPublished>>;

    async fn update_published_metrics(
        &self,
        id: &str,
        metrics: &EngagementMetrics,
        at: DateTime<Utc>,
    ) -> Result<()>;
}
