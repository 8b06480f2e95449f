//! Dispatch under interleavings and storage faults
//!
//! Wraps `MemoryStore` to land publisher results at awkward moments and to
//! fail selected writes, then checks that claimed items always reach a
//! recorded outcome and cancelled drafts never gain ledger records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;

use libplexcast::error::{DbError, PlexcastError, PublishError, Result};
use libplexcast::integrations::ConnectRequest;
use libplexcast::platforms::mock::{MockGate, MockPublisher};
use libplexcast::platforms::{capabilities, PlatformId, Publisher, PublisherRegistry};
use libplexcast::service::drafts::NewDraft;
use libplexcast::store::{DraftFilter, ItemFilter, LedgerFilter, Store};
use libplexcast::types::{
    Actor, DraftStatus, EngagementMetrics, IntegrationStatus, PublishQueueItem,
    QueueStatus, SocialDraft, SocialIntegration, SocialPublished,
};
use libplexcast::{CancelTarget, Config, MemoryStore, PlexcastService};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 12, 14, 0, 0).unwrap()
}

fn storage_failure() -> PlexcastError {
    DbError::IoError(std::io::Error::other("disk I/O error")).into()
}

/// `MemoryStore` with hooks
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    /// Released right after a draft cancel commits
    release_after_cancel: Option<MockGate>,
    fail_integration_writes: AtomicBool,
    fail_credential_reads: AtomicBool,
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_integration(
        &self,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        self.inner.insert_integration(integration, credentials).await
    }

    async fn replace_integration(
        &self,
        old_id: &str,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        self.inner
            .replace_integration(old_id, integration, credentials)
            .await
    }

    async fn get_integration(&self, id: &str) -> Result<Option<SocialIntegration>> {
        self.inner.get_integration(id).await
    }

    async fn active_integration(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<SocialIntegration>> {
        self.inner.active_integration(user_id, platform).await
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<SocialIntegration>> {
        self.inner.list_integrations(user_id).await
    }

    async fn update_integration_if(
        &self,
        integration: &SocialIntegration,
        expected: IntegrationStatus,
    ) -> Result<bool> {
        if self.fail_integration_writes.load(Ordering::SeqCst) {
            return Err(storage_failure());
        }
        self.inner.update_integration_if(integration, expected).await
    }

    async fn integration_credentials(&self, id: &str) -> Result<Option<SecretString>> {
        if self.fail_credential_reads.swap(false, Ordering::SeqCst) {
            return Err(storage_failure());
        }
        self.inner.integration_credentials(id).await
    }

    async fn insert_draft(&self, draft: &SocialDraft) -> Result<()> {
        self.inner.insert_draft(draft).await
    }

    async fn get_draft(&self, id: &str) -> Result<Option<SocialDraft>> {
        self.inner.get_draft(id).await
    }

    async fn update_draft_if(&self, draft: &SocialDraft, expected: DraftStatus) -> Result<bool> {
        self.inner.update_draft_if(draft, expected).await
    }

    async fn list_drafts(&self, filter: &DraftFilter) -> Result<Vec<SocialDraft>> {
        self.inner.list_drafts(filter).await
    }

    async fn due_scheduled_drafts(&self, now: DateTime<Utc>) -> Result<Vec<SocialDraft>> {
        self.inner.due_scheduled_drafts(now).await
    }

    async fn enqueue_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
        items: &[PublishQueueItem],
    ) -> Result<bool> {
        self.inner.enqueue_draft(draft, expected, items).await
    }

    async fn cancel_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
    ) -> Result<Option<Vec<PublishQueueItem>>> {
        let cancelled = self.inner.cancel_draft(draft, expected).await?;
        if let Some(gate) = &self.release_after_cancel {
            // Let the held publisher report back before cancel returns
            gate.release();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(cancelled)
    }

    async fn get_item(&self, id: &str) -> Result<Option<PublishQueueItem>> {
        self.inner.get_item(id).await
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<PublishQueueItem>> {
        self.inner.list_items(filter).await
    }

    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PublishQueueItem>> {
        self.inner.due_items(now, limit).await
    }

    async fn claim_item(&self, id: &str, now: DateTime<Utc>) -> Result<Option<PublishQueueItem>> {
        self.inner.claim_item(id, now).await
    }

    async fn update_item_if(
        &self,
        item: &PublishQueueItem,
        expected: QueueStatus,
    ) -> Result<bool> {
        self.inner.update_item_if(item, expected).await
    }

    async fn complete_item(
        &self,
        item: &PublishQueueItem,
        record: &SocialPublished,
    ) -> Result<bool> {
        self.inner.complete_item(item, record).await
    }

    async fn stale_items(&self, started_before: DateTime<Utc>) -> Result<Vec<PublishQueueItem>> {
        self.inner.stale_items(started_before).await
    }

    async fn get_published(&self, id: &str) -> Result<Option<SocialPublished>> {
        self.inner.get_published(id).await
    }

    async fn list_published(&self, filter: &LedgerFilter) -> Result<Vec<SocialPublished>> {
        self.inner.list_published(filter).await
    }

    async fn update_published_metrics(
        &self,
        id: &str,
        metrics: &EngagementMetrics,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_published_metrics(id, metrics, at).await
    }
}

async fn setup(store: Arc<FaultyStore>, publisher: MockPublisher) -> (PlexcastService, String) {
    let platform = publisher.platform();
    let mut registry = PublisherRegistry::new();
    registry.register(Arc::new(publisher));
    let service = PlexcastService::with_store(Config::default(), store, registry);

    service
        .integrations()
        .connect(
            ConnectRequest {
                user_id: "alice".to_string(),
                platform,
                connection_type: capabilities(platform).connection_types[0],
                credentials: SecretString::from("token"),
                scopes: vec![],
            },
            t0(),
        )
        .await
        .unwrap();

    let alice = Actor::user("alice");
    let draft = service
        .drafts()
        .create(
            NewDraft {
                content: "Quarterly update".to_string(),
                platforms: vec![platform],
                ..Default::default()
            },
            &alice,
            t0(),
        )
        .await
        .unwrap();
    service.drafts().submit(&draft.id, &alice, t0()).await.unwrap();
    (service, draft.id)
}

async fn only_item(service: &PlexcastService, draft_id: &str) -> PublishQueueItem {
    let mut items = service
        .store()
        .list_items(&ItemFilter {
            draft_id: Some(draft_id.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    items.remove(0)
}

#[tokio::test]
async fn test_result_landing_right_after_cancel_is_discarded() {
    let (publisher, gate) = MockPublisher::held(PlatformId::Mastodon);
    let store = Arc::new(FaultyStore {
        release_after_cancel: Some(gate.clone()),
        ..Default::default()
    });
    let (service, draft_id) = setup(store, publisher).await;

    let scheduler = service.scheduler().clone();
    let tick = tokio::spawn(async move { scheduler.tick_at(t0()).await });
    gate.wait_started().await;

    service
        .scheduler()
        .cancel(
            &CancelTarget::Draft(draft_id.clone()),
            &Actor::user("alice"),
            t0() + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.discarded, 1);

    assert_eq!(only_item(&service, &draft_id).await.status, QueueStatus::Cancelled);
    assert_eq!(
        service.drafts().get(&draft_id).await.unwrap().status,
        DraftStatus::Cancelled
    );
    assert!(service
        .ledger()
        .records_for_draft(&draft_id)
        .await
        .unwrap()
        .is_empty());

    let reconcile = service
        .ledger()
        .reconcile(Default::default())
        .await
        .unwrap();
    assert!(reconcile.is_clean(), "{:?}", reconcile);
}

#[tokio::test]
async fn test_failed_expiry_write_still_records_item_failure() {
    let store = Arc::new(FaultyStore::default());
    let (service, draft_id) = setup(
        store.clone(),
        MockPublisher::failing(
            PlatformId::Facebook,
            PublishError::Authentication("token revoked".into()),
        ),
    )
    .await;
    store.fail_integration_writes.store(true, Ordering::SeqCst);

    let report = service.tick_at(t0()).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors, 0);

    let item = only_item(&service, &draft_id).await;
    assert_eq!(item.status, QueueStatus::Failed);
    assert!(item.last_error.as_deref().unwrap().contains("token revoked"));
    assert_eq!(
        service.drafts().get(&draft_id).await.unwrap().status,
        DraftStatus::Failed
    );

    // The expiry write failed, so the integration is unchanged
    let integration = service
        .integrations()
        .active("alice", PlatformId::Facebook)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(integration.status, IntegrationStatus::Connected);
}

#[tokio::test]
async fn test_storage_error_before_publishing_is_retried() {
    let publisher = MockPublisher::success(PlatformId::Bluesky);
    let store = Arc::new(FaultyStore::default());
    let (service, draft_id) = setup(store.clone(), publisher).await;
    store.fail_credential_reads.store(true, Ordering::SeqCst);

    let report = service.tick_at(t0()).await.unwrap();
    assert_eq!(report.retried, 1);

    let item = only_item(&service, &draft_id).await;
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 1);
    assert!(item
        .last_error
        .as_deref()
        .unwrap()
        .starts_with("Storage error:"));

    // The fault clears; the retry goes through once its backoff has passed
    let retry_at = item.next_retry_at.unwrap();
    let report = service.tick_at(retry_at).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(only_item(&service, &draft_id).await.status, QueueStatus::Completed);
}
