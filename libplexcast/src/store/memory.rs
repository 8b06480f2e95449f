//! In-memory [`Store`]
//!
//! Every operation takes a single async mutex, which makes the atomic
//! operations trivially atomic. State is lost when the store is dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::error::{PlexcastError, Result};
use crate::platforms::PlatformId;
use crate::store::{DraftFilter, ItemFilter, LedgerFilter, Store};
use crate::types::{
    DraftStatus, EngagementMetrics, IntegrationStatus, PublishQueueItem, QueueStatus, SocialDraft,
    SocialIntegration, SocialPublished,
};

#[derive(Default)]
struct Inner {
    integrations: Vec<SocialIntegration>,
    credentials: HashMap<String, SecretString>,
    drafts: HashMap<String, SocialDraft>,
    items: Vec<PublishQueueItem>,
    next_seq: i64,
    published: Vec<SocialPublished>,
}

impl Inner {
    fn active_conflict(&self, integration: &SocialIntegration, ignore_id: Option<&str>) -> bool {
        self.integrations.iter().any(|existing| {
            existing.user_id == integration.user_id
                && existing.platform == integration.platform
                && existing.status != IntegrationStatus::Disconnected
                && Some(existing.id.as_str()) != ignore_id
        })
    }

    fn item_mut(&mut self, id: &str) -> Option<&mut PublishQueueItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn take<T>(iter: impl Iterator<Item = T>, limit: Option<usize>) -> Vec<T> {
    iter.take(limit.unwrap_or(usize::MAX)).collect()
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_integration(
        &self,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.active_conflict(integration, None) {
            return Err(PlexcastError::DuplicateConnection(format!(
                "{} already has an active {} integration",
                integration.user_id, integration.platform
            )));
        }
        inner
            .credentials
            .insert(integration.id.clone(), copy_secret(credentials));
        inner.integrations.push(integration.clone());
        Ok(())
    }

    async fn replace_integration(
        &self,
        old_id: &str,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.integrations.iter().any(|i| i.id == old_id) {
            return Err(PlexcastError::NotFound(format!("Integration {}", old_id)));
        }
        if inner.active_conflict(integration, Some(old_id)) {
            return Err(PlexcastError::DuplicateConnection(format!(
                "{} already has an active {} integration",
                integration.user_id, integration.platform
            )));
        }

        let now = integration.connected_at;
        if let Some(old) = inner.integrations.iter_mut().find(|i| i.id == old_id) {
            old.status = IntegrationStatus::Disconnected;
            old.updated_at = now;
        }
        inner
            .credentials
            .insert(integration.id.clone(), copy_secret(credentials));
        inner.integrations.push(integration.clone());
        Ok(())
    }

    async fn get_integration(&self, id: &str) -> Result<Option<SocialIntegration>> {
        let inner = self.inner.lock().await;
        Ok(inner.integrations.iter().find(|i| i.id == id).cloned())
    }

    async fn active_integration(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<SocialIntegration>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .integrations
            .iter()
            .find(|i| {
                i.user_id == user_id
                    && i.platform == platform
                    && i.status != IntegrationStatus::Disconnected
            })
            .cloned())
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<SocialIntegration>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .integrations
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_integration_if(
        &self,
        integration: &SocialIntegration,
        expected: IntegrationStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.integrations.iter().position(|i| i.id == integration.id) else {
            return Err(PlexcastError::NotFound(format!(
                "Integration {}",
                integration.id
            )));
        };
        if inner.integrations[index].status != expected {
            return Ok(false);
        }
        if integration.status != IntegrationStatus::Disconnected
            && inner.active_conflict(integration, Some(&integration.id))
        {
            return Err(PlexcastError::DuplicateConnection(format!(
                "{} already has an active {} integration",
                integration.user_id, integration.platform
            )));
        }
        inner.integrations[index] = integration.clone();
        Ok(true)
    }

    async fn integration_credentials(&self, id: &str) -> Result<Option<SecretString>> {
        let inner = self.inner.lock().await;
        Ok(inner.credentials.get(id).map(copy_secret))
    }

    async fn insert_draft(&self, draft: &SocialDraft) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.drafts.contains_key(&draft.id) {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} already exists",
                draft.id
            )));
        }
        inner.drafts.insert(draft.id.clone(), draft.clone());
        Ok(())
    }

    async fn get_draft(&self, id: &str) -> Result<Option<SocialDraft>> {
        let inner = self.inner.lock().await;
        Ok(inner.drafts.get(id).cloned())
    }

    async fn update_draft_if(&self, draft: &SocialDraft, expected: DraftStatus) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.drafts.get_mut(&draft.id) {
            Some(existing) if existing.status == expected => {
                *existing = draft.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PlexcastError::NotFound(format!("Draft {}", draft.id))),
        }
    }

    async fn list_drafts(&self, filter: &DraftFilter) -> Result<Vec<SocialDraft>> {
        let inner = self.inner.lock().await;
        let mut drafts: Vec<_> = inner
            .drafts
            .values()
            .filter(|d| filter.owner_id.as_deref().is_none_or(|o| o == d.owner_id))
            .filter(|d| filter.status.is_none_or(|s| s == d.status))
            .cloned()
            .collect();
        drafts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(take(drafts.into_iter(), filter.limit))
    }

    async fn due_scheduled_drafts(&self, now: DateTime<Utc>) -> Result<Vec<SocialDraft>> {
        let inner = self.inner.lock().await;
        let mut drafts: Vec<_> = inner
            .drafts
            .values()
            .filter(|d| d.status == DraftStatus::Scheduled)
            .filter(|d| d.scheduled_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        drafts.sort_by_key(|d| d.scheduled_at);
        Ok(drafts)
    }

    async fn enqueue_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
        items: &[PublishQueueItem],
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        match inner.drafts.get(&draft.id) {
            Some(existing) if existing.status == expected => {}
            Some(_) => return Ok(false),
            None => return Err(PlexcastError::NotFound(format!("Draft {}", draft.id))),
        }

        // Check every item before touching anything
        for (index, item) in items.iter().enumerate() {
            let clashes_stored = inner.items.iter().any(|i| i.id == item.id);
            let clashes_batch = items[..index].iter().any(|i| i.id == item.id);
            if clashes_stored || clashes_batch {
                return Err(PlexcastError::InvalidState(format!(
                    "Queue item {} already exists",
                    item.id
                )));
            }
        }

        inner.drafts.insert(draft.id.clone(), draft.clone());
        for item in items {
            inner.next_seq += 1;
            let mut item = item.clone();
            item.seq = inner.next_seq;
            inner.items.push(item);
        }
        Ok(true)
    }

    async fn cancel_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
    ) -> Result<Option<Vec<PublishQueueItem>>> {
        let mut inner = self.inner.lock().await;
        match inner.drafts.get_mut(&draft.id) {
            Some(existing) if existing.status == expected => *existing = draft.clone(),
            Some(_) => return Ok(None),
            None => return Err(PlexcastError::NotFound(format!("Draft {}", draft.id))),
        }

        let mut cancelled = Vec::new();
        for item in inner
            .items
            .iter_mut()
            .filter(|i| i.draft_id == draft.id && !i.status.is_terminal())
        {
            item.status = QueueStatus::Cancelled;
            item.next_retry_at = None;
            cancelled.push(item.clone());
        }
        Ok(Some(cancelled))
    }

    async fn get_item(&self, id: &str) -> Result<Option<PublishQueueItem>> {
        let inner = self.inner.lock().await;
        Ok(inner.items.iter().find(|i| i.id == id).cloned())
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<PublishQueueItem>> {
        let inner = self.inner.lock().await;
        Ok(take(
            inner.items.iter().filter(|i| filter.matches(i)).cloned(),
            filter.limit,
        ))
    }

    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PublishQueueItem>> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner.items.iter().filter(|i| i.is_due(now)).cloned().collect();
        due.sort_by_key(|i| i.dispatch_key());
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_item(&self, id: &str, now: DateTime<Utc>) -> Result<Option<PublishQueueItem>> {
        let mut inner = self.inner.lock().await;
        match inner.item_mut(id) {
            Some(item) if item.status == QueueStatus::Pending => {
                item.status = QueueStatus::Processing;
                item.started_at = Some(now);
                item.next_retry_at = None;
                Ok(Some(item.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_item_if(
        &self,
        item: &PublishQueueItem,
        expected: QueueStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.item_mut(&item.id) {
            Some(existing) if existing.status == expected => {
                let seq = existing.seq;
                *existing = item.clone();
                existing.seq = seq;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PlexcastError::NotFound(format!("Queue item {}", item.id))),
        }
    }

    async fn complete_item(
        &self,
        item: &PublishQueueItem,
        record: &SocialPublished,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.item_mut(&item.id) {
            Some(existing) if existing.status == QueueStatus::Processing => {
                let seq = existing.seq;
                *existing = item.clone();
                existing.seq = seq;
            }
            Some(_) => return Ok(false),
            None => return Err(PlexcastError::NotFound(format!("Queue item {}", item.id))),
        }
        inner.published.push(record.clone());
        Ok(true)
    }

    async fn stale_items(&self, started_before: DateTime<Utc>) -> Result<Vec<PublishQueueItem>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .items
            .iter()
            .filter(|i| i.status == QueueStatus::Processing)
            .filter(|i| i.started_at.is_some_and(|at| at < started_before))
            .cloned()
            .collect())
    }

    async fn get_published(&self, id: &str) -> Result<Option<SocialPublished>> {
        let inner = self.inner.lock().await;
        Ok(inner.published.iter().find(|p| p.id == id).cloned())
    }

    async fn list_published(&self, filter: &LedgerFilter) -> Result<Vec<SocialPublished>> {
        let inner = self.inner.lock().await;
        Ok(take(
            inner
                .published
                .iter()
                .rev()
                .filter(|p| filter.matches(p))
                .cloned(),
            filter.limit,
        ))
    }

    async fn update_published_metrics(
        &self,
        id: &str,
        metrics: &EngagementMetrics,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.published.iter_mut().find(|p| p.id == id) {
            Some(record) => {
                record.latest_metrics = Some(metrics.clone());
                record.metrics_updated_at = Some(at);
                Ok(())
            }
            None => Err(PlexcastError::NotFound(format!("Published record {}", id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionType;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    fn draft(status: DraftStatus) -> SocialDraft {
        let mut draft = SocialDraft::new(
            "alice".to_string(),
            "Hello".to_string(),
            vec![PlatformId::Twitter, PlatformId::Bluesky],
            at(0),
        );
        draft.status = status;
        draft
    }

    fn items_for(draft: &SocialDraft) -> Vec<PublishQueueItem> {
        draft
            .platforms
            .iter()
            .map(|p| PublishQueueItem::new(draft.id.clone(), *p, 0, at(0), 3, at(0)))
            .collect()
    }

    #[tokio::test]
    async fn test_enqueue_assigns_sequence_numbers() {
        let store = MemoryStore::new();
        let mut draft = draft(DraftStatus::PendingApproval);
        store.insert_draft(&draft).await.unwrap();

        draft.status = DraftStatus::Publishing;
        let items = items_for(&draft);
        assert!(store
            .enqueue_draft(&draft, DraftStatus::PendingApproval, &items)
            .await
            .unwrap());

        let stored = store.list_items(&ItemFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].seq, 1);
        assert_eq!(stored[1].seq, 2);
        assert_eq!(
            store.get_draft(&draft.id).await.unwrap().unwrap().status,
            DraftStatus::Publishing
        );
    }

    #[tokio::test]
    async fn test_enqueue_with_stale_status_writes_nothing() {
        let store = MemoryStore::new();
        let mut draft = draft(DraftStatus::Cancelled);
        store.insert_draft(&draft).await.unwrap();

        draft.status = DraftStatus::Publishing;
        let items = items_for(&draft);
        assert!(!store
            .enqueue_draft(&draft, DraftStatus::PendingApproval, &items)
            .await
            .unwrap());
        assert!(store.list_items(&ItemFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_is_all_or_nothing() {
        let store = MemoryStore::new();
        let first = draft(DraftStatus::Draft);
        store.insert_draft(&first).await.unwrap();
        let first_items = items_for(&first);
        store
            .enqueue_draft(&first, DraftStatus::Draft, &first_items)
            .await
            .unwrap();

        let second = draft(DraftStatus::Draft);
        store.insert_draft(&second).await.unwrap();
        let mut second_items = items_for(&second);
        second_items[1].id = first_items[0].id.clone();

        let mut publishing = second.clone();
        publishing.status = DraftStatus::Publishing;
        assert!(store
            .enqueue_draft(&publishing, DraftStatus::Draft, &second_items)
            .await
            .is_err());

        let filter = ItemFilter {
            draft_id: Some(second.id.clone()),
            ..Default::default()
        };
        assert!(store.list_items(&filter).await.unwrap().is_empty());
        assert_eq!(
            store.get_draft(&second.id).await.unwrap().unwrap().status,
            DraftStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let draft = draft(DraftStatus::Draft);
        store.insert_draft(&draft).await.unwrap();
        let items = items_for(&draft);
        store
            .enqueue_draft(&draft, DraftStatus::Draft, &items)
            .await
            .unwrap();

        let claimed = store.claim_item(&items[0].id, at(1)).await.unwrap().unwrap();
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert_eq!(claimed.started_at, Some(at(1)));
        assert!(store.claim_item(&items[0].id, at(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = MemoryStore::new();
        let draft = draft(DraftStatus::Draft);
        store.insert_draft(&draft).await.unwrap();
        let items = items_for(&draft);
        store
            .enqueue_draft(&draft, DraftStatus::Draft, &items)
            .await
            .unwrap();

        let record = SocialPublished {
            id: "rec-1".to_string(),
            draft_id: draft.id.clone(),
            queue_item_id: items[0].id.clone(),
            integration_id: "int-1".to_string(),
            platform: PlatformId::Twitter,
            platform_post_id: "1".to_string(),
            permalink: None,
            content_snapshot: "Hello".to_string(),
            content_hash: String::new(),
            status: crate::types::PublishedStatus::Success,
            retry_count: 0,
            published_at: at(2),
            metrics: None,
            latest_metrics: None,
            metrics_updated_at: None,
        };

        let mut done = items[0].clone();
        done.status = QueueStatus::Completed;
        // Still pending: refused
        assert!(!store.complete_item(&done, &record).await.unwrap());
        assert!(store
            .list_published(&LedgerFilter::default())
            .await
            .unwrap()
            .is_empty());

        store.claim_item(&items[0].id, at(1)).await.unwrap();
        assert!(store.complete_item(&done, &record).await.unwrap());
        assert_eq!(
            store.list_published(&LedgerFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_single_active_integration_per_platform() {
        let store = MemoryStore::new();
        let secret = SecretString::from("token");
        let first = SocialIntegration::new(
            "alice".to_string(),
            PlatformId::Twitter,
            ConnectionType::OAuth,
            vec![],
            at(0),
        );
        store.insert_integration(&first, &secret).await.unwrap();

        let second = SocialIntegration::new(
            "alice".to_string(),
            PlatformId::Twitter,
            ConnectionType::OAuth,
            vec![],
            at(1),
        );
        assert!(matches!(
            store.insert_integration(&second, &secret).await,
            Err(PlexcastError::DuplicateConnection(_))
        ));

        store
            .replace_integration(&first.id, &second, &secret)
            .await
            .unwrap();
        let active = store
            .active_integration("alice", PlatformId::Twitter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        let old = store.get_integration(&first.id).await.unwrap().unwrap();
        assert_eq!(old.status, IntegrationStatus::Disconnected);
        assert_eq!(store.list_integrations("alice").await.unwrap().len(), 2);
    }
}
