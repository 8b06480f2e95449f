//! Publish ledger
//!
//! Append-only record of what was delivered where. Records are written by
//! the scheduler in the same atomic step that completes a queue item; this
//! module builds them, reads them back, refreshes engagement metrics and
//! checks the ledger against the queue.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::platforms::{PublishReceipt, PublisherRegistry};
use crate::store::{DraftFilter, ItemFilter, LedgerFilter, Store};
use crate::types::{
    AggregatePolicy, DraftStatus, PublishQueueItem, PublishedStatus, QueueStatus, SocialDraft,
    SocialPublished,
};

/// SHA-256 of `content`, lowercase hex
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Ledger record for a successful delivery of `item`
///
/// `content` is the exact text handed to the publisher.
pub fn build_record(
    item: &PublishQueueItem,
    integration_id: &str,
    content: &str,
    receipt: &PublishReceipt,
    now: DateTime<Utc>,
) -> SocialPublished {
    SocialPublished {
        id: Uuid::new_v4().to_string(),
        draft_id: item.draft_id.clone(),
        queue_item_id: item.id.clone(),
        integration_id: integration_id.to_string(),
        platform: item.platform,
        platform_post_id: receipt.remote_post_id.clone(),
        permalink: receipt.permalink.clone(),
        content_snapshot: content.to_string(),
        content_hash: content_hash(content),
        status: PublishedStatus::Success,
        retry_count: item.retry_count,
        published_at: now,
        metrics: receipt.metrics.clone(),
        latest_metrics: receipt.metrics.clone(),
        metrics_updated_at: receipt.metrics.as_ref().map(|_| now),
    }
}

/// Result of a metrics refresh pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Draft whose stored status disagrees with its items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMismatch {
    pub draft_id: String,
    pub stored: DraftStatus,
    pub expected: DraftStatus,
}

/// Inconsistencies between queue, ledger and drafts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Completed items with no ledger record
    pub missing_records: Vec<String>,
    /// Ledger records whose queue item is not completed
    pub orphaned_records: Vec<String>,
    pub status_mismatches: Vec<StatusMismatch>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_records.is_empty()
            && self.orphaned_records.is_empty()
            && self.status_mismatches.is_empty()
    }
}

#[derive(Clone)]
pub struct PublishLedger {
    store: Arc<dyn Store>,
    publishers: PublisherRegistry,
}

impl PublishLedger {
    pub fn new(store: Arc<dyn Store>, publishers: PublisherRegistry) -> Self {
        Self { store, publishers }
    }

    pub async fn get(&self, id: &str) -> Result<Option<SocialPublished>> {
        self.store.get_published(id).await
    }

    pub async fn records_for_draft(&self, draft_id: &str) -> Result<Vec<SocialPublished>> {
        self.store
            .list_published(&LedgerFilter {
                draft_id: Some(draft_id.to_string()),
                ..Default::default()
            })
            .await
    }

    pub async fn list(&self, filter: &LedgerFilter) -> Result<Vec<SocialPublished>> {
        self.store.list_published(filter).await
    }

    /// Ask each record's publisher for fresh engagement metrics
    ///
    /// Records whose platform has no publisher, or whose publisher does not
    /// report metrics, are skipped. Failures are logged and counted; the
    /// pass never stops early.
    pub async fn refresh_metrics(
        &self,
        filter: &LedgerFilter,
        now: DateTime<Utc>,
    ) -> Result<MetricsReport> {
        let mut report = MetricsReport::default();

        for record in self.store.list_published(filter).await? {
            let Some(publisher) = self.publishers.get(record.platform) else {
                report.skipped += 1;
                continue;
            };
            let Some(credentials) = self
                .store
                .integration_credentials(&record.integration_id)
                .await?
            else {
                debug!("No credentials left for ledger record {}", record.id);
                report.skipped += 1;
                continue;
            };

            match publisher
                .fetch_metrics(&record.platform_post_id, &credentials)
                .await
            {
                Ok(metrics) => {
                    self.store
                        .update_published_metrics(&record.id, &metrics, now)
                        .await?;
                    report.updated += 1;
                }
                Err(crate::error::PublishError::NotSupported(_)) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch {} metrics for {}: {}",
                        record.platform, record.platform_post_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Metrics refresh: {} updated, {} skipped, {} failed",
            report.updated, report.skipped, report.failed
        );
        Ok(report)
    }

    /// Cross-check ledger records, queue items and draft statuses
    ///
    /// Only drafts that have reached the publishing stage are compared with
    /// the aggregate of their items; drafts whose items are still in flight
    /// are left alone.
    pub async fn reconcile(&self, policy: AggregatePolicy) -> Result<ReconcileReport> {
        let items = self.store.list_items(&ItemFilter::default()).await?;
        let records = self.store.list_published(&LedgerFilter::default()).await?;
        let drafts = self.store.list_drafts(&DraftFilter::default()).await?;

        let recorded: HashSet<&str> = records.iter().map(|r| r.queue_item_id.as_str()).collect();
        let by_id: HashMap<&str, &PublishQueueItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();

        let mut report = ReconcileReport::default();

        for item in &items {
            if item.status == QueueStatus::Completed && !recorded.contains(item.id.as_str()) {
                report.missing_records.push(item.id.clone());
            }
        }

        for record in &records {
            let completed = by_id
                .get(record.queue_item_id.as_str())
                .is_some_and(|i| i.status == QueueStatus::Completed);
            if !completed {
                report.orphaned_records.push(record.id.clone());
            }
        }

        let mut statuses: HashMap<&str, Vec<QueueStatus>> = HashMap::new();
        for item in &items {
            statuses
                .entry(item.draft_id.as_str())
                .or_default()
                .push(item.status);
        }

        for draft in drafts.iter().filter(|d| reconcilable(d)) {
            let item_statuses = statuses
                .get(draft.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let expected = policy
                .aggregate(item_statuses)
                .unwrap_or(DraftStatus::Publishing);

            if expected != draft.status {
                report.status_mismatches.push(StatusMismatch {
                    draft_id: draft.id.clone(),
                    stored: draft.status,
                    expected,
                });
            }
        }

        if report.is_clean() {
            info!(
                "Reconciled {} items, {} ledger records: clean",
                items.len(),
                records.len()
            );
        } else {
            warn!(
                "Reconcile found {} missing records, {} orphaned records, {} status mismatches",
                report.missing_records.len(),
                report.orphaned_records.len(),
                report.status_mismatches.len()
            );
        }

        Ok(report)
    }
}

fn reconcilable(draft: &SocialDraft) -> bool {
    matches!(
        draft.status,
        DraftStatus::Publishing | DraftStatus::Published | DraftStatus::Failed
    )
}
