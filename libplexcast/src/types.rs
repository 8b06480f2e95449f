//! Core types for Plexcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PlexcastError, Result};
use crate::platforms::PlatformId;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Actors
// ============================================================================

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    /// Whether this actor may approve or reject drafts
    pub can_approve: bool,
}

impl Actor {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            can_approve: false,
        }
    }

    pub fn approver(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            can_approve: true,
        }
    }
}

// ============================================================================
// Integrations
// ============================================================================

/// How an integration authenticates against its platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[serde(rename = "oauth")]
    OAuth,
    ApiKey,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::OAuth => "oauth",
            ConnectionType::ApiKey => "api_key",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "oauth" => Ok(ConnectionType::OAuth),
            "api_key" | "api-key" | "apikey" => Ok(ConnectionType::ApiKey),
            _ => Err(format!(
                "Invalid connection type: '{}'. Valid options: oauth, api_key",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Pending,
    Connected,
    Expired,
    Error,
    Disconnected,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationStatus::Pending => "pending",
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Expired => "expired",
            IntegrationStatus::Error => "error",
            IntegrationStatus::Disconnected => "disconnected",
        }
    }

    /// An integration in this status blocks a second connect for the same platform
    pub fn blocks_new_connection(&self) -> bool {
        matches!(
            self,
            IntegrationStatus::Pending | IntegrationStatus::Connected | IntegrationStatus::Error
        )
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntegrationStatus::Pending),
            "connected" => Ok(IntegrationStatus::Connected),
            "expired" => Ok(IntegrationStatus::Expired),
            "error" => Ok(IntegrationStatus::Error),
            "disconnected" => Ok(IntegrationStatus::Disconnected),
            _ => Err(format!("Invalid integration status: '{}'", s)),
        }
    }
}

/// A user's connection to one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialIntegration {
    pub id: String,
    pub user_id: String,
    pub platform: PlatformId,
    pub connection_type: ConnectionType,
    pub status: IntegrationStatus,
    pub scopes: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SocialIntegration {
    pub fn new(
        user_id: String,
        platform: PlatformId,
        connection_type: ConnectionType,
        scopes: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id,
            platform,
            connection_type,
            status: IntegrationStatus::Connected,
            scopes,
            connected_at: now,
            last_sync_at: None,
            error_message: None,
            updated_at: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == IntegrationStatus::Connected
    }
}

// ============================================================================
// Drafts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Gif,
    Document,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Gif => "gif",
            MediaType::Document => "document",
        }
    }
}

/// Reference to an already uploaded media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub media_type: MediaType,
    pub url: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    PendingApproval,
    Approved,
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::PendingApproval => "pending_approval",
            DraftStatus::Approved => "approved",
            DraftStatus::Scheduled => "scheduled",
            DraftStatus::Publishing => "publishing",
            DraftStatus::Published => "published",
            DraftStatus::Failed => "failed",
            DraftStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DraftStatus::Published | DraftStatus::Failed | DraftStatus::Cancelled
        )
    }

    /// Edges of the draft state machine
    ///
    /// `Failed -> Publishing` exists only for the manual retry path.
    pub fn can_transition_to(&self, next: DraftStatus) -> bool {
        use DraftStatus::*;

        match (self, next) {
            (Draft, PendingApproval) | (Draft, Approved) => true,
            (PendingApproval, Approved) | (PendingApproval, Draft) => true,
            (Approved, Scheduled) | (Approved, Publishing) => true,
            (Scheduled, Publishing) => true,
            (Publishing, Published) | (Publishing, Failed) => true,
            (Failed, Publishing) => true,
            (current, Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DraftStatus::Draft),
            "pending_approval" => Ok(DraftStatus::PendingApproval),
            "approved" => Ok(DraftStatus::Approved),
            "scheduled" => Ok(DraftStatus::Scheduled),
            "publishing" => Ok(DraftStatus::Publishing),
            "published" => Ok(DraftStatus::Published),
            "failed" => Ok(DraftStatus::Failed),
            "cancelled" => Ok(DraftStatus::Cancelled),
            _ => Err(format!("Invalid draft status: '{}'", s)),
        }
    }
}

/// One logical post, composed once and published to several platforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialDraft {
    pub id: String,
    pub owner_id: String,
    pub content: String,
    pub media: Vec<MediaAttachment>,
    pub platforms: Vec<PlatformId>,
    pub requires_approval: bool,
    /// `None` publishes as soon as the draft is approved
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Lower values are dispatched first
    pub priority: i32,
    pub status: DraftStatus,
    pub rejection_reason: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialDraft {
    pub fn new(owner_id: String, content: String, platforms: Vec<PlatformId>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            owner_id,
            content,
            media: Vec::new(),
            platforms: dedup_platforms(platforms),
            requires_approval: false,
            scheduled_at: None,
            priority: 0,
            status: DraftStatus::Draft,
            rejection_reason: None,
            approved_at: None,
            approved_by: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing edges the state machine does not have
    pub fn transition(&mut self, next: DraftStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PlexcastError::InvalidState(format!(
                "Draft {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        self.owner_id == actor.user_id
    }
}

/// Remove duplicate platforms while keeping the first-seen order
pub fn dedup_platforms(platforms: Vec<PlatformId>) -> Vec<PlatformId> {
    let mut seen = Vec::with_capacity(platforms.len());
    for platform in platforms {
        if !seen.contains(&platform) {
            seen.push(platform);
        }
    }
    seen
}

// ============================================================================
// Publish queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Cancelled
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            _ => Err(format!("Invalid queue status: '{}'", s)),
        }
    }
}

/// Delivery of one draft to one platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishQueueItem {
    pub id: String,
    pub draft_id: String,
    pub platform: PlatformId,
    pub status: QueueStatus,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Set while the item waits for an automatic retry
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Ledger entry written on completion
    pub published_id: Option<String>,
    /// Insertion order, assigned by the store
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

impl PublishQueueItem {
    pub fn new(
        draft_id: String,
        platform: PlatformId,
        priority: i32,
        scheduled_at: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            draft_id,
            platform,
            status: QueueStatus::Pending,
            priority,
            scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            last_error: None,
            next_retry_at: None,
            published_id: None,
            seq: 0,
            created_at: now,
        }
    }

    /// Pending, scheduled in the past and not waiting out a backoff
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.scheduled_at <= now
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// Dispatch order: priority, then schedule, then insertion order
    pub fn dispatch_key(&self) -> (i32, DateTime<Utc>, i64) {
        (self.priority, self.scheduled_at, self.seq)
    }
}

/// How the terminal states of a draft's items decide the draft's own outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatePolicy {
    /// Published when at least one item completed
    #[default]
    BestEffort,
    /// Published only when every non-cancelled item completed
    AllOrNothing,
}

impl AggregatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatePolicy::BestEffort => "best_effort",
            AggregatePolicy::AllOrNothing => "all_or_nothing",
        }
    }

    /// Draft outcome for a set of item statuses
    ///
    /// Returns `None` while any item is still pending or processing, or when
    /// there are no items at all.
    pub fn aggregate(&self, statuses: &[QueueStatus]) -> Option<DraftStatus> {
        if statuses.is_empty() || statuses.iter().any(|s| !s.is_terminal()) {
            return None;
        }

        let completed = statuses
            .iter()
            .filter(|s| **s == QueueStatus::Completed)
            .count();
        let cancelled = statuses
            .iter()
            .filter(|s| **s == QueueStatus::Cancelled)
            .count();

        if cancelled == statuses.len() {
            return Some(DraftStatus::Cancelled);
        }

        let published = match self {
            AggregatePolicy::BestEffort => completed > 0,
            AggregatePolicy::AllOrNothing => completed == statuses.len() - cancelled,
        };

        Some(if published {
            DraftStatus::Published
        } else {
            DraftStatus::Failed
        })
    }
}

impl fmt::Display for AggregatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishedStatus {
    Success,
    Failed,
    Partial,
}

impl PublishedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishedStatus::Success => "success",
            PublishedStatus::Failed => "failed",
            PublishedStatus::Partial => "partial",
        }
    }
}

impl FromStr for PublishedStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(PublishedStatus::Success),
            "failed" => Ok(PublishedStatus::Failed),
            "partial" => Ok(PublishedStatus::Partial),
            _ => Err(format!("Invalid published status: '{}'", s)),
        }
    }
}

/// Engagement counters reported by a platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub reposts: u64,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub clicks: u64,
}

/// Immutable record of what was actually delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPublished {
    pub id: String,
    pub draft_id: String,
    pub queue_item_id: String,
    pub integration_id: String,
    pub platform: PlatformId,
    pub platform_post_id: String,
    pub permalink: Option<String>,
    /// Exact text sent, independent of later draft edits
    pub content_snapshot: String,
    /// SHA-256 of `content_snapshot`, hex encoded
    pub content_hash: String,
    pub status: PublishedStatus,
    pub retry_count: u32,
    pub published_at: DateTime<Utc>,
    pub metrics: Option<EngagementMetrics>,
    pub latest_metrics: Option<EngagementMetrics>,
    pub metrics_updated_at: Option<DateTime<Utc>>,
}
