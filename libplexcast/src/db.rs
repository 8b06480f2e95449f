//! SQLite persistence for Plexcast
//!
//! [`Database`] implements [`Store`] over a sqlx connection pool. The schema
//! lives in `libplexcast/migrations` and is applied on open. Timestamps are
//! stored as Unix milliseconds, list-valued columns as JSON text.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use tracing::debug;

use crate::error::{DbError, PlexcastError, Result};
use crate::platforms::PlatformId;
use crate::store::{DraftFilter, ItemFilter, LedgerFilter, Store};
use crate::types::{
    DraftStatus, EngagementMetrics, IntegrationStatus, PublishQueueItem, QueueStatus, SocialDraft,
    SocialIntegration, SocialPublished,
};

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const ITEM_COLUMNS: &str = "seq, id, draft_id, platform, status, priority, scheduled_at, \
    started_at, completed_at, retry_count, max_retries, last_error, next_retry_at, \
    published_id, created_at";

const DRAFT_COLUMNS: &str = "id, owner_id, content, media, platforms, requires_approval, \
    scheduled_at, priority, status, rejection_reason, approved_at, approved_by, tags, \
    created_at, updated_at";

const INTEGRATION_COLUMNS: &str = "id, user_id, platform, connection_type, status, scopes, \
    connected_at, last_sync_at, error_message, updated_at";

const PUBLISHED_COLUMNS: &str = "id, draft_id, queue_item_id, integration_id, platform, \
    platform_post_id, permalink, content_snapshot, content_hash, status, retry_count, \
    published_at, metrics, latest_metrics, metrics_updated_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        debug!("Opened database at {}", expanded_path);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Column conversion
// ============================================================================

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(millis)
}

fn corrupt(table: &'static str, message: impl Into<String>) -> PlexcastError {
    DbError::CorruptRow {
        table,
        message: message.into(),
    }
    .into()
}

fn get<'r, T>(row: &'r SqliteRow, table: &'static str, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| corrupt(table, format!("{}: {}", column, e)))
}

fn time(row: &SqliteRow, table: &'static str, column: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = get(row, table, column)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(table, format!("{} out of range: {}", column, ms)))
}

fn opt_time(row: &SqliteRow, table: &'static str, column: &str) -> Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = get(row, table, column)?;
    ms.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| corrupt(table, format!("{} out of range: {}", column, ms)))
    })
    .transpose()
}

fn parsed<T>(row: &SqliteRow, table: &'static str, column: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = get(row, table, column)?;
    raw.parse().map_err(|e: String| corrupt(table, e))
}

fn json<T: DeserializeOwned>(row: &SqliteRow, table: &'static str, column: &str) -> Result<T> {
    let raw: String = get(row, table, column)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(table, format!("{}: {}", column, e)))
}

fn opt_json<T: DeserializeOwned>(
    row: &SqliteRow,
    table: &'static str,
    column: &str,
) -> Result<Option<T>> {
    let raw: Option<String> = get(row, table, column)?;
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|e| corrupt(table, format!("{}: {}", column, e)))
    })
    .transpose()
}

fn count(row: &SqliteRow, table: &'static str, column: &str) -> Result<u32> {
    let value: i64 = get(row, table, column)?;
    u32::try_from(value).map_err(|_| corrupt(table, format!("{} out of range: {}", column, value)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| PlexcastError::Validation(format!("Unserializable value: {}", e)))
}

fn duplicate_or_db(error: sqlx::Error, integration: &SocialIntegration) -> PlexcastError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            return PlexcastError::DuplicateConnection(format!(
                "{} already has an active {} integration",
                integration.user_id, integration.platform
            ));
        }
    }
    DbError::SqlxError(error).into()
}

fn integration_from_row(row: &SqliteRow) -> Result<SocialIntegration> {
    const T: &str = "integrations";
    Ok(SocialIntegration {
        id: get(row, T, "id")?,
        user_id: get(row, T, "user_id")?,
        platform: parsed(row, T, "platform")?,
        connection_type: parsed(row, T, "connection_type")?,
        status: parsed(row, T, "status")?,
        scopes: json(row, T, "scopes")?,
        connected_at: time(row, T, "connected_at")?,
        last_sync_at: opt_time(row, T, "last_sync_at")?,
        error_message: get(row, T, "error_message")?,
        updated_at: time(row, T, "updated_at")?,
    })
}

fn draft_from_row(row: &SqliteRow) -> Result<SocialDraft> {
    const T: &str = "drafts";
    Ok(SocialDraft {
        id: get(row, T, "id")?,
        owner_id: get(row, T, "owner_id")?,
        content: get(row, T, "content")?,
        media: json(row, T, "media")?,
        platforms: json(row, T, "platforms")?,
        requires_approval: get::<i64>(row, T, "requires_approval")? != 0,
        scheduled_at: opt_time(row, T, "scheduled_at")?,
        priority: get::<i64>(row, T, "priority")? as i32,
        status: parsed(row, T, "status")?,
        rejection_reason: get(row, T, "rejection_reason")?,
        approved_at: opt_time(row, T, "approved_at")?,
        approved_by: get(row, T, "approved_by")?,
        tags: json(row, T, "tags")?,
        created_at: time(row, T, "created_at")?,
        updated_at: time(row, T, "updated_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<PublishQueueItem> {
    const T: &str = "queue_items";
    Ok(PublishQueueItem {
        id: get(row, T, "id")?,
        draft_id: get(row, T, "draft_id")?,
        platform: parsed(row, T, "platform")?,
        status: parsed(row, T, "status")?,
        priority: get::<i64>(row, T, "priority")? as i32,
        scheduled_at: time(row, T, "scheduled_at")?,
        started_at: opt_time(row, T, "started_at")?,
        completed_at: opt_time(row, T, "completed_at")?,
        retry_count: count(row, T, "retry_count")?,
        max_retries: count(row, T, "max_retries")?,
        last_error: get(row, T, "last_error")?,
        next_retry_at: opt_time(row, T, "next_retry_at")?,
        published_id: get(row, T, "published_id")?,
        seq: get(row, T, "seq")?,
        created_at: time(row, T, "created_at")?,
    })
}

fn published_from_row(row: &SqliteRow) -> Result<SocialPublished> {
    const T: &str = "published";
    Ok(SocialPublished {
        id: get(row, T, "id")?,
        draft_id: get(row, T, "draft_id")?,
        queue_item_id: get(row, T, "queue_item_id")?,
        integration_id: get(row, T, "integration_id")?,
        platform: parsed(row, T, "platform")?,
        platform_post_id: get(row, T, "platform_post_id")?,
        permalink: get(row, T, "permalink")?,
        content_snapshot: get(row, T, "content_snapshot")?,
        content_hash: get(row, T, "content_hash")?,
        status: parsed(row, T, "status")?,
        retry_count: count(row, T, "retry_count")?,
        published_at: time(row, T, "published_at")?,
        metrics: opt_json(row, T, "metrics")?,
        latest_metrics: opt_json(row, T, "latest_metrics")?,
        metrics_updated_at: opt_time(row, T, "metrics_updated_at")?,
    })
}

fn insert_integration_query(integration: &SocialIntegration, scopes: String) -> Query<'_> {
    sqlx::query(
        r#"
        INSERT INTO integrations (id, user_id, platform, connection_type, status, scopes,
                                  connected_at, last_sync_at, error_message, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&integration.id)
    .bind(&integration.user_id)
    .bind(integration.platform.as_str())
    .bind(integration.connection_type.as_str())
    .bind(integration.status.as_str())
    .bind(scopes)
    .bind(millis(integration.connected_at))
    .bind(opt_millis(integration.last_sync_at))
    .bind(&integration.error_message)
    .bind(millis(integration.updated_at))
}

fn insert_item_query(item: &PublishQueueItem) -> Query<'_> {
    sqlx::query(
        r#"
        INSERT INTO queue_items (id, draft_id, platform, status, priority, scheduled_at,
                                 started_at, completed_at, retry_count, max_retries,
                                 last_error, next_retry_at, published_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&item.id)
    .bind(&item.draft_id)
    .bind(item.platform.as_str())
    .bind(item.status.as_str())
    .bind(item.priority as i64)
    .bind(millis(item.scheduled_at))
    .bind(opt_millis(item.started_at))
    .bind(opt_millis(item.completed_at))
    .bind(item.retry_count as i64)
    .bind(item.max_retries as i64)
    .bind(&item.last_error)
    .bind(opt_millis(item.next_retry_at))
    .bind(&item.published_id)
    .bind(millis(item.created_at))
}

fn update_item_query(item: &PublishQueueItem, expected: QueueStatus) -> Query<'_> {
    sqlx::query(
        r#"
        UPDATE queue_items
        SET status = ?, priority = ?, scheduled_at = ?, started_at = ?, completed_at = ?,
            retry_count = ?, max_retries = ?, last_error = ?, next_retry_at = ?,
            published_id = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(item.status.as_str())
    .bind(item.priority as i64)
    .bind(millis(item.scheduled_at))
    .bind(opt_millis(item.started_at))
    .bind(opt_millis(item.completed_at))
    .bind(item.retry_count as i64)
    .bind(item.max_retries as i64)
    .bind(&item.last_error)
    .bind(opt_millis(item.next_retry_at))
    .bind(&item.published_id)
    .bind(&item.id)
    .bind(expected.as_str())
}

struct DraftJson {
    media: String,
    platforms: String,
    tags: String,
}

impl DraftJson {
    fn of(draft: &SocialDraft) -> Result<Self> {
        Ok(Self {
            media: to_json(&draft.media)?,
            platforms: to_json(&draft.platforms)?,
            tags: to_json(&draft.tags)?,
        })
    }
}

fn update_draft_query<'q>(
    draft: &'q SocialDraft,
    encoded: DraftJson,
    expected: DraftStatus,
) -> Query<'q> {
    sqlx::query(
        r#"
        UPDATE drafts
        SET content = ?, media = ?, platforms = ?, requires_approval = ?, scheduled_at = ?,
            priority = ?, status = ?, rejection_reason = ?, approved_at = ?, approved_by = ?,
            tags = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(&draft.content)
    .bind(encoded.media)
    .bind(encoded.platforms)
    .bind(draft.requires_approval as i64)
    .bind(opt_millis(draft.scheduled_at))
    .bind(draft.priority as i64)
    .bind(draft.status.as_str())
    .bind(&draft.rejection_reason)
    .bind(opt_millis(draft.approved_at))
    .bind(&draft.approved_by)
    .bind(encoded.tags)
    .bind(millis(draft.updated_at))
    .bind(&draft.id)
    .bind(expected.as_str())
}

#[async_trait]
impl Store for Database {
    async fn insert_integration(
        &self,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        let scopes = to_json(&integration.scopes)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        insert_integration_query(integration, scopes)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_or_db(e, integration))?;

        sqlx::query("INSERT INTO integration_credentials (integration_id, secret) VALUES (?, ?)")
            .bind(&integration.id)
            .bind(credentials.expose_secret())
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn replace_integration(
        &self,
        old_id: &str,
        integration: &SocialIntegration,
        credentials: &SecretString,
    ) -> Result<()> {
        let scopes = to_json(&integration.scopes)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let retired = sqlx::query(
            "UPDATE integrations SET status = 'disconnected', updated_at = ? WHERE id = ?",
        )
        .bind(millis(integration.connected_at))
        .bind(old_id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        if retired.rows_affected() == 0 {
            return Err(PlexcastError::NotFound(format!("Integration {}", old_id)));
        }

        insert_integration_query(integration, scopes)
            .execute(&mut *tx)
            .await
            .map_err(|e| duplicate_or_db(e, integration))?;

        sqlx::query("INSERT INTO integration_credentials (integration_id, secret) VALUES (?, ?)")
            .bind(&integration.id)
            .bind(credentials.expose_secret())
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn get_integration(&self, id: &str) -> Result<Option<SocialIntegration>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM integrations WHERE id = ?",
            INTEGRATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(integration_from_row).transpose()
    }

    async fn active_integration(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<SocialIntegration>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM integrations
            WHERE user_id = ? AND platform = ? AND status <> 'disconnected'
            LIMIT 1
            "#,
            INTEGRATION_COLUMNS
        ))
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(integration_from_row).transpose()
    }

    async fn list_integrations(&self, user_id: &str) -> Result<Vec<SocialIntegration>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM integrations WHERE user_id = ? ORDER BY connected_at ASC, rowid ASC",
            INTEGRATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(integration_from_row).collect()
    }

    async fn update_integration_if(
        &self,
        integration: &SocialIntegration,
        expected: IntegrationStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE integrations
            SET status = ?, scopes = ?, last_sync_at = ?, error_message = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(integration.status.as_str())
        .bind(to_json(&integration.scopes)?)
        .bind(opt_millis(integration.last_sync_at))
        .bind(&integration.error_message)
        .bind(millis(integration.updated_at))
        .bind(&integration.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or_db(e, integration))?;

        if result.rows_affected() == 0 {
            if self.get_integration(&integration.id).await?.is_none() {
                return Err(PlexcastError::NotFound(format!(
                    "Integration {}",
                    integration.id
                )));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn integration_credentials(&self, id: &str) -> Result<Option<SecretString>> {
        let row = sqlx::query("SELECT secret FROM integration_credentials WHERE integration_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.map(|row| {
            let secret: String = get(&row, "integration_credentials", "secret")?;
            Ok(SecretString::from(secret))
        })
        .transpose()
    }

    async fn insert_draft(&self, draft: &SocialDraft) -> Result<()> {
        let encoded = DraftJson::of(draft)?;
        sqlx::query(
            r#"
            INSERT INTO drafts (id, owner_id, content, media, platforms, requires_approval,
                                scheduled_at, priority, status, rejection_reason, approved_at,
                                approved_by, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.id)
        .bind(&draft.owner_id)
        .bind(&draft.content)
        .bind(encoded.media)
        .bind(encoded.platforms)
        .bind(draft.requires_approval as i64)
        .bind(opt_millis(draft.scheduled_at))
        .bind(draft.priority as i64)
        .bind(draft.status.as_str())
        .bind(&draft.rejection_reason)
        .bind(opt_millis(draft.approved_at))
        .bind(&draft.approved_by)
        .bind(encoded.tags)
        .bind(millis(draft.created_at))
        .bind(millis(draft.updated_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get_draft(&self, id: &str) -> Result<Option<SocialDraft>> {
        let row = sqlx::query(&format!("SELECT {} FROM drafts WHERE id = ?", DRAFT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(draft_from_row).transpose()
    }

    async fn update_draft_if(&self, draft: &SocialDraft, expected: DraftStatus) -> Result<bool> {
        let encoded = DraftJson::of(draft)?;
        let result = update_draft_query(draft, encoded, expected)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 && self.get_draft(&draft.id).await?.is_none() {
            return Err(PlexcastError::NotFound(format!("Draft {}", draft.id)));
        }
        Ok(result.rows_affected() == 1)
    }

    async fn list_drafts(&self, filter: &DraftFilter) -> Result<Vec<SocialDraft>> {
        // Build the WHERE clause dynamically
        let mut where_clauses = vec!["1=1"];
        if filter.owner_id.is_some() {
            where_clauses.push("owner_id = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }

        let query_str = format!(
            "SELECT {} FROM drafts WHERE {} ORDER BY created_at DESC, id ASC LIMIT ?",
            DRAFT_COLUMNS,
            where_clauses.join(" AND ")
        );

        // Bind parameters in the same order as WHERE clauses
        let mut query = sqlx::query(&query_str);
        if let Some(owner_id) = &filter.owner_id {
            query = query.bind(owner_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        query = query.bind(filter.limit.map_or(-1, |l| l as i64));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        rows.iter().map(draft_from_row).collect()
    }

    async fn due_scheduled_drafts(&self, now: DateTime<Utc>) -> Result<Vec<SocialDraft>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM drafts
            WHERE status = 'scheduled' AND (scheduled_at IS NULL OR scheduled_at <= ?)
            ORDER BY scheduled_at ASC
            "#,
            DRAFT_COLUMNS
        ))
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(draft_from_row).collect()
    }

    async fn enqueue_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
        items: &[PublishQueueItem],
    ) -> Result<bool> {
        let encoded = DraftJson::of(draft)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = update_draft_query(draft, encoded, expected)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            if self.get_draft(&draft.id).await?.is_none() {
                return Err(PlexcastError::NotFound(format!("Draft {}", draft.id)));
            }
            return Ok(false);
        }

        for item in items {
            // Dropping the transaction on error rolls back the draft update too
            insert_item_query(item)
                .execute(&mut *tx)
                .await
                .map_err(DbError::SqlxError)?;
        }

        tx.commit().await.map_err(DbError::SqlxError)?;
        debug!("Enqueued {} item(s) for draft {}", items.len(), draft.id);
        Ok(true)
    }

    async fn cancel_draft(
        &self,
        draft: &SocialDraft,
        expected: DraftStatus,
    ) -> Result<Option<Vec<PublishQueueItem>>> {
        let encoded = DraftJson::of(draft)?;
        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        // The draft write comes first so the transaction holds the write lock
        // before reading the items it cancels
        let updated = update_draft_query(draft, encoded, expected)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            if self.get_draft(&draft.id).await?.is_none() {
                return Err(PlexcastError::NotFound(format!("Draft {}", draft.id)));
            }
            return Ok(None);
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM queue_items
            WHERE draft_id = ? AND status IN ('pending', 'processing')
            ORDER BY seq ASC
            "#,
            ITEM_COLUMNS
        ))
        .bind(&draft.id)
        .fetch_all(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;
        let mut cancelled = rows.iter().map(item_from_row).collect::<Result<Vec<_>>>()?;

        sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'cancelled', next_retry_at = NULL
            WHERE draft_id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(&draft.id)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;

        for item in &mut cancelled {
            item.status = QueueStatus::Cancelled;
            item.next_retry_at = None;
        }
        debug!(
            "Cancelled draft {} with {} unfinished item(s)",
            draft.id,
            cancelled.len()
        );
        Ok(Some(cancelled))
    }

    async fn get_item(&self, id: &str) -> Result<Option<PublishQueueItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM queue_items WHERE id = ?",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<PublishQueueItem>> {
        let mut where_clauses = vec!["1=1"];
        if filter.draft_id.is_some() {
            where_clauses.push("draft_id = ?");
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }

        let query_str = format!(
            "SELECT {} FROM queue_items WHERE {} ORDER BY seq ASC LIMIT ?",
            ITEM_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(draft_id) = &filter.draft_id {
            query = query.bind(draft_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        query = query.bind(filter.limit.map_or(-1, |l| l as i64));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        rows.iter().map(item_from_row).collect()
    }

    async fn due_items(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<PublishQueueItem>> {
        let now = millis(now);
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM queue_items
            WHERE status = 'pending'
              AND scheduled_at <= ?
              AND (next_retry_at IS NULL OR next_retry_at <= ?)
            ORDER BY priority ASC, scheduled_at ASC, seq ASC
            LIMIT ?
            "#,
            ITEM_COLUMNS
        ))
        .bind(now)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    async fn claim_item(&self, id: &str, now: DateTime<Utc>) -> Result<Option<PublishQueueItem>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE queue_items
            SET status = 'processing', started_at = ?, next_retry_at = NULL
            WHERE id = ? AND status = 'pending'
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(millis(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn update_item_if(
        &self,
        item: &PublishQueueItem,
        expected: QueueStatus,
    ) -> Result<bool> {
        let result = update_item_query(item, expected)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 && self.get_item(&item.id).await?.is_none() {
            return Err(PlexcastError::NotFound(format!("Queue item {}", item.id)));
        }
        Ok(result.rows_affected() == 1)
    }

    async fn complete_item(
        &self,
        item: &PublishQueueItem,
        record: &SocialPublished,
    ) -> Result<bool> {
        let metrics = record.metrics.as_ref().map(to_json).transpose()?;
        let latest_metrics = record.latest_metrics.as_ref().map(to_json).transpose()?;

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        let updated = update_item_query(item, QueueStatus::Processing)
            .execute(&mut *tx)
            .await
            .map_err(DbError::SqlxError)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(DbError::SqlxError)?;
            return Ok(false);
        }

        sqlx::query(&format!(
            "INSERT INTO published ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            PUBLISHED_COLUMNS
        ))
        .bind(&record.id)
        .bind(&record.draft_id)
        .bind(&record.queue_item_id)
        .bind(&record.integration_id)
        .bind(record.platform.as_str())
        .bind(&record.platform_post_id)
        .bind(&record.permalink)
        .bind(&record.content_snapshot)
        .bind(&record.content_hash)
        .bind(record.status.as_str())
        .bind(record.retry_count as i64)
        .bind(millis(record.published_at))
        .bind(metrics)
        .bind(latest_metrics)
        .bind(opt_millis(record.metrics_updated_at))
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(true)
    }

    async fn stale_items(&self, started_before: DateTime<Utc>) -> Result<Vec<PublishQueueItem>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM queue_items
            WHERE status = 'processing' AND started_at < ?
            ORDER BY started_at ASC
            "#,
            ITEM_COLUMNS
        ))
        .bind(millis(started_before))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(item_from_row).collect()
    }

    async fn get_published(&self, id: &str) -> Result<Option<SocialPublished>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM published WHERE id = ?",
            PUBLISHED_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(published_from_row).transpose()
    }

    async fn list_published(&self, filter: &LedgerFilter) -> Result<Vec<SocialPublished>> {
        let mut where_clauses = vec!["1=1"];
        if filter.draft_id.is_some() {
            where_clauses.push("draft_id = ?");
        }
        if filter.platform.is_some() {
            where_clauses.push("platform = ?");
        }

        let query_str = format!(
            "SELECT {} FROM published WHERE {} ORDER BY published_at DESC, rowid DESC LIMIT ?",
            PUBLISHED_COLUMNS,
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str);
        if let Some(draft_id) = &filter.draft_id {
            query = query.bind(draft_id);
        }
        if let Some(platform) = filter.platform {
            query = query.bind(platform.as_str());
        }
        query = query.bind(filter.limit.map_or(-1, |l| l as i64));

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;
        rows.iter().map(published_from_row).collect()
    }

    async fn update_published_metrics(
        &self,
        id: &str,
        metrics: &EngagementMetrics,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE published SET latest_metrics = ?, metrics_updated_at = ? WHERE id = ?",
        )
        .bind(to_json(metrics)?)
        .bind(millis(at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(PlexcastError::NotFound(format!("Published record {}", id)));
        }
        Ok(())
    }
}
