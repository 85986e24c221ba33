//! PostgreSQL store implementations.
//!
//! Status updates are plain last-write-wins UPDATEs; no transaction
//! spans the create-then-submit sequence (the startup recovery scan
//! compensates for rows stranded in between).
//!
//! Table structure:
//! - `notifications` - notification records with JSONB metadata
//! - `templates` - email templates, unique on name
//! - `preferences` - per user/channel opt-in, unique on (user_id, channel)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::notification::{EmailTemplate, Notification, NotificationStatus, Preference};

use super::{NotificationStore, PreferenceStore, StoreError, StoreResult, TemplateStore};

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: i64,
    kind: String,
    title: String,
    content: String,
    channel: String,
    is_read: bool,
    status: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<NotificationStatus>()
            .map_err(StoreError::Decode)?;
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            title: row.title,
            content: row.content,
            channel: row.channel,
            is_read: row.is_read,
            status,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed notification storage.
pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_NOTIFICATION: &str = r#"
    SELECT id, user_id, type AS kind, title, content, channel,
           is_read, status, metadata, created_at, updated_at
    FROM notifications
"#;

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn create(&self, notification: &Notification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, type, title, content, channel, is_read, status, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.content)
        .bind(&notification.channel)
        .bind(notification.is_read)
        .bind(notification.status.as_str())
        .bind(&notification.metadata)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        let row: Option<NotificationRow> =
            sqlx::query_as(&format!("{} WHERE id = $1", SELECT_NOTIFICATION))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Notification::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        Ok(())
    }

    async fn stale_pending(&self, older_than: Duration) -> StoreResult<Vec<Notification>> {
        let cutoff = Utc::now() - older_than;
        let rows: Vec<NotificationRow> = sqlx::query_as(&format!(
            "{} WHERE status = 'pending' AND created_at < $1 ORDER BY created_at ASC",
            SELECT_NOTIFICATION
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Notification::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: Uuid,
    name: String,
    subject: String,
    body_html: String,
    body_text: String,
    channel: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TemplateRow> for EmailTemplate {
    fn from(row: TemplateRow) -> Self {
        EmailTemplate {
            id: row.id,
            name: row.name,
            subject: row.subject,
            body_html: row.body_html,
            body_text: row.body_text,
            channel: row.channel,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed template storage.
pub struct PostgresTemplateStore {
    pool: PgPool,
}

impl PostgresTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PostgresTemplateStore {
    async fn create(&self, template: &EmailTemplate) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO templates
                (id, name, subject, body_html, body_text, channel, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.subject)
        .bind(&template.body_html)
        .bind(&template.body_text)
        .bind(&template.channel)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(template.name.clone()));
        }

        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<EmailTemplate>> {
        let row: Option<TemplateRow> = sqlx::query_as(
            r#"
            SELECT id, name, subject, body_html, body_text, channel, created_at, updated_at
            FROM templates
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EmailTemplate::from))
    }
}

/// PostgreSQL-backed preference storage.
pub struct PostgresPreferenceStore {
    pool: PgPool,
}

impl PostgresPreferenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PostgresPreferenceStore {
    async fn upsert(&self, preference: &Preference) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, channel, enabled, frequency, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, channel)
            DO UPDATE SET enabled = $3, frequency = $4, updated_at = $5
            "#,
        )
        .bind(preference.user_id)
        .bind(&preference.channel)
        .bind(preference.enabled)
        .bind(&preference.frequency)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn channel_enabled(&self, user_id: i64, channel: &str) -> StoreResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT enabled FROM preferences
            WHERE user_id = $1 AND channel = $2
            "#,
        )
        .bind(user_id)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(enabled,)| enabled).unwrap_or(true))
    }
}
