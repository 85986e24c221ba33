//! Record stores for notifications, templates and preferences.
//!
//! The pipeline talks to storage through the traits below so the
//! persistence backend stays swappable: PostgreSQL in production, an
//! in-memory implementation for tests and local development. The
//! backend is selected by [`create_stores`] from configuration.

mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::notification::{EmailTemplate, Notification, NotificationStatus, Preference};

pub use memory::{MemoryNotificationStore, MemoryPreferenceStore, MemoryTemplateStore};
pub use postgres::{PostgresNotificationStore, PostgresPreferenceStore, PostgresTemplateStore};

/// Errors that can occur in a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid stored value: {0}")]
    Decode(String),

    #[error("unknown storage backend: {0}")]
    UnknownBackend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for notification records.
///
/// Status updates are last-write-wins; the worker pool and the queue
/// consumer share access without coordination.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: &Notification) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>>;

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> StoreResult<()>;

    /// Pending notifications older than `older_than`, used by the startup
    /// recovery scan to re-enqueue rows stranded between create and submit.
    async fn stale_pending(&self, older_than: Duration) -> StoreResult<Vec<Notification>>;
}

/// Storage for email template records.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn create(&self, template: &EmailTemplate) -> StoreResult<()>;

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<EmailTemplate>>;
}

/// Storage for per-user delivery preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn upsert(&self, preference: &Preference) -> StoreResult<()>;

    /// Whether the user accepts deliveries on the channel. Users without
    /// an explicit preference are opted in.
    async fn channel_enabled(&self, user_id: i64, channel: &str) -> StoreResult<bool>;
}

/// The set of stores the pipeline is wired with.
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub preferences: Arc<dyn PreferenceStore>,
}

impl Stores {
    /// In-memory stores, used by tests and the "memory" backend.
    pub fn in_memory() -> Self {
        Self {
            notifications: Arc::new(MemoryNotificationStore::new()),
            templates: Arc::new(MemoryTemplateStore::new()),
            preferences: Arc::new(MemoryPreferenceStore::new()),
        }
    }
}

/// Create the store set for the configured backend.
pub async fn create_stores(config: &DatabaseConfig) -> StoreResult<Stores> {
    match config.backend.as_str() {
        "postgres" => {
            let pool = PgPoolOptions::new()
                .max_connections(config.pool_size)
                .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_seconds))
                .connect(&config.url)
                .await?;

            tracing::info!(pool_size = config.pool_size, "PostgreSQL connection pool created");

            Ok(Stores {
                notifications: Arc::new(PostgresNotificationStore::new(pool.clone())),
                templates: Arc::new(PostgresTemplateStore::new(pool.clone())),
                preferences: Arc::new(PostgresPreferenceStore::new(pool)),
            })
        }
        "memory" => {
            tracing::info!("Using in-memory stores");
            Ok(Stores::in_memory())
        }
        other => Err(StoreError::UnknownBackend(other.to_string())),
    }
}
