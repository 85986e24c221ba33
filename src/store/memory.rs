//! In-memory store implementations using DashMap.
//!
//! Records are lost on restart. Used by tests and the "memory" backend
//! for local development without a database.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::notification::{EmailTemplate, Notification, NotificationStatus, Preference};

use super::{NotificationStore, PreferenceStore, StoreError, StoreResult, TemplateStore};

/// In-memory notification storage.
pub struct MemoryNotificationStore {
    records: DashMap<Uuid, Notification>,
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of every record, in no particular order.
    pub fn all(&self) -> Vec<Notification> {
        self.records.iter().map(|r| r.clone()).collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: &Notification) -> StoreResult<()> {
        if self.records.contains_key(&notification.id) {
            return Err(StoreError::AlreadyExists(notification.id.to_string()));
        }
        self.records.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn update_status(&self, id: Uuid, status: NotificationStatus) -> StoreResult<()> {
        let mut record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn stale_pending(&self, older_than: Duration) -> StoreResult<Vec<Notification>> {
        let cutoff = Utc::now() - older_than;
        Ok(self
            .records
            .iter()
            .filter(|r| r.status == NotificationStatus::Pending && r.created_at < cutoff)
            .map(|r| r.clone())
            .collect())
    }
}

/// In-memory template storage, keyed by template name.
pub struct MemoryTemplateStore {
    records: DashMap<String, EmailTemplate>,
}

impl Default for MemoryTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn create(&self, template: &EmailTemplate) -> StoreResult<()> {
        if self.records.contains_key(&template.name) {
            return Err(StoreError::AlreadyExists(template.name.clone()));
        }
        self.records.insert(template.name.clone(), template.clone());
        Ok(())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<EmailTemplate>> {
        Ok(self.records.get(name).map(|r| r.clone()))
    }
}

/// In-memory preference storage, keyed by (user, channel).
pub struct MemoryPreferenceStore {
    records: DashMap<(i64, String), Preference>,
}

impl Default for MemoryPreferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn upsert(&self, preference: &Preference) -> StoreResult<()> {
        self.records.insert(
            (preference.user_id, preference.channel.clone()),
            preference.clone(),
        );
        Ok(())
    }

    async fn channel_enabled(&self, user_id: i64, channel: &str) -> StoreResult<bool> {
        Ok(self
            .records
            .get(&(user_id, channel.to_string()))
            .map(|p| p.enabled)
            .unwrap_or(true))
    }
}
