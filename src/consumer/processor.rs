//! Turns inbound events into persisted, dispatchable notifications.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::notification::{Event, Notification};
use crate::pool::{PoolError, WorkerPool};
use crate::store::{NotificationStore, PreferenceStore, StoreError};

/// Errors reported back to the consumer, which retries the event.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Creates a notification for each event and hands it to the worker pool.
///
/// This is also the entry point for in-process callers that bypass the
/// broker entirely.
pub struct EventProcessor {
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferenceStore>,
    pool: Arc<WorkerPool>,
}

impl EventProcessor {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceStore>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            notifications,
            preferences,
            pool,
        }
    }

    /// Persist a notification for the event and submit it for dispatch.
    ///
    /// Users who disabled the target channel are skipped before anything
    /// is written; the event still counts as processed.
    pub async fn handle(&self, event: &Event) -> Result<(), ProcessError> {
        let channel = event
            .data
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or("email");

        if !self
            .preferences
            .channel_enabled(event.user_id, channel)
            .await?
        {
            tracing::info!(
                user_id = event.user_id,
                channel = %channel,
                event_type = %event.event_type,
                "Channel disabled by user preference, skipping event"
            );
            return Ok(());
        }

        let notification = Notification::new(
            event.user_id,
            event.event_type.clone(),
            title_for(event),
            content_for(event),
            channel,
            Value::Object(event.data.clone()),
        );

        self.notifications.create(&notification).await?;

        tracing::info!(
            notification_id = %notification.id,
            user_id = event.user_id,
            event_type = %event.event_type,
            channel = %channel,
            "Notification created from event"
        );

        self.pool.submit_job(notification).await?;
        Ok(())
    }
}

fn title_for(event: &Event) -> String {
    match event.data.get("subject").and_then(Value::as_str) {
        Some(subject) if !subject.is_empty() => subject.to_string(),
        _ => format!("Event: {}", event.event_type),
    }
}

fn content_for(event: &Event) -> String {
    match event.data.get("user_name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => {
            format!("Hello {}, you have a new notification", name)
        }
        _ => "New event received".to_string(),
    }
}
