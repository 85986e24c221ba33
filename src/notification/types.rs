use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery channel for a notification.
///
/// Persisted records carry the channel as free text; parsing happens at
/// dispatch time so that unknown values surface as a per-notification
/// failure instead of being rejected at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::InApp => "in_app",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "in_app" => Ok(Channel::InApp),
            "push" => Ok(Channel::Push),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Error returned when a channel string does not name a known channel.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

/// Lifecycle status of a notification.
///
/// Exactly one status holds at a time. Workers perform the only automatic
/// transitions, pending -> sent and pending -> failed; archived is set
/// externally and nothing transitions out of a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Archived,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "archived" => Ok(NotificationStatus::Archived),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// A persisted, user-addressed message with a delivery channel and
/// lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: i64,
    /// Notification type, e.g. "quiz_assigned" or "welcome". Doubles as
    /// the template lookup key at send time.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: String,
    pub channel: String,
    pub is_read: bool,
    pub status: NotificationStatus,
    /// Channel-specific delivery data, e.g. the recipient email address.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new pending notification.
    pub fn new(
        user_id: i64,
        kind: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        channel: impl Into<String>,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.into(),
            title: title.into(),
            content: content.into(),
            channel: channel.into(),
            is_read: false,
            status: NotificationStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the data map handed to the template renderer.
    ///
    /// Exposes `title`, `content` and the full `metadata` object, and
    /// merges the metadata keys into the top level so templates can
    /// reference them directly.
    pub fn render_context(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("title".to_string(), Value::String(self.title.clone()));
        map.insert("content".to_string(), Value::String(self.content.clone()));
        map.insert("metadata".to_string(), self.metadata.clone());
        if let Some(meta) = self.metadata.as_object() {
            for (key, value) in meta {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Object(map)
    }

    /// Recipient address carried in the metadata, if present and non-empty.
    pub fn recipient_email(&self) -> Option<&str> {
        self.metadata
            .get("recipient_email")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// A named, reusable subject/body pair associated with a notification
/// type, resolved at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    /// Unique name, matched against `Notification.kind`
    pub name: String,
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailTemplate {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        body_html: impl Into<String>,
        body_text: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: subject.into(),
            body_html: body_html.into(),
            body_text: body_text.into(),
            channel: channel.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-user, per-channel delivery preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: i64,
    pub channel: String,
    pub enabled: bool,
    /// "immediate", "daily", "weekly" or "off"
    pub frequency: String,
    pub updated_at: DateTime<Utc>,
}

/// An inbound message describing something that happened elsewhere, used
/// to trigger a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub user_id: i64,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Template context and channel routing info, e.g. the recipient address
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    /// Delivery attempt counter. The authoritative value rides on the
    /// stream entry; the body field only exists for producers that
    /// round-trip it.
    #[serde(default)]
    pub retry: u32,
}

/// Producers disagree on the timestamp encoding: some send RFC 3339
/// strings, others integer or fractional unix epochs.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Seconds(i64),
        Fractional(f64),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
        RawTimestamp::Seconds(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        RawTimestamp::Fractional(secs) => {
            let millis = (secs * 1000.0) as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_parse() {
        assert_eq!("email".parse::<Channel>().unwrap(), Channel::Email);
        assert_eq!("in_app".parse::<Channel>().unwrap(), Channel::InApp);
        assert_eq!("push".parse::<Channel>().unwrap(), Channel::Push);
        assert!("sms".parse::<Channel>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Failed,
            NotificationStatus::Archived,
        ] {
            assert_eq!(status.as_str().parse::<NotificationStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_event_timestamp_accepts_string_and_number() {
        let from_string: Event = serde_json::from_value(json!({
            "id": "evt-1",
            "event_type": "quiz_assigned",
            "user_id": 7,
            "timestamp": "2024-05-01T10:30:00Z",
            "data": {}
        }))
        .unwrap();
        assert_eq!(from_string.timestamp.to_rfc3339(), "2024-05-01T10:30:00+00:00");

        let from_number: Event = serde_json::from_value(json!({
            "id": "evt-2",
            "event_type": "quiz_assigned",
            "user_id": 7,
            "timestamp": 1714559400,
            "data": {}
        }))
        .unwrap();
        assert_eq!(from_number.timestamp.timestamp(), 1714559400);
    }

    #[test]
    fn test_event_defaults() {
        let event: Event = serde_json::from_value(json!({
            "id": "evt-3",
            "event_type": "welcome",
            "user_id": 1
        }))
        .unwrap();
        assert!(event.data.is_empty());
        assert_eq!(event.retry, 0);
    }

    #[test]
    fn test_render_context_merges_metadata() {
        let notification = Notification::new(
            7,
            "welcome",
            "Welcome",
            "Hello there",
            "email",
            json!({"recipient_email": "a@b.com", "user_name": "Ann"}),
        );

        let context = notification.render_context();
        assert_eq!(context["title"], "Welcome");
        assert_eq!(context["content"], "Hello there");
        assert_eq!(context["user_name"], "Ann");
        assert_eq!(context["metadata"]["recipient_email"], "a@b.com");
        assert_eq!(notification.recipient_email(), Some("a@b.com"));
    }

    #[test]
    fn test_recipient_email_rejects_empty() {
        let notification = Notification::new(
            1,
            "welcome",
            "t",
            "c",
            "email",
            json!({"recipient_email": ""}),
        );
        assert_eq!(notification.recipient_email(), None);
    }
}
