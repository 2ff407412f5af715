//! Event normalizer: raw frame bodies and local drafts -> canonical `Notification`.
//!
//! Remote frames and locally manufactured notifications go through the same
//! defaulting step, so listeners see one shape regardless of origin.

use dispatchlink_protocol::{
    iso_timestamp, new_notification_id, now_millis, Notification, NotificationMetadata,
    NotificationType, Severity, MAX_TIMESTAMP_MILLIS,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Why a frame body could not become a notification
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid notification JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown notification type: {0}")]
    UnknownType(String),
}

/// A partially specified notification. Absent fields get the standard defaults.
#[derive(Debug, Clone, Default)]
pub struct NotificationDraft {
    pub id: Option<String>,
    pub notification_type: Option<NotificationType>,
    pub severity: Option<Severity>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub timestamp: Option<String>,
    pub is_read: Option<bool>,
    pub metadata: NotificationMetadata,
}

impl NotificationDraft {
    pub fn system(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            notification_type: Some(NotificationType::System),
            title: Some(title.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn trip_chat(trip_id: i64) -> Self {
        Self {
            notification_type: Some(NotificationType::TripChat),
            metadata: NotificationMetadata {
                trip_id: Some(trip_id),
                order_id: None,
            },
            ..Default::default()
        }
    }

    pub fn order_chat(order_id: i64) -> Self {
        Self {
            notification_type: Some(NotificationType::OrderChat),
            metadata: NotificationMetadata {
                trip_id: None,
                order_id: Some(order_id),
            },
            ..Default::default()
        }
    }
}

/// Wire shape of a notification frame body. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    id: Option<Value>,
    #[serde(rename = "type")]
    notification_type: Option<String>,
    severity: Option<String>,
    title: Option<String>,
    message: Option<String>,
    timestamp: Option<Value>,
    is_read: Option<bool>,
    metadata: Option<RawMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    trip_id: Option<Value>,
    order_id: Option<Value>,
}

/// Parse and validate a frame body.
pub fn parse_notification(raw: &str) -> Result<Notification, ParseError> {
    let raw: RawNotification = serde_json::from_str(raw)?;

    let notification_type = raw
        .notification_type
        .as_deref()
        .map(|value| value.parse::<NotificationType>())
        .transpose()
        .map_err(ParseError::UnknownType)?;

    let metadata = raw
        .metadata
        .map(|m| NotificationMetadata {
            trip_id: m.trip_id.as_ref().and_then(value_as_id),
            order_id: m.order_id.as_ref().and_then(value_as_id),
        })
        .unwrap_or_default();

    Ok(manufacture(NotificationDraft {
        id: raw.id.as_ref().and_then(value_as_text),
        notification_type,
        severity: raw.severity.as_deref().map(Severity::from_lenient),
        title: raw.title,
        message: raw.message,
        timestamp: raw.timestamp.as_ref().and_then(value_as_timestamp),
        is_read: raw.is_read,
        metadata,
    }))
}

/// Frame-pipeline entry point: a malformed body is logged and dropped.
pub fn normalize(raw: &str) -> Option<Notification> {
    match parse_notification(raw) {
        Ok(notification) => Some(notification),
        Err(e) => {
            warn!(
                component = "normalizer",
                event = "normalizer.frame.dropped",
                error = %e,
                payload_bytes = raw.len(),
                payload_preview = %truncate_for_log(raw, 240),
                "Dropping malformed notification frame"
            );
            None
        }
    }
}

/// Fill defaults for every absent field.
pub fn manufacture(draft: NotificationDraft) -> Notification {
    let millis = now_millis();
    Notification {
        id: draft.id.unwrap_or_else(|| new_notification_id(millis)),
        notification_type: draft.notification_type.unwrap_or(NotificationType::System),
        severity: draft.severity.unwrap_or_default(),
        title: draft.title.unwrap_or_default(),
        message: draft.message.unwrap_or_default(),
        timestamp: draft.timestamp.unwrap_or_else(|| iso_timestamp(millis)),
        is_read: draft.is_read.unwrap_or(false),
        metadata: draft.metadata,
    }
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strings are kept as sent; numbers are epoch millis up to year 9999.
fn value_as_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .filter(|millis| *millis <= MAX_TIMESTAMP_MILLIS)
            .map(iso_timestamp),
        _ => None,
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
