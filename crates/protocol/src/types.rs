//! Core types shared across the protocol

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Notification type. The set is closed: anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    System,
    TripChat,
    OrderChat,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::System => "SYSTEM",
            NotificationType::TripChat => "TRIP_CHAT",
            NotificationType::OrderChat => "ORDER_CHAT",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SYSTEM" => Ok(NotificationType::System),
            "TRIP_CHAT" => Ok(NotificationType::TripChat),
            "ORDER_CHAT" => Ok(NotificationType::OrderChat),
            other => Err(other.to_string()),
        }
    }
}

/// Notification severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Lenient parse used by the normalizer; unknown values fall back to `Info`.
    pub fn from_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Severity::Success,
            "warning" | "warn" => Severity::Warning,
            "error" | "danger" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Routing metadata carried by chat notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

/// Canonical inbound event, produced by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub timestamp: String,
    pub is_read: bool,
    pub metadata: NotificationMetadata,
}

impl Notification {
    /// The conversation this notification signals, if it is a chat notification
    /// carrying the matching metadata id.
    pub fn conversation(&self) -> Option<ConversationKey> {
        match self.notification_type {
            NotificationType::System => None,
            NotificationType::TripChat => self.metadata.trip_id.map(ConversationKey::trip),
            NotificationType::OrderChat => self.metadata.order_id.map(ConversationKey::order),
        }
    }

    /// A read copy of this notification.
    pub fn marked_read(&self) -> Notification {
        Notification {
            is_read: true,
            ..self.clone()
        }
    }
}

/// A chat message as returned by the conversation history endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: i64,
    pub sender_role: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: String,
}

/// Body of the send-message request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: i64,
    pub content: String,
}

/// Conversation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    Trip,
    Order,
}

impl ConversationKind {
    /// The notification type that signals this kind of conversation
    pub fn notification_type(self) -> NotificationType {
        match self {
            ConversationKind::Trip => NotificationType::TripChat,
            ConversationKind::Order => NotificationType::OrderChat,
        }
    }

    /// REST collection segment
    pub fn path_segment(self) -> &'static str {
        match self {
            ConversationKind::Trip => "trips",
            ConversationKind::Order => "orders",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKind::Trip => f.write_str("trip"),
            ConversationKind::Order => f.write_str("order"),
        }
    }
}

/// Identifies one conversation, and therefore one reconciliation controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub kind: ConversationKind,
    pub id: i64,
}

impl ConversationKey {
    pub fn trip(id: i64) -> Self {
        Self {
            kind: ConversationKind::Trip,
            id,
        }
    }

    pub fn order(id: i64) -> Self {
        Self {
            kind: ConversationKind::Order,
            id,
        }
    }

    /// True when `notification` signals activity in this conversation.
    pub fn matches(&self, notification: &Notification) -> bool {
        notification.conversation() == Some(*self)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Console role of the signed-in identity. Only roles with a push topic are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Dispatcher,
    Admin,
}

impl Role {
    /// The single inbound topic for this role
    pub fn topic(self) -> Topic {
        match self {
            Role::Dispatcher => Topic::new("dispatcher-notifications"),
            Role::Admin => Topic::new("admin-notifications"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts `DISPATCHER`, `dispatcher` and the `ROLE_DISPATCHER` form.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.strip_prefix("ROLE_").unwrap_or(upper.as_str()) {
            "DISPATCHER" => Ok(Role::Dispatcher),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(value.to_string()),
        }
    }
}

/// A named push channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker destination the topic is subscribed under
    pub fn destination(&self) -> String {
        format!("/topic/{}", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
