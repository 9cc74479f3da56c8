//! Event system for the Braze host.
//!
//! This module provides the core event infrastructure:
//!
//! - [`EventKind`] - Named event categories handlers can subscribe to
//! - [`GatewayEvent`] - The typed event union emitted by a gateway
//! - Payload structs ([`MessageEvent`], [`NoticeEvent`], [`RequestEvent`])
//!
//! # Category hierarchy
//!
//! Message events carry a scope (group or private) and are delivered both to
//! their specific category (`message.group` / `message.private`) and to the
//! umbrella `message` category, so a handler can subscribe at either level.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Event categories
// ============================================================================

/// Named category of a gateway event.
///
/// Handlers subscribe to categories; the dispatcher subscribes exactly once
/// per category on the gateway regardless of how many handlers exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Gateway connection established.
    ConnectionOpen,
    /// Gateway connection error.
    ConnectionError,
    /// Gateway connection closed.
    ConnectionClose,
    /// Protocol lifecycle meta event (e.g. connect handshake).
    Lifecycle,
    /// Protocol heartbeat meta event.
    Heartbeat,
    /// Any inbound message, group or private.
    Message,
    /// Inbound group message.
    GroupMessage,
    /// Inbound private message.
    PrivateMessage,
    /// Inbound notice (recalls, member changes, pokes, ...).
    Notice,
    /// Inbound request (friend request, group join/invite).
    Request,
    /// An outbound API call was rejected by the gateway.
    ApiFailure,
}

impl EventKind {
    /// Every category, in declaration order.
    pub const ALL: [EventKind; 11] = [
        EventKind::ConnectionOpen,
        EventKind::ConnectionError,
        EventKind::ConnectionClose,
        EventKind::Lifecycle,
        EventKind::Heartbeat,
        EventKind::Message,
        EventKind::GroupMessage,
        EventKind::PrivateMessage,
        EventKind::Notice,
        EventKind::Request,
        EventKind::ApiFailure,
    ];

    /// The category's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionOpen => "connection.open",
            EventKind::ConnectionError => "connection.error",
            EventKind::ConnectionClose => "connection.close",
            EventKind::Lifecycle => "meta.lifecycle",
            EventKind::Heartbeat => "meta.heartbeat",
            EventKind::Message => "message",
            EventKind::GroupMessage => "message.group",
            EventKind::PrivateMessage => "message.private",
            EventKind::Notice => "notice",
            EventKind::Request => "request",
            EventKind::ApiFailure => "api.failure",
        }
    }
}

impl FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or(())
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Whether a message arrived in a group or a private chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageScope {
    Group,
    Private,
}

/// Sender identity attached to a message event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    /// Group card, empty outside groups.
    #[serde(default)]
    pub card: String,
}

/// An inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub scope: MessageScope,
    pub message_id: i64,
    pub user_id: i64,
    /// Present for group-scoped messages only.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Raw message text, CQ codes included.
    pub raw_message: String,
    #[serde(default)]
    pub sender: Sender,
    /// The receiving bot account.
    #[serde(default)]
    pub self_id: i64,
}

impl MessageEvent {
    /// The specific category for this message's scope.
    pub fn kind(&self) -> EventKind {
        match self.scope {
            MessageScope::Group => EventKind::GroupMessage,
            MessageScope::Private => EventKind::PrivateMessage,
        }
    }

    /// A zeroed template message, used as the synthetic event handed to
    /// scheduled-task callbacks. Never aliases a live transport event.
    pub fn template() -> Self {
        Self {
            scope: MessageScope::Private,
            message_id: 0,
            user_id: 0,
            group_id: None,
            raw_message: String::new(),
            sender: Sender::default(),
            self_id: 0,
        }
    }
}

/// An inbound notice.
///
/// Notices are loosely structured on the wire; the payload keeps the common
/// identifiers typed and the remainder as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub notice_type: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Whether a request concerns a friendship or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestScope {
    Friend,
    Group,
}

/// An inbound friend/group request, resolvable via its `flag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub scope: RequestScope,
    /// Opaque token passed back when approving/rejecting.
    pub flag: String,
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub comment: String,
}

// ============================================================================
// GatewayEvent
// ============================================================================

/// The typed union of everything a gateway can emit.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    ConnectionOpen { url: String },
    ConnectionError { reason: String },
    ConnectionClose { code: i64 },
    Lifecycle { sub_type: String },
    Heartbeat { interval_ms: u64 },
    Message(MessageEvent),
    Notice(NoticeEvent),
    Request(RequestEvent),
    ApiFailure { action: String, message: String },
}

impl GatewayEvent {
    /// The most specific category for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::ConnectionOpen { .. } => EventKind::ConnectionOpen,
            GatewayEvent::ConnectionError { .. } => EventKind::ConnectionError,
            GatewayEvent::ConnectionClose { .. } => EventKind::ConnectionClose,
            GatewayEvent::Lifecycle { .. } => EventKind::Lifecycle,
            GatewayEvent::Heartbeat { .. } => EventKind::Heartbeat,
            GatewayEvent::Message(m) => m.kind(),
            GatewayEvent::Notice(_) => EventKind::Notice,
            GatewayEvent::Request(_) => EventKind::Request,
            GatewayEvent::ApiFailure { .. } => EventKind::ApiFailure,
        }
    }

    /// Every category this event should be delivered under.
    ///
    /// Group/private messages match both their specific category and the
    /// umbrella [`EventKind::Message`]; everything else matches exactly one.
    pub fn kinds(&self) -> Vec<EventKind> {
        match self {
            GatewayEvent::Message(m) => vec![m.kind(), EventKind::Message],
            other => vec![other.kind()],
        }
    }

    /// Borrow the message payload, if this is a message event.
    pub fn as_message(&self) -> Option<&MessageEvent> {
        match self {
            GatewayEvent::Message(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("message.unknown".parse::<EventKind>().is_err());
    }

    #[test]
    fn group_message_matches_umbrella_category() {
        let event = GatewayEvent::Message(MessageEvent {
            scope: MessageScope::Group,
            message_id: 1,
            user_id: 2,
            group_id: Some(3),
            raw_message: "hi".into(),
            sender: Sender::default(),
            self_id: 0,
        });
        assert_eq!(event.kind(), EventKind::GroupMessage);
        assert_eq!(
            event.kinds(),
            vec![EventKind::GroupMessage, EventKind::Message]
        );
    }

    #[test]
    fn notice_matches_single_category() {
        let event = GatewayEvent::Notice(NoticeEvent {
            notice_type: "group_recall".into(),
            user_id: 1,
            group_id: Some(2),
            data: serde_json::Value::Null,
        });
        assert_eq!(event.kinds(), vec![EventKind::Notice]);
    }
}
