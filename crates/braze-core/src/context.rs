//! Per-delivery event context.
//!
//! Every handler invocation receives an [`EventCtx`]: the event plus
//! reply/moderation conveniences bound to the event's origin. The context is
//! built by the dispatcher at delivery time, never by plugins, so origin
//! binding cannot be spoofed across events.

use std::sync::Arc;

use crate::api::MessageReceipt;
use crate::error::{ApiError, ApiResult};
use crate::event::{GatewayEvent, MessageScope};
use crate::gateway::Gateway;

/// An event paired with origin-bound convenience actions.
#[derive(Clone)]
pub struct EventCtx {
    event: Arc<GatewayEvent>,
    gateway: Arc<dyn Gateway>,
}

impl EventCtx {
    /// Builds a context for one delivery.
    pub fn new(event: Arc<GatewayEvent>, gateway: Arc<dyn Gateway>) -> Self {
        Self { event, gateway }
    }

    /// The delivered event.
    pub fn event(&self) -> &GatewayEvent {
        &self.event
    }

    /// Raw message text, or `""` for non-message events.
    pub fn raw_message(&self) -> &str {
        self.event
            .as_message()
            .map(|m| m.raw_message.as_str())
            .unwrap_or("")
    }

    /// The gateway behind this delivery.
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// Replies to the message's origin: its group when group-scoped, the
    /// sender otherwise. `quote` prepends a reply reference to the original.
    ///
    /// Fails with [`ApiError::InvalidCall`] on non-message events.
    pub async fn reply(&self, message: &str, quote: bool) -> ApiResult<MessageReceipt> {
        let Some(msg) = self.event.as_message() else {
            return Err(ApiError::InvalidCall(
                "reply is only available on message events".into(),
            ));
        };

        let text = if quote {
            format!("[CQ:reply,id={}]{}", msg.message_id, message)
        } else {
            message.to_string()
        };

        match (msg.scope, msg.group_id) {
            (MessageScope::Group, Some(group_id)) => {
                self.gateway.send_group_msg(group_id, &text).await
            }
            _ => self.gateway.send_private_msg(msg.user_id, &text).await,
        }
    }

    /// Kicks `user_id` from the group this message arrived in.
    ///
    /// Fails with [`ApiError::InvalidCall`] outside group-scoped messages.
    pub async fn kick(&self, user_id: i64, reject_add_request: bool) -> ApiResult<()> {
        let group_id = self
            .event
            .as_message()
            .and_then(|m| m.group_id)
            .ok_or_else(|| {
                ApiError::InvalidCall("kick is only available on group messages".into())
            })?;
        self.gateway
            .set_group_kick(group_id, user_id, reject_add_request)
            .await
    }
}

impl std::fmt::Debug for EventCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCtx")
            .field("kind", &self.event.kind())
            .finish()
    }
}
