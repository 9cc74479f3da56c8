//! The gateway boundary.
//!
//! A [`Gateway`] is the host's view of the external chat-protocol connection:
//! it emits [`GatewayEvent`]s to subscribed sinks and exposes the outbound
//! actions the protocol supports. The runtime treats this boundary as a
//! capability interface — any implementation that emits these event shapes
//! and answers these actions is interchangeable, which is also what makes
//! the runtime testable without a live connection.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{FriendInfo, GroupMemberInfo, LoginInfo, MessageReceipt};
use crate::error::ApiResult;
use crate::event::{EventKind, GatewayEvent};

/// A subscriber for one event category.
///
/// Sinks must not block; long-running work belongs in a spawned task.
pub type EventSink = Arc<dyn Fn(Arc<GatewayEvent>) + Send + Sync>;

/// The external chat-protocol connection, seen from the host.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Registers `sink` for every future event of category `kind`.
    ///
    /// A gateway supports multiple sinks per category; each registered sink
    /// receives every matching event. There is no unsubscribe — sinks live
    /// for the life of the connection, and fan-out to shorter-lived
    /// consumers is the dispatcher's job.
    fn subscribe(&self, kind: EventKind, sink: EventSink);

    // ─── Messaging ───────────────────────────────────────────────────────

    async fn send_private_msg(&self, user_id: i64, message: &str) -> ApiResult<MessageReceipt>;

    async fn send_group_msg(&self, group_id: i64, message: &str) -> ApiResult<MessageReceipt>;

    async fn delete_msg(&self, message_id: i64) -> ApiResult<()>;

    // ─── Group moderation ────────────────────────────────────────────────

    async fn set_group_kick(
        &self,
        group_id: i64,
        user_id: i64,
        reject_add_request: bool,
    ) -> ApiResult<()>;

    /// Mutes `user_id` for `duration_secs`; `0` lifts the mute.
    async fn set_group_ban(&self, group_id: i64, user_id: i64, duration_secs: u64)
    -> ApiResult<()>;

    async fn set_group_whole_ban(&self, group_id: i64, enable: bool) -> ApiResult<()>;

    async fn set_group_admin(&self, group_id: i64, user_id: i64, enable: bool) -> ApiResult<()>;

    async fn set_group_name(&self, group_id: i64, name: &str) -> ApiResult<()>;

    async fn set_group_special_title(
        &self,
        group_id: i64,
        user_id: i64,
        title: &str,
    ) -> ApiResult<()>;

    /// Approves or rejects a pending join/invite request by its `flag`.
    async fn set_group_add_request(&self, flag: &str, approve: bool) -> ApiResult<()>;

    // ─── Metadata queries ────────────────────────────────────────────────

    async fn get_group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> ApiResult<GroupMemberInfo>;

    async fn get_login_info(&self) -> ApiResult<LoginInfo>;

    async fn get_friend_list(&self) -> ApiResult<Vec<FriendInfo>>;
}
