//! Typed results for outbound gateway actions.

use serde::{Deserialize, Serialize};

/// Receipt returned by message-sending actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: i64,
}

/// A member's role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

/// Group member metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    /// Group card, possibly empty.
    #[serde(default)]
    pub card: String,
    pub role: GroupRole,
}

impl GroupMemberInfo {
    /// Display name: the group card when set, the nickname otherwise.
    pub fn display_name(&self) -> &str {
        if self.card.is_empty() {
            &self.nickname
        } else {
            &self.card
        }
    }
}

/// The bot's own login identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
}

/// One entry of the bot's friend list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remark: String,
}
