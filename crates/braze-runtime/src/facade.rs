//! Capability façade and per-plugin isolation handles.
//!
//! One canonical [`HostCapabilities`] is built per process. Plugins never
//! touch it directly: each receives a [`PluginHandle`] — a concrete
//! decorator over the same surface that attributes every failed call to
//! `(plugin, method)`, journals it, and returns the error to the immediate
//! caller only. A fault inside a façade call can therefore never escape
//! into shared dispatch machinery under another plugin's name.
//!
//! Handles are cached per plugin name in a [`HandleCache`]; `disable`
//! releases a plugin's handle and the resource reclaimer evicts stale ones.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use regex::Regex;
use tracing::error;

use braze_core::{
    ApiResult, FriendInfo, Gateway, GroupMemberInfo, GroupRole, LoginInfo, MessageReceipt,
};

use crate::config::IdentityConfig;
use crate::journal::{ErrorJournal, FaultKind};
use crate::manager::PluginManager;

// ============================================================================
// HostCapabilities
// ============================================================================

/// The canonical host-provided capability set, built once per process.
pub struct HostCapabilities {
    gateway: Arc<dyn Gateway>,
    identity: IdentityConfig,
    manager: Weak<PluginManager>,
}

impl HostCapabilities {
    pub(crate) fn new(
        gateway: Arc<dyn Gateway>,
        identity: IdentityConfig,
        manager: Weak<PluginManager>,
    ) -> Self {
        Self {
            gateway,
            identity,
            manager,
        }
    }

    /// Whether `user_id` is one of the configured masters.
    pub fn is_master(&self, user_id: i64) -> bool {
        self.identity.master.contains(&user_id)
    }

    /// Whether `user_id` is a master or a configured admin.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.is_master(user_id) || self.identity.admins.contains(&user_id)
    }

    /// Whether `user_id` may run administrative commands.
    pub fn has_right(&self, user_id: i64) -> bool {
        self.is_master(user_id) || self.is_admin(user_id)
    }

    /// The bot's own account id.
    pub fn bot_uin(&self) -> i64 {
        self.identity.bot_uin
    }

    fn manager(&self) -> Option<Arc<PluginManager>> {
        self.manager.upgrade()
    }
}

// ============================================================================
// PluginHandle
// ============================================================================

/// Per-plugin interception layer over [`HostCapabilities`].
///
/// Every fallible call is delegated and observed: failures are logged and
/// journalled with `(plugin, method)` attribution, then handed back to the
/// caller unchanged.
pub struct PluginHandle {
    plugin: String,
    host: Arc<HostCapabilities>,
    journal: Arc<ErrorJournal>,
}

impl PluginHandle {
    pub(crate) fn new(
        plugin: &str,
        host: Arc<HostCapabilities>,
        journal: Arc<ErrorJournal>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            host,
            journal,
        }
    }

    /// The owning plugin's name.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    fn observe<T>(&self, method: &'static str, result: ApiResult<T>) -> ApiResult<T> {
        if let Err(e) = &result {
            error!(plugin = %self.plugin, method, error = %e, "Facade call failed");
            self.journal
                .record(&self.plugin, FaultKind::Facade, format!("{method}: {e}"));
        }
        result
    }

    // ─── Messaging ───────────────────────────────────────────────────────

    pub async fn send_private_msg(&self, user_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        let r = self.host.gateway.send_private_msg(user_id, message).await;
        self.observe("send_private_msg", r)
    }

    pub async fn send_group_msg(&self, group_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        let r = self.host.gateway.send_group_msg(group_id, message).await;
        self.observe("send_group_msg", r)
    }

    pub async fn delete_msg(&self, message_id: i64) -> ApiResult<()> {
        let r = self.host.gateway.delete_msg(message_id).await;
        self.observe("delete_msg", r)
    }

    // ─── Moderation ──────────────────────────────────────────────────────

    pub async fn kick(&self, group_id: i64, user_id: i64, reject_add_request: bool) -> ApiResult<()> {
        let r = self
            .host
            .gateway
            .set_group_kick(group_id, user_id, reject_add_request)
            .await;
        self.observe("kick", r)
    }

    /// Mutes `user_id` for `duration_secs`; `0` lifts the mute.
    pub async fn ban(&self, group_id: i64, user_id: i64, duration_secs: u64) -> ApiResult<()> {
        let r = self
            .host
            .gateway
            .set_group_ban(group_id, user_id, duration_secs)
            .await;
        self.observe("ban", r)
    }

    pub async fn ban_all(&self, group_id: i64, enable: bool) -> ApiResult<()> {
        let r = self.host.gateway.set_group_whole_ban(group_id, enable).await;
        self.observe("ban_all", r)
    }

    pub async fn set_admin(&self, group_id: i64, user_id: i64, enable: bool) -> ApiResult<()> {
        let r = self
            .host
            .gateway
            .set_group_admin(group_id, user_id, enable)
            .await;
        self.observe("set_admin", r)
    }

    pub async fn set_group_name(&self, group_id: i64, name: &str) -> ApiResult<()> {
        let r = self.host.gateway.set_group_name(group_id, name).await;
        self.observe("set_group_name", r)
    }

    pub async fn set_title(&self, group_id: i64, user_id: i64, title: &str) -> ApiResult<()> {
        let r = self
            .host
            .gateway
            .set_group_special_title(group_id, user_id, title)
            .await;
        self.observe("set_title", r)
    }

    pub async fn approve_request(&self, flag: &str) -> ApiResult<()> {
        let r = self.host.gateway.set_group_add_request(flag, true).await;
        self.observe("approve_request", r)
    }

    pub async fn reject_request(&self, flag: &str) -> ApiResult<()> {
        let r = self.host.gateway.set_group_add_request(flag, false).await;
        self.observe("reject_request", r)
    }

    // ─── Metadata queries ────────────────────────────────────────────────

    pub async fn group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> ApiResult<GroupMemberInfo> {
        let r = self.host.gateway.get_group_member_info(group_id, user_id).await;
        self.observe("group_member_info", r)
    }

    pub async fn is_group_admin(&self, group_id: i64, user_id: i64) -> ApiResult<bool> {
        self.group_member_info(group_id, user_id)
            .await
            .map(|m| matches!(m.role, GroupRole::Admin | GroupRole::Owner))
    }

    pub async fn is_group_owner(&self, group_id: i64, user_id: i64) -> ApiResult<bool> {
        self.group_member_info(group_id, user_id)
            .await
            .map(|m| m.role == GroupRole::Owner)
    }

    pub async fn login_info(&self) -> ApiResult<LoginInfo> {
        let r = self.host.gateway.get_login_info().await;
        self.observe("login_info", r)
    }

    pub async fn friend_list(&self) -> ApiResult<Vec<FriendInfo>> {
        let r = self.host.gateway.get_friend_list().await;
        self.observe("friend_list", r)
    }

    // ─── Identity ────────────────────────────────────────────────────────

    pub fn is_master(&self, user_id: i64) -> bool {
        self.host.is_master(user_id)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.host.is_admin(user_id)
    }

    pub fn has_right(&self, user_id: i64) -> bool {
        self.host.has_right(user_id)
    }

    pub fn bot_uin(&self) -> i64 {
        self.host.bot_uin()
    }

    // ─── Link & ID utilities ─────────────────────────────────────────────

    pub fn user_avatar_url(&self, user_id: i64, size: u32) -> String {
        user_avatar_url(user_id, size)
    }

    pub fn group_avatar_url(&self, group_id: i64, size: u32) -> String {
        group_avatar_url(group_id, size)
    }

    pub fn extract_image_url(&self, raw_message: &str) -> Option<String> {
        extract_image_url(raw_message)
    }

    pub fn extract_at_ids(&self, raw_message: &str) -> Vec<i64> {
        extract_at_ids(raw_message)
    }

    pub fn extract_reply_id(&self, raw_message: &str) -> Option<i64> {
        extract_reply_id(raw_message)
    }

    pub fn plain_text(&self, raw_message: &str) -> String {
        plain_text(raw_message)
    }

    // ─── Registry control ────────────────────────────────────────────────
    //
    // These return classified status strings for the administrative
    // surface: `[+]` success, `[*]` information, `[-]` failure.

    pub async fn list_plugins(&self) -> String {
        match self.host.manager() {
            Some(m) => m.list_cmd().await,
            None => OFFLINE.to_string(),
        }
    }

    pub async fn enable_plugin(&self, name: &str) -> String {
        match self.host.manager() {
            Some(m) => m.enable_cmd(name).await,
            None => OFFLINE.to_string(),
        }
    }

    pub async fn disable_plugin(&self, name: &str) -> String {
        match self.host.manager() {
            Some(m) => m.disable_cmd(name).await,
            None => OFFLINE.to_string(),
        }
    }

    /// Reloads `name`, or the calling plugin itself when `name` is `None`.
    pub async fn reload_plugin(&self, name: Option<&str>) -> String {
        let target = name.unwrap_or(&self.plugin).to_string();
        match self.host.manager() {
            Some(m) => m.reload_cmd(&target).await,
            None => OFFLINE.to_string(),
        }
    }

    pub async fn load_plugin(&self, name: &str) -> String {
        match self.host.manager() {
            Some(m) => m.load_cmd(name).await,
            None => OFFLINE.to_string(),
        }
    }

    /// Unit names currently discoverable on disk.
    pub async fn discover_units(&self) -> Vec<String> {
        match self.host.manager() {
            Some(m) => m.discover(),
            None => Vec::new(),
        }
    }
}

const OFFLINE: &str = "[-]plugin runtime unavailable";

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("plugin", &self.plugin)
            .finish()
    }
}

// ============================================================================
// HandleCache
// ============================================================================

/// Cache of per-plugin façade handles.
///
/// Caching keeps repeated loads from reallocating interception state;
/// releasing on disable (and reclaimer eviction) bounds growth across many
/// reload cycles.
#[derive(Default)]
pub struct HandleCache {
    handles: Mutex<HashMap<String, Arc<PluginHandle>>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached handle for `plugin`, creating it if absent.
    pub fn obtain(
        &self,
        plugin: &str,
        host: &Arc<HostCapabilities>,
        journal: &Arc<ErrorJournal>,
    ) -> Arc<PluginHandle> {
        let mut handles = self.handles.lock();
        Arc::clone(handles.entry(plugin.to_string()).or_insert_with(|| {
            Arc::new(PluginHandle::new(
                plugin,
                Arc::clone(host),
                Arc::clone(journal),
            ))
        }))
    }

    /// Releases the handle for `plugin`.
    pub fn release(&self, plugin: &str) {
        self.handles.lock().remove(plugin);
    }

    /// Releases handles for every name in `names`.
    pub fn evict<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut handles = self.handles.lock();
        for name in names {
            handles.remove(name);
        }
    }

    /// Releases every cached handle.
    pub fn clear(&self) {
        self.handles.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Whether a handle for `plugin` is currently cached.
    pub fn contains(&self, plugin: &str) -> bool {
        self.handles.lock().contains_key(plugin)
    }
}

// ============================================================================
// Link & ID utilities
// ============================================================================

static IMAGE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[CQ:image,[^\]]*?url=([^,\]]+)").expect("valid regex"));
static AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[CQ:at,qq=(\d+)\]").expect("valid regex"));
static REPLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[CQ:reply,id=(\d+)\]").expect("valid regex"));
static CQ_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[CQ:[^\]]+\]").expect("valid regex"));

/// Avatar URL for a user account. Common sizes: 40, 64, 100, 200, 640.
pub fn user_avatar_url(user_id: i64, size: u32) -> String {
    format!("https://q2.qlogo.cn/headimg_dl?dst_uin={user_id}&spec={size}")
}

/// Avatar URL for a group.
pub fn group_avatar_url(group_id: i64, size: u32) -> String {
    format!("https://p.qlogo.cn/gh/{group_id}/{group_id}/{size}")
}

/// First image URL embedded in a raw message, if any.
pub fn extract_image_url(raw_message: &str) -> Option<String> {
    IMAGE_URL_RE
        .captures(raw_message)
        .map(|c| c[1].to_string())
}

/// Every mentioned account id, in message order.
pub fn extract_at_ids(raw_message: &str) -> Vec<i64> {
    AT_RE
        .captures_iter(raw_message)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// The id of the message this one replies to, if any.
pub fn extract_reply_id(raw_message: &str) -> Option<i64> {
    REPLY_RE
        .captures(raw_message)
        .and_then(|c| c[1].parse().ok())
}

/// Message text with every CQ code stripped.
pub fn plain_text(raw_message: &str) -> String {
    CQ_CODE_RE.replace_all(raw_message, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockGateway;
    use braze_core::GroupRole;

    #[tokio::test]
    async fn handle_delegates_identity_moderation_and_queries() {
        let gateway = Arc::new(MockGateway::new());
        gateway.set_role(7, 1, GroupRole::Admin);
        let journal = Arc::new(ErrorJournal::new());
        let host = Arc::new(HostCapabilities::new(
            gateway.clone(),
            IdentityConfig {
                bot_uin: 10000,
                master: vec![1],
                admins: vec![2],
            },
            Weak::new(),
        ));
        let handle = PluginHandle::new("p", host, Arc::clone(&journal));

        assert!(handle.is_master(1));
        assert!(handle.is_admin(2));
        assert!(!handle.has_right(3));

        assert!(handle.is_group_admin(7, 1).await.unwrap());
        assert!(!handle.is_group_owner(7, 1).await.unwrap());

        handle.ban(7, 3, 60).await.unwrap();
        assert!(gateway.actions().iter().any(|a| a == "ban:7:3:60"));
        // Successful calls leave no journal trace.
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn registry_control_reports_offline_without_a_manager() {
        let gateway = Arc::new(MockGateway::new());
        let host = Arc::new(HostCapabilities::new(
            gateway,
            IdentityConfig::default(),
            Weak::new(),
        ));
        let handle = PluginHandle::new("p", host, Arc::new(ErrorJournal::new()));

        assert_eq!(handle.enable_plugin("x").await, OFFLINE);
        assert!(handle.discover_units().await.is_empty());
    }

    #[test]
    fn extracts_at_ids_in_order() {
        let raw = "[CQ:at,qq=111] hello [CQ:at,qq=222]";
        assert_eq!(extract_at_ids(raw), vec![111, 222]);
        assert!(extract_at_ids("no mentions").is_empty());
    }

    #[test]
    fn extracts_reply_and_image() {
        assert_eq!(extract_reply_id("[CQ:reply,id=98765]ok"), Some(98765));
        assert_eq!(extract_reply_id("plain"), None);
        assert_eq!(
            extract_image_url("[CQ:image,file=a.jpg,url=https://example.com/a.jpg,cache=1]"),
            Some("https://example.com/a.jpg".to_string())
        );
    }

    #[test]
    fn plain_text_strips_all_codes() {
        let raw = "[CQ:reply,id=1][CQ:at,qq=2] hi there [CQ:face,id=66]";
        assert_eq!(plain_text(raw), "hi there");
    }

    #[test]
    fn avatar_urls_embed_ids() {
        assert!(user_avatar_url(12345, 100).contains("dst_uin=12345"));
        assert!(group_avatar_url(777, 40).contains("/777/777/40"));
    }
}
