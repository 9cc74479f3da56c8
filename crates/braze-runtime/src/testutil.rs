//! Shared test fixtures: a recording mock gateway, canned plugins, and a
//! fully wired manager test bed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use braze_core::{
    ApiError, ApiResult, EventKind, EventSink, FriendInfo, Gateway, GatewayEvent, GroupMemberInfo,
    GroupRole, LoginInfo, MessageEvent, MessageReceipt, MessageScope, Sender,
};

use crate::config::BrazeConfig;
use crate::journal::ErrorJournal;
use crate::manager::PluginManager;
use crate::persist::PluginSetStore;
use crate::plugin::{BotPlugin, BoxError, FactoryRegistry, PluginContext, PluginFactory};

// ============================================================================
// MockGateway
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    User(i64),
    Group(i64),
}

#[derive(Debug, Clone)]
pub(crate) struct SentMessage {
    pub target: Target,
    pub text: String,
}

/// In-memory gateway recording every outbound call.
pub(crate) struct MockGateway {
    sinks: Mutex<HashMap<EventKind, Vec<EventSink>>>,
    sent: Mutex<Vec<SentMessage>>,
    actions: Mutex<Vec<String>>,
    roles: Mutex<HashMap<(i64, i64), GroupRole>>,
    fail_sends: AtomicBool,
    next_message_id: AtomicI64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            roles: Mutex::new(HashMap::new()),
            fail_sends: AtomicBool::new(false),
            next_message_id: AtomicI64::new(1000),
        }
    }

    /// Emits `event` to every sink subscribed for a category it matches.
    pub fn emit(&self, event: GatewayEvent) {
        let event = Arc::new(event);
        let sinks = self.sinks.lock();
        for kind in event.kinds() {
            if let Some(list) = sinks.get(&kind) {
                for sink in list {
                    (**sink)(Arc::clone(&event));
                }
            }
        }
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    /// Makes every subsequent send fail with `NotConnected`.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_role(&self, group_id: i64, user_id: i64, role: GroupRole) {
        self.roles.lock().insert((group_id, user_id), role);
    }

    fn record_send(&self, target: Target, text: &str) -> ApiResult<MessageReceipt> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::NotConnected);
        }
        self.sent.lock().push(SentMessage {
            target,
            text: text.to_string(),
        });
        Ok(MessageReceipt {
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }
}

#[async_trait]
impl Gateway for MockGateway {
    fn subscribe(&self, kind: EventKind, sink: EventSink) {
        self.sinks.lock().entry(kind).or_default().push(sink);
    }

    async fn send_private_msg(&self, user_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        self.record_send(Target::User(user_id), message)
    }

    async fn send_group_msg(&self, group_id: i64, message: &str) -> ApiResult<MessageReceipt> {
        self.record_send(Target::Group(group_id), message)
    }

    async fn delete_msg(&self, message_id: i64) -> ApiResult<()> {
        self.actions.lock().push(format!("delete_msg:{message_id}"));
        Ok(())
    }

    async fn set_group_kick(
        &self,
        group_id: i64,
        user_id: i64,
        _reject_add_request: bool,
    ) -> ApiResult<()> {
        self.actions.lock().push(format!("kick:{group_id}:{user_id}"));
        Ok(())
    }

    async fn set_group_ban(
        &self,
        group_id: i64,
        user_id: i64,
        duration_secs: u64,
    ) -> ApiResult<()> {
        self.actions
            .lock()
            .push(format!("ban:{group_id}:{user_id}:{duration_secs}"));
        Ok(())
    }

    async fn set_group_whole_ban(&self, group_id: i64, enable: bool) -> ApiResult<()> {
        self.actions.lock().push(format!("ban_all:{group_id}:{enable}"));
        Ok(())
    }

    async fn set_group_admin(&self, group_id: i64, user_id: i64, enable: bool) -> ApiResult<()> {
        self.actions
            .lock()
            .push(format!("set_admin:{group_id}:{user_id}:{enable}"));
        Ok(())
    }

    async fn set_group_name(&self, group_id: i64, name: &str) -> ApiResult<()> {
        self.actions.lock().push(format!("set_group_name:{group_id}:{name}"));
        Ok(())
    }

    async fn set_group_special_title(
        &self,
        group_id: i64,
        user_id: i64,
        title: &str,
    ) -> ApiResult<()> {
        self.actions
            .lock()
            .push(format!("set_title:{group_id}:{user_id}:{title}"));
        Ok(())
    }

    async fn set_group_add_request(&self, flag: &str, approve: bool) -> ApiResult<()> {
        self.actions.lock().push(format!("add_request:{flag}:{approve}"));
        Ok(())
    }

    async fn get_group_member_info(
        &self,
        group_id: i64,
        user_id: i64,
    ) -> ApiResult<GroupMemberInfo> {
        let role = self
            .roles
            .lock()
            .get(&(group_id, user_id))
            .copied()
            .unwrap_or(GroupRole::Member);
        Ok(GroupMemberInfo {
            user_id,
            nickname: format!("user-{user_id}"),
            card: String::new(),
            role,
        })
    }

    async fn get_login_info(&self) -> ApiResult<LoginInfo> {
        Ok(LoginInfo {
            user_id: 10000,
            nickname: "braze".to_string(),
        })
    }

    async fn get_friend_list(&self) -> ApiResult<Vec<FriendInfo>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Event builders
// ============================================================================

pub(crate) fn group_message(group_id: i64, user_id: i64, text: &str) -> GatewayEvent {
    GatewayEvent::Message(MessageEvent {
        scope: MessageScope::Group,
        message_id: 1,
        user_id,
        group_id: Some(group_id),
        raw_message: text.to_string(),
        sender: Sender {
            user_id,
            ..Sender::default()
        },
        self_id: 10000,
    })
}

pub(crate) fn private_message(user_id: i64, text: &str) -> GatewayEvent {
    GatewayEvent::Message(MessageEvent {
        scope: MessageScope::Private,
        message_id: 2,
        user_id,
        group_id: None,
        raw_message: text.to_string(),
        sender: Sender {
            user_id,
            ..Sender::default()
        },
        self_id: 10000,
    })
}

// ============================================================================
// Canned plugins
// ============================================================================

/// Counts message deliveries.
pub(crate) struct CountingPlugin {
    name: &'static str,
    counter: Arc<AtomicUsize>,
}

#[async_trait]
impl BotPlugin for CountingPlugin {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let counter = Arc::clone(&self.counter);
        ctx.on(EventKind::Message, move |_e| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        Ok(())
    }
}

pub(crate) fn counting_factory(name: &'static str, counter: Arc<AtomicUsize>) -> PluginFactory {
    Arc::new(move || -> Box<dyn BotPlugin> {
        Box::new(CountingPlugin {
            name,
            counter: Arc::clone(&counter),
        })
    })
}

/// Panics on every message delivery.
#[derive(Default)]
pub(crate) struct PanickingPlugin;

fn chaos_handler() -> Result<(), BoxError> {
    panic!("chaos handler always panics")
}

#[async_trait]
impl BotPlugin for PanickingPlugin {
    fn name(&self) -> &str {
        "chaos"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        ctx.on(EventKind::Message, |_e| async move { chaos_handler() });
        Ok(())
    }
}

/// Returns an error on every message delivery.
#[derive(Default)]
pub(crate) struct FailingPlugin;

#[async_trait]
impl BotPlugin for FailingPlugin {
    fn name(&self) -> &str {
        "grump"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        ctx.on(EventKind::Message, |_e| async move {
            Err("grump handler always fails".into())
        });
        Ok(())
    }
}

/// Registers an invalid schedule expression.
#[derive(Default)]
pub(crate) struct BadCronPlugin;

#[async_trait]
impl BotPlugin for BadCronPlugin {
    fn name(&self) -> &str {
        "badcron"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        ctx.cron("not-a-cron", |_task| async move { Ok(()) });
        Ok(())
    }
}

/// Fails its own initialization.
#[derive(Default)]
pub(crate) struct BrokenPlugin;

#[async_trait]
impl BotPlugin for BrokenPlugin {
    fn name(&self) -> &str {
        "broken"
    }

    async fn init(&self, _ctx: &PluginContext) -> Result<(), BoxError> {
        Err("broken plugin cannot initialize".into())
    }
}

/// Registers a once-per-second task that counts invocations.
pub(crate) struct TickerPlugin {
    counter: Arc<AtomicUsize>,
}

#[async_trait]
impl BotPlugin for TickerPlugin {
    fn name(&self) -> &str {
        "ticker"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let counter = Arc::clone(&self.counter);
        ctx.cron("* * * * * *", move |_task| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        Ok(())
    }
}

pub(crate) fn ticker_factory(counter: Arc<AtomicUsize>) -> PluginFactory {
    Arc::new(move || -> Box<dyn BotPlugin> {
        Box::new(TickerPlugin {
            counter: Arc::clone(&counter),
        })
    })
}

pub(crate) fn simple_factory<P: BotPlugin + Default + 'static>() -> PluginFactory {
    Arc::new(|| -> Box<dyn BotPlugin> { Box::new(P::default()) })
}

// ============================================================================
// TestBed
// ============================================================================

/// A fully wired manager over a temp directory and a mock gateway.
pub(crate) struct TestBed {
    pub tmp: TempDir,
    pub gateway: Arc<MockGateway>,
    pub manager: Arc<PluginManager>,
}

impl TestBed {
    /// Builds a test bed with units on disk for every factory name plus the
    /// given persisted system/user lists.
    pub fn new(factories: FactoryRegistry, system: &[&str], user: &[&str]) -> Self {
        let tmp = TempDir::new().expect("tempdir");
        let plugin_root = tmp.path().join("plugins");
        for name in factories.names() {
            write_unit(&plugin_root, &name);
        }

        let config_path = tmp.path().join("braze.toml");
        let list = |names: &[&str]| {
            names
                .iter()
                .map(|n| format!("\"{n}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };
        fs::write(
            &config_path,
            format!(
                "[identity]\nbot_uin = 10000\nmaster = [42]\nadmins = [43]\n\n\
                 [plugins]\nroot = {:?}\nsystem = [{}]\nuser = [{}]\nsettle_delay_ms = 0\n",
                plugin_root.display().to_string(),
                list(system),
                list(user),
            ),
        )
        .expect("write config");

        let config: BrazeConfig = crate::config::ConfigLoader::new()
            .file(&config_path)
            .without_env()
            .load()
            .expect("load config");

        let gateway = Arc::new(MockGateway::new());
        let manager = PluginManager::new(
            Arc::new(config),
            PluginSetStore::new(&config_path),
            gateway.clone(),
            factories,
            Arc::new(ErrorJournal::new()),
        );
        let gateway_dyn: Arc<dyn Gateway> = gateway.clone();
        manager.dispatcher().bind(&gateway_dyn);

        Self {
            tmp,
            gateway,
            manager,
        }
    }

    /// Emits an event and yields long enough for spawned handlers to finish.
    pub async fn emit_and_settle(&self, event: GatewayEvent) {
        self.gateway.emit(event);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Writes a minimal packaged unit for `name`.
pub(crate) fn write_unit(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create unit dir");
    fs::write(
        dir.join("plugin.toml"),
        format!("name = \"{name}\"\nversion = \"1.0.0\"\ndescription = \"{name} test unit\"\n"),
    )
    .expect("write manifest");
}
