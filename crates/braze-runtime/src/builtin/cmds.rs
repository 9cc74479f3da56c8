//! The distinguished command plugin.
//!
//! `cmds` is the administrative surface of the runtime: masters and admins
//! drive plugin lifecycle from chat. It is protected — the runtime rejects
//! disabling it, since losing it would leave no way to administer the rest.

use async_trait::async_trait;

use braze_core::EventKind;

use crate::plugin::{BotPlugin, BoxError, PluginContext};

const HELP: &str = "[*]plugin commands:\n\
    .plugin list          show loaded plugins\n\
    .plugin scan          show units on disk\n\
    .plugin on <name>     enable a plugin\n\
    .plugin off <name>    disable a plugin\n\
    .plugin load <name>   load a plugin\n\
    .plugin reload [name] reload a plugin (self when omitted)";

/// Chat-driven plugin administration.
pub struct CmdsPlugin;

#[async_trait]
impl BotPlugin for CmdsPlugin {
    fn name(&self) -> &str {
        "cmds"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "plugin administration commands"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let caps = ctx.handle();
        ctx.on(EventKind::Message, move |e| {
            let caps = caps.clone();
            async move {
                let raw = e.raw_message().trim().to_string();
                if !raw.starts_with(".plugin") {
                    return Ok(());
                }
                let Some(msg) = e.event().as_message() else {
                    return Ok(());
                };
                if !caps.has_right(msg.sender.user_id) {
                    return Ok(());
                }

                let parts: Vec<&str> = raw.split_whitespace().collect();
                let reply = match parts.as_slice() {
                    [".plugin"] | [".plugin", "help"] => HELP.to_string(),
                    [".plugin", "list"] => caps.list_plugins().await,
                    [".plugin", "scan"] => {
                        let units = caps.discover_units().await;
                        format!("[*]available units: {}", units.join(", "))
                    }
                    [".plugin", "on", name] => caps.enable_plugin(name).await,
                    [".plugin", "off", name] => caps.disable_plugin(name).await,
                    [".plugin", "load", name] => caps.load_plugin(name).await,
                    [".plugin", "reload"] => caps.reload_plugin(None).await,
                    [".plugin", "reload", name] => caps.reload_plugin(Some(name)).await,
                    _ => "[-]unknown plugin command, try `.plugin help`".to_string(),
                };
                e.reply(&reply, true).await?;
                Ok(())
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builtin::default_factories;
    use crate::testutil::{TestBed, group_message};

    fn bed() -> TestBed {
        TestBed::new(default_factories(), &["cmds"], &["demo"])
    }

    async fn started_bed() -> TestBed {
        let bed = bed();
        let (loaded, failed) = bed.manager.load_all().await;
        assert_eq!((loaded, failed), (2, 0));
        bed
    }

    #[tokio::test]
    async fn master_can_disable_and_enable_a_plugin() {
        let bed = started_bed().await;

        bed.emit_and_settle(group_message(7, 42, ".plugin off demo")).await;
        assert_eq!(bed.manager.is_enabled("demo").await, Some(false));
        let sent = bed.gateway.sent_messages();
        assert!(sent.iter().any(|m| m.text.contains("[+]plugin demo disabled")));

        bed.emit_and_settle(group_message(7, 42, ".plugin on demo")).await;
        assert_eq!(bed.manager.is_enabled("demo").await, Some(true));
    }

    #[tokio::test]
    async fn unauthorized_users_are_ignored() {
        let bed = started_bed().await;

        bed.emit_and_settle(group_message(7, 99, ".plugin off demo")).await;
        assert_eq!(bed.manager.is_enabled("demo").await, Some(true));
        assert!(bed.gateway.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn disabling_cmds_is_rejected_with_a_failure_marker() {
        let bed = started_bed().await;

        bed.emit_and_settle(group_message(7, 42, ".plugin off cmds")).await;
        assert_eq!(bed.manager.is_enabled("cmds").await, Some(true));
        let sent = bed.gateway.sent_messages();
        assert!(sent.iter().any(|m| m.text.contains("[-]") && m.text.contains("protected")));
    }

    #[tokio::test]
    async fn list_reports_counts_with_info_marker() {
        let bed = started_bed().await;

        bed.emit_and_settle(group_message(7, 42, ".plugin list")).await;
        let sent = bed.gateway.sent_messages();
        assert!(sent.iter().any(|m| m.text.contains("[*]plugins 2/2 enabled")));
    }

    #[tokio::test]
    async fn admins_have_rights_too() {
        let bed = started_bed().await;

        bed.emit_and_settle(group_message(7, 43, ".plugin off demo")).await;
        assert_eq!(bed.manager.is_enabled("demo").await, Some(false));
    }
}
