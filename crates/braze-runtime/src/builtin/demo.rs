//! Reference plugin demonstrating the contract.

use async_trait::async_trait;

use braze_core::EventKind;

use crate::plugin::{BotPlugin, BoxError, PluginContext};

/// Replies `world` to `hello`, plus scope-specific samples.
pub struct DemoPlugin;

#[async_trait]
impl BotPlugin for DemoPlugin {
    fn name(&self) -> &str {
        "demo"
    }

    fn description(&self) -> &str {
        "reference plugin"
    }

    async fn init(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        ctx.on(EventKind::Message, |e| async move {
            if e.raw_message() == "hello" {
                e.reply("world", true).await?;
            }
            Ok(())
        });

        ctx.on(EventKind::GroupMessage, |e| async move {
            if e.raw_message() == "ping" {
                e.reply("pong", false).await?;
            }
            Ok(())
        });

        ctx.on(EventKind::PrivateMessage, |e| async move {
            if e.raw_message() == "ping" {
                e.reply("pong", false).await?;
            }
            Ok(())
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::builtin::default_factories;
    use crate::testutil::{Target, TestBed, group_message, private_message};

    #[tokio::test]
    async fn replies_world_to_hello_with_a_quote() {
        let bed = TestBed::new(default_factories(), &[], &["demo"]);
        bed.manager.load("demo").await.unwrap();

        bed.emit_and_settle(private_message(5, "hello")).await;
        let sent = bed.gateway.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Target::User(5));
        assert!(sent[0].text.ends_with("world"));
        assert!(sent[0].text.starts_with("[CQ:reply,id="));
    }

    #[tokio::test]
    async fn group_ping_gets_a_group_pong() {
        let bed = TestBed::new(default_factories(), &[], &["demo"]);
        bed.manager.load("demo").await.unwrap();

        bed.emit_and_settle(group_message(7, 5, "ping")).await;
        let sent = bed.gateway.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, Target::Group(7));
        assert_eq!(sent[0].text, "pong");
    }
}
