//! The `echo` unit.
//!
//! - `/echo <text>` repeats the text
//! - `/ping` answers `Pong!`
//! - `/count` counts how often the sender used it, persisted in a store
//! - `/repeat [-t N] <words...>` repeats the words N times

use async_trait::async_trait;
use cobalt::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

const STORE: &str = "echo";

pub struct Echo;

#[async_trait]
impl PluginUnit for Echo {
    async fn setup(&self, host: PluginHost, metadata: PluginMetadata) -> Result<Plugin, BoxError> {
        let times = metadata
            .get("times")
            .and_then(Value::as_i64)
            .unwrap_or(2);
        let plugin = host.plugin(metadata);
        let store = plugin.open_store(STORE).await?;

        plugin.on_message(Chain::builder().prefix(["/echo "]).build(), |ctx, bag| async move {
            let text: String = bag.get("prefix").unwrap_or_default();
            ctx.reply(text).await?;
            Ok(())
        })?;

        plugin.on_message(Chain::builder().equal(["/ping"]).build(), |ctx, _| async move {
            ctx.reply("Pong!").await?;
            Ok(())
        })?;

        plugin.on_message(Chain::builder().equal(["/count"]).build(), move |ctx, _| {
            let store = store.clone();
            async move {
                let key = ctx.event().user_id().to_string();
                let count = store.get::<u64>(&key).await.unwrap_or(0) + 1;
                store.put(key, count).await?;
                ctx.reply(format!("You have counted {count} times")).await?;
                Ok(())
            }
        })?;

        let repeat = Chain::builder()
            .prefix(["/repeat"])
            .command([CommandOption::new("times")
                .alias("t")
                .description("How many times")
                .kind(ArgKind::Number)
                .default(times)])
            .build();
        plugin.on_message(repeat, |ctx, bag| async move {
            let args = bag.raw("command").cloned().unwrap_or_default();
            let times = args.get("times").and_then(Value::as_u64).unwrap_or(1).min(10) as usize;
            let words: Vec<String> = args
                .get("_")
                .and_then(Value::as_array)
                .map(|v| v.iter().skip(1).filter_map(|w| w.as_str().map(String::from)).collect())
                .unwrap_or_default();
            ctx.reply(vec![words.join(" "); times].join("\n")).await?;
            Ok(())
        })?;

        plugin.cron("0 * * * *", |_client| async {
            debug!("echo is alive");
        })?;

        let name = plugin.name().to_string();
        plugin.on_unload(move || async move {
            info!(plugin = %name, "Echo unloaded");
        });

        Ok(plugin)
    }
}

cobalt::prelude::export_unit!("echo", Echo);
