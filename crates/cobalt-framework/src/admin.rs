//! Operator commands over private messages.
//!
//! ```text
//! <prefix> -c <on|off|reboot|list|active> [-p <plugin>]
//! ```
//!
//! Only configured masters reach the command; everyone else is halted
//! silently by the sender gate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use cobalt_core::{ElementKind, EventClass};
use tracing::{info, warn};

use crate::bag::ResultBag;
use crate::middleware::{ArgKind, Chain, CommandOption};
use crate::plugin::{PluginDescriptor, PluginManager};
use crate::router::Route;

/// Verbs understood by the admin command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    On,
    Off,
    Reboot,
    List,
    Active,
}

impl AdminCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Reboot => "reboot",
            Self::List => "list",
            Self::Active => "active",
        }
    }

    /// Whether the verb operates on a single named plugin.
    pub fn needs_plugin(self) -> bool {
        matches!(self, Self::On | Self::Off | Self::Reboot)
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "reboot" => Ok(Self::Reboot),
            "list" => Ok(Self::List),
            "active" => Ok(Self::Active),
            _ => Err(format!("Unknown command: {s}")),
        }
    }
}

/// Executes admin commands against a [`PluginManager`].
#[derive(Clone)]
pub struct Admin {
    manager: Arc<PluginManager>,
}

impl Admin {
    pub fn new(manager: Arc<PluginManager>) -> Self {
        Self { manager }
    }

    /// Runs `command` and returns the reply text.
    pub async fn execute(&self, command: &str, plugin: Option<&str>) -> String {
        let command = match command.parse::<AdminCommand>() {
            Ok(command) => command,
            Err(reply) => return reply,
        };
        let plugin = plugin.map(str::trim).filter(|p| !p.is_empty());
        info!(command = %command, plugin = plugin.unwrap_or("-"), "Admin command");

        if !command.needs_plugin() {
            return match command {
                AdminCommand::List => self.list().await,
                _ => self.active(),
            };
        }

        let Some(name) = plugin else {
            return String::from("Please provide a plugin name");
        };
        match self.manager.discover().await {
            Ok(catalog) if catalog.iter().any(|d| d.name == name) => {}
            Ok(_) => return format!("Plugin {name} not found"),
            Err(e) => return format!("Failed to list plugins\n{e}"),
        }

        match command {
            AdminCommand::On => self.on(name).await,
            AdminCommand::Off => self.off(name).await,
            _ => self.reboot(name).await,
        }
    }

    async fn on(&self, name: &str) -> String {
        if self.manager.is_active(name) {
            return format!("Plugin {name} is already enabled");
        }
        match self.manager.enable(name).await {
            Ok(()) => format!("Plugin {name} enabled"),
            Err(e) => format!("Failed to enable plugin {name}\n{e}"),
        }
    }

    async fn off(&self, name: &str) -> String {
        if !self.manager.is_active(name) {
            return format!("Plugin {name} is already disabled");
        }
        match self.manager.disable(name).await {
            Ok(()) => format!("Plugin {name} disabled"),
            Err(e) => format!("Failed to disable plugin {name}\n{e}"),
        }
    }

    async fn reboot(&self, name: &str) -> String {
        let was_active = self.manager.is_active(name);
        match (self.manager.reboot(name).await, was_active) {
            (Ok(()), true) => format!("Plugin {name} rebooted"),
            (Ok(()), false) => format!("Plugin {name} enabled"),
            (Err(e), _) => format!("Failed to reboot plugin {name}\n{e}"),
        }
    }

    async fn list(&self) -> String {
        match self.manager.discover().await {
            Ok(catalog) if catalog.is_empty() => String::from("No plugins installed"),
            Ok(catalog) => catalog.iter().map(describe).collect::<Vec<_>>().join("\n\n"),
            Err(e) => format!("Failed to list plugins\n{e}"),
        }
    }

    fn active(&self) -> String {
        let active = self.manager.active_plugins();
        if active.is_empty() {
            return String::from("No plugins are active");
        }
        active
            .into_iter()
            .map(|(name, metadata)| {
                describe(&PluginDescriptor {
                    dir: self.manager.plugin_dir().join(&name),
                    name,
                    metadata,
                })
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The admin route: private messages from `masters` starting with
    /// `prefix`, text only.
    pub fn route(&self, masters: impl IntoIterator<Item = i64>, prefix: &str) -> Route {
        let chain = Chain::builder()
            .sender(masters)
            .prefix([prefix])
            .kinds([ElementKind::Text])
            .command([
                CommandOption::new("command")
                    .alias("c")
                    .description("Command")
                    .kind(ArgKind::String)
                    .required(),
                CommandOption::new("plugin")
                    .alias("p")
                    .description("Plugin name")
                    .kind(ArgKind::String),
            ])
            .build();

        let admin = self.clone();
        Route::new(EventClass::PrivateMessage, chain)
            .name("admin")
            .handler(move |ctx, bag: ResultBag| {
                let admin = admin.clone();
                async move {
                    let args = bag.raw("command").cloned().unwrap_or_default();
                    let command = args.get("command").map(value_text).unwrap_or_default();
                    let plugin = args.get("plugin").map(value_text);
                    let reply = admin.execute(&command, plugin.as_deref()).await;
                    ctx.reply(reply).await?;
                    Ok(())
                }
            })
            .on_error(|ctx, err| async move {
                if let Err(e) = ctx.reply(err.reason()).await {
                    warn!(error = %e, "Failed to reply admin error");
                }
            })
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe(descriptor: &PluginDescriptor) -> String {
    let metadata = &descriptor.metadata;
    format!(
        "{}\nVersion: {}\nDescription: {}",
        descriptor.name,
        metadata.version.as_deref().unwrap_or("unknown"),
        metadata.description.as_deref().unwrap_or("none"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventContext;
    use crate::error::BoxError;
    use crate::host::{HostOptions, PluginHost};
    use crate::plugin::{Plugin, StaticUnitLoader, unit_fn};
    use crate::test_support::MockClient;
    use cobalt_core::MessageEvent;
    use tempfile::TempDir;

    async fn admin(dirs: &[&str]) -> (TempDir, Admin, Arc<MockClient>) {
        let dir = tempfile::tempdir().unwrap();
        for name in dirs {
            std::fs::create_dir_all(dir.path().join("plugins").join(name)).unwrap();
        }
        std::fs::write(
            dir.path().join("plugins/echo/plugin.json"),
            r#"{"version":"1.2.0","description":"Repeats you"}"#,
        )
        .unwrap();

        let loader = StaticUnitLoader::new();
        loader.register("echo", || {
            unit_fn(|host: PluginHost, metadata| async move { Ok::<Plugin, BoxError>(host.plugin(metadata)) })
        });

        let client = MockClient::new();
        let host = PluginHost::new(client.clone(), HostOptions::default());
        let manager = PluginManager::new(
            host,
            dir.path().join("plugins"),
            dir.path().join("plugins.json"),
            Arc::new(loader),
        );
        manager.init().await.unwrap();
        (dir, Admin::new(Arc::new(manager)), client)
    }

    #[test]
    fn test_parse_command_case_insensitive() {
        assert_eq!("ON".parse::<AdminCommand>().unwrap(), AdminCommand::On);
        assert_eq!("Reboot".parse::<AdminCommand>().unwrap(), AdminCommand::Reboot);
        assert_eq!("nuke".parse::<AdminCommand>().unwrap_err(), "Unknown command: nuke");
    }

    #[tokio::test]
    async fn test_replies() {
        let (_dir, admin, _) = admin(&["echo", "other"]).await;

        assert_eq!(admin.execute("nuke", None).await, "Unknown command: nuke");
        assert_eq!(admin.execute("on", None).await, "Please provide a plugin name");
        assert_eq!(admin.execute("on", Some("ghost")).await, "Plugin ghost not found");
        assert_eq!(admin.execute("active", None).await, "No plugins are active");
        assert_eq!(admin.execute("off", Some("echo")).await, "Plugin echo is already disabled");

        assert_eq!(admin.execute("ON", Some("echo")).await, "Plugin echo enabled");
        assert_eq!(admin.execute("on", Some("echo")).await, "Plugin echo is already enabled");
        assert_eq!(
            admin.execute("active", None).await,
            "echo\nVersion: 1.2.0\nDescription: Repeats you"
        );
        assert_eq!(admin.execute("reboot", Some("echo")).await, "Plugin echo rebooted");
        assert_eq!(admin.execute("off", Some("echo")).await, "Plugin echo disabled");

        let failed = admin.execute("on", Some("other")).await;
        assert!(failed.starts_with("Failed to enable plugin other\n"));
    }

    #[tokio::test]
    async fn test_list() {
        let (_dir, admin, _) = admin(&["echo", "bare"]).await;

        assert_eq!(
            admin.execute("list", None).await,
            "bare\nVersion: unknown\nDescription: none\n\n\
             echo\nVersion: 1.2.0\nDescription: Repeats you"
        );
    }

    #[tokio::test]
    async fn test_route_gates_and_replies() {
        let (_dir, admin, client) = admin(&["echo"]).await;
        let route = admin.route([42], "#bot");

        let send = |event: MessageEvent| {
            let route = route.clone();
            let ctx = Arc::new(EventContext::new(event, client.clone()));
            async move { route.run(ctx).await }
        };

        send(MessageEvent::private(7, "#bot -c list")).await;
        assert!(client.sent_texts().is_empty());

        send(MessageEvent::private(42, "#bot -c on -p echo")).await;
        send(MessageEvent::private(42, "#bot")).await;

        assert_eq!(
            client.sent_texts(),
            vec!["Plugin echo enabled", "Missing required argument: command"]
        );
    }
}
