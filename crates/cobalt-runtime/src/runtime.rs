//! Runtime orchestration: startup, the event loop and shutdown.
//!
//! The runtime owns the plugin host and the plugin manager. Inbound events
//! come from the external client through an `mpsc` channel; each is
//! dispatched on its own task so a panicking handler never takes the host
//! down.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cobalt_runtime::CobaltRuntime;
//!
//! let runtime = CobaltRuntime::builder()
//!     .config_file("cobalt.toml")
//!     .build(client)?;
//!
//! // Runs until Ctrl+C, SIGTERM or the event channel closes.
//! runtime.run(events).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cobalt_core::{BoxedClient, MessageEvent};
use cobalt_framework::{
    Admin, EventContext, LoadReport, PluginHost, PluginManager, RouteId, RouteOutcome,
    StaticUnitLoader, UnitLoader,
};
use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::config::{CobaltConfig, ConfigLoader, ConfigResult};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// The Cobalt host process.
pub struct CobaltRuntime {
    config: CobaltConfig,
    host: PluginHost,
    manager: Arc<PluginManager>,
    admin: Admin,
    admin_route: Mutex<Option<RouteId>>,
    running: AtomicBool,
}

impl CobaltRuntime {
    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration.
    ///
    /// Initializes logging from `config.logging` if no subscriber is set yet.
    pub fn from_config(
        config: &CobaltConfig,
        client: BoxedClient,
        loader: Arc<dyn UnitLoader>,
    ) -> Self {
        logging::init_from_config(&config.logging);

        let host = PluginHost::new(client, config.host_options());
        let manager = Arc::new(PluginManager::new(
            host.clone(),
            &config.plugins.dir,
            &config.plugins.state_file,
            loader,
        ));

        info!(
            log_level = %config.logging.level,
            plugin_dir = %config.plugins.dir.display(),
            masters = config.bot.masters.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            admin: Admin::new(Arc::clone(&manager)),
            host,
            manager,
            admin_route: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CobaltConfig {
        &self.config
    }

    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    pub fn admin(&self) -> &Admin {
        &self.admin
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Brings the host online.
    ///
    /// Loads the persisted state, registers the admin route, re-enables
    /// every saved plugin and tells the masters how that went.
    pub async fn start(&self) -> RuntimeResult<LoadReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        match self.bring_up().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.unregister_admin();
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> RuntimeResult<LoadReport> {
        logging::install_panic_hook();
        self.manager.init().await?;

        let bot = &self.config.bot;
        let route = self.admin.route(bot.masters.iter().copied(), &bot.command);
        *self.admin_route.lock() = Some(self.host.router().register(route));

        let found = self.manager.discover().await?.len();
        let report = self.manager.load_saved().await?;

        info!(
            found,
            loaded = report.success,
            failed = report.failed,
            "{} initialized",
            bot.log_prefix
        );
        let summary = format!(
            "{} initialized\nFound {found} plugins\nLoaded {} plugins\nFailed to load {} plugins",
            bot.log_prefix, report.success, report.failed
        );
        self.host.notify_masters(summary).await;

        Ok(report)
    }

    /// Dispatches one event through every registered route.
    pub async fn dispatch(&self, event: MessageEvent) -> Vec<RouteOutcome> {
        dispatch_on(&self.host, event).await
    }

    /// Starts the host and processes `events` until Ctrl+C, SIGTERM or the
    /// channel closes, then shuts down.
    pub async fn run(&self, events: mpsc::Receiver<MessageEvent>) -> RuntimeResult<()> {
        self.run_until(events, wait_for_shutdown()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown future.
    pub async fn run_until<F>(
        &self,
        mut events: mpsc::Receiver<MessageEvent>,
        shutdown: F,
    ) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        info!("Cobalt runtime is now running");

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => {
                        let host = self.host.clone();
                        tasks.spawn(async move {
                            dispatch_on(&host, event).await;
                        });
                    }
                    None => {
                        info!("Event source closed");
                        break;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => supervise(joined),
            }
        }

        debug!(in_flight = tasks.len(), "Draining dispatch tasks");
        while let Some(joined) = tasks.join_next().await {
            supervise(joined);
        }

        self.stop().await
    }

    /// Tears down every active plugin and flushes plugin state and metadata.
    ///
    /// Durable intent is kept: plugins enabled now are enabled on the next
    /// start.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Runtime is not running");
            return Ok(());
        }

        info!("Stopping Cobalt runtime");
        self.unregister_admin();
        self.manager.shutdown().await?;
        info!("Runtime stopped");
        Ok(())
    }

    fn unregister_admin(&self) {
        if let Some(id) = self.admin_route.lock().take() {
            self.host.router().unregister(id);
        }
    }
}

async fn dispatch_on(host: &PluginHost, event: MessageEvent) -> Vec<RouteOutcome> {
    let span = debug_span!(
        "dispatch",
        user = event.user_id(),
        group = event.group_id().unwrap_or_default()
    );
    let ctx = Arc::new(EventContext::new(event, Arc::clone(host.client())));
    host.router().dispatch(ctx).instrument(span).await
}

fn supervise(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Dispatch task panicked");
        } else {
            debug!(error = %e, "Dispatch task cancelled");
        }
    }
}

/// Waits for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c.await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`CobaltRuntime`] with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// let runtime = CobaltRuntime::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build(client)?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<CobaltConfig>,
    loader: Option<Arc<dyn UnitLoader>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            loader: None,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: CobaltConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as-is and skips loading.
    pub fn config(mut self, config: CobaltConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loader for plugin units. Defaults to a [`StaticUnitLoader`], which
    /// sees every unit exported with `export_unit!`.
    pub fn unit_loader(mut self, loader: Arc<dyn UnitLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Builds the runtime around `client`.
    pub fn build(self, client: BoxedClient) -> ConfigResult<CobaltRuntime> {
        let config = match self.config {
            Some(config) => {
                crate::config::validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(StaticUnitLoader::new()));
        Ok(CobaltRuntime::from_config(&config, client, loader))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cobalt_core::{Client, ClientResult, Message, SentMessage};
    use cobalt_framework::{BoxError, Chain, Plugin, PluginHost, unit_fn};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingClient {
        sent: parking_lot::Mutex<Vec<(i64, String)>>,
    }

    impl RecordingClient {
        fn texts_to(&self, target: i64) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter(|(t, _)| *t == target)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Client for RecordingClient {
        fn self_id(&self) -> i64 {
            1
        }

        async fn send_private_msg(&self, user_id: i64, message: Message) -> ClientResult<SentMessage> {
            self.sent.lock().push((user_id, message.plain_text()));
            Ok(SentMessage::default())
        }

        async fn send_group_msg(&self, group_id: i64, message: Message) -> ClientResult<SentMessage> {
            self.sent.lock().push((group_id, message.plain_text()));
            Ok(SentMessage::default())
        }
    }

    fn runtime(saved: &str) -> (TempDir, CobaltRuntime, Arc<RecordingClient>) {
        let dir = tempfile::tempdir().unwrap();
        for name in ["echo", "broken"] {
            std::fs::create_dir_all(dir.path().join("plugins").join(name)).unwrap();
        }
        std::fs::write(dir.path().join("plugins.json"), saved).unwrap();

        let loader = StaticUnitLoader::new();
        loader.register("echo", || {
            unit_fn(|host: PluginHost, metadata| async move {
                let plugin = host.plugin(metadata);
                plugin.on_message(Chain::builder().prefix(["/echo "]).build(), |ctx, _bag| async move {
                    let text = ctx.event().message.plain_text();
                    ctx.reply(text.trim_start_matches("/echo ").to_string()).await?;
                    Ok(())
                })?;
                Ok::<Plugin, BoxError>(plugin)
            })
        });
        loader.register("broken", || {
            unit_fn(|_: PluginHost, _| async { Err::<Plugin, BoxError>("no token".into()) })
        });

        let mut config = CobaltConfig::default();
        config.bot.masters = vec![42];
        config.plugins.dir = dir.path().join("plugins");
        config.plugins.state_file = dir.path().join("plugins.json");
        config.storage.data_dir = dir.path().join("data");

        let client = Arc::new(RecordingClient::default());
        let runtime = CobaltRuntime::builder()
            .config(config)
            .unit_loader(Arc::new(loader))
            .build(client.clone())
            .unwrap();
        (dir, runtime, client)
    }

    #[tokio::test]
    async fn test_start_loads_saved_and_notifies() {
        let (_dir, runtime, client) =
            runtime(r#"{"enabled":["echo","broken"],"error":[],"actived":[]}"#);

        let report = runtime.start().await.unwrap();
        assert_eq!(report, LoadReport { success: 1, failed: 1 });
        assert!(runtime.is_running());
        assert!(matches!(runtime.start().await, Err(RuntimeError::AlreadyRunning)));

        assert_eq!(
            client.texts_to(42),
            vec!["Cobalt initialized\nFound 2 plugins\nLoaded 1 plugins\nFailed to load 1 plugins"]
        );

        let state = runtime.manager().state();
        assert!(state.error.contains("broken"));
        assert!(state.actived.contains("echo"));
    }

    #[tokio::test]
    async fn test_dispatch_reaches_admin_and_plugins() {
        let (_dir, runtime, client) = runtime(r#"{"enabled":["echo"],"error":[],"actived":[]}"#);
        runtime.start().await.unwrap();

        runtime.dispatch(MessageEvent::group(500, 7, "/echo hi")).await;
        assert_eq!(client.texts_to(500), vec!["hi"]);

        runtime.dispatch(MessageEvent::private(42, "#cobalt -c off -p echo")).await;
        assert_eq!(client.texts_to(42).last().unwrap(), "Plugin echo disabled");

        runtime.dispatch(MessageEvent::group(500, 7, "/echo again")).await;
        assert_eq!(client.texts_to(500).len(), 1);
    }

    #[tokio::test]
    async fn test_stop_keeps_intent_and_removes_admin() {
        let (dir, runtime, _client) = runtime(r#"{"enabled":["echo"],"error":[],"actived":[]}"#);
        runtime.start().await.unwrap();
        let routes = runtime.host().router().len();

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert!(runtime.manager().active_names().is_empty());
        assert_eq!(runtime.host().router().len(), routes - 2);

        let saved = std::fs::read_to_string(dir.path().join("plugins.json")).unwrap();
        assert!(saved.contains("echo"));

        // Stopping twice is a no-op.
        runtime.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_until_channel_closes() {
        let (_dir, runtime, client) = runtime(r#"{"enabled":["echo"],"error":[],"actived":[]}"#);
        let (tx, rx) = mpsc::channel(8);

        tx.send(MessageEvent::group(500, 7, "/echo one")).await.unwrap();
        tx.send(MessageEvent::group(500, 7, "/echo two")).await.unwrap();
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(5),
            runtime.run_until(rx, std::future::pending::<()>()),
        )
        .await
        .unwrap()
        .unwrap();

        let mut echoed = client.texts_to(500);
        echoed.sort();
        assert_eq!(echoed, vec!["one", "two"]);
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let mut config = CobaltConfig::default();
        config.bot.command = "# bad".into();

        let result = CobaltRuntime::builder()
            .config(config)
            .build(Arc::new(RecordingClient::default()));
        assert!(result.is_err());
    }
}
