//! The runtime instance of a plugin.
//!
//! A [`Plugin`] owns everything its unit acquired through it: routes, cron
//! jobs, auxiliary listeners, key-value stores and unload hooks.
//! [`Plugin::destroy`] releases all of them and is idempotent.

use std::collections::BTreeSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cobalt_core::{BoxedClient, EventClass};
use cobalt_transport::WsHandler;
use cobalt_transport::axum::Router as HttpRouter;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::metadata::PluginMetadata;
use crate::bag::ResultBag;
use crate::context::EventContext;
use crate::error::{BoxError, MiddlewareErrorKind, PluginError, ResourceError};
use crate::host::{CronJob, KvStore, PluginHost};
use crate::middleware::{Chain, Outcome, StepMiddleware, step_fn};
use crate::router::{Route, RouteId};

type UnloadHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct Resources {
    routes: Vec<RouteId>,
    cron_jobs: Vec<CronJob>,
    ports: BTreeSet<u16>,
    stores: BTreeSet<String>,
    unload_hooks: Vec<UnloadHook>,
}

struct PluginInner {
    name: String,
    host: PluginHost,
    metadata: Arc<RwLock<PluginMetadata>>,
    resources: Mutex<Resources>,
    destroyed: AtomicBool,
}

/// A live plugin. Cloning shares the same instance.
#[derive(Clone)]
pub struct Plugin {
    inner: Arc<PluginInner>,
}

impl Plugin {
    pub(crate) fn new(host: PluginHost, metadata: PluginMetadata) -> Self {
        let name = metadata.name.clone().unwrap_or_else(|| String::from("anonymous"));
        info!(plugin = %name, "Plugin instance created");
        Self {
            inner: Arc::new(PluginInner {
                name,
                host,
                metadata: Arc::new(RwLock::new(metadata)),
                resources: Mutex::new(Resources::default()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn host(&self) -> &PluginHost {
        &self.inner.host
    }

    pub fn client(&self) -> &BoxedClient {
        self.inner.host.client()
    }

    /// Snapshot of the current metadata.
    pub fn metadata(&self) -> PluginMetadata {
        self.inner.metadata.read().clone()
    }

    /// Edits the metadata in place. The new values apply to the next event
    /// and are written back to `plugin.json` on shutdown.
    pub fn update_metadata(&self, f: impl FnOnce(&mut PluginMetadata)) {
        f(&mut self.inner.metadata.write());
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn error(&self, source: impl Into<ResourceError>) -> PluginError {
        PluginError::new(self.inner.name.clone(), source)
    }

    fn ensure_alive(&self) -> Result<(), PluginError> {
        if self.is_destroyed() {
            return Err(self.error(ResourceError::Destroyed));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Routes
    // ------------------------------------------------------------------------

    /// Registers a fully configured route, owned by this plugin.
    pub fn route(&self, route: Route) -> Result<RouteId, PluginError> {
        self.ensure_alive()?;
        let id = self.inner.host.router().register(route);
        self.inner.resources.lock().routes.push(id);
        Ok(id)
    }

    /// Handles messages from any scene.
    pub fn on_message<F, Fut>(&self, chain: Chain, handler: F) -> Result<RouteId, PluginError>
    where
        F: Fn(Arc<EventContext>, ResultBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.listen(EventClass::Message, chain, handler)
    }

    pub fn on_group_message<F, Fut>(&self, chain: Chain, handler: F) -> Result<RouteId, PluginError>
    where
        F: Fn(Arc<EventContext>, ResultBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.listen(EventClass::GroupMessage, chain, handler)
    }

    pub fn on_private_message<F, Fut>(
        &self,
        chain: Chain,
        handler: F,
    ) -> Result<RouteId, PluginError>
    where
        F: Fn(Arc<EventContext>, ResultBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.listen(EventClass::PrivateMessage, chain, handler)
    }

    /// Builds a route whose chain starts with the metadata gate: deny-lists
    /// first, then the prefix.
    fn listen<F, Fut>(&self, class: EventClass, chain: Chain, handler: F) -> Result<RouteId, PluginError>
    where
        F: Fn(Arc<EventContext>, ResultBag) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let gate_meta = Arc::clone(&self.inner.metadata);
        let gate = step_fn("gate", move |ctx| {
            let metadata = gate_meta.read();
            if metadata.allows(ctx.event()) && metadata.matches_prefix(&ctx.text()) {
                Outcome::pass()
            } else {
                Outcome::Halt
            }
        });

        let quote_meta = Arc::clone(&self.inner.metadata);
        let plugin = self.inner.name.clone();
        let route = Route::new(class, chain.prepend(Arc::new(StepMiddleware(gate))))
            .name(self.inner.name.clone())
            .handler(move |ctx: Arc<EventContext>, bag| {
                let quote = quote_meta.read().quote;
                handler(Arc::new(ctx.with_quote(quote)), bag)
            })
            .on_error(move |ctx, err| {
                let plugin = plugin.clone();
                async move {
                    if err.kind() == MiddlewareErrorKind::Handler {
                        warn!(plugin = %plugin, error = %err, "Plugin handler failed");
                        return;
                    }
                    if let Err(e) = ctx.reply(err.reason()).await {
                        warn!(plugin = %plugin, error = %e, "Failed to reply chain error");
                    }
                }
            });

        self.route(route)
    }

    // ------------------------------------------------------------------------
    // Cron
    // ------------------------------------------------------------------------

    /// Runs `job` on a cron schedule. Returns the job id.
    pub fn cron<F, Fut>(&self, expr: &str, job: F) -> Result<u64, PluginError>
    where
        F: Fn(BoxedClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_alive()?;
        let client = Arc::clone(self.client());
        let cron = CronJob::spawn(expr, move || job(Arc::clone(&client))).map_err(|e| self.error(e))?;
        let id = cron.id();
        debug!(plugin = %self.inner.name, job = id, expr, "Scheduled cron job");
        self.inner.resources.lock().cron_jobs.push(cron);
        Ok(id)
    }

    /// Stops every cron job of this plugin.
    pub fn clear_cron_jobs(&self) {
        let jobs = std::mem::take(&mut self.inner.resources.lock().cron_jobs);
        for job in &jobs {
            job.stop();
        }
    }

    pub fn cron_job_count(&self) -> usize {
        self.inner.resources.lock().cron_jobs.len()
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    pub async fn open_http(&self, port: u16, router: HttpRouter) -> Result<(), PluginError> {
        self.ensure_alive()?;
        self.inner
            .host
            .listeners()
            .open_http(port, router)
            .await
            .map_err(|e| self.error(e))?;
        self.adopt_port(port)
    }

    pub async fn open_ws(
        &self,
        port: u16,
        path: &str,
        handler: Arc<dyn WsHandler>,
    ) -> Result<(), PluginError> {
        self.ensure_alive()?;
        self.inner
            .host
            .listeners()
            .open_ws(port, path, handler)
            .await
            .map_err(|e| self.error(e))?;
        self.adopt_port(port)
    }

    /// Records a freshly opened port, or closes it again if the plugin was
    /// destroyed while it was being bound.
    fn adopt_port(&self, port: u16) -> Result<(), PluginError> {
        let mut resources = self.inner.resources.lock();
        if self.is_destroyed() {
            drop(resources);
            let _ = self.inner.host.listeners().close_detached(port);
            return Err(self.error(ResourceError::Destroyed));
        }
        resources.ports.insert(port);
        Ok(())
    }

    /// Closes a listener this plugin opened and waits for its port to be
    /// released.
    pub async fn close_listener(&self, port: u16) -> Result<(), PluginError> {
        if !self.inner.resources.lock().ports.remove(&port) {
            return Err(self.error(cobalt_transport::TransportError::PortNotOpen(port)));
        }
        self.inner
            .host
            .listeners()
            .close(port)
            .await
            .map_err(|e| self.error(e))
    }

    // ------------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------------

    pub async fn open_store(&self, location: &str) -> Result<KvStore, PluginError> {
        self.ensure_alive()?;
        let store = self
            .inner
            .host
            .stores()
            .open(location)
            .await
            .map_err(|e| self.error(e))?;

        let mut resources = self.inner.resources.lock();
        if self.is_destroyed() {
            drop(resources);
            let _ = self.inner.host.stores().close(location);
            return Err(self.error(ResourceError::Destroyed));
        }
        resources.stores.insert(location.to_string());
        Ok(store)
    }

    /// Returns a store this plugin opened.
    pub fn store(&self, location: &str) -> Result<KvStore, PluginError> {
        if !self.inner.resources.lock().stores.contains(location) {
            return Err(self.error(ResourceError::StoreNotOpen(location.to_string())));
        }
        self.inner
            .host
            .stores()
            .get(location)
            .map_err(|e| self.error(e))
    }

    pub fn close_store(&self, location: &str) -> Result<(), PluginError> {
        if !self.inner.resources.lock().stores.remove(location) {
            return Err(self.error(ResourceError::StoreNotOpen(location.to_string())));
        }
        self.inner
            .host
            .stores()
            .close(location)
            .map_err(|e| self.error(e))
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Registers a hook run once during [`destroy`](Self::destroy).
    pub fn on_unload<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: UnloadHook = Box::new(move || Box::pin(hook()));
        self.inner.resources.lock().unload_hooks.push(hook);
    }

    /// Releases every resource of this plugin. Later calls do nothing.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let name = &self.inner.name;
        let mut resources = std::mem::take(&mut *self.inner.resources.lock());
        let ports = std::mem::take(&mut resources.ports);
        release(&self.inner.host, name, &resources);

        // Listeners are awaited so a reboot can rebind the same ports.
        for port in ports {
            if let Err(e) = self.inner.host.listeners().close(port).await {
                warn!(plugin = %name, port, error = %e, "Failed to close listener");
            }
        }

        for hook in resources.unload_hooks {
            if AssertUnwindSafe(hook()).catch_unwind().await.is_err() {
                warn!(plugin = %name, "Unload hook panicked");
            }
        }
        info!(plugin = %name, "Plugin destroyed");
    }
}

/// Dropping the last handle without `destroy` still releases the host
/// resources. Unload hooks do not run.
impl Drop for PluginInner {
    fn drop(&mut self) {
        if *self.destroyed.get_mut() {
            return;
        }
        let resources = std::mem::take(self.resources.get_mut());
        release(&self.host, &self.name, &resources);
        debug!(plugin = %self.name, "Plugin dropped without destroy");
    }
}

fn release(host: &PluginHost, name: &str, resources: &Resources) {
    for id in &resources.routes {
        host.router().unregister(*id);
    }
    for job in &resources.cron_jobs {
        job.stop();
    }
    for port in &resources.ports {
        if let Err(e) = host.listeners().close_detached(*port) {
            warn!(plugin = %name, port, error = %e, "Failed to close listener");
        }
    }
    for location in &resources.stores {
        if let Err(e) = host.stores().close(location) {
            warn!(plugin = %name, location = %location, error = %e, "Failed to close store");
        }
    }
    debug!(
        plugin = %name,
        routes = resources.routes.len(),
        cron_jobs = resources.cron_jobs.len(),
        listeners = resources.ports.len(),
        stores = resources.stores.len(),
        "Released plugin resources"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostOptions;
    use crate::test_support::MockClient;
    use cobalt_core::MessageEvent;
    use std::sync::atomic::AtomicUsize;

    fn host(client: &Arc<MockClient>, data_dir: &std::path::Path) -> PluginHost {
        PluginHost::new(
            client.clone(),
            HostOptions {
                data_dir: data_dir.to_path_buf(),
                listen_host: "127.0.0.1".into(),
                ..HostOptions::default()
            },
        )
    }

    fn metadata(name: &str) -> PluginMetadata {
        PluginMetadata {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    async fn dispatch(host: &PluginHost, event: MessageEvent) {
        let ctx = Arc::new(EventContext::new(event, Arc::clone(host.client())));
        host.router().dispatch(ctx).await;
    }

    fn echo(plugin: &Plugin) {
        plugin
            .on_message(Chain::empty(), |ctx, _| async move {
                ctx.reply(ctx.event().message.plain_text()).await?;
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_deny_lists_and_prefix_gate() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let plugin = host.plugin(PluginMetadata {
            prefix: Some("/e".into()),
            black_users: vec![5],
            black_groups: vec![9],
            ..metadata("echo")
        });
        echo(&plugin);

        dispatch(&host, MessageEvent::private(1, "/e one")).await;
        dispatch(&host, MessageEvent::private(5, "/e two")).await;
        dispatch(&host, MessageEvent::group(9, 1, "/e three")).await;
        dispatch(&host, MessageEvent::group(8, 1, "four")).await;

        assert_eq!(client.sent_texts(), vec!["/e one"]);
    }

    #[tokio::test]
    async fn test_quote_applies_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let plugin = host.plugin(metadata("echo"));
        echo(&plugin);

        plugin.update_metadata(|m| m.quote = true);
        dispatch(&host, MessageEvent::private(1, "hi").with_message_id("m1")).await;

        let sent = client.sent();
        assert_eq!(sent[0].1.elements()[0], cobalt_core::Element::reply("m1"));
    }

    #[tokio::test]
    async fn test_chain_failure_replied() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let plugin = host.plugin(metadata("img"));
        plugin
            .on_message(Chain::builder().image(1).build(), |_, _| async { Ok(()) })
            .unwrap();

        dispatch(&host, MessageEvent::private(1, "no picture")).await;

        assert_eq!(client.sent_texts(), vec!["expected at least 1 image(s), got 0"]);
    }

    #[tokio::test]
    async fn test_destroy_releases_everything() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let plugin = host.plugin(metadata("busy"));
        echo(&plugin);
        plugin.cron("0 0 0 1 1 *", |_| async {}).unwrap();
        plugin.open_store("busy").await.unwrap();
        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooks);
        plugin.on_unload(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        plugin.destroy().await;
        plugin.destroy().await;

        assert!(host.router().is_empty());
        assert!(!host.stores().is_open("busy"));
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(plugin.cron_job_count(), 0);

        let err = plugin.on_message(Chain::empty(), |_, _| async { Ok(()) }).unwrap_err();
        assert!(matches!(err.source, ResourceError::Destroyed));
    }

    #[tokio::test]
    async fn test_store_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let a = host.plugin(metadata("a"));
        let b = host.plugin(metadata("b"));

        a.open_store("shared").await.unwrap();
        let err = b.open_store("shared").await.err().unwrap();
        assert!(matches!(err.source, ResourceError::StoreAlreadyOpen(_)));
        assert!(matches!(b.store("shared"), Err(PluginError { source: ResourceError::StoreNotOpen(_), .. })));

        a.close_store("shared").unwrap();
        assert!(a.close_store("shared").is_err());
    }

    #[tokio::test]
    async fn test_invalid_cron() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let plugin = host(&client, dir.path()).plugin(metadata("c"));

        let err = plugin.cron("not a cron", |_| async {}).unwrap_err();
        assert_eq!(err.plugin, "c");
        assert!(matches!(err.source, ResourceError::InvalidCron { .. }));
    }

    #[tokio::test]
    async fn test_listener_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let plugin = host.plugin(metadata("web"));

        let port = free_port();

        plugin.open_http(port, HttpRouter::new()).await.unwrap();
        let err = plugin.open_http(port, HttpRouter::new()).await.unwrap_err();
        assert!(matches!(
            err.source,
            ResourceError::Transport(cobalt_transport::TransportError::PortInUse(p)) if p == port
        ));

        plugin.close_listener(port).await.unwrap();
        assert!(plugin.close_listener(port).await.is_err());
        assert!(!host.listeners().is_open(port));
    }

    #[tokio::test]
    async fn test_destroy_frees_port_for_next_instance() {
        let dir = tempfile::tempdir().unwrap();
        let client = MockClient::new();
        let host = host(&client, dir.path());
        let port = free_port();

        let first = host.plugin(metadata("web"));
        first.open_http(port, HttpRouter::new()).await.unwrap();
        first.destroy().await;

        let second = host.plugin(metadata("web"));
        second.open_http(port, HttpRouter::new()).await.unwrap();
        assert!(host.listeners().is_open(port));
        second.destroy().await;
        assert!(!host.listeners().is_open(port));
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }
}
