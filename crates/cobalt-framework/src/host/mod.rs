//! Shared services handed to every plugin.
//!
//! [`PluginHost`] is cheap to clone. It bundles the chat client, the router,
//! the auxiliary listener registry and the key-value store registry. Plugins
//! never own these directly; they acquire resources through their
//! [`Plugin`](crate::Plugin) so teardown can release them.

pub mod scheduler;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use cobalt_core::{BoxedClient, Message};
use cobalt_transport::ListenerRegistry;
use tracing::warn;

use crate::plugin::{Plugin, PluginMetadata};
use crate::router::Router;

pub use scheduler::{CronJob, parse_schedule};
pub use store::{KvStore, StoreRegistry};

/// Settings for a [`PluginHost`].
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Root for per-plugin data; stores live under `<data_dir>/kv`.
    pub data_dir: PathBuf,
    /// Accounts allowed to administer the host.
    pub masters: Vec<i64>,
    /// Interface auxiliary listeners bind to.
    pub listen_host: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            masters: Vec::new(),
            listen_host: String::from("0.0.0.0"),
        }
    }
}

struct HostInner {
    client: BoxedClient,
    router: Arc<Router>,
    listeners: Arc<ListenerRegistry>,
    stores: Arc<StoreRegistry>,
    options: HostOptions,
}

/// Services shared by all plugins.
#[derive(Clone)]
pub struct PluginHost {
    inner: Arc<HostInner>,
}

impl PluginHost {
    pub fn new(client: BoxedClient, options: HostOptions) -> Self {
        let listeners = ListenerRegistry::with_host(options.listen_host.clone());
        let stores = StoreRegistry::new(options.data_dir.join("kv"));
        Self {
            inner: Arc::new(HostInner {
                client,
                router: Arc::new(Router::new()),
                listeners: Arc::new(listeners),
                stores: Arc::new(stores),
                options,
            }),
        }
    }

    /// Creates a plugin instance bound to this host.
    pub fn plugin(&self, metadata: PluginMetadata) -> Plugin {
        Plugin::new(self.clone(), metadata)
    }

    pub fn client(&self) -> &BoxedClient {
        &self.inner.client
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.inner.router
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.inner.listeners
    }

    pub fn stores(&self) -> &Arc<StoreRegistry> {
        &self.inner.stores
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.inner.options.data_dir
    }

    pub fn masters(&self) -> &[i64] {
        &self.inner.options.masters
    }

    /// Sends `message` privately to every master.
    ///
    /// Returns how many deliveries succeeded. Failures are logged.
    pub async fn notify_masters(&self, message: impl Into<Message>) -> usize {
        let message = message.into();
        let mut delivered = 0;
        for &master in self.masters() {
            match self.inner.client.send_private_msg(master, message.clone()).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!(master, error = %e, "Failed to notify master"),
            }
        }
        delivered
    }
}
