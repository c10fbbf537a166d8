//! `ApolloServer` builder and server loop.
//!
//! This is the entry point for running an Apollo server process. It ties
//! the layers together: store and bus → core → inter listener, reaper and
//! HTTP surface.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use apollo_bus::Bus;
use apollo_cron::{CronConfig, CronHandle, CronJob, spawn_cron};
use apollo_session::Store;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::{ApolloError, Core, Dispatcher, Hooks, InterDispatcher, Reaper, ServerConfig, router};

/// Builder for configuring and starting an Apollo server.
///
/// # Example
///
/// ```rust,ignore
/// let server = ApolloServerBuilder::new()
///     .config(config)
///     .build(Arc::new(MemoryStore::new()))
///     .await?;
/// server.run().await
/// ```
pub struct ApolloServerBuilder {
    config: ServerConfig,
    hooks: Hooks,
}

impl ApolloServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            hooks: Hooks::new(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the hooks run around packet dispatch.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Connects the bus, starts the inter listener and the reaper, and
    /// binds the HTTP listener.
    ///
    /// The bus is marked ready once the inter listener is consuming. The
    /// reaper sweeps once before the first interval, clearing sessions a
    /// crashed process left behind.
    pub async fn build<S: Store>(self, store: Arc<S>) -> Result<ApolloServer<S>, ApolloError> {
        let bus = Bus::connect(&self.config.broker)?;

        let mut dispatcher = Dispatcher::with_defaults();
        dispatcher.set_hooks(self.hooks);

        let core = Arc::new(Core::new(self.config.clone(), store, bus.clone(), dispatcher));

        let inter = bus
            .listen_inter(&self.config.server_id, Arc::new(InterDispatcher::new(core.clone())))
            .await?;
        bus.mark_ready();

        let listener = TcpListener::bind(self.config.bind_addr()).await?;

        let reaper = Arc::new(Reaper::new(core.clone()));
        reaper.run().await;
        let (cron, _) = spawn_cron(CronConfig::every(self.config.cron_interval), reaper);

        tracing::info!(
            server_id = %self.config.server_id,
            addr = %self.config.bind_addr(),
            "server built"
        );
        Ok(ApolloServer {
            listener,
            core,
            cron,
            inter,
        })
    }
}

impl Default for ApolloServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A built Apollo server.
///
/// Call [`run()`](Self::run) to start answering HTTP requests.
pub struct ApolloServer<S: Store> {
    listener: TcpListener,
    core: Arc<Core<S>>,
    cron: CronHandle,
    inter: JoinHandle<()>,
}

impl<S: Store> ApolloServer<S> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn core(&self) -> &Arc<Core<S>> {
        &self.core
    }

    pub fn router(&self) -> Router {
        router(self.core.clone())
    }

    /// Serves until the process is terminated.
    pub async fn run(self) -> Result<(), ApolloError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then stops the reaper and the
    /// inter listener.
    pub async fn run_until(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<(), ApolloError> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Apollo server running");

        let app = router(self.core.clone());
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        self.cron.stop().await;
        self.inter.abort();
        tracing::info!("Apollo server stopped");
        Ok(served?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use apollo_protocol::SessionToken;
    use apollo_session::{MemoryStore, Session};

    use super::*;

    #[tokio::test]
    async fn test_build_sweeps_leftover_sessions_at_startup() {
        let store = Arc::new(MemoryStore::new());
        let leftover = SessionToken::new("leftover");
        store
            .save(Session::new(leftover.clone(), SystemTime::now() - Duration::from_secs(7200)))
            .await
            .unwrap();

        let config = ServerConfig {
            address: "127.0.0.1".to_owned(),
            port: 0,
            session_expiry: Duration::from_secs(60),
            ..ServerConfig::default()
        };
        let server = ApolloServerBuilder::new()
            .config(config)
            .build(store.clone())
            .await
            .unwrap();

        assert!(store.get::<Session>(&leftover).await.unwrap().is_none());
        assert!(server.core().transport(&leftover).await.is_none());
    }
}
