use std::{
    future::Future,
    sync::{Arc, Weak},
};

use anyhow::Context;
use futures_util::future::BoxFuture;
use tracing::{info, instrument};

use super::{Proxy, ProxyCore};
use crate::{connection::Connection, connection_handler::ConnectionHandler};

type Provider<A> = Box<dyn Fn(A) -> BoxFuture<'static, anyhow::Result<Connection>> + Send + Sync>;

/// Runs a connection provider on the reactor and publishes the resulting connection.
pub struct ConnectionProxy<A> {
    core: ProxyCore,
    handler: Weak<ConnectionHandler>,
    provider: Provider<A>,
}

impl<A: Send + 'static> ConnectionProxy<A> {
    /// Wraps `provider` and registers the proxy with `handler`.
    pub fn new<F, Fut>(handler: &Arc<ConnectionHandler>, provider: F) -> anyhow::Result<Arc<Self>>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Connection>> + Send + 'static,
    {
        let proxy = Arc::new(ConnectionProxy {
            core: ProxyCore::new()?,
            handler: Arc::downgrade(handler),
            provider: Box::new(move |args: A| -> BoxFuture<'static, anyhow::Result<Connection>> {
                Box::pin(provider(args))
            }),
        });
        handler.register(proxy.clone());
        Ok(proxy)
    }

    /// Connects and blocks until the connection is established.
    ///
    /// The connection is recorded in the handler before being returned. Failures propagate,
    /// nothing is retried.
    #[instrument(skip_all, fields(proxy = "connect"))]
    pub fn invoke(&self, args: A) -> anyhow::Result<Arc<Connection>> {
        let handler = self
            .handler
            .upgrade()
            .context("connection handler was dropped")?;
        let (task, future) = handler.reactor().submit((self.provider)(args))?;
        self.core.track(task);
        let result = future.wait();
        self.core.untrack();

        let connection = Arc::new(result.context("could not connect to the host")?);
        info!(host = connection.host(), "connected");
        handler.set_connection(Arc::clone(&connection));
        Ok(connection)
    }
}

impl<A: Send + 'static> Proxy for ConnectionProxy<A> {
    fn name(&self) -> &'static str {
        "connect"
    }

    fn teardown(&self) {
        self.core.teardown(self.name());
    }

    fn is_torn_down(&self) -> bool {
        self.core.is_torn_down()
    }
}
