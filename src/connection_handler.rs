//! Process-wide owner of the connection, the reactor and the proxies.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock, PoisonError, RwLock,
    },
    time::Duration,
};

use tracing::{debug, info, instrument, warn};

use crate::{
    configuration::ConnectionConfig,
    connection::{Connection, ConnectionClosed},
    proxy::Proxy,
    reactor::SingleThreadedReactor,
    state_updater::UpdaterRegistry,
};

/// Bound of the closing handshake used by [`cleanup`].
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

static GLOBAL: OnceLock<Arc<ConnectionHandler>> = OnceLock::new();

/// Registry of the connection, reactor and proxies of a process.
///
/// Teardown order on [`close`](ConnectionHandler::close): proxies, reactor tasks, socket,
/// reactor.
pub struct ConnectionHandler {
    reactor: SingleThreadedReactor,
    connection: RwLock<Option<Arc<Connection>>>,
    config: RwLock<Option<Arc<ConnectionConfig>>>,
    proxies: Mutex<Vec<Arc<dyn Proxy>>>,
    updaters: Arc<UpdaterRegistry>,
    closed: AtomicBool,
}

impl ConnectionHandler {
    /// A handler independent from the process-wide one.
    pub fn new() -> Arc<ConnectionHandler> {
        ConnectionHandler::with_updaters(UpdaterRegistry::with_defaults())
    }

    /// A handler using `updaters` to transform incoming states.
    pub fn with_updaters(updaters: UpdaterRegistry) -> Arc<ConnectionHandler> {
        let handler = ConnectionHandler {
            reactor: SingleThreadedReactor::new(),
            connection: RwLock::new(None),
            config: RwLock::new(None),
            proxies: Mutex::new(Vec::new()),
            updaters: Arc::new(updaters),
            closed: AtomicBool::new(false),
        };
        handler
            .reactor
            .register_error_handler(|closed: &ConnectionClosed| {
                if closed.clean {
                    info!("{closed}");
                } else {
                    warn!("{closed}");
                }
            });
        Arc::new(handler)
    }

    /// The handler shared by the whole process.
    pub fn global() -> Arc<ConnectionHandler> {
        Arc::clone(GLOBAL.get_or_init(ConnectionHandler::new))
    }

    /// The loop running every network operation of this handler.
    pub fn reactor(&self) -> &SingleThreadedReactor {
        &self.reactor
    }

    /// The current connection, once a [`ConnectionProxy`](crate::proxy::ConnectionProxy) succeeded.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_connection(&self, connection: Arc<Connection>) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(connection);
    }

    /// Where and as whom the current connection plays.
    pub fn config(&self) -> Option<Arc<ConnectionConfig>> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records the parameters of the connection being made.
    pub fn set_config(&self, config: ConnectionConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(config));
    }

    /// State updaters used by the receive loops.
    pub fn updaters(&self) -> &Arc<UpdaterRegistry> {
        &self.updaters
    }

    pub(crate) fn register(&self, proxy: Arc<dyn Proxy>) {
        debug!(proxy = proxy.name(), "proxy registered");
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(proxy);
    }

    /// Number of proxies created through this handler.
    pub fn proxy_count(&self) -> usize {
        self.proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether [`close`](ConnectionHandler::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tears everything down. Idempotent, never fails.
    ///
    /// The closing handshake is given at most `timeout`; stopping the reactor afterwards is
    /// bounded by [`STOP_TIMEOUT`](crate::reactor::STOP_TIMEOUT).
    #[instrument(skip(self))]
    pub fn close(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("connection handler already closed");
            return;
        }

        let proxies = self
            .proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for proxy in &proxies {
            debug!(proxy = proxy.name(), "terminating proxy");
            proxy.teardown();
        }

        self.reactor.cancel_all_tasks();

        if let Some(connection) = self.connection() {
            let host = connection.host().to_owned();
            match self
                .reactor
                .submit(async move { connection.disconnect().await })
            {
                Ok((_task, future)) => match future.wait_timeout(timeout) {
                    Ok(()) => info!("successfully disconnected from host: {host}"),
                    Err(e) => warn!("forcibly closed the connection to {host}: {e}"),
                },
                Err(e) => warn!("could not schedule the disconnection from {host}: {e:#}"),
            }
        }

        self.reactor.stop();
    }
}

/// Closes the process-wide handler.
pub fn cleanup() {
    ConnectionHandler::global().close(DEFAULT_DISCONNECT_TIMEOUT);
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::reactor::ReactorState;

    #[test]
    fn close_without_connection() {
        let handler = ConnectionHandler::new();
        let start = Instant::now();
        handler.close(Duration::from_millis(100));
        handler.close(Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(handler.is_closed());
        assert_eq!(handler.reactor().state(), ReactorState::Stopped);
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(
            &ConnectionHandler::global(),
            &ConnectionHandler::global()
        ));
    }

    #[test]
    fn config_is_replaced_not_mutated() {
        let handler = ConnectionHandler::new();
        assert!(handler.config().is_none());
        handler.set_config(ConnectionConfig::new("ws://a", "1", "bot", "agarnt"));
        let first = handler.config().unwrap();
        handler.set_config(ConnectionConfig::new("ws://a", "2", "bot", "agarnt"));
        assert_eq!(first.session_id(), "1");
        assert_eq!(handler.config().unwrap().session_id(), "2");
    }
}
