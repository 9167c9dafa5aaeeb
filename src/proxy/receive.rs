use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError, Weak},
};

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{lock_agent, Proxy, ProxyCore, SharedAgent};
use crate::{
    codec,
    connection::{Connection, ConnectionClosed},
    connection_handler::ConnectionHandler,
    state_updater::{StateUpdater, UpdaterRegistry},
};

type Handler<Ag> = Arc<dyn Fn(&mut Ag, Value) + Send + Sync>;

/// Updater of a receive loop, looked up on the first frame and kept afterwards.
enum CachedUpdater {
    Unresolved,
    Resolved(Option<Box<dyn StateUpdater>>),
}

/// Runs the loop that hands every state pushed by the server to an agent.
pub struct StateReceiveProxy<Ag> {
    core: Arc<ProxyCore>,
    handler: Weak<ConnectionHandler>,
    on_state: Handler<Ag>,
    updater: Arc<Mutex<CachedUpdater>>,
}

impl<Ag: Send + 'static> StateReceiveProxy<Ag> {
    /// Wraps `on_state` and registers the proxy with `handler`.
    pub fn new<F>(handler: &Arc<ConnectionHandler>, on_state: F) -> anyhow::Result<Arc<Self>>
    where
        F: Fn(&mut Ag, Value) + Send + Sync + 'static,
    {
        let proxy = Arc::new(StateReceiveProxy {
            core: Arc::new(ProxyCore::new()?),
            handler: Arc::downgrade(handler),
            on_state: Arc::new(on_state),
            updater: Arc::new(Mutex::new(CachedUpdater::Unresolved)),
        });
        handler.register(proxy.clone());
        Ok(proxy)
    }

    /// Starts the receive loop and returns immediately.
    ///
    /// Only one loop runs per proxy: calling it while a loop is outstanding does nothing.
    #[instrument(skip_all, fields(proxy = "receive"))]
    pub fn invoke(&self, agent: SharedAgent<Ag>) -> anyhow::Result<()> {
        if self.core.current_task().is_some_and(|task| !task.is_finished()) {
            trace!("receive loop already running");
            return Ok(());
        }
        if self.core.is_torn_down() {
            debug!("proxy is torn down, receive loop not started");
            return Ok(());
        }

        let handler = self
            .handler
            .upgrade()
            .context("connection handler was dropped")?;
        let connection = handler
            .connection()
            .context("cannot receive states before connecting")?;
        let game_type = handler.config().map(|config| config.game_type().to_owned());

        let receive_loop = ReceiveLoop {
            connection,
            core: Arc::clone(&self.core),
            on_state: Arc::clone(&self.on_state),
            updater: Arc::clone(&self.updater),
            registry: Arc::clone(handler.updaters()),
            game_type,
            agent,
        };
        let (task, _detached) = handler.reactor().submit(async move {
            receive_loop.run().await;
            Ok(())
        })?;
        self.core.track(task);
        Ok(())
    }

    /// Whether a receive loop is outstanding.
    pub fn is_receiving(&self) -> bool {
        self.core.current_task().is_some_and(|task| !task.is_finished())
    }
}

impl<Ag: Send + 'static> Proxy for StateReceiveProxy<Ag> {
    fn name(&self) -> &'static str {
        "receive"
    }

    fn teardown(&self) {
        self.core.teardown(self.name());
    }

    fn is_torn_down(&self) -> bool {
        self.core.is_torn_down()
    }
}

struct ReceiveLoop<Ag> {
    connection: Arc<Connection>,
    core: Arc<ProxyCore>,
    on_state: Handler<Ag>,
    updater: Arc<Mutex<CachedUpdater>>,
    registry: Arc<UpdaterRegistry>,
    game_type: Option<String>,
    agent: SharedAgent<Ag>,
}

impl<Ag> ReceiveLoop<Ag> {
    async fn run(self) {
        let mut received = 0usize;
        loop {
            if self.core.is_torn_down() {
                debug!(received, "teardown requested, leaving receive loop");
                break;
            }

            let frame = match self.connection.recv_frame().await {
                Ok(frame) => frame,
                Err(error) => {
                    match error.downcast_ref::<ConnectionClosed>() {
                        Some(closed) if closed.clean => info!(received, "{closed}"),
                        Some(closed) => warn!(received, "{closed}"),
                        None => error!(received, "receive loop failed: {error:?}"),
                    }
                    break;
                }
            };
            let state = match codec::decode_frame(&frame) {
                Ok(state) => state,
                Err(error) => {
                    error!(received, "undecodable frame, leaving receive loop: {error:?}");
                    break;
                }
            };
            trace!(bytes = frame.len(), %state, "obtained state from server");

            let state = self.transform(state);
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut agent = lock_agent(&self.agent);
                (self.on_state)(&mut *agent, state)
            }));
            if delivered.is_err() {
                error!(received, "state handler panicked, leaving receive loop");
                break;
            }
            received += 1;
        }
        tokio::task::yield_now().await;
    }

    fn transform(&self, state: Value) -> Value {
        let mut cached = self.updater.lock().unwrap_or_else(PoisonError::into_inner);
        if let CachedUpdater::Unresolved = *cached {
            let updater = self
                .game_type
                .as_deref()
                .and_then(|game_type| self.registry.create(game_type));
            *cached = CachedUpdater::Resolved(updater);
        }
        match &mut *cached {
            CachedUpdater::Resolved(Some(updater)) => updater.update(state),
            _ => state,
        }
    }
}
