//! Blocking facades over work running on the reactor.
//!
//! A proxy turns one kind of network operation into a synchronous call:
//! [`ConnectionProxy`] connects, [`ActionSendProxy`] sends the action an agent chose and
//! [`StateReceiveProxy`] feeds the states pushed by the server to an agent. Every proxy
//! registers itself with the [`ConnectionHandler`](crate::connection_handler::ConnectionHandler)
//! that created it, which tears it down on close.

mod connect;
mod receive;
mod send;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tracing::{debug, warn};

pub use connect::ConnectionProxy;
pub use receive::StateReceiveProxy;
pub use send::ActionSendProxy;

use crate::{event::DuplexEvent, reactor::TaskHandle};

/// An agent shared between the bot loop and the receive loop.
pub type SharedAgent<Ag> = Arc<Mutex<Ag>>;

/// Capability shared by every proxy kind.
pub trait Proxy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Stops the proxy: later invocations do no network work and the outstanding task, if
    /// any, is cancelled.
    fn teardown(&self);

    /// Whether [`Proxy::teardown`] was called.
    fn is_torn_down(&self) -> bool;
}

/// Teardown signal and outstanding task of a proxy.
#[derive(Debug)]
pub(crate) struct ProxyCore {
    shutdown: DuplexEvent,
    task: Mutex<Option<TaskHandle>>,
}

impl ProxyCore {
    pub(crate) fn new() -> anyhow::Result<ProxyCore> {
        Ok(ProxyCore {
            shutdown: DuplexEvent::new().context("could not create the proxy teardown event")?,
            task: Mutex::new(None),
        })
    }

    /// A broken event counts as a teardown request.
    pub(crate) fn is_torn_down(&self) -> bool {
        self.shutdown.is_set().unwrap_or(true)
    }

    pub(crate) fn track(&self, task: TaskHandle) {
        *self.lock_task() = Some(task);
    }

    pub(crate) fn untrack(&self) {
        self.lock_task().take();
    }

    pub(crate) fn current_task(&self) -> Option<TaskHandle> {
        self.lock_task().clone()
    }

    pub(crate) fn teardown(&self, name: &str) {
        if let Err(e) = self.shutdown.set() {
            warn!(proxy = name, "could not set teardown event: {e}");
        }
        if let Some(task) = self.lock_task().take() {
            debug!(proxy = name, task = %task.id(), "cancelling outstanding task");
            task.cancel();
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn lock_agent<Ag>(agent: &Mutex<Ag>) -> MutexGuard<'_, Ag> {
    agent.lock().unwrap_or_else(PoisonError::into_inner)
}
