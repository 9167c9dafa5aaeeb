use std::sync::{Arc, Mutex, Weak};

use anyhow::Context;
use tracing::{debug, instrument, trace, warn};

use super::{lock_agent, Proxy, ProxyCore};
use crate::{
    action::Action,
    codec,
    configuration::EmptyActionPolicy,
    connection::ConnectionClosed,
    connection_handler::ConnectionHandler,
    reactor::TaskError,
};

type Getter<Ag, A> = Box<dyn Fn(&mut Ag) -> Option<A> + Send + Sync>;

/// Asks an agent for its action and sends it to the server.
pub struct ActionSendProxy<Ag, A> {
    core: ProxyCore,
    handler: Weak<ConnectionHandler>,
    getter: Getter<Ag, A>,
    empty_action_policy: EmptyActionPolicy,
}

impl<Ag: Send + 'static, A: Action> ActionSendProxy<Ag, A> {
    /// Wraps `getter` and registers the proxy with `handler`.
    pub fn new<F>(
        handler: &Arc<ConnectionHandler>,
        getter: F,
        empty_action_policy: EmptyActionPolicy,
    ) -> anyhow::Result<Arc<Self>>
    where
        F: Fn(&mut Ag) -> Option<A> + Send + Sync + 'static,
    {
        let proxy = Arc::new(ActionSendProxy {
            core: ProxyCore::new()?,
            handler: Arc::downgrade(handler),
            getter: Box::new(getter),
            empty_action_policy,
        });
        handler.register(proxy.clone());
        Ok(proxy)
    }

    /// Calls the getter, then sends the action unless the proxy was torn down.
    ///
    /// The agent is locked only while the getter runs. Blocks until the frame is written.
    /// A closed connection or a cancelled send is logged and the action is still returned.
    #[instrument(skip_all, fields(proxy = "send"))]
    pub fn invoke(&self, agent: &Mutex<Ag>) -> anyhow::Result<Option<A>> {
        let action = {
            let mut agent = lock_agent(agent);
            (self.getter)(&mut *agent)
        };

        if self.core.is_torn_down() {
            debug!("proxy is torn down, action not sent");
            return Ok(action);
        }

        let payload = match (&action, self.empty_action_policy) {
            (Some(action), _) => action.encode(),
            (None, EmptyActionPolicy::Sentinel) => EmptyActionPolicy::sentinel(),
            (None, EmptyActionPolicy::Skip) => {
                trace!("no action to send");
                return Ok(None);
            }
        };
        let frame = codec::encode_frame(&payload).context("could not encode the action")?;

        let handler = self
            .handler
            .upgrade()
            .context("connection handler was dropped")?;
        let connection = handler
            .connection()
            .context("cannot send an action before connecting")?;

        let (task, future) = handler
            .reactor()
            .submit(async move { connection.send_frame(frame).await })?;
        self.core.track(task);
        let result = future.wait();
        self.core.untrack();

        match result {
            Ok(()) => trace!(%payload, "action sent"),
            Err(TaskError::Cancelled) => warn!("sending an action has been cancelled"),
            Err(TaskError::Stopped) => warn!("reactor stopped while sending an action"),
            Err(TaskError::Failed(error)) => match error.downcast_ref::<ConnectionClosed>() {
                Some(closed) => warn!(
                    code = ?closed.code,
                    reason = %closed.reason,
                    "connection closed, action not delivered"
                ),
                None => return Err(error.context("could not send the action")),
            },
            Err(error) => return Err(error).context("could not send the action"),
        }
        Ok(action)
    }
}

impl<Ag: Send + 'static, A: Action> Proxy for ActionSendProxy<Ag, A> {
    fn name(&self) -> &'static str {
        "send"
    }

    fn teardown(&self) {
        self.core.teardown(self.name());
    }

    fn is_torn_down(&self) -> bool {
        self.core.is_torn_down()
    }
}
