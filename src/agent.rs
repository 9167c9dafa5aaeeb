//! The agent abstraction and its binding to the network proxies.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::{
    action::Action,
    configuration::Configuration,
    connection_handler::ConnectionHandler,
    proxy::{lock_agent, ActionSendProxy, SharedAgent, StateReceiveProxy},
};

/// A bot playing one game.
///
/// The agent only decides: sending actions and receiving states is done by a
/// [`BoundAgent`].
pub trait Agent: Send + 'static {
    /// The actions of the game the agent plays.
    type Action: Action;

    /// The next action to play, or `None` to pass.
    fn choose_action(&mut self) -> Option<Self::Action>;

    /// Called with every state received from the server, after the game's
    /// [`StateUpdater`](crate::state_updater::StateUpdater) transform.
    fn handle_new_state(&mut self, state: Value);

    /// Whether the last state received is terminal.
    fn is_done(&self) -> bool;

    /// Learning step, called once per decision. Does nothing by default.
    fn update(&mut self) {}
}

/// An agent wired to a send proxy and a receive proxy of one [`ConnectionHandler`].
pub struct BoundAgent<Ag: Agent> {
    agent: SharedAgent<Ag>,
    send: Arc<ActionSendProxy<Ag, Ag::Action>>,
    receive: Arc<StateReceiveProxy<Ag>>,
}

impl<Ag: Agent> BoundAgent<Ag> {
    /// Creates the proxies of `agent`. They are registered with `handler`.
    pub fn bind(
        handler: &Arc<ConnectionHandler>,
        agent: Ag,
        configuration: &Configuration,
    ) -> anyhow::Result<BoundAgent<Ag>> {
        Ok(BoundAgent {
            agent: Arc::new(Mutex::new(agent)),
            send: ActionSendProxy::new(
                handler,
                Ag::choose_action,
                configuration.empty_action_policy(),
            )?,
            receive: StateReceiveProxy::new(handler, Ag::handle_new_state)?,
        })
    }

    /// Lets the agent decide, then sends its action. Returns the action chosen.
    pub fn choose_action(&self) -> anyhow::Result<Option<Ag::Action>> {
        self.send.invoke(&self.agent)
    }

    /// Starts delivering the server states to the agent, in the background.
    pub fn handle_new_states(&self) -> anyhow::Result<()> {
        self.receive.invoke(Arc::clone(&self.agent))
    }

    /// Whether states are still being delivered to the agent.
    pub fn is_receiving(&self) -> bool {
        self.receive.is_receiving()
    }

    /// Whether the agent saw a terminal state.
    pub fn is_done(&self) -> bool {
        lock_agent(&self.agent).is_done()
    }

    /// Runs the agent's learning step.
    pub fn update(&self) {
        lock_agent(&self.agent).update();
    }
}
