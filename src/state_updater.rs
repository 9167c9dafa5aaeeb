//! Per-game transforms applied to incoming states before the agent sees them.
//!
//! Some games only send the parts of the state that changed. A [`StateUpdater`] merges those
//! updates into the full state. The [`UpdaterRegistry`] maps a game type to a factory of
//! updaters, one updater being created per receive loop.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::{Map, Value};
use tracing::debug;

/// Transform applied to every state received for a game.
pub trait StateUpdater: Send {
    /// Applies `update` and returns the state handed to the agent.
    fn update(&mut self, update: Value) -> Value;
}

/// Keeps the latest value of every top-level key it has seen.
///
/// Updates that are not JSON objects are passed through unchanged.
#[derive(Debug, Default, Clone)]
pub struct MergeUpdater {
    state: Map<String, Value>,
}

impl MergeUpdater {
    /// An updater that has seen nothing yet.
    pub fn new() -> MergeUpdater {
        MergeUpdater::default()
    }
}

impl StateUpdater for MergeUpdater {
    fn update(&mut self, update: Value) -> Value {
        match update {
            Value::Object(fields) => {
                self.state.extend(fields);
                Value::Object(self.state.clone())
            }
            other => other,
        }
    }
}

type UpdaterFactory = Arc<dyn Fn() -> Box<dyn StateUpdater> + Send + Sync>;

/// State updater factories keyed by game type.
pub struct UpdaterRegistry {
    factories: RwLock<HashMap<String, UpdaterFactory>>,
}

impl UpdaterRegistry {
    /// A registry without any updater.
    pub fn empty() -> UpdaterRegistry {
        UpdaterRegistry {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry knowing the built-in games.
    ///
    /// Only checkers sends partial states. Agarnt states are complete and go through as is.
    pub fn with_defaults() -> UpdaterRegistry {
        let registry = UpdaterRegistry::empty();
        registry.register(crate::games::checkers::GAME_TYPE, || {
            Box::new(MergeUpdater::new())
        });
        registry
    }

    /// Registers, or replaces, the updater factory of `game_type`.
    pub fn register<F>(&self, game_type: &str, factory: F)
    where
        F: Fn() -> Box<dyn StateUpdater> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(game_type.to_owned(), Arc::new(factory));
    }

    /// A fresh updater for `game_type`, if one is registered.
    pub fn create(&self, game_type: &str) -> Option<Box<dyn StateUpdater>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(game_type)
            .cloned();
        match factory {
            Some(factory) => Some(factory()),
            None => {
                debug!(game_type, "no state updater registered");
                None
            }
        }
    }
}

impl Default for UpdaterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
