//! Game actions and their wire encoding.

use std::fmt::Debug;

use serde_json::Value;

/// A move an agent can play in a given game.
///
/// Each value has exactly one wire encoding, and decoding an encoded value gives it back.
pub trait Action: Debug + Sized + Send + 'static {
    /// JSON payload sent to the server for this action.
    fn encode(&self) -> Value;

    /// Parses a payload produced by [`Action::encode`].
    fn decode(payload: &Value) -> anyhow::Result<Self>;

    /// Every action of the game, when that set does not depend on the game state.
    ///
    /// Games whose legal actions depend on the position (board games) return an empty list.
    fn all() -> Vec<Self>;
}
