//! # Bot Battles
//!
//! A client for connecting game-playing bots to a Bot Battles server, and for running many of
//! them at once as worker processes.
//!
//! It provides:
//! - A background event loop ([`SingleThreadedReactor`](crate::reactor::SingleThreadedReactor))
//!   that owns the WebSocket connection and is driven from synchronous code through blocking
//!   proxies (see [`proxy`])
//! - The [`Agent`](crate::agent::Agent) and [`Action`](crate::action::Action) traits, and the
//!   [`BoundAgent`](crate::agent::BoundAgent) adapter wiring an agent to a connection
//! - Built-in games and agents in [`games`]
//! - A supervisor spawning bots as separate OS processes and stopping them in bounded time
//!   (see [`bots_manager`])
//!
//! Frames are JSON documents compressed with gzip, in both directions (see [`codec`]).
//!
//! # Documentation Overview
//!
//! - For the connection life cycle and its teardown, see
//!   [`ConnectionHandler`](crate::connection_handler::ConnectionHandler).
//! - For joining or creating games, see [`session`].
//! - For tuning ticks, logging and pool sizes, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For what a single bot process does, see [`worker`].
//!
//! # Usage Example
//!
//! Spawning ten bots in an existing session. The executable must hand control over to
//! [`worker_main`](crate::worker::worker_main) when it is started as a worker:
//!
//! ```no_run
//! use std::time::Duration;
//! use botbattles::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     if is_worker_process() {
//!         worker_main();
//!         return Ok(());
//!     }
//!
//!     let request = SpawnRequest::new("ws://localhost:2137", "session_1", "close_food")?
//!         .with_configuration(Configuration::new().with_verbose(true));
//!     let bots = spawn_bots(&request, 10)?;
//!
//!     std::thread::sleep(Duration::from_secs(60));
//!     bots.terminate(Duration::from_secs(10));
//!     Ok(())
//! }
//! ```
//!
//! # Example Agent
//!
//! Playing a single game of Agarnt from the current process:
//!
//! ```no_run
//! use botbattles::prelude::*;
//! use botbattles::games::agarnt::{AgarntAction, GAME_TYPE};
//! use botbattles::session::{make_env, EnvRequest};
//! use serde_json::Value;
//!
//! struct AlwaysUp {
//!     done: bool,
//! }
//!
//! impl Agent for AlwaysUp {
//!     type Action = AgarntAction;
//!
//!     fn choose_action(&mut self) -> Option<AgarntAction> {
//!         Some(AgarntAction::U)
//!     }
//!
//!     fn handle_new_state(&mut self, state: Value) {
//!         self.done = state["d"].as_bool().unwrap_or(false);
//!     }
//!
//!     fn is_done(&self) -> bool {
//!         self.done
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let handler = ConnectionHandler::global();
//!     make_env(
//!         &handler,
//!         EnvRequest {
//!             server: "ws://localhost:2137".to_owned(),
//!             name: "arena".to_owned(),
//!             game_type: GAME_TYPE.to_owned(),
//!             bot_name: "AlwaysUp".to_owned(),
//!             session_id: None,
//!         },
//!     )?;
//!
//!     let bot = BoundAgent::bind(&handler, AlwaysUp { done: false }, &Configuration::new())?;
//!     bot.handle_new_states()?;
//!     while !bot.is_done() {
//!         bot.choose_action()?;
//!         std::thread::sleep(std::time::Duration::from_millis(100));
//!     }
//!     botbattles::connection_handler::cleanup();
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod action;
pub mod agent;
pub mod bots_manager;
pub mod codec;
pub mod configuration;
pub mod connection;
pub mod connection_handler;
pub mod event;
pub mod games;
pub mod logger;
pub mod proxy;
pub mod reactor;
pub mod session;
pub mod state_updater;
pub mod worker;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use botbattles::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`Agent`](crate::agent::Agent), [`Action`](crate::action::Action) and
///   [`BoundAgent`](crate::agent::BoundAgent)
/// - [`ConnectionHandler`](crate::connection_handler::ConnectionHandler)
/// - everything needed to spawn bots
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::agent::{Agent, BoundAgent};
    pub use crate::bots_manager::{spawn_bots, BotsManager, SpawnRequest};
    pub use crate::configuration::{Configuration, ConnectionConfig, EmptyActionPolicy};
    pub use crate::connection_handler::ConnectionHandler;
    pub use crate::worker::{is_worker_process, worker_main};
}
