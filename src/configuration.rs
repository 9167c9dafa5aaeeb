//! Config for the bot client behaviors
//!
//! This module provides configuration options for controlling how bots are run and how they
//! talk to the game server.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`]. Worker processes always read
//! theirs from the environment, which the supervisor fills with [`Configuration::to_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive, set the value to `"true"` to enable
//! them. Durations are in milliseconds.
//!
//! - `BOT_VERBOSE`: log to stderr (default: `false`)
//! - `BOT_LOG`: log to a timestamped file (default: `false`)
//! - `BOT_DEBUG_WORKER_STDERR`: keep the stderr of worker processes (default: `false`)
//! - `BOT_SKIP_EMPTY_ACTIONS`: send nothing when an agent has no action (default: `false`)
//! - `BOT_TICK_MS`: pause between two decisions of a bot (default: `100`)
//! - `BOT_TICK_JITTER_MS`: maximum random extra pause (default: `50`)
//! - `BOT_MAX_WORKERS_PER_POOL`: size of a worker sub-pool (default: `61`)
//! - `BOT_DISCONNECT_TIMEOUT_MS`: bound of the closing handshake (default: `1000`)

use std::time::Duration;

use serde_json::{json, Value};

const VERBOSE: &str = "BOT_VERBOSE";
const LOG: &str = "BOT_LOG";
const DEBUG_WORKER_STDERR: &str = "BOT_DEBUG_WORKER_STDERR";
const SKIP_EMPTY_ACTIONS: &str = "BOT_SKIP_EMPTY_ACTIONS";
const TICK_MS: &str = "BOT_TICK_MS";
const TICK_JITTER_MS: &str = "BOT_TICK_JITTER_MS";
const MAX_WORKERS_PER_POOL: &str = "BOT_MAX_WORKERS_PER_POOL";
const DISCONNECT_TIMEOUT_MS: &str = "BOT_DISCONNECT_TIMEOUT_MS";

/// What a send proxy does when the agent has no action to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyActionPolicy {
    /// Send the `{"not_move": 0}` placeholder.
    #[default]
    Sentinel,
    /// Send nothing.
    Skip,
}

impl EmptyActionPolicy {
    /// Payload sent in place of a missing action.
    pub fn sentinel() -> Value {
        json!({"not_move": 0})
    }
}

/// Configuration for bot behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) debug_worker_stderr: bool,
    pub(crate) empty_action_policy: EmptyActionPolicy,
    pub(crate) tick: Duration,
    pub(crate) tick_jitter: Duration,
    pub(crate) max_workers_per_pool: usize,
    pub(crate) disconnect_timeout: Duration,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Nothing is logged.
    /// - Worker stderr is discarded.
    /// - A missing action is replaced by the `{"not_move": 0}` placeholder.
    /// - Bots decide every 100ms, plus up to 50ms of jitter.
    /// - Worker pools hold at most 61 workers.
    /// - Disconnecting waits at most one second for the closing handshake.
    pub fn new() -> Self {
        Self {
            verbose: false,
            log: false,
            debug_worker_stderr: false,
            empty_action_policy: EmptyActionPolicy::Sentinel,
            tick: Duration::from_millis(100),
            tick_jitter: Duration::from_millis(50),
            max_workers_per_pool: 61,
            disconnect_timeout: Duration::from_secs(1),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// See the [module documentation](self) for the recognized variables. Unset or
    /// unparsable values fall back to the defaults of [`Configuration::new()`].
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_number(var: &str, default: u64) -> u64 {
            std::env::var(var)
                .ok()
                .and_then(|val| val.trim().parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::new();
        let skip_empty = get_env_flag(SKIP_EMPTY_ACTIONS, false);
        Self {
            verbose: get_env_flag(VERBOSE, defaults.verbose),
            log: get_env_flag(LOG, defaults.log),
            debug_worker_stderr: get_env_flag(DEBUG_WORKER_STDERR, defaults.debug_worker_stderr),
            empty_action_policy: if skip_empty {
                EmptyActionPolicy::Skip
            } else {
                EmptyActionPolicy::Sentinel
            },
            tick: Duration::from_millis(get_env_number(TICK_MS, defaults.tick.as_millis() as u64)),
            tick_jitter: Duration::from_millis(get_env_number(
                TICK_JITTER_MS,
                defaults.tick_jitter.as_millis() as u64,
            )),
            max_workers_per_pool: usize::try_from(get_env_number(
                MAX_WORKERS_PER_POOL,
                defaults.max_workers_per_pool as u64,
            ))
            .unwrap_or(usize::MAX)
            .max(1),
            disconnect_timeout: Duration::from_millis(get_env_number(
                DISCONNECT_TIMEOUT_MS,
                defaults.disconnect_timeout.as_millis() as u64,
            )),
        }
    }

    /// Environment variables that make [`Configuration::from_env()`] rebuild this configuration.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (VERBOSE, self.verbose.to_string()),
            (LOG, self.log.to_string()),
            (DEBUG_WORKER_STDERR, self.debug_worker_stderr.to_string()),
            (
                SKIP_EMPTY_ACTIONS,
                (self.empty_action_policy == EmptyActionPolicy::Skip).to_string(),
            ),
            (TICK_MS, self.tick.as_millis().to_string()),
            (TICK_JITTER_MS, self.tick_jitter.as_millis().to_string()),
            (MAX_WORKERS_PER_POOL, self.max_workers_per_pool.to_string()),
            (DISCONNECT_TIMEOUT_MS, self.disconnect_timeout.as_millis().to_string()),
        ]
    }

    /// Enable or disable logging to stderr.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable worker stderr output (debug purposes only).
    pub fn with_debug_worker_stderr(mut self, value: bool) -> Self {
        self.debug_worker_stderr = value;
        self
    }

    /// Choose what is sent when an agent has no action.
    pub fn with_empty_action_policy(mut self, value: EmptyActionPolicy) -> Self {
        self.empty_action_policy = value;
        self
    }

    /// Set the pause between two decisions, and its maximum random extension.
    pub fn with_tick(mut self, tick: Duration, jitter: Duration) -> Self {
        self.tick = tick;
        self.tick_jitter = jitter;
        self
    }

    /// Set the number of workers per sub-pool. Zero is treated as one.
    pub fn with_max_workers_per_pool(mut self, value: usize) -> Self {
        self.max_workers_per_pool = value.max(1);
        self
    }

    /// Set the bound of the closing handshake.
    pub fn with_disconnect_timeout(mut self, value: Duration) -> Self {
        self.disconnect_timeout = value;
        self
    }

    /// What to send when an agent has no action.
    pub fn empty_action_policy(&self) -> EmptyActionPolicy {
        self.empty_action_policy
    }

    /// Pause between two decisions.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// Maximum random pause added to every tick.
    pub fn tick_jitter(&self) -> Duration {
        self.tick_jitter
    }

    /// Number of workers terminated together.
    pub fn max_workers_per_pool(&self) -> usize {
        self.max_workers_per_pool
    }

    /// Bound of the closing handshake.
    pub fn disconnect_timeout(&self) -> Duration {
        self.disconnect_timeout
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

/// Where and as whom a bot plays. Fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    server: String,
    session_id: String,
    bot_name: String,
    game_type: String,
}

impl ConnectionConfig {
    /// `server` is the WebSocket base URL, e.g. `ws://localhost:8000`.
    pub fn new(
        server: impl Into<String>,
        session_id: impl Into<String>,
        bot_name: impl Into<String>,
        game_type: impl Into<String>,
    ) -> ConnectionConfig {
        ConnectionConfig {
            server: server.into().trim_end_matches('/').to_owned(),
            session_id: session_id.into(),
            bot_name: bot_name.into(),
            game_type: game_type.into(),
        }
    }

    /// Base URL of the server, without a trailing slash.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Session joined, empty before one is created.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Name the bot plays under.
    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Game played, used to pick a state updater.
    pub fn game_type(&self) -> &str {
        &self.game_type
    }
}
