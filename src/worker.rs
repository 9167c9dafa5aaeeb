//! The life of one bot, in its own process.
//!
//! A worker process is the `botbattles` executable started with `BOTBATTLES_WORKER=1`. It
//! reads what to play from its environment ([`WorkerSpec::from_env`]) and its stop signal
//! from stdin ([`DuplexEvent::from_stdin`]), then runs [`run_bot`] until the game ends or the
//! supervisor asks it to stop.

use std::{
    env,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{bail, Context};
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    agent::{Agent, BoundAgent},
    configuration::{Configuration, ConnectionConfig},
    connection_handler::ConnectionHandler,
    event::DuplexEvent,
    games::{agarnt, checkers},
    logger::init_logger,
    proxy::ConnectionProxy,
    session,
};

/// Set in the environment of every worker process.
pub const WORKER_VAR: &str = "BOTBATTLES_WORKER";
/// Server of the bot.
pub const SERVER_VAR: &str = "BOTBATTLES_SERVER";
/// Session joined by the bot.
pub const SESSION_ID_VAR: &str = "BOTBATTLES_SESSION_ID";
/// Name of the bot.
pub const BOT_NAME_VAR: &str = "BOTBATTLES_BOT_NAME";
/// Game played by the bot.
pub const GAME_TYPE_VAR: &str = "BOTBATTLES_GAME_TYPE";
/// Built-in agent run by the worker.
pub const AGENT_VAR: &str = "BOTBATTLES_AGENT";
/// Index of the worker in its run.
pub const WORKER_ID_VAR: &str = "BOTBATTLES_WORKER_ID";
/// Seed of the agent.
pub const SEED_VAR: &str = "BOTBATTLES_SEED";

/// How often the stop watcher checks whether the bot finished by itself.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Everything a worker process needs to know about its bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Index of the worker, also the suffix of the bot name.
    pub worker_id: usize,
    /// Name of a built-in agent, see [`crate::games::AGENTS`].
    pub agent: String,
    /// Seed of the agent.
    pub seed: u64,
    /// Where and as whom the bot plays.
    pub connection: ConnectionConfig,
}

impl WorkerSpec {
    /// Reads the spec a supervisor exported with [`WorkerSpec::to_env`].
    pub fn from_env() -> anyhow::Result<WorkerSpec> {
        fn var(name: &str) -> anyhow::Result<String> {
            env::var(name).with_context(|| format!("missing environment variable {name}"))
        }

        Ok(WorkerSpec {
            worker_id: var(WORKER_ID_VAR)?
                .parse()
                .with_context(|| format!("{WORKER_ID_VAR} is not a number"))?,
            agent: var(AGENT_VAR)?,
            seed: var(SEED_VAR)?
                .parse()
                .with_context(|| format!("{SEED_VAR} is not a number"))?,
            connection: ConnectionConfig::new(
                var(SERVER_VAR)?,
                var(SESSION_ID_VAR)?,
                var(BOT_NAME_VAR)?,
                var(GAME_TYPE_VAR)?,
            ),
        })
    }

    /// Environment variables read back by [`WorkerSpec::from_env`].
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            (WORKER_VAR, "1".to_owned()),
            (SERVER_VAR, self.connection.server().to_owned()),
            (SESSION_ID_VAR, self.connection.session_id().to_owned()),
            (BOT_NAME_VAR, self.connection.bot_name().to_owned()),
            (GAME_TYPE_VAR, self.connection.game_type().to_owned()),
            (AGENT_VAR, self.agent.clone()),
            (WORKER_ID_VAR, self.worker_id.to_string()),
            (SEED_VAR, self.seed.to_string()),
        ]
    }
}

/// Whether the current process was started as a worker.
pub fn is_worker_process() -> bool {
    env::var_os(WORKER_VAR).is_some()
}

/// Why [`run_bot`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotOutcome {
    /// The agent reached a terminal state.
    Finished,
    /// The stop event was set.
    Stopped,
    /// The server went away before the game ended.
    Disconnected,
}

/// Plays one game with `agent` through `handler`.
///
/// Connects, starts the receive loop, then decides every tick until the agent is done,
/// `stop` is set or the server goes away. A watcher thread closes the handler as soon as `stop` is set, which also
/// unblocks a send in flight. The handler is always closed on return.
#[instrument(skip_all, fields(bot = connection.bot_name()))]
pub fn run_bot<Ag: Agent>(
    handler: &Arc<ConnectionHandler>,
    connection: &ConnectionConfig,
    configuration: &Configuration,
    agent: Ag,
    stop: Arc<DuplexEvent>,
) -> anyhow::Result<BotOutcome> {
    let finished = Arc::new(AtomicBool::new(false));
    let watcher = spawn_stop_watcher(
        Arc::clone(handler),
        Arc::clone(&stop),
        Arc::clone(&finished),
        configuration.disconnect_timeout(),
    )?;

    let outcome = match play(handler, connection, configuration, agent, &stop) {
        Err(e) if stop_requested(&stop) => {
            debug!("interrupted by the stop request: {e:#}");
            Ok(BotOutcome::Stopped)
        }
        outcome => outcome,
    };

    finished.store(true, Ordering::Release);
    handler.close(configuration.disconnect_timeout());
    if watcher.join().is_err() {
        warn!("stop watcher panicked");
    }
    outcome
}

fn play<Ag: Agent>(
    handler: &Arc<ConnectionHandler>,
    connection: &ConnectionConfig,
    configuration: &Configuration,
    agent: Ag,
    stop: &DuplexEvent,
) -> anyhow::Result<BotOutcome> {
    handler.set_config(connection.clone());
    let connect = ConnectionProxy::new(handler, |config: ConnectionConfig| async move {
        session::join_game(&config).await
    })?;
    connect.invoke(connection.clone())?;

    let bot = BoundAgent::bind(handler, agent, configuration)?;
    bot.handle_new_states()?;

    let mut rng = rand::rng();
    loop {
        if stop_requested(stop) {
            info!("stop requested");
            return Ok(BotOutcome::Stopped);
        }
        thread::sleep(jittered(&mut rng, configuration.tick(), configuration.tick_jitter()));

        let action = bot.choose_action()?;
        debug!(?action, "chosen action");
        bot.update();
        if bot.is_done() {
            info!("game over");
            return Ok(BotOutcome::Finished);
        }
        let connected = handler.connection().is_some_and(|connection| connection.is_open());
        if !bot.is_receiving() || !connected {
            warn!("connection to the server is lost");
            return Ok(BotOutcome::Disconnected);
        }
    }
}

/// A broken stop event counts as a stop request.
fn stop_requested(stop: &DuplexEvent) -> bool {
    stop.is_set().unwrap_or_else(|e| {
        warn!("stop event is broken: {e}");
        true
    })
}

fn jittered(rng: &mut impl Rng, tick: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return tick;
    }
    tick + jitter.mul_f64(rng.random::<f64>())
}

fn spawn_stop_watcher(
    handler: Arc<ConnectionHandler>,
    stop: Arc<DuplexEvent>,
    finished: Arc<AtomicBool>,
    disconnect_timeout: Duration,
) -> anyhow::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stop-watcher".to_owned())
        .spawn(move || {
            while !finished.load(Ordering::Acquire) {
                match stop.wait(Some(WATCH_INTERVAL)) {
                    Ok(false) => continue,
                    Ok(true) => info!("cleaning up bot"),
                    Err(e) => warn!("stop event is broken, cleaning up bot: {e}"),
                }
                handler.close(disconnect_timeout);
                return;
            }
        })
        .context("could not spawn the stop watcher")
}

/// Entry point of a worker process: runs the built-in agent named in the environment.
pub fn worker_main() -> ExitCode {
    let configuration = Configuration::from_env();
    let spec = match WorkerSpec::from_env() {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("invalid worker environment: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logger(&configuration, &format!("bot_{}", spec.worker_id)) {
        eprintln!("{e:#}");
    }

    match run_named_agent(&spec, &configuration) {
        Ok(outcome) => {
            info!(worker = spec.worker_id, ?outcome, "bot process is finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(worker = spec.worker_id, "bot is dead: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run_named_agent(spec: &WorkerSpec, configuration: &Configuration) -> anyhow::Result<BotOutcome> {
    let stop = Arc::new(DuplexEvent::from_stdin().context("stdin is not a stop event")?);
    let handler = ConnectionHandler::global();
    let connection = &spec.connection;
    match spec.agent.as_str() {
        "random" => run_bot(
            &handler,
            connection,
            configuration,
            agarnt::RandomAgent::new(spec.seed),
            stop,
        ),
        "close_food" => run_bot(
            &handler,
            connection,
            configuration,
            agarnt::CloseFoodAgent::new(spec.seed),
            stop,
        ),
        "grad" => run_bot(
            &handler,
            connection,
            configuration,
            agarnt::GradAgent::new(spec.seed),
            stop,
        ),
        "checkers_random" => run_bot(
            &handler,
            connection,
            configuration,
            checkers::RandomBot::new(spec.seed),
            stop,
        ),
        other => bail!("unknown agent '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_bounds() {
        let mut rng = rand::rng();
        let tick = Duration::from_millis(100);
        let jitter = Duration::from_millis(50);
        for _ in 0..100 {
            let pause = jittered(&mut rng, tick, jitter);
            assert!(pause >= tick && pause <= tick + jitter);
        }
        assert_eq!(jittered(&mut rng, tick, Duration::ZERO), tick);
    }

    #[test]
    fn spec_exports_every_field() {
        let spec = WorkerSpec {
            worker_id: 4,
            agent: "random".to_owned(),
            seed: 2137,
            connection: ConnectionConfig::new("ws://h:1", "s", "RandomAgent_4", "agarnt"),
        };
        let env = spec.to_env();
        assert!(env.contains(&(WORKER_VAR, "1".to_owned())));
        assert!(env.contains(&(BOT_NAME_VAR, "RandomAgent_4".to_owned())));
        assert!(env.contains(&(SEED_VAR, "2137".to_owned())));
        assert_eq!(env.len(), 8);
    }

    #[test]
    fn broken_stop_event_stops_the_bot() {
        let (event, endpoint) = DuplexEvent::pair_for_child().unwrap();
        let stop = endpoint.into_event().unwrap();
        assert!(!stop_requested(&stop));
        drop(event);
        assert!(stop_requested(&stop));
    }
}
