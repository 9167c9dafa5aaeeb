//! Spawning and supervising bot worker processes.
//!
//! [`spawn_bots`] starts one child process per bot, grouped in pools of at most
//! [`Configuration::max_workers_per_pool`] workers. Every child gets its parameters in its
//! environment and its stop event as stdin. [`BotsManager::terminate`] stops them all in
//! bounded time.

use std::{
    env,
    ffi::OsString,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    configuration::{Configuration, ConnectionConfig},
    event::DuplexEvent,
    games::{self, AgentKind},
    worker::WorkerSpec,
};

/// Timeout used when a manager is dropped without being terminated.
pub const DROP_TERMINATE_TIMEOUT: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What to spawn: which agent, where, and with which executable.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    program: PathBuf,
    args: Vec<OsString>,
    server: String,
    session_id: String,
    agent: AgentKind,
    seed: u64,
    configuration: Configuration,
}

impl SpawnRequest {
    /// Bots running the built-in agent `agent` in session `session_id` of `server`.
    ///
    /// Workers run the current executable, which must dispatch to
    /// [`worker_main`](crate::worker::worker_main) when
    /// [`is_worker_process`](crate::worker::is_worker_process) holds.
    pub fn new(server: &str, session_id: &str, agent: &str) -> anyhow::Result<SpawnRequest> {
        let agent = games::agent_kind(agent).ok_or_else(|| {
            let known: Vec<_> = games::AGENTS.iter().map(|kind| kind.name).collect();
            anyhow!("unknown agent '{agent}', expected one of {known:?}")
        })?;
        let program = env::current_exe().context("could not locate the current executable")?;
        Ok(SpawnRequest {
            program,
            args: Vec::new(),
            server: server.to_owned(),
            session_id: session_id.to_owned(),
            agent,
            seed: 2137,
            configuration: Configuration::from_env(),
        })
    }

    /// Run workers with another executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    /// Base seed. Worker `n` seeds its agent with `seed + n`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Configuration exported to every worker.
    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    fn worker_spec(&self, worker_id: usize) -> WorkerSpec {
        WorkerSpec {
            worker_id,
            agent: self.agent.name.to_owned(),
            seed: self.seed.wrapping_add(worker_id as u64),
            connection: ConnectionConfig::new(
                self.server.as_str(),
                self.session_id.as_str(),
                format!("{}_{worker_id}", self.agent.display_name),
                self.agent.game_type,
            ),
        }
    }
}

/// One bot process and the event that asks it to stop.
#[derive(Debug)]
struct WorkerProcess {
    id: usize,
    child: Child,
    stop: DuplexEvent,
    reaped: bool,
}

impl WorkerProcess {
    fn launch(request: &SpawnRequest, id: usize) -> anyhow::Result<WorkerProcess> {
        let (stop, endpoint) =
            DuplexEvent::pair_for_child().context("could not create the worker stop event")?;

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .envs(request.worker_spec(id).to_env())
            .envs(request.configuration.to_env())
            .stdin(Stdio::from(endpoint))
            .stdout(Stdio::null());
        if !request.configuration.debug_worker_stderr {
            cmd.stderr(Stdio::null());
        }
        // keep terminal signals for the supervisor, which stops workers itself
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let child = cmd
            .spawn()
            .with_context(|| format!("command '{}' not found", request.program.display()))?;
        debug!(worker = id, pid = child.id(), "worker launched");
        Ok(WorkerProcess {
            id,
            child,
            stop,
            reaped: false,
        })
    }

    fn is_running(&mut self) -> bool {
        !self.reaped && matches!(self.child.try_wait(), Ok(None))
    }

    fn wait_until(&mut self, deadline: Instant) -> anyhow::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait().context("could not poll worker")? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Kills the process if it still runs, and reaps it.
    fn try_kill(&mut self) -> anyhow::Result<()> {
        if self.reaped {
            return Ok(());
        }
        if self.child.try_wait().context("could not poll worker")?.is_none() {
            self.child.kill().context("could not kill process")?;
        }
        self.child.wait().context("could not reap process")?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Err(e) = self.try_kill() {
            warn!(worker = self.id, "could not clean up worker: {e:#}");
        }
    }
}

/// A group of workers terminated together.
#[derive(Debug)]
struct WorkerPool {
    index: usize,
    workers: Vec<WorkerProcess>,
}

impl WorkerPool {
    fn spawn(request: &SpawnRequest, index: usize, ids: &[usize]) -> anyhow::Result<WorkerPool> {
        let workers = ids
            .iter()
            .map(|&id| {
                WorkerProcess::launch(request, id)
                    .with_context(|| format!("could not launch bot No. {id}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(WorkerPool { index, workers })
    }

    fn terminate(&mut self, timeout: Duration) {
        for worker in &mut self.workers {
            if !worker.is_running() {
                continue;
            }
            if let Err(e) = worker.stop.set() {
                warn!(worker = worker.id, "could not signal bot: {e}");
            }
        }

        let deadline = Instant::now() + timeout;
        for worker in &mut self.workers {
            match worker.wait_until(deadline) {
                Ok(Some(status)) if status.success() => {
                    info!(worker = worker.id, "process of bot No. {} is finished", worker.id)
                }
                Ok(Some(status)) => {
                    warn!(worker = worker.id, "bot No. {} exited with {status}", worker.id)
                }
                Ok(None) => warn!(
                    worker = worker.id,
                    "unable to stop bot No. {} safely within {timeout:?}", worker.id
                ),
                Err(e) => error!(worker = worker.id, "{e:#}"),
            }
        }

        info!("pool {} is about to shut down", self.index);
        for worker in &mut self.workers {
            if let Err(e) = worker.try_kill() {
                error!(worker = worker.id, "{e:#}");
            }
        }
    }
}

/// Handle on every spawned bot.
#[derive(Debug)]
pub struct BotsManager {
    pools: Vec<WorkerPool>,
}

impl BotsManager {
    /// Number of spawned bots.
    pub fn len(&self) -> usize {
        self.pools.iter().map(|pool| pool.workers.len()).sum()
    }

    /// Whether no bot was spawned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of worker pools.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of bots whose process has not exited yet.
    pub fn running(&mut self) -> usize {
        self.pools
            .iter_mut()
            .flat_map(|pool| pool.workers.iter_mut())
            .map(|worker| usize::from(worker.is_running()))
            .sum()
    }

    /// Stops every bot. Never fails.
    ///
    /// Per pool: signals every worker, waits at most `timeout` for all of them, then kills
    /// and reaps whatever is left.
    #[instrument(skip(self))]
    pub fn terminate(mut self, timeout: Duration) {
        self.terminate_pools(timeout);
    }

    fn terminate_pools(&mut self, timeout: Duration) {
        for mut pool in self.pools.drain(..) {
            pool.terminate(timeout);
        }
    }
}

impl Drop for BotsManager {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            self.terminate_pools(DROP_TERMINATE_TIMEOUT);
        }
    }
}

/// Spawns `count` bots described by `request`.
///
/// If a worker cannot be launched, the ones already running are terminated and the error is
/// returned.
#[instrument(skip(request), fields(agent = request.agent.name))]
pub fn spawn_bots(request: &SpawnRequest, count: usize) -> anyhow::Result<BotsManager> {
    let per_pool = request.configuration.max_workers_per_pool.max(1);
    let ids: Vec<usize> = (0..count).collect();
    let mut manager = BotsManager { pools: Vec::new() };
    for (index, chunk) in ids.chunks(per_pool).enumerate() {
        manager.pools.push(WorkerPool::spawn(request, index, chunk)?);
    }
    info!("spawned {count} bot(s) in {} pool(s)", manager.pools.len());
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_specs_are_distinct() {
        let request = SpawnRequest::new("ws://localhost:2137", "session_1", "close_food")
            .unwrap()
            .with_seed(10);
        let first = request.worker_spec(0);
        let second = request.worker_spec(1);
        assert_eq!(first.connection.bot_name(), "CloseFoodAgent_0");
        assert_eq!(second.connection.bot_name(), "CloseFoodAgent_1");
        assert_eq!(first.connection.game_type(), "agarnt");
        assert_eq!((first.seed, second.seed), (10, 11));
        assert_eq!(first.agent, "close_food");
    }

    #[test]
    fn unknown_agents_are_rejected() {
        let error = SpawnRequest::new("ws://localhost:2137", "s", "alphazero").unwrap_err();
        assert!(error.to_string().contains("unknown agent"));
    }

    #[test]
    fn zero_bots() {
        let request = SpawnRequest::new("ws://localhost:2137", "s", "random").unwrap();
        let manager = spawn_bots(&request, 0).unwrap();
        assert!(manager.is_empty());
        assert_eq!(manager.pool_count(), 0);
        manager.terminate(Duration::from_millis(10));
    }
}
