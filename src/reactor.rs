//! Background executor shared by every proxy of a process.
//!
//! The [`SingleThreadedReactor`] owns one OS thread named `reactor` that drives a Tokio
//! current-thread runtime. Synchronous code hands it async work through
//! [`SingleThreadedReactor::submit`] and blocks on the returned [`BlockingFuture`]. All socket
//! I/O of a process therefore happens on that single thread.
//!
//! Lifecycle: `NotStarted -> Running -> Stopping -> Stopped`. The reactor boots lazily on the
//! first submission and never restarts once stopped.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use anyhow::Context;
use thiserror::Error;
use tokio::{
    runtime::{Builder, Handle},
    sync::oneshot,
    task::{AbortHandle, JoinError},
};
use tracing::{debug, error, info, trace, warn};

/// Time given to cancelled tasks to unwind during [`SingleThreadedReactor::stop`].
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// Maximum time [`SingleThreadedReactor::stop`] waits for the loop before forcing it to halt.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Identity of a task submitted to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Why a submitted task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task was cancelled before it completed.
    #[error("task was cancelled")]
    Cancelled,
    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The reactor shut down before the task reported a result.
    #[error("reactor stopped before the task completed")]
    Stopped,
    /// No result within the requested time. The task keeps running.
    #[error("task did not complete within {0:?}")]
    Timeout(Duration),
    /// The task itself returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Returned when work is submitted to a reactor that is stopping or stopped.
#[derive(Debug, Clone, Copy, Error)]
#[error("reactor is stopped")]
pub struct ReactorStopped;

/// Observable lifecycle state of a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Nothing was submitted yet.
    NotStarted,
    /// The loop thread is running.
    Running,
    /// A stop was requested.
    Stopping,
    /// The loop is gone for good.
    Stopped,
}

/// Cancellation handle of a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    abort: AbortHandle,
}

impl TaskHandle {
    /// Identity of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Requests cancellation. The task stops at its next suspension point.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the task completed, failed or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Synchronous view on the result of a submitted task.
///
/// Dropping it detaches the task: its errors are then routed to the handlers registered with
/// [`SingleThreadedReactor::register_error_handler`].
#[derive(Debug)]
pub struct BlockingFuture<T> {
    id: TaskId,
    result: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> BlockingFuture<T> {
    /// Identity of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Blocks until the task completes.
    pub fn wait(self) -> Result<T, TaskError> {
        self.result.recv().unwrap_or(Err(TaskError::Stopped))
    }

    /// Blocks until the task completes or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(TaskError::Timeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TaskError::Stopped),
        }
    }
}

type ErrorHandler = Box<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

enum Lifecycle {
    NotStarted,
    Running { handle: Handle, thread_id: ThreadId },
    Stopping { thread_id: ThreadId },
    Stopped,
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
    halt: Mutex<Option<oneshot::Sender<()>>>,
    tracked: Mutex<HashMap<TaskId, AbortHandle>>,
    handlers: Mutex<Vec<ErrorHandler>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> ReactorState {
        match *lock(&self.lifecycle) {
            Lifecycle::NotStarted => ReactorState::NotStarted,
            Lifecycle::Running { .. } => ReactorState::Running,
            Lifecycle::Stopping { .. } => ReactorState::Stopping,
            Lifecycle::Stopped => ReactorState::Stopped,
        }
    }

    fn on_loop_thread(&self) -> bool {
        match *lock(&self.lifecycle) {
            Lifecycle::Running { thread_id, .. } | Lifecycle::Stopping { thread_id } => {
                thread_id == thread::current().id()
            }
            _ => false,
        }
    }

    fn tracked_count(&self) -> usize {
        lock(&self.tracked).len()
    }

    fn cancel_tracked(&self) -> usize {
        let tracked = lock(&self.tracked);
        for task in tracked.values() {
            task.abort();
        }
        tracked.len()
    }

    fn halt(&self) {
        if let Some(halt) = lock(&self.halt).take() {
            let _ = halt.send(());
        }
    }

    fn mark_stopped(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        *lifecycle = Lifecycle::Stopped;
        lock(&self.tracked).clear();
        self.stopped.notify_all();
    }

    /// Returns false when the reactor did not reach `Stopped` within `timeout`.
    fn wait_stopped(&self, timeout: Duration) -> bool {
        let lifecycle = lock(&self.lifecycle);
        let (_lifecycle, result) = self
            .stopped
            .wait_timeout_while(lifecycle, timeout, |lifecycle| {
                !matches!(lifecycle, Lifecycle::Stopped)
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    fn begin_stop(self: &Arc<Self>) {
        let mut lifecycle = lock(&self.lifecycle);
        let (handle, thread_id) = match &*lifecycle {
            Lifecycle::NotStarted => {
                *lifecycle = Lifecycle::Stopped;
                self.stopped.notify_all();
                return;
            }
            Lifecycle::Stopping { .. } | Lifecycle::Stopped => return,
            Lifecycle::Running { handle, thread_id } => (handle.clone(), *thread_id),
        };
        *lifecycle = Lifecycle::Stopping { thread_id };
        drop(lifecycle);

        info!("stopping reactor");
        let shared = Arc::clone(self);
        handle.spawn(async move { shared.shutdown().await });
    }

    async fn shutdown(self: Arc<Self>) {
        let cancelled = self.cancel_tracked();
        if cancelled > 0 {
            debug!("cancelling {cancelled} outstanding task(s)");
        }
        let drained = tokio::time::timeout(STOP_GRACE, async {
            while self.tracked_count() > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("some tasks did not unwind within {STOP_GRACE:?}");
        }
        self.halt();
    }

    fn on_detached_error(self: &Arc<Self>, id: TaskId, error: TaskError) {
        match error {
            TaskError::Cancelled => trace!(%id, "detached task cancelled"),
            TaskError::Failed(error) => {
                let handled = lock(&self.handlers)
                    .iter()
                    .fold(false, |handled, handler| handler(&error) || handled);
                if !handled {
                    error!(%id, "unhandled error in reactor task: {error:?}");
                    self.begin_stop();
                }
            }
            other => {
                error!(%id, "unhandled failure in reactor task: {other}");
                self.begin_stop();
            }
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|message| message.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned()),
        Err(error) => error.to_string(),
    }
}

/// One background thread running a cooperative event loop.
pub struct SingleThreadedReactor {
    shared: Arc<Shared>,
}

impl SingleThreadedReactor {
    /// A reactor that starts on first use.
    pub fn new() -> SingleThreadedReactor {
        SingleThreadedReactor {
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle::NotStarted),
                stopped: Condvar::new(),
                thread: Mutex::new(None),
                halt: Mutex::new(None),
                tracked: Mutex::new(HashMap::new()),
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReactorState {
        self.shared.state()
    }

    /// Number of submitted tasks that have not completed yet.
    pub fn tracked_tasks(&self) -> usize {
        self.shared.tracked_count()
    }

    /// Boots the loop thread if needed and returns a handle on its runtime.
    ///
    /// Calling it on a running reactor is a no-op.
    pub fn start(&self) -> anyhow::Result<Handle> {
        let mut lifecycle = lock(&self.shared.lifecycle);
        match &*lifecycle {
            Lifecycle::Running { handle, .. } => return Ok(handle.clone()),
            Lifecycle::Stopping { .. } | Lifecycle::Stopped => return Err(ReactorStopped.into()),
            Lifecycle::NotStarted => {}
        }

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("could not build the reactor runtime")?;
        let handle = runtime.handle().clone();
        let (halt, halted) = oneshot::channel::<()>();
        *lock(&self.shared.halt) = Some(halt);

        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("reactor".to_owned())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = halted.await;
                });
                runtime.shutdown_background();
                shared.mark_stopped();
                debug!("reactor loop exited");
            })
            .context("could not spawn the reactor thread")?;

        *lifecycle = Lifecycle::Running {
            handle: handle.clone(),
            thread_id: thread.thread().id(),
        };
        *lock(&self.shared.thread) = Some(thread);
        info!("reactor started");
        Ok(handle)
    }

    /// Schedules `future` on the loop, starting the reactor if needed.
    pub fn submit<F, T>(&self, future: F) -> anyhow::Result<(TaskHandle, BlockingFuture<T>)>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.start()?;
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::sync_channel(1);

        let task = handle.spawn(future);
        let abort = task.abort_handle();
        lock(&self.shared.tracked).insert(id, abort.clone());

        let shared = Arc::clone(&self.shared);
        handle.spawn(async move {
            let result = match task.await {
                Ok(result) => result.map_err(TaskError::Failed),
                Err(error) if error.is_cancelled() => Err(TaskError::Cancelled),
                Err(error) => Err(TaskError::Panicked(panic_message(error))),
            };
            lock(&shared.tracked).remove(&id);
            tokio::task::yield_now().await;
            if let Err(mpsc::TrySendError::Disconnected(Err(error))) = sender.try_send(result) {
                shared.on_detached_error(id, error);
            }
        });
        trace!(%id, "task submitted");

        Ok((TaskHandle { id, abort }, BlockingFuture { id, result: receiver }))
    }

    /// Routes errors of type `E` raised by detached tasks to `handler`.
    ///
    /// Errors no handler claims make the reactor stop.
    pub fn register_error_handler<E, H>(&self, handler: H)
    where
        E: std::error::Error + Send + Sync + 'static,
        H: Fn(&E) + Send + Sync + 'static,
    {
        lock(&self.shared.handlers).push(Box::new(move |error: &anyhow::Error| {
            match error.downcast_ref::<E>() {
                Some(error) => {
                    handler(error);
                    true
                }
                None => false,
            }
        }));
    }

    /// Requests cancellation of every tracked task and returns immediately.
    pub fn cancel_all_tasks(&self) {
        let cancelled = self.shared.cancel_tracked();
        if cancelled > 0 {
            debug!("cancelled {cancelled} task(s)");
        }
    }

    /// Stops the reactor. Idempotent.
    ///
    /// From the loop thread this only schedules the shutdown. From any other thread it
    /// blocks for at most [`STOP_TIMEOUT`] (plus [`STOP_GRACE`] if the halt has to be forced).
    pub fn stop(&self) {
        self.shared.begin_stop();
        if self.shared.on_loop_thread() {
            return;
        }
        if !self.shared.wait_stopped(STOP_TIMEOUT) {
            warn!("reactor did not stop within {STOP_TIMEOUT:?}, forcing the loop to halt");
            self.shared.halt();
            if !self.shared.wait_stopped(STOP_GRACE) {
                error!("reactor thread is not responding");
                return;
            }
        }
        if let Some(thread) = lock(&self.shared.thread).take() {
            if thread.join().is_err() {
                error!("reactor thread panicked");
            }
        }
    }
}

impl Default for SingleThreadedReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SingleThreadedReactor {
    fn drop(&mut self) {
        self.shared.halt();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    use anyhow::anyhow;

    use super::*;

    #[derive(Debug, Error)]
    #[error("custom failure")]
    struct CustomFailure;

    #[test]
    fn starts_lazily() {
        let reactor = SingleThreadedReactor::new();
        assert_eq!(reactor.state(), ReactorState::NotStarted);
        let (_task, future) = reactor.submit(async { Ok(1) }).unwrap();
        assert_eq!(future.wait().unwrap(), 1);
        assert_eq!(reactor.state(), ReactorState::Running);
        reactor.stop();
    }

    #[test]
    fn submit_resolves_with_the_value() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok("done".to_owned())
            })
            .unwrap();
        assert_eq!(future.wait().unwrap(), "done");
        reactor.stop();
    }

    #[test]
    fn failures_are_reported_to_the_waiter() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async { Err::<(), _>(anyhow!("boom")) })
            .unwrap();
        match future.wait() {
            Err(TaskError::Failed(error)) => assert_eq!(error.to_string(), "boom"),
            other => panic!("unexpected result {other:?}"),
        }
        reactor.stop();
    }

    #[test]
    fn cancelled_task_resolves_as_cancelled() {
        let reactor = SingleThreadedReactor::new();
        let (task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();
        task.cancel();
        assert!(matches!(future.wait(), Err(TaskError::Cancelled)));
        reactor.stop();
    }

    #[test]
    fn panics_are_captured() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async {
                if true {
                    panic!("bad state");
                }
                Ok(())
            })
            .unwrap();
        match future.wait() {
            Err(TaskError::Panicked(message)) => assert_eq!(message, "bad state"),
            other => panic!("unexpected result {other:?}"),
        }
        reactor.stop();
    }

    #[test]
    fn wait_timeout_leaves_the_task_running() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(7)
            })
            .unwrap();
        assert!(matches!(
            future.wait_timeout(Duration::from_millis(10)),
            Err(TaskError::Timeout(_))
        ));
        assert_eq!(future.wait_timeout(Duration::from_secs(5)).unwrap(), 7);
        reactor.stop();
    }

    #[test]
    fn cancel_all_tasks_does_not_wait() {
        let reactor = SingleThreadedReactor::new();
        let futures: Vec<_> = (0..3)
            .map(|_| {
                reactor
                    .submit(async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .unwrap()
                    .1
            })
            .collect();
        reactor.cancel_all_tasks();
        for future in futures {
            assert!(matches!(future.wait(), Err(TaskError::Cancelled)));
        }
        assert_eq!(reactor.tracked_tasks(), 0);
        reactor.stop();
    }

    #[test]
    fn stop_is_bounded_and_idempotent() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();
        let start = Instant::now();
        reactor.stop();
        reactor.stop();
        assert!(start.elapsed() < STOP_TIMEOUT);
        assert_eq!(reactor.state(), ReactorState::Stopped);
        assert!(future.wait().is_err());
        let error = reactor.submit(async { Ok(()) }).unwrap_err();
        assert!(error.downcast_ref::<ReactorStopped>().is_some());
    }

    #[test]
    fn stopping_a_reactor_that_never_ran() {
        let reactor = SingleThreadedReactor::new();
        reactor.stop();
        assert_eq!(reactor.state(), ReactorState::Stopped);
    }

    #[test]
    fn stop_from_the_loop_thread_does_not_deadlock() {
        let reactor = Arc::new(SingleThreadedReactor::new());
        let inner = Arc::clone(&reactor);
        let (_task, future) = reactor
            .submit(async move {
                inner.stop();
                Ok(())
            })
            .unwrap();
        let _ = future.wait_timeout(Duration::from_secs(5));
        assert!(reactor.shared.wait_stopped(Duration::from_secs(5)));
    }

    #[test]
    fn registered_handler_claims_detached_errors() {
        let reactor = SingleThreadedReactor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        reactor.register_error_handler(move |_: &CustomFailure| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (_task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<(), _>(CustomFailure.into())
            })
            .unwrap();
        drop(future);

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reactor.state(), ReactorState::Running);
        reactor.stop();
    }

    #[test]
    fn unhandled_detached_error_stops_the_reactor() {
        let reactor = SingleThreadedReactor::new();
        let (_task, future) = reactor
            .submit(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err::<(), _>(anyhow!("nobody listens"))
            })
            .unwrap();
        drop(future);
        assert!(reactor.shared.wait_stopped(Duration::from_secs(5)));
        assert_eq!(reactor.state(), ReactorState::Stopped);
    }
}
