//! Bounded worker pool
//!
//! Two strategies behind one dispatch surface: a fixed set of long-lived
//! child processes speaking the wire protocol, or an in-process fallback
//! selected by zero parallelism. Admission is FIFO through a fair slot
//! semaphore sized `workers * tasks_per_worker`; a pool-level error latch
//! settles every pending dispatch with the same error when a worker dies
//! or cannot be spawned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

use compactor_core::{Minifier, MinifyTask, TaskError, TaskOutput, TransformError};

use crate::execute::execute;
use crate::protocol::{WireReply, WireRequest};

/// A failure of the pool itself, not of any one task. Fatal for the
/// in-flight batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn worker `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("worker exited with dispatches outstanding")]
    WorkerExited,

    #[error("worker transport error: {message}")]
    Transport { message: String },

    #[error("worker pool exited")]
    Terminated,
}

/// Why a dispatch did not produce an output.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Attributable to the dispatched task; siblings are unaffected.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Fatal for the whole batch.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Pool sizing and shutdown behavior.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Worker process count. Zero selects the in-process strategy.
    pub workers: usize,
    /// Tasks one worker may hold in flight.
    pub tasks_per_worker: usize,
    /// How long `exit` waits for a worker to drain before killing it.
    pub exit_grace: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tasks_per_worker: 1,
            exit_grace: Duration::from_secs(2),
        }
    }
}

/// One worker per CPU, leaving one for the caller.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// The program a process pool spawns for each worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

type ReplySender = oneshot::Sender<Result<TaskOutput, TaskError>>;
type PendingMap = Arc<std::sync::Mutex<HashMap<u64, ReplySender>>>;

/// A live worker process. Cheap to clone; all state is shared.
#[derive(Clone)]
struct WorkerHandle {
    index: usize,
    /// `None` once `exit` has closed the pipe.
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Arc<Mutex<Child>>,
    pending: PendingMap,
    in_flight: Arc<AtomicUsize>,
}

enum Strategy {
    InProcess {
        minifier: Arc<dyn Minifier>,
    },
    Process {
        command: WorkerCommand,
        /// Empty until the first dispatch; emptied again by `exit`.
        workers: Mutex<Vec<WorkerHandle>>,
    },
}

/// Executes tasks with bounded parallelism.
pub struct WorkerPool {
    strategy: Strategy,
    options: PoolOptions,
    slots: Arc<Semaphore>,
    seq: AtomicU64,
    fatal: watch::Sender<Option<PoolError>>,
}

impl WorkerPool {
    /// In-process strategy: the transform runs on the blocking thread
    /// pool, one task at a time, with no codec round trip.
    pub fn in_process(minifier: Arc<dyn Minifier>) -> Self {
        let (fatal, _) = watch::channel(None);
        Self {
            strategy: Strategy::InProcess { minifier },
            options: PoolOptions {
                workers: 0,
                ..Default::default()
            },
            slots: Arc::new(Semaphore::new(1)),
            seq: AtomicU64::new(0),
            fatal,
        }
    }

    /// Process strategy: `workers` children of `command`, spawned lazily
    /// on the first dispatch.
    pub fn process(command: WorkerCommand, mut options: PoolOptions) -> Self {
        options.workers = options.workers.max(1);
        options.tasks_per_worker = options.tasks_per_worker.max(1);
        let permits = options.workers * options.tasks_per_worker;
        let (fatal, _) = watch::channel(None);
        Self {
            strategy: Strategy::Process {
                command,
                workers: Mutex::new(Vec::new()),
            },
            options,
            slots: Arc::new(Semaphore::new(permits)),
            seq: AtomicU64::new(0),
            fatal,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self.strategy, Strategy::InProcess { .. })
    }

    /// Count of currently live worker processes.
    pub async fn live_workers(&self) -> usize {
        match &self.strategy {
            Strategy::InProcess { .. } => 0,
            Strategy::Process { workers, .. } => workers.lock().await.len(),
        }
    }

    /// Submit one task and await its outcome.
    ///
    /// Callers queue FIFO on the pool's slots when all are taken. The
    /// returned future resolves exactly once, with the task's outcome or
    /// with the pool's fatal error.
    pub async fn dispatch(&self, task: &MinifyTask) -> Result<TaskOutput, DispatchError> {
        if let Some(fatal) = self.fatal.borrow().clone() {
            return Err(DispatchError::Pool(fatal));
        }
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| DispatchError::Pool(PoolError::Terminated))?;
        // Re-check after queuing: a sibling may have hit a fatal error
        // while this dispatch waited for a slot.
        if let Some(fatal) = self.fatal.borrow().clone() {
            return Err(DispatchError::Pool(fatal));
        }

        match &self.strategy {
            Strategy::InProcess { minifier } => self.dispatch_in_process(minifier, task).await,
            Strategy::Process { command, workers } => {
                self.dispatch_to_worker(command, workers, task).await
            }
        }
    }

    async fn dispatch_in_process(
        &self,
        minifier: &Arc<dyn Minifier>,
        task: &MinifyTask,
    ) -> Result<TaskOutput, DispatchError> {
        let minifier = Arc::clone(minifier);
        let task = task.clone();
        let id = task.id.clone();
        let result = tokio::task::spawn_blocking(move || {
            execute(
                minifier.as_ref(),
                &task.id,
                &task.input,
                &task.options,
                task.input_source_map.as_ref(),
            )
        })
        .await
        .map_err(|e| {
            TaskError::transform(id, TransformError::new(format!("transform panicked: {e}")))
        })?;
        result.map_err(DispatchError::Task)
    }

    async fn dispatch_to_worker(
        &self,
        command: &WorkerCommand,
        workers: &Mutex<Vec<WorkerHandle>>,
        task: &MinifyTask,
    ) -> Result<TaskOutput, DispatchError> {
        let worker = self.pick_worker(command, workers).await?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let request = WireRequest::from_task(seq, task);
        let line = serde_json::to_string(&request).map_err(|e| {
            DispatchError::Pool(PoolError::Transport {
                message: format!("encode request: {e}"),
            })
        })?;

        let (tx, mut rx) = oneshot::channel();
        worker.pending.lock().unwrap().insert(seq, tx);
        worker.in_flight.fetch_add(1, Ordering::Relaxed);
        let _load = InFlightGuard(Arc::clone(&worker.in_flight));
        debug!(worker = worker.index, seq, task = %task.id, "dispatching to worker");

        if let Err(error) = write_line(&worker, &line).await {
            worker.pending.lock().unwrap().remove(&seq);
            self.raise_fatal(error);
            return Err(DispatchError::Pool(self.fatal_or_terminated()));
        }

        let mut fatal_rx = self.fatal.subscribe();
        tokio::select! {
            reply = &mut rx => match reply {
                Ok(result) => result.map_err(DispatchError::Task),
                Err(_) => Err(DispatchError::Pool(self.fatal_or_terminated())),
            },
            changed = fatal_rx.wait_for(|fatal| fatal.is_some()) => {
                worker.pending.lock().unwrap().remove(&seq);
                let error = match changed {
                    Ok(value) => value.clone().unwrap_or(PoolError::Terminated),
                    Err(_) => PoolError::Terminated,
                };
                Err(DispatchError::Pool(error))
            }
        }
    }

    /// Start workers if none are live, then pick the least-loaded one.
    async fn pick_worker(
        &self,
        command: &WorkerCommand,
        workers: &Mutex<Vec<WorkerHandle>>,
    ) -> Result<WorkerHandle, DispatchError> {
        let mut guard = workers.lock().await;
        if guard.is_empty() {
            for index in 0..self.options.workers {
                match self.spawn_worker(command, index) {
                    Ok(handle) => guard.push(handle),
                    Err(error) => {
                        self.raise_fatal(error.clone());
                        // Children already spawned are killed on drop.
                        guard.clear();
                        return Err(DispatchError::Pool(error));
                    }
                }
            }
            debug!(workers = guard.len(), "worker pool started");
        }
        guard
            .iter()
            .min_by_key(|w| w.in_flight.load(Ordering::Relaxed))
            .cloned()
            .ok_or(DispatchError::Pool(PoolError::Terminated))
    }

    fn spawn_worker(&self, command: &WorkerCommand, index: usize) -> Result<WorkerHandle, PoolError> {
        let spawn_error = |message: String| PoolError::Spawn {
            program: command.program.display().to_string(),
            message,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("stderr not piped".to_string()))?;

        let pending: PendingMap = Arc::default();
        let handle = WorkerHandle {
            index,
            stdin: Arc::new(Mutex::new(Some(stdin))),
            child: Arc::new(Mutex::new(child)),
            pending: Arc::clone(&pending),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };

        tokio::spawn(read_replies(index, stdout, pending, self.fatal.clone()));
        tokio::spawn(forward_stderr(index, stderr));
        debug!(worker = index, program = %command.program.display(), "spawned worker");
        Ok(handle)
    }

    /// Stop all live workers: close their stdin, give each the grace
    /// period to drain, then kill stragglers. Safe to call repeatedly;
    /// termination problems are logged, never returned. The next dispatch
    /// starts fresh workers.
    pub async fn exit(&self) {
        if let Strategy::Process { workers, .. } = &self.strategy {
            let drained = std::mem::take(&mut *workers.lock().await);
            if !drained.is_empty() {
                debug!(workers = drained.len(), "stopping worker pool");
                for worker in &drained {
                    worker.stdin.lock().await.take();
                }
                for worker in drained {
                    self.reap(worker).await;
                }
            }
        }
        // Fresh latch for the next batch.
        self.fatal.send_replace(None);
    }

    async fn reap(&self, worker: WorkerHandle) {
        let grace = self.options.exit_grace;
        let mut child = worker.child.lock().await;
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => debug!(worker = worker.index, %status, "worker exited"),
            Ok(Err(e)) => warn!(worker = worker.index, error = %e, "failed to reap worker"),
            Err(_) => {
                warn!(
                    worker = worker.index,
                    grace_ms = grace.as_millis() as u64,
                    "worker did not exit in time, killing"
                );
                if let Err(e) = child.start_kill() {
                    warn!(worker = worker.index, error = %e, "failed to kill worker");
                } else if let Err(e) = child.wait().await {
                    warn!(worker = worker.index, error = %e, "failed to reap killed worker");
                }
            }
        }
    }

    fn raise_fatal(&self, error: PoolError) {
        raise(&self.fatal, error);
    }

    fn fatal_or_terminated(&self) -> PoolError {
        self.fatal.borrow().clone().unwrap_or(PoolError::Terminated)
    }
}

/// Latch a pool-fatal error. First error wins; later ones are dropped so
/// every pending dispatch settles with the same error.
fn raise(fatal: &watch::Sender<Option<PoolError>>, error: PoolError) {
    fatal.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        warn!(%error, "worker pool failure");
        *current = Some(error);
        true
    });
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn write_line(worker: &WorkerHandle, line: &str) -> Result<(), PoolError> {
    let mut stdin = worker.stdin.lock().await;
    let Some(pipe) = stdin.as_mut() else {
        return Err(PoolError::WorkerExited);
    };
    let write = async {
        pipe.write_all(line.as_bytes()).await?;
        pipe.write_all(b"\n").await?;
        pipe.flush().await
    };
    write.await.map_err(|e| PoolError::Transport {
        message: format!("write to worker: {e}"),
    })
}

/// Route reply lines from one worker's stdout to their dispatches. An
/// EOF with work outstanding, an unreadable line, or a read error latches
/// a pool-fatal error.
async fn read_replies(
    index: usize,
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    fatal: watch::Sender<Option<PoolError>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WireReply>(&line) {
                    Ok(reply) => {
                        let (seq, result) = reply.into_result();
                        let sender = pending.lock().unwrap().remove(&seq);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(result);
                            }
                            None => debug!(worker = index, seq, "reply for unknown sequence"),
                        }
                    }
                    Err(e) => {
                        raise(
                            &fatal,
                            PoolError::Transport {
                                message: format!("unreadable worker reply: {e}"),
                            },
                        );
                        break;
                    }
                }
            }
            Ok(None) => {
                let outstanding = !pending.lock().unwrap().is_empty();
                if outstanding {
                    raise(&fatal, PoolError::WorkerExited);
                } else {
                    debug!(worker = index, "worker stdout closed");
                }
                break;
            }
            Err(e) => {
                raise(
                    &fatal,
                    PoolError::Transport {
                        message: format!("read from worker: {e}"),
                    },
                );
                break;
            }
        }
    }
    // Unblock anything still waiting on this worker.
    pending.lock().unwrap().clear();
}

async fn forward_stderr(index: usize, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(worker = index, "{line}");
    }
}
