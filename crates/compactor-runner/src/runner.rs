//! Batch orchestration
//!
//! The runner resolves each task through the cache or the pool, settling
//! one pre-allocated slot per input position so outcomes come back in
//! submission order no matter how resolution interleaves. The pool is
//! stopped exactly once per batch, on success and on failure alike.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use compactor_core::{Minifier, MinifyTask, TaskError, TaskId, TaskOutput};

use crate::cache::{CacheKey, Fingerprint, MinifyCache, ToolIdentity};
use crate::pool::{DispatchError, PoolError, PoolOptions, WorkerCommand, WorkerPool};
use crate::reporter::{RunEvent, RunReporter, TracingReporter};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Worker program for out-of-process execution. `None`, like zero
    /// workers, runs everything in-process.
    pub worker: Option<WorkerCommand>,
    pub pool: PoolOptions,
    /// Cache directory. `None` disables caching.
    pub cache_dir: Option<PathBuf>,
    /// Tool identity mixed into cache fingerprints, so upgrading the
    /// transform invalidates old entries.
    pub tool: ToolIdentity,
    /// Extra fingerprint key material supplied by the embedder.
    pub extra_cache_key: Option<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            worker: None,
            pool: PoolOptions::default(),
            cache_dir: None,
            tool: ToolIdentity::current(),
            extra_cache_key: None,
        }
    }
}

impl RunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(mut self, command: WorkerCommand) -> Self {
        self.worker = Some(command);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    pub fn with_tasks_per_worker(mut self, tasks: usize) -> Self {
        self.pool.tasks_per_worker = tasks;
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.pool.exit_grace = grace;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_tool(mut self, tool: ToolIdentity) -> Self {
        self.tool = tool;
        self
    }

    pub fn with_extra_cache_key(mut self, extra: impl Into<String>) -> Self {
        self.extra_cache_key = Some(extra.into());
        self
    }
}

/// Per-task outcome, in submission order.
#[derive(Debug, Clone)]
pub struct TaskResolution {
    pub id: TaskId,
    pub outcome: Result<TaskOutput, TaskError>,
    /// Whether the outcome came from the cache.
    pub cached: bool,
    pub duration: Duration,
}

impl TaskResolution {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Resolves batches of minification tasks through a cache and a pool.
pub struct TaskRunner {
    pool: Arc<WorkerPool>,
    cache: Option<MinifyCache>,
    tool: ToolIdentity,
    extra_cache_key: Option<String>,
    reporter: Arc<dyn RunReporter>,
}

impl TaskRunner {
    /// Build a runner. The minifier is used by the in-process strategy;
    /// out-of-process runs use whatever the worker binary was built with.
    pub fn new(options: RunnerOptions, minifier: Arc<dyn Minifier>) -> Self {
        let pool = match options.worker {
            Some(command) if options.pool.workers > 0 => {
                WorkerPool::process(command, options.pool)
            }
            _ => WorkerPool::in_process(minifier),
        };
        Self {
            pool: Arc::new(pool),
            cache: options.cache_dir.map(MinifyCache::open),
            tool: options.tool,
            extra_cache_key: options.extra_cache_key,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn cache(&self) -> Option<&MinifyCache> {
        self.cache.as_ref()
    }

    /// Resolve a batch. Outcomes preserve submission order; each task
    /// settles exactly once; a pool-fatal error aborts the whole batch
    /// with that one error. The empty batch still completes on a later
    /// scheduling turn, so completion is always asynchronous.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn run_batch(
        &self,
        tasks: Vec<MinifyTask>,
    ) -> Result<Vec<TaskResolution>, PoolError> {
        let start = Instant::now();
        if tasks.is_empty() {
            tokio::task::yield_now().await;
            self.reporter.report(&RunEvent::BatchCompleted {
                total: 0,
                succeeded: 0,
                failed: 0,
                cached: 0,
                duration: start.elapsed(),
            });
            self.pool.exit().await;
            return Ok(Vec::new());
        }

        self.reporter.report(&RunEvent::BatchStarted { tasks: tasks.len() });
        let mut slots: Vec<Option<TaskResolution>> = Vec::new();
        slots.resize_with(tasks.len(), || None);

        let mut handles = Vec::with_capacity(tasks.len());
        for (index, task) in tasks.into_iter().enumerate() {
            let pool = Arc::clone(&self.pool);
            let cache = self.cache.clone();
            let tool = self.tool.clone();
            let extra = self.extra_cache_key.clone();
            let reporter = Arc::clone(&self.reporter);
            let handle = tokio::spawn(async move {
                resolve_task(
                    &pool,
                    cache.as_ref(),
                    &tool,
                    extra.as_deref(),
                    reporter.as_ref(),
                    task,
                )
                .await
            });
            handles.push((index, handle));
        }

        let mut fatal: Option<PoolError> = None;
        for (index, handle) in handles {
            match handle.await {
                Ok(Ok(resolution)) => {
                    let slot = &mut slots[index];
                    debug_assert!(slot.is_none(), "task slot settled twice");
                    if slot.is_none() {
                        *slot = Some(resolution);
                    }
                }
                Ok(Err(error)) => {
                    fatal.get_or_insert(error);
                }
                Err(join_error) => {
                    fatal.get_or_insert(PoolError::Transport {
                        message: format!("task future panicked: {join_error}"),
                    });
                }
            }
        }

        let total = slots.len();
        let result = match fatal {
            Some(error) => {
                self.reporter.report(&RunEvent::BatchFailed {
                    error: error.to_string(),
                    duration: start.elapsed(),
                });
                Err(error)
            }
            None => {
                let resolutions: Vec<TaskResolution> = slots.into_iter().flatten().collect();
                if resolutions.len() != total {
                    // unreachable: every handle settled its slot or
                    // raised a fatal error above
                    Err(PoolError::Transport {
                        message: "task settled without an outcome".to_string(),
                    })
                } else {
                    let succeeded = resolutions.iter().filter(|r| r.is_success()).count();
                    let cached = resolutions.iter().filter(|r| r.cached).count();
                    self.reporter.report(&RunEvent::BatchCompleted {
                        total,
                        succeeded,
                        failed: total - succeeded,
                        cached,
                        duration: start.elapsed(),
                    });
                    Ok(resolutions)
                }
            }
        };

        self.pool.exit().await;
        result
    }

    /// Stop any live workers. The runner stays usable; the next batch
    /// starts fresh ones.
    pub async fn shutdown(&self) {
        self.pool.exit().await;
    }
}

/// Resolve one task: cache hit, or dispatch plus write-through.
async fn resolve_task(
    pool: &WorkerPool,
    cache: Option<&MinifyCache>,
    tool: &ToolIdentity,
    extra: Option<&str>,
    reporter: &dyn RunReporter,
    task: MinifyTask,
) -> Result<TaskResolution, PoolError> {
    let start = Instant::now();
    let id = task.id.clone();

    let keys = cache.map(|_| {
        (
            CacheKey::for_task(&id),
            Fingerprint::compute(tool, &task.options, &task.input, extra),
        )
    });

    if let (Some(cache), Some((key, fingerprint))) = (cache, &keys) {
        if let Some(output) = cache.get(key, fingerprint) {
            let duration = start.elapsed();
            reporter.report(&RunEvent::TaskSettled {
                id: id.clone(),
                cached: true,
                duration,
                error: None,
            });
            return Ok(TaskResolution {
                id,
                outcome: Ok(output),
                cached: true,
                duration,
            });
        }
    }

    let outcome = match pool.dispatch(&task).await {
        Ok(output) => Ok(output),
        Err(DispatchError::Task(error)) => Err(error),
        Err(DispatchError::Pool(error)) => return Err(error),
    };

    if let (Some(cache), Some((key, fingerprint)), Ok(output)) = (cache, &keys, &outcome) {
        if let Err(e) = cache.put(key, fingerprint, &id, output) {
            warn!(task = %id, error = %e, "failed to store cache entry");
        }
    }

    let duration = start.elapsed();
    reporter.report(&RunEvent::TaskSettled {
        id: id.clone(),
        cached: false,
        duration,
        error: outcome.as_ref().err().cloned(),
    });
    Ok(TaskResolution {
        id,
        outcome,
        cached: false,
        duration,
    })
}
