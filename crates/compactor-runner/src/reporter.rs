//! Batch execution reporting

use std::time::Duration;

use compactor_core::{TaskError, TaskId};

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A batch began resolving.
    BatchStarted { tasks: usize },
    /// One task settled with its outcome.
    TaskSettled {
        id: TaskId,
        cached: bool,
        duration: Duration,
        error: Option<TaskError>,
    },
    /// Every slot settled.
    BatchCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        duration: Duration,
    },
    /// A pool-fatal error aborted the batch.
    BatchFailed { error: String, duration: Duration },
}

/// Trait for observing batch progress.
pub trait RunReporter: Send + Sync {
    fn report(&self, event: &RunEvent);
}

/// Simple reporter that logs to tracing.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn report(&self, event: &RunEvent) {
        match event {
            RunEvent::BatchStarted { tasks } => {
                tracing::info!("Resolving batch of {} tasks", tasks);
            }
            RunEvent::TaskSettled {
                id,
                cached,
                duration,
                error,
            } => match error {
                Some(error) => {
                    tracing::error!("{} failed after {:.1}s: {}", id, duration.as_secs_f64(), error);
                }
                None if *cached => {
                    tracing::info!("{} resolved from cache", id);
                }
                None => {
                    tracing::info!("{} minified in {:.1}s", id, duration.as_secs_f64());
                }
            },
            RunEvent::BatchCompleted {
                total,
                succeeded,
                failed,
                cached,
                duration,
            } => {
                tracing::info!(
                    "Batch complete: {}/{} succeeded, {} failed, {} cached ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    duration.as_secs_f64()
                );
            }
            RunEvent::BatchFailed { error, duration } => {
                tracing::error!("Batch failed after {:.1}s: {}", duration.as_secs_f64(), error);
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing).
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<RunEvent>>,
}

impl CollectingReporter {
    /// Get all collected events.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count of settled tasks that came from the cache.
    pub fn cached_settlements(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, RunEvent::TaskSettled { cached: true, .. }))
            .count()
    }
}

impl RunReporter for CollectingReporter {
    fn report(&self, event: &RunEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_keeps_order() {
        let reporter = CollectingReporter::default();
        reporter.report(&RunEvent::BatchStarted { tasks: 2 });
        reporter.report(&RunEvent::TaskSettled {
            id: TaskId::new("a.js"),
            cached: true,
            duration: Duration::from_millis(1),
            error: None,
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], RunEvent::BatchStarted { tasks: 2 }));
        assert_eq!(reporter.cached_settlements(), 1);
    }

    #[test]
    fn test_tracing_reporter_handles_every_event() {
        let reporter = TracingReporter;
        reporter.report(&RunEvent::BatchStarted { tasks: 1 });
        reporter.report(&RunEvent::TaskSettled {
            id: TaskId::new("a.js"),
            cached: false,
            duration: Duration::from_secs(1),
            error: None,
        });
        reporter.report(&RunEvent::BatchCompleted {
            total: 1,
            succeeded: 1,
            failed: 0,
            cached: 0,
            duration: Duration::from_secs(1),
        });
        reporter.report(&RunEvent::BatchFailed {
            error: "spawn failed".to_string(),
            duration: Duration::from_secs(1),
        });
    }
}
