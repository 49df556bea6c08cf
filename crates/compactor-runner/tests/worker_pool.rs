//! End-to-end tests driving the reference worker binary through the
//! runner: wire round trips, caching across batches, ordering, and
//! worker failure handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;

use compactor_codec::ConfigValue;
use compactor_core::{BasicMinifier, Condition, ExtractComments, MinifyTask, TaskOptions};
use compactor_runner::{
    CollectingReporter, PoolError, RunEvent, RunReporter, RunnerOptions, TaskRunner, WorkerCommand,
};

fn worker_command() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_compactor-worker"))
}

fn worker_runner(options: RunnerOptions) -> TaskRunner {
    TaskRunner::new(options, Arc::new(BasicMinifier))
}

#[tokio::test]
async fn test_batch_resolves_through_workers_then_from_cache() {
    let cache_dir = TempDir::new().unwrap();
    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(2)
            .with_cache_dir(cache_dir.path()),
    );

    let tasks = vec![
        MinifyTask::new("a.min.js", "// header\nlet a = 1;\n"),
        MinifyTask::new("b.min.js", "let b = 2;   \n\nlet c = b;\n"),
    ];

    let first = runner.run_batch(tasks.clone()).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].id.as_str(), "a.min.js");
    assert_eq!(first[1].id.as_str(), "b.min.js");
    assert!(first.iter().all(|r| !r.cached));
    assert_eq!(first[0].outcome.as_ref().unwrap().code, "let a = 1;\n");
    assert_eq!(
        first[1].outcome.as_ref().unwrap().code,
        "let b = 2;\nlet c = b;\n"
    );
    assert_eq!(runner.pool().live_workers().await, 0);

    // Same runner, same inputs: everything comes from the cache and the
    // pool spawns fresh workers only if something misses.
    let second = runner.run_batch(tasks).await.unwrap();
    assert!(second.iter().all(|r| r.cached));
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.outcome.as_ref().unwrap(), b.outcome.as_ref().unwrap());
    }
}

#[tokio::test]
async fn test_pattern_condition_crosses_the_process_boundary() {
    let options = TaskOptions::new().with_extract_comments(ExtractComments::with_condition(
        Condition::pattern("@license").unwrap(),
    ));
    let task =
        MinifyTask::new("lib.min.js", "/* @license MIT */\nlet a = 1;\n").with_options(options);

    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(1),
    );
    let results = runner.run_batch(vec![task]).await.unwrap();
    let output = results[0].outcome.as_ref().unwrap();

    assert_eq!(output.code, "let a = 1;\n");
    assert_eq!(output.extracted.len(), 1);
    let extracted = &output.extracted[0];
    assert_eq!(extracted.filename, "lib.min.js.LICENSE");
    assert_eq!(extracted.text, "/* @license MIT */");
    assert_eq!(
        extracted.banner.as_deref(),
        Some("/*! For license information please see lib.min.js.LICENSE */")
    );
}

#[tokio::test]
async fn test_untransportable_function_fails_only_its_task() {
    // A function that closed over `prefix` in the sending process; its
    // source cannot be rebuilt on the worker side.
    let options = TaskOptions::new().with_minify(ConfigValue::from_json(&json!({
        "x": "<Function||w| contains(w, prefix)>"
    })));
    let tasks = vec![
        MinifyTask::new("broken.min.js", "let a = 1;\n").with_options(options),
        MinifyTask::new("ok.min.js", "let b = 2;\n"),
    ];

    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(1),
    );
    let results = runner.run_batch(tasks).await.unwrap();

    let error = results[0].outcome.as_ref().unwrap_err();
    assert!(error.is_decode());
    let message = error.to_string();
    assert!(message.contains("minify.x"), "message: {message}");
    assert!(message.contains("prefix"), "message: {message}");

    assert!(results[1].outcome.is_ok());
}

#[tokio::test]
async fn test_results_preserve_submission_order() {
    let ids = ["d.min.js", "c.min.js", "b.min.js", "a.min.js"];
    let tasks: Vec<MinifyTask> = ids
        .iter()
        .map(|id| MinifyTask::new(*id, format!("let x = 1; // {id}\n")))
        .collect();

    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(1),
    );
    let results = runner.run_batch(tasks).await.unwrap();

    let got: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(got, ids);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(runner.pool().live_workers().await, 0);
}

#[tokio::test]
async fn test_one_worker_holds_several_tasks_in_flight() {
    let tasks: Vec<MinifyTask> = (0..6)
        .map(|i| MinifyTask::new(format!("t{i}.min.js"), format!("let v{i} = {i};\n")))
        .collect();

    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(1)
            .with_tasks_per_worker(4),
    );
    let results = runner.run_batch(tasks).await.unwrap();

    assert_eq!(results.len(), 6);
    for (i, resolution) in results.iter().enumerate() {
        assert_eq!(resolution.id.as_str(), format!("t{i}.min.js"));
        assert_eq!(
            resolution.outcome.as_ref().unwrap().code,
            format!("let v{i} = {i};\n")
        );
    }
}

#[tokio::test]
async fn test_transform_error_carries_position_across_the_wire() {
    let task = MinifyTask::new("bad.min.js", "let a = 1;\n/* oops");
    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(1),
    );
    let results = runner.run_batch(vec![task]).await.unwrap();

    let error = results[0].outcome.as_ref().unwrap_err();
    assert!(error.is_transform());
    let message = error.to_string();
    assert!(message.contains("unterminated block comment"), "message: {message}");
    assert!(message.contains("[bad.min.js:2,0]"), "message: {message}");
}

#[tokio::test]
async fn test_in_process_and_worker_strategies_agree() {
    let make_task = || {
        MinifyTask::new(
            "par.min.js",
            "/*! banner */\nlet a = 1;\n  debugger;\nlet b = 2;\n",
        )
        .with_options(
            TaskOptions::new()
                .with_extract_comments(ExtractComments::annotated())
                .with_warning_filter(Condition::pattern("debugger").unwrap()),
        )
    };

    let in_process = worker_runner(RunnerOptions::new());
    let local = in_process.run_batch(vec![make_task()]).await.unwrap();

    let out_of_process = worker_runner(
        RunnerOptions::new()
            .with_worker(worker_command())
            .with_workers(2),
    );
    let remote = out_of_process.run_batch(vec![make_task()]).await.unwrap();

    let local = local[0].outcome.as_ref().unwrap();
    let remote = remote[0].outcome.as_ref().unwrap();
    assert_eq!(local, remote);
    assert_eq!(local.code, "let a = 1;\nlet b = 2;\n");
    assert_eq!(local.warnings.len(), 1);
    assert_eq!(local.extracted.len(), 1);
}

#[tokio::test]
async fn test_spawn_failure_fails_the_whole_batch() {
    let reporter = Arc::new(CollectingReporter::default());
    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(WorkerCommand::new("/nonexistent/compactor-worker-missing"))
            .with_workers(2),
    )
    .with_reporter(Arc::clone(&reporter) as Arc<dyn RunReporter>);

    let tasks = vec![
        MinifyTask::new("a.min.js", "let a = 1;\n"),
        MinifyTask::new("b.min.js", "let b = 2;\n"),
        MinifyTask::new("c.min.js", "let c = 3;\n"),
    ];
    let error = runner.run_batch(tasks).await.unwrap_err();

    match error {
        PoolError::Spawn { program, .. } => {
            assert!(program.contains("compactor-worker-missing"))
        }
        other => panic!("expected a spawn error, got {other:?}"),
    }
    assert!(reporter
        .events()
        .iter()
        .any(|event| matches!(event, RunEvent::BatchFailed { .. })));
}

#[tokio::test]
async fn test_worker_death_mid_batch_fails_every_pending_dispatch() {
    // A worker that consumes one request and exits without replying,
    // leaving both in-flight dispatches waiting on the reply channel.
    let command = WorkerCommand::new("/bin/sh").with_args(["-c", "read -r line; exit 0"]);
    let reporter = Arc::new(CollectingReporter::default());
    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(command)
            .with_workers(1)
            .with_tasks_per_worker(2),
    )
    .with_reporter(Arc::clone(&reporter) as Arc<dyn RunReporter>);

    let start = Instant::now();
    let error = runner
        .run_batch(vec![
            MinifyTask::new("a.min.js", "let a = 1;\n"),
            MinifyTask::new("b.min.js", "let b = 2;\n"),
        ])
        .await
        .unwrap_err();

    // Depending on how far the second write got before the exit, the
    // latch holds either the EOF-with-work-outstanding error or the
    // broken-pipe transport error; both abandon every pending slot.
    assert!(
        matches!(error, PoolError::WorkerExited | PoolError::Transport { .. }),
        "expected a pool-fatal error, got {error:?}"
    );
    assert!(reporter
        .events()
        .iter()
        .any(|event| matches!(event, RunEvent::BatchFailed { .. })));
    assert_eq!(runner.pool().live_workers().await, 0);
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "a dead worker must fail the batch, not hang it"
    );
}

#[tokio::test]
async fn test_unresponsive_worker_is_killed_within_the_grace_period() {
    // A fake worker that answers the first request and then wedges.
    let command = WorkerCommand::new("/bin/sh").with_args([
        "-c",
        r#"read -r line; printf '{"status":"ok","seq":1,"output":{"code":"stub"}}\n'; sleep 30"#,
    ]);
    let runner = worker_runner(
        RunnerOptions::new()
            .with_worker(command)
            .with_workers(1)
            .with_exit_grace(Duration::from_millis(200)),
    );

    let start = Instant::now();
    let results = runner
        .run_batch(vec![MinifyTask::new("stub.min.js", "ignored")])
        .await
        .unwrap();

    assert_eq!(results[0].outcome.as_ref().unwrap().code, "stub");
    assert_eq!(runner.pool().live_workers().await, 0);
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "exit should not wait out the wedged worker"
    );
}
