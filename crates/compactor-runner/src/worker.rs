//! Worker-process side of the wire protocol
//!
//! A worker reads request lines from stdin, decodes each task's options,
//! runs the transform, and writes one reply line per request to stdout.
//! Logs go to stderr so stdout stays protocol-clean.

use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use compactor_core::{Minifier, TaskError, TaskId, TaskOptions, TransformError};

use crate::execute::execute;
use crate::protocol::{WireReply, WireRequest};

/// Handle one request: decode the transported options, run the task,
/// build the reply. Never panics the serve loop; a decode failure is a
/// per-task error naming the offending option key.
pub fn execute_wire(minifier: &dyn Minifier, request: &WireRequest) -> WireReply {
    let id = TaskId::new(request.id.clone());
    let options = match TaskOptions::decode(&request.options) {
        Ok(options) => options,
        Err(e) => {
            return WireReply::Err {
                seq: request.seq,
                error: TaskError::decode(id, &e),
            }
        }
    };
    match execute(
        minifier,
        &id,
        &request.input,
        &options,
        request.input_source_map.as_ref(),
    ) {
        Ok(output) => WireReply::Ok {
            seq: request.seq,
            output,
        },
        Err(error) => WireReply::Err {
            seq: request.seq,
            error,
        },
    }
}

/// Serve the wire protocol on stdin/stdout until stdin closes.
///
/// Requests run on the blocking thread pool, several at a time when the
/// parent sends them back to back; replies are serialized through one
/// writer so lines never interleave.
pub async fn serve(minifier: Arc<dyn Minifier>) -> io::Result<()> {
    debug!("worker serving");
    let mut stdout = io::stdout();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(16);

    let writer = tokio::spawn(async move {
        while let Some(line) = reply_rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), io::Error>(())
    });

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: WireRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "dropping unreadable request line");
                continue;
            }
        };

        let seq = request.seq;
        let id = request.id.clone();
        let minifier = Arc::clone(&minifier);
        let reply_tx = reply_tx.clone();
        requests.spawn(async move {
            let reply = match tokio::task::spawn_blocking(move || {
                execute_wire(minifier.as_ref(), &request)
            })
            .await
            {
                Ok(reply) => reply,
                Err(e) => WireReply::Err {
                    seq,
                    error: TaskError::transform(
                        TaskId::new(id),
                        TransformError::new(format!("transform panicked: {e}")),
                    ),
                },
            };
            match serde_json::to_string(&reply) {
                Ok(line) => {
                    let _ = reply_tx.send(line).await;
                }
                Err(e) => warn!(seq, error = %e, "failed to encode reply"),
            }
        });
    }

    debug!("worker input closed, draining");
    while requests.join_next().await.is_some() {}
    drop(reply_tx);
    match writer.await {
        Ok(result) => result?,
        Err(e) => return Err(io::Error::other(e)),
    }
    debug!("worker exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compactor_core::{BasicMinifier, MinifyTask, PassthroughMinifier, TaskOptions};
    use serde_json::json;

    fn request_for(task: &MinifyTask) -> WireRequest {
        WireRequest::from_task(11, task)
    }

    #[test]
    fn test_execute_wire_replies_ok() {
        let task = MinifyTask::new("a.js", "let a = 1;\n");
        let reply = execute_wire(&PassthroughMinifier, &request_for(&task));
        match reply {
            WireReply::Ok { seq, output } => {
                assert_eq!(seq, 11);
                assert_eq!(output.code, "let a = 1;\n");
            }
            WireReply::Err { error, .. } => panic!("unexpected error: {error}"),
        }
    }

    #[test]
    fn test_execute_wire_transform_error() {
        let task = MinifyTask::new("a.js", "let a = 1;\n/* oops");
        let reply = execute_wire(&BasicMinifier, &request_for(&task));
        let (seq, result) = reply.into_result();
        assert_eq!(seq, 11);
        assert!(result.unwrap_err().is_transform());
    }

    #[test]
    fn test_free_identifier_fails_decode_naming_the_key() {
        // a raw function tag referencing an identifier that only existed
        // in the sender's scope
        let request = WireRequest {
            seq: 4,
            id: "a.js".to_string(),
            input: "let a = 1;\n".to_string(),
            options: json!({
                "warning_filter": "<Function||w| contains(w, prefix)>",
            }),
            input_source_map: None,
        };
        let reply = execute_wire(&PassthroughMinifier, &request);
        let (_, result) = reply.into_result();
        let error = result.unwrap_err();
        assert!(error.is_decode());
        let message = error.to_string();
        assert!(message.contains("warning_filter"), "got: {message}");
        assert!(message.contains("prefix"), "got: {message}");
    }

    #[test]
    fn test_options_with_task_options_shape_decode() {
        let task = MinifyTask::new("a.js", "debugger;\nlet a = 1;\n").with_options(
            TaskOptions::new()
                .with_warning_filter(compactor_core::Condition::Never),
        );
        let reply = execute_wire(&BasicMinifier, &request_for(&task));
        let (_, result) = reply.into_result();
        let output = result.unwrap();
        assert_eq!(output.code, "let a = 1;\n");
        assert!(output.warnings.is_empty());
    }
}
