//! Wire protocol between the pool and worker processes
//!
//! One JSON object per line in each direction. Requests carry a pool-wide
//! sequence number and replies echo it back, so a worker may hold several
//! requests in flight and answer them in any order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use compactor_core::{MinifyTask, TaskError, TaskOutput};

/// One dispatched task, as a line on the worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRequest {
    pub seq: u64,
    pub id: String,
    pub input: String,
    /// Task options in transport form.
    pub options: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source_map: Option<Value>,
}

impl WireRequest {
    /// Encode a task for transport. Total; option values that cannot
    /// survive the boundary fail on the worker's decode, not here.
    pub fn from_task(seq: u64, task: &MinifyTask) -> Self {
        Self {
            seq,
            id: task.id.as_str().to_string(),
            input: task.input.clone(),
            options: task.options.encode(),
            input_source_map: task.input_source_map.clone(),
        }
    }
}

/// One outcome, as a line on the worker's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WireReply {
    Ok { seq: u64, output: TaskOutput },
    Err { seq: u64, error: TaskError },
}

impl WireReply {
    pub fn seq(&self) -> u64 {
        match self {
            WireReply::Ok { seq, .. } | WireReply::Err { seq, .. } => *seq,
        }
    }

    pub fn into_result(self) -> (u64, Result<TaskOutput, TaskError>) {
        match self {
            WireReply::Ok { seq, output } => (seq, Ok(output)),
            WireReply::Err { seq, error } => (seq, Err(error)),
        }
    }
}
