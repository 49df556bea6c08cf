//! Task identity and construction

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::options::TaskOptions;

/// Stable task identifier, typically the asset's output path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One unit of work: input text plus the configuration to transform it.
///
/// Immutable once submitted to a batch.
#[derive(Debug, Clone)]
pub struct MinifyTask {
    pub id: TaskId,
    pub input: String,
    pub options: TaskOptions,
    /// Validated input source map, forwarded to the transform.
    pub input_source_map: Option<Value>,
}

impl MinifyTask {
    pub fn new(id: impl Into<TaskId>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            options: TaskOptions::default(),
            input_source_map: None,
        }
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach an input source map. Values that do not look like source
    /// maps are dropped with a warning rather than forwarded.
    pub fn with_input_source_map(mut self, map: Value) -> Self {
        if is_source_map(&map) {
            self.input_source_map = Some(map);
        } else {
            warn!(task = %self.id, "ignoring input source map with unexpected shape");
        }
        self
    }
}

/// Minimal shape check for a user-supplied source map: `version`,
/// `sources`, and `mappings` with the expected types.
pub fn is_source_map(value: &Value) -> bool {
    value.get("version").is_some_and(Value::is_number)
        && value.get("sources").is_some_and(Value::is_array)
        && value.get("mappings").is_some_and(Value::is_string)
}
