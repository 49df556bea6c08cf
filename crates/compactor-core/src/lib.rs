//! Compactor Core - Task model for distributed source minification
//!
//! Defines the minification task and its options, the comment scanner used
//! for license extraction, the transform trait implemented by minifier
//! backends, and the error types shared across the workspace.

pub mod comments;
pub mod error;
pub mod options;
pub mod outcome;
pub mod task;
pub mod transform;

pub use comments::{is_annotated, scan_comments, Comment, CommentKind, CommentScan};
pub use error::{CompactorError, Result, TaskError, TaskErrorKind};
pub use options::{Banner, Condition, ExtractComments, ExtractOptions, TaskOptions};
pub use outcome::{ExtractedComments, TaskOutput, Warning};
pub use task::{is_source_map, MinifyTask, TaskId};
pub use transform::{
    BasicMinifier, Minifier, PassthroughMinifier, TransformError, TransformOutput,
    TransformRequest,
};
