//! The transform collaborator seam
//!
//! Minification itself is out of scope: it is reached through [`Minifier`]
//! and may be swapped for any implementation. Two reference
//! implementations ship here so the orchestration is usable and testable
//! end to end.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use compactor_codec::ConfigValue;

use crate::comments::scan_comments;

/// A transform failure for one task.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
    /// 1-based line in the input, when the transform knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 0-based column in the input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            col: None,
        }
    }

    pub fn with_position(mut self, line: u32, col: u32) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }
}

/// Everything one transform invocation sees.
#[derive(Debug)]
pub struct TransformRequest<'a> {
    pub id: &'a str,
    pub input: &'a str,
    /// Opaque options from the task's `minify` section.
    pub options: &'a ConfigValue,
    /// Whether the caller wants a source map back.
    pub source_map: bool,
    pub input_source_map: Option<&'a Value>,
}

/// What a transform produces.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub code: String,
    pub source_map: Option<String>,
    /// Raw warning lines; filtering happens upstream.
    pub warnings: Vec<String>,
}

/// The opaque minification collaborator.
///
/// Implementations run on blocking threads and inside worker processes,
/// so they must be `Send + Sync` and free of per-call shared state.
pub trait Minifier: Send + Sync {
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput, TransformError>;
}

/// Identity transform: returns the input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughMinifier;

impl Minifier for PassthroughMinifier {
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput, TransformError> {
        Ok(TransformOutput {
            code: request.input.to_string(),
            source_map: None,
            warnings: Vec::new(),
        })
    }
}

/// A deliberately simple minifier: drops comments (unless the `comments`
/// option is true), trims trailing whitespace, removes blank lines, and
/// drops `debugger` statements with a warning.
///
/// Rejects input with an unterminated block comment. Warning positions
/// refer to the comment-stripped text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMinifier;

impl Minifier for BasicMinifier {
    fn transform(&self, request: TransformRequest<'_>) -> Result<TransformOutput, TransformError> {
        let scan = scan_comments(request.input);
        if let Some((line, col)) = scan.unterminated {
            return Err(TransformError::new("unterminated block comment").with_position(line, col));
        }

        let keep_comments = request
            .options
            .get("comments")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);

        let mut stripped = String::with_capacity(request.input.len());
        if keep_comments {
            stripped.push_str(request.input);
        } else {
            let mut cursor = 0;
            for comment in &scan.comments {
                stripped.push_str(&request.input[cursor..comment.start]);
                cursor = comment.end;
            }
            stripped.push_str(&request.input[cursor..]);
        }

        let mut warnings = Vec::new();
        let mut lines = Vec::new();
        for (index, line) in stripped.lines().enumerate() {
            let kept = line.trim_end();
            let statement = kept.trim_start();
            if statement.is_empty() {
                continue;
            }
            if statement == "debugger;" || statement == "debugger" {
                let col = kept.len() - statement.len();
                warnings.push(format!(
                    "Dropping `debugger` statement [{}:{},{}]",
                    request.id,
                    index + 1,
                    col
                ));
                continue;
            }
            lines.push(kept);
        }

        let mut code = lines.join("\n");
        if !code.is_empty() {
            code.push('\n');
        }
        Ok(TransformOutput {
            code,
            source_map: None,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request<'a>(input: &'a str, options: &'a ConfigValue) -> TransformRequest<'a> {
        TransformRequest {
            id: "test.js",
            input,
            options,
            source_map: false,
            input_source_map: None,
        }
    }

    #[test]
    fn test_passthrough_returns_input() {
        let options = ConfigValue::empty_object();
        let out = PassthroughMinifier
            .transform(request("let a = 1;\n", &options))
            .unwrap();
        assert_eq!(out.code, "let a = 1;\n");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_basic_strips_comments_and_blank_lines() {
        let options = ConfigValue::empty_object();
        let input = "// header\nlet a = 1;   \n\n/* gone */let b = 2;\n";
        let out = BasicMinifier.transform(request(input, &options)).unwrap();
        assert_eq!(out.code, "let a = 1;\nlet b = 2;\n");
    }

    #[test]
    fn test_basic_keeps_comments_when_asked() {
        let options = ConfigValue::from_json(&json!({ "comments": true }));
        let input = "// header\nlet a = 1;\n";
        let out = BasicMinifier.transform(request(input, &options)).unwrap();
        assert_eq!(out.code, "// header\nlet a = 1;\n");
    }

    #[test]
    fn test_basic_drops_debugger_with_warning() {
        let options = ConfigValue::empty_object();
        let input = "let a = 1;\n  debugger;\nlet b = 2;\n";
        let out = BasicMinifier.transform(request(input, &options)).unwrap();
        assert_eq!(out.code, "let a = 1;\nlet b = 2;\n");
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("debugger"));
        assert!(out.warnings[0].contains("[test.js:2,2]"));
    }

    #[test]
    fn test_basic_rejects_unterminated_block_comment() {
        let options = ConfigValue::empty_object();
        let err = BasicMinifier
            .transform(request("let a = 1;\n/* oops", &options))
            .unwrap_err();
        assert_eq!(err.line, Some(2));
        assert_eq!(err.col, Some(0));
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_basic_is_deterministic() {
        let options = ConfigValue::empty_object();
        let input = "/* x */ let a = 1;\nlet b = a;\n";
        let first = BasicMinifier.transform(request(input, &options)).unwrap();
        let second = BasicMinifier.transform(request(input, &options)).unwrap();
        assert_eq!(first.code, second.code);
    }
}
