//! Task execution shared by worker processes and the in-process pool
//!
//! Comment extraction runs against the original input before the
//! transform sees it, then warnings are filtered on the way out. Both
//! strategies call this routine, so zero-worker and multi-worker runs
//! behave alike.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use compactor_core::{
    scan_comments, ExtractComments, ExtractedComments, Minifier, TaskError, TaskId, TaskOptions,
    TaskOutput, TransformRequest, Warning,
};

/// Run one task against a minifier. Errors are always attributable to
/// this task; nothing here is fatal for the pool.
pub fn execute(
    minifier: &dyn Minifier,
    id: &TaskId,
    input: &str,
    options: &TaskOptions,
    input_source_map: Option<&Value>,
) -> Result<TaskOutput, TaskError> {
    let extracted = extract_comments(id, input, &options.extract_comments)?;

    let request = TransformRequest {
        id: id.as_str(),
        input,
        options: &options.minify,
        source_map: options.source_map,
        input_source_map,
    };
    let transformed = minifier
        .transform(request)
        .map_err(|e| TaskError::transform(id.clone(), e))?;

    let mut warnings = Vec::new();
    for message in transformed.warnings {
        let keep = match &options.warning_filter {
            Some(filter) => filter
                .matches_text(&message)
                .map_err(|e| TaskError::predicate(id.clone(), "warning_filter", &e))?,
            None => true,
        };
        if keep {
            warnings.push(Warning::new(message));
        }
    }

    let mut output = TaskOutput::new(transformed.code);
    output.source_map = transformed.source_map;
    output.warnings = warnings;
    output.extracted = extracted;
    Ok(output)
}

/// Collect comments matching the extraction condition into one side
/// artifact. Duplicate comment text is kept once, in first-seen order.
fn extract_comments(
    id: &TaskId,
    input: &str,
    extract: &ExtractComments,
) -> Result<Vec<ExtractedComments>, TaskError> {
    let ExtractComments::On(options) = extract else {
        return Ok(Vec::new());
    };

    let scan = scan_comments(input);
    let mut seen = HashSet::new();
    let mut texts = Vec::new();
    for comment in &scan.comments {
        let matched = options
            .condition
            .matches_comment(comment)
            .map_err(|e| TaskError::predicate(id.clone(), "extract_comments.condition", &e))?;
        if !matched {
            continue;
        }
        let text = input[comment.start..comment.end].to_string();
        if seen.insert(text.clone()) {
            texts.push(text);
        }
    }
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let filename = options.resolve_filename(id.as_str());
    let banner = options.resolve_banner(&filename);
    debug!(task = %id, count = texts.len(), file = %filename, "extracted comments");
    Ok(vec![ExtractedComments {
        filename,
        banner,
        text: texts.join("\n\n"),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use compactor_core::{BasicMinifier, Condition, PassthroughMinifier, TaskErrorKind};
    use serde_json::json;

    fn run(options: TaskOptions, input: &str) -> Result<TaskOutput, TaskError> {
        execute(
            &BasicMinifier,
            &TaskId::new("app.min.js"),
            input,
            &options,
            None,
        )
    }

    #[test]
    fn test_no_extraction_by_default() {
        let output = run(TaskOptions::default(), "/*! banner */ let a = 1;\n").unwrap();
        assert!(output.extracted.is_empty());
        assert_eq!(output.code, " let a = 1;\n");
    }

    #[test]
    fn test_annotated_extraction_with_default_template() {
        let input = "/*! keep me */\n/* drop me */\nlet a = 1;\n/* @license MIT */\n";
        let options = TaskOptions::new().with_extract_comments(ExtractComments::annotated());
        let output = run(options, input).unwrap();

        assert_eq!(output.extracted.len(), 1);
        let artifact = &output.extracted[0];
        assert_eq!(artifact.filename, "app.min.js.LICENSE");
        assert_eq!(
            artifact.banner.as_deref(),
            Some("/*! For license information please see app.min.js.LICENSE */")
        );
        assert_eq!(artifact.text, "/*! keep me */\n\n/* @license MIT */");
    }

    #[test]
    fn test_duplicate_comments_extracted_once() {
        let input = "/*! same */\nlet a = 1;\n/*! same */\n";
        let options = TaskOptions::new().with_extract_comments(ExtractComments::annotated());
        let output = run(options, input).unwrap();
        assert_eq!(output.extracted[0].text, "/*! same */");
    }

    #[test]
    fn test_pattern_extraction_condition() {
        let input = "/* (c) 2026 Example */\n/* internal */\nlet a = 1;\n";
        let options = TaskOptions::new().with_extract_comments(ExtractComments::with_condition(
            Condition::pattern(r"\(c\)").unwrap(),
        ));
        let output = run(options, input).unwrap();
        assert_eq!(output.extracted[0].text, "/* (c) 2026 Example */");
    }

    #[test]
    fn test_condition_eval_error_names_option_key() {
        // len() returns a number, so using it as the whole condition fails
        // when the first comment is tested
        let options = TaskOptions::new().with_extract_comments(ExtractComments::with_condition(
            Condition::expr("|c| len(c.text)").unwrap(),
        ));
        let err = run(options, "/* x */ let a = 1;\n").unwrap_err();
        assert!(matches!(err.kind, TaskErrorKind::Decode { .. }));
        assert!(err.to_string().contains("extract_comments.condition"));
        assert!(err.to_string().contains("app.min.js"));
    }

    #[test]
    fn test_warning_filter_drops_non_matching() {
        let input = "debugger;\nlet a = 1;\n";
        let unfiltered = run(TaskOptions::default(), input).unwrap();
        assert_eq!(unfiltered.warnings.len(), 1);

        let keep_none = TaskOptions::new().with_warning_filter(Condition::Never);
        assert!(run(keep_none, input).unwrap().warnings.is_empty());

        let keep_matching = TaskOptions::new()
            .with_warning_filter(Condition::pattern("debugger").unwrap());
        assert_eq!(run(keep_matching, input).unwrap().warnings.len(), 1);
    }

    #[test]
    fn test_expr_warning_filter_sees_message_text() {
        let input = "debugger;\nlet a = 1;\n";
        let options = TaskOptions::new()
            .with_warning_filter(Condition::expr("|w| starts_with(w, 'Dropping')").unwrap());
        assert_eq!(run(options, input).unwrap().warnings.len(), 1);
    }

    #[test]
    fn test_transform_error_keeps_position() {
        let err = run(TaskOptions::default(), "let a = 1;\n/* oops").unwrap_err();
        assert!(err.is_transform());
        assert_eq!(err.to_string(), "unterminated block comment [app.min.js:2,0]");
    }

    #[test]
    fn test_passthrough_with_source_map_request() {
        let options = TaskOptions::new().with_source_map(true);
        let output = execute(
            &PassthroughMinifier,
            &TaskId::new("a.js"),
            "let a = 1;\n",
            &options,
            Some(&json!({ "version": 3, "sources": ["a.ts"], "mappings": "AAAA" })),
        )
        .unwrap();
        assert_eq!(output.code, "let a = 1;\n");
        assert!(output.source_map.is_none());
    }
}
