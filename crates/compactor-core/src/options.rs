//! Task configuration
//!
//! The original option surface is permissive: the same option may hold a
//! boolean, a keyword, a pattern, or a function. Shapes are normalized
//! once, at construction or decode, into [`Condition`], so the hot path
//! evaluates one interface.

use serde_json::Value;

use compactor_codec::{
    decode, encode, ConfigValue, DecodeError, ExprError, FunctionValue, Pattern,
};

use crate::comments::{has_annotation_marker, is_annotated, Comment};
use crate::error::Result;

/// A normalized match condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Matches nothing.
    Never,
    /// Matches everything.
    Always,
    /// Matches conventional license annotations: block comments opening
    /// with `!` or mentioning `@preserve`, `@license`, `@cc_on`.
    Annotated,
    /// Matches when the pattern matches the text.
    Pattern(Pattern),
    /// Matches when the function returns true.
    Func(FunctionValue),
}

impl Condition {
    /// Compile a pattern condition from source text.
    pub fn pattern(source: impl Into<String>) -> Result<Self> {
        Ok(Condition::Pattern(Pattern::new(source)?))
    }

    /// Compile an expression condition, e.g. `|comment| comment.line < 10`.
    pub fn expr(source: &str) -> Result<Self> {
        Ok(Condition::Func(FunctionValue::expr(source)?))
    }

    /// Wrap a host-process closure. Works in-process; rejected with a
    /// decode error if the task is sent to a worker process.
    pub fn native(
        label: impl Into<String>,
        func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Condition::Func(FunctionValue::native(label, func))
    }

    /// Normalize the accepted option shapes: booleans, the `"all"` and
    /// `"some"` keywords, pattern source strings, patterns, functions.
    pub(crate) fn from_config(value: &ConfigValue, key: &str) -> std::result::Result<Self, DecodeError> {
        match value {
            ConfigValue::Null | ConfigValue::Bool(false) => Ok(Condition::Never),
            ConfigValue::Bool(true) => Ok(Condition::Always),
            ConfigValue::String(s) if s == "all" => Ok(Condition::Always),
            ConfigValue::String(s) if s == "some" => Ok(Condition::Annotated),
            ConfigValue::String(s) => Pattern::new(s.as_str())
                .map(Condition::Pattern)
                .map_err(|source| DecodeError::NotAPattern {
                    key: key.to_string(),
                    payload: s.clone(),
                    source,
                }),
            ConfigValue::Pattern(pattern) => Ok(Condition::Pattern(pattern.clone())),
            ConfigValue::Function(func) => Ok(Condition::Func(func.clone())),
            other => Err(DecodeError::Unsupported {
                key: key.to_string(),
                expected: "a boolean, string, pattern, or function",
                found: other.kind_name().to_string(),
            }),
        }
    }

    /// The transport form this condition round-trips through.
    pub(crate) fn to_config(&self) -> Value {
        match self {
            Condition::Never => Value::Bool(false),
            Condition::Always => Value::Bool(true),
            Condition::Annotated => Value::String("some".to_string()),
            Condition::Pattern(pattern) => Value::String(pattern.to_tag()),
            Condition::Func(func) => Value::String(func.to_tag()),
        }
    }

    /// Apply to a scanned comment. Function conditions see the comment as
    /// an object: `kind`, `text`, `line`, `col`, `start`, `end`.
    pub fn matches_comment(&self, comment: &Comment) -> std::result::Result<bool, ExprError> {
        match self {
            Condition::Never => Ok(false),
            Condition::Always => Ok(true),
            Condition::Annotated => Ok(is_annotated(comment)),
            Condition::Pattern(pattern) => Ok(pattern.is_match(&comment.text)),
            Condition::Func(func) => {
                let context = serde_json::to_value(comment).unwrap_or(Value::Null);
                func.test(&[context])
            }
        }
    }

    /// Apply to a plain text line such as a warning message.
    pub fn matches_text(&self, text: &str) -> std::result::Result<bool, ExprError> {
        match self {
            Condition::Never => Ok(false),
            Condition::Always => Ok(true),
            Condition::Annotated => Ok(has_annotation_marker(text)),
            Condition::Pattern(pattern) => Ok(pattern.is_match(text)),
            Condition::Func(func) => func.test(&[Value::String(text.to_string())]),
        }
    }
}

/// Default artifact filename template for extracted comments.
pub const DEFAULT_EXTRACT_FILENAME: &str = "{file}.LICENSE";

/// Banner prepended to the main artifact when comments were extracted.
#[derive(Debug, Clone, PartialEq)]
pub enum Banner {
    Off,
    /// `/*! For license information please see <artifact> */`
    Default,
    /// Custom message; `{file}` expands to the artifact filename.
    Template(String),
}

/// Extraction policy details.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub condition: Condition,
    /// Artifact filename template; `{file}` expands to the task id.
    pub filename: String,
    pub banner: Banner,
}

impl ExtractOptions {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            filename: DEFAULT_EXTRACT_FILENAME.to_string(),
            banner: Banner::Default,
        }
    }

    pub fn with_filename(mut self, template: impl Into<String>) -> Self {
        self.filename = template.into();
        self
    }

    pub fn with_banner(mut self, banner: Banner) -> Self {
        self.banner = banner;
        self
    }

    pub fn resolve_filename(&self, id: &str) -> String {
        self.filename.replace("{file}", id)
    }

    pub fn resolve_banner(&self, comments_file: &str) -> Option<String> {
        match &self.banner {
            Banner::Off => None,
            Banner::Default => Some(format!(
                "/*! For license information please see {comments_file} */"
            )),
            Banner::Template(template) => {
                Some(format!("/*! {} */", template.replace("{file}", comments_file)))
            }
        }
    }
}

/// Whether and how to extract matching comments into a side artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractComments {
    Off,
    On(ExtractOptions),
}

impl ExtractComments {
    /// Extract the conventional license annotations.
    pub fn annotated() -> Self {
        ExtractComments::On(ExtractOptions::new(Condition::Annotated))
    }

    pub fn with_condition(condition: Condition) -> Self {
        ExtractComments::On(ExtractOptions::new(condition))
    }

    pub(crate) fn from_config(
        value: Option<&ConfigValue>,
        key: &str,
    ) -> std::result::Result<Self, DecodeError> {
        let Some(value) = value else {
            return Ok(ExtractComments::Off);
        };
        match value {
            ConfigValue::Null | ConfigValue::Bool(false) => Ok(ExtractComments::Off),
            ConfigValue::Bool(true) => Ok(ExtractComments::annotated()),
            ConfigValue::Object(map) => {
                let condition = match map.get("condition") {
                    Some(v) => Condition::from_config(v, &format!("{key}.condition"))?,
                    None => Condition::Annotated,
                };
                let mut options = ExtractOptions::new(condition);
                if let Some(v) = map.get("filename") {
                    options.filename = v
                        .as_str()
                        .ok_or_else(|| DecodeError::Unsupported {
                            key: format!("{key}.filename"),
                            expected: "a string",
                            found: v.kind_name().to_string(),
                        })?
                        .to_string();
                }
                options.banner = match map.get("banner") {
                    None | Some(ConfigValue::Bool(true)) => Banner::Default,
                    Some(ConfigValue::Bool(false)) => Banner::Off,
                    Some(ConfigValue::String(s)) => Banner::Template(s.clone()),
                    Some(other) => {
                        return Err(DecodeError::Unsupported {
                            key: format!("{key}.banner"),
                            expected: "a boolean or string",
                            found: other.kind_name().to_string(),
                        })
                    }
                };
                Ok(ExtractComments::On(options))
            }
            other => Condition::from_config(other, key)
                .map(|condition| ExtractComments::On(ExtractOptions::new(condition))),
        }
    }

    pub(crate) fn to_config(&self) -> Value {
        match self {
            ExtractComments::Off => Value::Bool(false),
            ExtractComments::On(options) => {
                let mut map = serde_json::Map::new();
                map.insert("condition".to_string(), options.condition.to_config());
                map.insert("filename".to_string(), Value::String(options.filename.clone()));
                let banner = match &options.banner {
                    Banner::Off => Value::Bool(false),
                    Banner::Default => Value::Bool(true),
                    Banner::Template(template) => Value::String(template.clone()),
                };
                map.insert("banner".to_string(), banner);
                Value::Object(map)
            }
        }
    }
}

/// Structured configuration carried by each task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOptions {
    /// Opaque options handed straight to the transform collaborator.
    pub minify: ConfigValue,
    pub extract_comments: ExtractComments,
    /// Optional predicate applied to each warning the transform reports;
    /// warnings it rejects are dropped.
    pub warning_filter: Option<Condition>,
    /// Ask the transform for a source map.
    pub source_map: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            minify: ConfigValue::empty_object(),
            extract_comments: ExtractComments::Off,
            warning_filter: None,
            source_map: false,
        }
    }
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_minify(mut self, minify: ConfigValue) -> Self {
        self.minify = minify;
        self
    }

    pub fn with_extract_comments(mut self, extract: ExtractComments) -> Self {
        self.extract_comments = extract;
        self
    }

    pub fn with_warning_filter(mut self, filter: Condition) -> Self {
        self.warning_filter = Some(filter);
        self
    }

    pub fn with_source_map(mut self, source_map: bool) -> Self {
        self.source_map = source_map;
        self
    }

    /// Encode into the transport form. Total; lossy only for native
    /// closures, which fail on the decode side.
    pub fn encode(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("minify".to_string(), encode(&self.minify));
        map.insert("extract_comments".to_string(), self.extract_comments.to_config());
        if let Some(filter) = &self.warning_filter {
            map.insert("warning_filter".to_string(), filter.to_config());
        }
        map.insert("source_map".to_string(), Value::Bool(self.source_map));
        Value::Object(map)
    }

    /// Rebuild from the transport form, compiling pattern and function
    /// values back to life. Errors name the offending option key.
    pub fn decode(value: &Value) -> std::result::Result<Self, DecodeError> {
        let tree = decode(value)?;
        let minify = tree
            .get("minify")
            .cloned()
            .unwrap_or_else(ConfigValue::empty_object);
        let extract_comments =
            ExtractComments::from_config(tree.get("extract_comments"), "extract_comments")?;
        let warning_filter = match tree.get("warning_filter") {
            None | Some(ConfigValue::Null) => None,
            Some(v) => Some(Condition::from_config(v, "warning_filter")?),
        };
        let source_map = tree
            .get("source_map")
            .and_then(ConfigValue::as_bool)
            .unwrap_or(false);
        Ok(Self {
            minify,
            extract_comments,
            warning_filter,
            source_map,
        })
    }
}
