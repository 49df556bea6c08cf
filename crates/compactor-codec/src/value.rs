//! Tagged configuration trees
//!
//! Configuration crosses the process boundary as plain JSON. Pattern and
//! function values cannot: they are carried as tagged strings,
//! `<RegExp|{source}>` and `<Function|{source}>`, and rebuilt on the
//! receiving side. Encoding is total; decoding fails descriptively, naming
//! the option key that could not be reconstructed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::expr::{ExprError, PredicateExpr};
use crate::pattern::Pattern;

pub(crate) const PATTERN_TAG: &str = "RegExp";
pub(crate) const FUNCTION_TAG: &str = "Function";

/// Marker prefix for functions that have no transportable source.
const NATIVE_MARKER: &str = "[native";

/// Errors raised while rebuilding a configuration tree after transport.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A `<RegExp|…>` payload that does not compile.
    #[error("option `{key}` is tagged as a pattern but `{payload}` is not one: {source}")]
    NotAPattern {
        key: String,
        payload: String,
        #[source]
        source: regex::Error,
    },
    /// A `<Function|…>` payload that does not compile.
    #[error("option `{key}` is tagged as a function but does not compile as one: {source}")]
    NotAFunction {
        key: String,
        #[source]
        source: ExprError,
    },
    /// A function body referring to something outside its parameters.
    #[error(
        "option `{key}` refers to `{identifier}`, which is not a parameter; \
         values captured from the enclosing scope are not available after \
         crossing a process boundary"
    )]
    FreeIdentifier { key: String, identifier: String },
    /// A function body using a construct that cannot be transported.
    #[error("option `{key}` uses a construct that cannot cross a process boundary: {source}")]
    DisallowedConstruct {
        key: String,
        #[source]
        source: ExprError,
    },
    /// A host-process closure that carries no source text.
    #[error(
        "option `{key}` holds a function compiled in the host process; \
         it cannot be reconstructed after crossing a process boundary"
    )]
    NativeFunction { key: String },
    /// A value whose shape the option does not accept.
    #[error("option `{key}` expects {expected}, found {found}")]
    Unsupported {
        key: String,
        expected: &'static str,
        found: String,
    },
}

/// A host-process closure usable only on the sending side.
///
/// Convenient when the pool runs in-process; after transport it decodes to
/// [`DecodeError::NativeFunction`] because there is no source to rebuild
/// from.
#[derive(Clone)]
pub struct NativeFunction {
    label: String,
    func: Arc<dyn Fn(&[Value]) -> Value + Send + Sync>,
}

impl NativeFunction {
    pub fn new(
        label: impl Into<String>,
        func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            func: Arc::new(func),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// A function-valued configuration entry.
#[derive(Debug, Clone)]
pub enum FunctionValue {
    /// A compiled predicate expression; its source survives transport.
    Expr(PredicateExpr),
    /// A host-process closure; rejected after transport.
    Native(NativeFunction),
}

impl FunctionValue {
    /// Compile an expression-backed function from source text.
    pub fn expr(source: &str) -> Result<Self, ExprError> {
        PredicateExpr::compile(source).map(FunctionValue::Expr)
    }

    /// Wrap a host-process closure.
    pub fn native(
        label: impl Into<String>,
        func: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        FunctionValue::Native(NativeFunction::new(label, func))
    }

    /// Invoke with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value, ExprError> {
        match self {
            FunctionValue::Expr(expr) => expr.call(args),
            FunctionValue::Native(native) => Ok(native.call(args)),
        }
    }

    /// Invoke and require a boolean result.
    pub fn test(&self, args: &[Value]) -> Result<bool, ExprError> {
        match self {
            FunctionValue::Expr(expr) => expr.test(args),
            FunctionValue::Native(native) => crate::expr::expect_bool(&native.call(args)),
        }
    }

    /// The tagged transport form.
    pub fn to_tag(&self) -> String {
        match self {
            FunctionValue::Expr(expr) => format!("<{}|{}>", FUNCTION_TAG, expr.source()),
            FunctionValue::Native(native) => {
                format!("<{}|{} {}]>", FUNCTION_TAG, NATIVE_MARKER, native.label())
            }
        }
    }
}

impl PartialEq for FunctionValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FunctionValue::Expr(a), FunctionValue::Expr(b)) => a == b,
            (FunctionValue::Native(a), FunctionValue::Native(b)) => a.label == b.label,
            _ => false,
        }
    }
}

/// A configuration value tree.
///
/// Mirrors JSON, with two extra leaf kinds for the values JSON cannot
/// carry: compiled patterns and functions.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ConfigValue>),
    Object(BTreeMap<String, ConfigValue>),
    Pattern(Pattern),
    Function(FunctionValue),
}

impl ConfigValue {
    /// Compile a pattern leaf from source text.
    pub fn pattern(source: impl Into<String>) -> Result<Self, regex::Error> {
        Pattern::new(source).map(ConfigValue::Pattern)
    }

    /// Compile an expression-backed function leaf from source text.
    pub fn function(source: &str) -> Result<Self, ExprError> {
        FunctionValue::expr(source).map(ConfigValue::Function)
    }

    /// An empty object.
    pub fn empty_object() -> Self {
        ConfigValue::Object(BTreeMap::new())
    }

    /// Convert plain JSON structurally; strings stay strings, untagged.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(*b),
            Value::Number(n) => ConfigValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => ConfigValue::String(s.clone()),
            Value::Array(items) => {
                ConfigValue::Array(items.iter().map(ConfigValue::from_json).collect())
            }
            Value::Object(map) => ConfigValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), ConfigValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Field lookup on object values.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        match self {
            ConfigValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Human-readable kind name, used in shape errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "a boolean",
            ConfigValue::Number(_) => "a number",
            ConfigValue::String(_) => "a string",
            ConfigValue::Array(_) => "an array",
            ConfigValue::Object(_) => "an object",
            ConfigValue::Pattern(_) => "a pattern",
            ConfigValue::Function(_) => "a function",
        }
    }
}

/// Encode a configuration tree into its transport form.
///
/// Total: every tree encodes, including ones holding native functions.
/// Those carry a marker payload instead of source text and are rejected on
/// decode, which is where the failure belongs: the sending process can
/// still use them locally.
pub fn encode(value: &ConfigValue) -> Value {
    match value {
        ConfigValue::Null => Value::Null,
        ConfigValue::Bool(b) => Value::Bool(*b),
        ConfigValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        ConfigValue::String(s) => Value::String(s.clone()),
        ConfigValue::Array(items) => Value::Array(items.iter().map(encode).collect()),
        ConfigValue::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), encode(value)))
                .collect(),
        ),
        ConfigValue::Pattern(pattern) => Value::String(pattern.to_tag()),
        ConfigValue::Function(func) => Value::String(func.to_tag()),
    }
}

/// Decode a transported tree, rebuilding pattern and function leaves.
pub fn decode(value: &Value) -> Result<ConfigValue, DecodeError> {
    let mut path = Vec::new();
    decode_at(value, &mut path)
}

/// Render a key path the way callers wrote it: `minify.output.comments`,
/// array elements as `[2]`.
fn join_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn decode_at(value: &Value, path: &mut Vec<PathSegment>) -> Result<ConfigValue, DecodeError> {
    match value {
        Value::Null => Ok(ConfigValue::Null),
        Value::Bool(b) => Ok(ConfigValue::Bool(*b)),
        Value::Number(n) => Ok(ConfigValue::Number(n.as_f64().unwrap_or(0.0))),
        Value::String(s) => decode_string(s, path),
        Value::Array(items) => {
            let mut decoded = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                let result = decode_at(item, path);
                path.pop();
                decoded.push(result?);
            }
            Ok(ConfigValue::Array(decoded))
        }
        Value::Object(map) => {
            let mut decoded = BTreeMap::new();
            for (key, item) in map {
                path.push(PathSegment::Key(key.clone()));
                let result = decode_at(item, path);
                path.pop();
                decoded.insert(key.clone(), result?);
            }
            Ok(ConfigValue::Object(decoded))
        }
    }
}

fn decode_string(s: &str, path: &[PathSegment]) -> Result<ConfigValue, DecodeError> {
    let Some((kind, payload)) = parse_tag(s) else {
        return Ok(ConfigValue::String(s.to_string()));
    };
    match kind {
        PATTERN_TAG => Pattern::new(payload)
            .map(ConfigValue::Pattern)
            .map_err(|source| DecodeError::NotAPattern {
                key: join_path(path),
                payload: payload.to_string(),
                source,
            }),
        FUNCTION_TAG => {
            if payload.starts_with(NATIVE_MARKER) {
                return Err(DecodeError::NativeFunction {
                    key: join_path(path),
                });
            }
            match PredicateExpr::compile(payload) {
                Ok(expr) => Ok(ConfigValue::Function(FunctionValue::Expr(expr))),
                Err(ExprError::FreeIdentifier(identifier)) => Err(DecodeError::FreeIdentifier {
                    key: join_path(path),
                    identifier,
                }),
                Err(source @ (ExprError::Disallowed(_) | ExprError::NestedClosure)) => {
                    Err(DecodeError::DisallowedConstruct {
                        key: join_path(path),
                        source,
                    })
                }
                Err(source) => Err(DecodeError::NotAFunction {
                    key: join_path(path),
                    source,
                }),
            }
        }
        // Unrecognized tags pass through as ordinary strings.
        _ => Ok(ConfigValue::String(s.to_string())),
    }
}

/// Split `<Kind|payload>` into its parts. The payload may itself contain
/// `|` and `>`; only the first `|` delimits.
fn parse_tag(s: &str) -> Option<(&str, &str)> {
    let body = s.strip_prefix('<')?.strip_suffix('>')?;
    let (kind, payload) = body.split_once('|')?;
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(value: &ConfigValue) -> ConfigValue {
        decode(&encode(value)).unwrap()
    }

    #[test]
    fn test_plain_values_pass_through() {
        let tree = ConfigValue::from_json(&json!({
            "compress": true,
            "passes": 2,
            "label": "main",
            "list": [1, "two", null],
        }));
        assert_eq!(roundtrip(&tree), tree);
    }

    #[test]
    fn test_pattern_roundtrip_preserves_matching() {
        let tree = ConfigValue::pattern("foo").unwrap();
        let encoded = encode(&tree);
        assert_eq!(encoded, json!("<RegExp|foo>"));
        match roundtrip(&tree) {
            ConfigValue::Pattern(pattern) => assert!(pattern.is_match("foo bar")),
            other => panic!("expected a pattern, got {other:?}"),
        }
    }

    #[test]
    fn test_function_roundtrip_is_callable() {
        let tree = ConfigValue::function("|c| contains(c, 'x')").unwrap();
        match roundtrip(&tree) {
            ConfigValue::Function(func) => {
                assert!(func.test(&[json!("box")]).unwrap());
                assert!(!func.test(&[json!("bin")]).unwrap());
            }
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_tags_decode_in_place() {
        let mut inner = BTreeMap::new();
        inner.insert(
            "comments".to_string(),
            ConfigValue::pattern("@license").unwrap(),
        );
        let mut outer = BTreeMap::new();
        outer.insert("output".to_string(), ConfigValue::Object(inner));
        let tree = ConfigValue::Object(outer);
        assert_eq!(roundtrip(&tree), tree);
    }

    #[test]
    fn test_bad_pattern_names_the_key() {
        let encoded = json!({ "output": { "comments": "<RegExp|(unclosed>" } });
        let err = decode(&encoded).unwrap_err();
        match err {
            DecodeError::NotAPattern { key, .. } => assert_eq!(key, "output.comments"),
            other => panic!("expected NotAPattern, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_function_names_the_key() {
        let encoded = json!({ "filter": "<Function|not an expression at all ###>" });
        let err = decode(&encoded).unwrap_err();
        match err {
            DecodeError::NotAFunction { key, .. } => assert_eq!(key, "filter"),
            other => panic!("expected NotAFunction, got {other:?}"),
        }
    }

    #[test]
    fn test_free_identifier_names_key_and_identifier() {
        let encoded = json!({ "filter": "<Function||c| c == captured>" });
        let err = decode(&encoded).unwrap_err();
        match err {
            DecodeError::FreeIdentifier { key, identifier } => {
                assert_eq!(key, "filter");
                assert_eq!(identifier, "captured");
            }
            other => panic!("expected FreeIdentifier, got {other:?}"),
        }
        let message = decode(&encoded).unwrap_err().to_string();
        assert!(message.contains("process boundary"), "message: {message}");
    }

    #[test]
    fn test_array_index_in_key_path() {
        let encoded = json!({ "rules": ["ok", "<RegExp|(bad>"] });
        let err = decode(&encoded).unwrap_err();
        match err {
            DecodeError::NotAPattern { key, .. } => assert_eq!(key, "rules[1]"),
            other => panic!("expected NotAPattern, got {other:?}"),
        }
    }

    #[test]
    fn test_native_function_encodes_but_refuses_decode() {
        let tree = ConfigValue::Function(FunctionValue::native("always", |_| json!(true)));
        let encoded = encode(&tree);
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, DecodeError::NativeFunction { key } if key.is_empty()));
    }

    #[test]
    fn test_unknown_tag_stays_a_string() {
        let decoded = decode(&json!("<Widget|whatever>")).unwrap();
        assert_eq!(decoded, ConfigValue::String("<Widget|whatever>".to_string()));
    }

    #[test]
    fn test_untagged_angle_string_stays_a_string() {
        let decoded = decode(&json!("<div>")).unwrap();
        assert_eq!(decoded, ConfigValue::String("<div>".to_string()));
    }

    #[test]
    fn test_disallowed_construct_reported() {
        let encoded = json!({ "cond": "<Function||c| eval(c)>" });
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, DecodeError::DisallowedConstruct { key, .. } if key == "cond"));
    }
}
