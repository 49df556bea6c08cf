//! Pattern-valued configuration entries

use std::fmt;

use regex::Regex;

/// A compiled pattern plus the source text it was built from.
///
/// The source is what travels across a process boundary; the compiled
/// regex is rebuilt on the receiving side.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern from its source text.
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        let regex = Regex::new(&source)?;
        Ok(Self { source, regex })
    }

    /// The source text the pattern was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Test whether the pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// The tagged transport form, e.g. `<RegExp|\.js$>`.
    pub fn to_tag(&self) -> String {
        format!("<{}|{}>", crate::value::PATTERN_TAG, self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
