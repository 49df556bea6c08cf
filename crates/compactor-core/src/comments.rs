//! Comment scanning
//!
//! A lightweight lexer that finds line and block comments in source text
//! while skipping string literals. Regular-expression literals are not
//! specially handled.

use serde::Serialize;

/// Comment flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentKind {
    Line,
    Block,
}

/// One comment found in the source.
///
/// Serializes to the context object predicate expressions evaluate
/// against: `kind`, `text`, `line`, `col`, `start`, `end`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comment {
    pub kind: CommentKind,
    /// Text between the delimiters, e.g. `! banner` for `/*! banner */`.
    pub text: String,
    /// 1-based line of the opening delimiter.
    pub line: u32,
    /// 0-based column of the opening delimiter.
    pub col: u32,
    /// Byte offset of the opening delimiter.
    pub start: usize,
    /// Byte offset just past the closing delimiter.
    pub end: usize,
}

/// Everything a scan produces.
#[derive(Debug, Clone, Default)]
pub struct CommentScan {
    pub comments: Vec<Comment>,
    /// Position of a block comment the source never closes.
    pub unterminated: Option<(u32, u32)>,
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: u32,
    col: u32,
}

impl Scanner<'_> {
    fn bump(&mut self) -> Option<(usize, char)> {
        let item = self.chars.next();
        if let Some((_, c)) = item {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        item
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }
}

/// Scan `source` for comments.
pub fn scan_comments(source: &str) -> CommentScan {
    let mut scan = CommentScan::default();
    let mut s = Scanner {
        chars: source.char_indices().peekable(),
        line: 1,
        col: 0,
    };

    loop {
        let line = s.line;
        let col = s.col;
        let Some((idx, c)) = s.bump() else { break };
        match c {
            '"' | '\'' | '`' => {
                // String literal: comment markers inside are not comments.
                while let Some((_, sc)) = s.bump() {
                    if sc == '\\' {
                        s.bump();
                    } else if sc == c {
                        break;
                    }
                }
            }
            '/' if s.peek() == Some('/') => {
                s.bump();
                let text_start = idx + 2;
                let mut end = source.len();
                while let Some(&(nidx, nc)) = s.chars.peek() {
                    if nc == '\n' {
                        end = nidx;
                        break;
                    }
                    s.bump();
                }
                scan.comments.push(Comment {
                    kind: CommentKind::Line,
                    text: source[text_start..end].to_string(),
                    line,
                    col,
                    start: idx,
                    end,
                });
            }
            '/' if s.peek() == Some('*') => {
                s.bump();
                let text_start = idx + 2;
                let mut text_end = source.len();
                let mut end = source.len();
                let mut closed = false;
                while let Some((nidx, nc)) = s.bump() {
                    if nc == '*' {
                        if let Some(&(slash_idx, '/')) = s.chars.peek() {
                            s.bump();
                            text_end = nidx;
                            end = slash_idx + 1;
                            closed = true;
                            break;
                        }
                    }
                }
                if !closed {
                    scan.unterminated = Some((line, col));
                }
                scan.comments.push(Comment {
                    kind: CommentKind::Block,
                    text: source[text_start..text_end].to_string(),
                    line,
                    col,
                    start: idx,
                    end,
                });
            }
            _ => {}
        }
    }

    scan
}

/// Whether text mentions one of the conventional preservation markers.
pub(crate) fn has_annotation_marker(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["@preserve", "@license", "@cc_on"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// The conventional license-annotation test: block comments opening with
/// `!` or mentioning `@preserve`, `@license`, or `@cc_on`.
pub fn is_annotated(comment: &Comment) -> bool {
    comment.kind == CommentKind::Block
        && (comment.text.trim_start_matches('*').starts_with('!')
            || has_annotation_marker(&comment.text))
}
