//! Streaming markup parsing for Verdant templates.
//!
//! The pipeline runs strictly in one direction:
//!
//! ```text
//! CharReader -> Tokenizer -> HandlerChain -> NodeModelBuilder -> Document
//! ```
//!
//! The tokenizer is HTML-tolerant by default (unquoted attributes, unclosed
//! tags, raw-text `script`/`style` bodies) and can be switched to a strict,
//! XML-like mode through [`ParseOptions`].

use std::io::Read;

use serde::Deserialize;
use thiserror::Error;

pub mod builder;
pub mod handler;
pub mod lexer;
pub mod model;
pub mod reader;
pub mod token;
pub mod writer;

pub use builder::NodeModelBuilder;
pub use handler::HandlerChain;
pub use lexer::Tokenizer;
pub use model::{Attribute, Document, Element, EndTag, Node, Quote};
pub use reader::CharReader;
pub use token::{CommentKind, Token, TokenKind};

// ============================================================================
// Location
// ============================================================================

/// Location in source text (line and column are 1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Location {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }

    /// Location of the first character of a document.
    pub fn start() -> Self {
        Self::new(1, 1, 0)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Tag-balance and quoting rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseMode {
    /// XML-like: balanced tags and double-quoted attribute values only.
    Strict,
    /// HTML-like: auto-closing, unquoted and single-quoted values.
    #[default]
    Tolerant,
}

/// What happens to `<!--/* ... */-->` and `<!--/*/ ... /*/-->` blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommentPolicy {
    /// Keep both forms as ordinary comments.
    KeepParserComments,
    /// Drop parser-level comments and unwrap prototype-only blocks.
    #[default]
    DiscardParserComments,
}

/// Options for a single parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParseOptions {
    pub mode: ParseMode,
    pub comment_policy: CommentPolicy,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self {
            mode: ParseMode::Strict,
            ..Self::default()
        }
    }

    pub fn tolerant() -> Self {
        Self::default()
    }

    pub fn with_comment_policy(mut self, comment_policy: CommentPolicy) -> Self {
        self.comment_policy = comment_policy;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.mode == ParseMode::Strict
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("I/O error while reading template: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed markup at {location}: {message}")]
    Malformed { message: String, location: Location },

    #[error("unbalanced markup at {location}: expected </{expected}>, found {}", describe_found(.found))]
    Unbalanced {
        expected: String,
        found: Option<String>,
        location: Location,
    },
}

fn describe_found(found: &Option<String>) -> String {
    match found {
        Some(name) => format!("</{name}>"),
        None => "end of input".to_string(),
    }
}

impl ParseError {
    pub(crate) fn malformed(message: impl Into<String>, location: Location) -> Self {
        ParseError::Malformed {
            message: message.into(),
            location,
        }
    }

    /// Source position the error points at, when it has one.
    pub fn location(&self) -> Option<Location> {
        match self {
            ParseError::Io(_) => None,
            ParseError::Malformed { location, .. } | ParseError::Unbalanced { location, .. } => {
                Some(*location)
            }
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a template source string into a node model.
pub fn parse(source: &str, options: &ParseOptions) -> Result<Document, ParseError> {
    parse_reader(source.as_bytes(), options)
}

/// Parse a template from any byte reader. The reader is pulled lazily.
pub fn parse_reader<R: Read>(reader: R, options: &ParseOptions) -> Result<Document, ParseError> {
    let tokenizer = Tokenizer::new(CharReader::new(reader), options.mode);
    let mut chain = HandlerChain::new(options);
    let mut builder = NodeModelBuilder::new(options.mode);

    for token in tokenizer {
        for token in chain.feed(token?)? {
            builder.handle(token)?;
        }
    }
    for token in chain.finish()? {
        builder.handle(token)?;
    }

    builder.finish()
}
