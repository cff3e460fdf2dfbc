//! Token types produced by the markup tokenizer.

use crate::model::Quote;
use crate::Location;

/// Which comment form a `<!-- ... -->` token was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    /// `<!-- ... -->`
    Normal,
    /// `<!--/* ... */-->`, never reaches the output unless kept by policy.
    ParserLevel,
}

/// Token kinds, each carrying the parsed pieces of its construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    DocumentStart,
    DocumentEnd,
    /// `<name`; attributes and the closing `>` follow as separate tokens.
    TagStart { name: String },
    Attribute {
        leading: String,
        name: String,
        operator: String,
        value: Option<String>,
        quote: Quote,
    },
    /// `>` or `/>` finishing a start tag, with the whitespace before it.
    TagStartEnd { trailing: String, self_closing: bool },
    /// `</name>`
    TagEnd { name: String },
    Text { content: String },
    Comment { kind: CommentKind, content: String },
    CData { content: String },
    DocType { content: String },
    ProcessingInstruction { content: String },
    /// `<!--/*/` opening a prototype-only block.
    PrototypeOnlyStart,
    /// `/*/-->` closing a prototype-only block.
    PrototypeOnlyEnd,
}

/// A token with its exact source text and where it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub location: Location,
}

impl Token {
    pub fn new(kind: TokenKind, raw: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            raw: raw.into(),
            location,
        }
    }

    pub fn text(content: impl Into<String>, location: Location) -> Self {
        let content = content.into();
        Self::new(
            TokenKind::Text {
                content: content.clone(),
            },
            content,
            location,
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, TokenKind::Text { .. })
    }
}
