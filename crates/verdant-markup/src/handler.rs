//! Handler chain between the tokenizer and the node model builder.
//!
//! Each stage receives tokens one at a time and may forward, transform,
//! suppress, or inject tokens for the next stage. Stages are composed once
//! per parse in a fixed order:
//!
//! 1. prototype-only marker stripper
//! 2. parser-level comment discarder
//! 3. text coalescer (joins text split by removed comments)
//! 4. structure validator (strict mode only)
//!
//! All state is local to one chain, so concurrent parses never interact.

use crate::model::is_void_element;
use crate::token::{CommentKind, Token, TokenKind};
use crate::{CommentPolicy, Location, ParseError, ParseOptions};

pub struct HandlerChain {
    stages: Vec<Stage>,
}

impl HandlerChain {
    pub fn new(options: &ParseOptions) -> Self {
        let mut stages = vec![
            Stage::PrototypeMarkers(PrototypeMarkerStripper::new(options.comment_policy)),
            Stage::ParserComments(ParserCommentDiscarder::new(options.comment_policy)),
            Stage::TextCoalescer(TextCoalescer::default()),
        ];
        if options.is_strict() {
            stages.push(Stage::StructureValidator(StructureValidator::default()));
        }
        Self { stages }
    }

    /// Push one token through every stage, returning what reaches the end.
    pub fn feed(&mut self, token: Token) -> Result<Vec<Token>, ParseError> {
        let mut batch = vec![token];
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(batch.len());
            for token in batch {
                stage.feed(token, &mut next)?;
            }
            batch = next;
        }
        Ok(batch)
    }

    /// Flush tokens still held by stages.
    pub fn finish(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut batch = Vec::new();
        for stage in &mut self.stages {
            let mut next = Vec::with_capacity(batch.len());
            for token in batch {
                stage.feed(token, &mut next)?;
            }
            stage.finish(&mut next)?;
            batch = next;
        }
        Ok(batch)
    }
}

enum Stage {
    PrototypeMarkers(PrototypeMarkerStripper),
    ParserComments(ParserCommentDiscarder),
    TextCoalescer(TextCoalescer),
    StructureValidator(StructureValidator),
}

impl Stage {
    fn feed(&mut self, token: Token, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match self {
            Stage::PrototypeMarkers(s) => s.feed(token, out),
            Stage::ParserComments(s) => {
                s.feed(token, out);
                Ok(())
            }
            Stage::TextCoalescer(s) => {
                s.feed(token, out);
                Ok(())
            }
            Stage::StructureValidator(s) => s.feed(token, out),
        }
    }

    fn finish(&mut self, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match self {
            Stage::PrototypeMarkers(s) => s.finish(),
            Stage::TextCoalescer(s) => {
                s.flush(out);
                Ok(())
            }
            Stage::ParserComments(_) | Stage::StructureValidator(_) => Ok(()),
        }
    }
}

// ============================================================================
// Prototype-only markers
// ============================================================================

/// Unwraps `<!--/*/ ... /*/-->` so the wrapped markup is live, or folds the
/// whole block back into one comment when parser comments are kept.
struct PrototypeMarkerStripper {
    policy: CommentPolicy,
    block: Option<(Location, String)>,
}

impl PrototypeMarkerStripper {
    fn new(policy: CommentPolicy) -> Self {
        Self {
            policy,
            block: None,
        }
    }

    fn feed(&mut self, token: Token, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match self.policy {
            CommentPolicy::DiscardParserComments => {
                if !matches!(
                    token.kind,
                    TokenKind::PrototypeOnlyStart | TokenKind::PrototypeOnlyEnd
                ) {
                    out.push(token);
                }
            }
            CommentPolicy::KeepParserComments => match (&token.kind, self.block.as_mut()) {
                (TokenKind::PrototypeOnlyStart, None) => {
                    self.block = Some((token.location, token.raw));
                }
                (TokenKind::PrototypeOnlyEnd, Some(_)) => {
                    if let Some((location, mut raw)) = self.block.take() {
                        raw.push_str(&token.raw);
                        let content = raw["<!--".len()..raw.len() - "-->".len()].to_string();
                        let kind = TokenKind::Comment {
                            kind: CommentKind::Normal,
                            content,
                        };
                        out.push(Token::new(kind, raw, location));
                    }
                }
                (_, Some((_, raw))) => raw.push_str(&token.raw),
                (_, None) => out.push(token),
            },
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        match self.block.take() {
            Some((location, _)) => Err(ParseError::malformed(
                "unterminated prototype-only comment block",
                location,
            )),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Parser-level comments
// ============================================================================

struct ParserCommentDiscarder {
    policy: CommentPolicy,
}

impl ParserCommentDiscarder {
    fn new(policy: CommentPolicy) -> Self {
        Self { policy }
    }

    fn feed(&mut self, token: Token, out: &mut Vec<Token>) {
        let TokenKind::Comment {
            kind: CommentKind::ParserLevel,
            content,
        } = &token.kind
        else {
            out.push(token);
            return;
        };

        if self.policy == CommentPolicy::KeepParserComments {
            let kind = TokenKind::Comment {
                kind: CommentKind::Normal,
                content: format!("/*{content}*/"),
            };
            out.push(Token::new(kind, token.raw, token.location));
        }
    }
}

// ============================================================================
// Text coalescing
// ============================================================================

#[derive(Default)]
struct TextCoalescer {
    pending: Option<Token>,
}

impl TextCoalescer {
    fn feed(&mut self, token: Token, out: &mut Vec<Token>) {
        let TokenKind::Text { content } = &token.kind else {
            self.flush(out);
            out.push(token);
            return;
        };

        match self.pending.as_mut() {
            Some(pending) => {
                if let TokenKind::Text { content: existing } = &mut pending.kind {
                    existing.push_str(content);
                }
                pending.raw.push_str(&token.raw);
            }
            None => self.pending = Some(token),
        }
    }

    fn flush(&mut self, out: &mut Vec<Token>) {
        if let Some(token) = self.pending.take() {
            out.push(token);
        }
    }
}

// ============================================================================
// Structure validation (strict mode)
// ============================================================================

/// Rejects overlapping or mismatched end tags and unclosed elements.
#[derive(Default)]
struct StructureValidator {
    open: Vec<String>,
    starting: Option<String>,
}

impl StructureValidator {
    fn feed(&mut self, token: Token, out: &mut Vec<Token>) -> Result<(), ParseError> {
        match &token.kind {
            TokenKind::TagStart { name } => self.starting = Some(name.clone()),
            TokenKind::TagStartEnd { self_closing, .. } => {
                if let Some(name) = self.starting.take() {
                    if !self_closing && !is_void_element(&name) {
                        self.open.push(name);
                    }
                }
            }
            TokenKind::TagEnd { name } => match self.open.last() {
                Some(expected) if expected == name => {
                    self.open.pop();
                }
                Some(expected) => {
                    return Err(ParseError::Unbalanced {
                        expected: expected.clone(),
                        found: Some(name.clone()),
                        location: token.location,
                    });
                }
                None => {
                    return Err(ParseError::malformed(
                        format!("end tag </{name}> has no matching start tag"),
                        token.location,
                    ));
                }
            },
            TokenKind::DocumentEnd => {
                if let Some(expected) = self.open.last() {
                    return Err(ParseError::Unbalanced {
                        expected: expected.clone(),
                        found: None,
                        location: token.location,
                    });
                }
            }
            _ => {}
        }
        out.push(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::ParseMode;

    fn run(source: &str, options: ParseOptions) -> Result<Vec<Token>, ParseError> {
        let mut chain = HandlerChain::new(&options);
        let mut out = Vec::new();
        for token in tokenize(source, options.mode)? {
            out.extend(chain.feed(token)?);
        }
        out.extend(chain.finish()?);
        Ok(out)
    }

    fn raw(tokens: &[Token]) -> String {
        tokens.iter().map(|t| t.raw.as_str()).collect()
    }

    #[test]
    fn test_parser_comment_discarded_and_text_joined() {
        let tokens = run("a<!--/* hidden */-->b", ParseOptions::default()).unwrap();
        let texts: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).filter(|k| matches!(k, TokenKind::Text { .. })).collect();
        assert_eq!(
            texts,
            vec![&TokenKind::Text {
                content: "ab".to_string()
            }]
        );
    }

    #[test]
    fn test_parser_comment_kept_by_policy() {
        let options =
            ParseOptions::default().with_comment_policy(CommentPolicy::KeepParserComments);
        let source = "a<!--/* kept */-->b";
        let tokens = run(source, options).unwrap();
        assert_eq!(raw(&tokens), source);
        assert!(tokens.iter().any(|t| t.kind
            == TokenKind::Comment {
                kind: CommentKind::Normal,
                content: "/* kept */".to_string()
            }));
    }

    #[test]
    fn test_prototype_block_unwrapped() {
        let tokens = run("<!--/*/ <p>live</p> /*/-->", ParseOptions::default()).unwrap();
        assert_eq!(raw(&tokens), " <p>live</p> ");
    }

    #[test]
    fn test_prototype_block_folded_when_kept() {
        let options =
            ParseOptions::default().with_comment_policy(CommentPolicy::KeepParserComments);
        let source = "x<!--/*/ <p>live</p> /*/-->y";
        let tokens = run(source, options).unwrap();
        assert_eq!(raw(&tokens), source);
        assert_eq!(
            tokens[2].kind,
            TokenKind::Comment {
                kind: CommentKind::Normal,
                content: "/*/ <p>live</p> /*/".to_string()
            }
        );
    }

    #[test]
    fn test_validator_rejects_overlap() {
        let err = run("<div><span>text</div>", ParseOptions::strict()).unwrap_err();
        match err {
            ParseError::Unbalanced {
                expected, found, ..
            } => {
                assert_eq!(expected, "span");
                assert_eq!(found.as_deref(), Some("div"));
            }
            other => panic!("expected unbalanced markup, got {other:?}"),
        }
    }

    #[test]
    fn test_validator_rejects_unclosed_at_end() {
        let err = run("<div>", ParseOptions::strict()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Unbalanced { found: None, .. }
        ));
    }

    #[test]
    fn test_validator_allows_void_and_self_closing() {
        assert!(run("<p><br><img src=\"x\"/><x/></p>", ParseOptions::strict()).is_ok());
    }

    #[test]
    fn test_validator_absent_in_tolerant_mode() {
        let options = ParseOptions {
            mode: ParseMode::Tolerant,
            ..ParseOptions::default()
        };
        assert!(run("<div><span>text</div>", options).is_ok());
    }
}
