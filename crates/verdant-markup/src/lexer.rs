//! Hand-written, HTML-tolerant markup tokenizer.
//!
//! Produces a lazy, single-pass sequence of tokens from a [`CharReader`]:
//!
//! - Text mode accumulates characters until something that opens markup.
//! - Tags are split into `TagStart`, one `Attribute` per attribute, and
//!   `TagStartEnd`, each token keeping its raw source text.
//! - `script`/`style` bodies are raw text in tolerant mode.
//!
//! Comment close markers match greedy-shortest: the first close marker ends
//! the construct, so `<!--/* a <!--/* b */--> c */-->` ends after `b`.

use std::collections::VecDeque;
use std::io::Read;

use crate::model::{is_raw_text_element, Quote};
use crate::reader::CharReader;
use crate::token::{CommentKind, Token, TokenKind};
use crate::{Location, ParseError, ParseMode};

const COMMENT_START: &str = "<!--";
const COMMENT_END: &str = "-->";
const PARSER_LEVEL_COMMENT_START: &str = "<!--/*";
const PARSER_LEVEL_COMMENT_END: &str = "*/-->";
const PROTOTYPE_ONLY_START: &str = "<!--/*/";
const PROTOTYPE_ONLY_END: &str = "/*/-->";
const CDATA_START: &str = "<![CDATA[";
const CDATA_END: &str = "]]>";
const DOCTYPE_START: &str = "<!DOCTYPE";

/// Tokenize a source string eagerly.
pub fn tokenize(source: &str, mode: ParseMode) -> Result<Vec<Token>, ParseError> {
    Tokenizer::new(CharReader::new(source.as_bytes()), mode).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Running,
    Done,
}

pub struct Tokenizer<R> {
    reader: CharReader<R>,
    mode: ParseMode,
    pending: VecDeque<Token>,
    state: State,
    raw_text_element: Option<String>,
    prototype_block: Option<Location>,
}

impl<R: Read> Tokenizer<R> {
    pub fn new(reader: CharReader<R>, mode: ParseMode) -> Self {
        Self {
            reader,
            mode,
            pending: VecDeque::new(),
            state: State::Start,
            raw_text_element: None,
            prototype_block: None,
        }
    }

    fn strict(&self) -> bool {
        self.mode == ParseMode::Strict
    }

    fn emit(&mut self, kind: TokenKind, raw: impl Into<String>, location: Location) {
        self.pending.push_back(Token::new(kind, raw, location));
    }

    /// Scan the next construct, pushing one or more tokens.
    fn scan(&mut self) -> Result<(), ParseError> {
        if let Some(name) = self.raw_text_element.take() {
            return self.scan_raw_text(&name);
        }

        let location = self.reader.location();
        if self.reader.peek(0)?.is_none() {
            if let Some(start) = self.prototype_block {
                return Err(ParseError::malformed(
                    "unterminated prototype-only comment block",
                    start,
                ));
            }
            self.emit(TokenKind::DocumentEnd, "", location);
            self.state = State::Done;
            return Ok(());
        }

        if self.prototype_block.is_some() && self.reader.looking_at(PROTOTYPE_ONLY_END)? {
            self.reader.skip(PROTOTYPE_ONLY_END.len())?;
            self.prototype_block = None;
            self.emit(TokenKind::PrototypeOnlyEnd, PROTOTYPE_ONLY_END, location);
            return Ok(());
        }

        if self.starts_markup()? {
            self.scan_markup(location)
        } else {
            self.scan_text(location)
        }
    }

    /// Whether the reader sits on a `<` that opens a markup construct.
    fn starts_markup(&mut self) -> Result<bool, ParseError> {
        if self.reader.peek(0)? != Some('<') {
            return Ok(false);
        }
        Ok(match self.reader.peek(1)? {
            Some('!') => {
                self.reader.looking_at(COMMENT_START)?
                    || self.reader.looking_at(CDATA_START)?
                    || self.reader.looking_at_ignore_case(DOCTYPE_START)?
            }
            Some('?') => true,
            Some('/') => matches!(self.reader.peek(2)?, Some(c) if c.is_alphabetic()),
            Some(c) => c.is_alphabetic(),
            None => false,
        })
    }

    fn scan_text(&mut self, location: Location) -> Result<(), ParseError> {
        let mut text = String::new();
        // The first character is known not to open markup.
        if let Some(ch) = self.reader.read()? {
            text.push(ch);
        }
        while self.reader.peek(0)?.is_some() {
            if self.starts_markup()? {
                break;
            }
            if self.prototype_block.is_some() && self.reader.looking_at(PROTOTYPE_ONLY_END)? {
                break;
            }
            if let Some(ch) = self.reader.read()? {
                text.push(ch);
            }
        }
        self.pending.push_back(Token::text(text, location));
        Ok(())
    }

    fn scan_raw_text(&mut self, name: &str) -> Result<(), ParseError> {
        let location = self.reader.location();
        let close = format!("</{name}");
        let mut text = String::new();
        loop {
            if self.reader.looking_at_ignore_case(&close)? {
                let after = self.reader.peek(close.chars().count())?;
                if matches!(after, None | Some('>' | '/')) || after.is_some_and(char::is_whitespace)
                {
                    break;
                }
            }
            match self.reader.read()? {
                Some(ch) => text.push(ch),
                None => break,
            }
        }
        if !text.is_empty() {
            self.pending.push_back(Token::text(text, location));
        }
        Ok(())
    }

    fn scan_markup(&mut self, location: Location) -> Result<(), ParseError> {
        if self.reader.looking_at(PROTOTYPE_ONLY_START)? {
            if self.prototype_block.is_some() {
                return Err(ParseError::malformed(
                    "nested prototype-only comment blocks are not supported",
                    location,
                ));
            }
            self.reader.skip(PROTOTYPE_ONLY_START.len())?;
            self.prototype_block = Some(location);
            self.emit(TokenKind::PrototypeOnlyStart, PROTOTYPE_ONLY_START, location);
            return Ok(());
        }

        if self.reader.looking_at(PARSER_LEVEL_COMMENT_START)? {
            self.reader.skip(PARSER_LEVEL_COMMENT_START.len())?;
            let content = self
                .reader
                .read_until(PARSER_LEVEL_COMMENT_END)?
                .ok_or_else(|| ParseError::malformed("unterminated parser-level comment", location))?;
            let raw = format!("{PARSER_LEVEL_COMMENT_START}{content}{PARSER_LEVEL_COMMENT_END}");
            let kind = TokenKind::Comment {
                kind: CommentKind::ParserLevel,
                content,
            };
            self.emit(kind, raw, location);
            return Ok(());
        }

        if self.reader.looking_at(COMMENT_START)? {
            self.reader.skip(COMMENT_START.len())?;
            let content = self
                .reader
                .read_until(COMMENT_END)?
                .ok_or_else(|| ParseError::malformed("unterminated comment", location))?;
            let raw = format!("{COMMENT_START}{content}{COMMENT_END}");
            let kind = TokenKind::Comment {
                kind: CommentKind::Normal,
                content,
            };
            self.emit(kind, raw, location);
            return Ok(());
        }

        if self.reader.looking_at(CDATA_START)? {
            self.reader.skip(CDATA_START.len())?;
            let content = self
                .reader
                .read_until(CDATA_END)?
                .ok_or_else(|| ParseError::malformed("unterminated CDATA section", location))?;
            let raw = format!("{CDATA_START}{content}{CDATA_END}");
            self.emit(TokenKind::CData { content }, raw, location);
            return Ok(());
        }

        if self.reader.looking_at_ignore_case(DOCTYPE_START)? {
            self.reader.skip(2)?;
            let content = self
                .reader
                .read_until(">")?
                .ok_or_else(|| ParseError::malformed("unterminated DOCTYPE", location))?;
            let raw = format!("<!{content}>");
            self.emit(TokenKind::DocType { content }, raw, location);
            return Ok(());
        }

        if self.reader.looking_at("<?")? {
            self.reader.skip(2)?;
            let content = self.reader.read_until("?>")?.ok_or_else(|| {
                ParseError::malformed("unterminated processing instruction", location)
            })?;
            let raw = format!("<?{content}?>");
            self.emit(TokenKind::ProcessingInstruction { content }, raw, location);
            return Ok(());
        }

        if self.reader.looking_at("</")? {
            return self.scan_end_tag(location);
        }

        self.scan_start_tag(location)
    }

    fn scan_end_tag(&mut self, location: Location) -> Result<(), ParseError> {
        self.reader.skip(2)?;
        let name = self.reader.read_while(is_tag_name_char)?;
        let rest = self
            .reader
            .read_until(">")?
            .ok_or_else(|| ParseError::malformed(format!("unterminated end tag </{name}"), location))?;
        if self.strict() && !rest.chars().all(char::is_whitespace) {
            return Err(ParseError::malformed(
                format!("unexpected content in end tag </{name}"),
                location,
            ));
        }
        let raw = format!("</{name}{rest}>");
        self.emit(TokenKind::TagEnd { name }, raw, location);
        Ok(())
    }

    fn scan_start_tag(&mut self, location: Location) -> Result<(), ParseError> {
        self.reader.skip(1)?;
        let name = self.reader.read_while(is_tag_name_char)?;
        let raw = format!("<{name}");
        self.emit(TokenKind::TagStart { name: name.clone() }, raw, location);

        let mut leading = String::new();
        loop {
            let attribute_location = self.reader.location();
            leading.push_str(&self.reader.read_while(char::is_whitespace)?);
            match self.reader.peek(0)? {
                None => {
                    return Err(ParseError::malformed(
                        format!("unterminated start tag <{name}"),
                        location,
                    ));
                }
                Some('>') => {
                    self.reader.skip(1)?;
                    let raw = format!("{leading}>");
                    let kind = TokenKind::TagStartEnd {
                        trailing: leading,
                        self_closing: false,
                    };
                    self.emit(kind, raw, attribute_location);
                    if !self.strict() && is_raw_text_element(&name) {
                        self.raw_text_element = Some(name);
                    }
                    return Ok(());
                }
                Some('/') if self.reader.peek(1)? == Some('>') => {
                    self.reader.skip(2)?;
                    let raw = format!("{leading}/>");
                    let kind = TokenKind::TagStartEnd {
                        trailing: leading,
                        self_closing: true,
                    };
                    self.emit(kind, raw, attribute_location);
                    return Ok(());
                }
                Some('/') if !self.strict() => {
                    // A stray slash between attributes reads as spacing.
                    self.reader.skip(1)?;
                    leading.push('/');
                }
                Some(_) => {
                    if leading.is_empty() && self.strict() {
                        return Err(ParseError::malformed(
                            "attributes must be separated by whitespace",
                            attribute_location,
                        ));
                    }
                    let leading = std::mem::take(&mut leading);
                    self.scan_attribute(leading, attribute_location, location)?;
                }
            }
        }
    }

    fn scan_attribute(
        &mut self,
        leading: String,
        location: Location,
        tag_location: Location,
    ) -> Result<(), ParseError> {
        let mut name = self.reader.read_while(is_attribute_name_char)?;
        if name.is_empty() {
            if self.strict() {
                return Err(ParseError::malformed("expected attribute name", location));
            }
            if let Some(ch) = self.reader.read()? {
                name.push(ch);
            }
        }

        // Whitespace before a missing `=` belongs to the next attribute, so
        // only look at it here.
        let mut spaces = 0;
        while self.reader.peek(spaces)?.is_some_and(char::is_whitespace) {
            spaces += 1;
        }
        if self.reader.peek(spaces)? != Some('=') {
            let raw = format!("{leading}{name}");
            let kind = TokenKind::Attribute {
                leading,
                name,
                operator: String::new(),
                value: None,
                quote: Quote::None,
            };
            self.emit(kind, raw, location);
            return Ok(());
        }
        let before_equals = self.reader.read_while(char::is_whitespace)?;
        self.reader.skip(1)?;
        let after_equals = self.reader.read_while(char::is_whitespace)?;
        let operator = format!("{before_equals}={after_equals}");

        let (value, quote) = match self.reader.peek(0)? {
            None => {
                return Err(ParseError::malformed(
                    format!("unterminated attribute {name}"),
                    tag_location,
                ));
            }
            Some('"') => {
                self.reader.skip(1)?;
                let value = self.reader.read_until("\"")?.ok_or_else(|| {
                    ParseError::malformed(
                        format!("unterminated value of attribute {name}"),
                        tag_location,
                    )
                })?;
                (value, Quote::Double)
            }
            Some(_) if self.strict() => {
                return Err(ParseError::malformed(
                    format!("value of attribute {name} must be double-quoted in strict mode"),
                    location,
                ));
            }
            Some('\'') => {
                self.reader.skip(1)?;
                let value = self.reader.read_until("'")?.ok_or_else(|| {
                    ParseError::malformed(
                        format!("unterminated value of attribute {name}"),
                        tag_location,
                    )
                })?;
                (value, Quote::Single)
            }
            Some(_) => {
                let value = self
                    .reader
                    .read_while(|c| !c.is_whitespace() && c != '>')?;
                (value, Quote::Unquoted)
            }
        };

        let raw = match quote {
            Quote::Double => format!("{leading}{name}{operator}\"{value}\""),
            Quote::Single => format!("{leading}{name}{operator}'{value}'"),
            _ => format!("{leading}{name}{operator}{value}"),
        };
        let kind = TokenKind::Attribute {
            leading,
            name,
            operator,
            value: Some(value),
            quote,
        };
        self.emit(kind, raw, location);
        Ok(())
    }
}

impl<R: Read> Iterator for Tokenizer<R> {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }
            match self.state {
                State::Done => return None,
                State::Start => {
                    self.state = State::Running;
                    return Some(Ok(Token::new(
                        TokenKind::DocumentStart,
                        "",
                        Location::start(),
                    )));
                }
                State::Running => {
                    if let Err(e) = self.scan() {
                        self.state = State::Done;
                        self.pending.clear();
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

fn is_tag_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '>' | '/' | '<')
}

fn is_attribute_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '=' | '>' | '/' | '"' | '\'' | '<')
}
