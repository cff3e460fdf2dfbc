//! Builds the [`Document`] node model from the handler chain's token stream.
//!
//! In tolerant mode an end tag closes the nearest open element with the
//! same name (ignoring case), implicitly closing everything opened after it.
//! End tags with no open counterpart are kept as [`Node::UnmatchedEndTag`]
//! so they are written back unchanged. Strict mode reports a mismatched end
//! tag as [`ParseError::Unbalanced`] and a stray one as
//! [`ParseError::Malformed`].

use tracing::{debug, warn};

use crate::model::{is_void_element, Attribute, Document, Element, EndTag, Node};
use crate::token::{Token, TokenKind};
use crate::{Location, ParseError, ParseMode};

pub struct NodeModelBuilder {
    mode: ParseMode,
    root: Vec<Node>,
    open: Vec<Element>,
    starting: Option<Element>,
}

impl NodeModelBuilder {
    pub fn new(mode: ParseMode) -> Self {
        Self {
            mode,
            root: Vec::new(),
            open: Vec::new(),
            starting: None,
        }
    }

    pub fn handle(&mut self, token: Token) -> Result<(), ParseError> {
        let location = token.location;
        match token.kind {
            TokenKind::DocumentStart
            | TokenKind::DocumentEnd
            | TokenKind::PrototypeOnlyStart
            | TokenKind::PrototypeOnlyEnd => {}
            TokenKind::TagStart { name } => {
                let mut element = Element::new(name);
                element.location = location;
                self.starting = Some(element);
            }
            TokenKind::Attribute {
                leading,
                name,
                operator,
                value,
                quote,
            } => {
                let element = self.starting_element(location)?;
                element.attributes.push(Attribute {
                    leading,
                    name,
                    operator,
                    value,
                    quote,
                    location,
                });
            }
            TokenKind::TagStartEnd {
                trailing,
                self_closing,
            } => {
                let mut element = self.starting.take().ok_or_else(|| {
                    ParseError::malformed("start tag end without a start tag", location)
                })?;
                element.start_tag_trailing = trailing;
                element.self_closing = self_closing;
                if self_closing || is_void_element(&element.name) {
                    element.end_tag = EndTag::Void;
                    self.append(Node::Element(element));
                } else {
                    self.open.push(element);
                }
            }
            TokenKind::TagEnd { name } => self.close(&name, token.raw, location)?,
            TokenKind::Text { content } => self.append(Node::Text { content, location }),
            TokenKind::Comment { content, .. } => {
                self.append(Node::Comment { content, location })
            }
            TokenKind::CData { content } => self.append(Node::CData { content, location }),
            TokenKind::DocType { content } => self.append(Node::DocType { content, location }),
            TokenKind::ProcessingInstruction { content } => {
                self.append(Node::ProcessingInstruction { content, location })
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<Document, ParseError> {
        if let Some(element) = &self.starting {
            return Err(ParseError::malformed(
                format!("unterminated start tag <{}", element.name),
                element.location,
            ));
        }
        while let Some(mut element) = self.open.pop() {
            if self.mode == ParseMode::Strict {
                return Err(ParseError::Unbalanced {
                    expected: element.name,
                    found: None,
                    location: element.location,
                });
            }
            debug!(tag = %element.name, location = %element.location, "closing element at end of input");
            element.end_tag = EndTag::Implicit;
            self.append(Node::Element(element));
        }
        Ok(Document::new(self.root))
    }

    fn starting_element(&mut self, location: Location) -> Result<&mut Element, ParseError> {
        self.starting
            .as_mut()
            .ok_or_else(|| ParseError::malformed("attribute outside a start tag", location))
    }

    fn append(&mut self, node: Node) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.root.push(node),
        }
    }

    fn close(&mut self, name: &str, raw: String, location: Location) -> Result<(), ParseError> {
        if self.mode == ParseMode::Strict {
            return match self.open.last() {
                Some(top) if top.name == name => {
                    self.pop_into_parent(EndTag::Explicit(raw));
                    Ok(())
                }
                Some(top) => Err(ParseError::Unbalanced {
                    expected: top.name.clone(),
                    found: Some(name.to_string()),
                    location,
                }),
                None => Err(ParseError::malformed(
                    format!("end tag </{name}> has no matching start tag"),
                    location,
                )),
            };
        }

        let Some(index) = self.open.iter().rposition(|e| e.is_named(name)) else {
            warn!(tag = name, %location, "end tag has no open element");
            self.append(Node::UnmatchedEndTag { raw, location });
            return Ok(());
        };
        if self.open.len() > index + 1 {
            debug!(
                tag = name,
                closed = self.open.len() - index - 1,
                %location,
                "auto-closing open elements"
            );
        }
        while self.open.len() > index + 1 {
            self.pop_into_parent(EndTag::Implicit);
        }
        self.pop_into_parent(EndTag::Explicit(raw));
        Ok(())
    }

    fn pop_into_parent(&mut self, end_tag: EndTag) {
        if let Some(mut element) = self.open.pop() {
            element.end_tag = end_tag;
            self.append(Node::Element(element));
        }
    }
}
