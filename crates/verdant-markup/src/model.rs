//! In-memory node model of a parsed template.
//!
//! The model keeps everything needed to write the document back out
//! byte-for-byte: attribute spacing and quoting, the raw text of end tags,
//! and whether an element was closed explicitly, implicitly, or not at all.
//! Text content is stored as markup (entities are not decoded).

use crate::Location;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements that never have children or an end tag.
pub fn is_void_element(name: &str) -> bool {
    VOID_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

/// Elements whose body is raw text, not markup (HTML mode only).
pub fn is_raw_text_element(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.iter().any(|v| v.eq_ignore_ascii_case(name))
}

// ============================================================================
// Document
// ============================================================================

/// Root of a parsed template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub children: Vec<Node>,
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self { children }
    }

    /// Depth-first iterator over every element in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        let mut stack: Vec<&Node> = self.children.iter().rev().collect();
        std::iter::from_fn(move || {
            while let Some(node) = stack.pop() {
                if let Node::Element(element) = node {
                    stack.extend(element.children.iter().rev());
                    return Some(element);
                }
            }
            None
        })
    }
}

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text { content: String, location: Location },
    Comment { content: String, location: Location },
    CData { content: String, location: Location },
    DocType { content: String, location: Location },
    ProcessingInstruction { content: String, location: Location },
    /// End tag with no open element, kept as written (tolerant mode only).
    UnmatchedEndTag { raw: String, location: Location },
}

impl Node {
    /// A text node holding already-escaped markup.
    pub fn text(content: impl Into<String>) -> Self {
        Node::Text {
            content: content.into(),
            location: Location::default(),
        }
    }

    pub fn location(&self) -> Location {
        match self {
            Node::Element(e) => e.location,
            Node::Text { location, .. }
            | Node::Comment { location, .. }
            | Node::CData { location, .. }
            | Node::DocType { location, .. }
            | Node::ProcessingInstruction { location, .. }
            | Node::UnmatchedEndTag { location, .. } => *location,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is a text node with nothing but whitespace.
    pub fn is_whitespace(&self) -> bool {
        matches!(self, Node::Text { content, .. } if content.trim().is_empty())
    }
}

/// How an element's end tag appeared in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndTag {
    /// Written out, e.g. `</div >`; holds the raw text.
    Explicit(String),
    /// Closed by tolerant auto-closing or end of input; nothing is written.
    Implicit,
    /// Self-closing or void element.
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Whitespace between the last attribute and `>` or `/>`.
    pub start_tag_trailing: String,
    pub self_closing: bool,
    pub end_tag: EndTag,
    pub location: Location,
}

impl Element {
    /// A new element with an explicit end tag.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let void = is_void_element(&name);
        Self {
            end_tag: if void {
                EndTag::Void
            } else {
                EndTag::Explicit(format!("</{name}>"))
            },
            name,
            attributes: Vec::new(),
            children: Vec::new(),
            start_tag_trailing: String::new(),
            self_closing: false,
            location: Location::default(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.append_child(child);
        self
    }

    /// Case-insensitive element name comparison.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Raw (still escaped) value of an attribute. Valueless attributes
    /// yield an empty string.
    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        self.attribute(name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    /// Set an attribute to an already-escaped value, keeping its position
    /// and quoting when it exists.
    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(attribute) => attribute.set_value(value),
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        let index = self
            .attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))?;
        Some(self.attributes.remove(index))
    }

    pub fn append_child(&mut self, child: Node) {
        self.open_body();
        self.children.push(child);
    }

    /// Replace all children.
    pub fn set_children(&mut self, children: Vec<Node>) {
        if !children.is_empty() {
            self.open_body();
        }
        self.children = children;
    }

    /// Replace all children with one text node of already-escaped markup.
    pub fn set_text(&mut self, content: impl Into<String>) {
        self.set_children(vec![Node::text(content)]);
    }

    /// A self-closing non-void element needs a real end tag once it gains
    /// children.
    fn open_body(&mut self) {
        if self.end_tag == EndTag::Void && !is_void_element(&self.name) {
            self.self_closing = false;
            self.end_tag = EndTag::Explicit(format!("</{}>", self.name));
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

/// Quoting style of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    Double,
    Single,
    Unquoted,
    /// No value at all (`<input disabled>`).
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Whitespace before the name.
    pub leading: String,
    pub name: String,
    /// The `=` with any surrounding spaces; empty when there is no value.
    pub operator: String,
    pub value: Option<String>,
    pub quote: Quote,
    pub location: Location,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            leading: " ".to_string(),
            name: name.into(),
            operator: "=".to_string(),
            value: Some(value.into()),
            quote: Quote::Double,
            location: Location::default(),
        }
    }

    /// Set an already-escaped value. Valueless or unquoted attributes switch
    /// to double quotes so any value is safe.
    pub fn set_value(&mut self, value: &str) {
        if matches!(self.quote, Quote::None | Quote::Unquoted) {
            self.quote = Quote::Double;
        }
        if self.operator.is_empty() {
            self.operator = "=".to_string();
        }
        self.value = Some(value.to_string());
    }

    /// Value with the basic character references decoded.
    pub fn decoded_value(&self) -> String {
        decode_entities(self.value.as_deref().unwrap_or(""))
    }
}

const ENTITIES: &[(&str, char)] = &[
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&#39;", '\''),
    ("&apos;", '\''),
];

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity));
        match decoded {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
