//! Serializes the node model back to markup.
//!
//! A document that went through the parser unmodified serializes to exactly
//! its source text (minus removed parser-level comments and prototype-only
//! markers).

use std::fmt::{self, Write};
use std::io;

use crate::model::{Attribute, Document, Element, EndTag, Node, Quote};

impl Document {
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = write_nodes(&mut out, &self.children);
        out
    }

    /// Serialize into any byte sink.
    pub fn write_to<W: io::Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(self.to_markup().as_bytes())
    }
}

impl Node {
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        let _ = write_node(&mut out, self);
        out
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_nodes(f, &self.children)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(f, self)
    }
}

pub fn write_nodes<W: Write>(out: &mut W, nodes: &[Node]) -> fmt::Result {
    for node in nodes {
        write_node(out, node)?;
    }
    Ok(())
}

pub fn write_node<W: Write>(out: &mut W, node: &Node) -> fmt::Result {
    match node {
        Node::Element(element) => write_element(out, element),
        Node::Text { content, .. } => out.write_str(content),
        Node::Comment { content, .. } => write!(out, "<!--{content}-->"),
        Node::CData { content, .. } => write!(out, "<![CDATA[{content}]]>"),
        Node::DocType { content, .. } => write!(out, "<!{content}>"),
        Node::ProcessingInstruction { content, .. } => write!(out, "<?{content}?>"),
        Node::UnmatchedEndTag { raw, .. } => out.write_str(raw),
    }
}

fn write_element<W: Write>(out: &mut W, element: &Element) -> fmt::Result {
    write_start_tag(out, element)?;
    write_nodes(out, &element.children)?;
    match &element.end_tag {
        EndTag::Explicit(raw) => out.write_str(raw),
        EndTag::Implicit | EndTag::Void => Ok(()),
    }
}

fn write_start_tag<W: Write>(out: &mut W, element: &Element) -> fmt::Result {
    write!(out, "<{}", element.name)?;
    for attribute in &element.attributes {
        write_attribute(out, attribute)?;
    }
    out.write_str(&element.start_tag_trailing)?;
    if element.self_closing {
        out.write_str("/>")
    } else {
        out.write_char('>')
    }
}

fn write_attribute<W: Write>(out: &mut W, attribute: &Attribute) -> fmt::Result {
    write!(out, "{}{}", attribute.leading, attribute.name)?;
    let Some(value) = &attribute.value else {
        return Ok(());
    };
    out.write_str(&attribute.operator)?;
    match attribute.quote {
        Quote::Double => write!(out, "\"{value}\""),
        Quote::Single => write!(out, "'{value}'"),
        Quote::Unquoted | Quote::None => out.write_str(value),
    }
}
