//! Structural directives returned by processors.

use crate::value::Value;
use verdant_markup::Node;

/// What the dispatch engine does with the current element after a
/// processor ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Run the next matching processor on the same element.
    Continue,
    /// Drop the element and everything in it.
    RemoveNode,
    /// Keep the element, drop its children, skip remaining processors.
    RemoveBody,
    /// Splice a fragment in place of the element. Each root of the fragment
    /// is processed as if it had never been visited.
    ReplaceNode(Vec<Node>),
    /// Emit one clone of the element per item, each processed in its own
    /// scope with `binding` and a status variable bound.
    Iterate {
        items: Vec<Value>,
        binding: String,
        /// Status variable name; defaults to `<binding>Stat`.
        status: Option<String>,
    },
    /// Keep running processors, but emit the children unprocessed.
    SkipChildren,
    /// Stop processing the whole template.
    HaltTemplate { early_exit: bool },
}

impl Directive {
    pub fn iterate(items: Vec<Value>, binding: impl Into<String>) -> Self {
        Directive::Iterate {
            items,
            binding: binding.into(),
            status: None,
        }
    }
}

/// Loop status bound next to each iteration item.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStatus {
    pub index: usize,
    pub size: usize,
    pub current: Value,
}

impl IterationStatus {
    pub fn count(&self) -> usize {
        self.index + 1
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.size
    }

    /// Even and odd follow the 1-based count.
    pub fn is_even(&self) -> bool {
        self.count() % 2 == 0
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("index", Value::from(self.index)),
            ("count", Value::from(self.count())),
            ("size", Value::from(self.size)),
            ("current", self.current.clone()),
            ("first", Value::Bool(self.is_first())),
            ("last", Value::Bool(self.is_last())),
            ("even", Value::Bool(self.is_even())),
            ("odd", Value::Bool(!self.is_even())),
        ])
    }
}
