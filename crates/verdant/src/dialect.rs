//! Dialects, processors, and the frozen registry the engine dispatches from.
//!
//! A processor pairs a match rule with a handler function. A dialect groups
//! processors under a prefix: an attribute rule `text` in a dialect with
//! prefix `th` matches `th:text` and `data-th-text`; an element rule `block`
//! matches `<th:block>`.
//!
//! The registry orders processors by dialect precedence, then processor
//! precedence, then registration order. Two processors with the same
//! precedences and the same match rule are rejected when the registry is
//! built.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use verdant_markup::{Attribute, Element};

use crate::context::Context;
use crate::directive::Directive;
use crate::error::{EngineError, Result};
use crate::expression::ExpressionEvaluator;
use crate::value::Value;

pub type ProcessorFn = dyn Fn(&mut ProcessorCall<'_>) -> Result<Directive> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchRule {
    Attribute(String),
    Element(String),
}

/// A unit of logic matched against elements.
#[derive(Clone)]
pub struct Processor {
    name: String,
    rule: MatchRule,
    precedence: i32,
    handler: Arc<ProcessorFn>,
}

impl Processor {
    pub fn new(
        name: impl Into<String>,
        rule: MatchRule,
        precedence: i32,
        handler: impl Fn(&mut ProcessorCall<'_>) -> Result<Directive> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            rule,
            precedence,
            handler: Arc::new(handler),
        }
    }

    /// A processor matching the attribute `name` (named after it).
    pub fn attribute(
        name: &str,
        precedence: i32,
        handler: impl Fn(&mut ProcessorCall<'_>) -> Result<Directive> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MatchRule::Attribute(name.to_string()), precedence, handler)
    }

    /// A processor matching elements named `name` (named after it).
    pub fn element(
        name: &str,
        precedence: i32,
        handler: impl Fn(&mut ProcessorCall<'_>) -> Result<Directive> + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, MatchRule::Element(name.to_string()), precedence, handler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    pub(crate) fn execute(&self, call: &mut ProcessorCall<'_>) -> Result<Directive> {
        (self.handler)(call)
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("rule", &self.rule)
            .field("precedence", &self.precedence)
            .finish_non_exhaustive()
    }
}

/// Everything a processor can see and change while it runs.
pub struct ProcessorCall<'a> {
    /// The element being processed. The matched attribute has already been
    /// removed from it.
    pub element: &'a mut Element,
    pub context: &'a mut Context,
    evaluator: &'a dyn ExpressionEvaluator,
    attribute: Option<Attribute>,
}

impl<'a> ProcessorCall<'a> {
    pub(crate) fn new(
        element: &'a mut Element,
        context: &'a mut Context,
        evaluator: &'a dyn ExpressionEvaluator,
        attribute: Option<Attribute>,
    ) -> Self {
        Self {
            element,
            context,
            evaluator,
            attribute,
        }
    }

    /// The attribute that triggered an attribute processor.
    pub fn attribute(&self) -> Option<&Attribute> {
        self.attribute.as_ref()
    }

    /// Decoded value of the triggering attribute (empty for element
    /// processors).
    pub fn attribute_value(&self) -> String {
        self.attribute
            .as_ref()
            .map(Attribute::decoded_value)
            .unwrap_or_default()
    }

    pub fn evaluate(&self, expression: &str) -> Result<Value> {
        self.evaluator.evaluate(expression, &*self.context)
    }

    /// Evaluate the triggering attribute's value as an expression.
    pub fn evaluate_attribute(&self) -> Result<Value> {
        self.evaluate(&self.attribute_value())
    }
}

// ============================================================================
// Dialect
// ============================================================================

/// A named bundle of processors sharing a prefix.
#[derive(Debug, Clone)]
pub struct Dialect {
    name: String,
    prefix: String,
    precedence: i32,
    processors: Vec<Processor>,
}

impl Dialect {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, precedence: i32) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            precedence,
            processors: Vec::new(),
        }
    }

    pub fn with_processor(mut self, processor: Processor) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Resolved names a processor matches.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Attribute { prefixed: String, data: String },
    Element(String),
}

impl Target {
    fn resolve(prefix: &str, rule: &MatchRule) -> Self {
        match rule {
            MatchRule::Attribute(name) if prefix.is_empty() => Target::Attribute {
                prefixed: name.to_ascii_lowercase(),
                data: format!("data-{name}").to_ascii_lowercase(),
            },
            MatchRule::Attribute(name) => Target::Attribute {
                prefixed: format!("{prefix}:{name}").to_ascii_lowercase(),
                data: format!("data-{prefix}-{name}").to_ascii_lowercase(),
            },
            MatchRule::Element(name) if prefix.is_empty() => {
                Target::Element(name.to_ascii_lowercase())
            }
            MatchRule::Element(name) => {
                Target::Element(format!("{prefix}:{name}").to_ascii_lowercase())
            }
        }
    }

    /// Names of every matching attribute (both the prefixed and the
    /// `data-` form), or an empty list for an element match.
    fn matches(&self, element: &Element) -> Option<Vec<String>> {
        match self {
            Target::Attribute { prefixed, data } => {
                let names: Vec<String> = element
                    .attributes
                    .iter()
                    .filter(|a| a.name.eq_ignore_ascii_case(prefixed) || a.name.eq_ignore_ascii_case(data))
                    .map(|a| a.name.clone())
                    .collect();
                (!names.is_empty()).then_some(names)
            }
            Target::Element(name) => element.is_named(name).then(Vec::new),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Registered {
    pub(crate) id: String,
    pub(crate) processor: Processor,
    dialect_precedence: i32,
    target: Target,
}

/// A processor selected for an element.
pub(crate) struct Match<'r> {
    pub(crate) index: usize,
    pub(crate) entry: &'r Registered,
    /// Matched attribute names in document order; the first one feeds the
    /// processor.
    pub(crate) attributes: Vec<String>,
}

/// Processors of all registered dialects in dispatch order. Immutable once
/// built.
#[derive(Debug, Default)]
pub struct DialectRegistry {
    entries: Vec<Registered>,
    dialects: Vec<String>,
}

impl DialectRegistry {
    pub fn builder() -> DialectRegistryBuilder {
        DialectRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the registered dialects, in registration order.
    pub fn dialect_names(&self) -> &[String] {
        &self.dialects
    }

    /// Processor ids (`dialect:processor`) in dispatch order.
    pub fn processor_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.id.as_str())
    }

    /// The highest-precedence processor that matches `element` and has not
    /// run on it yet.
    pub(crate) fn next_match(&self, element: &Element, executed: &HashSet<usize>) -> Option<Match<'_>> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(index, _)| !executed.contains(index))
            .find_map(|(index, entry)| {
                entry.target.matches(element).map(|attributes| Match {
                    index,
                    entry,
                    attributes,
                })
            })
    }
}

#[derive(Debug, Default)]
pub struct DialectRegistryBuilder {
    dialects: Vec<Dialect>,
}

impl DialectRegistryBuilder {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialects.push(dialect);
        self
    }

    pub fn build(self) -> Result<DialectRegistry> {
        let dialect_names: Vec<String> = self.dialects.iter().map(|d| d.name.clone()).collect();
        let mut entries: Vec<Registered> = Vec::new();
        for dialect in self.dialects {
            for processor in dialect.processors {
                entries.push(Registered {
                    id: format!("{}:{}", dialect.name, processor.name),
                    target: Target::resolve(&dialect.prefix, &processor.rule),
                    dialect_precedence: dialect.precedence,
                    processor,
                });
            }
        }

        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                if a.dialect_precedence == b.dialect_precedence
                    && a.processor.precedence == b.processor.precedence
                    && a.target == b.target
                {
                    return Err(EngineError::PrecedenceConflict {
                        processor_a: a.id.clone(),
                        processor_b: b.id.clone(),
                    });
                }
            }
        }

        // Stable sort keeps registration order for ties.
        entries.sort_by_key(|e| (e.dialect_precedence, e.processor.precedence));

        debug!(
            dialects = dialect_names.len(),
            processors = entries.len(),
            "dialect registry built"
        );
        Ok(DialectRegistry {
            entries,
            dialects: dialect_names,
        })
    }
}
