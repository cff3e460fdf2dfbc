//! Processor dispatch over the node model.
//!
//! Nodes are visited in document order. For each element the dispatcher
//! repeatedly picks the highest-precedence processor that matches and has
//! not run yet, removes the matched attribute, runs the processor, and
//! applies its [`Directive`]. Children are processed after the element's
//! own processors, inside a scope that belongs to the element.
//!
//! A halt is cooperative: once raised, no further node is visited, but every
//! ancestor still emits what it has produced so far, which forms the partial
//! output.

use std::collections::HashSet;

use tracing::{debug, trace};
use verdant_markup::{Element, Location, Node};

use crate::context::Context;
use crate::dialect::{DialectRegistry, ProcessorCall};
use crate::directive::{Directive, IterationStatus};
use crate::error::{EngineError, Result};
use crate::expression::ExpressionEvaluator;
use crate::inline;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Halt {
    pub(crate) location: Location,
    pub(crate) early_exit: bool,
}

pub(crate) struct Dispatcher<'a> {
    registry: &'a DialectRegistry,
    evaluator: &'a dyn ExpressionEvaluator,
    halt: Option<Halt>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(registry: &'a DialectRegistry, evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self {
            registry,
            evaluator,
            halt: None,
        }
    }

    pub(crate) fn halt(&self) -> Option<Halt> {
        self.halt
    }

    /// Process a node list, returning the output nodes.
    pub(crate) fn run(&mut self, nodes: Vec<Node>, context: &mut Context) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        self.process_nodes(nodes, context, &mut out)?;
        Ok(out)
    }

    fn process_nodes(
        &mut self,
        nodes: Vec<Node>,
        context: &mut Context,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        for node in nodes {
            if self.halt.is_some() {
                break;
            }
            match node {
                Node::Element(element) => {
                    self.process_element(element, HashSet::new(), context, out)?
                }
                Node::Text { content, location } if context.inlining() => {
                    let content = inline::expand(&content, self.evaluator, context)?.unwrap_or(content);
                    out.push(Node::Text { content, location });
                }
                other => out.push(other),
            }
        }
        Ok(())
    }

    fn process_element(
        &mut self,
        element: Element,
        executed: HashSet<usize>,
        context: &mut Context,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        context.push_scope();
        let result = self.process_element_in_scope(element, executed, context, out);
        context.pop_scope();
        result
    }

    fn process_element_in_scope(
        &mut self,
        mut element: Element,
        mut executed: HashSet<usize>,
        context: &mut Context,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        let registry = self.registry;
        let mut skip_children = false;

        while let Some(matched) = registry.next_match(&element, &executed) {
            executed.insert(matched.index);
            // Every form of the matched attribute goes; the first one is
            // what the processor sees.
            let removed: Vec<_> = matched
                .attributes
                .iter()
                .filter_map(|name| element.remove_attribute(name))
                .collect();
            let attribute = removed.into_iter().next();
            let id = matched.entry.id.as_str();
            let location = element.location;
            trace!(processor = id, element = %element.name, %location, "executing processor");

            let directive = {
                let mut call = ProcessorCall::new(&mut element, context, self.evaluator, attribute);
                matched
                    .entry
                    .processor
                    .execute(&mut call)
                    .map_err(|e| attribute_error(e, id, location))?
            };

            match directive {
                Directive::Continue => {}
                Directive::SkipChildren => skip_children = true,
                Directive::RemoveNode => return Ok(()),
                Directive::RemoveBody => {
                    element.set_children(Vec::new());
                    out.push(Node::Element(element));
                    return Ok(());
                }
                Directive::ReplaceNode(fragment) => {
                    return self.process_nodes(fragment, context, out);
                }
                Directive::Iterate {
                    items,
                    binding,
                    status,
                } => {
                    let status = status.unwrap_or_else(|| format!("{binding}Stat"));
                    return self.iterate(element, executed, items, &binding, &status, context, out);
                }
                Directive::HaltTemplate { early_exit } => {
                    debug!(processor = id, %location, early_exit, "template halted");
                    self.halt = Some(Halt {
                        location,
                        early_exit,
                    });
                    return Ok(());
                }
            }
        }

        if !skip_children {
            let children = std::mem::take(&mut element.children);
            let mut processed = Vec::with_capacity(children.len());
            self.process_nodes(children, context, &mut processed)?;
            element.children = processed;
        }
        out.push(Node::Element(element));
        Ok(())
    }

    /// Process one clone of `element` per item. Clones keep the executed
    /// set, so processors that already ran are not repeated.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &mut self,
        element: Element,
        executed: HashSet<usize>,
        items: Vec<Value>,
        binding: &str,
        status: &str,
        context: &mut Context,
        out: &mut Vec<Node>,
    ) -> Result<()> {
        let size = items.len();
        for (index, item) in items.into_iter().enumerate() {
            if self.halt.is_some() {
                break;
            }
            let loop_status = IterationStatus {
                index,
                size,
                current: item.clone(),
            };
            context.push_scope();
            context.set_local(binding, item);
            context.set_local(status, loop_status.to_value());
            let result = self.process_element(element.clone(), executed.clone(), context, out);
            context.pop_scope();
            result?;
        }
        Ok(())
    }
}

/// Attribute a processor failure to the processor and element. Expression
/// errors and errors that already carry a position pass through unchanged.
fn attribute_error(error: EngineError, processor: &str, location: Location) -> EngineError {
    match error {
        EngineError::ExpressionEvaluation { .. }
        | EngineError::Processing { .. }
        | EngineError::TemplateHalted { .. }
        | EngineError::Parse(_) => error,
        other => EngineError::Processing {
            processor: processor.to_string(),
            location,
            message: other.to_string(),
        },
    }
}
