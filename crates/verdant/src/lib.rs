//! Verdant - a natural-template markup processing engine
//!
//! Templates are plain HTML/XML whose directive attributes (`th:text`,
//! `th:each`, ...) are evaluated against a data context:
//! - Templates stay valid markup and open as static prototypes
//! - Unprocessed markup is written back byte-for-byte
//! - Processors are grouped in dialects with a deterministic precedence
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let result = verdant::process(
//!     "<p th:text=\"${name}\">Placeholder</p>",
//!     json!({"name": "World"}),
//! ).unwrap();
//!
//! assert_eq!(result, "<p>World</p>");
//! ```

use std::io::{Read, Write};

use tracing::debug;

pub mod config;
pub mod context;
pub mod dialect;
pub mod directive;
mod dispatcher;
pub mod error;
pub mod expression;
pub mod html_escape;
mod inline;
pub mod standard;
pub mod value;

pub use config::{EngineConfig, HaltOutputPolicy};
pub use context::Context;
pub use dialect::{Dialect, DialectRegistry, MatchRule, Processor, ProcessorCall};
pub use directive::{Directive, IterationStatus};
pub use error::{EngineError, Result};
pub use expression::{ExpressionEvaluator, StandardExpressions};
pub use value::Value;
pub use verdant_markup::{
    CommentPolicy, Document, Element, Location, Node, ParseError, ParseMode, ParseOptions,
};

use dispatcher::Dispatcher;

/// A parsed, unprocessed template. Processing works on a copy, so one
/// template can be processed any number of times, from any thread.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    document: Document,
}

impl Template {
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The template's markup, unprocessed.
    pub fn to_markup(&self) -> String {
        self.document.to_markup()
    }
}

/// Configuration, dialects, and evaluator, frozen at build time.
pub struct TemplateEngine {
    config: EngineConfig,
    registry: DialectRegistry,
    evaluator: Box<dyn ExpressionEvaluator>,
}

impl TemplateEngine {
    pub fn builder() -> TemplateEngineBuilder {
        TemplateEngineBuilder::default()
    }

    /// An engine with the default configuration and the standard dialect.
    pub fn standard() -> Result<Self> {
        Self::builder().dialect(standard::dialect()).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    /// Parse a template source string
    ///
    /// # Example
    ///
    /// ```rust
    /// use serde_json::json;
    /// use verdant::{Context, TemplateEngine};
    ///
    /// let engine = TemplateEngine::standard().unwrap();
    /// let tmpl = engine.parse("<b th:text=\"${name}\">x</b>").unwrap();
    /// let context = Context::from_json(json!({"name": "Alice"})).unwrap();
    /// assert_eq!(engine.process_template(&tmpl, context).unwrap(), "<b>Alice</b>");
    /// ```
    pub fn parse(&self, source: &str) -> Result<Template> {
        let document = verdant_markup::parse(source, &self.config.parse_options())?;
        Ok(Template { document })
    }

    /// Parse a template from a byte reader.
    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<Template> {
        let document = verdant_markup::parse_reader(reader, &self.config.parse_options())?;
        Ok(Template { document })
    }

    /// Parse and process a template with JSON data.
    pub fn process(&self, source: &str, data: serde_json::Value) -> Result<String> {
        let template = self.parse(source)?;
        self.process_template(&template, Context::from_json(data)?)
    }

    /// Process a parsed template against a context.
    pub fn process_template(&self, template: &Template, mut context: Context) -> Result<String> {
        debug!(
            mode = ?self.config.mode,
            nodes = template.document.children.len(),
            "processing template"
        );
        let mut dispatcher = Dispatcher::new(&self.registry, self.evaluator.as_ref());
        let nodes = dispatcher.run(template.document.children.clone(), &mut context)?;
        let output = Document::new(nodes).to_markup();

        let Some(halt) = dispatcher.halt() else {
            debug!(bytes = output.len(), "template processed");
            return Ok(output);
        };

        let partial = match self.config.halt_output_policy {
            HaltOutputPolicy::KeepPartial => Some(output),
            HaltOutputPolicy::DiscardPartial => None,
        };
        if halt.early_exit {
            Ok(partial.unwrap_or_default())
        } else {
            Err(EngineError::TemplateHalted {
                location: halt.location,
                partial_output: partial,
            })
        }
    }

    /// Read a template from `reader`, process it, and write the result to
    /// `writer`. Nothing is written when processing fails.
    pub fn process_reader<R: Read, W: Write>(
        &self,
        reader: R,
        context: Context,
        writer: &mut W,
    ) -> Result<()> {
        let template = self.parse_reader(reader)?;
        let output = self.process_template(&template, context)?;
        writer.write_all(output.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct TemplateEngineBuilder {
    config: EngineConfig,
    registry: dialect::DialectRegistryBuilder,
    evaluator: Option<Box<dyn ExpressionEvaluator>>,
}

impl TemplateEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.registry = self.registry.dialect(dialect);
        self
    }

    /// Replace the standard expression evaluator.
    pub fn evaluator(mut self, evaluator: impl ExpressionEvaluator + 'static) -> Self {
        self.evaluator = Some(Box::new(evaluator));
        self
    }

    /// Freeze the engine. Fails on processor precedence conflicts.
    pub fn build(self) -> Result<TemplateEngine> {
        Ok(TemplateEngine {
            config: self.config,
            registry: self.registry.build()?,
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Box::new(StandardExpressions)),
        })
    }
}

/// Convenience function: process a template with the standard dialect
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let result = verdant::process(
///     "<ul><li th:each=\"x : ${items}\" th:text=\"${x}\">item</li></ul>",
///     json!({"items": ["a", "b"]}),
/// ).unwrap();
///
/// assert_eq!(result, "<ul><li>a</li><li>b</li></ul>");
/// ```
pub fn process(source: &str, data: serde_json::Value) -> Result<String> {
    TemplateEngine::standard()?.process(source, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_is_send_sync() {
        assert_send_sync::<TemplateEngine>();
        assert_send_sync::<Template>();
    }

    #[test]
    fn test_template_reuse() {
        let engine = TemplateEngine::standard().unwrap();
        let tmpl = engine.parse("<p th:text=\"${name}\">x</p>").unwrap();

        let first = engine
            .process_template(&tmpl, Context::new().with("name", "Alice"))
            .unwrap();
        assert_eq!(first, "<p>Alice</p>");

        let second = engine
            .process_template(&tmpl, Context::new().with("name", "Bob"))
            .unwrap();
        assert_eq!(second, "<p>Bob</p>");
        assert_eq!(tmpl.to_markup(), "<p th:text=\"${name}\">x</p>");
    }

    #[test]
    fn test_custom_evaluator() {
        struct Upper;
        impl ExpressionEvaluator for Upper {
            fn evaluate(&self, expression: &str, _: &Context) -> Result<Value> {
                Ok(Value::from(expression.to_uppercase()))
            }
        }

        let engine = TemplateEngine::builder()
            .dialect(standard::dialect())
            .evaluator(Upper)
            .build()
            .unwrap();
        assert_eq!(
            engine.process("<i th:text=\"shout\">x</i>", json!({})).unwrap(),
            "<i>SHOUT</i>"
        );
    }
}
