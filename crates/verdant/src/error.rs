//! Error types for the Verdant template engine.

use thiserror::Error;

pub use verdant_markup::{Location, ParseError};

/// All errors that can occur while building an engine or processing a
/// template.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("processors '{processor_a}' and '{processor_b}' share a precedence and match rule")]
    PrecedenceConflict {
        processor_a: String,
        processor_b: String,
    },

    #[error("template processing halted at {location}")]
    TemplateHalted {
        location: Location,
        partial_output: Option<String>,
    },

    #[error("failed to evaluate expression '{expression}': {source}")]
    ExpressionEvaluation {
        expression: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("processor '{processor}' failed at {location}: {message}")]
    Processing {
        processor: String,
        location: Location,
        message: String,
    },

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        EngineError::TypeError {
            message: message.into(),
        }
    }
}

/// Result type alias for Verdant operations
pub type Result<T> = std::result::Result<T, EngineError>;
