//! Engine configuration.

use serde::Deserialize;
use verdant_markup::{CommentPolicy, ParseMode, ParseOptions};

use crate::error::Result;

/// What happens to the output produced before a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HaltOutputPolicy {
    #[default]
    DiscardPartial,
    KeepPartial,
}

/// Options fixed when an engine is built.
///
/// Deserializes from camelCase JSON; missing fields take their defaults:
///
/// ```json
/// {"mode": "strict", "commentPolicy": "keepParserComments", "haltOutputPolicy": "keepPartial"}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub mode: ParseMode,
    pub comment_policy: CommentPolicy,
    pub halt_output_policy: HaltOutputPolicy,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_comment_policy(mut self, comment_policy: CommentPolicy) -> Self {
        self.comment_policy = comment_policy;
        self
    }

    pub fn with_halt_output_policy(mut self, halt_output_policy: HaltOutputPolicy) -> Self {
        self.halt_output_policy = halt_output_policy;
        self
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            mode: self.mode,
            comment_policy: self.comment_policy,
        }
    }
}
