//! Text inlining.
//!
//! While inlining is on (`th:inline="text"`), text nodes may embed
//! expressions: `[[expr]]` writes the escaped text form of the value and
//! `[(expr)]` writes it unescaped. An opener without its closer is left as
//! literal text.

use crate::context::Context;
use crate::error::Result;
use crate::expression::ExpressionEvaluator;
use crate::html_escape::escape;

/// Expand inlined expressions in `text`. Returns `None` when there is
/// nothing to expand.
pub(crate) fn expand(
    text: &str,
    evaluator: &dyn ExpressionEvaluator,
    context: &Context,
) -> Result<Option<String>> {
    let mut out = String::new();
    let mut rest = text;
    let mut expanded = false;

    while let Some(start) = rest.find('[') {
        let tail = &rest[start..];
        let (close, escaped) = if tail.starts_with("[[") {
            ("]]", true)
        } else if tail.starts_with("[(") {
            (")]", false)
        } else {
            out.push_str(&rest[..=start]);
            rest = &rest[start + 1..];
            continue;
        };
        let Some(end) = tail[2..].find(close) else {
            break;
        };

        out.push_str(&rest[..start]);
        let value = evaluator.evaluate(&tail[2..2 + end], context)?.to_text()?;
        if escaped {
            out.push_str(&escape(&value));
        } else {
            out.push_str(&value);
        }
        rest = &tail[2 + end + close.len()..];
        expanded = true;
    }

    if !expanded {
        return Ok(None);
    }
    out.push_str(rest);
    Ok(Some(out))
}
