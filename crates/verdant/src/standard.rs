//! The standard dialect (`th` prefix).
//!
//! | attribute / element | precedence |
//! |---|---|
//! | `each` | 200 |
//! | `switch`, `case` | 250, 275 |
//! | `if`, `unless` | 300, 400 |
//! | `object` | 500 |
//! | `with` | 600 |
//! | `attr` | 700 |
//! | `attrprepend`, `attrappend` | 800, 900 |
//! | `href`, `src`, `id`, `class`, `value`, `title`, `alt`, `name`, `action` | 1000 |
//! | boolean attributes (`checked`, `selected`, `disabled`, ...) | 1000 |
//! | `inline` | 1000 |
//! | `classappend`, `styleappend` | 1100 |
//! | `text`, `utext` | 1300, 1400 |
//! | `remove` | 1600 |
//! | `<th:block>` | 100000 |

use verdant_markup::{Element, Node};

use crate::dialect::{Dialect, Processor, ProcessorCall};
use crate::directive::Directive;
use crate::error::{EngineError, Result};
use crate::expression::{is_identifier, split_once_top_level, split_top_level};
use crate::html_escape::escape;
use crate::value::Value;

pub const PREFIX: &str = "th";
pub const DIALECT_NAME: &str = "Standard";
pub const DIALECT_PRECEDENCE: i32 = 1000;

const ATTRIBUTE_SETTERS: &[&str] = &[
    "href", "src", "id", "class", "value", "title", "alt", "name", "action",
];

/// Attributes written as `name="name"` when their expression is truthy and
/// removed otherwise.
const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "async", "autofocus", "autoplay", "checked", "controls", "declare", "default", "defer",
    "disabled", "formnovalidate", "hidden", "ismap", "loop", "multiple", "novalidate", "nowrap",
    "open", "pubdate", "readonly", "required", "reversed", "scoped", "seamless", "selected",
];

/// Binding that carries the enclosing `th:switch` to its cases. Not an
/// identifier, so templates cannot reach it.
const SWITCH: &str = "#switch";

/// Build the standard dialect.
pub fn dialect() -> Dialect {
    let mut dialect = Dialect::new(DIALECT_NAME, PREFIX, DIALECT_PRECEDENCE)
        .with_processor(Processor::attribute("each", 200, each))
        .with_processor(Processor::attribute("switch", 250, switch))
        .with_processor(Processor::attribute("case", 275, case))
        .with_processor(Processor::attribute("if", 300, |call| conditional(call, true)))
        .with_processor(Processor::attribute("unless", 400, |call| conditional(call, false)))
        .with_processor(Processor::attribute("object", 500, |call| {
            let target = call.evaluate_attribute()?;
            call.context.set_selection(target);
            Ok(Directive::Continue)
        }))
        .with_processor(Processor::attribute("with", 600, with))
        .with_processor(Processor::attribute("attr", 700, attr))
        .with_processor(Processor::attribute("attrprepend", 800, |call| {
            attr_join(call, Join::Prepend)
        }))
        .with_processor(Processor::attribute("attrappend", 900, |call| {
            attr_join(call, Join::Append)
        }));

    for &name in ATTRIBUTE_SETTERS {
        dialect = dialect.with_processor(Processor::attribute(name, 1000, move |call| {
            let value = call.evaluate_attribute()?;
            set_attribute(call.element, name, &value)?;
            Ok(Directive::Continue)
        }));
    }
    for &name in BOOLEAN_ATTRIBUTES {
        dialect = dialect.with_processor(Processor::attribute(name, 1000, move |call| {
            if call.evaluate_attribute()?.is_truthy() {
                call.element.set_attribute(name, name);
            } else {
                call.element.remove_attribute(name);
            }
            Ok(Directive::Continue)
        }));
    }

    dialect
        .with_processor(Processor::attribute("inline", 1000, inline))
        .with_processor(Processor::attribute("classappend", 1100, |call| {
            append_to(call, "class", " ")
        }))
        .with_processor(Processor::attribute("styleappend", 1100, |call| {
            append_to(call, "style", "; ")
        }))
        .with_processor(Processor::attribute("text", 1300, |call| text(call, true)))
        .with_processor(Processor::attribute("utext", 1400, |call| text(call, false)))
        .with_processor(Processor::attribute("remove", 1600, remove))
        .with_processor(Processor::element("block", 100_000, |call| {
            Ok(Directive::ReplaceNode(std::mem::take(&mut call.element.children)))
        }))
}

/// `item[, status] : ${collection}`
fn each(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    let declaration = call.attribute_value();
    let (names, expression) = split_once_top_level(&declaration, b':').ok_or_else(|| {
        EngineError::type_error(format!("iteration '{declaration}' has no ':' separator"))
    })?;

    let mut names = names.split(',').map(str::trim);
    let binding = names.next().unwrap_or_default();
    let status = names.next();
    if !is_identifier(binding)
        || status.is_some_and(|s| !is_identifier(s))
        || names.next().is_some()
    {
        return Err(EngineError::type_error(format!(
            "invalid iteration variables in '{declaration}'"
        )));
    }

    let collection = call.evaluate(expression)?;
    let type_name = collection.type_name();
    let items = collection
        .into_items()
        .ok_or_else(|| EngineError::type_error(format!("cannot iterate over {type_name}")))?;

    Ok(Directive::Iterate {
        items,
        binding: binding.to_string(),
        status: status.map(str::to_string),
    })
}

fn conditional(call: &mut ProcessorCall<'_>, keep_when: bool) -> Result<Directive> {
    if call.evaluate_attribute()?.is_truthy() == keep_when {
        Ok(Directive::Continue)
    } else {
        Ok(Directive::RemoveNode)
    }
}

fn switch(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    let value = call.evaluate_attribute()?;
    call.context.set_local(
        SWITCH,
        Value::object([("value", value), ("matched", Value::Bool(false))]),
    );
    Ok(Directive::Continue)
}

/// Keeps the first case whose value equals the switch value (`*` matches
/// anything) and removes every other case of the same switch.
fn case(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    let (switch_value, matched) = match call.context.lookup(SWITCH) {
        Some(state) => (
            state.get("value").cloned().unwrap_or(Value::Null),
            state.get("matched").is_some_and(Value::is_truthy),
        ),
        None => {
            return Err(EngineError::type_error(
                "th:case must be inside an element with th:switch",
            ))
        }
    };
    if matched {
        return Ok(Directive::RemoveNode);
    }

    let declaration = call.attribute_value();
    let selected = declaration.trim() == "*"
        || call.evaluate(&declaration)?.loosely_equals(&switch_value);
    if !selected {
        return Ok(Directive::RemoveNode);
    }
    if let Some(Value::Object(state)) = call.context.lookup_mut(SWITCH) {
        state.insert("matched".to_string(), Value::Bool(true));
    }
    Ok(Directive::Continue)
}

fn inline(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    let mode = call.attribute_value();
    let enabled = match mode.trim() {
        "text" | "html" | "xml" => true,
        "none" => false,
        other => {
            return Err(EngineError::type_error(format!(
                "unsupported inline mode '{other}'"
            )))
        }
    };
    call.context.set_inlining(enabled);
    Ok(Directive::Continue)
}

/// `a=${x}, b=${y}`; later assignments see earlier ones.
fn with(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    for (name, expression) in assignments(&call.attribute_value())? {
        if !is_identifier(&name) {
            return Err(EngineError::type_error(format!(
                "invalid local variable name '{name}'"
            )));
        }
        let value = call.evaluate(&expression)?;
        call.context.set_local(name, value);
    }
    Ok(Directive::Continue)
}

fn attr(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    for (name, expression) in assignments(&call.attribute_value())? {
        let value = call.evaluate(&expression)?;
        set_attribute(call.element, &name, &value)?;
    }
    Ok(Directive::Continue)
}

#[derive(Clone, Copy)]
enum Join {
    Prepend,
    Append,
}

/// `name=${x}, ...`: glue each value onto the front or back of the
/// attribute, creating it when missing. Null and empty values change
/// nothing.
fn attr_join(call: &mut ProcessorCall<'_>, join: Join) -> Result<Directive> {
    for (name, expression) in assignments(&call.attribute_value())? {
        let extra = call.evaluate(&expression)?.to_text()?;
        if extra.is_empty() {
            continue;
        }
        let existing = call
            .element
            .attribute(&name)
            .map(|a| a.decoded_value())
            .unwrap_or_default();
        let joined = match join {
            Join::Prepend => extra + &existing,
            Join::Append => existing + &extra,
        };
        call.element.set_attribute(&name, &escape(&joined));
    }
    Ok(Directive::Continue)
}

/// Append to a list-like attribute with `separator`, skipping the
/// separator when the attribute is missing or empty.
fn append_to(call: &mut ProcessorCall<'_>, attribute: &str, separator: &str) -> Result<Directive> {
    let extra = call.evaluate_attribute()?.to_text()?;
    if extra.is_empty() {
        return Ok(Directive::Continue);
    }
    let existing = call
        .element
        .attribute(attribute)
        .map(|a| a.decoded_value())
        .unwrap_or_default();
    let existing = existing.trim_end();
    let value = if existing.is_empty() {
        extra
    } else if separator.trim().is_empty() || !existing.ends_with(separator.trim()) {
        format!("{existing}{separator}{extra}")
    } else {
        format!("{existing} {extra}")
    };
    call.element.set_attribute(attribute, &escape(&value));
    Ok(Directive::Continue)
}

fn text(call: &mut ProcessorCall<'_>, escaped: bool) -> Result<Directive> {
    let content = call.evaluate_attribute()?.to_text()?;
    if content.is_empty() {
        call.element.set_children(Vec::new());
    } else if escaped {
        call.element.set_text(escape(&content));
    } else {
        call.element.set_text(content);
    }
    // The new body is output, not template.
    Ok(Directive::SkipChildren)
}

fn remove(call: &mut ProcessorCall<'_>) -> Result<Directive> {
    let raw = call.attribute_value();
    let mode = match raw.trim() {
        keyword @ ("all" | "body" | "tag" | "all-but-first" | "none") => keyword.to_string(),
        expression => call.evaluate(expression)?.to_text()?,
    };

    match mode.as_str() {
        "all" => Ok(Directive::RemoveNode),
        "body" => Ok(Directive::RemoveBody),
        "tag" => Ok(Directive::ReplaceNode(std::mem::take(
            &mut call.element.children,
        ))),
        "all-but-first" => {
            keep_first_child_element(call.element);
            Ok(Directive::Continue)
        }
        "none" | "" => Ok(Directive::Continue),
        other => Err(EngineError::type_error(format!(
            "invalid remove mode '{other}'"
        ))),
    }
}

fn keep_first_child_element(element: &mut Element) {
    let mut seen_element = false;
    element.children.retain(|child| match child {
        Node::Element(_) if seen_element => false,
        Node::Element(_) => {
            seen_element = true;
            true
        }
        _ => true,
    });
}

/// Set an attribute from an evaluated value. Null removes the attribute.
fn set_attribute(element: &mut Element, name: &str, value: &Value) -> Result<()> {
    if value.is_null() {
        element.remove_attribute(name);
    } else {
        element.set_attribute(name, &escape(&value.to_text()?));
    }
    Ok(())
}

/// Parse `name=expr, name=expr`.
fn assignments(source: &str) -> Result<Vec<(String, String)>> {
    split_top_level(source, b',')
        .into_iter()
        .map(|part| {
            let (name, expression) = split_once_top_level(part, b'=')
                .ok_or_else(|| EngineError::type_error(format!("invalid assignment '{}'", part.trim())))?;
            Ok((name.trim().to_string(), expression.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::dialect::DialectRegistry;
    use crate::dispatcher::Dispatcher;
    use crate::expression::StandardExpressions;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use verdant_markup::{parse, Document, ParseOptions};

    fn render(source: &str, data: serde_json::Value) -> Result<String> {
        let registry = DialectRegistry::builder().dialect(dialect()).build()?;
        let document = parse(source, &ParseOptions::default())?;
        let mut context = Context::from_json(data)?;
        let mut dispatcher = Dispatcher::new(&registry, &StandardExpressions);
        let nodes = dispatcher.run(document.children, &mut context)?;
        Ok(Document::new(nodes).to_markup())
    }

    #[test]
    fn test_dialect_has_no_conflicts() {
        let registry = DialectRegistry::builder().dialect(dialect()).build().unwrap();
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn test_text_escapes() {
        let output = render("<p th:text=\"${v}\">placeholder</p>", json!({"v": "<b>&</b>"})).unwrap();
        assert_eq!(output, "<p>&lt;b&gt;&amp;&lt;/b&gt;</p>");
    }

    #[test]
    fn test_utext_does_not_escape() {
        let output = render("<p data-th-utext=\"${v}\">x</p>", json!({"v": "<b>hi</b>"})).unwrap();
        assert_eq!(output, "<p><b>hi</b></p>");
    }

    #[test]
    fn test_each_with_status() {
        let output = render(
            "<li th:each=\"n, s : ${items}\" th:text=\"${s.index}\" th:classappend=\"${s.last}\">x</li>",
            json!({"items": ["a", "b"]}),
        )
        .unwrap();
        assert_eq!(
            output,
            "<li class=\"false\">0</li><li class=\"true\">1</li>"
        );
    }

    #[test]
    fn test_each_default_status_name() {
        let output = render(
            "<i th:each=\"n : ${items}\" th:text=\"${nStat.count}\"></i>",
            json!({"items": [5, 6, 7]}),
        )
        .unwrap();
        assert_eq!(output, "<i>1</i><i>2</i><i>3</i>");
    }

    #[test]
    fn test_each_over_scalar_is_processing_error() {
        let err = render("<i th:each=\"n : ${v}\"></i>", json!({"v": 3})).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Processing { ref processor, .. } if processor == "Standard:each"
        ));
    }

    #[test]
    fn test_if_and_unless() {
        let output = render(
            "<a th:if=\"${yes}\">1</a><b th:if=\"${no}\">2</b><c th:unless=\"${no}\">3</c>",
            json!({"yes": "on", "no": "off"}),
        )
        .unwrap();
        assert_eq!(output, "<a>1</a><c>3</c>");
    }

    #[test]
    fn test_with_defines_locals_for_children() {
        let output = render(
            "<div th:with=\"a=${x}, b=${a}\"><span th:text=\"${b}\">_</span></div><p th:text=\"${a}\">_</p>",
            json!({"x": "val"}),
        )
        .unwrap();
        assert_eq!(output, "<div><span>val</span></div><p></p>");
    }

    #[test]
    fn test_attribute_setters() {
        let output = render(
            "<a href=\"#\" th:href=\"${url}\" th:title=\"${missing}\" title=\"t\" th:attr=\"rel='x', data-n=${n}\">go</a>",
            json!({"url": "/p?a=1&b=2", "n": 4}),
        )
        .unwrap();
        assert_eq!(
            output,
            "<a href=\"/p?a=1&amp;b=2\" rel=\"x\" data-n=\"4\">go</a>"
        );
    }

    #[test]
    fn test_classappend() {
        let output = render(
            "<p class=\"a\" th:classappend=\"'b'\"></p><p th:classappend=\"'c'\"></p>",
            json!({}),
        )
        .unwrap();
        assert_eq!(output, "<p class=\"a b\"></p><p class=\"c\"></p>");
    }

    #[test]
    fn test_styleappend_separates_declarations() {
        let output = render(
            "<p style=\"color: red\" th:styleappend=\"'margin: 0'\"></p><p style=\"a: 1;\" th:styleappend=\"'b: 2'\"></p>",
            json!({}),
        )
        .unwrap();
        assert_eq!(
            output,
            "<p style=\"color: red; margin: 0\"></p><p style=\"a: 1; b: 2\"></p>"
        );
    }

    #[test]
    fn test_attrprepend_and_attrappend() {
        let output = render(
            "<a class=\"btn\" th:attrappend=\"class=${extra}\" th:attrprepend=\"title=${pre}\" title=\"t\">x</a>",
            json!({"extra": " big", "pre": "New: "}),
        )
        .unwrap();
        assert_eq!(output, "<a class=\"btn big\" title=\"New: t\">x</a>");
    }

    #[test]
    fn test_boolean_attributes() {
        let output = render(
            "<input type=\"checkbox\" th:checked=\"${on}\" th:disabled=\"${off}\" disabled>",
            json!({"on": true, "off": false}),
        )
        .unwrap();
        assert_eq!(output, "<input type=\"checkbox\" checked=\"checked\">");
    }

    #[test]
    fn test_switch_keeps_first_matching_case() {
        let source = "<div th:switch=\"${role}\"><p th:case=\"'admin'\">A</p><p th:case=\"'user'\">U</p><p th:case=\"'user'\">U2</p><p th:case=\"*\">?</p></div>";
        assert_eq!(
            render(source, json!({"role": "user"})).unwrap(),
            "<div><p>U</p></div>"
        );
        assert_eq!(
            render(source, json!({"role": "guest"})).unwrap(),
            "<div><p>?</p></div>"
        );
    }

    #[test]
    fn test_nested_switch_is_independent() {
        let source = "<div th:switch=\"${a}\"><div th:case=\"1\"><ul th:switch=\"${b}\"><li th:case=\"1\">b1</li><li th:case=\"2\">b2</li></ul></div><p th:case=\"*\">other</p></div>";
        assert_eq!(
            render(source, json!({"a": 1, "b": 2})).unwrap(),
            "<div><div><ul><li>b2</li></ul></div></div>"
        );
    }

    #[test]
    fn test_case_without_switch_is_error() {
        let err = render("<p th:case=\"1\">x</p>", json!({})).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Processing { ref processor, .. } if processor == "Standard:case"
        ));
    }

    #[test]
    fn test_object_selection() {
        let output = render(
            "<div th:object=\"${user}\"><b th:text=\"*{name}\">_</b><i th:text=\"*{address.city}\">_</i></div><p th:text=\"*{top}\">_</p>",
            json!({"user": {"name": "Ann", "address": {"city": "Oslo"}}, "top": "root"}),
        )
        .unwrap();
        assert_eq!(output, "<div><b>Ann</b><i>Oslo</i></div><p>root</p>");
    }

    #[test]
    fn test_inline_text() {
        let output = render(
            "<p th:inline=\"text\">Hi [[${who}]], [(${raw})]<span th:inline=\"none\">[[${who}]]</span></p><p>[[${who}]]</p>",
            json!({"who": "<Ann>", "raw": "<b>x</b>"}),
        )
        .unwrap();
        assert_eq!(
            output,
            "<p>Hi &lt;Ann&gt;, <b>x</b><span>[[${who}]]</span></p><p>[[${who}]]</p>"
        );
    }

    #[test]
    fn test_inline_inside_iteration() {
        let output = render(
            "<ul th:inline=\"text\"><li th:each=\"x : ${xs}\">[[${x}]]</li></ul>",
            json!({"xs": [1, 2]}),
        )
        .unwrap();
        assert_eq!(output, "<ul><li>1</li><li>2</li></ul>");
    }

    #[test]
    fn test_text_output_is_not_inlined() {
        let output = render(
            "<p th:inline=\"text\" th:text=\"${v}\">_</p>",
            json!({"v": "[[${v}]]"}),
        )
        .unwrap();
        assert_eq!(output, "<p>[[${v}]]</p>");
    }

    #[test]
    fn test_remove_modes() {
        let source = "<a th:remove=\"all\">1</a><b th:remove=\"body\">2</b><c th:remove=\"tag\"><i>3</i></c><d th:remove=\"all-but-first\"><i>4</i><i>5</i></d><e th:remove=\"none\">6</e>";
        assert_eq!(
            render(source, json!({})).unwrap(),
            "<b></b><i>3</i><d><i>4</i></d><e>6</e>"
        );
    }

    #[test]
    fn test_block_unwraps_and_processes_children() {
        let output = render(
            "<th:block th:each=\"n : ${items}\"><b th:text=\"${n}\">_</b></th:block>",
            json!({"items": [1, 2]}),
        )
        .unwrap();
        assert_eq!(output, "<b>1</b><b>2</b>");
    }
}
