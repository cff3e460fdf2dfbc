//! Engine-level tests: custom dialects, halting, configuration, and
//! whole-engine properties.

use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use verdant::html_escape::escape;
use verdant::{
    Context, Dialect, Directive, EngineConfig, EngineError, HaltOutputPolicy, Location, Node,
    ParseError, ParseMode, Processor, TemplateEngine, Value,
};

/// `g:stop` halts, `g:exit` halts with early exit. Runs after the
/// standard dialect.
fn guard_dialect() -> Dialect {
    Dialect::new("Guard", "g", 2000)
        .with_processor(Processor::attribute("stop", 10, |_| {
            Ok(Directive::HaltTemplate { early_exit: false })
        }))
        .with_processor(Processor::attribute("exit", 20, |_| {
            Ok(Directive::HaltTemplate { early_exit: true })
        }))
}

fn guarded_engine(policy: HaltOutputPolicy) -> TemplateEngine {
    TemplateEngine::builder()
        .config(EngineConfig::default().with_halt_output_policy(policy))
        .dialect(verdant::standard::dialect())
        .dialect(guard_dialect())
        .build()
        .unwrap()
}

mod custom_dialects {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shout_dialect() -> Dialect {
        Dialect::new("Shout", "sh", 500)
            .with_processor(Processor::attribute("upper", 100, |call| {
                let text = call.evaluate_attribute()?.to_text()?.to_uppercase();
                call.element.set_text(escape(&text).into_owned());
                Ok(Directive::Continue)
            }))
            .with_processor(Processor::element("now", 100, |_| {
                Ok(Directive::ReplaceNode(vec![Node::text("NOW")]))
            }))
    }

    fn engine() -> TemplateEngine {
        TemplateEngine::builder()
            .dialect(verdant::standard::dialect())
            .dialect(shout_dialect())
            .build()
            .unwrap()
    }

    #[test]
    fn test_custom_attribute_processor() {
        let output = engine()
            .process("<p sh:upper=\"${name}\">x</p>", json!({"name": "a&b"}))
            .unwrap();
        assert_eq!(output, "<p>A&amp;B</p>");
    }

    #[test]
    fn test_custom_element_processor() {
        let output = engine().process("at <sh:now/>!", json!({})).unwrap();
        assert_eq!(output, "at NOW!");
    }

    #[test]
    fn test_lower_dialect_precedence_runs_first() {
        // Shout (500) runs before Standard (1000), so th:text wins.
        let output = engine()
            .process(
                "<p th:text=\"${a}\" sh:upper=\"${b}\">x</p>",
                json!({"a": "standard", "b": "shout"}),
            )
            .unwrap();
        assert_eq!(output, "<p>standard</p>");
    }

    #[test]
    fn test_registry_order() {
        let engine = engine();
        let ids: Vec<&str> = engine.registry().processor_ids().collect();
        assert_eq!(&ids[..2], ["Shout:upper", "Shout:now"]);
        assert_eq!(ids[2], "Standard:each");
        assert_eq!(engine.registry().dialect_names(), ["Standard", "Shout"]);
    }

    #[test]
    fn test_precedence_conflict_rejected_at_build() {
        let first = Dialect::new("One", "x", 10)
            .with_processor(Processor::attribute("go", 5, |_| Ok(Directive::Continue)));
        let second = Dialect::new("Two", "x", 10)
            .with_processor(Processor::attribute("go", 5, |_| Ok(Directive::Continue)));

        let err = TemplateEngine::builder()
            .dialect(first)
            .dialect(second)
            .build()
            .unwrap_err();
        match err {
            EngineError::PrecedenceConflict {
                processor_a,
                processor_b,
            } => {
                let mut ids = [processor_a, processor_b];
                ids.sort();
                assert_eq!(ids, ["One:go".to_string(), "Two:go".to_string()]);
            }
            other => panic!("expected precedence conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_same_precedence_different_rules_is_allowed() {
        let dialect = Dialect::new("Pair", "p", 10)
            .with_processor(Processor::attribute("a", 5, |_| Ok(Directive::Continue)))
            .with_processor(Processor::attribute("b", 5, |_| Ok(Directive::Continue)));
        assert!(TemplateEngine::builder().dialect(dialect).build().is_ok());
    }

    #[test]
    fn test_processor_error_names_processor() {
        let dialect = Dialect::new("Broken", "b", 10).with_processor(Processor::attribute(
            "fail",
            1,
            |call| Ok(Directive::ReplaceNode(vec![Node::text(call.evaluate_attribute()?.to_text()?)])),
        ));
        let engine = TemplateEngine::builder().dialect(dialect).build().unwrap();
        let err = engine
            .process("<div>\n  <i b:fail=\"${items}\"></i></div>", json!({"items": [1]}))
            .unwrap_err();
        match err {
            EngineError::Processing {
                processor,
                location,
                ..
            } => {
                assert_eq!(processor, "Broken:fail");
                assert_eq!(location, Location::new(2, 3, 8));
            }
            other => panic!("expected processing error, got {other:?}"),
        }
    }
}

mod halting {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = "<ul><li>a</li><li g:stop>b</li><li>c</li></ul>tail";
    const PARTIAL: &str = "<ul><li>a</li></ul>";

    #[test]
    fn test_halt_discards_partial_by_default() {
        let err = guarded_engine(HaltOutputPolicy::DiscardPartial)
            .process(TEMPLATE, json!({}))
            .unwrap_err();
        match err {
            EngineError::TemplateHalted {
                location,
                partial_output,
            } => {
                assert_eq!(location.byte_offset, 14);
                assert_eq!(partial_output, None);
            }
            other => panic!("expected halt, got {other:?}"),
        }
    }

    #[test]
    fn test_halt_keeps_partial_when_configured() {
        let err = guarded_engine(HaltOutputPolicy::KeepPartial)
            .process(TEMPLATE, json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::TemplateHalted { partial_output: Some(ref p), .. } if p == PARTIAL
        ));
    }

    #[test]
    fn test_early_exit_is_success() {
        let template = TEMPLATE.replace("g:stop", "g:exit");
        let discarded = guarded_engine(HaltOutputPolicy::DiscardPartial)
            .process(&template, json!({}))
            .unwrap();
        assert_eq!(discarded, "");

        let kept = guarded_engine(HaltOutputPolicy::KeepPartial)
            .process(&template, json!({}))
            .unwrap();
        assert_eq!(kept, PARTIAL);
    }

    #[test]
    fn test_halt_inside_iteration_stops_remaining_items() {
        let output = guarded_engine(HaltOutputPolicy::KeepPartial)
            .process(
                "<i th:each=\"x : ${items}\"><b th:if=\"${x} == 2\" g:exit></b>x</i>",
                json!({"items": [1, 2, 3]}),
            )
            .unwrap();
        assert_eq!(output, "<i>x</i><i></i>");
    }
}

mod properties {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLES: &[&str] = &[
        "<!DOCTYPE html>\n<html>\n<head><title>t</title></head>\n<body>\n<p class=x>a<br>b</p>\n</body>\n</html>\n",
        "<ul>\n  <li>one\n  <li>two\n</ul>",
        "<p th:text=\"${x}\" data-th-if=\"${y}\">kept as is</p><!--/* c */--><!-- n -->",
        "<svg viewBox='0 0 1 1'><path d=\"M0 0\"/></svg><script>if (a<b) {}</script>",
        "<p>a</p></span>b",
        "<br></br><input></input>",
        "<div><em>x</div></em >",
    ];

    #[test]
    fn test_engine_without_dialects_is_identity() {
        let engine = TemplateEngine::builder()
            .config(EngineConfig::default().with_comment_policy(verdant::CommentPolicy::KeepParserComments))
            .build()
            .unwrap();
        for source in SAMPLES {
            assert_eq!(&engine.process(source, json!({})).unwrap(), source);
        }
    }

    #[test]
    fn test_processing_is_deterministic() {
        let engine = TemplateEngine::standard().unwrap();
        let template = "<dl><th:block th:each=\"e : ${m}\"><dt th:text=\"${e.key}\">k</dt><dd th:text=\"${e.value}\">v</dd></th:block></dl>";
        let data = json!({"m": {"z": 1, "a": 2, "m": 3}});
        let first = engine.process(template, data.clone()).unwrap();
        for _ in 0..10 {
            assert_eq!(engine.process(template, data.clone()).unwrap(), first);
        }
        assert_eq!(first, "<dl><dt>a</dt><dd>2</dd><dt>m</dt><dd>3</dd><dt>z</dt><dd>1</dd></dl>");
    }

    #[test]
    fn test_processing_output_again_is_idempotent() {
        let engine = TemplateEngine::standard().unwrap();
        let once = engine
            .process(
                "<ul><li th:each=\"x : ${items}\" th:text=\"${x}\">_</li></ul>",
                json!({"items": ["a", "b"]}),
            )
            .unwrap();
        let twice = engine.process(&once, json!({"items": ["c"]})).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_iteration_produces_one_sibling_per_item() {
        let engine = TemplateEngine::standard().unwrap();
        for n in [0usize, 1, 7] {
            let items: Vec<usize> = (0..n).collect();
            let output = engine
                .process("<p><i th:each=\"n : ${items}\">.</i></p>", json!({"items": items}))
                .unwrap();
            assert_eq!(output.matches("<i>").count(), n);
        }
    }

    #[test]
    fn test_concurrent_processing_shares_engine() {
        let engine = TemplateEngine::standard().unwrap();
        let template = engine.parse("<p th:text=\"${n}\">_</p>").unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8i64)
                .map(|n| {
                    let engine = &engine;
                    let template = &template;
                    scope.spawn(move || {
                        engine
                            .process_template(template, Context::new().with("n", n))
                            .unwrap()
                    })
                })
                .collect();
            for (n, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.join().unwrap(), format!("<p>{n}</p>"));
            }
        });
    }
}

mod parsing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_malformed_reports_position() {
        let err = TemplateEngine::standard()
            .unwrap()
            .process("<p>\n  <!-- open", json!({}))
            .unwrap_err();
        match err {
            EngineError::Parse(ParseError::Malformed { location, .. }) => {
                assert_eq!(location, Location::new(2, 3, 6));
            }
            other => panic!("expected malformed markup, got {other:?}"),
        }
    }

    #[test]
    fn test_long_whitespace_run_keeps_positions() {
        let template = format!("<a x{}>\n<!-- open", " ".repeat(300));
        let err = TemplateEngine::standard()
            .unwrap()
            .process(&template, json!({}))
            .unwrap_err();
        match err {
            EngineError::Parse(ParseError::Malformed { location, .. }) => {
                assert_eq!(location, Location::new(2, 1, 306));
                assert!(location.byte_offset < template.len());
            }
            other => panic!("expected malformed markup, got {other:?}"),
        }
    }

    #[test]
    fn test_long_whitespace_before_attribute_operator() {
        let template = format!("<a x{}=\"1\" th:text=\"${{t}}\">_</a>", " ".repeat(300));
        let output = TemplateEngine::standard()
            .unwrap()
            .process(&template, json!({"t": "ok"}))
            .unwrap();
        assert_eq!(output, format!("<a x{}=\"1\">ok</a>", " ".repeat(300)));
    }

    #[test]
    fn test_strict_mode_from_config() {
        let engine = TemplateEngine::builder()
            .config(EngineConfig::from_json_str(r#"{"mode": "strict"}"#).unwrap())
            .dialect(verdant::standard::dialect())
            .build()
            .unwrap();
        assert_eq!(engine.config().mode, ParseMode::Strict);

        let err = engine.process("<a><b></a></b>", json!({})).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Parse(ParseError::Unbalanced { ref expected, .. }) if expected == "b"
        ));

        // Tolerant parsing accepts the same markup.
        assert!(TemplateEngine::standard()
            .unwrap()
            .process("<a><b></a></b>", json!({}))
            .is_ok());
    }

    #[test]
    fn test_root_data_must_be_object() {
        let err = TemplateEngine::standard()
            .unwrap()
            .process("<p></p>", json!([1, 2]))
            .unwrap_err();
        assert!(matches!(err, EngineError::TypeError { .. }));
    }

    #[test]
    fn test_process_reader_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<h1 th:text=\"${{title}}\">Title</h1>\n<p>body</p>\n").unwrap();

        let engine = TemplateEngine::standard().unwrap();
        let reader = std::fs::File::open(file.path()).unwrap();
        let mut output = Vec::new();
        engine
            .process_reader(reader, Context::new().with("title", "Hello"), &mut output)
            .unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "<h1>Hello</h1>\n<p>body</p>\n"
        );
    }

    #[test]
    fn test_process_reader_writes_nothing_on_error() {
        let engine = TemplateEngine::standard().unwrap();
        let mut output = Vec::new();
        let result = engine.process_reader(
            "<p th:text=\"${a.b}\">x</p>".as_bytes(),
            Context::new().with("a", "text"),
            &mut output,
        );
        assert!(matches!(result, Err(EngineError::ExpressionEvaluation { .. })));
        assert!(output.is_empty());
    }
}

mod context {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lazy_binding_only_computed_when_used() {
        let engine = TemplateEngine::standard().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut context = Context::new();
        let counter = Arc::clone(&calls);
        context.bind_lazy("expensive", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::from("computed")
        });
        let template = engine.parse("<p th:if=\"${show}\" th:text=\"${expensive}\">_</p>").unwrap();
        let output = engine.process_template(&template, context.with("show", false)).unwrap();
        assert_eq!(output, "");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut context = Context::new().with("show", true);
        let counter = Arc::clone(&calls);
        context.bind_lazy("expensive", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::from("computed")
        });
        let output = engine
            .process_template(
                &engine.parse("<p th:if=\"${show}\" th:text=\"${expensive}\" th:title=\"${expensive}\">_</p>").unwrap(),
                context,
            )
            .unwrap();
        assert_eq!(output, "<p title=\"computed\">computed</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_with_local_visible_in_block_children() {
        let output = TemplateEngine::standard()
            .unwrap()
            .process(
                "<div th:with=\"label=${l}\" th:remove=\"tag\"><b th:text=\"${label}\">_</b></div>",
                json!({"l": "kept"}),
            )
            .unwrap();
        assert_eq!(output, "<b>kept</b>");
    }
}
