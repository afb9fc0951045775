// Integration tests for the template engine

use std::cell::Cell;
use std::rc::Rc;

use rango::{
    render, render_with, Callable, Context, Engine, FilterDef, Library, Options,
    TemplateError, Value,
};

fn render_ok(source: &str, context: &mut Context) -> String {
    render(source, context).expect("render succeeds")
}

fn json_context(json: serde_json::Value) -> Context {
    Context::from(json)
}

// === TEXT AND VARIABLES ===

#[test]
fn test_pure_text_renders_identically() {
    let text = "no tags here, just text\nwith newlines & symbols <b>";
    let mut context = Context::new();
    assert_eq!(render_ok(text, &mut context), text);
}

#[test]
fn test_variable_interpolation() {
    let mut context = json_context(serde_json::json!({"var1": 4}));
    assert_eq!(render_ok("{{var1}}", &mut context), "4");
}

#[test]
fn test_dotted_lookup_and_indexing() {
    let mut context = json_context(serde_json::json!({
        "user": {"name": "ada", "langs": ["rust", "python"]}
    }));
    assert_eq!(
        render_ok("{{ user.name }}/{{ user.langs.1 }}", &mut context),
        "ada/python"
    );
}

#[test]
fn test_zero_arg_callable_in_lookup_chain() {
    let mut context = Context::new();
    let mut map = rustc_hash::FxHashMap::default();
    map.insert(
        "greeting".to_string(),
        Value::Callable(Callable::new(|| Value::Str("hi".into()))),
    );
    context.set("obj", Value::Map(map));
    assert_eq!(render_ok("{{ obj.greeting }}", &mut context), "hi");
}

#[test]
fn test_missing_variable_renders_empty_by_default() {
    let mut context = Context::new();
    assert_eq!(render_ok("[{{ missing }}]", &mut context), "[]");
}

#[test]
fn test_string_if_invalid_substitutes_variable_name() {
    let mut context = Context::new();
    let options = Options {
        string_if_invalid: "INVALID:%s".to_string(),
        ..Options::default()
    };
    let out = render_with(
        "{{ missing.var }}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap();
    assert_eq!(out, "INVALID:missing.var");
}

#[test]
fn test_string_if_invalid_skips_filters() {
    let mut context = Context::new();
    let options = Options {
        string_if_invalid: "bad %s".to_string(),
        ..Options::default()
    };
    let out = render_with(
        "{{ missing|upper }}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap();
    assert_eq!(out, "bad missing");
}

// === AUTOESCAPING ===

#[test]
fn test_autoescape_on_by_default() {
    let mut context = json_context(serde_json::json!({"var1": "<b>"}));
    assert_eq!(render_ok("{{var1}}", &mut context), "&lt;b&gt;");
}

#[test]
fn test_autoescape_off_context() {
    let mut context = Context::with_autoescape(false);
    context.set("v", "<b>&");
    assert_eq!(render_ok("{{ v }}", &mut context), "<b>&");
}

#[test]
fn test_safe_filter_bypasses_escaping() {
    let mut context = Context::new();
    context.set("v", "<b>");
    assert_eq!(render_ok("{{ v|safe }}", &mut context), "<b>");
}

#[test]
fn test_autoescape_tag_scopes_the_flag() {
    let mut context = Context::new();
    context.set("v", "<b>");
    let out = render_ok(
        "{% autoescape off %}{{ v }}{% endautoescape %}|{{ v }}",
        &mut context,
    );
    assert_eq!(out, "<b>|&lt;b&gt;");
}

// === FILTERS ===

#[test]
fn test_filter_chaining_is_order_sensitive() {
    let mut context = Context::new();
    context.set("v", "aBC");
    assert_eq!(render_ok("{{ v|lower|capfirst }}", &mut context), "Abc");
    assert_eq!(render_ok("{{ v|capfirst|lower }}", &mut context), "abc");
}

#[test]
fn test_filter_arguments() {
    let mut context = json_context(serde_json::json!({
        "items": ["a", "b", "c"],
        "empty": ""
    }));
    assert_eq!(render_ok("{{ items|join:'-' }}", &mut context), "a-b-c");
    assert_eq!(
        render_ok("{{ empty|default:'fallback' }}", &mut context),
        "fallback"
    );
    assert_eq!(render_ok("{{ items|length }}", &mut context), "3");
}

#[test]
fn test_filter_tag_applies_chain_to_body() {
    let mut context = Context::new();
    context.set("name", "ada");
    let out = render_ok(
        "{% filter upper %}-{{ name }}-{% endfilter %}",
        &mut context,
    );
    assert_eq!(out, "-ADA-");
}

#[test]
fn test_unknown_filter_is_compile_error() {
    let mut context = Context::new();
    let err = render("{{ x|nope }}", &mut context).unwrap_err();
    assert!(err.to_string().contains("Invalid filter: 'nope'"));
}

// === CONDITIONALS ===

#[test]
fn test_if_and_else() {
    let mut context = json_context(serde_json::json!({"a": false, "b": true}));
    assert_eq!(
        render_ok("{% if a and b %}Y{% else %}N{% endif %}", &mut context),
        "N"
    );
    context.set("a", true);
    assert_eq!(
        render_ok("{% if a and b %}Y{% else %}N{% endif %}", &mut context),
        "Y"
    );
}

#[test]
fn test_elif_arms_evaluate_in_order() {
    let mut context = json_context(serde_json::json!({"n": 2}));
    let source = "{% if n == 1 %}one{% elif n == 2 %}two{% else %}many{% endif %}";
    assert_eq!(render_ok(source, &mut context), "two");
}

#[test]
fn test_and_short_circuits_observably() {
    let calls = Rc::new(Cell::new(0u32));
    let probe = {
        let calls = calls.clone();
        Callable::new(move || {
            calls.set(calls.get() + 1);
            Value::Bool(true)
        })
    };
    let mut context = Context::new();
    context.set("a", false);
    context.set("probe", Value::Callable(probe));

    let source = "{% if a and probe %}Y{% else %}N{% endif %}";
    assert_eq!(render_ok(source, &mut context), "N");
    assert_eq!(calls.get(), 0, "right operand must not be evaluated");

    context.set("a", true);
    assert_eq!(render_ok(source, &mut context), "Y");
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_or_short_circuits() {
    let calls = Rc::new(Cell::new(0u32));
    let probe = {
        let calls = calls.clone();
        Callable::new(move || {
            calls.set(calls.get() + 1);
            Value::Bool(false)
        })
    };
    let mut context = Context::new();
    context.set("a", true);
    context.set("probe", Value::Callable(probe));
    assert_eq!(
        render_ok("{% if a or probe %}Y{% endif %}", &mut context),
        "Y"
    );
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_loose_and_strict_equality_operators() {
    let mut context = Context::new();
    assert_eq!(render_ok("{% if 1 == 1.0 %}Y{% endif %}", &mut context), "Y");
    assert_eq!(
        render_ok("{% if 1 === 1.0 %}Y{% else %}N{% endif %}", &mut context),
        "Y"
    );
    assert_eq!(
        render_ok("{% if 1 == '1' %}Y{% else %}N{% endif %}", &mut context),
        "N"
    );
    assert_eq!(
        render_ok("{% if 1 !== '1' %}Y{% else %}N{% endif %}", &mut context),
        "Y"
    );
}

#[test]
fn test_in_operator_and_comparator_failure() {
    let mut context = json_context(serde_json::json!({"items": [1, 2, 3]}));
    assert_eq!(
        render_ok("{% if 2 in items %}Y{% endif %}", &mut context),
        "Y"
    );
    assert_eq!(
        render_ok("{% if 9 not in items %}Y{% endif %}", &mut context),
        "Y"
    );
    // `in` against a scalar cannot be applied: false, never an error.
    assert_eq!(
        render_ok("{% if 2 in 5 %}Y{% else %}N{% endif %}", &mut context),
        "N"
    );
}

#[test]
fn test_missing_condition_variable_is_falsy() {
    let mut context = Context::new();
    assert_eq!(
        render_ok("{% if missing %}Y{% else %}N{% endif %}", &mut context),
        "N"
    );
}

// === FOR LOOPS ===

#[test]
fn test_forloop_counter() {
    let mut context = json_context(serde_json::json!({"items": [10, 20, 30]}));
    assert_eq!(
        render_ok(
            "{% for i in items %}{{forloop.counter}}{% endfor %}",
            &mut context
        ),
        "123"
    );
}

#[test]
fn test_forloop_counter_properties() {
    // counter + revcounter0 == len for every iteration; first/last true once.
    let mut context = json_context(serde_json::json!({"items": ["a", "b", "c", "d"]}));
    let source = "{% for i in items %}\
{{ forloop.counter }}+{{ forloop.revcounter0 }} \
{% if forloop.first %}F{% endif %}{% if forloop.last %}L{% endif %};\
{% endfor %}";
    assert_eq!(render_ok(source, &mut context), "1+3 F;2+2 ;3+1 ;4+0 L;");
}

#[test]
fn test_for_reversed() {
    let mut context = json_context(serde_json::json!({"items": [1, 2, 3]}));
    assert_eq!(
        render_ok("{% for i in items reversed %}{{ i }}{% endfor %}", &mut context),
        "321"
    );
}

#[test]
fn test_for_unpacking() {
    let mut context = json_context(serde_json::json!({
        "pairs": [["a", 1], ["b", 2]]
    }));
    assert_eq!(
        render_ok(
            "{% for k, v in pairs %}{{ k }}={{ v }};{% endfor %}",
            &mut context
        ),
        "a=1;b=2;"
    );
}

#[test]
fn test_for_unpack_arity_mismatch_is_render_error() {
    let mut context = json_context(serde_json::json!({"pairs": [["a", 1, 9]]}));
    let err = render(
        "{% for k, v in pairs %}{{ k }}{% endfor %}",
        &mut context,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Need 2 values to unpack"));
    assert!(err.to_string().contains("got 3"));
}

#[test]
fn test_for_empty_clause() {
    let mut context = json_context(serde_json::json!({"items": []}));
    let source = "{% for i in items %}{{ i }}{% empty %}none{% endfor %}";
    assert_eq!(render_ok(source, &mut context), "none");
    // A missing sequence also counts as empty.
    let mut context = Context::new();
    assert_eq!(render_ok(source, &mut context), "none");
}

#[test]
fn test_for_scalar_coerces_to_single_element() {
    let mut context = json_context(serde_json::json!({"items": 7}));
    assert_eq!(
        render_ok("{% for i in items %}[{{ i }}]{% endfor %}", &mut context),
        "[7]"
    );
}

#[test]
fn test_for_over_map_iterates_sorted_pairs() {
    let mut context = json_context(serde_json::json!({"map": {"b": 2, "a": 1}}));
    assert_eq!(
        render_ok(
            "{% for k, v in map %}{{ k }}{{ v }} {% endfor %}",
            &mut context
        ),
        "a1 b2 "
    );
}

#[test]
fn test_parentloop() {
    let mut context = json_context(serde_json::json!({"rows": [[1, 2], [3]]}));
    let source = "{% for row in rows %}{% for cell in row %}\
{{ forloop.parentloop.counter }}.{{ forloop.counter }} {% endfor %}{% endfor %}";
    assert_eq!(render_ok(source, &mut context), "1.1 1.2 2.1 ");
}

#[test]
fn test_loop_variable_scope_pops_after_loop() {
    let mut context = json_context(serde_json::json!({"items": [1], "i": "outer"}));
    assert_eq!(
        render_ok("{% for i in items %}{{ i }}{% endfor %}{{ i }}", &mut context),
        "1outer"
    );
}

// === WITH ===

#[test]
fn test_with_binds_and_pops() {
    let mut context = json_context(serde_json::json!({"user": {"name": "ada"}}));
    let out = render_ok(
        "{% with n=user.name m='x' %}{{ n }}{{ m }}{% endwith %}[{{ n }}]",
        &mut context,
    );
    assert_eq!(out, "adax[]");
}

#[test]
fn test_with_legacy_form() {
    let mut context = json_context(serde_json::json!({"items": ["first"]}));
    assert_eq!(
        render_ok(
            "{% with items.0 as head %}{{ head }}{% endwith %}",
            &mut context
        ),
        "first"
    );
}

// === CYCLE / RESETCYCLE / IFCHANGED / FIRSTOF / WIDTHRATIO ===

#[test]
fn test_cycle_wraps() {
    let mut context = json_context(serde_json::json!({"items": [0, 0, 0]}));
    assert_eq!(
        render_ok(
            "{% for i in items %}{% cycle 'a' 'b' %}{% endfor %}",
            &mut context
        ),
        "aba"
    );
}

#[test]
fn test_named_cycle_reuse_and_reset() {
    let mut context = Context::new();
    let out = render_ok(
        "{% cycle 'a' 'b' as c %}{% cycle c %}{% resetcycle c %}{% cycle c %}",
        &mut context,
    );
    assert_eq!(out, "aba");
}

#[test]
fn test_silent_cycle_binds_without_output() {
    let mut context = json_context(serde_json::json!({"items": [0, 0]}));
    let out = render_ok(
        "{% for i in items %}{% cycle 'x' 'y' as c silent %}[{{ c }}]{% endfor %}",
        &mut context,
    );
    assert_eq!(out, "[x][y]");
}

#[test]
fn test_ifchanged_suppresses_repeats() {
    let mut context = json_context(serde_json::json!({"items": [1, 1, 2, 2, 3]}));
    assert_eq!(
        render_ok(
            "{% for i in items %}{% ifchanged %}{{ i }}{% endifchanged %}{% endfor %}",
            &mut context
        ),
        "123"
    );
}

#[test]
fn test_ifchanged_resets_per_loop_instance() {
    let mut context = json_context(serde_json::json!({"rows": [[1, 1], [1, 2]]}));
    let source = "{% for row in rows %}{% for x in row %}\
{% ifchanged %}{{ x }}{% endifchanged %}{% endfor %};{% endfor %}";
    // The second inner loop starts fresh, so its leading 1 renders again.
    assert_eq!(render_ok(source, &mut context), "1;12;");
}

#[test]
fn test_ifchanged_with_watch_expressions_and_else() {
    let mut context = json_context(serde_json::json!({
        "entries": [
            {"day": 1, "note": "a"},
            {"day": 1, "note": "b"},
            {"day": 2, "note": "c"}
        ]
    }));
    let source = "{% for e in entries %}\
{% ifchanged e.day %}{{ e.day }}:{% else %}.{% endifchanged %}{{ e.note }}{% endfor %}";
    assert_eq!(render_ok(source, &mut context), "1:a.b2:c");
}

#[test]
fn test_firstof() {
    let mut context = json_context(serde_json::json!({"a": "", "b": 0, "c": "<hit>"}));
    assert_eq!(
        render_ok("{% firstof a b c 'fallback' %}", &mut context),
        "&lt;hit&gt;"
    );
    let mut context = Context::new();
    assert_eq!(
        render_ok("{% firstof a b 'fallback' %}", &mut context),
        "fallback"
    );
}

#[test]
fn test_widthratio() {
    let mut context = json_context(serde_json::json!({"value": 175, "max": 200}));
    assert_eq!(
        render_ok("{% widthratio value max 100 %}", &mut context),
        "88"
    );
    context.set("max", 0);
    assert_eq!(render_ok("{% widthratio value max 100 %}", &mut context), "0");
}

#[test]
fn test_widthratio_as_var() {
    let mut context = json_context(serde_json::json!({"value": 1, "max": 2}));
    assert_eq!(
        render_ok("{% widthratio value max 100 as w %}w={{ w }}", &mut context),
        "w=50"
    );
}

#[test]
fn test_widthratio_non_numeric_is_render_error() {
    let mut context = json_context(serde_json::json!({"value": [1], "max": 10}));
    let err = render("{% widthratio value max 100 %}", &mut context).unwrap_err();
    assert!(err.to_string().contains("must be numeric"));
}

// === COMMENT AND VERBATIM ===

#[test]
fn test_comment_contributes_nothing() {
    let mut context = Context::new();
    assert_eq!(
        render_ok("a{% comment %} {{ x }} {% bogus %} {% endcomment %}b", &mut context),
        "ab"
    );
}

#[test]
fn test_verbatim_preserves_delimiters() {
    let mut context = Context::new();
    context.set("x", "ignored");
    assert_eq!(
        render_ok(
            "{% verbatim %}{{ x }} and {% if y %}{% endverbatim %}",
            &mut context
        ),
        "{{ x }} and {% if y %}"
    );
}

// === INHERITANCE ===

#[test]
fn test_block_override() {
    let mut context = Context::new();
    let engine = Engine::new(
        [
            ("base", "A {% block c %}{% endblock %} B"),
            ("child", "{% extends 'base' %}{% block c %}X{% endblock %}"),
        ],
        Options::default(),
    )
    .unwrap();
    assert_eq!(engine.render_to_string("child", &mut context).unwrap(), "A X B");
}

#[test]
fn test_unoverridden_block_keeps_default() {
    let mut context = Context::new();
    let engine = Engine::new(
        [
            ("base", "[{% block a %}da{% endblock %}|{% block b %}db{% endblock %}]"),
            ("child", "{% extends 'base' %}{% block b %}X{% endblock %}"),
        ],
        Options::default(),
    )
    .unwrap();
    assert_eq!(
        engine.render_to_string("child", &mut context).unwrap(),
        "[da|X]"
    );
}

#[test]
fn test_block_super_chain_interleaves_parent_to_child() {
    let mut context = Context::new();
    let engine = Engine::new(
        [
            ("base", "[{% block c %}B{% endblock %}]"),
            (
                "mid",
                "{% extends 'base' %}{% block c %}{{ block.super }}+M{% endblock %}",
            ),
            (
                "leaf",
                "{% extends 'mid' %}{% block c %}{{ block.super }}+L{% endblock %}",
            ),
        ],
        Options::default(),
    )
    .unwrap();
    assert_eq!(
        engine.render_to_string("leaf", &mut context).unwrap(),
        "[B+M+L]"
    );
}

#[test]
fn test_block_inside_loop_sees_override_every_iteration() {
    let mut context = json_context(serde_json::json!({"items": [1, 2]}));
    let engine = Engine::new(
        [
            (
                "base",
                "{% for i in items %}{% block row %}r{% endblock %}{% endfor %}",
            ),
            (
                "child",
                "{% extends 'base' %}{% block row %}[{{ i }}]{% endblock %}",
            ),
        ],
        Options::default(),
    )
    .unwrap();
    assert_eq!(
        engine.render_to_string("child", &mut context).unwrap(),
        "[1][2]"
    );
}

#[test]
fn test_extends_target_from_variable_and_compiled_template() {
    let engine = Engine::new(
        [("base", "A{% block c %}B{% endblock %}")],
        Options::default(),
    )
    .unwrap();

    let mut context = Context::new();
    context.set("parent_name", "base");
    let out = engine
        .render_template_string(
            "{% extends parent_name %}{% block c %}X{% endblock %}",
            &mut context,
        )
        .unwrap();
    assert_eq!(out, "AX");

    let compiled = engine.get_template("base").unwrap();
    let mut context = Context::new();
    context.set("parent", Value::Template(compiled));
    let out = engine
        .render_template_string(
            "{% extends parent %}{% block c %}Y{% endblock %}",
            &mut context,
        )
        .unwrap();
    assert_eq!(out, "AY");
}

#[test]
fn test_block_super_without_inheritance_is_render_error() {
    let mut context = Context::new();
    let err = render(
        "{% block c %}{{ block.super }}{% endblock %}",
        &mut context,
    )
    .unwrap_err();
    assert!(err.to_string().contains("block.super"));
}

#[test]
fn test_extends_missing_parent_is_error() {
    let mut context = Context::new();
    let err = render_with(
        "{% extends 'nope' %}",
        &mut context,
        Vec::<(String, String)>::new(),
        Options::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("template does not exist: nope"));
}

// === INCLUDE ===

#[test]
fn test_include_shares_context() {
    let mut context = json_context(serde_json::json!({"name": "ada"}));
    let out = render_with(
        "[{% include 'part' %}]",
        &mut context,
        [("part", "hi {{ name }}")],
        Options::default(),
    )
    .unwrap();
    assert_eq!(out, "[hi ada]");
}

#[test]
fn test_include_with_bindings() {
    let mut context = Context::new();
    let out = render_with(
        "{% include 'part' with name='bob' %}",
        &mut context,
        [("part", "hi {{ name }}")],
        Options::default(),
    )
    .unwrap();
    assert_eq!(out, "hi bob");
}

#[test]
fn test_include_only_isolates_context() {
    let mut context = json_context(serde_json::json!({"outer": "X"}));
    let out = render_with(
        "{% include 'part' with a='1' only %}",
        &mut context,
        [("part", "{{ outer }}{{ a }}")],
        Options::default(),
    )
    .unwrap();
    assert_eq!(out, "1");
}

#[test]
fn test_include_missing_template_is_error() {
    let mut context = Context::new();
    let err = render("{% include 'nope' %}", &mut context).unwrap_err();
    assert!(err.to_string().contains("template does not exist: nope"));
}

// === CUSTOM LIBRARIES ===

fn extras_library() -> Library {
    let mut extras = Library::new();
    extras.register_filter(
        "shout",
        FilterDef::new(|v, _, _| Value::Str(format!("{}!", v.display_string()))),
    );
    extras.simple_tag("hello", false, |_, args, kwargs| {
        let punct = kwargs
            .get("punct")
            .map(|v| v.display_string())
            .unwrap_or_default();
        Value::Str(format!("hello {}{}", args[0].display_string(), punct))
    });
    extras.simple_tag("whoami", true, |context, _, _| {
        let name = context
            .and_then(|c| c.get("name").cloned())
            .unwrap_or(Value::None);
        Value::Str(format!("I am {}", name.display_string()))
    });
    extras
}

#[test]
fn test_load_makes_library_tags_and_filters_available() {
    let mut context = Context::new();
    let options = Options {
        libraries: vec![("extras".to_string(), extras_library())],
        ..Options::default()
    };
    let out = render_with(
        "{% load extras %}{% hello 'world' punct='!' %} {{ 'x'|shout }}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap();
    assert_eq!(out, "hello world! x!");
}

#[test]
fn test_simple_tag_with_context_opt_in() {
    let mut context = Context::new();
    context.set("name", "ada");
    let options = Options {
        libraries: vec![("extras".to_string(), extras_library())],
        ..Options::default()
    };
    let out = render_with(
        "{% load extras %}{% whoami %}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap();
    assert_eq!(out, "I am ada");
}

#[test]
fn test_selective_load_from_library() {
    let mut context = Context::new();
    let options = Options {
        libraries: vec![("extras".to_string(), extras_library())],
        ..Options::default()
    };
    let out = render_with(
        "{% load shout from extras %}{{ 'ok'|shout }}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap();
    assert_eq!(out, "ok!");
}

#[test]
fn test_library_filter_unavailable_without_load() {
    let mut context = Context::new();
    let options = Options {
        libraries: vec![("extras".to_string(), extras_library())],
        ..Options::default()
    };
    let err = render_with(
        "{{ 'x'|shout }}",
        &mut context,
        Vec::<(String, String)>::new(),
        options,
    )
    .unwrap_err();
    assert!(err.to_string().contains("Invalid filter: 'shout'"));
}

#[test]
fn test_inclusion_tag_renders_its_template() {
    let mut extras = Library::new();
    extras.inclusion_tag("badge", "badge_tpl", false, |_, args, _| {
        let mut data = rustc_hash::FxHashMap::default();
        data.insert("label".to_string(), args[0].clone());
        data
    });
    let options = Options {
        libraries: vec![("extras".to_string(), extras)],
        ..Options::default()
    };
    let mut context = Context::new();
    let out = render_with(
        "{% load extras %}{% badge 'new' %}",
        &mut context,
        [("badge_tpl", "[{{ label }}]")],
        options,
    )
    .unwrap();
    assert_eq!(out, "[new]");
}

// === ERRORS AND DIAGNOSTICS ===

#[test]
fn test_unregistered_tag_names_itself_and_line() {
    let mut context = Context::new();
    let err = render("line1\n{% bogus %}", &mut context).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'bogus'"));
    assert!(message.contains("line 2"));
}

#[test]
fn test_debug_render_error_carries_snippet() {
    let engine = Engine::new(
        Vec::<(String, String)>::new(),
        Options {
            debug: true,
            ..Options::default()
        },
    )
    .unwrap();
    let mut context = json_context(serde_json::json!({"pairs": [[1, 2, 3]]}));
    let err = engine
        .render_template_string(
            "{% for a, b in pairs %}x{% endfor %}",
            &mut context,
        )
        .unwrap_err();
    match err {
        TemplateError::Render { error, snippet } => {
            assert!(error.to_string().contains("Need 2 values"));
            let snippet = snippet.expect("debug mode attaches a snippet");
            assert_eq!(snippet.line, 1);
        }
        other => panic!("expected render error, got {:?}", other),
    }
}

// === DETERMINISM AND CACHING ===

#[test]
fn test_rendering_is_a_pure_function_of_tree_and_context() {
    let engine = Engine::new(
        [("page", "{% for i in items %}{{ i }}{% cycle 'a' 'b' %}{% endfor %}")],
        Options::default(),
    )
    .unwrap();
    let data = serde_json::json!({"items": [1, 2, 3]});
    let mut first_ctx = Context::from(data.clone());
    let mut second_ctx = Context::from(data);
    let first = engine.render_to_string("page", &mut first_ctx).unwrap();
    let second = engine.render_to_string("page", &mut second_ctx).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_template_compiled_once_across_renders() {
    let engine = Engine::new([("page", "{{ x }}")], Options::default()).unwrap();
    let mut context = Context::new();
    context.set("x", 1);
    engine.render_to_string("page", &mut context).unwrap();
    engine.render_to_string("page", &mut context).unwrap();
    let first = engine.get_template("page").unwrap();
    let second = engine.get_template("page").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
}

#[test]
fn test_context_reusable_across_renders() {
    let mut context = json_context(serde_json::json!({"v": "x"}));
    assert_eq!(render_ok("{{ v }}", &mut context), "x");
    assert_eq!(render_ok("{{ v }}{{ v }}", &mut context), "xx");
}
