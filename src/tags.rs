//! Built-in tag compilers
//!
//! One `do_*` function per built-in tag, each matching the registered tag
//! contract: it receives the live [`Parser`] (for recursive sub-parsing of
//! its body) and the triggering token (for argument text and line number),
//! and returns the compiled node. [`default_library`] assembles them, plus
//! the default filters, into the always-loaded builtin registry.

use rustc_hash::FxHashMap;
use std::rc::Rc;

use crate::error::SyntaxError;
use crate::library::Library;
use crate::parser::conditions::Condition;
use crate::parser::expressions::FilterExpression;
use crate::parser::lexer::Token;
use crate::parser::parser::Parser;
use crate::render::conditional::IfChangedNode;
use crate::render::inheritance::{BlockNode, ExtendsNode, IncludeNode};
use crate::render::loops::ForNode;
use crate::render::node::{
    AutoescapeNode, CommentNode, CycleNode, FilterNode, FirstofNode, IfNode, LoadNode,
    Node, ResetCycleNode, VerbatimNode, WidthratioNode, WithNode,
};

/// The always-loaded registry: every built-in tag and filter.
pub fn default_library() -> Library {
    let mut library = Library::new();
    library.register_tag("if", do_if);
    library.register_tag("for", do_for);
    library.register_tag("with", do_with);
    library.register_tag("filter", do_filter);
    library.register_tag("autoescape", do_autoescape);
    library.register_tag("cycle", do_cycle);
    library.register_tag("resetcycle", do_resetcycle);
    library.register_tag("ifchanged", do_ifchanged);
    library.register_tag("firstof", do_firstof);
    library.register_tag("widthratio", do_widthratio);
    library.register_tag("comment", do_comment);
    library.register_tag("verbatim", do_verbatim);
    library.register_tag("load", do_load);
    library.register_tag("block", do_block);
    library.register_tag("extends", do_extends);
    library.register_tag("include", do_include);
    crate::filters::register_defaults(&mut library);
    library
}

/// Parse `key=expr` pairs (and, for `with`, the legacy `expr as key` form)
/// off the front of `bits`, consuming what was recognized.
fn token_kwargs(
    bits: &mut Vec<String>,
    parser: &Parser,
    support_legacy: bool,
) -> Result<Vec<(String, FilterExpression)>, SyntaxError> {
    let mut kwargs: Vec<(String, FilterExpression)> = Vec::new();
    if bits.is_empty() {
        return Ok(kwargs);
    }

    let kwarg_format = split_kwarg_bit(&bits[0]).is_some();
    if !kwarg_format && (!support_legacy || bits.len() < 3 || bits[1] != "as") {
        return Ok(kwargs);
    }

    while !bits.is_empty() {
        let (key, value_text) = if kwarg_format {
            match split_kwarg_bit(&bits[0]) {
                Some((key, value)) => {
                    let pair = (key.to_string(), value.to_string());
                    bits.remove(0);
                    pair
                }
                None => return Ok(kwargs),
            }
        } else {
            if bits.len() < 3 || bits[1] != "as" {
                return Ok(kwargs);
            }
            let pair = (bits[2].clone(), bits[0].clone());
            bits.drain(..3);
            pair
        };
        kwargs.push((key, parser.compile_filter(&value_text)?));
        if !kwarg_format {
            if bits.first().map(String::as_str) != Some("and") {
                return Ok(kwargs);
            }
            bits.remove(0);
        }
    }
    Ok(kwargs)
}

fn split_kwarg_bit(bit: &str) -> Option<(&str, &str)> {
    let (name, value) = bit.split_once('=')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !name.starts_with(|ch: char| ch.is_ascii_digit());
    if valid {
        Some((name, value))
    } else {
        None
    }
}

fn do_if(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    let condition = Condition::build(&bits[1..], parser)?;
    let nodelist = parser.parse(&["elif", "else", "endif"])?;
    let mut arms = vec![(Some(condition), nodelist)];
    let mut end = parser.next_token_required(&["elif", "else", "endif"])?;

    while end.contents.starts_with("elif") {
        let bits = end.split_contents();
        let condition = Condition::build(&bits[1..], parser)?;
        let nodelist = parser.parse(&["elif", "else", "endif"])?;
        arms.push((Some(condition), nodelist));
        end = parser.next_token_required(&["elif", "else", "endif"])?;
    }

    if end.contents == "else" {
        let nodelist = parser.parse(&["endif"])?;
        arms.push((None, nodelist));
        end = parser.next_token_required(&["endif"])?;
    }

    if end.contents != "endif" {
        return Err(SyntaxError::new(
            format!(
                "Malformed template tag at line {}: \"{}\"",
                end.line, end.contents
            ),
            end.line,
        ));
    }

    Ok(Node::If(IfNode {
        arms,
        line: token.line,
    }))
}

fn do_for(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() < 4 {
        return Err(SyntaxError::new(
            format!(
                "'for' statements should have at least four words: {}",
                token.contents
            ),
            token.line,
        ));
    }

    let reversed = bits[bits.len() - 1] == "reversed";
    let in_index = if reversed {
        bits.len() - 3
    } else {
        bits.len() - 2
    };
    if bits[in_index] != "in" {
        return Err(SyntaxError::new(
            format!(
                "'for' statements should use the format 'for x in y': {}",
                token.contents
            ),
            token.line,
        ));
    }

    let loopvars: Vec<String> = bits[1..in_index]
        .join(" ")
        .split(',')
        .map(|var| var.trim().to_string())
        .collect();
    for var in &loopvars {
        let valid = !var.is_empty()
            && !var.starts_with(|ch: char| ch.is_ascii_digit())
            && var
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return Err(SyntaxError::new(
                format!("'for' tag received an invalid argument: {}", token.contents),
                token.line,
            ));
        }
    }

    let sequence = parser.compile_filter(&bits[in_index + 1])?;
    let body = parser.parse(&["empty", "endfor"])?;
    let end = parser.next_token_required(&["empty", "endfor"])?;
    let empty = if end.contents == "empty" {
        let empty = parser.parse(&["endfor"])?;
        parser.delete_first_token();
        Some(empty)
    } else {
        None
    };

    Ok(Node::For(ForNode {
        loopvars,
        sequence,
        reversed,
        body,
        empty,
        line: token.line,
    }))
}

fn do_with(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let mut remaining: Vec<String> = token.split_contents()[1..].to_vec();
    let bindings = token_kwargs(&mut remaining, parser, true)?;
    if bindings.is_empty() {
        return Err(SyntaxError::new(
            "'with' expected at least one variable assignment",
            token.line,
        ));
    }
    if !remaining.is_empty() {
        return Err(SyntaxError::new(
            format!("'with' received an invalid token: '{}'", remaining[0]),
            token.line,
        ));
    }
    let body = parser.parse(&["endwith"])?;
    parser.delete_first_token();
    Ok(Node::With(WithNode {
        bindings,
        body,
        line: token.line,
    }))
}

fn do_filter(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let rest = match token.contents.split_once(char::is_whitespace) {
        Some((_, rest)) => rest.trim(),
        None => {
            return Err(SyntaxError::new(
                "'filter' tag requires at least one filter",
                token.line,
            ));
        }
    };
    let chain = parser.compile_filter(&format!("var|{}", rest))?;
    for name in chain.filter_names() {
        if name == "escape" || name == "safe" {
            return Err(SyntaxError::new(
                format!(
                    "'filter {}' is not permitted. Use the 'autoescape' tag instead.",
                    name
                ),
                token.line,
            ));
        }
    }
    let body = parser.parse(&["endfilter"])?;
    parser.delete_first_token();
    Ok(Node::Filter(FilterNode {
        chain,
        body,
        line: token.line,
    }))
}

fn do_autoescape(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(SyntaxError::new(
            "'autoescape' tag requires exactly one argument",
            token.line,
        ));
    }
    let setting = match bits[1].as_str() {
        "on" => true,
        "off" => false,
        _ => {
            return Err(SyntaxError::new(
                "'autoescape' argument should be 'on' or 'off'",
                token.line,
            ));
        }
    };
    let body = parser.parse(&["endautoescape"])?;
    parser.delete_first_token();
    Ok(Node::Autoescape(AutoescapeNode {
        setting,
        body,
        line: token.line,
    }))
}

fn do_cycle(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let mut args = token.split_contents();
    if args.len() < 2 {
        return Err(SyntaxError::new(
            "'cycle' tag requires at least two arguments",
            token.line,
        ));
    }

    // Two words: a reference to a previously named cycle, sharing its
    // cursor.
    if args.len() == 2 {
        let name = &args[1];
        return match parser.named_cycles.get(name) {
            Some(prototype) => {
                let node = prototype.clone();
                parser.last_cycle = Some(node.id);
                Ok(Node::Cycle(node))
            }
            None => Err(SyntaxError::new(
                format!("Named cycle '{}' does not exist", name),
                token.line,
            )),
        };
    }

    let mut silent = false;
    if args.len() > 4 && args[args.len() - 3] == "as" {
        if args[args.len() - 1] != "silent" {
            return Err(SyntaxError::new(
                format!(
                    "Only 'silent' flag is allowed after cycle's name, not '{}'",
                    args[args.len() - 1]
                ),
                token.line,
            ));
        }
        silent = true;
        args.pop();
    }

    let mut var_name = None;
    if args.len() > 2 && args[args.len() - 2] == "as" {
        var_name = Some(args[args.len() - 1].clone());
        args.truncate(args.len() - 2);
    }

    let exprs: Vec<FilterExpression> = args[1..]
        .iter()
        .map(|bit| parser.compile_filter(bit))
        .collect::<Result<_, _>>()?;

    let node = CycleNode {
        id: parser.next_node_id(),
        exprs,
        var_name: var_name.clone(),
        silent,
        line: token.line,
    };
    if let Some(name) = var_name {
        parser.named_cycles.insert(name, node.clone());
    }
    parser.last_cycle = Some(node.id);
    Ok(Node::Cycle(node))
}

fn do_resetcycle(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let args = token.split_contents();
    if args.len() > 2 {
        return Err(SyntaxError::new(
            "'resetcycle' tag accepts at most one argument",
            token.line,
        ));
    }
    let target = if args.len() == 2 {
        match parser.named_cycles.get(&args[1]) {
            Some(node) => node.id,
            None => {
                return Err(SyntaxError::new(
                    format!("Named cycle '{}' does not exist", args[1]),
                    token.line,
                ));
            }
        }
    } else {
        match parser.last_cycle {
            Some(id) => id,
            None => {
                return Err(SyntaxError::new("No cycles in template", token.line));
            }
        }
    };
    Ok(Node::ResetCycle(ResetCycleNode {
        target,
        line: token.line,
    }))
}

fn do_ifchanged(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    let watch: Vec<FilterExpression> = bits[1..]
        .iter()
        .map(|bit| parser.compile_filter(bit))
        .collect::<Result<_, _>>()?;
    let body = parser.parse(&["else", "endifchanged"])?;
    let end = parser.next_token_required(&["else", "endifchanged"])?;
    let else_body = if end.contents == "else" {
        let else_body = parser.parse(&["endifchanged"])?;
        parser.delete_first_token();
        Some(else_body)
    } else {
        None
    };
    Ok(Node::IfChanged(IfChangedNode {
        id: parser.next_node_id(),
        watch,
        body,
        else_body,
        line: token.line,
    }))
}

fn do_firstof(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(SyntaxError::new(
            "'firstof' statement requires at least one argument",
            token.line,
        ));
    }
    let exprs: Vec<FilterExpression> = bits[1..]
        .iter()
        .map(|bit| parser.compile_filter(bit))
        .collect::<Result<_, _>>()?;
    Ok(Node::Firstof(FirstofNode {
        exprs,
        line: token.line,
    }))
}

fn do_widthratio(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    let asvar = match bits.len() {
        4 => None,
        6 if bits[4] == "as" => Some(bits[5].clone()),
        _ => {
            return Err(SyntaxError::new(
                "widthratio takes at least three arguments (then optionally 'as var')",
                token.line,
            ));
        }
    };
    Ok(Node::Widthratio(WidthratioNode {
        value: parser.compile_filter(&bits[1])?,
        max: parser.compile_filter(&bits[2])?,
        width: parser.compile_filter(&bits[3])?,
        asvar,
        line: token.line,
    }))
}

fn do_comment(parser: &mut Parser, _token: &Token) -> Result<Node, SyntaxError> {
    parser.skip_past("endcomment")?;
    Ok(Node::Comment(CommentNode))
}

fn do_verbatim(parser: &mut Parser, _token: &Token) -> Result<Node, SyntaxError> {
    let nodelist = parser.parse(&["endverbatim"])?;
    parser.delete_first_token();
    Ok(Node::Verbatim(VerbatimNode {
        content: nodelist.text_content(),
    }))
}

fn do_load(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits: Vec<String> = token
        .contents
        .split_whitespace()
        .map(String::from)
        .collect();

    let unknown = |label: &str, parser: &Parser| {
        SyntaxError::new(
            format!(
                "'{}' is not a registered tag library. Must be one of: {}",
                label,
                parser.library_labels().join(", ")
            ),
            token.line,
        )
    };

    if bits.len() >= 4 && bits[bits.len() - 2] == "from" {
        let label = &bits[bits.len() - 1];
        let library = parser
            .find_library(label)
            .cloned()
            .ok_or_else(|| unknown(label, parser))?;
        let mut subset = Library::new();
        for name in &bits[1..bits.len() - 2] {
            let mut found = false;
            if let Some(tag) = library.tags.get(name) {
                subset.tags.insert(name.clone(), tag.clone());
                found = true;
            }
            if let Some(filter) = library.filters.get(name) {
                subset.filters.insert(name.clone(), filter.clone());
                found = true;
            }
            if !found {
                return Err(SyntaxError::new(
                    format!(
                        "'{}' is not a valid tag or filter in tag library '{}'",
                        name, label
                    ),
                    token.line,
                ));
            }
        }
        parser.add_library(&subset);
    } else {
        for label in &bits[1..] {
            let library = parser
                .find_library(label)
                .cloned()
                .ok_or_else(|| unknown(label, parser))?;
            parser.add_library(&library);
        }
    }
    Ok(Node::Load(LoadNode))
}

fn do_block(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(SyntaxError::new(
            "'block' tag takes only one argument",
            token.line,
        ));
    }
    let name = bits[1].clone();
    parser.register_block(&name)?;

    let nodelist = parser.parse(&["endblock"])?;
    let end = parser.next_token_required(&["endblock"])?;
    // A closing tag may repeat the block name; it must match.
    let acceptable = [String::from("endblock"), format!("endblock {}", name)];
    if !acceptable.contains(&end.contents) {
        return Err(parser.invalid_block_tag(
            &end,
            &end.contents,
            &["endblock", acceptable[1].as_str()],
        ));
    }

    Ok(Node::Block(BlockNode {
        name,
        nodelist: Rc::new(nodelist),
        line: token.line,
    }))
}

fn do_extends(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() != 2 {
        return Err(SyntaxError::new(
            "'extends' takes one argument",
            token.line,
        ));
    }
    if parser.seen_extends {
        return Err(SyntaxError::new(
            "'extends' cannot appear more than once in the same template",
            token.line,
        ));
    }
    parser.seen_extends = true;

    let parent = parser.compile_filter(&bits[1])?;
    // The rest of the template belongs to this node; its named blocks are
    // the override map pushed during rendering.
    let nodelist = parser.parse(&[])?;
    let mut blocks = FxHashMap::default();
    nodelist.collect_block_refs(&mut blocks);

    Ok(Node::Extends(ExtendsNode {
        parent,
        blocks,
        line: token.line,
    }))
}

fn do_include(parser: &mut Parser, token: &Token) -> Result<Node, SyntaxError> {
    let bits = token.split_contents();
    if bits.len() < 2 {
        return Err(SyntaxError::new(
            "'include' tag takes at least one argument: the name of the template to be included",
            token.line,
        ));
    }
    let template = parser.compile_filter(&bits[1])?;

    let mut extra = Vec::new();
    let mut isolated = false;
    let mut seen_with = false;
    let mut remaining: Vec<String> = bits[2..].to_vec();
    while !remaining.is_empty() {
        let option = remaining.remove(0);
        match option.as_str() {
            "with" => {
                if seen_with {
                    return Err(SyntaxError::new(
                        "The 'with' option was specified more than once",
                        token.line,
                    ));
                }
                seen_with = true;
                extra = token_kwargs(&mut remaining, parser, false)?;
                if extra.is_empty() {
                    return Err(SyntaxError::new(
                        "'with' in 'include' tag needs at least one keyword argument",
                        token.line,
                    ));
                }
            }
            "only" => {
                if isolated {
                    return Err(SyntaxError::new(
                        "The 'only' option was specified more than once",
                        token.line,
                    ));
                }
                isolated = true;
            }
            other => {
                return Err(SyntaxError::new(
                    format!("Unknown argument for 'include' tag: '{}'", other),
                    token.line,
                ));
            }
        }
    }

    Ok(Node::Include(IncludeNode {
        template,
        extra,
        isolated,
        line: token.line,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_source(source: &str) -> Result<crate::render::node::NodeList, SyntaxError> {
        let mut parser = Parser::from_source(source);
        parser.parse(&[])
    }

    #[test]
    fn test_if_elif_else_endif() {
        let nodelist =
            parse_source("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
        assert_eq!(nodelist.len(), 1);
        match &nodelist.nodes[0] {
            Node::If(node) => {
                assert_eq!(node.arms.len(), 3);
                assert!(node.arms[2].0.is_none());
            }
            _ => panic!("expected if node"),
        }
    }

    #[test]
    fn test_for_parses_loopvars_and_reversed() {
        let nodelist =
            parse_source("{% for k, v in items reversed %}x{% endfor %}").unwrap();
        match &nodelist.nodes[0] {
            Node::For(node) => {
                assert_eq!(node.loopvars, vec!["k", "v"]);
                assert!(node.reversed);
                assert!(node.empty.is_none());
            }
            _ => panic!("expected for node"),
        }
    }

    #[test]
    fn test_for_empty_clause() {
        let nodelist =
            parse_source("{% for x in items %}a{% empty %}b{% endfor %}").unwrap();
        match &nodelist.nodes[0] {
            Node::For(node) => assert!(node.empty.is_some()),
            _ => panic!("expected for node"),
        }
    }

    #[test]
    fn test_for_requires_in() {
        let err = parse_source("{% for x of items %}a{% endfor %}").unwrap_err();
        assert!(err.message.contains("'for x in y'"));
    }

    #[test]
    fn test_with_legacy_and_kwarg_forms() {
        assert!(parse_source("{% with a=1 b=2 %}x{% endwith %}").is_ok());
        assert!(parse_source("{% with items.0 as first %}x{% endwith %}").is_ok());
        let err = parse_source("{% with %}x{% endwith %}").unwrap_err();
        assert!(err.message.contains("at least one variable assignment"));
    }

    #[test]
    fn test_duplicate_block_names_rejected() {
        let err = parse_source(
            "{% block a %}{% endblock %}{% block a %}{% endblock %}",
        )
        .unwrap_err();
        assert!(err.message.contains("appears more than once"));
    }

    #[test]
    fn test_endblock_name_must_match() {
        assert!(parse_source("{% block a %}x{% endblock a %}").is_ok());
        let err = parse_source("{% block a %}x{% endblock b %}").unwrap_err();
        assert!(err.message.contains("endblock"));
    }

    #[test]
    fn test_double_extends_rejected() {
        let err = parse_source("{% extends 'a' %}{% extends 'b' %}").unwrap_err();
        assert!(err
            .message
            .contains("cannot appear more than once"));
    }

    #[test]
    fn test_include_options() {
        assert!(parse_source("{% include 'x' with a=1 only %}").is_ok());
        let err = parse_source("{% include 'x' with %}").unwrap_err();
        assert!(err.message.contains("at least one keyword argument"));
        let err = parse_source("{% include 'x' frobnicate %}").unwrap_err();
        assert!(err.message.contains("Unknown argument"));
    }

    #[test]
    fn test_cycle_forms() {
        assert!(parse_source("{% cycle 'a' 'b' %}").is_ok());
        assert!(parse_source("{% cycle 'a' 'b' as color %}{% cycle color %}").is_ok());
        assert!(parse_source("{% cycle 'a' 'b' as color silent %}").is_ok());
        let err = parse_source("{% cycle unknown_name %}").unwrap_err();
        assert!(err.message.contains("does not exist"));
        let err = parse_source("{% cycle %}").unwrap_err();
        assert!(err.message.contains("at least two arguments"));
    }

    #[test]
    fn test_resetcycle_requires_a_cycle() {
        let err = parse_source("{% resetcycle %}").unwrap_err();
        assert!(err.message.contains("No cycles in template"));
        let err = parse_source("{% resetcycle nope %}").unwrap_err();
        assert!(err.message.contains("does not exist"));
        assert!(
            parse_source("{% cycle 'a' 'b' as c %}{% resetcycle c %}").is_ok()
        );
    }

    #[test]
    fn test_filter_tag_forbids_escape_and_safe() {
        let err = parse_source("{% filter safe %}x{% endfilter %}").unwrap_err();
        assert!(err.message.contains("not permitted"));
        assert!(parse_source("{% filter upper|lower %}x{% endfilter %}").is_ok());
    }

    #[test]
    fn test_widthratio_arity() {
        assert!(parse_source("{% widthratio a b 100 %}").is_ok());
        assert!(parse_source("{% widthratio a b 100 as w %}").is_ok());
        let err = parse_source("{% widthratio a b %}").unwrap_err();
        assert!(err.message.contains("widthratio takes at least three"));
    }

    #[test]
    fn test_comment_skips_to_literal_end() {
        let nodelist =
            parse_source("a{% comment %} {{ bad }} {% junk %} {% endcomment %}b")
                .unwrap();
        assert_eq!(nodelist.len(), 3);
    }

    #[test]
    fn test_load_unknown_library() {
        let err = parse_source("{% load nosuch %}").unwrap_err();
        assert!(err.message.contains("not a registered tag library"));
    }
}
