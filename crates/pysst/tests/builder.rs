//! Tests for lowering Python source into the intermediate tree.

use pretty_assertions::assert_eq;
use pysst::{
    BuildOptions, CollectionKind, ComprehensionKind, Conversion, FStringPart, Node, NodeKind, NoopTracer, ScopeKind,
    SimpleKind, Span, build, build_with,
};

fn statements(code: &str) -> Vec<Node> {
    build(code).unwrap().body.statements().to_vec()
}

fn names(nodes: &[Node]) -> Vec<&str> {
    nodes
        .iter()
        .map(|n| match &n.kind {
            NodeKind::Name(name) => name.as_str(),
            other => panic!("expected a name, got {other:?}"),
        })
        .collect()
}

/// Chained assignment keeps every target in source order and shares one value.
#[test]
fn chained_assignment() {
    let body = statements("a = b = 1\n");
    assert_eq!(body.len(), 1);
    let NodeKind::Assign { targets, value } = &body[0].kind else {
        panic!("expected an assignment, got {:?}", body[0].kind);
    };
    assert_eq!(names(targets), vec!["a", "b"]);
    assert_eq!(value.kind, NodeKind::Int(1));
    assert_eq!(body[0].span, Span::new(0, 9));
}

/// The module body is a block of the top-level statements.
#[test]
fn module_body_is_block() {
    let module = build("pass\nx = 1\n").unwrap();
    assert!(matches!(module.body.kind, NodeKind::Block { flag: None, .. }));
    assert_eq!(module.body.statements()[0].kind, NodeKind::Simple(SimpleKind::Pass));
}

/// Tuple and starred targets become nested collections of leaf names.
#[test]
fn destructuring_targets() {
    let body = statements("a, (b, *c) = x\n");
    let NodeKind::Assign { targets, .. } = &body[0].kind else {
        panic!("expected an assignment");
    };
    let NodeKind::Collection { kind, elements } = &targets[0].kind else {
        panic!("expected a tuple target");
    };
    assert_eq!(*kind, CollectionKind::Tuple);
    assert_eq!(elements[0].kind, NodeKind::Name("a".to_owned()));
    let NodeKind::Collection { elements: inner, .. } = &elements[1].kind else {
        panic!("expected a nested tuple");
    };
    assert!(matches!(&inner[1].kind, NodeKind::Starred(c) if c.kind == NodeKind::Name("c".to_owned())));
}

/// `elif` chains nest as an `If` in the `orelse` of the previous branch.
#[test]
fn elif_nests_in_orelse() {
    let body = statements("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n");
    let NodeKind::If { orelse: Some(orelse), .. } = &body[0].kind else {
        panic!("expected an if with an else branch");
    };
    let NodeKind::If {
        test,
        orelse: Some(last), ..
    } = &orelse.kind
    else {
        panic!("expected the elif as a nested if");
    };
    assert_eq!(test.kind, NodeKind::Name("b".to_owned()));
    assert!(matches!(last.kind, NodeKind::Block { .. }));
}

/// Loops record whether their own body uses `break` or `continue`, ignoring nested loops.
#[test]
fn loop_break_continue() {
    let body = statements("while x:\n    for y in z:\n        break\n    continue\n");
    let NodeKind::While {
        body: while_body,
        contains_break,
        contains_continue,
        ..
    } = &body[0].kind
    else {
        panic!("expected a while loop");
    };
    assert!(!contains_break);
    assert!(contains_continue);
    let NodeKind::For { contains_break, .. } = &while_body.statements()[0].kind else {
        panic!("expected a for loop");
    };
    assert!(contains_break);
}

/// Empty `else`/`finally` clauses are absent rather than empty blocks.
#[test]
fn empty_clauses_are_absent() {
    let body = statements("try:\n    pass\nexcept E as e:\n    pass\n");
    let NodeKind::Try {
        handlers,
        orelse,
        finally,
        ..
    } = &body[0].kind
    else {
        panic!("expected a try statement");
    };
    assert_eq!(handlers.len(), 1);
    assert_eq!(handlers[0].name.as_deref(), Some("e"));
    assert!(orelse.is_none());
    assert!(finally.is_none());
}

/// Literal kinds map onto their dedicated node variants.
#[test]
fn literals() {
    let body = statements("1\n2.5\n3j\nb'\\x00a'\n'text'\nTrue\nNone\n...\n123456789012345678901234567890\n");
    let values: Vec<NodeKind> = body
        .iter()
        .map(|s| match &s.kind {
            NodeKind::Expr(value) => value.kind.clone(),
            other => panic!("expected an expression statement, got {other:?}"),
        })
        .collect();
    assert_eq!(values[0], NodeKind::Int(1));
    assert_eq!(values[1], NodeKind::Float(2.5));
    assert_eq!(values[2], NodeKind::Imaginary(3.0));
    assert_eq!(values[3], NodeKind::Bytes(vec![0, b'a']));
    assert_eq!(values[4], NodeKind::Str("text".to_owned()));
    assert_eq!(values[5], NodeKind::Bool(true));
    assert_eq!(values[6], NodeKind::Simple(SimpleKind::None));
    assert_eq!(values[7], NodeKind::Simple(SimpleKind::Ellipsis));
    let NodeKind::BigInt(big) = &values[8] else {
        panic!("expected a big integer, got {:?}", values[8]);
    };
    assert_eq!(big.to_string(), "123456789012345678901234567890");
}

/// f-strings keep literal text, conversions, nested format specs and `=` debug text.
#[test]
fn fstring_parts() {
    let body = statements("f'a{x!r:>{w}} {y=}'\n");
    let NodeKind::Expr(value) = &body[0].kind else {
        panic!("expected an expression statement");
    };
    let NodeKind::FString(parts) = &value.kind else {
        panic!("expected an f-string, got {:?}", value.kind);
    };
    assert_eq!(parts[0], FStringPart::Literal("a".to_owned()));
    let FStringPart::Interpolation {
        conversion,
        format_spec: Some(spec),
        ..
    } = &parts[1]
    else {
        panic!("expected an interpolation with a format spec");
    };
    assert_eq!(*conversion, Conversion::Repr);
    assert_eq!(spec[0], FStringPart::Literal(">".to_owned()));
    assert!(matches!(&spec[1], FStringPart::Interpolation { .. }));
    let FStringPart::Interpolation { debug_text, .. } = parts.last().unwrap() else {
        panic!("expected a trailing interpolation");
    };
    assert_eq!(debug_text.as_deref(), Some("y="));
}

/// An f-string without interpolations collapses to a plain string.
#[test]
fn fstring_without_interpolation() {
    let body = statements("f'plain' 'text'\n");
    let NodeKind::Expr(value) = &body[0].kind else {
        panic!("expected an expression statement");
    };
    assert_eq!(value.kind, NodeKind::Str("plaintext".to_owned()));
}

/// Comprehensions get their own scope and build the first iterable outside of it.
#[test]
fn comprehension_scope() {
    let module = build("r = [x * y for x in xs for y in x]\n").unwrap();
    let NodeKind::Assign { value, .. } = &module.body.statements()[0].kind else {
        panic!("expected an assignment");
    };
    let NodeKind::Comprehension(comprehension) = &value.kind else {
        panic!("expected a comprehension");
    };
    assert_eq!(comprehension.kind, ComprehensionKind::List);
    assert_eq!(comprehension.generators.len(), 2);
    let scope = &module.scopes[comprehension.scope];
    assert_eq!(scope.kind(), ScopeKind::Comprehension);
    assert_eq!(scope.name(), "<listcomp>");
    assert_eq!(scope.params(), [".0".to_owned()]);
    // the first iterable is read in the module scope
    assert!(module.scopes[pysst::ScopeId::MODULE].symbol("xs").is_some());
    assert!(scope.symbol("xs").is_none());
}

/// Generator expressions get a generator scope of their own.
#[test]
fn generator_expression_scope() {
    let module = build("g = (i for i in range(3))\n").unwrap();
    let child = module.scopes.children(pysst::ScopeId::MODULE).next().unwrap();
    assert_eq!(module.scopes[child].kind(), ScopeKind::Generator);
    assert_eq!(module.scopes[child].name(), "<genexpr>");
}

/// Private names are mangled with the enclosing class name, dunder names are not.
#[test]
fn private_name_mangling() {
    let module = build("class _Spam:\n    __x = 1\n    __init__ = 2\n    def f(self):\n        return self.__y\n").unwrap();
    let class = module.scopes.children(pysst::ScopeId::MODULE).next().unwrap();
    let symbols: Vec<&str> = module.scopes[class].symbols().map(|(name, _)| name).collect();
    assert_eq!(symbols, vec!["_Spam__x", "__init__", "f"]);
    assert!(pysst::render::render_module(&module).contains("Attribute ._Spam__y"));
}

/// Mangling can be switched off.
#[test]
fn mangling_disabled() {
    let options = BuildOptions::new().mangle_private_names(false);
    let module = build_with("class C:\n    __x = 1\n", &options, &mut NoopTracer).unwrap();
    let class = module.scopes.children(pysst::ScopeId::MODULE).next().unwrap();
    assert!(module.scopes[class].symbol("__x").is_some());
}

/// Keyword arguments and `**` splats keep their order in calls.
#[test]
fn call_keywords() {
    let body = statements("f(a, *b, c=1, **d)\n");
    let NodeKind::Expr(call) = &body[0].kind else {
        panic!("expected an expression statement");
    };
    let NodeKind::Call { args, keywords, .. } = &call.kind else {
        panic!("expected a call");
    };
    assert_eq!(args.len(), 2);
    assert!(matches!(args[1].kind, NodeKind::Starred(_)));
    let keyword_names: Vec<Option<&str>> = keywords.iter().map(|k| k.name.as_deref()).collect();
    assert_eq!(keyword_names, vec![Some("c"), None]);
}

/// The tree dump prints one node per line with labelled children.
#[test]
fn render_tree() {
    let module = build("x = 1\n").unwrap();
    let rendered = pysst::render::render_module(&module);
    let lines: Vec<&str> = rendered.lines().skip(1).collect();
    assert_eq!(
        lines,
        vec![
            "    Assign 0..5",
            "        targets:",
            "            Name x 0..1",
            "        value: Int 1 4..5",
        ]
    );
}
