//! Tests for parameter list construction and validation.

use pretty_assertions::assert_eq;
use pysst::{ArgDef, ArgDefListBuilder, ErrorCategory, Node, NodeKind, Signature, Span, Splat, build};

fn function_params(code: &str) -> pysst::ArgDefs {
    let module = build(code).unwrap();
    match &module.body.statements()[0].kind {
        NodeKind::FunctionDef(function) => function.params.clone(),
        other => panic!("expected a function definition, got {other:?}"),
    }
}

/// Every parameter flavour lands in its own section and the signature summarises them.
#[test]
fn full_parameter_list() {
    let params = function_params("def f(a, b=1, *args, c, **kw): pass\n");
    let positional: Vec<&str> = params.positional.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(positional, vec!["a", "b"]);
    assert_eq!(params.positional_only, 0);
    assert!(matches!(&params.splat, Some(Splat::Named(arg)) if arg.name == "args"));
    assert_eq!(params.keyword_only[0].name, "c");
    assert_eq!(params.kw_splat.as_ref().map(|a| a.name.as_str()), Some("kw"));
    assert_eq!(params.positional[1].default.as_ref().map(|d| &d.kind), Some(&NodeKind::Int(1)));
    assert_eq!(params.splat_index(), Some(2));

    let signature = params.signature();
    assert_eq!(
        signature,
        Signature {
            positional: vec!["a".to_owned(), "b".to_owned()],
            positional_only: 0,
            positional_defaults: 1,
            keyword_only: vec![("c".to_owned(), false)],
            var_args: Some("args".to_owned()),
            var_kwargs: Some("kw".to_owned()),
        }
    );
    assert_eq!(signature.param_count(), 5);
    assert!(!signature.is_simple());
    assert_eq!(signature.to_string(), "(a, b=..., *args, c, **kw)");
    assert_eq!(params.slot_names().collect::<Vec<_>>(), vec!["a", "b", "c", "args", "kw"]);
}

/// A bare `*` only separates keyword-only parameters and has no slot.
#[test]
fn bare_star() {
    let params = function_params("def f(a, /, b, *, c=2): pass\n");
    assert_eq!(params.positional_only, 1);
    assert!(matches!(params.splat, Some(Splat::Bare(_))));
    let signature = params.signature();
    assert_eq!(signature.to_string(), "(a, /, b, *, c=...)");
    assert_eq!(signature.var_args, None);
    assert_eq!(params.slot_names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

/// Annotations are kept on their parameters.
#[test]
fn annotations() {
    let params = function_params("def f(x: int, *ys: str): pass\n");
    assert_eq!(
        params.positional[0].annotation.as_ref().map(|a| &a.kind),
        Some(&NodeKind::Name("int".to_owned()))
    );
    let Some(Splat::Named(ys)) = &params.splat else {
        panic!("expected *ys");
    };
    assert!(ys.annotation.is_some());
}

/// The builder accepts parameters in order and produces the same shape as parsed source.
#[test]
fn builder_api() {
    let mut builder = ArgDefListBuilder::new();
    builder.add_param(ArgDef::new("a", Span::new(0, 1))).unwrap();
    builder.mark_positional_only(Span::new(2, 3)).unwrap();
    builder
        .add_param(ArgDef::new("b", Span::new(4, 5)).with_default(Node::new(Span::NONE, NodeKind::Int(0))))
        .unwrap();
    builder.add_splat(None).unwrap();
    builder.add_param(ArgDef::new("c", Span::new(9, 10))).unwrap();
    builder.add_kw_splat(ArgDef::new("rest", Span::new(12, 16))).unwrap();
    let params = builder.finish().unwrap();
    assert_eq!(params.signature().to_string(), "(a, /, b=..., *, c, **rest)");
}

/// Duplicate names are rejected at the span of the second occurrence.
#[test]
fn builder_rejects_duplicates() {
    let mut builder = ArgDefListBuilder::new();
    builder.add_param(ArgDef::new("a", Span::new(0, 1))).unwrap();
    let err = builder.add_kw_splat(ArgDef::new("a", Span::new(5, 6))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::DuplicateParameter);
    assert_eq!(err.span(), Span::new(5, 6));
}

/// A positional parameter without a default may not follow one with a default.
#[test]
fn builder_rejects_non_default_after_default() {
    let mut builder = ArgDefListBuilder::new();
    builder
        .add_param(ArgDef::new("a", Span::new(0, 1)).with_default(Node::new(Span::NONE, NodeKind::Int(1))))
        .unwrap();
    let err = builder.add_param(ArgDef::new("b", Span::new(5, 6))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NonDefaultAfterDefault);
    assert_eq!(err.message(), "non-default argument follows default argument");
}

/// Keyword-only parameters may omit defaults after ones that have them.
#[test]
fn keyword_only_defaults_are_free() {
    let mut builder = ArgDefListBuilder::new();
    builder.add_splat(Some(ArgDef::new("args", Span::NONE))).unwrap();
    builder
        .add_param(ArgDef::new("a", Span::NONE).with_default(Node::new(Span::NONE, NodeKind::Int(1))))
        .unwrap();
    builder.add_param(ArgDef::new("b", Span::NONE)).unwrap();
    let params = builder.finish().unwrap();
    assert_eq!(params.signature().keyword_only, vec![("a".to_owned(), true), ("b".to_owned(), false)]);
}

/// Structural mistakes in the builder calls are reported as invalid syntax.
#[test]
fn builder_ordering_errors() {
    let mut builder = ArgDefListBuilder::new();
    let err = builder.mark_positional_only(Span::NONE).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidSyntax);

    let mut builder = ArgDefListBuilder::new();
    builder.add_splat(None).unwrap();
    let err = builder.add_splat(None).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidSyntax);

    let mut builder = ArgDefListBuilder::new();
    builder.add_splat(None).unwrap();
    let err = builder.finish().unwrap_err();
    assert_eq!(err.message(), "named arguments must follow bare *");
}

/// A function without parameters has an empty, simple signature.
#[test]
fn empty_parameter_list() {
    let params = function_params("def f(): pass\n");
    assert!(params.is_empty());
    assert!(params.signature().is_simple());
    assert_eq!(params.signature().to_string(), "()");
}

/// A hand-built signature claiming more defaults than parameters still prints.
#[test]
fn signature_with_excess_defaults() {
    let signature = Signature {
        positional: vec!["a".to_owned(), "b".to_owned()],
        positional_defaults: 5,
        ..Signature::default()
    };
    assert_eq!(signature.to_string(), "(a=..., b=...)");
}
