//! Tests for locating definitions by span.

use pretty_assertions::assert_eq;
use pysst::{ComprehensionKind, Module, Node, NodeKind, Span, build, visit::find_scope_node};

const CODE: &str = "x = 1\nclass C:\n    def m(self):\n        return lambda y: [i * y for i in self]\n";

fn span_of(text: &str) -> Span {
    let start = u32::try_from(CODE.find(text).unwrap()).unwrap();
    Span::new(start, start + u32::try_from(text.len()).unwrap())
}

fn find<'m>(module: &'m Module, text: &str) -> Option<&'m Node> {
    find_scope_node(&module.body, span_of(text))
}

/// Every kind of scope-owning node is found by its exact span, however deeply nested.
#[test]
fn nested_definitions() {
    let module = build(CODE).unwrap();

    let class = find(&module, CODE["x = 1\n".len()..].trim_end()).unwrap();
    assert!(matches!(&class.kind, NodeKind::ClassDef(c) if c.name == "C"));

    let method = find(&module, "def m(self):\n        return lambda y: [i * y for i in self]").unwrap();
    assert!(matches!(&method.kind, NodeKind::FunctionDef(f) if f.name == "m"));

    let lambda = find(&module, "lambda y: [i * y for i in self]").unwrap();
    assert!(matches!(lambda.kind, NodeKind::Lambda(_)));

    let comprehension = find(&module, "[i * y for i in self]").unwrap();
    let NodeKind::Comprehension(comprehension) = &comprehension.kind else {
        panic!("expected a comprehension, got {:?}", comprehension.kind);
    };
    assert_eq!(comprehension.kind, ComprehensionKind::List);
}

/// The node returned is the one in the tree, so its scope can be looked up directly.
#[test]
fn found_node_carries_its_scope() {
    let module = build(CODE).unwrap();
    let NodeKind::Lambda(lambda) = &find(&module, "lambda y: [i * y for i in self]").unwrap().kind else {
        panic!("expected a lambda");
    };
    assert_eq!(module.scopes[lambda.scope].name(), "<lambda>");
}

/// Spans of other nodes, partial spans and the empty sentinel find nothing.
#[test]
fn missing_definitions() {
    let module = build(CODE).unwrap();
    assert!(find(&module, "x = 1").is_none());
    assert!(find(&module, "i * y").is_none());
    assert!(find(&module, "lambda y: [i * y").is_none());
    assert!(find_scope_node(&module.body, Span::NONE).is_none());
    assert!(find_scope_node(&module.body, Span::new(500, 510)).is_none());
}
