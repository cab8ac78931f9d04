//! Tests for the errors reported while building.

use pretty_assertions::assert_eq;
use pysst::{BuildOptions, CodeLoc, ErrorCategory, LineIndex, NoopTracer, SstError, build, build_with};

fn build_error(code: &str) -> SstError {
    match build(code) {
        Ok(module) => panic!("expected an error, built {module:?}"),
        Err(err) => err,
    }
}

fn category(code: &str) -> ErrorCategory {
    build_error(code).category()
}

/// A repeated parameter name is reported at its second occurrence.
#[test]
fn duplicate_parameter() {
    let err = build_error("def g(a, a): pass\n");
    assert_eq!(err.category(), ErrorCategory::DuplicateParameter);
    assert_eq!(err.span().start(), Some(9));
}

/// A positional parameter without a default after one with a default is rejected.
#[test]
fn non_default_after_default() {
    assert_eq!(category("def f(a=1, b): pass\n"), ErrorCategory::NonDefaultAfterDefault);
}

/// Only one starred target is allowed per destructuring.
#[test]
fn multiple_starred_targets() {
    assert_eq!(category("a, *b, *c = x\n"), ErrorCategory::MultipleStarredTargets);
    // separate levels each get their own star
    assert!(build("a, *b, (c, *d) = x\n").is_ok());
}

/// `nonlocal` needs a binding in an enclosing function.
#[test]
fn unresolved_nonlocal() {
    let err = build_error("def f():\n    nonlocal x\n    x = 1\n");
    assert_eq!(err.category(), ErrorCategory::UnresolvedNonlocal);
    assert_eq!(err.message(), "no binding for nonlocal 'x' found");

    // module-level bindings do not count
    assert_eq!(
        category("x = 0\ndef f():\n    nonlocal x\n"),
        ErrorCategory::UnresolvedNonlocal
    );

    assert_eq!(category("nonlocal x\n"), ErrorCategory::UnresolvedNonlocal);
}

/// `global` and `nonlocal` may not contradict earlier uses of the name.
#[test]
fn conflicting_declarations() {
    let err = build_error("def f(a):\n    global a\n");
    assert_eq!(err.category(), ErrorCategory::ConflictingDeclaration);
    assert_eq!(err.message(), "name 'a' is parameter and global");

    let err = build_error("def f():\n    x = 1\n    global x\n");
    assert_eq!(err.message(), "name 'x' is assigned to before global declaration");

    let err = build_error("def f():\n    print(x)\n    global x\n");
    assert_eq!(err.message(), "name 'x' is used prior to global declaration");

    let err = build_error("def f():\n    x = 0\n    def g():\n        global x\n        nonlocal x\n");
    assert_eq!(err.category(), ErrorCategory::ConflictingDeclaration);
    assert_eq!(err.message(), "name 'x' is nonlocal and global");
}

/// `from m import *` is only allowed at module level.
#[test]
fn import_star_outside_module() {
    assert!(build("from m import *\n").is_ok());
    assert_eq!(
        category("def f():\n    from m import *\n"),
        ErrorCategory::ImportStarOutsideModule
    );
    assert_eq!(category("class C:\n    from m import *\n"), ErrorCategory::ImportStarOutsideModule);
}

/// Source nested deeper than the configured limit fails instead of recursing further.
#[test]
fn nesting_too_deep() {
    let code = "x = [[[[[[[[1]]]]]]]]\n";
    assert!(build(code).is_ok());
    let options = BuildOptions::new().max_nesting_depth(5);
    let err = build_with(code, &options, &mut NoopTracer).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NestingTooDeep);
}

/// Valid Python outside the supported subset is reported as unsupported.
#[test]
fn unsupported_constructs() {
    let err = build_error("match x:\n    case 1:\n        pass\n");
    assert_eq!(err.category(), ErrorCategory::Unsupported);
    assert_eq!(err.message(), "match statements are not supported");
    assert_eq!(category("def f[T](x: T): pass\n"), ErrorCategory::Unsupported);
}

/// Statements used outside the construct they belong to are syntax errors.
#[test]
fn misplaced_statements() {
    assert_eq!(category("return 1\n"), ErrorCategory::InvalidSyntax);
    assert_eq!(category("class C:\n    return\n"), ErrorCategory::InvalidSyntax);
    assert_eq!(category("break\n"), ErrorCategory::InvalidSyntax);
    assert_eq!(category("def f():\n    continue\n"), ErrorCategory::InvalidSyntax);
    // a loop in an enclosing function does not count
    assert_eq!(
        category("while x:\n    def f():\n        break\n"),
        ErrorCategory::InvalidSyntax
    );
}

/// `yield` must appear directly in a function or lambda body.
#[test]
fn misplaced_yield() {
    let err = build_error("yield 1\n");
    assert_eq!(err.category(), ErrorCategory::InvalidSyntax);
    assert_eq!(err.message(), "'yield' outside function");

    let err = build_error("def f(y):\n    return [(yield x) for x in y]\n");
    assert_eq!(err.message(), "'yield' inside list comprehension");

    let err = build_error("class C:\n    x = yield\n");
    assert_eq!(err.message(), "'yield' outside function");
}

/// Grammar errors from the parser keep their position.
#[test]
fn parse_error() {
    let err = build_error("x = (1,\n");
    assert_eq!(err.category(), ErrorCategory::InvalidSyntax);
    assert!(!err.span().is_none());
}

/// Error spans map to one-based line and column positions.
#[test]
fn error_location() {
    let code = "x = 1\nif x:\n    return x\n";
    let err = build_error(code);
    assert_eq!(
        LineIndex::new(code).span_start(err.span()),
        Some(CodeLoc { line: 3, column: 5 })
    );
    assert!(err.to_string().starts_with("invalid-syntax: 'return' outside function at "));
}
