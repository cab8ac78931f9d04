//! Tests for progress flags and operand spills on generator bodies.

use pretty_assertions::assert_eq;
use pysst::{
    BranchFlags, BuildOptions, ErrorCategory, FlagId, FunctionDef, GeneratorInfo, Module, Node, NodeKind, NoopTracer,
    RecordingTracer, ScopeTable, Span, TryFlags, build, build_with,
    generator::transform_module_with,
    transform_function, transform_module,
    visit::{Visitor, walk_node},
};

fn first_function(module: &Module) -> &FunctionDef {
    match &module.body.statements()[0].kind {
        NodeKind::FunctionDef(function) => function,
        other => panic!("expected a function definition, got {other:?}"),
    }
}

fn info(code: &str) -> GeneratorInfo {
    first_function(&build(code).unwrap()).generator.unwrap()
}

fn flag(index: u32) -> Option<FlagId> {
    Some(FlagId::new(index))
}

/// Two yields in sequence get their own flags, then the block gets one.
#[test]
fn sequential_yields() {
    let module = build("def f():\n    yield 1\n    yield 2\n").unwrap();
    let function = first_function(&module);
    assert_eq!(
        function.generator,
        Some(GeneratorInfo {
            flag_count: 3,
            spill_count: 0,
            yield_count: 2,
        })
    );
    let NodeKind::Block { body, flag: block_flag } = &function.body.kind else {
        panic!("expected a block body");
    };
    assert_eq!(*block_flag, flag(2));
    let yield_flags: Vec<Option<FlagId>> = body
        .iter()
        .map(|statement| match &statement.kind {
            NodeKind::Expr(value) => match &value.kind {
                NodeKind::Yield { flag, .. } => *flag,
                other => panic!("expected a yield, got {other:?}"),
            },
            other => panic!("expected an expression statement, got {other:?}"),
        })
        .collect();
    assert_eq!(yield_flags, vec![flag(0), flag(1)]);
}

/// Non-generator functions are left without generator info.
#[test]
fn plain_function_untouched() {
    let module = build("def f(x):\n    return x + 1\n").unwrap();
    assert_eq!(first_function(&module).generator, None);
}

/// An `if` on the path to a yield gets a taken and a done flag after its children.
#[test]
fn if_branch_flags() {
    let module = build("def f(c):\n    if c:\n        yield 1\n    else:\n        pass\n").unwrap();
    let function = first_function(&module);
    let NodeKind::If { flags, .. } = &function.body.statements()[0].kind else {
        panic!("expected an if statement");
    };
    assert_eq!(
        *flags,
        Some(BranchFlags {
            taken: FlagId::new(1),
            done: FlagId::new(2),
        })
    );
    // a single-statement block needs no flag of its own
    assert!(matches!(function.body.kind, NodeKind::Block { flag: None, .. }));
    assert_eq!(function.generator.unwrap().flag_count, 3);
}

/// Constructs without suspend points keep empty flags.
#[test]
fn non_bearing_subtree_untouched() {
    let module = build("def f(c):\n    if c:\n        pass\n    yield 1\n").unwrap();
    let function = first_function(&module);
    let statements = function.body.statements();
    assert!(matches!(statements[0].kind, NodeKind::If { flags: None, .. }));
    assert!(matches!(function.body.kind, NodeKind::Block { flag: Some(f), .. } if f == FlagId::new(1)));
}

/// Loops, `try` and `with` each get their own flags around a yield.
#[test]
fn loop_try_with_flags() {
    let module = build("def f(xs):\n    for x in xs:\n        yield x\n    return 0\n").unwrap();
    let function = first_function(&module);
    assert!(matches!(function.body.statements()[0].kind, NodeKind::For { flag: Some(f), .. } if f == FlagId::new(1)));
    assert_eq!(function.generator.unwrap().flag_count, 3);

    let module = build("def f():\n    try:\n        yield 1\n    finally:\n        pass\n").unwrap();
    let NodeKind::Try { flags, .. } = &first_function(&module).body.statements()[0].kind else {
        panic!("expected a try statement");
    };
    assert_eq!(
        *flags,
        Some(TryFlags {
            region: FlagId::new(1),
            finally: FlagId::new(2),
        })
    );

    let module = build("def f(m):\n    with m:\n        yield\n").unwrap();
    let statement = &first_function(&module).body.statements()[0];
    assert!(matches!(statement.kind, NodeKind::With { flag: Some(f), .. } if f == FlagId::new(1)));

    let module = build("def f(c):\n    while c:\n        c = yield\n").unwrap();
    let statement = &first_function(&module).body.statements()[0];
    assert!(matches!(statement.kind, NodeKind::While { flag: Some(f), .. } if f == FlagId::new(1)));
}

/// Operands evaluated before a suspending operand are spilled; constants are not.
#[test]
fn operand_spills() {
    let module = build("def f(a):\n    return a + (yield 1)\n").unwrap();
    let function = first_function(&module);
    let NodeKind::Return { value: Some(value) } = &function.body.statements()[0].kind else {
        panic!("expected a return");
    };
    let NodeKind::BinOp { left, .. } = &value.kind else {
        panic!("expected a binary operation");
    };
    let NodeKind::Spill { slot, value: spilled } = &left.kind else {
        panic!("expected a spilled operand, got {:?}", left.kind);
    };
    assert_eq!(*slot, 0);
    assert_eq!(spilled.kind, NodeKind::Name("a".to_owned()));
    assert_eq!(left.span, spilled.span);
    assert_eq!(function.generator.unwrap().spill_count, 1);

    assert_eq!(info("def f():\n    return 1 + (yield)\n").spill_count, 0);
}

/// Operands after the last suspending operand are evaluated normally and never spilled.
#[test]
fn later_operands_not_spilled() {
    let module = build("def f(a, b, c):\n    g(a, (yield), b, c)\n").unwrap();
    let NodeKind::Expr(call) = &first_function(&module).body.statements()[0].kind else {
        panic!("expected an expression statement");
    };
    let NodeKind::Call { func, args, .. } = &call.kind else {
        panic!("expected a call");
    };
    assert!(matches!(func.kind, NodeKind::Spill { slot: 0, .. }));
    assert!(matches!(args[0].kind, NodeKind::Spill { slot: 1, .. }));
    assert!(matches!(args[2].kind, NodeKind::Name(_)));
    assert!(matches!(args[3].kind, NodeKind::Name(_)));
}

/// Nested functions number their flags independently of the enclosing generator.
#[test]
fn nested_generators_are_separate() {
    let module = build("def outer():\n    yield 1\n    def inner():\n        yield 2\n").unwrap();
    let outer = first_function(&module);
    assert_eq!(outer.generator.unwrap().flag_count, 2);
    let NodeKind::FunctionDef(inner) = &outer.body.statements()[1].kind else {
        panic!("expected the nested function");
    };
    assert_eq!(inner.generator.unwrap().flag_count, 1);
    assert_eq!(inner.generator.unwrap().yield_count, 1);
}

/// Lambdas that yield are transformed like functions.
#[test]
fn generator_lambda() {
    let module = build("f = lambda: (yield)\n").unwrap();
    let NodeKind::Assign { value, .. } = &module.body.statements()[0].kind else {
        panic!("expected an assignment");
    };
    let NodeKind::Lambda(lambda) = &value.kind else {
        panic!("expected a lambda");
    };
    assert_eq!(lambda.generator.unwrap().yield_count, 1);
}

/// Running the transformer again changes nothing and allocates no flags.
#[test]
fn idempotent() {
    let code = "def f(xs):\n    total = 0\n    for x in xs:\n        if x:\n            total += (yield x)\n    return total\n";
    let mut module = build(code).unwrap();
    let before = module.clone();
    let mut tracer = RecordingTracer::new();
    transform_module_with(&mut module, &mut tracer).unwrap();
    assert_eq!(module, before);
    assert!(tracer.events().is_empty());
    transform_module(&mut module).unwrap();
    assert_eq!(module, before);
}

/// Transforming later gives the same result as transforming during the build.
#[test]
fn deferred_transform_matches() {
    let code = "def f(a):\n    x = a * (yield 1)\n    with open(x) as h:\n        yield h\n";
    let eager = build(code).unwrap();
    let mut deferred = build_with(code, &BuildOptions::new().transform_generators(false), &mut NoopTracer).unwrap();
    assert_eq!(first_function(&deferred).generator, None);
    transform_module(&mut deferred).unwrap();
    assert_eq!(deferred, eager);
}

/// A single function can be transformed on its own.
#[test]
fn transform_single_function() {
    let code = "def f():\n    yield\n    yield\n";
    let mut module = build_with(code, &BuildOptions::new().transform_generators(false), &mut NoopTracer).unwrap();
    let Module { body, scopes } = &mut module;
    let NodeKind::Block { body: statements, .. } = &mut body.kind else {
        panic!("expected a block");
    };
    let NodeKind::FunctionDef(function) = &mut statements[0].kind else {
        panic!("expected a function definition");
    };
    transform_function(function, scopes, &mut NoopTracer).unwrap();
    assert_eq!(function.generator.unwrap().flag_count, 3);
}

/// A yield in a scope that is not a generator is an invariant violation.
#[test]
fn yield_outside_generator_is_invariant_error() {
    let yield_node = Node::new(
        Span::new(0, 5),
        NodeKind::Yield {
            value: None,
            is_from: false,
            flag: None,
        },
    );
    let statement = Node::new(Span::new(0, 5), NodeKind::Expr(Box::new(yield_node)));
    let mut module = Module {
        body: Node::block(Span::new(0, 5), vec![statement]),
        scopes: ScopeTable::new(),
    };
    let err = transform_module(&mut module).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Invariant);
    assert_eq!(err.span(), Span::new(0, 5));
}

/// Collects flags in post-order without descending into nested scopes.
#[derive(Default)]
struct FlagCollector(Vec<u32>);

impl<'a> Visitor<'a> for FlagCollector {
    fn visit_node(&mut self, node: &'a Node) {
        walk_node(self, node);
        let mut push = |flag: Option<FlagId>| {
            if let Some(flag) = flag {
                self.0.push(flag.index());
            }
        };
        match &node.kind {
            NodeKind::Block { flag, .. }
            | NodeKind::While { flag, .. }
            | NodeKind::For { flag, .. }
            | NodeKind::With { flag, .. }
            | NodeKind::Yield { flag, .. } => push(*flag),
            NodeKind::If { flags, .. } => {
                push(flags.map(|f| f.taken));
                push(flags.map(|f| f.done));
            }
            NodeKind::Try { flags, .. } => {
                push(flags.map(|f| f.region));
                push(flags.map(|f| f.finally));
            }
            _ => {}
        }
    }

    fn visit_function_def(&mut self, _function: &'a FunctionDef) {}
}

/// Flags read back in post-order are exactly `0..flag_count`.
#[test]
fn flags_are_post_order() {
    let code = r"
def f(items, log):
    count = 0
    for item in items:
        if item:
            count += 1
            yield item
        else:
            try:
                log((yield), count)
            except ValueError:
                yield None
            finally:
                count = 0
    while count:
        with log as entry:
            entry.value = yield count
        count -= 1
    yield from items
";
    let module = build(code).unwrap();
    let function = first_function(&module);
    let mut collector = FlagCollector::default();
    collector.visit_node(&function.body);
    let expected: Vec<u32> = (0..function.generator.unwrap().flag_count).collect();
    assert_eq!(collector.0, expected);
}

fn returned_value(function: &FunctionDef) -> &Node {
    match &function.body.statements()[0].kind {
        NodeKind::Return { value: Some(value) } => value,
        other => panic!("expected a return with a value, got {other:?}"),
    }
}

/// The test of a conditional expression is spilled when a branch suspends, so resuming takes the
/// same branch without calling the test again.
#[test]
fn ternary_test_spilled() {
    let module = build("def f(c):\n    return 1 if c() else (yield)\n").unwrap();
    let function = first_function(&module);
    let NodeKind::Ternary { test, body, orelse } = &returned_value(function).kind else {
        panic!("expected a conditional expression");
    };
    let NodeKind::Spill { slot: 0, value } = &test.kind else {
        panic!("expected the test to be spilled, got {:?}", test.kind);
    };
    assert!(matches!(value.kind, NodeKind::Call { .. }));
    assert_eq!(body.kind, NodeKind::Int(1));
    assert!(matches!(orelse.kind, NodeKind::Yield { flag: Some(f), .. } if f == FlagId::new(0)));
    assert_eq!(function.generator.unwrap().spill_count, 1);

    // a test with no suspending branch is evaluated normally
    assert_eq!(info("def f(c):\n    yield (1 if c() else 2)\n").spill_count, 0);
    // constants are never spilled
    assert_eq!(info("def f():\n    return 1 if True else (yield)\n").spill_count, 0);
}

/// Generator expressions get an implicit yield flag, a pair of condition flags per clause with
/// conditions and a loop flag per clause, innermost clause first.
#[test]
fn generator_expression_flags() {
    let module = build("def f(y):\n    return (x for x in y if x)\n").unwrap();
    let function = first_function(&module);
    assert_eq!(function.generator, None);
    let NodeKind::Comprehension(comprehension) = &returned_value(function).kind else {
        panic!("expected a generator expression");
    };
    assert_eq!(comprehension.yield_flag, flag(0));
    assert_eq!(
        comprehension.generators[0].condition_flags,
        Some(BranchFlags {
            taken: FlagId::new(1),
            done: FlagId::new(2),
        })
    );
    assert_eq!(comprehension.generators[0].flag, flag(3));
    assert_eq!(
        comprehension.generator,
        Some(GeneratorInfo {
            flag_count: 4,
            spill_count: 0,
            yield_count: 1,
        })
    );

    let module = build("g = (a for b in c for a in b)\n").unwrap();
    let NodeKind::Assign { value, .. } = &module.body.statements()[0].kind else {
        panic!("expected an assignment");
    };
    let NodeKind::Comprehension(comprehension) = &value.kind else {
        panic!("expected a generator expression");
    };
    let loop_flags: Vec<Option<FlagId>> = comprehension.generators.iter().map(|g| g.flag).collect();
    assert_eq!(loop_flags, vec![flag(2), flag(1)]);
    assert!(comprehension.generators.iter().all(|g| g.condition_flags.is_none()));
    assert_eq!(comprehension.generator.unwrap().flag_count, 3);
}

/// List, set and dict comprehensions run to completion and get no flags.
#[test]
fn other_comprehensions_untouched() {
    let module = build("def f(y):\n    return [x for x in y if x]\n").unwrap();
    let NodeKind::Comprehension(comprehension) = &returned_value(first_function(&module)).kind else {
        panic!("expected a list comprehension");
    };
    assert_eq!(comprehension.yield_flag, None);
    assert_eq!(comprehension.generator, None);
    assert_eq!(comprehension.generators[0].flag, None);
    assert_eq!(comprehension.generators[0].condition_flags, None);
}

/// Transforming a generator expression twice allocates nothing new.
#[test]
fn generator_expression_idempotent() {
    let mut module = build("g = (a for b in c if b for a in b if a)\n").unwrap();
    let before = module.clone();
    let mut tracer = RecordingTracer::new();
    transform_module_with(&mut module, &mut tracer).unwrap();
    assert_eq!(module, before);
    assert!(tracer.events().is_empty());
}

/// A starred operand keeps its star and spills the value it unpacks.
#[test]
fn starred_operand_spills_value() {
    let module = build("def f(a):\n    g(*a, (yield))\n").unwrap();
    let NodeKind::Expr(call) = &first_function(&module).body.statements()[0].kind else {
        panic!("expected an expression statement");
    };
    let NodeKind::Call { func, args, .. } = &call.kind else {
        panic!("expected a call");
    };
    assert!(matches!(func.kind, NodeKind::Spill { slot: 0, .. }));
    let NodeKind::Starred(inner) = &args[0].kind else {
        panic!("expected the star to stay outermost, got {:?}", args[0].kind);
    };
    let NodeKind::Spill { slot: 1, value } = &inner.kind else {
        panic!("expected the unpacked value to be spilled, got {:?}", inner.kind);
    };
    assert_eq!(value.kind, NodeKind::Name("a".to_owned()));
}
