//! Deterministic textual dumps of a tree and its scope table.
//!
//! One node per line, children indented by four spaces under a `label:` naming the field they
//! came from. Generator flags print as `flag=N`, scope references as `scope=#N`.

use std::fmt::Write;

use crate::{
    args::{ArgDef, ArgDefs, Splat},
    error::SstError,
    scope::ScopeTable,
    sst::{Alias, BranchFlags, ComprehensionKind, FStringPart, FlagId, GeneratorInfo, Module, Node, NodeKind, SimpleKind},
};

const INDENT: &str = "    ";

/// Renders the module body.
#[must_use]
pub fn render_module(module: &Module) -> String {
    render_node(&module.body)
}

/// Renders a subtree.
#[must_use]
pub fn render_node(node: &Node) -> String {
    let mut printer = TreePrinter::default();
    printer.node(None, node);
    printer.out
}

/// Renders the module, scope table included, as pretty-printed JSON.
pub fn render_json(module: &Module) -> Result<String, SstError> {
    serde_json::to_string_pretty(module).map_err(|err| SstError::invariant(format!("json: {err}"), module.body.span))
}

/// Renders every scope in creation order with its slot assignment.
#[must_use]
pub fn render_scopes(scopes: &ScopeTable) -> String {
    let mut out = String::new();
    for id in scopes.ids() {
        let scope = &scopes[id];
        let kind: &'static str = scope.kind().into();
        let _ = write!(out, "{id} {kind} {}", scope.name());
        if let Some(parent) = scope.parent() {
            let _ = write!(out, " in {parent}");
        }
        out.push('\n');
        write_list(&mut out, "params", scope.params());
        write_list(&mut out, "locals", scope.locals());
        write_list(&mut out, "cells", scope.cell_vars());
        write_list(&mut out, "frees", scope.free_vars());
        for (name, symbol) in scope.symbols() {
            let _ = write!(out, "{INDENT}{name}: ");
            match symbol.slot {
                Some(slot) => {
                    let _ = write!(out, "{slot}");
                }
                None => out.push_str("unresolved"),
            }
            let _ = writeln!(out, " {:?}", symbol.flags);
        }
    }
    out
}

fn write_list(out: &mut String, label: &str, names: &[String]) {
    if !names.is_empty() {
        let _ = writeln!(out, "{INDENT}{label}: {}", names.join(", "));
    }
}

#[derive(Default)]
struct TreePrinter {
    out: String,
    level: usize,
}

impl TreePrinter {
    fn line(&mut self, label: Option<&str>, text: &str) {
        for _ in 0..self.level {
            self.out.push_str(INDENT);
        }
        match label {
            Some(label) if text.is_empty() => {
                self.out.push_str(label);
                self.out.push(':');
            }
            Some(label) => {
                self.out.push_str(label);
                self.out.push_str(": ");
                self.out.push_str(text);
            }
            None => self.out.push_str(text),
        }
        self.out.push('\n');
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.level += 1;
        f(self);
        self.level -= 1;
    }

    fn opt(&mut self, label: &str, node: Option<&Node>) {
        if let Some(node) = node {
            self.node(Some(label), node);
        }
    }

    fn list(&mut self, label: &str, nodes: &[Node]) {
        if nodes.is_empty() {
            return;
        }
        self.line(Some(label), "");
        self.nested(|p| {
            for node in nodes {
                p.node(None, node);
            }
        });
    }

    fn args(&mut self, args: &ArgDefs) {
        if args.is_empty() {
            return;
        }
        self.line(Some("params"), &args.signature().to_string());
        self.nested(|p| {
            for arg in args.iter() {
                p.arg(arg);
            }
            if let Some(Splat::Bare(span)) = &args.splat {
                p.line(None, &format!("* {span:?}"));
            }
        });
    }

    fn arg(&mut self, arg: &ArgDef) {
        if arg.annotation.is_none() && arg.default.is_none() {
            return;
        }
        self.line(None, &format!("{} {:?}", arg.name, arg.span));
        self.nested(|p| {
            p.opt("annotation", arg.annotation.as_ref());
            p.opt("default", arg.default.as_ref());
        });
    }

    fn fstring_parts(&mut self, parts: &[FStringPart]) {
        for part in parts {
            match part {
                FStringPart::Literal(s) => self.line(None, &format!("Literal {s:?}")),
                FStringPart::Interpolation {
                    value,
                    conversion,
                    format_spec,
                    debug_text,
                } => {
                    let mut header = format!("Interpolation conversion={conversion:?}");
                    if let Some(text) = debug_text {
                        let _ = write!(header, " debug={text:?}");
                    }
                    self.line(None, &header);
                    self.nested(|p| {
                        p.node(Some("value"), value);
                        if let Some(spec) = format_spec {
                            p.line(Some("format_spec"), "");
                            p.nested(|p| p.fstring_parts(spec));
                        }
                    });
                }
            }
        }
    }

    fn node(&mut self, label: Option<&str>, node: &Node) {
        let span = node.span;
        match &node.kind {
            NodeKind::Block { body, flag } => {
                self.line(label, &format!("Block{} {span:?}", flag_suffix(*flag)));
                self.nested(|p| {
                    for statement in body {
                        p.node(None, statement);
                    }
                });
            }
            NodeKind::Expr(value) => {
                self.line(label, &format!("Expr {span:?}"));
                self.nested(|p| p.node(None, value));
            }
            NodeKind::Assign { targets, value } => {
                self.line(label, &format!("Assign {span:?}"));
                self.nested(|p| {
                    p.list("targets", targets);
                    p.node(Some("value"), value);
                });
            }
            NodeKind::AugAssign { target, op, value } => {
                self.line(label, &format!("AugAssign {}= {span:?}", op.symbol()));
                self.nested(|p| {
                    p.node(Some("target"), target);
                    p.node(Some("value"), value);
                });
            }
            NodeKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.line(label, &format!("AnnAssign {span:?}"));
                self.nested(|p| {
                    p.node(Some("target"), target);
                    p.node(Some("annotation"), annotation);
                    p.opt("value", value.as_deref());
                });
            }
            NodeKind::Del { targets } => {
                self.line(label, &format!("Del {span:?}"));
                self.nested(|p| p.list("targets", targets));
            }
            NodeKind::Return { value } => {
                self.line(label, &format!("Return {span:?}"));
                self.nested(|p| p.opt("value", value.as_deref()));
            }
            NodeKind::Raise { exc, cause } => {
                self.line(label, &format!("Raise {span:?}"));
                self.nested(|p| {
                    p.opt("exc", exc.as_deref());
                    p.opt("cause", cause.as_deref());
                });
            }
            NodeKind::Assert { test, msg } => {
                self.line(label, &format!("Assert {span:?}"));
                self.nested(|p| {
                    p.node(Some("test"), test);
                    p.opt("msg", msg.as_deref());
                });
            }
            NodeKind::Import { names } => {
                let names: Vec<String> = names.iter().map(alias_text).collect();
                self.line(label, &format!("Import {} {span:?}", names.join(", ")));
            }
            NodeKind::ImportFrom { module, level, names } => {
                let names: Vec<String> = names.iter().map(alias_text).collect();
                let dots = ".".repeat(*level as usize);
                let module = module.as_deref().unwrap_or_default();
                self.line(
                    label,
                    &format!("ImportFrom {dots}{module} import {} {span:?}", names.join(", ")),
                );
            }
            NodeKind::Global { names } => self.line(label, &format!("Global {} {span:?}", names.join(", "))),
            NodeKind::Nonlocal { names } => self.line(label, &format!("Nonlocal {} {span:?}", names.join(", "))),
            NodeKind::If {
                test,
                body,
                orelse,
                flags,
            } => {
                self.line(label, &format!("If{} {span:?}", branch_suffix(*flags)));
                self.nested(|p| {
                    p.node(Some("test"), test);
                    p.node(Some("body"), body);
                    p.opt("orelse", orelse.as_deref());
                });
            }
            NodeKind::While {
                test,
                body,
                orelse,
                contains_break,
                contains_continue,
                flag,
            } => {
                let header = format!(
                    "While{}{} {span:?}",
                    loop_suffix(*contains_break, *contains_continue),
                    flag_suffix(*flag)
                );
                self.line(label, &header);
                self.nested(|p| {
                    p.node(Some("test"), test);
                    p.node(Some("body"), body);
                    p.opt("orelse", orelse.as_deref());
                });
            }
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
                is_async,
                contains_break,
                contains_continue,
                flag,
            } => {
                let header = format!(
                    "{}For{}{} {span:?}",
                    async_prefix(*is_async),
                    loop_suffix(*contains_break, *contains_continue),
                    flag_suffix(*flag)
                );
                self.line(label, &header);
                self.nested(|p| {
                    p.node(Some("target"), target);
                    p.node(Some("iter"), iter);
                    p.node(Some("body"), body);
                    p.opt("orelse", orelse.as_deref());
                });
            }
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finally,
                flags,
            } => {
                let flags = flags.map_or_else(String::new, |f| {
                    format!(" region={} finally={}", f.region.index(), f.finally.index())
                });
                self.line(label, &format!("Try{flags} {span:?}"));
                self.nested(|p| {
                    p.node(Some("body"), body);
                    for handler in handlers {
                        let star = if handler.is_star { "*" } else { "" };
                        let name = handler.name.as_deref().map(|n| format!(" as {n}")).unwrap_or_default();
                        p.line(None, &format!("Except{star}{name} {:?}", handler.span));
                        p.nested(|p| {
                            p.opt("test", handler.test.as_ref());
                            p.node(Some("body"), &handler.body);
                        });
                    }
                    p.opt("orelse", orelse.as_deref());
                    p.opt("finally", finally.as_deref());
                });
            }
            NodeKind::With {
                items,
                body,
                is_async,
                flag,
            } => {
                self.line(
                    label,
                    &format!("{}With{} {span:?}", async_prefix(*is_async), flag_suffix(*flag)),
                );
                self.nested(|p| {
                    for item in items {
                        p.node(Some("context"), &item.context);
                        p.opt("as", item.target.as_ref());
                    }
                    p.node(Some("body"), body);
                });
            }
            NodeKind::FunctionDef(function) => {
                let header = format!(
                    "{}FunctionDef {} scope={}{} {span:?}",
                    async_prefix(function.is_async),
                    function.name,
                    function.scope,
                    generator_suffix(function.generator)
                );
                self.line(label, &header);
                self.nested(|p| {
                    p.list("decorators", &function.decorators);
                    p.args(&function.params);
                    p.opt("returns", function.returns.as_ref());
                    p.node(Some("body"), &function.body);
                });
            }
            NodeKind::ClassDef(class) => {
                self.line(label, &format!("ClassDef {} scope={} {span:?}", class.name, class.scope));
                self.nested(|p| {
                    p.list("decorators", &class.decorators);
                    p.list("bases", &class.bases);
                    for keyword in &class.keywords {
                        p.node(Some(keyword.name.as_deref().unwrap_or("**")), &keyword.value);
                    }
                    p.node(Some("body"), &class.body);
                });
            }
            NodeKind::Simple(kind) => {
                let text = match kind {
                    SimpleKind::Pass => "Pass",
                    SimpleKind::Break => "Break",
                    SimpleKind::Continue => "Continue",
                    SimpleKind::None => "None",
                    SimpleKind::Ellipsis => "Ellipsis",
                };
                self.line(label, &format!("{text} {span:?}"));
            }
            NodeKind::BoolOp { op, values } => {
                let op: &'static str = op.into();
                self.line(label, &format!("BoolOp {op} {span:?}"));
                self.nested(|p| {
                    for value in values {
                        p.node(None, value);
                    }
                });
            }
            NodeKind::BinOp { left, op, right } => {
                self.line(label, &format!("BinOp {} {span:?}", op.symbol()));
                self.nested(|p| {
                    p.node(None, left);
                    p.node(None, right);
                });
            }
            NodeKind::Unary { op, operand } => {
                self.line(label, &format!("Unary {} {span:?}", op.symbol()));
                self.nested(|p| p.node(None, operand));
            }
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } => {
                let ops: Vec<&str> = ops.iter().map(|op| op.symbol()).collect();
                self.line(label, &format!("Compare {} {span:?}", ops.join(" ")));
                self.nested(|p| {
                    p.node(None, left);
                    for comparator in comparators {
                        p.node(None, comparator);
                    }
                });
            }
            NodeKind::Ternary { test, body, orelse } => {
                self.line(label, &format!("Ternary {span:?}"));
                self.nested(|p| {
                    p.node(Some("test"), test);
                    p.node(Some("body"), body);
                    p.node(Some("orelse"), orelse);
                });
            }
            NodeKind::Named { target, value } => {
                self.line(label, &format!("Named {target} {span:?}"));
                self.nested(|p| p.node(None, value));
            }
            NodeKind::Call { func, args, keywords } => {
                self.line(label, &format!("Call {span:?}"));
                self.nested(|p| {
                    p.node(Some("func"), func);
                    p.list("args", args);
                    for keyword in keywords {
                        p.node(Some(keyword.name.as_deref().unwrap_or("**")), &keyword.value);
                    }
                });
            }
            NodeKind::Attribute { value, attr } => {
                self.line(label, &format!("Attribute .{attr} {span:?}"));
                self.nested(|p| p.node(None, value));
            }
            NodeKind::Subscript { value, index } => {
                self.line(label, &format!("Subscript {span:?}"));
                self.nested(|p| {
                    p.node(Some("value"), value);
                    p.node(Some("index"), index);
                });
            }
            NodeKind::Slice { lower, upper, step } => {
                self.line(label, &format!("Slice {span:?}"));
                self.nested(|p| {
                    p.opt("lower", lower.as_deref());
                    p.opt("upper", upper.as_deref());
                    p.opt("step", step.as_deref());
                });
            }
            NodeKind::Starred(value) => {
                self.line(label, &format!("Starred {span:?}"));
                self.nested(|p| p.node(None, value));
            }
            NodeKind::Collection { kind, elements } => {
                let kind: &'static str = kind.into();
                self.line(label, &format!("Collection {kind} {span:?}"));
                self.nested(|p| {
                    for element in elements {
                        p.node(None, element);
                    }
                });
            }
            NodeKind::Dict { entries } => {
                self.line(label, &format!("Dict {span:?}"));
                self.nested(|p| {
                    for entry in entries {
                        match &entry.key {
                            Some(key) => p.node(Some("key"), key),
                            None => p.line(Some("key"), "**"),
                        }
                        p.node(Some("value"), &entry.value);
                    }
                });
            }
            NodeKind::Comprehension(comprehension) => {
                let kind: &'static str = comprehension.kind.into();
                self.line(
                    label,
                    &format!(
                        "Comprehension {kind} scope={}{}{} {span:?}",
                        comprehension.scope,
                        flag_suffix(comprehension.yield_flag),
                        generator_suffix(comprehension.generator)
                    ),
                );
                self.nested(|p| {
                    let element_label = if comprehension.kind == ComprehensionKind::Dict {
                        "key"
                    } else {
                        "element"
                    };
                    p.node(Some(element_label), &comprehension.element);
                    p.opt("value", comprehension.value.as_ref());
                    for generator in &comprehension.generators {
                        p.line(
                            None,
                            &format!(
                                "{}for{}{}",
                                async_prefix(generator.is_async),
                                flag_suffix(generator.flag),
                                branch_suffix(generator.condition_flags)
                            ),
                        );
                        p.nested(|p| {
                            p.node(Some("target"), &generator.target);
                            p.node(Some("iter"), &generator.iter);
                            p.list("if", &generator.conditions);
                        });
                    }
                });
            }
            NodeKind::Lambda(lambda) => {
                self.line(
                    label,
                    &format!(
                        "Lambda scope={}{} {span:?}",
                        lambda.scope,
                        generator_suffix(lambda.generator)
                    ),
                );
                self.nested(|p| {
                    p.args(&lambda.params);
                    p.node(Some("body"), &lambda.body);
                });
            }
            NodeKind::Yield { value, is_from, flag } => {
                let from = if *is_from { "From" } else { "" };
                self.line(label, &format!("Yield{from}{} {span:?}", flag_suffix(*flag)));
                self.nested(|p| p.opt("value", value.as_deref()));
            }
            NodeKind::Await(value) => {
                self.line(label, &format!("Await {span:?}"));
                self.nested(|p| p.node(None, value));
            }
            NodeKind::Name(name) => self.line(label, &format!("Name {name} {span:?}")),
            NodeKind::Int(i) => self.line(label, &format!("Int {i} {span:?}")),
            NodeKind::BigInt(i) => self.line(label, &format!("BigInt {i} {span:?}")),
            NodeKind::Float(f) => self.line(label, &format!("Float {f:?} {span:?}")),
            NodeKind::Imaginary(f) => self.line(label, &format!("Imaginary {f:?}j {span:?}")),
            NodeKind::Str(s) => self.line(label, &format!("Str {s:?} {span:?}")),
            NodeKind::Bytes(bytes) => {
                let text: String = bytes.iter().flat_map(|b| std::ascii::escape_default(*b)).map(char::from).collect();
                self.line(label, &format!("Bytes b\"{text}\" {span:?}"));
            }
            NodeKind::FString(parts) => {
                self.line(label, &format!("FString {span:?}"));
                self.nested(|p| p.fstring_parts(parts));
            }
            NodeKind::Bool(b) => self.line(label, &format!("Bool {} {span:?}", if *b { "True" } else { "False" })),
            NodeKind::Spill { slot, value } => {
                self.line(label, &format!("Spill slot={slot} {span:?}"));
                self.nested(|p| p.node(None, value));
            }
        }
    }
}

fn flag_suffix(flag: Option<FlagId>) -> String {
    flag.map(|f| format!(" flag={}", f.index())).unwrap_or_default()
}

fn branch_suffix(flags: Option<BranchFlags>) -> String {
    flags
        .map(|f| format!(" taken={} done={}", f.taken.index(), f.done.index()))
        .unwrap_or_default()
}

fn loop_suffix(contains_break: bool, contains_continue: bool) -> &'static str {
    match (contains_break, contains_continue) {
        (true, true) => " break continue",
        (true, false) => " break",
        (false, true) => " continue",
        (false, false) => "",
    }
}

fn async_prefix(is_async: bool) -> &'static str {
    if is_async { "Async" } else { "" }
}

fn generator_suffix(info: Option<GeneratorInfo>) -> String {
    info.map(|g| {
        format!(
            " generator(flags={} spills={} yields={})",
            g.flag_count, g.spill_count, g.yield_count
        )
    })
    .unwrap_or_default()
}

fn alias_text(alias: &Alias) -> String {
    match &alias.asname {
        Some(asname) => format!("{} as {asname}", alias.name),
        None => alias.name.clone(),
    }
}
