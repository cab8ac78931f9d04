//! Lowers the ruff AST into the intermediate tree while recording scopes.
//!
//! One pass does both jobs: every construct that introduces a scope pushes a frame on an explicit
//! stack, every name read or written is noted in the scope on top of that stack, and the node is
//! built as the walk returns. Classification of the noted names happens afterwards in
//! [`ScopeTable::finalize`].

use std::borrow::Cow;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use ruff_python_ast::{
    self as ast, BoolOp, CmpOp, ConversionFlag as RuffConversionFlag, ElifElseClause, Expr as AstExpr,
    InterpolatedStringElement, Number, Operator as AstOperator, ParameterWithDefault, Stmt, UnaryOp,
};
use ruff_python_parser::{ParseError, parse_module};
use ruff_text_size::{Ranged, TextRange};
use smallvec::SmallVec;

use crate::{
    args::{ArgDef, ArgDefListBuilder, ArgDefs},
    error::{ErrorCategory, SstError},
    generator,
    options::BuildOptions,
    scope::{DefUse, ScopeId, ScopeKind, ScopeTable},
    span::Span,
    sst::{
        Alias, BinaryOperator, BoolOperator, ClassDef, CmpOperator, CollectionKind, Comprehension, ComprehensionFor,
        ComprehensionKind, Conversion, DictEntry, ExceptHandler, FStringPart, FunctionDef, Keyword, Lambda, Module,
        Node, NodeKind, SimpleKind, UnaryOperator, WithItem,
    },
    tracer::{NoopTracer, SstTracer},
};

/// Builds a module with default options.
///
/// ```
/// let module = pysst::build("a = b = 1\n").unwrap();
/// assert_eq!(module.body.statements().len(), 1);
/// ```
pub fn build(code: &str) -> Result<Module, SstError> {
    build_with(code, &BuildOptions::default(), &mut NoopTracer)
}

/// Builds a module, reporting progress to `tracer`.
///
/// When [`BuildOptions::transform_generators`] is set, every generator body is transformed
/// before the module is returned.
pub fn build_with(code: &str, options: &BuildOptions, tracer: &mut impl SstTracer) -> Result<Module, SstError> {
    let parsed = parse_module(code).map_err(|e| map_parse_error(&e))?;
    let syntax = parsed.into_syntax();
    let mut builder = Builder::new(code, options, tracer);
    builder.tracer.on_scope_enter(ScopeId::MODULE, ScopeKind::Module, "<module>", 0);
    let body = builder.build_block(syntax.body, syntax.range.into())?;
    builder.tracer.on_scope_exit(ScopeId::MODULE, 0);
    let mut scopes = builder.table;
    scopes.finalize()?;
    let mut module = Module { body, scopes };
    if options.transform_generators {
        generator::transform_module_with(&mut module, tracer)?;
    }
    Ok(module)
}

/// Maps a ruff grammar error to the most specific category its message names.
fn map_parse_error(err: &ParseError) -> SstError {
    let msg = err.error.to_string();
    let lower = msg.to_lowercase();
    let category = if lower.contains("duplicate") && (lower.contains("parameter") || lower.contains("argument")) {
        ErrorCategory::DuplicateParameter
    } else if lower.contains("default") && lower.contains("follow") {
        ErrorCategory::NonDefaultAfterDefault
    } else if lower.contains("starred") && (lower.contains("multiple") || lower.contains("two")) {
        ErrorCategory::MultipleStarredTargets
    } else if lower.contains("nonlocal") && lower.contains("module level") {
        ErrorCategory::UnresolvedNonlocal
    } else {
        ErrorCategory::InvalidSyntax
    };
    SstError::syntax(category, msg, err.location.into())
}

/// What kind of construct a scope frame belongs to; finer than [`ScopeKind`] because generator
/// expressions and generator functions share a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Module,
    Function,
    Lambda,
    Class,
    Comprehension(ComprehensionKind),
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    id: ScopeId,
    kind: FrameKind,
}

/// `break`/`continue` seen in the innermost loop body.
#[derive(Debug, Clone, Copy, Default)]
struct LoopFrame {
    has_break: bool,
    has_continue: bool,
}

struct Builder<'a, T: SstTracer> {
    code: &'a str,
    options: &'a BuildOptions,
    tracer: &'a mut T,
    table: ScopeTable,
    frames: SmallVec<[Frame; 8]>,
    /// Enclosing class names for private name mangling.
    class_stack: Vec<String>,
    /// Loops of the current function body; saved and cleared when entering a new scope.
    loops: Vec<LoopFrame>,
    /// Remaining nesting budget; each statement, expression and target level consumes one.
    depth_remaining: u16,
}

impl<'a, T: SstTracer> Builder<'a, T> {
    fn new(code: &'a str, options: &'a BuildOptions, tracer: &'a mut T) -> Self {
        let mut frames = SmallVec::new();
        frames.push(Frame {
            id: ScopeId::MODULE,
            kind: FrameKind::Module,
        });
        Self {
            code,
            options,
            tracer,
            table: ScopeTable::new(),
            frames,
            class_stack: Vec::new(),
            loops: Vec::new(),
            depth_remaining: options.max_nesting_depth,
        }
    }

    // ------------------------------------------------------------------
    // scopes and names
    // ------------------------------------------------------------------

    fn current(&self) -> Frame {
        // the module frame is never popped
        self.frames.last().copied().unwrap_or(Frame {
            id: ScopeId::MODULE,
            kind: FrameKind::Module,
        })
    }

    fn enter_scope(&mut self, kind: FrameKind, name: &str, span: Span) -> ScopeId {
        let scope_kind = match kind {
            FrameKind::Module => ScopeKind::Module,
            FrameKind::Function => ScopeKind::Function,
            FrameKind::Lambda => ScopeKind::Lambda,
            FrameKind::Class => ScopeKind::Class,
            FrameKind::Comprehension(ComprehensionKind::Generator) => ScopeKind::Generator,
            FrameKind::Comprehension(_) => ScopeKind::Comprehension,
        };
        let id = self.table.push(self.current().id, scope_kind, name, span);
        self.frames.push(Frame { id, kind });
        self.tracer
            .on_scope_enter(id, scope_kind, name, self.frames.len() - 1);
        id
    }

    fn exit_scope(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.tracer.on_scope_exit(frame.id, self.frames.len());
        }
    }

    /// Applies class-private mangling: `__x` inside `class C` becomes `_C__x`.
    fn mangle<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if !self.options.mangle_private_names || !is_mangling_candidate(name) {
            return Cow::Borrowed(name);
        }
        let Some(class_name) = self.class_stack.last() else {
            return Cow::Borrowed(name);
        };
        let stripped = class_name.trim_start_matches('_');
        if stripped.is_empty() {
            return Cow::Borrowed(name);
        }
        Cow::Owned(format!("_{stripped}{name}"))
    }

    /// Records a binding of `name` in the current scope and returns the stored name.
    fn bind(&mut self, name: &str, flags: DefUse, span: Span) -> String {
        let name = self.mangle(name).into_owned();
        let id = self.current().id;
        self.table.note(id, &name, flags, span);
        name
    }

    /// Records a read of `name` in the current scope and returns the stored name.
    fn use_name(&mut self, name: &str, span: Span) -> String {
        let name = self.mangle(name).into_owned();
        let frame = self.current();
        self.table.note(frame.id, &name, DefUse::USE, span);
        if name == "super" && !matches!(frame.kind, FrameKind::Module | FrameKind::Class) {
            self.table.note(frame.id, crate::scope::CLASS_CELL, DefUse::USE, Span::NONE);
        }
        name
    }

    fn decr_depth_remaining(&mut self, get_range: impl FnOnce() -> TextRange) -> Result<(), SstError> {
        if let Some(depth_remaining) = self.depth_remaining.checked_sub(1) {
            self.depth_remaining = depth_remaining;
            Ok(())
        } else {
            Err(SstError::syntax(
                ErrorCategory::NestingTooDeep,
                "too many nested parentheses",
                get_range().into(),
            ))
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn build_block(&mut self, statements: Vec<Stmt>, span: Span) -> Result<Node, SstError> {
        let body = statements
            .into_iter()
            .map(|s| self.build_statement(s))
            .collect::<Result<Vec<_>, _>>()?;
        let span = match (body.first(), body.last()) {
            (Some(first), Some(last)) if span.is_none() => first.span.cover(last.span),
            _ => span,
        };
        Ok(Node::block(span, body))
    }

    /// Builds a block spanning its statements.
    fn build_body(&mut self, statements: Vec<Stmt>) -> Result<Node, SstError> {
        self.build_block(statements, Span::NONE)
    }

    /// Builds an `else`/`finally` clause, which is absent when empty.
    fn build_clause(&mut self, statements: Vec<Stmt>) -> Result<Option<Box<Node>>, SstError> {
        if statements.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Box::new(self.build_body(statements)?)))
        }
    }

    fn build_statement(&mut self, statement: Stmt) -> Result<Node, SstError> {
        self.decr_depth_remaining(|| statement.range())?;
        let result = self.build_statement_impl(statement);
        self.depth_remaining += 1;
        result
    }

    fn build_statement_impl(&mut self, statement: Stmt) -> Result<Node, SstError> {
        let span = Span::from(statement.range());
        let kind = match statement {
            Stmt::FunctionDef(function) => self.build_function_def(function)?,
            Stmt::ClassDef(class) => self.build_class_def(class)?,
            Stmt::Return(ast::StmtReturn { value, .. }) => {
                if matches!(self.current().kind, FrameKind::Module | FrameKind::Class) {
                    return Err(SstError::invalid_syntax("'return' outside function", span));
                }
                NodeKind::Return {
                    value: self.build_optional(value)?,
                }
            }
            Stmt::Delete(ast::StmtDelete { targets, .. }) => NodeKind::Del {
                targets: targets
                    .into_iter()
                    .map(|t| self.build_target(t, DefUse::LOCAL))
                    .collect::<Result<_, _>>()?,
            },
            Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                let targets = targets
                    .into_iter()
                    .map(|t| self.build_target(t, DefUse::LOCAL))
                    .collect::<Result<_, _>>()?;
                NodeKind::Assign {
                    targets,
                    value: Box::new(self.build_expression(*value)?),
                }
            }
            Stmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => {
                let target = self.build_target(*target, DefUse::LOCAL)?;
                if !matches!(
                    target.kind,
                    NodeKind::Name(_) | NodeKind::Attribute { .. } | NodeKind::Subscript { .. }
                ) {
                    return Err(SstError::invalid_syntax(
                        "illegal expression for augmented assignment",
                        target.span,
                    ));
                }
                NodeKind::AugAssign {
                    target: Box::new(target),
                    op: convert_op(op),
                    value: Box::new(self.build_expression(*value)?),
                }
            }
            Stmt::AnnAssign(ast::StmtAnnAssign {
                target,
                annotation,
                value,
                simple,
                ..
            }) => self.build_ann_assign(*target, *annotation, value, simple)?,
            Stmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                let iter = self.build_expression(*iter)?;
                let target = self.build_target(*target, DefUse::LOCAL)?;
                self.loops.push(LoopFrame::default());
                let body = self.build_body(body);
                let loop_frame = self.loops.pop().unwrap_or_default();
                let body = body?;
                NodeKind::For {
                    target: Box::new(target),
                    iter: Box::new(iter),
                    body: Box::new(body),
                    orelse: self.build_clause(orelse)?,
                    is_async,
                    contains_break: loop_frame.has_break,
                    contains_continue: loop_frame.has_continue,
                    flag: None,
                }
            }
            Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => {
                let test = self.build_expression(*test)?;
                self.loops.push(LoopFrame::default());
                let body = self.build_body(body);
                let loop_frame = self.loops.pop().unwrap_or_default();
                let body = body?;
                NodeKind::While {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: self.build_clause(orelse)?,
                    contains_break: loop_frame.has_break,
                    contains_continue: loop_frame.has_continue,
                    flag: None,
                }
            }
            Stmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                ..
            }) => NodeKind::If {
                test: Box::new(self.build_expression(*test)?),
                body: Box::new(self.build_body(body)?),
                orelse: self.build_elif_else_clauses(elif_else_clauses)?,
                flags: None,
            },
            Stmt::With(ast::StmtWith {
                is_async, items, body, ..
            }) => {
                let items = items
                    .into_iter()
                    .map(|item| {
                        let context = self.build_expression(item.context_expr)?;
                        let target = item
                            .optional_vars
                            .map(|t| self.build_target(*t, DefUse::LOCAL))
                            .transpose()?;
                        Ok(WithItem { context, target })
                    })
                    .collect::<Result<Vec<_>, SstError>>()?;
                NodeKind::With {
                    items,
                    body: Box::new(self.build_body(body)?),
                    is_async,
                    flag: None,
                }
            }
            Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => NodeKind::Raise {
                exc: self.build_optional(exc)?,
                cause: self.build_optional(cause)?,
            },
            Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                ..
            }) => {
                let body = self.build_body(body)?;
                let handlers = handlers
                    .into_iter()
                    .map(|h| self.build_except_handler(h, is_star))
                    .collect::<Result<Vec<_>, _>>()?;
                NodeKind::Try {
                    body: Box::new(body),
                    handlers,
                    orelse: self.build_clause(orelse)?,
                    finally: self.build_clause(finalbody)?,
                    flags: None,
                }
            }
            Stmt::Assert(ast::StmtAssert { test, msg, .. }) => NodeKind::Assert {
                test: Box::new(self.build_expression(*test)?),
                msg: self.build_optional(msg)?,
            },
            Stmt::Import(ast::StmtImport { names, .. }) => {
                let names: Vec<Alias> = names
                    .iter()
                    .map(|alias| Alias {
                        name: alias.name.as_str().to_owned(),
                        asname: alias.asname.as_ref().map(|a| a.as_str().to_owned()),
                    })
                    .collect();
                let id = self.current().id;
                for alias in &names {
                    self.table.note(id, alias.binding(), DefUse::IMPORT, span);
                }
                NodeKind::Import { names }
            }
            Stmt::ImportFrom(ast::StmtImportFrom {
                module, names, level, ..
            }) => {
                let names: Vec<Alias> = names
                    .iter()
                    .map(|alias| Alias {
                        name: alias.name.as_str().to_owned(),
                        asname: alias.asname.as_ref().map(|a| a.as_str().to_owned()),
                    })
                    .collect();
                let frame = self.current();
                for alias in &names {
                    if alias.name == "*" {
                        if frame.kind != FrameKind::Module {
                            return Err(SstError::syntax(
                                ErrorCategory::ImportStarOutsideModule,
                                "import * only allowed at module level",
                                span,
                            ));
                        }
                    } else {
                        self.table.note(frame.id, alias.binding(), DefUse::IMPORT, span);
                    }
                }
                NodeKind::ImportFrom {
                    module: module.map(|m| m.as_str().to_owned()),
                    level,
                    names,
                }
            }
            Stmt::Global(ast::StmtGlobal { names, .. }) => {
                let id = self.current().id;
                let mut declared = Vec::with_capacity(names.len());
                for ident in &names {
                    let name = self.mangle(ident.as_str()).into_owned();
                    self.table.declare_global(id, &name, ident.range.into())?;
                    declared.push(name);
                }
                NodeKind::Global { names: declared }
            }
            Stmt::Nonlocal(ast::StmtNonlocal { names, .. }) => {
                let id = self.current().id;
                let mut declared = Vec::with_capacity(names.len());
                for ident in &names {
                    let name = self.mangle(ident.as_str()).into_owned();
                    self.table.declare_nonlocal(id, &name, ident.range.into())?;
                    declared.push(name);
                }
                NodeKind::Nonlocal { names: declared }
            }
            Stmt::Expr(ast::StmtExpr { value, .. }) => NodeKind::Expr(Box::new(self.build_expression(*value)?)),
            Stmt::Pass(_) => NodeKind::Simple(SimpleKind::Pass),
            Stmt::Break(_) => {
                let Some(loop_frame) = self.loops.last_mut() else {
                    return Err(SstError::invalid_syntax("'break' outside loop", span));
                };
                loop_frame.has_break = true;
                NodeKind::Simple(SimpleKind::Break)
            }
            Stmt::Continue(_) => {
                let Some(loop_frame) = self.loops.last_mut() else {
                    return Err(SstError::invalid_syntax("'continue' not properly in loop", span));
                };
                loop_frame.has_continue = true;
                NodeKind::Simple(SimpleKind::Continue)
            }
            Stmt::Match(_) => return Err(SstError::unsupported("match statements", span)),
            Stmt::TypeAlias(_) => return Err(SstError::unsupported("type alias statements", span)),
            Stmt::IpyEscapeCommand(_) => return Err(SstError::unsupported("IPython escape commands", span)),
        };
        Ok(Node::new(span, kind))
    }

    fn build_elif_else_clauses(&mut self, clauses: Vec<ElifElseClause>) -> Result<Option<Box<Node>>, SstError> {
        let mut clauses = clauses.into_iter();
        let Some(clause) = clauses.next() else {
            return Ok(None);
        };
        let span = Span::from(clause.range);
        let node = match clause.test {
            Some(test) => {
                let test = self.build_expression(test)?;
                let body = self.build_body(clause.body)?;
                let orelse = self.build_elif_else_clauses(clauses.collect())?;
                Node::new(
                    span,
                    NodeKind::If {
                        test: Box::new(test),
                        body: Box::new(body),
                        orelse,
                        flags: None,
                    },
                )
            }
            None => self.build_body(clause.body)?,
        };
        Ok(Some(Box::new(node)))
    }

    fn build_except_handler(&mut self, handler: ast::ExceptHandler, is_star: bool) -> Result<ExceptHandler, SstError> {
        let ast::ExceptHandler::ExceptHandler(h) = handler;
        let test = h.type_.map(|t| self.build_expression(*t)).transpose()?;
        let name = h
            .name
            .map(|n| self.bind(n.as_str(), DefUse::LOCAL, n.range.into()));
        let body = self.build_body(h.body)?;
        Ok(ExceptHandler {
            span: h.range.into(),
            test,
            name,
            body,
            is_star,
        })
    }

    fn build_ann_assign(
        &mut self,
        target: AstExpr,
        annotation: AstExpr,
        value: Option<Box<AstExpr>>,
        simple: bool,
    ) -> Result<NodeKind, SstError> {
        let target = match target {
            AstExpr::Name(ast::ExprName { id, range, .. }) if simple => {
                let frame = self.current();
                let name = self.mangle(id.as_str()).into_owned();
                if let Some(symbol) = self.table[frame.id].symbol(&name) {
                    let declared = if symbol.flags.contains(DefUse::GLOBAL) {
                        Some("global")
                    } else if symbol.flags.contains(DefUse::NONLOCAL) {
                        Some("nonlocal")
                    } else {
                        None
                    };
                    if let Some(declared) = declared {
                        return Err(SstError::syntax(
                            ErrorCategory::ConflictingDeclaration,
                            format!("annotated name '{name}' can't be {declared}"),
                            range.into(),
                        ));
                    }
                }
                self.table
                    .note(frame.id, &name, DefUse::LOCAL | DefUse::ANNOTATED, range.into());
                Node::new(range.into(), NodeKind::Name(name))
            }
            other => self.build_target(other, DefUse::LOCAL)?,
        };
        Ok(NodeKind::AnnAssign {
            target: Box::new(target),
            annotation: Box::new(self.build_expression(annotation)?),
            value: self.build_optional(value)?,
        })
    }

    fn build_function_def(&mut self, function: ast::StmtFunctionDef) -> Result<NodeKind, SstError> {
        let span = Span::from(function.range);
        if function.type_params.is_some() {
            return Err(SstError::unsupported("type parameter lists", span));
        }
        let decorators = function
            .decorator_list
            .into_iter()
            .map(|d| self.build_expression(d.expression))
            .collect::<Result<Vec<_>, _>>()?;
        let params = self.build_parameters(Some(function.parameters))?;
        let returns = function.returns.map(|r| self.build_expression(*r)).transpose()?;
        let name = self.bind(function.name.as_str(), DefUse::LOCAL, function.name.range.into());

        let scope = self.enter_scope(FrameKind::Function, function.name.as_str(), span);
        self.table.set_params(scope, params.slots().map(|a| (a.name.as_str(), a.span)));
        let saved_loops = std::mem::take(&mut self.loops);
        let body = self.build_body(function.body);
        self.loops = saved_loops;
        self.exit_scope();

        Ok(NodeKind::FunctionDef(Box::new(FunctionDef {
            name,
            scope,
            params,
            returns,
            decorators,
            body: body?,
            is_async: function.is_async,
            generator: None,
        })))
    }

    fn build_class_def(&mut self, class: ast::StmtClassDef) -> Result<NodeKind, SstError> {
        let span = Span::from(class.range);
        if class.type_params.is_some() {
            return Err(SstError::unsupported("type parameter lists", span));
        }
        let decorators = class
            .decorator_list
            .into_iter()
            .map(|d| self.build_expression(d.expression))
            .collect::<Result<Vec<_>, _>>()?;
        let (bases, keywords) = match class.arguments {
            Some(arguments) => {
                let ast::Arguments { args, keywords, .. } = *arguments;
                let bases = args
                    .into_vec()
                    .into_iter()
                    .map(|a| self.build_expression(a))
                    .collect::<Result<Vec<_>, _>>()?;
                (bases, self.build_keywords(keywords.into_vec())?)
            }
            None => (Vec::new(), Vec::new()),
        };
        let name = self.bind(class.name.as_str(), DefUse::LOCAL, class.name.range.into());

        let scope = self.enter_scope(FrameKind::Class, class.name.as_str(), span);
        self.class_stack.push(class.name.as_str().to_owned());
        let saved_loops = std::mem::take(&mut self.loops);
        let body = self.build_body(class.body);
        self.loops = saved_loops;
        self.class_stack.pop();
        self.exit_scope();

        Ok(NodeKind::ClassDef(Box::new(ClassDef {
            name,
            scope,
            bases,
            keywords,
            decorators,
            body: body?,
        })))
    }

    /// Builds a parameter list. Defaults and annotations belong to the enclosing scope, so this
    /// runs before the function's own scope is entered.
    fn build_parameters(&mut self, parameters: Option<Box<ast::Parameters>>) -> Result<ArgDefs, SstError> {
        let mut builder = ArgDefListBuilder::new();
        let Some(parameters) = parameters else {
            return builder.finish();
        };
        let ast::Parameters {
            posonlyargs,
            args,
            vararg,
            kwonlyargs,
            kwarg,
            range,
            ..
        } = *parameters;
        let has_posonly = !posonlyargs.is_empty();
        for param in posonlyargs {
            builder.add_param(self.build_param_with_default(param)?)?;
        }
        if has_posonly {
            builder.mark_positional_only(range.into())?;
        }
        for param in args {
            builder.add_param(self.build_param_with_default(param)?)?;
        }
        match vararg {
            Some(param) => builder.add_splat(Some(self.build_param(*param)?))?,
            None if !kwonlyargs.is_empty() => builder.add_splat(None)?,
            None => {}
        }
        for param in kwonlyargs {
            builder.add_param(self.build_param_with_default(param)?)?;
        }
        if let Some(param) = kwarg {
            builder.add_kw_splat(self.build_param(*param)?)?;
        }
        builder.finish()
    }

    fn build_param(&mut self, param: ast::Parameter) -> Result<ArgDef, SstError> {
        let name = self.mangle(param.name.as_str()).into_owned();
        let mut arg = ArgDef::new(name, param.name.range.into());
        if let Some(annotation) = param.annotation {
            arg = arg.with_annotation(self.build_expression(*annotation)?);
        }
        Ok(arg)
    }

    fn build_param_with_default(&mut self, param: ParameterWithDefault) -> Result<ArgDef, SstError> {
        let mut arg = self.build_param(param.parameter)?;
        if let Some(default) = param.default {
            arg = arg.with_default(self.build_expression(*default)?);
        }
        Ok(arg)
    }

    // ------------------------------------------------------------------
    // targets
    // ------------------------------------------------------------------

    /// Builds an assignment, `del`, loop or `with` target, binding each leaf name with `flags`.
    fn build_target(&mut self, target: AstExpr, flags: DefUse) -> Result<Node, SstError> {
        self.decr_depth_remaining(|| target.range())?;
        let result = self.build_target_impl(target, flags);
        self.depth_remaining += 1;
        result
    }

    fn build_target_impl(&mut self, target: AstExpr, flags: DefUse) -> Result<Node, SstError> {
        let span = Span::from(target.range());
        match target {
            AstExpr::Name(ast::ExprName { id, .. }) => {
                let name = self.bind(id.as_str(), flags, span);
                Ok(Node::name(span, name))
            }
            AstExpr::Attribute(_) | AstExpr::Subscript(_) => self.build_expression(target),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => self.build_destructure(CollectionKind::Tuple, elts, flags, span),
            AstExpr::List(ast::ExprList { elts, .. }) => self.build_destructure(CollectionKind::List, elts, flags, span),
            AstExpr::Starred(ast::ExprStarred { value, .. }) => {
                let inner = self.build_target(*value, flags)?;
                if matches!(inner.kind, NodeKind::Starred(_)) {
                    return Err(SstError::invalid_syntax("starred assignment target must be in a list or tuple", span));
                }
                Ok(Node::new(span, NodeKind::Starred(Box::new(inner))))
            }
            other => Err(SstError::invalid_syntax(
                format!("cannot assign to {}", expression_description(&other)),
                span,
            )),
        }
    }

    fn build_destructure(
        &mut self,
        kind: CollectionKind,
        elts: Vec<AstExpr>,
        flags: DefUse,
        span: Span,
    ) -> Result<Node, SstError> {
        let mut starred = elts.iter().filter(|e| matches!(e, AstExpr::Starred(_)));
        if starred.next().is_some()
            && let Some(second) = starred.next()
        {
            return Err(SstError::syntax(
                ErrorCategory::MultipleStarredTargets,
                "multiple starred expressions in assignment",
                second.range().into(),
            ));
        }
        let elements = elts
            .into_iter()
            .map(|e| self.build_target(e, flags))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Node::new(span, NodeKind::Collection { kind, elements }))
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn build_optional(&mut self, expression: Option<Box<AstExpr>>) -> Result<Option<Box<Node>>, SstError> {
        expression
            .map(|e| self.build_expression(*e).map(Box::new))
            .transpose()
    }

    fn build_expressions(&mut self, expressions: impl IntoIterator<Item = AstExpr>) -> Result<Vec<Node>, SstError> {
        expressions.into_iter().map(|e| self.build_expression(e)).collect()
    }

    fn build_expression(&mut self, expression: AstExpr) -> Result<Node, SstError> {
        self.decr_depth_remaining(|| expression.range())?;
        let result = self.build_expression_impl(expression);
        self.depth_remaining += 1;
        result
    }

    fn build_expression_impl(&mut self, expression: AstExpr) -> Result<Node, SstError> {
        let span = Span::from(expression.range());
        let kind = match expression {
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => NodeKind::BoolOp {
                op: match op {
                    BoolOp::And => BoolOperator::And,
                    BoolOp::Or => BoolOperator::Or,
                },
                values: self.build_expressions(values)?,
            },
            AstExpr::Named(ast::ExprNamed { target, value, .. }) => {
                let value = self.build_expression(*value)?;
                let AstExpr::Name(ast::ExprName { id, range, .. }) = *target else {
                    return Err(SstError::invalid_syntax(
                        "assignment expression target must be a name",
                        target.range().into(),
                    ));
                };
                let target = self.bind_named_target(id.as_str(), range.into())?;
                NodeKind::Named {
                    target,
                    value: Box::new(value),
                }
            }
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => NodeKind::BinOp {
                left: Box::new(self.build_expression(*left)?),
                op: convert_op(op),
                right: Box::new(self.build_expression(*right)?),
            },
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => NodeKind::Unary {
                op: match op {
                    UnaryOp::Not => UnaryOperator::Not,
                    UnaryOp::USub => UnaryOperator::Neg,
                    UnaryOp::UAdd => UnaryOperator::Pos,
                    UnaryOp::Invert => UnaryOperator::Invert,
                },
                operand: Box::new(self.build_expression(*operand)?),
            },
            AstExpr::Lambda(ast::ExprLambda { parameters, body, .. }) => {
                let params = self.build_parameters(parameters)?;
                let scope = self.enter_scope(FrameKind::Lambda, "<lambda>", span);
                self.table.set_params(scope, params.slots().map(|a| (a.name.as_str(), a.span)));
                let body = self.build_expression(*body);
                self.exit_scope();
                NodeKind::Lambda(Box::new(Lambda {
                    scope,
                    params,
                    body: body?,
                    generator: None,
                }))
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => NodeKind::Ternary {
                test: Box::new(self.build_expression(*test)?),
                body: Box::new(self.build_expression(*body)?),
                orelse: Box::new(self.build_expression(*orelse)?),
            },
            AstExpr::Dict(ast::ExprDict { items, .. }) => NodeKind::Dict {
                entries: items
                    .into_iter()
                    .map(|ast::DictItem { key, value }| {
                        Ok(DictEntry {
                            key: key.map(|k| self.build_expression(k)).transpose()?,
                            value: self.build_expression(value)?,
                        })
                    })
                    .collect::<Result<Vec<_>, SstError>>()?,
            },
            AstExpr::Set(ast::ExprSet { elts, .. }) => NodeKind::Collection {
                kind: CollectionKind::Set,
                elements: self.build_expressions(elts)?,
            },
            AstExpr::List(ast::ExprList { elts, .. }) => NodeKind::Collection {
                kind: CollectionKind::List,
                elements: self.build_expressions(elts)?,
            },
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => NodeKind::Collection {
                kind: CollectionKind::Tuple,
                elements: self.build_expressions(elts)?,
            },
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. }) => {
                self.build_comprehension(ComprehensionKind::List, *elt, None, generators, span)?
            }
            AstExpr::SetComp(ast::ExprSetComp { elt, generators, .. }) => {
                self.build_comprehension(ComprehensionKind::Set, *elt, None, generators, span)?
            }
            AstExpr::DictComp(ast::ExprDictComp {
                key, value, generators, ..
            }) => self.build_comprehension(ComprehensionKind::Dict, *key, Some(*value), generators, span)?,
            AstExpr::Generator(ast::ExprGenerator { elt, generators, .. }) => {
                self.build_comprehension(ComprehensionKind::Generator, *elt, None, generators, span)?
            }
            AstExpr::Await(ast::ExprAwait { value, .. }) => NodeKind::Await(Box::new(self.build_expression(*value)?)),
            AstExpr::Yield(ast::ExprYield { value, .. }) => {
                self.check_yield(span)?;
                NodeKind::Yield {
                    value: self.build_optional(value)?,
                    is_from: false,
                    flag: None,
                }
            }
            AstExpr::YieldFrom(ast::ExprYieldFrom { value, .. }) => {
                self.check_yield(span)?;
                NodeKind::Yield {
                    value: Some(Box::new(self.build_expression(*value)?)),
                    is_from: true,
                    flag: None,
                }
            }
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => NodeKind::Compare {
                left: Box::new(self.build_expression(*left)?),
                ops: ops.iter().map(|op| convert_compare_op(*op)).collect(),
                comparators: self.build_expressions(comparators.into_vec())?,
            },
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                let func = self.build_expression(*func)?;
                let ast::Arguments { args, keywords, .. } = arguments;
                NodeKind::Call {
                    func: Box::new(func),
                    args: self.build_expressions(args.into_vec())?,
                    keywords: self.build_keywords(keywords.into_vec())?,
                }
            }
            AstExpr::FString(ast::ExprFString { value, .. }) => self.build_fstring(&value)?,
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => NodeKind::Str(value.to_string()),
            AstExpr::BytesLiteral(ast::ExprBytesLiteral { value, .. }) => {
                let bytes: Cow<'_, [u8]> = Cow::from(&value);
                NodeKind::Bytes(bytes.into_owned())
            }
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => match value {
                Number::Int(i) => match i.as_i64() {
                    Some(i) => NodeKind::Int(i),
                    None => {
                        let big = parse_int_literal(&i.to_string())
                            .ok_or_else(|| SstError::invalid_syntax(format!("invalid integer literal: {i}"), span))?;
                        // keep the small form whenever the value fits
                        match big.to_i64() {
                            Some(small) => NodeKind::Int(small),
                            None => NodeKind::BigInt(big),
                        }
                    }
                },
                Number::Float(f) => NodeKind::Float(f),
                Number::Complex { imag, .. } => NodeKind::Imaginary(imag),
            },
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => NodeKind::Bool(value),
            AstExpr::NoneLiteral(_) => NodeKind::Simple(SimpleKind::None),
            AstExpr::EllipsisLiteral(_) => NodeKind::Simple(SimpleKind::Ellipsis),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => NodeKind::Attribute {
                value: Box::new(self.build_expression(*value)?),
                attr: self.mangle(attr.as_str()).into_owned(),
            },
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => NodeKind::Subscript {
                value: Box::new(self.build_expression(*value)?),
                index: Box::new(self.build_expression(*slice)?),
            },
            AstExpr::Starred(ast::ExprStarred { value, .. }) => NodeKind::Starred(Box::new(self.build_expression(*value)?)),
            AstExpr::Name(ast::ExprName { id, .. }) => NodeKind::Name(self.use_name(id.as_str(), span)),
            AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => NodeKind::Slice {
                lower: self.build_optional(lower)?,
                upper: self.build_optional(upper)?,
                step: self.build_optional(step)?,
            },
            AstExpr::TString(_) => return Err(SstError::unsupported("template strings", span)),
            AstExpr::IpyEscapeCommand(_) => return Err(SstError::unsupported("IPython escape commands", span)),
        };
        Ok(Node::new(span, kind))
    }

    fn build_keywords(&mut self, keywords: Vec<ast::Keyword>) -> Result<Vec<Keyword>, SstError> {
        keywords
            .into_iter()
            .map(|kw| {
                Ok(Keyword {
                    name: kw.arg.map(|a| a.as_str().to_owned()),
                    value: self.build_expression(kw.value)?,
                })
            })
            .collect()
    }

    /// Rejects `yield` outside a function body and marks the enclosing function a generator.
    fn check_yield(&mut self, span: Span) -> Result<(), SstError> {
        let frame = self.current();
        match frame.kind {
            FrameKind::Module | FrameKind::Class => Err(SstError::invalid_syntax("'yield' outside function", span)),
            FrameKind::Comprehension(kind) => {
                let what = match kind {
                    ComprehensionKind::List => "list comprehension",
                    ComprehensionKind::Set => "set comprehension",
                    ComprehensionKind::Dict => "dict comprehension",
                    ComprehensionKind::Generator => "generator expression",
                };
                Err(SstError::invalid_syntax(format!("'yield' inside {what}"), span))
            }
            FrameKind::Function | FrameKind::Lambda => {
                self.table.mark_generator(frame.id);
                Ok(())
            }
        }
    }

    /// Binds the target of `:=`. Inside comprehensions the binding belongs to the nearest
    /// enclosing scope that is not a comprehension.
    fn bind_named_target(&mut self, name: &str, span: Span) -> Result<String, SstError> {
        let frame = self.current();
        if !matches!(frame.kind, FrameKind::Comprehension(_)) {
            return Ok(self.bind(name, DefUse::LOCAL, span));
        }
        let name = self.mangle(name).into_owned();
        let mut between = Vec::new();
        let mut target = ScopeId::MODULE;
        for frame in self.frames.iter().rev() {
            if matches!(frame.kind, FrameKind::Comprehension(_)) {
                between.push(frame.id);
            } else {
                target = frame.id;
                break;
            }
        }
        self.table.bind_comprehension_target(&between, target, &name, span)?;
        Ok(name)
    }

    fn build_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: AstExpr,
        value: Option<AstExpr>,
        generators: Vec<ast::Comprehension>,
        span: Span,
    ) -> Result<NodeKind, SstError> {
        let mut generators = generators.into_iter();
        let Some(first) = generators.next() else {
            return Err(SstError::invalid_syntax("comprehension without a for clause", span));
        };
        // the outermost iterable is evaluated in the enclosing scope
        let first_iter = self.build_expression(first.iter)?;

        let scope = self.enter_scope(FrameKind::Comprehension(kind), kind.scope_name(), span);
        self.table.set_params(scope, [(".0", Span::NONE)]);
        let result = self.build_comprehension_body(first, first_iter, generators, element, value);
        self.exit_scope();
        let (element, value, generators) = result?;

        Ok(NodeKind::Comprehension(Box::new(Comprehension {
            kind,
            scope,
            element,
            value,
            generators,
            yield_flag: None,
            generator: None,
        })))
    }

    fn build_comprehension_body(
        &mut self,
        first: ast::Comprehension,
        first_iter: Node,
        rest: impl Iterator<Item = ast::Comprehension>,
        element: AstExpr,
        value: Option<AstExpr>,
    ) -> Result<(Node, Option<Node>, Vec<ComprehensionFor>), SstError> {
        let mut generators = vec![ComprehensionFor {
            target: self.build_target(first.target, DefUse::LOCAL)?,
            iter: first_iter,
            conditions: self.build_expressions(first.ifs)?,
            is_async: first.is_async,
            flag: None,
            condition_flags: None,
        }];
        for comp in rest {
            let iter = self.build_expression(comp.iter)?;
            generators.push(ComprehensionFor {
                target: self.build_target(comp.target, DefUse::LOCAL)?,
                iter,
                conditions: self.build_expressions(comp.ifs)?,
                is_async: comp.is_async,
                flag: None,
                condition_flags: None,
            });
        }
        let element = self.build_expression(element)?;
        let value = value.map(|v| self.build_expression(v)).transpose()?;
        Ok((element, value, generators))
    }

    fn build_fstring(&mut self, value: &ast::FStringValue) -> Result<NodeKind, SstError> {
        let mut parts = Vec::new();
        for fstring_part in value {
            match fstring_part {
                ast::FStringPart::Literal(lit) => push_literal(&mut parts, &lit.value),
                ast::FStringPart::FString(fstring) => {
                    for element in &fstring.elements {
                        self.build_fstring_element(element, &mut parts)?;
                    }
                }
            }
        }
        match parts.as_slice() {
            [] => Ok(NodeKind::Str(String::new())),
            [FStringPart::Literal(s)] => Ok(NodeKind::Str(s.clone())),
            _ => Ok(NodeKind::FString(parts)),
        }
    }

    fn build_fstring_element(
        &mut self,
        element: &InterpolatedStringElement,
        parts: &mut Vec<FStringPart>,
    ) -> Result<(), SstError> {
        match element {
            InterpolatedStringElement::Literal(lit) => push_literal(parts, &lit.value),
            InterpolatedStringElement::Interpolation(interp) => {
                let value = Box::new(self.build_expression((*interp.expression).clone())?);
                let format_spec = match &interp.format_spec {
                    Some(spec) => {
                        self.decr_depth_remaining(|| spec.range)?;
                        let mut spec_parts = Vec::new();
                        let result = spec
                            .elements
                            .iter()
                            .try_for_each(|e| self.build_fstring_element(e, &mut spec_parts));
                        self.depth_remaining += 1;
                        result?;
                        Some(spec_parts)
                    }
                    None => None,
                };
                let debug_text = interp.debug_text.as_ref().map(|dt| {
                    let expr_text = &self.code[interp.expression.range()];
                    format!("{}{expr_text}{}", dt.leading, dt.trailing)
                });
                parts.push(FStringPart::Interpolation {
                    value,
                    conversion: convert_conversion_flag(interp.conversion),
                    format_spec,
                    debug_text,
                });
            }
        }
        Ok(())
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(prev)) = parts.last_mut() {
        prev.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_owned()));
    }
}

/// Short description of an expression for "cannot assign to" messages.
fn expression_description(expr: &AstExpr) -> &'static str {
    match expr {
        AstExpr::Call(_) => "function call",
        AstExpr::BoolOp(_) | AstExpr::BinOp(_) | AstExpr::UnaryOp(_) => "expression",
        AstExpr::Compare(_) => "comparison",
        AstExpr::Lambda(_) => "lambda",
        AstExpr::If(_) => "conditional expression",
        AstExpr::Named(_) => "named expression",
        AstExpr::Await(_) => "await expression",
        AstExpr::Yield(_) | AstExpr::YieldFrom(_) => "yield expression",
        AstExpr::ListComp(_) => "list comprehension",
        AstExpr::SetComp(_) => "set comprehension",
        AstExpr::DictComp(_) => "dict comprehension",
        AstExpr::Generator(_) => "generator expression",
        AstExpr::Dict(_) => "dict literal",
        AstExpr::Set(_) => "set display",
        AstExpr::FString(_) | AstExpr::TString(_) => "f-string expression",
        AstExpr::StringLiteral(_)
        | AstExpr::BytesLiteral(_)
        | AstExpr::NumberLiteral(_)
        | AstExpr::BooleanLiteral(_)
        | AstExpr::NoneLiteral(_)
        | AstExpr::EllipsisLiteral(_) => "literal",
        _ => "expression",
    }
}

fn convert_op(op: AstOperator) -> BinaryOperator {
    match op {
        AstOperator::Add => BinaryOperator::Add,
        AstOperator::Sub => BinaryOperator::Sub,
        AstOperator::Mult => BinaryOperator::Mult,
        AstOperator::MatMult => BinaryOperator::MatMult,
        AstOperator::Div => BinaryOperator::Div,
        AstOperator::Mod => BinaryOperator::Mod,
        AstOperator::Pow => BinaryOperator::Pow,
        AstOperator::LShift => BinaryOperator::LShift,
        AstOperator::RShift => BinaryOperator::RShift,
        AstOperator::BitOr => BinaryOperator::BitOr,
        AstOperator::BitXor => BinaryOperator::BitXor,
        AstOperator::BitAnd => BinaryOperator::BitAnd,
        AstOperator::FloorDiv => BinaryOperator::FloorDiv,
    }
}

fn convert_compare_op(op: CmpOp) -> CmpOperator {
    match op {
        CmpOp::Eq => CmpOperator::Eq,
        CmpOp::NotEq => CmpOperator::NotEq,
        CmpOp::Lt => CmpOperator::Lt,
        CmpOp::LtE => CmpOperator::LtE,
        CmpOp::Gt => CmpOperator::Gt,
        CmpOp::GtE => CmpOperator::GtE,
        CmpOp::Is => CmpOperator::Is,
        CmpOp::IsNot => CmpOperator::IsNot,
        CmpOp::In => CmpOperator::In,
        CmpOp::NotIn => CmpOperator::NotIn,
    }
}

fn convert_conversion_flag(flag: RuffConversionFlag) -> Conversion {
    match flag {
        RuffConversionFlag::None => Conversion::None,
        RuffConversionFlag::Str => Conversion::Str,
        RuffConversionFlag::Repr => Conversion::Repr,
        RuffConversionFlag::Ascii => Conversion::Ascii,
    }
}

/// Returns true if the identifier should be name-mangled in a class body: it starts with `__`
/// and does not end with `__`.
fn is_mangling_candidate(name: &str) -> bool {
    name.starts_with("__") && !name.ends_with("__")
}

/// Parses an integer literal into a `BigInt`, handling radix prefixes and underscores.
fn parse_int_literal(s: &str) -> Option<BigInt> {
    let cleaned: String = s.chars().filter(|c| *c != '_').collect();
    if let Some(prefix) = cleaned.get(..2) {
        let digits = cleaned.get(2..).unwrap_or_default();
        match prefix.to_ascii_lowercase().as_str() {
            "0x" => return BigInt::parse_bytes(digits.as_bytes(), 16),
            "0o" => return BigInt::parse_bytes(digits.as_bytes(), 8),
            "0b" => return BigInt::parse_bytes(digits.as_bytes(), 2),
            _ => {}
        }
    }
    cleaned.parse::<BigInt>().ok()
}
