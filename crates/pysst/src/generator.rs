//! Progress-flag annotation of generator bodies.
//!
//! A generator is resumed by walking its body again from the top. Every construct on the path to a
//! suspend point carries one or two [`FlagId`]s; a backend keeps the flag values in the generator
//! frame and uses them on the next walk to skip completed statements, re-enter the branch, loop
//! iteration, `try` region or `with` block it left, and continue right after the `yield` that
//! suspended. Operands evaluated before a later suspend point are wrapped in [`NodeKind::Spill`]
//! so their values are replayed rather than recomputed.
//!
//! Generator expressions are generators too: each `for` clause gets a loop flag, each clause with
//! conditions gets a pair of branch flags and the element gets the flag of its implicit `yield`.
//!
//! Flags are allocated in post-order, children before parents, so siblings get increasing indices
//! in source order. Nodes that already carry flags keep them and a function that already carries
//! [`GeneratorInfo`] continues numbering from it, which makes the pass idempotent.

use crate::{
    error::SstError,
    scope::{ScopeId, ScopeKind, ScopeTable},
    span::Span,
    sst::{
        BranchFlags, Comprehension, FStringPart, FlagId, FunctionDef, GeneratorInfo, Lambda, Module, Node, NodeKind,
        SimpleKind, TryFlags,
    },
    tracer::{FlagSite, NoopTracer, SstTracer},
};

/// Transforms every generator function, lambda and generator expression in `module`.
pub fn transform_module(module: &mut Module) -> Result<(), SstError> {
    transform_module_with(module, &mut NoopTracer)
}

/// Like [`transform_module`], reporting each allocated flag and spill slot to `tracer`.
pub fn transform_module_with(module: &mut Module, tracer: &mut impl SstTracer) -> Result<(), SstError> {
    let mut transformer = Transformer {
        scopes: &module.scopes,
        tracer,
    };
    let mut frame = Frame::plain(ScopeId::MODULE);
    transformer.node(&mut module.body, &mut frame)?;
    Ok(())
}

/// Transforms a single function definition whose body belongs to `scopes`.
///
/// Does nothing to the function itself unless its scope is a generator, but nested generators are
/// transformed either way.
pub fn transform_function(
    function: &mut FunctionDef,
    scopes: &ScopeTable,
    tracer: &mut impl SstTracer,
) -> Result<(), SstError> {
    let mut transformer = Transformer { scopes, tracer };
    transformer.function_body(function.scope, &mut function.body, &mut function.generator)
}

/// Flag bookkeeping for the scope whose body is being walked.
#[derive(Debug)]
struct Frame {
    scope: ScopeId,
    /// Whether suspend points are allowed here.
    generator: bool,
    info: GeneratorInfo,
}

impl Frame {
    fn plain(scope: ScopeId) -> Self {
        Self {
            scope,
            generator: false,
            info: GeneratorInfo::default(),
        }
    }
}

struct Transformer<'a, T: SstTracer> {
    scopes: &'a ScopeTable,
    tracer: &'a mut T,
}

impl<T: SstTracer> Transformer<'_, T> {
    fn alloc_flag(&mut self, frame: &mut Frame, site: FlagSite) -> FlagId {
        let flag = FlagId::new(frame.info.flag_count);
        frame.info.flag_count += 1;
        self.tracer.on_flag(frame.scope, flag, site);
        flag
    }

    fn ensure_flag(&mut self, slot: &mut Option<FlagId>, frame: &mut Frame, site: FlagSite) {
        if slot.is_none() {
            *slot = Some(self.alloc_flag(frame, site));
        }
    }

    /// Replaces `node` with a spill of itself unless it is a constant or already spilled.
    ///
    /// For `*value` the value is spilled and the star stays in place.
    fn spill(&mut self, node: &mut Node, frame: &mut Frame) {
        if let NodeKind::Starred(inner) = &mut node.kind {
            self.spill(inner, frame);
            return;
        }
        if node.is_constant() || matches!(node.kind, NodeKind::Spill { .. }) {
            return;
        }
        let slot = frame.info.spill_count;
        frame.info.spill_count += 1;
        self.tracer.on_spill(frame.scope, slot);
        let value = std::mem::replace(node, Node::simple(Span::NONE, SimpleKind::None));
        *node = Node::new(
            value.span,
            NodeKind::Spill {
                slot,
                value: Box::new(value),
            },
        );
    }

    /// Walks the body of a function or lambda scope, recording [`GeneratorInfo`] if it is a
    /// generator.
    fn function_body(
        &mut self,
        scope: ScopeId,
        body: &mut Node,
        info: &mut Option<GeneratorInfo>,
    ) -> Result<(), SstError> {
        let kind = self.scope_kind(scope, body.span)?;
        let mut frame = Frame {
            scope,
            generator: kind == ScopeKind::Generator,
            info: info.unwrap_or_default(),
        };
        self.node(body, &mut frame)?;
        if frame.generator {
            *info = Some(frame.info);
        }
        Ok(())
    }

    fn scope_kind(&self, scope: ScopeId, span: Span) -> Result<ScopeKind, SstError> {
        self.scopes
            .get(scope)
            .map(crate::scope::Scope::kind)
            .ok_or_else(|| SstError::invariant(format!("scope {scope} is not in the scope table"), span))
    }

    /// Walks operands evaluated left to right and spills every one that precedes a later
    /// suspending operand. Returns whether any operand can suspend.
    fn operands(&mut self, mut operands: Vec<&mut Node>, frame: &mut Frame) -> Result<bool, SstError> {
        let mut last_bearing = None;
        for (i, operand) in operands.iter_mut().enumerate() {
            if self.node(operand, frame)? {
                last_bearing = Some(i);
            }
        }
        let Some(last) = last_bearing else {
            return Ok(false);
        };
        for operand in operands.into_iter().take(last) {
            self.spill(operand, frame);
        }
        Ok(true)
    }

    fn optional(&mut self, node: Option<&mut Node>, frame: &mut Frame) -> Result<bool, SstError> {
        match node {
            Some(node) => self.node(node, frame),
            None => Ok(false),
        }
    }

    /// Walks an assignment target. Names are never spilled; only the sub-expressions of attribute
    /// and subscript targets are evaluated.
    fn target(&mut self, target: &mut Node, frame: &mut Frame) -> Result<bool, SstError> {
        if !matches!(
            target.kind,
            NodeKind::Name(_)
                | NodeKind::Attribute { .. }
                | NodeKind::Subscript { .. }
                | NodeKind::Starred(_)
                | NodeKind::Collection { .. }
        ) {
            return self.node(target, frame);
        }
        match &mut target.kind {
            NodeKind::Name(_) => Ok(false),
            NodeKind::Attribute { value, .. } => self.node(value, frame),
            NodeKind::Subscript { value, index } => self.operands(vec![&mut **value, &mut **index], frame),
            NodeKind::Starred(inner) => self.target(inner, frame),
            NodeKind::Collection { elements, .. } => {
                let mut bearing = false;
                for element in elements {
                    bearing |= self.target(element, frame)?;
                }
                Ok(bearing)
            }
            _ => Ok(false),
        }
    }

    /// Spills the evaluated parts of a target that run before a suspending value.
    fn spill_target_operands(&mut self, target: &mut Node, frame: &mut Frame) {
        match &mut target.kind {
            NodeKind::Attribute { value, .. } => self.spill(value, frame),
            NodeKind::Subscript { value, index } => {
                self.spill(value, frame);
                self.spill(index, frame);
            }
            _ => {}
        }
    }

    /// Walks `node` and returns whether it contains a suspend point of the current frame.
    fn node(&mut self, node: &mut Node, frame: &mut Frame) -> Result<bool, SstError> {
        let span = node.span;
        match &mut node.kind {
            NodeKind::Block { body, flag } => {
                let mut bearing = false;
                for statement in body.iter_mut() {
                    bearing |= self.node(statement, frame)?;
                }
                if bearing && body.len() > 1 {
                    self.ensure_flag(flag, frame, FlagSite::Block);
                }
                Ok(bearing)
            }
            NodeKind::Expr(value) | NodeKind::Await(value) | NodeKind::Starred(value) => self.node(value, frame),
            NodeKind::Unary { operand, .. } => self.node(operand, frame),
            NodeKind::Named { value, .. } => self.node(value, frame),
            NodeKind::Spill { value, .. } => self.node(value, frame),
            NodeKind::Assign { targets, value } => {
                let mut bearing = self.node(value, frame)?;
                let mut targets_bearing = false;
                for target in targets.iter_mut() {
                    targets_bearing |= self.target(target, frame)?;
                }
                if targets_bearing {
                    self.spill(value, frame);
                    bearing = true;
                }
                Ok(bearing)
            }
            NodeKind::AugAssign { target, value, .. } => {
                let target_bearing = self.target(target, frame)?;
                let value_bearing = self.node(value, frame)?;
                if value_bearing {
                    self.spill_target_operands(target, frame);
                }
                Ok(target_bearing || value_bearing)
            }
            NodeKind::AnnAssign { target, value, .. } => {
                let value_bearing = self.optional(value.as_deref_mut(), frame)?;
                let target_bearing = self.target(target, frame)?;
                Ok(value_bearing || target_bearing)
            }
            NodeKind::Del { targets } => {
                let mut bearing = false;
                for target in targets {
                    bearing |= self.target(target, frame)?;
                }
                Ok(bearing)
            }
            NodeKind::Return { value } => self.optional(value.as_deref_mut(), frame),
            NodeKind::Raise { exc, cause } => {
                let operands = exc.iter_mut().chain(cause.iter_mut()).map(|n| &mut **n).collect();
                self.operands(operands, frame)
            }
            NodeKind::Assert { test, msg } => {
                let mut operands = vec![&mut **test];
                operands.extend(msg.as_deref_mut());
                self.operands(operands, frame)
            }
            NodeKind::Import { .. }
            | NodeKind::ImportFrom { .. }
            | NodeKind::Global { .. }
            | NodeKind::Nonlocal { .. }
            | NodeKind::Simple(_)
            | NodeKind::Name(_)
            | NodeKind::Int(_)
            | NodeKind::BigInt(_)
            | NodeKind::Float(_)
            | NodeKind::Imaginary(_)
            | NodeKind::Str(_)
            | NodeKind::Bytes(_)
            | NodeKind::Bool(_) => Ok(false),
            NodeKind::If {
                test,
                body,
                orelse,
                flags,
            } => {
                let mut bearing = self.node(test, frame)?;
                bearing |= self.node(body, frame)?;
                bearing |= self.optional(orelse.as_deref_mut(), frame)?;
                if bearing && flags.is_none() {
                    let taken = self.alloc_flag(frame, FlagSite::If);
                    let done = self.alloc_flag(frame, FlagSite::If);
                    *flags = Some(BranchFlags { taken, done });
                }
                Ok(bearing)
            }
            NodeKind::While {
                test,
                body,
                orelse,
                flag,
                ..
            } => {
                let mut bearing = self.node(test, frame)?;
                bearing |= self.node(body, frame)?;
                bearing |= self.optional(orelse.as_deref_mut(), frame)?;
                if bearing {
                    self.ensure_flag(flag, frame, FlagSite::Loop);
                }
                Ok(bearing)
            }
            NodeKind::For {
                target,
                iter,
                body,
                orelse,
                flag,
                ..
            } => {
                let mut bearing = self.node(iter, frame)?;
                bearing |= self.target(target, frame)?;
                bearing |= self.node(body, frame)?;
                bearing |= self.optional(orelse.as_deref_mut(), frame)?;
                if bearing {
                    self.ensure_flag(flag, frame, FlagSite::Loop);
                }
                Ok(bearing)
            }
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finally,
                flags,
            } => {
                let mut bearing = self.node(body, frame)?;
                for handler in handlers.iter_mut() {
                    bearing |= self.optional(handler.test.as_mut(), frame)?;
                    bearing |= self.node(&mut handler.body, frame)?;
                }
                bearing |= self.optional(orelse.as_deref_mut(), frame)?;
                bearing |= self.optional(finally.as_deref_mut(), frame)?;
                if bearing && flags.is_none() {
                    let region = self.alloc_flag(frame, FlagSite::Try);
                    let finally = self.alloc_flag(frame, FlagSite::Try);
                    *flags = Some(TryFlags { region, finally });
                }
                Ok(bearing)
            }
            NodeKind::With { items, body, flag, .. } => {
                let mut bearing = false;
                for item in items.iter_mut() {
                    bearing |= self.node(&mut item.context, frame)?;
                    if let Some(target) = &mut item.target {
                        bearing |= self.target(target, frame)?;
                    }
                }
                bearing |= self.node(body, frame)?;
                if bearing {
                    self.ensure_flag(flag, frame, FlagSite::With);
                }
                Ok(bearing)
            }
            NodeKind::FunctionDef(function) => {
                let FunctionDef {
                    scope,
                    params,
                    returns,
                    decorators,
                    body,
                    generator,
                    ..
                } = &mut **function;
                // decorators, then defaults, then annotations
                let mut operands: Vec<&mut Node> = decorators.iter_mut().collect();
                let mut annotations = Vec::new();
                for arg in params.iter_mut() {
                    operands.extend(arg.default.as_mut());
                    annotations.extend(arg.annotation.as_mut());
                }
                operands.extend(annotations);
                operands.extend(returns.as_mut());
                let bearing = self.operands(operands, frame)?;
                self.function_body(*scope, body, generator)?;
                Ok(bearing)
            }
            NodeKind::Lambda(lambda) => {
                let Lambda {
                    scope,
                    params,
                    body,
                    generator,
                } = &mut **lambda;
                let operands = params.iter_mut().filter_map(|arg| arg.default.as_mut()).collect();
                let bearing = self.operands(operands, frame)?;
                self.function_body(*scope, body, generator)?;
                Ok(bearing)
            }
            NodeKind::ClassDef(class) => {
                let mut operands: Vec<&mut Node> = class.decorators.iter_mut().collect();
                operands.extend(class.bases.iter_mut());
                operands.extend(class.keywords.iter_mut().map(|kw| &mut kw.value));
                let bearing = self.operands(operands, frame)?;
                let mut class_frame = Frame::plain(class.scope);
                self.node(&mut class.body, &mut class_frame)?;
                Ok(bearing)
            }
            NodeKind::Comprehension(comprehension) => self.comprehension(comprehension, frame),
            NodeKind::Yield { value, flag, .. } => {
                if !frame.generator {
                    return Err(SstError::invariant(
                        format!("yield in scope {} which is not a generator", frame.scope),
                        span,
                    ));
                }
                self.optional(value.as_deref_mut(), frame)?;
                if flag.is_none() {
                    *flag = Some(self.alloc_flag(frame, FlagSite::Yield));
                    frame.info.yield_count += 1;
                }
                Ok(true)
            }
            NodeKind::BoolOp { values, .. } => self.operands(values.iter_mut().collect(), frame),
            NodeKind::BinOp { left, right, .. } => self.operands(vec![&mut **left, &mut **right], frame),
            NodeKind::Compare { left, comparators, .. } => {
                let mut operands = vec![&mut **left];
                operands.extend(comparators.iter_mut());
                self.operands(operands, frame)
            }
            NodeKind::Ternary { test, body, orelse } => {
                let test_bearing = self.node(test, frame)?;
                let body_bearing = self.node(body, frame)?;
                let orelse_bearing = self.node(orelse, frame)?;
                // the branch is picked again from the replayed test
                if body_bearing || orelse_bearing {
                    self.spill(test, frame);
                }
                Ok(test_bearing || body_bearing || orelse_bearing)
            }
            NodeKind::Call { func, args, keywords } => {
                let mut operands = vec![&mut **func];
                operands.extend(args.iter_mut());
                operands.extend(keywords.iter_mut().map(|kw| &mut kw.value));
                self.operands(operands, frame)
            }
            NodeKind::Attribute { value, .. } => self.node(value, frame),
            NodeKind::Subscript { value, index } => self.operands(vec![&mut **value, &mut **index], frame),
            NodeKind::Slice { lower, upper, step } => {
                let operands = [lower, upper, step]
                    .into_iter()
                    .filter_map(|part| part.as_deref_mut())
                    .collect();
                self.operands(operands, frame)
            }
            NodeKind::Collection { elements, .. } => self.operands(elements.iter_mut().collect(), frame),
            NodeKind::Dict { entries } => {
                let mut operands = Vec::with_capacity(entries.len() * 2);
                for entry in entries.iter_mut() {
                    operands.extend(entry.key.as_mut());
                    operands.push(&mut entry.value);
                }
                self.operands(operands, frame)
            }
            NodeKind::FString(parts) => {
                let mut operands = Vec::new();
                collect_interpolations(parts, &mut operands);
                self.operands(operands, frame)
            }
        }
    }

    fn comprehension(&mut self, comprehension: &mut Comprehension, frame: &mut Frame) -> Result<bool, SstError> {
        let Comprehension {
            scope,
            element,
            value,
            generators,
            yield_flag,
            generator,
            ..
        } = comprehension;
        let Some((first, rest)) = generators.split_first_mut() else {
            return Ok(false);
        };
        // the outermost iterable runs in the enclosing scope, everything else in the comprehension
        let bearing = self.node(&mut first.iter, frame)?;
        let mut inner = Frame {
            scope: *scope,
            generator: false,
            info: generator.unwrap_or_default(),
        };
        self.target(&mut first.target, &mut inner)?;
        for condition in &mut first.conditions {
            self.node(condition, &mut inner)?;
        }
        for clause in rest {
            self.node(&mut clause.iter, &mut inner)?;
            self.target(&mut clause.target, &mut inner)?;
            for condition in &mut clause.conditions {
                self.node(condition, &mut inner)?;
            }
        }
        self.node(element, &mut inner)?;
        self.optional(value.as_mut(), &mut inner)?;

        if self.scope_kind(*scope, element.span)? == ScopeKind::Generator {
            // the element is yielded from inside every clause, so the innermost clause comes first
            if yield_flag.is_none() {
                *yield_flag = Some(self.alloc_flag(&mut inner, FlagSite::Yield));
                inner.info.yield_count += 1;
            }
            for clause in generators.iter_mut().rev() {
                if !clause.conditions.is_empty() && clause.condition_flags.is_none() {
                    let taken = self.alloc_flag(&mut inner, FlagSite::If);
                    let done = self.alloc_flag(&mut inner, FlagSite::If);
                    clause.condition_flags = Some(BranchFlags { taken, done });
                }
                self.ensure_flag(&mut clause.flag, &mut inner, FlagSite::Loop);
            }
            *generator = Some(inner.info);
        }
        Ok(bearing)
    }
}

/// Collects interpolated values in evaluation order, including those nested in format specs.
fn collect_interpolations<'n>(parts: &'n mut [FStringPart], out: &mut Vec<&'n mut Node>) {
    for part in parts {
        if let FStringPart::Interpolation {
            value, format_spec, ..
        } = part
        {
            out.push(&mut **value);
            if let Some(spec) = format_spec {
                collect_interpolations(spec, out);
            }
        }
    }
}
