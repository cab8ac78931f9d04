use ahash::AHashMap;

use super::{FORMAT_VERSION, NodeTag, SPAN_BIAS, SPAN_NONE, SPAN_SAME, STR_BIAS, STR_LATIN1, STR_UTF16};
use crate::{
    args::{ArgDef, ArgDefs, Splat},
    error::SstError,
    scope::ScopeId,
    span::Span,
    sst::{
        Alias, BranchFlags, Comprehension, ExceptHandler, FStringPart, FlagId, FunctionDef, GeneratorInfo, Keyword,
        Module, Node, NodeKind, TryFlags,
    },
};

/// Encodes `module`, returning the bytes and the number of interned strings.
pub(super) fn encode(module: &Module) -> Result<(Vec<u8>, usize), SstError> {
    let blob = postcard::to_allocvec(&module.scopes)
        .map_err(|e| SstError::invariant(format!("scope table could not be encoded: {e}"), Span::NONE))?;
    let mut writer = Writer::new();
    writer.u8(FORMAT_VERSION);
    writer.varint(blob.len() as u64);
    writer.buf.extend_from_slice(&blob);
    writer.node(&module.body);
    let strings = writer.strings.len();
    Ok((writer.buf, strings))
}

/// Appends encoded values to a byte buffer.
struct Writer {
    buf: Vec<u8>,
    /// Interned strings with their table index; 0 is reserved for the null entry.
    strings: AHashMap<String, u64>,
    last_span: Span,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            strings: AHashMap::new(),
            last_span: Span::NONE,
        }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn bool(&mut self, v: bool) {
        self.u8(u8::from(v));
    }

    #[expect(clippy::cast_possible_truncation, reason = "each branch checks the range it narrows to")]
    fn varint(&mut self, v: u64) {
        if v < 0x80 {
            self.buf.push(v as u8);
        } else if v <= 0xFFFF {
            self.buf.push(0x80);
            self.buf.extend_from_slice(&(v as u16).to_be_bytes());
        } else if v <= 0xFF_FFFF {
            self.buf.push(0x81);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
        } else if v <= 0xFFFF_FFFF {
            self.buf.push(0x82);
            self.buf.extend_from_slice(&(v as u32).to_be_bytes());
        } else {
            self.buf.push(0x83);
            self.buf.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn count(&mut self, n: usize) {
        self.varint(n as u64);
    }

    fn span(&mut self, span: Span) {
        match (span.start(), span.end()) {
            (Some(start), Some(end)) if span != self.last_span => {
                self.varint(u64::from(start) + SPAN_BIAS);
                self.varint(u64::from(end - start));
            }
            (Some(_), Some(_)) => self.varint(SPAN_SAME),
            _ => self.varint(SPAN_NONE),
        }
        self.last_span = span;
    }

    fn str(&mut self, s: &str) {
        if let Some(&index) = self.strings.get(s) {
            self.varint(index + STR_BIAS);
            return;
        }
        if s.chars().all(|c| u32::from(c) <= 0xFF) {
            self.varint(STR_LATIN1);
            self.count(s.chars().count());
            self.buf.extend(s.chars().filter_map(|c| u8::try_from(u32::from(c)).ok()));
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            self.varint(STR_UTF16);
            self.count(units.len());
            for unit in units {
                self.buf.extend_from_slice(&unit.to_be_bytes());
            }
        }
        let index = self.strings.len() as u64 + 1;
        self.strings.insert(s.to_owned(), index);
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => self.str(s),
            None => self.varint(STR_BIAS),
        }
    }

    fn strs(&mut self, items: &[String]) {
        self.count(items.len());
        for s in items {
            self.str(s);
        }
    }

    fn tag(&mut self, tag: NodeTag) {
        self.u8(tag as u8);
    }

    fn opt_node(&mut self, node: Option<&Node>) {
        match node {
            Some(node) => self.node(node),
            None => self.tag(NodeTag::Absent),
        }
    }

    fn nodes(&mut self, nodes: &[Node]) {
        self.count(nodes.len());
        for node in nodes {
            self.node(node);
        }
    }

    fn flag(&mut self, flag: FlagId) {
        self.varint(u64::from(flag.index()));
    }

    fn opt_flag(&mut self, flag: Option<FlagId>) {
        match flag {
            Some(flag) => self.varint(u64::from(flag.index()) + 1),
            None => self.varint(0),
        }
    }

    fn branch_flags(&mut self, flags: Option<BranchFlags>) {
        match flags {
            Some(BranchFlags { taken, done }) => {
                self.u8(1);
                self.flag(taken);
                self.flag(done);
            }
            None => self.u8(0),
        }
    }

    fn scope(&mut self, id: ScopeId) {
        self.varint(u64::from(id.raw()));
    }

    fn generator_info(&mut self, info: Option<GeneratorInfo>) {
        match info {
            Some(info) => {
                self.u8(1);
                self.varint(u64::from(info.flag_count));
                self.varint(u64::from(info.spill_count));
                self.varint(u64::from(info.yield_count));
            }
            None => self.u8(0),
        }
    }

    fn arg(&mut self, arg: &ArgDef) {
        self.str(&arg.name);
        self.span(arg.span);
        self.opt_node(arg.annotation.as_ref());
        self.opt_node(arg.default.as_ref());
    }

    fn args(&mut self, args: &ArgDefs) {
        self.count(args.positional.len());
        for arg in &args.positional {
            self.arg(arg);
        }
        self.varint(u64::from(args.positional_only));
        match &args.splat {
            None => self.u8(0),
            Some(Splat::Bare(span)) => {
                self.u8(1);
                self.span(*span);
            }
            Some(Splat::Named(arg)) => {
                self.u8(2);
                self.arg(arg);
            }
        }
        self.count(args.keyword_only.len());
        for arg in &args.keyword_only {
            self.arg(arg);
        }
        match &args.kw_splat {
            Some(arg) => {
                self.u8(1);
                self.arg(arg);
            }
            None => self.u8(0),
        }
    }

    fn keywords(&mut self, keywords: &[Keyword]) {
        self.count(keywords.len());
        for keyword in keywords {
            self.opt_str(keyword.name.as_deref());
            self.node(&keyword.value);
        }
    }

    fn aliases(&mut self, aliases: &[Alias]) {
        self.count(aliases.len());
        for alias in aliases {
            self.str(&alias.name);
            self.opt_str(alias.asname.as_deref());
        }
    }

    fn handler(&mut self, handler: &ExceptHandler) {
        self.span(handler.span);
        self.opt_node(handler.test.as_ref());
        self.opt_str(handler.name.as_deref());
        self.node(&handler.body);
        self.bool(handler.is_star);
    }

    fn fstring_parts(&mut self, parts: &[FStringPart]) {
        self.count(parts.len());
        for part in parts {
            match part {
                FStringPart::Literal(s) => {
                    self.u8(0);
                    self.str(s);
                }
                FStringPart::Interpolation {
                    value,
                    conversion,
                    format_spec,
                    debug_text,
                } => {
                    self.u8(1);
                    self.node(value);
                    self.u8(*conversion as u8);
                    match format_spec {
                        Some(spec) => {
                            self.u8(1);
                            self.fstring_parts(spec);
                        }
                        None => self.u8(0),
                    }
                    self.opt_str(debug_text.as_deref());
                }
            }
        }
    }

    fn function_def(&mut self, function: &FunctionDef) {
        self.str(&function.name);
        self.scope(function.scope);
        self.args(&function.params);
        self.opt_node(function.returns.as_ref());
        self.nodes(&function.decorators);
        self.node(&function.body);
        self.bool(function.is_async);
        self.generator_info(function.generator);
    }

    fn comprehension(&mut self, comprehension: &Comprehension) {
        self.u8(comprehension.kind as u8);
        self.scope(comprehension.scope);
        self.node(&comprehension.element);
        self.opt_node(comprehension.value.as_ref());
        self.count(comprehension.generators.len());
        for generator in &comprehension.generators {
            self.node(&generator.target);
            self.node(&generator.iter);
            self.nodes(&generator.conditions);
            self.bool(generator.is_async);
            self.opt_flag(generator.flag);
            self.branch_flags(generator.condition_flags);
        }
        self.opt_flag(comprehension.yield_flag);
        self.generator_info(comprehension.generator);
    }

    fn node(&mut self, node: &Node) {
        self.tag(node_tag(&node.kind));
        self.span(node.span);
        match &node.kind {
            NodeKind::Block { body, flag } => {
                self.nodes(body);
                self.opt_flag(*flag);
            }
            NodeKind::Expr(value) | NodeKind::Starred(value) | NodeKind::Await(value) => self.node(value),
            NodeKind::Assign { targets, value } => {
                self.nodes(targets);
                self.node(value);
            }
            NodeKind::AugAssign { target, op, value } => {
                self.node(target);
                self.u8(*op as u8);
                self.node(value);
            }
            NodeKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.node(target);
                self.node(annotation);
                self.opt_node(value.as_deref());
            }
            NodeKind::Del { targets } => self.nodes(targets),
            NodeKind::Return { value } => self.opt_node(value.as_deref()),
            NodeKind::Raise { exc, cause } => {
                self.opt_node(exc.as_deref());
                self.opt_node(cause.as_deref());
            }
            NodeKind::Assert { test, msg } => {
                self.node(test);
                self.opt_node(msg.as_deref());
            }
            NodeKind::Import { names } => self.aliases(names),
            NodeKind::ImportFrom { module, level, names } => {
                self.opt_str(module.as_deref());
                self.varint(u64::from(*level));
                self.aliases(names);
            }
            NodeKind::Global { names } | NodeKind::Nonlocal { names } => self.strs(names),
            NodeKind::If {
                test,
                body,
                orelse,
                flags,
            } => {
                self.node(test);
                self.node(body);
                self.opt_node(orelse.as_deref());
                self.branch_flags(*flags);
            }
            NodeKind::While {
                test,
                body,
                orelse,
                contains_break,
                contains_continue,
                flag,
            } => {
                self.node(test);
                self.node(body);
                self.opt_node(orelse.as_deref());
                self.bool(*contains_break);
                self.bool(*contains_continue);
                self.opt_flag(*flag);
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
                self.node(target);
                self.node(iter);
                self.node(body);
                self.opt_node(orelse.as_deref());
                self.bool(*is_async);
                self.bool(*contains_break);
                self.bool(*contains_continue);
                self.opt_flag(*flag);
            }
            NodeKind::Try {
                body,
                handlers,
                orelse,
                finally,
                flags,
            } => {
                self.node(body);
                self.count(handlers.len());
                for handler in handlers {
                    self.handler(handler);
                }
                self.opt_node(orelse.as_deref());
                self.opt_node(finally.as_deref());
                match flags {
                    Some(TryFlags { region, finally }) => {
                        self.u8(1);
                        self.flag(*region);
                        self.flag(*finally);
                    }
                    None => self.u8(0),
                }
            }
            NodeKind::With {
                items,
                body,
                is_async,
                flag,
            } => {
                self.count(items.len());
                for item in items {
                    self.node(&item.context);
                    self.opt_node(item.target.as_ref());
                }
                self.node(body);
                self.bool(*is_async);
                self.opt_flag(*flag);
            }
            NodeKind::FunctionDef(function) => self.function_def(function),
            NodeKind::ClassDef(class) => {
                self.str(&class.name);
                self.scope(class.scope);
                self.nodes(&class.bases);
                self.keywords(&class.keywords);
                self.nodes(&class.decorators);
                self.node(&class.body);
            }
            NodeKind::Simple(kind) => self.u8(*kind as u8),
            NodeKind::BoolOp { op, values } => {
                self.u8(*op as u8);
                self.nodes(values);
            }
            NodeKind::BinOp { left, op, right } => {
                self.node(left);
                self.u8(*op as u8);
                self.node(right);
            }
            NodeKind::Unary { op, operand } => {
                self.u8(*op as u8);
                self.node(operand);
            }
            NodeKind::Compare {
                left,
                ops,
                comparators,
            } => {
                self.node(left);
                self.count(ops.len());
                for op in ops {
                    self.u8(*op as u8);
                }
                self.nodes(comparators);
            }
            NodeKind::Ternary { test, body, orelse } => {
                self.node(test);
                self.node(body);
                self.node(orelse);
            }
            NodeKind::Named { target, value } => {
                self.str(target);
                self.node(value);
            }
            NodeKind::Call { func, args, keywords } => {
                self.node(func);
                self.nodes(args);
                self.keywords(keywords);
            }
            NodeKind::Attribute { value, attr } => {
                self.node(value);
                self.str(attr);
            }
            NodeKind::Subscript { value, index } => {
                self.node(value);
                self.node(index);
            }
            NodeKind::Slice { lower, upper, step } => {
                self.opt_node(lower.as_deref());
                self.opt_node(upper.as_deref());
                self.opt_node(step.as_deref());
            }
            NodeKind::Collection { kind, elements } => {
                self.u8(*kind as u8);
                self.nodes(elements);
            }
            NodeKind::Dict { entries } => {
                self.count(entries.len());
                for entry in entries {
                    self.opt_node(entry.key.as_ref());
                    self.node(&entry.value);
                }
            }
            NodeKind::Comprehension(comprehension) => self.comprehension(comprehension),
            NodeKind::Lambda(lambda) => {
                self.scope(lambda.scope);
                self.args(&lambda.params);
                self.node(&lambda.body);
                self.generator_info(lambda.generator);
            }
            NodeKind::Yield { value, is_from, flag } => {
                self.opt_node(value.as_deref());
                self.bool(*is_from);
                self.opt_flag(*flag);
            }
            NodeKind::Name(name) | NodeKind::Str(name) => self.str(name),
            NodeKind::Int(i) => self.varint(zigzag(*i)),
            NodeKind::BigInt(i) => {
                let bytes = i.to_signed_bytes_be();
                self.count(bytes.len());
                self.buf.extend_from_slice(&bytes);
            }
            NodeKind::Float(f) | NodeKind::Imaginary(f) => self.buf.extend_from_slice(&f.to_bits().to_be_bytes()),
            NodeKind::Bytes(bytes) => {
                self.count(bytes.len());
                self.buf.extend_from_slice(bytes);
            }
            NodeKind::FString(parts) => self.fstring_parts(parts),
            NodeKind::Bool(b) => self.bool(*b),
            NodeKind::Spill { slot, value } => {
                self.varint(u64::from(*slot));
                self.node(value);
            }
        }
    }
}

/// Maps signed integers to unsigned so small magnitudes stay short.
#[expect(clippy::cast_sign_loss, reason = "zigzag output is a bit pattern")]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn node_tag(kind: &NodeKind) -> NodeTag {
    match kind {
        NodeKind::Block { .. } => NodeTag::Block,
        NodeKind::Expr(_) => NodeTag::Expr,
        NodeKind::Assign { .. } => NodeTag::Assign,
        NodeKind::AugAssign { .. } => NodeTag::AugAssign,
        NodeKind::AnnAssign { .. } => NodeTag::AnnAssign,
        NodeKind::Del { .. } => NodeTag::Del,
        NodeKind::Return { .. } => NodeTag::Return,
        NodeKind::Raise { .. } => NodeTag::Raise,
        NodeKind::Assert { .. } => NodeTag::Assert,
        NodeKind::Import { .. } => NodeTag::Import,
        NodeKind::ImportFrom { .. } => NodeTag::ImportFrom,
        NodeKind::Global { .. } => NodeTag::Global,
        NodeKind::Nonlocal { .. } => NodeTag::Nonlocal,
        NodeKind::If { .. } => NodeTag::If,
        NodeKind::While { .. } => NodeTag::While,
        NodeKind::For { .. } => NodeTag::For,
        NodeKind::Try { .. } => NodeTag::Try,
        NodeKind::With { .. } => NodeTag::With,
        NodeKind::FunctionDef(_) => NodeTag::FunctionDef,
        NodeKind::ClassDef(_) => NodeTag::ClassDef,
        NodeKind::Simple(_) => NodeTag::Simple,
        NodeKind::BoolOp { .. } => NodeTag::BoolOp,
        NodeKind::BinOp { .. } => NodeTag::BinOp,
        NodeKind::Unary { .. } => NodeTag::Unary,
        NodeKind::Compare { .. } => NodeTag::Compare,
        NodeKind::Ternary { .. } => NodeTag::Ternary,
        NodeKind::Named { .. } => NodeTag::Named,
        NodeKind::Call { .. } => NodeTag::Call,
        NodeKind::Attribute { .. } => NodeTag::Attribute,
        NodeKind::Subscript { .. } => NodeTag::Subscript,
        NodeKind::Slice { .. } => NodeTag::Slice,
        NodeKind::Starred(_) => NodeTag::Starred,
        NodeKind::Collection { .. } => NodeTag::Collection,
        NodeKind::Dict { .. } => NodeTag::Dict,
        NodeKind::Comprehension(_) => NodeTag::Comprehension,
        NodeKind::Lambda(_) => NodeTag::Lambda,
        NodeKind::Yield { .. } => NodeTag::Yield,
        NodeKind::Await(_) => NodeTag::Await,
        NodeKind::Name(_) => NodeTag::Name,
        NodeKind::Int(_) => NodeTag::Int,
        NodeKind::BigInt(_) => NodeTag::BigInt,
        NodeKind::Float(_) => NodeTag::Float,
        NodeKind::Imaginary(_) => NodeTag::Imaginary,
        NodeKind::Str(_) => NodeTag::Str,
        NodeKind::Bytes(_) => NodeTag::Bytes,
        NodeKind::FString(_) => NodeTag::FString,
        NodeKind::Bool(_) => NodeTag::Bool,
        NodeKind::Spill { .. } => NodeTag::Spill,
    }
}
