use std::borrow::Cow;

use num_bigint::BigInt;
use smallvec::SmallVec;

use super::{FORMAT_VERSION, NodeTag, SPAN_BIAS, SPAN_NONE, SPAN_SAME, STR_BIAS, STR_LATIN1, STR_UTF16};
use crate::{
    args::{ArgDef, ArgDefs, Splat},
    error::{DecodeError, SstError},
    options::BuildOptions,
    scope::{ScopeId, ScopeTable},
    span::Span,
    sst::{
        Alias, BinaryOperator, BoolOperator, BranchFlags, ClassDef, CmpOperator, CollectionKind, Comprehension,
        ComprehensionFor, ComprehensionKind, Conversion, DictEntry, ExceptHandler, FStringPart, FlagId, FunctionDef,
        GeneratorInfo, Keyword, Lambda, Module, Node, NodeKind, SimpleKind, TryFlags, UnaryOperator, WithItem,
    },
};

/// Node nesting the reader accepts for modules built with `options`. Built trees nest deeper than
/// the builder's budget because blocks and spills add levels of their own.
fn decode_depth(options: &BuildOptions) -> u32 {
    4 * u32::from(options.max_nesting_depth)
}

/// Decodes a module, returning it with the number of nodes read.
pub(super) fn decode(bytes: &[u8], options: &BuildOptions) -> Result<(Module, usize), SstError> {
    let max_depth = decode_depth(options);
    let mut header = Reader::new(bytes, None, max_depth);
    let version = header.u8()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        }
        .into());
    }
    let blob_len = header.count()?;
    let blob = header.take(blob_len)?;
    let scopes: ScopeTable = postcard::from_bytes(blob).map_err(|e| DecodeError::ScopeTable(e.to_string()))?;
    scopes.validate().map_err(DecodeError::ScopeTable)?;

    let mut reader = Reader::new(bytes, Some(&scopes), max_depth);
    reader.pos = header.pos;
    let body = reader.node()?;
    if !matches!(body.kind, NodeKind::Block { .. }) {
        return Err(reader.malformed("module body is not a block").into());
    }
    if reader.pos != bytes.len() {
        return Err(reader.malformed("trailing bytes after module body").into());
    }
    let nodes = reader.nodes_read;
    Ok((Module { body, scopes }, nodes))
}

/// Cursor over an encoded module.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    /// Interned strings; index 0 is the null entry.
    strings: Vec<Option<String>>,
    last_span: Span,
    scopes: Option<&'a ScopeTable>,
    /// Scope whose body is being read.
    current_scope: ScopeId,
    depth: u32,
    max_depth: u32,
    nodes_read: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], scopes: Option<&'a ScopeTable>, max_depth: u32) -> Self {
        Self {
            bytes,
            pos: 0,
            strings: vec![None],
            last_span: Span::NONE,
            scopes,
            current_scope: ScopeId::MODULE,
            depth: 0,
            max_depth,
            nodes_read: 0,
        }
    }

    fn malformed(&self, msg: impl Into<Cow<'static, str>>) -> DecodeError {
        DecodeError::Malformed {
            msg: msg.into(),
            offset: self.pos,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.bytes.len() - self.pos;
        if n > remaining {
            return Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: n - remaining,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(self.malformed("invalid bool byte")),
        }
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let marker = self.u8()?;
        match marker {
            0..0x80 => Ok(u64::from(marker)),
            0x80 => Ok(u64::from(u16::from_be_bytes(self.array()?))),
            0x81 => {
                let [a, b, c] = self.array()?;
                Ok(u64::from(u32::from_be_bytes([0, a, b, c])))
            }
            0x82 => Ok(u64::from(u32::from_be_bytes(self.array()?))),
            0x83 => Ok(u64::from_be_bytes(self.array()?)),
            _ => {
                self.pos -= 1;
                Err(self.malformed(format!("invalid varint marker {marker:#04x}")))
            }
        }
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let v = self.varint()?;
        u32::try_from(v).map_err(|_| self.malformed("value does not fit in 32 bits"))
    }

    /// Reads a length, rejecting lengths longer than the remaining input.
    fn count(&mut self) -> Result<usize, DecodeError> {
        let v = self.varint()?;
        let remaining = self.bytes.len() - self.pos;
        match usize::try_from(v) {
            Ok(n) if n <= remaining => Ok(n),
            _ => Err(DecodeError::UnexpectedEof {
                offset: self.pos,
                needed: usize::try_from(v).unwrap_or(usize::MAX).saturating_sub(remaining),
            }),
        }
    }

    fn span(&mut self) -> Result<Span, DecodeError> {
        let span = match self.varint()? {
            SPAN_NONE => Span::NONE,
            SPAN_SAME => self.last_span,
            start => {
                let start = u32::try_from(start - SPAN_BIAS).map_err(|_| self.malformed("span start out of range"))?;
                let len = self.u32()?;
                let end = start
                    .checked_add(len)
                    .ok_or_else(|| self.malformed("span end out of range"))?;
                Span::new(start, end)
            }
        };
        self.last_span = span;
        Ok(span)
    }

    fn opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        let offset = self.pos;
        match self.varint()? {
            STR_LATIN1 => {
                let len = self.count()?;
                let s: String = self.take(len)?.iter().copied().map(char::from).collect();
                self.strings.push(Some(s.clone()));
                Ok(Some(s))
            }
            STR_UTF16 => {
                let len = self.count()?;
                let raw = self.take(len.checked_mul(2).ok_or(DecodeError::InvalidString { offset })?)?;
                let units: Vec<u16> = raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
                let s = String::from_utf16(&units).map_err(|_| DecodeError::InvalidString { offset })?;
                self.strings.push(Some(s.clone()));
                Ok(Some(s))
            }
            marker => {
                let index = usize::try_from(marker - STR_BIAS).map_err(|_| DecodeError::InvalidString { offset })?;
                match self.strings.get(index) {
                    Some(entry) => Ok(entry.clone()),
                    None => Err(DecodeError::InvalidString { offset }),
                }
            }
        }
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let offset = self.pos;
        self.opt_str()?.ok_or(DecodeError::InvalidString { offset })
    }

    fn strs(&mut self) -> Result<Vec<String>, DecodeError> {
        let n = self.count()?;
        (0..n).map(|_| self.str()).collect()
    }

    fn enum_byte<T>(&mut self, what: &str, from_repr: impl FnOnce(u8) -> Option<T>) -> Result<T, DecodeError> {
        let byte = self.u8()?;
        from_repr(byte).ok_or_else(|| {
            self.pos -= 1;
            self.malformed(format!("invalid {what} {byte}"))
        })
    }

    fn flag(&mut self) -> Result<FlagId, DecodeError> {
        Ok(FlagId::new(self.u32()?))
    }

    fn opt_flag(&mut self) -> Result<Option<FlagId>, DecodeError> {
        match self.u32()? {
            0 => Ok(None),
            v => Ok(Some(FlagId::new(v - 1))),
        }
    }

    /// Reads a scope reference, which must name a child of the scope being read.
    fn scope(&mut self) -> Result<ScopeId, DecodeError> {
        let offset = self.pos;
        let id = self.u32()?;
        let scope = ScopeId::new(id);
        match self.scopes {
            Some(scopes) if scopes.is_child_of(scope, self.current_scope) => Ok(scope),
            _ => Err(DecodeError::UnresolvedScope { id, offset }),
        }
    }

    /// Reads with `scope` as the current scope.
    fn in_scope<T>(&mut self, scope: ScopeId, f: impl FnOnce(&mut Self) -> Result<T, DecodeError>) -> Result<T, DecodeError> {
        let outer = std::mem::replace(&mut self.current_scope, scope);
        let result = f(self);
        self.current_scope = outer;
        result
    }

    fn branch_flags(&mut self) -> Result<Option<BranchFlags>, DecodeError> {
        if !self.bool()? {
            return Ok(None);
        }
        Ok(Some(BranchFlags {
            taken: self.flag()?,
            done: self.flag()?,
        }))
    }

    fn generator_info(&mut self) -> Result<Option<GeneratorInfo>, DecodeError> {
        if !self.bool()? {
            return Ok(None);
        }
        Ok(Some(GeneratorInfo {
            flag_count: self.u32()?,
            spill_count: self.u32()?,
            yield_count: self.u32()?,
        }))
    }

    fn arg(&mut self) -> Result<ArgDef, DecodeError> {
        Ok(ArgDef {
            name: self.str()?,
            span: self.span()?,
            annotation: self.opt_node()?,
            default: self.opt_node()?,
        })
    }

    fn arg_list(&mut self) -> Result<Vec<ArgDef>, DecodeError> {
        let n = self.count()?;
        (0..n).map(|_| self.arg()).collect()
    }

    fn args(&mut self) -> Result<ArgDefs, DecodeError> {
        let positional = self.arg_list()?;
        let positional_only = self.u32()?;
        let splat = match self.u8()? {
            0 => None,
            1 => Some(Splat::Bare(self.span()?)),
            2 => Some(Splat::Named(self.arg()?)),
            _ => return Err(self.malformed("invalid splat marker")),
        };
        let keyword_only = self.arg_list()?;
        let kw_splat = if self.bool()? { Some(self.arg()?) } else { None };
        Ok(ArgDefs {
            positional,
            positional_only,
            splat,
            keyword_only,
            kw_splat,
        })
    }

    fn keywords(&mut self) -> Result<Vec<Keyword>, DecodeError> {
        let n = self.count()?;
        (0..n)
            .map(|_| {
                Ok(Keyword {
                    name: self.opt_str()?,
                    value: self.node()?,
                })
            })
            .collect()
    }

    fn aliases(&mut self) -> Result<Vec<Alias>, DecodeError> {
        let n = self.count()?;
        (0..n)
            .map(|_| {
                Ok(Alias {
                    name: self.str()?,
                    asname: self.opt_str()?,
                })
            })
            .collect()
    }

    fn handler(&mut self) -> Result<ExceptHandler, DecodeError> {
        Ok(ExceptHandler {
            span: self.span()?,
            test: self.opt_node()?,
            name: self.opt_str()?,
            body: self.node()?,
            is_star: self.bool()?,
        })
    }

    fn fstring_parts(&mut self) -> Result<Vec<FStringPart>, DecodeError> {
        let n = self.count()?;
        let mut parts = Vec::with_capacity(n);
        for _ in 0..n {
            let part = match self.u8()? {
                0 => FStringPart::Literal(self.str()?),
                1 => FStringPart::Interpolation {
                    value: self.boxed()?,
                    conversion: self.enum_byte("conversion", Conversion::from_repr)?,
                    format_spec: if self.bool()? { Some(self.fstring_parts()?) } else { None },
                    debug_text: self.opt_str()?,
                },
                _ => return Err(self.malformed("invalid f-string part marker")),
            };
            parts.push(part);
        }
        Ok(parts)
    }

    fn opt_node(&mut self) -> Result<Option<Node>, DecodeError> {
        if self.bytes.get(self.pos) == Some(&(NodeTag::Absent as u8)) {
            self.pos += 1;
            return Ok(None);
        }
        self.node().map(Some)
    }

    fn opt_boxed(&mut self) -> Result<Option<Box<Node>>, DecodeError> {
        Ok(self.opt_node()?.map(Box::new))
    }

    fn boxed(&mut self) -> Result<Box<Node>, DecodeError> {
        self.node().map(Box::new)
    }

    fn nodes(&mut self) -> Result<Vec<Node>, DecodeError> {
        let n = self.count()?;
        (0..n).map(|_| self.node()).collect()
    }

    fn node(&mut self) -> Result<Node, DecodeError> {
        if self.depth >= self.max_depth {
            return Err(self.malformed("nodes nested too deeply"));
        }
        self.depth += 1;
        let result = self.node_impl();
        self.depth -= 1;
        self.nodes_read += 1;
        result
    }

    fn node_impl(&mut self) -> Result<Node, DecodeError> {
        let offset = self.pos;
        let tag_byte = self.u8()?;
        let tag = NodeTag::from_repr(tag_byte).ok_or(DecodeError::UnknownTag { tag: tag_byte, offset })?;
        let span = self.span()?;
        let kind = match tag {
            // only valid where an optional node is expected
            NodeTag::Absent => return Err(DecodeError::UnknownTag { tag: tag_byte, offset }),
            NodeTag::Block => NodeKind::Block {
                body: self.nodes()?,
                flag: self.opt_flag()?,
            },
            NodeTag::Expr => NodeKind::Expr(self.boxed()?),
            NodeTag::Assign => NodeKind::Assign {
                targets: self.nodes()?,
                value: self.boxed()?,
            },
            NodeTag::AugAssign => NodeKind::AugAssign {
                target: self.boxed()?,
                op: self.enum_byte("binary operator", BinaryOperator::from_repr)?,
                value: self.boxed()?,
            },
            NodeTag::AnnAssign => NodeKind::AnnAssign {
                target: self.boxed()?,
                annotation: self.boxed()?,
                value: self.opt_boxed()?,
            },
            NodeTag::Del => NodeKind::Del { targets: self.nodes()? },
            NodeTag::Return => NodeKind::Return {
                value: self.opt_boxed()?,
            },
            NodeTag::Raise => NodeKind::Raise {
                exc: self.opt_boxed()?,
                cause: self.opt_boxed()?,
            },
            NodeTag::Assert => NodeKind::Assert {
                test: self.boxed()?,
                msg: self.opt_boxed()?,
            },
            NodeTag::Import => NodeKind::Import {
                names: self.aliases()?,
            },
            NodeTag::ImportFrom => NodeKind::ImportFrom {
                module: self.opt_str()?,
                level: self.u32()?,
                names: self.aliases()?,
            },
            NodeTag::Global => NodeKind::Global { names: self.strs()? },
            NodeTag::Nonlocal => NodeKind::Nonlocal { names: self.strs()? },
            NodeTag::If => NodeKind::If {
                test: self.boxed()?,
                body: self.boxed()?,
                orelse: self.opt_boxed()?,
                flags: self.branch_flags()?,
            },
            NodeTag::While => NodeKind::While {
                test: self.boxed()?,
                body: self.boxed()?,
                orelse: self.opt_boxed()?,
                contains_break: self.bool()?,
                contains_continue: self.bool()?,
                flag: self.opt_flag()?,
            },
            NodeTag::For => NodeKind::For {
                target: self.boxed()?,
                iter: self.boxed()?,
                body: self.boxed()?,
                orelse: self.opt_boxed()?,
                is_async: self.bool()?,
                contains_break: self.bool()?,
                contains_continue: self.bool()?,
                flag: self.opt_flag()?,
            },
            NodeTag::Try => {
                let body = self.boxed()?;
                let n = self.count()?;
                let handlers = (0..n).map(|_| self.handler()).collect::<Result<_, _>>()?;
                NodeKind::Try {
                    body,
                    handlers,
                    orelse: self.opt_boxed()?,
                    finally: self.opt_boxed()?,
                    flags: if self.bool()? {
                        Some(TryFlags {
                            region: self.flag()?,
                            finally: self.flag()?,
                        })
                    } else {
                        None
                    },
                }
            }
            NodeTag::With => {
                let n = self.count()?;
                let items = (0..n)
                    .map(|_| {
                        Ok(WithItem {
                            context: self.node()?,
                            target: self.opt_node()?,
                        })
                    })
                    .collect::<Result<_, DecodeError>>()?;
                NodeKind::With {
                    items,
                    body: self.boxed()?,
                    is_async: self.bool()?,
                    flag: self.opt_flag()?,
                }
            }
            NodeTag::FunctionDef => {
                let name = self.str()?;
                let scope = self.scope()?;
                let params = self.args()?;
                let returns = self.opt_node()?;
                let decorators = self.nodes()?;
                let body = self.in_scope(scope, Self::node)?;
                NodeKind::FunctionDef(Box::new(FunctionDef {
                    name,
                    scope,
                    params,
                    returns,
                    decorators,
                    body,
                    is_async: self.bool()?,
                    generator: self.generator_info()?,
                }))
            }
            NodeTag::ClassDef => {
                let name = self.str()?;
                let scope = self.scope()?;
                let bases = self.nodes()?;
                let keywords = self.keywords()?;
                let decorators = self.nodes()?;
                let body = self.in_scope(scope, Self::node)?;
                NodeKind::ClassDef(Box::new(ClassDef {
                    name,
                    scope,
                    bases,
                    keywords,
                    decorators,
                    body,
                }))
            }
            NodeTag::Simple => NodeKind::Simple(self.enum_byte("simple kind", SimpleKind::from_repr)?),
            NodeTag::BoolOp => NodeKind::BoolOp {
                op: self.enum_byte("bool operator", BoolOperator::from_repr)?,
                values: self.nodes()?,
            },
            NodeTag::BinOp => NodeKind::BinOp {
                left: self.boxed()?,
                op: self.enum_byte("binary operator", BinaryOperator::from_repr)?,
                right: self.boxed()?,
            },
            NodeTag::Unary => NodeKind::Unary {
                op: self.enum_byte("unary operator", UnaryOperator::from_repr)?,
                operand: self.boxed()?,
            },
            NodeTag::Compare => {
                let left = self.boxed()?;
                let n = self.count()?;
                let ops = (0..n)
                    .map(|_| self.enum_byte("comparison operator", CmpOperator::from_repr))
                    .collect::<Result<SmallVec<_>, _>>()?;
                NodeKind::Compare {
                    left,
                    ops,
                    comparators: self.nodes()?,
                }
            }
            NodeTag::Ternary => NodeKind::Ternary {
                test: self.boxed()?,
                body: self.boxed()?,
                orelse: self.boxed()?,
            },
            NodeTag::Named => NodeKind::Named {
                target: self.str()?,
                value: self.boxed()?,
            },
            NodeTag::Call => NodeKind::Call {
                func: self.boxed()?,
                args: self.nodes()?,
                keywords: self.keywords()?,
            },
            NodeTag::Attribute => NodeKind::Attribute {
                value: self.boxed()?,
                attr: self.str()?,
            },
            NodeTag::Subscript => NodeKind::Subscript {
                value: self.boxed()?,
                index: self.boxed()?,
            },
            NodeTag::Slice => NodeKind::Slice {
                lower: self.opt_boxed()?,
                upper: self.opt_boxed()?,
                step: self.opt_boxed()?,
            },
            NodeTag::Starred => NodeKind::Starred(self.boxed()?),
            NodeTag::Collection => NodeKind::Collection {
                kind: self.enum_byte("collection kind", CollectionKind::from_repr)?,
                elements: self.nodes()?,
            },
            NodeTag::Dict => {
                let n = self.count()?;
                let entries = (0..n)
                    .map(|_| {
                        Ok(DictEntry {
                            key: self.opt_node()?,
                            value: self.node()?,
                        })
                    })
                    .collect::<Result<_, DecodeError>>()?;
                NodeKind::Dict { entries }
            }
            NodeTag::Comprehension => NodeKind::Comprehension(Box::new(self.comprehension()?)),
            NodeTag::Lambda => {
                let scope = self.scope()?;
                let params = self.args()?;
                let body = self.in_scope(scope, Self::node)?;
                NodeKind::Lambda(Box::new(Lambda {
                    scope,
                    params,
                    body,
                    generator: self.generator_info()?,
                }))
            }
            NodeTag::Yield => NodeKind::Yield {
                value: self.opt_boxed()?,
                is_from: self.bool()?,
                flag: self.opt_flag()?,
            },
            NodeTag::Await => NodeKind::Await(self.boxed()?),
            NodeTag::Name => NodeKind::Name(self.str()?),
            NodeTag::Int => NodeKind::Int(unzigzag(self.varint()?)),
            NodeTag::BigInt => {
                let len = self.count()?;
                NodeKind::BigInt(BigInt::from_signed_bytes_be(self.take(len)?))
            }
            NodeTag::Float => NodeKind::Float(f64::from_bits(u64::from_be_bytes(self.array()?))),
            NodeTag::Imaginary => NodeKind::Imaginary(f64::from_bits(u64::from_be_bytes(self.array()?))),
            NodeTag::Str => NodeKind::Str(self.str()?),
            NodeTag::Bytes => {
                let len = self.count()?;
                NodeKind::Bytes(self.take(len)?.to_vec())
            }
            NodeTag::FString => NodeKind::FString(self.fstring_parts()?),
            NodeTag::Bool => NodeKind::Bool(self.bool()?),
            NodeTag::Spill => NodeKind::Spill {
                slot: self.u32()?,
                value: self.boxed()?,
            },
        };
        Ok(Node::new(span, kind))
    }

    /// The first generator's iterable belongs to the enclosing scope, everything else to the
    /// comprehension's own scope.
    fn comprehension(&mut self) -> Result<Comprehension, DecodeError> {
        let kind = self.enum_byte("comprehension kind", ComprehensionKind::from_repr)?;
        let scope = self.scope()?;
        let (element, value) = self.in_scope(scope, |r| Ok((r.node()?, r.opt_node()?)))?;
        let n = self.count()?;
        let mut generators = Vec::with_capacity(n);
        for i in 0..n {
            let target = self.in_scope(scope, Self::node)?;
            let iter = if i == 0 {
                self.node()?
            } else {
                self.in_scope(scope, Self::node)?
            };
            let (conditions, is_async) = self.in_scope(scope, |r| Ok((r.nodes()?, r.bool()?)))?;
            generators.push(ComprehensionFor {
                target,
                iter,
                conditions,
                is_async,
                flag: self.opt_flag()?,
                condition_flags: self.branch_flags()?,
            });
        }
        Ok(Comprehension {
            kind,
            scope,
            element,
            value,
            generators,
            yield_flag: self.opt_flag()?,
            generator: self.generator_info()?,
        })
    }
}

#[expect(clippy::cast_possible_wrap, reason = "zigzag input is a bit pattern")]
fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}
