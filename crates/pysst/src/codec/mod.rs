//! Binary form of a built [`Module`].
//!
//! ## Wire format
//!
//! ```text
//! version(u8) | scope_blob_len(varint) | scope_blob(postcard ScopeTable) | node
//! node:   tag(u8) | span | fields in declaration order
//! span:   0 = none | 1 = same as previous span | start+2 (varint), end-start (varint)
//! string: 0 = new Latin-1 (varint len, 1 byte/char) | 1 = new UTF-16 (varint units, 2 bytes BE/unit)
//!         | index+2 (varint) for an interned string; index 0 is the null entry
//! varint: < 0x80 one byte | 0x80 u16 | 0x81 u24 | 0x82 u32 | 0x83 u64, all big-endian
//! ```
//!
//! An absent optional node is the single tag byte [`NodeTag::Absent`]. Encoding is
//! deterministic: the same module always produces the same bytes.

mod reader;
mod writer;

use crate::{
    error::SstError,
    options::BuildOptions,
    sst::Module,
    tracer::{NoopTracer, SstTracer},
};

/// Version byte leading every encoded module.
pub const FORMAT_VERSION: u8 = 2;

/// Tag byte of each node variant. Values are part of the format; append new tags and bump
/// [`FORMAT_VERSION`] rather than renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub(crate) enum NodeTag {
    Absent = 0,
    Block,
    Expr,
    Assign,
    AugAssign,
    AnnAssign,
    Del,
    Return,
    Raise,
    Assert,
    Import,
    ImportFrom,
    Global,
    Nonlocal,
    If,
    While,
    For,
    Try,
    With,
    FunctionDef,
    ClassDef,
    Simple,
    BoolOp,
    BinOp,
    Unary,
    Compare,
    Ternary,
    Named,
    Call,
    Attribute,
    Subscript,
    Slice,
    Starred,
    Collection,
    Dict,
    Comprehension,
    Lambda,
    Yield,
    Await,
    Name,
    Int,
    BigInt,
    Float,
    Imaginary,
    Str,
    Bytes,
    FString,
    Bool,
    Spill,
}

/// Span marker for [`crate::span::Span::NONE`].
const SPAN_NONE: u64 = 0;
/// Span marker for "same span as the previous one".
const SPAN_SAME: u64 = 1;
/// Offset added to span starts so they never collide with the markers.
const SPAN_BIAS: u64 = 2;

const STR_LATIN1: u64 = 0;
const STR_UTF16: u64 = 1;
/// Offset added to string table indices; index 0 is the null entry.
const STR_BIAS: u64 = 2;

impl Module {
    /// Encodes the module.
    ///
    /// ```
    /// let module = pysst::build("x = [i for i in range(3)]\n").unwrap();
    /// let bytes = module.dump().unwrap();
    /// assert_eq!(pysst::Module::load(&bytes).unwrap(), module);
    /// ```
    pub fn dump(&self) -> Result<Vec<u8>, SstError> {
        self.dump_with(&mut NoopTracer)
    }

    /// Encodes the module, reporting the output size to `tracer`.
    pub fn dump_with(&self, tracer: &mut impl SstTracer) -> Result<Vec<u8>, SstError> {
        let (bytes, strings) = writer::encode(self)?;
        tracer.on_encode(bytes.len(), strings);
        Ok(bytes)
    }

    /// Decodes a module written by [`Module::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, SstError> {
        Self::load_with(bytes, &mut NoopTracer)
    }

    /// Decodes a module, reporting the input size and node count to `tracer`.
    pub fn load_with(bytes: &[u8], tracer: &mut impl SstTracer) -> Result<Self, SstError> {
        Self::load_with_options(bytes, &BuildOptions::default(), tracer)
    }

    /// Decodes a module built with `options`.
    ///
    /// The nesting the reader accepts scales with `options.max_nesting_depth`, so a module built
    /// with a raised limit needs the same options to load.
    pub fn load_with_options(
        bytes: &[u8],
        options: &BuildOptions,
        tracer: &mut impl SstTracer,
    ) -> Result<Self, SstError> {
        let (module, nodes) = reader::decode(bytes, options)?;
        tracer.on_decode(bytes.len(), nodes);
        Ok(module)
    }
}
