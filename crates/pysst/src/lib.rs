#![doc = include_str!("../../../README.md")]

mod args;
mod builder;
pub mod codec;
mod error;
pub mod generator;
mod options;
pub mod render;
mod scope;
mod span;
mod sst;
pub mod tracer;
pub mod visit;

pub use crate::{
    args::{ArgDef, ArgDefListBuilder, ArgDefs, Signature, Splat},
    builder::{build, build_with},
    codec::FORMAT_VERSION,
    error::{DecodeError, ErrorCategory, SstError},
    generator::{transform_function, transform_module},
    options::{BuildOptions, MAX_NESTING_DEPTH},
    scope::{CLASS_CELL, DefUse, Scope, ScopeId, ScopeKind, ScopeTable, Slot, Symbol},
    span::{CodeLoc, LineIndex, Span},
    sst::{
        Alias, BinaryOperator, BoolOperator, BranchFlags, ClassDef, CmpOperator, CollectionKind, Comprehension,
        ComprehensionFor, ComprehensionKind, Conversion, DictEntry, ExceptHandler, FStringPart, FlagId, FunctionDef,
        GeneratorInfo, Keyword, Lambda, Module, Node, NodeKind, SimpleKind, TryFlags, UnaryOperator, WithItem,
    },
    tracer::{
        FlagSite, NoopTracer, RecordingTracer, SstTracer, StatsReport, StatsTracer, StderrTracer, TraceEvent,
    },
};
