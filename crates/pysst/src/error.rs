//! Error types shared by the builder, the generator transformer and the codec.

use std::{borrow::Cow, fmt};

use crate::span::Span;

/// Coarse classification of an [`SstError`], stable enough for callers to match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorCategory {
    /// Grammar errors reported by the parser and other malformed constructs.
    InvalidSyntax,
    /// Two parameters of one function share a name.
    DuplicateParameter,
    /// A parameter without a default follows one with a default.
    NonDefaultAfterDefault,
    /// More than one starred target in a single destructuring.
    MultipleStarredTargets,
    /// A `nonlocal` name with no binding in an enclosing function, or `nonlocal` at module level.
    UnresolvedNonlocal,
    /// `global`/`nonlocal` declarations that contradict other uses of the name.
    ConflictingDeclaration,
    /// `from x import *` inside a function or class.
    ImportStarOutsideModule,
    /// Source nested deeper than the configured limit.
    NestingTooDeep,
    /// Valid Python outside the supported subset, e.g. `match` statements or type parameter lists.
    Unsupported,
    /// An upstream phase produced a tree that breaks a structural invariant.
    Invariant,
    /// A serialized tree could not be decoded.
    Decode,
}

/// Errors raised while building, transforming or decoding a tree.
///
/// Every variant aborts processing of the current compilation unit; nothing is recovered locally.
#[derive(Debug, Clone, PartialEq)]
pub enum SstError {
    /// Syntax and scoping errors found in user source.
    Syntax {
        category: ErrorCategory,
        msg: Cow<'static, str>,
        span: Span,
    },
    /// A defect in an upstream phase, e.g. a yield outside a generator scope.
    Invariant { msg: Cow<'static, str>, span: Span },
    /// The binary form could not be decoded.
    Decode(DecodeError),
}

impl SstError {
    pub(crate) fn syntax(category: ErrorCategory, msg: impl Into<Cow<'static, str>>, span: Span) -> Self {
        Self::Syntax {
            category,
            msg: msg.into(),
            span,
        }
    }

    pub(crate) fn invalid_syntax(msg: impl Into<Cow<'static, str>>, span: Span) -> Self {
        Self::syntax(ErrorCategory::InvalidSyntax, msg, span)
    }

    pub(crate) fn unsupported(what: &str, span: Span) -> Self {
        Self::syntax(ErrorCategory::Unsupported, format!("{what} are not supported"), span)
    }

    pub(crate) fn invariant(msg: impl Into<Cow<'static, str>>, span: Span) -> Self {
        Self::Invariant { msg: msg.into(), span }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Syntax { category, .. } => *category,
            Self::Invariant { .. } => ErrorCategory::Invariant,
            Self::Decode(err) => err.category(),
        }
    }

    /// Human-readable message without the category prefix.
    #[must_use]
    pub fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Syntax { msg, .. } | Self::Invariant { msg, .. } => Cow::Borrowed(msg),
            Self::Decode(err) => Cow::Owned(err.to_string()),
        }
    }

    /// Source span of the offending construct; [`Span::NONE`] for decode errors.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Syntax { span, .. } | Self::Invariant { span, .. } => *span,
            Self::Decode(_) => Span::NONE,
        }
    }
}

impl fmt::Display for SstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { category, msg, span } => write!(f, "{category}: {msg} at {span}"),
            Self::Invariant { msg, span } => write!(f, "invariant violated: {msg} at {span}"),
            Self::Decode(err) => write!(f, "decode error: {err}"),
        }
    }
}

impl std::error::Error for SstError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for SstError {
    fn from(err: DecodeError) -> Self {
        Self::Decode(err)
    }
}

/// Reasons a byte stream fails to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ended before a value was complete.
    UnexpectedEof { offset: usize, needed: usize },
    /// The leading version byte does not match [`FORMAT_VERSION`](crate::codec::FORMAT_VERSION).
    UnsupportedVersion { found: u8, expected: u8 },
    /// A node tag byte that names no variant.
    UnknownTag { tag: u8, offset: usize },
    /// A scope reference with no matching child scope in the restored scope table.
    UnresolvedScope { id: u32, offset: usize },
    /// A string back-reference past the end of the string table, or invalid UTF-16.
    InvalidString { offset: usize },
    /// Any other inconsistency, e.g. an out-of-range enum byte or trailing data.
    Malformed { msg: Cow<'static, str>, offset: usize },
    /// The scope table blob could not be deserialized.
    ScopeTable(String),
}

impl DecodeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnresolvedScope { .. } => ErrorCategory::Invariant,
            _ => ErrorCategory::Decode,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof { offset, needed } => {
                write!(f, "unexpected end of stream at offset {offset} (needed {needed} more bytes)")
            }
            Self::UnsupportedVersion { found, expected } => {
                write!(f, "unsupported format version {found}, expected {expected}")
            }
            Self::UnknownTag { tag, offset } => write!(f, "unknown node tag {tag} at offset {offset}"),
            Self::UnresolvedScope { id, offset } => {
                write!(f, "scope id {id} at offset {offset} does not resolve in the scope table")
            }
            Self::InvalidString { offset } => write!(f, "invalid string reference at offset {offset}"),
            Self::Malformed { msg, offset } => write!(f, "{msg} at offset {offset}"),
            Self::ScopeTable(msg) => write!(f, "invalid scope table: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}
