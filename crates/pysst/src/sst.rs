//! The intermediate tree.
//!
//! One closed [`NodeKind`] enum covers statements and expressions alike. Every [`Node`] owns its
//! children exclusively, so passes can mutate subtrees in place without worrying about sharing.
//! The only fields that change after building are the generator flags filled in by
//! [`crate::generator`] (`flag`, `flags`, `generator`) and the [`NodeKind::Spill`] wrappers it
//! inserts.

use num_bigint::BigInt;
use smallvec::SmallVec;

use crate::{
    args::ArgDefs,
    scope::{ScopeId, ScopeTable},
    span::Span,
};

/// A built compilation unit: the module body and its scope table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Module {
    /// Always a [`NodeKind::Block`].
    pub body: Node,
    pub scopes: ScopeTable,
}

/// Index of a progress flag within one generator function.
///
/// Flags are allocated densely from zero in post-order by the generator transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FlagId(u32);

impl FlagId {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A node with its source span.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub span: Span,
    pub kind: NodeKind,
}

impl Node {
    #[must_use]
    pub const fn new(span: Span, kind: NodeKind) -> Self {
        Self { span, kind }
    }

    /// Creates a block node without a generator flag.
    #[must_use]
    pub fn block(span: Span, body: Vec<Self>) -> Self {
        Self::new(span, NodeKind::Block { body, flag: None })
    }

    /// Creates a node for `pass`, `break`, `continue`, `None` or `...`.
    #[must_use]
    pub const fn simple(span: Span, kind: SimpleKind) -> Self {
        Self::new(span, NodeKind::Simple(kind))
    }

    /// Creates a variable lookup.
    #[must_use]
    pub fn name(span: Span, name: impl Into<String>) -> Self {
        Self::new(span, NodeKind::Name(name.into()))
    }

    /// Returns true for constants whose evaluation has no side effects and never changes.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Int(_)
                | NodeKind::BigInt(_)
                | NodeKind::Float(_)
                | NodeKind::Imaginary(_)
                | NodeKind::Str(_)
                | NodeKind::Bytes(_)
                | NodeKind::Bool(_)
                | NodeKind::Simple(SimpleKind::None | SimpleKind::Ellipsis)
        )
    }

    /// Returns the statements of a block, or a one-element slice for any other node.
    #[must_use]
    pub fn statements(&self) -> &[Self] {
        match &self.kind {
            NodeKind::Block { body, .. } => body,
            _ => std::slice::from_ref(self),
        }
    }
}

/// Every construct of the intermediate tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    /// A sequence of statements.
    ///
    /// `flag` is set by the generator transformer when the block has more than one statement and
    /// at least one of them can suspend; it records the index of the next statement to run.
    Block { body: Vec<Node>, flag: Option<FlagId> },
    /// An expression evaluated for its side effects.
    Expr(Box<Node>),
    /// `a = b = value`: targets are assigned left to right.
    Assign { targets: Vec<Node>, value: Box<Node> },
    /// `target op= value`
    AugAssign {
        target: Box<Node>,
        op: BinaryOperator,
        value: Box<Node>,
    },
    /// `target: annotation [= value]`
    AnnAssign {
        target: Box<Node>,
        annotation: Box<Node>,
        value: Option<Box<Node>>,
    },
    /// `del a, b.c, d[e]`
    Del { targets: Vec<Node> },
    Return { value: Option<Box<Node>> },
    Raise {
        exc: Option<Box<Node>>,
        cause: Option<Box<Node>>,
    },
    Assert { test: Box<Node>, msg: Option<Box<Node>> },
    /// `import a.b as c, d`
    Import { names: Vec<Alias> },
    /// `from ..module import a as b`; a star import has the single alias `*`.
    ImportFrom {
        module: Option<String>,
        level: u32,
        names: Vec<Alias>,
    },
    Global { names: Vec<String> },
    Nonlocal { names: Vec<String> },
    /// `if`/`elif`/`else`; `elif` chains nest as an `If` in `orelse`.
    If {
        test: Box<Node>,
        body: Box<Node>,
        orelse: Option<Box<Node>>,
        flags: Option<BranchFlags>,
    },
    While {
        test: Box<Node>,
        body: Box<Node>,
        orelse: Option<Box<Node>>,
        contains_break: bool,
        contains_continue: bool,
        /// Loop-position flag set by the generator transformer.
        flag: Option<FlagId>,
    },
    For {
        target: Box<Node>,
        iter: Box<Node>,
        body: Box<Node>,
        orelse: Option<Box<Node>>,
        is_async: bool,
        contains_break: bool,
        contains_continue: bool,
        /// Iterator-position flag set by the generator transformer.
        flag: Option<FlagId>,
    },
    Try {
        body: Box<Node>,
        handlers: Vec<ExceptHandler>,
        orelse: Option<Box<Node>>,
        finally: Option<Box<Node>>,
        flags: Option<TryFlags>,
    },
    With {
        items: Vec<WithItem>,
        body: Box<Node>,
        is_async: bool,
        flag: Option<FlagId>,
    },
    FunctionDef(Box<FunctionDef>),
    ClassDef(Box<ClassDef>),
    Simple(SimpleKind),
    /// `a and b and c`
    BoolOp { op: BoolOperator, values: Vec<Node> },
    BinOp {
        left: Box<Node>,
        op: BinaryOperator,
        right: Box<Node>,
    },
    Unary { op: UnaryOperator, operand: Box<Node> },
    /// `left op0 comparators[0] op1 comparators[1] ...`
    Compare {
        left: Box<Node>,
        ops: SmallVec<[CmpOperator; 2]>,
        comparators: Vec<Node>,
    },
    /// `body if test else orelse`
    Ternary {
        test: Box<Node>,
        body: Box<Node>,
        orelse: Box<Node>,
    },
    /// `target := value`
    Named { target: String, value: Box<Node> },
    /// Positional arguments keep source order, `*x` appears as a [`NodeKind::Starred`] argument.
    Call {
        func: Box<Node>,
        args: Vec<Node>,
        keywords: Vec<Keyword>,
    },
    Attribute { value: Box<Node>, attr: String },
    Subscript { value: Box<Node>, index: Box<Node> },
    Slice {
        lower: Option<Box<Node>>,
        upper: Option<Box<Node>>,
        step: Option<Box<Node>>,
    },
    Starred(Box<Node>),
    /// Tuple, list or set display.
    Collection { kind: CollectionKind, elements: Vec<Node> },
    Dict { entries: Vec<DictEntry> },
    Comprehension(Box<Comprehension>),
    Lambda(Box<Lambda>),
    /// `yield value` or `yield from value`; `flag` is the suspend point's progress flag.
    Yield {
        value: Option<Box<Node>>,
        is_from: bool,
        flag: Option<FlagId>,
    },
    Await(Box<Node>),
    /// Variable lookup or binding target; scope classification lives in the scope table.
    Name(String),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    /// Imaginary literal such as `2j`.
    Imaginary(f64),
    Str(String),
    Bytes(Vec<u8>),
    FString(Vec<FStringPart>),
    Bool(bool),
    /// An operand evaluated once and kept in generator spill slot `slot`, so that resuming after a
    /// suspend point in a later operand does not evaluate it again.
    Spill { slot: u32, value: Box<Node> },
}

/// A `def` statement.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FunctionDef {
    /// Binding name, mangled when defined in a class body.
    pub name: String,
    pub scope: ScopeId,
    pub params: ArgDefs,
    pub returns: Option<Node>,
    pub decorators: Vec<Node>,
    pub body: Node,
    pub is_async: bool,
    /// Progress-flag bookkeeping, present once the body has been transformed.
    pub generator: Option<GeneratorInfo>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Lambda {
    pub scope: ScopeId,
    pub params: ArgDefs,
    pub body: Node,
    pub generator: Option<GeneratorInfo>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub scope: ScopeId,
    pub bases: Vec<Node>,
    pub keywords: Vec<Keyword>,
    pub decorators: Vec<Node>,
    pub body: Node,
}

/// A list/set/dict comprehension or generator expression.
///
/// The first generator's `iter` is built in the enclosing scope; everything else belongs to
/// `scope`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Comprehension {
    pub kind: ComprehensionKind,
    pub scope: ScopeId,
    /// The element, or the key for dict comprehensions.
    pub element: Node,
    /// The value for dict comprehensions.
    pub value: Option<Node>,
    pub generators: Vec<ComprehensionFor>,
    /// Flag of the implicit `yield` of the element, generator expressions only.
    pub yield_flag: Option<FlagId>,
    /// Set by the transformer on generator expressions.
    pub generator: Option<GeneratorInfo>,
}

/// One `for target in iter if cond...` clause.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ComprehensionFor {
    pub target: Node,
    pub iter: Node,
    pub conditions: Vec<Node>,
    pub is_async: bool,
    /// Loop flag in generator expressions.
    pub flag: Option<FlagId>,
    /// Flags of the condition chain in generator expressions that have conditions.
    pub condition_flags: Option<BranchFlags>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExceptHandler {
    pub span: Span,
    pub test: Option<Node>,
    pub name: Option<String>,
    pub body: Node,
    pub is_star: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WithItem {
    pub context: Node,
    pub target: Option<Node>,
}

/// A keyword argument; `name` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Keyword {
    pub name: Option<String>,
    pub value: Node,
}

/// A dict display entry; `key` is `None` for `**mapping`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DictEntry {
    pub key: Option<Node>,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

impl Alias {
    /// The name this alias binds in the importing scope.
    ///
    /// `import a.b` binds `a`; `import a.b as c` and `from m import a as c` bind `c`.
    #[must_use]
    pub fn binding(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

/// Part of an f-string.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum FStringPart {
    Literal(String),
    Interpolation {
        value: Box<Node>,
        conversion: Conversion,
        /// Parts of a format spec, which may itself contain interpolations.
        format_spec: Option<Vec<FStringPart>>,
        /// Text echoed by the `=` specifier, e.g. `x=` for `f"{x=}"`.
        debug_text: Option<String>,
    },
}

/// Flags of a generator-bearing `if`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BranchFlags {
    /// Which branch was entered.
    pub taken: FlagId,
    /// Whether the entered branch ran to completion.
    pub done: FlagId,
}

/// Flags of a generator-bearing `try`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TryFlags {
    /// Active region: body, a handler index or the `else` clause.
    pub region: FlagId,
    /// Whether the `finally` clause is running.
    pub finally: FlagId,
}

/// Per-scope result of the generator transformer, for functions, lambdas and generator expressions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GeneratorInfo {
    /// Flags are `FlagId(0)..FlagId(flag_count)`.
    pub flag_count: u32,
    /// Number of operand spill slots.
    pub spill_count: u32,
    pub yield_count: u32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum SimpleKind {
    Pass,
    Break,
    Continue,
    None,
    Ellipsis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl BinaryOperator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum UnaryOperator {
    Not,
    Neg,
    Pos,
    Invert,
}

impl UnaryOperator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Neg => "-",
            Self::Pos => "+",
            Self::Invert => "~",
        }
    }
}

/// Defined separately since these operators always return a bool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CmpOperator {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOperator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum CollectionKind {
    Tuple,
    List,
    Set,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
pub enum ComprehensionKind {
    #[strum(serialize = "listcomp")]
    List,
    #[strum(serialize = "setcomp")]
    Set,
    #[strum(serialize = "dictcomp")]
    Dict,
    #[strum(serialize = "genexpr")]
    Generator,
}

impl ComprehensionKind {
    /// Name of the implicit scope, e.g. `<listcomp>`.
    #[must_use]
    pub fn scope_name(self) -> &'static str {
        match self {
            Self::List => "<listcomp>",
            Self::Set => "<setcomp>",
            Self::Dict => "<dictcomp>",
            Self::Generator => "<genexpr>",
        }
    }
}

/// f-string conversion: `!s`, `!r` or `!a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Conversion {
    None,
    Str,
    Repr,
    Ascii,
}
