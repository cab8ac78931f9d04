//! Lexical scopes and name resolution.
//!
//! The builder records, for every scope, which names are bound, used or declared `global`/`nonlocal`
//! while it walks the source. Nothing is classified at that point: a name used in a function may
//! turn out to be bound later in the same function, or in an enclosing function that is still being
//! built. [`ScopeTable::finalize`] runs once the whole module is visited and performs the two-pass
//! analysis: names flow down as "bound in an enclosing function" sets and come back up as "free in
//! some descendant" sets, which turns enclosing locals into cells and the captured references into
//! free variables.
//!
//! Slot numbering, per function-like scope:
//! * locals: parameters first (see [`crate::ArgDefs::slot_names`]), then every other local in order
//!   of first occurrence
//! * cells: sorted by name, then free variables, also sorted by name; a free variable's index is
//!   offset by the number of cells

use std::{
    fmt,
    ops::{BitOr, BitOrAssign, Index},
};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    error::{ErrorCategory, SstError},
    span::Span,
};

/// Name of the implicit cell every class body provides to its methods.
pub const CLASS_CELL: &str = "__class__";

/// Index of a scope in a [`ScopeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ScopeId(u32);

impl ScopeId {
    /// The module scope, always the first entry of a table.
    pub const MODULE: Self = Self(0);

    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::FromRepr, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    Module,
    Function,
    /// A function or lambda whose own body contains `yield`, or a generator expression.
    Generator,
    Lambda,
    Class,
    /// A list, set or dict comprehension.
    Comprehension,
}

impl ScopeKind {
    /// Returns true for scopes with a frame of their own: everything but modules and classes.
    #[must_use]
    pub fn is_function_like(self) -> bool {
        matches!(self, Self::Function | Self::Generator | Self::Lambda | Self::Comprehension)
    }
}

/// Definition and use flags recorded for a name while building.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DefUse(u16);

impl DefUse {
    pub const EMPTY: Self = Self(0);
    /// Assigned, deleted, or bound by `for`, `with`, `except`, `def` or `class`.
    pub const LOCAL: Self = Self(1);
    pub const PARAM: Self = Self(1 << 1);
    pub const IMPORT: Self = Self(1 << 2);
    pub const GLOBAL: Self = Self(1 << 3);
    pub const NONLOCAL: Self = Self(1 << 4);
    pub const USE: Self = Self(1 << 5);
    pub const ANNOTATED: Self = Self(1 << 6);
    /// Any of the flags that create a binding in the scope.
    pub const BOUND: Self = Self(Self::LOCAL.0 | Self::PARAM.0 | Self::IMPORT.0);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::LOCAL, "local"),
        (Self::PARAM, "param"),
        (Self::IMPORT, "import"),
        (Self::GLOBAL, "global"),
        (Self::NONLOCAL, "nonlocal"),
        (Self::USE, "use"),
        (Self::ANNOTATED, "annotated"),
    ];

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DefUse {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DefUse {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DefUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Where a name lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Slot {
    /// Frame-local slot, or class namespace entry in class scopes.
    Local(u32),
    /// Cell owned by this scope and captured by a nested scope.
    Cell(u32),
    /// Cell captured from an enclosing scope; indexes after the cells.
    Free(u32),
    /// Module global, `explicit` when declared with `global`.
    Global { explicit: bool },
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(i) => write!(f, "local {i}"),
            Self::Cell(i) => write!(f, "cell {i}"),
            Self::Free(i) => write!(f, "free {i}"),
            Self::Global { explicit: true } => f.write_str("global (explicit)"),
            Self::Global { explicit: false } => f.write_str("global"),
        }
    }
}

/// One name known to a scope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Symbol {
    pub flags: DefUse,
    /// First occurrence, or the `global`/`nonlocal` statement that declared the name.
    pub span: Span,
    /// Filled in by [`ScopeTable::finalize`].
    pub slot: Option<Slot>,
}

/// A single lexical scope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Scope {
    kind: ScopeKind,
    name: String,
    span: Span,
    parent: Option<ScopeId>,
    first_child: Option<ScopeId>,
    next_sibling: Option<ScopeId>,
    last_child: Option<ScopeId>,
    symbols: IndexMap<String, Symbol>,
    params: Vec<String>,
    locals: Vec<String>,
    cell_vars: Vec<String>,
    free_vars: Vec<String>,
}

impl Scope {
    fn new(kind: ScopeKind, name: String, span: Span, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            name,
            span,
            parent,
            first_child: None,
            next_sibling: None,
            last_child: None,
            symbols: IndexMap::new(),
            params: Vec::new(),
            locals: Vec::new(),
            cell_vars: Vec::new(),
            free_vars: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn span(&self) -> Span {
        self.span
    }

    #[must_use]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Symbols in order of first occurrence.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, &Symbol)> + '_ {
        self.symbols.iter().map(|(name, symbol)| (name.as_str(), symbol))
    }

    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Parameter names in slot order.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Names of the local slots; parameters come first.
    #[must_use]
    pub fn locals(&self) -> &[String] {
        &self.locals
    }

    #[must_use]
    pub fn cell_vars(&self) -> &[String] {
        &self.cell_vars
    }

    #[must_use]
    pub fn free_vars(&self) -> &[String] {
        &self.free_vars
    }

    /// Names declared with `global` in this scope.
    pub fn explicit_globals(&self) -> impl Iterator<Item = &str> + '_ {
        self.names_with(DefUse::GLOBAL)
    }

    /// Names declared with `nonlocal` in this scope.
    pub fn nonlocals(&self) -> impl Iterator<Item = &str> + '_ {
        self.names_with(DefUse::NONLOCAL)
    }

    fn names_with(&self, flag: DefUse) -> impl Iterator<Item = &str> + '_ {
        self.symbols
            .iter()
            .filter(move |(_, symbol)| symbol.flags.contains(flag))
            .map(|(name, _)| name.as_str())
    }
}

/// Classification of a name before slots are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Local,
    GlobalExplicit,
    GlobalImplicit,
    Free,
    Cell,
}

/// Arena of every scope in one module, rooted at [`ScopeId::MODULE`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    finalized: bool,
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ScopeId> for ScopeTable {
    type Output = Scope;

    fn index(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }
}

impl ScopeTable {
    /// Creates a table holding only the module scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Module, "<module>".to_owned(), Span::NONE, None)],
            finalized: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always false: the module scope exists from construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Iterates the direct children of `id` in creation order.
    pub fn children(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        let mut next = self.get(id).and_then(|scope| scope.first_child);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.scopes[current.index()].next_sibling;
            Some(current)
        })
    }

    /// Iterates every scope id in creation order.
    pub fn ids(&self) -> impl Iterator<Item = ScopeId> + use<> {
        (0..u32::try_from(self.scopes.len()).unwrap_or(u32::MAX)).map(ScopeId)
    }

    /// Returns true if `child` was created directly inside `parent`.
    #[must_use]
    pub fn is_child_of(&self, child: ScopeId, parent: ScopeId) -> bool {
        self.get(child).is_some_and(|scope| scope.parent == Some(parent))
    }

    /// Returns the slot of `name` as seen from `scope`, once the table is finalized.
    ///
    /// Returns `None` for names the scope never mentions.
    #[must_use]
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<Slot> {
        self.get(scope)?.symbols.get(name)?.slot
    }

    /// Creates a scope nested in `parent` and links it as the last child.
    pub(crate) fn push(&mut self, parent: ScopeId, kind: ScopeKind, name: impl Into<String>, span: Span) -> ScopeId {
        let id = ScopeId(u32::try_from(self.scopes.len()).unwrap_or(u32::MAX));
        let mut scope = Scope::new(kind, name.into(), span, Some(parent));
        // methods see the class cell whether or not they mention it
        if self.scopes[parent.index()].kind == ScopeKind::Class && matches!(kind, ScopeKind::Function | ScopeKind::Lambda)
        {
            scope.symbols.insert(
                CLASS_CELL.to_owned(),
                Symbol {
                    flags: DefUse::USE,
                    span: Span::NONE,
                    slot: None,
                },
            );
        }
        self.scopes.push(scope);
        let parent_scope = &mut self.scopes[parent.index()];
        match parent_scope.last_child.replace(id) {
            Some(prev) => self.scopes[prev.index()].next_sibling = Some(id),
            None => parent_scope.first_child = Some(id),
        }
        id
    }

    /// Records a definition or use of `name` in `scope`.
    pub(crate) fn note(&mut self, scope: ScopeId, name: &str, flags: DefUse, span: Span) {
        let symbols = &mut self.scopes[scope.index()].symbols;
        match symbols.get_mut(name) {
            Some(symbol) => symbol.flags |= flags,
            None => {
                symbols.insert(name.to_owned(), Symbol { flags, span, slot: None });
            }
        }
    }

    /// Records the parameters of a function-like scope in slot order.
    pub(crate) fn set_params<'a>(&mut self, scope: ScopeId, params: impl IntoIterator<Item = (&'a str, Span)>) {
        for (name, span) in params {
            self.note(scope, name, DefUse::PARAM, span);
            self.scopes[scope.index()].params.push(name.to_owned());
        }
    }

    /// Turns a function or lambda into a generator scope.
    pub(crate) fn mark_generator(&mut self, scope: ScopeId) {
        let scope = &mut self.scopes[scope.index()];
        if matches!(scope.kind, ScopeKind::Function | ScopeKind::Lambda) {
            scope.kind = ScopeKind::Generator;
        }
    }

    /// Handles `global name` in `scope`.
    pub(crate) fn declare_global(&mut self, scope: ScopeId, name: &str, span: Span) -> Result<(), SstError> {
        if let Some(symbol) = self.scopes[scope.index()].symbols.get(name) {
            let flags = symbol.flags;
            let msg = if flags.contains(DefUse::NONLOCAL) {
                Some(format!("name '{name}' is nonlocal and global"))
            } else if flags.contains(DefUse::PARAM) {
                Some(format!("name '{name}' is parameter and global"))
            } else if flags.contains(DefUse::USE) {
                Some(format!("name '{name}' is used prior to global declaration"))
            } else if flags.contains(DefUse::ANNOTATED) {
                Some(format!("annotated name '{name}' can't be global"))
            } else if flags.intersects(DefUse::LOCAL | DefUse::IMPORT) {
                Some(format!("name '{name}' is assigned to before global declaration"))
            } else {
                None
            };
            if let Some(msg) = msg {
                return Err(SstError::syntax(ErrorCategory::ConflictingDeclaration, msg, span));
            }
        }
        self.declare(scope, name, DefUse::GLOBAL, span);
        Ok(())
    }

    /// Handles `nonlocal name` in `scope`.
    ///
    /// Whether an enclosing function binds the name is only known after [`Self::finalize`].
    pub(crate) fn declare_nonlocal(&mut self, scope: ScopeId, name: &str, span: Span) -> Result<(), SstError> {
        if self.scopes[scope.index()].kind == ScopeKind::Module {
            return Err(SstError::syntax(
                ErrorCategory::UnresolvedNonlocal,
                "nonlocal declaration not allowed at module level",
                span,
            ));
        }
        if let Some(symbol) = self.scopes[scope.index()].symbols.get(name) {
            let flags = symbol.flags;
            let msg = if flags.contains(DefUse::GLOBAL) {
                Some(format!("name '{name}' is nonlocal and global"))
            } else if flags.contains(DefUse::PARAM) {
                Some(format!("name '{name}' is parameter and nonlocal"))
            } else if flags.contains(DefUse::USE) {
                Some(format!("name '{name}' is used prior to nonlocal declaration"))
            } else if flags.contains(DefUse::ANNOTATED) {
                Some(format!("annotated name '{name}' can't be nonlocal"))
            } else if flags.intersects(DefUse::LOCAL | DefUse::IMPORT) {
                Some(format!("name '{name}' is assigned to before nonlocal declaration"))
            } else {
                None
            };
            if let Some(msg) = msg {
                return Err(SstError::syntax(ErrorCategory::ConflictingDeclaration, msg, span));
            }
        }
        self.declare(scope, name, DefUse::NONLOCAL, span);
        Ok(())
    }

    /// Binds the target of a `:=` inside a comprehension in `target`, the nearest enclosing scope
    /// that is not a comprehension, and makes each comprehension in `between` refer to it.
    pub(crate) fn bind_comprehension_target(
        &mut self,
        between: &[ScopeId],
        target: ScopeId,
        name: &str,
        span: Span,
    ) -> Result<(), SstError> {
        let target_kind = self.scopes[target.index()].kind;
        if target_kind == ScopeKind::Class {
            return Err(SstError::invalid_syntax(
                "assignment expression within a comprehension cannot be used in a class body",
                span,
            ));
        }
        let declared_global = self.scopes[target.index()]
            .symbols
            .get(name)
            .is_some_and(|symbol| symbol.flags.contains(DefUse::GLOBAL));
        let passthrough = if target_kind == ScopeKind::Module || declared_global {
            DefUse::GLOBAL
        } else {
            DefUse::NONLOCAL
        };
        for &comp in between {
            self.note(comp, name, passthrough, span);
        }
        if !declared_global {
            self.note(target, name, DefUse::LOCAL, span);
        }
        Ok(())
    }

    fn declare(&mut self, scope: ScopeId, name: &str, flag: DefUse, span: Span) {
        let symbols = &mut self.scopes[scope.index()].symbols;
        let symbol = symbols.entry(name.to_owned()).or_insert(Symbol {
            flags: DefUse::EMPTY,
            span,
            slot: None,
        });
        symbol.flags |= flag;
        symbol.span = span;
    }

    /// Checks the links of a table restored from bytes: the root is the only module scope, and
    /// every parent, child and sibling link points at a scope created after its parent.
    pub(crate) fn validate(&self) -> Result<(), String> {
        let len = self.scopes.len();
        let Some(root) = self.scopes.first() else {
            return Err("scope table is empty".to_owned());
        };
        if root.kind != ScopeKind::Module || root.parent.is_some() {
            return Err("first scope is not a module root".to_owned());
        }
        for (index, scope) in self.scopes.iter().enumerate().skip(1) {
            match scope.parent {
                Some(parent) if parent.index() < index => {}
                _ => return Err(format!("scope {index} has no valid parent")),
            }
            if scope.kind == ScopeKind::Module {
                return Err(format!("scope {index} is a nested module"));
            }
        }
        for (index, scope) in self.scopes.iter().enumerate() {
            for link in [scope.first_child, scope.last_child, scope.next_sibling].into_iter().flatten() {
                if link.index() <= index || link.index() >= len {
                    return Err(format!("scope {index} links to out-of-range scope {link}"));
                }
            }
        }
        Ok(())
    }

    /// Classifies every name and numbers the slots of every scope.
    ///
    /// Calling this on a finalized table does nothing.
    pub fn finalize(&mut self) -> Result<(), SstError> {
        if self.finalized {
            return Ok(());
        }
        let mut free = AHashSet::new();
        self.analyze_block(ScopeId::MODULE, &mut None, &mut free, &mut None)?;
        self.finalized = true;
        Ok(())
    }

    fn analyze_block(
        &mut self,
        id: ScopeId,
        bound: &mut Option<AHashSet<String>>,
        free: &mut AHashSet<String>,
        global: &mut Option<AHashSet<String>>,
    ) -> Result<(), SstError> {
        let kind = self.scopes[id.index()].kind;
        let mut local = AHashSet::new();
        let mut bindings: AHashMap<String, Binding> = AHashMap::new();
        let mut new_global = AHashSet::new();
        let mut new_bound = AHashSet::new();
        let mut new_free = AHashSet::new();

        // class bodies see the enclosing sets but do not extend them
        if kind == ScopeKind::Class {
            new_global.extend(global.iter().flatten().cloned());
            new_bound.extend(bound.iter().flatten().cloned());
        }

        let symbols: Vec<(String, DefUse, Span)> = self.scopes[id.index()]
            .symbols
            .iter()
            .map(|(name, symbol)| (name.clone(), symbol.flags, symbol.span))
            .collect();
        for (name, flags, span) in &symbols {
            let binding = analyze_name(name, *flags, *span, bound, &mut local, free, global)?;
            bindings.insert(name.clone(), binding);
        }

        if kind == ScopeKind::Class {
            new_bound.insert(CLASS_CELL.to_owned());
        } else {
            if kind.is_function_like() {
                new_bound.extend(local.iter().cloned());
            }
            new_bound.extend(bound.iter().flatten().cloned());
            new_global.extend(global.iter().flatten().cloned());
        }

        let children: Vec<ScopeId> = self.children(id).collect();
        let mut all_free = AHashSet::new();
        for child in children {
            let mut child_bound = Some(new_bound.clone());
            let mut child_global = Some(new_global.clone());
            let mut child_free = AHashSet::new();
            self.analyze_block(child, &mut child_bound, &mut child_free, &mut child_global)?;
            all_free.extend(child_free);
        }
        new_free.extend(all_free);

        if kind.is_function_like() {
            for (name, binding) in &mut bindings {
                if *binding == Binding::Local && new_free.remove(name) {
                    *binding = Binding::Cell;
                }
            }
        } else if kind == ScopeKind::Class {
            new_free.remove(CLASS_CELL);
        }

        let class_free = self.update_symbols(id, &mut bindings, bound.as_ref(), &new_free);
        self.assign_slots(id, &bindings, class_free);
        free.extend(new_free);
        Ok(())
    }

    /// Adds names that are free in a descendant and pass through this scope.
    ///
    /// Returns the names bound by a class body that nested scopes also capture from further out.
    fn update_symbols(
        &mut self,
        id: ScopeId,
        bindings: &mut AHashMap<String, Binding>,
        bound: Option<&AHashSet<String>>,
        free: &AHashSet<String>,
    ) -> Vec<String> {
        let scope = &mut self.scopes[id.index()];
        let mut names: Vec<&String> = free.iter().collect();
        names.sort();
        let mut class_free = Vec::new();
        for name in names {
            if let Some(binding) = bindings.get(name) {
                if scope.kind == ScopeKind::Class && matches!(binding, Binding::Local | Binding::GlobalExplicit) {
                    class_free.push(name.clone());
                }
                continue;
            }
            if bound.is_some_and(|bound| !bound.contains(name)) {
                continue;
            }
            bindings.insert(name.clone(), Binding::Free);
            scope.symbols.insert(
                name.clone(),
                Symbol {
                    flags: DefUse::EMPTY,
                    span: Span::NONE,
                    slot: None,
                },
            );
        }
        class_free
    }

    fn assign_slots(&mut self, id: ScopeId, bindings: &AHashMap<String, Binding>, class_free: Vec<String>) {
        let scope = &mut self.scopes[id.index()];
        let binding_of = |name: &str| bindings.get(name).copied().unwrap_or(Binding::GlobalImplicit);

        if scope.kind == ScopeKind::Module {
            for (name, symbol) in &mut scope.symbols {
                let explicit = binding_of(name) == Binding::GlobalExplicit;
                symbol.slot = Some(Slot::Global { explicit });
            }
            return;
        }

        let mut locals = scope.params.clone();
        for name in scope.symbols.keys() {
            if binding_of(name) == Binding::Local && !locals.contains(name) {
                locals.push(name.clone());
            }
        }
        let mut cells: Vec<String> = if scope.kind == ScopeKind::Class {
            vec![CLASS_CELL.to_owned()]
        } else {
            scope
                .symbols
                .keys()
                .filter(|name| binding_of(name) == Binding::Cell)
                .cloned()
                .collect()
        };
        cells.sort();
        let mut frees: Vec<String> = scope
            .symbols
            .keys()
            .filter(|name| binding_of(name) == Binding::Free)
            .cloned()
            .chain(class_free)
            .collect();
        frees.sort();
        frees.dedup();

        let position = |list: &[String], name: &str| {
            list.iter()
                .position(|n| n == name)
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(u32::MAX)
        };
        let cell_count = u32::try_from(cells.len()).unwrap_or(u32::MAX);
        for (name, symbol) in &mut scope.symbols {
            symbol.slot = Some(match binding_of(name) {
                Binding::Local => Slot::Local(position(&locals, name)),
                Binding::Cell => Slot::Cell(position(&cells, name)),
                Binding::Free => Slot::Free(cell_count + position(&frees, name)),
                Binding::GlobalExplicit => Slot::Global { explicit: true },
                Binding::GlobalImplicit => Slot::Global { explicit: false },
            });
        }
        if scope.kind == ScopeKind::Class
            && let Some(symbol) = scope.symbols.get_mut(CLASS_CELL)
            && !symbol.flags.intersects(DefUse::BOUND)
        {
            symbol.slot = Some(Slot::Cell(0));
        }
        scope.locals = locals;
        scope.cell_vars = cells;
        scope.free_vars = frees;
    }
}

/// Classifies one name of one scope from its flags and the sets inherited from enclosing scopes.
fn analyze_name(
    name: &str,
    flags: DefUse,
    span: Span,
    bound: &mut Option<AHashSet<String>>,
    local: &mut AHashSet<String>,
    free: &mut AHashSet<String>,
    global: &mut Option<AHashSet<String>>,
) -> Result<Binding, SstError> {
    if flags.contains(DefUse::GLOBAL) {
        if flags.contains(DefUse::NONLOCAL) {
            return Err(SstError::syntax(
                ErrorCategory::ConflictingDeclaration,
                format!("name '{name}' is nonlocal and global"),
                span,
            ));
        }
        if let Some(global) = global {
            global.insert(name.to_owned());
        }
        if let Some(bound) = bound {
            bound.remove(name);
        }
        return Ok(Binding::GlobalExplicit);
    }
    if flags.contains(DefUse::NONLOCAL) {
        return match bound {
            None => Err(SstError::syntax(
                ErrorCategory::UnresolvedNonlocal,
                "nonlocal declaration not allowed at module level",
                span,
            )),
            Some(bound) if !bound.contains(name) => Err(SstError::syntax(
                ErrorCategory::UnresolvedNonlocal,
                format!("no binding for nonlocal '{name}' found"),
                span,
            )),
            Some(_) => {
                free.insert(name.to_owned());
                Ok(Binding::Free)
            }
        };
    }
    if flags.intersects(DefUse::BOUND) {
        local.insert(name.to_owned());
        if let Some(global) = global {
            global.remove(name);
        }
        return Ok(Binding::Local);
    }
    if bound.as_ref().is_some_and(|bound| bound.contains(name)) {
        free.insert(name.to_owned());
        return Ok(Binding::Free);
    }
    Ok(Binding::GlobalImplicit)
}
