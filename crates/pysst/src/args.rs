//! Parameter lists of functions and lambdas.
//!
//! [`ArgDefListBuilder`] accumulates parameters one at a time in source order and validates them
//! as it goes; [`ArgDefs`] is the finished list stored in the tree and [`Signature`] the name-only
//! view consumed by the scope table and by backends binding call arguments.

use std::fmt;

use ahash::AHashSet;

use crate::{
    error::{ErrorCategory, SstError},
    span::Span,
    sst::Node,
};

/// One named parameter.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArgDef {
    pub name: String,
    /// Span of the parameter name.
    pub span: Span,
    pub annotation: Option<Node>,
    /// Default expression, evaluated in the enclosing scope at definition time.
    pub default: Option<Node>,
}

impl ArgDef {
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            annotation: None,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Node) -> Self {
        self.default = Some(default);
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, annotation: Node) -> Self {
        self.annotation = Some(annotation);
        self
    }
}

/// The variadic positional marker of a parameter list.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Splat {
    /// A bare `*` that only separates keyword-only parameters.
    Bare(Span),
    /// `*args`
    Named(ArgDef),
}

impl Splat {
    #[must_use]
    pub fn arg(&self) -> Option<&ArgDef> {
        match self {
            Self::Bare(_) => None,
            Self::Named(arg) => Some(arg),
        }
    }
}

/// A finished parameter list.
///
/// Parameters appear in source order: `positional` (the first `positional_only` of which precede
/// the `/` marker), the optional splat, `keyword_only`, and the optional keyword splat.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArgDefs {
    pub positional: Vec<ArgDef>,
    pub positional_only: u32,
    pub splat: Option<Splat>,
    pub keyword_only: Vec<ArgDef>,
    pub kw_splat: Option<ArgDef>,
}

impl ArgDefs {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.splat.is_none() && self.keyword_only.is_empty() && self.kw_splat.is_none()
    }

    /// Position of the splat in source order, i.e. the number of positional parameters before it.
    #[must_use]
    pub fn splat_index(&self) -> Option<usize> {
        self.splat.as_ref().map(|_| self.positional.len())
    }

    /// Every named parameter in frame-slot order: positional, keyword-only, `*args`, `**kwargs`.
    pub fn slots(&self) -> impl Iterator<Item = &ArgDef> + '_ {
        self.positional
            .iter()
            .chain(self.keyword_only.iter())
            .chain(self.splat.iter().filter_map(Splat::arg))
            .chain(self.kw_splat.iter())
    }

    pub fn slot_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.slots().map(|arg| arg.name.as_str())
    }

    /// Every named parameter in source order.
    pub fn iter(&self) -> impl Iterator<Item = &ArgDef> + '_ {
        self.positional
            .iter()
            .chain(self.splat.iter().filter_map(Splat::arg))
            .chain(self.keyword_only.iter())
            .chain(self.kw_splat.iter())
    }

    /// Mutable access to every parameter in source order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ArgDef> + '_ {
        let splat = self.splat.as_mut().and_then(|splat| match splat {
            Splat::Bare(_) => None,
            Splat::Named(arg) => Some(arg),
        });
        self.positional
            .iter_mut()
            .chain(splat)
            .chain(self.keyword_only.iter_mut())
            .chain(self.kw_splat.iter_mut())
    }

    /// Builds the name-only signature.
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature {
            positional: self.positional.iter().map(|a| a.name.clone()).collect(),
            positional_only: self.positional_only as usize,
            positional_defaults: self.positional.iter().filter(|a| a.default.is_some()).count(),
            keyword_only: self
                .keyword_only
                .iter()
                .map(|a| (a.name.clone(), a.default.is_some()))
                .collect(),
            var_args: self.splat.as_ref().and_then(Splat::arg).map(|a| a.name.clone()),
            var_kwargs: self.kw_splat.as_ref().map(|a| a.name.clone()),
        }
    }
}

/// Incrementally builds an [`ArgDefs`], validating names and ordering as parameters arrive.
///
/// # Usage
///
/// ```
/// use pysst::{ArgDef, ArgDefListBuilder, Span};
///
/// let mut builder = ArgDefListBuilder::new();
/// builder.add_param(ArgDef::new("a", Span::NONE)).unwrap();
/// builder.add_splat(Some(ArgDef::new("args", Span::NONE))).unwrap();
/// builder.add_param(ArgDef::new("c", Span::NONE)).unwrap();
/// let args = builder.finish().unwrap();
/// assert_eq!(args.signature().to_string(), "(a, *args, c)");
/// ```
#[derive(Debug, Default)]
pub struct ArgDefListBuilder {
    args: ArgDefs,
    seen: AHashSet<String>,
    /// Whether a positional parameter with a default has been added.
    seen_default: bool,
}

impl ArgDefListBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plain or default-valued parameter.
    ///
    /// Parameters added after [`Self::add_splat`] are keyword-only and may omit defaults freely.
    pub fn add_param(&mut self, arg: ArgDef) -> Result<(), SstError> {
        self.check_duplicate(&arg)?;
        if self.args.splat.is_some() {
            self.args.keyword_only.push(arg);
            return Ok(());
        }
        if arg.default.is_some() {
            self.seen_default = true;
        } else if self.seen_default {
            return Err(SstError::syntax(
                ErrorCategory::NonDefaultAfterDefault,
                "non-default argument follows default argument",
                arg.span,
            ));
        }
        self.args.positional.push(arg);
        Ok(())
    }

    /// Marks every positional parameter added so far as positional-only (the `/` marker).
    pub fn mark_positional_only(&mut self, span: Span) -> Result<(), SstError> {
        if self.args.splat.is_some() || self.args.positional_only != 0 {
            return Err(SstError::invalid_syntax("/ must be ahead of *", span));
        }
        if self.args.positional.is_empty() {
            return Err(SstError::invalid_syntax("at least one argument must precede /", span));
        }
        self.args.positional_only = u32::try_from(self.args.positional.len()).unwrap_or(u32::MAX);
        Ok(())
    }

    /// Adds `*name`, or a bare `*` when `arg` is `None`.
    pub fn add_splat(&mut self, arg: Option<ArgDef>) -> Result<(), SstError> {
        let span = arg.as_ref().map_or(Span::NONE, |a| a.span);
        if self.args.splat.is_some() {
            return Err(SstError::invalid_syntax("* argument may appear only once", span));
        }
        self.args.splat = Some(match arg {
            Some(arg) => {
                self.check_duplicate(&arg)?;
                Splat::Named(arg)
            }
            None => Splat::Bare(span),
        });
        Ok(())
    }

    /// Adds `**name`.
    pub fn add_kw_splat(&mut self, arg: ArgDef) -> Result<(), SstError> {
        if self.args.kw_splat.is_some() {
            return Err(SstError::invalid_syntax("** argument may appear only once", arg.span));
        }
        self.check_duplicate(&arg)?;
        self.args.kw_splat = Some(arg);
        Ok(())
    }

    /// Finishes the list.
    ///
    /// A bare `*` must be followed by at least one keyword-only parameter.
    pub fn finish(self) -> Result<ArgDefs, SstError> {
        if let Some(Splat::Bare(span)) = &self.args.splat
            && self.args.keyword_only.is_empty()
        {
            return Err(SstError::invalid_syntax("named arguments must follow bare *", *span));
        }
        Ok(self.args)
    }

    fn check_duplicate(&mut self, arg: &ArgDef) -> Result<(), SstError> {
        if self.seen.insert(arg.name.clone()) {
            Ok(())
        } else {
            Err(SstError::syntax(
                ErrorCategory::DuplicateParameter,
                format!("duplicate argument '{}' in function definition", arg.name),
                arg.span,
            ))
        }
    }
}

/// Names-only view of a parameter list.
///
/// Default values are tracked by count for positional parameters (defaults are always a suffix)
/// and by flag for keyword-only parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature {
    /// Positional parameters, positional-only first.
    pub positional: Vec<String>,
    /// How many leading `positional` entries are positional-only.
    pub positional_only: usize,
    /// How many trailing `positional` entries have defaults.
    pub positional_defaults: usize,
    /// Keyword-only parameters with whether each has a default.
    pub keyword_only: Vec<(String, bool)>,
    pub var_args: Option<String>,
    pub var_kwargs: Option<String>,
}

impl Signature {
    /// Total number of named parameters, i.e. the number of leading local slots they occupy.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.positional.len()
            + self.keyword_only.len()
            + usize::from(self.var_args.is_some())
            + usize::from(self.var_kwargs.is_some())
    }

    /// Returns true when the parameter list has no defaults, variadics or keyword-only parameters.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.positional_only == 0
            && self.positional_defaults == 0
            && self.keyword_only.is_empty()
            && self.var_args.is_none()
            && self.var_kwargs.is_none()
    }
}

/// Renders the signature in Python syntax with `=...` standing in for default values.
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let first_default = self.positional.len().saturating_sub(self.positional_defaults);
        for (i, name) in self.positional.iter().enumerate() {
            if i >= first_default {
                parts.push(format!("{name}=..."));
            } else {
                parts.push(name.clone());
            }
            if self.positional_only != 0 && i + 1 == self.positional_only {
                parts.push("/".to_owned());
            }
        }
        match &self.var_args {
            Some(name) => parts.push(format!("*{name}")),
            None if !self.keyword_only.is_empty() => parts.push("*".to_owned()),
            None => {}
        }
        for (name, has_default) in &self.keyword_only {
            if *has_default {
                parts.push(format!("{name}=..."));
            } else {
                parts.push(name.clone());
            }
        }
        if let Some(name) = &self.var_kwargs {
            parts.push(format!("**{name}"));
        }
        write!(f, "({})", parts.join(", "))
    }
}
