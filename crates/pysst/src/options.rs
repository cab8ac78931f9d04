//! Build configuration.

/// Maximum nesting depth for source structures while building.
/// Matches CPython's limit of ~200 for nested parentheses.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: u16 = 200;
/// In debug builds stack frames are much larger, so the limit is lowered to fail with
/// `NestingTooDeep` well before the native stack runs out.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: u16 = 35;

/// Options for [`crate::build_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Maximum nesting of expressions, statements and f-strings combined.
    pub max_nesting_depth: u16,
    /// Run the generator transformer on every generator body after building.
    pub transform_generators: bool,
    /// Mangle `__private` names inside class bodies.
    pub mangle_private_names: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_nesting_depth: MAX_NESTING_DEPTH,
            transform_generators: true,
            mangle_private_names: true,
        }
    }
}

impl BuildOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn max_nesting_depth(mut self, limit: u16) -> Self {
        self.max_nesting_depth = limit;
        self
    }

    /// Enables or disables the generator transformer.
    #[must_use]
    pub fn transform_generators(mut self, enabled: bool) -> Self {
        self.transform_generators = enabled;
        self
    }

    /// Enables or disables private name mangling.
    #[must_use]
    pub fn mangle_private_names(mut self, enabled: bool) -> Self {
        self.mangle_private_names = enabled;
        self
    }
}
