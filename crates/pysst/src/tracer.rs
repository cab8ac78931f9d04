//! Pipeline tracing hooks.
//!
//! The builder, the generator transformer and the codec report what they do to an [`SstTracer`].
//! Every hook has a no-op default, and the pipeline is generic over the tracer, so [`NoopTracer`]
//! compiles down to nothing.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op, used by [`crate::build`] |
//! | [`StderrTracer`] | Human-readable log to stderr |
//! | [`StatsTracer`] | Counters with a printable [`StatsReport`] |
//! | [`RecordingTracer`] | Records every [`TraceEvent`] for tests and post-mortem analysis |
//!
//! ```
//! use pysst::{BuildOptions, RecordingTracer, TraceEvent, build_with};
//!
//! let mut tracer = RecordingTracer::new();
//! build_with("def f():\n    yield 1\n", &BuildOptions::default(), &mut tracer).unwrap();
//! assert!(tracer.events().iter().any(|e| matches!(e, TraceEvent::Flag { .. })));
//! ```

use std::fmt;

use ahash::AHashMap;

use crate::{
    scope::{ScopeId, ScopeKind},
    sst::FlagId,
};

/// The construct a progress flag was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum FlagSite {
    Block,
    If,
    Loop,
    Try,
    With,
    Yield,
}

/// Event captured by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The builder entered a new scope.
    ScopeEnter {
        scope: ScopeId,
        kind: ScopeKind,
        name: String,
        /// Scope nesting depth after entering; the module is depth 0.
        depth: usize,
    },
    /// The builder finished a scope.
    ScopeExit { scope: ScopeId, depth: usize },
    /// The generator transformer allocated a flag in the function owning `scope`.
    Flag { scope: ScopeId, flag: FlagId, site: FlagSite },
    /// The generator transformer wrapped an operand in a spill slot.
    Spill { scope: ScopeId, slot: u32 },
    /// A module was serialized.
    Encode { bytes: usize, strings: usize },
    /// A module was deserialized.
    Decode { bytes: usize, nodes: usize },
}

/// Hooks called by the build, transform and codec passes.
pub trait SstTracer: fmt::Debug {
    #[inline(always)]
    fn on_scope_enter(&mut self, _scope: ScopeId, _kind: ScopeKind, _name: &str, _depth: usize) {}

    #[inline(always)]
    fn on_scope_exit(&mut self, _scope: ScopeId, _depth: usize) {}

    /// Called for every progress flag, in allocation order.
    #[inline(always)]
    fn on_flag(&mut self, _scope: ScopeId, _flag: FlagId, _site: FlagSite) {}

    #[inline(always)]
    fn on_spill(&mut self, _scope: ScopeId, _slot: u32) {}

    /// Called once per [`crate::Module::dump`] with the output size and the number of interned strings.
    #[inline(always)]
    fn on_encode(&mut self, _bytes: usize, _strings: usize) {}

    /// Called once per successful [`crate::Module::load`] with the input size and decoded node count.
    #[inline(always)]
    fn on_decode(&mut self, _bytes: usize, _nodes: usize) {}
}

impl<T: SstTracer + ?Sized> SstTracer for &mut T {
    fn on_scope_enter(&mut self, scope: ScopeId, kind: ScopeKind, name: &str, depth: usize) {
        (**self).on_scope_enter(scope, kind, name, depth);
    }

    fn on_scope_exit(&mut self, scope: ScopeId, depth: usize) {
        (**self).on_scope_exit(scope, depth);
    }

    fn on_flag(&mut self, scope: ScopeId, flag: FlagId, site: FlagSite) {
        (**self).on_flag(scope, flag, site);
    }

    fn on_spill(&mut self, scope: ScopeId, slot: u32) {
        (**self).on_spill(scope, slot);
    }

    fn on_encode(&mut self, bytes: usize, strings: usize) {
        (**self).on_encode(bytes, strings);
    }

    fn on_decode(&mut self, bytes: usize, nodes: usize) {
        (**self).on_decode(bytes, nodes);
    }
}

// ============================================================================
// NoopTracer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl SstTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Prints one line per event to stderr, indented by scope depth:
///
/// ```text
/// >>> function f #1
///   flag 0 yield in #1
/// <<< #1
/// ```
#[derive(Debug)]
pub struct StderrTracer {
    /// Maximum number of lines to print. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
    depth: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            count: 0,
            stopped: false,
            depth: 0,
        }
    }

    /// Creates a tracer that goes quiet after `limit` lines.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if self.stopped {
            return;
        }
        eprintln!("{:indent$}{line}", "", indent = self.depth * 2);
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} lines) ---");
            self.stopped = true;
        }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl SstTracer for StderrTracer {
    fn on_scope_enter(&mut self, scope: ScopeId, kind: ScopeKind, name: &str, depth: usize) {
        self.depth = depth.saturating_sub(1);
        let kind: &'static str = kind.into();
        self.emit(format_args!(">>> {kind} {name} {scope}"));
        self.depth = depth;
    }

    fn on_scope_exit(&mut self, scope: ScopeId, depth: usize) {
        self.depth = depth;
        self.emit(format_args!("<<< {scope}"));
    }

    fn on_flag(&mut self, scope: ScopeId, flag: FlagId, site: FlagSite) {
        let site: &'static str = site.into();
        self.emit(format_args!("flag {} {site} in {scope}", flag.index()));
    }

    fn on_spill(&mut self, scope: ScopeId, slot: u32) {
        self.emit(format_args!("spill {slot} in {scope}"));
    }

    fn on_encode(&mut self, bytes: usize, strings: usize) {
        self.emit(format_args!("encoded {bytes} bytes, {strings} strings"));
    }

    fn on_decode(&mut self, bytes: usize, nodes: usize) {
        self.emit(format_args!("decoded {bytes} bytes, {nodes} nodes"));
    }
}

// ============================================================================
// StatsTracer
// ============================================================================

/// Counts scopes, flags and codec traffic.
///
/// Retrieve results via [`StatsTracer::report`].
#[derive(Debug, Default)]
pub struct StatsTracer {
    scopes: AHashMap<ScopeKind, u64>,
    max_depth: usize,
    flag_sites: AHashMap<FlagSite, u64>,
    spills: u64,
    encoded_bytes: usize,
    decoded_bytes: usize,
    decoded_nodes: usize,
}

/// Summary produced by [`StatsTracer::report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    /// Scopes created per kind, most frequent first.
    pub scopes: Vec<(ScopeKind, u64)>,
    pub max_depth: usize,
    /// Flags allocated per construct, most frequent first.
    pub flags: Vec<(FlagSite, u64)>,
    pub total_flags: u64,
    pub spills: u64,
    pub encoded_bytes: usize,
    pub decoded_bytes: usize,
    pub decoded_nodes: usize,
}

impl StatsTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> StatsReport {
        let mut scopes: Vec<_> = self.scopes.iter().map(|(&k, &v)| (k, v)).collect();
        scopes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        let mut flags: Vec<_> = self.flag_sites.iter().map(|(&k, &v)| (k, v)).collect();
        flags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| (a.0 as u8).cmp(&(b.0 as u8))));
        StatsReport {
            total_flags: flags.iter().map(|(_, count)| count).sum(),
            scopes,
            max_depth: self.max_depth,
            flags,
            spills: self.spills,
            encoded_bytes: self.encoded_bytes,
            decoded_bytes: self.decoded_bytes,
            decoded_nodes: self.decoded_nodes,
        }
    }
}

impl SstTracer for StatsTracer {
    fn on_scope_enter(&mut self, _scope: ScopeId, kind: ScopeKind, _name: &str, depth: usize) {
        *self.scopes.entry(kind).or_insert(0) += 1;
        self.max_depth = self.max_depth.max(depth);
    }

    fn on_flag(&mut self, _scope: ScopeId, _flag: FlagId, site: FlagSite) {
        *self.flag_sites.entry(site).or_insert(0) += 1;
    }

    fn on_spill(&mut self, _scope: ScopeId, _slot: u32) {
        self.spills += 1;
    }

    fn on_encode(&mut self, bytes: usize, _strings: usize) {
        self.encoded_bytes += bytes;
    }

    fn on_decode(&mut self, bytes: usize, nodes: usize) {
        self.decoded_bytes += bytes;
        self.decoded_nodes += nodes;
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SST Report ===")?;
        writeln!(f, "Max scope depth: {}", self.max_depth)?;
        writeln!(f, "Total flags:     {}", self.total_flags)?;
        writeln!(f, "Spill slots:     {}", self.spills)?;
        writeln!(f, "Encoded bytes:   {}", self.encoded_bytes)?;
        writeln!(f, "Decoded bytes:   {}", self.decoded_bytes)?;
        writeln!(f, "Decoded nodes:   {}", self.decoded_nodes)?;
        writeln!(f)?;
        writeln!(f, "--- Scopes ---")?;
        for (kind, count) in &self.scopes {
            let kind: &'static str = (*kind).into();
            writeln!(f, "  {kind:<15} {count:>6}")?;
        }
        writeln!(f, "--- Flags ---")?;
        for (site, count) in &self.flags {
            let site: &'static str = (*site).into();
            writeln!(f, "  {site:<15} {count:>6}")?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Records every event in order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl SstTracer for RecordingTracer {
    fn on_scope_enter(&mut self, scope: ScopeId, kind: ScopeKind, name: &str, depth: usize) {
        self.record(TraceEvent::ScopeEnter {
            scope,
            kind,
            name: name.to_owned(),
            depth,
        });
    }

    fn on_scope_exit(&mut self, scope: ScopeId, depth: usize) {
        self.record(TraceEvent::ScopeExit { scope, depth });
    }

    fn on_flag(&mut self, scope: ScopeId, flag: FlagId, site: FlagSite) {
        self.record(TraceEvent::Flag { scope, flag, site });
    }

    fn on_spill(&mut self, scope: ScopeId, slot: u32) {
        self.record(TraceEvent::Spill { scope, slot });
    }

    fn on_encode(&mut self, bytes: usize, strings: usize) {
        self.record(TraceEvent::Encode { bytes, strings });
    }

    fn on_decode(&mut self, bytes: usize, nodes: usize) {
        self.record(TraceEvent::Decode { bytes, nodes });
    }
}
