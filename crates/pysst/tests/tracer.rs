//! Tests for the tracing hooks.

use pretty_assertions::assert_eq;
use pysst::{
    BuildOptions, FlagId, FlagSite, Module, RecordingTracer, ScopeId, ScopeKind, StatsTracer, TraceEvent, build_with,
};

const CODE: &str = "def f():\n    yield 1\n    yield 2\nclass C:\n    def m(self):\n        return [x for x in self]\n";

fn enter(scope: u32, kind: ScopeKind, name: &str, depth: usize) -> TraceEvent {
    TraceEvent::ScopeEnter {
        scope: ScopeId::new(scope),
        kind,
        name: name.to_owned(),
        depth,
    }
}

fn exit(scope: u32, depth: usize) -> TraceEvent {
    TraceEvent::ScopeExit {
        scope: ScopeId::new(scope),
        depth,
    }
}

fn flag(index: u32, site: FlagSite) -> TraceEvent {
    TraceEvent::Flag {
        scope: ScopeId::new(1),
        flag: FlagId::new(index),
        site,
    }
}

/// Scopes are reported as they are entered and left, followed by the transformer's flags.
#[test]
fn recorded_events() {
    let mut tracer = RecordingTracer::new();
    build_with(CODE, &BuildOptions::default(), &mut tracer).unwrap();
    assert_eq!(
        tracer.into_events(),
        vec![
            enter(0, ScopeKind::Module, "<module>", 0),
            enter(1, ScopeKind::Function, "f", 1),
            exit(1, 0),
            enter(2, ScopeKind::Class, "C", 1),
            enter(3, ScopeKind::Function, "m", 2),
            enter(4, ScopeKind::Comprehension, "<listcomp>", 3),
            exit(4, 2),
            exit(3, 1),
            exit(2, 0),
            exit(0, 0),
            flag(0, FlagSite::Yield),
            flag(1, FlagSite::Yield),
            flag(2, FlagSite::Block),
        ]
    );
}

/// Spill slots are reported for the function that owns them.
#[test]
fn spill_events() {
    let mut tracer = RecordingTracer::new();
    build_with("def g(a):\n    return a + (yield)\n", &BuildOptions::default(), &mut tracer).unwrap();
    let spills: Vec<&TraceEvent> = tracer
        .events()
        .iter()
        .filter(|e| matches!(e, TraceEvent::Spill { .. }))
        .collect();
    assert_eq!(
        spills,
        vec![&TraceEvent::Spill {
            scope: ScopeId::new(1),
            slot: 0,
        }]
    );
}

/// A limited recorder keeps only the first events.
#[test]
fn recording_limit() {
    let mut tracer = RecordingTracer::with_limit(3);
    build_with(CODE, &BuildOptions::default(), &mut tracer).unwrap();
    assert_eq!(
        tracer.events(),
        [
            enter(0, ScopeKind::Module, "<module>", 0),
            enter(1, ScopeKind::Function, "f", 1),
            exit(1, 0),
        ]
    );
}

/// The stats tracer counts scopes, flags and codec traffic.
#[test]
fn stats_report() {
    let mut tracer = StatsTracer::new();
    let module = build_with(CODE, &BuildOptions::default(), &mut tracer).unwrap();
    let bytes = module.dump_with(&mut tracer).unwrap();
    let loaded = Module::load_with(&bytes, &mut tracer).unwrap();
    assert_eq!(loaded, module);

    let report = tracer.report();
    assert_eq!(
        report.scopes,
        vec![
            (ScopeKind::Function, 2),
            (ScopeKind::Module, 1),
            (ScopeKind::Class, 1),
            (ScopeKind::Comprehension, 1),
        ]
    );
    assert_eq!(report.max_depth, 3);
    assert_eq!(report.flags, vec![(FlagSite::Yield, 2), (FlagSite::Block, 1)]);
    assert_eq!(report.total_flags, 3);
    assert_eq!(report.spills, 0);
    assert_eq!(report.encoded_bytes, bytes.len());
    assert_eq!(report.decoded_bytes, bytes.len());
    assert!(report.decoded_nodes > 0);

    let text = report.to_string();
    assert!(text.starts_with("=== SST Report ===\n"));
    assert!(text.contains("Total flags:     3\n"));
    assert!(text.contains("  yield                2\n"));
}
