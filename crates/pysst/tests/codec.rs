//! Tests for the binary module format.

use pretty_assertions::assert_eq;
use pysst::{
    BuildOptions, DecodeError, ErrorCategory, FORMAT_VERSION, FlagId, Module, NodeKind, NoopTracer, RecordingTracer,
    ScopeId, SstError, TraceEvent, build, build_with,
};

const RICH_SOURCE: &str = r#"
"""Module docstring with non-Latin-1 text: ☃ 漢字"""
import os.path as p, sys
from ..pkg import (a as b, c)
from mod import *

BIG = 123456789012345678901234567890
NEG = -0x7fff_ffff_ffff_ffff_ff
RATIO = 2.5e-3 + 4j
RAW = b"\x00\xff bytes"
LATIN = "café"

@decorator(arg=1)
class Point(Base, metaclass=Meta):
    __slots__ = ("x", "y")

    def __init__(self, x: int = 0, /, y: int = 0, *, scale=1.0, **extra) -> None:
        self.__x, self.y = x * scale, y
        super().__init__()

    async def fetch(self, *urls):
        async with session() as s:
            async for u in s.get(urls):
                await u

def counter(start, step=1):
    total = start
    def bump():
        nonlocal total
        total += step
        return total
    while True:
        try:
            got = yield total
        except (ValueError, TypeError) as err:
            raise RuntimeError("bad") from err
        else:
            if got is not None and got > 0:
                total = got
            elif got == 0:
                break
            else:
                continue
        finally:
            bump()
    yield from range(total)

squares = {k: v ** 2 for k, v in items() if v if k}
flat = [y for x in grid for y in x]
uniq = {i for i in flat}
lazy = (j for j in flat)
pick = lambda a, *r, k=None, **kw: a if k else r[1:-1:2]
label = f"{BIG!r:>{WIDTH}} and {NEG=} done"
del flat[0], squares
assert uniq, "empty"
first, *rest = counter(0)
if (n := len(rest)) > 10:
    global_count = n
"#;

fn rich_module() -> Module {
    build(RICH_SOURCE).unwrap()
}

/// Offset of the root node, just past the version byte and the scope blob.
fn root_offset(bytes: &[u8]) -> usize {
    let (len, header) = match bytes[1] {
        n if n < 0x80 => (usize::from(n), 2),
        0x80 => (usize::from(u16::from_be_bytes([bytes[2], bytes[3]])), 4),
        0x81 => (usize::from(bytes[2]) << 16 | usize::from(u16::from_be_bytes([bytes[3], bytes[4]])), 5),
        other => panic!("unexpected blob length marker {other:#x}"),
    };
    header + len
}

/// A module survives encode and decode unchanged, spans and flags included.
#[test]
fn round_trip() {
    let module = rich_module();
    let bytes = module.dump().unwrap();
    assert_eq!(bytes[0], FORMAT_VERSION);
    let loaded = Module::load(&bytes).unwrap();
    assert_eq!(loaded, module);
}

/// Encoding the same module twice, or a decoded copy of it, gives identical bytes.
#[test]
fn deterministic() {
    let module = rich_module();
    let bytes = module.dump().unwrap();
    assert_eq!(module.dump().unwrap(), bytes);
    assert_eq!(Module::load(&bytes).unwrap().dump().unwrap(), bytes);
}

/// Generator flags and spills written by the transformer are restored.
#[test]
fn generator_flags_survive() {
    let module = build("def f(a):\n    yield 1\n    yield a + (yield 2)\n").unwrap();
    let loaded = Module::load(&module.dump().unwrap()).unwrap();
    let NodeKind::FunctionDef(function) = &loaded.body.statements()[0].kind else {
        panic!("expected a function definition");
    };
    let info = function.generator.unwrap();
    assert_eq!((info.flag_count, info.spill_count, info.yield_count), (4, 1, 3));
    assert_eq!(loaded, module);
}

/// Flags on generator expressions are restored.
#[test]
fn generator_expression_flags_survive() {
    let module = build("g = (x for x in y if x)\n").unwrap();
    let loaded = Module::load(&module.dump().unwrap()).unwrap();
    let NodeKind::Assign { value, .. } = &loaded.body.statements()[0].kind else {
        panic!("expected an assignment");
    };
    let NodeKind::Comprehension(comprehension) = &value.kind else {
        panic!("expected a generator expression");
    };
    assert_eq!(comprehension.yield_flag, Some(FlagId::new(0)));
    assert_eq!(comprehension.generators[0].flag, Some(FlagId::new(3)));
    assert_eq!(comprehension.generator.map(|g| g.flag_count), Some(4));
    assert_eq!(loaded, module);
}

/// A module built with a raised nesting limit loads with the same options, and a lower limit
/// rejects it.
#[test]
fn raised_nesting_limit() {
    let code = format!("x = {}1\n", "-".repeat(100));
    let options = BuildOptions::new().max_nesting_depth(150);
    let module = build_with(&code, &options, &mut NoopTracer).unwrap();
    let bytes = module.dump().unwrap();
    assert_eq!(Module::load_with_options(&bytes, &options, &mut NoopTracer).unwrap(), module);

    let tight = BuildOptions::new().max_nesting_depth(20);
    let err = Module::load_with_options(&bytes, &tight, &mut NoopTracer).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Decode);
}

/// Values that need the wider varint forms and long strings round-trip.
#[test]
fn wide_values() {
    let long_text = "x".repeat(70_000);
    let wide_text = "☃".repeat(300);
    let mut code = format!("a = '{long_text}'\nb = '{wide_text}'\nc = 18446744073709551615\nd = -1.5e300\n");
    for i in 0..200 {
        code.push_str(&format!("v{i} = {}\n", i64::MAX - i));
    }
    let module = build(&code).unwrap();
    let loaded = Module::load(&module.dump().unwrap()).unwrap();
    assert_eq!(loaded, module);
}

/// The empty module encodes and decodes.
#[test]
fn empty_module() {
    let module = build("").unwrap();
    assert!(module.body.statements().is_empty());
    assert_eq!(Module::load(&module.dump().unwrap()).unwrap(), module);
}

/// A different version byte is rejected before anything else is read.
#[test]
fn unsupported_version() {
    let mut bytes = build("x = 1\n").unwrap().dump().unwrap();
    bytes[0] = FORMAT_VERSION + 1;
    assert_eq!(
        Module::load(&bytes).unwrap_err(),
        SstError::Decode(DecodeError::UnsupportedVersion {
            found: FORMAT_VERSION + 1,
            expected: FORMAT_VERSION,
        })
    );
}

/// Every proper prefix of an encoded module fails to decode.
#[test]
fn truncated_input() {
    let bytes = build("def f(x):\n    return [x, 'y', 2.0]\n").unwrap().dump().unwrap();
    for len in 0..bytes.len() {
        let err = Module::load(&bytes[..len]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Decode, "prefix of {len} bytes: {err}");
    }
}

/// Bytes after the module body are an error.
#[test]
fn trailing_bytes() {
    let mut bytes = build("x = 1\n").unwrap().dump().unwrap();
    bytes.push(0);
    let err = Module::load(&bytes).unwrap_err();
    assert!(matches!(err, SstError::Decode(DecodeError::Malformed { .. })), "{err}");
}

/// A tag byte naming no node variant is reported with its offset.
#[test]
fn unknown_tag() {
    let mut bytes = build("x = 1\n").unwrap().dump().unwrap();
    let offset = root_offset(&bytes);
    bytes[offset] = 0xee;
    assert_eq!(
        Module::load(&bytes).unwrap_err(),
        SstError::Decode(DecodeError::UnknownTag { tag: 0xee, offset })
    );
}

/// A corrupted scope blob is rejected.
#[test]
fn corrupt_scope_blob() {
    let mut bytes = build("x = 1\n").unwrap().dump().unwrap();
    // claim the blob is one byte long, which cannot hold a scope table
    bytes[1] = 1;
    let err = Module::load(&bytes).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Decode);
}

/// A scope reference that is not a child of the enclosing scope does not resolve.
#[test]
fn unresolved_scope() {
    let mut module = build("def f():\n    pass\n").unwrap();
    let NodeKind::Block { body, .. } = &mut module.body.kind else {
        panic!("expected a block");
    };
    let NodeKind::FunctionDef(function) = &mut body[0].kind else {
        panic!("expected a function definition");
    };
    function.scope = ScopeId::MODULE;
    let err = Module::load(&module.dump().unwrap()).unwrap_err();
    assert!(matches!(err, SstError::Decode(DecodeError::UnresolvedScope { id: 0, .. })), "{err}");
    assert_eq!(err.category(), ErrorCategory::Invariant);
}

/// The tracer sees the encoded size and the decoded node count.
#[test]
fn codec_tracing() {
    let module = build("x = y\n").unwrap();
    let mut tracer = RecordingTracer::new();
    let bytes = module.dump_with(&mut tracer).unwrap();
    Module::load_with(&bytes, &mut tracer).unwrap();
    let events = tracer.into_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], TraceEvent::Encode { bytes: n, strings: 2 } if n == bytes.len()));
    // block, assign, two names
    assert_eq!(
        events[1],
        TraceEvent::Decode {
            bytes: bytes.len(),
            nodes: 4,
        }
    );
}
