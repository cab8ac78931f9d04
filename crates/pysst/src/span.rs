//! Source spans and offset to line/column conversion.

use std::fmt;

use ruff_text_size::TextRange;

/// Half-open `[start, end)` byte range into the source a node was built from.
///
/// Synthesized nodes carry [`Span::NONE`]. Spans are only used for diagnostics and for the
/// "same span as previous node" compression in the binary format, so two spans are never
/// compared for anything but equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    start: u32,
    end: u32,
}

impl Span {
    /// Sentinel for nodes with no source location.
    pub const NONE: Self = Self {
        start: u32::MAX,
        end: u32::MAX,
    };

    /// Creates a span covering `start..end`.
    ///
    /// `end` is clamped so that the span is never inverted.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.start == u32::MAX
    }

    /// Start offset, or `None` for [`Span::NONE`].
    #[must_use]
    pub const fn start(self) -> Option<u32> {
        if self.is_none() { None } else { Some(self.start) }
    }

    /// End offset, or `None` for [`Span::NONE`].
    #[must_use]
    pub const fn end(self) -> Option<u32> {
        if self.is_none() { None } else { Some(self.end) }
    }

    /// Length in bytes; zero for [`Span::NONE`].
    #[must_use]
    pub const fn len(self) -> u32 {
        if self.is_none() { 0 } else { self.end - self.start }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Returns the smallest span covering both `self` and `other`.
    #[must_use]
    pub fn cover(self, other: Self) -> Self {
        match (self.is_none(), other.is_none()) {
            (true, _) => other,
            (_, true) => self,
            _ => Self::new(self.start.min(other.start), self.end.max(other.end)),
        }
    }

    /// Whether `other` lies within `self`. [`Span::NONE`] neither contains nor is contained.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        !self.is_none() && !other.is_none() && self.start <= other.start && other.end <= self.end
    }

    /// Returns the source text this span covers, if it lies within `source`.
    #[must_use]
    pub fn text(self, source: &str) -> Option<&str> {
        if self.is_none() {
            return None;
        }
        source.get(self.start as usize..self.end as usize)
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::NONE
    }
}

impl From<TextRange> for Span {
    fn from(range: TextRange) -> Self {
        Self::new(range.start().into(), range.end().into())
    }
}

/// Custom Debug implementation to keep tree dumps readable.
impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("<none>")
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A line/column position, both 1-based. Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeLoc {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets to [`CodeLoc`]s for one source text.
///
/// Rendering diagnostics is left to callers; this only provides the position lookup they need.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    source: &'a str,
    /// Byte offset of the first character of each line.
    line_starts: Vec<u32>,
}

impl<'a> LineIndex<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
            }
        }
        Self { source, line_starts }
    }

    /// Returns the line/column of a byte offset. Offsets past the end map to the last position.
    #[must_use]
    pub fn location(&self, offset: u32) -> CodeLoc {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line] as usize;
        let end = (offset as usize).min(self.source.len());
        let column = self
            .source
            .get(line_start..end)
            .map_or(end.saturating_sub(line_start), |prefix| prefix.chars().count());
        CodeLoc {
            line: u32::try_from(line + 1).unwrap_or(u32::MAX),
            column: u32::try_from(column + 1).unwrap_or(u32::MAX),
        }
    }

    /// Returns the start location of a span, or `None` for [`Span::NONE`].
    #[must_use]
    pub fn span_start(&self, span: Span) -> Option<CodeLoc> {
        span.start().map(|offset| self.location(offset))
    }
}
