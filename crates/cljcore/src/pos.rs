//! Source positions and spans threaded through the reader, analyzer, and emitter.
//!
//! The reader preserves source position for every compound node and every
//! symbol (spec.md §3 invariant); the analyzer re-surfaces it in `CompileError`
//! locations; the emitter does not generate positions beyond the line/column/
//! file tags already attached to the AST it consumes (spec.md §1 non-goals).

use std::sync::Arc;

/// A single point in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
    pub byte_offset: u32,
}

impl SourcePos {
    pub const START: SourcePos = SourcePos {
        line: 1,
        column: 1,
        byte_offset: 0,
    };

    /// Advances this position past a single character, tracking line/column.
    #[must_use]
    pub fn advance(self, ch: char) -> SourcePos {
        let byte_offset = self.byte_offset + ch.len_utf8() as u32;
        if ch == '\n' {
            SourcePos {
                line: self.line + 1,
                column: 1,
                byte_offset,
            }
        } else {
            SourcePos {
                line: self.line,
                column: self.column + 1,
                byte_offset,
            }
        }
    }
}

/// A half-open range `[start, end)` within one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceSpan {
    pub start: SourcePos,
    pub end: SourcePos,
}

impl SourceSpan {
    pub fn new(start: SourcePos, end: SourcePos) -> Self {
        Self { start, end }
    }
}

/// A fully-resolved `file:line:col` location, used for diagnostics and for the
/// `:line`/`:column`/`:file` metadata merged onto reader-produced values.
///
/// `file` is an `Arc<str>` rather than `String` so every `CodeLoc` produced
/// while reading one source unit can share a single allocation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeLoc {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl CodeLoc {
    pub fn new(file: Arc<str>, pos: SourcePos) -> Self {
        Self {
            file,
            line: pos.line,
            column: pos.column,
        }
    }
}

impl std::fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
