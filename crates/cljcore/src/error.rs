//! Error taxonomy for the reader, analyzer, and emitter.
//!
//! Mirrors the teacher's `ExcType` (`exception_private.rs`): a closed `strum`-
//! derived enum of error *kinds*, carried by a single concrete error type
//! rather than one Rust type per kind. Analyzer and macro-expansion errors
//! carry the form's source location (spec.md §7); wrapped failures (macro
//! expansion, assembly, load) keep their original cause via `cause`.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::pos::CodeLoc;

/// The complete set of error kinds produced by this crate (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    IoFailure,
    // --- reader sub-kinds (spec.md §4.1) ---
    UnterminatedList,
    UnterminatedString,
    InvalidNumber,
    InvalidEscape,
    UnmatchedDelimiter,
    InvalidDispatchChar,
    FeatureNotFound,
    UnsupportedArg,
    /// `#=` read-time eval attempted while disabled (design-note open question, frozen disabled-by-default).
    ReadEvalDisabled,
    // --- analyzer kinds ---
    UnresolvedSymbol,
    BadSpecialForm,
    DuplicateArity,
    MultipleVariadic,
    InvalidVariadicArity,
    RecurArityMismatch,
    RecurNotInTailPosition,
    UnknownFeature,
    MacroExpansionFailed,
    // --- external-collaborator kinds ---
    AssemblyFailed,
    LoadFailed,
    // --- protocol dispatch ---
    NotImplemented,
    CompilePathUnset,
}

/// A single compiler error: a kind, an optional source location, a message,
/// and an optional boxed cause for wrapped failures.
#[derive(Debug)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub loc: Option<CodeLoc>,
    pub message: String,
    pub cause: Option<Box<CompileError>>,
}

impl CompileError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            loc: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn at(kind: ErrorKind, loc: CodeLoc, message: impl Into<String>) -> Self {
        Self {
            kind,
            loc: Some(loc),
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps an existing error under a new kind, preserving the inner cause —
    /// used for `MacroExpansionFailed{cause}` and `AssemblyFailed{cause}`.
    #[must_use]
    pub fn wrap(kind: ErrorKind, message: impl Into<String>, cause: CompileError) -> Self {
        Self {
            kind,
            loc: cause.loc.clone(),
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    #[must_use]
    pub fn with_loc(mut self, loc: CodeLoc) -> Self {
        self.loc = Some(loc);
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{loc}: {}: {}", self.kind, self.message)?,
            None => write!(f, "{}: {}", self.kind, self.message)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

pub type CResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_and_kind() {
        let loc = CodeLoc::new("core.clj".into(), crate::pos::SourcePos::START);
        let err = CompileError::at(ErrorKind::UnresolvedSymbol, loc, "foo/bar");
        assert_eq!(err.to_string(), "core.clj:1:1: UnresolvedSymbol: foo/bar");
    }

    #[test]
    fn wrap_preserves_cause_location() {
        let loc = CodeLoc::new("core.clj".into(), crate::pos::SourcePos::START);
        let inner = CompileError::at(ErrorKind::UnresolvedSymbol, loc.clone(), "x");
        let outer = CompileError::wrap(ErrorKind::MacroExpansionFailed, "in my-macro", inner);
        assert_eq!(outer.loc, Some(loc));
        assert!(outer.to_string().contains("caused by"));
    }
}
