//! Core IR: the host VM's typed lambda-calculus module format (spec.md §1,
//! §6). This crate only builds these trees and hands them to the external
//! `assemble`/`load` collaborators (`src/host.rs`); it never interprets them.
//!
//! Grounded on the teacher's `bytecode/builder.rs` `CodeBuilder` — here
//! adapted from incremental stack-bytecode emission with jump-patching to
//! tree-shaped IR construction, since the host accepts whole Core IR module
//! trees rather than a linear instruction stream.

use serde::{Deserialize, Serialize};

use crate::intern::StringId;

/// A literal value lowered directly into Core IR (spec.md §4.3 `constant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IrLiteral {
    Nil,
    Bool(bool),
    Int(i64),
    /// Decimal text of a big integer too large for `i64`.
    BigInt(String),
    /// Numerator/denominator decimal text, already in lowest terms
    /// (spec.md §3 `Value::Ratio` invariant).
    Ratio { numer: String, denom: String },
    Float(f64),
    /// `unscaled * 10^-scale` (spec.md §3 `Value::BigDecimal`).
    BigDecimal { unscaled: String, scale: i32 },
    Char(char),
    Str(String),
    Keyword { ns: Option<String>, name: String },
    Symbol { ns: Option<String>, name: String },
    Regex(String),
}

/// One Core IR expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IrExpr {
    Literal(IrLiteral),
    /// Reference to a lambda parameter or `let`-bound local, by de Bruijn-ish
    /// slot index assigned during emission.
    LocalRef(u32),
    /// Reference to a namespace-qualified Var.
    VarRef { ns: String, name: String },
    /// Function application; `direct` mirrors spec.md §4.3's invoke tie-break
    /// ("if callee resolves to a known arity of a known function, direct
    /// call; otherwise a dynamic-apply").
    Apply {
        callee: Box<IrExpr>,
        args: Vec<IrExpr>,
        direct: bool,
    },
    /// A closure value: captures plus one or more arity bodies.
    Lambda {
        name: Option<String>,
        arities: Vec<IrLambdaArity>,
    },
    Let {
        bindings: Vec<(u32, IrExpr)>,
        body: Box<IrExpr>,
    },
    /// A named `letrec` wrapping a loop body, enabling tail-`recur` to
    /// compile to a direct jump back to the binder (spec.md §4.3 `loop`).
    LetRec {
        loop_name: String,
        params: Vec<u32>,
        init: Vec<IrExpr>,
        body: Box<IrExpr>,
    },
    /// Tail call to an enclosing `LetRec`'s loop name — the Core IR shape
    /// `recur` lowers to (spec.md §4.3 `recur`).
    TailCall { loop_name: String, args: Vec<IrExpr> },
    If {
        cond: Box<IrExpr>,
        then: Box<IrExpr>,
        else_: Box<IrExpr>,
    },
    Case {
        scrutinee: Box<IrExpr>,
        clauses: Vec<(Vec<IrLiteral>, IrExpr)>,
        default: Box<IrExpr>,
    },
    Seq(Vec<IrExpr>),
    Try {
        body: Box<IrExpr>,
        catches: Vec<IrCatch>,
        finally: Option<Box<IrExpr>>,
    },
    Throw(Box<IrExpr>),
    Tuple(Vec<IrExpr>),
    VectorLit(Vec<IrExpr>),
    SetLit(Vec<IrExpr>),
    MapLit(Vec<(IrExpr, IrExpr)>),
    Binary { segments: Vec<IrBinarySegment> },
    Receive {
        clauses: Vec<(IrExpr, IrExpr)>,
        after: Option<(Box<IrExpr>, Box<IrExpr>)>,
    },
    /// A new type/record instance: `{ :type TypeName, field1, field2, ... }`
    /// (spec.md §4.3 `deftype`).
    RecordLit { type_name: String, fields: Vec<IrExpr> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrLambdaArity {
    pub fixed_arity: usize,
    pub is_variadic: bool,
    pub params: Vec<u32>,
    pub body: IrExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrCatch {
    pub class: Option<String>,
    pub binding: u32,
    pub body: IrExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrBinarySegment {
    pub value: IrExpr,
    pub size: Option<Box<IrExpr>>,
    pub unit: Option<u32>,
    pub segment_type: String,
}

/// One top-level function in a module (spec.md §3 "Module-in-progress").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub arity: usize,
    pub is_variadic: bool,
    pub exported: bool,
    pub params: Vec<u32>,
    pub body: IrExpr,
}

/// One finalized Core IR module tree, ready for `assemble` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrModule {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub functions: Vec<IrFunction>,
    pub on_load: Option<IrExpr>,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            functions: Vec::new(),
            on_load: None,
        }
    }
}

/// Interns a `StringId`'s text into an owned `String` for embedding in a
/// Core IR tree, which — unlike the in-process analyzer — must be
/// self-contained once handed to the external assembler.
pub fn resolve_owned(interner: &crate::intern::Interner, id: StringId) -> String {
    interner.resolve(id).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_starts_with_no_functions() {
        let module = IrModule::new("ex");
        assert!(module.functions.is_empty());
        assert!(module.on_load.is_none());
    }
}
