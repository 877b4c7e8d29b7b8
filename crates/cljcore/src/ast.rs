//! The analyzer's typed AST (spec.md §3): a closed, 40-tag node set.
//!
//! Grounded on the teacher's `expressions.rs` (`Expr`/`Node<T>`): every node
//! shares a small common envelope (`op`, `env` snapshot, `form`, optional type
//! `tag`) and carries tag-specific fields in its own struct, joined by one
//! flat enum rather than forty separate top-level types.

use std::sync::Arc;

use crate::{
    env::{Env, LoopId, VarHandle},
    intern::{Keyword, Symbol},
    pos::SourceSpan,
    reader::value::Value,
};

/// Every node carries the form it was analyzed from and, for diagnostics, a
/// snapshot of the span it was read at. `env` itself is not stored per-node
/// (the live `Env` is threaded through the analyzer instead) — spec.md §3
/// calls this a "captured env snapshot for diagnostics"; we keep only the
/// span, which is what every diagnostic actually needs, and avoid cloning the
/// whole lexical-frame stack at every node.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub form: Value,
    pub span: Option<SourceSpan>,
    pub tag: Option<Box<Node>>,
}

impl NodeMeta {
    pub fn new(form: Value, span: Option<SourceSpan>) -> Self {
        Self { form, span, tag: None }
    }
}

/// One AST node. The 40 variants are exactly the set enumerated in spec.md §3.
#[derive(Debug, Clone)]
pub enum Node {
    Constant {
        meta: NodeMeta,
        value: Value,
    },
    Quote {
        meta: NodeMeta,
        expr: Value,
    },
    Local {
        meta: NodeMeta,
        name: Symbol,
        binding_id: u32,
    },
    Binding {
        meta: NodeMeta,
        name: Symbol,
        binding_id: u32,
        init: Box<Node>,
    },
    Fn {
        meta: NodeMeta,
        local_name: Option<Symbol>,
        methods: Vec<FnMethod>,
        variadic: bool,
        min_fixed_arity: usize,
        max_fixed_arity: usize,
        once: bool,
    },
    FnMethod {
        meta: NodeMeta,
        loop_id: LoopId,
        fixed_arity: usize,
        is_variadic: bool,
        params: Vec<Symbol>,
        body: Box<Node>,
    },
    Do {
        meta: NodeMeta,
        statements: Vec<Node>,
        ret: Box<Node>,
    },
    If {
        meta: NodeMeta,
        test: Box<Node>,
        then: Box<Node>,
        else_: Option<Box<Node>>,
    },
    Let {
        meta: NodeMeta,
        bindings: Vec<Node>,
        body: Box<Node>,
    },
    Loop {
        meta: NodeMeta,
        loop_id: LoopId,
        bindings: Vec<Node>,
        body: Box<Node>,
    },
    Recur {
        meta: NodeMeta,
        loop_id: LoopId,
        exprs: Vec<Node>,
    },
    LetFn {
        meta: NodeMeta,
        bindings: Vec<Node>,
        body: Box<Node>,
    },
    Case {
        meta: NodeMeta,
        test: Box<Node>,
        clauses: Vec<(Vec<Value>, Node)>,
        default: Box<Node>,
    },
    ErlMap {
        meta: NodeMeta,
        entries: Vec<(Node, Node)>,
    },
    ErlList {
        meta: NodeMeta,
        items: Vec<Node>,
        tail: Option<Box<Node>>,
    },
    ErlBinary {
        meta: NodeMeta,
        segments: Vec<Node>,
    },
    BinarySegment {
        meta: NodeMeta,
        value: Box<Node>,
        size: Option<Box<Node>>,
        unit: Option<u32>,
        segment_type: Symbol,
    },
    Tuple {
        meta: NodeMeta,
        items: Vec<Node>,
    },
    Def {
        meta: NodeMeta,
        var: VarHandle,
        init: Option<Box<Node>>,
        is_dynamic: bool,
        is_macro: bool,
    },
    Import {
        meta: NodeMeta,
        target: Symbol,
    },
    New {
        meta: NodeMeta,
        type_name: Symbol,
        args: Vec<Node>,
    },
    ResolveType {
        meta: NodeMeta,
        type_name: Symbol,
    },
    DefType {
        meta: NodeMeta,
        name: Symbol,
        fields: Vec<Symbol>,
        implements: Vec<ProtocolImpl>,
    },
    DefProtocol {
        meta: NodeMeta,
        name: Symbol,
        methods: Vec<ProtocolMethodSig>,
    },
    ExtendType {
        meta: NodeMeta,
        type_name: Symbol,
        implements: Vec<ProtocolImpl>,
    },
    Invoke {
        meta: NodeMeta,
        callee: Box<Node>,
        args: Vec<Node>,
    },
    Throw {
        meta: NodeMeta,
        exception: Box<Node>,
    },
    Try {
        meta: NodeMeta,
        body: Box<Node>,
        catches: Vec<Catch>,
        finally: Option<Box<Node>>,
    },
    Catch {
        meta: NodeMeta,
        class: CatchClass,
        binding_id: u32,
        stacktrace_binding_id: Option<u32>,
        body: Box<Node>,
    },
    ErlFun {
        meta: NodeMeta,
        module: Option<Symbol>,
        name: Symbol,
        arity: usize,
    },
    Var {
        meta: NodeMeta,
        var: VarHandle,
    },
    Type {
        meta: NodeMeta,
        name: Symbol,
    },
    WithMeta {
        meta: NodeMeta,
        expr: Box<Node>,
        node_meta: Box<Node>,
    },
    Vector {
        meta: NodeMeta,
        items: Vec<Node>,
    },
    Set {
        meta: NodeMeta,
        items: Vec<Node>,
    },
    Map {
        meta: NodeMeta,
        entries: Vec<(Node, Node)>,
    },
    Receive {
        meta: NodeMeta,
        clauses: Vec<(Node, Node)>,
        after: Option<Box<Node>>,
    },
    After {
        meta: NodeMeta,
        timeout: Box<Node>,
        body: Box<Node>,
    },
    ErlAlias {
        meta: NodeMeta,
        pattern: Box<Node>,
        alias_binding_id: u32,
    },
    OnLoad {
        meta: NodeMeta,
        body: Box<Node>,
    },
}

/// One arity method of a `fn*` (spec.md §4.2 "`fn*` lowering").
#[derive(Debug, Clone)]
pub struct FnMethod {
    pub loop_id: LoopId,
    pub fixed_arity: usize,
    pub is_variadic: bool,
    pub params: Vec<Symbol>,
    /// Local-binding ids assigned to `params`, in order, plus the self-local
    /// (if the enclosing `fn*` is named) prepended when present — the
    /// emitter needs these to build `IrLambdaArity::params` (`src/emitter/mod.rs`).
    pub param_ids: Vec<u32>,
    pub body: Node,
}

/// One `catch` clause target (spec.md §4.2 "`try`/`catch`/`finally`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchClass {
    Class(Symbol),
    Default,
}

/// One `catch` clause.
#[derive(Debug, Clone)]
pub struct Catch {
    pub class: CatchClass,
    pub binding_id: u32,
    pub stacktrace_binding_id: Option<u32>,
    pub body: Node,
}

/// One protocol method signature in a `defprotocol` (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct ProtocolMethodSig {
    pub name: Symbol,
    pub arities: Vec<usize>,
}

/// One implemented protocol method body in `deftype`/`extend-type`.
#[derive(Debug, Clone)]
pub struct ProtocolImpl {
    pub protocol: Symbol,
    pub methods: Vec<ProtocolMethodImpl>,
}

#[derive(Debug, Clone)]
pub struct ProtocolMethodImpl {
    pub name: Symbol,
    pub params: Vec<Symbol>,
    /// Local-binding ids assigned to `params` (first is conventionally the
    /// receiver/`this`) — mirrors `FnMethod::param_ids`.
    pub param_ids: Vec<u32>,
    pub body: Node,
}

impl Node {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Node::Constant { meta, .. }
            | Node::Quote { meta, .. }
            | Node::Local { meta, .. }
            | Node::Binding { meta, .. }
            | Node::Fn { meta, .. }
            | Node::FnMethod { meta, .. }
            | Node::Do { meta, .. }
            | Node::If { meta, .. }
            | Node::Let { meta, .. }
            | Node::Loop { meta, .. }
            | Node::Recur { meta, .. }
            | Node::LetFn { meta, .. }
            | Node::Case { meta, .. }
            | Node::ErlMap { meta, .. }
            | Node::ErlList { meta, .. }
            | Node::ErlBinary { meta, .. }
            | Node::BinarySegment { meta, .. }
            | Node::Tuple { meta, .. }
            | Node::Def { meta, .. }
            | Node::Import { meta, .. }
            | Node::New { meta, .. }
            | Node::ResolveType { meta, .. }
            | Node::DefType { meta, .. }
            | Node::DefProtocol { meta, .. }
            | Node::ExtendType { meta, .. }
            | Node::Invoke { meta, .. }
            | Node::Throw { meta, .. }
            | Node::Try { meta, .. }
            | Node::Catch { meta, .. }
            | Node::ErlFun { meta, .. }
            | Node::Var { meta, .. }
            | Node::Type { meta, .. }
            | Node::WithMeta { meta, .. }
            | Node::Vector { meta, .. }
            | Node::Set { meta, .. }
            | Node::Map { meta, .. }
            | Node::Receive { meta, .. }
            | Node::After { meta, .. }
            | Node::ErlAlias { meta, .. }
            | Node::OnLoad { meta, .. } => meta,
        }
    }

    /// The tag name, matching spec.md §3's exhaustive op list verbatim.
    pub fn op(&self) -> &'static str {
        match self {
            Node::Constant { .. } => "constant",
            Node::Quote { .. } => "quote",
            Node::Local { .. } => "local",
            Node::Binding { .. } => "binding",
            Node::Fn { .. } => "fn",
            Node::FnMethod { .. } => "fn_method",
            Node::Do { .. } => "do",
            Node::If { .. } => "if",
            Node::Let { .. } => "let",
            Node::Loop { .. } => "loop",
            Node::Recur { .. } => "recur",
            Node::LetFn { .. } => "letfn",
            Node::Case { .. } => "case",
            Node::ErlMap { .. } => "erl_map",
            Node::ErlList { .. } => "erl_list",
            Node::ErlBinary { .. } => "erl_binary",
            Node::BinarySegment { .. } => "binary_segment",
            Node::Tuple { .. } => "tuple",
            Node::Def { .. } => "def",
            Node::Import { .. } => "import",
            Node::New { .. } => "new",
            Node::ResolveType { .. } => "resolve_type",
            Node::DefType { .. } => "deftype",
            Node::DefProtocol { .. } => "defprotocol",
            Node::ExtendType { .. } => "extend_type",
            Node::Invoke { .. } => "invoke",
            Node::Throw { .. } => "throw",
            Node::Try { .. } => "try",
            Node::Catch { .. } => "catch",
            Node::ErlFun { .. } => "erl_fun",
            Node::Var { .. } => "var",
            Node::Type { .. } => "type",
            Node::WithMeta { .. } => "with_meta",
            Node::Vector { .. } => "vector",
            Node::Set { .. } => "set",
            Node::Map { .. } => "map",
            Node::Receive { .. } => "receive",
            Node::After { .. } => "after",
            Node::ErlAlias { .. } => "erl_alias",
            Node::OnLoad { .. } => "on_load",
        }
    }
}

/// A node's `form` wrapped in an `Arc` for cheap structural sharing when the
/// same literal form is lifted into several places (e.g. a quoted sub-form
/// referenced from both `Quote` and an enclosing `with_meta`).
pub type SharedForm = Arc<Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names_match_spec_tag_set() {
        let meta = NodeMeta::new(Value::Nil, None);
        let node = Node::Constant { meta, value: Value::Nil };
        assert_eq!(node.op(), "constant");
    }
}
