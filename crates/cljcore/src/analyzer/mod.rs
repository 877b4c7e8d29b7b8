//! The analyzer (spec.md §4.2): macroexpansion, lexical resolution, and
//! lowering into the typed AST (`src/ast.rs`).
//!
//! Grounded on the teacher's `prepare.rs` AST-lowering-with-scope pattern.
//! Resolution of shared mutable state (Var interning, protocol/type
//! registration) happens through the registries each node is handed by
//! reference, rather than by threading an updated `Env` back out of every
//! call — `Env`'s role here is purely the immutable-with-copy-on-push
//! lexical/namespace *view* spec.md §3 describes; the process-wide
//! registries (`NamespaceRegistry`, `Registries`) are where side effects
//! actually land (DESIGN.md records this as the Open Question resolution
//! for spec.md §2's "yields an AST node plus an updated environment").

pub mod macroexpand;
pub mod protocol;
pub mod specials;

use std::sync::Arc;

use crate::{
    ast::{Node, NodeMeta},
    config::CompileOpts,
    env::{Env, VarHandle},
    error::{CResult, CompileError, ErrorKind},
    intern::{Interner, Symbol},
    reader::{Form, Value},
    tracer::CompilerTracer,
};

pub use macroexpand::{MacroExpander, NoMacros};
pub use protocol::Registries;

/// Everything an `analyze` call needs besides the form and `Env` itself:
/// the interner (mutated as new symbols are seen during `defType`/`new`
/// resolution), the protocol/type registries, per-compile options, the
/// injected macro expander, and the tracer.
pub struct AnalyzeCtx<'a, M: MacroExpander, T: CompilerTracer> {
    pub interner: &'a mut Interner,
    pub registries: &'a Registries,
    pub opts: &'a CompileOpts,
    pub expander: &'a mut M,
    pub tracer: &'a mut T,
}

/// Analyzes one top-level form. Top-level `do` is flattened here (spec.md
/// §4.2: "each child is analyzed individually so module side effects occur
/// in order") — everything else lowers to a single `Node`.
pub fn analyze_top_level<M: MacroExpander, T: CompilerTracer>(form: &Value, env: &Env, ctx: &mut AnalyzeCtx<M, T>) -> CResult<Vec<Node>> {
    let expanded = macroexpand::macroexpand(form, env, ctx.interner, ctx.expander, ctx.tracer)?;
    if let Value::List(items) = &expanded {
        if let Some(head) = items.first().and_then(|f| f.value.as_symbol()) {
            if head.ns.is_none() && ctx.interner.resolve(head.name) == "do" {
                let mut nodes = Vec::with_capacity(items.len() - 1);
                for child in &items[1..] {
                    nodes.push(analyze(&child.value, env, ctx)?);
                }
                return Ok(nodes);
            }
        }
    }
    Ok(vec![analyze(&expanded, env, ctx)?])
}

/// Analyzes one form in an arbitrary (not necessarily tail) position.
pub fn analyze<M: MacroExpander, T: CompilerTracer>(form: &Value, env: &Env, ctx: &mut AnalyzeCtx<M, T>) -> CResult<Node> {
    let expanded = macroexpand::macroexpand(form, env, ctx.interner, ctx.expander, ctx.tracer)?;
    let meta = NodeMeta::new(expanded.clone(), None);

    match &expanded {
        Value::Nil
        | Value::Bool(_)
        | Value::Int(_)
        | Value::BigInt(_)
        | Value::Ratio(..)
        | Value::Float(_)
        | Value::BigDecimal { .. }
        | Value::Char(_)
        | Value::Str(_)
        | Value::Regex(_)
        | Value::Inst(_)
        | Value::Uuid(_) => {
            ctx.tracer.on_ast_node("constant");
            Ok(Node::Constant { meta, value: expanded })
        }
        Value::Keyword(_) => {
            ctx.tracer.on_ast_node("constant");
            Ok(Node::Constant { meta, value: expanded })
        }
        Value::Symbol(sym) => analyze_symbol(*sym, meta, env, ctx),
        Value::Vector(items) => {
            let inner_env = env.with_tail_position(false);
            let items = items.iter().map(|f| analyze(&f.value, &inner_env, ctx)).collect::<CResult<_>>()?;
            ctx.tracer.on_ast_node("vector");
            Ok(Node::Vector { meta, items })
        }
        Value::Set(items) => {
            let inner_env = env.with_tail_position(false);
            let items = items.iter().map(|f| analyze(&f.value, &inner_env, ctx)).collect::<CResult<_>>()?;
            ctx.tracer.on_ast_node("set");
            Ok(Node::Set { meta, items })
        }
        Value::Map(entries) => {
            let inner_env = env.with_tail_position(false);
            let entries = entries
                .iter()
                .map(|(k, v)| Ok((analyze(&k.value, &inner_env, ctx)?, analyze(&v.value, &inner_env, ctx)?)))
                .collect::<CResult<_>>()?;
            ctx.tracer.on_ast_node("map");
            Ok(Node::Map { meta, entries })
        }
        Value::List(items) => analyze_list(items, meta, env, ctx),
        Value::Tagged(_, inner) => analyze(&inner.value, env, ctx),
        Value::ReaderConditional { .. } => Err(CompileError::new(
            ErrorKind::UnknownFeature,
            "unresolved reader conditional reached the analyzer",
        )),
    }
}

fn analyze_symbol<M: MacroExpander, T: CompilerTracer>(sym: Symbol, meta: NodeMeta, env: &Env, ctx: &mut AnalyzeCtx<M, T>) -> CResult<Node> {
    if let Some(local) = env.resolve_local(sym.name) {
        if sym.ns.is_none() {
            ctx.tracer.on_ast_node("local");
            return Ok(Node::Local {
                meta,
                name: sym,
                binding_id: local.id,
            });
        }
    }
    if let Some(var) = resolve_var(&sym, env, ctx.interner) {
        ctx.tracer.on_ast_node("var");
        return Ok(Node::Var { meta, var });
    }
    // `Type/staticMember`-shaped symbols resolve as host-type references
    // when nothing else matches (spec.md §4.2 resolution order, last step
    // before `Unresolved`).
    if sym.ns.is_some() {
        ctx.tracer.on_ast_node("type");
        return Ok(Node::Type { meta, name: sym });
    }
    Err(CompileError::new(
        ErrorKind::UnresolvedSymbol,
        format!("unable to resolve symbol: {}", sym.display(ctx.interner)),
    ))
}

/// Name resolution for a bare symbol against Vars, following spec.md §4.2's
/// order past locals: current namespace interns → aliases → referred
/// mappings → global by qualified name.
pub fn resolve_var(sym: &Symbol, env: &Env, interner: &Interner) -> Option<VarHandle> {
    if let Some(ns_text) = sym.ns {
        let ns_name = interner.resolve(ns_text);
        return env.namespaces.resolve_qualified(interner, ns_name, sym.name);
    }
    env.namespaces.resolve_in_ns(env.current_ns, sym.name)
}

fn analyze_list<M: MacroExpander, T: CompilerTracer>(items: &Arc<Vec<Form>>, meta: NodeMeta, env: &Env, ctx: &mut AnalyzeCtx<M, T>) -> CResult<Node> {
    if items.is_empty() {
        return Ok(Node::Constant {
            meta,
            value: Value::List(items.clone()),
        });
    }
    let head = &items[0];
    if let Value::Symbol(head_sym) = &head.value {
        if head_sym.ns.is_none() {
            let head_text = ctx.interner.resolve(head_sym.name).to_owned();
            if specials::is_special_form(&head_text) {
                ctx.tracer.on_special_form(&head_text);
                return specials::analyze_special(&head_text, items, meta, env, ctx);
            }
        }
    }
    analyze_invoke(items, meta, env, ctx)
}

fn analyze_invoke<M: MacroExpander, T: CompilerTracer>(items: &[Form], meta: NodeMeta, env: &Env, ctx: &mut AnalyzeCtx<M, T>) -> CResult<Node> {
    let inner_env = env.with_tail_position(false);
    let callee = Box::new(analyze(&items[0].value, &inner_env, ctx)?);
    let args = items[1..].iter().map(|f| analyze(&f.value, &inner_env, ctx)).collect::<CResult<_>>()?;
    ctx.tracer.on_ast_node("invoke");
    Ok(Node::Invoke { meta, callee, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::NamespaceRegistry,
        reader::{Reader, ReaderOpts},
    };

    fn analyze_source(source: &str) -> (Node, Interner) {
        let mut interner = Interner::new();
        let ns = interner.intern("user");
        let form = {
            let mut reader = Reader::new(source, &mut interner, ReaderOpts::default());
            reader.read_one().unwrap().unwrap()
        };
        let env = Env::new(Arc::new(NamespaceRegistry::new()), ns);
        let registries = Registries::new();
        let opts = CompileOpts::default();
        let mut expander = NoMacros;
        let mut tracer = crate::tracer::NoopTracer;
        let mut ctx = AnalyzeCtx {
            interner: &mut interner,
            registries: &registries,
            opts: &opts,
            expander: &mut expander,
            tracer: &mut tracer,
        };
        let node = analyze(&form.value, &env, &mut ctx).unwrap();
        drop(ctx);
        (node, interner)
    }

    #[test]
    fn analyzes_constant_literal() {
        let (node, _) = analyze_source("1");
        assert!(matches!(node, Node::Constant { value: Value::Int(1), .. }));
    }

    #[test]
    fn analyzes_plain_invocation() {
        let (node, _) = analyze_source("(foo 1 2)");
        match node {
            Node::Invoke { args, .. } => assert_eq!(args.len(), 2),
            other => panic!("expected invoke, got {other:?}"),
        }
    }

    #[test]
    fn unresolved_symbol_is_an_error() {
        let mut interner = Interner::new();
        let ns = interner.intern("user");
        let form = {
            let mut reader = Reader::new("totally-unbound-name", &mut interner, ReaderOpts::default());
            reader.read_one().unwrap().unwrap()
        };
        let env = Env::new(Arc::new(NamespaceRegistry::new()), ns);
        let registries = Registries::new();
        let opts = CompileOpts::default();
        let mut expander = NoMacros;
        let mut tracer = crate::tracer::NoopTracer;
        let mut ctx = AnalyzeCtx {
            interner: &mut interner,
            registries: &registries,
            opts: &opts,
            expander: &mut expander,
            tracer: &mut tracer,
        };
        let err = analyze(&form.value, &env, &mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedSymbol);
    }
}
