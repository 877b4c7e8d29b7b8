//! Protocol dispatch lowering (spec.md §4.4 "Protocol dispatch lowering").
//!
//! A `defprotocol` P is lowered to a module named P exporting each method as
//! a flat `case` dispatch on the first argument's type tag: one clause per
//! implementing type (primitives in declaration order, then tagged records
//! alphabetically — the frozen ordering recorded in DESIGN.md), a clause for
//! untagged records, and a catch-all, both `NotImplemented`.
//!
//! Grounded on `analyzer/protocol.rs`'s `Registries::ordered_implementors`,
//! which already produces implementors in that frozen order; this module
//! only has to turn each one into a `case` clause plus call through to the
//! implementing module's generated method function.

use crate::{
    analyzer::protocol::Registries,
    core_ir::{IrExpr, IrFunction, IrLiteral},
    env::Env,
    error::CResult,
    intern::{Interner, Symbol},
    module_ctx::ModuleContext,
};

use super::var_ref;

fn type_tag_of(local_id: u32) -> IrExpr {
    IrExpr::Apply {
        callee: Box::new(var_ref("$compiler", "type-tag")),
        args: vec![IrExpr::LocalRef(local_id)],
        direct: false,
    }
}

/// `(throw ($compiler/not-implemented! protocol method value))` — spec.md
/// §4.4's `NotImplemented{protocol,method,value_type}` kind, carried as a
/// host-call rather than a Rust-level error since it is raised at the
/// host VM's runtime, not at this crate's compile time.
fn not_implemented_throw(protocol_name: &str, method_name: &str, first_param: u32) -> IrExpr {
    IrExpr::Throw(Box::new(IrExpr::Apply {
        callee: Box::new(var_ref("$compiler", "not-implemented!")),
        args: vec![
            IrExpr::Literal(IrLiteral::Str(protocol_name.to_owned())),
            IrExpr::Literal(IrLiteral::Str(method_name.to_owned())),
            type_tag_of(first_param),
        ],
        direct: false,
    }))
}

/// Builds one arity's dispatch function for `method_name` (spec.md §4.4).
fn dispatch_function(
    interner: &Interner,
    registries: &Registries,
    protocol_name: Symbol,
    protocol_display: &str,
    method_name: &str,
    arity: usize,
    env: &Env,
) -> IrFunction {
    let params: Vec<u32> = (0..arity).map(|_| env.next_local_id()).collect();
    let first_param = params[0];

    let implementors = registries.ordered_implementors(interner, protocol_name.name).unwrap_or_default();
    let mut clauses = Vec::with_capacity(implementors.len() + 1);
    for implementor in &implementors {
        let type_name = interner.resolve(implementor.type_name.name).to_owned();
        // Primitive extensions live in the compiler-provided runtime
        // rather than in any user namespace; tagged-record extensions
        // call back into the `{home_ns}.{type_name}` module that
        // `emitter::emit_protocol_impl` populated (spec.md §4.3 `deftype`).
        let callee_ns = if implementor.is_primitive {
            "$compiler".to_owned()
        } else {
            format!("{}.{type_name}", interner.resolve(implementor.home_ns))
        };
        let call = IrExpr::Apply {
            callee: Box::new(var_ref(callee_ns, format!("{protocol_display}${method_name}"))),
            args: params.iter().map(|p| IrExpr::LocalRef(*p)).collect(),
            direct: false,
        };
        clauses.push((vec![IrLiteral::Keyword { ns: None, name: type_name }], call));
    }
    // Untagged-record clause (spec.md §4.4: "a clause matching untagged
    // records (emits NotImplemented)") — distinct from the final catch-all
    // so a record whose `:type` tag carries no registered implementor gets
    // the same diagnostic as a record with no `:type` tag at all.
    clauses.push((
        vec![IrLiteral::Keyword { ns: None, name: "record".to_owned() }],
        not_implemented_throw(protocol_display, method_name, first_param),
    ));

    IrFunction {
        name: method_name.to_owned(),
        arity,
        is_variadic: false,
        exported: true,
        params: params.clone(),
        body: IrExpr::Case {
            scrutinee: Box::new(type_tag_of(first_param)),
            clauses,
            default: Box::new(not_implemented_throw(protocol_display, method_name, first_param)),
        },
    }
}

/// `satisfies?(P, x)`: a boolean-returning predicate over the same
/// discriminator used for dispatch (spec.md §4.4).
fn satisfies_function(interner: &Interner, registries: &Registries, protocol_name: Symbol, env: &Env) -> IrFunction {
    let x = env.next_local_id();
    let implementors = registries.ordered_implementors(interner, protocol_name.name).unwrap_or_default();
    let clauses = implementors
        .iter()
        .map(|i| {
            (
                vec![IrLiteral::Keyword { ns: None, name: interner.resolve(i.type_name.name).to_owned() }],
                IrExpr::Literal(IrLiteral::Bool(true)),
            )
        })
        .collect();
    IrFunction {
        name: "satisfies?".to_owned(),
        arity: 1,
        is_variadic: false,
        exported: true,
        params: vec![x],
        body: IrExpr::Case {
            scrutinee: Box::new(type_tag_of(x)),
            clauses,
            default: Box::new(IrExpr::Literal(IrLiteral::Bool(false))),
        },
    }
}

/// `extenders(P)`: the static set of implementing types, in dispatch order
/// (spec.md §4.4: "`extenders` returns the static set").
fn extenders_function(interner: &Interner, registries: &Registries, protocol_name: Symbol) -> IrFunction {
    let implementors = registries.ordered_implementors(interner, protocol_name.name).unwrap_or_default();
    let elems = implementors
        .iter()
        .map(|i| {
            IrExpr::Literal(IrLiteral::Symbol {
                ns: None,
                name: interner.resolve(i.type_name.name).to_owned(),
            })
        })
        .collect();
    IrFunction {
        name: "extenders".to_owned(),
        arity: 0,
        is_variadic: false,
        exported: true,
        params: vec![],
        body: IrExpr::VectorLit(elems),
    }
}

/// (Re)emits the dispatch module for `protocol_name` into `module_ctx`,
/// replacing any previously-emitted version (spec.md §4.4: "`extend-type`
/// appends a branch to the dispatch body and re-emits the module"; spec.md
/// §9 "a protocol's dispatch module is (re)emitted whenever an extending
/// type is added"). `ns_name` is unused for the module's own name (the
/// dispatch module is named after the protocol itself, spec.md §4.4) but is
/// accepted for symmetry with the rest of `emitter::emit_top_level`'s
/// top-level-form signatures and to leave room for a namespace-qualified
/// protocol-module name in a future multi-namespace build.
pub fn emit_protocol_dispatch_module(
    interner: &Interner,
    registries: &Registries,
    env: &Env,
    module_ctx: &mut ModuleContext,
    _ns_name: &str,
    protocol_name: Symbol,
) -> CResult<()> {
    let protocol_display = protocol_name.display(interner).to_string();
    let methods = registries.protocol_methods(protocol_name.name).unwrap_or_default();

    let module = module_ctx.module_mut(&protocol_display);
    for method in &methods {
        let method_name = interner.resolve(method.name.name).to_owned();
        for &arity in &method.arities {
            let function = dispatch_function(interner, registries, protocol_name, &protocol_display, &method_name, arity, env);
            module.upsert_function(function);
        }
    }
    module.upsert_function(satisfies_function(interner, registries, protocol_name, env));
    module.upsert_function(extenders_function(interner, registries, protocol_name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analyzer::protocol::Registries, ast::ProtocolMethodSig, env::NamespaceRegistry};
    use std::sync::Arc;

    fn fresh() -> (Env, Interner) {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        (Env::new(Arc::new(NamespaceRegistry::new()), ns), interner)
    }

    #[test]
    fn dispatch_module_has_one_clause_per_implementor_plus_two() {
        let (env, mut interner) = fresh();
        let p = Symbol::unqualified(interner.intern("P"));
        let t1 = Symbol::unqualified(interner.intern("T1"));
        let t2 = Symbol::unqualified(interner.intern("T2"));
        let registries = Registries::new();
        registries.register_protocol(p, vec![ProtocolMethodSig { name: Symbol::unqualified(interner.intern("m")), arities: vec![1] }]);
        registries.register_extension(p, t1, false, env.current_ns);
        registries.register_extension(p, t2, false, env.current_ns);

        let mut module_ctx = ModuleContext::new();
        emit_protocol_dispatch_module(&interner, &registries, &env, &mut module_ctx, "ex", p).unwrap();
        let module = module_ctx.module("P").unwrap();
        let m = module.functions().iter().find(|f| f.name == "m").unwrap();
        match &m.body {
            IrExpr::Case { clauses, .. } => assert_eq!(clauses.len(), 3), // 2 implementors + untagged-record
            other => panic!("expected a case, got {other:?}"),
        }
    }

    #[test]
    fn satisfies_and_extenders_are_always_emitted() {
        let (env, mut interner) = fresh();
        let p = Symbol::unqualified(interner.intern("P"));
        let registries = Registries::new();
        registries.register_protocol(p, vec![]);
        let mut module_ctx = ModuleContext::new();
        emit_protocol_dispatch_module(&interner, &registries, &env, &mut module_ctx, "ex", p).unwrap();
        let module = module_ctx.module("P").unwrap();
        assert!(module.functions().iter().any(|f| f.name == "satisfies?"));
        assert!(module.functions().iter().any(|f| f.name == "extenders"));
    }
}
