//! Macroexpansion (spec.md §4.2).
//!
//! The compiler must evaluate compiler-time code (spec.md §9 "Macro
//! evaluation"): a macro's body actually runs on the host VM, which this
//! crate never embeds. [`MacroExpander`] is the injected collaborator that
//! performs that evaluation; the analyzer's job is only to recognize when a
//! list head resolves to a macro Var and to iterate expansion to a fixed
//! point.

use crate::{
    env::{Env, VarHandle},
    error::{CResult, CompileError, ErrorKind},
    reader::Value,
};

/// Invokes a macro Var's function body against the unevaluated call form,
/// delegated to the host VM (spec.md §9). A fresh top-level form is
/// bootstrapped by emitting and immediately loading it before analyzing the
/// next one, so by the time a macro call is analyzed its defining namespace
/// has already been compiled and loaded (spec.md §9 "Bootstrap").
pub trait MacroExpander {
    fn expand(&mut self, macro_var: &VarHandle, call_form: &Value, env: &Env) -> CResult<Value>;
}

/// A `MacroExpander` for compile sessions with no macro support yet wired
/// up (e.g. unit tests exercising the reader/analyzer without a live host).
/// Any attempted macro call fails loudly rather than silently no-op'ing.
#[derive(Debug, Default)]
pub struct NoMacros;

impl MacroExpander for NoMacros {
    fn expand(&mut self, macro_var: &VarHandle, _call_form: &Value, _env: &Env) -> CResult<Value> {
        Err(CompileError::new(
            ErrorKind::MacroExpansionFailed,
            format!("no macro expander configured to invoke {}", macro_var.name.index()),
        ))
    }
}

/// Expands `form` to a fixed point if it is a macro call, per spec.md §4.2:
/// "Expansion is iterated until a fixed point or a non-list is produced.
/// Special forms are never macro-expanded even if a macro of the same name
/// is visible."
pub fn macroexpand(
    form: &Value,
    env: &Env,
    interner: &crate::intern::Interner,
    expander: &mut impl MacroExpander,
    tracer: &mut impl crate::tracer::CompilerTracer,
) -> CResult<Value> {
    let mut current = form.clone();
    let mut step = 0u32;
    loop {
        let Value::List(items) = &current else {
            return Ok(current);
        };
        let Some(head_form) = items.first() else {
            return Ok(current);
        };
        let Value::Symbol(head_sym) = &head_form.value else {
            return Ok(current);
        };
        let head_text = interner.resolve(head_sym.name);
        if super::specials::is_special_form(head_text) {
            return Ok(current);
        }
        let Some(var) = super::resolve_var(head_sym, env, interner) else {
            return Ok(current);
        };
        if !var.is_macro.load(std::sync::atomic::Ordering::Relaxed) {
            return Ok(current);
        }
        step += 1;
        tracer.on_macroexpand_step(interner.resolve(var.name), step);
        current = expander
            .expand(&var, &current, env)
            .map_err(|cause| CompileError::wrap(ErrorKind::MacroExpansionFailed, format!("expanding {}", interner.resolve(var.name)), cause))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::NamespaceRegistry,
        intern::{Interner, Symbol},
    };
    use std::sync::Arc;

    #[test]
    fn non_list_forms_return_unchanged() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let env = Env::new(Arc::new(NamespaceRegistry::new()), ns);
        let mut expander = NoMacros;
        let mut tracer = crate::tracer::NoopTracer;
        let form = Value::Int(1);
        let result = macroexpand(&form, &env, &interner, &mut expander, &mut tracer).unwrap();
        assert_eq!(result, Value::Int(1));
    }

    #[test]
    fn special_forms_are_never_expanded() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let env = Env::new(Arc::new(NamespaceRegistry::new()), ns);
        let mut expander = NoMacros;
        let mut tracer = crate::tracer::NoopTracer;
        let if_sym = interner.intern("if");
        let form = Value::List(Arc::new(vec![crate::reader::Form::new(
            Value::Symbol(Symbol::unqualified(if_sym)),
            None,
        )]));
        let result = macroexpand(&form, &env, &interner, &mut expander, &mut tracer).unwrap();
        assert_eq!(result, form);
    }
}
