//! The module-accumulation context (spec.md §1, §3 "Module-in-progress",
//! §5 "Module context").
//!
//! A process-scoped registry, keyed by the active compile's child-task id,
//! that analyzer nodes for `def`/`deftype`/`defprotocol`/`extend-type`
//! append functions into. Grounded on the teacher's `session_manager.rs`
//! (`SessionManager`: create/destroy/fork/list sessions by id) and
//! `repl.rs`'s `ReplSession::fork`/`save`/`load` — here the "session" is one
//! module-in-progress bundle per in-flight compile rather than a whole
//! interpreter session.

use std::collections::BTreeMap;

use ahash::AHashMap;
use uuid::Uuid;

use crate::core_ir::{IrExpr, IrFunction, IrModule};

/// Identifies one in-flight compile's module context — spec.md §5: "Module
/// context: keyed by the active compile's child task". A fresh id is minted
/// per spawned compile-child; the driver discards the context for that id
/// once the child terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompileTaskId(Uuid);

impl CompileTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompileTaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// One module being built up across possibly-several top-level forms before
/// finalization (spec.md §3 "Module-in-progress").
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ModuleInProgress {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Insertion order matters: it is one of the two orderings protocol
    /// dispatch depends on (spec.md §4.4 "Ordering is stable and total").
    functions: Vec<IrFunction>,
    pub on_load: Option<IrExpr>,
}

impl ModuleInProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends (or, if a same-name/arity function already exists, replaces)
    /// a function — `extend-type` re-registration needs replace semantics
    /// when a protocol's dispatch body is re-emitted (spec.md §4.4
    /// "`extend-type` appends a branch ... and re-emits the module").
    pub fn upsert_function(&mut self, function: IrFunction) {
        if let Some(slot) = self
            .functions
            .iter_mut()
            .find(|f| f.name == function.name && f.arity == function.arity)
        {
            *slot = function;
        } else {
            self.functions.push(function);
        }
    }

    pub fn functions(&self) -> &[IrFunction] {
        &self.functions
    }

    pub fn set_on_load(&mut self, body: IrExpr) {
        self.on_load = Some(match self.on_load.take() {
            Some(IrExpr::Seq(mut existing)) => {
                existing.push(body);
                IrExpr::Seq(existing)
            }
            Some(previous) => IrExpr::Seq(vec![previous, body]),
            None => body,
        });
    }

    /// Produces the immutable Core IR module tree (spec.md §3 "Finalization
    /// produces one immutable Core IR module tree per key").
    #[must_use]
    pub fn finalize(self) -> IrModule {
        IrModule {
            name: self.name,
            attributes: self.attributes,
            functions: self.functions,
            on_load: self.on_load,
        }
    }
}

/// The set of modules accumulated so far within one compile-child's context,
/// keyed by target module name (a type may emit several modules: its own,
/// plus a protocol's dispatch module, plus the `erl_fun`-style helper
/// modules `extend-type` touches).
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct ModuleContext {
    modules: AHashMap<String, ModuleInProgress>,
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module_mut(&mut self, name: &str) -> &mut ModuleInProgress {
        self.modules.entry(name.to_owned()).or_insert_with(|| ModuleInProgress::new(name))
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInProgress> {
        self.modules.get(name)
    }

    /// Finalizes every accumulated module, in a stable (sorted by name)
    /// order so output is deterministic across runs.
    #[must_use]
    pub fn finalize_all(self) -> Vec<IrModule> {
        let mut sorted: BTreeMap<String, ModuleInProgress> = BTreeMap::new();
        for (name, module) in self.modules {
            sorted.insert(name, module);
        }
        sorted.into_values().map(ModuleInProgress::finalize).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Process-scoped registry of module contexts, one per in-flight compile
/// (spec.md §5 "Module context: ... Destroyed when that task terminates.
/// Not reused across compiles").
#[derive(Debug, Default)]
pub struct ModuleContextRegistry {
    contexts: AHashMap<CompileTaskId, ModuleContext>,
}

impl ModuleContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self) -> CompileTaskId {
        let id = CompileTaskId::new();
        self.contexts.insert(id, ModuleContext::new());
        id
    }

    pub fn get_mut(&mut self, id: CompileTaskId) -> Option<&mut ModuleContext> {
        self.contexts.get_mut(&id)
    }

    /// Destroys the context for `id`, returning it so the driver can
    /// finalize its modules before the compile-child's slot is reclaimed.
    pub fn destroy(&mut self, id: CompileTaskId) -> Option<ModuleContext> {
        self.contexts.remove(&id)
    }

    /// Forks a snapshot of `id`'s context under a fresh id, via `postcard`
    /// round-trip — mirrors `ReplSession::fork`'s deep-clone-by-serialize
    /// pattern, used when a macro wants to speculatively extend a
    /// type/protocol without committing if expansion then fails.
    pub fn fork(&mut self, id: CompileTaskId) -> Option<CompileTaskId> {
        let existing = self.contexts.get(&id)?;
        let bytes = postcard::to_allocvec(existing).ok()?;
        let cloned: ModuleContext = postcard::from_bytes(&bytes).ok()?;
        let new_id = CompileTaskId::new();
        self.contexts.insert(new_id, cloned);
        Some(new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_ir::IrLiteral;

    fn sample_function(name: &str) -> IrFunction {
        IrFunction {
            name: name.to_owned(),
            arity: 0,
            is_variadic: false,
            exported: true,
            params: vec![],
            body: IrExpr::Literal(IrLiteral::Nil),
        }
    }

    #[test]
    fn upsert_replaces_same_name_and_arity() {
        let mut module = ModuleInProgress::new("ex");
        module.upsert_function(sample_function("f"));
        module.upsert_function(sample_function("f"));
        assert_eq!(module.functions().len(), 1);
    }

    #[test]
    fn registry_destroy_removes_context() {
        let mut registry = ModuleContextRegistry::new();
        let id = registry.create();
        assert!(registry.get_mut(id).is_some());
        assert!(registry.destroy(id).is_some());
        assert!(registry.get_mut(id).is_none());
    }

    #[test]
    fn finalize_all_is_sorted_by_module_name() {
        let mut ctx = ModuleContext::new();
        ctx.module_mut("zeta");
        ctx.module_mut("alpha");
        let modules = ctx.finalize_all();
        assert_eq!(modules[0].name, "alpha");
        assert_eq!(modules[1].name, "zeta");
    }

    #[test]
    fn fork_produces_independent_copy() {
        let mut registry = ModuleContextRegistry::new();
        let id = registry.create();
        registry.get_mut(id).unwrap().module_mut("ex").upsert_function(sample_function("f"));
        let forked = registry.fork(id).unwrap();
        registry.get_mut(forked).unwrap().module_mut("ex").upsert_function(sample_function("g"));
        assert_eq!(registry.get_mut(id).unwrap().module("ex").unwrap().functions().len(), 1);
        assert_eq!(registry.get_mut(forked).unwrap().module("ex").unwrap().functions().len(), 2);
    }
}
