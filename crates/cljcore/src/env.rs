//! Lexical environment and namespace/Var registry (spec.md §3 "Environment").
//!
//! Grounded on the teacher's `namespace.rs` index-based storage pattern,
//! adapted from a runtime value store (`Namespaces` indexing `Value`s on the
//! heap) to a compile-time symbol table indexing `LocalBinding`s and `Var`s.
//! `Env` itself is immutable-with-copy-on-push (spec.md §2): extending it for
//! a nested scope clones the frame stack's `Arc` spine rather than mutating
//! a shared frame, so a child analyzer call can extend `Env` without
//! disturbing the parent's view of it.

use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::{
    intern::{Interner, StringId, Symbol},
    pos::CodeLoc,
};

/// Opaque identifier for a `loop*`/`fn_method` `recur` target (spec.md §3
/// "Loop id"). Allocated from a process-scoped atomic counter so ids are
/// unique across an entire compile session without needing a `Uuid` for what
/// is, in practice, a small dense integer space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(u64);

impl LoopId {
    /// The raw numeric id, used by the emitter to derive a stable Core IR
    /// `LetRec`/`TailCall` loop name (`src/emitter/mod.rs`).
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct LoopIdGen(std::sync::atomic::AtomicU64);

impl LoopIdGen {
    pub fn next(&self) -> LoopId {
        LoopId(self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}

/// The kind of a local binding (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Arg,
    Let,
    Loop,
    Catch,
}

/// One local binding visible within a lexical frame.
#[derive(Debug, Clone)]
pub struct LocalBinding {
    pub id: u32,
    /// The id of the binding this one shadows, if any (spec.md §3
    /// `shadow_chain`) — lets diagnostics report "shadows outer `x`".
    pub shadow_chain: Option<u32>,
    pub kind: LocalKind,
    pub is_variadic: bool,
    pub is_underscore: bool,
}

/// Compile-time metadata accumulated per lexical frame (spec.md §3: "flags,
/// source location, timing counters").
#[derive(Debug, Clone, Default)]
pub struct FrameFlags {
    pub no_warn_symbol_as_erl_fun: bool,
    pub no_warn_dynamic_var_name: bool,
    pub loc: Option<CodeLoc>,
    pub forms_analyzed: u64,
}

/// One lexical scope layer. `let*`, `loop*`, `fn_method`, and `catch` each
/// push a frame; `Env::push_frame` returns a new `Env` sharing the rest of
/// the stack via `Arc`.
#[derive(Debug, Clone, Default)]
struct Frame {
    locals: im_like::PersistentMap<StringId, LocalBinding>,
    /// Tail position flag for the body currently being analyzed in this
    /// frame (spec.md §4.2 "recur placement rule").
    in_tail_position: bool,
    /// The innermost enclosing loop target, if any: its id and arity.
    loop_target: Option<(LoopId, usize)>,
    try_catch_depth: u32,
    flags: FrameFlags,
    /// Slot holding the AST produced for the most recently analyzed
    /// expression in this frame (spec.md §3 "an `eval` slot").
    eval: Option<()>,
}

/// A persistent (structure-sharing) environment: a stack of lexical frames
/// layered over the process-wide [`NamespaceRegistry`].
#[derive(Debug, Clone)]
pub struct Env {
    frames: Arc<Vec<Frame>>,
    pub namespaces: Arc<NamespaceRegistry>,
    pub current_ns: StringId,
    pub loop_ids: Arc<LoopIdGen>,
    local_id_counter: Arc<std::sync::atomic::AtomicU32>,
}

mod im_like {
    //! A minimal copy-on-write association list used as the lexical frame's
    //! local-binding map. Frames rarely hold more than a handful of locals,
    //! so a linear `Arc<Vec<_>>` with push-returns-new-Arc beats a balanced
    //! tree for both simplicity and constant factors.
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    pub struct PersistentMap<K, V> {
        entries: Arc<Vec<(K, V)>>,
    }

    impl<K, V> Default for PersistentMap<K, V> {
        fn default() -> Self {
            Self { entries: Arc::new(Vec::new()) }
        }
    }

    impl<K: PartialEq + Clone, V: Clone> PersistentMap<K, V> {
        pub fn inserted(&self, key: K, value: V) -> Self {
            let mut entries = (*self.entries).clone();
            entries.push((key, value));
            Self { entries: Arc::new(entries) }
        }

        /// Innermost-first lookup: a later push shadows an earlier one with
        /// the same key.
        pub fn get(&self, key: &K) -> Option<&V> {
            self.entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
        }
    }
}

impl Env {
    /// A fresh environment rooted at `current_ns`, sharing `namespaces` with
    /// every other `Env` in the same compile session.
    pub fn new(namespaces: Arc<NamespaceRegistry>, current_ns: StringId) -> Self {
        Self {
            frames: Arc::new(vec![Frame::default()]),
            namespaces,
            current_ns,
            loop_ids: Arc::new(LoopIdGen::default()),
            local_id_counter: Arc::new(std::sync::atomic::AtomicU32::new(0)),
        }
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("Env always has at least one frame")
    }

    /// Allocates a fresh local binding id, unique within this compile session.
    pub fn next_local_id(&self) -> u32 {
        self.local_id_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Pushes a new lexical frame, returning the extended `Env`. The parent
    /// `Env` is untouched (spec.md §2 "standalone immutable-with-copy-on-push").
    #[must_use]
    pub fn push_frame(&self) -> Self {
        let mut frames = (*self.frames).clone();
        frames.push(Frame::default());
        Self {
            frames: Arc::new(frames),
            ..self.clone()
        }
    }

    /// Binds `name` to `binding` in the innermost frame, returning the
    /// extended `Env`.
    #[must_use]
    pub fn bind_local(&self, name: StringId, binding: LocalBinding) -> Self {
        let mut frames = (*self.frames).clone();
        let last = frames.last_mut().expect("Env always has at least one frame");
        last.locals = last.locals.inserted(name, binding);
        Self {
            frames: Arc::new(frames),
            ..self.clone()
        }
    }

    /// Resolves a local by name, innermost frame first (spec.md §4.2 name
    /// resolution step 1).
    pub fn resolve_local(&self, name: StringId) -> Option<&LocalBinding> {
        self.frames.iter().rev().find_map(|f| f.locals.get(&name))
    }

    /// Sets this frame as a `recur` target with the given arity, returning
    /// the extended `Env` (used by `loop*` and `fn_method`).
    #[must_use]
    pub fn with_loop_target(&self, loop_id: LoopId, arity: usize) -> Self {
        let mut frames = (*self.frames).clone();
        let last = frames.last_mut().expect("Env always has at least one frame");
        last.loop_target = Some((loop_id, arity));
        last.in_tail_position = true;
        Self {
            frames: Arc::new(frames),
            ..self.clone()
        }
    }

    pub fn loop_target(&self) -> Option<(LoopId, usize)> {
        self.frames.iter().rev().find_map(|f| f.loop_target)
    }

    /// Sets whether the expression about to be analyzed is in tail position
    /// (spec.md §4.2 "recur placement rule").
    #[must_use]
    pub fn with_tail_position(&self, tail: bool) -> Self {
        let mut frames = (*self.frames).clone();
        let last = frames.last_mut().expect("Env always has at least one frame");
        last.in_tail_position = tail;
        Self {
            frames: Arc::new(frames),
            ..self.clone()
        }
    }

    pub fn in_tail_position(&self) -> bool {
        self.top().in_tail_position
    }

    #[must_use]
    pub fn enter_catch(&self) -> Self {
        let mut frames = (*self.frames).clone();
        let last = frames.last_mut().expect("Env always has at least one frame");
        last.try_catch_depth += 1;
        Self {
            frames: Arc::new(frames),
            ..self.clone()
        }
    }

    pub fn try_catch_depth(&self) -> u32 {
        self.top().try_catch_depth
    }

    #[must_use]
    pub fn with_current_ns(&self, ns: StringId) -> Self {
        Self {
            current_ns: ns,
            ..self.clone()
        }
    }
}

/// A shared, mutable cell holding a Var's state. Owned by its home namespace
/// and referenced from every namespace that refers it (spec.md §3 "Var").
#[derive(Debug)]
pub struct VarCell {
    pub name: StringId,
    pub home_ns: StringId,
    pub root: Mutex<Option<RootValue>>,
    pub meta: Mutex<Option<crate::reader::value::Meta>>,
    pub is_macro: std::sync::atomic::AtomicBool,
    pub is_dynamic: std::sync::atomic::AtomicBool,
    /// Task-local dynamic binding stack (spec.md §5 "Var dynamic bindings:
    /// task-local stack"). Modeled as a plain stack here since this crate
    /// has no actual task scheduler; the driver is responsible for
    /// push/pop discipline around spawned compile-children.
    pub dynamic_bindings: Mutex<Vec<RootValue>>,
}

/// A Var's root binding. The compiler never executes Clojure code itself
/// (macro bodies run on the host VM, spec.md §9 "macro evaluation"), so the
/// root is either unbound, a literal constant known at compile time, or an
/// opaque handle the host VM produced when it ran the `def`'s init.
#[derive(Debug, Clone)]
pub enum RootValue {
    Value(crate::reader::value::Value),
    /// A handle into host-VM-resident state (e.g. the loaded module/function
    /// backing a macro), opaque to this crate.
    HostHandle(Arc<str>),
}

pub type VarHandle = Arc<VarCell>;

/// One namespace: symbol-name mappings plus aliasing/import tables
/// (spec.md §3).
#[derive(Debug, Default)]
pub struct Namespace {
    pub name: StringId,
    pub aliases: AHashMap<StringId, StringId>,
    pub mappings: AHashMap<StringId, VarHandle>,
    pub imports: AHashMap<StringId, StringId>,
    pub referred_macros: AHashMap<StringId, VarHandle>,
    /// Vars interned directly in this namespace (as opposed to referred in
    /// from elsewhere) — the subset of `mappings` this namespace owns.
    pub interns: AHashMap<StringId, VarHandle>,
}

impl Namespace {
    fn new(name: StringId) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }
}

/// Process-wide namespace registry (spec.md §3, §5 "single-writer by virtue
/// of the driver's serial loop"). Held behind a `Mutex` so the type remains
/// `Send + Sync` for the per-compile child-task model (spec.md §5), even
/// though in practice only the driver task ever writes to it.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    namespaces: Mutex<AHashMap<StringId, Arc<Mutex<Namespace>>>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&self, name: StringId) -> Arc<Mutex<Namespace>> {
        let mut namespaces = self.namespaces.lock().expect("namespace registry poisoned");
        namespaces
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(Namespace::new(name))))
            .clone()
    }

    pub fn get(&self, name: StringId) -> Option<Arc<Mutex<Namespace>>> {
        self.namespaces.lock().expect("namespace registry poisoned").get(&name).cloned()
    }

    /// Interns a new Var `name` in namespace `ns`, or returns the existing
    /// one (spec.md §5 "first-writer-wins on Var interning: subsequent
    /// interns alias").
    pub fn intern(&self, ns: StringId, name: StringId) -> VarHandle {
        let ns_cell = self.ensure(ns);
        let mut ns_guard = ns_cell.lock().expect("namespace poisoned");
        if let Some(existing) = ns_guard.interns.get(&name) {
            return existing.clone();
        }
        let var = Arc::new(VarCell {
            name,
            home_ns: ns,
            root: Mutex::new(None),
            meta: Mutex::new(None),
            is_macro: std::sync::atomic::AtomicBool::new(false),
            is_dynamic: std::sync::atomic::AtomicBool::new(false),
            dynamic_bindings: Mutex::new(Vec::new()),
        });
        ns_guard.interns.insert(name, var.clone());
        ns_guard.mappings.insert(name, var.clone());
        var
    }

    /// Total number of interned Vars across all namespaces, used to verify
    /// the "namespace monotonicity" testable property (spec.md §8).
    pub fn total_interned(&self) -> usize {
        self.namespaces
            .lock()
            .expect("namespace registry poisoned")
            .values()
            .map(|ns| ns.lock().expect("namespace poisoned").interns.len())
            .sum()
    }

    /// Resolves a bare symbol name against `ns`'s own interns, then its
    /// aliases/referred mappings, then falls through to nothing (the caller
    /// continues with the global-by-qualified-name and host-type steps of
    /// spec.md §4.2's resolution order).
    pub fn resolve_in_ns(&self, ns: StringId, name: StringId) -> Option<VarHandle> {
        let ns_cell = self.get(ns)?;
        let ns_guard = ns_cell.lock().expect("namespace poisoned");
        ns_guard.mappings.get(&name).or_else(|| ns_guard.referred_macros.get(&name)).cloned()
    }

    pub fn resolve_qualified(&self, interner: &Interner, ns_name: &str, name: StringId) -> Option<VarHandle> {
        let ns_id = {
            let namespaces = self.namespaces.lock().expect("namespace registry poisoned");
            namespaces.keys().find(|id| interner.resolve(**id) == ns_name).copied()
        }?;
        self.resolve_in_ns(ns_id, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_env() -> (Env, Interner) {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let registry = Arc::new(NamespaceRegistry::new());
        (Env::new(registry, ns), interner)
    }

    #[test]
    fn push_frame_does_not_mutate_parent() {
        let (env, mut interner) = fresh_env();
        let x = interner.intern("x");
        let child = env.push_frame().bind_local(
            x,
            LocalBinding {
                id: 0,
                shadow_chain: None,
                kind: LocalKind::Let,
                is_variadic: false,
                is_underscore: false,
            },
        );
        assert!(child.resolve_local(x).is_some());
        assert!(env.resolve_local(x).is_none());
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let (env, mut interner) = fresh_env();
        let x = interner.intern("x");
        let outer = env.bind_local(
            x,
            LocalBinding {
                id: 0,
                shadow_chain: None,
                kind: LocalKind::Let,
                is_variadic: false,
                is_underscore: false,
            },
        );
        let inner = outer.push_frame().bind_local(
            x,
            LocalBinding {
                id: 1,
                shadow_chain: Some(0),
                kind: LocalKind::Let,
                is_variadic: false,
                is_underscore: false,
            },
        );
        assert_eq!(inner.resolve_local(x).unwrap().id, 1);
    }

    #[test]
    fn interning_is_first_writer_wins() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let name = interner.intern("x");
        let registry = NamespaceRegistry::new();
        let a = registry.intern(ns, name);
        let b = registry.intern(ns, name);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn namespace_monotonicity_never_shrinks() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let registry = NamespaceRegistry::new();
        let before = registry.total_interned();
        registry.intern(ns, interner.intern("a"));
        let after_a = registry.total_interned();
        registry.intern(ns, interner.intern("b"));
        let after_b = registry.total_interned();
        assert!(after_a > before);
        assert!(after_b > after_a);
    }
}
