//! Symbol, keyword, and string interning.
//!
//! Grounded on the teacher's `intern.rs`: a flat growable table of unique
//! strings addressed by a small index newtype (`StringId`), rather than
//! reference-counted or heap-compared strings. Equality and hashing for
//! [`Symbol`] and [`Keyword`] reduce to comparing two `u32`s once both halves
//! are interned, which is what spec.md §3 requires ("keyword and symbol
//! equality is structural... interning is an implementation choice but
//! equality must be consistent with hashing").

use std::sync::Arc;

use ahash::AHashMap;

/// Index into the [`Interner`]'s string table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interns and resolves strings used as symbol/keyword namespace and name
/// components, and as namespace registry keys.
///
/// Not thread-safe by itself; the driver owns one `Interner` per compile
/// session and shares it by reference with the reader, analyzer, and emitter
/// (the namespace registry being the one place the process-wide view is
/// shared mutably, per spec.md §5).
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<Arc<str>>,
    index: AHashMap<Arc<str>, StringId>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s`, returning its (possibly pre-existing) id.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        let arc: Arc<str> = Arc::from(s);
        self.strings.push(arc.clone());
        self.index.insert(arc, id);
        id
    }

    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// A namespaced or unnamespaced symbol.
///
/// Equality is purely structural over the interned `(ns, name)` pair —
/// two symbols compare equal iff they were interned from the same namespace
/// and name text, regardless of when or where they were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Symbol {
    pub ns: Option<StringId>,
    pub name: StringId,
}

impl Symbol {
    pub fn unqualified(name: StringId) -> Self {
        Self { ns: None, name }
    }

    pub fn qualified(ns: StringId, name: StringId) -> Self {
        Self { ns: Some(ns), name }
    }

    pub fn is_qualified(self) -> bool {
        self.ns.is_some()
    }

    pub fn display<'a>(&self, interner: &'a Interner) -> SymbolDisplay<'a> {
        SymbolDisplay {
            ns: self.ns.map(|id| interner.resolve(id)),
            name: interner.resolve(self.name),
        }
    }
}

/// A namespaced or unnamespaced keyword. Structurally identical to [`Symbol`]
/// but kept as a distinct type so the reader and AST cannot confuse the two
/// at the type level (spec.md §3 lists them as separate atom kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Keyword {
    pub ns: Option<StringId>,
    pub name: StringId,
}

impl Keyword {
    pub fn unqualified(name: StringId) -> Self {
        Self { ns: None, name }
    }

    pub fn qualified(ns: StringId, name: StringId) -> Self {
        Self { ns: Some(ns), name }
    }

    pub fn display<'a>(&self, interner: &'a Interner) -> SymbolDisplay<'a> {
        SymbolDisplay {
            ns: self.ns.map(|id| interner.resolve(id)),
            name: interner.resolve(self.name),
        }
    }
}

/// Shared `Display` helper for [`Symbol`] and [`Keyword`] since rendering
/// either requires a live `Interner` to resolve the interned text.
pub struct SymbolDisplay<'a> {
    ns: Option<&'a str>,
    name: &'a str,
}

impl std::fmt::Display for SymbolDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ns {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_twice_returns_same_id() {
        let mut interner = Interner::new();
        let a = interner.intern("clojure.core");
        let b = interner.intern("clojure.core");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "clojure.core");
    }

    #[test]
    fn symbol_equality_is_structural() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let name = interner.intern("x");
        let a = Symbol::qualified(ns, name);
        let b = Symbol::qualified(ns, name);
        assert_eq!(a, b);

        let unqualified = Symbol::unqualified(name);
        assert_ne!(a, unqualified);
    }

    #[test]
    fn display_renders_namespace_slash_name() {
        let mut interner = Interner::new();
        let ns = interner.intern("ex");
        let name = interner.intern("x");
        let sym = Symbol::qualified(ns, name);
        assert_eq!(sym.display(&interner).to_string(), "ex/x");
    }
}
