//! Protocol and type registration (spec.md §4.2 "Protocol & type lowering",
//! §4.4 "Protocol dispatch lowering").
//!
//! `defprotocol`/`deftype*`/`extend-type` append into these registries as a
//! side effect of analysis; the actual dispatch-module Core IR is built later
//! by `emitter/dispatch.rs` by reading `ProtocolRecord::implementors` in the
//! frozen order recorded in DESIGN.md ("Primitive-clause ordering" Open
//! Question resolution): primitives in declaration order, then tagged
//! records alphabetically, catch-all last.

use std::sync::Mutex;

use ahash::AHashMap;

use crate::{
    ast::ProtocolMethodSig,
    intern::{Interner, StringId, Symbol},
};

/// One registered implementing type for a protocol: the type's name plus
/// whether it is a host primitive (declaration order matters) or a tagged
/// record (alphabetical order at emission time).
#[derive(Debug, Clone)]
pub struct Implementor {
    pub type_name: Symbol,
    pub is_primitive: bool,
    /// Namespace the `deftype`/`extend-type` that registered this
    /// implementor was compiled in — the dispatch module needs this to
    /// call back into `{home_ns}.{type_name}`'s generated protocol-method
    /// function (spec.md §4.3 `deftype`'s per-namespace module naming).
    pub home_ns: StringId,
}

#[derive(Debug)]
pub struct ProtocolRecord {
    pub name: Symbol,
    pub methods: Vec<ProtocolMethodSig>,
    pub implementors: Mutex<Vec<Implementor>>,
}

#[derive(Debug)]
pub struct TypeRecord {
    pub name: Symbol,
    pub fields: Vec<Symbol>,
}

/// Process-wide protocol/type registry, parallel to [`crate::env::NamespaceRegistry`]
/// (spec.md §3 "Protocol record"). Kept separate from `NamespaceRegistry`
/// rather than folded into it: namespaces map *names* to Vars, while this
/// tracks the *shape* (methods, fields, implementors) the emitter needs to
/// generate dispatch modules, which has no natural home in a `Namespace`.
#[derive(Debug, Default)]
pub struct Registries {
    protocols: Mutex<AHashMap<StringId, ProtocolRecord>>,
    types: Mutex<AHashMap<StringId, TypeRecord>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_protocol(&self, name: Symbol, methods: Vec<ProtocolMethodSig>) {
        let mut protocols = self.protocols.lock().expect("protocol registry poisoned");
        protocols.entry(name.name).or_insert_with(|| ProtocolRecord {
            name,
            methods,
            implementors: Mutex::new(Vec::new()),
        });
    }

    pub fn register_type(&self, name: Symbol, fields: Vec<Symbol>) {
        let mut types = self.types.lock().expect("type registry poisoned");
        types.entry(name.name).or_insert_with(|| TypeRecord { name, fields });
    }

    /// Records that `type_name` implements `protocol_name`, in declaration
    /// order (spec.md §4.4's ordering guarantee is built from this insertion
    /// order for primitives; alphabetized by the emitter for tagged records).
    pub fn register_extension(&self, protocol_name: Symbol, type_name: Symbol, is_primitive: bool, home_ns: StringId) {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        if let Some(record) = protocols.get(&protocol_name.name) {
            let mut implementors = record.implementors.lock().expect("implementors poisoned");
            if !implementors.iter().any(|i| i.type_name == type_name) {
                implementors.push(Implementor { type_name, is_primitive, home_ns });
            }
        }
    }

    pub fn protocol_method_count(&self, protocol_name: StringId) -> Option<usize> {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        protocols.get(&protocol_name).map(|r| r.methods.len())
    }

    pub fn implementor_count(&self, protocol_name: StringId) -> usize {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        protocols
            .get(&protocol_name)
            .map(|r| r.implementors.lock().expect("implementors poisoned").len())
            .unwrap_or(0)
    }

    /// Every registered protocol name, for a finalizing driver to re-emit
    /// dispatch modules across a whole compile session.
    pub fn protocol_names(&self) -> Vec<Symbol> {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        protocols.values().map(|r| r.name).collect()
    }

    pub fn protocol_methods(&self, protocol_name: StringId) -> Option<Vec<ProtocolMethodSig>> {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        protocols.get(&protocol_name).map(|r| r.methods.clone())
    }

    /// Implementors in the frozen emission order (spec.md §4.4): primitives
    /// in declaration order, then tagged records alphabetically by name.
    pub fn ordered_implementors(&self, interner: &Interner, protocol_name: StringId) -> Option<Vec<Implementor>> {
        let protocols = self.protocols.lock().expect("protocol registry poisoned");
        let record = protocols.get(&protocol_name)?;
        let implementors = record.implementors.lock().expect("implementors poisoned");
        let (mut primitives, mut records): (Vec<_>, Vec<_>) = implementors.iter().cloned().partition(|i| i.is_primitive);
        primitives.sort_by_key(|i| resolve_primitive_index(interner, i.type_name.name).unwrap_or(usize::MAX));
        records.sort_by(|a, b| interner.resolve(a.type_name.name).cmp(interner.resolve(b.type_name.name)));
        primitives.extend(records);
        Some(primitives)
    }
}

/// Host primitive type names a protocol may be extended onto directly
/// (spec.md §4.4 "a clause per primitive-type predicate"), in the fixed
/// declaration order frozen by DESIGN.md's Open Question resolution.
pub const PRIMITIVE_TYPE_NAMES: &[&str] = &[
    "nil", "boolean", "long", "double", "ratio", "bigint", "bigdecimal", "char", "string", "keyword", "symbol",
    "vector", "map", "set", "list", "fn",
];

pub fn is_primitive_type_name(name: &str) -> bool {
    PRIMITIVE_TYPE_NAMES.contains(&name)
}

pub fn resolve_primitive_index(interner: &Interner, name: StringId) -> Option<usize> {
    let text = interner.resolve(name);
    PRIMITIVE_TYPE_NAMES.iter().position(|p| *p == text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_a_protocol_twice_keeps_the_first() {
        let mut interner = Interner::new();
        let p = Symbol::unqualified(interner.intern("P"));
        let registries = Registries::new();
        registries.register_protocol(p, vec![]);
        registries.register_protocol(p, vec![ProtocolMethodSig { name: p, arities: vec![1] }]);
        assert_eq!(registries.protocol_method_count(p.name), Some(0));
    }

    #[test]
    fn extension_order_is_insertion_order() {
        let mut interner = Interner::new();
        let p = Symbol::unqualified(interner.intern("P"));
        let t1 = Symbol::unqualified(interner.intern("T1"));
        let t2 = Symbol::unqualified(interner.intern("T2"));
        let registries = Registries::new();
        registries.register_protocol(p, vec![]);
        registries.register_extension(p, t1, false, p.name);
        registries.register_extension(p, t2, false, p.name);
        assert_eq!(registries.implementor_count(p.name), 2);
    }

    #[test]
    fn primitive_type_detection() {
        assert!(is_primitive_type_name("string"));
        assert!(!is_primitive_type_name("MyRecord"));
    }
}
