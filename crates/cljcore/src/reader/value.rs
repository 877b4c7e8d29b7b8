//! The reader's tagged value tree (spec.md §3).
//!
//! A [`Form`] pairs a [`Value`] with its optional metadata chain (already
//! merged left-to-right per spec.md §4.1) and its source span. Only symbols
//! and compound values may carry metadata; attempting to attach metadata to
//! any other atom silently drops it, matching real Clojure reader behavior
//! (`^:foo 1` reads as `1`, not an error).

use std::sync::Arc;

use num_bigint::BigInt;

use crate::{
    intern::{Keyword, Symbol},
    pos::SourceSpan,
};

/// One node of the reader's value tree, with its metadata and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub value: Value,
    pub meta: Option<Arc<Meta>>,
    pub span: Option<SourceSpan>,
}

impl Form {
    pub fn new(value: Value, span: Option<SourceSpan>) -> Self {
        Self {
            value,
            meta: None,
            span,
        }
    }

    /// Attaches `meta` to this form if its value kind supports metadata;
    /// otherwise returns the form unchanged (meta is dropped, not an error).
    #[must_use]
    pub fn with_meta(mut self, meta: Meta) -> Self {
        if self.value.supports_metadata() {
            self.meta = Some(Arc::new(meta));
        }
        self
    }
}

/// A merged metadata map (spec.md §4.1: "successive metadata forms are
/// merged left-to-right"). Stored as an association list rather than a
/// hash map since metadata maps are small and keyed by a mix of keyword,
/// symbol, and string forms that do not share one natural hash.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    pub entries: Vec<(Form, Form)>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `other` into `self`, with `other`'s entries taking precedence
    /// on key collision (later `^` forms win, matching left-to-right merge
    /// order when reading `^{:a 1} ^{:a 2} x` as meta `{:a 2}`).
    pub fn merge(mut self, other: Meta) -> Meta {
        for (k, v) in other.entries {
            if let Some(slot) = self.entries.iter_mut().find(|(ek, _)| ek.value == k.value) {
                slot.1 = v;
            } else {
                self.entries.push((k, v));
            }
        }
        self
    }

    pub fn get(&self, key: &Value) -> Option<&Form> {
        self.entries.iter().find(|(k, _)| &k.value == key).map(|(_, v)| v)
    }
}

/// One clause of an unresolved reader conditional (spec.md §4.1 `#?(...)`).
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalClause {
    pub feature: FeatureKey,
    pub form: Form,
}

/// A feature key in a reader conditional: either a registered feature
/// keyword (`:clj`, `:cljs`, ...) or `:default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKey {
    Named(Keyword),
    Default,
}

/// The reader's tagged value tree (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    /// Always stored in lowest terms with a positive denominator.
    Ratio(BigInt, BigInt),
    Float(f64),
    /// `unscaled * 10^-scale`, matching `BigDecimal`'s usual representation.
    BigDecimal { unscaled: BigInt, scale: i32 },
    Char(char),
    Str(Arc<str>),
    /// Regex source text; validity is checked at read time (spec.md §4.1)
    /// but compilation into a host regex object happens at `on_load` time
    /// (spec.md §4.3: non-literal constants are lifted to an initializer).
    Regex(Arc<str>),
    Keyword(Keyword),
    Symbol(Symbol),
    List(Arc<Vec<Form>>),
    Vector(Arc<Vec<Form>>),
    /// Insertion-ordered key/value pairs; duplicate keys are a reader error
    /// the analyzer may choose to reject, not enforced by the reader itself.
    Map(Arc<Vec<(Form, Form)>>),
    Set(Arc<Vec<Form>>),
    /// A tagged literal for which no built-in or registered data-reader
    /// claimed the tag, but `default_data_readers` permitted passthrough.
    Tagged(Symbol, Arc<Form>),
    /// An unresolved `#?(...)` / `#?@(...)` form, present only when
    /// `ReaderOpts.read_conditional == ReadConditional::Preserve`.
    ReaderConditional {
        splicing: bool,
        clauses: Arc<Vec<ConditionalClause>>,
    },
    /// `#inst "..."`, stored as the raw RFC3339 text; the host's bootstrapped
    /// stdlib is responsible for actually parsing it into an instant value.
    Inst(Arc<str>),
    Uuid(uuid::Uuid),
}

impl Value {
    /// Per spec.md §3: "symbols and collections may carry metadata; atoms
    /// may not". Tagged literals, reader conditionals, instants, and UUIDs
    /// are compound-ish but not reader-syntax collections, so they follow
    /// the "atom" branch here.
    pub fn supports_metadata(&self) -> bool {
        matches!(
            self,
            Value::Symbol(_) | Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_)
        )
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Clojure truthiness: only `nil` and `false` are falsey (spec.md §4.3).
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Value::Symbol(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_dropped_on_unsupported_atoms() {
        let form = Form::new(Value::Int(1), None).with_meta(Meta::new());
        assert!(form.meta.is_none());
    }

    #[test]
    fn metadata_merge_is_left_to_right_with_later_winning() {
        let mut interner = crate::intern::Interner::new();
        let a = interner.intern("a");
        let key = Form::new(Value::Keyword(Keyword::unqualified(a)), None);
        let one = Meta {
            entries: vec![(key.clone(), Form::new(Value::Int(1), None))],
        };
        let two = Meta {
            entries: vec![(key.clone(), Form::new(Value::Int(2), None))],
        };
        let merged = one.merge(two);
        assert_eq!(merged.get(&key.value).unwrap().value, Value::Int(2));
    }

    #[test]
    fn truthiness_matches_clojure_semantics() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
    }
}
