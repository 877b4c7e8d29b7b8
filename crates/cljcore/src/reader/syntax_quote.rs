//! Syntax-quote (`` ` ``) expansion (spec.md §4.1): auto-gensym substitution
//! and unqualified-symbol resolution, performed in-reader. `~`/`~@` are left
//! as the list-headed `(clojure.core/unquote ...)` / `(clojure.core/unquote-
//! splicing ...)` forms the reader already produced for them — expansion
//! must not recurse into those, since the expander (macro body) consumes
//! them verbatim.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    error::CResult,
    intern::Symbol,
    reader::{Form, Reader, Value},
};

/// Special-form names that syntax-quote must NOT namespace-qualify, even
/// though they are bare unqualified symbols (spec.md §4.2's special-form
/// dispatch table, plus the `&` varargs marker and `.` dot-form).
const SPECIAL_FORMS: &[&str] = &[
    "def", "if", "do", "let*", "loop*", "recur", "fn*", "letfn*", "quote", "var", "throw", "try", "catch", "finally",
    "new", ".", "set!", "case*", "reify*", "deftype*", "defprotocol", "extend-type", "import*", "monitor-enter",
    "monitor-exit", "receive*", "on-load*", "&", "_",
];

pub fn expand(reader: &mut Reader<'_>, form: &Form) -> CResult<Form> {
    let mut gensyms: AHashMap<String, String> = AHashMap::new();
    expand_form(reader, form, &mut gensyms)
}

fn expand_form(reader: &mut Reader<'_>, form: &Form, gensyms: &mut AHashMap<String, String>) -> CResult<Form> {
    let value = match &form.value {
        Value::Symbol(sym) => Value::Symbol(resolve_symbol(reader, *sym, gensyms)),
        Value::List(items) => {
            if is_unquote_form(items, reader) {
                return Ok(form.clone());
            }
            Value::List(Arc::new(expand_items(reader, items, gensyms)?))
        }
        Value::Vector(items) => Value::Vector(Arc::new(expand_items(reader, items, gensyms)?)),
        Value::Set(items) => Value::Set(Arc::new(expand_items(reader, items, gensyms)?)),
        Value::Map(entries) => {
            let mut expanded = Vec::with_capacity(entries.len());
            for (k, v) in entries.iter() {
                expanded.push((expand_form(reader, k, gensyms)?, expand_form(reader, v, gensyms)?));
            }
            Value::Map(Arc::new(expanded))
        }
        _ => form.value.clone(),
    };
    Ok(Form {
        value,
        meta: form.meta.clone(),
        span: form.span,
    })
}

fn expand_items(reader: &mut Reader<'_>, items: &[Form], gensyms: &mut AHashMap<String, String>) -> CResult<Vec<Form>> {
    items.iter().map(|item| expand_form(reader, item, gensyms)).collect()
}

fn is_unquote_form(items: &[Form], reader: &Reader<'_>) -> bool {
    let Some(first) = items.first() else { return false };
    let Value::Symbol(sym) = &first.value else { return false };
    let Some(ns) = sym.ns else { return false };
    let interner = reader.interner_ref();
    let ns_text = interner.resolve(ns);
    let name_text = interner.resolve(sym.name);
    ns_text == "clojure.core" && (name_text == "unquote" || name_text == "unquote-splicing")
}

fn resolve_symbol(reader: &mut Reader<'_>, sym: Symbol, gensyms: &mut AHashMap<String, String>) -> Symbol {
    if sym.ns.is_some() {
        return sym;
    }
    let name_text = reader.interner_mut().resolve(sym.name).to_owned();
    if let Some(base) = name_text.strip_suffix('#') {
        if !base.is_empty() {
            let generated = gensyms
                .entry(name_text.clone())
                .or_insert_with(|| reader.next_gensym(base))
                .clone();
            let id = reader.interner_mut().intern(&generated);
            return Symbol::unqualified(id);
        }
    }
    if SPECIAL_FORMS.contains(&name_text.as_str()) {
        return sym;
    }
    match reader.opts().current_ns.clone() {
        Some(ns) if !name_text.contains('.') => {
            let ns_id = reader.interner_mut().intern(&ns);
            Symbol::qualified(ns_id, sym.name)
        }
        _ => sym,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{intern::Interner, reader::ReaderOpts};

    fn read_one_syntax_quote(source: &str, current_ns: Option<&str>) -> (Form, Interner) {
        let mut interner = Interner::new();
        let opts = ReaderOpts {
            current_ns: current_ns.map(str::to_owned),
            ..ReaderOpts::default()
        };
        let form = {
            let mut reader = Reader::new(source, &mut interner, opts);
            reader.read_one().unwrap().unwrap()
        };
        (form, interner)
    }

    #[test]
    fn qualifies_unqualified_symbols_against_current_ns() {
        let (form, interner) = read_one_syntax_quote("`foo", Some("my.ns"));
        let Value::Symbol(sym) = form.value else { panic!("expected symbol") };
        assert_eq!(sym.display(&interner).to_string(), "my.ns/foo");
    }

    #[test]
    fn leaves_special_forms_unqualified() {
        let (form, interner) = read_one_syntax_quote("`(if a b c)", Some("my.ns"));
        let Value::List(items) = form.value else { panic!("expected list") };
        let Value::Symbol(head) = items[0].value else { panic!("expected symbol") };
        assert_eq!(head.display(&interner).to_string(), "if");
    }

    #[test]
    fn auto_gensym_is_consistent_within_one_expansion() {
        let (form, interner) = read_one_syntax_quote("`(let* [x# 1] x#)", None);
        let Value::List(items) = form.value else { panic!("expected list") };
        let Value::Vector(bindings) = &items[1].value else { panic!("expected bindings vector") };
        let Value::Symbol(bound) = bindings[0].value else { panic!("expected symbol") };
        let Value::Symbol(used) = items[2].value else { panic!("expected symbol") };
        assert_eq!(bound.display(&interner).to_string(), used.display(&interner).to_string());
        assert!(bound.display(&interner).to_string().starts_with("x__"));
    }

    #[test]
    fn unquote_forms_are_left_untouched() {
        let (form, interner) = read_one_syntax_quote("`(foo ~bar)", Some("my.ns"));
        let Value::List(items) = form.value else { panic!("expected list") };
        let Value::List(inner) = &items[1].value else { panic!("expected inner list") };
        let Value::Symbol(head) = inner[0].value else { panic!("expected symbol") };
        assert_eq!(head.display(&interner).to_string(), "clojure.core/unquote");
        let Value::Symbol(arg) = inner[1].value else { panic!("expected symbol") };
        // unqualified, even though current_ns was set — unquote bodies are not walked.
        assert_eq!(arg.display(&interner).to_string(), "bar");
    }
}
