//! The reader (spec.md §4.1): text → tagged value tree.
//!
//! Grounded on the teacher's `parse.rs` `ParseNode`-wrapping pattern — a
//! dedicated intermediate tree distinct from the final AST — though the
//! grammar itself is hand-written, since no existing crate parses Clojure
//! reader syntax.

pub mod numeric;
pub mod syntax_quote;
pub mod value;

use std::sync::Arc;

use ahash::AHashSet;

use crate::{
    error::{CResult, CompileError, ErrorKind},
    intern::{Interner, Keyword, Symbol},
    pos::{CodeLoc, SourcePos, SourceSpan},
};

pub use value::{ConditionalClause, FeatureKey, Form, Meta, Value};

/// The result of reading one dispatch-macro-headed position: either a single
/// form, or — only possible for a resolved `#?@` splicing reader conditional
/// — the elements of its matched collection, to be spliced into the
/// enclosing sequence accumulator rather than pushed as one element
/// (spec.md §4.1 `#?@` splicing conditional).
enum ReadOutcome {
    One(Form),
    Spliced(Vec<Form>),
}

/// How `#?(...)` reader conditionals are handled (spec.md §4.1 `opts`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConditional {
    /// Leave unresolved `#?(...)` forms in the tree as `Value::ReaderConditional`.
    Preserve,
    /// Resolve against `features` immediately.
    Allow,
    /// Reject any `#?(...)` form outright.
    Disallow,
}

/// What `read_one` does when the stream is exhausted with no form read.
#[derive(Debug, Clone)]
pub enum EofBehavior {
    /// Return `Ok(None)`; the default (spec.md §4.1's `:eofthrow`) — the
    /// reader itself never throws on a clean EOF, it is the caller's
    /// decision whether a bare `None` at this call site is an error.
    Eof,
    /// Return a caller-supplied sentinel value instead of `None`.
    Sentinel(Value),
}

impl Default for EofBehavior {
    fn default() -> Self {
        EofBehavior::Eof
    }
}

#[derive(Debug, Clone)]
pub struct ReaderOpts {
    pub file: Arc<str>,
    pub read_conditional: ReadConditional,
    /// Active feature keys for reader-conditional resolution (`:clj`,
    /// `:cljs`, ...), compared by resolved text.
    pub features: AHashSet<String>,
    /// When true, unrecognized `#tag` dispatch forms are read through as
    /// `Value::Tagged` rather than rejected.
    pub default_data_readers: bool,
    pub eof_behavior: EofBehavior,
    /// `#=` read-time eval; security-sensitive, disabled by default
    /// (spec.md §9 open question, frozen in DESIGN.md).
    pub allow_read_eval: bool,
    /// The namespace syntax-quote qualifies bare symbols against, and `::kw`
    /// qualifies bare keywords against. `None` when reading outside any
    /// namespace context (e.g. a standalone expression).
    pub current_ns: Option<String>,
}

impl Default for ReaderOpts {
    fn default() -> Self {
        Self {
            file: Arc::from("NO_SOURCE_FILE"),
            read_conditional: ReadConditional::Disallow,
            features: AHashSet::default(),
            default_data_readers: true,
            eof_behavior: EofBehavior::default(),
            allow_read_eval: false,
            current_ns: None,
        }
    }
}

/// A random-access pushback-capable character cursor over a whole source
/// unit. Precomputing every character's position up front keeps pushback
/// (needed by numeric/symbol tokenization, which reads ahead speculatively)
/// a plain index decrement rather than requiring an undo log.
struct CharStream {
    chars: Vec<char>,
    positions: Vec<SourcePos>,
    idx: usize,
}

impl CharStream {
    fn new(source: &str) -> Self {
        let chars: Vec<char> = source.chars().collect();
        let mut positions = Vec::with_capacity(chars.len() + 1);
        let mut pos = SourcePos::START;
        positions.push(pos);
        for &c in &chars {
            pos = pos.advance(c);
            positions.push(pos);
        }
        Self { chars, positions, idx: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.idx + ahead).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        Some(c)
    }

    fn pushback(&mut self) {
        debug_assert!(self.idx > 0, "pushback past start of stream");
        self.idx -= 1;
    }

    fn pos(&self) -> SourcePos {
        self.positions[self.idx]
    }
}

/// One reader over one source unit. The gensym counter lives here rather
/// than being reset per-call, so several `read_one` calls (or a `read_fold`)
/// over the same `Reader` share one counter (SPEC_FULL.md §4.1 supplement).
pub struct Reader<'a> {
    chars: CharStream,
    interner: &'a mut Interner,
    opts: ReaderOpts,
    gensym_counter: u64,
}

impl<'a> Reader<'a> {
    pub fn new(source: &str, interner: &'a mut Interner, opts: ReaderOpts) -> Self {
        Self {
            chars: CharStream::new(source),
            interner,
            opts,
            gensym_counter: 0,
        }
    }

    fn loc(&self) -> CodeLoc {
        CodeLoc::new(self.opts.file.clone(), self.chars.pos())
    }

    fn err(&self, kind: ErrorKind, message: impl Into<String>) -> CompileError {
        CompileError::at(kind, self.loc(), message)
    }

    pub fn next_gensym(&mut self, base: &str) -> String {
        self.gensym_counter += 1;
        format!("{base}__{}__auto__", self.gensym_counter)
    }

    /// Reads one top-level form, or `Ok(None)`/a sentinel at clean EOF
    /// (spec.md §4.1 `read_one(stream, opts) → value | eof`).
    pub fn read_one(&mut self) -> CResult<Option<Form>> {
        self.skip_ignorable()?;
        if self.chars.peek().is_none() {
            return Ok(match &self.opts.eof_behavior {
                EofBehavior::Eof => None,
                EofBehavior::Sentinel(v) => Some(Form::new(v.clone(), None)),
            });
        }
        self.read_form().map(Some)
    }

    /// Skips whitespace (commas count as whitespace), `;` line comments,
    /// `#!` line comments, and `#_` discard forms — at any nesting depth,
    /// not just top-level (SPEC_FULL.md §4.1 supplement).
    fn skip_ignorable(&mut self) -> CResult<()> {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() || c == ',' => {
                    self.chars.next();
                }
                Some(';') => {
                    while let Some(c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                Some('#') if self.chars.peek_at(1) == Some('!') => {
                    self.chars.next();
                    self.chars.next();
                    while let Some(c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                Some('#') if self.chars.peek_at(1) == Some('_') => {
                    self.chars.next();
                    self.chars.next();
                    self.skip_ignorable()?;
                    self.read_form()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_form(&mut self) -> CResult<Form> {
        match self.read_form_outcome()? {
            ReadOutcome::One(form) => Ok(form),
            ReadOutcome::Spliced(_) => Err(self.err(
                ErrorKind::InvalidDispatchChar,
                "#?@ splicing reader conditional must appear inside a sequence",
            )),
        }
    }

    /// Like `read_form`, but surfaces a resolved `#?@` splice rather than
    /// rejecting it — only `read_seq` (list/vector/set accumulators) is
    /// allowed to absorb a `Spliced` outcome; every other caller goes
    /// through `read_form` above.
    fn read_form_outcome(&mut self) -> CResult<ReadOutcome> {
        self.skip_ignorable()?;
        let start = self.chars.pos();
        let Some(c) = self.chars.peek() else {
            return Err(self.err(ErrorKind::UnterminatedList, "unexpected end of input"));
        };
        let outcome = match c {
            '(' => ReadOutcome::One(self.read_seq(')', |items| Value::List(Arc::new(items)), start)?),
            '[' => ReadOutcome::One(self.read_seq(']', |items| Value::Vector(Arc::new(items)), start)?),
            '{' => ReadOutcome::One(self.read_map(start)?),
            ')' | ']' | '}' => return Err(self.err(ErrorKind::UnmatchedDelimiter, format!("unexpected `{c}`"))),
            '"' => ReadOutcome::One(self.read_string(start)?),
            '\\' => ReadOutcome::One(self.read_char(start)?),
            ':' => ReadOutcome::One(self.read_keyword(start)?),
            '^' => ReadOutcome::One(self.read_metadata(start)?),
            '\'' => ReadOutcome::One(self.read_prefixed("quote", start)?),
            '`' => ReadOutcome::One(self.read_syntax_quote(start)?),
            '~' => ReadOutcome::One(self.read_unquote(start)?),
            '@' => ReadOutcome::One(self.read_prefixed("deref", start)?),
            '#' => self.read_dispatch(start)?,
            _ => ReadOutcome::One(self.read_atom(start)?),
        };
        Ok(outcome)
    }

    fn make_span(&self, start: SourcePos) -> Option<SourceSpan> {
        Some(SourceSpan::new(start, self.chars.pos()))
    }

    fn read_seq(&mut self, close: char, wrap: impl FnOnce(Vec<Form>) -> Value, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let mut items = Vec::new();
        loop {
            self.skip_ignorable()?;
            match self.chars.peek() {
                None => return Err(self.err(ErrorKind::UnterminatedList, format!("expected `{close}`"))),
                Some(c) if c == close => {
                    self.chars.next();
                    break;
                }
                _ => match self.read_form_outcome()? {
                    ReadOutcome::One(form) => items.push(form),
                    ReadOutcome::Spliced(spliced) => items.extend(spliced),
                },
            }
        }
        Ok(Form::new(wrap(items), self.make_span(start)))
    }

    fn read_map(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let mut entries = Vec::new();
        loop {
            self.skip_ignorable()?;
            match self.chars.peek() {
                None => return Err(self.err(ErrorKind::UnterminatedList, "expected `}`")),
                Some('}') => {
                    self.chars.next();
                    break;
                }
                _ => {
                    let key = self.read_form()?;
                    self.skip_ignorable()?;
                    if self.chars.peek() == Some('}') {
                        return Err(self.err(ErrorKind::UnterminatedList, "map literal has odd number of forms"));
                    }
                    let value = self.read_form()?;
                    entries.push((key, value));
                }
            }
        }
        Ok(Form::new(Value::Map(Arc::new(entries)), self.make_span(start)))
    }

    fn read_string(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let mut s = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.err(ErrorKind::UnterminatedString, "unterminated string literal")),
                Some('"') => break,
                Some('\\') => s.push(self.read_escape()?),
                Some(c) => s.push(c),
            }
        }
        Ok(Form::new(Value::Str(Arc::from(s)), self.make_span(start)))
    }

    fn read_escape(&mut self) -> CResult<char> {
        match self.chars.next() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('0') => Ok('\0'),
            Some('b') => Ok('\u{0008}'),
            Some('f') => Ok('\u{000C}'),
            Some('u') => {
                let mut rest: Vec<char> = Vec::new();
                for _ in 0..4 {
                    match self.chars.next() {
                        Some(c) => rest.push(c),
                        None => return Err(self.err(ErrorKind::InvalidEscape, "unterminated \\u escape")),
                    }
                }
                numeric::parse_unicode_escape(&mut rest.into_iter())
                    .ok_or_else(|| self.err(ErrorKind::InvalidEscape, "invalid \\u escape"))
            }
            Some(other) => Err(self.err(ErrorKind::InvalidEscape, format!("invalid escape `\\{other}`"))),
            None => Err(self.err(ErrorKind::UnterminatedString, "unterminated string literal")),
        }
    }

    fn read_char(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let first = self
            .chars
            .next()
            .ok_or_else(|| self.err(ErrorKind::InvalidEscape, "unterminated character literal"))?;
        if first.is_alphabetic() {
            let mut name = String::from(first);
            while let Some(c) = self.chars.peek() {
                if c.is_alphanumeric() || c == '+' {
                    name.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
            if name.chars().count() == 1 {
                return Ok(Form::new(Value::Char(first), self.make_span(start)));
            }
            let ch = numeric::named_char(&name)
                .ok_or_else(|| self.err(ErrorKind::InvalidEscape, format!("unknown character name `\\{name}`")))?;
            return Ok(Form::new(Value::Char(ch), self.make_span(start)));
        }
        Ok(Form::new(Value::Char(first), self.make_span(start)))
    }

    fn read_keyword(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let auto_qualify = self.chars.peek() == Some(':');
        if auto_qualify {
            self.chars.next();
        }
        let token = self.read_symbolic_token();
        let (ns, name) = split_ns(&token);
        let name_id = self.interner.intern(name);
        let kw = if auto_qualify {
            // `::name` / `::alias/name` resolves against the current ns;
            // full alias-to-namespace resolution happens later in the
            // analyzer's Env, so an alias ns text is kept as written.
            match ns {
                Some(ns) => Keyword::qualified(self.interner.intern(ns), name_id),
                None => {
                    let current = self.opts.current_ns.clone().unwrap_or_else(|| "user".to_owned());
                    Keyword::qualified(self.interner.intern(&current), name_id)
                }
            }
        } else {
            match ns {
                Some(ns) => Keyword::qualified(self.interner.intern(ns), name_id),
                None => Keyword::unqualified(name_id),
            }
        };
        Ok(Form::new(Value::Keyword(kw), self.make_span(start)))
    }

    fn read_symbolic_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.chars.peek() {
            if is_terminating(c) {
                break;
            }
            token.push(c);
            self.chars.next();
        }
        token
    }

    fn read_atom(&mut self, start: SourcePos) -> CResult<Form> {
        let token = self.read_symbolic_token();
        if token.is_empty() {
            let c = self.chars.next().unwrap();
            return Err(self.err(ErrorKind::InvalidDispatchChar, format!("unexpected character `{c}`")));
        }
        if numeric::looks_like_number(&token) {
            let value = numeric::parse_number(&token, &self.loc())?;
            return Ok(Form::new(value, self.make_span(start)));
        }
        let value = match token.as_str() {
            "nil" => Value::Nil,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                let (ns, name) = split_ns(&token);
                let name_id = self.interner.intern(name);
                let sym = match ns {
                    Some(ns) => Symbol::qualified(self.interner.intern(ns), name_id),
                    None => Symbol::unqualified(name_id),
                };
                Value::Symbol(sym)
            }
        };
        Ok(Form::new(value, self.make_span(start)))
    }

    fn read_prefixed(&mut self, head: &str, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let inner = self.read_form()?;
        Ok(self.wrap_list(head, vec![inner], start))
    }

    fn wrap_list(&mut self, head: &str, mut items: Vec<Form>, start: SourcePos) -> Form {
        let name = self.interner.intern(head);
        let mut full = vec![Form::new(Value::Symbol(Symbol::unqualified(name)), None)];
        full.append(&mut items);
        Form::new(Value::List(Arc::new(full)), self.make_span(start))
    }

    fn read_unquote(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let splicing = self.chars.peek() == Some('@');
        if splicing {
            self.chars.next();
        }
        let inner = self.read_form()?;
        let head = if splicing { "clojure.core/unquote-splicing" } else { "clojure.core/unquote" };
        Ok(self.wrap_list(head, vec![inner], start))
    }

    fn read_syntax_quote(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let inner = self.read_form()?;
        let expanded = syntax_quote::expand(self, &inner)?;
        Ok(Form {
            value: expanded.value,
            meta: inner.meta.or(expanded.meta),
            span: self.make_span(start),
        })
    }

    fn read_metadata(&mut self, _start: SourcePos) -> CResult<Form> {
        self.chars.next();
        let meta_form = self.read_form()?;
        let meta = self.form_to_meta(meta_form)?;
        let target = self.read_form()?;
        let merged = match target.meta.as_deref().cloned() {
            Some(existing) => meta.merge(existing),
            None => meta,
        };
        Ok(target.with_meta(merged))
    }

    /// Normalizes `^{...}` (a literal map), `^:kw` (shorthand boolean flag),
    /// and `^"Type"` (shorthand `:tag`) into a `Meta`.
    fn form_to_meta(&mut self, form: Form) -> CResult<Meta> {
        match form.value {
            Value::Map(entries) => Ok(Meta {
                entries: (*entries).clone(),
            }),
            Value::Keyword(_) => {
                let true_form = Form::new(Value::Bool(true), None);
                Ok(Meta {
                    entries: vec![(form, true_form)],
                })
            }
            Value::Str(_) | Value::Symbol(_) => {
                let tag = self.interner.intern("tag");
                let key = Form::new(Value::Keyword(Keyword::unqualified(tag)), None);
                Ok(Meta {
                    entries: vec![(key, form)],
                })
            }
            _ => Err(self.err(ErrorKind::InvalidDispatchChar, "unsupported metadata shorthand")),
        }
    }

    fn read_dispatch(&mut self, start: SourcePos) -> CResult<ReadOutcome> {
        self.chars.next();
        match self.chars.peek() {
            Some('{') => Ok(ReadOutcome::One(self.read_seq('}', |items| Value::Set(Arc::new(items)), start)?)),
            Some('(') => Ok(ReadOutcome::One(self.read_anon_fn(start)?)),
            Some('"') => Ok(ReadOutcome::One(self.read_regex(start)?)),
            Some('\'') => Ok(ReadOutcome::One(self.read_prefixed("var", start)?)),
            Some('^') => {
                self.chars.next();
                Ok(ReadOutcome::One(self.read_metadata(start)?))
            }
            Some('=') => Ok(ReadOutcome::One(self.read_read_eval(start)?)),
            Some('?') => self.read_reader_conditional(start),
            Some('_') => {
                self.chars.next();
                self.skip_ignorable()?;
                self.read_form()?;
                Ok(ReadOutcome::One(self.read_form()?))
            }
            Some(c) if c.is_alphabetic() => Ok(ReadOutcome::One(self.read_tagged_literal(start)?)),
            Some(c) => Err(self.err(ErrorKind::InvalidDispatchChar, format!("invalid dispatch character `{c}`"))),
            None => Err(self.err(ErrorKind::InvalidDispatchChar, "dispatch macro at end of input")),
        }
    }

    fn read_anon_fn(&mut self, start: SourcePos) -> CResult<Form> {
        let body = self.read_seq(')', |items| Value::List(Arc::new(items)), start)?;
        let mut max_positional = 0u32;
        let mut has_rest = false;
        if let Value::List(items) = &body.value {
            collect_anon_params(items, self.interner, &mut max_positional, &mut has_rest);
        }
        let mut params = Vec::new();
        for n in 1..=max_positional {
            let name = self.interner.intern(&format!("%{n}"));
            params.push(Form::new(Value::Symbol(Symbol::unqualified(name)), None));
        }
        if has_rest {
            let amp = self.interner.intern("&");
            let rest = self.interner.intern("%&");
            params.push(Form::new(Value::Symbol(Symbol::unqualified(amp)), None));
            params.push(Form::new(Value::Symbol(Symbol::unqualified(rest)), None));
        }
        let params_vec = Form::new(Value::Vector(Arc::new(params)), None);
        Ok(self.wrap_list("fn*", vec![params_vec, body], start))
    }

    fn read_regex(&mut self, start: SourcePos) -> CResult<Form> {
        let Form { value, .. } = self.read_string(start)?;
        let Value::Str(text) = value else { unreachable!("read_string always returns Value::Str") };
        regex::Regex::new(&text).map_err(|e| self.err(ErrorKind::InvalidEscape, format!("invalid regex: {e}")))?;
        Ok(Form::new(Value::Regex(text), self.make_span(start)))
    }

    fn read_read_eval(&mut self, start: SourcePos) -> CResult<Form> {
        self.chars.next();
        if !self.opts.allow_read_eval {
            return Err(self.err(ErrorKind::ReadEvalDisabled, "#= read-time eval is disabled"));
        }
        // Even when enabled, this core has no evaluator of its own (macro
        // evaluation is delegated to the host VM, spec.md §9); the form is
        // simply read through and left for the analyzer/driver to handle.
        self.read_form()
    }

    fn read_reader_conditional(&mut self, start: SourcePos) -> CResult<ReadOutcome> {
        self.chars.next();
        let splicing = self.chars.peek() == Some('@');
        if splicing {
            self.chars.next();
        }
        if self.opts.read_conditional == ReadConditional::Disallow {
            return Err(self.err(ErrorKind::FeatureNotFound, "reader conditionals are disallowed here"));
        }
        self.skip_ignorable()?;
        if self.chars.next() != Some('(') {
            return Err(self.err(ErrorKind::UnterminatedList, "expected `(` after `#?`"));
        }
        let mut clauses = Vec::new();
        loop {
            self.skip_ignorable()?;
            match self.chars.peek() {
                None => return Err(self.err(ErrorKind::UnterminatedList, "unterminated reader conditional")),
                Some(')') => {
                    self.chars.next();
                    break;
                }
                _ => {
                    let feature_form = self.read_form()?;
                    let feature = match &feature_form.value {
                        Value::Keyword(kw) if kw.ns.is_none() && self.interner.resolve(kw.name) == "default" => FeatureKey::Default,
                        Value::Keyword(kw) => FeatureKey::Named(*kw),
                        _ => return Err(self.err(ErrorKind::InvalidDispatchChar, "reader conditional feature must be a keyword")),
                    };
                    let form = self.read_form()?;
                    clauses.push(ConditionalClause { feature, form });
                }
            }
        }
        if self.opts.read_conditional == ReadConditional::Preserve {
            return Ok(ReadOutcome::One(Form::new(
                Value::ReaderConditional {
                    splicing,
                    clauses: Arc::new(clauses),
                },
                self.make_span(start),
            )));
        }
        self.resolve_reader_conditional(clauses, splicing, start)
    }

    fn resolve_reader_conditional(&mut self, clauses: Vec<ConditionalClause>, splicing: bool, start: SourcePos) -> CResult<ReadOutcome> {
        for clause in &clauses {
            let matches = match clause.feature {
                FeatureKey::Default => true,
                FeatureKey::Named(kw) => self.opts.features.contains(self.interner.resolve(kw.name)),
            };
            if matches {
                let mut form = clause.form.clone();
                form.span = self.make_span(start);
                if !splicing {
                    return Ok(ReadOutcome::One(form));
                }
                let elements = match &form.value {
                    Value::Vector(items) | Value::List(items) | Value::Set(items) => (**items).clone(),
                    _ => {
                        return Err(self.err(
                            ErrorKind::InvalidDispatchChar,
                            "#?@ matched clause must be a collection to splice",
                        ));
                    }
                };
                return Ok(ReadOutcome::Spliced(elements));
            }
        }
        Err(self.err(ErrorKind::FeatureNotFound, "no matching reader-conditional feature and no :default"))
    }

    fn read_tagged_literal(&mut self, start: SourcePos) -> CResult<Form> {
        let token = self.read_symbolic_token();
        self.skip_ignorable()?;
        let payload = self.read_form()?;
        match token.as_str() {
            "inst" => {
                let Value::Str(text) = &payload.value else {
                    return Err(self.err(ErrorKind::InvalidDispatchChar, "#inst requires a string literal"));
                };
                Ok(Form::new(Value::Inst(text.clone()), self.make_span(start)))
            }
            "uuid" => {
                let Value::Str(text) = &payload.value else {
                    return Err(self.err(ErrorKind::InvalidDispatchChar, "#uuid requires a string literal"));
                };
                let id = uuid::Uuid::parse_str(text).map_err(|e| self.err(ErrorKind::InvalidDispatchChar, format!("invalid uuid: {e}")))?;
                Ok(Form::new(Value::Uuid(id), self.make_span(start)))
            }
            _ => {
                if !self.opts.default_data_readers {
                    return Err(self.err(ErrorKind::InvalidDispatchChar, format!("no data reader registered for #{token}")));
                }
                let (ns, name) = split_ns(&token);
                let name_id = self.interner.intern(name);
                let sym = match ns {
                    Some(ns) => Symbol::qualified(self.interner.intern(ns), name_id),
                    None => Symbol::unqualified(name_id),
                };
                Ok(Form::new(Value::Tagged(sym, Arc::new(payload)), self.make_span(start)))
            }
        }
    }

    pub fn interner_mut(&mut self) -> &mut Interner {
        self.interner
    }

    pub fn interner_ref(&self) -> &Interner {
        self.interner
    }

    pub fn opts(&self) -> &ReaderOpts {
        &self.opts
    }
}

fn is_terminating(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '"' | ';' | '(' | ')' | '[' | ']' | '{' | '}' | '\\')
}

/// Splits `ns/name`, being careful that `/` itself (the division symbol) and
/// a leading `/` do not get misparsed as a namespace separator.
fn split_ns(token: &str) -> (Option<&str>, &str) {
    if token == "/" {
        return (None, token);
    }
    match token.rfind('/') {
        Some(idx) if idx > 0 && idx < token.len() - 1 => (Some(&token[..idx]), &token[idx + 1..]),
        _ => (None, token),
    }
}

/// Walks an anonymous-function body collecting the highest `%N` seen and
/// whether `%&` appears, per spec.md §4.1 `#(...)`.
fn collect_anon_params(items: &[Form], interner: &Interner, max_positional: &mut u32, has_rest: &mut bool) {
    for item in items {
        walk_for_percent(&item.value, interner, max_positional, has_rest);
    }
}

/// Recognizes `%`, `%N`, and `%&` symbols inside a `#(...)` body, tracking
/// the highest `N` seen (`%` alone counts as `%1`) and whether `%&` appears
/// (spec.md §4.1: "the highest `%N` or `%&` seen determines arity").
fn walk_for_percent(value: &Value, interner: &Interner, max_positional: &mut u32, has_rest: &mut bool) {
    match value {
        Value::Symbol(sym) if sym.ns.is_none() => {
            let text = interner.resolve(sym.name);
            if text == "%&" {
                *has_rest = true;
            } else if text == "%" {
                *max_positional = (*max_positional).max(1);
            } else if let Some(n) = text.strip_prefix('%').and_then(|rest| rest.parse::<u32>().ok()) {
                *max_positional = (*max_positional).max(n);
            }
        }
        Value::List(items) | Value::Vector(items) | Value::Set(items) => {
            for item in items.iter() {
                walk_for_percent(&item.value, interner, max_positional, has_rest);
            }
        }
        Value::Map(entries) => {
            for (k, v) in entries.iter() {
                walk_for_percent(&k.value, interner, max_positional, has_rest);
                walk_for_percent(&v.value, interner, max_positional, has_rest);
            }
        }
        _ => {}
    }
}

/// `read_fold(f, source, opts, env) → env` (spec.md §4.1): consumes the
/// entire stream, invoking `f(form, env) → env` between reads.
pub fn read_fold<E>(
    source: &str,
    interner: &mut Interner,
    opts: ReaderOpts,
    mut env: E,
    mut f: impl FnMut(Form, E) -> CResult<E>,
) -> CResult<E> {
    let mut reader = Reader::new(source, interner, opts);
    loop {
        match reader.read_one()? {
            Some(form) => env = f(form, env)?,
            None => return Ok(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(source: &str) -> (Vec<Form>, Interner) {
        let mut interner = Interner::new();
        let forms = {
            let mut reader = Reader::new(source, &mut interner, ReaderOpts::default());
            let mut forms = Vec::new();
            while let Some(form) = reader.read_one().unwrap() {
                forms.push(form);
            }
            forms
        };
        (forms, interner)
    }

    #[test]
    fn reads_nested_collections() {
        let (forms, _interner) = read_all("(1 [2 3] {:a 1})");
        assert_eq!(forms.len(), 1);
        assert!(matches!(forms[0].value, Value::List(_)));
    }

    #[test]
    fn comments_and_discard_are_skipped() {
        let (forms, _interner) = read_all("; a comment\n1 #_2 3");
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[0].value, Value::Int(1));
        assert_eq!(forms[1].value, Value::Int(3));
    }

    #[test]
    fn anon_fn_rewrites_to_fn_star_with_inferred_arity() {
        let (forms, mut interner) = read_all("#(+ %1 %2)");
        let Value::List(items) = &forms[0].value else {
            panic!("expected list")
        };
        let head = items[0].value.as_symbol().unwrap();
        assert_eq!(head.display(&interner).to_string(), "fn*");
        let Value::Vector(params) = &items[1].value else {
            panic!("expected params vector")
        };
        assert_eq!(params.len(), 2);
        let _ = &mut interner;
    }

    #[test]
    fn reader_conditional_picks_matching_feature() {
        let mut interner = Interner::new();
        let mut opts = ReaderOpts {
            read_conditional: ReadConditional::Allow,
            ..ReaderOpts::default()
        };
        opts.features.insert("clj".to_owned());
        let mut reader = Reader::new("#?(:clj 1 :cljs 2)", &mut interner, opts);
        let form = reader.read_one().unwrap().unwrap();
        assert_eq!(form.value, Value::Int(1));
    }

    #[test]
    fn reader_conditional_with_no_match_and_no_default_errors() {
        let mut interner = Interner::new();
        let opts = ReaderOpts {
            read_conditional: ReadConditional::Allow,
            ..ReaderOpts::default()
        };
        let mut reader = Reader::new("#?(:cljs 2)", &mut interner, opts);
        let err = reader.read_one().unwrap_err();
        assert_eq!(err.kind, ErrorKind::FeatureNotFound);
    }

    #[test]
    fn splicing_reader_conditional_splices_into_enclosing_list() {
        let mut interner = Interner::new();
        let mut opts = ReaderOpts {
            read_conditional: ReadConditional::Allow,
            ..ReaderOpts::default()
        };
        opts.features.insert("clj".to_owned());
        let mut reader = Reader::new("(1 #?@(:clj [2 3]) 4)", &mut interner, opts);
        let form = reader.read_one().unwrap().unwrap();
        let Value::List(items) = &form.value else {
            panic!("expected list")
        };
        let values: Vec<_> = items.iter().map(|f| f.value.clone()).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);
    }

    #[test]
    fn splicing_reader_conditional_outside_a_sequence_is_an_error() {
        let mut interner = Interner::new();
        let mut opts = ReaderOpts {
            read_conditional: ReadConditional::Allow,
            ..ReaderOpts::default()
        };
        opts.features.insert("clj".to_owned());
        let mut reader = Reader::new("#?@(:clj [2 3])", &mut interner, opts);
        let err = reader.read_one().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidDispatchChar);
    }

    #[test]
    fn unterminated_list_is_an_error() {
        let mut interner = Interner::new();
        let mut reader = Reader::new("(1 2", &mut interner, ReaderOpts::default());
        let err = reader.read_one().unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnterminatedList);
    }

    #[test]
    fn metadata_merges_left_to_right() {
        let (forms, _interner) = read_all("^{:a 1} ^{:a 2} x");
        let Some(meta) = &forms[0].meta else {
            panic!("expected metadata")
        };
        assert_eq!(meta.entries.len(), 1);
    }
}
