//! Compiler diagnostics/tracing (SPEC_FULL.md §2.1).
//!
//! Grounded on the teacher's `tracer.rs` `VmTracer` trait: every hook has a
//! no-op default so [`NoopTracer`] costs nothing, and the pipeline is
//! generic over the tracer type so the compiler monomorphizes it away in
//! the production build rather than paying for a dynamic dispatch or an
//! external logging crate.

use crate::pos::CodeLoc;

/// One recorded pipeline event, captured by [`RecordingTracer`] for tests
/// and post-mortem inspection of a failed compile.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    FormRead { loc: Option<CodeLoc> },
    MacroExpansionStep { macro_name: String, step: u32 },
    SpecialFormDispatch { form: String },
    AstNodeEmitted { op: &'static str },
    ModuleFinalized { module: String, function_count: usize },
}

/// Hook trait for observing the reader → analyzer → emitter pipeline.
/// Every method has a no-op default (SPEC_FULL.md §2.1); implementations
/// override only the hooks they care about.
pub trait CompilerTracer {
    #[inline(always)]
    fn on_form_read(&mut self, _loc: Option<&CodeLoc>) {}

    #[inline(always)]
    fn on_macroexpand_step(&mut self, _macro_name: &str, _step: u32) {}

    #[inline(always)]
    fn on_special_form(&mut self, _form: &str) {}

    #[inline(always)]
    fn on_ast_node(&mut self, _op: &'static str) {}

    #[inline(always)]
    fn on_module_finalized(&mut self, _module: &str, _function_count: usize) {}
}

/// Zero-cost default tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl CompilerTracer for NoopTracer {}

/// Human-readable trace to stderr, used by the CLI's `-v` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl CompilerTracer for StderrTracer {
    fn on_form_read(&mut self, loc: Option<&CodeLoc>) {
        match loc {
            Some(loc) => eprintln!("[read] {loc}"),
            None => eprintln!("[read] <no location>"),
        }
    }

    fn on_macroexpand_step(&mut self, macro_name: &str, step: u32) {
        eprintln!("[macroexpand] {macro_name} step {step}");
    }

    fn on_special_form(&mut self, form: &str) {
        eprintln!("[special-form] {form}");
    }

    fn on_ast_node(&mut self, op: &'static str) {
        eprintln!("[ast] {op}");
    }

    fn on_module_finalized(&mut self, module: &str, function_count: usize) {
        eprintln!("[module] {module} ({function_count} functions)");
    }
}

/// Captures every event into a `Vec`, for tests and post-mortem inspection
/// of a failed compile (SPEC_FULL.md §2.1).
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CompilerTracer for RecordingTracer {
    fn on_form_read(&mut self, loc: Option<&CodeLoc>) {
        self.events.push(TraceEvent::FormRead { loc: loc.cloned() });
    }

    fn on_macroexpand_step(&mut self, macro_name: &str, step: u32) {
        self.events.push(TraceEvent::MacroExpansionStep {
            macro_name: macro_name.to_owned(),
            step,
        });
    }

    fn on_special_form(&mut self, form: &str) {
        self.events.push(TraceEvent::SpecialFormDispatch { form: form.to_owned() });
    }

    fn on_ast_node(&mut self, op: &'static str) {
        self.events.push(TraceEvent::AstNodeEmitted { op });
    }

    fn on_module_finalized(&mut self, module: &str, function_count: usize) {
        self.events.push(TraceEvent::ModuleFinalized {
            module: module.to_owned(),
            function_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_events_in_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_special_form("if");
        tracer.on_ast_node("if");
        assert_eq!(tracer.events.len(), 2);
        assert!(matches!(tracer.events[0], TraceEvent::SpecialFormDispatch { .. }));
        assert!(matches!(tracer.events[1], TraceEvent::AstNodeEmitted { op: "if" }));
    }

    #[test]
    fn noop_tracer_accepts_every_hook() {
        let mut tracer = NoopTracer;
        tracer.on_form_read(None);
        tracer.on_macroexpand_step("foo", 1);
        tracer.on_special_form("do");
        tracer.on_ast_node("do");
        tracer.on_module_finalized("ex", 0);
    }
}
