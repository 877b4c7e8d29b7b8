#![doc = include_str!("../../../README.md")]

pub mod analyzer;
pub mod ast;
pub mod config;
pub mod core_ir;
pub mod driver;
pub mod emitter;
pub mod env;
pub mod error;
pub mod host;
pub mod intern;
pub mod module_ctx;
pub mod pos;
pub mod reader;
pub mod tracer;

pub use crate::{
    analyzer::{AnalyzeCtx, analyze, analyze_top_level, macroexpand::MacroExpander, macroexpand::NoMacros},
    ast::Node,
    config::CompileOpts,
    core_ir::{IrExpr, IrFunction, IrModule},
    driver::{CompileSession, FormResult},
    env::Env,
    error::{CResult, CompileError, ErrorKind},
    host::{Assembler, Bytecode, HostOpts, InMemoryHost, Loader},
    intern::{Interner, Keyword, Symbol},
    module_ctx::{CompileTaskId, ModuleContext, ModuleContextRegistry},
    reader::{Reader, ReaderOpts, Value},
    tracer::{CompilerTracer, NoopTracer, RecordingTracer, StderrTracer},
};
