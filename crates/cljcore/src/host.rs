//! External collaborators (spec.md §1, §6): the host VM's bytecode
//! assembler and module loader. This crate only calls out to them through
//! these traits — it never assembles or loads bytecode itself.
//!
//! Grounded on the teacher's own external-function-call boundary
//! (`RunProgress::FunctionCall`/`ExternalResult`): "the host does this, we
//! only call out" is the same shape, adapted from a runtime call boundary
//! to a compile-time one.

use std::path::PathBuf;

use crate::{
    core_ir::IrModule,
    error::{CResult, CompileError, ErrorKind},
};

/// `assemble`/`load` configuration (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct HostOpts {
    pub compile_path: Option<PathBuf>,
    pub compile_protocols_path: Option<PathBuf>,
    /// `*compile-files*`: when true, bytecode is written under
    /// `compile_path`/`compile_protocols_path`; otherwise it is stashed in
    /// memory keyed by module name (spec.md §6).
    pub compile_files: bool,
    /// Extra assembler flags, appended from `CLJCORE_COMPILER_OPTIONS`
    /// (SPEC_FULL.md §2.3, spec.md §6's `ERL_COMPILER_OPTIONS` equivalent).
    pub assembler_flags: Vec<String>,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Bytecode,
    /// Also emit a `.core` textual dump alongside the bytecode.
    Core,
    /// Also emit a `.S` assembly-level textual dump alongside the bytecode.
    Asm,
}

/// Parses `CLJCORE_COMPILER_OPTIONS`-style environment text (whitespace-
/// separated flags) and appends it to `opts.assembler_flags` (spec.md §6).
pub fn apply_env_options(opts: &mut HostOpts, env_value: &str) {
    opts.assembler_flags.extend(env_value.split_whitespace().map(str::to_owned));
}

/// Picks the path a module's bytecode should be written under, per spec.md
/// §6: protocol-implementation modules prefer `compile_protocols_path`,
/// falling back to `compile_path` with a warning if unset.
pub fn resolve_compile_path(opts: &HostOpts, is_protocol_module: bool) -> CResult<Option<(PathBuf, bool)>> {
    if !opts.compile_files {
        return Ok(None);
    }
    if is_protocol_module {
        if let Some(path) = &opts.compile_protocols_path {
            return Ok(Some((path.clone(), false)));
        }
        return match &opts.compile_path {
            Some(path) => Ok(Some((path.clone(), true))),
            None => Err(CompileError::new(
                ErrorKind::CompilePathUnset,
                "*compile-files* is true but neither compile_protocols_path nor compile_path is set",
            )),
        };
    }
    match &opts.compile_path {
        Some(path) => Ok(Some((path.clone(), false))),
        None => Err(CompileError::new(
            ErrorKind::CompilePathUnset,
            "*compile-files* is true but compile_path is unset",
        )),
    }
}

/// Opaque bytecode handle produced by [`Assembler::assemble`].
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub module_name: String,
    pub bytes: Vec<u8>,
}

/// The host VM's bytecode assembler (spec.md §6: `assemble(core_ir) →
/// bytecode`). An external collaborator; this crate depends only on the
/// trait.
pub trait Assembler {
    fn assemble(&mut self, module: &IrModule, opts: &HostOpts) -> CResult<Bytecode>;
}

/// The host VM's module loader (spec.md §6: `load(name, bytecode) → ok |
/// Error`).
pub trait Loader {
    fn load(&mut self, module_name: &str, bytecode: &Bytecode) -> CResult<()>;
}

/// An in-memory assembler/loader pair used by tests and by the driver when
/// `*compile-files*` is false (spec.md §6: "otherwise it stashes the
/// bytecode in memory keyed by module name"). Not a faithful host VM — it
/// exists so the pipeline can be exercised end-to-end without a real
/// backend.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    pub assembled: Vec<(String, usize)>,
    pub loaded: ahash::AHashMap<String, Bytecode>,
}

impl Assembler for InMemoryHost {
    fn assemble(&mut self, module: &IrModule, _opts: &HostOpts) -> CResult<Bytecode> {
        let bytes = postcard::to_allocvec(module)
            .map_err(|e| CompileError::wrap(ErrorKind::AssemblyFailed, "postcard serialization failed", CompileError::new(ErrorKind::IoFailure, e.to_string())))?;
        self.assembled.push((module.name.clone(), bytes.len()));
        Ok(Bytecode {
            module_name: module.name.clone(),
            bytes,
        })
    }
}

impl Loader for InMemoryHost {
    fn load(&mut self, module_name: &str, bytecode: &Bytecode) -> CResult<()> {
        self.loaded.insert(module_name.to_owned(), bytecode.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_options_split_on_whitespace() {
        let mut opts = HostOpts::default();
        apply_env_options(&mut opts, "--warn-shadow  --no-debug-info");
        assert_eq!(opts.assembler_flags, vec!["--warn-shadow", "--no-debug-info"]);
    }

    #[test]
    fn compile_path_unset_is_an_error_when_compile_files_is_true() {
        let opts = HostOpts {
            compile_files: true,
            ..Default::default()
        };
        let err = resolve_compile_path(&opts, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CompilePathUnset);
    }

    #[test]
    fn protocol_path_falls_back_to_compile_path() {
        let opts = HostOpts {
            compile_files: true,
            compile_path: Some(PathBuf::from("/out")),
            ..Default::default()
        };
        let (path, warn) = resolve_compile_path(&opts, true).unwrap().unwrap();
        assert_eq!(path, PathBuf::from("/out"));
        assert!(warn);
    }

    #[test]
    fn in_memory_host_round_trips_a_module() {
        let mut host = InMemoryHost::default();
        let module = IrModule::new("ex");
        let opts = HostOpts::default();
        let bytecode = host.assemble(&module, &opts).unwrap();
        host.load("ex", &bytecode).unwrap();
        assert!(host.loaded.contains_key("ex"));
    }
}
