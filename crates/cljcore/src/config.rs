//! Per-compile configuration (SPEC_FULL.md §2.3).

use crate::{
    host::HostOpts,
    reader::ReaderOpts,
};

/// Bundles reader/analyzer/emitter options for one compile (SPEC_FULL.md
/// §2.3). `HostOpts` is kept separate since it configures the external
/// `assemble`/`load` collaborators rather than this crate's own stages.
#[derive(Debug, Clone, Default)]
pub struct CompileOpts {
    pub reader: ReaderOpts,
    /// Suppresses the `symbol used as an Erlang fun reference` analyzer
    /// warning (spec.md §7 `no-warn-symbol-as-erl-fun`).
    pub no_warn_symbol_as_erl_fun: bool,
    /// Suppresses the `dynamic Var without earmuffs` analyzer warning
    /// (spec.md §7 `no-warn-dynamic-var-name`).
    pub no_warn_dynamic_var_name: bool,
}

/// Reads `CLJCORE_COMPILER_OPTIONS` from the environment and appends its
/// contents to `host_opts` (SPEC_FULL.md §2.3, spec.md §6).
pub fn apply_env_compiler_options(host_opts: &mut HostOpts) {
    if let Ok(value) = std::env::var("CLJCORE_COMPILER_OPTIONS") {
        crate::host::apply_env_options(host_opts, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opts_do_not_suppress_warnings() {
        let opts = CompileOpts::default();
        assert!(!opts.no_warn_symbol_as_erl_fun);
        assert!(!opts.no_warn_dynamic_var_name);
    }
}
