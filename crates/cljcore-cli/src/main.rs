//! `cljc` — the `compile`/`run`/`repl` command-line surface over `cljcore`
//! (spec.md §6 "CLI surface (optional outer collaborator)").
//!
//! Grounded on the teacher's `ouros-cli/src/main.rs`: hand-rolled argv
//! parsing (`env::args()`, no `clap` dependency — the teacher carries none
//! either), read-file-then-run shape, `ExitCode` for the process exit
//! status.

use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
};

use cljcore::{
    CompileOpts, CompileSession, CompilerTracer, HostOpts, InMemoryHost, NoMacros, StderrTracer,
};

const EXIT_SUCCESS: u8 = 0;
const EXIT_COMPILE_ERROR: u8 = 1;
const EXIT_BAD_INVOCATION: u8 = 2;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        usage();
        return ExitCode::from(EXIT_BAD_INVOCATION);
    };

    match command.as_str() {
        "compile" => compile_command(rest),
        "run" => run_command(rest),
        "repl" => repl_command(),
        "-h" | "--help" | "help" => {
            usage();
            ExitCode::from(EXIT_SUCCESS)
        }
        other => {
            eprintln!("unknown command: {other}");
            usage();
            ExitCode::from(EXIT_BAD_INVOCATION)
        }
    }
}

fn usage() {
    eprintln!("usage: cljc <compile <paths...> | run <script> | repl>");
}

/// `*compile-files*` true, `compile_path` under the cwd — the CLI's own
/// default `HostOpts`, picking up `CLJCORE_COMPILER_OPTIONS` per spec.md §6.
fn default_host_opts() -> HostOpts {
    let mut host_opts = HostOpts {
        compile_files: false,
        ..HostOpts::default()
    };
    cljcore::config::apply_env_compiler_options(&mut host_opts);
    host_opts
}

fn compile_command(paths: &[String]) -> ExitCode {
    if paths.is_empty() {
        eprintln!("compile requires at least one path");
        return ExitCode::from(EXIT_BAD_INVOCATION);
    }

    let mut session = CompileSession::new("user", InMemoryHost::default(), InMemoryHost::default(), CompileOpts::default(), default_host_opts());
    let mut expander = NoMacros;
    let mut tracer = StderrTracer;
    let mut had_error = false;

    for path in paths {
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("{path}: {err}");
                had_error = true;
                continue;
            }
        };
        match session.eval_source(&source, path, &mut expander, &mut tracer) {
            Ok(results) => {
                for result in &results {
                    for module in &result.modules {
                        println!("{path}: compiled module {}", module.name);
                    }
                }
            }
            Err(err) => {
                eprintln!("{err}");
                had_error = true;
            }
        }
    }

    if had_error {
        ExitCode::from(EXIT_COMPILE_ERROR)
    } else {
        ExitCode::from(EXIT_SUCCESS)
    }
}

fn run_command(rest: &[String]) -> ExitCode {
    let Some(path) = rest.first() else {
        eprintln!("run requires a script path");
        return ExitCode::from(EXIT_BAD_INVOCATION);
    };
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("{path}: {err}");
            return ExitCode::from(EXIT_BAD_INVOCATION);
        }
    };

    let mut session = CompileSession::new("user", InMemoryHost::default(), InMemoryHost::default(), CompileOpts::default(), default_host_opts());
    let mut expander = NoMacros;
    let mut tracer = cljcore::NoopTracer;

    match session.eval_source(&source, path, &mut expander, &mut tracer) {
        Ok(results) => {
            if let Some(last) = results.last() {
                for name in &last.loaded {
                    println!("{name}");
                }
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
    }
}

fn repl_command() -> ExitCode {
    let mut session = CompileSession::new("user", InMemoryHost::default(), InMemoryHost::default(), CompileOpts::default(), default_host_opts());
    let mut expander = NoMacros;
    let mut tracer = cljcore::NoopTracer;

    let stdin = io::stdin();
    let mut had_error = false;
    loop {
        print!("user=> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        let bytes_read = match stdin.lock().read_line(&mut line) {
            Ok(n) => n,
            Err(err) => {
                eprintln!("error reading stdin: {err}");
                return ExitCode::from(EXIT_BAD_INVOCATION);
            }
        };
        if bytes_read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        match session.eval_source(&line, "repl", &mut expander, &mut tracer) {
            Ok(results) => {
                for result in &results {
                    for name in &result.loaded {
                        println!("{name}");
                    }
                }
            }
            Err(err) => {
                eprintln!("{err}");
                had_error = true;
            }
        }
    }
    if had_error {
        ExitCode::from(EXIT_COMPILE_ERROR)
    } else {
        ExitCode::from(EXIT_SUCCESS)
    }
}
