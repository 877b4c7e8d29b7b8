//! Fixture-driven end-to-end test runner (SPEC_FULL.md §2.4), wired exactly
//! as the teacher wires its own `datatest_runner` test binary: `[[test]]
//! harness = false` in `Cargo.toml`, `datatest_stable::harness!` picking up
//! every file under `tests/fixtures`.
//!
//! Each `tests/fixtures/*.clj` has a sibling `*.expected` holding one line per
//! top-level form: `ok: <module> <module> ...` (sorted module names a
//! successful compile-and-load produced) or `error: <ErrorKind>` for the
//! form that stops the batch. `eval_source` itself stops at the first error,
//! so an `error:` line is always the last line in a fixture's expected file.

use std::path::Path;

use cljcore::{CompileOpts, CompileSession, HostOpts, InMemoryHost, NoMacros, NoopTracer};

fn run_fixture(path: &Path) -> datatest_stable::Result<()> {
    let source = std::fs::read_to_string(path)?;
    let expected_path = path.with_extension("expected");
    let expected = std::fs::read_to_string(&expected_path)?;

    let mut session = CompileSession::new(
        "user",
        InMemoryHost::default(),
        InMemoryHost::default(),
        CompileOpts::default(),
        HostOpts::default(),
    );
    let mut expander = NoMacros;
    let mut tracer = NoopTracer;

    let mut lines = Vec::new();
    let mut reader_opts = CompileOpts::default().reader;
    reader_opts.file = path.to_string_lossy().into_owned().into();

    // Read every top-level form up front so the `Reader`'s borrow of
    // `session.interner` ends before `compile_and_eval` needs `&mut session`.
    let mut forms = Vec::new();
    let mut read_error = None;
    {
        let mut reader = cljcore::Reader::new(&source, &mut session.interner, reader_opts);
        loop {
            match reader.read_one() {
                Ok(Some(form)) => forms.push(form.value),
                Ok(None) => break,
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            }
        }
    }

    for form in &forms {
        match session.compile_and_eval(form, &mut expander, &mut tracer) {
            Ok(result) => lines.push(format!("ok: {}", result.loaded.join(" "))),
            Err(err) => {
                lines.push(format!("error: {}", err.kind));
                read_error = None;
                break;
            }
        }
    }
    if let Some(err) = read_error {
        lines.push(format!("error: {}", err.kind));
    }

    let actual = lines.join("\n");
    assert_eq!(actual.trim(), expected.trim(), "fixture {} produced unexpected output", path.display());
    Ok(())
}

datatest_stable::harness!(run_fixture, "tests/fixtures", r"^.*\.clj$");
