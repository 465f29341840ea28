//! Black-box tests of the `cinder` binary: exit codes, error streams, and
//! the debug subcommands.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("testdata")
        .join(name)
}

fn run_cinder(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cinder"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .unwrap_or_else(|e| panic!("failed to run cinder with args {:?}: {e}", args))
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn running_a_script_prints_and_exits_zero() {
    let file = fixture_path("hello.cdr");
    let output = run_cinder(&[file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0), "stderr:\n{}", stderr(&output));
    assert_eq!(stdout(&output), "hello\n");
}

#[test]
fn the_run_subcommand_is_equivalent() {
    let file = fixture_path("hello.cdr");
    let output = run_cinder(&["run", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), "hello\n");
}

#[test]
fn compile_errors_exit_65() {
    let file = fixture_path("compile_error.cdr");
    let output = run_cinder(&[file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(65));
    assert!(
        stderr(&output).contains("[line 1] Error at '1': Expect variable name."),
        "stderr:\n{}",
        stderr(&output)
    );
}

#[test]
fn runtime_errors_exit_70_with_a_full_stack_trace() {
    let file = fixture_path("runtime_error.cdr");
    let output = run_cinder(&[file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(70));
    let text = stderr(&output);
    assert!(
        text.contains("runtime error: Undefined variable 'missing'."),
        "stderr:\n{}",
        text
    );
    // Innermost frame first, and the innermost frame is included.
    let inner = text.find("[line 1] in inner()").expect("inner frame");
    let outer = text.find("[line 2] in outer()").expect("outer frame");
    let script = text.find("[line 3] in script").expect("script frame");
    assert!(inner < outer && outer < script, "stderr:\n{}", text);
}

#[test]
fn unreadable_files_exit_74() {
    let output = run_cinder(&["does-not-exist.cdr"]);

    assert_eq!(output.status.code(), Some(74));
    assert!(
        stderr(&output).contains("Error reading does-not-exist.cdr"),
        "stderr:\n{}",
        stderr(&output)
    );
}

#[test]
fn stress_gc_does_not_change_program_output() {
    let file = fixture_path("counter.cdr");

    let normal = run_cinder(&[file.to_str().unwrap()]);
    let stressed = run_cinder(&["--stress-gc", file.to_str().unwrap()]);

    assert_eq!(normal.status.code(), Some(0));
    assert_eq!(stressed.status.code(), Some(0), "stderr:\n{}", stderr(&stressed));
    assert_eq!(stdout(&normal), "1\n2\n3\n");
    assert_eq!(stdout(&normal), stdout(&stressed));
}

#[test]
fn gc_stats_flag_reports_counters() {
    let file = fixture_path("counter.cdr");
    let output = run_cinder(&["--gc-stats", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("GC stats:"), "stdout:\n{}", text);
    assert!(text.contains("total allocations:"), "stdout:\n{}", text);
}

#[test]
fn tokens_subcommand_dumps_the_token_stream() {
    let file = fixture_path("hello.cdr");
    let output = run_cinder(&["tokens", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("Print"), "stdout:\n{}", text);
    assert!(text.contains("String"), "stdout:\n{}", text);
    assert!(text.contains("Semicolon"), "stdout:\n{}", text);
}

#[test]
fn bytecode_subcommand_disassembles() {
    let file = fixture_path("hello.cdr");
    let output = run_cinder(&["bytecode", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("== script =="), "stdout:\n{}", text);
    assert!(text.contains("OpPrint"), "stdout:\n{}", text);
    assert!(text.contains("OpReturn"), "stdout:\n{}", text);
}

#[test]
fn bytecode_subcommand_includes_nested_functions() {
    let file = fixture_path("counter.cdr");
    let output = run_cinder(&["bytecode", file.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(0));
    let text = stdout(&output);
    assert!(text.contains("== makeCounter =="), "stdout:\n{}", text);
    assert!(text.contains("== count =="), "stdout:\n{}", text);
    assert!(text.contains("OpClosure"), "stdout:\n{}", text);
}
