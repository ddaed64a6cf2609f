//! Smoke tests for the CLI surface.
//!
//! Only exercises flows with no side effects on the user's data directory;
//! everything stateful is covered by the in-module store tests and the
//! engine integration suite in kindred-core.

use std::process::Command;

fn run_cli(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_kindred"))
        .args(args)
        .output()
        .expect("failed to execute CLI");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

#[test]
fn help_lists_all_subcommands() {
    let (stdout, _, code) = run_cli(&["--help"]);
    assert_eq!(code, 0);
    for subcommand in ["pair", "status", "stages", "activity", "withdraw", "watch", "config"] {
        assert!(
            stdout.contains(subcommand),
            "help output missing '{subcommand}': {stdout}"
        );
    }
}

#[test]
fn version_prints() {
    let (stdout, _, code) = run_cli(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("kindred"));
}

#[test]
fn unknown_subcommand_fails() {
    let (_, stderr, code) = run_cli(&["frobnicate"]);
    assert_ne!(code, 0);
    assert!(!stderr.is_empty());
}
