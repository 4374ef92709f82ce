// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface specs: help, validation exit codes, registry commands.

use assert_cmd::Command;

fn amon() -> Command {
    Command::cargo_bin("amon").expect("amon binary")
}

#[test]
fn help_lists_commands() {
    let output = amon().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).into_owned();
    for command in ["ui", "run", "sandbox", "toolforge", "tools"] {
        assert!(stdout.contains(command), "help should mention {command}");
    }
}

#[test]
fn unknown_subcommand_is_validation_error() {
    amon().arg("frobnicate").assert().code(2);
}

#[test]
fn run_rejects_empty_prompt() {
    let tmp = tempfile::tempdir().unwrap();
    amon()
        .args(["--data-dir", tmp.path().to_str().unwrap(), "run", "   "])
        .assert()
        .code(2);
}

#[test]
fn run_rejects_unknown_mode() {
    let tmp = tempfile::tempdir().unwrap();
    amon()
        .args([
            "--data-dir",
            tmp.path().to_str().unwrap(),
            "run",
            "hello",
            "--mode",
            "swarm",
        ])
        .assert()
        .code(2);
}

#[test]
fn run_without_model_is_operational_error() {
    let tmp = tempfile::tempdir().unwrap();
    // No provider key: the run fails with a model auth error (exit 1).
    amon()
        .args(["--data-dir", tmp.path().to_str().unwrap(), "run", "hello"])
        .env_remove("OPENAI_API_KEY")
        .assert()
        .code(1);
}

#[test]
fn sandbox_exec_without_runner_is_operational_error() {
    let tmp = tempfile::tempdir().unwrap();
    amon()
        .args(["--data-dir", tmp.path().to_str().unwrap(), "sandbox", "exec", "echo"])
        .env_remove("SANDBOX_RUNNER_API_KEY")
        .assert()
        .code(1);
}

#[test]
fn toolforge_cycle_through_cli() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().to_str().unwrap();

    amon().args(["--data-dir", data, "toolforge", "init"]).assert().success();

    let manifest = tmp.path().join("tool.json");
    std::fs::write(&manifest, r#"{"name": "fs.copy", "risk": "high"}"#).unwrap();
    amon()
        .args(["--data-dir", data, "toolforge", "install", manifest.to_str().unwrap()])
        .assert()
        .success();

    amon().args(["--data-dir", data, "toolforge", "verify"]).assert().success();

    let listed = amon().args(["--data-dir", data, "tools", "mcp-list"]).assert().success();
    let stdout = String::from_utf8_lossy(&listed.get_output().stdout).into_owned();
    assert!(stdout.contains("fs.copy"));
    assert!(stdout.contains("risk=high"));

    amon()
        .args(["--data-dir", data, "toolforge", "revoke", "fs.copy"])
        .assert()
        .success();
    amon()
        .args(["--data-dir", data, "toolforge", "revoke", "ghost"])
        .assert()
        .code(2);
}

#[test]
fn mcp_list_without_registry_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let output = amon()
        .args(["--data-dir", tmp.path().to_str().unwrap(), "tools", "mcp-list"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).into_owned();
    assert!(stdout.contains("no tools registered"));
}
