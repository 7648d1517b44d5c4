use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn tyflow() -> Command {
    let mut cmd = Command::cargo_bin("tyflow").unwrap();
    cmd.env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_expression_argument() {
    tyflow()
        .arg("(dec 3)")
        .assert()
        .success()
        .stdout(predicate::str::contains("type: int64"))
        .stdout(predicate::str::contains("flow: 2"));
}

#[test]
fn test_json_summary() {
    let out = tyflow().args(["--json", "(pair 1 \"a\")"]).output().unwrap();
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["root_flow"], "*[1]");
    assert_eq!(v["escaped_aliases"], serde_json::json!([1]));
    assert_eq!(v["stats"]["phase"], "hm_frozen");
    assert!(v.get("nodes").is_none());
}

#[test]
fn test_all_lists_nodes() {
    let out = tyflow().args(["--json", "--all", "(dec 3)"]).output().unwrap();
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let nodes = v["nodes"].as_array().unwrap();
    assert!(nodes.iter().any(|n| n["label"] == "prim dec"));
}

#[test]
fn test_program_from_file_and_config() {
    let mut prog = NamedTempFile::new().unwrap();
    writeln!(prog, "# identity twice").unwrap();
    writeln!(prog, "id = {{x -> x}};").unwrap();
    writeln!(prog, "(pair (id 1) (id \"a\"))").unwrap();

    let mut config = NamedTempFile::new().unwrap();
    writeln!(config, "do_gcp = false").unwrap();

    tyflow()
        .arg("--file")
        .arg(prog.path())
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("flow: ~Scalar"));
}

#[test]
fn test_no_hm_flag() {
    tyflow()
        .args(["--no-hm", "(dec 3)"])
        .assert()
        .success()
        .stdout(predicate::str::contains("flow: 2"));
}

#[test]
fn test_type_errors_are_reported_not_fatal() {
    tyflow()
        .arg("@{x = 1}.y")
        .assert()
        .success()
        .stdout(predicate::str::contains("Missing field y in *@{x=1}"));
}

#[test]
fn test_parse_failure_exits_nonzero() {
    tyflow()
        .arg("(frob 1)")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown identifier 'frob'"));
}

#[test]
fn test_missing_file() {
    tyflow()
        .args(["--file", "/nonexistent/prog.tf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
