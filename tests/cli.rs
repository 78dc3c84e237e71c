//! Binary-level tests: exit codes and command output.

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

fn pkeep() -> Command
{
    let mut cmd = Command::cargo_bin("pkeep").expect("binary");
    cmd.env_remove("RUST_LOG")
        .env_remove("PATCHKEEP_LOG")
        .arg("--no-color");
    cmd
}

/// Config with a folder origin and a folder destination next to it.
fn make_fixture() -> assert_fs::TempDir
{
    let tmp = assert_fs::TempDir::new().expect("tempdir");
    tmp.child("origin/src/lib.rs")
        .write_str("pub fn alpha() {}\n")
        .unwrap();
    tmp.child("dest/src/lib.rs")
        .write_str("pub fn alpha() { beta() }\n")
        .unwrap();
    tmp.child("patchkeep.toml")
        .write_str(
            r#"
[migrations.lib]
record_path = ".patchkeep/record.json"
destination = { kind = "folder", path = "dest" }
origin = { kind = "folder", path = "origin" }

[migrations.lib.destination_files]
include = ["src/**", ".patchkeep/**", "patches/**"]

[migrations.lib.autopatch]
directory_prefix = "patches"
strip_line_numbers = true
"#,
        )
        .unwrap();
    tmp
}

#[test]
fn init_refuses_to_overwrite_without_force()
{
    let tmp = assert_fs::TempDir::new().unwrap();

    pkeep()
        .args(["init"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("patchkeep.toml"));
    tmp.child("patchkeep.toml")
        .assert(predicate::str::contains("[migrations.example]"));

    pkeep()
        .args(["init"])
        .arg(tmp.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("--force"));

    pkeep()
        .args(["init", "--force"])
        .arg(tmp.path())
        .assert()
        .success();
}

#[test]
fn regenerate_inspect_and_verify_round_trip()
{
    let tmp = make_fixture();
    let config = tmp.child("patchkeep.toml");
    let record = tmp.child("dest/.patchkeep/record.json");

    let out = pkeep()
        .args(["regenerate"])
        .arg(config.path())
        .args(["lib", "--regen-import-baseline", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["mode"], "import_baseline");
    assert_eq!(report["record_patches"], 1);
    assert_eq!(report["committed"], true);

    record.assert(predicate::path::exists());
    tmp.child("dest/patches/src/lib.rs.patch")
        .assert(predicate::str::starts_with("diff --git").and(predicate::str::contains("\n@@\n")));

    let out = pkeep()
        .arg("inspect")
        .arg(record.path())
        .arg("--json")
        .output()
        .unwrap();
    assert!(out.status.success());
    let summary: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(summary["format_version"], 1);
    assert_eq!(summary["hash_algorithm"], "blake3");
    assert_eq!(summary["patches"][0]["path"], "src/lib.rs");

    pkeep()
        .arg("inspect")
        .arg(record.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("src/lib.rs").and(predicate::str::contains("modified")));

    pkeep()
        .arg("verify")
        .arg(record.path())
        .arg(tmp.child("dest").path())
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    // Drift is an integrity failure
    tmp.child("dest/src/lib.rs")
        .write_str("pub fn alpha() { gamma() }\n")
        .unwrap();
    pkeep()
        .arg("verify")
        .arg(record.path())
        .arg(tmp.child("dest").path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("src/lib.rs"));
}

#[test]
fn source_ref_may_follow_the_import_baseline_flag()
{
    let tmp = make_fixture();

    let out = pkeep()
        .args(["regenerate"])
        .arg(tmp.child("patchkeep.toml").path())
        .args(["lib", "--regen-import-baseline", "current", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["mode"], "import_baseline");
    assert_eq!(report["baseline"]["via"], "explicit");
    assert_eq!(report["baseline"]["ref"], "current");
}

#[test]
fn dry_run_writes_nothing()
{
    let tmp = make_fixture();

    pkeep()
        .args(["--dry-run", "regenerate"])
        .arg(tmp.child("patchkeep.toml").path())
        .args(["lib", "--regen-import-baseline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));

    tmp.child("dest/.patchkeep")
        .assert(predicate::path::missing());
    tmp.child("dest/patches")
        .assert(predicate::path::missing());
}

#[test]
fn configuration_errors_exit_with_the_validation_code()
{
    let tmp = make_fixture();
    let config = tmp.child("patchkeep.toml");

    // Folders cannot infer a baseline
    pkeep()
        .args(["regenerate"])
        .arg(config.path())
        .arg("lib")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("regeneration baseline"));

    pkeep()
        .args(["regenerate"])
        .arg(config.path())
        .arg("missing")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("no migration named `missing`"));

    pkeep()
        .args(["regenerate", "does-not-exist.toml", "lib"])
        .assert()
        .code(3);

    // A baseline without a record
    pkeep()
        .args(["regenerate"])
        .arg(config.path())
        .args(["lib", "--regen-baseline", "current"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains(".patchkeep/record.json"));
}

#[test]
fn malformed_records_are_rejected()
{
    let tmp = assert_fs::TempDir::new().unwrap();
    let record = tmp.child("record.json");
    record
        .write_str(r#"{"format":"patchkeep-consistency","format_version":99}"#)
        .unwrap();

    pkeep()
        .arg("inspect")
        .arg(record.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn completions_print_to_stdout()
{
    pkeep()
        .args(["completions", "bash", "--stdout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pkeep"));
}

#[test]
fn completions_install_under_the_shell_file_name()
{
    let tmp = assert_fs::TempDir::new().unwrap();

    pkeep()
        .args(["completions", "zsh", "--out-dir"])
        .arg(tmp.path())
        .assert()
        .success();
    tmp.child("_pkeep")
        .assert(predicate::str::contains("regenerate"));

    pkeep()
        .args(["completions", "zsh"])
        .assert()
        .code(2);
}
