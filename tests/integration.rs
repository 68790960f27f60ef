//! Integration tests for the minerhat CLI.
//!
//! These tests run the binary end-to-end against a temporary data directory.

use assert_cmd::Command;
use minerhat::contribution::{Amount, ContributionLedger, ContributionStore, LedgerSettings};
use minerhat::paths::DataPaths;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use uuid::Uuid;

const STEVE: &str = "67e55044-10b1-426f-9247-bb680e5fe0c8";

/// Get a command for the minerhat binary pointed at `data_dir`.
fn minerhat(data_dir: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("minerhat").unwrap();
    cmd.arg("--data-dir").arg(data_dir).arg("--no-color");
    cmd.env_remove("MINERHAT_LOG");
    cmd
}

fn write_executable(path: &Path, script: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, script).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Data directory with a `fake` policy running a sleeping shell script and
/// no timers.
fn data_dir_with_fake_miner(root: &Path) -> DataPaths {
    let paths = DataPaths::new(root);
    paths.ensure().unwrap();
    write_executable(&paths.miner_dir().join("fake").join("fake-miner"), "#!/bin/sh\nexec sleep 60\n");
    std::fs::write(
        paths.policy_file("fake"),
        r#"{"schema_version":1,"executable":"./fake/fake-miner","arguments":["--user","{wallet}"]}"#,
    )
    .unwrap();
    let config = serde_json::json!({
        "schema_version": 1,
        "mining": {
            "miner": "fake",
            "check_interval_seconds": 0,
            "restart_interval_minutes": 0,
            "stop_grace_seconds": 2
        }
    });
    std::fs::write(paths.config_file(), config.to_string()).unwrap();
    paths
}

#[test]
fn test_help() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("policy"))
        .stdout(predicate::str::contains("revenue"));
}

#[test]
fn test_init_creates_layout() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.json"));

    let paths = DataPaths::new(tmp.path());
    assert!(paths.config_file().is_file());
    assert!(paths.policy_file("xmrig").is_file());
    assert!(paths.miner_dir().join("xmrig").is_dir());
    assert!(paths.contribution_dir().is_dir());

    let config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(paths.config_file()).unwrap()).unwrap();
    assert_eq!(config["mining"]["miner"], "xmrig");
    assert_eq!(config["contribution"]["enabled"], false);
}

#[test]
fn test_init_keeps_existing_config_unless_forced() {
    let tmp = tempdir().unwrap();
    let paths = DataPaths::new(tmp.path());
    std::fs::write(paths.config_file(), r#"{"mining":{"miner":"custom"}}"#).unwrap();

    minerhat(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Keeping"));
    let kept = std::fs::read_to_string(paths.config_file()).unwrap();
    assert!(kept.contains("custom"));

    minerhat(tmp.path()).args(["init", "--force"]).assert().success();
    let replaced = std::fs::read_to_string(paths.config_file()).unwrap();
    assert!(replaced.contains("xmrig"));
}

#[test]
fn test_policy_validate_missing_executable() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path()).arg("init").assert().success();

    minerhat(tmp.path())
        .args(["policy", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_policy_validate_missing_policy() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path())
        .args(["policy", "validate", "nosuchminer"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nosuchminer"));
}

#[test]
fn test_policy_validate_ok() {
    let tmp = tempdir().unwrap();
    let paths = DataPaths::new(tmp.path());
    minerhat(tmp.path()).arg("init").assert().success();
    write_executable(&paths.miner_dir().join("xmrig").join("xmrig"), "#!/bin/sh\nexit 0\n");

    minerhat(tmp.path())
        .args(["policy", "validate", "xmrig"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Policy is valid"))
        .stdout(predicate::str::contains("players_online"));
}

#[test]
fn test_revenue_for_unknown_player() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path())
        .args(["revenue", STEVE])
        .assert()
        .success()
        .stdout(predicate::str::contains("Realized: 0.0"))
        .stdout(predicate::str::contains("Pending: 0.0"));
}

#[test]
fn test_revenue_rejects_non_uuid() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path()).args(["revenue", "steve"]).assert().failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_history_reads_persisted_ledger() {
    let tmp = tempdir().unwrap();
    let paths = DataPaths::new(tmp.path());
    let steve = Uuid::parse_str(STEVE).unwrap();

    let store = ContributionStore::open(paths.contribution_dir()).unwrap();
    let ledger = Arc::new(ContributionLedger::with_store(LedgerSettings::default(), store));
    ledger
        .record_delta("1.5".parse().unwrap(), [steve], chrono::Utc::now())
        .unwrap();
    let outcome = ledger.checkout_revenue_24h(steve).await.unwrap();
    assert_eq!(outcome.total, "1.5".parse::<Amount>().unwrap());
    drop(ledger);

    minerhat(tmp.path())
        .args(["history", STEVE])
        .assert()
        .success()
        .stdout(predicate::str::contains("+1.5"));

    let output = minerhat(tmp.path())
        .args(["revenue", STEVE, "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["accumulative_revenue"], "1.5");
    assert_eq!(json["pending_revenue"], "0.0");
}

#[test]
fn test_history_empty() {
    let tmp = tempdir().unwrap();
    minerhat(tmp.path())
        .args(["history", STEVE])
        .assert()
        .success()
        .stdout(predicate::str::contains("No revenue history"));
}

#[test]
fn test_run_toggles_miner_on_join() {
    let tmp = tempdir().unwrap();
    data_dir_with_fake_miner(tmp.path());

    minerhat(tmp.path())
        .arg("run")
        .write_stdin(format!("join {STEVE}\nstatus\nleave {STEVE}\nquit\n"))
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("joined, 1 online"))
        .stdout(predicate::str::contains("miner started"))
        .stdout(predicate::str::contains("Mining: yes"))
        .stdout(predicate::str::contains("miner stopped"));
}

#[test]
fn test_run_reports_bad_commands_and_keeps_going() {
    let tmp = tempdir().unwrap();
    data_dir_with_fake_miner(tmp.path());

    minerhat(tmp.path())
        .arg("run")
        .write_stdin(format!("dance\nexchange {STEVE} 1\nrevenue {STEVE}\n"))
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown command 'dance'"))
        .stdout(predicate::str::contains("economy"))
        .stdout(predicate::str::contains("Realized: 0.0"));
}

#[test]
fn test_run_checkout_without_pool() {
    let tmp = tempdir().unwrap();
    data_dir_with_fake_miner(tmp.path());

    minerhat(tmp.path())
        .arg("run")
        .write_stdin(format!("check {STEVE}\nquit\n"))
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("checked out 0.0, total 0.0"));
}
