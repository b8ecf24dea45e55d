use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn cmd(state_root: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("openpalm-control"));
    cmd.env("OPENPALM_STATE_ROOT", state_root.path())
        .env("COMPOSE_PROJECT_PATH", state_root.path())
        .env("OPENPALM_COMPOSE_BIN", "true")
        .env("OPENPALM_COMPOSE_SUBCOMMAND", "--")
        .env_remove("OPENPALM_COMPOSE_FILE")
        .env_remove("OPENPALM_CONTAINER_SOCKET_URI")
        .env_remove("OPENPALM_EXTRA_SERVICES");
    cmd
}

#[test]
fn spec_get_creates_default_with_version_header() {
    let dir = TempDir::new().unwrap();
    cmd(&dir)
        .args(["spec", "get"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("version: 1"))
        .stdout(predicate::str::contains("accessScope: lan"));
}

#[test]
fn channel_access_updates_exposure_and_persists() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).args(["spec", "get"]).assert().success();

    cmd(&dir)
        .args(["channel", "access", "chat", "public"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exposure: public"));

    // Persisted: a fresh `spec get` still reflects the change.
    cmd(&dir)
        .args(["spec", "get"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exposure: public"));
}

#[test]
fn apply_run_then_preview_is_idempotent() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).args(["spec", "get"]).assert().success();

    cmd(&dir)
        .args(["apply", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ok\":true"));

    cmd(&dir)
        .args(["apply", "preview"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"up\":[]"))
        .stdout(predicate::str::contains("\"restart\":[]"))
        .stdout(predicate::str::contains("\"reload\":[]"));
}

#[test]
fn deleting_a_referenced_secret_fails_with_stable_machine_code() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).args(["spec", "get"]).assert().success();

    cmd(&dir)
        .args(["channel", "config", "chat", "CHAT_INBOUND_TOKEN=${CHAT_TOKEN_SECRET}"])
        .assert()
        .success();

    cmd(&dir)
        .args(["secret", "delete", "CHAT_TOKEN_SECRET"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("secret_in_use"));
}

#[test]
fn compose_logs_rejects_out_of_range_tail_without_spawning() {
    let dir = TempDir::new().unwrap();
    cmd(&dir).args(["spec", "get"]).assert().success();
    cmd(&dir).args(["apply", "run"]).assert().success();

    cmd(&dir)
        .args(["compose", "logs", "gateway", "--tail", "0"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid_tail"));
}
