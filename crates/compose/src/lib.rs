//! openpalm_compose
//!
//! A thin, typed wrapper around the container-orchestrator CLI. Every
//! operation that names services is checked against an allow-list before a
//! subprocess is ever launched.

mod health;

pub use health::{wait_until_healthy, HealthOutcome};

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;

/// Machine codes surfaced through `CommandOutput::stderr` rather than a
/// `Result` — the runner's contract (`{ok, stdout, stderr}`) is shared with
/// real subprocess failures, so a rejected call is rendered the same way a
/// failed one would be.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("service_not_allowed")]
    ServiceNotAllowed,
    #[error("invalid_tail")]
    InvalidTail,
    #[error("{0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ComposeRunnerConfig {
    pub bin: String,
    pub subcommand: String,
    pub compose_file: PathBuf,
    pub project_path: PathBuf,
    pub container_socket_uri: Option<String>,
    pub extra_services: Vec<String>,
}

impl ComposeRunnerConfig {
    pub fn from_env(compose_file: PathBuf, project_path: PathBuf) -> Self {
        let extra_services = std::env::var("OPENPALM_EXTRA_SERVICES")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();
        Self {
            bin: std::env::var("OPENPALM_COMPOSE_BIN").unwrap_or_else(|_| "docker".to_string()),
            subcommand: std::env::var("OPENPALM_COMPOSE_SUBCOMMAND").unwrap_or_else(|_| "compose".to_string()),
            compose_file,
            project_path,
            container_socket_uri: std::env::var("OPENPALM_CONTAINER_SOCKET_URI").ok(),
            extra_services,
        }
    }
}

pub const CORE_SERVICES: &[&str] =
    &["caddy", "postgres", "qdrant", "openmemory", "openmemory-ui", "assistant", "gateway", "admin"];

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn rejected(err: ComposeError) -> Self {
        Self { ok: false, stdout: String::new(), stderr: err.to_string() }
    }
}

pub struct ComposeRunner {
    config: ComposeRunnerConfig,
}

impl ComposeRunner {
    pub fn new(config: ComposeRunnerConfig) -> Self {
        Self { config }
    }

    fn discovered_services(&self) -> BTreeSet<String> {
        match std::fs::read(&self.config.compose_file) {
            Ok(bytes) => openpalm_artifacts::compose_service_names(&bytes),
            Err(_) => BTreeSet::new(),
        }
    }

    fn allowed_services(&self) -> BTreeSet<String> {
        let mut allowed: BTreeSet<String> = CORE_SERVICES.iter().map(|s| s.to_string()).collect();
        allowed.extend(self.config.extra_services.iter().cloned());
        allowed.extend(self.discovered_services());
        allowed
    }

    fn check_allowed(&self, names: &[&str]) -> Option<CommandOutput> {
        let allowed = self.allowed_services();
        if names.iter().any(|n| !allowed.contains(*n)) {
            return Some(CommandOutput::rejected(ComposeError::ServiceNotAllowed));
        }
        None
    }

    async fn run(&self, args: &[&str]) -> CommandOutput {
        let mut cmd = Command::new(&self.config.bin);
        cmd.arg(&self.config.subcommand)
            .arg("-f")
            .arg(&self.config.compose_file)
            .args(args)
            .current_dir(&self.config.project_path);
        if let Some(socket) = &self.config.container_socket_uri {
            cmd.env("DOCKER_HOST", socket).env("CONTAINER_HOST", socket);
        }

        tracing::debug!(bin = %self.config.bin, args = ?args, "invoking compose runner");
        match cmd.output().await {
            Ok(output) => CommandOutput {
                ok: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => CommandOutput::rejected(ComposeError::from(e)),
        }
    }

    pub async fn validate_config(&self) -> CommandOutput {
        self.run(&["config"]).await
    }

    pub async fn ps(&self) -> CommandOutput {
        self.run(&["ps", "--format", "json"]).await
    }

    pub async fn pull(&self, service: Option<&str>) -> CommandOutput {
        if let Some(svc) = service {
            if let Some(rejected) = self.check_allowed(&[svc]) {
                return rejected;
            }
            return self.run(&["pull", svc]).await;
        }
        self.run(&["pull"]).await
    }

    pub async fn logs(&self, service: &str, tail: u32) -> CommandOutput {
        if !(1..=5000).contains(&tail) {
            return CommandOutput::rejected(ComposeError::InvalidTail);
        }
        if let Some(rejected) = self.check_allowed(&[service]) {
            return rejected;
        }
        let tail_str = tail.to_string();
        self.run(&["logs", service, "--tail", &tail_str]).await
    }

    pub async fn up(&self, services: &[String]) -> CommandOutput {
        let names: Vec<&str> = services.iter().map(String::as_str).collect();
        if let Some(rejected) = self.check_allowed(&names) {
            return rejected;
        }
        let mut args = vec!["up", "-d"];
        args.extend(names);
        self.run(&args).await
    }

    pub async fn stop(&self, services: &[String]) -> CommandOutput {
        let names: Vec<&str> = services.iter().map(String::as_str).collect();
        if let Some(rejected) = self.check_allowed(&names) {
            return rejected;
        }
        let mut args = vec!["stop"];
        args.extend(names);
        self.run(&args).await
    }

    pub async fn restart(&self, services: &[String]) -> CommandOutput {
        let names: Vec<&str> = services.iter().map(String::as_str).collect();
        if let Some(rejected) = self.check_allowed(&names) {
            return rejected;
        }
        let mut args = vec!["restart"];
        args.extend(names);
        self.run(&args).await
    }

    pub async fn exec(&self, service: &str, extra_args: &[String]) -> CommandOutput {
        if let Some(rejected) = self.check_allowed(&[service]) {
            return rejected;
        }
        let mut args = vec!["exec", "-T", service];
        args.extend(extra_args.iter().map(String::as_str));
        self.run(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with_compose(compose_yaml: &str) -> (tempfile::TempDir, ComposeRunner) {
        let dir = tempfile::tempdir().unwrap();
        let compose_file = dir.path().join("docker-compose.yml");
        std::fs::write(&compose_file, compose_yaml).unwrap();
        let config = ComposeRunnerConfig {
            bin: "true".to_string(),
            subcommand: "--".to_string(),
            compose_file,
            project_path: dir.path().to_path_buf(),
            container_socket_uri: None,
            extra_services: Vec::new(),
        };
        (dir, ComposeRunner::new(config))
    }

    #[tokio::test]
    async fn logs_rejects_tail_out_of_range() {
        let (_dir, runner) = runner_with_compose("services: {}\n");
        let result = runner.logs("gateway", 0).await;
        assert!(!result.ok);
        assert_eq!(result.stderr, "invalid_tail");

        let result = runner.logs("gateway", 5001).await;
        assert!(!result.ok);
        assert_eq!(result.stderr, "invalid_tail");
    }

    #[tokio::test]
    async fn unknown_service_rejected_without_spawning() {
        let (_dir, runner) = runner_with_compose("services: {}\n");
        let result = runner.up(&["not-a-real-service".to_string()]).await;
        assert!(!result.ok);
        assert_eq!(result.stderr, "service_not_allowed");
    }

    #[tokio::test]
    async fn discovered_compose_service_is_allowed() {
        let (_dir, runner) = runner_with_compose("services:\n  channel-slack: {}\n");
        let result = runner.up(&["channel-slack".to_string()]).await;
        // allow-list accepted it; "true -- -f <path> up -d channel-slack" just exits 0.
        assert!(result.ok);
    }

    #[tokio::test]
    async fn core_service_always_allowed() {
        let (_dir, runner) = runner_with_compose("services: {}\n");
        let result = runner.restart(&["gateway".to_string()]).await;
        assert!(result.ok);
    }
}
