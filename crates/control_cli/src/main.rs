//! openpalm-control: operator-facing CLI over the stack control plane.
//!
//! Every subcommand is a thin wrapper over one of the core crates
//! (`openpalm_manager`, `openpalm_apply`, `openpalm_compose`,
//! `openpalm_automations`) — this binary owns no business logic of its
//! own beyond argument parsing and env-derived wiring.

use clap::{Parser, Subcommand};
use openpalm_apply::{ApplyOptions, ReloadSemantics};
use openpalm_compose::{ComposeRunner, ComposeRunnerConfig};
use openpalm_manager::{StackManager, StackPaths};
use openpalm_spec::{AccessScope, Automation};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Manager(#[from] openpalm_manager::ManagerError),
    #[error(transparent)]
    Apply(#[from] openpalm_apply::ApplyError),
    #[error(transparent)]
    Automations(#[from] openpalm_automations::AutomationsError),
    #[error(transparent)]
    Spec(#[from] openpalm_spec::StackSpecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Usage(String),
}

#[derive(Parser)]
#[command(name = "openpalm-control", version, about = "openpalm stack control-plane CLI")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Spec operations: read, replace, and targeted field mutators.
    Spec {
        #[command(subcommand)]
        cmd: SpecCommand,
    },
    /// Per-channel access scope and config mutators.
    Channel {
        #[command(subcommand)]
        cmd: ChannelCommand,
    },
    /// Secret store operations.
    Secret {
        #[command(subcommand)]
        cmd: SecretCommand,
    },
    /// Automation CRUD, on-disk sync, and ad-hoc triggering.
    Automation {
        #[command(subcommand)]
        cmd: AutomationCommand,
    },
    /// Render artifacts and compute/execute the impact plan.
    Apply {
        #[command(subcommand)]
        cmd: ApplyCommand,
    },
    /// Pass-through container-orchestrator operations, allow-listed by
    /// service name.
    Compose {
        #[command(subcommand)]
        cmd: ComposeCommand,
    },
}

#[derive(Subcommand)]
enum SpecCommand {
    /// Print the current spec (creating the default on first read).
    Get,
    /// Replace the spec wholesale from a file (validates before writing).
    Set {
        #[arg(long)]
        file: PathBuf,
    },
    /// Set the stack-wide access scope.
    AccessScope {
        scope: String,
    },
}

#[derive(Subcommand)]
enum ChannelCommand {
    /// Set a channel's exposure.
    Access {
        name: String,
        scope: String,
    },
    /// Replace a channel's config map from `KEY=VALUE` pairs.
    Config {
        name: String,
        /// `KEY=VALUE` pairs; repeat for multiple keys.
        #[arg(value_parser = parse_kv)]
        values: Vec<(String, String)>,
    },
}

#[derive(Subcommand)]
enum SecretCommand {
    /// List every known secret name with its usage manifest.
    List,
    /// Create or overwrite a secret value.
    Set {
        name: String,
        value: String,
    },
    /// Delete a secret (fails with `secret_in_use` if still referenced).
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum AutomationCommand {
    List,
    Get {
        id: String,
    },
    /// Create or replace an automation.
    Set {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        schedule: String,
        #[arg(long)]
        script: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = true)]
        enabled: bool,
    },
    Delete {
        id: String,
    },
    /// Rewrite on-disk scripts/schedules and reload the system scheduler.
    Sync,
    /// Run one automation's script immediately, outside its schedule.
    Trigger {
        id: String,
    },
}

#[derive(Subcommand)]
enum ApplyCommand {
    /// Compute the impact plan without writing or executing anything.
    Preview,
    /// Render artifacts and execute the impact plan.
    Run,
    /// List advertised services and their reload semantics.
    Operations,
}

#[derive(Subcommand)]
enum ComposeCommand {
    Ps,
    Pull {
        service: Option<String>,
    },
    Logs {
        service: String,
        #[arg(long, default_value_t = 200)]
        tail: u32,
    },
    Up {
        services: Vec<String>,
    },
    Stop {
        services: Vec<String>,
    },
    Restart {
        services: Vec<String>,
    },
    Exec {
        service: String,
        args: Vec<String>,
    },
}

fn parse_kv(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))
}

fn parse_access_scope(s: &str) -> Result<AccessScope, CliError> {
    AccessScope::from_str_strict(s).ok_or_else(|| CliError::Usage(format!("invalid_access_scope_{s}")))
}

struct AppConfig {
    paths: StackPaths,
    compose: ComposeRunnerConfig,
    automations: openpalm_automations::AutomationsConfig,
}

impl AppConfig {
    fn from_env() -> Self {
        let state_root = std::env::var("OPENPALM_STATE_ROOT").unwrap_or_else(|_| "./state".to_string());
        let state_root = PathBuf::from(state_root);
        let paths = StackPaths::new(&state_root);

        let project_path = std::env::var("COMPOSE_PROJECT_PATH").map(PathBuf::from).unwrap_or_else(|_| state_root.clone());
        let compose_file = std::env::var("OPENPALM_COMPOSE_FILE").map(PathBuf::from).unwrap_or_else(|_| paths.compose_file());
        let compose = ComposeRunnerConfig::from_env(compose_file, project_path);

        let cron_root = std::env::var("OPENPALM_CRON_ROOT").map(PathBuf::from).unwrap_or_else(|_| state_root.join("cron"));
        let scheduler_bin = std::env::var("OPENPALM_SCHEDULER_BIN").unwrap_or_else(|_| "crontab".to_string());
        let automations = openpalm_automations::AutomationsConfig { root: cron_root, scheduler_bin };

        Self { paths, compose, automations }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    // Best-effort .env load so operators can keep OPENPALM_* / COMPOSE_* vars
    // in a file next to the state root instead of exporting them by hand.
    // Every subcommand shares one AppConfig, so unlike a per-subcommand repo
    // root this only needs doing once, before env vars are read below.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = AppConfig::from_env();

    if let Err(e) = run(args.cmd, config).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(cmd: Command, config: AppConfig) -> Result<(), CliError> {
    let manager = StackManager::new(config.paths);
    let compose = ComposeRunner::new(config.compose);

    match cmd {
        Command::Spec { cmd } => run_spec(cmd, &manager),
        Command::Channel { cmd } => run_channel(cmd, &manager),
        Command::Secret { cmd } => run_secret(cmd, &manager),
        Command::Automation { cmd } => run_automation(cmd, &manager, &config.automations).await,
        Command::Apply { cmd } => run_apply(cmd, &manager, &compose).await,
        Command::Compose { cmd } => run_compose(cmd, &compose).await,
    }
}

fn print_spec(spec: &openpalm_spec::StackSpec) -> Result<(), CliError> {
    let bytes = openpalm_spec::stringify(spec)?;
    print!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

fn run_spec(cmd: SpecCommand, manager: &StackManager) -> Result<(), CliError> {
    match cmd {
        SpecCommand::Get => {
            let spec = manager.get_spec()?;
            print_spec(&spec)
        }
        SpecCommand::Set { file } => {
            let raw = std::fs::read(file)?;
            let spec = manager.set_spec(&raw)?;
            print_spec(&spec)
        }
        SpecCommand::AccessScope { scope } => {
            let scope = parse_access_scope(&scope)?;
            let spec = manager.set_access_scope(scope)?;
            print_spec(&spec)
        }
    }
}

fn run_channel(cmd: ChannelCommand, manager: &StackManager) -> Result<(), CliError> {
    match cmd {
        ChannelCommand::Access { name, scope } => {
            let scope = parse_access_scope(&scope)?;
            let spec = manager.set_channel_access(&name, scope)?;
            print_spec(&spec)
        }
        ChannelCommand::Config { name, values } => {
            let values = values.into_iter().collect();
            let spec = manager.set_channel_config(&name, values)?;
            print_spec(&spec)
        }
    }
}

fn run_secret(cmd: SecretCommand, manager: &StackManager) -> Result<(), CliError> {
    match cmd {
        SecretCommand::List => {
            let state = manager.list_secret_manager_state()?;
            let out: Vec<_> = state
                .into_iter()
                .map(|s| json!({"name": s.name, "configured": s.configured, "usedBy": s.used_by}))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out).unwrap());
            Ok(())
        }
        SecretCommand::Set { name, value } => {
            manager.upsert_secret(&name, &value)?;
            println!("{}", json!({"ok": true, "name": name}));
            Ok(())
        }
        SecretCommand::Delete { name } => {
            manager.delete_secret(&name)?;
            println!("{}", json!({"ok": true, "name": name}));
            Ok(())
        }
    }
}

fn automation_from_args(id: String, name: String, schedule: String, script: String, description: Option<String>, enabled: bool) -> Automation {
    Automation { id, name, schedule, script, enabled, description, core: None }
}

async fn run_automation(cmd: AutomationCommand, manager: &StackManager, automations_config: &openpalm_automations::AutomationsConfig) -> Result<(), CliError> {
    match cmd {
        AutomationCommand::List => {
            let automations = manager.list_automations()?;
            println!("{}", serde_json::to_string_pretty(&automations).unwrap());
            Ok(())
        }
        AutomationCommand::Get { id } => {
            let automation = manager.get_automation(&id)?;
            println!("{}", serde_json::to_string_pretty(&automation).unwrap());
            Ok(())
        }
        AutomationCommand::Set { id, name, schedule, script, description, enabled } => {
            let automation = automation_from_args(id, name, schedule, script, description, enabled);
            manager.upsert_automation(automation)?;
            println!("{}", json!({"ok": true}));
            Ok(())
        }
        AutomationCommand::Delete { id } => {
            let removed = manager.delete_automation(&id)?;
            println!("{}", json!({"ok": true, "removed": removed}));
            Ok(())
        }
        AutomationCommand::Sync => {
            let automations = manager.list_automations()?;
            openpalm_automations::sync_automations(&automations, automations_config).await?;
            println!("{}", json!({"ok": true, "count": automations.len()}));
            Ok(())
        }
        AutomationCommand::Trigger { id } => {
            let result = openpalm_automations::trigger_automation(&id, automations_config).await;
            println!("{}", json!({"ok": result.ok, "error": result.error}));
            Ok(())
        }
    }
}

async fn run_apply(cmd: ApplyCommand, manager: &StackManager, compose: &ComposeRunner) -> Result<(), CliError> {
    match cmd {
        ApplyCommand::Preview => {
            let outcome = openpalm_apply::apply(manager, compose, ApplyOptions { apply: false }).await?;
            println!("{}", impact_json(&outcome));
            Ok(())
        }
        ApplyCommand::Run => {
            let outcome = openpalm_apply::apply(manager, compose, ApplyOptions { apply: true }).await?;
            println!("{}", impact_json(&outcome));
            Ok(())
        }
        ApplyCommand::Operations => {
            let ops = openpalm_apply::preview_operations(manager)?;
            let out: Vec<_> = ops
                .into_iter()
                .map(|(name, semantics)| {
                    let semantics = match semantics {
                        ReloadSemantics::Reload => "reload",
                        ReloadSemantics::Restart => "restart",
                    };
                    json!({"service": name, "semantics": semantics})
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out).unwrap());
            Ok(())
        }
    }
}

fn impact_json(outcome: &openpalm_apply::ApplyOutcome) -> serde_json::Value {
    json!({
        "ok": outcome.ok,
        "impact": {
            "up": outcome.impact.up,
            "restart": outcome.impact.restart,
            "reload": outcome.impact.reload,
        }
    })
}

async fn run_compose(cmd: ComposeCommand, compose: &ComposeRunner) -> Result<(), CliError> {
    let out = match cmd {
        ComposeCommand::Ps => compose.ps().await,
        ComposeCommand::Pull { service } => compose.pull(service.as_deref()).await,
        ComposeCommand::Logs { service, tail } => compose.logs(&service, tail).await,
        ComposeCommand::Up { services } => compose.up(&services).await,
        ComposeCommand::Stop { services } => compose.stop(&services).await,
        ComposeCommand::Restart { services } => compose.restart(&services).await,
        ComposeCommand::Exec { service, args } => compose.exec(&service, &args).await,
    };
    println!("{}", json!({"ok": out.ok, "stdout": out.stdout, "stderr": out.stderr}));
    if !out.ok {
        std::process::exit(1);
    }
    Ok(())
}
