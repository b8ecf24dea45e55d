//! openpalm_apply
//!
//! Reads prior artifacts, invokes the generator via the Stack Manager,
//! diffs the two, and computes the minimal impact plan — optionally
//! executing it through the compose runner. Mirrors the manager's own
//! write-then-audit shape: every plan and execution is appended to the
//! same hash-chained audit log the manager writes to.

mod diff;
mod error;

pub use diff::{diff_impact, snapshot_existing, ImpactPlan};
pub use error::{ApplyError, Result};

use openpalm_compose::ComposeRunner;
use openpalm_manager::StackManager;
use openpalm_spec::StackSpec;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ts() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// When `false`, compute and return the impact plan without writing
    /// artifacts or touching the compose runner ("dry run" / preview).
    pub apply: bool,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub ok: bool,
    pub impact: ImpactPlan,
}

/// Every string value across every enabled channel/service config that is a
/// literal `${NAME}` reference missing (or empty) in `secrets`, formatted as
/// `<entity>_<key>_<name>`, sorted for stable output.
fn missing_secret_references(spec: &StackSpec, secrets: &BTreeMap<String, String>) -> Vec<String> {
    let mut missing = Vec::new();
    for (name, channel) in &spec.channels {
        if !channel.enabled {
            continue;
        }
        for (key, value) in &channel.config {
            if let Some(secret_name) = openpalm_spec::parse_secret_reference(value) {
                if secrets.get(&secret_name).map(|v| v.is_empty()).unwrap_or(true) {
                    missing.push(format!("{name}_{key}_{secret_name}"));
                }
            }
        }
    }
    for (name, service) in &spec.services {
        if !service.enabled {
            continue;
        }
        for (key, value) in &service.config {
            if let Some(secret_name) = openpalm_spec::parse_secret_reference(value) {
                if secrets.get(&secret_name).map(|v| v.is_empty()).unwrap_or(true) {
                    missing.push(format!("{name}_{key}_{secret_name}"));
                }
            }
        }
    }
    missing.sort();
    missing
}

fn append_audit(manager: &StackManager, event: openpalm_audit_spec::StackAuditEvent) -> Result<()> {
    let audit_log = manager.paths().audit_log.clone();
    let last_hash = openpalm_audit_log::verify_log(&audit_log).unwrap_or_else(|_| openpalm_audit_log::genesis_hash());
    let mut appender = openpalm_audit_log::AuditAppender::open(&audit_log)?.with_last_hash(last_hash);
    appender.append(event)?;
    Ok(())
}

async fn execute_plan(compose: &ComposeRunner, plan: &ImpactPlan) -> Result<()> {
    for svc in &plan.up {
        let out = compose.up(std::slice::from_ref(svc)).await;
        if !out.ok {
            return Err(ApplyError::ComposeUpFailed(svc.clone(), out.stderr));
        }
    }
    for svc in &plan.restart {
        let out = compose.restart(std::slice::from_ref(svc)).await;
        if !out.ok {
            return Err(ApplyError::ComposeRestartFailed(svc.clone(), out.stderr));
        }
    }
    for svc in &plan.reload {
        let out = if svc == "caddy" {
            let args = vec!["caddy".to_string(), "reload".to_string(), "--config".to_string(), "/etc/caddy/caddy.json".to_string()];
            compose.exec("caddy", &args).await
        } else {
            compose.restart(std::slice::from_ref(svc)).await
        };
        if !out.ok {
            return Err(ApplyError::ComposeReloadFailed(svc.clone(), out.stderr));
        }
    }
    Ok(())
}

/// Runs one apply cycle. With `opts.apply = false` this is a pure preview:
/// nothing is written and the compose runner is never invoked. With
/// `opts.apply = true`: validates secrets, validates the rendered compose
/// config, writes artifacts, then executes `up` -> `restart` -> `reload` in
/// that order, aborting on the first subprocess failure.
pub async fn apply(manager: &StackManager, compose: &ComposeRunner, opts: ApplyOptions) -> Result<ApplyOutcome> {
    let spec = manager.get_spec()?;
    let secrets = openpalm_secrets::read(&manager.paths().secrets_file)?;

    let missing = missing_secret_references(&spec, &secrets);
    if !missing.is_empty() {
        return Err(ApplyError::SecretValidationFailed(missing.join(",")));
    }

    let preview = manager.render_preview()?;
    let existing = snapshot_existing(manager.paths(), &preview);

    if opts.apply {
        let validated = compose.validate_config().await;
        if !validated.ok {
            return Err(ApplyError::ComposeValidationFailed(validated.stderr));
        }
    }

    let plan = diff_impact(&existing, &preview);

    append_audit(
        manager,
        openpalm_audit_spec::StackAuditEvent::ApplyPlanned(openpalm_audit_spec::ApplyPlanned {
            schema_version: 1,
            ts: now_ts(),
            plan: openpalm_manager::impact_plan_snapshot(plan.up.clone(), plan.restart.clone(), plan.reload.clone()),
        }),
    )?;

    if !opts.apply {
        return Ok(ApplyOutcome { ok: true, impact: plan });
    }

    manager.render_artifacts()?;
    let exec_result = execute_plan(compose, &plan).await;

    append_audit(
        manager,
        openpalm_audit_spec::StackAuditEvent::ApplyExecuted(openpalm_audit_spec::ApplyExecuted {
            schema_version: 1,
            ts: now_ts(),
            plan: openpalm_manager::impact_plan_snapshot(plan.up.clone(), plan.restart.clone(), plan.reload.clone()),
            ok: exec_result.is_ok(),
            error: exec_result.as_ref().err().map(|e| e.to_string()),
        }),
    )?;

    exec_result?;
    Ok(ApplyOutcome { ok: true, impact: plan })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadSemantics {
    Reload,
    Restart,
}

/// The advertised service list and each service's reload semantics: `caddy`
/// reloads in place, every other core/channel/service entry restarts.
pub fn preview_operations(manager: &StackManager) -> Result<Vec<(String, ReloadSemantics)>> {
    let spec = manager.get_spec()?;
    let mut ops = Vec::new();
    for svc in openpalm_compose::CORE_SERVICES {
        let semantics = if *svc == "caddy" { ReloadSemantics::Reload } else { ReloadSemantics::Restart };
        ops.push((svc.to_string(), semantics));
    }
    for (name, channel) in &spec.channels {
        if channel.enabled {
            ops.push((format!("channel-{}", openpalm_spec::sanitize_name(name)), ReloadSemantics::Restart));
        }
    }
    for (name, service) in &spec.services {
        if service.enabled {
            ops.push((openpalm_spec::sanitize_name(name), ReloadSemantics::Restart));
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openpalm_compose::{ComposeRunner, ComposeRunnerConfig};
    use openpalm_manager::StackPaths;

    fn manager() -> (tempfile::TempDir, StackManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = StackManager::new(StackPaths::new(dir.path()));
        (dir, manager)
    }

    fn fake_compose(manager: &StackManager) -> ComposeRunner {
        ComposeRunner::new(ComposeRunnerConfig {
            bin: "true".to_string(),
            subcommand: "--".to_string(),
            compose_file: manager.paths().compose_file(),
            project_path: manager.paths().as_path().to_path_buf(),
            container_socket_uri: None,
            extra_services: Vec::new(),
        })
    }

    #[tokio::test]
    async fn preview_does_not_write_anything() {
        let (_dir, manager) = manager();
        manager.get_spec().unwrap();
        let compose = fake_compose(&manager);
        let outcome = apply(&manager, &compose, ApplyOptions { apply: false }).await.unwrap();
        assert!(outcome.ok);
        assert!(!manager.paths().compose_file().exists());
    }

    #[tokio::test]
    async fn apply_is_idempotent_after_render() {
        let (_dir, manager) = manager();
        manager.get_spec().unwrap();
        manager.render_artifacts().unwrap();
        let compose = fake_compose(&manager);
        let outcome = apply(&manager, &compose, ApplyOptions { apply: true }).await.unwrap();
        assert!(outcome.impact.is_empty());
    }

    #[tokio::test]
    async fn new_channel_surfaces_as_up_not_restart() {
        let (_dir, manager) = manager();
        manager.render_artifacts().unwrap();
        let compose = fake_compose(&manager);

        let mut spec = manager.get_spec().unwrap();
        let mut config = std::collections::BTreeMap::new();
        config.insert("FOO".to_string(), "bar".to_string());
        spec.channels.insert(
            "slack".to_string(),
            openpalm_spec::ChannelConfig {
                kind: openpalm_spec::ChannelKind::Custom,
                enabled: true,
                exposure: openpalm_spec::AccessScope::Lan,
                image: Some("slack:latest".to_string()),
                container_port: Some(8500),
                host_port: None,
                domains: Vec::new(),
                path_prefixes: Vec::new(),
                rewrite_path: None,
                healthcheck_path: None,
                shared_secret_env: None,
                volumes: Vec::new(),
                config,
            },
        );
        let bytes = openpalm_spec::stringify(&spec).unwrap();
        manager.set_spec(&bytes).unwrap();

        let outcome = apply(&manager, &compose, ApplyOptions { apply: true }).await.unwrap();
        assert!(outcome.impact.up.contains(&"channel-slack".to_string()));
        assert!(!outcome.impact.restart.contains(&"channel-slack".to_string()));
    }

    #[test]
    fn missing_secret_reference_batches_every_missing_name() {
        let mut spec = openpalm_spec::create_default();
        spec.channels.get_mut("chat").unwrap().config.insert(
            "CHAT_INBOUND_TOKEN".to_string(),
            "${CHAT_TOKEN_SECRET}".to_string(),
        );
        let secrets: std::collections::BTreeMap<String, String> = Default::default();
        let missing = missing_secret_references(&spec, &secrets);
        assert_eq!(missing, vec!["chat_CHAT_INBOUND_TOKEN_CHAT_TOKEN_SECRET".to_string()]);
    }

    #[test]
    fn preview_operations_lists_core_and_enabled_channels() {
        let (_dir, manager) = manager();
        manager.get_spec().unwrap();
        let ops = preview_operations(&manager).unwrap();
        let caddy = ops.iter().find(|(name, _)| name == "caddy").unwrap();
        assert_eq!(caddy.1, ReloadSemantics::Reload);
        let gateway = ops.iter().find(|(name, _)| name == "gateway").unwrap();
        assert_eq!(gateway.1, ReloadSemantics::Restart);
        assert!(ops.iter().any(|(name, _)| name == "channel-chat"));
    }
}
