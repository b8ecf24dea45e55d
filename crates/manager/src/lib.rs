//! openpalm_manager
//!
//! Owns the spec file, the secret file, and the rendered-artifacts tree.
//! Every write path goes through a single process-wide mutex: acquire,
//! read a consistent snapshot, validate, rewrite, render, release. Reads
//! also take the lock briefly so a concurrent writer can't be observed
//! mid-rewrite.

mod error;
mod paths;

pub use error::{ManagerError, Result};
pub use paths::StackPaths;

use openpalm_artifacts::Artifacts;
use openpalm_audit_spec::{
    AutomationDeleted, AutomationUpserted, ImpactPlanSnapshot, SecretDeleted, SecretUpserted,
    SpecUpdated, StackAuditEvent,
};
use openpalm_spec::{AccessScope, Automation, ChannelKind, StackSpec};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ts() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub struct StackManager {
    paths: StackPaths,
    lock: Mutex<()>,
}

impl StackManager {
    pub fn new(paths: StackPaths) -> Self {
        Self { paths, lock: Mutex::new(()) }
    }

    pub fn paths(&self) -> &StackPaths {
        &self.paths
    }

    fn append_audit(&self, event: StackAuditEvent) -> Result<()> {
        let last_hash = openpalm_audit_log::verify_log(&self.paths.audit_log)
            .unwrap_or_else(|_| openpalm_audit_log::genesis_hash());
        let mut appender = openpalm_audit_log::AuditAppender::open(&self.paths.audit_log)?.with_last_hash(last_hash);
        appender.append(event)?;
        Ok(())
    }

    pub fn get_spec(&self) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        Ok(openpalm_spec::ensure_spec(&self.paths.spec_file)?)
    }

    fn read_secrets(&self) -> Result<BTreeMap<String, String>> {
        Ok(openpalm_secrets::read(&self.paths.secrets_file)?)
    }

    fn write_spec_and_render(&self, spec: &StackSpec) -> Result<Artifacts> {
        let bytes = openpalm_spec::stringify(spec)?;
        openpalm_common::atomic_write(&self.paths.spec_file, &bytes, "spec")?;
        self.append_audit(StackAuditEvent::SpecUpdated(SpecUpdated {
            schema_version: 1,
            ts: now_ts(),
            spec_hash: openpalm_common::sha256_bytes(&bytes),
            access_scope: spec.access_scope.as_str().to_string(),
            channel_count: spec.channels.len() as u32,
            service_count: spec.services.len() as u32,
            automation_count: spec.automations.len() as u32,
        }))?;
        self.render_artifacts_for(spec)
    }

    /// Parse-validate-write-render. Any validation error aborts before any
    /// write — `set_spec` never replaces the existing file on failure.
    pub fn set_spec(&self, raw: &[u8]) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::parse(raw)?;
        self.write_spec_and_render(&spec)?;
        Ok(spec)
    }

    pub fn set_access_scope(&self, scope: AccessScope) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        let mut spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        spec.access_scope = scope;
        self.write_spec_and_render(&spec)?;
        Ok(spec)
    }

    pub fn set_channel_access(&self, name: &str, exposure: AccessScope) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        let mut spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        let channel = spec
            .channels
            .get_mut(name)
            .ok_or_else(|| ManagerError::Invalid(format!("unknown_channel_{name}")))?;
        channel.exposure = exposure;
        self.write_spec_and_render(&spec)?;
        Ok(spec)
    }

    /// For built-in channels, unrecognized keys in `values` are dropped and
    /// recognized keys missing from `values` are cleared. For custom
    /// channels, `values` replaces `config` entirely.
    pub fn set_channel_config(&self, name: &str, values: BTreeMap<String, String>) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        let mut spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        let channel = spec
            .channels
            .get_mut(name)
            .ok_or_else(|| ManagerError::Invalid(format!("unknown_channel_{name}")))?;
        match channel.kind {
            ChannelKind::Builtin => {
                let allowed = openpalm_spec::find_builtin_channel(name).map(|b| b.config_keys).unwrap_or(&[]);
                channel.config = values
                    .into_iter()
                    .filter(|(k, _)| allowed.contains(&k.as_str()))
                    .map(|(k, v)| (k, openpalm_spec::sanitize_scalar(&v)))
                    .collect();
            }
            ChannelKind::Custom => {
                channel.config = values.into_iter().map(|(k, v)| (k, openpalm_spec::sanitize_scalar(&v))).collect();
            }
        }
        self.write_spec_and_render(&spec)?;
        Ok(spec)
    }

    pub fn upsert_secret(&self, name: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        openpalm_secrets::upsert_secret(&self.paths.secrets_file, name, value)?;
        self.append_audit(StackAuditEvent::SecretUpserted(SecretUpserted {
            schema_version: 1,
            ts: now_ts(),
            name: name.to_string(),
            value_hash: openpalm_common::sha256_bytes(value.as_bytes()),
        }))?;
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        self.render_artifacts_for(&spec)?;
        Ok(())
    }

    pub fn delete_secret(&self, name: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        openpalm_secrets::delete_secret(&self.paths.secrets_file, name, &spec)?;
        self.append_audit(StackAuditEvent::SecretDeleted(SecretDeleted {
            schema_version: 1,
            ts: now_ts(),
            name: name.to_string(),
        }))?;
        self.render_artifacts_for(&spec)?;
        Ok(())
    }

    pub fn list_secret_manager_state(&self) -> Result<Vec<openpalm_secrets::SecretUsage>> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        Ok(openpalm_secrets::list_secret_manager_state(&self.paths.secrets_file, &spec)?)
    }

    pub fn list_automations(&self) -> Result<Vec<Automation>> {
        let _guard = self.lock.lock().unwrap();
        Ok(openpalm_spec::ensure_spec(&self.paths.spec_file)?.automations)
    }

    pub fn get_automation(&self, id: &str) -> Result<Option<Automation>> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        Ok(spec.automations.into_iter().find(|a| a.id == id))
    }

    pub fn upsert_automation(&self, input: Automation) -> Result<StackSpec> {
        let _guard = self.lock.lock().unwrap();
        if input.script.trim().is_empty() {
            return Err(ManagerError::Invalid(format!("invalid_automation_script_{}", input.id)));
        }
        if input.name.trim().is_empty() {
            return Err(ManagerError::Invalid(format!("invalid_automation_name_{}", input.id)));
        }
        let mut spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        let schedule_hash = openpalm_common::sha256_bytes(input.schedule.as_bytes());
        match spec.automations.iter_mut().find(|a| a.id == input.id) {
            Some(existing) => *existing = input.clone(),
            None => spec.automations.push(input.clone()),
        }
        self.write_spec_and_render(&spec)?;
        self.append_audit(StackAuditEvent::AutomationUpserted(AutomationUpserted {
            schema_version: 1,
            ts: now_ts(),
            id: input.id,
            enabled: input.enabled,
            schedule_hash,
        }))?;
        Ok(spec)
    }

    /// Returns whether an automation with this id was actually removed.
    pub fn delete_automation(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let mut spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        let before = spec.automations.len();
        spec.automations.retain(|a| a.id != id);
        let removed = spec.automations.len() != before;
        if removed {
            self.write_spec_and_render(&spec)?;
            self.append_audit(StackAuditEvent::AutomationDeleted(AutomationDeleted {
                schema_version: 1,
                ts: now_ts(),
                id: id.to_string(),
            }))?;
        }
        Ok(removed)
    }

    /// Renders artifacts without writing anything to disk.
    pub fn render_preview(&self) -> Result<Artifacts> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        let secrets = self.read_secrets()?;
        Ok(openpalm_artifacts::generate(&spec, &secrets)?)
    }

    pub fn render_artifacts(&self) -> Result<Artifacts> {
        let _guard = self.lock.lock().unwrap();
        let spec = openpalm_spec::ensure_spec(&self.paths.spec_file)?;
        self.render_artifacts_for(&spec)
    }

    fn render_artifacts_for(&self, spec: &StackSpec) -> Result<Artifacts> {
        let secrets = self.read_secrets()?;
        let artifacts = openpalm_artifacts::generate(spec, &secrets)?;
        tracing::info!(
            channels = spec.channels.len(),
            services = spec.services.len(),
            "rendering stack artifacts"
        );

        openpalm_common::atomic_write(&self.paths.proxy_config(), &artifacts.proxy_config, "caddy")?;
        openpalm_common::atomic_write(&self.paths.compose_file(), &artifacts.compose_doc, "compose")?;
        openpalm_common::atomic_write(&self.paths.system_env(), artifacts.system_env.as_bytes(), "system")?;
        openpalm_common::atomic_write(&self.paths.service_env("gateway"), artifacts.gateway_env.as_bytes(), "gateway")?;
        openpalm_common::atomic_write(&self.paths.service_env("assistant"), artifacts.assistant_env.as_bytes(), "assistant")?;
        openpalm_common::atomic_write(&self.paths.service_env("postgres"), artifacts.postgres_env.as_bytes(), "postgres")?;
        openpalm_common::atomic_write(&self.paths.service_env("qdrant"), artifacts.qdrant_env.as_bytes(), "qdrant")?;
        openpalm_common::atomic_write(&self.paths.service_env("openmemory"), artifacts.openmemory_env.as_bytes(), "openmemory")?;

        let mut live_service_dirs: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for (service_name, content) in artifacts.channel_envs.iter().chain(artifacts.service_envs.iter()) {
            openpalm_common::atomic_write(&self.paths.service_env(service_name), content.as_bytes(), service_name)?;
            live_service_dirs.insert(service_name.clone());
        }
        self.gc_stale_service_envs(&live_service_dirs)?;

        let mut live_route_files: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for (channel_name, route_bytes) in &artifacts.channel_routes {
            let file_name = format!("{channel_name}.json");
            openpalm_common::atomic_write(&self.paths.routes_dir().join(&file_name), route_bytes, channel_name)?;
            live_route_files.insert(file_name);
        }
        self.gc_stale_routes(&live_route_files)?;

        self.append_audit(StackAuditEvent::ArtifactsRendered(openpalm_audit_spec::ArtifactsRendered {
            schema_version: 1,
            ts: now_ts(),
            proxy_config_hash: openpalm_common::sha256_bytes(&artifacts.proxy_config),
            compose_doc_hash: openpalm_common::sha256_bytes(&artifacts.compose_doc),
            system_env_hash: openpalm_common::sha256_bytes(artifacts.system_env.as_bytes()),
        }))?;

        Ok(artifacts)
    }

    /// Removes `<state>/<service>/.env` for any directory that is no
    /// longer in the freshly rendered set. Core service directories
    /// (gateway, assistant, postgres, qdrant, openmemory) and the routes
    /// directory are never touched here.
    fn gc_stale_service_envs(&self, live: &std::collections::BTreeSet<String>) -> Result<()> {
        const CORE_DIRS: &[&str] = &["gateway", "assistant", "postgres", "qdrant", "openmemory", "routes"];
        let entries = match std::fs::read_dir(&self.paths.state_root) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if CORE_DIRS.contains(&dir_name.as_str()) || live.contains(&dir_name) {
                continue;
            }
            let env_path = entry.path().join(".env");
            if env_path.exists() {
                let _ = std::fs::remove_file(env_path);
            }
        }
        Ok(())
    }

    /// Removes any file under the routes directory that isn't in the
    /// freshly rendered set, except the reserved user-override file.
    fn gc_stale_routes(&self, live: &std::collections::BTreeSet<String>) -> Result<()> {
        let override_name = self
            .paths
            .routes_override_file()
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let entries = match std::fs::read_dir(self.paths.routes_dir()) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if live.contains(&file_name) || Some(&file_name) == override_name.as_ref() {
                continue;
            }
            let _ = std::fs::remove_file(entry.path());
        }
        Ok(())
    }
}

/// Plan/executed audit snapshots are constructed by `openpalm_apply`, not
/// here; re-exported so callers don't need a direct `openpalm_audit_spec`
/// dependency just to build one.
pub fn impact_plan_snapshot(up: Vec<String>, restart: Vec<String>, reload: Vec<String>) -> ImpactPlanSnapshot {
    ImpactPlanSnapshot { up, restart, reload }
}
