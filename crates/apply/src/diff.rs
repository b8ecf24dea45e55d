//! Diffs a prior artifact snapshot against a freshly rendered one and
//! produces the minimal `(up, restart, reload)` impact plan.

use openpalm_artifacts::Artifacts;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImpactPlan {
    pub up: Vec<String>,
    pub restart: Vec<String>,
    pub reload: Vec<String>,
}

impl ImpactPlan {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.restart.is_empty() && self.reload.is_empty()
    }
}

/// Reads the on-disk artifacts at the paths `render_artifacts` would have
/// written last time, shaped identically to `preview` so the two can be
/// diffed field-by-field. Per-channel/per-service env files are only read
/// for the keys present in `preview` (i.e. currently-enabled entities) —
/// anything else reads back as empty, same as if the file never existed.
pub fn snapshot_existing(paths: &openpalm_manager::StackPaths, preview: &Artifacts) -> Artifacts {
    let read_bytes = |p: std::path::PathBuf| std::fs::read(p).unwrap_or_default();
    let read_string = |p: std::path::PathBuf| std::fs::read_to_string(p).unwrap_or_default();

    let channel_envs = preview
        .channel_envs
        .keys()
        .map(|name| (name.clone(), read_string(paths.service_env(name))))
        .collect();
    let service_envs = preview
        .service_envs
        .keys()
        .map(|name| (name.clone(), read_string(paths.service_env(name))))
        .collect();

    Artifacts {
        proxy_config: read_bytes(paths.proxy_config()),
        compose_doc: read_bytes(paths.compose_file()),
        system_env: read_string(paths.system_env()),
        gateway_env: read_string(paths.service_env("gateway")),
        assistant_env: read_string(paths.service_env("assistant")),
        postgres_env: read_string(paths.service_env("postgres")),
        qdrant_env: read_string(paths.service_env("qdrant")),
        openmemory_env: read_string(paths.service_env("openmemory")),
        channel_envs,
        service_envs,
        channel_routes: Default::default(),
    }
}

/// The fixed core services conservatively restarted whenever the compose
/// document gains a service — the new service is unknown to the running
/// stack and any of these may depend on stack-wide rewiring (network
/// membership, gateway routing) that a plain service diff can't see.
const TRANSITIVE_RESTART_SET: &[&str] = &["gateway", "assistant", "openmemory", "admin"];

pub fn diff_impact(old: &Artifacts, new: &Artifacts) -> ImpactPlan {
    let mut up: BTreeSet<String> = BTreeSet::new();
    let mut restart: BTreeSet<String> = BTreeSet::new();
    let mut reload: BTreeSet<String> = BTreeSet::new();

    if old.proxy_config != new.proxy_config {
        reload.insert("caddy".to_string());
    }
    if old.system_env != new.system_env {
        restart.insert("admin".to_string());
        restart.insert("gateway".to_string());
    }
    if old.gateway_env != new.gateway_env {
        restart.insert("gateway".to_string());
    }
    if old.assistant_env != new.assistant_env {
        restart.insert("assistant".to_string());
    }
    if old.postgres_env != new.postgres_env {
        restart.insert("postgres".to_string());
    }
    if old.qdrant_env != new.qdrant_env {
        restart.insert("qdrant".to_string());
    }
    if old.openmemory_env != new.openmemory_env {
        restart.insert("openmemory".to_string());
    }

    for (name, content) in &new.channel_envs {
        if old.channel_envs.get(name).map(String::as_str) != Some(content.as_str()) {
            restart.insert(name.clone());
        }
    }
    for (name, content) in &new.service_envs {
        if old.service_envs.get(name).map(String::as_str) != Some(content.as_str()) {
            restart.insert(name.clone());
        }
    }

    if old.compose_doc != new.compose_doc {
        let old_names = openpalm_artifacts::compose_service_names(&old.compose_doc);
        let new_names = openpalm_artifacts::compose_service_names(&new.compose_doc);
        let added: Vec<String> = new_names.difference(&old_names).cloned().collect();
        if !added.is_empty() {
            up.extend(added);
            restart.extend(TRANSITIVE_RESTART_SET.iter().map(|s| s.to_string()));
        }
    }

    // `up` wins over `restart` when a service lands in both.
    for svc in &up {
        restart.remove(svc);
    }

    ImpactPlan { up: up.into_iter().collect(), restart: restart.into_iter().collect(), reload: reload.into_iter().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Artifacts {
        Artifacts {
            proxy_config: Vec::new(),
            compose_doc: Vec::new(),
            system_env: String::new(),
            gateway_env: String::new(),
            assistant_env: String::new(),
            postgres_env: String::new(),
            qdrant_env: String::new(),
            openmemory_env: String::new(),
            channel_envs: Default::default(),
            service_envs: Default::default(),
            channel_routes: Default::default(),
        }
    }

    #[test]
    fn identical_snapshots_produce_empty_plan() {
        let spec = openpalm_spec::create_default();
        let artifacts = openpalm_artifacts::generate(&spec, &Default::default()).unwrap();
        let plan = diff_impact(&artifacts.clone(), &artifacts);
        assert!(plan.is_empty());
    }

    #[test]
    fn proxy_change_reloads_caddy() {
        let mut old = blank();
        let mut new = blank();
        old.proxy_config = b"{}".to_vec();
        new.proxy_config = b"{\"a\":1}".to_vec();
        let plan = diff_impact(&old, &new);
        assert_eq!(plan.reload, vec!["caddy".to_string()]);
    }

    #[test]
    fn new_channel_goes_to_up_not_restart() {
        let mut old = blank();
        old.compose_doc = b"services: {}\n".to_vec();
        let mut new = blank();
        new.compose_doc = b"services:\n  channel-slack: {}\n".to_vec();
        let plan = diff_impact(&old, &new);
        assert_eq!(plan.up, vec!["channel-slack".to_string()]);
        assert!(!plan.restart.contains(&"channel-slack".to_string()));
        for svc in TRANSITIVE_RESTART_SET {
            assert!(plan.restart.contains(&svc.to_string()));
        }
    }

    #[test]
    fn channel_env_change_restarts_that_channel() {
        let mut old = blank();
        let mut new = blank();
        old.channel_envs.insert("channel-chat".to_string(), "A=1\n".to_string());
        new.channel_envs.insert("channel-chat".to_string(), "A=2\n".to_string());
        let plan = diff_impact(&old, &new);
        assert_eq!(plan.restart, vec!["channel-chat".to_string()]);
    }
}
