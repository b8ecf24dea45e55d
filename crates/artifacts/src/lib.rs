//! openpalm_artifacts
//!
//! Pure function: `(spec, secrets) -> Artifacts`. No filesystem access, no
//! clock, no randomness — identical inputs always produce byte-identical
//! outputs, which is what lets the apply engine diff prior vs new
//! artifacts and property-test this crate without touching disk.

mod compose;
mod env;
mod ipguard;
mod proxy;
mod resolve;

use openpalm_spec::{sanitize_name, ChannelKind, StackSpec};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{0}")]
    Invalid(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

#[derive(Debug, Clone)]
pub struct Artifacts {
    pub proxy_config: Vec<u8>,
    pub compose_doc: Vec<u8>,
    pub system_env: String,
    pub gateway_env: String,
    pub assistant_env: String,
    pub postgres_env: String,
    pub qdrant_env: String,
    pub openmemory_env: String,
    /// Keyed by sanitized compose service name, e.g. `channel-chat`.
    pub channel_envs: BTreeMap<String, String>,
    /// Keyed by sanitized compose service name.
    pub service_envs: BTreeMap<String, String>,
    /// Per-channel route snippet, keyed by sanitized channel name (no
    /// `channel-` prefix). Written under the routes directory so stale
    /// snippets from removed/disabled channels can be garbage-collected
    /// independently of the monolithic proxy config they're embedded in.
    pub channel_routes: BTreeMap<String, Vec<u8>>,
}

pub fn generate(spec: &StackSpec, secrets: &BTreeMap<String, String>) -> Result<Artifacts, ArtifactError> {
    let (proxy_value, channel_route_values) = proxy::generate(spec);
    let proxy_config = openpalm_common::canonical_json_bytes(&proxy_value)
        .map_err(|e| ArtifactError::Invalid(e.to_string()))?;
    let mut channel_routes = BTreeMap::new();
    for (name, route) in &channel_route_values {
        let bytes = openpalm_common::canonical_json_bytes(route)
            .map_err(|e| ArtifactError::Invalid(e.to_string()))?;
        channel_routes.insert(name.clone(), bytes);
    }

    let compose_value = compose::generate(spec);
    let compose_doc = serde_yaml_ng::to_string(&compose_value)?.into_bytes();

    let mut channel_envs = BTreeMap::new();
    for (name, channel) in &spec.channels {
        if !channel.enabled {
            continue;
        }
        let resolved = resolve::resolve_config(name, &channel.config, secrets)?;
        channel_envs.insert(format!("channel-{}", sanitize_name(name)), resolve::kv_to_env_file(&resolved));
    }

    let mut service_envs = BTreeMap::new();
    for (name, service) in &spec.services {
        if !service.enabled {
            continue;
        }
        let resolved = resolve::resolve_config(name, &service.config, secrets)?;
        service_envs.insert(sanitize_name(name), resolve::kv_to_env_file(&resolved));
    }

    Ok(Artifacts {
        proxy_config,
        compose_doc,
        system_env: env::system_env(spec),
        gateway_env: env::gateway_env(spec, secrets),
        assistant_env: env::assistant_env(secrets),
        postgres_env: env::postgres_env(secrets),
        qdrant_env: env::qdrant_env(secrets),
        openmemory_env: env::openmemory_env(secrets),
        channel_envs,
        service_envs,
        channel_routes,
    })
}

pub fn compose_service_names(compose_doc: &[u8]) -> std::collections::BTreeSet<String> {
    match serde_yaml_ng::from_slice::<serde_json::Value>(compose_doc) {
        Ok(v) => compose::service_names(&v),
        Err(_) => Default::default(),
    }
}

/// `start_period + interval * retries` for `service`'s declared healthcheck,
/// used by the apply engine's health-gate poll loop to derive a per-service
/// deadline. `None` if the service or its healthcheck isn't present.
pub fn service_healthcheck_deadline(compose_doc: &[u8], service: &str) -> Option<std::time::Duration> {
    let doc: serde_json::Value = serde_yaml_ng::from_slice(compose_doc).ok()?;
    let healthcheck = doc.get("services")?.get(service)?.get("healthcheck")?;
    let start_period = parse_duration(healthcheck.get("start_period")?.as_str()?)?;
    let interval = parse_duration(healthcheck.get("interval")?.as_str()?)?;
    let retries = healthcheck.get("retries")?.as_u64()? as u32;
    Some(start_period + interval * retries)
}

fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    let split_at = s.len().checked_sub(1)?;
    let (num, unit) = s.split_at(split_at);
    let n: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(std::time::Duration::from_secs(n)),
        "m" => Some(std::time::Duration::from_secs(n * 60)),
        "h" => Some(std::time::Duration::from_secs(n * 3600)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn default_render_matches_scenario_one() {
        let spec = openpalm_spec::create_default();
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();

        assert!(artifacts.system_env.contains("OPENPALM_ACCESS_SCOPE=lan"));
        assert!(artifacts
            .system_env
            .contains("OPENPALM_ENABLED_CHANNELS=channel-chat,channel-discord,channel-voice,channel-telegram"));

        let compose_text = String::from_utf8(artifacts.compose_doc).unwrap();
        for needle in ["caddy:", "assistant:", "gateway:", "admin:", "channel-chat:", "8181:8181"] {
            assert!(compose_text.contains(needle), "missing {needle} in:\n{compose_text}");
        }

        let proxy_text = String::from_utf8(artifacts.proxy_config).unwrap();
        assert!(proxy_text.contains("\":80\""));
    }

    #[test]
    fn host_exposed_channel_binds_loopback() {
        let mut spec = openpalm_spec::create_default();
        spec.channels.get_mut("chat").unwrap().exposure = openpalm_spec::AccessScope::Host;
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        let compose_text = String::from_utf8(artifacts.compose_doc).unwrap();
        assert!(compose_text.contains("127.0.0.1:8181:8181"));
    }

    #[test]
    fn secret_reference_resolved_into_channel_env() {
        let mut spec = openpalm_spec::create_default();
        spec.channels
            .get_mut("chat")
            .unwrap()
            .config
            .insert("CHAT_INBOUND_TOKEN".to_string(), "${CHAT_TOKEN_SECRET}".to_string());
        let secrets = secret_map(&[("CHAT_TOKEN_SECRET", "chat-token")]);
        let artifacts = generate(&spec, &secrets).unwrap();
        let chat_env = &artifacts.channel_envs["channel-chat"];
        assert!(chat_env.contains("CHAT_INBOUND_TOKEN=chat-token"));
    }

    #[test]
    fn missing_secret_reference_fails_with_stable_code() {
        let mut spec = openpalm_spec::create_default();
        spec.channels
            .get_mut("chat")
            .unwrap()
            .config
            .insert("CHAT_INBOUND_TOKEN".to_string(), "${CHAT_TOKEN_SECRET}".to_string());
        let err = generate(&spec, &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unresolved_secret_reference_chat_CHAT_INBOUND_TOKEN_CHAT_TOKEN_SECRET"
        );
    }

    #[test]
    fn all_channels_disabled_emits_no_channel_services() {
        let mut spec = openpalm_spec::create_default();
        for channel in spec.channels.values_mut() {
            channel.enabled = false;
        }
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        let compose_text = String::from_utf8(artifacts.compose_doc).unwrap();
        assert!(!compose_text.contains("channel-"));
        assert!(artifacts.channel_envs.is_empty());
    }

    #[test]
    fn generate_is_deterministic() {
        let spec = openpalm_spec::create_default();
        let a = generate(&spec, &BTreeMap::new()).unwrap();
        let b = generate(&spec, &BTreeMap::new()).unwrap();
        assert_eq!(a.proxy_config, b.proxy_config);
        assert_eq!(a.compose_doc, b.compose_doc);
    }

    #[test]
    fn healthcheck_deadline_derived_from_compose_doc() {
        let spec = openpalm_spec::create_default();
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        let deadline = service_healthcheck_deadline(&artifacts.compose_doc, "assistant").unwrap();
        assert_eq!(deadline, std::time::Duration::from_secs(10 + 10 * 5));
    }

    #[test]
    fn healthcheck_deadline_missing_for_unknown_service() {
        let spec = openpalm_spec::create_default();
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        assert!(service_healthcheck_deadline(&artifacts.compose_doc, "no-such-service").is_none());
    }

    #[test]
    fn default_builtin_channel_proxy_route_uses_registry_port() {
        let spec = openpalm_spec::create_default();
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        let proxy_text = String::from_utf8(artifacts.proxy_config).unwrap();
        assert!(
            proxy_text.contains("channel-chat:8181"),
            "expected registry port 8181 in proxy route for default chat channel, got:\n{proxy_text}"
        );
        assert!(!proxy_text.contains("channel-chat:0"));
    }

    #[test]
    fn new_channel_appears_in_compose_service_names() {
        let mut spec = openpalm_spec::create_default();
        let mut config = BTreeMap::new();
        config.insert("FOO".to_string(), "bar".to_string());
        spec.channels.insert(
            "slack".to_string(),
            openpalm_spec::ChannelConfig {
                kind: ChannelKind::Custom,
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
        let artifacts = generate(&spec, &BTreeMap::new()).unwrap();
        let names = compose_service_names(&artifacts.compose_doc);
        assert!(names.contains("channel-slack"));
    }
}
