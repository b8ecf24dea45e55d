//! Fixed-key and prefix-selected env files picked out of the secret store.

use crate::resolve::kv_to_env_file;
use openpalm_spec::{sanitize_name, ChannelKind, StackSpec};
use std::collections::BTreeMap;

const GATEWAY_PREFIXES: &[&str] = &["OPENPALM_GATEWAY_", "GATEWAY_"];
const GATEWAY_LITERAL_KEYS: &[&str] = &["ANTHROPIC_API_KEY", "OPENPALM_SMALL_MODEL_API_KEY"];

const ASSISTANT_PREFIXES: &[&str] = &["ANTHROPIC_", "OPENPALM_ASSISTANT_", "OPENPALM_SMALL_MODEL_"];

const POSTGRES_KEYS: &[&str] = &["POSTGRES_PASSWORD", "POSTGRES_USER", "POSTGRES_DB"];
const QDRANT_KEYS: &[&str] = &["QDRANT_API_KEY"];
const OPENMEMORY_KEYS: &[&str] = &["OPENMEMORY_API_KEY", "OPENMEMORY_LLM_API_KEY"];

fn pick_by_prefix(secrets: &BTreeMap<String, String>, prefixes: &[&str]) -> BTreeMap<String, String> {
    secrets
        .iter()
        .filter(|(k, _)| prefixes.iter().any(|p| k.starts_with(p)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn pick_keys(secrets: &BTreeMap<String, String>, keys: &[&str]) -> BTreeMap<String, String> {
    keys.iter()
        .filter_map(|k| secrets.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// `OPENPALM_ACCESS_SCOPE` and `OPENPALM_ENABLED_CHANNELS`. Channel order is
/// registry order for built-ins, then custom channels alphabetically, which
/// is what makes the scenario 1 fixture assertion stable.
pub fn system_env(spec: &StackSpec) -> String {
    let mut enabled_builtins = Vec::new();
    for builtin in openpalm_spec::BUILTIN_CHANNELS {
        if spec.channels.get(builtin.name).map(|c| c.enabled).unwrap_or(false) {
            enabled_builtins.push(format!("channel-{}", sanitize_name(builtin.name)));
        }
    }
    let mut enabled_custom: Vec<String> = spec
        .channels
        .iter()
        .filter(|(name, c)| c.enabled && c.kind == ChannelKind::Custom && !openpalm_spec::is_builtin(name))
        .map(|(name, _)| format!("channel-{}", sanitize_name(name)))
        .collect();
    enabled_custom.sort();

    let mut all = enabled_builtins;
    all.extend(enabled_custom);

    let mut kv = BTreeMap::new();
    kv.insert("OPENPALM_ACCESS_SCOPE".to_string(), spec.access_scope.as_str().to_string());
    kv.insert("OPENPALM_ENABLED_CHANNELS".to_string(), all.join(","));
    kv_to_env_file(&kv)
}

pub fn gateway_env(spec: &StackSpec, secrets: &BTreeMap<String, String>) -> String {
    let mut kv = pick_by_prefix(secrets, GATEWAY_PREFIXES);
    kv.extend(pick_keys(secrets, GATEWAY_LITERAL_KEYS));
    kv.insert("OPENPALM_ACCESS_SCOPE".to_string(), spec.access_scope.as_str().to_string());
    kv_to_env_file(&kv)
}

pub fn assistant_env(secrets: &BTreeMap<String, String>) -> String {
    kv_to_env_file(&pick_by_prefix(secrets, ASSISTANT_PREFIXES))
}

pub fn postgres_env(secrets: &BTreeMap<String, String>) -> String {
    let mut kv = pick_keys(secrets, POSTGRES_KEYS);
    kv.entry("POSTGRES_USER".to_string()).or_insert_with(|| "openpalm".to_string());
    kv.entry("POSTGRES_DB".to_string()).or_insert_with(|| "openpalm".to_string());
    kv_to_env_file(&kv)
}

pub fn qdrant_env(secrets: &BTreeMap<String, String>) -> String {
    kv_to_env_file(&pick_keys(secrets, QDRANT_KEYS))
}

pub fn openmemory_env(secrets: &BTreeMap<String, String>) -> String {
    kv_to_env_file(&pick_keys(secrets, OPENMEMORY_KEYS))
}
