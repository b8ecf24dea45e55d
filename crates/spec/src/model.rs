use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const SUPPORTED_VERSION: u32 = 1;
pub const DEFAULT_INGRESS_PORT: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    Host,
    Lan,
    Public,
}

impl AccessScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessScope::Host => "host",
            AccessScope::Lan => "lan",
            AccessScope::Public => "public",
        }
    }

    pub fn from_str_strict(s: &str) -> Option<Self> {
        match s {
            "host" => Some(AccessScope::Host),
            "lan" => Some(AccessScope::Lan),
            "public" => Some(AccessScope::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaddyConfig {
    pub email: String,
}

/// Distinguishes a built-in channel (looked up in the fixed registry) from
/// a custom one which must carry its own image and container port. Kept as
/// a variant rather than a bag of optional fields per the single source of
/// truth for the distinction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Builtin,
    Custom,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub enabled: bool,
    pub exposure: AccessScope,
    /// Required for custom channels; an override for built-ins.
    pub image: Option<String>,
    pub container_port: Option<u16>,
    pub host_port: Option<u16>,
    pub domains: Vec<String>,
    pub path_prefixes: Vec<String>,
    pub rewrite_path: Option<String>,
    pub healthcheck_path: Option<String>,
    pub shared_secret_env: Option<String>,
    pub volumes: Vec<String>,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub exposure: AccessScope,
    pub image: String,
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub healthcheck_path: Option<String>,
    pub volumes: Vec<String>,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub script: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct StackSpec {
    pub version: u32,
    pub access_scope: AccessScope,
    pub ingress_port: u16,
    pub caddy: Option<CaddyConfig>,
    pub channels: BTreeMap<String, ChannelConfig>,
    pub services: BTreeMap<String, ServiceConfig>,
    pub automations: Vec<Automation>,
}

#[derive(Debug, Error)]
pub enum StackSpecError {
    #[error("{0}")]
    Invalid(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl StackSpecError {
    pub fn invalid(code: impl Into<String>) -> Self {
        StackSpecError::Invalid(code.into())
    }

    pub fn unknown_field(name: &str) -> Self {
        Self::invalid(format!("unknown_stack_spec_field_{name}"))
    }

    pub fn invalid_named(entity: &str, field: &str, name: &str) -> Self {
        Self::invalid(format!("invalid_{entity}_{field}_{name}"))
    }

    pub fn invalid_named_detail(entity: &str, field: &str, name: &str, detail: &str) -> Self {
        Self::invalid(format!("invalid_{entity}_{field}_{name}_{detail}"))
    }

    pub fn missing_built_in_channel(name: &str) -> Self {
        Self::invalid(format!("missing_built_in_channel_{name}"))
    }

    pub fn custom_channel_requires_image(name: &str) -> Self {
        Self::invalid(format!("custom_channel_requires_image_{name}"))
    }

    pub fn custom_channel_requires_container_port(name: &str) -> Self {
        Self::invalid(format!("custom_channel_requires_container_port_{name}"))
    }
}
