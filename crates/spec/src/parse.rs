use crate::model::{
    AccessScope, Automation, CaddyConfig, ChannelConfig, ChannelKind, ServiceConfig, StackSpec,
    StackSpecError, DEFAULT_INGRESS_PORT, SUPPORTED_VERSION,
};
use crate::patterns;
use crate::registry;
use serde_yaml_ng::Value;
use std::collections::BTreeMap;
use std::path::Path;

type Result<T> = std::result::Result<T, StackSpecError>;

pub fn create_default() -> StackSpec {
    let mut channels = BTreeMap::new();
    for builtin in registry::BUILTIN_CHANNELS {
        channels.insert(
            builtin.name.to_string(),
            ChannelConfig {
                kind: ChannelKind::Builtin,
                enabled: true,
                exposure: AccessScope::Lan,
                image: None,
                container_port: None,
                host_port: None,
                domains: Vec::new(),
                path_prefixes: Vec::new(),
                rewrite_path: None,
                healthcheck_path: None,
                shared_secret_env: None,
                volumes: Vec::new(),
                config: BTreeMap::new(),
            },
        );
    }
    StackSpec {
        version: SUPPORTED_VERSION,
        access_scope: AccessScope::Lan,
        ingress_port: DEFAULT_INGRESS_PORT,
        caddy: None,
        channels,
        services: BTreeMap::new(),
        automations: Vec::new(),
    }
}

pub fn parse_secret_reference(s: &str) -> Option<String> {
    patterns::parse_secret_reference(s)
}

pub fn stringify(spec: &StackSpec) -> Result<Vec<u8>> {
    Ok(serde_yaml_ng::to_string(spec)?.into_bytes())
}

pub fn parse(raw: &[u8]) -> Result<StackSpec> {
    let text = std::str::from_utf8(raw).map_err(|_| StackSpecError::invalid("invalid_stack_spec"))?;
    let value: Value = serde_yaml_ng::from_str(text)?;
    let map = value
        .as_mapping()
        .ok_or_else(|| StackSpecError::invalid("invalid_stack_spec"))?;

    const KNOWN: &[&str] = &[
        "version",
        "accessScope",
        "ingressPort",
        "caddy",
        "channels",
        "services",
        "automations",
    ];
    for (k, _) in map {
        let key = k.as_str().ok_or_else(|| StackSpecError::invalid("invalid_stack_spec"))?;
        if !KNOWN.contains(&key) {
            return Err(StackSpecError::unknown_field(key));
        }
    }

    let version = get_u32(map, "version")?.ok_or_else(|| StackSpecError::invalid("invalid_stack_spec_version"))?;
    if version != SUPPORTED_VERSION {
        return Err(StackSpecError::invalid("invalid_stack_spec_version"));
    }

    let access_scope = match get_str(map, "accessScope")? {
        Some(s) => AccessScope::from_str_strict(&s)
            .ok_or_else(|| StackSpecError::invalid("invalid_stack_spec_accessScope"))?,
        None => return Err(StackSpecError::invalid("invalid_stack_spec_accessScope")),
    };

    let ingress_port = match get_u32(map, "ingressPort")? {
        Some(p) if (1..=65535).contains(&p) => p as u16,
        Some(_) => return Err(StackSpecError::invalid("invalid_stack_spec_ingressPort")),
        None => DEFAULT_INGRESS_PORT,
    };

    let caddy = match map.get(Value::String("caddy".into())) {
        Some(Value::Null) | None => None,
        Some(v) => {
            let cmap = v.as_mapping().ok_or_else(|| StackSpecError::invalid("invalid_caddy"))?;
            let email = get_str(cmap, "email")?.ok_or_else(|| StackSpecError::invalid("invalid_caddy_email_format"))?;
            if !patterns::EMAIL.is_match(&email) {
                return Err(StackSpecError::invalid("invalid_caddy_email_format"));
            }
            Some(CaddyConfig { email })
        }
    };

    let mut channels = BTreeMap::new();
    if let Some(v) = map.get(Value::String("channels".into())) {
        let cmap = v.as_mapping().ok_or_else(|| StackSpecError::invalid("invalid_stack_spec_channels"))?;
        for (k, v) in cmap {
            let name = k
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| StackSpecError::invalid("invalid_channel_name"))?;
            let channel = parse_channel(&name, v)?;
            channels.insert(name, channel);
        }
    }
    for builtin in registry::BUILTIN_CHANNELS {
        channels.entry(builtin.name.to_string()).or_insert_with(|| ChannelConfig {
            kind: ChannelKind::Builtin,
            enabled: true,
            exposure: AccessScope::Lan,
            image: None,
            container_port: None,
            host_port: None,
            domains: Vec::new(),
            path_prefixes: Vec::new(),
            rewrite_path: None,
            healthcheck_path: None,
            shared_secret_env: None,
            volumes: Vec::new(),
            config: BTreeMap::new(),
        });
    }

    let mut services = BTreeMap::new();
    if let Some(v) = map.get(Value::String("services".into())) {
        let smap = v.as_mapping().ok_or_else(|| StackSpecError::invalid("invalid_stack_spec_services"))?;
        for (k, v) in smap {
            let name = k
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| StackSpecError::invalid("invalid_service_name"))?;
            let service = parse_service(&name, v)?;
            services.insert(name, service);
        }
    }

    let mut automations = Vec::new();
    if let Some(v) = map.get(Value::String("automations".into())) {
        let seq = v.as_sequence().ok_or_else(|| StackSpecError::invalid("invalid_stack_spec_automations"))?;
        for (idx, item) in seq.iter().enumerate() {
            automations.push(parse_automation(idx, item)?);
        }
    }

    let spec = StackSpec {
        version,
        access_scope,
        ingress_port,
        caddy,
        channels,
        services,
        automations,
    };
    validate(&spec)?;
    Ok(spec)
}

fn validate(spec: &StackSpec) -> Result<()> {
    for builtin in registry::BUILTIN_CHANNELS {
        if !spec.channels.contains_key(builtin.name) {
            return Err(StackSpecError::missing_built_in_channel(builtin.name));
        }
    }
    Ok(())
}

fn parse_channel(name: &str, v: &Value) -> Result<ChannelConfig> {
    let map = v
        .as_mapping()
        .ok_or_else(|| StackSpecError::invalid_named("channel", "shape", name))?;

    const KNOWN: &[&str] = &[
        "enabled",
        "exposure",
        "image",
        "containerPort",
        "hostPort",
        "domains",
        "pathPrefixes",
        "rewritePath",
        "healthcheckPath",
        "sharedSecretEnv",
        "volumes",
        "config",
    ];
    for (k, _) in map {
        let key = k
            .as_str()
            .ok_or_else(|| StackSpecError::invalid_named("channel", "field", name))?;
        if !KNOWN.contains(&key) {
            return Err(StackSpecError::invalid_named_detail("channel", "field", name, key));
        }
    }

    let builtin = registry::find(name);
    let kind = if builtin.is_some() { ChannelKind::Builtin } else { ChannelKind::Custom };

    let enabled = get_bool(map, "enabled")?.unwrap_or(true);
    let exposure = match get_str(map, "exposure")? {
        Some(s) => AccessScope::from_str_strict(&s)
            .ok_or_else(|| StackSpecError::invalid_named("channel", "exposure", name))?,
        None => AccessScope::Lan,
    };

    let image = get_str(map, "image")?;
    if let Some(img) = &image {
        if !patterns::IMAGE_NAME.is_match(img) {
            return Err(StackSpecError::invalid_named("channel", "image", name));
        }
    }
    let container_port = match get_u32(map, "containerPort")? {
        Some(p) if (1..=65535).contains(&p) => Some(p as u16),
        Some(_) => return Err(StackSpecError::invalid_named("channel", "containerPort", name)),
        None => None,
    };

    if kind == ChannelKind::Custom {
        if image.is_none() {
            return Err(StackSpecError::custom_channel_requires_image(name));
        }
        if container_port.is_none() {
            return Err(StackSpecError::custom_channel_requires_container_port(name));
        }
    }

    let host_port = match get_u32(map, "hostPort")? {
        Some(p) if (1..=65535).contains(&p) => Some(p as u16),
        Some(_) => return Err(StackSpecError::invalid_named("channel", "hostPort", name)),
        None => None,
    };

    let domains = get_str_list(map, "domains")?;
    for d in &domains {
        if !patterns::domain_is_valid(d) {
            return Err(StackSpecError::invalid_named("channel", "domain", name));
        }
    }

    let path_prefixes = get_str_list(map, "pathPrefixes")?;
    for p in &path_prefixes {
        if !patterns::PATH_PREFIX.is_match(p) {
            return Err(StackSpecError::invalid_named("channel", "pathPrefix", name));
        }
    }

    let rewrite_path = get_str(map, "rewritePath")?;
    if let Some(p) = &rewrite_path {
        if !patterns::PATH_PREFIX.is_match(p) {
            return Err(StackSpecError::invalid_named("channel", "rewritePath", name));
        }
    }

    let healthcheck_path = get_str(map, "healthcheckPath")?;
    let shared_secret_env = get_str(map, "sharedSecretEnv")?;
    let volumes = get_str_list(map, "volumes")?;

    let allowed_config_keys: Option<&[&str]> = builtin.map(|b| b.config_keys);
    let mut config = BTreeMap::new();
    if let Some(v) = map.get(Value::String("config".into())) {
        let cmap = v
            .as_mapping()
            .ok_or_else(|| StackSpecError::invalid_named("channel", "config", name))?;
        for (k, v) in cmap {
            let key = k
                .as_str()
                .ok_or_else(|| StackSpecError::invalid_named("channel", "config", name))?
                .to_string();
            if key.is_empty() {
                return Err(StackSpecError::invalid_named("channel", "config", name));
            }
            if let Some(allowed) = allowed_config_keys {
                if !allowed.contains(&key.as_str()) {
                    continue; // strict closure: unrecognized builtin config keys dropped silently
                }
            }
            let raw = v
                .as_str()
                .ok_or_else(|| StackSpecError::invalid_named_detail("channel", "config", name, &key))?;
            config.insert(key, patterns::sanitize_scalar(raw));
        }
    }

    Ok(ChannelConfig {
        kind,
        enabled,
        exposure,
        image,
        container_port,
        host_port,
        domains,
        path_prefixes,
        rewrite_path,
        healthcheck_path,
        shared_secret_env,
        volumes,
        config,
    })
}

fn parse_service(name: &str, v: &Value) -> Result<ServiceConfig> {
    let map = v
        .as_mapping()
        .ok_or_else(|| StackSpecError::invalid_named("service", "shape", name))?;

    const KNOWN: &[&str] = &[
        "enabled",
        "exposure",
        "image",
        "containerPort",
        "hostPort",
        "healthcheckPath",
        "volumes",
        "config",
    ];
    for (k, _) in map {
        let key = k
            .as_str()
            .ok_or_else(|| StackSpecError::invalid_named("service", "field", name))?;
        if !KNOWN.contains(&key) {
            return Err(StackSpecError::invalid_named_detail("service", "field", name, key));
        }
    }

    let enabled = get_bool(map, "enabled")?.unwrap_or(true);
    let exposure = match get_str(map, "exposure")? {
        Some(s) => AccessScope::from_str_strict(&s)
            .ok_or_else(|| StackSpecError::invalid_named("service", "exposure", name))?,
        None => AccessScope::Lan,
    };
    let image = get_str(map, "image")?.ok_or_else(|| StackSpecError::invalid_named("service", "image", name))?;
    if !patterns::IMAGE_NAME.is_match(&image) {
        return Err(StackSpecError::invalid_named("service", "image", name));
    }
    let container_port = match get_u32(map, "containerPort")? {
        Some(p) if (1..=65535).contains(&p) => p as u16,
        _ => return Err(StackSpecError::invalid_named("service", "containerPort", name)),
    };
    let host_port = match get_u32(map, "hostPort")? {
        Some(p) if (1..=65535).contains(&p) => Some(p as u16),
        Some(_) => return Err(StackSpecError::invalid_named("service", "hostPort", name)),
        None => None,
    };
    let healthcheck_path = get_str(map, "healthcheckPath")?;
    let volumes = get_str_list(map, "volumes")?;

    let mut config = BTreeMap::new();
    if let Some(v) = map.get(Value::String("config".into())) {
        let cmap = v
            .as_mapping()
            .ok_or_else(|| StackSpecError::invalid_named("service", "config", name))?;
        for (k, v) in cmap {
            let key = k
                .as_str()
                .ok_or_else(|| StackSpecError::invalid_named("service", "config", name))?
                .to_string();
            if key.is_empty() {
                return Err(StackSpecError::invalid_named("service", "config", name));
            }
            let raw = v
                .as_str()
                .ok_or_else(|| StackSpecError::invalid_named_detail("service", "config", name, &key))?;
            config.insert(key, patterns::sanitize_scalar(raw));
        }
    }

    Ok(ServiceConfig {
        enabled,
        exposure,
        image,
        container_port,
        host_port,
        healthcheck_path,
        volumes,
        config,
    })
}

fn parse_automation(index: usize, v: &Value) -> Result<Automation> {
    let map = v
        .as_mapping()
        .ok_or_else(|| StackSpecError::invalid(format!("invalid_automation_shape_{index}")))?;

    let id = get_str(map, "id")?
        .filter(|s| patterns::AUTOMATION_ID.is_match(s))
        .ok_or_else(|| StackSpecError::invalid(format!("invalid_automation_id_{index}")))?;
    let name = get_str(map, "name")?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StackSpecError::invalid(format!("invalid_automation_name_{index}")))?;
    let schedule = get_str(map, "schedule")?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StackSpecError::invalid(format!("invalid_automation_schedule_{index}")))?;
    let script = get_str(map, "script")?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| StackSpecError::invalid(format!("invalid_automation_script_{index}")))?;
    let enabled = get_bool(map, "enabled")?.unwrap_or(true);
    let description = get_str(map, "description")?;
    let core = get_bool(map, "core")?;

    Ok(Automation { id, name, schedule, script, enabled, description, core })
}

fn get_str(map: &serde_yaml_ng::Mapping, key: &str) -> Result<Option<String>> {
    match map.get(Value::String(key.into())) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
    }
}

fn get_bool(map: &serde_yaml_ng::Mapping, key: &str) -> Result<Option<bool>> {
    match map.get(Value::String(key.into())) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
    }
}

fn get_u32(map: &serde_yaml_ng::Mapping, key: &str) -> Result<Option<u32>> {
    match map.get(Value::String(key.into())) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| v as u32)
            .map(Some)
            .ok_or_else(|| StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
        Some(_) => Err(StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
    }
}

fn get_str_list(map: &serde_yaml_ng::Mapping, key: &str) -> Result<Vec<String>> {
    match map.get(Value::String(key.into())) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Sequence(seq)) => seq
            .iter()
            .map(|v| v.as_str().map(|s| s.to_string()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
        Some(_) => Err(StackSpecError::invalid(format!("invalid_stack_spec_{key}"))),
    }
}

pub fn ensure_spec(path: &Path) -> Result<StackSpec> {
    if !path.exists() {
        let spec = create_default();
        let bytes = stringify(&spec)?;
        openpalm_common::atomic_write(path, &bytes, "ensure")?;
        return Ok(spec);
    }
    let raw = std::fs::read(path)?;
    parse(&raw)
}
