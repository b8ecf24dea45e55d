//! Container-orchestrator compose document synthesis.
//!
//! Built as a `serde_json::Value` (its `Map` is key-sorted by default) and
//! handed to the YAML serializer, so determinism falls out of the
//! representation rather than needing a bespoke sorted emitter.

use openpalm_spec::{sanitize_name, AccessScope, StackSpec};
use serde_json::{json, Value};

const ASSISTANT_NET: &str = "assistant_net";
const CHANNEL_NET: &str = "channel_net";

fn published_port(host_port: Option<u16>, container_port: u16, exposure: AccessScope) -> String {
    let host = host_port.unwrap_or(container_port);
    match exposure {
        AccessScope::Host => format!("127.0.0.1:{host}:{container_port}"),
        AccessScope::Lan | AccessScope::Public => format!("{host}:{container_port}"),
    }
}

fn healthcheck(test: Vec<String>) -> Value {
    json!({
        "test": test,
        "interval": "10s",
        "timeout": "5s",
        "retries": 5,
        "start_period": "10s",
    })
}

fn shell_healthcheck(command: String) -> Value {
    healthcheck(vec!["CMD-SHELL".to_string(), command])
}

fn argv_healthcheck(argv: &[&str]) -> Value {
    healthcheck(argv.iter().map(|s| s.to_string()).collect())
}

fn core_services(spec: &StackSpec) -> serde_json::Map<String, Value> {
    let mut services = serde_json::Map::new();

    services.insert(
        "caddy".to_string(),
        json!({
            "image": "caddy:2",
            "ports": [format!("{}:{}", spec.ingress_port, spec.ingress_port)],
            "volumes": ["${STATE}/caddy.json:/etc/caddy/caddy.json:ro"],
            "networks": [ASSISTANT_NET, CHANNEL_NET],
            "healthcheck": argv_healthcheck(&["CMD", "caddy", "version"]),
        }),
    );

    services.insert(
        "postgres".to_string(),
        json!({
            "image": "postgres:16",
            "env_file": "${STATE}/postgres/.env",
            "volumes": ["openpalm_postgres_data:/var/lib/postgresql/data"],
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("pg_isready -U openpalm".to_string()),
        }),
    );

    services.insert(
        "qdrant".to_string(),
        json!({
            "image": "qdrant/qdrant:latest",
            "env_file": "${STATE}/qdrant/.env",
            "volumes": ["openpalm_qdrant_data:/qdrant/storage"],
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:6333/healthz".to_string()),
        }),
    );

    services.insert(
        "openmemory".to_string(),
        json!({
            "image": "openmemory/openmemory-mcp:latest",
            "env_file": "${STATE}/openmemory/.env",
            "depends_on": {"postgres": {"condition": "service_healthy"}, "qdrant": {"condition": "service_healthy"}},
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:8765/health".to_string()),
        }),
    );

    services.insert(
        "openmemory-ui".to_string(),
        json!({
            "image": "openmemory/openmemory-ui:latest",
            "depends_on": {"openmemory": {"condition": "service_healthy"}},
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:3000".to_string()),
        }),
    );

    services.insert(
        "assistant".to_string(),
        json!({
            "image": "openpalm/assistant:latest",
            "env_file": "${STATE}/assistant/.env",
            "depends_on": {"openmemory": {"condition": "service_healthy"}},
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:4096/health".to_string()),
        }),
    );

    services.insert(
        "gateway".to_string(),
        json!({
            "image": "openpalm/gateway:latest",
            "env_file": "${STATE}/gateway/.env",
            "depends_on": {"assistant": {"condition": "service_healthy"}},
            "networks": [ASSISTANT_NET, CHANNEL_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:9000/health".to_string()),
        }),
    );

    services.insert(
        "admin".to_string(),
        json!({
            "image": "openpalm/admin:latest",
            "depends_on": {"gateway": {"condition": "service_healthy"}},
            "networks": [ASSISTANT_NET],
            "healthcheck": shell_healthcheck("curl -f http://localhost:8100/health".to_string()),
        }),
    );

    services
}

pub fn generate(spec: &StackSpec) -> Value {
    let mut services = core_services(spec);

    for (name, channel) in &spec.channels {
        if !channel.enabled {
            continue;
        }
        let sanitized = sanitize_name(name);
        let service_name = format!("channel-{sanitized}");
        let container_port = channel.container_port.unwrap_or_else(|| {
            openpalm_spec::find_builtin_channel(name).map(|b| b.container_port).unwrap_or(0)
        });
        let image = channel.image.clone().unwrap_or_else(|| {
            format!("openpalm/channel-{sanitized}:latest")
        });
        let healthcheck_path = channel.healthcheck_path.clone().unwrap_or_else(|| "/health".to_string());

        services.insert(
            service_name,
            json!({
                "image": image,
                "environment": {
                    "PORT": container_port,
                    "GATEWAY_URL": "http://gateway:9000",
                },
                "env_file": format!("${{STATE}}/channel-{sanitized}/.env"),
                "ports": [published_port(channel.host_port, container_port, channel.exposure)],
                "networks": [CHANNEL_NET],
                "healthcheck": shell_healthcheck(format!("curl -f http://localhost:{container_port}{healthcheck_path}")),
                "depends_on": {"gateway": {"condition": "service_healthy"}},
            }),
        );
    }

    for (name, service) in &spec.services {
        if !service.enabled {
            continue;
        }
        let sanitized = sanitize_name(name);
        let healthcheck_path = service.healthcheck_path.clone().unwrap_or_else(|| "/health".to_string());
        services.insert(
            sanitized.clone(),
            json!({
                "image": service.image,
                "env_file": format!("${{STATE}}/{sanitized}/.env"),
                "ports": [published_port(service.host_port, service.container_port, service.exposure)],
                "networks": [CHANNEL_NET],
                "healthcheck": shell_healthcheck(format!("curl -f http://localhost:{}{healthcheck_path}", service.container_port)),
                "depends_on": {"gateway": {"condition": "service_healthy"}},
            }),
        );
    }

    json!({
        "services": services,
        "networks": {ASSISTANT_NET: {}, CHANNEL_NET: {}},
    })
}

/// The set of top-level `services:` keys in a rendered compose document,
/// used by the apply engine's diff step.
pub fn service_names(doc: &Value) -> std::collections::BTreeSet<String> {
    doc.get("services")
        .and_then(|v| v.as_object())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}
