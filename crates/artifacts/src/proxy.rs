//! Reverse-proxy config synthesis (a Caddy-shaped JSON document).

use crate::ipguard;
use openpalm_spec::{sanitize_name, AccessScope, ChannelConfig, StackSpec};
use serde_json::{json, Value};

fn guarded(route: Value, ranges: Option<Vec<String>>) -> Value {
    match ranges {
        None => route,
        Some(ranges) => {
            let guard = json!({
                "match": [{"not": [{"remote_ip": {"ranges": ranges}}]}],
                "handle": [{"handler": "static_response", "status_code": 403}],
                "terminal": true,
            });
            // The guard is a terminal short-circuit that must be evaluated
            // before the real route; wrap both in a subroute so ordering is
            // preserved regardless of where this route later lands in the
            // server's route list.
            json!({
                "handle": [{
                    "handler": "subroute",
                    "routes": [guard, route],
                }]
            })
        }
    }
}

fn admin_routes() -> Vec<Value> {
    vec![
        json!({
            "match": [{"path": ["/api/*"]}],
            "handle": [{
                "handler": "subroute",
                "routes": [{
                    "handle": [
                        {"handler": "rewrite", "strip_path_prefix": "/api"},
                        {"handler": "reverse_proxy", "upstreams": [{"dial": "admin:8100"}]},
                    ]
                }]
            }],
        }),
        json!({
            "match": [{"path": ["/services/opencode*"]}],
            "handle": [{
                "handler": "subroute",
                "routes": [{
                    "handle": [
                        {"handler": "rewrite", "strip_path_prefix": "/services/opencode"},
                        {"handler": "reverse_proxy", "upstreams": [{"dial": "assistant:4096"}]},
                    ]
                }]
            }],
        }),
        json!({
            "match": [{"path": ["/services/openmemory*"]}],
            "handle": [{
                "handler": "subroute",
                "routes": [{
                    "handle": [
                        {"handler": "rewrite", "strip_path_prefix": "/services/openmemory"},
                        {"handler": "reverse_proxy", "upstreams": [{"dial": "openmemory-ui:3000"}]},
                    ]
                }]
            }],
        }),
        json!({
            "match": [{"host": ["localhost"]}],
            "handle": [{"handler": "reverse_proxy", "upstreams": [{"dial": "assistant:4096"}]}],
        }),
    ]
}

fn catch_all_route() -> Value {
    json!({
        "handle": [{"handler": "reverse_proxy", "upstreams": [{"dial": "assistant:4096"}]}],
        "terminal": true,
    })
}

fn channel_path_route(name: &str, channel: &ChannelConfig, stack_scope: AccessScope) -> Value {
    let sanitized = sanitize_name(name);
    let upstream = format!("channel-{sanitized}:{}", channel_port(name, channel));
    let rewrite = match channel.kind {
        openpalm_spec::ChannelKind::Builtin => {
            let builtin = openpalm_spec::find_builtin_channel(name);
            let path = channel
                .rewrite_path
                .clone()
                .or_else(|| builtin.map(|b| b.rewrite_path.to_string()))
                .unwrap_or_else(|| format!("/{sanitized}"));
            json!({"handler": "rewrite", "uri": path})
        }
        openpalm_spec::ChannelKind::Custom => {
            json!({"handler": "rewrite", "strip_path_prefix": format!("/channels/{sanitized}")})
        }
    };
    let route = json!({
        "match": [{"path": [format!("/channels/{sanitized}*")]}],
        "handle": [{
            "handler": "subroute",
            "routes": [{
                "handle": [rewrite, {"handler": "reverse_proxy", "upstreams": [{"dial": upstream}]}],
            }]
        }],
    });
    guarded(route, ipguard::guard_for_exposure(stack_scope, channel.exposure))
}

fn channel_domain_route(name: &str, channel: &ChannelConfig, stack_scope: AccessScope) -> Value {
    let sanitized = sanitize_name(name);
    let prefixes = if channel.path_prefixes.is_empty() {
        vec!["/".to_string()]
    } else {
        channel.path_prefixes.clone()
    };
    let upstream = format!("channel-{sanitized}:{}", channel_port(name, channel));
    let routes: Vec<Value> = prefixes
        .into_iter()
        .map(|prefix| {
            json!({
                "match": [{"path": [format!("{prefix}*")]}],
                "handle": [{
                    "handler": "subroute",
                    "routes": [{
                        "handle": [
                            {"handler": "rewrite", "strip_path_prefix": prefix},
                            {"handler": "reverse_proxy", "upstreams": [{"dial": upstream.clone()}]},
                        ]
                    }]
                }],
            })
        })
        .collect();
    let route = json!({"match": [{"host": channel.domains}], "handle": routes});
    guarded(route, ipguard::guard_for_exposure(stack_scope, channel.exposure))
}

fn channel_port(name: &str, channel: &ChannelConfig) -> u16 {
    channel
        .container_port
        .or_else(|| openpalm_spec::find_builtin_channel(name).map(|b| b.container_port))
        .unwrap_or(0)
}

/// Generates the full proxy config plus, for every enabled channel, the
/// exact route fragment emitted for it (keyed by sanitized channel name).
/// The per-channel fragments are written to disk as standalone snippet
/// files by the Stack Manager so stale ones can be garbage-collected when
/// a channel is removed or disabled, independent of the monolithic
/// `caddy.json` document they're also embedded in.
pub fn generate(spec: &StackSpec) -> (Value, std::collections::BTreeMap<String, Value>) {
    let mut main_routes = admin_routes();
    let has_tls = spec.channels.values().any(|c| c.enabled && !c.domains.is_empty());
    let mut tls_routes = Vec::new();
    let mut channel_routes = std::collections::BTreeMap::new();

    for (name, channel) in &spec.channels {
        if !channel.enabled {
            continue;
        }
        let sanitized = sanitize_name(name);
        let route = if !channel.domains.is_empty() {
            let route = channel_domain_route(name, channel, spec.access_scope);
            tls_routes.push(route.clone());
            route
        } else {
            let route = channel_path_route(name, channel, spec.access_scope);
            main_routes.push(route.clone());
            route
        };
        channel_routes.insert(sanitized, route);
    }
    main_routes.push(catch_all_route());

    let mut servers = serde_json::Map::new();
    servers.insert(
        "main".to_string(),
        json!({"listen": [format!(":{}", spec.ingress_port)], "routes": main_routes}),
    );
    if has_tls {
        servers.insert("tls_domains".to_string(), json!({"listen": [":443"], "routes": tls_routes}));
    }

    let mut root = json!({
        "admin": {"disabled": true},
        "apps": {"http": {"servers": servers}},
    });

    if let Some(caddy) = &spec.caddy {
        root["tls"] = json!({
            "automation": {
                "policies": [{"issuers": [{"module": "acme", "email": caddy.email}]}]
            }
        });
    }

    (root, channel_routes)
}
