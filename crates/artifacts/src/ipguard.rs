//! IP-range guards used to gate routes by access scope.

use ipnetwork::IpNetwork;
use openpalm_spec::AccessScope;
use std::str::FromStr;

const LOOPBACK: &[&str] = &["127.0.0.0/8", "::1/128"];
const RFC1918_AND_ULA: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fc00::/7"];

/// Canonicalized CIDR ranges allowed through a guard for the given access
/// scope. `None` means "no guard": every remote IP is allowed.
pub fn ranges_for_scope(scope: AccessScope) -> Vec<String> {
    let raw: Vec<&str> = match scope {
        AccessScope::Host => LOOPBACK.to_vec(),
        AccessScope::Lan | AccessScope::Public => {
            LOOPBACK.iter().chain(RFC1918_AND_ULA.iter()).copied().collect()
        }
    };
    raw.into_iter()
        .map(|cidr| IpNetwork::from_str(cidr).expect("constant CIDR is valid").to_string())
        .collect()
}

/// Loopback-only guard, used for `host`-exposed channels regardless of the
/// stack's overall access scope.
pub fn loopback_only() -> Vec<String> {
    ranges_for_scope(AccessScope::Host)
}

/// Guard ranges a route with the given exposure needs, or `None` if the
/// route should be reachable from anywhere.
pub fn guard_for_exposure(stack_scope: AccessScope, exposure: AccessScope) -> Option<Vec<String>> {
    match exposure {
        AccessScope::Public => None,
        AccessScope::Host => Some(loopback_only()),
        AccessScope::Lan => Some(ranges_for_scope(stack_scope)),
    }
}
