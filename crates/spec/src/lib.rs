//! openpalm_spec
//!
//! Stack-spec data model, built-in channel registry, and strict parser.
//! The on-disk spec file is the single source of truth; this crate never
//! caches a parsed spec across calls.

mod model;
mod parse;
mod patterns;
mod registry;
mod ser;

pub use model::{
    AccessScope, Automation, CaddyConfig, ChannelConfig, ChannelKind, ServiceConfig, StackSpec,
    StackSpecError, DEFAULT_INGRESS_PORT, SUPPORTED_VERSION,
};
pub use parse::{create_default, ensure_spec, parse, parse_secret_reference, stringify};
pub use registry::{find as find_builtin_channel, is_builtin, BuiltinChannel, BUILTIN_CHANNELS};
pub use patterns::{automation_id_is_valid, domain_is_valid, sanitize_name, sanitize_scalar};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips() {
        let spec = create_default();
        let bytes = stringify(&spec).unwrap();
        let parsed = parse(&bytes).unwrap();
        let reserialized = stringify(&parsed).unwrap();
        assert_eq!(bytes, reserialized);
        assert_eq!(parsed.channels.len(), BUILTIN_CHANNELS.len());
        assert_eq!(parsed.access_scope.as_str(), "lan");
        assert_eq!(parsed.ingress_port, 80);
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let raw = b"version: 1\naccessScope: lan\nbogusField: true\n";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.to_string(), "unknown_stack_spec_field_bogusField");
    }

    #[test]
    fn missing_builtin_channel_filled_in_not_rejected() {
        let raw = b"version: 1\naccessScope: lan\n";
        let spec = parse(raw).unwrap();
        assert!(spec.channels.contains_key("chat"));
        assert!(spec.channels.contains_key("discord"));
    }

    #[test]
    fn custom_channel_without_image_fails() {
        let raw = b"version: 1\naccessScope: lan\nchannels:\n  slack:\n    enabled: true\n    containerPort: 8500\n";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.to_string(), "custom_channel_requires_image_slack");
    }

    #[test]
    fn custom_channel_without_port_fails() {
        let raw = b"version: 1\naccessScope: lan\nchannels:\n  slack:\n    enabled: true\n    image: slack:latest\n";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.to_string(), "custom_channel_requires_container_port_slack");
    }

    #[test]
    fn custom_channel_with_image_and_port_accepted() {
        let raw = b"version: 1\naccessScope: lan\nchannels:\n  slack:\n    enabled: true\n    image: slack:latest\n    containerPort: 8500\n";
        let spec = parse(raw).unwrap();
        let slack = &spec.channels["slack"];
        assert_eq!(slack.image.as_deref(), Some("slack:latest"));
        assert_eq!(slack.container_port, Some(8500));
    }

    #[test]
    fn builtin_config_key_unrecognized_is_dropped() {
        let raw = b"version: 1\naccessScope: lan\nchannels:\n  chat:\n    enabled: true\n    config:\n      CHAT_INBOUND_TOKEN: abc\n      NOT_A_REAL_KEY: xyz\n";
        let spec = parse(raw).unwrap();
        let chat = &spec.channels["chat"];
        assert_eq!(chat.config.get("CHAT_INBOUND_TOKEN").map(String::as_str), Some("abc"));
        assert!(!chat.config.contains_key("NOT_A_REAL_KEY"));
    }

    #[test]
    fn domain_with_embedded_newline_rejected() {
        let raw = "version: 1\naccessScope: lan\nchannels:\n  chat:\n    domains: [\"example.com }\\n:80 {\"]\n";
        let err = parse(raw.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "invalid_channel_domain_chat");
    }

    #[test]
    fn image_with_embedded_newline_rejected() {
        let raw = "version: 1\naccessScope: lan\nchannels:\n  slack:\n    enabled: true\n    image: \"evil:latest\\n    privileged: true\"\n    containerPort: 8500\n";
        let err = parse(raw.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "invalid_channel_image_slack");
    }

    #[test]
    fn parse_secret_reference_matches_whole_string_only() {
        assert_eq!(parse_secret_reference("${X}").as_deref(), Some("X"));
        assert_eq!(parse_secret_reference("X"), None);
        assert_eq!(parse_secret_reference("prefix${X}"), None);
    }

    #[test]
    fn sanitize_name_replaces_invalid_characters() {
        assert_eq!(sanitize_name("My Channel!"), "my-channel-");
    }

    #[test]
    fn ensure_spec_writes_default_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("openpalm.yaml");
        let spec = ensure_spec(&path).unwrap();
        assert_eq!(spec.version, SUPPORTED_VERSION);
        assert!(path.exists());
        let reread = ensure_spec(&path).unwrap();
        assert_eq!(reread.channels.len(), spec.channels.len());
    }
}
