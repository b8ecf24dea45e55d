//! Fixed registry of built-in channels.
//!
//! Order here is significant: it is the order builtin channels are
//! inserted into a freshly created default spec, and the order
//! `OPENPALM_ENABLED_CHANNELS` lists them in generated env files.

pub struct BuiltinChannel {
    pub name: &'static str,
    pub container_port: u16,
    pub rewrite_path: &'static str,
    pub shared_secret_env: &'static str,
    pub config_keys: &'static [&'static str],
}

pub const BUILTIN_CHANNELS: &[BuiltinChannel] = &[
    BuiltinChannel {
        name: "chat",
        container_port: 8181,
        rewrite_path: "/chat",
        shared_secret_env: "CHAT_SHARED_SECRET",
        config_keys: &["CHAT_INBOUND_TOKEN"],
    },
    BuiltinChannel {
        name: "discord",
        container_port: 8182,
        rewrite_path: "/discord",
        shared_secret_env: "DISCORD_SHARED_SECRET",
        config_keys: &["DISCORD_BOT_TOKEN"],
    },
    BuiltinChannel {
        name: "voice",
        container_port: 8183,
        rewrite_path: "/voice",
        shared_secret_env: "VOICE_SHARED_SECRET",
        config_keys: &["VOICE_API_KEY"],
    },
    BuiltinChannel {
        name: "telegram",
        container_port: 8184,
        rewrite_path: "/telegram",
        shared_secret_env: "TELEGRAM_SHARED_SECRET",
        config_keys: &["TELEGRAM_BOT_TOKEN"],
    },
];

pub fn find(name: &str) -> Option<&'static BuiltinChannel> {
    BUILTIN_CHANNELS.iter().find(|c| c.name == name)
}

pub fn is_builtin(name: &str) -> bool {
    find(name).is_some()
}
