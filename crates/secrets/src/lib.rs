//! openpalm_secrets
//!
//! A flat `KEY=VALUE` secret file, parsed and rewritten atomically. Lines
//! outside the `KEY=VALUE` shape (comments, blanks, anything malformed) are
//! preserved verbatim on update so operator annotations survive rewrites.

use once_cell::sync::Lazy;
use openpalm_spec::StackSpec;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Secrets every deployment needs regardless of which channels/services are
/// enabled; these can never be deleted even when unreferenced.
pub const CORE_SECRET_REQUIREMENTS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENPALM_SMALL_MODEL_API_KEY",
    "GATEWAY_SHARED_SECRET",
    "POSTGRES_PASSWORD",
    "OPENMEMORY_API_KEY",
];

static SECRET_NAME: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("invalid_secret_name")]
    InvalidSecretName,
    #[error("secret_in_use")]
    SecretInUse,
    #[error("unknown_secret_name")]
    UnknownSecretName,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, SecretStoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry(String, String),
    Verbatim(String),
}

fn split_lines(contents: &str) -> Vec<Line> {
    contents
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return Line::Verbatim(line.to_string());
            }
            match line.split_once('=') {
                Some((k, v)) if !k.trim().is_empty() && SECRET_NAME.is_match(k.trim()) => {
                    Line::Entry(k.trim().to_string(), v.to_string())
                }
                _ => Line::Verbatim(line.to_string()),
            }
        })
        .collect()
}

/// Parses `KEY=VALUE` lines, skipping blanks and `#`-comments.
pub fn read(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = std::fs::read_to_string(path)?;
    let mut out = BTreeMap::new();
    for line in split_lines(&contents) {
        if let Line::Entry(k, v) = line {
            out.insert(k, v);
        }
    }
    Ok(out)
}

/// For each key in `entries`: `Some(value)` replaces the in-place line if
/// present, else appends; `None` removes. Lines not matching `KEY=VALUE`
/// are preserved. Output always ends in a single newline.
pub fn update(path: &Path, entries: &BTreeMap<String, Option<String>>) -> Result<()> {
    let existing = if path.exists() { std::fs::read_to_string(path)? } else { String::new() };
    let mut lines = split_lines(&existing);
    let mut seen: BTreeMap<&str, ()> = BTreeMap::new();

    for line in lines.iter_mut() {
        if let Line::Entry(k, v) = line {
            if let Some(replacement) = entries.get(k.as_str()) {
                seen.insert(k.as_str(), ());
                if let Some(new_value) = replacement {
                    *v = new_value.clone();
                }
            }
        }
    }
    lines.retain(|line| match line {
        Line::Entry(k, _) => match entries.get(k.as_str()) {
            Some(None) => false,
            _ => true,
        },
        Line::Verbatim(_) => true,
    });

    for (key, value) in entries {
        if seen.contains_key(key.as_str()) {
            continue;
        }
        if let Some(v) = value {
            lines.push(Line::Entry(key.clone(), v.clone()));
        }
    }

    let mut out = String::new();
    for line in &lines {
        match line {
            Line::Entry(k, v) => {
                out.push_str(k);
                out.push('=');
                out.push_str(v);
            }
            Line::Verbatim(s) => out.push_str(s),
        }
        out.push('\n');
    }
    openpalm_common::atomic_write(path, out.as_bytes(), "secrets")?;
    Ok(())
}

pub fn upsert_secret(path: &Path, name: &str, value: &str) -> Result<()> {
    if !SECRET_NAME.is_match(name) {
        return Err(SecretStoreError::InvalidSecretName);
    }
    let sanitized = value.replace(['\r', '\n'], "").trim().to_string();
    let mut entries = BTreeMap::new();
    entries.insert(name.to_string(), Some(sanitized));
    update(path, &entries)
}

/// Every config value across every channel/service that is a literal
/// `${NAME}` secret reference, regardless of whether the channel/service is
/// enabled (used for the `secret_in_use` deletion guard, which must be
/// conservative).
fn referenced_secret_names(spec: &StackSpec) -> std::collections::BTreeSet<String> {
    let mut names = std::collections::BTreeSet::new();
    for channel in spec.channels.values() {
        for value in channel.config.values() {
            if let Some(name) = openpalm_spec::parse_secret_reference(value) {
                names.insert(name);
            }
        }
    }
    for service in spec.services.values() {
        for value in service.config.values() {
            if let Some(name) = openpalm_spec::parse_secret_reference(value) {
                names.insert(name);
            }
        }
    }
    names
}

pub fn delete_secret(path: &Path, name: &str, spec: &StackSpec) -> Result<()> {
    if CORE_SECRET_REQUIREMENTS.contains(&name) {
        return Err(SecretStoreError::SecretInUse);
    }
    if referenced_secret_names(spec).contains(name) {
        return Err(SecretStoreError::SecretInUse);
    }
    let existing = read(path)?;
    if !existing.contains_key(name) {
        return Err(SecretStoreError::UnknownSecretName);
    }
    let mut entries = BTreeMap::new();
    entries.insert(name.to_string(), None);
    update(path, &entries)
}

/// One entry per known secret name: union of file contents, spec
/// references, and `CORE_SECRET_REQUIREMENTS`.
#[derive(Debug, Clone)]
pub struct SecretUsage {
    pub name: String,
    pub configured: bool,
    pub used_by: Vec<String>,
}

pub fn list_secret_manager_state(path: &Path, spec: &StackSpec) -> Result<Vec<SecretUsage>> {
    let file_secrets = read(path)?;
    let mut names: std::collections::BTreeSet<String> = file_secrets.keys().cloned().collect();
    names.extend(CORE_SECRET_REQUIREMENTS.iter().map(|s| s.to_string()));

    let mut used_by: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (channel_name, channel) in &spec.channels {
        for value in channel.config.values() {
            if let Some(name) = openpalm_spec::parse_secret_reference(value) {
                names.insert(name.clone());
                used_by.entry(name).or_default().push(format!("channel:{channel_name}"));
            }
        }
    }
    for (service_name, service) in &spec.services {
        for value in service.config.values() {
            if let Some(name) = openpalm_spec::parse_secret_reference(value) {
                names.insert(name.clone());
                used_by.entry(name).or_default().push(format!("service:{service_name}"));
            }
        }
    }

    Ok(names
        .into_iter()
        .map(|name| SecretUsage {
            configured: file_secrets.contains_key(&name),
            used_by: used_by.remove(&name).unwrap_or_default(),
            name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        std::fs::write(&path, "# comment\n\nFOO=bar\nBAZ=qux\n").unwrap();
        let map = read(&path).unwrap();
        assert_eq!(map.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(map.get("BAZ").map(String::as_str), Some("qux"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn update_replaces_in_place_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        std::fs::write(&path, "# header\nFOO=old\n").unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("FOO".to_string(), Some("new".to_string()));
        entries.insert("NEWKEY".to_string(), Some("value".to_string()));
        update(&path, &entries).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# header\nFOO=new\n"));
        assert!(contents.contains("NEWKEY=value\n"));
        assert!(contents.ends_with('\n') && !contents.ends_with("\n\n"));
    }

    #[test]
    fn update_with_none_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        std::fs::write(&path, "FOO=bar\nBAZ=qux\n").unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("FOO".to_string(), None);
        update(&path, &entries).unwrap();
        let map = read(&path).unwrap();
        assert!(!map.contains_key("FOO"));
        assert!(map.contains_key("BAZ"));
    }

    #[test]
    fn upsert_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        let err = upsert_secret(&path, "lowercase", "v").unwrap_err();
        assert!(matches!(err, SecretStoreError::InvalidSecretName));
    }

    #[test]
    fn upsert_strips_newlines_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        upsert_secret(&path, "FOO", "  val\r\nue  ").unwrap();
        let map = read(&path).unwrap();
        assert_eq!(map.get("FOO").map(String::as_str), Some("value"));
    }

    #[test]
    fn delete_fails_for_core_requirement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        upsert_secret(&path, "ANTHROPIC_API_KEY", "x").unwrap();
        let spec = openpalm_spec::create_default();
        let err = delete_secret(&path, "ANTHROPIC_API_KEY", &spec).unwrap_err();
        assert!(matches!(err, SecretStoreError::SecretInUse));
    }

    #[test]
    fn delete_fails_when_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        upsert_secret(&path, "CHAT_TOKEN_SECRET", "tok").unwrap();
        let raw = b"version: 1\naccessScope: lan\nchannels:\n  chat:\n    enabled: true\n    config:\n      CHAT_INBOUND_TOKEN: \"${CHAT_TOKEN_SECRET}\"\n";
        let spec = openpalm_spec::parse(raw).unwrap();
        let err = delete_secret(&path, "CHAT_TOKEN_SECRET", &spec).unwrap_err();
        assert!(matches!(err, SecretStoreError::SecretInUse));
    }

    #[test]
    fn delete_then_upsert_same_value_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        upsert_secret(&path, "OPENPALM_SOME_OTHER", "value").unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        let spec = openpalm_spec::create_default();
        delete_secret(&path, "OPENPALM_SOME_OTHER", &spec).unwrap();
        upsert_secret(&path, "OPENPALM_SOME_OTHER", "value").unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(before, after);
    }
}
