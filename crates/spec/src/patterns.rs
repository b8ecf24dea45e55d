//! Injection-safe validation patterns for every user-supplied string that
//! ends up in a generated artifact. Every pattern is anchored with
//! `^...$` against a non-multiline `Regex`, so embedded newlines can never
//! smuggle a second logical line past validation.

use once_cell::sync::Lazy;
use regex::Regex;

pub static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$").unwrap()
});

pub static PATH_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[A-Za-z0-9/_-]*$").unwrap());

pub static IMAGE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[A-Za-z0-9_.-]+)?$").unwrap()
});

pub static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

pub static AUTOMATION_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

pub static SECRET_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").unwrap());

pub static SECRET_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([A-Z][A-Z0-9_]*)\}$").unwrap());

pub fn domain_is_valid(s: &str) -> bool {
    s.len() <= 253 && DOMAIN.is_match(s)
}

pub fn automation_id_is_valid(s: &str) -> bool {
    AUTOMATION_ID.is_match(s)
}

/// `[^a-z0-9_-]` -> `-`, after lowercasing. Used for compose-service names
/// derived from channel/service names.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

/// Strip CR/LF from a scalar env value and trim surrounding whitespace.
pub fn sanitize_scalar(value: &str) -> String {
    value.replace(['\r', '\n'], "").trim().to_string()
}

pub fn parse_secret_reference(s: &str) -> Option<String> {
    SECRET_REFERENCE.captures(s).map(|c| c[1].to_string())
}
