//! Health-gate poll loop: waits for a service to report `running` (and
//! `healthy`, if it declared a healthcheck) or a per-service deadline
//! derived from that healthcheck's `(start_period + interval * retries)`.

use crate::ComposeRunner;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Healthcheck declared and reporting healthy.
    Healthy,
    /// No healthcheck declared (or none observed) but the container is running.
    Running,
    /// Deadline elapsed before a terminal state was reached.
    TimedOut,
    /// The service never appeared in `compose ps` output.
    NotFound,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(alias = "Service", alias = "service")]
    service: Option<String>,
    #[serde(alias = "State", alias = "state")]
    state: Option<String>,
    #[serde(alias = "Health", alias = "health")]
    health: Option<String>,
}

/// `docker compose ps --format json` emits either a JSON array or
/// newline-delimited JSON objects depending on version; accept both.
fn parse_entries(stdout: &str) -> Vec<PsEntry> {
    if let Ok(entries) = serde_json::from_str::<Vec<PsEntry>>(stdout) {
        return entries;
    }
    stdout.lines().filter(|l| !l.trim().is_empty()).filter_map(|l| serde_json::from_str(l).ok()).collect()
}

fn find_entry<'a>(entries: &'a [PsEntry], service: &str) -> Option<&'a PsEntry> {
    entries.iter().find(|e| e.service.as_deref() == Some(service))
}

/// Polls `compose ps` at 1s intervals until `service` is terminal or
/// `deadline` elapses.
pub async fn wait_until_healthy(runner: &ComposeRunner, service: &str, deadline: Duration) -> HealthOutcome {
    let start = Instant::now();
    let mut seen = false;
    loop {
        let output = runner.ps().await;
        let entries = parse_entries(&output.stdout);
        if let Some(entry) = find_entry(&entries, service) {
            seen = true;
            match entry.health.as_deref() {
                Some(h) if h.eq_ignore_ascii_case("healthy") => return HealthOutcome::Healthy,
                Some(h) if !h.is_empty() => {}
                _ => {
                    if entry.state.as_deref().map(|s| s.eq_ignore_ascii_case("running")).unwrap_or(false) {
                        return HealthOutcome::Running;
                    }
                }
            }
        }
        if start.elapsed() >= deadline {
            return if seen { HealthOutcome::TimedOut } else { HealthOutcome::NotFound };
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_form() {
        let stdout = r#"[{"Service":"gateway","State":"running","Health":"healthy"}]"#;
        let entries = parse_entries(stdout);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service.as_deref(), Some("gateway"));
        assert_eq!(entries[0].health.as_deref(), Some("healthy"));
    }

    #[test]
    fn parses_ndjson_form() {
        let stdout = "{\"Service\":\"gateway\",\"State\":\"running\",\"Health\":\"\"}\n{\"Service\":\"admin\",\"State\":\"running\"}\n";
        let entries = parse_entries(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(find_entry(&entries, "admin").unwrap().state.as_deref(), Some("running"));
    }

    #[test]
    fn find_entry_misses_unknown_service() {
        let entries = parse_entries(r#"[{"Service":"gateway","State":"running"}]"#);
        assert!(find_entry(&entries, "no-such-service").is_none());
    }
}
