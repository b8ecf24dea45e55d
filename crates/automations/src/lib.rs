//! openpalm_automations
//!
//! Writes per-automation shell scripts and schedule entries, reloads the
//! system scheduler, and triggers ad-hoc runs. The cron directory root is
//! the one piece of process-wide configuration that isn't re-derived per
//! call — it's fixed once at startup, per the spec's stated exception to
//! "no module-level mutable state".

mod cron;

use openpalm_spec::Automation;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum AutomationsError {
    #[error("invalid_cron_schedule: {0}")]
    Cron(String),
    #[error("invalid_automation_id")]
    InvalidAutomationId,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, AutomationsError>;

#[derive(Debug, Clone)]
pub struct AutomationsConfig {
    pub root: PathBuf,
    /// CLI used to reload the system scheduler, e.g. `crontab`. Invoked as
    /// `<scheduler_bin> <cron.schedule path>`.
    pub scheduler_bin: String,
}

impl AutomationsConfig {
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }
    pub fn cron_enabled_dir(&self) -> PathBuf {
        self.root.join("cron.d.enabled")
    }
    pub fn cron_disabled_dir(&self) -> PathBuf {
        self.root.join("cron.d.disabled")
    }
    pub fn cron_schedule_file(&self) -> PathBuf {
        self.root.join("cron.schedule")
    }
    pub fn runner_script_path(&self) -> PathBuf {
        self.root.join("run-automation.sh")
    }
    pub fn events_log_path(&self) -> PathBuf {
        self.root.join("automation-events.jsonl")
    }
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }
}

#[derive(Debug, Clone)]
pub struct TriggerResult {
    pub ok: bool,
    pub error: Option<String>,
}

fn runner_script_contents(config: &AutomationsConfig) -> String {
    format!(
        r#"#!/usr/bin/env bash
set -uo pipefail
ID="$1"
SCRIPTS_DIR="{scripts_dir}"
EVENTS_LOG="{events_log}"
LOCK_DIR="{locks_dir}"
mkdir -p "$LOCK_DIR"
LOCK_FILE="$LOCK_DIR/$ID.lock"

exec 9>"$LOCK_FILE"
if ! flock -n 9; then
  ts=$(date -u +%Y-%m-%dT%H:%M:%SZ)
  printf '{{"event":"skipped","id":"%s","ts":"%s"}}\n' "$ID" "$ts" >> "$EVENTS_LOG"
  exit 0
fi

start=$(date +%s%3N)
output=$(bash "$SCRIPTS_DIR/$ID.sh" 2>&1)
exit_code=$?
end=$(date +%s%3N)
duration=$((end - start))
ts=$(date -u +%Y-%m-%dT%H:%M:%SZ)
truncated=$(printf '%s' "$output" | cut -c1-200)
event="success"
if [ "$exit_code" -ne 0 ]; then event="error"; fi
escaped=$(printf '%s' "$truncated" | sed 's/\\/\\\\/g; s/"/\\"/g' | tr '\n' ' ')
printf '{{"event":"%s","id":"%s","ts":"%s","exit_code":%d,"duration_ms":%d,"output":"%s"}}\n' "$event" "$ID" "$ts" "$exit_code" "$duration" "$escaped" >> "$EVENTS_LOG"
exit $exit_code
"#,
        scripts_dir = config.scripts_dir().display(),
        events_log = config.events_log_path().display(),
        locks_dir = config.locks_dir().display(),
    )
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    set_executable(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        for entry in std::fs::read_dir(dir)?.flatten() {
            let _ = std::fs::remove_file(entry.path());
        }
    } else {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Validates every automation's cron syntax and id, writes its runner
/// script, rewrites the enabled/disabled cron directories and the combined
/// schedule file, then reloads the system scheduler (a missing scheduler
/// CLI is logged as a warning, not a failure).
pub async fn sync_automations(automations: &[Automation], config: &AutomationsConfig) -> Result<()> {
    for automation in automations {
        if !openpalm_spec::automation_id_is_valid(&automation.id) {
            return Err(AutomationsError::InvalidAutomationId);
        }
        cron::validate(&automation.schedule).map_err(AutomationsError::Cron)?;
    }

    std::fs::create_dir_all(config.scripts_dir())?;
    write_executable(&config.runner_script_path(), &runner_script_contents(config))?;

    let live_ids: std::collections::BTreeSet<&str> = automations.iter().map(|a| a.id.as_str()).collect();
    if let Ok(entries) = std::fs::read_dir(config.scripts_dir()) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".sh") {
                if !live_ids.contains(id) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }

    let mut sorted: Vec<&Automation> = automations.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    for automation in &sorted {
        let script_path = config.scripts_dir().join(format!("{}.sh", automation.id));
        let contents = format!("#!/usr/bin/env bash\nset -euo pipefail\n{}\n", automation.script);
        write_executable(&script_path, &contents)?;
    }

    clear_dir(&config.cron_enabled_dir())?;
    clear_dir(&config.cron_disabled_dir())?;

    let mut enabled_index = 0u32;
    let mut disabled_index = 0u32;
    let mut schedule_lines = Vec::new();
    for automation in &sorted {
        let line = format!("{} {}\n", automation.schedule, config.scripts_dir().join(format!("{}.sh", automation.id)).display());
        if automation.enabled {
            enabled_index += 1;
            let path = config.cron_enabled_dir().join(format!("{enabled_index:02}-{}", automation.id));
            std::fs::write(path, &line)?;
            schedule_lines.push(line);
        } else {
            disabled_index += 1;
            let path = config.cron_disabled_dir().join(format!("{disabled_index:02}-{}", automation.id));
            std::fs::write(path, &line)?;
        }
    }
    std::fs::write(config.cron_schedule_file(), schedule_lines.concat())?;

    reload_scheduler(config).await;
    Ok(())
}

async fn reload_scheduler(config: &AutomationsConfig) {
    match Command::new(&config.scheduler_bin).arg(config.cron_schedule_file()).output().await {
        Ok(output) if !output.status.success() => {
            tracing::warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "scheduler reload command exited non-zero"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "scheduler reload CLI unavailable, continuing");
        }
    }
}

pub async fn trigger_automation(id: &str, config: &AutomationsConfig) -> TriggerResult {
    match Command::new("bash").arg(config.runner_script_path()).arg(id).output().await {
        Ok(output) if output.status.success() => TriggerResult { ok: true, error: None },
        Ok(output) => TriggerResult {
            ok: false,
            error: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        },
        Err(e) => TriggerResult { ok: false, error: Some(e.to_string()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> AutomationsConfig {
        AutomationsConfig { root: dir.to_path_buf(), scheduler_bin: "true".to_string() }
    }

    fn automation(id: &str, enabled: bool) -> Automation {
        Automation {
            id: id.to_string(),
            name: format!("Automation {id}"),
            schedule: "0 2 * * *".to_string(),
            script: "echo hi".to_string(),
            enabled,
            description: None,
            core: None,
        }
    }

    #[tokio::test]
    async fn sync_writes_scripts_and_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let automations = vec![automation("nightly-backup", true), automation("weekly-report", false)];
        sync_automations(&automations, &cfg).await.unwrap();

        assert!(cfg.scripts_dir().join("nightly-backup.sh").exists());
        assert!(cfg.scripts_dir().join("weekly-report.sh").exists());
        assert!(cfg.cron_enabled_dir().join("01-nightly-backup").exists());
        assert!(cfg.cron_disabled_dir().join("01-weekly-report").exists());

        let schedule = std::fs::read_to_string(cfg.cron_schedule_file()).unwrap();
        assert!(schedule.contains("nightly-backup.sh"));
        assert!(!schedule.contains("weekly-report.sh"));
    }

    #[tokio::test]
    async fn sync_removes_stale_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        sync_automations(&[automation("keep-me", true)], &cfg).await.unwrap();
        sync_automations(&[automation("keep-me", true)], &cfg).await.unwrap();
        std::fs::write(cfg.scripts_dir().join("stale.sh"), "#!/bin/bash\n").unwrap();
        sync_automations(&[automation("keep-me", true)], &cfg).await.unwrap();
        assert!(!cfg.scripts_dir().join("stale.sh").exists());
    }

    #[tokio::test]
    async fn sync_rejects_invalid_cron() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut bad = automation("bad-schedule", true);
        bad.schedule = "* * * *".to_string();
        let err = sync_automations(&[bad], &cfg).await.unwrap_err();
        assert!(matches!(err, AutomationsError::Cron(msg) if msg == "cron expression must have exactly 5 fields"));
    }

    #[tokio::test]
    async fn trigger_runs_script_and_logs_event() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        sync_automations(&[automation("pingable", true)], &cfg).await.unwrap();
        let result = trigger_automation("pingable", &cfg).await;
        assert!(result.ok, "trigger failed: {:?}", result.error);
        let events = std::fs::read_to_string(cfg.events_log_path()).unwrap();
        assert!(events.contains("\"event\":\"success\""));
        assert!(events.contains("\"id\":\"pingable\""));
    }
}
