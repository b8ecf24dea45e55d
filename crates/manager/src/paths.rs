use std::path::{Path, PathBuf};

/// Every path the Stack Manager owns, injected at construction per the
/// "no module-level mutable state" design note.
#[derive(Debug, Clone)]
pub struct StackPaths {
    pub spec_file: PathBuf,
    pub secrets_file: PathBuf,
    pub state_root: PathBuf,
    pub audit_log: PathBuf,
}

impl StackPaths {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        let state_root = state_root.into();
        Self {
            spec_file: state_root.join("openpalm.yaml"),
            secrets_file: state_root.join("secrets.env"),
            audit_log: state_root.join("audit.jsonl"),
            state_root,
        }
    }

    pub fn proxy_config(&self) -> PathBuf {
        self.state_root.join("caddy.json")
    }

    pub fn compose_file(&self) -> PathBuf {
        self.state_root.join("docker-compose.yml")
    }

    pub fn system_env(&self) -> PathBuf {
        self.state_root.join("system.env")
    }

    pub fn service_env(&self, service_name: &str) -> PathBuf {
        self.state_root.join(service_name).join(".env")
    }

    pub fn routes_dir(&self) -> PathBuf {
        self.state_root.join("routes")
    }

    /// A user-maintained override file under the routes directory that
    /// `render_artifacts`'s garbage collection must never remove.
    pub fn routes_override_file(&self) -> PathBuf {
        self.routes_dir().join("overrides.json")
    }

    pub fn as_path(&self) -> &Path {
        &self.state_root
    }
}
