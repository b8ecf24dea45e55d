use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Manager(#[from] openpalm_manager::ManagerError),
    #[error(transparent)]
    Secret(#[from] openpalm_secrets::SecretStoreError),
    #[error(transparent)]
    Artifact(#[from] openpalm_artifacts::ArtifactError),
    #[error(transparent)]
    AuditLog(#[from] openpalm_audit_log::AuditLogError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret_validation_failed:{0}")]
    SecretValidationFailed(String),
    #[error("compose_validation_failed:{0}")]
    ComposeValidationFailed(String),
    #[error("compose_up_failed:{0}:{1}")]
    ComposeUpFailed(String, String),
    #[error("compose_restart_failed:{0}:{1}")]
    ComposeRestartFailed(String, String),
    #[error("compose_reload_failed:{0}:{1}")]
    ComposeReloadFailed(String, String),
}

pub type Result<T> = std::result::Result<T, ApplyError>;
