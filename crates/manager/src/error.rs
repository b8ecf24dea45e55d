use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Spec(#[from] openpalm_spec::StackSpecError),
    #[error(transparent)]
    Secret(#[from] openpalm_secrets::SecretStoreError),
    #[error(transparent)]
    Artifact(#[from] openpalm_artifacts::ArtifactError),
    #[error(transparent)]
    AuditLog(#[from] openpalm_audit_log::AuditLogError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ManagerError>;
