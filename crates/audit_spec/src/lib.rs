//! openpalm_audit_spec
//!
//! Strongly-typed audit events for the stack control plane.
//! Every Stack Manager / Apply Engine mutation appends one of these to the
//! hash-chained audit log (see `openpalm_audit_log`).
//! NOTE: schema_version increments are per-event, not global.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub r#type: String, // "artifact_ref"
    pub hash: String,   // sha256:...
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecUpdated {
    pub schema_version: u8,
    pub ts: f64,
    pub spec_hash: String, // sha256:... of canonical stringify(spec)
    pub access_scope: String,
    pub channel_count: u32,
    pub service_count: u32,
    pub automation_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretUpserted {
    pub schema_version: u8,
    pub ts: f64,
    pub name: String,
    /// Never the secret value itself — only its hash.
    pub value_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretDeleted {
    pub schema_version: u8,
    pub ts: f64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsRendered {
    pub schema_version: u8,
    pub ts: f64,
    pub proxy_config_hash: String,
    pub compose_doc_hash: String,
    pub system_env_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactPlanSnapshot {
    pub up: Vec<String>,
    pub restart: Vec<String>,
    pub reload: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyPlanned {
    pub schema_version: u8,
    pub ts: f64,
    pub plan: ImpactPlanSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyExecuted {
    pub schema_version: u8,
    pub ts: f64,
    pub plan: ImpactPlanSnapshot,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationUpserted {
    pub schema_version: u8,
    pub ts: f64,
    pub id: String,
    pub enabled: bool,
    pub schedule_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDeleted {
    pub schema_version: u8,
    pub ts: f64,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StackAuditEvent {
    SpecUpdated(SpecUpdated),
    SecretUpserted(SecretUpserted),
    SecretDeleted(SecretDeleted),
    ArtifactsRendered(ArtifactsRendered),
    ApplyPlanned(ApplyPlanned),
    ApplyExecuted(ApplyExecuted),
    AutomationUpserted(AutomationUpserted),
    AutomationDeleted(AutomationDeleted),
}
