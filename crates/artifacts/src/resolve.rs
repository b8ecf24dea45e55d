use crate::ArtifactError;
use std::collections::BTreeMap;

/// Resolves every `${NAME}` secret reference in `config` against `secrets`.
/// Non-reference values pass through unchanged (newlines already stripped
/// at spec-parse time). `entity` and is used only to build the stable
/// error code on a missing/empty secret.
pub fn resolve_config(
    entity: &str,
    config: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ArtifactError> {
    let mut resolved = BTreeMap::new();
    for (key, value) in config {
        let out = match openpalm_spec::parse_secret_reference(value) {
            Some(name) => match secrets.get(&name).filter(|v| !v.is_empty()) {
                Some(v) => v.clone(),
                None => {
                    return Err(ArtifactError::Invalid(format!(
                        "unresolved_secret_reference_{entity}_{key}_{name}"
                    )))
                }
            },
            None => value.clone(),
        };
        resolved.insert(key.clone(), out);
    }
    Ok(resolved)
}

pub fn kv_to_env_file(kv: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in kv {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}
