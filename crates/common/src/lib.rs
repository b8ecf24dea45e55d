//! openpalm_common
//!
//! Canonical JSON serialization + SHA-256 hashing utilities, plus the
//! atomic-rewrite primitive every file-owning component in this workspace
//! uses.
//!
//! IMPORTANT: Do not "pretty print" anything that gets hashed. Hashes must
//! be computed over canonical bytes.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize to canonical JSON bytes:
/// - stable key ordering (we enforce sorting via Value roundtrip)
/// - no whitespace
/// - UTF-8
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

/// Write `contents` to `path` via write-temp-then-rename, so readers never
/// observe a partially written file. Used by every component that owns a
/// file on disk (stack spec, secrets, rendered artifacts, automation
/// scripts/schedules).
///
/// `unique` is a caller-supplied uniqueness token for the temp filename
/// (e.g. a monotonic counter or timestamp) so concurrent rewrites of the
/// same path from different processes don't collide; the Stack Manager's
/// mutex already rules out same-process races.
pub fn atomic_write(path: &Path, contents: &[u8], unique: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = OsString::from(path.file_name().unwrap_or_default());
    tmp_name.push(format!(".{unique}.tmp"));
    let tmp_path: PathBuf = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable() {
        let x = Obj { b: 2, a: 1 };
        let y = Obj { a: 1, b: 2 };
        let hx = sha256_canonical_json(&x).unwrap();
        let hy = sha256_canonical_json(&y).unwrap();
        assert_eq!(hx, hy);
    }

    #[test]
    fn atomic_write_replaces_existing_file_and_leaves_no_tmp() {
        let dir = std::env::temp_dir().join("openpalm_common_atomic_write_test");
        let _ = fs::create_dir_all(&dir);
        let path = dir.join("target.yaml");
        atomic_write(&path, b"first", "1").unwrap();
        atomic_write(&path, b"second", "2").unwrap();
        let got = fs::read_to_string(&path).unwrap();
        assert_eq!(got, "second");
        let leftover = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftover, 0);
    }
}
