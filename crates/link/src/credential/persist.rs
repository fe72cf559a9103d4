// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: load/save to JSON file with atomic writes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::credential::{epoch_ms, from_epoch_ms, Credential};

/// On-disk form of the current credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCredential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub valid_since_ms: u64,
}

impl PersistedCredential {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            access_token: credential.value.clone(),
            refresh_token: credential.renewal.clone(),
            valid_since_ms: epoch_ms(credential.valid_since),
        }
    }

    pub fn into_credential(self) -> Credential {
        Credential {
            value: self.access_token,
            renewal: self.refresh_token,
            valid_since: from_epoch_ms(self.valid_since_ms),
        }
    }
}

/// Load a persisted credential from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<PersistedCredential> {
    let contents = std::fs::read_to_string(path)?;
    let credential: PersistedCredential = serde_json::from_str(&contents)?;
    Ok(credential)
}

/// Save a credential to a JSON file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent saves never
/// share a `.tmp` file.
pub fn save(path: &Path, credential: &PersistedCredential) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(credential)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Remove the credential file. A missing file is not an error.
pub fn remove(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
