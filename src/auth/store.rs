//! Refresh-credential persistence.
//!
//! The credential lives in exactly one durable location,
//! `~/.benchgate/refresh.credential`, sealed at rest by the [`SecretStore`].
//! The provider client reads plaintext from a transient slot
//! (`runtime/refresh.token`) that exists only for the duration of an active
//! session-refresh call; [`TransientSlot`] removes it again when dropped,
//! whether the call succeeded or not.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::security::SecretStore;

/// Durable credential file name.
const DURABLE_FILE: &str = "refresh.credential";
/// Transient slot path, relative to the benchgate directory.
const TRANSIENT_DIR: &str = "runtime";
const TRANSIENT_FILE: &str = "refresh.token";

/// On-disk shape of the durable credential file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    /// Sealed (or plaintext, when sealing is disabled) refresh credential.
    refresh_token: String,
    /// When the credential was stored (RFC3339).
    saved_at: String,
}

/// Owns the durable store and the transient slot for the refresh credential.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    durable_path: PathBuf,
    transient_path: PathBuf,
    secrets: SecretStore,
}

impl CredentialStore {
    pub fn new(benchgate_dir: &Path, secrets: SecretStore) -> Self {
        Self {
            durable_path: benchgate_dir.join(DURABLE_FILE),
            transient_path: benchgate_dir.join(TRANSIENT_DIR).join(TRANSIENT_FILE),
            secrets,
        }
    }

    /// Persist the refresh credential to the durable store, sealed at rest.
    /// Clears any leftover transient copy so the plaintext slot is empty
    /// whenever no refresh call is in flight.
    pub async fn store(&self, refresh_token: &str) -> Result<()> {
        let sealed = self
            .secrets
            .encrypt(refresh_token)
            .context("failed to seal refresh credential")?;
        let record = StoredCredential {
            refresh_token: sealed,
            saved_at: Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        write_file_secure(&self.durable_path, &json).await?;
        self.remove_transient();
        Ok(())
    }

    /// Load and unseal the durable refresh credential, if present.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.durable_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.durable_path).with_context(|| {
            format!(
                "failed to read credential file {}",
                self.durable_path.display()
            )
        })?;
        let record: StoredCredential =
            serde_json::from_str(&content).context("credential file is corrupt")?;
        let token = self
            .secrets
            .decrypt(&record.refresh_token)
            .context("failed to unseal refresh credential")?;
        Ok(Some(token))
    }

    /// Whether a durable credential exists.
    pub fn exists(&self) -> bool {
        self.durable_path.exists()
    }

    /// Erase the durable credential and any transient copy. Idempotent.
    pub fn clear(&self) -> Result<()> {
        if self.durable_path.exists() {
            fs::remove_file(&self.durable_path).with_context(|| {
                format!(
                    "failed to remove credential file {}",
                    self.durable_path.display()
                )
            })?;
        }
        self.remove_transient();
        Ok(())
    }

    /// Materialize the plaintext credential in the transient slot for the
    /// duration of a refresh call. The returned guard removes the slot when
    /// dropped.
    pub async fn stage(&self) -> Result<Option<TransientSlot>> {
        let Some(token) = self.load()? else {
            return Ok(None);
        };
        write_file_secure(&self.transient_path, &token).await?;
        Ok(Some(TransientSlot {
            token,
            path: self.transient_path.clone(),
        }))
    }

    /// Whether the plaintext slot currently holds a credential.
    pub fn transient_exists(&self) -> bool {
        self.transient_path.exists()
    }

    fn remove_transient(&self) {
        if self.transient_path.exists() {
            if let Err(e) = fs::remove_file(&self.transient_path) {
                tracing::warn!("failed to clear transient credential slot: {e}");
            }
        }
    }
}

/// Plaintext refresh credential, staged for a single refresh call.
#[derive(Debug)]
pub struct TransientSlot {
    token: String,
    path: PathBuf,
}

impl TransientSlot {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for TransientSlot {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to clear transient credential slot: {e}");
            }
        }
    }
}

/// Write content to a file with owner-only permissions (0o600 on Unix).
///
/// Uses `spawn_blocking` to avoid blocking the async runtime.
async fn write_file_secure(path: &Path, content: &str) -> Result<()> {
    let path = path.to_path_buf();
    let content = content.to_string();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(content.as_bytes())?;
            fs::set_permissions(&path, Permissions::from_mode(0o600))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, &content)?;
        }

        Ok(())
    })
    .await
    .context("credential file write task panicked")?
    .context("failed to write credential file")?;

    Ok(())
}
