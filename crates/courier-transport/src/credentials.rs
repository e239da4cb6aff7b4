use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use courier_core::session::SessionKey;

use crate::error::TransportError;

/// Opaque credential material. The core never interprets these bytes; they
/// pass verbatim between the transport and disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBlob(pub Vec<u8>);

impl CredentialBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// File-per-key credential storage. Saves are atomic (write to a temp file,
/// then rename) so a crash mid-write never corrupts an existing blob.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}-{}.creds", key.client_id, key.session_name))
    }

    /// Load the blob for a key, or None when the key has never paired.
    #[instrument(skip(self), fields(session_key = %key))]
    pub fn load(&self, key: &SessionKey) -> Result<Option<CredentialBlob>, TransportError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(CredentialBlob(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransportError::Credential(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Persist the blob for a key.
    #[instrument(skip(self, blob), fields(session_key = %key))]
    pub fn save(&self, key: &SessionKey, blob: &CredentialBlob) -> Result<(), TransportError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| TransportError::Credential(format!("create dir: {e}")))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("creds.tmp");
        std::fs::write(&tmp, blob.as_bytes())
            .map_err(|e| TransportError::Credential(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| TransportError::Credential(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    /// Remove stored credentials after a terminal logout.
    #[instrument(skip(self), fields(session_key = %key))]
    pub fn remove(&self, key: &SessionKey) -> Result<(), TransportError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Credential(format!(
                "remove {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
