//! Snapshot of the service index on disk

use std::path::{Path, PathBuf};

use rdock_core::error::PersistError;
use rdock_core::service::ManagedService;

/// JSON snapshot of every managed service.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// snapshot, so readers never see a half-written document.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; a missing file is an empty index
    pub async fn load(&self) -> Result<Vec<ManagedService>, PersistError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace the snapshot with `services`, sorted by port then id
    pub async fn save(&self, services: &[ManagedService]) -> Result<(), PersistError> {
        let mut sorted: Vec<&ManagedService> = services.iter().collect();
        sorted.sort_by(|a, b| a.port.cmp(&b.port).then_with(|| a.id.cmp(&b.id)));
        let json = serde_json::to_vec_pretty(&sorted)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(parent, source))?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| self.io_error(&tmp, source))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(&self.path, source))?;

        tracing::debug!("Saved {} services to {:?}", sorted.len(), self.path);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
