//! Filesystem chain store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::{
    archive_path, check_position, position_taken, ChainReader, ChainStore, ARCHIVE_DIR, CURRENT_FILE,
};
use crate::error::{TrustError, TrustResult};
use crate::trust::TrustConfig;

/// Chain stored in a local directory (usually a checkout that is published).
#[derive(Debug, Clone)]
pub struct FsChainStore {
    root: PathBuf,
}

impl FsChainStore {
    /// Store rooted at `root`. A path to `sigrun-repo.json` is accepted too.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.file_name().is_some_and(|name| name == CURRENT_FILE) {
            root.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            root
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn archive_file(&self, position: i64) -> PathBuf {
        self.root.join(archive_path(position))
    }

    async fn read_record(&self, path: &Path) -> TrustResult<Option<TrustConfig>> {
        match fs::read(path).await {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes).map_err(|e| {
                    TrustError::decode(format!("failed to parse {}: {}", path.display(), e))
                })?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::fetch(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl ChainReader for FsChainStore {
    async fn get(&self, position: i64) -> TrustResult<Option<TrustConfig>> {
        check_position(position)?;
        self.read_record(&self.archive_file(position)).await
    }

    async fn current(&self) -> TrustResult<Option<TrustConfig>> {
        self.read_record(&self.current_path()).await
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

#[async_trait]
impl ChainStore for FsChainStore {
    async fn put(&self, record: &TrustConfig) -> TrustResult<()> {
        let position = record.chain_no();
        check_position(position)?;

        let archive = self.archive_file(position);
        let archived = serde_json::to_vec_pretty(&record.without_private_key())?;
        if !write_new(&archive, &archived).await? {
            return Err(position_taken(position, &self.location()));
        }

        let current = serde_json::to_vec_pretty(record)?;
        if let Err(e) = write_atomic(&self.current_path(), &current).await {
            warn!(position, error = %e, "current pointer write failed, rolling back archive");
            if let Err(rollback) = fs::remove_file(&archive).await {
                warn!(error = %rollback, "failed to remove archival record");
            }
            return Err(e);
        }

        debug!(root = %self.root.display(), position, "chain record persisted");
        Ok(())
    }

    async fn holds_records(&self) -> TrustResult<bool> {
        let unreadable = |path: &Path, e: std::io::Error| {
            TrustError::store(format!("failed to inspect {}: {}", path.display(), e))
        };

        let current = self.current_path();
        if fs::try_exists(&current)
            .await
            .map_err(|e| unreadable(&current, e))?
        {
            return Ok(true);
        }

        let archive_dir = self.root.join(ARCHIVE_DIR);
        let mut entries = match fs::read_dir(&archive_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(unreadable(&archive_dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unreadable(&archive_dir, e))?
        {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

async fn ensure_parent(path: &Path) -> TrustResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            TrustError::store(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}

/// Write via temp file and rename, replacing any existing file.
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> TrustResult<()> {
    ensure_parent(path).await?;
    let temp = temp_path(path);

    fs::write(&temp, content)
        .await
        .map_err(|e| TrustError::store(format!("failed to write temp file: {}", e)))?;

    fs::rename(&temp, path)
        .await
        .map_err(|e| TrustError::store(format!("failed to rename temp file: {}", e)))?;

    Ok(())
}

/// Write via temp file and hard link. Returns `false` if `path` already exists.
pub(crate) async fn write_new(path: &Path, content: &[u8]) -> TrustResult<bool> {
    ensure_parent(path).await?;
    let temp = temp_path(path);

    fs::write(&temp, content)
        .await
        .map_err(|e| TrustError::store(format!("failed to write temp file: {}", e)))?;

    let linked = fs::hard_link(&temp, path).await;
    let _ = fs::remove_file(&temp).await;

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(TrustError::store(format!(
            "failed to link {}: {}",
            path.display(),
            e
        ))),
    }
}
