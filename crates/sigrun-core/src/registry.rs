//! Trust registry: which chains vouch for which images.
//!
//! A [`RegistrySnapshot`] maps chain GUIDs to their last verified
//! [`VerificationInfo`] and bare image names (`registry/path`) to the set of
//! GUIDs claiming them. Snapshots are immutable values; [`TrustRegistry`]
//! swaps in a new one on refresh, so readers holding the previous snapshot
//! are never affected.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{compute_guid, verify_chain, verify_repository};
use crate::error::{TrustError, TrustResult};
use crate::signing::SignatureBackend;
use crate::store::ChainReader;
use crate::trust::{TrustConfig, VerificationInfo};

/// A registered chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoEntry {
    /// Where the chain is published.
    pub path: String,

    /// Public projection of the last verified head.
    pub verification_info: VerificationInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub guid_to_repo: BTreeMap<String, RepoEntry>,

    #[serde(default)]
    pub image_to_guids: BTreeMap<String, BTreeSet<String>>,
}

impl RegistrySnapshot {
    /// Build a snapshot, deriving the image index from each entry's images.
    pub fn from_repos<I>(repos: I) -> TrustResult<Self>
    where
        I: IntoIterator<Item = (String, RepoEntry)>,
    {
        let mut snapshot = Self::default();
        for (guid, entry) in repos {
            snapshot.insert(guid, entry)?;
        }
        Ok(snapshot)
    }

    fn insert(&mut self, guid: String, entry: RepoEntry) -> TrustResult<()> {
        let config = TrustConfig::from_verification_info(&entry.verification_info);
        for repository in config.image_repositories()? {
            self.image_to_guids
                .entry(repository)
                .or_default()
                .insert(guid.clone());
        }
        self.guid_to_repo.insert(guid, entry);
        Ok(())
    }

    fn remove(&mut self, guid: &str) -> Option<RepoEntry> {
        let entry = self.guid_to_repo.remove(guid)?;
        self.image_to_guids.retain(|_, guids| {
            guids.remove(guid);
            !guids.is_empty()
        });
        Some(entry)
    }

    /// GUIDs claiming a bare image name. Empty when nothing is registered.
    pub fn guids_for_image(&self, repository: &str) -> Vec<&str> {
        self.image_to_guids
            .get(repository)
            .map(|guids| guids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn repo(&self, guid: &str) -> Option<&RepoEntry> {
        self.guid_to_repo.get(guid)
    }

    pub fn len(&self) -> usize {
        self.guid_to_repo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guid_to_repo.is_empty()
    }

    /// Copy of this snapshot with `guid` set to `entry`.
    pub fn with_repo(&self, guid: &str, entry: RepoEntry) -> TrustResult<Self> {
        let mut next = self.clone();
        next.remove(guid);
        next.insert(guid.to_string(), entry)?;
        Ok(next)
    }

    /// Copy of this snapshot without `guid`.
    pub fn without_repo(&self, guid: &str) -> TrustResult<Self> {
        let mut next = self.clone();
        next.remove(guid).ok_or_else(|| {
            TrustError::validation(format!("repository {} is not registered", guid))
        })?;
        Ok(next)
    }

    /// Register a chain on first use.
    ///
    /// The genesis record is accepted as-is and the chain is verified up to
    /// its current head. Returns the GUID and the new snapshot.
    pub async fn add_repository<R>(
        &self,
        reader: &R,
        backend: &dyn SignatureBackend,
    ) -> TrustResult<(String, Self)>
    where
        R: ChainReader + ?Sized,
    {
        let verified = verify_repository(reader, backend).await?;
        if let Some(existing) = self.repo(&verified.guid) {
            return Err(TrustError::validation(format!(
                "repository {} is already registered from {}",
                verified.guid, existing.path
            )));
        }

        let entry = RepoEntry {
            path: reader.location(),
            verification_info: verified.head.verification_info(),
            updated_at: Some(Utc::now()),
        };
        let next = self.with_repo(&verified.guid, entry)?;

        info!(
            guid = %verified.guid,
            chain_no = verified.head.chain_no(),
            "repository registered"
        );
        Ok((verified.guid, next))
    }

    /// Advance a registered chain to its current head.
    ///
    /// The chain is walked from the stored record, never from genesis, so
    /// the update is only accepted if the stored key signed the way forward.
    pub async fn update_repository<R>(
        &self,
        guid: &str,
        reader: &R,
        backend: &dyn SignatureBackend,
    ) -> TrustResult<Self>
    where
        R: ChainReader + ?Sized,
    {
        let entry = self.repo(guid).ok_or_else(|| {
            TrustError::validation(format!("repository {} is not registered", guid))
        })?;

        let published = compute_guid(reader).await?;
        if published != guid {
            return Err(TrustError::ChainIntegrity {
                chain_no: 0,
                reason: format!(
                    "{} serves chain {}, expected {}",
                    reader.location(),
                    published,
                    guid
                ),
            });
        }

        let trusted = TrustConfig::from_verification_info(&entry.verification_info);
        let head = reader.fetch_current().await?;
        verify_chain(reader, &trusted, &head, backend).await?;

        let updated = RepoEntry {
            path: reader.location(),
            verification_info: head.verification_info(),
            updated_at: Some(Utc::now()),
        };
        let next = self.with_repo(guid, updated)?;

        info!(
            guid = %guid,
            from = trusted.chain_no(),
            to = head.chain_no(),
            "repository updated"
        );
        Ok(next)
    }
}

/// Where snapshots come from.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch_snapshot(&self) -> TrustResult<RegistrySnapshot>;
}

/// Snapshot stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileRegistrySource {
    path: PathBuf,
}

impl FileRegistrySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot, or an empty one if the file does not exist yet.
    pub async fn fetch_or_empty(&self) -> TrustResult<RegistrySnapshot> {
        let exists = tokio::fs::try_exists(&self.path).await.map_err(|e| {
            TrustError::fetch(format!(
                "failed to access registry {}: {}",
                self.path.display(),
                e
            ))
        })?;
        if exists {
            self.fetch_snapshot().await
        } else {
            Ok(RegistrySnapshot::default())
        }
    }

    /// Replace the stored snapshot atomically.
    pub async fn store_snapshot(&self, snapshot: &RegistrySnapshot) -> TrustResult<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        crate::store::fs::write_atomic(&self.path, &bytes).await
    }
}

#[async_trait]
impl RegistrySource for FileRegistrySource {
    async fn fetch_snapshot(&self) -> TrustResult<RegistrySnapshot> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            TrustError::fetch(format!(
                "failed to read registry {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Shared handle to the current snapshot.
#[derive(Clone)]
pub struct TrustRegistry {
    current: Arc<RwLock<Arc<RegistrySnapshot>>>,
    source: Option<Arc<dyn RegistrySource>>,
}

impl std::fmt::Debug for TrustRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRegistry")
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl TrustRegistry {
    /// Fixed registry without a source; [`refresh`](Self::refresh) fails.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
            source: None,
        }
    }

    /// Load the initial snapshot from `source`. Failure here is fatal.
    pub async fn load(source: Arc<dyn RegistrySource>) -> TrustResult<Self> {
        let snapshot = source.fetch_snapshot().await?;
        info!(repositories = snapshot.len(), "trust registry loaded");
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
            source: Some(source),
        })
    }

    /// The snapshot current right now. Later refreshes do not affect it.
    pub async fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().await.clone()
    }

    /// Swap in `snapshot`.
    pub async fn replace(&self, snapshot: RegistrySnapshot) {
        *self.current.write().await = Arc::new(snapshot);
    }

    /// Fetch a new snapshot from the source and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> TrustResult<usize> {
        let source = self.source.as_ref().ok_or_else(|| TrustError::Config {
            message: "trust registry has no source to refresh from".to_string(),
        })?;

        let snapshot = source.fetch_snapshot().await?;
        let count = snapshot.len();
        self.replace(snapshot).await;
        debug!(repositories = count, "trust registry refreshed");
        Ok(count)
    }

    /// Refresh every `interval` on the current runtime.
    pub fn spawn_refresh(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = registry.refresh().await {
                    warn!(error = %e, "trust registry refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}
