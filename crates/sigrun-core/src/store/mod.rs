//! Chain record storage.
//!
//! A chain lives under one root:
//!
//! ```text
//! <root>/sigrun-repo.json      current head (holder's copy, may carry the private key)
//! <root>/.sigrun/<n>.json      archival record at position n
//! ```
//!
//! Archival records never hold private key material and are never
//! overwritten. The verification algorithm only sees the [`ChainReader`]
//! capability, so any backend that can serve positions works.

use async_trait::async_trait;

use crate::error::{TrustError, TrustResult};
use crate::trust::TrustConfig;

pub(crate) mod fs;
mod http;
mod memory;

pub use fs::FsChainStore;
pub use http::HttpChainReader;
pub use memory::MemoryChainStore;

/// File name of the current head.
pub const CURRENT_FILE: &str = "sigrun-repo.json";

/// Directory holding archival records.
pub const ARCHIVE_DIR: &str = ".sigrun";

/// Relative path of the archival record at `position`.
pub fn archive_path(position: i64) -> String {
    format!("{}/{}.json", ARCHIVE_DIR, position)
}

/// Read access to a chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Archival record at `position`, `None` when nothing is recorded there.
    async fn get(&self, position: i64) -> TrustResult<Option<TrustConfig>>;

    /// Current head pointer.
    async fn current(&self) -> TrustResult<Option<TrustConfig>>;

    /// Human-readable location for messages.
    fn location(&self) -> String;

    /// Archival record at `position`; a missing record is a fetch failure.
    async fn fetch(&self, position: i64) -> TrustResult<TrustConfig> {
        self.get(position).await?.ok_or_else(|| {
            TrustError::fetch(format!(
                "no record at position {} in {}",
                position,
                self.location()
            ))
        })
    }

    /// Current head; a missing pointer is a fetch failure.
    async fn fetch_current(&self) -> TrustResult<TrustConfig> {
        self.current().await?.ok_or_else(|| {
            TrustError::fetch(format!("no current record in {}", self.location()))
        })
    }
}

/// Read/write access to a chain.
#[async_trait]
pub trait ChainStore: ChainReader {
    /// Persist `record` as archival position `record.chain_no()` and as the
    /// new current head.
    ///
    /// The archival write refuses to replace an existing position. If the
    /// current pointer cannot be written the archival record is removed
    /// again, so a failed put leaves the store as it was.
    async fn put(&self, record: &TrustConfig) -> TrustResult<()>;

    /// Whether any archival record or a current pointer exists, at any position.
    async fn holds_records(&self) -> TrustResult<bool>;
}

pub(crate) fn position_taken(position: i64, location: &str) -> TrustError {
    TrustError::ChainIntegrity {
        chain_no: position,
        reason: format!("position already recorded in {}", location),
    }
}

pub(crate) fn check_position(position: i64) -> TrustResult<()> {
    if position < 0 {
        return Err(TrustError::validation(format!(
            "chain position must not be negative, got {}",
            position
        )));
    }
    Ok(())
}
