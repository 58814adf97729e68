//! Chain verification and the commit protocol.
//!
//! A chain is a gapless sequence of records `0, 1, 2, ...`. Record 0 is
//! accepted on first use; every later record must be signed by the key of
//! the record right before it. Trust in a new key is therefore reached by
//! walking forward from a record that is already trusted.

use tracing::{debug, info, warn};

use crate::digest::sha256_hex;
use crate::error::{TrustError, TrustResult};
use crate::signing::SignatureBackend;
use crate::store::{ChainReader, ChainStore};
use crate::trust::TrustConfig;

/// Result of a first-use verification of a published chain.
#[derive(Debug, Clone)]
pub struct VerifiedRepository {
    pub guid: String,
    pub genesis: TrustConfig,
    pub head: TrustConfig,
}

impl TrustConfig {
    /// Set this config up as the genesis record of a new chain in `store`.
    pub async fn initialize_repository<S>(&mut self, store: &S) -> TrustResult<()>
    where
        S: ChainStore + ?Sized,
    {
        if matches!(self, TrustConfig::Keyless(_)) {
            return Err(self.not_implemented("initialize_repository"));
        }

        let mut genesis = self.clone();
        genesis.set_chain_no(0);
        genesis.set_signature(String::new());
        genesis.validate()?;

        if store.holds_records().await? {
            return Err(TrustError::AlreadyInitialized {
                location: store.location(),
            });
        }

        store.put(&genesis).await?;
        info!(
            name = genesis.name(),
            location = %store.location(),
            "repository initialized"
        );

        *self = genesis;
        Ok(())
    }

    /// Append this config as the successor of the current head in `store`.
    ///
    /// The head's private key signs the new record, so `passphrase` unlocks
    /// the head's key, not this config's. On success `self` holds the
    /// persisted record.
    pub async fn commit_repository_update<S>(
        &mut self,
        store: &S,
        backend: &dyn SignatureBackend,
        passphrase: &str,
    ) -> TrustResult<()>
    where
        S: ChainStore + ?Sized,
    {
        if matches!(self, TrustConfig::Keyless(_)) {
            return Err(self.not_implemented("commit_repository_update"));
        }

        let old = store.current().await?.ok_or_else(|| {
            TrustError::fetch(format!(
                "repository at {} is not initialized",
                store.location()
            ))
        })?;

        let mut candidate = self.clone();
        candidate.set_chain_no(old.chain_no());
        candidate.set_signature(String::new());
        if candidate.content_eq(&old)? {
            return Err(TrustError::NoChange);
        }

        let chain_no = old.chain_no() + 1;
        candidate.set_chain_no(chain_no);
        let signature = old.sign(&candidate.sign_doc()?, backend, passphrase)?;
        candidate.set_signature(signature);
        candidate.validate()?;

        // Catches a head whose private key does not match its public key
        old.verify_successor_config(&candidate, backend)?;

        store.put(&candidate).await?;
        info!(
            name = candidate.name(),
            chain_no,
            location = %store.location(),
            "repository update committed"
        );

        *self = candidate;
        Ok(())
    }
}

/// Verify that `new` is reachable from the trusted `old` record.
///
/// Walks positions `old+1 ..= new` in order and stops at the first record
/// that cannot be fetched or is not signed by its predecessor. The last
/// fetched record must match `new`.
pub async fn verify_chain<R>(
    reader: &R,
    old: &TrustConfig,
    new: &TrustConfig,
    backend: &dyn SignatureBackend,
) -> TrustResult<()>
where
    R: ChainReader + ?Sized,
{
    let from = old.chain_no();
    let to = new.chain_no();

    if to < from {
        return Err(TrustError::ChainIntegrity {
            chain_no: to,
            reason: format!("rollback from position {} to {}", from, to),
        });
    }

    if from == to {
        if old.content_eq(new)? {
            return Ok(());
        }
        return Err(TrustError::ChainIntegrity {
            chain_no: to,
            reason: "record differs from the trusted record at the same position".to_string(),
        });
    }

    let mut prev = old.without_private_key();
    for position in from + 1..=to {
        let curr = reader.fetch(position).await?;
        if curr.chain_no() != position {
            return Err(TrustError::ChainIntegrity {
                chain_no: position,
                reason: format!("record claims position {}", curr.chain_no()),
            });
        }

        if let Err(e) = prev.verify_successor_config(&curr, backend) {
            warn!(position, error = %e, "chain link rejected");
            return Err(e);
        }
        debug!(position, "chain link verified");
        prev = curr;
    }

    if !prev.content_eq(new)? {
        return Err(TrustError::ChainIntegrity {
            chain_no: to,
            reason: "fetched head does not match the presented record".to_string(),
        });
    }

    Ok(())
}

/// GUID of a chain: lowercase hex SHA-256 of the genesis sign document.
pub fn guid_for_genesis(genesis: &TrustConfig) -> TrustResult<String> {
    if genesis.chain_no() != 0 {
        return Err(TrustError::ChainIntegrity {
            chain_no: genesis.chain_no(),
            reason: "GUID requires the genesis record".to_string(),
        });
    }
    Ok(sha256_hex(&genesis.sign_doc()?))
}

/// Fetch the genesis record of `reader` and derive the chain GUID.
pub async fn compute_guid<R>(reader: &R) -> TrustResult<String>
where
    R: ChainReader + ?Sized,
{
    guid_for_genesis(&reader.fetch(0).await?)
}

/// First-use verification: accept the genesis record and verify the chain
/// up to the published current head.
pub async fn verify_repository<R>(
    reader: &R,
    backend: &dyn SignatureBackend,
) -> TrustResult<VerifiedRepository>
where
    R: ChainReader + ?Sized,
{
    let genesis = reader.fetch(0).await?;
    let guid = guid_for_genesis(&genesis)?;
    genesis.validate()?;

    let head = reader.fetch_current().await?;
    verify_chain(reader, &genesis, &head, backend).await?;

    debug!(guid = %guid, head = head.chain_no(), "repository verified");
    Ok(VerifiedRepository {
        guid,
        genesis: genesis.without_private_key(),
        head: head.without_private_key(),
    })
}
