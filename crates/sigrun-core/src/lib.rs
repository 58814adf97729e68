//! Signed-image admission and trust-chain lineage.
//!
//! This crate provides:
//!
//! - Image reference normalization
//! - Trust configs (key pair and keyless) forming append-only, hash-linked chains
//! - Chain verification, repository initialization and key rotation commits
//! - A swappable trust registry mapping images to chains
//! - Admission decisions over Kubernetes admission reviews
//!
//! # Quick Start
//!
//! ```no_run
//! use sigrun_core::{
//!     generate_keypair, Ed25519Backend, FsChainStore, KeyPairConfig, TrustConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let backend = Ed25519Backend::new();
//! let store = FsChainStore::new("./chain");
//!
//! // Genesis record, trusted on first use
//! let keys = generate_keypair("")?;
//! let mut genesis: TrustConfig = KeyPairConfig::new("acme", keys.public_key_pem)
//!     .with_private_key(keys.private_key_pem)
//!     .with_images(["ghcr.io/acme/app"])
//!     .into();
//! genesis.initialize_repository(&store).await?;
//!
//! // Rotate: the old key signs the record carrying the new one
//! let next_keys = generate_keypair("")?;
//! let mut next: TrustConfig = KeyPairConfig::new("acme", next_keys.public_key_pem)
//!     .with_private_key(next_keys.private_key_pem)
//!     .with_images(["ghcr.io/acme/app"])
//!     .into();
//! next.commit_repository_update(&store, &backend, "").await?;
//!
//! sigrun_core::verify_chain(&store, &genesis, &next, &backend).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `SIGRUN_BIND` | Webhook listen address (default: `0.0.0.0:8080`) |
//! | `SIGRUN_REGISTRY_FILE` | Registry snapshot (default: `/etc/sigrun/registry.json`) |
//! | `SIGRUN_SIGNATURE_URL` | HTTP signature store |
//! | `SIGRUN_SIGNATURE_DIR` | Directory signature store |
//! | `SIGRUN_TIMEOUT` | Signature lookup timeout in seconds (default: 10) |
//! | `SIGRUN_REFRESH_SECS` | Registry refresh interval (default: 30) |

pub mod admission;
pub mod chain;
pub mod config;
mod digest;
pub mod error;
pub mod reference;
pub mod registry;
pub mod signing;
pub mod source;
pub mod store;
pub mod trust;

// Re-export main types
pub use admission::{
    extract_images, AdmissionController, AdmissionRequest, AdmissionResponse, AdmissionReview,
    Decision,
};
pub use chain::{compute_guid, guid_for_genesis, verify_chain, verify_repository, VerifiedRepository};
pub use config::{ControllerConfig, HttpOptions};
pub use error::{TrustError, TrustResult};
pub use reference::{normalize_image_name, ImageInfo};
pub use registry::{FileRegistrySource, RegistrySnapshot, RegistrySource, RepoEntry, TrustRegistry};
pub use signing::{
    compute_key_id, generate_keypair, DsseEnvelope, DsseSignature, Ed25519Backend,
    GeneratedKeyPair, SignatureBackend,
};
pub use source::{DirSignatureSource, HttpSignatureSource, SignatureSource};
pub use store::{ChainReader, ChainStore, FsChainStore, HttpChainReader, MemoryChainStore};
pub use trust::{ConfigMode, KeyPairConfig, KeylessConfig, TrustConfig, VerificationInfo};
