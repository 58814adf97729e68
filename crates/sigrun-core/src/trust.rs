//! Trust configs: one position in a signing lineage.
//!
//! A [`TrustConfig`] is either key-pair backed or keyless. Records are stored
//! as PascalCase JSON with a `Mode` tag:
//!
//! ```json
//! {"Mode":"keypair","Name":"acme","ChainNo":1,"PublicKey":"-----BEGIN PUBLIC KEY-----...",
//!  "Images":["ghcr.io/acme/app"],"Signature":"MEUC..."}
//! ```
//!
//! The sign document is the JCS rendering of the record's
//! [`VerificationInfo`], so it never includes the private key or the
//! signature itself.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};
use crate::reference::ImageInfo;
use crate::signing::SignatureBackend;

/// Config variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    Keypair,
    Keyless,
}

impl ConfigMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keypair => "keypair",
            Self::Keyless => "keyless",
        }
    }
}

impl std::fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-pair backed config.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyPairConfig {
    pub name: String,

    #[serde(default)]
    pub chain_no: i64,

    /// SPKI PEM.
    pub public_key: String,

    /// PKCS#8 PEM, possibly encrypted. Only present in the holder's local copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    #[serde(default)]
    pub images: Vec<String>,

    /// Base64 signature by the previous record's key. Empty on genesis.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

impl KeyPairConfig {
    pub fn new(name: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_no: 0,
            public_key: public_key.into(),
            private_key: None,
            images: Vec::new(),
            signature: String::new(),
        }
    }

    pub fn with_private_key(mut self, private_key: impl Into<String>) -> Self {
        self.private_key = Some(private_key.into());
        self
    }

    pub fn with_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = images.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for KeyPairConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairConfig")
            .field("name", &self.name)
            .field("chain_no", &self.chain_no)
            .field("public_key", &self.public_key)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("images", &self.images)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Keyless config: trust rests on a set of maintainer identities.
///
/// Only the structural operations are available. Signing, successor
/// verification, image verification and the lifecycle operations return
/// [`TrustError::NotImplemented`]; identity-based verification plugs in here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeylessConfig {
    pub name: String,

    #[serde(default)]
    pub chain_no: i64,

    #[serde(default)]
    pub maintainers: Vec<String>,

    #[serde(default)]
    pub images: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

/// Public-only projection of a [`TrustConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerificationInfo {
    pub name: String,
    pub mode: ConfigMode,
    pub chain_no: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_key: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<String>,

    #[serde(default)]
    pub images: Vec<String>,
}

/// One record of a trust chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Mode", rename_all = "lowercase")]
pub enum TrustConfig {
    Keypair(KeyPairConfig),
    Keyless(KeylessConfig),
}

impl From<KeyPairConfig> for TrustConfig {
    fn from(config: KeyPairConfig) -> Self {
        Self::Keypair(config)
    }
}

impl From<KeylessConfig> for TrustConfig {
    fn from(config: KeylessConfig) -> Self {
        Self::Keyless(config)
    }
}

impl TrustConfig {
    /// Rebuild a verification-only config from its public projection.
    pub fn from_verification_info(info: &VerificationInfo) -> Self {
        match info.mode {
            ConfigMode::Keypair => Self::Keypair(KeyPairConfig {
                name: info.name.clone(),
                chain_no: info.chain_no,
                public_key: info.public_key.clone(),
                private_key: None,
                images: info.images.clone(),
                signature: String::new(),
            }),
            ConfigMode::Keyless => Self::Keyless(KeylessConfig {
                name: info.name.clone(),
                chain_no: info.chain_no,
                maintainers: info.maintainers.clone(),
                images: info.images.clone(),
                signature: String::new(),
            }),
        }
    }

    pub fn mode(&self) -> ConfigMode {
        match self {
            Self::Keypair(_) => ConfigMode::Keypair,
            Self::Keyless(_) => ConfigMode::Keyless,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Keypair(c) => &c.name,
            Self::Keyless(c) => &c.name,
        }
    }

    pub fn chain_no(&self) -> i64 {
        match self {
            Self::Keypair(c) => c.chain_no,
            Self::Keyless(c) => c.chain_no,
        }
    }

    pub fn set_chain_no(&mut self, chain_no: i64) {
        match self {
            Self::Keypair(c) => c.chain_no = chain_no,
            Self::Keyless(c) => c.chain_no = chain_no,
        }
    }

    pub fn images(&self) -> &[String] {
        match self {
            Self::Keypair(c) => &c.images,
            Self::Keyless(c) => &c.images,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            Self::Keypair(c) => &c.signature,
            Self::Keyless(c) => &c.signature,
        }
    }

    pub fn set_signature(&mut self, signature: impl Into<String>) {
        let signature = signature.into();
        match self {
            Self::Keypair(c) => c.signature = signature,
            Self::Keyless(c) => c.signature = signature,
        }
    }

    pub(crate) fn not_implemented(&self, operation: &'static str) -> TrustError {
        TrustError::NotImplemented {
            mode: self.mode().as_str(),
            operation,
        }
    }

    /// Copy of this record without private key material.
    pub fn without_private_key(&self) -> TrustConfig {
        match self {
            Self::Keypair(c) => Self::Keypair(KeyPairConfig {
                private_key: None,
                ..c.clone()
            }),
            Self::Keyless(_) => self.clone(),
        }
    }

    /// Public projection: no private key, no signature.
    pub fn verification_info(&self) -> VerificationInfo {
        match self {
            Self::Keypair(c) => VerificationInfo {
                name: c.name.clone(),
                mode: ConfigMode::Keypair,
                chain_no: c.chain_no,
                public_key: c.public_key.clone(),
                maintainers: Vec::new(),
                images: c.images.clone(),
            },
            Self::Keyless(c) => VerificationInfo {
                name: c.name.clone(),
                mode: ConfigMode::Keyless,
                chain_no: c.chain_no,
                public_key: String::new(),
                maintainers: c.maintainers.clone(),
                images: c.images.clone(),
            },
        }
    }

    /// Canonical bytes covered by a successor signature.
    pub fn sign_doc(&self) -> TrustResult<Vec<u8>> {
        Ok(serde_jcs::to_vec(&self.verification_info())?)
    }

    /// Whether two records are equal ignoring signature and secret material.
    pub fn content_eq(&self, other: &TrustConfig) -> TrustResult<bool> {
        Ok(self.sign_doc()? == other.sign_doc()?)
    }

    /// Sign `data` with this config's private key on behalf of a successor.
    pub fn sign(
        &self,
        data: &[u8],
        backend: &dyn SignatureBackend,
        passphrase: &str,
    ) -> TrustResult<String> {
        match self {
            Self::Keypair(c) => {
                let private_key =
                    c.private_key
                        .as_deref()
                        .ok_or_else(|| TrustError::Authentication {
                            message: format!("no private key held for {}", c.name),
                        })?;
                backend.sign(data, private_key, passphrase)
            }
            Self::Keyless(_) => Err(self.not_implemented("sign")),
        }
    }

    /// Check that `candidate` was signed by this config's key.
    pub fn verify_successor_config(
        &self,
        candidate: &TrustConfig,
        backend: &dyn SignatureBackend,
    ) -> TrustResult<()> {
        match self {
            Self::Keypair(c) => {
                if candidate.signature().is_empty() {
                    return Err(TrustError::SignatureNotFound {
                        subject: format!(
                            "chain record {} of {}",
                            candidate.chain_no(),
                            candidate.name()
                        ),
                    });
                }
                let doc = candidate.sign_doc()?;
                backend.verify_signature(candidate.signature(), &doc, &c.public_key)
            }
            Self::Keyless(_) => Err(self.not_implemented("verify_successor_config")),
        }
    }

    /// Check the published signature of `image` against this config's key.
    pub async fn verify_image(
        &self,
        image: &ImageInfo,
        backend: &dyn SignatureBackend,
    ) -> TrustResult<()> {
        match self {
            Self::Keypair(c) => {
                backend
                    .verify_published_image_signature(image, &c.public_key)
                    .await
            }
            Self::Keyless(_) => Err(self.not_implemented("verify_image")),
        }
    }

    /// Structural self-check.
    pub fn validate(&self) -> TrustResult<()> {
        if self.name().trim().is_empty() {
            return Err(TrustError::validation("name must not be empty"));
        }

        let chain_no = self.chain_no();
        if chain_no < 0 {
            return Err(TrustError::validation(format!(
                "chain number must not be negative, got {}",
                chain_no
            )));
        }
        if chain_no == 0 && !self.signature().is_empty() {
            return Err(TrustError::validation("genesis record must not be signed"));
        }
        if chain_no > 0 && self.signature().is_empty() {
            return Err(TrustError::validation(format!(
                "record {} carries no signature",
                chain_no
            )));
        }

        let mut seen = BTreeSet::new();
        for image in self.images() {
            let info = ImageInfo::parse(image)
                .map_err(|e| TrustError::validation(format!("image {:?}: {}", image, e)))?;
            if !seen.insert(info.repository()) {
                return Err(TrustError::validation(format!(
                    "image {} listed more than once",
                    info.repository()
                )));
            }
        }

        match self {
            Self::Keypair(c) => {
                if !c.public_key.contains("BEGIN PUBLIC KEY") {
                    return Err(TrustError::validation(
                        "public key must be an SPKI PEM document",
                    ));
                }
            }
            Self::Keyless(c) => {
                if c.maintainers.is_empty() {
                    return Err(TrustError::validation(
                        "keyless config needs at least one maintainer",
                    ));
                }
                let mut identities = BTreeSet::new();
                for maintainer in &c.maintainers {
                    if maintainer.trim().is_empty() {
                        return Err(TrustError::validation("maintainer must not be empty"));
                    }
                    if !identities.insert(maintainer.as_str()) {
                        return Err(TrustError::validation(format!(
                            "maintainer {} listed more than once",
                            maintainer
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Bare repository names (`registry/path`) this config vouches for.
    pub fn image_repositories(&self) -> TrustResult<Vec<String>> {
        self.images()
            .iter()
            .map(|image| ImageInfo::parse(image).map(|info| info.repository()))
            .collect()
    }
}
