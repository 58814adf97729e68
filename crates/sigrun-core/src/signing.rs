//! Signer/verifier capability.
//!
//! The trust-chain protocol only talks to [`SignatureBackend`]. The bundled
//! [`Ed25519Backend`] keeps keys as PEM text:
//! - private keys: PKCS#8 PEM, encrypted when a passphrase is set
//! - public keys: SPKI PEM
//! - signatures: Base64 over the raw message
//!
//! Published image signatures are DSSE envelopes carrying a simple-signing
//! payload that binds the docker reference and manifest digest.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::digest::sha256_prefixed;
use crate::error::{TrustError, TrustResult};
use crate::reference::ImageInfo;
use crate::source::SignatureSource;

/// Payload type of published image signatures.
pub const PAYLOAD_TYPE_SIMPLE_SIGNING: &str = "application/vnd.dev.cosign.simplesigning.v1+json";

/// `critical.type` value of simple-signing payloads.
pub const SIMPLE_SIGNING_TYPE: &str = "cosign container image signature";

/// Sign and verify capability used by trust configs.
#[async_trait]
pub trait SignatureBackend: Send + Sync {
    /// Sign `data` with a PEM private key, returning a Base64 signature.
    fn sign(&self, data: &[u8], private_key: &str, passphrase: &str) -> TrustResult<String>;

    /// Verify a Base64 signature over `data` with a PEM public key.
    fn verify_signature(&self, signature: &str, data: &[u8], public_key: &str) -> TrustResult<()>;

    /// Verify the signature published for `image` against a PEM public key.
    async fn verify_published_image_signature(
        &self,
        image: &ImageInfo,
        public_key: &str,
    ) -> TrustResult<()>;
}

/// DSSE envelope structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsseEnvelope {
    /// Payload type (e.g., "application/vnd.dev.cosign.simplesigning.v1+json").
    #[serde(rename = "payloadType")]
    pub payload_type: String,

    /// Base64-encoded payload.
    pub payload: String,

    /// Signatures.
    pub signatures: Vec<DsseSignature>,
}

/// DSSE signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsseSignature {
    /// Key ID.
    #[serde(rename = "keyid", default)]
    pub key_id: String,

    /// Base64-encoded signature.
    #[serde(rename = "sig")]
    pub signature: String,
}

/// Simple-signing payload bound into an image signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleSigningPayload {
    pub critical: Critical,

    #[serde(default)]
    pub optional: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critical {
    pub identity: Identity,
    pub image: ManifestRef,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "docker-reference")]
    pub docker_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    #[serde(rename = "docker-manifest-digest", default)]
    pub docker_manifest_digest: String,
}

/// Identity a signature for `image` must name.
///
/// Digest-pinned references are bound by the digest, so the identity is the
/// bare repository. Tag references carry no content binding and name the tag.
fn signed_identity(image: &ImageInfo) -> String {
    if image.is_digested() {
        image.repository()
    } else {
        format!("{}:{}", image.repository(), image.tag)
    }
}

impl SimpleSigningPayload {
    /// Payload for an image reference.
    pub fn for_image(image: &ImageInfo) -> Self {
        Self {
            critical: Critical {
                identity: Identity {
                    docker_reference: signed_identity(image),
                },
                image: ManifestRef {
                    docker_manifest_digest: image.digest.clone(),
                },
                kind: SIMPLE_SIGNING_TYPE.to_string(),
            },
            optional: None,
        }
    }

    /// Check that this payload speaks about `image`.
    fn check_binding(&self, image: &ImageInfo) -> TrustResult<()> {
        if self.critical.kind != SIMPLE_SIGNING_TYPE {
            return Err(TrustError::signature_invalid(format!(
                "unexpected payload type: {}",
                self.critical.kind
            )));
        }

        let identity = signed_identity(image);
        if self.critical.identity.docker_reference != identity {
            return Err(TrustError::signature_invalid(format!(
                "signature is for {}, not {}",
                self.critical.identity.docker_reference, identity
            )));
        }

        if image.is_digested() && self.critical.image.docker_manifest_digest != image.digest {
            return Err(TrustError::signature_invalid(format!(
                "signature covers digest {}, image pins {}",
                self.critical.image.docker_manifest_digest, image.digest
            )));
        }

        Ok(())
    }
}

/// Freshly generated keypair in PEM form.
#[derive(Clone)]
pub struct GeneratedKeyPair {
    /// PKCS#8 PEM (encrypted when a passphrase was given).
    pub private_key_pem: String,

    /// SPKI PEM.
    pub public_key_pem: String,

    /// `sha256:` of the SPKI DER bytes.
    pub key_id: String,
}

impl std::fmt::Debug for GeneratedKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKeyPair")
            .field("private_key_pem", &"<redacted>")
            .field("public_key_pem", &self.public_key_pem)
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Generate an ed25519 keypair.
///
/// An empty passphrase produces an unencrypted PKCS#8 document.
pub fn generate_keypair(passphrase: &str) -> TrustResult<GeneratedKeyPair> {
    use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    let signing_key = SigningKey::generate(&mut rand::thread_rng());
    let verifying_key = signing_key.verifying_key();

    let private_key_pem = if passphrase.is_empty() {
        signing_key.to_pkcs8_pem(LineEnding::LF)
    } else {
        signing_key.to_pkcs8_encrypted_pem(&mut rand::thread_rng(), passphrase, LineEnding::LF)
    }
    .map_err(|e| TrustError::Authentication {
        message: format!("failed to encode private key as PKCS#8 PEM: {}", e),
    })?
    .to_string();

    let public_key_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| TrustError::decode(format!("failed to encode public key: {}", e)))?;

    let key_id = key_id_for(&verifying_key)?;

    Ok(GeneratedKeyPair {
        private_key_pem,
        public_key_pem,
        key_id,
    })
}

/// Compute the key id of a PEM public key.
pub fn compute_key_id(public_key: &str) -> TrustResult<String> {
    key_id_for(&load_verifying_key(public_key)?)
}

fn key_id_for(key: &VerifyingKey) -> TrustResult<String> {
    use pkcs8::EncodePublicKey;
    let doc = key
        .to_public_key_der()
        .map_err(|e| TrustError::decode(format!("failed to encode public key: {}", e)))?;
    Ok(sha256_prefixed(doc.as_bytes()))
}

/// Decode a PKCS#8 PEM private key, decrypting it when a passphrase is given.
fn load_signing_key(private_key: &str, passphrase: &str) -> TrustResult<SigningKey> {
    use pkcs8::DecodePrivateKey;

    let decoded = if passphrase.is_empty() {
        SigningKey::from_pkcs8_pem(private_key)
    } else {
        SigningKey::from_pkcs8_encrypted_pem(private_key, passphrase.as_bytes())
    };

    decoded.map_err(|e| TrustError::Authentication {
        message: format!("unable to load private key: {}", e),
    })
}

/// Decode an SPKI PEM public key.
fn load_verifying_key(public_key: &str) -> TrustResult<VerifyingKey> {
    use pkcs8::DecodePublicKey;

    VerifyingKey::from_public_key_pem(public_key)
        .map_err(|e| TrustError::decode(format!("invalid SPKI public key: {}", e)))
}

fn decode_signature(signature_b64: &str) -> TrustResult<Signature> {
    let bytes = BASE64
        .decode(signature_b64)
        .map_err(|e| TrustError::decode(format!("invalid base64 signature: {}", e)))?;

    Signature::from_slice(&bytes)
        .map_err(|e| TrustError::decode(format!("invalid signature bytes: {}", e)))
}

/// Build DSSE Pre-Authentication Encoding (PAE).
///
/// ```text
/// PAE(type, payload) = "DSSEv1" SP LEN(type) SP type SP LEN(payload) SP payload
/// ```
pub(crate) fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_len = payload_type.len().to_string();
    let payload_len = payload.len().to_string();

    let mut pae = Vec::new();
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(type_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_len.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

/// Default backend: ed25519 keys, signatures looked up through a [`SignatureSource`].
#[derive(Clone, Default)]
pub struct Ed25519Backend {
    source: Option<Arc<dyn SignatureSource>>,
}

impl std::fmt::Debug for Ed25519Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519Backend")
            .field("source", &self.source.is_some())
            .finish()
    }
}

impl Ed25519Backend {
    /// Backend without a signature source; image verification fails closed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that looks up published image signatures in `source`.
    pub fn with_source(source: Arc<dyn SignatureSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Produce a signature envelope for `image`.
    pub fn sign_image(
        &self,
        image: &ImageInfo,
        private_key: &str,
        passphrase: &str,
    ) -> TrustResult<DsseEnvelope> {
        let signing_key = load_signing_key(private_key, passphrase)?;
        let key_id = key_id_for(&signing_key.verifying_key())?;

        let payload = serde_json::to_vec(&SimpleSigningPayload::for_image(image))?;
        let pae = build_pae(PAYLOAD_TYPE_SIMPLE_SIGNING, &payload);
        let signature: Signature = signing_key.sign(&pae);

        Ok(DsseEnvelope {
            payload_type: PAYLOAD_TYPE_SIMPLE_SIGNING.to_string(),
            payload: BASE64.encode(&payload),
            signatures: vec![DsseSignature {
                key_id,
                signature: BASE64.encode(signature.to_bytes()),
            }],
        })
    }

    fn verify_envelope(
        &self,
        image: &ImageInfo,
        envelope: &DsseEnvelope,
        key: &VerifyingKey,
    ) -> TrustResult<()> {
        if envelope.signatures.is_empty() {
            return Err(TrustError::SignatureNotFound {
                subject: image.to_string(),
            });
        }

        if envelope.payload_type != PAYLOAD_TYPE_SIMPLE_SIGNING {
            return Err(TrustError::signature_invalid(format!(
                "payload type mismatch: expected {}, got {}",
                PAYLOAD_TYPE_SIMPLE_SIGNING, envelope.payload_type
            )));
        }

        let payload_bytes = BASE64
            .decode(&envelope.payload)
            .map_err(|e| TrustError::decode(format!("invalid base64 payload: {}", e)))?;

        let expected_key_id = key_id_for(key)?;
        let pae = build_pae(&envelope.payload_type, &payload_bytes);

        let mut last_error = None;
        for sig in &envelope.signatures {
            if !sig.key_id.is_empty() && sig.key_id != expected_key_id {
                last_error = Some(TrustError::signature_invalid(format!(
                    "no matching signatures: signed by {}",
                    sig.key_id
                )));
                continue;
            }

            let verified = decode_signature(&sig.signature).and_then(|signature| {
                key.verify(&pae, &signature)
                    .map_err(|_| TrustError::signature_invalid("no matching signatures"))
            });

            match verified {
                Ok(()) => {
                    let payload: SimpleSigningPayload = serde_json::from_slice(&payload_bytes)?;
                    return payload.check_binding(image);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| TrustError::signature_invalid("no matching signatures")))
    }
}

#[async_trait]
impl SignatureBackend for Ed25519Backend {
    fn sign(&self, data: &[u8], private_key: &str, passphrase: &str) -> TrustResult<String> {
        let signing_key = load_signing_key(private_key, passphrase)?;
        let signature: Signature = signing_key.sign(data);
        Ok(BASE64.encode(signature.to_bytes()))
    }

    fn verify_signature(&self, signature: &str, data: &[u8], public_key: &str) -> TrustResult<()> {
        let key = load_verifying_key(public_key)?;
        let signature = decode_signature(signature)?;

        key.verify(data, &signature)
            .map_err(|_| TrustError::signature_invalid("ed25519 verification failed"))
    }

    async fn verify_published_image_signature(
        &self,
        image: &ImageInfo,
        public_key: &str,
    ) -> TrustResult<()> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| TrustError::fetch("no signature source configured"))?;

        let key = load_verifying_key(public_key)?;

        debug!(image = %image, "looking up published signature");
        let envelope =
            source
                .fetch_signature(image)
                .await?
                .ok_or_else(|| TrustError::SignatureNotFound {
                    subject: image.to_string(),
                })?;

        self.verify_envelope(image, &envelope, &key)
    }
}
