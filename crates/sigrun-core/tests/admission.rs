//! Integration tests for admission decisions.
//!
//! Chains are built in memory, registered by first use, and images are
//! signed into a directory signature store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use sigrun_core::{
    generate_keypair, AdmissionController, AdmissionReview, Decision, DirSignatureSource,
    DsseEnvelope, Ed25519Backend, GeneratedKeyPair, ImageInfo, KeyPairConfig, MemoryChainStore,
    RegistrySnapshot, SignatureBackend, TrustConfig, TrustRegistry, TrustResult,
};

/// Backend wrapper counting published-signature checks.
struct CountingBackend {
    inner: Ed25519Backend,
    image_checks: AtomicUsize,
}

#[async_trait]
impl SignatureBackend for CountingBackend {
    fn sign(&self, data: &[u8], private_key: &str, passphrase: &str) -> TrustResult<String> {
        self.inner.sign(data, private_key, passphrase)
    }

    fn verify_signature(&self, signature: &str, data: &[u8], public_key: &str) -> TrustResult<()> {
        self.inner.verify_signature(signature, data, public_key)
    }

    async fn verify_published_image_signature(
        &self,
        image: &ImageInfo,
        public_key: &str,
    ) -> TrustResult<()> {
        self.image_checks.fetch_add(1, Ordering::SeqCst);
        self.inner
            .verify_published_image_signature(image, public_key)
            .await
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    signatures: Arc<DirSignatureSource>,
    backend: Arc<CountingBackend>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let signatures = Arc::new(DirSignatureSource::new(dir.path()));
        let backend = Arc::new(CountingBackend {
            inner: Ed25519Backend::with_source(signatures.clone()),
            image_checks: AtomicUsize::new(0),
        });
        Self {
            _dir: dir,
            signatures,
            backend,
        }
    }

    fn checks(&self) -> usize {
        self.backend.image_checks.load(Ordering::SeqCst)
    }

    fn controller(&self, snapshot: RegistrySnapshot) -> AdmissionController {
        AdmissionController::new(TrustRegistry::from_snapshot(snapshot), self.backend.clone())
    }

    fn envelope(&self, image: &str, keys: &[&GeneratedKeyPair]) -> DsseEnvelope {
        let info = ImageInfo::parse(image).unwrap();
        let mut envelopes = keys
            .iter()
            .map(|k| self.backend.inner.sign_image(&info, &k.private_key_pem, "").unwrap());
        let mut merged = envelopes.next().expect("at least one key");
        for other in envelopes {
            merged.signatures.extend(other.signatures);
        }
        merged
    }

    async fn publish(&self, image: &str, keys: &[&GeneratedKeyPair]) {
        let info = ImageInfo::parse(image).unwrap();
        let envelope = self.envelope(image, keys);
        self.signatures
            .write_signature(&info, &envelope)
            .await
            .unwrap();
    }
}

/// Chain with a single genesis record; returns its store and key.
async fn new_chain(name: &str, images: &[&str]) -> (MemoryChainStore, GeneratedKeyPair) {
    let keys = generate_keypair("").unwrap();
    let store = MemoryChainStore::new();
    let mut genesis: TrustConfig = KeyPairConfig::new(name, keys.public_key_pem.clone())
        .with_private_key(keys.private_key_pem.clone())
        .with_images(images.iter().copied())
        .into();
    genesis.initialize_repository(&store).await.unwrap();
    (store, keys)
}

fn deny_reason(decision: Decision) -> String {
    match decision {
        Decision::Deny { reason } => reason,
        Decision::Allow => panic!("expected deny"),
    }
}

#[tokio::test]
async fn test_signed_image_allowed() {
    let fx = Fixture::new();
    let (chain, keys) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    fx.publish("ghcr.io/acme/app:v1", &[&keys]).await;

    let decision = fx.controller(snapshot).evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert_eq!(decision, Decision::Allow);
    assert_eq!(fx.checks(), 1);
}

#[tokio::test]
async fn test_unclaimed_image_allowed_without_checks() {
    let fx = Fixture::new();
    let (chain, _) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    let decision = fx
        .controller(snapshot)
        .evaluate_images(["busybox", "ghcr.io/other/app:v3"])
        .await;
    assert_eq!(decision, Decision::Allow);
    assert_eq!(fx.checks(), 0);
}

#[tokio::test]
async fn test_missing_signature_denied() {
    let fx = Fixture::new();
    let (chain, _) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    let decision = fx.controller(snapshot).evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert_eq!(
        deny_reason(decision),
        "signature not found for ghcr.io/acme/app:v1"
    );
}

#[tokio::test]
async fn test_signature_from_unregistered_key_denied() {
    let fx = Fixture::new();
    let (chain, _) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    let stranger = generate_keypair("").unwrap();
    fx.publish("ghcr.io/acme/app:v1", &[&stranger]).await;

    let decision = fx.controller(snapshot).evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert!(deny_reason(decision).starts_with("invalid signature"));
}

#[tokio::test]
async fn test_image_claimed_by_two_chains_needs_both() {
    let fx = Fixture::new();
    let (chain_a, keys_a) = new_chain("team-a", &["ghcr.io/acme/app"]).await;
    let (chain_b, keys_b) = new_chain("team-b", &["ghcr.io/acme/app", "nginx"]).await;

    let (guid_a, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain_a, fx.backend.as_ref())
        .await
        .unwrap();
    let (guid_b, snapshot) = snapshot
        .add_repository(&chain_b, fx.backend.as_ref())
        .await
        .unwrap();
    assert_ne!(guid_a, guid_b);
    assert_eq!(snapshot.guids_for_image("ghcr.io/acme/app").len(), 2);

    let controller = fx.controller(snapshot);

    // Only one of the two claimants signed
    fx.publish("ghcr.io/acme/app:v1", &[&keys_a]).await;
    let decision = controller.evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert!(!decision.is_allowed());

    fx.publish("ghcr.io/acme/app:v1", &[&keys_b]).await;
    let decision = controller.evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert!(!decision.is_allowed());

    // Both claimants signed
    fx.publish("ghcr.io/acme/app:v1", &[&keys_a, &keys_b]).await;
    let decision = controller.evaluate_images(["ghcr.io/acme/app:v1"]).await;
    assert_eq!(decision, Decision::Allow);
}

#[tokio::test]
async fn test_first_failure_short_circuits() {
    let fx = Fixture::new();
    let (chain, keys) = new_chain("acme", &["ghcr.io/acme/app", "ghcr.io/acme/worker"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    fx.publish("ghcr.io/acme/worker:v1", &[&keys]).await;

    let decision = fx
        .controller(snapshot)
        .evaluate_images(["ghcr.io/acme/app:v1", "ghcr.io/acme/worker:v1"])
        .await;
    assert!(!decision.is_allowed());
    assert_eq!(fx.checks(), 1);
}

#[tokio::test]
async fn test_unparsable_image_denied() {
    let fx = Fixture::new();
    let decision = fx
        .controller(RegistrySnapshot::default())
        .evaluate_images(["ghcr.io/Acme/App"])
        .await;
    assert!(deny_reason(decision).starts_with("invalid image reference"));
}

#[tokio::test]
async fn test_dangling_guid_denied() {
    let fx = Fixture::new();
    let mut snapshot = RegistrySnapshot::default();
    snapshot
        .image_to_guids
        .entry("ghcr.io/acme/app".to_string())
        .or_default()
        .insert("deadbeef".to_string());

    let decision = fx.controller(snapshot).evaluate_images(["ghcr.io/acme/app"]).await;
    assert!(deny_reason(decision).contains("deadbeef"));
}

#[tokio::test]
async fn test_rotation_needs_registry_update() {
    let fx = Fixture::new();
    let (chain, _old_keys) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (guid, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    let new_keys = generate_keypair("").unwrap();
    let mut next: TrustConfig = KeyPairConfig::new("acme", new_keys.public_key_pem.clone())
        .with_private_key(new_keys.private_key_pem.clone())
        .with_images(["ghcr.io/acme/app"])
        .into();
    next.commit_repository_update(&chain, fx.backend.as_ref(), "")
        .await
        .unwrap();

    fx.publish("ghcr.io/acme/app:v2", &[&new_keys]).await;

    let controller = fx.controller(snapshot.clone());
    let stale = controller.evaluate_images(["ghcr.io/acme/app:v2"]).await;
    assert!(!stale.is_allowed());

    let updated = snapshot
        .update_repository(&guid, &chain, fx.backend.as_ref())
        .await
        .unwrap();
    assert_eq!(updated.repo(&guid).unwrap().verification_info.chain_no, 1);

    controller.registry().replace(updated).await;
    let fresh = controller.evaluate_images(["ghcr.io/acme/app:v2"]).await;
    assert_eq!(fresh, Decision::Allow);
}

#[tokio::test]
async fn test_update_from_foreign_chain_rejected() {
    let fx = Fixture::new();
    let (chain, _) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (impostor, _) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (guid, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();

    let result = snapshot
        .update_repository(&guid, &impostor, fx.backend.as_ref())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_review_roundtrip() {
    let fx = Fixture::new();
    let (chain, keys) = new_chain("acme", &["ghcr.io/acme/app"]).await;
    let (_, snapshot) = RegistrySnapshot::default()
        .add_repository(&chain, fx.backend.as_ref())
        .await
        .unwrap();
    fx.publish("ghcr.io/acme/app:v1", &[&keys]).await;
    let controller = fx.controller(snapshot);

    let review = |image: &str| -> AdmissionReview {
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "namespace": "default",
                "operation": "CREATE",
                "object": {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "spec": {"containers": [{"name": "app", "image": image}]}
                }
            }
        }))
        .unwrap()
    };

    let allowed = controller.review(review("ghcr.io/acme/app:v1")).await;
    let response = allowed.response.unwrap();
    assert_eq!(response.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
    assert!(response.allowed);
    assert!(response.status.is_none());

    let denied = controller.review(review("ghcr.io/acme/app:v2")).await;
    let json = serde_json::to_value(&denied).unwrap();
    assert_eq!(json["response"]["allowed"], false);
    assert_eq!(
        json["response"]["status"]["message"],
        "signature not found for ghcr.io/acme/app:v2"
    );
}
