//! Lookup of published image signatures.
//!
//! Envelopes are stored next to the image name using the cosign tag scheme:
//!
//! ```text
//! <registry>/<path>/sha256-<hex>.sig   (digest-pinned references)
//! <registry>/<path>/<tag>.sig          (tag references)
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::HttpOptions;
use crate::error::{TrustError, TrustResult};
use crate::reference::ImageInfo;
use crate::signing::DsseEnvelope;

/// Where published signatures come from.
#[async_trait]
pub trait SignatureSource: Send + Sync {
    /// Fetch the envelope for `image`. `Ok(None)` means nothing is published.
    async fn fetch_signature(&self, image: &ImageInfo) -> TrustResult<Option<DsseEnvelope>>;
}

/// Relative location of the envelope for `image`.
pub fn signature_path(image: &ImageInfo) -> String {
    let leaf = match image.digest.split_once(':') {
        Some((algorithm, encoded)) => format!("{}-{}.sig", algorithm, encoded),
        None => format!("{}.sig", image.tag),
    };
    format!("{}/{}", image.repository(), leaf)
}

/// Signature store served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSignatureSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSignatureSource {
    pub fn new(base_url: impl Into<String>, options: &HttpOptions) -> TrustResult<Self> {
        Ok(Self {
            client: options.build_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, image: &ImageInfo) -> String {
        format!("{}/{}", self.base_url, signature_path(image))
    }
}

#[async_trait]
impl SignatureSource for HttpSignatureSource {
    async fn fetch_signature(&self, image: &ImageInfo) -> TrustResult<Option<DsseEnvelope>> {
        let url = self.url(image);
        debug!(url = %url, "fetching signature envelope");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
            status => Err(TrustError::fetch(format!(
                "signature lookup for {} returned HTTP {}",
                image, status
            ))),
        }
    }
}

/// Signature store in a local directory.
#[derive(Debug, Clone)]
pub struct DirSignatureSource {
    root: PathBuf,
}

impl DirSignatureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, image: &ImageInfo) -> PathBuf {
        self.root.join(signature_path(image))
    }

    /// Store an envelope for `image`, replacing any previous one.
    pub async fn write_signature(
        &self,
        image: &ImageInfo,
        envelope: &DsseEnvelope,
    ) -> TrustResult<PathBuf> {
        let path = self.path_for(image);
        let bytes = serde_json::to_vec_pretty(envelope)?;
        crate::store::fs::write_atomic(&path, &bytes).await?;
        Ok(path)
    }
}

#[async_trait]
impl SignatureSource for DirSignatureSource {
    async fn fetch_signature(&self, image: &ImageInfo) -> TrustResult<Option<DsseEnvelope>> {
        let path = self.path_for(image);
        debug!(path = %path.display(), "reading signature envelope");

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::fetch(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::DsseSignature;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DIGEST_HEX: &str = "128c6e3534b842a2eec139999b8ce8aa9a2af9907e2b9269550809d18cd832a3";

    fn envelope() -> DsseEnvelope {
        DsseEnvelope {
            payload_type: "application/vnd.dev.cosign.simplesigning.v1+json".to_string(),
            payload: "e30=".to_string(),
            signatures: vec![DsseSignature {
                key_id: "sha256:abc".to_string(),
                signature: "c2ln".to_string(),
            }],
        }
    }

    #[test]
    fn test_signature_path_by_tag() {
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();
        assert_eq!(signature_path(&image), "ghcr.io/acme/app/v1.sig");
    }

    #[test]
    fn test_signature_path_by_digest() {
        let image = ImageInfo::parse(&format!("acme/app@sha256:{}", DIGEST_HEX)).unwrap();
        assert_eq!(
            signature_path(&image),
            format!("docker.io/acme/app/sha256-{}.sig", DIGEST_HEX)
        );
    }

    #[tokio::test]
    async fn test_dir_source_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirSignatureSource::new(dir.path());
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();

        assert!(source.fetch_signature(&image).await.unwrap().is_none());

        let written = source.write_signature(&image, &envelope()).await.unwrap();
        assert!(written.ends_with("ghcr.io/acme/app/v1.sig"));
        assert_eq!(
            source.fetch_signature(&image).await.unwrap(),
            Some(envelope())
        );
    }

    #[tokio::test]
    async fn test_dir_source_corrupt_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirSignatureSource::new(dir.path());
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();

        let path = dir.path().join("ghcr.io/acme/app/v1.sig");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let result = source.fetch_signature(&image).await;
        assert!(matches!(result, Err(TrustError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_http_source_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ghcr.io/acme/app/v1.sig"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope()))
            .mount(&server)
            .await;

        let source = HttpSignatureSource::new(server.uri(), &HttpOptions::default()).unwrap();
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();

        assert_eq!(
            source.fetch_signature(&image).await.unwrap(),
            Some(envelope())
        );
    }

    #[tokio::test]
    async fn test_http_source_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpSignatureSource::new(server.uri(), &HttpOptions::default()).unwrap();
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();

        assert!(source.fetch_signature(&image).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_source_server_error_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = HttpSignatureSource::new(server.uri(), &HttpOptions::default()).unwrap();
        let image = ImageInfo::parse("ghcr.io/acme/app:v1").unwrap();

        let err = source.fetch_signature(&image).await.unwrap_err();
        assert!(err.is_fetch_failure());
    }
}
