//! Admission decisions.
//!
//! For every container image in a request:
//! 1. normalize the reference
//! 2. look up the chains claiming its bare name
//! 3. verify the published image signature against each chain's key
//!
//! Every claiming chain must accept the image. Images no chain claims pass.
//! Any error denies the whole request and is reported verbatim.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{TrustError, TrustResult};
use crate::reference::ImageInfo;
use crate::registry::{RegistrySnapshot, TrustRegistry};
use crate::signing::SignatureBackend;
use crate::trust::TrustConfig;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

fn default_api_version() -> String {
    ADMISSION_API_VERSION.to_string()
}

fn default_review_kind() -> String {
    ADMISSION_REVIEW_KIND.to_string()
}

/// Admission review envelope, request or response side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_review_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,

    #[serde(default)]
    pub kind: Option<GroupVersionKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    #[serde(default)]
    pub object: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub message: String,
}

/// Outcome of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl AdmissionResponse {
    pub fn from_decision(uid: impl Into<String>, decision: Decision) -> Self {
        match decision {
            Decision::Allow => Self {
                uid: uid.into(),
                allowed: true,
                status: None,
            },
            Decision::Deny { reason } => Self {
                uid: uid.into(),
                allowed: false,
                status: Some(ResponseStatus { message: reason }),
            },
        }
    }
}

impl AdmissionReview {
    /// Response-side review echoing the request's API version.
    pub fn respond(api_version: impl Into<String>, response: AdmissionResponse) -> Self {
        Self {
            api_version: api_version.into(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}

/// Path from the object root to the pod spec for a workload kind.
fn pod_spec_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "Pod" => Some("/spec"),
        "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet" | "Job"
        | "ReplicationController" => Some("/spec/template/spec"),
        "CronJob" => Some("/spec/jobTemplate/spec/template/spec"),
        _ => None,
    }
}

/// Container images named by an admission object.
///
/// `kind` falls back to the object's own `kind` field. Regular, init and
/// ephemeral containers are all included; a container without an image
/// yields an empty string, which fails normalization.
pub fn extract_images(kind: Option<&str>, object: &Value) -> Vec<String> {
    let kind = kind
        .or_else(|| object.get("kind").and_then(Value::as_str))
        .unwrap_or_default();

    let Some(spec) = pod_spec_pointer(kind).and_then(|pointer| object.pointer(pointer)) else {
        debug!(kind, "no pod spec in admission object");
        return Vec::new();
    };

    ["containers", "initContainers", "ephemeralContainers"]
        .iter()
        .filter_map(|field| spec.get(*field).and_then(Value::as_array))
        .flatten()
        .map(|container| {
            container
                .get("image")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

/// Per-request admission evaluation.
#[derive(Clone)]
pub struct AdmissionController {
    registry: TrustRegistry,
    backend: Arc<dyn SignatureBackend>,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    pub fn new(registry: TrustRegistry, backend: Arc<dyn SignatureBackend>) -> Self {
        Self { registry, backend }
    }

    pub fn registry(&self) -> &TrustRegistry {
        &self.registry
    }

    /// Decide on a list of image references.
    ///
    /// Uses the snapshot current when the call starts, for the whole call.
    pub async fn evaluate_images<I, S>(&self, images: I) -> Decision
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = self.registry.snapshot().await;
        match self.check_images(&snapshot, images).await {
            Ok(()) => Decision::Allow,
            Err(e) => Decision::Deny {
                reason: e.to_string(),
            },
        }
    }

    async fn check_images<I, S>(&self, snapshot: &RegistrySnapshot, images: I) -> TrustResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in images {
            let image = ImageInfo::parse(raw.as_ref())?;
            let repository = image.repository();

            let guids = snapshot.guids_for_image(&repository);
            if guids.is_empty() {
                debug!(image = %image, "no chain claims image");
                continue;
            }

            for guid in guids {
                let entry = snapshot.repo(guid).ok_or_else(|| {
                    TrustError::fetch(format!("no verification info registered for chain {}", guid))
                })?;
                let config = TrustConfig::from_verification_info(&entry.verification_info);

                if let Err(e) = config.verify_image(&image, self.backend.as_ref()).await {
                    warn!(image = %image, guid, error = %e, "image rejected");
                    return Err(e);
                }
                debug!(image = %image, guid, "image verified");
            }
        }
        Ok(())
    }

    /// Answer an admission review.
    pub async fn review(&self, review: AdmissionReview) -> AdmissionReview {
        let api_version = review.api_version;
        let Some(request) = review.request else {
            let decision = Decision::Deny {
                reason: "admission review carries no request".to_string(),
            };
            return AdmissionReview::respond(
                api_version,
                AdmissionResponse::from_decision("", decision),
            );
        };

        let kind = request.kind.as_ref().map(|gvk| gvk.kind.as_str());
        let images = extract_images(kind, &request.object);
        let decision = self.evaluate_images(&images).await;

        info!(
            uid = %request.uid,
            namespace = request.namespace.as_deref().unwrap_or_default(),
            name = request.name.as_deref().unwrap_or_default(),
            images = images.len(),
            allowed = decision.is_allowed(),
            "admission decision"
        );

        AdmissionReview::respond(
            api_version,
            AdmissionResponse::from_decision(request.uid, decision),
        )
    }
}
