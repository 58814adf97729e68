//! Container image reference parsing.
//!
//! Follows the docker distribution reference grammar:
//! - `busybox` → `docker.io/busybox:latest`
//! - `myrepo/app:v2` → `docker.io/myrepo/app:v2`
//! - `ghcr.io/acme/app@sha256:...` → `ghcr.io/acme/app:latest@sha256:...`
//! - `localhost:5000/app` → kept as-is, tag defaulted
//!
//! The tag is defaulted to `latest` even when a digest pins the image.
//! Admission matching relies on this rendering, so it is kept unchanged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};

/// Registry used when a reference names none.
pub const DEFAULT_DOMAIN: &str = "docker.io";

/// Tag used when a reference names none.
pub const DEFAULT_TAG: &str = "latest";

/// Maximum length of the name part of a reference.
pub const NAME_TOTAL_LENGTH_MAX: usize = 255;

const DOMAIN_COMPONENT: &str = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
const PATH_COMPONENT: &str = r"[a-z0-9]+(?:(?:[._]|__|[-]*)[a-z0-9]+)*";
const TAG: &str = r"[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}";
const DIGEST: &str = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

fn domain_pattern() -> String {
    format!(r"{dc}(?:\.{dc})*(?::[0-9]+)?", dc = DOMAIN_COMPONENT)
}

fn name_pattern() -> String {
    format!(
        r"(?:{domain}/)?{pc}(?:/{pc})*",
        domain = domain_pattern(),
        pc = PATH_COMPONENT
    )
}

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^({name})(?::({tag}))?(?:@({digest}))?$",
        name = name_pattern(),
        tag = TAG,
        digest = DIGEST
    ))
    .expect("reference grammar must compile")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:({domain})/)?({pc}(?:/{pc})*)$",
        domain = domain_pattern(),
        pc = PATH_COMPONENT
    ))
    .expect("name grammar must compile")
});

/// A parsed, normalized image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Registry host, e.g. `docker.io`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry: String,

    /// Last path segment, e.g. `busybox`.
    pub name: String,

    /// Repository path including the name, e.g. `some-repository/busybox`.
    pub path: String,

    /// Image tag, e.g. `v2`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,

    /// Manifest digest, e.g. `sha256:128c...`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
}

impl ImageInfo {
    /// Parse and normalize an image reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use sigrun_core::ImageInfo;
    ///
    /// let info = ImageInfo::parse("myrepo/app").unwrap();
    /// assert_eq!(info.to_string(), "docker.io/myrepo/app:latest");
    /// assert_eq!(info.repository(), "docker.io/myrepo/app");
    /// ```
    pub fn parse(image: &str) -> TrustResult<Self> {
        let image = add_default_domain(image);

        let invalid = |reason: &str| TrustError::Reference {
            reference: image.clone(),
            reason: reason.to_string(),
        };

        if image.is_empty() {
            return Err(invalid("repository name must have at least one component"));
        }

        let caps = match REFERENCE_RE.captures(&image) {
            Some(caps) => caps,
            None => {
                if REFERENCE_RE.is_match(&image.to_lowercase()) {
                    return Err(invalid("repository name must be lowercase"));
                }
                return Err(invalid("invalid reference format"));
            }
        };

        let full_name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if full_name.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(invalid(&format!(
                "repository name must not be more than {} characters",
                NAME_TOTAL_LENGTH_MAX
            )));
        }

        let name_caps = NAME_RE
            .captures(full_name)
            .ok_or_else(|| invalid("invalid reference format"))?;
        let registry = name_caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let path = name_caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        let tag = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TAG.to_string());

        let digest = match caps.get(3) {
            Some(m) => {
                validate_digest(m.as_str()).map_err(|reason| invalid(&reason))?;
                m.as_str().to_string()
            }
            None => String::new(),
        };

        Ok(Self {
            registry,
            name,
            path,
            tag,
            digest,
        })
    }

    /// Reference without tag or digest: `registry/path`.
    pub fn repository(&self) -> String {
        if self.registry.is_empty() {
            self.path.clone()
        } else {
            format!("{}/{}", self.registry, self.path)
        }
    }

    /// Whether the reference pins a manifest digest.
    pub fn is_digested(&self) -> bool {
        !self.digest.is_empty()
    }
}

impl std::fmt::Display for ImageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.path, self.tag)?;
        if !self.digest.is_empty() {
            write!(f, "@{}", self.digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageInfo {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalize an image reference to `registry/path:tag[@digest]`.
pub fn normalize_image_name(image: &str) -> TrustResult<String> {
    Ok(ImageInfo::parse(image)?.to_string())
}

/// Prefix [`DEFAULT_DOMAIN`] unless the first segment already names a registry.
///
/// The first segment is treated as a registry when it contains `.` or `:`,
/// is `localhost`, or contains uppercase characters.
pub fn add_default_domain(image: &str) -> String {
    match image.find('/') {
        None => format!("{}/{}", DEFAULT_DOMAIN, image),
        Some(i) => {
            let first = &image[..i];
            if !first.contains(&['.', ':'][..])
                && first != "localhost"
                && first.to_lowercase() == first
            {
                format!("{}/{}", DEFAULT_DOMAIN, image)
            } else {
                image.to_string()
            }
        }
    }
}

fn validate_digest(digest: &str) -> Result<(), String> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| "invalid checksum digest format".to_string())?;

    let expected_len = match algorithm {
        "sha256" => 64,
        "sha384" => 96,
        "sha512" => 128,
        other => return Err(format!("unsupported digest algorithm: {}", other)),
    };

    if encoded.len() != expected_len
        || !encoded
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err("invalid checksum digest length or encoding".to_string());
    }

    Ok(())
}
