//! Error types for trust-chain and admission operations.

/// Trust errors.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Image reference could not be parsed.
    #[error("invalid image reference: {reference} - {reason}")]
    Reference { reference: String, reason: String },

    /// A record, snapshot or signature could not be fetched.
    #[error("fetch failed: {message}")]
    Fetch { message: String },

    /// No signature was published for the subject.
    #[error("signature not found for {subject}")]
    SignatureNotFound { subject: String },

    /// A signature exists but does not verify.
    #[error("invalid signature: {reason}")]
    SignatureInvalid { reason: String },

    /// Malformed encoding (base64, PEM, JSON).
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The chain does not link up, or its head does not match.
    #[error("chain integrity violated at position {chain_no}: {reason}")]
    ChainIntegrity { chain_no: i64, reason: String },

    /// Commit attempted without any change to the config.
    #[error("config has not changed")]
    NoChange,

    /// Operation is not available for this config mode.
    #[error("{operation} is not implemented for {mode} configs")]
    NotImplemented {
        mode: &'static str,
        operation: &'static str,
    },

    /// Bad passphrase or unusable private key material.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The archival store already holds a genesis record.
    #[error("repository already initialized at {location}")]
    AlreadyInitialized { location: String },

    /// Structural validation of a config failed.
    #[error("invalid config: {message}")]
    Validation { message: String },

    /// Local persistence failed.
    #[error("store error: {message}")]
    Store { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl TrustError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Input / config issues
            Self::Reference { .. } => 1,
            Self::Config { .. } => 1,
            Self::Validation { .. } => 1,

            // Key holder issues
            Self::Authentication { .. } => 2,

            // Lifecycle refusals
            Self::NoChange => 3,
            Self::AlreadyInitialized { .. } => 3,

            // Trust failures (higher priority)
            Self::SignatureNotFound { .. } => 4,
            Self::SignatureInvalid { .. } => 4,
            Self::Decode { .. } => 4,
            Self::ChainIntegrity { .. } => 4,

            // Network/transient
            Self::Fetch { .. } => 5,

            // Other
            Self::Store { .. } => 6,
            Self::NotImplemented { .. } => 7,
        }
    }

    /// Whether the error came from reaching a remote or local source.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. })
    }

    pub(crate) fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn signature_invalid(reason: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for TrustError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Fetch {
                message: format!("request timed out: {}", err),
            };
        }
        Self::Fetch {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;
