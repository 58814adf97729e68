use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 without an algorithm prefix (used for GUIDs).
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `sha256:<lowercase-hex>` form used for key ids.
pub(crate) fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(bytes))
}
