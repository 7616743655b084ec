//! Serialization utilities
//!
//! SHA-256 digests, used wherever a value has to map to the same key on
//! every process and every release.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`
///
/// ```rust
/// use tooling::serialization::sha256_hex;
///
/// let digest = sha256_hex(b"hello");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, sha256_hex(b"hello"));
/// ```
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}

/// SHA-256 over several parts, each length-prefixed
///
/// Length prefixes keep `["ab", "c"]` and `["a", "bc"]` apart.
pub fn digest_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
