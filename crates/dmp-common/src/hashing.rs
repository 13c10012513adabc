//! SHA-256 hashing for personally-identifying fields
//!
//! Legacy hospital files carry patient identifiers (HN, citizen ID,
//! names) that must never land in the warehouse in clear text. These
//! helpers produce a deterministic one-way digest of the *normalized*
//! value, so that the same person yields the same digest regardless of
//! padding or letter case in the source file.

use sha2::{Digest, Sha256};

/// Normalize a source value before hashing: trim surrounding
/// whitespace and case-fold.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Hash a PII value with SHA-256, returning the lowercase hex digest.
///
/// Returns `None` when the normalized value is empty. An absent
/// identifier must stay absent; hashing the empty string would give
/// every blank field the same valid-looking digest.
pub fn hash_pii(value: &str) -> Option<String> {
    let normalized = normalize(value);
    if normalized.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Some(hex::encode(hasher.finalize()))
}
