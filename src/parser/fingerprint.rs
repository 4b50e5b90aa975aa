//! Duplicate-suppression fingerprint: `stable_hash(cccc,
//! awips_id, issued_at, sha256(text))`. Adopted unchanged from the
//! definition this crate was asked to implement — not to be
//! second-guessed.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Compute the fingerprint for deduplication purposes.
///
/// Grounded on the SHA-256 chaining pattern in `audit.rs`'s
/// `AuditBlock::compute_hash`: hash the identifying fields plus a SHA-256
/// digest of the body text, then fold the digest down to a stable 64-bit
/// value via `DefaultHasher` (the LRU dedup window only needs equality,
/// not a full digest, and 64 bits is cheap to carry through the
/// pipeline).
pub fn fingerprint(cccc: &str, awips_id: &str, issued_at: DateTime<Utc>, text: &str) -> u64 {
    let mut body_hasher = Sha256::new();
    body_hasher.update(text.as_bytes());
    let body_digest = body_hasher.finalize();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    cccc.hash(&mut hasher);
    awips_id.hash(&mut hasher);
    issued_at.timestamp().hash(&mut hasher);
    body_digest.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_fingerprint() {
        let t = DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = fingerprint("KTOP", "TORTOP", t, "body text");
        let b = fingerprint("KTOP", "TORTOP", t, "body text");
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_changes_fingerprint() {
        let t = DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = fingerprint("KTOP", "TORTOP", t, "body text one");
        let b = fingerprint("KTOP", "TORTOP", t, "body text two");
        assert_ne!(a, b);
    }
}
