use sha2::{Digest, Sha256};

/// Generate a content hash for duplicate detection
///
/// SHA256 over the exact bytes received. Used as the last-resort dedup key
/// component when a sender gives us no stable identifier, so two deliveries of
/// the same body collapse to one event while any change produces a new one.
pub fn generate_payload_hash(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}

/// Short form of [`generate_payload_hash`] for use inside log-friendly keys.
pub fn short_payload_hash(body: &[u8]) -> String {
    let mut hash = generate_payload_hash(body);
    hash.truncate(16);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_payload_same_hash() {
        let body = br#"{"id":"evt_1","type":"ping"}"#;

        assert_eq!(generate_payload_hash(body), generate_payload_hash(body));
    }

    #[test]
    fn test_whitespace_changes_hash() {
        // Bytes are hashed as received; senders that reformat are new events.
        let compact = br#"{"id":"evt_1"}"#;
        let spaced = br#"{ "id": "evt_1" }"#;

        assert_ne!(generate_payload_hash(compact), generate_payload_hash(spaced));
    }

    #[test]
    fn test_hash_format() {
        let hash = generate_payload_hash(b"Test content");

        // SHA256 hash should be 64 hex characters
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_hash_is_prefix() {
        let body = b"payload";
        let full = generate_payload_hash(body);
        let short = short_payload_hash(body);

        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
    }

    #[test]
    fn test_empty_body() {
        let hash = generate_payload_hash(b"");
        assert_eq!(hash.len(), 64); // Still produces valid hash
    }
}
