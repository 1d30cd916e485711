use lantern_types::BlobKey;

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is prepended to every hash computation, so keys produced
/// for payloads can never collide with hashes computed for other purposes
/// over the same bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored payloads.
    pub const BLOB: Self = Self {
        domain: "lantern-blob-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> BlobKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        BlobKey::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected key.
    pub fn verify(&self, data: &[u8], expected: &BlobKey) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = ContentHasher::BLOB.hash(b"response body");
        let b = ContentHasher::BLOB.hash(b"response body");
        assert_eq!(a, b);
    }

    #[test]
    fn different_domains_produce_different_keys() {
        let other = ContentHasher::new("lantern-other-v1");
        assert_ne!(ContentHasher::BLOB.hash(b"x"), other.hash(b"x"));
    }

    #[test]
    fn verify_detects_tampering() {
        let key = ContentHasher::BLOB.hash(b"original");
        assert!(ContentHasher::BLOB.verify(b"original", &key));
        assert!(!ContentHasher::BLOB.verify(b"tampered", &key));
    }
}
