use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};

/// SHA-256 of an image's bytes.
pub fn content_digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Content-hash set of images already accepted by a queue.
///
/// Entries live for the lifetime of the set; only a failed enqueue removes
/// its own claim.
///
/// Optional: the queue only consults it when dedup is enabled or a set is
/// injected with `WorkQueue::with_seen_set`.
#[derive(Debug, Default)]
pub struct SeenSet {
    digests: Mutex<HashSet<[u8; 32]>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a digest. Returns false when it was already present.
    pub fn insert(&self, digest: [u8; 32]) -> bool {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(digest)
    }

    pub fn contains(&self, digest: &[u8; 32]) -> bool {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(digest)
    }

    pub fn forget(&self, digest: &[u8; 32]) {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(digest);
    }

    pub fn len(&self) -> usize {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_first_sighting_only() {
        let seen = SeenSet::new();
        let digest = content_digest(b"png bytes");
        assert!(seen.insert(digest));
        assert!(!seen.insert(digest));
        assert!(seen.contains(&digest));
        seen.forget(&digest);
        assert!(seen.is_empty());
    }
}
