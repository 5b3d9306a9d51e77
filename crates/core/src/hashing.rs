//! Content digests for model inputs.
//!
//! The input registry identifies uploaded files by `(kind, digest)`; the
//! digest is the lowercase SHA-256 hex of the raw file bytes.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 of an input's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest the given bytes.
    pub fn of(content: &[u8]) -> Self {
        let hash = Sha256::digest(content);
        Self(format!("{hash:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
