//! Opaque identifiers naming one upload/processing lifecycle.
//!
//! Identifiers double as unauthenticated lookup keys for status
//! information, so they are drawn from the operating system's CSPRNG and
//! never from a seeded or thread-local generator.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes behind every generated identifier.
pub const ID_BYTES: usize = 4;

/// Rendered width of a generated identifier (lowercase hex).
pub const ID_LEN: usize = ID_BYTES * 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Draws a fresh identifier from the OS random source.
    ///
    /// # Panics
    ///
    /// Panics if the OS random source is unavailable. A predictable
    /// identifier would expose other users' status, so there is no
    /// fallback.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier has the shape produced by [`ImageId::generate`].
    pub fn is_canonical(&self) -> bool {
        self.0.len() == ID_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ImageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for ImageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_eight_lowercase_hex_chars() {
        for _ in 0..1_000 {
            let id = ImageId::generate();
            assert_eq!(id.as_str().len(), ID_LEN);
            assert!(id.is_canonical(), "not canonical: {id}");
        }
    }

    #[test]
    fn test_generated_ids_rarely_collide() {
        // 2^32 space; a handful of collisions in 10k draws would point at a
        // broken random source rather than bad luck.
        let ids: HashSet<_> = (0..10_000).map(|_| ImageId::generate()).collect();
        assert!(ids.len() >= 9_990);
    }

    #[test]
    fn test_non_generated_ids_are_not_canonical() {
        assert!(!ImageId::from("id1").is_canonical());
        assert!(!ImageId::from("A1B2C3D4").is_canonical());
        assert!(ImageId::from("a1b2c3d4").is_canonical());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = ImageId::from("a1b2c3d4");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a1b2c3d4\"");
    }
}
