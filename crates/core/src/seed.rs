//! Hierarchical seed derivation — every entity, sub-journey, and delay draw
//! gets an independent random stream that is a pure function of the root seed
//! and a path of string segments. Derivation never touches live RNG state, so
//! the result is identical regardless of call order or concurrency.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

/// A node in the seed-derivation tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedContext {
    seed: u64,
    path: String,
}

impl SeedContext {
    /// The root of a run's derivation tree.
    pub fn root(seed: u64) -> Self {
        Self {
            seed,
            path: String::new(),
        }
    }

    /// Derive a child context. Pure function of (parent seed, segment):
    /// SHA-256 over the parent seed's little-endian bytes and the segment,
    /// truncated to the first eight digest bytes.
    pub fn derive(&self, segment: &str) -> SeedContext {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") derivations distinct.
        hasher.update([0x1f]);
        hasher.update(segment.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);

        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.path, segment)
        };

        SeedContext {
            seed: u64::from_le_bytes(bytes),
            path,
        }
    }

    /// A fresh random stream seeded from this node. Every call returns an
    /// identical stream.
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Slash-joined derivation path from the root, for logging and debugging.
    pub fn path(&self) -> &str {
        &self.path
    }
}
