//! The block-hashing primitive: out of scope as an algorithm per the spec,
//! specified only at its trait boundary. `Blake3AdlerPrimitive` is the
//! default implementation, grounded directly in the teacher's delta engine
//! (`src/core/delta/checksum.rs`), which pairs a BLAKE3 strong hash with an
//! Adler-32 weak hash for its block signatures.

use adler2::Adler32;

/// Given a block of bytes, produce its strong hash and, if requested, its
/// weak hash. Implementations are free to use any algorithm; the pipeline
/// only depends on this boundary.
pub trait BlockHashPrimitive: Send + Sync {
    /// Content-defined strong hash of `block`.
    fn strong_hash(&self, block: &[u8]) -> Vec<u8>;

    /// Cheap rolling/non-rolling weak hash of `block`, computed only when
    /// `UseWeakHashes` is set.
    fn weak_hash(&self, block: &[u8]) -> u32;
}

/// BLAKE3 strong hash, Adler-32 weak hash — the same pair the sync engine's
/// delta signatures already use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake3AdlerPrimitive;

impl BlockHashPrimitive for Blake3AdlerPrimitive {
    fn strong_hash(&self, block: &[u8]) -> Vec<u8> {
        blake3::hash(block).as_bytes().to_vec()
    }

    fn weak_hash(&self, block: &[u8]) -> u32 {
        let mut adler = Adler32::new();
        adler.write_slice(block);
        adler.checksum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_hash_is_deterministic() {
        let primitive = Blake3AdlerPrimitive;
        let a = primitive.strong_hash(b"hello world");
        let b = primitive.strong_hash(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn strong_hash_differs_for_different_content() {
        let primitive = Blake3AdlerPrimitive;
        assert_ne!(primitive.strong_hash(b"a"), primitive.strong_hash(b"b"));
    }

    #[test]
    fn weak_hash_is_deterministic() {
        let primitive = Blake3AdlerPrimitive;
        assert_eq!(primitive.weak_hash(b"block"), primitive.weak_hash(b"block"));
    }
}
