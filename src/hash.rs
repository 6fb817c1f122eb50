//! Strong hash and whole-content digests using BLAKE3.
//!
//! BLAKE3 confirms block matches after the rolling checksum identifies
//! candidates, and also produces the end-to-end content digest compared
//! between encoding and applying.

use serde::{Deserialize, Serialize};

/// Strong cryptographic hash for block verification.
///
/// Equal strong hashes are treated as equal content.
///
/// # Example
///
/// ```rust
/// use rdelta::StrongHash;
///
/// let hash1 = StrongHash::compute(b"hello world");
/// let hash2 = StrongHash::compute(b"hello world");
/// assert_eq!(hash1, hash2);
/// assert_ne!(hash1, StrongHash::compute(b"different data"));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongHash([u8; 32]);

impl StrongHash {
    /// Compute BLAKE3 hash of data.
    ///
    /// # Arguments
    ///
    /// * `data` - Byte slice to hash
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::StrongHash;
    ///
    /// let hash = StrongHash::compute(b"test data");
    /// assert_ne!(hash, StrongHash::zero());
    /// ```
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create a `StrongHash` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the hash.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create a zero hash.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }
}

impl std::fmt::Debug for StrongHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        write!(f, "StrongHash({:016x}...)", u64::from_be_bytes(prefix))
    }
}

impl std::fmt::Display for StrongHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Default for StrongHash {
    fn default() -> Self {
        Self::zero()
    }
}

impl AsRef<[u8]> for StrongHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Accumulator fed with every content byte, in order.
///
/// The encoder feeds it every byte read from the target; the applier feeds it
/// every byte written to the output.
pub trait DigestSink {
    /// Absorb the next run of content bytes.
    fn update(&mut self, data: &[u8]);
}

impl DigestSink for blake3::Hasher {
    fn update(&mut self, data: &[u8]) {
        blake3::Hasher::update(self, data);
    }
}

impl<D: DigestSink + ?Sized> DigestSink for &mut D {
    fn update(&mut self, data: &[u8]) {
        (**self).update(data);
    }
}

/// Whole-content BLAKE3 digest with a running byte count.
///
/// Feeding the same bytes in any split yields the same digest, which equals
/// [`StrongHash::compute`] over the concatenation.
///
/// # Example
///
/// ```rust
/// use rdelta::{ContentDigest, DigestSink, StrongHash};
///
/// let mut digest = ContentDigest::new();
/// digest.update(b"hello ");
/// digest.update(b"world");
///
/// assert_eq!(digest.bytes(), 11);
/// assert_eq!(digest.finalize(), StrongHash::compute(b"hello world"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ContentDigest {
    hasher: blake3::Hasher,
    bytes: u64,
}

impl ContentDigest {
    /// Create an empty digest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes absorbed so far.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Digest of everything absorbed so far.
    ///
    /// Does not reset the accumulator; more bytes may follow.
    #[must_use]
    pub fn finalize(&self) -> StrongHash {
        StrongHash::from_bytes(*self.hasher.finalize().as_bytes())
    }
}

impl DigestSink for ContentDigest {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }
}
