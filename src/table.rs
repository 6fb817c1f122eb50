//! Lookup table for block matching.
//!
//! Uses a two-level lookup: first by weak checksum (fast), then by strong
//! hash (verification).

use rustc_hash::FxHashMap;

use crate::error::{DeltaError, Result, Stage};
use crate::hash::StrongHash;
use crate::signature::BlockSignature;

/// A base block sharing some weak checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Base block index.
    pub index: u64,
    /// Strong hash of that block.
    pub strong: StrongHash,
}

impl Candidate {
    /// Exact digest comparison against a freshly computed strong hash.
    #[must_use]
    pub fn confirms(&self, strong: &StrongHash) -> bool {
        self.strong == *strong
    }
}

/// Weak checksum → candidate blocks, built once per session.
///
/// Buckets keep insertion (base index) order, so the first confirming
/// candidate is also the lowest matching base index. Read-only once built.
#[derive(Debug, Default)]
pub struct LookupTable {
    /// `FxHashMap` for fast u32 keys.
    buckets: FxHashMap<u32, Vec<Candidate>>,
    block_count: u64,
}

impl LookupTable {
    /// Build a table from a complete signature sequence.
    ///
    /// The input may come straight from a [`Fingerprinter`](crate::Fingerprinter)
    /// or from a decoded fingerprint artifact.
    ///
    /// # Errors
    ///
    /// Fails on the first `Err` item or when indices are not contiguous from
    /// zero. No partial table is returned.
    pub fn from_signatures<I>(signatures: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<BlockSignature>>,
    {
        let mut table = Self::default();

        for item in signatures {
            let sig = item.map_err(|e| e.at(Stage::Table, table.block_count))?;
            if sig.index != table.block_count {
                return Err(DeltaError::NonContiguousSignature {
                    expected: table.block_count,
                    found: sig.index,
                });
            }
            table.buckets.entry(sig.weak).or_default().push(Candidate {
                index: sig.index,
                strong: sig.strong,
            });
            table.block_count += 1;
        }

        Ok(table)
    }

    /// Candidates for a weak checksum, in insertion order. Empty if none.
    #[must_use]
    pub fn candidates(&self, weak: u32) -> &[Candidate] {
        self.buckets
            .get(&weak)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check if a weak checksum has any candidates.
    #[must_use]
    pub fn has_weak_match(&self, weak: u32) -> bool {
        self.buckets.contains_key(&weak)
    }

    /// Find the base block whose content equals `window`.
    ///
    /// The strong hash of `window` is computed only if `weak` has candidates,
    /// and at most once. The first confirming candidate wins.
    #[must_use]
    pub fn find_match(&self, weak: u32, window: &[u8]) -> Option<u64> {
        let candidates = self.buckets.get(&weak)?;
        let strong = StrongHash::compute(window);
        candidates
            .iter()
            .find(|candidate| candidate.confirms(&strong))
            .map(|candidate| candidate.index)
    }

    /// Number of base blocks indexed.
    #[must_use]
    pub const fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Number of distinct weak checksums.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Check if the table indexes no blocks.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.block_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::RollingChecksum;

    fn sigs_of(blocks: &[&[u8]]) -> Vec<Result<BlockSignature>> {
        blocks
            .iter()
            .enumerate()
            .map(|(i, b)| Ok(BlockSignature::compute(i as u64, b)))
            .collect()
    }

    #[test]
    fn empty_table() {
        let table = LookupTable::from_signatures(Vec::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.bucket_count(), 0);
        assert!(table.candidates(0).is_empty());
    }

    #[test]
    fn find_match_exists() {
        let table = LookupTable::from_signatures(sigs_of(&[b"first", b"second"])).unwrap();

        let weak = RollingChecksum::new(b"second").digest();
        assert_eq!(table.find_match(weak, b"second"), Some(1));
        assert_eq!(table.block_count(), 2);
    }

    #[test]
    fn find_match_not_exists() {
        let table = LookupTable::from_signatures(sigs_of(&[b"stored block"])).unwrap();

        let weak = RollingChecksum::new(b"different data!").digest();
        assert_eq!(table.find_match(weak, b"different data!"), None);
    }

    #[test]
    fn weak_hit_strong_miss() {
        // Right weak value, different content.
        let table = LookupTable::from_signatures(sigs_of(&[b"ab"])).unwrap();
        let weak = RollingChecksum::new(b"ab").digest();

        assert!(table.has_weak_match(weak));
        assert_eq!(table.find_match(weak, b"zz"), None);
    }

    #[test]
    fn collisions_share_bucket_in_insertion_order() {
        // Identical blocks share weak and strong values.
        let block = [9u8; 64];
        let table =
            LookupTable::from_signatures(sigs_of(&[&block, b"other", &block, &block])).unwrap();

        let weak = RollingChecksum::new(&block).digest();
        let indices: Vec<u64> = table.candidates(weak).iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2, 3]);

        // Lowest index wins.
        assert_eq!(table.find_match(weak, &block), Some(0));
    }

    #[test]
    fn candidate_confirms_exact_digest() {
        let strong = StrongHash::compute(b"x");
        let candidate = Candidate { index: 0, strong };
        assert!(candidate.confirms(&StrongHash::compute(b"x")));
        assert!(!candidate.confirms(&StrongHash::compute(b"y")));
    }

    #[test]
    fn error_item_fails_construction() {
        let mut items = sigs_of(&[b"a", b"b"]);
        items.push(Err(DeltaError::Decode("truncated record".into())));
        items.push(Ok(BlockSignature::compute(2, b"c")));

        let err = LookupTable::from_signatures(items).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::Stage {
                stage: Stage::Table,
                position: 2,
                ..
            }
        ));
    }

    #[test]
    fn cancellation_item_stays_cancellation() {
        let items = vec![Err(DeltaError::Cancelled {
            stage: Stage::Fingerprint,
        })];
        let err = LookupTable::from_signatures(items).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn gap_in_indices_rejected() {
        let items = vec![
            Ok(BlockSignature::compute(0, b"a")),
            Ok(BlockSignature::compute(2, b"c")),
        ];
        let err = LookupTable::from_signatures(items).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::NonContiguousSignature {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn must_start_at_zero() {
        let items = vec![Ok(BlockSignature::compute(1, b"a"))];
        assert!(LookupTable::from_signatures(items).is_err());
    }
}
