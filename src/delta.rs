//! Block operations describing a target in terms of a base file.
//!
//! A patch is an ordered stream of copy and literal operations. Streams carry
//! `Result<BlockOperation>` items; an `Err` item is the terminal error marker,
//! so the three cases (copy, literal, error) are matched exhaustively.

use serde::{Deserialize, Serialize};

use crate::hash::StrongHash;

/// One unit of a patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockOperation {
    /// Copy base block `index` verbatim.
    Copy {
        /// Base block index.
        index: u64,
    },
    /// Insert bytes not found in the base file.
    Literal(Vec<u8>),
}

impl BlockOperation {
    /// Create a copy operation.
    #[must_use]
    pub const fn copy(index: u64) -> Self {
        Self::Copy { index }
    }

    /// Create a literal from a slice.
    #[must_use]
    pub fn literal_from_slice(data: &[u8]) -> Self {
        Self::Literal(data.to_vec())
    }

    /// Check if this is a copy operation.
    #[must_use]
    pub const fn is_copy(&self) -> bool {
        matches!(self, Self::Copy { .. })
    }

    /// Check if this is a literal operation.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

/// Record of a persisted patch stream.
///
/// Operations are followed by a single trailing digest of the encoded target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchRecord {
    /// Next operation.
    Op(BlockOperation),
    /// Content digest of the target, always the last record.
    Digest(StrongHash),
}

/// Statistics accumulated over an operation stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Number of copy operations.
    pub copy_ops: u64,
    /// Number of literal operations.
    pub literal_ops: u64,
    /// Total literal bytes.
    pub literal_bytes: u64,
}

impl DeltaStats {
    /// Account for one operation.
    pub fn record(&mut self, op: &BlockOperation) {
        match op {
            BlockOperation::Copy { .. } => self.copy_ops += 1,
            BlockOperation::Literal(data) => {
                self.literal_ops += 1;
                self.literal_bytes += data.len() as u64;
            }
        }
    }

    /// Total operations recorded.
    #[must_use]
    pub const fn op_count(&self) -> u64 {
        self.copy_ops + self.literal_ops
    }

    /// Fraction of target bytes reused from the base (0.0-1.0).
    ///
    /// `target_len` is the number of bytes the operations reconstruct.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // acceptable for ratio calculation
    pub fn reuse_ratio(&self, target_len: u64) -> f64 {
        if target_len == 0 {
            return 1.0;
        }
        let reused = target_len.saturating_sub(self.literal_bytes);
        reused as f64 / target_len as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_copy() {
        let op = BlockOperation::copy(3);
        assert!(op.is_copy());
        assert!(!op.is_literal());
        assert_eq!(op, BlockOperation::Copy { index: 3 });
    }

    #[test]
    fn op_literal_from_slice() {
        let op = BlockOperation::literal_from_slice(b"hello");
        assert!(op.is_literal());
        assert_eq!(op, BlockOperation::Literal(b"hello".to_vec()));
    }

    #[test]
    fn op_serde_roundtrip() {
        for op in [
            BlockOperation::copy(12345),
            BlockOperation::Literal(vec![1, 2, 3]),
        ] {
            let serialized = bincode::serialize(&op).unwrap();
            let restored: BlockOperation = bincode::deserialize(&serialized).unwrap();
            assert_eq!(op, restored);
        }
    }

    #[test]
    fn patch_record_serde_roundtrip() {
        let record = PatchRecord::Digest(StrongHash::compute(b"target"));
        let serialized = bincode::serialize(&record).unwrap();
        let restored: PatchRecord = bincode::deserialize(&serialized).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn stats_record_mixed() {
        let mut stats = DeltaStats::default();
        stats.record(&BlockOperation::literal_from_slice(b"prefix"));
        stats.record(&BlockOperation::copy(0));
        stats.record(&BlockOperation::copy(1));
        stats.record(&BlockOperation::literal_from_slice(b"suffix!"));

        assert_eq!(stats.copy_ops, 2);
        assert_eq!(stats.literal_ops, 2);
        assert_eq!(stats.literal_bytes, 13);
        assert_eq!(stats.op_count(), 4);
    }

    #[test]
    fn reuse_ratio() {
        let stats = DeltaStats {
            copy_ops: 1,
            literal_ops: 1,
            literal_bytes: 250,
        };
        assert!((stats.reuse_ratio(1000) - 0.75).abs() < f64::EPSILON);
        assert!((stats.reuse_ratio(0) - 1.0).abs() < f64::EPSILON);
    }
}
