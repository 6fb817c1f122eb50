//! Streaming delta encoder.
//!
//! Scans target data with a rolling window, consults a [`LookupTable`] built
//! from the base file's signatures, and emits copy/literal operations in
//! target order.
//!
//! ```text
//!            lit_start        pos           pos + window
//!                │             │                 │
//!   buf:  ...... [ pending lit ][     window      ][ read-ahead ]
//! ```
//!
//! On a match the pending literal is flushed, a copy is emitted, and the
//! window jumps a full block. Otherwise the oldest window byte joins the
//! pending literal and the window rolls by one. At end of stream the window
//! shrinks from the front, so a target tail can still match the base's short
//! final block.

use std::collections::VecDeque;
use std::io::Read;

use tokio_util::sync::CancellationToken;

use crate::checksum::RollingChecksum;
use crate::config::{BlockSize, SessionConfig};
use crate::delta::BlockOperation;
use crate::error::{DeltaError, Result, Stage};
use crate::hash::DigestSink;
use crate::signature::read_full;
use crate::table::LookupTable;

/// Rolling-window encoder over a target stream.
///
/// Yields `Result<BlockOperation>` items lazily; memory stays bounded by a
/// few blocks regardless of target size. Every byte read from the target is
/// fed to the digest sink in order. After an `Err` item the iterator is
/// exhausted.
///
/// # Example
///
/// ```rust
/// use rdelta::{BlockOperation, BlockSize, ContentDigest, DeltaEncoder, Fingerprinter, LookupTable};
/// use tokio_util::sync::CancellationToken;
///
/// let bs = BlockSize::new(1024).unwrap();
/// let base = vec![1u8; 2048];
/// let table = LookupTable::from_signatures(Fingerprinter::new(&base[..], bs, CancellationToken::new())).unwrap();
///
/// let target = base.clone();
/// let ops: Vec<_> = DeltaEncoder::new(&target[..], &table, bs, ContentDigest::new(), CancellationToken::new())
///     .collect::<rdelta::Result<_>>()
///     .unwrap();
/// assert_eq!(ops, vec![BlockOperation::copy(0), BlockOperation::copy(0)]);
/// ```
#[derive(Debug)]
pub struct DeltaEncoder<'t, R, H> {
    reader: R,
    table: &'t LookupTable,
    block_size: usize,
    literal_limit: usize,
    digest: H,
    cancel: CancellationToken,
    /// Pending literal, window, and read-ahead bytes.
    buf: Vec<u8>,
    /// Target offset of `buf[0]`.
    base_offset: u64,
    lit_start: usize,
    pos: usize,
    rolling: RollingChecksum,
    /// `rolling` describes the current window.
    seeded: bool,
    since_check: usize,
    eof: bool,
    finished: bool,
    done: bool,
    queue: VecDeque<BlockOperation>,
}

impl<'t, R: Read, H: DigestSink> DeltaEncoder<'t, R, H> {
    /// Create an encoder flushing literals at one block.
    pub fn new(
        reader: R,
        table: &'t LookupTable,
        block_size: BlockSize,
        digest: H,
        cancel: CancellationToken,
    ) -> Self {
        let bs = block_size.get();
        Self {
            reader,
            table,
            block_size: bs,
            literal_limit: bs,
            digest,
            cancel,
            buf: Vec::with_capacity(bs * 3),
            base_offset: 0,
            lit_start: 0,
            pos: 0,
            rolling: RollingChecksum::empty(),
            seeded: false,
            since_check: 0,
            eof: false,
            finished: false,
            done: false,
            queue: VecDeque::with_capacity(2),
        }
    }

    /// Flush pending literal bytes once they reach `limit` bytes.
    ///
    /// Clamped to at least one block and at most
    /// [`SessionConfig::MAX_LITERAL_LEN`].
    #[must_use]
    pub fn with_literal_limit(mut self, limit: usize) -> Self {
        self.literal_limit = limit.clamp(self.block_size, SessionConfig::MAX_LITERAL_LEN);
        self
    }

    /// Digest sink fed so far.
    pub const fn digest(&self) -> &H {
        &self.digest
    }

    /// Consume the encoder, returning its digest sink.
    pub fn into_digest(self) -> H {
        self.digest
    }

    /// Target bytes read so far.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.base_offset + self.buf.len() as u64
    }

    fn cancelled() -> DeltaError {
        DeltaError::Cancelled {
            stage: Stage::Encode,
        }
    }

    /// Append up to one block of target data, feeding the digest.
    fn fill(&mut self) -> Result<()> {
        if self.lit_start > 0 {
            self.buf.drain(..self.lit_start);
            self.base_offset += self.lit_start as u64;
            self.pos -= self.lit_start;
            self.lit_start = 0;
        }

        let start = self.buf.len();
        let offset = self.bytes_read();
        self.buf.resize(start + self.block_size, 0);
        let n = read_full(&mut self.reader, &mut self.buf[start..])
            .map_err(|e| DeltaError::Io(e).at(Stage::Encode, offset))?;
        self.buf.truncate(start + n);
        self.digest.update(&self.buf[start..]);
        if n < self.block_size {
            self.eof = true;
        }
        Ok(())
    }

    fn flush_literal(&mut self) {
        if self.pos > self.lit_start {
            let data = self.buf[self.lit_start..self.pos].to_vec();
            self.queue.push_back(BlockOperation::Literal(data));
            self.lit_start = self.pos;
        }
    }

    /// Scan until at least one operation is queued or the target is exhausted.
    fn advance(&mut self) -> Result<()> {
        loop {
            let avail = self.buf.len() - self.pos;

            // Rolling needs the window plus the byte entering it.
            if !self.eof && avail <= self.block_size {
                self.fill()?;
                continue;
            }

            if avail == 0 {
                self.flush_literal();
                self.finished = true;
                return Ok(());
            }

            let win = avail.min(self.block_size);
            if !self.seeded {
                self.rolling = RollingChecksum::new(&self.buf[self.pos..self.pos + win]);
                self.seeded = true;
            }
            debug_assert_eq!(self.rolling.len(), win);

            let weak = self.rolling.digest();
            if let Some(index) = self
                .table
                .find_match(weak, &self.buf[self.pos..self.pos + win])
            {
                self.flush_literal();
                self.queue.push_back(BlockOperation::copy(index));
                self.pos += win;
                self.lit_start = self.pos;
                self.seeded = false;
                return Ok(());
            }

            let old = self.buf[self.pos];
            if avail > self.block_size {
                self.rolling.roll(old, self.buf[self.pos + self.block_size]);
            } else {
                self.rolling.pop(old);
            }
            self.pos += 1;

            if self.pos - self.lit_start >= self.literal_limit {
                self.flush_literal();
                return Ok(());
            }

            self.since_check += 1;
            if self.since_check >= self.block_size {
                self.since_check = 0;
                if self.cancel.is_cancelled() {
                    return Err(Self::cancelled());
                }
            }
        }
    }
}

impl<R: Read, H: DigestSink> Iterator for DeltaEncoder<'_, R, H> {
    type Item = Result<BlockOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(Self::cancelled()));
        }
        loop {
            if let Some(op) = self.queue.pop_front() {
                return Some(Ok(op));
            }
            if self.finished {
                self.done = true;
                return None;
            }
            if let Err(err) = self.advance() {
                self.done = true;
                self.queue.clear();
                return Some(Err(err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{ContentDigest, StrongHash};
    use crate::signature::Fingerprinter;
    use std::io;

    const BS: usize = 1024;

    fn bs(size: usize) -> BlockSize {
        BlockSize::new(size).unwrap()
    }

    /// Deterministic non-periodic bytes.
    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    fn table_for(base: &[u8], block_size: usize) -> LookupTable {
        LookupTable::from_signatures(Fingerprinter::new(
            base,
            bs(block_size),
            CancellationToken::new(),
        ))
        .unwrap()
    }

    fn encode(base: &[u8], target: &[u8], block_size: usize) -> (Vec<BlockOperation>, StrongHash) {
        let table = table_for(base, block_size);
        let mut encoder = DeltaEncoder::new(
            target,
            &table,
            bs(block_size),
            ContentDigest::new(),
            CancellationToken::new(),
        );
        let ops = encoder.by_ref().collect::<Result<Vec<_>>>().unwrap();
        (ops, encoder.digest().finalize())
    }

    fn reconstruct(base: &[u8], ops: &[BlockOperation], block_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for op in ops {
            match op {
                BlockOperation::Copy { index } => {
                    let start = *index as usize * block_size;
                    let end = (start + block_size).min(base.len());
                    out.extend_from_slice(&base[start..end]);
                }
                BlockOperation::Literal(data) => out.extend_from_slice(data),
            }
        }
        out
    }

    fn literal_bytes(ops: &[BlockOperation]) -> Vec<u8> {
        ops.iter()
            .filter_map(|op| match op {
                BlockOperation::Literal(data) => Some(data.as_slice()),
                BlockOperation::Copy { .. } => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    // ==========================================================================
    // MATCHING
    // ==========================================================================

    #[test]
    fn identical_files_all_copies() {
        let base = noise(BS * 5, 1);
        let (ops, _) = encode(&base, &base, BS);
        let expected: Vec<_> = (0..5).map(BlockOperation::copy).collect();
        assert_eq!(ops, expected);
    }

    #[test]
    fn empty_target_no_ops() {
        let base = noise(BS * 2, 2);
        let (ops, digest) = encode(&base, b"", BS);
        assert!(ops.is_empty());
        assert_eq!(digest, StrongHash::compute(b""));
    }

    #[test]
    fn empty_base_all_literal() {
        let target = noise(BS * 3 + 17, 3);
        let (ops, _) = encode(b"", &target, BS);

        assert!(ops.iter().all(BlockOperation::is_literal));
        assert_eq!(literal_bytes(&ops), target);
    }

    #[test]
    fn mid_block_edit_degrades_only_its_block() {
        let block = 4096;
        let base = noise(12 * 1024, 4);
        let mut target = base.clone();
        target[6000..6010].copy_from_slice(b"NOVELBYTES");

        let (ops, _) = encode(&base, &target, block);

        assert_eq!(
            ops,
            vec![
                BlockOperation::copy(0),
                BlockOperation::literal_from_slice(&target[4096..8192]),
                BlockOperation::copy(2),
            ]
        );
    }

    #[test]
    fn short_final_block_matched_as_copy() {
        let base = noise(BS * 2 + 952, 5);
        let (ops, _) = encode(&base, &base, BS);
        assert_eq!(
            ops,
            vec![
                BlockOperation::copy(0),
                BlockOperation::copy(1),
                BlockOperation::copy(2)
            ]
        );
    }

    #[test]
    fn short_final_block_matched_after_literal_prefix() {
        let base = noise(BS * 2 + 952, 6);
        let mut target = noise(100, 60);
        target.extend_from_slice(&base);

        let (ops, _) = encode(&base, &target, BS);
        assert_eq!(
            ops,
            vec![
                BlockOperation::literal_from_slice(&target[..100]),
                BlockOperation::copy(0),
                BlockOperation::copy(1),
                BlockOperation::copy(2),
            ]
        );
    }

    #[test]
    fn base_shorter_than_block() {
        let base = noise(300, 7);
        let (ops, _) = encode(&base, &base, BS);
        assert_eq!(ops, vec![BlockOperation::copy(0)]);
    }

    #[test]
    fn insertion_shifts_without_losing_matches() {
        let base = noise(BS * 8, 8);
        let mut target = b"hello".to_vec();
        target.extend_from_slice(&base);

        let (ops, _) = encode(&base, &target, BS);
        assert_eq!(ops[0], BlockOperation::literal_from_slice(b"hello"));
        assert_eq!(ops.iter().filter(|op| op.is_copy()).count(), 8);
    }

    #[test]
    fn repeated_block_uses_lowest_index() {
        let block = noise(BS, 9);
        let mut base = block.clone();
        base.extend_from_slice(&noise(BS, 10));
        base.extend_from_slice(&block);

        let (ops, _) = encode(&base, &block, BS);
        assert_eq!(ops, vec![BlockOperation::copy(0)]);
    }

    #[test]
    fn reordered_blocks() {
        let base = noise(BS * 3, 11);
        let mut target = base[BS * 2..].to_vec();
        target.extend_from_slice(&base[..BS * 2]);

        let (ops, _) = encode(&base, &target, BS);
        assert_eq!(
            ops,
            vec![
                BlockOperation::copy(2),
                BlockOperation::copy(0),
                BlockOperation::copy(1)
            ]
        );
    }

    // ==========================================================================
    // STREAMING PROPERTIES
    // ==========================================================================

    #[test]
    fn digest_covers_every_target_byte() {
        let base = noise(BS * 4, 12);
        let mut target = base.clone();
        target.extend_from_slice(&noise(777, 13));
        target[10] ^= 0xFF;

        let (ops, digest) = encode(&base, &target, BS);
        assert_eq!(digest, StrongHash::compute(&target));
        assert_eq!(reconstruct(&base, &ops, BS), target);
    }

    #[test]
    fn literals_bounded_by_limit() {
        let target = noise(BS * 10 + 5, 14);
        let (ops, _) = encode(&noise(BS * 2, 15), &target, BS);

        assert!(ops.iter().all(|op| match op {
            BlockOperation::Literal(data) => !data.is_empty() && data.len() <= BS,
            BlockOperation::Copy { .. } => true,
        }));
    }

    #[test]
    fn custom_literal_limit() {
        let target = noise(BS * 4, 16);
        let table = table_for(b"", BS);
        let ops: Vec<_> = DeltaEncoder::new(
            &target[..],
            &table,
            bs(BS),
            ContentDigest::new(),
            CancellationToken::new(),
        )
        .with_literal_limit(BS * 2)
        .collect::<Result<_>>()
        .unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(literal_bytes(&ops), target);
    }

    #[test]
    fn literal_limit_clamped_to_record_bound() {
        let table = table_for(b"", BS);
        let encoder = |limit| {
            DeltaEncoder::new(
                &b""[..],
                &table,
                bs(BS),
                ContentDigest::new(),
                CancellationToken::new(),
            )
            .with_literal_limit(limit)
            .literal_limit
        };

        assert_eq!(encoder(0), BS);
        assert_eq!(encoder(usize::MAX), SessionConfig::MAX_LITERAL_LEN);
    }

    #[test]
    fn bytes_read_tracks_target() {
        let target = noise(BS * 3 + 10, 17);
        let table = table_for(&target, BS);
        let mut encoder = DeltaEncoder::new(
            &target[..],
            &table,
            bs(BS),
            ContentDigest::new(),
            CancellationToken::new(),
        );
        encoder.by_ref().for_each(drop);
        assert_eq!(encoder.bytes_read(), target.len() as u64);
        assert_eq!(encoder.into_digest().bytes(), target.len() as u64);
    }

    // ==========================================================================
    // ERRORS AND CANCELLATION
    // ==========================================================================

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    #[test]
    fn io_error_ends_stream() {
        let table = table_for(b"", BS);
        let items: Vec<_> = DeltaEncoder::new(
            FailingReader,
            &table,
            bs(BS),
            ContentDigest::new(),
            CancellationToken::new(),
        )
        .collect();

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(DeltaError::Stage {
                stage: Stage::Encode,
                ..
            })
        ));
    }

    #[test]
    fn cancelled_before_first_op() {
        let table = table_for(b"", BS);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let items: Vec<_> =
            DeltaEncoder::new(&b"data"[..], &table, bs(BS), ContentDigest::new(), cancel)
                .collect();

        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn cancelled_between_ops() {
        let base = noise(BS * 6, 18);
        let table = table_for(&base, BS);
        let cancel = CancellationToken::new();
        let mut encoder = DeltaEncoder::new(
            &base[..],
            &table,
            bs(BS),
            ContentDigest::new(),
            cancel.clone(),
        );

        assert_eq!(encoder.next().unwrap().unwrap(), BlockOperation::copy(0));
        cancel.cancel();
        assert!(encoder.next().unwrap().unwrap_err().is_cancelled());
        assert!(encoder.next().is_none());
    }

    #[test]
    fn cancelled_during_long_literal_scan() {
        // No matches at all: cancellation is still observed mid-scan.
        let target = noise(BS * 50, 19);
        let table = table_for(&noise(BS, 20), BS);
        let cancel = CancellationToken::new();
        let mut encoder = DeltaEncoder::new(
            &target[..],
            &table,
            bs(BS),
            ContentDigest::new(),
            cancel.clone(),
        )
        .with_literal_limit(BS * 4);

        assert!(encoder.next().unwrap().is_ok());
        cancel.cancel();
        let rest: Vec<_> = encoder.collect();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].as_ref().unwrap_err().is_cancelled());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            /// Encoding then reconstructing yields the target byte for byte
            #[test]
            fn roundtrip(
                base in prop::collection::vec(any::<u8>(), 0..6000),
                edits in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 0..8),
                suffix in prop::collection::vec(any::<u8>(), 0..1500)
            ) {
                let mut target = base.clone();
                for (at, byte) in edits {
                    if !target.is_empty() {
                        let i = at.index(target.len());
                        target[i] = byte;
                    }
                }
                target.extend_from_slice(&suffix);

                let (ops, digest) = encode(&base, &target, BS);
                prop_assert_eq!(reconstruct(&base, &ops, BS), target.clone());
                prop_assert_eq!(digest, StrongHash::compute(&target));
            }

            /// Unmodified target encodes to copies only
            #[test]
            fn identical_is_all_copies(base in prop::collection::vec(any::<u8>(), 1..6000)) {
                let (ops, _) = encode(&base, &base, BS);
                prop_assert!(ops.iter().all(BlockOperation::is_copy));
                prop_assert_eq!(ops.len(), base.len().div_ceil(BS));
            }
        }
    }
}
