//! Block signatures and streaming fingerprint generation.
//!
//! A fingerprint is the ordered sequence of [`BlockSignature`]s of a base
//! file. It carries a rolling checksum and a strong hash per block, enabling
//! efficient block matching during delta computation.

use std::collections::VecDeque;
use std::io::{self, Read};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::checksum::RollingChecksum;
use crate::config::BlockSize;
use crate::error::{DeltaError, Result, Stage};
use crate::hash::StrongHash;

/// Signature for a single block in the base file.
///
/// Contains both the weak (rolling) checksum for fast filtering
/// and the strong (BLAKE3) hash for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Block index (0-based position in file).
    pub index: u64,
    /// Rolling checksum for fast matching.
    pub weak: u32,
    /// Strong cryptographic hash for verification.
    pub strong: StrongHash,
}

impl BlockSignature {
    /// Create a new block signature.
    #[must_use]
    pub const fn new(index: u64, weak: u32, strong: StrongHash) -> Self {
        Self {
            index,
            weak,
            strong,
        }
    }

    /// Compute the signature of a data block.
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the block in the base file
    /// * `data` - Block contents; only the final block may be short
    ///
    /// # Example
    ///
    /// ```rust
    /// use rdelta::{BlockSignature, RollingChecksum, StrongHash};
    ///
    /// let sig = BlockSignature::compute(3, b"block data");
    /// assert_eq!(sig.index, 3);
    /// assert_eq!(sig.weak, RollingChecksum::new(b"block data").digest());
    /// assert_eq!(sig.strong, StrongHash::compute(b"block data"));
    /// ```
    #[must_use]
    pub fn compute(index: u64, data: &[u8]) -> Self {
        Self {
            index,
            weak: RollingChecksum::new(data).digest(),
            strong: StrongHash::compute(data),
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Streaming signature generator over a base file.
///
/// Reads the base sequentially in block-size chunks (the last may be short)
/// and yields one [`BlockSignature`] per chunk in index order. Signatures of
/// a bounded batch of blocks are hashed in parallel.
///
/// An I/O failure yields the signatures of every block read completely
/// before it, then a single `Err` item. An observed cancellation yields the
/// `Err` at once. Either way the iterator is then exhausted and performs no
/// further reads.
///
/// # Example
///
/// ```rust
/// use rdelta::{BlockSize, Fingerprinter};
/// use tokio_util::sync::CancellationToken;
///
/// let base = vec![7u8; 2500];
/// let sigs: Vec<_> = Fingerprinter::new(&base[..], BlockSize::new(1024).unwrap(), CancellationToken::new())
///     .collect::<rdelta::Result<_>>()
///     .unwrap();
/// assert_eq!(sigs.len(), 3);
/// ```
#[derive(Debug)]
pub struct Fingerprinter<R> {
    reader: R,
    block_size: BlockSize,
    cancel: CancellationToken,
    next_index: u64,
    pending: VecDeque<BlockSignature>,
    batch: Vec<u8>,
    /// Error to yield once `pending` drains.
    failure: Option<DeltaError>,
    eof: bool,
    done: bool,
}

impl<R: Read> Fingerprinter<R> {
    /// Blocks read and hashed together per batch.
    pub const BATCH_BLOCKS: usize = 16;

    /// Create a fingerprinter over `reader`.
    ///
    /// # Arguments
    ///
    /// * `reader` - Base file contents, read sequentially exactly once
    /// * `block_size` - Block size the signatures are computed over
    /// * `cancel` - Checked before every block read
    pub fn new(reader: R, block_size: BlockSize, cancel: CancellationToken) -> Self {
        Self {
            reader,
            block_size,
            cancel,
            next_index: 0,
            pending: VecDeque::with_capacity(Self::BATCH_BLOCKS),
            batch: Vec::new(),
            failure: None,
            eof: false,
            done: false,
        }
    }

    /// Number of signatures yielded or buffered so far.
    #[must_use]
    pub const fn blocks_read(&self) -> u64 {
        self.next_index
    }

    fn cancelled(&self) -> Option<DeltaError> {
        self.cancel.is_cancelled().then_some(DeltaError::Cancelled {
            stage: Stage::Fingerprint,
        })
    }

    /// Read up to one batch of blocks and hash them.
    ///
    /// A failed read keeps the complete blocks before it and parks the
    /// error in `failure`.
    fn fill(&mut self) {
        let bs = self.block_size.get();
        self.batch.clear();

        for _ in 0..Self::BATCH_BLOCKS {
            if let Some(err) = self.cancelled() {
                self.failure = Some(err);
                break;
            }
            let start = self.batch.len();
            self.batch.resize(start + bs, 0);
            match read_full(&mut self.reader, &mut self.batch[start..]) {
                Ok(n) => {
                    self.batch.truncate(start + n);
                    if n < bs {
                        self.eof = true;
                        break;
                    }
                }
                Err(e) => {
                    self.batch.truncate(start);
                    let block = self.next_index + (start / bs) as u64;
                    self.failure = Some(DeltaError::Io(e).at(Stage::Fingerprint, block));
                    break;
                }
            }
        }

        let first = self.next_index;
        let sigs: Vec<BlockSignature> = if self.batch.len() > bs {
            self.batch
                .par_chunks(bs)
                .enumerate()
                .map(|(i, chunk)| BlockSignature::compute(first + i as u64, chunk))
                .collect()
        } else if self.batch.is_empty() {
            Vec::new()
        } else {
            vec![BlockSignature::compute(first, &self.batch)]
        };

        self.next_index += sigs.len() as u64;
        self.pending.extend(sigs);
    }
}

impl<R: Read> Iterator for Fingerprinter<R> {
    type Item = Result<BlockSignature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(err) = self.cancelled() {
            self.done = true;
            return Some(Err(err));
        }
        if self.pending.is_empty() && !self.eof && self.failure.is_none() {
            self.fill();
        }
        if let Some(sig) = self.pending.pop_front() {
            return Some(Ok(sig));
        }
        self.done = true;
        self.failure.take().map(Err)
    }
}
