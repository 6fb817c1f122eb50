//! Patch application: rebuild a target from a base file and block operations.

use std::io::{Read, Seek, SeekFrom, Write};

use tokio_util::sync::CancellationToken;

use crate::config::BlockSize;
use crate::delta::BlockOperation;
use crate::error::{DeltaError, Result, Stage};
use crate::hash::{DigestSink, StrongHash};

/// Writes the target described by an operation stream.
///
/// Copy operations read block `index` from the seekable base; the final base
/// block may be short. Literal operations are written verbatim. Every byte
/// written is also fed to the digest sink.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use rdelta::{BlockOperation, BlockSize, ContentDigest, PatchApplier};
/// use tokio_util::sync::CancellationToken;
///
/// let base = b"0123456789".repeat(200);
/// let ops = vec![
///     Ok(BlockOperation::copy(1)),
///     Ok(BlockOperation::literal_from_slice(b"tail")),
/// ];
///
/// let mut out = Vec::new();
/// let mut applier = PatchApplier::new(
///     Cursor::new(&base),
///     &mut out,
///     BlockSize::new(1024).unwrap(),
///     ContentDigest::new(),
///     CancellationToken::new(),
/// )
/// .unwrap();
/// applier.apply(ops).unwrap();
/// drop(applier);
///
/// assert_eq!(out.len(), 2000 - 1024 + 4);
/// ```
#[derive(Debug)]
pub struct PatchApplier<B, W, H> {
    base: B,
    output: W,
    block_size: BlockSize,
    digest: H,
    cancel: CancellationToken,
    base_len: u64,
    buf: Vec<u8>,
    ops_applied: u64,
    bytes_written: u64,
}

impl<B: Read + Seek, W: Write, H: DigestSink> PatchApplier<B, W, H> {
    /// Create an applier, measuring the base length.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the base cannot be seeked.
    pub fn new(
        mut base: B,
        output: W,
        block_size: BlockSize,
        digest: H,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let base_len = base
            .seek(SeekFrom::End(0))
            .map_err(|e| DeltaError::Io(e).at(Stage::Apply, 0))?;
        Ok(Self {
            base,
            output,
            block_size,
            digest,
            cancel,
            base_len,
            buf: Vec::with_capacity(block_size.get()),
            ops_applied: 0,
            bytes_written: 0,
        })
    }

    /// Base file length in bytes.
    #[must_use]
    pub const fn base_len(&self) -> u64 {
        self.base_len
    }

    /// Operations applied so far.
    #[must_use]
    pub const fn ops_applied(&self) -> u64 {
        self.ops_applied
    }

    /// Bytes written to the output so far.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Digest sink fed so far.
    pub const fn digest(&self) -> &H {
        &self.digest
    }

    /// Consume the applier, returning the output and the digest sink.
    pub fn into_parts(self) -> (W, H) {
        (self.output, self.digest)
    }

    /// Apply a single operation.
    ///
    /// # Errors
    ///
    /// Returns `CopyOutOfRange` for a copy past the end of the base, or an
    /// I/O error on seek, read, or write failure.
    pub fn apply_op(&mut self, op: &BlockOperation) -> Result<()> {
        let position = self.ops_applied;
        match op {
            BlockOperation::Copy { index } => {
                let offset = index
                    .checked_mul(self.block_size.as_u64())
                    .filter(|offset| *offset < self.base_len)
                    .ok_or(DeltaError::CopyOutOfRange {
                        index: *index,
                        base_len: self.base_len,
                    })?;
                let remaining = usize::try_from(self.base_len - offset).unwrap_or(usize::MAX);
                let len = remaining.min(self.block_size.get());
                self.buf.resize(len, 0);

                self.base
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| self.base.read_exact(&mut self.buf))
                    .map_err(|e| DeltaError::Io(e).at(Stage::Apply, position))?;
                self.output
                    .write_all(&self.buf)
                    .map_err(|e| DeltaError::Io(e).at(Stage::Apply, position))?;
                self.digest.update(&self.buf);
                self.bytes_written += len as u64;
            }
            BlockOperation::Literal(data) => {
                self.output
                    .write_all(data)
                    .map_err(|e| DeltaError::Io(e).at(Stage::Apply, position))?;
                self.digest.update(data);
                self.bytes_written += data.len() as u64;
            }
        }
        self.ops_applied += 1;
        Ok(())
    }

    /// Apply every operation in order, then flush the output.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Aborts on the first `Err` item, failed operation, or observed
    /// cancellation.
    pub fn apply<I>(&mut self, ops: I) -> Result<u64>
    where
        I: IntoIterator<Item = Result<BlockOperation>>,
    {
        for item in ops {
            if self.cancel.is_cancelled() {
                return Err(DeltaError::Cancelled {
                    stage: Stage::Apply,
                });
            }
            let op = item.map_err(|e| e.at(Stage::Apply, self.ops_applied))?;
            self.apply_op(&op)?;
        }
        self.output
            .flush()
            .map_err(|e| DeltaError::Io(e).at(Stage::Apply, self.ops_applied))?;
        Ok(self.bytes_written)
    }
}

/// Compare the encoder's digest against the reconstruction's.
///
/// # Errors
///
/// Returns `IntegrityMismatch` if they differ.
pub fn verify_digest(expected: &StrongHash, actual: &StrongHash) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DeltaError::IntegrityMismatch {
            expected: *expected,
            actual: *actual,
        })
    }
}
