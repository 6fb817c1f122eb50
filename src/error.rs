//! Error types for rdelta operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::hash::StrongHash;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Block signature generation over the base file.
    Fingerprint,
    /// Lookup table construction from a signature stream.
    Table,
    /// Rolling scan of the target data.
    Encode,
    /// Reconstruction of the target from base and operations.
    Apply,
    /// Reading or writing a persisted artifact.
    Artifact,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fingerprint => "fingerprint",
            Self::Table => "lookup table",
            Self::Encode => "encode",
            Self::Apply => "apply",
            Self::Artifact => "artifact",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during rdelta operations.
#[derive(Error, Debug)]
pub enum DeltaError {
    /// I/O error during open/read/write/seek.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or truncated signature/operation record.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The session's cancellation token fired.
    #[error("Cancelled during {stage}")]
    Cancelled {
        /// Stage that observed the cancellation.
        stage: Stage,
    },

    /// Reconstructed output does not hash to the digest recorded at encode time.
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Digest computed while encoding the target.
        expected: StrongHash,
        /// Digest computed over the reconstructed output.
        actual: StrongHash,
    },

    /// Requested block size outside the supported range.
    #[error("Invalid block size: {requested} (must be between {minimum} and {maximum})")]
    InvalidBlockSize {
        /// Requested block size.
        requested: usize,
        /// Smallest accepted block size.
        minimum: usize,
        /// Largest accepted block size.
        maximum: usize,
    },

    /// A record to be written does not fit the artifact framing.
    #[error("Record of {size} bytes exceeds the {maximum}-byte artifact limit")]
    RecordTooLarge {
        /// Serialized record size.
        size: u64,
        /// Largest accepted record payload.
        maximum: u32,
    },

    /// Artifact was produced with a different block size than the session uses.
    #[error("Block size mismatch: session uses {expected}, artifact has {found}")]
    BlockSizeMismatch {
        /// Session block size.
        expected: usize,
        /// Block size recorded in the artifact.
        found: usize,
    },

    /// Signature indices are not contiguous from zero.
    #[error("Non-contiguous signature: expected index {expected}, found {found}")]
    NonContiguousSignature {
        /// Next expected index.
        expected: u64,
        /// Index actually received.
        found: u64,
    },

    /// Copy operation references a block past the end of the base file.
    #[error("Copy of block {index} is out of range for base of {base_len} bytes")]
    CopyOutOfRange {
        /// Referenced block index.
        index: u64,
        /// Base file length in bytes.
        base_len: u64,
    },

    /// Base file does not exist.
    #[error("Base file does not exist: {}", .0.display())]
    MissingBase(PathBuf),

    /// Fingerprint artifact does not exist or is empty.
    #[error("Fingerprint does not exist or is empty: {}", .0.display())]
    MissingFingerprint(PathBuf),

    /// Error annotated with the stage and block index or byte offset it occurred at.
    #[error("{stage} failed at {position}: {source}")]
    Stage {
        /// Stage that failed.
        stage: Stage,
        /// Block index or byte offset within the stage.
        position: u64,
        /// Underlying cause.
        #[source]
        source: Box<DeltaError>,
    },

    /// A pipeline task panicked or was aborted.
    #[error("Pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DeltaError {
    /// Attach stage and position context.
    ///
    /// Cancellation and integrity errors are returned unchanged so callers can
    /// still match on them directly.
    #[must_use]
    pub fn at(self, stage: Stage, position: u64) -> Self {
        match self {
            Self::Cancelled { .. } | Self::IntegrityMismatch { .. } | Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                position,
                source: Box::new(other),
            },
        }
    }

    /// True if this error (or its wrapped cause) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// True if this error (or its wrapped cause) is an integrity mismatch.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            Self::IntegrityMismatch { .. } => true,
            Self::Stage { source, .. } => source.is_integrity_failure(),
            _ => false,
        }
    }

    pub(crate) fn decode(err: impl fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<bincode::Error> for DeltaError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(io) => Self::Io(io),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Result type for rdelta operations.
pub type Result<T> = std::result::Result<T, DeltaError>;
