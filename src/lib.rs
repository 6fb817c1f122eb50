//! # rdelta
//!
//! Streaming rsync-style delta encoding in safe Rust.
//!
//! rdelta describes a target file as a sequence of block copies from a base
//! file plus literal bytes, without ever holding either file in memory.
//!
//! ## Features
//!
//! - **Rolling Checksum**: Adler-32 variant for O(1) window sliding
//! - **Strong Hash**: BLAKE3 for block confirmation and end-to-end digests
//! - **Streaming**: bounded memory for arbitrary file sizes
//! - **Pipelines**: cancellable tokio sessions with bounded stage queues
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use rdelta::{
//!     verify_digest, BlockSize, ContentDigest, DeltaEncoder, Fingerprinter, LookupTable,
//!     PatchApplier,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let bs = BlockSize::new(1024).unwrap();
//! let cancel = CancellationToken::new();
//!
//! // Fingerprint the base file and index its blocks
//! let base: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
//! let table = LookupTable::from_signatures(Fingerprinter::new(&base[..], bs, cancel.clone())).unwrap();
//!
//! // Encode a modified target against it
//! let mut target = base.clone();
//! target[100] ^= 0xFF;
//! let mut encoder = DeltaEncoder::new(&target[..], &table, bs, ContentDigest::new(), cancel.clone());
//! let ops: Vec<_> = encoder.by_ref().collect();
//! let expected = encoder.digest().finalize();
//!
//! // Apply the operations to reconstruct
//! let mut output = Vec::new();
//! let mut applier = PatchApplier::new(Cursor::new(&base), &mut output, bs, ContentDigest::new(), cancel).unwrap();
//! applier.apply(ops).unwrap();
//! verify_digest(&expected, &applier.digest().finalize()).unwrap();
//! drop(applier);
//! assert_eq!(output, target);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod apply;
pub mod artifact;
mod checksum;
mod config;
mod delta;
mod encoder;
mod error;
mod hash;
pub mod pipeline;
pub mod progress;
mod signature;
mod table;

pub use apply::{verify_digest, PatchApplier};
pub use artifact::{
    ArtifactHeader, FingerprintReader, FingerprintWriter, PatchReader, PatchWriter,
    FINGERPRINT_MAGIC, FORMAT_VERSION, PATCH_MAGIC,
};
pub use checksum::RollingChecksum;
pub use config::{BlockSize, SessionBuilder, SessionConfig};
pub use delta::{BlockOperation, DeltaStats, PatchRecord};
pub use encoder::DeltaEncoder;
pub use error::{DeltaError, Result, Stage};
pub use hash::{ContentDigest, DigestSink, StrongHash};
pub use pipeline::{
    fingerprint_path, DiffSummary, FingerprintSummary, PatchSummary, Session, Sink, Source,
};
pub use signature::{BlockSignature, Fingerprinter};
pub use table::{Candidate, LookupTable};
