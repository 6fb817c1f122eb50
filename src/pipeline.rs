//! Session orchestration: fingerprint, diff, and patch pipelines.
//!
//! Each session runs its synchronous stages on `spawn_blocking` threads,
//! connected by bounded `tokio::sync::mpsc` channels:
//!
//! ```text
//! fingerprint:  Fingerprinter ──▶ FingerprintWriter
//! diff:         FingerprintReader ─▶ LookupTable ─▶ DeltaEncoder ──▶ PatchWriter
//! patch:        PatchReader ──▶ PatchApplier ─▶ digest check
//! ```
//!
//! A full channel blocks the producer and an empty one blocks the consumer,
//! so memory stays bounded by the channel capacity. All stages share the
//! session's `CancellationToken`. When a session fails or is cancelled, any
//! partially written file it created is removed before the error is returned.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{self, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::apply::{verify_digest, PatchApplier};
use crate::artifact::{FingerprintReader, FingerprintWriter, PatchReader, PatchWriter};
use crate::config::{BlockSize, SessionConfig};
use crate::delta::{BlockOperation, DeltaStats, PatchRecord};
use crate::encoder::DeltaEncoder;
use crate::error::{DeltaError, Result, Stage};
use crate::hash::{ContentDigest, StrongHash};
use crate::progress::{Progress, ProgressReporter};
use crate::signature::Fingerprinter;
use crate::table::LookupTable;

/// Where a session reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Standard input.
    Stdin,
    /// A file on disk.
    File(PathBuf),
}

/// Where a session writes its output to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// Standard output. Never removed on failure.
    Stdout,
    /// A file on disk, removed if the session fails.
    File(PathBuf),
}

impl Source {
    /// `Stdin` for `None`, otherwise the given file.
    #[must_use]
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Stdin, Self::File)
    }
}

impl Sink {
    /// `Stdout` for `None`, otherwise the given file.
    #[must_use]
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Stdout, Self::File)
    }
}

/// Result of a fingerprint session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintSummary {
    /// Fingerprint artifact written.
    pub path: PathBuf,
    /// Number of block signatures.
    pub blocks: u64,
    /// Base file length in bytes.
    pub base_len: u64,
}

/// Result of a diff session.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffSummary {
    /// Operation statistics.
    pub stats: DeltaStats,
    /// Content digest of the target, recorded in the patch trailer.
    pub digest: StrongHash,
    /// Target bytes read.
    pub target_len: u64,
    /// The fingerprint was missing or empty and had to be generated.
    pub regenerated_fingerprint: bool,
}

/// Result of a patch session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    /// Bytes written to the output.
    pub bytes: u64,
    /// Verified content digest of the output.
    pub digest: StrongHash,
}

/// Path of the fingerprint artifact for `base`: `<base>.fingerprint`.
#[must_use]
pub fn fingerprint_path(base: &Path) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(".fingerprint");
    PathBuf::from(path)
}

/// One fingerprint/diff/patch session.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use rdelta::{Session, SessionBuilder, Sink, Source};
///
/// # async fn run() -> rdelta::Result<()> {
/// let session = Session::new(SessionBuilder::new().block_size(4096).build()?);
/// let base = Path::new("base.bin");
///
/// session.fingerprint(base).await?;
/// let diff = session
///     .diff(base, Source::File("new.bin".into()), Sink::File("new.patch".into()))
///     .await?;
/// println!("{} ops, digest {}", diff.stats.op_count(), diff.digest);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session with a fresh cancellation token.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Create a session observing an existing cancellation token.
    #[must_use]
    pub const fn with_cancel(config: SessionConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    /// Session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Token cancelling every stage of this session.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fingerprint `base` into `<base>.fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns `MissingBase` if the base does not exist, or the first I/O,
    /// cancellation, or task error. The artifact is removed on failure.
    pub async fn fingerprint(&self, base: &Path) -> Result<FingerprintSummary> {
        self.fingerprint_to(base, &fingerprint_path(base)).await
    }

    /// Fingerprint `base` into `artifact`.
    ///
    /// # Errors
    ///
    /// See [`Session::fingerprint`].
    pub async fn fingerprint_to(&self, base: &Path, artifact: &Path) -> Result<FingerprintSummary> {
        let base_len = base_len(base).await?;
        let block_size = self.config.block_size;
        let total = block_size.blocks_for(base_len);
        info!(
            base = %base.display(),
            artifact = %artifact.display(),
            %block_size,
            blocks = total,
            "generating fingerprint"
        );

        let progress = Arc::new(Progress::new(total));
        let reporter =
            ProgressReporter::spawn("fingerprint", Arc::clone(&progress), self.config.progress);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let producer = {
            let base = base.to_path_buf();
            let cancel = self.cancel.clone();
            task::spawn_blocking(move || match File::open(&base) {
                Ok(file) => forward(Fingerprinter::new(file, block_size, cancel), &tx),
                Err(e) => forward(
                    iter::once(Err(DeltaError::Io(e).at(Stage::Fingerprint, 0))),
                    &tx,
                ),
            })
        };

        let consumer = {
            let artifact = artifact.to_path_buf();
            let progress = Arc::clone(&progress);
            task::spawn_blocking(move || -> Result<u64> {
                let file = File::create(&artifact)
                    .map_err(|e| DeltaError::Io(e).at(Stage::Artifact, 0))?;
                let mut writer = FingerprintWriter::new(BufWriter::new(file), block_size)?;
                for item in ChannelIter(rx) {
                    let sig = item?;
                    trace!(index = sig.index, weak = sig.weak, strong = %sig.strong, "block signature");
                    writer.write(&sig)?;
                    progress.inc();
                }
                let blocks = writer.records();
                writer.finish()?;
                Ok(blocks)
            })
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        reporter.finish().await;

        match join_stages(produced, consumed) {
            Ok((_, blocks)) => {
                info!(blocks, base_len, "fingerprint complete");
                Ok(FingerprintSummary {
                    path: artifact.to_path_buf(),
                    blocks,
                    base_len,
                })
            }
            Err(err) => {
                remove_partial(artifact).await;
                Err(err)
            }
        }
    }

    /// Encode `source` against `base`, writing a patch to `sink`.
    ///
    /// The fingerprint `<base>.fingerprint` is generated first if it is
    /// missing or empty.
    ///
    /// # Errors
    ///
    /// Returns `MissingBase`, `BlockSizeMismatch` for a fingerprint made with
    /// another block size, or the first I/O, decode, cancellation, or task
    /// error. A partially written patch file is removed on failure, as is a
    /// fingerprint this session generated if the session is cancelled.
    pub async fn diff(&self, base: &Path, source: Source, sink: Sink) -> Result<DiffSummary> {
        base_len(base).await?;
        let fingerprint = fingerprint_path(base);

        let regenerated = if fingerprint_missing(&fingerprint).await {
            debug!(path = %fingerprint.display(), "fingerprint missing or empty, regenerating");
            self.fingerprint_to(base, &fingerprint).await?;
            true
        } else {
            false
        };

        info!(base = %base.display(), ?source, ?sink, "computing delta");
        match self.encode(&fingerprint, source, &sink).await {
            Ok((stats, digest, target_len)) => {
                info!(
                    copy_ops = stats.copy_ops,
                    literal_ops = stats.literal_ops,
                    literal_bytes = stats.literal_bytes,
                    target_len,
                    %digest,
                    "delta complete"
                );
                Ok(DiffSummary {
                    stats,
                    digest,
                    target_len,
                    regenerated_fingerprint: regenerated,
                })
            }
            Err(err) => {
                if let Sink::File(path) = &sink {
                    remove_partial(path).await;
                }
                if regenerated && err.is_cancelled() {
                    remove_partial(&fingerprint).await;
                }
                Err(err)
            }
        }
    }

    /// Rebuild a target from `base` and the patch read from `source`.
    ///
    /// # Errors
    ///
    /// Returns `MissingBase` or `MissingFingerprint` before any output is
    /// created, `BlockSizeMismatch` if either artifact was made with another
    /// block size, `IntegrityMismatch` if the output does not hash to the
    /// patch's digest, or the first I/O, decode, cancellation, or task error.
    /// A partially written output file is removed on failure.
    pub async fn patch(&self, base: &Path, source: Source, sink: Sink) -> Result<PatchSummary> {
        base_len(base).await?;
        let fingerprint = fingerprint_path(base);
        if fingerprint_missing(&fingerprint).await {
            return Err(DeltaError::MissingFingerprint(fingerprint));
        }

        info!(base = %base.display(), ?source, ?sink, "applying patch");
        match self.apply(base, &fingerprint, source, &sink).await {
            Ok(summary) => {
                info!(bytes = summary.bytes, digest = %summary.digest, "patch applied and verified");
                Ok(summary)
            }
            Err(err) => {
                if let Sink::File(path) = &sink {
                    remove_partial(path).await;
                }
                Err(err)
            }
        }
    }

    async fn encode(
        &self,
        fingerprint: &Path,
        source: Source,
        sink: &Sink,
    ) -> Result<(DeltaStats, StrongHash, u64)> {
        let block_size = self.config.block_size;

        let table = {
            let path = fingerprint.to_path_buf();
            let cancel = self.cancel.clone();
            task::spawn_blocking(move || load_table(&path, block_size, &cancel)).await??
        };
        debug!(
            blocks = table.block_count(),
            buckets = table.bucket_count(),
            "lookup table built"
        );

        let total = match &source {
            Source::File(path) => {
                let len = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| DeltaError::Io(e).at(Stage::Encode, 0))?
                    .len();
                block_size.blocks_for(len)
            }
            Source::Stdin => 0,
        };

        let progress = Arc::new(Progress::new(total));
        let reporter = ProgressReporter::spawn("diff", Arc::clone(&progress), self.config.progress);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let producer = {
            let cancel = self.cancel.clone();
            let literal_limit = self.config.literal_limit();
            task::spawn_blocking(move || -> u64 {
                let reader = match open_source(&source) {
                    Ok(reader) => reader,
                    Err(e) => {
                        forward(iter::once(Err(DeltaError::Io(e).at(Stage::Encode, 0))), &tx);
                        return 0;
                    }
                };
                let mut encoder =
                    DeltaEncoder::new(reader, &table, block_size, ContentDigest::new(), cancel)
                        .with_literal_limit(literal_limit);
                let ops = encoder.by_ref().map(|item| item.map(PatchRecord::Op));
                if forward(ops, &tx) {
                    let digest = encoder.digest().finalize();
                    // A closed receiver means the consumer already failed and reports it.
                    let _ = tx.blocking_send(Ok(PatchRecord::Digest(digest)));
                }
                encoder.bytes_read()
            })
        };

        let consumer = {
            let sink = sink.clone();
            let progress = Arc::clone(&progress);
            task::spawn_blocking(move || -> Result<(DeltaStats, StrongHash)> {
                let out = create_sink(&sink).map_err(|e| DeltaError::Io(e).at(Stage::Artifact, 0))?;
                let mut writer = PatchWriter::new(out, block_size, total)?;
                let mut stats = DeltaStats::default();
                for item in ChannelIter(rx) {
                    match item? {
                        PatchRecord::Op(op) => {
                            trace_op(&op);
                            stats.record(&op);
                            writer.write_op(&op)?;
                            progress.add(blocks_covered(&op, block_size));
                        }
                        PatchRecord::Digest(digest) => {
                            writer.finish(&digest)?;
                            return Ok((stats, digest));
                        }
                    }
                }
                Err(DeltaError::decode("encoder stopped before the digest trailer"))
            })
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        reporter.finish().await;

        let (target_len, (stats, digest)) = join_stages(produced, consumed)?;
        Ok((stats, digest, target_len))
    }

    async fn apply(
        &self,
        base: &Path,
        fingerprint: &Path,
        source: Source,
        sink: &Sink,
    ) -> Result<PatchSummary> {
        let block_size = self.config.block_size;

        {
            let path = fingerprint.to_path_buf();
            task::spawn_blocking(move || check_fingerprint(&path, block_size)).await??;
        }

        let progress = Arc::new(Progress::default());
        let reporter =
            ProgressReporter::spawn("patch", Arc::clone(&progress), self.config.progress);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let producer = {
            let progress = Arc::clone(&progress);
            task::spawn_blocking(move || {
                let opened = open_source(&source)
                    .map_err(|e| DeltaError::Io(e).at(Stage::Artifact, 0))
                    .and_then(PatchReader::open)
                    .and_then(|reader| {
                        reader.header().expect_block_size(block_size)?;
                        Ok(reader)
                    });
                let mut reader = match opened {
                    Ok(reader) => reader,
                    Err(err) => {
                        forward(iter::once(Err(err)), &tx);
                        return;
                    }
                };
                progress.set_total(reader.total_blocks());
                debug!(total_blocks = reader.total_blocks(), "patch header read");

                let ops = reader.by_ref().map(|item| item.map(PatchRecord::Op));
                if forward(ops, &tx) {
                    if let Some(digest) = reader.digest() {
                        // Send fails only if the consumer already stopped with its own error.
                        let _ = tx.blocking_send(Ok(PatchRecord::Digest(digest)));
                    }
                }
            })
        };

        let consumer = {
            let base = base.to_path_buf();
            let sink = sink.clone();
            let cancel = self.cancel.clone();
            let progress = Arc::clone(&progress);
            task::spawn_blocking(move || -> Result<PatchSummary> {
                let base = File::open(&base).map_err(|e| DeltaError::Io(e).at(Stage::Apply, 0))?;
                let out = create_sink(&sink).map_err(|e| DeltaError::Io(e).at(Stage::Apply, 0))?;
                let mut applier =
                    PatchApplier::new(BufReader::new(base), out, block_size, ContentDigest::new(), cancel)?;

                let mut expected = None;
                let ops = ChannelIter(rx).map_while(|item| match item {
                    Ok(PatchRecord::Op(op)) => {
                        trace_op(&op);
                        progress.add(blocks_covered(&op, block_size));
                        Some(Ok(op))
                    }
                    Ok(PatchRecord::Digest(digest)) => {
                        expected = Some(digest);
                        None
                    }
                    Err(err) => Some(Err(err)),
                });
                let bytes = applier.apply(ops)?;

                let expected = expected
                    .ok_or_else(|| DeltaError::decode("patch ended without digest trailer"))?;
                let actual = applier.digest().finalize();
                verify_digest(&expected, &actual)?;
                Ok(PatchSummary {
                    bytes,
                    digest: actual,
                })
            })
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        reporter.finish().await;

        let ((), summary) = join_stages(produced, consumed)?;
        Ok(summary)
    }
}

/// Blocking iterator over a channel receiver.
struct ChannelIter<T>(mpsc::Receiver<T>);

impl<T> Iterator for ChannelIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.blocking_recv()
    }
}

/// Send items downstream until the first `Err` or a closed receiver.
///
/// Returns `true` if every item was `Ok` and delivered.
fn forward<T>(items: impl Iterator<Item = Result<T>>, tx: &mpsc::Sender<Result<T>>) -> bool {
    for item in items {
        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            return false;
        }
    }
    true
}

/// Combine producer and consumer task results.
///
/// A producer panic is the root cause of anything the consumer saw, so it
/// is reported first.
fn join_stages<P, T>(
    producer: std::result::Result<P, JoinError>,
    consumer: std::result::Result<Result<T>, JoinError>,
) -> Result<(P, T)> {
    let produced = producer?;
    let consumed = consumer??;
    Ok((produced, consumed))
}

async fn base_len(base: &Path) -> Result<u64> {
    match tokio::fs::metadata(base).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(DeltaError::MissingBase(base.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn fingerprint_missing(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map_or(true, |meta| meta.len() == 0)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}

fn open_source(source: &Source) -> io::Result<Box<dyn Read>> {
    Ok(match source {
        Source::Stdin => Box::new(io::stdin().lock()),
        Source::File(path) => Box::new(BufReader::new(File::open(path)?)),
    })
}

fn create_sink(sink: &Sink) -> io::Result<Box<dyn Write>> {
    Ok(match sink {
        Sink::Stdout => Box::new(BufWriter::new(io::stdout().lock())),
        Sink::File(path) => Box::new(BufWriter::new(File::create(path)?)),
    })
}

fn load_table(path: &Path, block_size: BlockSize, cancel: &CancellationToken) -> Result<LookupTable> {
    let file = File::open(path).map_err(|e| DeltaError::Io(e).at(Stage::Table, 0))?;
    let reader = FingerprintReader::open(BufReader::new(file))?;
    reader.header().expect_block_size(block_size)?;
    LookupTable::from_signatures(reader.map(|item| {
        if cancel.is_cancelled() {
            Err(DeltaError::Cancelled {
                stage: Stage::Table,
            })
        } else {
            item
        }
    }))
}

fn check_fingerprint(path: &Path, block_size: BlockSize) -> Result<()> {
    let file = File::open(path).map_err(|e| DeltaError::Io(e).at(Stage::Artifact, 0))?;
    FingerprintReader::open(BufReader::new(file))?
        .header()
        .expect_block_size(block_size)
}

fn blocks_covered(op: &BlockOperation, block_size: BlockSize) -> u64 {
    match op {
        BlockOperation::Copy { .. } => 1,
        BlockOperation::Literal(data) => block_size.blocks_for(data.len() as u64),
    }
}

fn trace_op(op: &BlockOperation) {
    match op {
        BlockOperation::Copy { index } => trace!(index, "copy"),
        BlockOperation::Literal(data) => trace!(len = data.len(), "literal"),
    }
}
