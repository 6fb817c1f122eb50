//! Persisted fingerprint and patch artifacts.
//!
//! Both artifacts share a fixed header followed by length-prefixed bincode
//! records:
//!
//! ```text
//! ┌─────────┬─────────┬────────────┐
//! │  MAGIC  │ VERSION │ BLOCK SIZE │
//! │ 4 bytes │ 1 byte  │  4 bytes   │
//! └─────────┴─────────┴────────────┘
//! ┌─────────┬──────────────────┐
//! │ LENGTH  │  bincode payload │  × N
//! │ 4 bytes │  LENGTH bytes    │
//! └─────────┴──────────────────┘
//! ```
//!
//! A fingerprint (`RDFP`) holds one record per [`BlockSignature`] and ends at
//! a clean end of stream. A patch (`RDPT`) additionally stores the expected
//! block count (u64 LE) after the header, then [`PatchRecord::Op`] records,
//! and always ends with a single [`PatchRecord::Digest`] trailer.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{BlockSize, SessionConfig};
use crate::delta::{BlockOperation, PatchRecord};
use crate::error::{DeltaError, Result, Stage};
use crate::hash::StrongHash;
use crate::signature::{read_full, BlockSignature};

/// Fingerprint magic bytes: "RDFP"
pub const FINGERPRINT_MAGIC: [u8; 4] = *b"RDFP";

/// Patch magic bytes: "RDPT"
pub const PATCH_MAGIC: [u8; 4] = *b"RDPT";

/// Current artifact format version.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum record payload size (64 MB).
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// Bincode framing around literal bytes: two enum tags and a u64 length.
const LITERAL_RECORD_OVERHEAD: usize = 4 + 4 + 8;

const _: () = assert!(
    SessionConfig::MAX_LITERAL_LEN + LITERAL_RECORD_OVERHEAD <= MAX_RECORD_SIZE as usize
);

/// Artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    /// Magic bytes identifying the artifact kind.
    pub magic: [u8; 4],
    /// Format version.
    pub version: u8,
    /// Block size the artifact was produced with.
    pub block_size: u32,
}

impl ArtifactHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 9;

    /// Create a header for the current format version.
    #[must_use]
    pub fn new(magic: [u8; 4], block_size: BlockSize) -> Self {
        Self {
            magic,
            version: FORMAT_VERSION,
            // BlockSize is validated to fit in 32 bits.
            block_size: u32::try_from(block_size.get()).unwrap_or(u32::MAX),
        }
    }

    /// Encode header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.version;
        buf[5..9].copy_from_slice(&self.block_size.to_le_bytes());
        buf
    }

    /// Decode and validate a header of the expected kind.
    ///
    /// # Errors
    ///
    /// Returns `Decode` on wrong magic or unsupported version.
    pub fn decode(buf: &[u8; Self::SIZE], expected_magic: [u8; 4]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        if magic != expected_magic {
            return Err(DeltaError::Decode(format!(
                "Invalid magic: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expected_magic),
                String::from_utf8_lossy(&magic)
            )));
        }

        let version = buf[4];
        if version != FORMAT_VERSION {
            return Err(DeltaError::Decode(format!(
                "Unsupported version: expected {FORMAT_VERSION}, got {version}"
            )));
        }

        let mut size = [0u8; 4];
        size.copy_from_slice(&buf[5..9]);
        Ok(Self {
            magic,
            version,
            block_size: u32::from_le_bytes(size),
        })
    }

    /// Read a header of the expected kind.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the stream is too short or the header invalid.
    pub fn read_from<R: Read>(reader: &mut R, expected_magic: [u8; 4]) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        read_exact_or_decode(reader, &mut buf, "header")?;
        Self::decode(&buf, expected_magic)
    }

    /// Write header to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    /// Reject an artifact produced with a different block size.
    ///
    /// # Errors
    ///
    /// Returns `BlockSizeMismatch` if the sizes differ.
    pub fn expect_block_size(&self, session: BlockSize) -> Result<()> {
        if self.block_size as usize == session.get() {
            Ok(())
        } else {
            Err(DeltaError::BlockSizeMismatch {
                expected: session.get(),
                found: self.block_size as usize,
            })
        }
    }
}

/// `read_exact`, reporting a short stream as a decode error.
fn read_exact_or_decode<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DeltaError::Decode(format!("truncated {what}"))
        } else {
            DeltaError::Io(e)
        }
    })
}

/// Write one length-prefixed record.
fn write_record<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_SIZE)
        .ok_or(DeltaError::RecordTooLarge {
            size: payload.len() as u64,
            maximum: MAX_RECORD_SIZE,
        })?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

/// Read one length-prefixed record. `None` at a clean end of stream.
fn read_record<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<T>> {
    let mut len = [0u8; 4];
    match read_full(reader, &mut len)? {
        0 => return Ok(None),
        4 => {}
        _ => return Err(DeltaError::decode("truncated record length")),
    }

    let len = u32::from_le_bytes(len);
    if len > MAX_RECORD_SIZE {
        return Err(DeltaError::Decode(format!(
            "Record too large: {len} > {MAX_RECORD_SIZE}"
        )));
    }

    buf.resize(len as usize, 0);
    read_exact_or_decode(reader, buf, "record payload")?;
    let value = bincode::deserialize(&buf[..]).map_err(DeltaError::decode)?;
    Ok(Some(value))
}

/// Borrowed form of [`PatchRecord`]; serializes identically.
#[derive(Serialize)]
enum PatchRecordRef<'a> {
    Op(&'a BlockOperation),
    Digest(&'a StrongHash),
}

/// Writes a fingerprint artifact.
#[derive(Debug)]
pub struct FingerprintWriter<W> {
    writer: W,
    records: u64,
}

impl<W: Write> FingerprintWriter<W> {
    /// Write the header and prepare for signatures.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn new(mut writer: W, block_size: BlockSize) -> Result<Self> {
        ArtifactHeader::new(FINGERPRINT_MAGIC, block_size).write_to(&mut writer)?;
        Ok(Self { writer, records: 0 })
    }

    /// Append one signature.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write(&mut self, signature: &BlockSignature) -> Result<()> {
        write_record(&mut self.writer, signature).map_err(|e| e.at(Stage::Artifact, self.records))?;
        self.records += 1;
        Ok(())
    }

    /// Signatures written so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads a fingerprint artifact as a signature stream.
///
/// After an `Err` item the iterator is exhausted.
#[derive(Debug)]
pub struct FingerprintReader<R> {
    reader: R,
    header: ArtifactHeader,
    buf: Vec<u8>,
    records: u64,
    done: bool,
}

impl<R: Read> FingerprintReader<R> {
    /// Read and validate the header.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the header is missing or invalid.
    pub fn open(mut reader: R) -> Result<Self> {
        let header = ArtifactHeader::read_from(&mut reader, FINGERPRINT_MAGIC)
            .map_err(|e| e.at(Stage::Artifact, 0))?;
        Ok(Self {
            reader,
            header,
            buf: Vec::new(),
            records: 0,
            done: false,
        })
    }

    /// Artifact header.
    #[must_use]
    pub const fn header(&self) -> &ArtifactHeader {
        &self.header
    }
}

impl<R: Read> Iterator for FingerprintReader<R> {
    type Item = Result<BlockSignature>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_record(&mut self.reader, &mut self.buf) {
            Ok(Some(sig)) => {
                self.records += 1;
                Some(Ok(sig))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.at(Stage::Artifact, self.records)))
            }
        }
    }
}

/// Writes a patch artifact.
#[derive(Debug)]
pub struct PatchWriter<W> {
    writer: W,
    records: u64,
}

impl<W: Write> PatchWriter<W> {
    /// Write the header and expected block count.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be written.
    pub fn new(mut writer: W, block_size: BlockSize, total_blocks: u64) -> Result<Self> {
        ArtifactHeader::new(PATCH_MAGIC, block_size).write_to(&mut writer)?;
        writer.write_all(&total_blocks.to_le_bytes())?;
        Ok(Self { writer, records: 0 })
    }

    /// Append one operation.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_op(&mut self, op: &BlockOperation) -> Result<()> {
        write_record(&mut self.writer, &PatchRecordRef::Op(op))
            .map_err(|e| e.at(Stage::Artifact, self.records))?;
        self.records += 1;
        Ok(())
    }

    /// Operations written so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Write the digest trailer, flush, and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing or flushing fails.
    pub fn finish(mut self, digest: &StrongHash) -> Result<W> {
        write_record(&mut self.writer, &PatchRecordRef::Digest(digest))
            .map_err(|e| e.at(Stage::Artifact, self.records))?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Reads a patch artifact as an operation stream.
///
/// The trailing digest is captured rather than yielded; it is available from
/// [`PatchReader::digest`] once the stream has ended. A stream without the
/// trailer, or with records after it, ends with an `Err` item.
#[derive(Debug)]
pub struct PatchReader<R> {
    reader: R,
    header: ArtifactHeader,
    total_blocks: u64,
    buf: Vec<u8>,
    records: u64,
    digest: Option<StrongHash>,
    done: bool,
}

impl<R: Read> PatchReader<R> {
    /// Read and validate the header and block count.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the header is missing or invalid.
    pub fn open(mut reader: R) -> Result<Self> {
        let header = ArtifactHeader::read_from(&mut reader, PATCH_MAGIC)
            .map_err(|e| e.at(Stage::Artifact, 0))?;
        let mut total = [0u8; 8];
        read_exact_or_decode(&mut reader, &mut total, "block count")
            .map_err(|e| e.at(Stage::Artifact, 0))?;
        Ok(Self {
            reader,
            header,
            total_blocks: u64::from_le_bytes(total),
            buf: Vec::new(),
            records: 0,
            digest: None,
            done: false,
        })
    }

    /// Artifact header.
    #[must_use]
    pub const fn header(&self) -> &ArtifactHeader {
        &self.header
    }

    /// Expected block count recorded by the encoder (0 if unknown).
    #[must_use]
    pub const fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Digest trailer, once the stream has been read to the end.
    #[must_use]
    pub const fn digest(&self) -> Option<StrongHash> {
        self.digest
    }

    fn next_record(&mut self) -> Result<Option<BlockOperation>> {
        let record = read_record::<_, PatchRecord>(&mut self.reader, &mut self.buf)?;
        match record {
            Some(PatchRecord::Op(op)) => Ok(Some(op)),
            Some(PatchRecord::Digest(digest)) => {
                if read_record::<_, PatchRecord>(&mut self.reader, &mut self.buf)?.is_some() {
                    return Err(DeltaError::decode("record after digest trailer"));
                }
                self.digest = Some(digest);
                Ok(None)
            }
            None => Err(DeltaError::decode("patch ended without digest trailer")),
        }
    }
}

impl<R: Read> Iterator for PatchReader<R> {
    type Item = Result<BlockOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(op)) => {
                self.records += 1;
                Some(Ok(op))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.at(Stage::Artifact, self.records)))
            }
        }
    }
}
