/*!
 * Staging buffers for compression and digest computation
 *
 * Bytes destined for the remote store are staged through a buffer that
 * holds up to `MAX_IN_MEMORY_BUFFER` in memory and spills the whole
 * payload to a temporary file beyond that. The buffer is restartable:
 * retries re-read the staged bytes from the start. Spill files are
 * removed when the buffer is dropped.
 */

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::MAX_IN_MEMORY_BUFFER;
use crate::error::{Result, TransferError};

/// Size-bounded staging buffer: memory first, single spill file beyond
pub struct StagedBuffer {
    mem: Vec<u8>,
    spill: Option<NamedTempFile>,
    limit: usize,
    len: u64,
}

impl StagedBuffer {
    pub fn new() -> Self {
        Self::with_limit(MAX_IN_MEMORY_BUFFER)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            mem: Vec::new(),
            spill: None,
            limit,
            len: 0,
        }
    }

    /// Total bytes staged so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the payload crossed the memory limit and lives on disk
    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Path of the spill file, when the payload lives on disk
    pub fn spill_path(&self) -> Option<&std::path::Path> {
        self.spill.as_ref().map(|f| f.path())
    }

    /// Open a fresh reader over the staged bytes. May be called multiple
    /// times; each reader starts at the beginning.
    pub fn reader(&self) -> io::Result<StagedReader<'_>> {
        match &self.spill {
            Some(file) => {
                let mut reopened = file.reopen()?;
                reopened.seek(SeekFrom::Start(0))?;
                Ok(StagedReader::Disk(reopened))
            }
            None => Ok(StagedReader::Memory(Cursor::new(&self.mem))),
        }
    }

    fn spill_to_disk(&mut self) -> io::Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&self.mem)?;
        debug!(
            bytes = self.mem.len(),
            path = %file.path().display(),
            "staging buffer spilled to disk"
        );
        self.mem = Vec::new();
        self.spill = Some(file);
        Ok(())
    }
}

impl Default for StagedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StagedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.spill.is_none() && self.mem.len() + buf.len() > self.limit {
            self.spill_to_disk()?;
        }
        match &mut self.spill {
            Some(file) => file.write_all(buf)?,
            None => self.mem.extend_from_slice(buf),
        }
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.spill {
            file.flush()?;
        }
        Ok(())
    }
}

/// Reader over a staged payload
pub enum StagedReader<'a> {
    Memory(Cursor<&'a Vec<u8>>),
    Disk(File),
}

impl Read for StagedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StagedReader::Memory(cursor) => cursor.read(buf),
            StagedReader::Disk(file) => file.read(buf),
        }
    }
}

/// Owning reader over a shared staged buffer. Holds the `Arc` so the
/// spill file stays alive for as long as any reader does, which lets the
/// storage client re-open the body across retries and task boundaries.
pub struct SharedStagedReader {
    buffer: std::sync::Arc<StagedBuffer>,
    disk: Option<File>,
    pos: usize,
}

impl SharedStagedReader {
    pub fn new(buffer: std::sync::Arc<StagedBuffer>) -> io::Result<Self> {
        let disk = match &buffer.spill {
            Some(file) => {
                let mut reopened = file.reopen()?;
                reopened.seek(SeekFrom::Start(0))?;
                Some(reopened)
            }
            None => None,
        };
        Ok(Self {
            buffer,
            disk,
            pos: 0,
        })
    }
}

impl Read for SharedStagedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if let Some(file) = &mut self.disk {
            return file.read(out);
        }
        let mem = &self.buffer.mem;
        let remaining = mem.len().saturating_sub(self.pos);
        let n = remaining.min(out.len());
        out[..n].copy_from_slice(&mem[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Result of staging an input stream: the byte count that will go on the
/// wire, the base64 SHA-256 of those bytes when requested, and the
/// backing buffer when the bytes had to be retained.
pub struct StagedStream {
    pub size: u64,
    pub digest: Option<String>,
    pub buffer: Option<StagedBuffer>,
}

/// Sink that tees writes into the staging buffer, an optional digest, and
/// a byte counter
struct StagingSink {
    buffer: StagedBuffer,
    hasher: Option<Sha256>,
    count: u64,
}

impl Write for StagingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write_all(buf)?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(buf);
        }
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

/// Gzip an input stream into a staging buffer, counting compressed bytes
/// and (when requested) digesting the post-compression bytes.
pub fn compress_stream(input: impl Read, with_digest: bool) -> Result<StagedStream> {
    let sink = StagingSink {
        buffer: StagedBuffer::new(),
        hasher: with_digest.then(Sha256::new),
        count: 0,
    };

    let mut encoder = GzEncoder::new(sink, Compression::default());
    copy_stream(input, &mut encoder)?;
    encoder
        .flush()
        .map_err(|e| TransferError::Staging(format!("gzip flush failed: {}", e)))?;
    let mut sink = encoder
        .finish()
        .map_err(|e| TransferError::Staging(format!("gzip finish failed: {}", e)))?;
    sink.flush()
        .map_err(|e| TransferError::Staging(e.to_string()))?;

    let digest = sink.hasher.take().map(encode_digest);
    debug!(compressed_bytes = sink.count, "compressed input stream");

    Ok(StagedStream {
        size: sink.count,
        digest,
        buffer: Some(sink.buffer),
    })
}

/// Compute the base64 SHA-256 of an input stream. With `retain`, the
/// bytes are also copied into a staging buffer so a non-restartable
/// source can be re-read for the actual transfer.
pub fn digest_stream(input: impl Read, retain: bool) -> Result<StagedStream> {
    let mut sink = StagingSink {
        buffer: StagedBuffer::with_limit(if retain { MAX_IN_MEMORY_BUFFER } else { 0 }),
        hasher: Some(Sha256::new()),
        count: 0,
    };

    if retain {
        copy_stream(input, &mut sink)?;
    } else {
        let mut hasher = sink.hasher.take().unwrap_or_default();
        let mut counted = 0u64;
        digest_into(input, &mut hasher, &mut counted)?;
        sink.hasher = Some(hasher);
        sink.count = counted;
    }

    let digest = sink.hasher.take().map(encode_digest);
    Ok(StagedStream {
        size: sink.count,
        digest,
        buffer: retain.then_some(sink.buffer),
    })
}

/// Compute the base64 SHA-256 of a file on disk
pub fn digest_file(path: &std::path::Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| TransferError::Staging(format!("Error reading {}: {}", path.display(), e)))?;
    let staged = digest_stream(io::BufReader::new(file), false)?;
    staged
        .digest
        .ok_or_else(|| TransferError::Internal("digest_stream returned no digest".to_string()))
}

fn copy_stream(mut input: impl Read, output: &mut impl Write) -> Result<()> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input
            .read(&mut buf)
            .map_err(|e| TransferError::Staging(format!("read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        output
            .write_all(&buf[..n])
            .map_err(|e| TransferError::Staging(format!("write failed: {}", e)))?;
    }
    Ok(())
}

fn digest_into(mut input: impl Read, hasher: &mut Sha256, count: &mut u64) -> Result<()> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = input
            .read(&mut buf)
            .map_err(|e| TransferError::Staging(format!("read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        *count += n as u64;
    }
    Ok(())
}

fn encode_digest(hasher: Sha256) -> String {
    BASE64.encode(hasher.finalize())
}
