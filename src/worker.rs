/*!
 * Transfer workers and the bounded-concurrency pool
 *
 * Each job record carries everything its worker needs; workers own their
 * metadata row for the duration of the job and release staging buffers
 * on every exit path. Job failures are contained: one worker's error
 * never cancels its peers.
 */

use std::collections::HashMap;
use std::future::Future;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::compression::CompressionFormat;
use crate::error::{Result, TransferError};
use crate::metadata::{FileMetadata, TransferStatus};
use crate::plan::EncryptionMaterial;
use crate::staging::{compress_stream, digest_stream};
use crate::storage::{BodySource, PutRequest, StoreAdapter, DIGEST_METADATA_KEY};

pub type MetadataMap = Arc<Mutex<HashMap<String, FileMetadata>>>;

/// Abort handles for in-flight workers, shared with the orchestrator so
/// cancellation can tear the pool down.
pub type AbortRegistry = Arc<Mutex<Vec<AbortHandle>>>;

/// Bytes a worker uploads: a file on disk or a one-shot stream
pub enum JobSource {
    File(PathBuf),
    Stream(Box<dyn Read + Send>),
}

/// One upload unit of work
pub struct UploadJob {
    /// Metadata map key (source path, or the stream sentinel)
    pub src_key: String,
    pub source: JobSource,
    pub source_size: u64,
    /// Full stage key, path prefix included
    pub dest_key: String,
    pub require_compress: bool,
    pub dest_compression: Option<CompressionFormat>,
    pub encryption: Option<EncryptionMaterial>,
    /// Part-level parallelism the storage client may use
    pub inner_parallel: usize,
    /// Test hook: fail before the put when the source matches
    pub inject_failure: Option<String>,
}

/// One download unit of work
pub struct DownloadJob {
    /// Metadata map key (stage file name from the plan)
    pub src_key: String,
    /// Full stage key, path prefix included
    pub stage_key: String,
    pub dest_name: String,
    pub local_dir: PathBuf,
    pub encryption: Option<EncryptionMaterial>,
}

/// Run one upload job, recording the outcome on its metadata row
pub async fn run_upload(
    job: UploadJob,
    adapter: Arc<StoreAdapter>,
    metadata: MetadataMap,
) -> Result<()> {
    let src_key = job.src_key.clone();
    debug!(src = %src_key, dest = %job.dest_key, "entering upload worker");

    match upload_inner(job, &adapter, &metadata).await {
        Ok(()) => Ok(()),
        Err(err) => {
            mark_error(&metadata, &src_key, &err);
            Err(err)
        }
    }
}

async fn upload_inner(
    job: UploadJob,
    adapter: &StoreAdapter,
    metadata: &MetadataMap,
) -> Result<()> {
    let UploadJob {
        src_key,
        source,
        source_size,
        dest_key,
        require_compress,
        dest_compression,
        encryption,
        inner_parallel,
        inject_failure,
    } = job;

    let encrypt = encryption.is_some();

    // compression and digest work is synchronous I/O
    let (body, upload_size, digest) =
        tokio::task::spawn_blocking(move || stage_source(source, require_compress, encrypt, source_size))
            .await
            .map_err(|e| TransferError::Internal(format!("staging task failed: {}", e)))??;

    debug!(
        src = %src_key,
        dest = %dest_key,
        compressed = require_compress,
        upload_size,
        "staged source for upload"
    );

    if let Some(suffix) = &inject_failure {
        if src_key.ends_with(suffix.as_str()) {
            let name = src_key.rsplit('/').next().unwrap_or(&src_key).to_string();
            return Err(TransferError::SimulatedUploadFailure(name));
        }
    }

    let mut user_metadata = HashMap::new();
    if let Some(digest) = digest {
        user_metadata.insert(DIGEST_METADATA_KEY.to_string(), digest);
    }

    let content_encoding = dest_compression
        .filter(|f| f.is_supported())
        .map(|f| f.name().to_ascii_lowercase());

    adapter
        .put(PutRequest {
            key: dest_key,
            body,
            content_length: upload_size,
            user_metadata,
            content_encoding,
            inner_parallel,
        })
        .await?;

    let mut guard = metadata.lock().expect("metadata lock poisoned");
    if let Some(meta) = guard.get_mut(&src_key) {
        meta.dest_size = upload_size as i64;
        meta.is_encrypted = encrypt;
        meta.mark(TransferStatus::Uploaded, "");
    }

    Ok(())
}

/// Prepare the upload body: gzip into a staging buffer, digest in place,
/// or pass the raw file through. Stream sources are always retained in a
/// buffer so the body stays re-openable across retries.
fn stage_source(
    source: JobSource,
    require_compress: bool,
    encrypt: bool,
    source_size: u64,
) -> Result<(BodySource, u64, Option<String>)> {
    match source {
        JobSource::File(path) => {
            if require_compress {
                let file = open_source(&path)?;
                let staged = compress_stream(file, encrypt)?;
                let buffer = staged.buffer.ok_or_else(|| {
                    TransferError::Internal("compress_stream returned no buffer".to_string())
                })?;
                Ok((
                    BodySource::Staged(Arc::new(buffer)),
                    staged.size,
                    staged.digest,
                ))
            } else if encrypt {
                let file = open_source(&path)?;
                let staged = digest_stream(file, false)?;
                Ok((BodySource::File(path), source_size, staged.digest))
            } else {
                Ok((BodySource::File(path), source_size, None))
            }
        }
        JobSource::Stream(reader) => {
            if require_compress {
                let staged = compress_stream(reader, encrypt)?;
                let buffer = staged.buffer.ok_or_else(|| {
                    TransferError::Internal("compress_stream returned no buffer".to_string())
                })?;
                Ok((
                    BodySource::Staged(Arc::new(buffer)),
                    staged.size,
                    staged.digest,
                ))
            } else {
                let staged = digest_stream(reader, true)?;
                let buffer = staged.buffer.ok_or_else(|| {
                    TransferError::Internal("digest_stream returned no buffer".to_string())
                })?;
                let digest = if encrypt { staged.digest } else { None };
                Ok((BodySource::Staged(Arc::new(buffer)), staged.size, digest))
            }
        }
    }
}

fn open_source(path: &std::path::Path) -> Result<BufReader<std::fs::File>> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| TransferError::Staging(format!("Error reading {}: {}", path.display(), e)))
}

/// Run one download job, recording the outcome on its metadata row
pub async fn run_download(
    job: DownloadJob,
    adapter: Arc<StoreAdapter>,
    metadata: MetadataMap,
) -> Result<()> {
    debug!(
        src = %job.src_key,
        stage_key = %job.stage_key,
        dest = %job.local_dir.join(&job.dest_name).display(),
        "entering download worker"
    );

    match adapter
        .get(&job.stage_key, &job.local_dir, &job.dest_name)
        .await
    {
        Ok(bytes) => {
            let mut guard = metadata.lock().expect("metadata lock poisoned");
            if let Some(meta) = guard.get_mut(&job.src_key) {
                meta.dest_size = bytes as i64;
                meta.is_encrypted = job.encryption.is_some();
                meta.mark(TransferStatus::Downloaded, "");
            }
            Ok(())
        }
        Err(err) => {
            mark_error(&metadata, &job.src_key, &err);
            Err(err)
        }
    }
}

fn mark_error(metadata: &MetadataMap, src_key: &str, err: &TransferError) {
    let mut guard = metadata.lock().expect("metadata lock poisoned");
    if let Some(meta) = guard.get_mut(src_key) {
        meta.mark(TransferStatus::Error, err.to_string());
    }
}

/// Run jobs with at most `parallel` concurrent workers. All jobs run to
/// completion regardless of individual failures; per-job results come
/// back in submission order. Abort handles are published to `registry`
/// so the orchestrator can cancel the pool; jobs that have not started
/// when `canceled` flips bail out before doing any work.
pub async fn run_jobs<F>(
    jobs: Vec<F>,
    parallel: usize,
    registry: &AbortRegistry,
    canceled: &Arc<std::sync::atomic::AtomicBool>,
) -> Vec<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let semaphore = semaphore.clone();
        let canceled = canceled.clone();
        let handle = tokio::spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| TransferError::Interrupted("worker pool closed".to_string()))?;
            if canceled.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TransferError::Interrupted(
                    "transfer canceled".to_string(),
                ));
            }
            job.await
        });
        registry
            .lock()
            .expect("abort registry lock poisoned")
            .push(handle.abort_handle());
        handles.push(handle);
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(err) if err.is_cancelled() => {
                results.push(Err(TransferError::Interrupted(
                    "worker aborted".to_string(),
                )))
            }
            Err(err) => results.push(Err(TransferError::Internal(err.to_string()))),
        }
    }
    results
}
