/*!
 * Transfer orchestrator
 *
 * Drives the pipeline for one parsed command: initialize per-file
 * metadata, classify compression (uploads), filter out files already at
 * the destination, partition by size, dispatch bounded-concurrency
 * workers, and materialize status rows. Cancellation is cooperative and
 * owned here: `cancel()` sets a flag and tears down the worker pool, and
 * `execute` returns `Ok(false)` for a canceled command.
 */

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::compression::{classify_file, classify_stream, SourceCompressionHint};
use crate::config::{AgentConfig, BIG_FILE_THRESHOLD, STREAM_SOURCE_NAME};
use crate::error::{Result, TransferError};
use crate::expand::expand_file_names;
use crate::filter::{filter_existing_files, FilterContext};
use crate::metadata::{FileMetadata, TransferStatus};
use crate::plan::{
    CommandParser, EncryptionMaterial, StageKind, TransferDirection, TransferPlan,
};
use crate::status::StatusView;
use crate::storage::{
    CredentialRenewer, LocalStageClient, StageClientFactory, StageLocation, StoreAdapter,
};
use crate::worker::{
    run_download, run_jobs, run_upload, AbortRegistry, DownloadJob, JobSource, MetadataMap,
    UploadJob,
};

/// In-memory byte-stream source for a single-file upload
pub struct StreamSource {
    pub reader: Box<dyn Read + Send>,
    pub size: u64,
    pub dest_name: String,
    pub compress: bool,
}

/// Clonable handle for canceling a running command from another task
#[derive(Clone)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
    pool: AbortRegistry,
}

impl CancelHandle {
    /// Abort in-flight workers and flag the run as canceled
    pub fn cancel(&self) {
        let mut handles = self.pool.lock().expect("abort registry lock poisoned");
        for handle in handles.drain(..) {
            handle.abort();
        }
        self.canceled.store(true, Ordering::SeqCst);
        debug!("file transfer canceled by user");
    }
}

/// Orchestrates one UPLOAD or DOWNLOAD command
pub struct FileTransferAgent {
    command: String,
    plan: TransferPlan,
    config: AgentConfig,
    parser: Arc<dyn CommandParser>,
    factory: Arc<dyn StageClientFactory>,

    /// Expanded local paths for uploads; stage file names for downloads
    source_files: BTreeSet<String>,

    metadata: MetadataMap,
    stream_source: Option<StreamSource>,

    canceled: Arc<AtomicBool>,
    pool: AbortRegistry,
    adapters: Vec<Arc<StoreAdapter>>,

    status: Option<StatusView>,
}

impl FileTransferAgent {
    /// Parse the command through the upstream parser and prepare the
    /// agent. Wildcards in upload source locations are expanded here.
    pub async fn new(
        command: &str,
        parser: Arc<dyn CommandParser>,
        factory: Arc<dyn StageClientFactory>,
        config: AgentConfig,
    ) -> Result<Self> {
        let response = parser.execute_command(command).await?;
        let plan = TransferPlan::from_response(command, &response)?;

        let source_files = match plan.direction {
            TransferDirection::Upload => expand_file_names(&plan.src_locations)?
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect(),
            TransferDirection::Download => plan.src_locations.iter().cloned().collect(),
        };

        Ok(Self {
            command: command.to_string(),
            plan,
            config,
            parser,
            factory,
            source_files,
            metadata: Arc::new(Mutex::new(HashMap::new())),
            stream_source: None,
            canceled: Arc::new(AtomicBool::new(false)),
            pool: Arc::new(Mutex::new(Vec::new())),
            adapters: Vec::new(),
            status: None,
        })
    }

    /// Upload from an in-memory stream instead of local files. Must be
    /// set before `execute`.
    pub fn set_source_stream(
        &mut self,
        reader: Box<dyn Read + Send>,
        size: u64,
        dest_name: impl Into<String>,
        compress: bool,
    ) {
        self.stream_source = Some(StreamSource {
            reader,
            size,
            dest_name: dest_name.into(),
            compress,
        });
    }

    pub fn direction(&self) -> TransferDirection {
        self.plan.direction
    }

    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    /// Status rows, available after `execute` completes
    pub fn status_view(&self) -> Option<&StatusView> {
        self.status.as_ref()
    }

    /// Snapshot of per-file statuses, keyed by source
    pub fn file_statuses(&self) -> HashMap<String, TransferStatus> {
        self.metadata
            .lock()
            .expect("metadata lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.status))
            .collect()
    }

    /// Cancel the command: abort in-flight workers and flag the run.
    /// Rows already terminal keep their status.
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// Handle for canceling this command while `execute` is running
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            canceled: self.canceled.clone(),
            pool: self.pool.clone(),
        }
    }

    /// Run the command to completion. Returns `Ok(false)` when canceled,
    /// `Ok(true)` otherwise; per-file outcomes are in the status view.
    pub async fn execute(&mut self) -> Result<bool> {
        let outcome = self.run_pipeline().await;

        // release client resources on every exit path
        for adapter in self.adapters.drain(..) {
            adapter.shutdown().await;
        }

        outcome
    }

    async fn run_pipeline(&mut self) -> Result<bool> {
        debug!("start init metadata");
        self.init_file_metadata()?;

        if self.plan.direction == TransferDirection::Upload {
            debug!("start checking file types");
            self.classify_sources()?;
        }

        if !self.plan.overwrite {
            debug!("start filtering existing files");
            let adapter = match self.plan.stage.kind {
                StageKind::ObjectStore => Some(self.build_adapter(None).await?),
                StageKind::LocalFs => None,
            };
            let ctx = FilterContext {
                direction: self.plan.direction,
                stage: &self.plan.stage,
                adapter: adapter.as_deref(),
                local_location: self.plan.local_location.as_deref(),
            };
            filter_existing_files(ctx, &self.metadata).await?;
        }

        if self.canceled.load(Ordering::SeqCst) {
            return Ok(false);
        }

        match self.plan.direction {
            TransferDirection::Download => self.download_files().await?,
            TransferDirection::Upload if self.stream_source.is_some() => {
                self.upload_stream().await?
            }
            TransferDirection::Upload => self.upload_files().await?,
        }

        if self.canceled.load(Ordering::SeqCst) {
            return Ok(false);
        }

        self.status = Some(StatusView::build(
            self.plan.direction,
            self.plan.show_encryption,
            self.config.sort,
            &self.metadata.lock().expect("metadata lock poisoned"),
        ));

        Ok(true)
    }

    /// One metadata row per source. Missing files and directories are
    /// recorded per-file; the rest of the plan continues.
    fn init_file_metadata(&mut self) -> Result<()> {
        let mut map = self.metadata.lock().expect("metadata lock poisoned");

        match self.plan.direction {
            TransferDirection::Upload => {
                if let Some(stream) = &self.stream_source {
                    let mut meta = FileMetadata::new(STREAM_SOURCE_NAME);
                    meta.src_size = stream.size;
                    map.insert(STREAM_SOURCE_NAME.to_string(), meta);
                    return Ok(());
                }

                for src in &self.source_files {
                    let mut meta = FileMetadata::new(src.as_str());
                    let path = PathBuf::from(src);
                    match std::fs::metadata(&path) {
                        Ok(fs_meta) if fs_meta.is_dir() => {
                            debug!(src = %src, "not a file, but directory");
                            meta.mark(
                                TransferStatus::Directory,
                                TransferStatus::Directory.description(),
                            );
                        }
                        Ok(fs_meta) => {
                            meta.src_size = fs_meta.len();
                        }
                        Err(_) => {
                            debug!(src = %src, "file does not exist");
                            meta.mark(
                                TransferStatus::Nonexist,
                                TransferStatus::Nonexist.description(),
                            );
                        }
                    }
                    map.insert(src.clone(), meta);
                }
            }
            TransferDirection::Download => {
                for src in &self.source_files {
                    let mut meta = FileMetadata::new(src.as_str());
                    let base = src.rsplit('/').next().unwrap_or(src);
                    meta.dest_name = Some(base.to_string());
                    map.insert(src.clone(), meta);
                }
            }
        }

        Ok(())
    }

    /// Detect compression per source and derive destination names.
    /// Classification failures are local to the file.
    fn classify_sources(&mut self) -> Result<()> {
        let hint = SourceCompressionHint::parse(&self.plan.source_compression)?;
        let mut map = self.metadata.lock().expect("metadata lock poisoned");

        if let Some(stream) = &self.stream_source {
            if let Some(meta) = map.get_mut(STREAM_SOURCE_NAME) {
                let c = classify_stream(&stream.dest_name, hint, stream.compress);
                meta.src_compression = c.src_compression;
                meta.dest_compression = c.dest_compression;
                meta.require_compress = c.require_compress;
                meta.dest_name = Some(c.dest_name);
            }
            return Ok(());
        }

        for src in &self.source_files {
            let Some(meta) = map.get_mut(src.as_str()) else {
                continue;
            };
            if meta.status != TransferStatus::Unknown {
                continue;
            }

            let path = PathBuf::from(src);
            let src_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| src.clone());

            match classify_file(&path, &src_name, hint, self.plan.auto_compress) {
                Ok(c) => {
                    debug!(src = %src, dest = %c.dest_name, compress = c.require_compress,
                        "classified source file");
                    meta.src_compression = c.src_compression;
                    meta.dest_compression = c.dest_compression;
                    meta.require_compress = c.require_compress;
                    meta.dest_name = Some(c.dest_name);
                }
                Err(err) => {
                    meta.mark(TransferStatus::Error, err.to_string());
                }
            }
        }

        Ok(())
    }

    /// Full stage key for a destination name
    fn stage_key(&self, name: &str) -> String {
        match self.plan.stage.kind {
            StageKind::LocalFs => name.to_string(),
            StageKind::ObjectStore => StageLocation::parse(&self.plan.stage.location).key_for(name),
        }
    }

    async fn build_adapter(
        &mut self,
        encryption: Option<EncryptionMaterial>,
    ) -> Result<Arc<StoreAdapter>> {
        let adapter = match self.plan.stage.kind {
            StageKind::LocalFs => {
                let client = LocalStageClient::new(&self.plan.stage.location)?;
                Arc::new(StoreAdapter::new(Arc::new(client), None))
            }
            StageKind::ObjectStore => {
                let client = self
                    .factory
                    .create(&self.plan.stage, self.plan.parallel, encryption.as_ref())
                    .await?;
                let renewer = CredentialRenewer::new(
                    self.parser.clone(),
                    self.command.clone(),
                    self.factory.clone(),
                    self.plan.parallel,
                    encryption,
                );
                Arc::new(StoreAdapter::new(client, Some(renewer)))
            }
        };
        self.adapters.push(adapter.clone());
        Ok(adapter)
    }

    async fn download_files(&mut self) -> Result<()> {
        let local_dir = self
            .plan
            .local_location
            .clone()
            .ok_or_else(|| TransferError::Internal("download without local location".to_string()))?;
        tokio::fs::create_dir_all(&local_dir).await?;

        let enc_index: HashMap<String, EncryptionMaterial> = self
            .plan
            .download_encryption_index()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let mut jobs = Vec::new();
        for src in self.pending_sources() {
            let encryption = enc_index.get(&src).cloned();
            let adapter = self.build_adapter(encryption.clone()).await?;
            let dest_name = {
                let map = self.metadata.lock().expect("metadata lock poisoned");
                match map.get(&src).and_then(|m| m.dest_name.clone()) {
                    Some(name) => name,
                    None => continue,
                }
            };
            let job = DownloadJob {
                src_key: src.clone(),
                stage_key: self.stage_key(&src),
                dest_name,
                local_dir: local_dir.clone(),
                encryption,
            };
            let metadata = self.metadata.clone();
            debug!(src = %src, "submitting download job");
            jobs.push(run_download(job, adapter, metadata));
        }

        let results = run_jobs(jobs, 1, &self.pool, &self.canceled).await;
        debug!("done with downloading");
        self.check_fatal(results)
    }

    async fn upload_stream(&mut self) -> Result<()> {
        let stream = self
            .stream_source
            .take()
            .ok_or_else(|| TransferError::Internal("stream source already consumed".to_string()))?;

        let encryption = self.plan.upload_encryption().cloned();
        let adapter = self.build_adapter(encryption.clone()).await?;

        let (dest_name, require_compress, dest_compression) = {
            let map = self.metadata.lock().expect("metadata lock poisoned");
            let meta = map.get(STREAM_SOURCE_NAME).ok_or_else(|| {
                TransferError::Internal("missing file metadata for stream".to_string())
            })?;
            (
                meta.dest_name.clone().unwrap_or_else(|| stream.dest_name.clone()),
                meta.require_compress,
                meta.dest_compression,
            )
        };

        let job = UploadJob {
            src_key: STREAM_SOURCE_NAME.to_string(),
            source: JobSource::Stream(stream.reader),
            source_size: stream.size,
            dest_key: self.stage_key(&dest_name),
            require_compress,
            dest_compression,
            encryption,
            inner_parallel: self.plan.parallel,
            inject_failure: self.config.inject_failure.clone(),
        };
        let metadata = self.metadata.clone();

        let results =
            run_jobs(vec![run_upload(job, adapter, metadata)], 1, &self.pool, &self.canceled).await;
        debug!("done with uploading from a stream");
        self.check_fatal(results)
    }

    async fn upload_files(&mut self) -> Result<()> {
        // big files go one at a time with intra-file parallelism; small
        // files go wide with single-part uploads
        let (big, small) = self.segregate_by_size();

        let encryption = self.plan.upload_encryption().cloned();
        let adapter = self.build_adapter(encryption.clone()).await?;

        if !big.is_empty() {
            debug!(count = big.len(), "start uploading big files");
            let jobs = self.upload_jobs(&big, &adapter, &encryption, self.plan.parallel);
            let results = run_jobs(jobs, 1, &self.pool, &self.canceled).await;
            debug!("end uploading big files");
            self.check_fatal(results)?;
        }

        if !small.is_empty() {
            debug!(count = small.len(), "start uploading small files");
            // small files never parallelize parts within a file
            let jobs = self.upload_jobs(&small, &adapter, &encryption, 1);
            let results = run_jobs(jobs, self.plan.parallel, &self.pool, &self.canceled).await;
            debug!("end uploading small files");
            self.check_fatal(results)?;
        }

        Ok(())
    }

    fn upload_jobs(
        &self,
        sources: &[String],
        adapter: &Arc<StoreAdapter>,
        encryption: &Option<EncryptionMaterial>,
        inner_parallel: usize,
    ) -> Vec<impl std::future::Future<Output = Result<()>> + Send + 'static> {
        let mut jobs = Vec::with_capacity(sources.len());
        let map = self.metadata.lock().expect("metadata lock poisoned");

        for src in sources {
            let Some(meta) = map.get(src) else { continue };
            let Some(dest_name) = meta.dest_name.clone() else {
                debug!(src = %src, "no dest file name, skipping submission");
                continue;
            };

            let job = UploadJob {
                src_key: src.clone(),
                source: JobSource::File(PathBuf::from(src)),
                source_size: meta.src_size,
                dest_key: self.stage_key(&dest_name),
                require_compress: meta.require_compress,
                dest_compression: meta.dest_compression,
                encryption: encryption.clone(),
                inner_parallel,
                inject_failure: self.config.inject_failure.clone(),
            };
            debug!(src = %src, "submitting upload job");
            jobs.push(run_upload(job, adapter.clone(), self.metadata.clone()));
        }

        jobs
    }

    /// Sources still pending transfer (status UNKNOWN)
    fn pending_sources(&self) -> Vec<String> {
        let map = self.metadata.lock().expect("metadata lock poisoned");
        self.source_files
            .iter()
            .filter(|src| {
                match map.get(src.as_str()) {
                    Some(meta) if meta.status == TransferStatus::Unknown => true,
                    Some(meta) => {
                        debug!(src = %src, status = %meta.status, details = %meta.error_details,
                            "skipping, status already set");
                        false
                    }
                    None => false,
                }
            })
            .cloned()
            .collect()
    }

    fn segregate_by_size(&self) -> (Vec<String>, Vec<String>) {
        let pending = self.pending_sources();
        let map = self.metadata.lock().expect("metadata lock poisoned");
        let mut big = Vec::new();
        let mut small = Vec::new();

        for src in pending {
            let size = map.get(&src).map(|m| m.src_size).unwrap_or(0);
            if size > BIG_FILE_THRESHOLD {
                big.push(src);
            } else {
                small.push(src);
            }
        }
        (big, small)
    }

    /// Per-file failures stay per-file; fatal errors abort the command
    /// after every worker has been awaited.
    fn check_fatal(&self, results: Vec<Result<()>>) -> Result<()> {
        for result in results {
            if let Err(err) = result {
                if err.is_fatal() {
                    return Err(err);
                }
                debug!(error = %err, "worker failed, continuing with remaining files");
            }
        }
        Ok(())
    }
}
