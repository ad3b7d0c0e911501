/*!
 * Stagehand - client-side bulk file transfer agent
 *
 * Moves data between a local filesystem (or an in-memory byte stream)
 * and the object-storage staging area of a cloud data warehouse:
 * - UPLOAD and DOWNLOAD verbs with glob expansion
 * - Compression detection and automatic gzip
 * - Content digests for idempotent skipping
 * - Bounded-concurrency transfers with big/small file phasing
 * - Retry with exponential backoff and credential renewal
 */

pub mod agent;
pub mod compression;
pub mod config;
pub mod error;
pub mod expand;
pub mod filter;
pub mod logging;
pub mod metadata;
pub mod plan;
pub mod staging;
pub mod status;
pub mod storage;
pub mod worker;

// Re-export commonly used types for convenience
pub use agent::{CancelHandle, FileTransferAgent};
pub use compression::CompressionFormat;
pub use config::AgentConfig;
pub use error::{Result, TransferError};
pub use metadata::{FileMetadata, TransferStatus};
pub use plan::{CommandParser, TransferDirection, TransferPlan};
pub use status::StatusView;
pub use storage::{StageClientFactory, StorageClient, StorageError, StoreAdapter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
