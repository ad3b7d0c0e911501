//! Storage client capability traits
//!
//! The wire-level client (multipart internals, range downloads, envelope
//! encryption) lives outside this crate. The core only assumes the
//! surface below; implementations must be safe for concurrent use and
//! may retry multipart operations internally up to
//! [`TRANSFER_SDK_MAX_RETRIES`](crate::config::TRANSFER_SDK_MAX_RETRIES)
//! times, composed with the adapter's outer budget.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{ObjectMetadata, PutRequest, RemoteObject};
use crate::error::Result;
use crate::plan::{EncryptionMaterial, StageInfo};

/// Operations the transfer core needs from a stage's object store
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Upload one object. The request body is re-openable; retries may
    /// read it from the start again.
    async fn put_object(&self, request: &PutRequest) -> StorageResult<()>;

    /// Download one object into `dest_dir/dest_name`, returning the
    /// number of bytes written.
    async fn get_object(
        &self,
        key: &str,
        dest_dir: &Path,
        dest_name: &str,
    ) -> StorageResult<u64>;

    /// List objects whose key starts with `prefix`
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>>;

    /// Fetch metadata for one object
    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata>;

    /// Release connections and other client resources
    async fn shutdown(&self) {}
}

/// Builds storage clients for a stage. A fresh client is requested on
/// credential renewal; `parallel` sizes the client's connection pool and
/// `encryption` carries the per-file envelope-encryption descriptor.
#[async_trait]
pub trait StageClientFactory: Send + Sync {
    async fn create(
        &self,
        stage: &StageInfo,
        parallel: usize,
        encryption: Option<&EncryptionMaterial>,
    ) -> Result<Arc<dyn StorageClient>>;
}
