//! Retrying façade over the storage client
//!
//! Every call goes through a retry loop that classifies failures by
//! variant: service errors back off exponentially against the outer
//! budget, interruptions and timeouts are re-driven without backoff,
//! expired credentials trigger a client rebuild that does not consume
//! budget, and invalid-key errors fail immediately with a policy
//! diagnostic. Credential renewal swaps the shared client atomically, so
//! concurrent workers pick up the fresh client on their next call.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::{StageClientFactory, StorageClient};
use super::error::StorageError;
use super::types::{ObjectMetadata, PutRequest, RemoteObject};
use crate::config::{CLIENT_SIDE_MAX_RETRIES, RETRY_BACKOFF_MAX_EXPONENT, RETRY_BACKOFF_MIN_MS};
use crate::error::{Result, TransferError};
use crate::plan::{CommandParser, EncryptionMaterial, StageInfo};

/// Rebuilds the storage client with fresh stage credentials by re-running
/// the original command through the upstream parser.
pub struct CredentialRenewer {
    parser: Arc<dyn CommandParser>,
    command: String,
    factory: Arc<dyn StageClientFactory>,
    parallel: usize,
    encryption: Option<EncryptionMaterial>,
}

impl CredentialRenewer {
    pub fn new(
        parser: Arc<dyn CommandParser>,
        command: impl Into<String>,
        factory: Arc<dyn StageClientFactory>,
        parallel: usize,
        encryption: Option<EncryptionMaterial>,
    ) -> Self {
        Self {
            parser,
            command: command.into(),
            factory,
            parallel,
            encryption,
        }
    }

    async fn renew(&self) -> Result<Arc<dyn StorageClient>> {
        let response = self.parser.execute_command(&self.command).await?;
        let stage = StageInfo::from_response(&response)?;
        self.factory
            .create(&stage, self.parallel, self.encryption.as_ref())
            .await
    }
}

/// Storage client handle with retry, backoff and credential renewal
pub struct StoreAdapter {
    client: RwLock<Arc<dyn StorageClient>>,
    renewer: Option<CredentialRenewer>,
}

impl StoreAdapter {
    pub fn new(client: Arc<dyn StorageClient>, renewer: Option<CredentialRenewer>) -> Self {
        Self {
            client: RwLock::new(client),
            renewer,
        }
    }

    pub async fn put(&self, request: PutRequest) -> Result<()> {
        self.with_retry("putObject", move |client| {
            let request = request.clone();
            async move { client.put_object(&request).await }
        })
        .await
    }

    pub async fn get(&self, key: &str, dest_dir: &Path, dest_name: &str) -> Result<u64> {
        let key = key.to_string();
        let dest_dir: PathBuf = dest_dir.to_path_buf();
        let dest_name = dest_name.to_string();
        self.with_retry("getObject", move |client| {
            let key = key.clone();
            let dest_dir = dest_dir.clone();
            let dest_name = dest_name.clone();
            async move { client.get_object(&key, &dest_dir, &dest_name).await }
        })
        .await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let prefix = prefix.to_string();
        self.with_retry("listObjects", move |client| {
            let prefix = prefix.clone();
            async move { client.list_objects(&prefix).await }
        })
        .await
    }

    pub async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let key = key.to_string();
        self.with_retry("headObject", move |client| {
            let key = key.clone();
            async move { client.head_object(&key).await }
        })
        .await
    }

    pub async fn shutdown(&self) {
        self.client.read().await.shutdown().await;
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Fn(Arc<dyn StorageClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, StorageError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let client = self.client.read().await.clone();
            let err = match call(client).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err {
                StorageError::InvalidKey(detail) => {
                    return Err(TransferError::Storage(StorageError::InvalidKey(format!(
                        "Strong client-side encryption requires unlimited-strength \
                         cryptography policy files; install them under <jre>/lib/security \
                         or contact support. Operation: {}. {}",
                        operation, detail
                    ))));
                }
                StorageError::ExpiredCredential => match &self.renewer {
                    Some(renewer) => {
                        debug!(operation, "stage credentials expired, rebuilding client");
                        let fresh = renewer.renew().await?;
                        *self.client.write().await = fresh;
                        // renewal does not consume retry budget
                        continue;
                    }
                    None => return Err(StorageError::ExpiredCredential.into()),
                },
                StorageError::NotFound { .. } => return Err(err.into()),
                StorageError::Interrupted(_) | StorageError::Timeout(_) => {
                    attempt += 1;
                    if attempt > CLIENT_SIDE_MAX_RETRIES {
                        return Err(TransferError::Io(std::io::Error::other(format!(
                            "Encountered exception during {}: {}",
                            operation, err
                        ))));
                    }
                    debug!(operation, attempt, error = %err, "retrying interrupted call");
                    continue;
                }
                StorageError::Service { .. } => {
                    attempt += 1;
                    if attempt > CLIENT_SIDE_MAX_RETRIES {
                        return Err(err.into());
                    }
                    let backoff = backoff_for(attempt);
                    debug!(
                        operation,
                        attempt,
                        sleep_ms = backoff.as_millis() as u64,
                        error = %err,
                        "transient service error, backing off before retry"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                StorageError::Io(_) => {
                    warn!(operation, error = %err, "storage call failed");
                    return Err(err.into());
                }
            }
        }
    }
}

/// Exponential backoff: 1 s doubling per attempt, capped at 16 s
fn backoff_for(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(RETRY_BACKOFF_MAX_EXPONENT);
    Duration::from_millis(RETRY_BACKOFF_MIN_MS << exponent)
}
