//! Storage client for LOCAL_FS stages
//!
//! A LOCAL_FS stage is a directory on the local machine; keys are file
//! names relative to it. Used both as a transfer target and as the
//! catalog the skip filter consults.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::client::StorageClient;
use super::error::{StorageError, StorageResult};
use super::types::{ObjectMetadata, PutRequest, RemoteObject};
use crate::error::{Result, TransferError};

pub struct LocalStageClient {
    root: PathBuf,
}

impl LocalStageClient {
    /// Create a client rooted at the stage location. A leading `~` is
    /// replaced with the user's home directory; relative locations are
    /// resolved against the current working directory.
    pub fn new(location: &str) -> Result<Self> {
        let mut location = location.to_string();
        if let Some(rest) = location.strip_prefix('~') {
            let home = dirs::home_dir().ok_or_else(|| {
                TransferError::Config("cannot resolve home directory".to_string())
            })?;
            location = format!("{}{}", home.display(), rest);
        }

        let mut root = PathBuf::from(&location);
        if !root.is_absolute() {
            root = std::env::current_dir()?.join(root);
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn not_found(key: &str, err: &io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            key: key.to_string(),
        }
    } else {
        StorageError::from(io::Error::new(err.kind(), err.to_string()))
    }
}

#[async_trait]
impl StorageClient for LocalStageClient {
    async fn put_object(&self, request: &PutRequest) -> StorageResult<()> {
        let dest = self.resolve(&request.key);
        let request = request.clone();

        tokio::task::spawn_blocking(move || -> StorageResult<()> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut body = request.body.open()?;
            let mut file = std::fs::File::create(&dest)?;
            io::copy(&mut body, &mut file)?;
            debug!(dest = %dest.display(), bytes = request.content_length, "wrote stage file");
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Interrupted(e.to_string()))?
    }

    async fn get_object(
        &self,
        key: &str,
        dest_dir: &Path,
        dest_name: &str,
    ) -> StorageResult<u64> {
        let src = self.resolve(key);
        let dest = dest_dir.join(dest_name);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> StorageResult<u64> {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::open(&src).map_err(|e| not_found(&key, &e))?;
            let mut out = std::fs::File::create(&dest)?;
            let bytes = io::copy(&mut file, &mut out)?;
            debug!(src = %src.display(), dest = %dest.display(), bytes, "copied stage file");
            Ok(bytes)
        })
        .await
        .map_err(|e| StorageError::Interrupted(e.to_string()))?
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || -> StorageResult<Vec<RemoteObject>> {
            let mut objects = Vec::new();
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(objects),
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let meta = entry.metadata()?;
                if !meta.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(&prefix) {
                    objects.push(RemoteObject {
                        key: name,
                        size: meta.len(),
                        etag: None,
                    });
                }
            }
            Ok(objects)
        })
        .await
        .map_err(|e| StorageError::Interrupted(e.to_string()))?
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        let path = self.resolve(key);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found(key, &e))?;
        Ok(ObjectMetadata {
            content_length: meta.len(),
            etag: None,
            content_encoding: None,
            user_metadata: Default::default(),
        })
    }
}
