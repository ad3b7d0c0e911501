//! Shared test doubles: a scripted in-memory storage client, a client
//! factory that counts creations, and a fixed-response command parser.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::{json, Value};

use stagehand::plan::{EncryptionMaterial, StageInfo};
use stagehand::storage::{
    ObjectMetadata, PutRequest, RemoteObject, StageClientFactory, StorageClient, StorageError,
    StorageResult,
};
use stagehand::{CommandParser, Result};

/// One object held by the mock store
#[derive(Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub user_metadata: HashMap<String, String>,
    pub content_encoding: Option<String>,
    pub etag: String,
}

/// In-memory storage client with scripted per-call failures
#[derive(Default)]
pub struct MockStorageClient {
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub put_calls: AtomicU32,
    pub get_calls: AtomicU32,
    pub head_calls: AtomicU32,
    pub list_calls: AtomicU32,
    /// Errors returned by successive put calls before any succeed
    pub put_failures: Mutex<VecDeque<StorageError>>,
}

impl MockStorageClient {
    pub fn seed_object(
        &self,
        key: &str,
        bytes: &[u8],
        user_metadata: HashMap<String, String>,
    ) {
        let etag = format!("{:x}", Md5::digest(bytes));
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                user_metadata,
                content_encoding: None,
                etag,
            },
        );
    }

    pub fn script_put_failures(&self, failures: Vec<StorageError>) {
        *self.put_failures.lock().unwrap() = failures.into();
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl StorageClient for MockStorageClient {
    async fn put_object(&self, request: &PutRequest) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.put_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut bytes = Vec::new();
        request.body.open()?.read_to_end(&mut bytes)?;
        let etag = format!("{:x}", Md5::digest(&bytes));

        self.objects.lock().unwrap().insert(
            request.key.clone(),
            StoredObject {
                bytes,
                user_metadata: request.user_metadata.clone(),
                content_encoding: request.content_encoding.clone(),
                etag,
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str, dest_dir: &Path, dest_name: &str) -> StorageResult<u64> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let object = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })?;

        std::fs::create_dir_all(dest_dir)?;
        std::fs::write(dest_dir.join(dest_name), &object.bytes)?;
        Ok(object.bytes.len() as u64)
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<RemoteObject>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| RemoteObject {
                key: key.clone(),
                size: object.bytes.len() as u64,
                etag: Some(object.etag.clone()),
            })
            .collect())
    }

    async fn head_object(&self, key: &str) -> StorageResult<ObjectMetadata> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);

        let objects = self.objects.lock().unwrap();
        let object = objects.get(key).ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })?;
        Ok(ObjectMetadata {
            content_length: object.bytes.len() as u64,
            etag: Some(object.etag.clone()),
            content_encoding: object.content_encoding.clone(),
            user_metadata: object.user_metadata.clone(),
        })
    }
}

/// Factory returning a shared mock client; counts creations so tests can
/// assert on credential renewal.
pub struct MockFactory {
    pub client: Arc<MockStorageClient>,
    pub creates: AtomicU32,
}

impl MockFactory {
    pub fn new(client: Arc<MockStorageClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            creates: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl StageClientFactory for MockFactory {
    async fn create(
        &self,
        _stage: &StageInfo,
        _parallel: usize,
        _encryption: Option<&EncryptionMaterial>,
    ) -> Result<Arc<dyn StorageClient>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.client.clone())
    }
}

/// Command parser returning a fixed response; counts invocations so
/// tests can assert on renewal round-trips.
pub struct MockParser {
    pub response: Value,
    pub calls: AtomicU32,
}

impl MockParser {
    pub fn new(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CommandParser for MockParser {
    async fn execute_command(&self, _command_text: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Encryption material literal used across tests
pub fn encryption_material_json() -> Value {
    json!({
        "queryStageMasterKey": "d2tleQ==",
        "queryId": "q-test",
        "smkId": 1234
    })
}

/// Upload command response against an object-store stage
pub fn upload_response(
    src_locations: &[&str],
    stage_location: &str,
    auto_compress: bool,
    encrypted: bool,
) -> Value {
    json!({
        "data": {
            "command": "UPLOAD",
            "src_locations": src_locations,
            "parallel": 4,
            "overwrite": false,
            "autoCompress": auto_compress,
            "sourceCompression": "auto_detect",
            "clientShowEncryptionParameter": false,
            "stageInfo": {
                "locationType": "S3",
                "location": stage_location,
                "region": "us-west-2",
                "creds": {"AWS_ID": "id", "AWS_KEY": "key"}
            },
            "encryptionMaterial": (if encrypted { encryption_material_json() } else { Value::Null })
        }
    })
}

/// Download command response against an object-store stage
pub fn download_response(src_locations: &[&str], stage_location: &str, local_dir: &str) -> Value {
    json!({
        "data": {
            "command": "DOWNLOAD",
            "src_locations": src_locations,
            "parallel": 2,
            "overwrite": false,
            "localLocation": local_dir,
            "stageInfo": {
                "locationType": "S3",
                "location": stage_location,
                "region": "us-west-2",
                "creds": {"AWS_ID": "id", "AWS_KEY": "key"}
            },
            "encryptionMaterial": []
        }
    })
}
