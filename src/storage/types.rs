//! Type definitions for the object-store boundary

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::staging::{SharedStagedReader, StagedBuffer};

/// Object user-metadata key carrying the base64 SHA-256 of the uploaded
/// byte stream, used by the skip filter.
pub const DIGEST_METADATA_KEY: &str = "sfc-digest";

/// Object user-metadata key present when the object was written with
/// client-side envelope encryption.
pub const MATDESC_METADATA_KEY: &str = "x-amz-matdesc";

/// Summary of one remote object as returned by a listing
#[derive(Debug, Clone)]
pub struct RemoteObject {
    /// Full key within the stage
    pub key: String,

    /// Object size in bytes
    pub size: u64,

    /// ETag; MD5 hex for single-part unencrypted objects
    pub etag: Option<String>,
}

impl RemoteObject {
    /// Key component after the last `/`
    pub fn base_name(&self) -> &str {
        match self.key.rfind('/') {
            Some(idx) => &self.key[idx + 1..],
            None => &self.key,
        }
    }
}

/// Detailed object metadata as returned by a head call
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub content_length: u64,
    pub etag: Option<String>,
    pub content_encoding: Option<String>,
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMetadata {
    /// Digest stored by a previous upload, if any
    pub fn stored_digest(&self) -> Option<&str> {
        self.user_metadata.get(DIGEST_METADATA_KEY).map(|s| s.as_str())
    }

    /// Whether the object was written with client-side encryption
    pub fn is_encrypted(&self) -> bool {
        self.user_metadata.contains_key(MATDESC_METADATA_KEY)
    }
}

/// A stage location split into its bucket and path components. The first
/// `/` separates the two; everything after it is a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLocation {
    pub bucket: String,
    pub path: String,
}

impl StageLocation {
    pub fn parse(location: &str) -> Self {
        match location.find('/') {
            Some(idx) => Self {
                bucket: location[..idx].to_string(),
                path: location[idx + 1..].to_string(),
            },
            None => Self {
                bucket: location.to_string(),
                path: String::new(),
            },
        }
    }

    /// Full key for a name under this location's path prefix
    pub fn key_for(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        }
    }
}

/// Re-openable source of upload bytes. Retries and SDK-internal multipart
/// logic may open the body more than once.
#[derive(Clone)]
pub enum BodySource {
    /// Raw file on disk
    File(PathBuf),

    /// Staged bytes (compressed and/or digested), shared across retries
    Staged(Arc<StagedBuffer>),

    /// In-memory payload
    Bytes(Bytes),
}

impl BodySource {
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            BodySource::File(path) => Ok(Box::new(std::fs::File::open(path)?)),
            BodySource::Staged(buffer) => Ok(Box::new(SharedStagedReader::new(buffer.clone())?)),
            BodySource::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }
}

impl std::fmt::Debug for BodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BodySource::File(path) => f.debug_tuple("File").field(path).finish(),
            BodySource::Staged(buffer) => f
                .debug_struct("Staged")
                .field("len", &buffer.len())
                .field("spilled", &buffer.is_spilled())
                .finish(),
            BodySource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
        }
    }
}

/// One upload request handed to the storage client
#[derive(Debug, Clone)]
pub struct PutRequest {
    /// Full key within the stage
    pub key: String,

    /// Re-openable body
    pub body: BodySource,

    /// Exact byte count of the body (Content-Length)
    pub content_length: u64,

    /// User metadata to attach (digest, encryption descriptor)
    pub user_metadata: HashMap<String, String>,

    /// Content-Encoding, set when the destination is compressed with a
    /// supported codec
    pub content_encoding: Option<String>,

    /// Part-level parallelism the client may use for this object
    pub inner_parallel: usize,
}
