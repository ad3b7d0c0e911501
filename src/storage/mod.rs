//! Object-store boundary: capability traits, value types, the LOCAL_FS
//! implementation, and the retrying adapter.
//!
//! The wire-level client (multipart upload, range download, envelope
//! encryption) is an external collaborator implementing
//! [`StorageClient`]; the core drives it exclusively through
//! [`StoreAdapter`].

mod adapter;
mod client;
mod error;
mod local;
mod types;

pub use adapter::{CredentialRenewer, StoreAdapter};
pub use client::{StageClientFactory, StorageClient};
pub use error::{StorageError, StorageResult};
pub use local::LocalStageClient;
pub use types::{
    BodySource, ObjectMetadata, PutRequest, RemoteObject, StageLocation, DIGEST_METADATA_KEY,
    MATDESC_METADATA_KEY,
};
