/*!
 * Error types for stagehand
 */

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug)]
pub enum TransferError {
    /// Failed to list a local directory while expanding wildcards
    ListFiles {
        dir: PathBuf,
        patterns: Vec<String>,
        message: String,
    },

    /// The upstream command parser returned something we could not decode
    CommandParse(String),

    /// The local path reported by the command parser does not match the
    /// path parsed from the original command text
    LocalPathMismatch { from_parser: String, parsed: String },

    /// Compression codec named in the plan is not known
    CompressionUnknown(String),

    /// Compression codec is known but not supported for transfer
    CompressionUnsupported(String),

    /// Error staging bytes (gzip or digest pipeline)
    Staging(String),

    /// Object-store failure that survived the retry loop
    Storage(StorageError),

    /// Download target path exists but is not a directory
    NotADirectory(PathBuf),

    /// I/O error
    Io(io::Error),

    /// Transfer interrupted (cancellation or worker teardown)
    Interrupted(String),

    /// Test-only simulated upload failure
    SimulatedUploadFailure(String),

    /// Internal invariant violation
    Internal(String),

    /// Configuration error
    Config(String),
}

impl TransferError {
    /// Fatal errors abort the whole command; everything else is contained
    /// to the file that raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransferError::ListFiles { .. } => true,
            TransferError::CommandParse(_) => true,
            TransferError::LocalPathMismatch { .. } => true,
            TransferError::NotADirectory(_) => true,
            TransferError::Config(_) => true,
            TransferError::Internal(_) => true,
            TransferError::Storage(err) => matches!(err, StorageError::InvalidKey(_)),

            TransferError::CompressionUnknown(_) => false,
            TransferError::CompressionUnsupported(_) => false,
            TransferError::Staging(_) => false,
            TransferError::Io(_) => false,
            TransferError::Interrupted(_) => false,
            TransferError::SimulatedUploadFailure(_) => false,
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::ListFiles {
                dir,
                patterns,
                message,
            } => {
                write!(
                    f,
                    "Failed to list files. Dir={}, Patterns={:?}: {}",
                    dir.display(),
                    patterns,
                    message
                )
            }
            TransferError::CommandParse(msg) => {
                write!(f, "Failed to parse command response: {}", msg)
            }
            TransferError::LocalPathMismatch {
                from_parser,
                parsed,
            } => {
                write!(
                    f,
                    "Unexpected local file path from command parser. Received: {}, expected: {}",
                    from_parser, parsed
                )
            }
            TransferError::CompressionUnknown(name) => {
                write!(f, "Unknown compression type: {}", name)
            }
            TransferError::CompressionUnsupported(name) => {
                write!(f, "Compression type not supported: {}", name)
            }
            TransferError::Staging(msg) => {
                write!(f, "Error staging data for transfer: {}", msg)
            }
            TransferError::Storage(err) => {
                write!(f, "{}", err)
            }
            TransferError::NotADirectory(path) => {
                write!(f, "Not a directory: {}", path.display())
            }
            TransferError::Io(err) => {
                write!(f, "I/O error: {}", err)
            }
            TransferError::Interrupted(msg) => {
                write!(f, "Transfer interrupted: {}", msg)
            }
            TransferError::SimulatedUploadFailure(name) => {
                write!(f, "Simulated upload failure for {}", name)
            }
            TransferError::Internal(msg) => {
                write!(f, "Internal error: {}", msg)
            }
            TransferError::Config(msg) => {
                write!(f, "Configuration error: {}", msg)
            }
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Io(err) => Some(err),
            TransferError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err)
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::CommandParse(format!("JSON parse error: {}", err))
    }
}

impl From<StorageError> for TransferError {
    fn from(err: StorageError) -> Self {
        TransferError::Storage(err)
    }
}
