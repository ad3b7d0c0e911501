/*!
 * Per-file transfer metadata and result statuses
 */

use std::fmt;

use crate::compression::CompressionFormat;

/// Terminal and in-flight statuses for a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Unknown,
    Uploaded,
    Downloaded,
    Skipped,
    Error,
    Nonexist,
    Directory,
    Collision,
    Unsupported,
}

impl TransferStatus {
    pub fn name(&self) -> &'static str {
        match self {
            TransferStatus::Unknown => "UNKNOWN",
            TransferStatus::Uploaded => "UPLOADED",
            TransferStatus::Downloaded => "DOWNLOADED",
            TransferStatus::Skipped => "SKIPPED",
            TransferStatus::Error => "ERROR",
            TransferStatus::Nonexist => "NONEXIST",
            TransferStatus::Directory => "DIRECTORY",
            TransferStatus::Collision => "COLLISION",
            TransferStatus::Unsupported => "UNSUPPORTED",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TransferStatus::Unknown => "Unknown status",
            TransferStatus::Uploaded => "File uploaded",
            TransferStatus::Downloaded => "File downloaded",
            TransferStatus::Skipped => "Skipped since file exists",
            TransferStatus::Error => "Error encountered",
            TransferStatus::Nonexist => "File does not exist",
            TransferStatus::Directory => "Not a file, but directory",
            TransferStatus::Collision => "File name collides with another file",
            TransferStatus::Unsupported => "File type not supported",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Unknown)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Everything we track about one file in the plan. Keyed by source path
/// for uploads and by stage file name for downloads.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub src_name: String,
    pub src_size: u64,
    pub dest_name: Option<String>,
    /// -1 until the transfer fills it in
    pub dest_size: i64,
    pub src_compression: Option<CompressionFormat>,
    pub dest_compression: Option<CompressionFormat>,
    pub require_compress: bool,
    pub is_encrypted: bool,
    pub status: TransferStatus,
    pub error_details: String,
}

impl FileMetadata {
    pub fn new(src_name: impl Into<String>) -> Self {
        Self {
            src_name: src_name.into(),
            src_size: 0,
            dest_name: None,
            dest_size: -1,
            src_compression: None,
            dest_compression: None,
            require_compress: false,
            is_encrypted: false,
            status: TransferStatus::Unknown,
            error_details: String::new(),
        }
    }

    /// Move to a terminal status. Statuses are monotonic: once terminal,
    /// a row is never re-opened or overwritten.
    pub fn mark(&mut self, status: TransferStatus, details: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            tracing::debug!(
                src = %self.src_name,
                current = %self.status,
                requested = %status,
                "status already terminal, not overwriting"
            );
            return false;
        }
        self.status = status;
        self.error_details = details.into();
        true
    }
}
