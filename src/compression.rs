/*!
 * Compression format table and source classification
 *
 * Detection order for auto-detect: content probe (a four-byte peek that
 * recognizes only the Parquet header), then filename extension. Formats
 * outside the supported set are classified but rejected for transfer.
 */

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Result, TransferError};

/// Compression formats recognized on source files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    Gzip,
    Deflate,
    RawDeflate,
    Bzip2,
    Lzip,
    Lzma,
    Lzo,
    Xz,
    Compress,
    Parquet,
}

impl CompressionFormat {
    pub const ALL: [CompressionFormat; 10] = [
        CompressionFormat::Gzip,
        CompressionFormat::Deflate,
        CompressionFormat::RawDeflate,
        CompressionFormat::Bzip2,
        CompressionFormat::Lzip,
        CompressionFormat::Lzma,
        CompressionFormat::Lzo,
        CompressionFormat::Xz,
        CompressionFormat::Compress,
        CompressionFormat::Parquet,
    ];

    /// Canonical file extension, including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => ".gz",
            CompressionFormat::Deflate => ".deflate",
            CompressionFormat::RawDeflate => ".raw_deflate",
            CompressionFormat::Bzip2 => ".bz2",
            CompressionFormat::Lzip => ".lz",
            CompressionFormat::Lzma => ".lzma",
            CompressionFormat::Lzo => ".lzo",
            CompressionFormat::Xz => ".xz",
            CompressionFormat::Compress => ".Z",
            CompressionFormat::Parquet => ".parquet",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            CompressionFormat::Parquet => "snowflake",
            _ => "application",
        }
    }

    /// Mime subtypes this format is known by; the first one is canonical
    pub fn mime_subtypes(&self) -> &'static [&'static str] {
        match self {
            CompressionFormat::Gzip => &["gzip", "x-gzip"],
            CompressionFormat::Deflate => &["zlib", "deflate"],
            CompressionFormat::RawDeflate => &["raw_deflate"],
            CompressionFormat::Bzip2 => &["bzip2", "x-bzip2", "x-bz2", "x-bzip", "bz2"],
            CompressionFormat::Lzip => &["lzip", "x-lzip"],
            CompressionFormat::Lzma => &["lzma", "x-lzma"],
            CompressionFormat::Lzo => &["lzop", "x-lzop"],
            CompressionFormat::Xz => &["xz", "x-xz"],
            CompressionFormat::Compress => &["compress", "x-compress"],
            CompressionFormat::Parquet => &["parquet"],
        }
    }

    /// Whether files in this format can be transferred as-is
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            CompressionFormat::Gzip
                | CompressionFormat::Deflate
                | CompressionFormat::RawDeflate
                | CompressionFormat::Bzip2
                | CompressionFormat::Parquet
        )
    }

    /// Upper-case name used in status rows and content encoding
    pub fn name(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "GZIP",
            CompressionFormat::Deflate => "DEFLATE",
            CompressionFormat::RawDeflate => "RAW_DEFLATE",
            CompressionFormat::Bzip2 => "BZIP2",
            CompressionFormat::Lzip => "LZIP",
            CompressionFormat::Lzma => "LZMA",
            CompressionFormat::Lzo => "LZO",
            CompressionFormat::Xz => "XZ",
            CompressionFormat::Compress => "COMPRESS",
            CompressionFormat::Parquet => "PARQUET",
        }
    }

    /// Look up a format by one of its mime subtypes (case-insensitive)
    pub fn lookup_by_subtype(subtype: &str) -> Option<CompressionFormat> {
        let subtype = subtype.to_ascii_lowercase();
        CompressionFormat::ALL
            .into_iter()
            .find(|f| f.mime_subtypes().contains(&subtype.as_str()))
    }

    /// Derive a format from the file name extension
    pub fn from_file_name(name: &str) -> Option<CompressionFormat> {
        let lower = name.to_ascii_lowercase();
        CompressionFormat::ALL
            .into_iter()
            .find(|f| lower.ends_with(&f.extension().to_ascii_lowercase()))
    }

    /// Content-level detection recognizes only the Parquet header; every
    /// other format is resolved from the file name.
    pub fn sniff(header: &[u8]) -> Option<CompressionFormat> {
        if header.starts_with(b"PAR1") {
            Some(CompressionFormat::Parquet)
        } else {
            None
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How the plan describes source compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCompressionHint {
    /// Probe file contents, then fall back to the extension
    Auto,
    /// Treat every source as uncompressed raw bytes
    None,
    /// Caller-specified format applied to all sources
    Named(CompressionFormat),
}

impl SourceCompressionHint {
    /// Parse the plan's `sourceCompression` string. Unknown names and
    /// known-but-unsupported formats are both rejected.
    pub fn parse(value: &str) -> Result<SourceCompressionHint> {
        if value.eq_ignore_ascii_case("auto_detect") {
            return Ok(SourceCompressionHint::Auto);
        }
        if value.eq_ignore_ascii_case("none") {
            return Ok(SourceCompressionHint::None);
        }
        match CompressionFormat::lookup_by_subtype(value) {
            Some(format) if format.is_supported() => Ok(SourceCompressionHint::Named(format)),
            Some(format) => Err(TransferError::CompressionUnsupported(
                format.name().to_string(),
            )),
            None => Err(TransferError::CompressionUnknown(value.to_string())),
        }
    }
}

/// Outcome of classifying a single source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub src_compression: Option<CompressionFormat>,
    pub dest_compression: Option<CompressionFormat>,
    pub require_compress: bool,
    pub dest_name: String,
}

/// Probe a file's content: peek the first four bytes for the Parquet
/// header. Other formats are not detectable from content here.
pub fn probe_file(path: &Path) -> std::io::Result<Option<CompressionFormat>> {
    let mut file = File::open(path)?;
    let mut header = [0u8; 4];
    let n = file.read(&mut header)?;
    Ok(CompressionFormat::sniff(&header[..n]))
}

/// Classify one upload source file.
///
/// `detected` short-circuits the probe for named hints; pass `None` with
/// `SourceCompressionHint::Auto` to sniff content and fall back to the
/// file extension.
pub fn classify_file(
    path: &Path,
    src_name: &str,
    hint: SourceCompressionHint,
    auto_compress: bool,
) -> Result<Classification> {
    let detected = match hint {
        SourceCompressionHint::None => None,
        SourceCompressionHint::Named(format) => Some(format),
        SourceCompressionHint::Auto => {
            let sniffed = probe_file(path).map_err(|e| {
                TransferError::Staging(format!("Error probing {}: {}", path.display(), e))
            })?;
            sniffed.or_else(|| CompressionFormat::from_file_name(src_name))
        }
    };

    match detected {
        Some(format) if format.is_supported() => Ok(Classification {
            src_compression: Some(format),
            dest_compression: Some(format),
            require_compress: false,
            dest_name: src_name.to_string(),
        }),
        Some(format) => Err(TransferError::CompressionUnsupported(
            format.name().to_string(),
        )),
        None => Ok(classify_uncompressed(src_name, auto_compress)),
    }
}

/// Classify an uncompressed source, gzipping when auto-compress is on
fn classify_uncompressed(src_name: &str, auto_compress: bool) -> Classification {
    if auto_compress {
        Classification {
            src_compression: None,
            dest_compression: Some(CompressionFormat::Gzip),
            require_compress: true,
            dest_name: format!("{}{}", src_name, CompressionFormat::Gzip.extension()),
        }
    } else {
        Classification {
            src_compression: None,
            dest_compression: None,
            require_compress: false,
            dest_name: src_name.to_string(),
        }
    }
}

/// Classify an in-memory stream source. The destination name is the
/// caller-supplied name, with `.gz` appended when compressing unless it
/// is already there.
pub fn classify_stream(
    dest_name: &str,
    hint: SourceCompressionHint,
    compress: bool,
) -> Classification {
    let src_compression = match hint {
        SourceCompressionHint::Named(format) => Some(format),
        _ => None,
    };

    let gz = CompressionFormat::Gzip.extension();
    let (dest_compression, dest_name) = if compress {
        let name = if dest_name.ends_with(gz) {
            dest_name.to_string()
        } else {
            format!("{}{}", dest_name, gz)
        };
        (Some(CompressionFormat::Gzip), name)
    } else {
        (src_compression, dest_name.to_string())
    };

    Classification {
        src_compression,
        dest_compression,
        require_compress: compress,
        dest_name,
    }
}
