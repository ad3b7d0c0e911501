/*!
 * Transfer plan decoding and the upstream command-parser capability
 *
 * The SQL-like command is parsed by an external service; this module
 * decodes its JSON response into a `TransferPlan` and re-parses the
 * `file://` argument from the original command text as a defense against
 * a tampering middleman.
 */

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DEFAULT_PARALLEL;
use crate::error::{Result, TransferError};

const FILE_PROTOCOL: &str = "file://";

/// Credential map keys for object-store stages
pub const CRED_AWS_ID: &str = "AWS_ID";
pub const CRED_AWS_KEY: &str = "AWS_KEY";
pub const CRED_AWS_TOKEN: &str = "AWS_TOKEN";

/// The opaque upstream command parser. Returns the raw JSON response the
/// plan is decoded from; also re-invoked for credential renewal.
#[async_trait]
pub trait CommandParser: Send + Sync {
    async fn execute_command(&self, command_text: &str) -> Result<Value>;
}

/// Transfer verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

impl TransferDirection {
    pub fn name(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "UPLOAD",
            TransferDirection::Download => "DOWNLOAD",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "UPLOAD" => Ok(TransferDirection::Upload),
            "DOWNLOAD" => Ok(TransferDirection::Download),
            other => Err(TransferError::CommandParse(format!(
                "unknown command type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Kind of staging area behind the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    LocalFs,
    ObjectStore,
}

/// Stage descriptor from the command parser
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub kind: StageKind,
    pub location: String,
    pub region: Option<String>,
    /// Opaque credential map (AWS_ID / AWS_KEY / optional AWS_TOKEN for
    /// object-store stages)
    pub credentials: HashMap<String, String>,
}

impl StageInfo {
    /// Decode `data.stageInfo` from a command-parser response
    pub fn from_response(response: &Value) -> Result<Self> {
        let info = &response["data"]["stageInfo"];
        if info.is_null() {
            return Err(TransferError::CommandParse(
                "missing stageInfo".to_string(),
            ));
        }

        let kind = match info["locationType"].as_str() {
            Some(s) if s.eq_ignore_ascii_case("LOCAL_FS") => StageKind::LocalFs,
            Some(s) if s.eq_ignore_ascii_case("S3") => StageKind::ObjectStore,
            Some(other) => {
                return Err(TransferError::CommandParse(format!(
                    "unknown stage location type: {}",
                    other
                )))
            }
            None => {
                return Err(TransferError::CommandParse(
                    "missing stage location type".to_string(),
                ))
            }
        };

        let location = info["location"]
            .as_str()
            .ok_or_else(|| TransferError::CommandParse("missing stage location".to_string()))?
            .to_string();

        let region = info["region"].as_str().map(|s| s.to_string());

        let credentials = match info.get("creds") {
            Some(creds) if !creds.is_null() => {
                serde_json::from_value(creds.clone()).map_err(|e| {
                    TransferError::CommandParse(format!(
                        "Failed to parse the credentials ({}) due to: {}",
                        creds, e
                    ))
                })?
            }
            _ => HashMap::new(),
        };

        Ok(Self {
            kind,
            location,
            region,
            credentials,
        })
    }
}

/// Per-file key-wrapping descriptor for client-side envelope encryption.
/// Opaque to the core; consumed by the storage client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptionMaterial {
    #[serde(rename = "queryStageMasterKey")]
    pub wrapped_key: String,

    #[serde(rename = "queryId")]
    pub query_id: String,

    #[serde(rename = "smkId")]
    pub key_id: i64,
}

/// Decoded transfer plan
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub direction: TransferDirection,

    /// Source location strings as given: local patterns for uploads,
    /// stage file names for downloads
    pub src_locations: Vec<String>,

    pub parallel: usize,
    pub overwrite: bool,
    pub auto_compress: bool,
    pub source_compression: String,
    pub show_encryption: bool,

    /// Local download directory (downloads only), tilde-expanded and
    /// absolutized
    pub local_location: Option<PathBuf>,

    pub stage: StageInfo,

    /// Single (possibly absent) material for uploads; one per source
    /// file for downloads
    pub encryption_material: Vec<Option<EncryptionMaterial>>,
}

impl TransferPlan {
    /// Decode a command-parser response. `command_text` is the original
    /// command used for the `file://` tamper check.
    pub fn from_response(command_text: &str, response: &Value) -> Result<Self> {
        let data = &response["data"];

        let direction = TransferDirection::parse(
            data["command"]
                .as_str()
                .ok_or_else(|| TransferError::CommandParse("missing command".to_string()))?,
        )?;

        let src_locations: Vec<String> = serde_json::from_value(
            data.get("src_locations").cloned().unwrap_or(Value::Null),
        )
        .map_err(|e| {
            TransferError::CommandParse(format!("Failed to parse the locations due to: {}", e))
        })?;

        let parallel = match data["parallel"].as_u64() {
            Some(n) if n >= 1 => n as usize,
            _ => DEFAULT_PARALLEL,
        };

        let overwrite = data["overwrite"].as_bool().unwrap_or(false);
        let auto_compress = data["autoCompress"].as_bool().unwrap_or(true);
        let source_compression = data["sourceCompression"]
            .as_str()
            .unwrap_or("auto_detect")
            .to_string();
        let show_encryption = data["clientShowEncryptionParameter"]
            .as_bool()
            .unwrap_or(false);

        let stage = StageInfo::from_response(response)?;
        let encryption_material = Self::parse_encryption_material(direction, data)?;

        let (local_location, verify_path) = match direction {
            TransferDirection::Upload => {
                (None, src_locations.first().cloned().unwrap_or_default())
            }
            TransferDirection::Download => {
                let raw = data["localLocation"].as_str().ok_or_else(|| {
                    TransferError::CommandParse("missing localLocation".to_string())
                })?;
                let expanded = expand_local_directory(raw)?;
                (Some(expanded), raw.to_string())
            }
        };

        verify_local_file_path(command_text, &verify_path)?;

        debug!(
            command = %direction,
            files = src_locations.len(),
            parallel,
            overwrite,
            auto_compress,
            stage_location = %stage.location,
            "parsed transfer plan"
        );

        Ok(Self {
            direction,
            src_locations,
            parallel,
            overwrite,
            auto_compress,
            source_compression,
            show_encryption,
            local_location,
            stage,
            encryption_material,
        })
    }

    fn parse_encryption_material(
        direction: TransferDirection,
        data: &Value,
    ) -> Result<Vec<Option<EncryptionMaterial>>> {
        let node = data.get("encryptionMaterial");
        match direction {
            TransferDirection::Upload => {
                let material = match node {
                    Some(v) if !v.is_null() => Some(serde_json::from_value(v.clone())?),
                    _ => None,
                };
                Ok(vec![material])
            }
            TransferDirection::Download => match node {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|v| {
                        if v.is_null() {
                            Ok(None)
                        } else {
                            Ok(Some(serde_json::from_value(v.clone())?))
                        }
                    })
                    .collect(),
                _ => Ok(Vec::new()),
            },
        }
    }

    /// The single upload-side encryption material, if supplied
    pub fn upload_encryption(&self) -> Option<&EncryptionMaterial> {
        self.encryption_material.first().and_then(|m| m.as_ref())
    }

    /// Map download source files to their per-file encryption material.
    /// Empty unless the parser returned one material per source.
    pub fn download_encryption_index(&self) -> HashMap<&str, &EncryptionMaterial> {
        let mut index = HashMap::new();
        if self.src_locations.len() == self.encryption_material.len() {
            for (src, material) in self.src_locations.iter().zip(&self.encryption_material) {
                if let Some(material) = material {
                    index.insert(src.as_str(), material);
                }
            }
        }
        index
    }
}

/// Expand `~` and make the download directory absolute. The path must
/// not be an existing regular file.
fn expand_local_directory(raw: &str) -> Result<PathBuf> {
    let mut location = raw.to_string();

    if let Some(rest) = location.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| TransferError::Config("cannot resolve home directory".to_string()))?;
        location = format!("{}{}", home.display(), rest);
    }

    if location.contains('~') {
        return Err(TransferError::NotADirectory(PathBuf::from(location)));
    }

    let mut path = PathBuf::from(&location);
    if !path.is_absolute() {
        let cwd = std::env::current_dir()?;
        path = cwd.join(path);
    }

    if path.is_file() {
        return Err(TransferError::NotADirectory(path));
    }

    Ok(path)
}

/// Re-parse the `file://` argument from the original command text and
/// assert it matches what the command parser reported. Quoted arguments
/// end at the closing quote (with backslash unescaping); unquoted ones
/// end at the first space, newline or semicolon.
pub fn verify_local_file_path(command: &str, from_parser: &str) -> Result<()> {
    let Some(proto_idx) = command.find(FILE_PROTOCOL) else {
        warn!("file:// prefix not found in command");
        return Ok(());
    };

    let begin = proto_idx + FILE_PROTOCOL.len();
    let quoted = proto_idx > 0 && command.as_bytes()[proto_idx - 1] == b'\'';

    let parsed = if quoted {
        match command[begin..].find('\'') {
            Some(end) => command[begin..begin + end].replace("\\\\", "\\"),
            None => String::new(),
        }
    } else {
        let end = [' ', '\n', ';']
            .iter()
            .filter_map(|c| command[begin..].find(*c))
            .min();
        match end {
            Some(end) => command[begin..begin + end].to_string(),
            None => command[begin..].to_string(),
        }
    };

    if parsed.is_empty() {
        warn!("failed to parse local file path from command");
        Ok(())
    } else if parsed != from_parser {
        Err(TransferError::LocalPathMismatch {
            from_parser: from_parser.to_string(),
            parsed,
        })
    } else {
        debug!(path = %parsed, "local file path matches command parser");
        Ok(())
    }
}
