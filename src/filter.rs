/*!
 * Pre-transfer skip filter
 *
 * Eliminates files already present at the destination with matching
 * content. Destination names are reverse-mapped to plan entries (name
 * collisions surface here), the remote catalog is listed once under the
 * greatest common prefix of all destination names, and each candidate is
 * compared by size, then by digest: the stored upload digest when
 * present, the ETag against a local MD5 for unencrypted objects, and no
 * comparison at all for encrypted objects without a stored digest.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use md5::{Digest as Md5Digest, Md5};
use tracing::debug;

use crate::config::SKIP_SIZE_TOLERANCE;
use crate::error::{Result, TransferError};
use crate::metadata::{FileMetadata, TransferStatus};
use crate::plan::{StageInfo, StageKind, TransferDirection};
use crate::staging::{compress_stream, digest_file};
use crate::storage::{StageLocation, StorageError, StoreAdapter};

/// Everything the filter needs from the orchestrator
pub struct FilterContext<'a> {
    pub direction: TransferDirection,
    pub stage: &'a StageInfo,
    /// Retrying adapter; present for object-store stages
    pub adapter: Option<&'a StoreAdapter>,
    /// Local download directory (downloads only)
    pub local_location: Option<&'a Path>,
}

type MetadataMap = Arc<Mutex<HashMap<String, FileMetadata>>>;

/// Mark plan entries whose destination already holds identical content
pub async fn filter_existing_files(ctx: FilterContext<'_>, metadata: &MetadataMap) -> Result<()> {
    let dest_to_src = build_reverse_map(metadata);
    if dest_to_src.is_empty() {
        return Ok(());
    }

    let mut stage_names: Vec<String> = match ctx.direction {
        TransferDirection::Upload => dest_to_src.keys().cloned().collect(),
        TransferDirection::Download => dest_to_src.values().cloned().collect(),
    };
    stage_names.sort();

    let prefix = greatest_common_prefix(
        stage_names.first().unwrap(),
        stage_names.last().unwrap(),
    );
    debug!(prefix, "greatest common prefix for existing-file check");

    match ctx.stage.kind {
        StageKind::ObjectStore => {
            let adapter = ctx.adapter.ok_or_else(|| {
                TransferError::Internal("no storage adapter for object-store stage".to_string())
            })?;
            filter_remote(&ctx, adapter, metadata, &dest_to_src, prefix).await
        }
        StageKind::LocalFs => filter_local_stage(&ctx, metadata, &dest_to_src, &stage_names),
    }
}

/// Reverse map destination name -> source key. A destination claimed
/// twice marks the earlier entry COLLISION.
fn build_reverse_map(metadata: &MetadataMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut guard = metadata.lock().expect("metadata lock poisoned");

    let mut src_keys: Vec<String> = guard.keys().cloned().collect();
    src_keys.sort();

    for src_key in src_keys {
        let dest_name = match guard.get(&src_key).and_then(|m| m.dest_name.clone()) {
            Some(name) => name,
            None => {
                debug!(src = %src_key, "no dest file name, not considered for skipping");
                continue;
            }
        };

        if let Some(prev_src) = map.insert(dest_name.clone(), src_key.clone()) {
            if let Some(prev) = guard.get_mut(&prev_src) {
                prev.mark(
                    TransferStatus::Collision,
                    format!("{} has same name as {}", prev_src, src_key),
                );
            }
        }
    }

    map
}

async fn filter_remote(
    ctx: &FilterContext<'_>,
    adapter: &StoreAdapter,
    metadata: &MetadataMap,
    dest_to_src: &HashMap<String, String>,
    prefix: String,
) -> Result<()> {
    let location = StageLocation::parse(&ctx.stage.location);
    let objects = adapter.list(&location.key_for(&prefix)).await?;

    for object in objects {
        let base_name = object.base_name().to_string();
        let Some(src_key) = dest_to_src.get(&base_name) else {
            continue;
        };

        debug!(src = %src_key, remote = %object.key, "comparing against existing object");

        let local_file = match ctx.direction {
            TransferDirection::Upload => PathBuf::from(src_key),
            TransferDirection::Download => match ctx.local_location {
                Some(dir) => dir.join(&base_name),
                None => continue,
            },
        };

        if ctx.direction == TransferDirection::Download && !local_file.exists() {
            debug!(src = %src_key, "file does not exist locally, will download");
            continue;
        }

        let require_compress = {
            let guard = metadata.lock().expect("metadata lock poisoned");
            guard.get(src_key).map(|m| m.require_compress).unwrap_or(false)
        };

        // size gate: past the tolerance, no digest comparison needed
        if !require_compress {
            let local_len = std::fs::metadata(&local_file)?.len();
            if object.size.abs_diff(local_len) > SKIP_SIZE_TOLERANCE {
                debug!(src = %src_key, "size differs from remote, will transfer");
                continue;
            }
        }

        let head = match adapter.head(&object.key).await {
            Ok(head) => head,
            // listed but gone by the time we head it: raced another
            // writer, safe to transfer
            Err(TransferError::Storage(StorageError::NotFound { .. })) => {
                debug!(key = %object.key, "object missing on head, will transfer");
                continue;
            }
            Err(err) => return Err(err),
        };

        let stored_digest = head.stored_digest().map(|s| s.to_string());
        let remote_encrypted = head.is_encrypted();

        let matches = {
            let local_file = local_file.clone();
            let etag = object.etag.clone();
            tokio::task::spawn_blocking(move || -> Result<bool> {
                if let Some(remote_digest) = stored_digest {
                    let local_digest = local_digest(&local_file, require_compress)?;
                    Ok(local_digest == remote_digest)
                } else if !remote_encrypted {
                    let local_md5 = md5_file(&local_file)?;
                    Ok(etag.map(|e| e.trim_matches('"') == local_md5).unwrap_or(false))
                } else {
                    // encrypted without a stored digest: never skip
                    Ok(false)
                }
            })
            .await
            .map_err(|e| TransferError::Internal(e.to_string()))??
        };

        if matches {
            skip_file(metadata, src_key, &base_name);
        } else {
            debug!(src = %src_key, "digest differs from remote, will transfer");
        }
    }

    Ok(())
}

fn filter_local_stage(
    ctx: &FilterContext<'_>,
    metadata: &MetadataMap,
    dest_to_src: &HashMap<String, String>,
    stage_names: &[String],
) -> Result<()> {
    let mut stage_root = ctx.stage.location.clone();
    if let Some(rest) = stage_root.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            stage_root = format!("{}{}", home.display(), rest);
        }
    }
    let stage_root = PathBuf::from(stage_root);

    for stage_name in stage_names {
        let stage_path = stage_root.join(stage_name);
        if !stage_path.exists() {
            continue;
        }

        let src_key = match ctx.direction {
            TransferDirection::Upload => match dest_to_src.get(stage_name) {
                Some(src) => src.clone(),
                None => continue,
            },
            TransferDirection::Download => stage_name.clone(),
        };

        let (require_compress, dest_name) = {
            let guard = metadata.lock().expect("metadata lock poisoned");
            match guard.get(&src_key) {
                Some(m) => (m.require_compress, m.dest_name.clone()),
                None => continue,
            }
        };

        let local_file = match ctx.direction {
            TransferDirection::Upload => PathBuf::from(&src_key),
            TransferDirection::Download => match (ctx.local_location, dest_name) {
                (Some(dir), Some(name)) => dir.join(name),
                _ => continue,
            },
        };
        if !local_file.exists() {
            continue;
        }

        if !require_compress {
            let stage_len = std::fs::metadata(&stage_path)?.len();
            let local_len = std::fs::metadata(&local_file)?.len();
            if stage_len != local_len {
                debug!(src = %src_key, "size differs from stage, will transfer");
                continue;
            }
        }

        let local_hash = local_digest(&local_file, require_compress)?;
        let stage_hash = digest_file(&stage_path)?;

        if local_hash == stage_hash {
            skip_file(metadata, &src_key, stage_name);
        } else {
            debug!(src = %src_key, "digest differs from stage, will transfer");
        }
    }

    Ok(())
}

/// Digest the local file under the same pipeline its upload would use
fn local_digest(path: &Path, require_compress: bool) -> Result<String> {
    if require_compress {
        let file = std::fs::File::open(path).map_err(|e| {
            TransferError::Staging(format!("Error reading {}: {}", path.display(), e))
        })?;
        let staged = compress_stream(std::io::BufReader::new(file), true)?;
        staged
            .digest
            .ok_or_else(|| TransferError::Internal("compress_stream returned no digest".to_string()))
    } else {
        digest_file(path)
    }
}

/// MD5 hex of the raw local file, for comparison against an ETag
fn md5_file(path: &Path) -> Result<String> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .map_err(|e| TransferError::Staging(format!("Error reading {}: {}", path.display(), e)))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn skip_file(metadata: &MetadataMap, src_key: &str, dest_name: &str) {
    let mut guard = metadata.lock().expect("metadata lock poisoned");
    if let Some(meta) = guard.get_mut(src_key) {
        if meta.status == TransferStatus::Unknown {
            debug!(src = %src_key, "marking as skipped");
            meta.mark(
                TransferStatus::Skipped,
                format!(
                    "File with same destination name and checksum already exists: {}",
                    dest_name
                ),
            );
        } else {
            debug!(src = %src_key, status = %meta.status, "status already set, not skipping");
        }
    }
}

/// Common leading characters of two strings
fn greatest_common_prefix(first: &str, last: &str) -> String {
    first
        .chars()
        .zip(last.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a)
        .collect()
}
