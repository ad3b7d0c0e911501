/*!
 * Status view: per-file outcome rows for a driver-side consumer
 *
 * Columns are declared in tables keyed by verb and encryption
 * visibility; rows are a plain projection of the metadata map, with an
 * optional deterministic sort by source/file name.
 */

use std::collections::HashMap;

use crate::metadata::FileMetadata;
use crate::plan::TransferDirection;

const UPLOAD_COLUMNS: &[&str] = &[
    "source",
    "target",
    "source_size",
    "target_size",
    "source_compression",
    "target_compression",
    "status",
    "message",
];

const UPLOAD_ENCRYPTION_COLUMNS: &[&str] = &[
    "source",
    "target",
    "source_size",
    "target_size",
    "source_compression",
    "target_compression",
    "encryption",
    "status",
    "message",
];

const DOWNLOAD_COLUMNS: &[&str] = &["file", "size", "status", "message"];

const DOWNLOAD_ENCRYPTION_COLUMNS: &[&str] = &["file", "size", "encryption", "status", "message"];

/// Column names for a verb and encryption visibility
pub fn columns(direction: TransferDirection, show_encryption: bool) -> &'static [&'static str] {
    match (direction, show_encryption) {
        (TransferDirection::Upload, false) => UPLOAD_COLUMNS,
        (TransferDirection::Upload, true) => UPLOAD_ENCRYPTION_COLUMNS,
        (TransferDirection::Download, false) => DOWNLOAD_COLUMNS,
        (TransferDirection::Download, true) => DOWNLOAD_ENCRYPTION_COLUMNS,
    }
}

/// Materialized result rows
#[derive(Debug, Clone)]
pub struct StatusView {
    direction: TransferDirection,
    show_encryption: bool,
    rows: Vec<Vec<String>>,
}

impl StatusView {
    pub fn build(
        direction: TransferDirection,
        show_encryption: bool,
        sort: bool,
        metadata: &HashMap<String, FileMetadata>,
    ) -> Self {
        let mut rows: Vec<Vec<String>> = metadata
            .values()
            .map(|meta| match direction {
                TransferDirection::Upload => upload_row(meta, show_encryption),
                TransferDirection::Download => download_row(meta, show_encryption),
            })
            .collect();

        if sort {
            rows.sort_by(|a, b| a[0].cmp(&b[0]));
        }

        Self {
            direction,
            show_encryption,
            rows,
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        columns(self.direction, self.show_encryption)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn compression_name(format: Option<crate::compression::CompressionFormat>) -> String {
    format.map(|f| f.name().to_string()).unwrap_or_else(|| "NONE".to_string())
}

fn upload_row(meta: &FileMetadata, show_encryption: bool) -> Vec<String> {
    let mut row = vec![
        meta.src_name.clone(),
        meta.dest_name.clone().unwrap_or_default(),
        meta.src_size.to_string(),
        meta.dest_size.to_string(),
        compression_name(meta.src_compression),
        compression_name(meta.dest_compression),
    ];
    if show_encryption {
        row.push(if meta.is_encrypted {
            "ENCRYPTED".to_string()
        } else {
            String::new()
        });
    }
    row.push(meta.status.name().to_string());
    row.push(meta.error_details.clone());
    row
}

fn download_row(meta: &FileMetadata, show_encryption: bool) -> Vec<String> {
    let file = meta
        .src_name
        .strip_prefix('/')
        .unwrap_or(&meta.src_name)
        .to_string();
    let mut row = vec![file, meta.dest_size.to_string()];
    if show_encryption {
        row.push(if meta.is_encrypted {
            "DECRYPTED".to_string()
        } else {
            String::new()
        });
    }
    row.push(meta.status.name().to_string());
    row.push(meta.error_details.clone());
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionFormat;
    use crate::metadata::TransferStatus;

    fn uploaded_meta(src: &str, dest: &str) -> FileMetadata {
        let mut meta = FileMetadata::new(src);
        meta.src_size = 5;
        meta.dest_name = Some(dest.to_string());
        meta.dest_size = 25;
        meta.dest_compression = Some(CompressionFormat::Gzip);
        meta.require_compress = true;
        meta.mark(TransferStatus::Uploaded, "");
        meta
    }

    #[test]
    fn test_upload_columns() {
        assert_eq!(
            columns(TransferDirection::Upload, false),
            &[
                "source",
                "target",
                "source_size",
                "target_size",
                "source_compression",
                "target_compression",
                "status",
                "message"
            ]
        );
        assert!(columns(TransferDirection::Upload, true).contains(&"encryption"));
        assert_eq!(
            columns(TransferDirection::Download, false),
            &["file", "size", "status", "message"]
        );
    }

    #[test]
    fn test_upload_row_projection() {
        let mut map = HashMap::new();
        map.insert(
            "/tmp/a.txt".to_string(),
            uploaded_meta("/tmp/a.txt", "a.txt.gz"),
        );

        let view = StatusView::build(TransferDirection::Upload, false, false, &map);
        assert_eq!(view.len(), 1);
        let row = &view.rows()[0];
        assert_eq!(row[0], "/tmp/a.txt");
        assert_eq!(row[1], "a.txt.gz");
        assert_eq!(row[2], "5");
        assert_eq!(row[3], "25");
        assert_eq!(row[4], "NONE");
        assert_eq!(row[5], "GZIP");
        assert_eq!(row[6], "UPLOADED");
        assert_eq!(row[7], "");
    }

    #[test]
    fn test_encryption_column_values() {
        let mut meta = uploaded_meta("/tmp/a.txt", "a.txt.gz");
        meta.is_encrypted = true;
        let mut map = HashMap::new();
        map.insert("/tmp/a.txt".to_string(), meta);

        let view = StatusView::build(TransferDirection::Upload, true, false, &map);
        assert_eq!(view.rows()[0][6], "ENCRYPTED");

        let mut meta = FileMetadata::new("x/1.gz");
        meta.dest_size = 10;
        meta.is_encrypted = true;
        meta.mark(TransferStatus::Downloaded, "");
        let mut map = HashMap::new();
        map.insert("x/1.gz".to_string(), meta);

        let view = StatusView::build(TransferDirection::Download, true, false, &map);
        assert_eq!(view.rows()[0][2], "DECRYPTED");
    }

    #[test]
    fn test_download_row_strips_leading_slash() {
        let mut meta = FileMetadata::new("/x/1.gz");
        meta.dest_size = 3;
        meta.mark(TransferStatus::Downloaded, "");
        let mut map = HashMap::new();
        map.insert("/x/1.gz".to_string(), meta);

        let view = StatusView::build(TransferDirection::Download, false, false, &map);
        assert_eq!(view.rows()[0][0], "x/1.gz");
    }

    #[test]
    fn test_sorted_rows() {
        let mut map = HashMap::new();
        map.insert("/tmp/b.txt".to_string(), uploaded_meta("/tmp/b.txt", "b.gz"));
        map.insert("/tmp/a.txt".to_string(), uploaded_meta("/tmp/a.txt", "a.gz"));
        map.insert("/tmp/c.txt".to_string(), uploaded_meta("/tmp/c.txt", "c.gz"));

        let view = StatusView::build(TransferDirection::Upload, false, true, &map);
        let sources: Vec<&str> = view.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(sources, vec!["/tmp/a.txt", "/tmp/b.txt", "/tmp/c.txt"]);
    }

    #[test]
    fn test_pending_row_keeps_sentinel_size() {
        let mut meta = FileMetadata::new("/tmp/missing.txt");
        meta.mark(TransferStatus::Nonexist, "File does not exist");
        let mut map = HashMap::new();
        map.insert("/tmp/missing.txt".to_string(), meta);

        let view = StatusView::build(TransferDirection::Upload, false, false, &map);
        let row = &view.rows()[0];
        assert_eq!(row[3], "-1");
        assert_eq!(row[6], "NONEXIST");
    }
}
