/*!
 * Integration tests for the upload pipeline against a scripted
 * in-memory object store: compression, digests, skip filtering,
 * collisions, and cancellation.
 */

mod common;

use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{upload_response, MockFactory, MockParser, MockStorageClient};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tempfile::tempdir;

use stagehand::{AgentConfig, FileTransferAgent, TransferStatus};

async fn run_upload(
    src_paths: &[&str],
    stage_location: &str,
    auto_compress: bool,
    encrypted: bool,
    client: Arc<MockStorageClient>,
) -> FileTransferAgent {
    let response = upload_response(src_paths, stage_location, auto_compress, encrypted);
    let command = format!("PUT file://{} @stage1", src_paths[0]);
    let parser = MockParser::new(response);
    let factory = MockFactory::new(client);

    let mut agent = FileTransferAgent::new(&command, parser, factory, AgentConfig::default())
        .await
        .unwrap();
    assert!(agent.execute().await.unwrap());
    agent
}

#[tokio::test]
async fn test_single_file_upload_with_auto_compress() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    let agent = run_upload(&[&src_str], "bucket/stage", true, true, client.clone()).await;

    // exactly one object, under the stage path, gzip encoded
    assert_eq!(client.put_calls.load(Ordering::SeqCst), 1);
    let object = client.object("stage/a.txt.gz").expect("object uploaded");
    assert_eq!(object.content_encoding.as_deref(), Some("gzip"));

    // the bytes sent are gzip(src)
    let mut decoder = GzDecoder::new(&object.bytes[..]);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    assert_eq!(out, b"hello");

    // encryption material supplied: digest over the uploaded bytes
    let digest = object.user_metadata.get("sfc-digest").expect("digest set");
    let expected = BASE64.encode(Sha256::digest(&object.bytes));
    assert_eq!(digest, &expected);

    // status row
    let view = agent.status_view().unwrap();
    assert_eq!(view.len(), 1);
    let row = &view.rows()[0];
    assert_eq!(row[0], src_str);
    assert_eq!(row[1], "a.txt.gz");
    assert_eq!(row[2], "5");
    assert_eq!(row[3], object.bytes.len().to_string());
    assert_eq!(row[4], "NONE");
    assert_eq!(row[5], "GZIP");
    assert_eq!(row[6], "UPLOADED");
}

#[tokio::test]
async fn test_upload_without_encryption_omits_digest() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("plain.txt");
    std::fs::write(&src, b"no digest").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    run_upload(&[&src_str], "bucket", true, false, client.clone()).await;

    let object = client.object("plain.txt.gz").unwrap();
    assert!(!object.user_metadata.contains_key("sfc-digest"));
}

#[tokio::test]
async fn test_second_upload_skipped_by_stored_digest() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    run_upload(&[&src_str], "bucket/stage", true, true, client.clone()).await;
    assert_eq!(client.put_calls.load(Ordering::SeqCst), 1);

    // same file again, overwrite off, digest already at the stage
    let agent = run_upload(&[&src_str], "bucket/stage", true, true, client.clone()).await;

    assert_eq!(agent.file_statuses()[&src_str], TransferStatus::Skipped);
    // zero additional put calls
    assert_eq!(client.put_calls.load(Ordering::SeqCst), 1);
    assert!(client.head_calls.load(Ordering::SeqCst) >= 1);

    let view = agent.status_view().unwrap();
    let row = &view.rows()[0];
    assert_eq!(row[6], "SKIPPED");
    assert!(row[7].contains("already exists"));
}

#[tokio::test]
async fn test_changed_content_is_not_skipped() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    run_upload(&[&src_str], "bucket/stage", true, true, client.clone()).await;

    std::fs::write(&src, b"changed").unwrap();
    let agent = run_upload(&[&src_str], "bucket/stage", true, true, client.clone()).await;

    assert_eq!(agent.file_statuses()[&src_str], TransferStatus::Uploaded);
    assert_eq!(client.put_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_parquet_detected_and_not_gzipped() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("b.parquet");
    std::fs::write(&src, b"PAR1\x15\x00rest-of-footer").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    let agent = run_upload(&[&src_str], "bucket", true, false, client.clone()).await;

    // no gzip framing even with auto-compress on
    let object = client.object("b.parquet").expect("uploaded under its own name");
    assert!(object.bytes.starts_with(b"PAR1"));
    assert_eq!(object.content_encoding.as_deref(), Some("parquet"));

    let view = agent.status_view().unwrap();
    let row = &view.rows()[0];
    assert_eq!(row[1], "b.parquet");
    assert_eq!(row[4], "PARQUET");
    assert_eq!(row[5], "PARQUET");
}

#[tokio::test]
async fn test_unsupported_compression_marks_error() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("data.xz");
    std::fs::write(&src, b"anything").unwrap();
    let good = src_dir.path().join("ok.txt");
    std::fs::write(&good, b"fine").unwrap();

    let src_str = src.to_string_lossy().into_owned();
    let good_str = good.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    let agent = run_upload(
        &[&src_str, &good_str],
        "bucket",
        true,
        false,
        client.clone(),
    )
    .await;

    let statuses = agent.file_statuses();
    assert_eq!(statuses[&src_str], TransferStatus::Error);
    // the failure is local: the other file still uploads
    assert_eq!(statuses[&good_str], TransferStatus::Uploaded);
}

#[tokio::test]
async fn test_destination_collision_marks_earlier_entry() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let src_a = dir_a.path().join("data.csv");
    let src_b = dir_b.path().join("data.csv");
    std::fs::write(&src_a, b"from a").unwrap();
    std::fs::write(&src_b, b"from b").unwrap();

    let a_str = src_a.to_string_lossy().into_owned();
    let b_str = src_b.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());
    let agent = run_upload(&[&a_str, &b_str], "bucket", true, false, client.clone()).await;

    let statuses = agent.file_statuses();
    let collisions = statuses
        .values()
        .filter(|s| **s == TransferStatus::Collision)
        .count();
    assert_eq!(collisions, 1);
    assert!(statuses.values().any(|s| *s == TransferStatus::Uploaded));
}

#[tokio::test]
async fn test_sort_connection_property_orders_rows() {
    let src_dir = tempdir().unwrap();
    for name in ["c.txt", "a.txt", "b.txt"] {
        std::fs::write(src_dir.path().join(name), b"data").unwrap();
    }

    let pattern = format!("{}/*.txt", src_dir.path().display());
    let response = upload_response(&[&pattern], "bucket", true, false);
    let command = format!("PUT file://{} @stage1", pattern);

    // the driver hands the sort flag over as a dynamically-typed value
    let mut properties = std::collections::HashMap::new();
    properties.insert("sort".to_string(), serde_json::json!("true"));
    let config = AgentConfig::from_connection_properties(&properties);

    let client = Arc::new(MockStorageClient::default());
    let mut agent = FileTransferAgent::new(
        &command,
        MockParser::new(response),
        MockFactory::new(client),
        config,
    )
    .await
    .unwrap();
    assert!(agent.execute().await.unwrap());

    let view = agent.status_view().unwrap();
    let sources: Vec<&str> = view.rows().iter().map(|r| r[0].as_str()).collect();
    let mut sorted = sources.clone();
    sorted.sort();
    assert_eq!(sources, sorted);
    assert_eq!(sources.len(), 3);
}

#[tokio::test]
async fn test_all_statuses_terminal_after_execute() {
    let src_dir = tempdir().unwrap();
    let ok = src_dir.path().join("ok.txt");
    std::fs::write(&ok, b"fine").unwrap();

    let ok_str = ok.to_string_lossy().into_owned();
    let missing = "/no/such/file.txt";

    let client = Arc::new(MockStorageClient::default());
    let agent = run_upload(&[&ok_str, missing], "bucket", true, false, client).await;

    for (src, status) in agent.file_statuses() {
        assert!(status.is_terminal(), "{} left non-terminal: {}", src, status);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_mid_transfer_returns_false() {
    use async_trait::async_trait;
    use stagehand::storage::{
        ObjectMetadata, PutRequest, RemoteObject, StorageClient, StorageResult,
    };

    // a put that never completes
    struct HangingClient;

    #[async_trait]
    impl StorageClient for HangingClient {
        async fn put_object(&self, _request: &PutRequest) -> StorageResult<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn get_object(
            &self,
            _key: &str,
            _dest_dir: &std::path::Path,
            _dest_name: &str,
        ) -> StorageResult<u64> {
            unimplemented!()
        }

        async fn list_objects(&self, _prefix: &str) -> StorageResult<Vec<RemoteObject>> {
            Ok(Vec::new())
        }

        async fn head_object(&self, _key: &str) -> StorageResult<ObjectMetadata> {
            Err(stagehand::StorageError::NotFound {
                key: "none".to_string(),
            })
        }
    }

    struct HangingFactory;

    #[async_trait]
    impl stagehand::StageClientFactory for HangingFactory {
        async fn create(
            &self,
            _stage: &stagehand::plan::StageInfo,
            _parallel: usize,
            _encryption: Option<&stagehand::plan::EncryptionMaterial>,
        ) -> stagehand::Result<Arc<dyn StorageClient>> {
            Ok(Arc::new(HangingClient))
        }
    }

    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("a.txt");
    std::fs::write(&src, b"hello").unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let response = upload_response(&[&src_str], "bucket", true, false);
    let command = format!("PUT file://{} @stage1", src_str);

    let mut agent = FileTransferAgent::new(
        &command,
        MockParser::new(response),
        Arc::new(HangingFactory),
        AgentConfig::default(),
    )
    .await
    .unwrap();

    let handle = agent.cancel_handle();
    let task = tokio::spawn(async move { agent.execute().await });

    // let the worker reach the hanging put, then cancel
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    handle.cancel();

    let result = task.await.unwrap().unwrap();
    assert!(!result, "canceled execute must return false");
}
