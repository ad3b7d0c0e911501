/*!
 * Integration tests for the download pipeline: directory creation,
 * per-file outcomes, round-tripping uploaded content, and the
 * download-side skip filter.
 */

mod common;

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{download_response, upload_response, MockFactory, MockParser, MockStorageClient};
use flate2::read::GzDecoder;
use tempfile::tempdir;

use stagehand::{AgentConfig, FileTransferAgent, TransferStatus};

async fn run_download(
    src_locations: &[&str],
    stage_location: &str,
    local_dir: &str,
    client: Arc<MockStorageClient>,
) -> FileTransferAgent {
    let response = download_response(src_locations, stage_location, local_dir);
    let command = format!("GET @stage1 file://{}", local_dir);
    let parser = MockParser::new(response);
    let factory = MockFactory::new(client);

    let mut agent = FileTransferAgent::new(&command, parser, factory, AgentConfig::default())
        .await
        .unwrap();
    assert!(agent.execute().await.unwrap());
    agent
}

#[tokio::test]
async fn test_download_two_files_creates_missing_directory() {
    let client = Arc::new(MockStorageClient::default());
    client.seed_object("stage/x/1.gz", b"first payload", HashMap::new());
    client.seed_object("stage/x/2.gz", b"second", HashMap::new());

    let root = tempdir().unwrap();
    let local_dir = root.path().join("fresh").join("dl");
    let local_str = local_dir.to_string_lossy().into_owned();

    let agent = run_download(
        &["x/1.gz", "x/2.gz"],
        "bucket/stage",
        &local_str,
        client.clone(),
    )
    .await;

    assert_eq!(std::fs::read(local_dir.join("1.gz")).unwrap(), b"first payload");
    assert_eq!(std::fs::read(local_dir.join("2.gz")).unwrap(), b"second");
    assert_eq!(client.get_calls.load(Ordering::SeqCst), 2);

    let statuses = agent.file_statuses();
    assert_eq!(statuses["x/1.gz"], TransferStatus::Downloaded);
    assert_eq!(statuses["x/2.gz"], TransferStatus::Downloaded);

    // sizes in the rows match the remote objects
    let view = agent.status_view().unwrap();
    let sizes: HashMap<String, String> = view
        .rows()
        .iter()
        .map(|r| (r[0].clone(), r[1].clone()))
        .collect();
    assert_eq!(sizes["x/1.gz"], "13");
    assert_eq!(sizes["x/2.gz"], "6");
}

#[tokio::test]
async fn test_missing_remote_file_is_per_file_error() {
    let client = Arc::new(MockStorageClient::default());
    client.seed_object("stage/ok.gz", b"here", HashMap::new());

    let root = tempdir().unwrap();
    let local_str = root.path().join("dl").to_string_lossy().into_owned();

    let agent = run_download(
        &["ok.gz", "gone.gz"],
        "bucket/stage",
        &local_str,
        client.clone(),
    )
    .await;

    let statuses = agent.file_statuses();
    assert_eq!(statuses["ok.gz"], TransferStatus::Downloaded);
    assert_eq!(statuses["gone.gz"], TransferStatus::Error);
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let src_dir = tempdir().unwrap();
    let src = src_dir.path().join("roundtrip.txt");
    let original = b"round trip payload with some length to it";
    std::fs::write(&src, original).unwrap();
    let src_str = src.to_string_lossy().into_owned();

    let client = Arc::new(MockStorageClient::default());

    // upload with auto-gzip
    {
        let response = upload_response(&[&src_str], "bucket/stage", true, false);
        let command = format!("PUT file://{} @stage1", src_str);
        let mut agent = FileTransferAgent::new(
            &command,
            MockParser::new(response),
            MockFactory::new(client.clone()),
            AgentConfig::default(),
        )
        .await
        .unwrap();
        assert!(agent.execute().await.unwrap());
    }

    // download to a fresh directory
    let root = tempdir().unwrap();
    let local_dir = root.path().join("out");
    let local_str = local_dir.to_string_lossy().into_owned();
    run_download(
        &["roundtrip.txt.gz"],
        "bucket/stage",
        &local_str,
        client.clone(),
    )
    .await;

    // decompressing reproduces the original bytes
    let downloaded = std::fs::File::open(local_dir.join("roundtrip.txt.gz")).unwrap();
    let mut decoder = GzDecoder::new(downloaded);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).unwrap();
    assert_eq!(out, original);
}

#[tokio::test]
async fn test_existing_local_copy_is_skipped() {
    let client = Arc::new(MockStorageClient::default());
    client.seed_object("stage/data.gz", b"stage copy", HashMap::new());

    let root = tempdir().unwrap();
    let local_str = root.path().join("dl").to_string_lossy().into_owned();

    // first download materializes the file
    run_download(&["data.gz"], "bucket/stage", &local_str, client.clone()).await;
    assert_eq!(client.get_calls.load(Ordering::SeqCst), 1);

    // second download sees identical content (ETag vs MD5) and skips
    let agent = run_download(&["data.gz"], "bucket/stage", &local_str, client.clone()).await;
    assert_eq!(agent.file_statuses()["data.gz"], TransferStatus::Skipped);
    assert_eq!(client.get_calls.load(Ordering::SeqCst), 1);
}
