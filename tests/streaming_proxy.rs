//! Integration tests for the streaming proxy
//!
//! Runs the full stack against a simulated remote and talks to the proxy
//! over real loopback HTTP.

use media_stream_core::client::{FileId, SimulatedRemote, SimulatedRemoteOptions};
use media_stream_core::{MediaStack, StreamConfig};
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _temp_dir: TempDir,
    remote: Arc<SimulatedRemote>,
    stack: MediaStack,
    http: reqwest::Client,
}

fn fast_config(temp_dir: &TempDir) -> StreamConfig {
    let mut config = StreamConfig::default();
    config.proxy.session_ready_timeout_ms = 200;
    config.proxy.file_poll_interval_ms = 10;
    config.proxy.stream_poll_interval_ms = 5;
    config.proxy.status_check_every = 5;
    config.proxy.stall_timeout_ms = 2_000;
    config.cache.art_directory = temp_dir.path().join("art");
    config
}

async fn harness_with(
    configure: impl FnOnce(&mut StreamConfig, &mut SimulatedRemoteOptions),
) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let mut config = fast_config(&temp_dir);
    let mut options = SimulatedRemoteOptions::new(temp_dir.path());
    options.bytes_per_tick = 4096;
    options.tick = Duration::from_millis(2);
    configure(&mut config, &mut options);

    let (remote, transport) = SimulatedRemote::start(options);
    let stack = MediaStack::start(config, transport).await.unwrap();
    Harness {
        _temp_dir: temp_dir,
        remote,
        stack,
        http: reqwest::Client::new(),
    }
}

async fn harness() -> Harness {
    harness_with(|_, _| {}).await
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_open_range_streams_whole_file() {
    let h = harness().await;
    let data = content(1000);
    h.remote.add_file(FileId(1), "song.mp3", data.clone()).await;

    let url = h.stack.proxy.proxy_url(FileId(1), None);
    let response = h.http.get(&url).header(RANGE, "bytes=0-").send().await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-999/1000");
    assert_eq!(response.headers()[CONTENT_LENGTH], "1000");
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[CONTENT_TYPE], "audio/mpeg");

    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 1000);
    assert_eq!(body.as_ref(), data.as_slice());

    h.stack.stop().await;
}

#[tokio::test]
async fn test_unsatisfiable_range_is_416_without_body() {
    let h = harness().await;
    h.remote.add_file(FileId(2), "song.flac", content(1000)).await;

    let url = h.stack.proxy.proxy_url(FileId(2), None);
    let response = h
        .http
        .get(&url)
        .header(RANGE, "bytes=2000-1000")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */1000");
    assert!(response.bytes().await.unwrap().is_empty());

    h.stack.stop().await;
}

#[tokio::test]
async fn test_suffix_and_middle_ranges() {
    let h = harness().await;
    let data = content(1000);
    h.remote.add_file(FileId(3), "song.ogg", data.clone()).await;
    let url = h.stack.proxy.proxy_url(FileId(3), Some(1000));

    let response = h.http.get(&url).header(RANGE, "bytes=-100").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 900-999/1000");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &data[900..]);

    let response = h
        .http
        .get(&url)
        .header(RANGE, "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()[CONTENT_LENGTH], "100");
    assert_eq!(response.bytes().await.unwrap().as_ref(), &data[100..200]);

    h.stack.stop().await;
}

#[tokio::test]
async fn test_streams_while_downloading() {
    let h = harness_with(|_, options| {
        options.bytes_per_tick = 1000;
        options.tick = Duration::from_millis(2);
    })
    .await;
    let data = content(60_000);
    h.remote.add_file(FileId(4), "long.m4a", data.clone()).await;

    let url = h.stack.proxy.proxy_url(FileId(4), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-59999/60000");

    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), data.as_slice());

    h.stack.stop().await;
}

#[tokio::test]
async fn test_unknown_size_is_200_without_length() {
    let h = harness().await;
    let data = content(5000);
    h.remote.add_file(FileId(5), "stream.wav", data.clone()).await;
    h.remote.hide_size(FileId(5)).await;

    let url = h.stack.proxy.proxy_url(FileId(5), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(CONTENT_LENGTH).is_none());
    assert!(response.headers().get(CONTENT_RANGE).is_none());

    let body = tokio::time::timeout(Duration::from_secs(10), response.bytes())
        .await
        .expect("stream of unknown size must end once the download completes")
        .unwrap();
    assert_eq!(body.as_ref(), data.as_slice());

    h.stack.stop().await;
}

#[tokio::test]
async fn test_size_query_parameter_wins() {
    let h = harness().await;
    h.remote.add_file(FileId(6), "song.mp3", content(1000)).await;
    h.remote.hide_size(FileId(6)).await;

    let url = h.stack.proxy.proxy_url(FileId(6), Some(1000));
    assert!(url.ends_with("/stream/6?size=1000"));

    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-999/1000");
    assert_eq!(response.bytes().await.unwrap().len(), 1000);

    h.stack.stop().await;
}

#[tokio::test]
async fn test_stalled_download_terminates_stream() {
    let h = harness_with(|config, options| {
        config.proxy.stall_timeout_ms = 300;
        options.bytes_per_tick = 50_000;
    })
    .await;
    h.remote.add_file(FileId(7), "big.mp3", content(500_000)).await;
    h.remote.set_stall_at(FileId(7), 200_000).await;

    let url = h.stack.proxy.proxy_url(FileId(7), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-499999/500000");

    let body = tokio::time::timeout(Duration::from_secs(10), response.bytes())
        .await
        .expect("stalled stream must not hang");
    match body {
        // Truncated body is reported as an error by the client
        Err(_) => {}
        Ok(bytes) => assert!(bytes.len() < 500_000),
    }

    h.stack.stop().await;
}

#[tokio::test]
async fn test_invalid_id_is_400() {
    let h = harness().await;
    let port = h.stack.proxy.port().unwrap();

    let response = h
        .http
        .get(format!("http://127.0.0.1:{}/stream/not-a-number", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    h.stack.stop().await;
}

#[tokio::test]
async fn test_session_not_ready_is_503() {
    let h = harness_with(|_, options| options.start_ready = false).await;
    h.remote.add_file(FileId(8), "song.mp3", content(100)).await;

    let url = h.stack.proxy.proxy_url(FileId(8), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Once the session is up the same URL works
    h.remote.set_ready();
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.bytes().await.unwrap().len(), 100);

    h.stack.stop().await;
}

#[tokio::test]
async fn test_download_failure_is_500() {
    let h = harness().await;
    h.remote.add_file(FileId(9), "gone.mp3", content(100)).await;
    h.remote.set_not_downloadable(FileId(9)).await;

    let url = h.stack.proxy.proxy_url(FileId(9), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // Unknown ids fail the same way
    let url = h.stack.proxy.proxy_url(FileId(404), None);
    let response = h.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    h.stack.stop().await;
}
