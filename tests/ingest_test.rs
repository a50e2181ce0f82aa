//! Feeder behaviour against a real HTTP origin.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;
use streamforged::ingest::{FeedOutcome, Feeder, HttpChunkSource, RetryPolicy};
use streamforged_common::Error;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Origin that honours `Range` requests and records each requested offset.
struct RangeOrigin {
    data: Vec<u8>,
    offsets: Arc<Mutex<Vec<u64>>>,
    fail_first: AtomicUsize,
}

impl RangeOrigin {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            offsets: Arc::new(Mutex::new(Vec::new())),
            fail_first: AtomicUsize::new(0),
        }
    }

    fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }
}

fn parse_range(header: &str) -> Option<(u64, u64)> {
    let window = header.strip_prefix("bytes=")?;
    let (start, end) = window.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

impl Respond for RangeOrigin {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range)
        else {
            return ResponseTemplate::new(400);
        };
        self.offsets.lock().push(start);

        let remaining_failures = self.fail_first.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.fail_first.store(remaining_failures - 1, Ordering::SeqCst);
            return ResponseTemplate::new(503);
        }

        let len = self.data.len() as u64;
        if start >= len {
            return ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{len}"));
        }
        let last = end.min(len - 1);
        ResponseTemplate::new(206)
            .insert_header("content-range", format!("bytes {start}-{last}/{len}"))
            .set_body_bytes(self.data[start as usize..=last as usize].to_vec())
    }
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn bounded(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::Bounded {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

async fn source_for(server: &MockServer) -> HttpChunkSource {
    HttpChunkSource::new(
        reqwest::Client::new(),
        &format!("{}/media.mkv", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn ranges_are_contiguous_and_bytes_exact() {
    let server = MockServer::start().await;
    let data = sample(100);
    let origin = RangeOrigin::new(data.clone());
    let offsets = origin.offsets.clone();
    Mock::given(method("GET"))
        .and(path("/media.mkv"))
        .respond_with(origin)
        .mount(&server)
        .await;

    let mut out = Vec::new();
    let outcome = Feeder::new(
        source_for(&server).await,
        &mut out,
        32,
        bounded(3),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, FeedOutcome::Completed(100));
    assert_eq!(out, data);
    assert_eq!(*offsets.lock(), vec![0, 32, 64, 96, 100]);
}

#[tokio::test]
async fn transient_failures_retry_the_same_offset() {
    let server = MockServer::start().await;
    let data = sample(40);
    let origin = RangeOrigin::new(data.clone()).failing_first(2);
    let offsets = origin.offsets.clone();
    Mock::given(method("GET"))
        .respond_with(origin)
        .mount(&server)
        .await;

    let mut out = Vec::new();
    let outcome = Feeder::new(
        source_for(&server).await,
        &mut out,
        32,
        bounded(3),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, FeedOutcome::Completed(40));
    assert_eq!(out, data);
    assert_eq!(*offsets.lock(), vec![0, 0, 0, 32, 40]);
}

#[tokio::test]
async fn origin_ignoring_range_is_written_once() {
    let server = MockServer::start().await;
    let data = sample(90);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let mut out = Vec::new();
    let outcome = Feeder::new(
        source_for(&server).await,
        &mut out,
        16,
        bounded(3),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, FeedOutcome::Completed(90));
    assert_eq!(out, data);
}

#[tokio::test]
async fn bounded_feeder_gives_up_on_missing_origin() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(4)
        .mount(&server)
        .await;

    let mut out = Vec::new();
    let result = Feeder::new(
        source_for(&server).await,
        &mut out,
        16,
        bounded(4),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_matches!(
        result,
        Err(Error::Upstream(msg)) if msg.contains("404") && msg.contains("after 4 attempts")
    );
    assert!(out.is_empty());
}

#[tokio::test]
async fn empty_origin_is_not_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RangeOrigin::new(Vec::new()))
        .mount(&server)
        .await;

    let mut out = Vec::new();
    let result = Feeder::new(
        source_for(&server).await,
        &mut out,
        16,
        bounded(2),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_matches!(result, Err(Error::Upstream(_)));
}

#[tokio::test]
async fn unbounded_feeder_stops_only_on_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let mut out = Vec::new();
    let outcome = Feeder::new(
        source_for(&server).await,
        &mut out,
        16,
        RetryPolicy::Unbounded {
            delay: Duration::from_millis(10),
        },
        cancel,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, FeedOutcome::Cancelled(0));
    let requests = server.received_requests().await.unwrap();
    assert!(
        requests.len() > 2,
        "expected repeated attempts, got {}",
        requests.len()
    );
}
