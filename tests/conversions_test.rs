//! Integration tests for cached conversion routes.

#![cfg(unix)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::TestHarness;
use serde_json::Value;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn origin_with(body: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(&server)
        .await;
    server
}

async fn poll_until_terminal(client: &reqwest::Client, addr: SocketAddr, job_id: &str) -> Value {
    for _ in 0..200 {
        let json: Value = client
            .get(format!("http://{addr}/api/conversions/{job_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if json["status"] != "pending" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("conversion {job_id} never left pending");
}

#[tokio::test]
async fn conversion_completes_and_artifact_is_served() {
    let body: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
    let origin = origin_with(body.clone()).await;
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/conversions"))
        .json(&serde_json::json!({"url": format!("{}/movie.mkv", origin.uri())}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "pending");
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let json = poll_until_terminal(&client, addr, &job_id).await;
    assert_eq!(json["status"], "ready", "job failed: {json}");
    assert_eq!(json["artifact_url"], format!("/api/conversions/{job_id}/artifact"));

    let resp = client
        .get(format!("http://{addr}/api/conversions/{job_id}/artifact"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp4");
    assert_eq!(resp.bytes().await.unwrap().to_vec(), body);

    let resp = client
        .get(format!("http://{addr}/api/conversions/{job_id}/artifact"))
        .header("range", "bytes=10-19")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.bytes().await.unwrap().to_vec(), body[10..20].to_vec());

    // A repeat request is answered from the ledger.
    let resp = client
        .post(format!("http://{addr}/api/conversions"))
        .json(&serde_json::json!({"url": format!("{}/movie.mkv", origin.uri())}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["job_id"], job_id.as_str());
    assert_eq!(json["status"], "ready");
}

#[tokio::test]
async fn concurrent_requests_share_one_job() {
    let origin = origin_with(vec![7u8; 64]).await;
    let (h, _addr) = TestHarness::with_server().await;
    let url = format!("{}/same.mkv", origin.uri());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let conversions = h.ctx.conversions.clone();
        let url = url.clone();
        handles.push(tokio::spawn(async move { conversions.request(&url).unwrap().id }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    h.ctx.conversions.wait(ids[0]).await;
    let job = h.ctx.conversions.get(ids[0]).unwrap();
    assert!(job.is_ready(), "job did not finish: {job:?}");
}

#[tokio::test]
async fn missing_origin_fails_the_job() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let json: Value = client
        .post(format!("http://{addr}/api/conversions"))
        .json(&serde_json::json!({"url": format!("{}/gone.mkv", origin.uri())}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let json = poll_until_terminal(&client, addr, &job_id).await;
    assert_eq!(json["status"], "failed");
    assert!(json["error"].as_str().unwrap().contains("404"), "{json}");
    assert!(json.get("artifact_url").is_none());

    let resp = client
        .get(format!("http://{addr}/api/conversions/{job_id}/artifact"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "failed");
}

#[tokio::test]
async fn non_http_source_is_rejected() {
    let (_h, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/conversions"))
        .json(&serde_json::json!({"url": "ftp://example.com/movie.mkv"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "invalid_input");
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (_h, addr) = TestHarness::with_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!(
            "http://{addr}/api/conversions/00000000-0000-0000-0000-000000000001"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(format!("http://{addr}/api/conversions/not-a-uuid/artifact"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
