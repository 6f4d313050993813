#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ce_client::api::{ApiClient, ApiClientError, JobStatus};
use ce_client::config::ApiConfig;
use ce_client::monitor::monitor_job;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn test_config(uri: &str) -> ApiConfig {
    let authority = uri.strip_prefix("http://").expect("http uri").to_owned();
    ApiConfig {
        username: "admin".to_owned(),
        password: "password".to_owned(),
        token: Some("testtoken".to_owned()),
        protocol: "http".to_owned(),
        authority,
        basepath: "api/v0".to_owned(),
        rate_limit: 50,
        request_timeout: Some(Duration::from_secs(5)),
        retry_limit: None,
        download_retry_limit: 3,
    }
}

fn job_json(uuid: &str, status: &str) -> serde_json::Value {
    json!({ "uuid": uuid, "name": format!("job-{uuid}"), "status": status })
}

#[tokio::test]
async fn list_jobs_follows_pagination_in_order() {
    let server = MockServer::start().await;
    let next_url = format!("{}/api/v0/ce/job/?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "next": next_url,
            "previous": null,
            "results": [job_json("a", "PENDING"), job_json("b", "RUNNING")],
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "next": null,
            "previous": null,
            "results": [job_json("c", "SUCCESS")],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let jobs = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.list_jobs()
    })
    .await
    .unwrap()
    .unwrap();

    let uuids: Vec<&str> = jobs.iter().map(|j| j.uuid.as_str()).collect();
    assert_eq!(uuids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn single_lookup_makes_exactly_one_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/abc/"))
        .and(header("Authorization", "Token testtoken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "RUNNING")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let job = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.get_job("abc")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(job.uuid, "abc");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rate_limited_responses_are_resent_until_success() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/abc/"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            let current = attempts_clone.fetch_add(1, Ordering::SeqCst);
            if current < 2 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_json(job_json("abc", "PENDING"))
            }
        })
        .expect(3)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let job = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.get_job("abc")
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(job.uuid, "abc");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn non_success_status_surfaces_as_request_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/gone/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.get_job("gone")
    })
    .await
    .unwrap();

    match result.unwrap_err() {
        ApiClientError::Failure(failure) => {
            assert_eq!(failure.status.as_u16(), 404);
            assert_eq!(failure.msg, "not found");
        }
        other => panic!("expected Failure, got {other:?}"),
    }
}

#[tokio::test]
async fn token_exchange_runs_when_no_static_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/token/"))
        .and(body_json(json!({ "username": "admin", "password": "password" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "fresh" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/abc/"))
        .and(header("Authorization", "Token fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "PENDING")))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.token = None;
    let job = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.get_job("abc")
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(job.uuid, "abc");

    // The exchange itself must not carry the token header.
    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|r| r.url.path() == "/api/v0/token/")
        .unwrap();
    assert!(exchange.headers.get("authorization").is_none());
}

#[tokio::test]
async fn delete_all_jobs_deletes_each_listed_job_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next": null,
            "results": [job_json("a", "SUCCESS"), job_json("b", "FAILURE")],
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/v0/ce/job/a/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/v0/ce/job/b/"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let deleted = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.delete_all_jobs()
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(deleted, 2);

    let requests = server.received_requests().await.unwrap();
    let delete_paths: Vec<String> = requests
        .iter()
        .filter(|r| r.method.to_string() == "DELETE")
        .map(|r| r.url.path().to_owned())
        .collect();
    assert_eq!(delete_paths, vec!["/api/v0/ce/job/a/", "/api/v0/ce/job/b/"]);
}

#[tokio::test]
async fn empty_job_name_is_auto_generated() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v0/ce/job/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(job_json("new", "PENDING")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.create_job("", "", json!({}))
    })
    .await
    .unwrap()
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let name = body["name"].as_str().unwrap();
    let suffix: u32 = name.strip_prefix("test-").unwrap().parse().unwrap();
    assert!((10000..99999).contains(&suffix), "{name}");
}

#[tokio::test]
async fn upload_update_with_only_public_sends_only_public() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/v0/ce/upload/u1/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "uuid": "u1", "path": "data.csv" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.update_upload("u1", Some(true), None)
    })
    .await
    .unwrap()
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    assert_eq!(body, "public=true");
}

#[tokio::test]
async fn job_update_omits_unset_flags() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/v0/ce/job/j1/"))
        .and(body_json(json!({ "saved": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("j1", "SUCCESS")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.update_job("j1", Some(true), None)
    })
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn upload_file_sends_multipart_fields() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v0/ce/upload/"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "uuid": "u9", "path": "inputs/t.csv" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("t.csv");
    std::fs::write(&source, "x,y\n1,2\n").unwrap();

    let config = test_config(&server.uri());
    let upload = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.upload_file(&source, "inputs/t.csv", "table", false)
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(upload.uuid, "u9");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("name=\"path\""));
    assert!(body.contains("inputs/t.csv"));
    assert!(body.contains("x,y\n1,2\n"));
}

#[tokio::test]
async fn download_job_file_streams_into_job_directory() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ce/download/j1/out/result.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(&b"a,b\n1,2\n"[..]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let config = test_config(&server.uri());
    let dest = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.download_job_file("j1", "/out/result.csv", &root)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(dest, dir.path().join("j1").join("out/result.csv"));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");
}

#[tokio::test]
async fn download_retries_on_rate_limit_within_bound() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    Mock::given(method("GET"))
        .and(path("/ce/download/j1/out.txt"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_string("done")
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let config = test_config(&server.uri());
    let dest = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.download_job_file("j1", "out.txt", &root)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(std::fs::read_to_string(dest).unwrap(), "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn download_by_upload_id_without_path_writes_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/upload/u2/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": "u2" })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let config = test_config(&server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.download_uploaded_file("u2", &root)
    })
    .await
    .unwrap()
    .unwrap();

    assert!(result.is_none());
    assert!(!dir.path().join("u2").exists());
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| !r.url.path().starts_with("/ce/download")));
}

#[tokio::test]
async fn metrics_listing_is_paginated_from_the_start() {
    let server = MockServer::start().await;
    let next_url = format!("{}/api/v0/ce/metrics/?page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/metrics/"))
        .and(query_param_is_missing("page"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next": next_url,
            "results": [{ "cpu": 1 }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/metrics/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next": null,
            "results": [{ "cpu": 2 }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let metrics = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        api.list_metrics()
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0]["cpu"], 1);
    assert_eq!(metrics[1]["cpu"], 2);
}

#[tokio::test]
async fn monitor_returns_last_status_when_budget_runs_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/j1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("j1", "RUNNING")))
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let job = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        monitor_job(
            &api,
            "j1",
            Duration::from_millis(100),
            Duration::from_millis(20),
        )
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn monitor_stops_at_terminal_status() {
    let server = MockServer::start().await;
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    Mock::given(method("GET"))
        .and(path("/api/v0/ce/job/j1/"))
        .respond_with(move |_req: &Request| -> ResponseTemplate {
            let status = if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                "RUNNING"
            } else {
                "SUCCESS"
            };
            ResponseTemplate::new(200).set_body_json(job_json("j1", status))
        })
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let job = tokio::task::spawn_blocking(move || {
        let api = ApiClient::new(config).expect("client");
        monitor_job(
            &api,
            "j1",
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
