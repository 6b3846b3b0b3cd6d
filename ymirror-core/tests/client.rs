use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use ymirror_core::{DiskClient, DiskError, ErrorClass, MoveResult, OperationStatus, ResourceType};

#[tokio::test]
async fn get_disk_info_includes_oauth_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk"))
        .and(header("authorization", "OAuth test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_space": 1024,
            "used_space": 256,
            "trash_size": 0,
            "is_paid": false
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let info = client.get_disk_info().await.unwrap();

    assert_eq!(info.total_space, 1024);
    assert_eq!(info.used_space, 256);
}

#[tokio::test]
async fn get_resource_encodes_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Mirror/Hello World.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "disk:/Mirror/Hello World.txt",
            "name": "Hello World.txt",
            "type": "file",
            "size": 12,
            "modified": "2024-01-01T00:00:00Z",
            "md5": "aabbcc"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resource = client
        .get_resource("disk:/Mirror/Hello World.txt")
        .await
        .unwrap();

    assert_eq!(resource.resource_type, ResourceType::File);
    assert_eq!(resource.size, Some(12));
    assert_eq!(resource.md5.as_deref(), Some("aabbcc"));
}

#[tokio::test]
async fn create_folder_uses_put() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Mirror/docs"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "path": "disk:/Mirror/docs",
            "name": "docs",
            "type": "dir",
            "resource_id": "rid-1"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resource = client.create_folder("disk:/Mirror/docs").await.unwrap();

    assert_eq!(resource.resource_type, ResourceType::Dir);
    assert_eq!(resource.resource_id.as_deref(), Some("rid-1"));
}

#[tokio::test]
async fn delete_returns_none_on_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Mirror/old.txt"))
        .and(query_param("permanently", "true"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let link = client
        .delete_resource("disk:/Mirror/old.txt", true)
        .await
        .unwrap();

    assert!(link.is_none());
}

#[tokio::test]
async fn delete_missing_resource_is_a_permanent_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/disk/resources"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "resource not found",
            "error": "DiskNotFoundError"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .delete_resource("disk:/Mirror/gone.txt", true)
        .await
        .expect_err("expected 404");

    assert_eq!(err.status(), Some(reqwest::StatusCode::NOT_FOUND));
    assert_eq!(err.classification(), ErrorClass::Permanent);
    assert!(err.to_string().contains("resource not found"));
}

#[tokio::test]
async fn move_sends_overwrite_flag_and_returns_link() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/disk/resources/move"))
        .and(query_param("from", "disk:/Mirror/clip.mkv.partial"))
        .and(query_param("path", "disk:/Mirror/clip.mkv"))
        .and(query_param("overwrite", "true"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "href": format!("{}/operations/abc", server.uri()),
            "method": "GET",
            "templated": false
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let result = client
        .move_resource("disk:/Mirror/clip.mkv.partial", "disk:/Mirror/clip.mkv", true)
        .await
        .unwrap();

    let MoveResult::Pending(link) = result else {
        panic!("202 must be reported as pending");
    };
    assert_eq!(link.method, "GET");
}

#[tokio::test]
async fn get_upload_link_sends_overwrite_flag() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources/upload"))
        .and(query_param("path", "disk:/Mirror/a.txt"))
        .and(query_param("overwrite", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "href": "https://upload.example/a.txt",
            "method": "PUT",
            "templated": false
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let link = client
        .get_upload_link("disk:/Mirror/a.txt", true)
        .await
        .unwrap();

    assert_eq!(link.href.as_str(), "https://upload.example/a.txt");
    assert_eq!(link.method, "PUT");
}

#[tokio::test]
async fn get_operation_status_parses_kebab_case() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/operations/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "in-progress"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let status = client
        .get_operation_status(&format!("{}/operations/abc", server.uri()))
        .await
        .unwrap();

    assert_eq!(status, OperationStatus::InProgress);
}

#[tokio::test]
async fn rate_limit_exposes_retry_after_seconds() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources/upload"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("rate limited"),
        )
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .get_upload_link("disk:/Mirror/a.txt", true)
        .await
        .expect_err("expected 429");

    assert_eq!(err.classification(), ErrorClass::RateLimit);
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_secs(), Some(7));
}

#[tokio::test]
async fn retry_after_accepts_http_dates() {
    let server = MockServer::start().await;

    let at = std::time::SystemTime::now() + std::time::Duration::from_secs(120);
    Mock::given(method("GET"))
        .and(path("/v1/disk"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("Retry-After", httpdate::fmt_http_date(at).as_str())
                .set_body_string("maintenance"),
        )
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.get_disk_info().await.expect_err("expected 503");

    assert_eq!(err.classification(), ErrorClass::Transient);
    let secs = err.retry_after_secs().expect("expected retry-after");
    assert!(secs > 0 && secs <= 120);
}

#[tokio::test]
async fn auth_failure_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "unauthorized",
            "error": "UnauthorizedError"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "bad-token").unwrap();
    let err = client.get_disk_info().await.expect_err("expected 401");

    assert_eq!(err.classification(), ErrorClass::Auth);
    assert!(!err.is_retryable());
    assert!(matches!(err, DiskError::Api { .. }));
}
