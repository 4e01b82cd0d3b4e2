use mediabox_core::{ApiErrorClass, VaultClient, VaultError};
use serde_json::json;
use wiremock::matchers::{body_bytes, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn list_objects_includes_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders/real/objects"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [
                {"id": "obj-1", "name": "a.jpg", "md5": "aa11", "size": 12}
            ]
        })))
        .mount(&server)
        .await;

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let page = client.list_objects("real", None, None).await.unwrap();

    assert_eq!(page.objects.len(), 1);
    assert_eq!(page.objects[0].id, "obj-1");
    assert_eq!(page.objects[0].md5.as_deref(), Some("aa11"));
    assert!(page.next_page_token.is_none());
}

#[tokio::test]
async fn list_objects_all_follows_page_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders/real/objects"))
        .and(query_param("page_size", "1"))
        .and(query_param("page_token", "t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [{"id": "obj-2", "name": "b.jpg"}]
        })))
        .mount(&server)
        .await;

    // First page: no page_token in the query.
    Mock::given(method("GET"))
        .and(path("/v1/folders/real/objects"))
        .and(query_param("page_size", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [{"id": "obj-1", "name": "a.jpg"}],
            "next_page_token": "t1"
        })))
        .mount(&server)
        .await;

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let objects = client.list_objects_all("real", 1).await.unwrap();

    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].id, "obj-1");
    assert_eq!(objects[1].id, "obj-2");
}

#[tokio::test]
async fn upload_object_streams_body_and_returns_metadata() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/folders/real/objects"))
        .and(query_param("name", "a.jpg"))
        .and(body_bytes(b"payload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "obj-9",
            "name": "a.jpg",
            "md5": "321f"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("a.jpg");
    std::fs::write(&source, b"payload").unwrap();

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let object = client.upload_object("real", "a.jpg", &source).await.unwrap();

    assert_eq!(object.id, "obj-9");
    assert_eq!(object.md5.as_deref(), Some("321f"));
}

#[tokio::test]
async fn download_object_writes_target_file() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/objects/obj-1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/a.jpg");

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    client
        .download_object_to_path("obj-1", &target, None)
        .await
        .unwrap();

    assert_eq!(std::fs::read(target).unwrap(), b"hello");
}

#[tokio::test]
async fn download_object_rejects_md5_mismatch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/objects/obj-1/content"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("a.jpg");

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .download_object_to_path("obj-1", &target, Some("deadbeef"))
        .await
        .expect_err("expected md5 mismatch");

    assert!(matches!(err, VaultError::IntegrityMismatch { .. }));
    assert!(!target.exists());
}

#[tokio::test]
async fn move_object_posts_folder_pair() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/objects/obj-1/move"))
        .and(wiremock::matchers::body_json(json!({
            "from_folder": "bad",
            "to_folder": "real"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "obj-1",
            "name": "a.jpg"
        })))
        .mount(&server)
        .await;

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let object = client.move_object("obj-1", "bad", "real").await.unwrap();

    assert_eq!(object.id, "obj-1");
}

#[tokio::test]
async fn delete_object_accepts_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/objects/obj-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.delete_object("obj-1").await.unwrap();
}

#[tokio::test]
async fn rate_limit_error_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders/real/objects"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = VaultClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .list_objects("real", None, None)
        .await
        .expect_err("expected rate limit error");

    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_secs(), Some(7));
}
