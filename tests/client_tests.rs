use tunnel_scan_rs::client::{ScanClient, ScanService};
use tunnel_scan_rs::config::ServiceConfig;
use tunnel_scan_rs::error::ClientError;
use tunnel_scan_rs::types::{JobId, JobStatus, ScanRequest};
use wiremock::{
    matchers::{body_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client_for(server: &MockServer) -> ScanClient {
    // Trailing slash as in the deployed base URL.
    ScanClient::new(ServiceConfig::with_base_url(format!("{}/", server.uri()))).unwrap()
}

fn status_body(status: &str) -> serde_json::Value {
    serde_json::json!({
        "hosts": [{
            "critical": 1, "high": 2, "medium": 3, "low": 4, "info": 5,
            "scanprogresscurrent": 42, "progress": "42%"
        }],
        "info": {"status": status}
    })
}

#[tokio::test]
async fn create_scan_posts_request_and_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create_scan"))
        .and(body_json(serde_json::json!({
            "email": "ops@example.com",
            "username": "admin",
            "password": "pw",
            "operating_system": "Linux"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"scan_id": 17})))
        .expect(1)
        .mount(&server)
        .await;

    let req = ScanRequest {
        email: "ops@example.com".into(),
        username: Some("admin".into()),
        password: Some("pw".into()),
        operating_system: "Linux".into(),
    };
    let id = client_for(&server).create_scan(&req).await.unwrap();
    assert_eq!(id, JobId(17));
}

#[tokio::test]
async fn create_scan_non_success_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/create_scan"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let req = ScanRequest {
        email: "ops@example.com".into(),
        username: None,
        password: None,
        operating_system: "Windows".into(),
    };
    let err = client_for(&server).create_scan(&req).await.unwrap_err();
    assert!(matches!(err, ClientError::Service(_)));
}

#[tokio::test]
async fn get_status_decodes_first_host() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan_status/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(status_body("running")))
        .mount(&server)
        .await;

    let status = client_for(&server).get_status(JobId(9)).await.unwrap();
    assert_eq!(status.status, JobStatus::Running);
    assert_eq!(status.counts.medium, 3);
    assert_eq!(status.progress_percent, 42);
    assert_eq!(status.progress_label, "42%");
}

#[tokio::test]
async fn get_status_without_hosts_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan_status/9"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"hosts": [], "info": {"status": "running"}})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).get_status(JobId(9)).await.unwrap_err();
    assert!(matches!(err, ClientError::Service(_)));
}

#[tokio::test]
async fn get_status_malformed_body_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan_status/3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).get_status(JobId(3)).await.unwrap_err();
    assert!(matches!(err, ClientError::Service(_)));
}

#[tokio::test]
async fn stop_delete_export_use_their_routes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stop_scan/5"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/delete_scan/5"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/export_report"))
        .and(body_json(serde_json::json!({"scan_id": 5, "email": "ops@example.com"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.stop_scan(JobId(5)).await.unwrap();
    client.delete_scan(JobId(5)).await.unwrap();
    client.export_report(JobId(5), "ops@example.com").await.unwrap();
}

#[tokio::test]
async fn delete_rejected_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/delete_scan/5"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = client_for(&server).delete_scan(JobId(5)).await.unwrap_err();
    assert!(matches!(err, ClientError::Service(_)));
}

#[tokio::test]
async fn reachability_requires_online_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "online"})),
        )
        .mount(&server)
        .await;
    assert!(client_for(&server).is_reachable().await);

    let offline = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"state": "up"})))
        .mount(&offline)
        .await;
    assert!(!client_for(&offline).is_reachable().await);

    let failing = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&failing)
        .await;
    assert!(!client_for(&failing).is_reachable().await);
}

#[tokio::test]
async fn unreachable_host_is_transport_error_and_offline() {
    let client = ScanClient::new(ServiceConfig::with_base_url("http://127.0.0.1:9/")).unwrap();
    assert!(!client.is_reachable().await);
    let err = client.get_status(JobId(1)).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}
