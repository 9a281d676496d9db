use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use boostframe::api::{AppState, router};
use boostframe::billing::DisabledPayments;
use boostframe::config::{ByteSize, Config, PipelineConfig};
use boostframe::ledger::{Account, MemoryStore, PlanTier, RecordStore};
use boostframe::pipeline;
use boostframe::storage::VideoStorage;

const ACCOUNT: &str = "ana";

struct TestApp {
    app: Router,
    store: Arc<dyn RecordStore>,
}

/// Creates a test configuration with in-memory store and storage
fn create_test_config() -> Config {
    let config_toml = r#"
[server]
bind_addr = "127.0.0.1:0"
max_json_bytes = "64KB"

[store]
backend = "memory"

[storage]
provider = "memory"
public_base_url = "http://localhost/files"

[pipeline]
max_retries = 0
retry_backoff_ms = 1
    "#;

    toml::from_str(config_toml).expect("Failed to parse test config")
}

/// Builds a test app with no outbound services
fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

fn build_test_app_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let mut config = create_test_config();
    tweak(&mut config);

    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let storage = VideoStorage::in_memory(config.storage.public_base_url.clone());
    let dispatcher = pipeline::from_config(&config.pipeline).unwrap();

    let state = AppState::new(
        config,
        store.clone(),
        storage,
        dispatcher,
        Arc::new(DisabledPayments),
    );

    TestApp {
        app: router(state),
        store,
    }
}

impl TestApp {
    async fn seed_account(&self, minutes: f64, tier: PlanTier) {
        let mut account = Account::new(ACCOUNT);
        account.email = Some("ana@example.com".to_string());
        account.total_minutes = minutes;
        account.plan_tier = tier;
        self.store.create_account(&account).await.unwrap();
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = ServiceExt::<Request<Body>>::oneshot(self.app.clone(), request)
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn submit(&self, minutes: f64) -> (StatusCode, Value) {
        self.send(json_request(
            "POST",
            "/api/jobs",
            Some(ACCOUNT),
            json!({
                "filename": "talk.mp4",
                "videoFileUrl": "https://videos.example.com/talk.mp4",
                "videoDuration": minutes,
                "captionOptions": {"language": "en", "style": "highlight"}
            }),
        ))
        .await
    }

    async fn report(&self, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", "/api/webhooks/job-status", None, body))
            .await
    }

    async fn usage(&self) -> Value {
        let (status, body) = self.send(get_request("/api/usage", Some(ACCOUNT))).await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn json_request(method: &str, uri: &str, account: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(account) = account {
        builder = builder.header("X-Account-Id", account);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str, account: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri).method("GET");
    if let Some(account) = account {
        builder = builder.header("X-Account-Id", account);
    }
    builder.body(Body::empty()).unwrap()
}

fn outputs(job_id: Value) -> Value {
    json!({
        "jobId": job_id,
        "status": "complete",
        "outputCaptionFile": "https://cdn.example.com/talk.srt",
        "outputVideoFile": "https://cdn.example.com/talk-captioned.mp4"
    })
}

#[tokio::test]
async fn test_health() {
    let app = build_test_app();

    let (status, body) = app.send(get_request("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["store.memory"], "healthy");
    assert_eq!(body["components"]["payments"], "disabled");
    assert_eq!(body["metrics"]["jobs_submitted"], 0);
}

#[tokio::test]
async fn test_account_upsert_creates_then_updates() {
    let app = build_test_app();

    let (status, body) = app
        .send(json_request(
            "PUT",
            "/api/account",
            Some(ACCOUNT),
            json!({"email": "ana@example.com", "firstName": "Ana"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["planTier"], "free");
    assert_eq!(body["totalMinutesCaptioned"], 0.0);

    let (status, body) = app
        .send(json_request(
            "PUT",
            "/api/account",
            Some(ACCOUNT),
            json!({"lastName": "Silva"}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["firstName"], "Ana");
    assert_eq!(body["lastName"], "Silva");

    let (status, body) = app.send(get_request("/api/account", Some(ACCOUNT))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ana@example.com");
}

#[tokio::test]
async fn test_account_rejects_bad_email() {
    let app = build_test_app();

    let (status, body) = app
        .send(json_request(
            "PUT",
            "/api/account",
            Some(ACCOUNT),
            json!({"email": "not-an-email"}),
        ))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_missing_account_header() {
    let app = build_test_app();

    let (status, body) = app.send(get_request("/api/usage", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "MISSING_ACCOUNT");
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let app = build_test_app();

    let (status, _) = app.send(get_request("/api/account", Some("ghost"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.submit(1.0).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_usage_summary() {
    let app = build_test_app();
    app.seed_account(4.0, PlanTier::Free).await;

    let usage = app.usage().await;

    assert_eq!(usage["totalMinutes"], 4.0);
    assert_eq!(usage["freeRemaining"], 1.0);
    assert_eq!(usage["watermarkRemaining"], 6.0);
    assert_eq!(usage["isPaid"], false);
    assert_eq!(usage["planTier"], "free");
    assert_eq!(usage["isOverLimit"], false);
}

#[tokio::test]
async fn test_submission_in_watermark_band() {
    let app = build_test_app();
    app.seed_account(4.0, PlanTier::Free).await;

    let (status, body) = app.submit(2.0).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["watermarked"], true);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["estimatedWaitTime"], "1-2 minutes");

    // Usage only moves on completion
    assert_eq!(app.usage().await["totalMinutes"], 4.0);
}

#[tokio::test]
async fn test_submission_over_limit_requires_upgrade() {
    let app = build_test_app();
    app.seed_account(9.5, PlanTier::Free).await;

    let (status, body) = app.submit(1.0).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["requires_upgrade"], true);
    assert_eq!(body["code"], "UPGRADE_REQUIRED");

    let (_, jobs) = app.send(get_request("/api/jobs", Some(ACCOUNT))).await;
    assert_eq!(jobs.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_paid_account_is_not_watermarked() {
    let app = build_test_app();
    app.seed_account(120.0, PlanTier::Paid).await;

    let (status, body) = app.submit(45.0).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["watermarked"], false);
}

#[tokio::test]
async fn test_submission_rejects_bad_duration() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;

    for minutes in [0.0, -2.0] {
        let (status, body) = app.submit(minutes).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_PAYLOAD");
    }
}

#[tokio::test]
async fn test_submission_requires_json_content_type() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;

    let request = Request::builder()
        .uri("/api/jobs")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .header("X-Account-Id", ACCOUNT)
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_completion_credits_once() {
    let app = build_test_app();
    app.seed_account(1.0, PlanTier::Free).await;

    let (_, receipt) = app.submit(2.0).await;
    let job_id = receipt["jobId"].as_u64().unwrap();

    // Job id arrives as text from some automation tools
    let (status, body) = app.report(outputs(json!(job_id.to_string()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "complete");
    assert_eq!(app.usage().await["totalMinutes"], 3.0);

    let (status, body) = app.report(outputs(json!(job_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(app.usage().await["totalMinutes"], 3.0);

    let (status, job) = app
        .send(get_request(&format!("/api/jobs/{job_id}"), Some(ACCOUNT)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "complete");
    assert_eq!(job["outputCaptionFile"], "https://cdn.example.com/talk.srt");
}

#[tokio::test]
async fn test_failed_then_complete_is_rejected() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;

    let (_, receipt) = app.submit(3.0).await;
    let job_id = receipt["jobId"].clone();

    let (status, _) = app
        .report(json!({"jobId": job_id, "status": "failed", "errorLog": "no audio track"}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.report(outputs(job_id.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.usage().await["totalMinutes"], 0.0);

    let (_, job) = app
        .send(get_request(&format!("/api/jobs/{job_id}"), Some(ACCOUNT)))
        .await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["errorLog"], "no audio track");
}

#[tokio::test]
async fn test_status_webhook_errors() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;
    let (_, receipt) = app.submit(1.0).await;
    let job_id = receipt["jobId"].clone();

    let (status, _) = app.report(outputs(json!(987654))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .report(json!({"jobId": job_id, "status": "complete"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .report(json!({"jobId": job_id, "status": "pending"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .report(json!({"jobId": job_id, "status": "exploded"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Repeated processing is acknowledged
    let (status, body) = app
        .report(json!({"jobId": job_id, "status": "processing"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");
}

#[tokio::test]
async fn test_jobs_are_private_and_newest_first() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;
    app.store.create_account(&Account::new("bo")).await.unwrap();

    let (_, first) = app.submit(1.0).await;
    let (_, second) = app.submit(1.0).await;

    let (status, jobs) = app.send(get_request("/api/jobs", Some(ACCOUNT))).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["id"], second["jobId"]);
    assert_eq!(jobs[1]["id"], first["jobId"]);

    let uri = format!("/api/jobs/{}", first["jobId"]);
    let (status, _) = app.send(get_request(&uri, Some("bo"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(get_request("/api/jobs/abc", Some(ACCOUNT))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_then_submit_and_serve() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;
    let video = b"\x00\x00\x00\x18ftypmp42 fake video".to_vec();

    let request = Request::builder()
        .uri("/api/uploads/talk.mp4")
        .method("POST")
        .header(header::CONTENT_TYPE, "video/mp4")
        .header("X-Account-Id", ACCOUNT)
        .body(Body::from(video.clone()))
        .unwrap();
    let (status, upload) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(upload["size"], video.len());
    let url = upload["videoFileUrl"].as_str().unwrap().to_string();
    let key = upload["key"].as_str().unwrap().to_string();
    assert!(url.ends_with(&key));

    let response = ServiceExt::<Request<Body>>::oneshot(
        app.app.clone(),
        get_request(&format!("/files/{key}"), None),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), video.as_slice());

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/jobs",
            Some(ACCOUNT),
            json!({"filename": "talk.mp4", "videoFileUrl": url, "videoDuration": 1.0}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // A reference into our storage that was never uploaded
    let missing = "http://localhost/files/videos/ana/1-missing.mp4";
    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/jobs",
            Some(ACCOUNT),
            json!({"filename": "missing.mp4", "videoFileUrl": missing, "videoDuration": 1.0}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rejects_non_video_and_oversize() {
    let app = build_test_app_with(|config| config.server.max_upload_bytes = ByteSize(16));
    app.seed_account(0.0, PlanTier::Free).await;

    let request = Request::builder()
        .uri("/api/uploads/notes.txt")
        .method("POST")
        .header(header::CONTENT_TYPE, "text/plain")
        .header("X-Account-Id", ACCOUNT)
        .body(Body::from("hello"))
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let request = Request::builder()
        .uri("/api/uploads/big.mp4")
        .method("POST")
        .header(header::CONTENT_TYPE, "video/mp4")
        .header("X-Account-Id", ACCOUNT)
        .body(Body::from(vec![0u8; 17]))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_dispatch_failure_marks_job_failed() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let uri = server.uri();
    let app = build_test_app_with(move |config| {
        config.pipeline = PipelineConfig {
            webhook_url: Some(format!("{uri}/submit")),
            max_retries: 0,
            retry_backoff_ms: 1,
            ..PipelineConfig::default()
        };
    });
    app.seed_account(0.0, PlanTier::Free).await;

    let (status, receipt) = app.submit(1.0).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["status"], "failed");

    let uri = format!("/api/jobs/{}", receipt["jobId"]);
    let (_, job) = app.send(get_request(&uri, Some(ACCOUNT))).await;
    assert!(job["errorLog"].as_str().unwrap().starts_with("Webhook error: "));
    assert_eq!(app.usage().await["totalMinutes"], 0.0);
}

#[tokio::test]
async fn test_subscriptions_unavailable_without_payments() {
    let app = build_test_app();
    app.seed_account(0.0, PlanTier::Free).await;

    let (status, body) = app
        .send(json_request(
            "POST",
            "/api/subscriptions",
            Some(ACCOUNT),
            json!({"plan": "yearly"}),
        ))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn test_payment_events_change_tier() {
    let app = build_test_app();
    let mut account = Account::new(ACCOUNT);
    account.stripe_customer_id = Some("cus_1".to_string());
    app.store.create_account(&account).await.unwrap();

    let (status, body) = app
        .send(json_request(
            "POST",
            "/api/webhooks/payments",
            None,
            json!({
                "id": "evt_1",
                "type": "invoice.payment_succeeded",
                "data": {"object": {
                    "id": "in_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "amount_paid": 2900
                }}
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(app.usage().await["planTier"], "paid");

    let (status, records) = app.send(get_request("/api/billing", Some(ACCOUNT))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(records[0]["status"], "succeeded");
    assert_eq!(records[0]["amountCents"], 2900);

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/webhooks/payments",
            None,
            json!({
                "type": "customer.subscription.deleted",
                "data": {"object": {"id": "sub_1", "customer": "cus_1"}}
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.usage().await["planTier"], "free");

    let (status, _) = app
        .send(json_request(
            "POST",
            "/api/webhooks/payments",
            None,
            json!({"type": "charge.refund.updated", "data": {"object": {}}}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_complete_payment_upgrades_account() {
    let app = build_test_app();
    app.seed_account(9.5, PlanTier::Free).await;

    let request = Request::builder()
        .uri("/api/payments/complete")
        .method("POST")
        .header("X-Account-Id", ACCOUNT)
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["planTier"], "paid");

    // Previously over the limit, now unrestricted
    let (status, receipt) = app.submit(30.0).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["watermarked"], false);
}
