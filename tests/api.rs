//! End-to-end tests for the HTTP API, driven in-process through the router
//! with a scripted agent standing in for the model service.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use genie::agent::{Agent, KnowledgeBase, LoadReport};
use genie::auth::{hash_password, TokenService};
use genie::config::Config;
use genie::models::IngestionStatus;
use genie::server::{build_router, AppState};
use genie::users::{self, NewUser};
use genie::{db, knowledge, migrate};

const SECRET: &str = "test-secret";
const BOUNDARY: &str = "genie-test-boundary";

// ============ Scripted agent ============

#[derive(Default)]
struct ScriptedKnowledge {
    loads: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicUsize,
    skipped: Mutex<Vec<String>>,
}

#[async_trait]
impl KnowledgeBase for ScriptedKnowledge {
    async fn load(&self, _recreate: bool) -> Result<LoadReport> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.loads.fetch_add(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            bail!("vector store unreachable");
        }
        Ok(LoadReport {
            files: 1,
            chunks: 3,
            skipped: self.skipped.lock().unwrap().clone(),
        })
    }
}

struct ScriptedAgent {
    knowledge: Arc<ScriptedKnowledge>,
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "Scripted Advisor"
    }

    async fn run(&self, message: &str) -> Result<String> {
        if message == "explode" {
            return Err(anyhow!("model crashed"));
        }
        Ok(format!("echo: {}", message))
    }

    fn knowledge(&self) -> Arc<dyn KnowledgeBase> {
        self.knowledge.clone()
    }
}

// ============ Harness ============

struct TestApp {
    _tmp: TempDir,
    app: Router,
    state: AppState,
    knowledge: Arc<ScriptedKnowledge>,
    admin_token: String,
}

async fn setup_with(agent_enabled: bool) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.db.path = tmp.path().join("data/genie.sqlite");
    config.knowledge.staging_dir = tmp.path().join("uploads");
    config.auth.secret_key = SECRET.to_string();

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let hashed = hash_password("rootpass").unwrap();
    users::create(
        &pool,
        NewUser {
            username: "root",
            email: "root@example.com",
            hashed_password: &hashed,
            is_admin: true,
        },
    )
    .await
    .unwrap();

    let knowledge = Arc::new(ScriptedKnowledge::default());
    let agent: Option<Arc<dyn Agent>> = if agent_enabled {
        Some(Arc::new(ScriptedAgent {
            knowledge: knowledge.clone(),
        }))
    } else {
        None
    };

    let state = AppState::new(config, pool, agent).unwrap();
    let app = build_router(state.clone());
    let admin_token = login(&app, "root", "rootpass").await;

    TestApp {
        _tmp: tmp,
        app,
        state,
        knowledge,
        admin_token,
    }
}

async fn setup() -> TestApp {
    setup_with(true).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).to_string())
        })
    };
    (status, body)
}

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn delete(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn upload_request(token: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = filename,
        c = content
    );
    Request::builder()
        .method(Method::POST)
        .uri("/api/admin/knowledge/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn try_login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!(
            "username={}&password={}",
            username, password
        )))
        .unwrap();
    send(app, request).await
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = try_login(app, username, password).await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["access_token"].as_str().unwrap().to_string()
}

async fn register(app: &Router, username: &str, email: &str) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({ "username": username, "email": email, "password": "pw12345" }),
        ),
    )
    .await
}

/// Register a regular user and return their token.
async fn user_token(app: &Router, username: &str) -> String {
    let (status, _) = register(app, username, &format!("{}@example.com", username)).await;
    assert_eq!(status, StatusCode::CREATED);
    login(app, username, "pw12345").await
}

async fn wait_for_job(t: &TestApp, job_id: &str) -> Value {
    for _ in 0..250 {
        let (status, job) = send(
            &t.app,
            get(
                &format!("/api/admin/knowledge/jobs/{}", job_id),
                Some(&t.admin_token),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if matches!(
            job["state"].as_str(),
            Some("succeeded" | "failed" | "cancelled")
        ) {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} did not finish", job_id);
}

async fn file_status(t: &TestApp, id: i64) -> Option<IngestionStatus> {
    knowledge::get_file(&t.state.pool, id)
        .await
        .unwrap()
        .map(|f| f.status)
}

// ============ Health & auth ============

#[tokio::test]
async fn test_health() {
    let t = setup().await;
    let (status, body) = send(&t.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_register_login_and_me() {
    let t = setup().await;
    let (status, user) = register(&t.app, "ada", "ada@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["username"], "ada");
    assert_eq!(user["is_admin"], false);
    assert_eq!(user["chat_requests_count"], 0);
    assert!(user.get("hashed_password").is_none());

    let token = login(&t.app, "ada", "pw12345").await;
    let claims = TokenService::new(SECRET, 30).verify(&token).unwrap();
    assert_eq!(claims.sub, "ada");
    assert_eq!(claims.email, "ada@example.com");
    assert!(!claims.is_admin);
    assert_eq!(claims.id, user["id"].as_i64().unwrap());

    let (status, me) = send(&t.app, get("/api/users/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user["id"]);
    assert_eq!(me["email"], "ada@example.com");
}

#[tokio::test]
async fn test_admin_token_claims() {
    let t = setup().await;
    let claims = TokenService::new(SECRET, 30)
        .verify(&t.admin_token)
        .unwrap();
    assert_eq!(claims.sub, "root");
    assert!(claims.is_admin);
}

#[tokio::test]
async fn test_register_duplicates_conflict() {
    let t = setup().await;
    assert_eq!(register(&t.app, "ada", "ada@example.com").await.0, StatusCode::CREATED);

    let (status, body) = register(&t.app, "ada2", "ada@example.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
    assert_eq!(body["error"]["message"], "Email already registered");

    let (status, body) = register(&t.app, "ada", "other@example.com").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "Username already taken");
}

#[tokio::test]
async fn test_register_validation() {
    let t = setup().await;
    let (status, body) = register(&t.app, "ada", "not-an-email").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = send(
        &t.app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({ "username": "ada" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_cannot_self_promote() {
    let t = setup().await;
    let (status, user) = send(
        &t.app,
        json_request(
            Method::POST,
            "/api/auth/register",
            None,
            json!({ "username": "mallory", "email": "m@example.com", "password": "pw", "is_admin": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["is_admin"], false);
}

#[tokio::test]
async fn test_bad_credentials_share_message() {
    let t = setup().await;
    register(&t.app, "ada", "ada@example.com").await;

    let (status_user, body_user) = try_login(&t.app, "nobody", "pw12345").await;
    let (status_pass, body_pass) = try_login(&t.app, "ada", "wrong").await;
    assert_eq!(status_user, StatusCode::UNAUTHORIZED);
    assert_eq!(status_pass, StatusCode::UNAUTHORIZED);
    assert_eq!(body_user["error"]["message"], body_pass["error"]["message"]);
}

#[tokio::test]
async fn test_missing_and_invalid_tokens() {
    let t = setup().await;

    let response = t.app.clone().oneshot(get("/api/users/me", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );

    for token in ["null", "garbage", "a.b.c"] {
        let (status, body) = send(&t.app, get("/api/users/me", Some(token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "token {:?}", token);
        assert_eq!(body["error"]["code"], "unauthenticated");
    }

    // Signed with another secret.
    let user = users::find_by_username(&t.state.pool, "root")
        .await
        .unwrap()
        .unwrap();
    let forged = TokenService::new("other-secret", 30).issue(&user).unwrap();
    let (status, _) = send(&t.app, get("/api/users/me", Some(&forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_deleted_user_is_rejected() {
    let t = setup().await;
    let token = user_token(&t.app, "ghost").await;
    let (_, me) = send(&t.app, get("/api/users/me", Some(&token))).await;
    let id = me["id"].as_i64().unwrap();

    users::delete(&t.state.pool, id).await.unwrap();
    let (status, _) = send(&t.app, get("/api/users/me", Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_does_not_follow_reused_username() {
    let t = setup().await;
    let old_token = user_token(&t.app, "alice").await;
    let (_, me) = send(&t.app, get("/api/users/me", Some(&old_token))).await;
    let alice_id = me["id"].as_i64().unwrap();

    let (status, _) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/api/admin/users/{}", alice_id),
            Some(&t.admin_token),
            json!({ "username": "alice2" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, newcomer) = register(&t.app, "alice", "mallory@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(newcomer["id"].as_i64().unwrap(), alice_id);

    let (status, body) = send(&t.app, get("/api/users/me", Some(&old_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);

    let new_token = login(&t.app, "alice", "pw12345").await;
    let (status, me) = send(&t.app, get("/api/users/me", Some(&new_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "mallory@example.com");
}

#[tokio::test]
async fn test_token_for_deleted_and_recreated_username_is_rejected() {
    let t = setup().await;
    let old_token = user_token(&t.app, "bob").await;
    let (_, me) = send(&t.app, get("/api/users/me", Some(&old_token))).await;
    let bob_id = me["id"].as_i64().unwrap();

    let (status, _) = send(
        &t.app,
        delete(&format!("/api/admin/users/{}", bob_id), &t.admin_token),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(register(&t.app, "bob", "bob@example.com").await.0, StatusCode::CREATED);

    let (status, _) = send(&t.app, get("/api/users/me", Some(&old_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_inactive_user_is_forbidden() {
    let t = setup().await;
    let token = user_token(&t.app, "ada").await;
    let (_, me) = send(&t.app, get("/api/users/me", Some(&token))).await;
    let id = me["id"].as_i64().unwrap();

    let (status, updated) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/api/admin/users/{}", id),
            Some(&t.admin_token),
            json!({ "is_active": false }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["is_active"], false);

    let (status, body) = send(&t.app, get("/api/users/me", Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, _) = try_login(&t.app, "ada", "pw12345").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let t = setup().await;
    let token = user_token(&t.app, "ada").await;
    for uri in [
        "/api/admin/config",
        "/api/admin/users",
        "/api/admin/knowledge/files",
        "/api/admin/knowledge/jobs",
    ] {
        let (status, _) = send(&t.app, get(uri, Some(&token))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn test_demoted_admin_loses_access_with_old_token() {
    let t = setup().await;
    let hashed = hash_password("pw").unwrap();
    let second = users::create(
        &t.state.pool,
        NewUser {
            username: "second",
            email: "second@example.com",
            hashed_password: &hashed,
            is_admin: true,
        },
    )
    .await
    .unwrap();
    let token = login(&t.app, "second", "pw").await;
    assert_eq!(
        send(&t.app, get("/api/admin/users", Some(&token))).await.0,
        StatusCode::OK
    );

    let (status, _) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &format!("/api/admin/users/{}", second.id),
            Some(&t.admin_token),
            json!({ "is_admin": false }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        send(&t.app, get("/api/admin/users", Some(&token))).await.0,
        StatusCode::FORBIDDEN
    );
}

// ============ Ask ============

#[tokio::test]
async fn test_ask_logs_every_exchange() {
    let t = setup().await;
    let token = user_token(&t.app, "ada").await;

    let (status, body) = send(
        &t.app,
        json_request(Method::POST, "/api/ask", Some(&token), json!({ "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "echo: hi");

    let (status, body) = send(
        &t.app,
        json_request(Method::POST, "/api/ask", Some(&token), json!({ "message": "explode" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("model crashed"));

    let (status, history) = send(&t.app, get("/api/users/me/history", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["question"], "explode");
    assert_eq!(history[0]["success"], false);
    assert_eq!(history[0]["answer"], Value::Null);
    assert_eq!(history[1]["answer"], "echo: hi");
    assert_eq!(history[1]["agent_used"], "Scripted Advisor");

    let (_, me) = send(&t.app, get("/api/users/me", Some(&token))).await;
    assert_eq!(me["chat_requests_count"], 2);

    let (_, all) = send(&t.app, get("/api/admin/users", Some(&t.admin_token))).await;
    let ada = all
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == "ada")
        .unwrap();
    assert_eq!(ada["chat_requests_count"], 2);
}

#[tokio::test]
async fn test_ask_rejects_empty_message() {
    let t = setup().await;
    let token = user_token(&t.app, "ada").await;
    let (status, _) = send(
        &t.app,
        json_request(Method::POST, "/api/ask", Some(&token), json!({ "message": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, history) = send(&t.app, get("/api/users/me/history", Some(&token))).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_without_agent_returns_503() {
    let t = setup_with(false).await;
    let token = user_token(&t.app, "ada").await;

    let (status, body) = send(
        &t.app,
        json_request(Method::POST, "/api/ask", Some(&token), json!({ "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");

    let (status, _) = send(&t.app, upload_request(&t.admin_token, "a.txt", "x")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = send(&t.app, delete("/api/admin/knowledge/files/1", &t.admin_token)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_ask_requires_auth() {
    let t = setup().await;
    let (status, _) = send(
        &t.app,
        json_request(Method::POST, "/api/ask", None, json!({ "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============ Knowledge ingestion ============

#[tokio::test]
async fn test_upload_is_ingested() {
    let t = setup().await;
    let (status, receipt) = send(
        &t.app,
        upload_request(&t.admin_token, "q1-report.txt", "Revenue grew."),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", receipt);
    assert_eq!(receipt["filename"], "q1-report.txt");
    assert_eq!(receipt["status"], "processing");
    let id = receipt["id"].as_i64().unwrap();

    let staged = t.state.config.knowledge.staging_dir.join("q1-report.txt");
    assert_eq!(std::fs::read_to_string(&staged).unwrap(), "Revenue grew.");

    let job = wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "succeeded");
    assert_eq!(job["file_id"], id);
    assert!(job["started_at"].is_string());
    assert!(job["finished_at"].is_string());
    assert_eq!(file_status(&t, id).await, Some(IngestionStatus::Ingested));

    // Settled records never transition again.
    assert!(!knowledge::settle(&t.state.pool, id, IngestionStatus::Failed)
        .await
        .unwrap());
    assert_eq!(file_status(&t, id).await, Some(IngestionStatus::Ingested));

    let (status, files) = send(
        &t.app,
        get("/api/admin/knowledge/files", Some(&t.admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let files = files.as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["status"], "ingested");
    assert_eq!(files[0]["bytes"], 13);
    assert_eq!(files[0]["sha256"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_upload_strips_directories() {
    let t = setup().await;
    let (status, receipt) = send(
        &t.app,
        upload_request(&t.admin_token, "../../etc/notes.md", "text"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["filename"], "notes.md");
    assert!(t
        .state
        .config
        .knowledge
        .staging_dir
        .join("notes.md")
        .exists());
}

#[tokio::test]
async fn test_duplicate_upload_conflicts_and_keeps_original() {
    let t = setup().await;
    let (_, first) = send(&t.app, upload_request(&t.admin_token, "a.txt", "original")).await;
    wait_for_job(&t, first["job_id"].as_str().unwrap()).await;

    let (status, body) = send(&t.app, upload_request(&t.admin_token, "a.txt", "replacement")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let staged = t.state.config.knowledge.staging_dir.join("a.txt");
    assert_eq!(std::fs::read_to_string(staged).unwrap(), "original");
    let record = knowledge::find_file(&t.state.pool, "a.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.id, first["id"].as_i64().unwrap());
    assert_eq!(record.bytes, 8);
    assert_eq!(t.state.jobs.list().len(), 1);
}

#[tokio::test]
async fn test_failed_reload_marks_file_failed() {
    let t = setup().await;
    t.knowledge.fail.store(true, Ordering::SeqCst);

    let (_, receipt) = send(&t.app, upload_request(&t.admin_token, "a.txt", "x")).await;
    let job = wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "failed");
    assert!(job["error"]
        .as_str()
        .unwrap()
        .contains("vector store unreachable"));

    let id = receipt["id"].as_i64().unwrap();
    assert_eq!(file_status(&t, id).await, Some(IngestionStatus::Failed));
}

#[tokio::test]
async fn test_skipped_file_marks_file_failed() {
    let t = setup().await;
    t.knowledge
        .skipped
        .lock()
        .unwrap()
        .push("scan.pdf".to_string());

    let (_, receipt) = send(&t.app, upload_request(&t.admin_token, "scan.pdf", "%PDF")).await;
    let job = wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "failed");

    let id = receipt["id"].as_i64().unwrap();
    assert_eq!(file_status(&t, id).await, Some(IngestionStatus::Failed));
}

#[tokio::test]
async fn test_unsupported_upload_is_rejected() {
    let t = setup().await;
    for name in ["chart.png", "data.csv", "README"] {
        let (status, body) = send(&t.app, upload_request(&t.admin_token, name, "bytes")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}: {}", name, body);
        assert_eq!(body["error"]["code"], "bad_request");

        assert!(knowledge::find_file(&t.state.pool, name)
            .await
            .unwrap()
            .is_none());
        assert!(!t.state.config.knowledge.staging_dir.join(name).exists());
    }
    assert!(t.state.jobs.list().is_empty());
    assert_eq!(t.knowledge.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let t = setup().await;
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/admin/knowledge/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", t.admin_token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_file_schedules_untracked_reload() {
    let t = setup().await;
    let (_, receipt) = send(&t.app, upload_request(&t.admin_token, "a.txt", "x")).await;
    wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
    let id = receipt["id"].as_i64().unwrap();

    let staged = t.state.config.knowledge.staging_dir.join("a.txt");
    assert!(staged.exists());

    let (status, body) = send(
        &t.app,
        delete(&format!("/api/admin/knowledge/files/{}", id), &t.admin_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("a.txt"));
    assert!(!staged.exists());
    assert_eq!(file_status(&t, id).await, None);

    let job = wait_for_job(&t, body["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "succeeded");
    assert_eq!(job["file_id"], Value::Null);
    assert_eq!(t.knowledge.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_delete_with_missing_disk_file() {
    let t = setup().await;
    let (_, receipt) = send(&t.app, upload_request(&t.admin_token, "a.txt", "x")).await;
    wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
    let id = receipt["id"].as_i64().unwrap();

    std::fs::remove_file(t.state.config.knowledge.staging_dir.join("a.txt")).unwrap();

    let uri = format!("/api/admin/knowledge/files/{}", id);
    let (status, _) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file_status(&t, id).await, None);

    let (status, body) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_reloads_are_serialized() {
    let t = setup().await;
    t.knowledge.delay_ms.store(50, Ordering::SeqCst);

    let mut jobs = Vec::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        let (status, receipt) = send(&t.app, upload_request(&t.admin_token, name, name)).await;
        assert_eq!(status, StatusCode::OK);
        jobs.push(receipt);
    }
    for receipt in &jobs {
        let job = wait_for_job(&t, receipt["job_id"].as_str().unwrap()).await;
        assert_eq!(job["state"], "succeeded");
        let id = receipt["id"].as_i64().unwrap();
        assert_eq!(file_status(&t, id).await, Some(IngestionStatus::Ingested));
    }

    assert_eq!(t.knowledge.loads.load(Ordering::SeqCst), 3);
    assert_eq!(t.knowledge.max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let t = setup().await;
    t.knowledge.delay_ms.store(300, Ordering::SeqCst);

    let (_, first) = send(&t.app, upload_request(&t.admin_token, "a.txt", "a")).await;
    let (_, second) = send(&t.app, upload_request(&t.admin_token, "b.txt", "b")).await;
    let second_job = second["job_id"].as_str().unwrap();

    let uri = format!("/api/admin/knowledge/jobs/{}", second_job);
    let (status, cancelled) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::OK, "{}", cancelled);
    assert_eq!(cancelled["state"], "cancelled");

    let second_id = second["id"].as_i64().unwrap();
    assert_eq!(file_status(&t, second_id).await, Some(IngestionStatus::Failed));

    let job = wait_for_job(&t, first["job_id"].as_str().unwrap()).await;
    assert_eq!(job["state"], "succeeded");
    let first_id = first["id"].as_i64().unwrap();
    assert_eq!(file_status(&t, first_id).await, Some(IngestionStatus::Ingested));

    // Still cancelled, and a second cancel is a conflict.
    let (_, job) = send(&t.app, get(&uri, Some(&t.admin_token))).await;
    assert_eq!(job["state"], "cancelled");
    let (status, _) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_job_lookup_and_listing() {
    let t = setup().await;
    let (_, a) = send(&t.app, upload_request(&t.admin_token, "a.txt", "a")).await;
    let (_, b) = send(&t.app, upload_request(&t.admin_token, "b.txt", "b")).await;

    let (status, jobs) = send(
        &t.app,
        get("/api/admin/knowledge/jobs", Some(&t.admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = jobs
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![b["job_id"].as_str().unwrap(), a["job_id"].as_str().unwrap()]
    );

    let unknown = format!("/api/admin/knowledge/jobs/{}", uuid::Uuid::new_v4());
    let (status, _) = send(&t.app, get(&unknown, Some(&t.admin_token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&t.app, delete(&unknown, &t.admin_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============ Admin: users & config ============

#[tokio::test]
async fn test_admin_user_management() {
    let t = setup().await;
    let token = user_token(&t.app, "ada").await;
    user_token(&t.app, "bob").await;
    send(
        &t.app,
        json_request(Method::POST, "/api/ask", Some(&token), json!({ "message": "hi" })),
    )
    .await;

    let (_, me) = send(&t.app, get("/api/users/me", Some(&token))).await;
    let ada_id = me["id"].as_i64().unwrap();
    let uri = format!("/api/admin/users/{}", ada_id);

    let (status, user) = send(&t.app, get(&uri, Some(&t.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["username"], "ada");

    let (status, body) = send(
        &t.app,
        json_request(Method::PATCH, &uri, Some(&t.admin_token), json!({ "username": "bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);

    let (status, user) = send(
        &t.app,
        json_request(
            Method::PATCH,
            &uri,
            Some(&t.admin_token),
            json!({ "email": "ada@new.example.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["email"], "ada@new.example.com");
    assert_eq!(user["username"], "ada");

    let (status, body) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&t.app, get(&uri, Some(&t.admin_token))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&t.app, delete(&uri, &t.admin_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_questions WHERE user_id = ?")
        .bind(ada_id)
        .fetch_one(&t.state.pool)
        .await
        .unwrap();
    assert_eq!(orphaned, 0);

    let (status, _) = send(
        &t.app,
        json_request(
            Method::PATCH,
            "/api/admin/users/9999",
            Some(&t.admin_token),
            json!({ "is_active": false }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_config_upsert() {
    let t = setup().await;
    for value in ["v1", "v2"] {
        let (status, entry) = send(
            &t.app,
            json_request(
                Method::POST,
                "/api/admin/config",
                Some(&t.admin_token),
                json!({ "key": "welcome", "value": value }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["value"], value);
    }

    let (status, entries) = send(&t.app, get("/api/admin/config", Some(&t.admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries, json!([{ "id": 1, "key": "welcome", "value": "v2" }]));
}
