//! 登录流程集成测试：通过真实路由验证防暴力破解行为

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use provencal_api::{
    auth::{CredentialVerifier, JwtService, LoginGuard, UserStore},
    build_router,
    config::{Config, LoginGuardConfig},
    error::AppError,
    AppState,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

/// 明文比对的校验器，同时统计调用次数
struct CountingVerifier {
    users: HashMap<String, String>,
    calls: AtomicUsize,
}

impl CountingVerifier {
    fn new(users: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            users: users
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for CountingVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.get(username).is_some_and(|p| p == password))
    }
}

fn app_with(guard_cfg: LoginGuardConfig, verifier: Arc<dyn CredentialVerifier>) -> Router {
    let mut config = Config::default();
    config.auth.secret_key = "integration-secret".to_string();
    config.login_guard = guard_cfg.clone();
    config.finalize().unwrap();

    let state = AppState {
        config: Arc::new(config),
        login_guard: Arc::new(LoginGuard::new(guard_cfg)),
        verifier,
        user_store: Arc::new(UserStore::new(Vec::new()).unwrap()),
        token_issuer: Arc::new(JwtService::new("integration-secret", 1800).unwrap()),
    };
    build_router(state)
}

fn guard_cfg(f: impl FnOnce(&mut LoginGuardConfig)) -> LoginGuardConfig {
    let mut cfg = LoginGuardConfig::default();
    f(&mut cfg);
    cfg
}

async fn send(app: &Router, peer: &str, request: Request<Body>) -> Response {
    let peer: SocketAddr = peer.parse().unwrap();
    app.clone()
        .layer(MockConnectInfo(peer))
        .oneshot(request)
        .await
        .unwrap()
}

fn login_request(username: &str, password: &str, forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(xff) = forwarded_for {
        builder = builder.header("x-forwarded-for", xff);
    }
    builder
        .body(Body::from(
            json!({ "username": username, "password": password }).to_string(),
        ))
        .unwrap()
}

async fn login(app: &Router, peer: &str, username: &str, password: &str) -> Response {
    send(app, peer, login_request(username, password, None)).await
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_login_success_issues_usable_token() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(LoginGuardConfig::default(), verifier);

    let response = login(&app, "1.2.3.4:40000", "alice", "wonderland").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 1800);
    let token = body["access_token"].as_str().unwrap().to_string();

    let me = Request::builder()
        .uri("/auth/me")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, "1.2.3.4:40000", me).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["username"], "alice");
}

#[tokio::test]
async fn test_me_requires_token() {
    let app = app_with(LoginGuardConfig::default(), CountingVerifier::new(&[]));

    let request = Request::builder().uri("/auth/me").body(Body::empty()).unwrap();
    let response = send(&app, "1.2.3.4:40000", request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/auth/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, "1.2.3.4:40000", request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_failure_then_backoff_blocks_without_verifying() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(guard_cfg(|c| c.base_delay_seconds = 60), verifier.clone());

    let response = login(&app, "1.2.3.4:40000", "alice", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Bearer"
    );
    assert_eq!(verifier.calls(), 1);

    // 正确密码也要等退避结束，且不会调用校验器
    let response = login(&app, "1.2.3.4:40000", "alice", "wonderland").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(retry_after(&response), 60);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "too_many_attempts");
    assert_eq!(body["error"]["retry_after"], 60);
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn test_username_lockout_follows_user_across_addresses() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(
        guard_cfg(|c| {
            c.base_delay_seconds = 0;
            c.max_attempts = 2;
        }),
        verifier.clone(),
    );

    for _ in 0..2 {
        let response = login(&app, "1.2.3.4:40000", "alice", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = login(&app, "5.6.7.8:40000", "Alice", "wonderland").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let wait = retry_after(&response);
    assert!((899..=900).contains(&wait), "wait={}", wait);
    assert_eq!(verifier.calls(), 2);

    // 被锁定的地址换用户名也不行
    let response = login(&app, "1.2.3.4:40000", "bob", "whatever").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(
        guard_cfg(|c| {
            c.base_delay_seconds = 0;
            c.max_attempts = 3;
        }),
        verifier,
    );

    for _ in 0..2 {
        login(&app, "1.2.3.4:40000", "alice", "wrong").await;
    }
    let response = login(&app, "1.2.3.4:40000", "alice", "wonderland").await;
    assert_eq!(response.status(), StatusCode::OK);

    // 计数已清零：再失败两次仍未达到上限
    for _ in 0..2 {
        let response = login(&app, "1.2.3.4:40000", "alice", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = login(&app, "1.2.3.4:40000", "alice", "wonderland").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_empty_username_probes_are_throttled_together() {
    let app = app_with(
        guard_cfg(|c| {
            c.base_delay_seconds = 0;
            c.max_attempts = 2;
        }),
        CountingVerifier::new(&[]),
    );

    login(&app, "1.1.1.1:40000", "", "guess").await;
    login(&app, "2.2.2.2:40000", "  ", "guess").await;

    let response = login(&app, "3.3.3.3:40000", "", "guess").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_first_hop_when_trusted() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(
        guard_cfg(|c| {
            c.base_delay_seconds = 0;
            c.max_attempts = 1;
            c.trust_x_forwarded_for = true;
        }),
        verifier,
    );

    let response = send(
        &app,
        "10.0.0.1:40000",
        login_request("ghost", "nope", Some("1.2.3.4, 10.0.0.2")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // 代理本身的地址没有被锁
    let response = send(
        &app,
        "10.0.0.1:40000",
        login_request("alice", "wonderland", Some("9.9.9.9")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        "10.0.0.1:40000",
        login_request("alice", "wonderland", Some("1.2.3.4")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forwarded_for_ignored_by_default() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(
        guard_cfg(|c| {
            c.base_delay_seconds = 0;
            c.max_attempts = 1;
        }),
        verifier,
    );

    send(
        &app,
        "10.0.0.1:40000",
        login_request("ghost", "nope", Some("1.2.3.4")),
    )
    .await;

    // 伪造的头部不能绕过对端地址的锁定
    let response = send(
        &app,
        "10.0.0.1:40000",
        login_request("alice", "wonderland", Some("9.9.9.9")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_register_then_login() {
    let mut config = Config::default();
    config.auth.secret_key = "integration-secret".to_string();
    config.finalize().unwrap();
    let state = AppState::from_config(config).unwrap();
    let app = build_router(state);

    let register = |username: &str| {
        Request::builder()
            .method("POST")
            .uri("/auth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "username": username, "password": "lavande" }).to_string(),
            ))
            .unwrap()
    };

    let response = send(&app, "1.2.3.4:40000", register(" mistral ")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(json_body(response).await["username"], "mistral");

    let response = send(&app, "1.2.3.4:40000", register("mistral")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = login(&app, "1.2.3.4:40000", "mistral", "lavande").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app_with(LoginGuardConfig::default(), CountingVerifier::new(&[]));
    login(&app, "1.2.3.4:40000", "nobody", "x").await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = send(&app, "1.2.3.4:40000", request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("login_attempts_total"));
}

fn form_login_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_login_accepts_urlencoded_form() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(guard_cfg(|c| c.base_delay_seconds = 0), verifier.clone());

    let response = send(&app, "1.2.3.4:40000", form_login_request("username=alice&password=x")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(verifier.calls(), 1);

    // OAuth2 密码模式会附带 grant_type 等字段
    let response = send(
        &app,
        "1.2.3.4:40000",
        form_login_request("grant_type=password&username=alice&password=wonderland&scope="),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["token_type"], "bearer");
}

#[tokio::test]
async fn test_login_accepts_multipart_form() {
    let verifier = CountingVerifier::new(&[("alice", "wonderland")]);
    let app = app_with(LoginGuardConfig::default(), verifier.clone());

    let boundary = "----provencal-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"username\"\r\n\r\nalice\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\nwonderland\r\n\
         --{b}--\r\n",
        b = boundary
    );
    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let response = send(&app, "1.2.3.4:40000", request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(verifier.calls(), 1);
}
