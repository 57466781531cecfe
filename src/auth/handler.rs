use crate::{
    auth::{client_ip::resolve_client_ip, Claims},
    error::AppError,
    metrics::METRICS,
    AppState,
};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// 登录请求体：JSON、urlencoded 表单和 multipart 表单都接受
///
/// 浏览器端用 `FormData` 提交，OAuth2 密码模式的客户端用 urlencoded，
/// 按 Content-Type 选择解析方式，其余情况按 JSON 处理。
pub struct LoginPayload(pub LoginRequest);

#[async_trait]
impl<S> FromRequest<S> for LoginPayload
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(body) = Form::<LoginRequest>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(Self(body));
        }

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return read_multipart(multipart).await.map(Self);
        }

        let Json(body) = Json::<LoginRequest>::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        Ok(Self(body))
    }
}

// 只取 username / password 两个字段，其余字段（grant_type、scope 等）忽略
async fn read_multipart(mut multipart: Multipart) -> Result<LoginRequest, Response> {
    let mut body = LoginRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(IntoResponse::into_response)?
    {
        let name = field.name().map(str::to_owned);
        let slot = match name.as_deref() {
            Some("username") => &mut body.username,
            Some("password") => &mut body.password,
            _ => continue,
        };
        *slot = field.text().await.map_err(IntoResponse::into_response)?;
    }
    Ok(body)
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// 登录：先过防暴力破解检查，再校验密码，最后签发 token
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    LoginPayload(req): LoginPayload,
) -> Result<Json<LoginResponse>, AppError> {
    let guard = &state.login_guard;
    let client_ip = resolve_client_ip(peer, &headers, guard.config().trust_x_forwarded_for);

    // 被封禁的请求不进入密码校验
    let decision = guard.check_allowed(client_ip, &req.username);
    if !decision.allowed {
        METRICS.login_attempts.with_label_values(&["blocked"]).inc();
        tracing::warn!(
            ip = %client_ip,
            username = %req.username,
            retry_after = decision.wait_seconds,
            "登录被拒绝：尝试过于频繁"
        );
        return Err(AppError::TooManyAttempts {
            retry_after: decision.wait_seconds,
        });
    }

    let valid = state.verifier.verify(&req.username, &req.password).await?;

    if !valid {
        let outcome = guard.record_failure(client_ip, &req.username);
        METRICS.login_attempts.with_label_values(&["failure"]).inc();
        tracing::warn!(
            ip = %client_ip,
            username = %req.username,
            fail_count = outcome.fail_count,
            wait_seconds = outcome.wait_seconds,
            locked = outcome.locked,
            "登录失败"
        );
        return Err(AppError::Unauthorized("用户名或密码错误".to_string()));
    }

    guard.record_success(client_ip, &req.username);
    METRICS.login_attempts.with_label_values(&["success"]).inc();

    let subject = req.username.trim();
    let issued = state.token_issuer.issue(subject)?;
    tracing::info!(ip = %client_ip, username = %subject, "登录成功");

    Ok(Json(LoginResponse {
        access_token: issued.token,
        token_type: "bearer",
        expires_in: issued.expires_in,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub username: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let username = state.user_store.register(&req.username, &req.password).await?;
    METRICS.registrations.inc();

    Ok((StatusCode::CREATED, Json(UserResponse { username })))
}

/// 返回 token 中的当前用户
pub async fn me(Extension(claims): Extension<Claims>) -> Json<UserResponse> {
    Json(UserResponse {
        username: claims.sub,
    })
}
