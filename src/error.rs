use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("登录尝试过多，{retry_after} 秒后重试")]
    TooManyAttempts { retry_after: u64 },

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized(msg) => {
                let body = Json(json!({
                    "error": { "code": "unauthorized", "message": msg }
                }));
                let mut response = (StatusCode::UNAUTHORIZED, body).into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }
            AppError::TooManyAttempts { retry_after } => {
                let body = Json(json!({
                    "error": {
                        "code": "too_many_attempts",
                        "message": format!("登录尝试过多，请 {} 秒后重试", retry_after),
                        "retry_after": retry_after
                    }
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                return response;
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::InternalError(msg) => {
                // 详细信息只写日志，不返回给客户端
                tracing::error!(error = %msg, "内部错误");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "服务器内部错误".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

// anyhow::Error 统一转换为 InternalError，保留完整错误链，在生成响应时写日志
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let error_chain = err
            .chain()
            .enumerate()
            .map(|(i, e)| format!("[{}] {}", i, e))
            .collect::<Vec<_>>()
            .join(" ");

        AppError::InternalError(error_chain)
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::InternalError(format!("后台任务失败: {}", err))
    }
}
