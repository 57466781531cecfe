use crate::{error::AppError, AppState};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

/// Token 验证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // 提取 Authorization header
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("需要登录".to_string()))?;

    // 提取 Bearer token
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization 格式错误".to_string()))?;

    // 验证 token
    let claims = state.token_issuer.validate(token).map_err(|e| {
        tracing::debug!(error = %e, "Token 校验失败");
        AppError::Unauthorized("Token 无效或已过期".to_string())
    })?;

    // 将用户信息存入 request extensions
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}
