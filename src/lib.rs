pub mod auth;
pub mod config;
pub mod error;
pub mod logger;
pub mod metrics;

use auth::{auth_middleware, login, me, register, CredentialVerifier, JwtService, LoginGuard, TokenIssuer, UserStore};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use config::Config;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

// 统一的应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub login_guard: Arc<LoginGuard>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub user_store: Arc<UserStore>,
    pub token_issuer: Arc<dyn TokenIssuer>,
}

impl AppState {
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let token_issuer = Arc::new(
            JwtService::new(&config.auth.secret_key, config.token_ttl_seconds())
                .map_err(|e| anyhow::anyhow!("JWT服务初始化失败: {}", e))?,
        );

        let user_store = Arc::new(
            UserStore::new(config.auth.users.clone())
                .map_err(|e| anyhow::anyhow!("用户存储初始化失败: {}", e))?,
        );

        let login_guard = Arc::new(LoginGuard::new(config.login_guard.clone()));

        Ok(Self {
            config: Arc::new(config),
            login_guard,
            verifier: user_store.clone(),
            user_store,
            token_issuer,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    // 公开路由（无需认证）
    let public_routes = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/metrics", get(metrics::metrics_handler));

    // 受保护路由（需要 Token）
    let protected_routes = Router::new()
        .route("/auth/me", get(me))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = cors_layer(&state.config.server.allowed_origins);

    public_routes
        .merge(protected_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
