use provencal_api::{
    build_router,
    config::Config,
    logger::{init_logger, LoggerConfig},
    AppState,
};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（日志级别和目录来自配置）
    let config = Config::load()?;

    init_logger(&LoggerConfig::from(&config.logging))?;
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }

    let guard_cfg = &config.login_guard;
    tracing::info!("配置加载成功，运行环境: {}", config.server.env);
    tracing::info!(
        "登录保护: 窗口 {} 秒内失败 {} 次锁定 {} 秒，退避 {}~{} 秒，信任 X-Forwarded-For: {}",
        guard_cfg.window_seconds,
        guard_cfg.max_attempts,
        guard_cfg.lockout_seconds,
        guard_cfg.base_delay_seconds,
        guard_cfg.max_delay_seconds,
        guard_cfg.trust_x_forwarded_for
    );
    tracing::info!("Token 有效期: {} 分钟", config.auth.access_token_expire_minutes);

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::from_config(config)?;
    tracing::info!("预置用户数: {}", state.user_store.len().await);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 服务启动成功: http://{}", addr);
    tracing::info!("📝 登录接口: POST http://{}/auth/login", addr);

    // 登录保护需要对端地址
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("服务已停止");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // 监听失败时不能立即关闭服务
        tracing::error!("无法监听 Ctrl+C 信号: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号，正在停止服务...");
}
