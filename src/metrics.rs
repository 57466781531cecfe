use crate::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    pub registry: Registry,
    /// 登录结果：success / failure / blocked
    pub login_attempts: CounterVec,
    /// 防暴力破解当前跟踪的键数量
    pub tracked_keys: IntGauge,
    pub registrations: Counter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let login_attempts = CounterVec::new(
            Opts::new("login_attempts_total", "Login attempts grouped by result"),
            &["result"],
        )
        .expect("login_attempts_total 定义无效");
        registry
            .register(Box::new(login_attempts.clone()))
            .expect("login_attempts_total 注册失败");

        let tracked_keys = IntGauge::new(
            "login_guard_tracked_keys",
            "Address and username keys currently tracked by the login guard",
        )
        .expect("login_guard_tracked_keys 定义无效");
        registry
            .register(Box::new(tracked_keys.clone()))
            .expect("login_guard_tracked_keys 注册失败");

        let registrations = Counter::new("registrations_total", "Successful user registrations")
            .expect("registrations_total 定义无效");
        registry
            .register(Box::new(registrations.clone()))
            .expect("registrations_total 注册失败");

        Self {
            registry,
            login_attempts,
            tracked_keys,
            registrations,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    // 键数量在导出时读取，封禁和清理导致的变化都能反映出来
    METRICS
        .tracked_keys
        .set(state.login_guard.tracked_keys() as i64);

    match METRICS.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "指标导出失败");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
