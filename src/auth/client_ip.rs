use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// 解析客户端地址
///
/// 默认使用 TCP 对端地址。只有显式开启 `trust_forwarded_for` 时才读取
/// X-Forwarded-For，并且只取第一跳；头部缺失或无法解析时回退到对端地址。
pub fn resolve_client_ip(peer: SocketAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> IpAddr {
    if !trust_forwarded_for {
        return peer.ip();
    }

    headers
        .get(X_FORWARDED_FOR)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| {
            tracing::debug!(peer = %peer, "X-Forwarded-For 缺失或无效，使用对端地址");
            peer.ip()
        })
}
