//! HTTP 辅助工具：可信代理头解析、CORS 与安全头。

use axum::body::Body as AxumBody;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::{middleware, response::Response};
use std::net::{IpAddr, SocketAddr};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::REAL_IP_HEADER;

/// 构建 CORS Layer（支持逗号分隔的来源列表）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// 从 `x-real-ip` 解析反向代理传入的客户端 IP，非法值视为不存在。
/// IPv4 映射的 IPv6 地址统一为 IPv4 形式。
pub fn extract_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(REAL_IP_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
        .map(|ip| ip.to_canonical())
}

/// 读取连接层记录的对端地址。
pub fn peer_addr<B>(request: &Request<B>) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// 用于日志的客户端地址：代理头优先，其次连接地址。
pub fn client_ip_for_log<B>(request: &Request<B>) -> String {
    extract_real_ip(request.headers())
        .or_else(|| peer_addr(request).map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_real_ip_ignores_invalid_values() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_real_ip(&headers), None);

        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("not-an-ip"));
        assert_eq!(extract_real_ip(&headers), None);

        headers.insert(REAL_IP_HEADER, HeaderValue::from_static(" 10.1.2.3 "));
        assert_eq!(
            extract_real_ip(&headers),
            Some("10.1.2.3".parse::<IpAddr>().expect("ip"))
        );
    }

    #[test]
    fn extract_real_ip_unwraps_ipv4_mapped_addresses() {
        let mut headers = HeaderMap::new();
        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("::ffff:10.0.0.1"));
        assert_eq!(
            extract_real_ip(&headers),
            Some("10.0.0.1".parse::<IpAddr>().expect("ip"))
        );

        headers.insert(REAL_IP_HEADER, HeaderValue::from_static("2001:db8::1"));
        assert_eq!(
            extract_real_ip(&headers),
            Some("2001:db8::1".parse::<IpAddr>().expect("ip"))
        );
    }

    #[test]
    fn build_cors_layer_skips_empty_origin_list() {
        assert!(build_cors_layer(None).is_none());
        assert!(build_cors_layer(Some(" , ")).is_none());
        assert!(build_cors_layer(Some("https://example.com")).is_some());
    }
}
