//! 上传请求准入：方法校验、来源识别、白名单与限流。

use axum::http::{HeaderMap, Method};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::http::extract_real_ip;
use crate::limiter::LimiterRegistry;
use crate::settings::Allowlist;

/// 准入被拒绝的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MethodNotAllowed,
    UnresolvedRemote(String),
    AddressNotAllowed(IpAddr),
    RateLimited(IpAddr),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MethodNotAllowed => f.write_str("method not allowed"),
            Rejection::UnresolvedRemote(reason) => f.write_str(reason),
            Rejection::AddressNotAllowed(ip) => write!(f, "address not allowed: {ip}"),
            Rejection::RateLimited(ip) => write!(f, "rate limit exceeded for address: {ip}"),
        }
    }
}

/// 上传接口的准入检查，依次短路执行。
#[derive(Debug)]
pub struct AdmissionGate {
    allowlist: Allowlist,
    limiters: Arc<LimiterRegistry>,
}

impl AdmissionGate {
    pub fn new(allowlist: Allowlist, limiters: Arc<LimiterRegistry>) -> Self {
        Self {
            allowlist,
            limiters,
        }
    }

    pub fn limiters(&self) -> &Arc<LimiterRegistry> {
        &self.limiters
    }

    /// 通过时返回最终识别出的客户端地址。
    ///
    /// `x-real-ip` 只要能解析就会被无条件信任并替换连接地址，
    /// 部署在不可信网络之后时需要在上游过滤该头。
    pub async fn admit(
        &self,
        method: &Method,
        remote: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> Result<IpAddr, Rejection> {
        if *method != Method::POST {
            return Err(Rejection::MethodNotAllowed);
        }

        let mut identity = remote
            .map(|addr| addr.ip().to_canonical())
            .ok_or_else(|| Rejection::UnresolvedRemote("unable to resolve remote address".into()))?;
        self.check_allowlist(identity)?;

        if let Some(real_ip) = extract_real_ip(headers) {
            identity = real_ip;
            self.check_allowlist(identity)?;
        }

        let limiter = self.limiters.get_or_create(identity).await;
        if !limiter.try_acquire().await {
            return Err(Rejection::RateLimited(identity));
        }

        Ok(identity)
    }

    fn check_allowlist(&self, identity: IpAddr) -> Result<(), Rejection> {
        if self.allowlist.permits(identity) {
            Ok(())
        } else {
            Err(Rejection::AddressNotAllowed(identity))
        }
    }
}
