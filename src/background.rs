//! 空闲限流器清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LIMITER_PRUNE_INTERVAL_SECS;
use crate::limiter::LimiterRegistry;

/// 启动后台任务；`idle_ttl` 为 0 或限流关闭时限流器永不回收，不启动任务。
pub fn spawn_background_tasks(limiters: Arc<LimiterRegistry>, idle_ttl: Duration) {
    if idle_ttl.is_zero() || !limiters.is_enabled() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LIMITER_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let removed = limiters.prune_idle(idle_ttl).await;
            if removed > 0 {
                let remaining = limiters.len().await;
                debug!(removed, remaining, "pruned idle limiters");
            }
        }
    });
}
