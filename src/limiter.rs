//! 按来源地址划分的令牌桶限流器。

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// 令牌桶参数：每秒补充速率与桶容量。
#[derive(Debug, Clone, Copy)]
pub struct RateConfig {
    pub rate: f64,
    pub burst: u32,
}

impl RateConfig {
    /// 速率为 0 时关闭限流。
    pub fn is_enabled(&self) -> bool {
        self.rate > 0.0
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 连续补充的令牌桶，补充在每次检查时按经过的时间惰性计算。
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateConfig) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            rate: config.rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 尝试消耗一个令牌，返回是否成功。
    pub async fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now()).await
    }

    async fn try_acquire_at(&self, now: Instant) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        let mut state = self.state.lock().await;
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        if now > state.last_refill {
            state.last_refill = now;
        }
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 超过 `ttl` 未被访问时视为空闲；正被持有的桶不算空闲。
    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        match self.state.try_lock() {
            Ok(state) => now.saturating_duration_since(state.last_refill) > ttl,
            Err(_) => false,
        }
    }
}

/// 地址到令牌桶的注册表，插入由单个互斥锁串行化。
#[derive(Debug)]
pub struct LimiterRegistry {
    config: RateConfig,
    limiters: Mutex<HashMap<IpAddr, Arc<TokenBucket>>>,
}

impl LimiterRegistry {
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// 获取地址对应的令牌桶，首次访问时创建。
    pub async fn get_or_create(&self, identity: IpAddr) -> Arc<TokenBucket> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(identity)
            .or_insert_with(|| Arc::new(TokenBucket::new(self.config)))
            .clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub async fn len(&self) -> usize {
        self.limiters.lock().await.len()
    }

    /// 移除空闲超过 `ttl` 的令牌桶，返回移除数量。限流关闭时桶不记录访问时间，不做回收。
    pub async fn prune_idle(&self, ttl: Duration) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let now = Instant::now();
        let mut limiters = self.limiters.lock().await;
        let before = limiters.len();
        limiters.retain(|_, bucket| !bucket.is_idle(now, ttl));
        before - limiters.len()
    }
}
