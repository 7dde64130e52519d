//! Fixed-window rate limiting with a pluggable counter store.
//!
//! Two tiers share one store: a coarse global budget on all traffic and a
//! stricter budget on sensitive endpoints. A strict request draws from both;
//! either can reject it. When the counter store is unreachable the limiter
//! fails open: an outage must degrade limiting, not take the gateway down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deadpool_redis::Pool;
use tracing::{debug, warn};

use skein_config::{RateLimitConfig, RatePolicyConfig};

#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub limit: u32,
    pub window: Duration,
}

impl From<RatePolicyConfig> for RatePolicy {
    fn from(cfg: RatePolicyConfig) -> Self {
        Self {
            limit: cfg.limit,
            window: cfg.window(),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: u64 },
}

#[derive(Debug)]
pub struct WindowCounter {
    count: u32,
    window_start: Instant,
}

/// Counter store shared by all limiter tiers.
#[derive(Clone)]
pub enum CounterStore {
    /// Single-instance: per-key fixed windows in process memory.
    Local(Arc<DashMap<String, WindowCounter>>),

    /// Multi-instance: shared Redis counters, so every gateway instance
    /// draws from the same budget.
    Redis(Pool),
}

impl CounterStore {
    pub fn new_local() -> Self {
        Self::Local(Arc::new(DashMap::new()))
    }

    pub fn new_redis(pool: Pool) -> Self {
        Self::Redis(pool)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: CounterStore,
    global: RatePolicy,
    strict: RatePolicy,
}

impl RateLimiter {
    pub fn new(store: CounterStore, cfg: &RateLimitConfig) -> Self {
        Self {
            store,
            global: cfg.global.into(),
            strict: cfg.strict.into(),
        }
    }

    /// Check the coarse budget every request draws from.
    pub async fn admit_global(&self, client: &str) -> Admission {
        self.admit("global", self.global, client).await
    }

    /// Check the stricter budget for sensitive endpoints.
    pub async fn admit_strict(&self, client: &str) -> Admission {
        self.admit("strict", self.strict, client).await
    }

    async fn admit(&self, tier: &str, policy: RatePolicy, client: &str) -> Admission {
        let key = format!("rl:{tier}:{client}");
        let admission = match &self.store {
            CounterStore::Local(map) => admit_local(map, &key, policy),
            CounterStore::Redis(pool) => admit_redis(pool, &key, policy).await,
        };
        if let Admission::Rejected { retry_after } = admission {
            debug!(tier = %tier, client = %client, retry_after, "rate budget exhausted");
        }
        admission
    }
}

fn admit_local(map: &DashMap<String, WindowCounter>, key: &str, policy: RatePolicy) -> Admission {
    // The entry lock makes check-and-increment atomic per key.
    let mut entry = map.entry(key.to_string()).or_insert_with(|| WindowCounter {
        count: 0,
        window_start: Instant::now(),
    });
    let elapsed = entry.window_start.elapsed();
    if elapsed >= policy.window {
        entry.count = 0;
        entry.window_start = Instant::now();
    }
    if entry.count < policy.limit {
        entry.count += 1;
        Admission::Allowed
    } else {
        let remaining = policy.window.saturating_sub(entry.window_start.elapsed());
        Admission::Rejected {
            retry_after: remaining.as_secs().max(1),
        }
    }
}

// The increment and its expiry run as one script: split across two commands,
// a crash between them leaves a counter without a TTL that rejects its client
// in every future window. Rejected requests hand their increment back, and a
// key found without a TTL gets one re-armed before the rejection is reported.
//
// KEYS[1] = counter key, ARGV[1] = window seconds, ARGV[2] = limit.
// Returns {admitted, retry_after_secs}.
const ADMIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
if count > tonumber(ARGV[2]) then
    redis.call('DECR', KEYS[1])
    local ttl = redis.call('TTL', KEYS[1])
    if ttl < 0 then
        redis.call('EXPIRE', KEYS[1], ARGV[1])
        ttl = tonumber(ARGV[1])
    end
    return {0, ttl}
end
return {1, 0}
"#;

async fn admit_redis(pool: &Pool, key: &str, policy: RatePolicy) -> Admission {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "counter store unreachable, admitting without a check");
            return Admission::Allowed;
        }
    };

    let result: redis::RedisResult<(i64, i64)> = redis::Script::new(ADMIT_SCRIPT)
        .key(key)
        .arg(policy.window.as_secs())
        .arg(policy.limit)
        .invoke_async(&mut conn)
        .await;
    match result {
        Ok((admitted, retry_after)) => script_admission(admitted, retry_after, policy),
        Err(e) => {
            warn!(key = %key, error = %e, "counter check failed, admitting without a check");
            Admission::Allowed
        }
    }
}

fn script_admission(admitted: i64, retry_after: i64, policy: RatePolicy) -> Admission {
    if admitted == 1 {
        return Admission::Allowed;
    }
    let retry_after = if retry_after > 0 {
        retry_after as u64
    } else {
        policy.window.as_secs()
    };
    Admission::Rejected {
        retry_after: retry_after.max(1),
    }
}
