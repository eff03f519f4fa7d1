//! Result Cache: (subject, target, version) → previously computed optimization.
//!
//! One `ResultCache` trait, two backends. `connect_cache` picks the backend
//! once at startup: Redis when it answers PING, otherwise the in-process map.
//! The choice is logged and never revisited per call.
//!
//! Cache errors never surface to callers. A failed read is a miss, a failed
//! write is logged and dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::optimization::OptimizationResult;
use crate::models::profile::{SubjectId, TargetId};

pub mod handlers;
pub mod memory;
pub mod redis_store;

pub use self::memory::InMemoryCache;
pub use self::redis_store::RedisCache;

pub const KEY_PREFIX: &str = "opt";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deterministic cache key. A pure function of its inputs: no clock, no randomness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(subject_id: SubjectId, target_id: TargetId, version: Option<&str>) -> Self {
        let base = pair_prefix(subject_id, target_id);
        match version.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => CacheKey(format!("{base}:{v}")),
            None => CacheKey(base),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this key was derived from the given pair, whatever the version.
    pub fn belongs_to(&self, subject_id: SubjectId, target_id: TargetId) -> bool {
        let base = pair_prefix(subject_id, target_id);
        self.0 == base
            || self
                .0
                .strip_prefix(&base)
                .is_some_and(|rest| rest.starts_with(':'))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn pair_prefix(subject_id: SubjectId, target_id: TargetId) -> String {
    format!("{KEY_PREFIX}:{subject_id}:{target_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub active_entries: usize,
    pub backend: CacheBackend,
}

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
        version: Option<&str>,
    ) -> Option<OptimizationResult>;

    async fn set(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
        payload: &OptimizationResult,
        version: Option<&str>,
    );

    /// Removes every entry derived from the pair, regardless of version.
    async fn invalidate(&self, subject_id: SubjectId, target_id: TargetId);

    async fn stats(&self) -> CacheStats;
}

/// Selects the cache backend. Called once at startup.
pub async fn connect_cache(redis_url: &str, ttl: Duration) -> Arc<dyn ResultCache> {
    match tokio::time::timeout(CONNECT_TIMEOUT, RedisCache::connect(redis_url, ttl)).await {
        Ok(Ok(cache)) => {
            info!("Result cache backend: redis ({redis_url})");
            Arc::new(cache)
        }
        Ok(Err(e)) => {
            warn!("Redis unavailable ({e}); result cache falling back to in-process map");
            Arc::new(InMemoryCache::new(ttl))
        }
        Err(_) => {
            warn!(
                "Redis connect timed out after {}s; result cache falling back to in-process map",
                CONNECT_TIMEOUT.as_secs()
            );
            Arc::new(InMemoryCache::new(ttl))
        }
    }
}
