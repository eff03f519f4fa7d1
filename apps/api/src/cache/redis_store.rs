use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use super::{CacheBackend, CacheKey, CacheStats, ResultCache, KEY_PREFIX};
use crate::models::optimization::OptimizationResult;
use crate::models::profile::{SubjectId, TargetId};

const SCAN_COUNT: usize = 500;

/// Durable backend. TTL is store-native (`SET ... EX`).
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
    ttl_secs: u64,
}

impl RedisCache {
    /// Opens a multiplexed connection and verifies it with PING.
    pub async fn connect(redis_url: &str, ttl: Duration) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis cache PING → {pong}");

        Ok(Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    async fn keys_for_pair(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
    ) -> redis::RedisResult<Vec<String>> {
        let base = CacheKey::new(subject_id, target_id, None);
        let mut keys = self.scan_keys(&format!("{base}:*")).await?;
        keys.push(base.to_string());
        Ok(keys)
    }

    /// Incremental SCAN over `pattern`; never blocks the server like KEYS.
    async fn scan_keys(&self, pattern: &str) -> redis::RedisResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
        version: Option<&str>,
    ) -> Option<OptimizationResult> {
        let key = CacheKey::new(subject_id, target_id, version);
        let mut conn = self.conn.clone();

        let raw: Option<String> = match redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut conn)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Redis cache GET {key} failed, treating as miss: {e}");
                return None;
            }
        };

        match serde_json::from_str(&raw?) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Redis cache entry {key} is not a valid result, treating as miss: {e}");
                None
            }
        }
    }

    async fn set(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
        payload: &OptimizationResult,
        version: Option<&str>,
    ) {
        let key = CacheKey::new(subject_id, target_id, version);
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not serialize result for {key}: {e}");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(body)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!("Redis cache SET {key} failed: {e}");
        }
    }

    async fn invalidate(&self, subject_id: SubjectId, target_id: TargetId) {
        let keys = match self.keys_for_pair(subject_id, target_id).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Redis cache invalidate scan for {subject_id}/{target_id} failed: {e}");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("DEL")
            .arg(&keys)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(n) => debug!("Invalidated {n} cache entries for {subject_id}/{target_id}"),
            Err(e) => warn!("Redis cache DEL for {subject_id}/{target_id} failed: {e}"),
        }
    }

    async fn stats(&self) -> CacheStats {
        let active_entries = match self.scan_keys(&format!("{KEY_PREFIX}:*")).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                warn!("Redis cache stats failed: {e}");
                0
            }
        };

        CacheStats {
            active_entries,
            backend: CacheBackend::Redis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::optimization::tests::sample_result;

    /// Runs only when `REDIS_URL` points at a live server.
    async fn live_cache() -> Option<RedisCache> {
        let url = std::env::var("REDIS_URL").ok()?;
        RedisCache::connect(&url, Duration::from_secs(60)).await.ok()
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        let result = RedisCache::connect("redis://127.0.0.1:1/0", Duration::from_secs(60)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_finds_every_version_by_scan() {
        let Some(cache) = live_cache().await else {
            return;
        };
        let subject = (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as i64;
        let payload = sample_result(subject, 7);

        for version in [None, Some("v1"), Some("v2")] {
            cache.set(subject, 7, &payload, version).await;
        }
        cache.set(subject, 70, &payload, None).await;

        let versioned = cache.scan_keys(&format!("opt:{subject}:7:*")).await.unwrap();
        assert_eq!(versioned.len(), 2);
        assert!(cache.stats().await.active_entries >= 4);

        cache.invalidate(subject, 7).await;
        for version in [None, Some("v1"), Some("v2")] {
            assert!(cache.get(subject, 7, version).await.is_none());
        }
        assert!(cache.get(subject, 70, None).await.is_some());
        cache.invalidate(subject, 70).await;
    }
}
