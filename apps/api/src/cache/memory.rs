use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CacheBackend, CacheKey, CacheStats, ResultCache};
use crate::models::optimization::OptimizationResult;
use crate::models::profile::{SubjectId, TargetId};

struct CacheEntry {
    payload: OptimizationResult,
    inserted_at: Instant,
}

/// In-process fallback. Expiry is lazy: an expired entry found on read is
/// removed and reported as absent; `stats` sweeps the rest.
pub struct InMemoryCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl InMemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) >= self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        // A poisoned map still holds valid entries; keep serving.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl ResultCache for InMemoryCache {
    async fn get(
        &self,
        subject_id: SubjectId,
        target_id: TargetId,
        version: Option<&str>,
    ) -> Option<OptimizationResult> {
        let key = CacheKey::new(subject_id, target_id, version);
        let now = Instant::now();
        let mut entries = self.lock();

        match entries.get(&key) {
            Some(entry) if self.is_expired(entry, now) => {
                entries.remove(&key);
                None
            }
            Some(entry) => Some(entry.payload.clone()),
            None => None,
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
        self.lock().insert(
            key,
            CacheEntry {
                payload: payload.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    async fn invalidate(&self, subject_id: SubjectId, target_id: TargetId) {
        self.lock()
            .retain(|key, _| !key.belongs_to(subject_id, target_id));
    }

    async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        CacheStats {
            active_entries: entries.len(),
            backend: CacheBackend::Memory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::optimization::tests::sample_result;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_set_then_get_round_trips_payload() {
        let cache = InMemoryCache::new(TTL);
        let payload = sample_result(1, 2);
        cache.set(1, 2, &payload, Some("v1")).await;

        assert_eq!(cache.get(1, 2, Some("v1")).await, Some(payload));
    }

    #[tokio::test]
    async fn test_changed_version_misses() {
        let cache = InMemoryCache::new(TTL);
        cache.set(1, 2, &sample_result(1, 2), Some("v1")).await;

        assert!(cache.get(1, 2, Some("v2")).await.is_none());
        assert!(cache.get(1, 2, None).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_removed() {
        let cache = InMemoryCache::new(TTL);
        cache.set(1, 2, &sample_result(1, 2), None).await;

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(cache.get(1, 2, None).await.is_none());
        assert_eq!(cache.lock().len(), 0, "expired entry should be swept on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_alive_just_before_ttl() {
        let cache = InMemoryCache::new(TTL);
        cache.set(1, 2, &sample_result(1, 2), None).await;

        tokio::time::advance(TTL - Duration::from_secs(1)).await;

        assert!(cache.get(1, 2, None).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_removes_all_versions_of_pair_only() {
        let cache = InMemoryCache::new(TTL);
        cache.set(1, 2, &sample_result(1, 2), None).await;
        cache.set(1, 2, &sample_result(1, 2), Some("v1")).await;
        cache.set(1, 2, &sample_result(1, 2), Some("v2")).await;
        cache.set(1, 23, &sample_result(1, 23), None).await;

        cache.invalidate(1, 2).await;

        assert!(cache.get(1, 2, None).await.is_none());
        assert!(cache.get(1, 2, Some("v1")).await.is_none());
        assert!(cache.get(1, 2, Some("v2")).await.is_none());
        assert!(cache.get(1, 23, None).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_counts_only_live_entries() {
        let cache = InMemoryCache::new(TTL);
        cache.set(1, 1, &sample_result(1, 1), None).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        cache.set(2, 1, &sample_result(2, 1), None).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let stats = cache.stats().await;
        assert_eq!(stats.active_entries, 1);
        assert_eq!(stats.backend, CacheBackend::Memory);
    }
}
