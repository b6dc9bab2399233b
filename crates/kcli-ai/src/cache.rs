//! Deterministic response cache: mutex-guarded, bounded with approximate LRU
//! eviction at insert, plus a background sweeper that clears expired entries
//! at a fixed cadence.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Deterministic key over (provider, action, target).
pub fn cache_key(provider: &str, action: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(action.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(target.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
    last_used: Instant,
}

pub struct AnalysisCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl AnalysisCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            ttl,
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Spawns the expiry sweeper. Idempotent; a second call is a no-op.
    pub fn start_sweeper(self: &Arc<Self>, cadence: Duration) {
        let mut slot = self.sweeper.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let cache = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else { return };
                if cache.closed.load(Ordering::Relaxed) {
                    return;
                }
                cache.sweep_expired();
            }
        }));
    }

    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, e| e.expires_at > now);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: &str, value: &str) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            // Approximate LRU: evict the stalest entry.
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        let now = Instant::now();
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: now + self.ttl,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the sweeper. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.sweeper.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl Drop for AnalysisCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_and_distinct() {
        assert_eq!(
            cache_key("openai", "why", "pod/api"),
            cache_key("openai", "why", "pod/api")
        );
        assert_ne!(
            cache_key("openai", "why", "pod/api"),
            cache_key("openai", "explain", "pod/api")
        );
        assert_ne!(
            cache_key("openai", "why", "pod/api"),
            cache_key("anthropic", "why", "pod/api")
        );
    }

    #[tokio::test]
    async fn put_get_round_trip_with_ttl() {
        let cache = AnalysisCache::new(8, Duration::from_millis(30));
        cache.put("k", "answer");
        assert_eq!(cache.get("k").as_deref(), Some("answer"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn bounded_with_lru_eviction() {
        let cache = AnalysisCache::new(2, Duration::from_secs(60));
        cache.put("a", "1");
        cache.put("b", "2");
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get("a");
        cache.put("c", "3");
        assert!(cache.len() <= 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
    }

    #[tokio::test]
    async fn sweeper_removes_expired_and_close_is_idempotent() {
        let cache = AnalysisCache::new(8, Duration::from_millis(10));
        cache.put("k", "v");
        cache.start_sweeper(Duration::from_millis(20));
        cache.start_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_empty());
        cache.close();
        cache.close();
    }
}
