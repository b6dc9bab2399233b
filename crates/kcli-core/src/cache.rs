//! Fingerprinted response cache for list/topology/overview shapes.
//!
//! Concurrent misses on one key coalesce onto a single in-flight build
//! (single-flight), so a stampede costs exactly one upstream fetch. The event
//! hub invalidates by (cluster, namespace-or-wildcard, kind-or-wildcard).

use crate::error::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheShape {
    List,
    Topology,
    Overview,
}

impl CacheShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheShape::List => "list",
            CacheShape::Topology => "topology",
            CacheShape::Overview => "overview",
        }
    }
}

/// Cache key: (cluster, scope, filters, shape). Namespace `None` and an empty
/// kind list are wildcards for invalidation purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cluster: String,
    pub namespace: Option<String>,
    pub kinds: Vec<String>,
    pub filters: String,
    pub shape: CacheShape,
}

impl CacheKey {
    fn composite(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.shape.as_str(),
            self.cluster,
            self.namespace.as_deref().unwrap_or("*"),
            self.kinds.join(","),
            self.filters
        )
    }
}

#[derive(Debug, Clone)]
pub struct CachedValue {
    pub body: serde_json::Value,
    /// SHA-256 hex of the serialized body; doubles as the HTTP ETag.
    pub fingerprint: String,
}

struct Entry {
    key: CacheKey,
    value: Arc<CachedValue>,
    expires_at: Instant,
    last_used: AtomicU64,
}

type InflightResult = Result<Arc<CachedValue>>;

pub struct ResponseCache {
    entries: DashMap<String, Entry>,
    inflight: Mutex<HashMap<String, watch::Receiver<Option<InflightResult>>>>,
    max_entries: usize,
    max_ttl: Duration,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, max_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            max_ttl,
            epoch: Instant::now(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CachedValue>> {
        let k = key.composite();
        let now = Instant::now();
        let mut expired = false;
        let hit = match self.entries.get(&k) {
            Some(entry) if entry.expires_at > now => {
                entry
                    .last_used
                    .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
                Some(Arc::clone(&entry.value))
            }
            Some(_) => {
                expired = true;
                None
            }
            None => None,
        };
        if expired {
            self.entries.remove(&k);
        }
        match &hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    pub fn store(&self, key: &CacheKey, body: serde_json::Value, ttl: Duration) -> Arc<CachedValue> {
        let ttl = ttl.min(self.max_ttl);
        let serialized = body.to_string();
        let fingerprint = hex_digest(serialized.as_bytes());
        let value = Arc::new(CachedValue { body, fingerprint });
        if self.entries.len() >= self.max_entries {
            self.evict_one();
        }
        self.entries.insert(
            key.composite(),
            Entry {
                key: key.clone(),
                value: Arc::clone(&value),
                expires_at: Instant::now() + ttl,
                last_used: AtomicU64::new(self.epoch.elapsed().as_millis() as u64),
            },
        );
        value
    }

    /// Approximate LRU: removes the least-recently-used entry, preferring
    /// anything already expired.
    fn evict_one(&self) {
        let now = Instant::now();
        let mut victim: Option<(String, u64)> = None;
        for entry in self.entries.iter() {
            if entry.expires_at <= now {
                victim = Some((entry.key().clone(), 0));
                break;
            }
            let used = entry.last_used.load(Ordering::Relaxed);
            if victim.as_ref().map(|(_, v)| used < *v).unwrap_or(true) {
                victim = Some((entry.key().clone(), used));
            }
        }
        if let Some((k, _)) = victim {
            self.entries.remove(&k);
        }
    }

    /// Returns a cached value or builds one, coalescing concurrent misses on
    /// the same key into a single `build` call.
    pub async fn get_or_build<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        build: F,
    ) -> InflightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        if let Some(hit) = self.lookup(key) {
            return Ok(hit);
        }
        let k = key.composite();

        enum Role {
            Leader(watch::Sender<Option<InflightResult>>),
            Waiter(watch::Receiver<Option<InflightResult>>),
        }

        let role = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&k) {
                Some(rx) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(k.clone(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let outcome: InflightResult = match build().await {
                    Ok(body) => Ok(self.store(key, body, ttl)),
                    Err(e) => Err(e),
                };
                self.inflight.lock().unwrap().remove(&k);
                let _ = tx.send(Some(outcome.clone()));
                outcome
            }
            Role::Waiter(mut rx) => {
                loop {
                    let current = rx.borrow().clone();
                    if let Some(outcome) = current {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        // Leader vanished without publishing; fall back to a
                        // fresh lookup so the caller can retry cleanly.
                        return self.lookup(key).ok_or_else(|| {
                            Error::Transient("cache build abandoned".into())
                        });
                    }
                }
            }
        }
    }

    /// Drops every entry whose scope covers the event's (cluster, namespace,
    /// kind).
    pub fn invalidate(&self, cluster: &str, namespace: Option<&str>, kind: &str) {
        self.entries.retain(|_, entry| {
            let key = &entry.key;
            if key.cluster != cluster {
                return true;
            }
            let ns_match = match (&key.namespace, namespace) {
                (None, _) => true,
                (Some(_), None) => true,
                (Some(kns), Some(ens)) => kns == ens,
            };
            let kind_match =
                key.kinds.is_empty() || key.kinds.iter().any(|k| k.eq_ignore_ascii_case(kind));
            !(ns_match && kind_match)
        });
    }

    pub fn invalidate_cluster(&self, cluster: &str) {
        self.entries.retain(|_, entry| entry.key.cluster != cluster);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn key(cluster: &str, ns: Option<&str>, kinds: &[&str]) -> CacheKey {
        CacheKey {
            cluster: cluster.into(),
            namespace: ns.map(Into::into),
            kinds: kinds.iter().map(|s| s.to_string()).collect(),
            filters: String::new(),
            shape: CacheShape::List,
        }
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_misses() {
        let cache = Arc::new(ResponseCache::new(16, Duration::from_secs(60)));
        let builds = Arc::new(AtomicU32::new(0));
        let k = key("prod", Some("payments"), &["Pod"]);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let builds = Arc::clone(&builds);
            let k = k.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_build(&k, Duration::from_secs(30), || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(serde_json::json!({"items": []}))
                    })
                    .await
                    .unwrap()
            }));
        }
        let mut fingerprints = Vec::new();
        for t in tasks {
            fingerprints.push(t.await.unwrap().fingerprint.clone());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn invalidation_respects_scope() {
        let cache = ResponseCache::new(16, Duration::from_secs(60));
        let pods_payments = key("prod", Some("payments"), &["Pod"]);
        let pods_billing = key("prod", Some("billing"), &["Pod"]);
        let all_cluster = key("prod", None, &[]);
        let other_cluster = key("staging", Some("payments"), &["Pod"]);
        for k in [&pods_payments, &pods_billing, &all_cluster, &other_cluster] {
            cache.store(k, serde_json::json!(1), Duration::from_secs(30));
        }

        cache.invalidate("prod", Some("payments"), "Pod");
        assert!(cache.lookup(&pods_payments).is_none());
        assert!(cache.lookup(&pods_billing).is_some());
        // Wildcard entry covers every namespace/kind, so it goes too.
        assert!(cache.lookup(&all_cluster).is_none());
        assert!(cache.lookup(&other_cluster).is_some());
    }

    #[tokio::test]
    async fn lookup_is_empty_after_invalidation_until_next_store() {
        let cache = ResponseCache::new(16, Duration::from_secs(60));
        let k = key("prod", Some("payments"), &["Pod"]);
        cache.store(&k, serde_json::json!({"rv": 1}), Duration::from_secs(30));
        assert!(cache.lookup(&k).is_some());
        cache.invalidate("prod", Some("payments"), "Pod");
        assert!(cache.lookup(&k).is_none());
        cache.store(&k, serde_json::json!({"rv": 2}), Duration::from_secs(30));
        assert!(cache.lookup(&k).is_some());
    }

    #[tokio::test]
    async fn ttl_is_capped_and_expires() {
        let cache = ResponseCache::new(16, Duration::from_millis(20));
        let k = key("prod", None, &[]);
        cache.store(&k, serde_json::json!(1), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.lookup(&k).is_none());
    }

    #[tokio::test]
    async fn bounded_size_evicts_lru() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        let a = key("prod", Some("a"), &["Pod"]);
        let b = key("prod", Some("b"), &["Pod"]);
        let c = key("prod", Some("c"), &["Pod"]);
        cache.store(&a, serde_json::json!(1), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.store(&b, serde_json::json!(2), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.lookup(&a);
        cache.store(&c, serde_json::json!(3), Duration::from_secs(30));
        assert!(cache.len() <= 2);
        // `b` was the least recently used.
        assert!(cache.lookup(&b).is_none());
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let cache = ResponseCache::new(16, Duration::from_secs(60));
        let k = key("prod", None, &[]);
        let out = cache
            .get_or_build(&k, Duration::from_secs(30), || async {
                Err(Error::Transient("apiserver 503".into()))
            })
            .await;
        assert!(out.is_err());
        let out = cache
            .get_or_build(&k, Duration::from_secs(30), || async {
                Ok(serde_json::json!("ok"))
            })
            .await;
        assert!(out.is_ok());
    }
}
