//! Watch fan-in and subscriber fan-out.
//!
//! One watcher task per (cluster, kind) feeds every incoming delta to the
//! cache invalidator and to each matching subscriber. Delivery never blocks:
//! each session owns a bounded queue; overflow drops the oldest frame, bumps
//! the lag counter and flags the session for resync so it can refetch scope
//! and resume.

use crate::cache::ResponseCache;
use crate::client::ClusterClient;
use crate::kinds::ResourceKind;
use dashmap::DashMap;
use futures_util::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOp {
    Added,
    Modified,
    Deleted,
}

/// One resource change, shaped for the wire (`{kind, op, object, rv}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchDelta {
    pub cluster: String,
    pub kind: String,
    pub op: DeltaOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rv: Option<String>,
    pub object: serde_json::Value,
}

/// Frames a subscriber receives. `Resync` tells it the queue overflowed and
/// it must refetch its scope before trusting further deltas.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum HubFrame {
    Delta(WatchDelta),
    Resync { lagged: u64 },
    Closed { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct SubscriberFilter {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    /// Empty means every kind.
    pub kinds: Vec<String>,
}

impl SubscriberFilter {
    fn matches(&self, delta: &WatchDelta) -> bool {
        if let Some(cluster) = &self.cluster {
            if cluster != &delta.cluster {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if delta.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        self.kinds.is_empty()
            || self
                .kinds
                .iter()
                .any(|k| k.eq_ignore_ascii_case(&delta.kind))
    }
}

pub struct SubscriberSession {
    id: u64,
    filter: SubscriberFilter,
    capacity: usize,
    queue: Mutex<VecDeque<HubFrame>>,
    notify: Notify,
    lag: AtomicU64,
    resync: AtomicBool,
    closed: AtomicBool,
    close_reason: Mutex<String>,
}

impl SubscriberSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lag(&self) -> u64 {
        self.lag.load(Ordering::Relaxed)
    }

    pub fn needs_resync(&self) -> bool {
        self.resync.load(Ordering::Relaxed)
    }

    /// Non-blocking enqueue with drop-oldest overflow.
    fn deliver(&self, frame: HubFrame) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.lag.fetch_add(1, Ordering::Relaxed);
                self.resync.store(true, Ordering::Relaxed);
            }
            queue.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Next frame, or `None` once the session is closed and drained. A pending
    /// resync flag is surfaced before any queued delta.
    pub async fn next(&self) -> Option<HubFrame> {
        loop {
            if self.resync.swap(false, Ordering::Relaxed) {
                return Some(HubFrame::Resync {
                    lagged: self.lag.load(Ordering::Relaxed),
                });
            }
            if let Some(frame) = self.queue.lock().unwrap().pop_front() {
                return Some(frame);
            }
            if self.closed.load(Ordering::Relaxed) {
                let reason = self.close_reason.lock().unwrap().clone();
                if reason.is_empty() {
                    return None;
                }
                *self.close_reason.lock().unwrap() = String::new();
                return Some(HubFrame::Closed { reason });
            }
            self.notify.notified().await;
        }
    }

    fn close(&self, reason: &str) {
        *self.close_reason.lock().unwrap() = reason.to_string();
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

pub struct StreamHub {
    cache: Arc<ResponseCache>,
    subscribers: DashMap<u64, Arc<SubscriberSession>>,
    watch_tasks: DashMap<String, Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    default_capacity: usize,
}

impl StreamHub {
    pub fn new(cache: Arc<ResponseCache>, default_capacity: usize) -> Self {
        Self {
            cache,
            subscribers: DashMap::new(),
            watch_tasks: DashMap::new(),
            next_id: AtomicU64::new(1),
            default_capacity: default_capacity.max(1),
        }
    }

    pub fn subscribe(&self, filter: SubscriberFilter) -> Arc<SubscriberSession> {
        self.subscribe_with_capacity(filter, self.default_capacity)
    }

    pub fn subscribe_with_capacity(
        &self,
        filter: SubscriberFilter,
        capacity: usize,
    ) -> Arc<SubscriberSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(SubscriberSession {
            id,
            filter,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            lag: AtomicU64::new(0),
            resync: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(String::new()),
        });
        self.subscribers.insert(id, Arc::clone(&session));
        session
    }

    /// Closes one session and releases its queue.
    pub fn unsubscribe(&self, id: u64) {
        if let Some((_, session)) = self.subscribers.remove(&id) {
            session.close("unsubscribed");
            session.queue.lock().unwrap().clear();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total frames dropped across live sessions, for the watch-lag gauge.
    pub fn total_lag(&self) -> u64 {
        self.subscribers.iter().map(|s| s.lag()).sum()
    }

    /// Fans one delta out to the invalidator and every matching subscriber.
    pub fn publish(&self, delta: WatchDelta) {
        self.cache
            .invalidate(&delta.cluster, delta.namespace.as_deref(), &delta.kind);
        for session in self.subscribers.iter() {
            if session.filter.matches(&delta) {
                session.deliver(HubFrame::Delta(delta.clone()));
            }
        }
    }

    /// Starts the watcher tasks for a cluster. The kube watcher reopens the
    /// upstream watch with backoff on failure, so the subscriber set is
    /// untouched by apiserver hiccups.
    pub fn start_cluster(self: &Arc<Self>, cluster_id: &str, client: &Arc<ClusterClient>) {
        self.start_cluster_kinds(cluster_id, client, ResourceKind::WATCHED)
    }

    pub fn start_cluster_kinds(
        self: &Arc<Self>,
        cluster_id: &str,
        client: &Arc<ClusterClient>,
        kinds: &[ResourceKind],
    ) {
        let mut tasks = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let hub = Arc::clone(self);
            let cluster = cluster_id.to_string();
            let kind = *kind;
            let ar = ClusterClient::static_resource(kind);
            let api: Api<DynamicObject> = Api::all_with(client.kube(), &ar);
            tasks.push(tokio::spawn(async move {
                let stream = watcher(api, watcher::Config::default()).default_backoff();
                let mut stream = std::pin::pin!(stream);
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(watcher::Event::Apply(obj)) => {
                            hub.publish(delta_from(&cluster, kind, DeltaOp::Modified, &obj));
                        }
                        Ok(watcher::Event::InitApply(obj)) => {
                            hub.publish(delta_from(&cluster, kind, DeltaOp::Added, &obj));
                        }
                        Ok(watcher::Event::Delete(obj)) => {
                            hub.publish(delta_from(&cluster, kind, DeltaOp::Deleted, &obj));
                        }
                        Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {}
                        Err(e) => {
                            tracing::warn!(
                                target: "kcli::hub",
                                cluster = %cluster,
                                kind = %kind,
                                error = %e,
                                "watch error; stream will reopen with backoff"
                            );
                        }
                    }
                }
            }));
        }
        self.watch_tasks.insert(cluster_id.to_string(), tasks);
    }

    pub fn stop_cluster(&self, cluster_id: &str) {
        if let Some((_, tasks)) = self.watch_tasks.remove(cluster_id) {
            for task in tasks {
                task.abort();
            }
        }
    }

    /// Graceful shutdown: stop watchers, close every session with a reason.
    pub fn shutdown(&self, reason: &str) {
        let clusters: Vec<String> = self.watch_tasks.iter().map(|e| e.key().clone()).collect();
        for cluster in clusters {
            self.stop_cluster(&cluster);
        }
        for session in self.subscribers.iter() {
            session.close(reason);
        }
        self.subscribers.clear();
    }
}

fn delta_from(cluster: &str, kind: ResourceKind, op: DeltaOp, obj: &DynamicObject) -> WatchDelta {
    WatchDelta {
        cluster: cluster.to_string(),
        kind: kind.as_str().to_string(),
        op,
        namespace: obj.metadata.namespace.clone(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        rv: obj.metadata.resource_version.clone(),
        object: serde_json::to_value(obj).unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn delta(cluster: &str, ns: Option<&str>, kind: &str, name: &str) -> WatchDelta {
        WatchDelta {
            cluster: cluster.into(),
            kind: kind.into(),
            op: DeltaOp::Modified,
            namespace: ns.map(Into::into),
            name: name.into(),
            rv: Some("1".into()),
            object: serde_json::Value::Null,
        }
    }

    fn hub(capacity: usize) -> Arc<StreamHub> {
        let cache = Arc::new(ResponseCache::new(8, Duration::from_secs(60)));
        Arc::new(StreamHub::new(cache, capacity))
    }

    #[tokio::test]
    async fn filter_scopes_delivery() {
        let hub = hub(8);
        let payments = hub.subscribe(SubscriberFilter {
            cluster: Some("prod".into()),
            namespace: Some("payments".into()),
            kinds: vec!["Pod".into()],
        });
        let everything = hub.subscribe(SubscriberFilter::default());

        hub.publish(delta("prod", Some("billing"), "Pod", "api-1"));
        hub.publish(delta("prod", Some("payments"), "Service", "api"));
        hub.publish(delta("prod", Some("payments"), "Pod", "api-2"));

        match payments.next().await.unwrap() {
            HubFrame::Delta(d) => assert_eq!(d.name, "api-2"),
            other => panic!("unexpected frame {other:?}"),
        }
        // The unfiltered session saw all three.
        for _ in 0..3 {
            assert!(matches!(
                everything.next().await.unwrap(),
                HubFrame::Delta(_)
            ));
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_resyncs() {
        let hub = hub(8);
        let slow = hub.subscribe_with_capacity(SubscriberFilter::default(), 2);
        let fast = hub.subscribe(SubscriberFilter::default());

        for i in 0..5 {
            hub.publish(delta("prod", Some("ns"), "Pod", &format!("pod-{i}")));
        }

        // The fast subscriber still gets frames promptly (isolation).
        assert!(matches!(fast.next().await.unwrap(), HubFrame::Delta(_)));

        // The slow one is told to resync first, then sees only the newest two.
        match slow.next().await.unwrap() {
            HubFrame::Resync { lagged } => assert_eq!(lagged, 3),
            other => panic!("expected resync, got {other:?}"),
        }
        match slow.next().await.unwrap() {
            HubFrame::Delta(d) => assert_eq!(d.name, "pod-3"),
            other => panic!("unexpected frame {other:?}"),
        }
        match slow.next().await.unwrap() {
            HubFrame::Delta(d) => assert_eq!(d.name, "pod-4"),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(slow.needs_resync() == false);
        assert_eq!(slow.lag(), 3);
    }

    #[tokio::test]
    async fn publish_invalidates_matching_cache_entries() {
        let cache = Arc::new(ResponseCache::new(8, Duration::from_secs(60)));
        let hub = Arc::new(StreamHub::new(Arc::clone(&cache), 8));
        let key = crate::cache::CacheKey {
            cluster: "prod".into(),
            namespace: Some("payments".into()),
            kinds: vec!["Pod".into()],
            filters: String::new(),
            shape: crate::cache::CacheShape::List,
        };
        cache.store(&key, serde_json::json!(1), Duration::from_secs(30));
        hub.publish(delta("prod", Some("payments"), "Pod", "api-1"));
        assert!(cache.lookup(&key).is_none());
    }

    #[tokio::test]
    async fn unsubscribe_releases_queue_and_ends_stream() {
        let hub = hub(8);
        let session = hub.subscribe(SubscriberFilter::default());
        hub.publish(delta("prod", None, "Node", "n1"));
        hub.unsubscribe(session.id());
        assert_eq!(hub.subscriber_count(), 0);
        // Queue was drained on close; the closed frame (or end) follows.
        match session.next().await {
            Some(HubFrame::Closed { reason }) => assert_eq!(reason, "unsubscribed"),
            None => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_notifies_all_sessions() {
        let hub = hub(8);
        let a = hub.subscribe(SubscriberFilter::default());
        let b = hub.subscribe(SubscriberFilter::default());
        hub.shutdown("draining");
        for s in [a, b] {
            match s.next().await {
                Some(HubFrame::Closed { reason }) => assert_eq!(reason, "draining"),
                None => {}
                other => panic!("unexpected {other:?}"),
            }
        }
    }
}
