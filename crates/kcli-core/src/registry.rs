//! Cluster registry: entry lifecycle, per-cluster probe loop, reconnect.
//!
//! Entries are mutated only by the probe loop or an explicit reconnect;
//! probe failures never take the process down.

use crate::cache::ResponseCache;
use crate::client::{ClientLimits, ClusterClient, ConnectionDescriptor};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterStatus {
    Unconfigured,
    Connecting,
    Ready,
    Degraded,
    Unreachable,
    Error,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Unconfigured => "Unconfigured",
            ClusterStatus::Connecting => "Connecting",
            ClusterStatus::Ready => "Ready",
            ClusterStatus::Degraded => "Degraded",
            ClusterStatus::Unreachable => "Unreachable",
            ClusterStatus::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreachable_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: String,
    pub name: String,
    pub descriptor: ConnectionDescriptor,
    pub status: ClusterStatus,
    pub last_transition: DateTime<Utc>,
    pub health: HealthSummary,
}

impl ClusterEntry {
    fn transition(&mut self, status: ClusterStatus) {
        if self.status != status {
            tracing::info!(
                target: "kcli::registry",
                cluster = %self.id,
                from = self.status.as_str(),
                to = status.as_str(),
                "cluster status transition"
            );
            self.status = status;
            self.last_transition = Utc::now();
        }
    }
}

/// Probe loop tuning. Degraded after `degraded_after` consecutive failures,
/// Unreachable after `unreachable_extra` more.
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub degraded_after: u32,
    pub unreachable_extra: u32,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            degraded_after: 3,
            unreachable_extra: 5,
        }
    }
}

pub struct ClusterHandle {
    entry: RwLock<ClusterEntry>,
    client: RwLock<Option<Arc<ClusterClient>>>,
    probe_task: RwLock<Option<JoinHandle<()>>>,
}

impl ClusterHandle {
    pub async fn entry(&self) -> ClusterEntry {
        self.entry.read().await.clone()
    }

    /// The live client, or a structured error naming the current status.
    pub async fn client(&self) -> Result<Arc<ClusterClient>> {
        match self.client.read().await.as_ref() {
            Some(c) => Ok(Arc::clone(c)),
            None => {
                let entry = self.entry.read().await;
                Err(Error::Unavailable(format!(
                    "cluster '{}' is {}",
                    entry.id,
                    entry.status.as_str()
                )))
            }
        }
    }

    pub async fn set_node_count(&self, count: u32) {
        self.entry.write().await.health.node_count = Some(count);
    }
}

pub struct ClusterRegistry {
    clusters: DashMap<String, Arc<ClusterHandle>>,
    limits: ClientLimits,
    probe: ProbePolicy,
    cache: Option<Arc<ResponseCache>>,
}

impl ClusterRegistry {
    pub fn new(limits: ClientLimits, probe: ProbePolicy) -> Self {
        Self {
            clusters: DashMap::new(),
            limits,
            probe,
            cache: None,
        }
    }

    /// Wire the response cache so deregistration flushes cluster-scoped entries.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Normalizes the descriptor, probes reachability with a bounded timeout
    /// and registers the entry. Client construction failure registers the
    /// entry in Error state rather than failing the call.
    pub async fn register(
        self: &Arc<Self>,
        name: Option<String>,
        descriptor: ConnectionDescriptor,
    ) -> Result<ClusterEntry> {
        let descriptor = descriptor.normalize();
        let id = uuid_like_id(&descriptor);
        if self.clusters.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("cluster '{id}'")));
        }
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| descriptor.display_name());

        let mut entry = ClusterEntry {
            id: id.clone(),
            name,
            descriptor: descriptor.clone(),
            status: ClusterStatus::Connecting,
            last_transition: Utc::now(),
            health: HealthSummary::default(),
        };

        let client = match ClusterClient::connect(&descriptor, self.limits).await {
            Ok(client) => match client.probe(self.probe.timeout).await {
                Ok(rtt) => {
                    entry.transition(ClusterStatus::Ready);
                    entry.health.rtt_ms = Some(rtt.as_millis() as u64);
                    Some(Arc::new(client))
                }
                Err(e) => {
                    entry.transition(ClusterStatus::Error);
                    entry.health.unreachable_reason = Some(e.to_string());
                    None
                }
            },
            Err(e) => {
                entry.transition(ClusterStatus::Error);
                entry.health.unreachable_reason = Some(e.to_string());
                None
            }
        };

        let handle = Arc::new(ClusterHandle {
            entry: RwLock::new(entry.clone()),
            client: RwLock::new(client),
            probe_task: RwLock::new(None),
        });
        self.clusters.insert(id.clone(), Arc::clone(&handle));
        self.spawn_probe_loop(&id, &handle).await;
        Ok(entry)
    }

    /// Closes the client, aborts the probe loop and flushes cluster caches.
    pub async fn deregister(&self, id: &str) -> Result<()> {
        let (_, handle) = self
            .clusters
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("cluster '{id}'")))?;
        if let Some(task) = handle.probe_task.write().await.take() {
            task.abort();
        }
        handle.client.write().await.take();
        if let Some(cache) = &self.cache {
            cache.invalidate_cluster(id);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<ClusterHandle>> {
        self.clusters
            .get(id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| Error::NotFound(format!("cluster '{id}'")))
    }

    pub async fn list(&self) -> Vec<ClusterEntry> {
        let mut entries = Vec::with_capacity(self.clusters.len());
        for handle in self.clusters.iter() {
            entries.push(handle.value().entry().await);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Resets the breaker and rebuilds the client from the stored descriptor.
    pub async fn reconnect(&self, id: &str) -> Result<ClusterEntry> {
        let handle = self.get(id)?;
        let descriptor = {
            let mut entry = handle.entry.write().await;
            entry.transition(ClusterStatus::Connecting);
            entry.descriptor.clone()
        };
        match ClusterClient::connect(&descriptor, self.limits).await {
            Ok(client) => {
                let rtt = client.probe(self.probe.timeout).await;
                let mut entry = handle.entry.write().await;
                match rtt {
                    Ok(rtt) => {
                        *handle.client.write().await = Some(Arc::new(client));
                        entry.transition(ClusterStatus::Ready);
                        entry.health.rtt_ms = Some(rtt.as_millis() as u64);
                        entry.health.unreachable_reason = None;
                    }
                    Err(e) => {
                        entry.transition(ClusterStatus::Error);
                        entry.health.unreachable_reason = Some(e.to_string());
                    }
                }
                Ok(entry.clone())
            }
            Err(e) => {
                let mut entry = handle.entry.write().await;
                entry.transition(ClusterStatus::Error);
                entry.health.unreachable_reason = Some(e.to_string());
                Ok(entry.clone())
            }
        }
    }

    async fn spawn_probe_loop(self: &Arc<Self>, id: &str, handle: &Arc<ClusterHandle>) {
        let id = id.to_string();
        let handle_weak = Arc::downgrade(handle);
        let policy = self.probe;
        let task = tokio::spawn(async move {
            let mut failures = 0u32;
            let mut interval = tokio::time::interval(policy.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it, registration already probed.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(handle) = handle_weak.upgrade() else {
                    return;
                };
                let client = { handle.client.read().await.as_ref().map(Arc::clone) };
                let Some(client) = client else {
                    continue;
                };
                match client.probe(policy.timeout).await {
                    Ok(rtt) => {
                        failures = 0;
                        client.breaker().record_success();
                        let mut entry = handle.entry.write().await;
                        entry.transition(ClusterStatus::Ready);
                        entry.health.rtt_ms = Some(rtt.as_millis() as u64);
                        entry.health.unreachable_reason = None;
                    }
                    Err(e) => {
                        failures += 1;
                        client.breaker().record_failure();
                        let mut entry = handle.entry.write().await;
                        entry.health.unreachable_reason = Some(e.to_string());
                        if failures >= policy.degraded_after + policy.unreachable_extra {
                            entry.transition(ClusterStatus::Unreachable);
                        } else if failures >= policy.degraded_after {
                            entry.transition(ClusterStatus::Degraded);
                        }
                        tracing::warn!(
                            target: "kcli::registry",
                            cluster = %id,
                            failures,
                            error = %e,
                            "probe failed"
                        );
                    }
                }
            }
        });
        *handle.probe_task.write().await = Some(task);
    }
}

/// Deterministic id from the descriptor so re-registering the same target is
/// detected as AlreadyExists.
fn uuid_like_id(descriptor: &ConnectionDescriptor) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(descriptor.display_name().as_bytes());
    if let Some(path) = &descriptor.kubeconfig {
        hasher.update(path.to_string_lossy().as_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("{}-{}", descriptor.display_name(), hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic_per_descriptor() {
        let a = ConnectionDescriptor {
            context: Some("prod".into()),
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(uuid_like_id(&a), uuid_like_id(&b));
        let c = ConnectionDescriptor {
            context: Some("staging".into()),
            ..Default::default()
        };
        assert_ne!(uuid_like_id(&a), uuid_like_id(&c));
        assert!(uuid_like_id(&a).starts_with("prod-"));
    }

    #[tokio::test]
    async fn register_against_unreachable_target_yields_error_entry() {
        let registry = Arc::new(ClusterRegistry::new(
            ClientLimits {
                connect_timeout: Duration::from_millis(400),
                ..Default::default()
            },
            ProbePolicy::default(),
        ));
        let descriptor = ConnectionDescriptor {
            kubeconfig: Some(std::path::PathBuf::from("/nonexistent/kubeconfig")),
            context: Some("nowhere".into()),
            in_cluster: false,
        };
        let entry = registry.register(None, descriptor).await.unwrap();
        assert_eq!(entry.status, ClusterStatus::Error);
        assert!(entry.health.unreachable_reason.is_some());
        // The entry is listed and the client is absent.
        assert_eq!(registry.list().await.len(), 1);
        let handle = registry.get(&entry.id).unwrap();
        assert!(handle.client().await.is_err());
        registry.deregister(&entry.id).await.unwrap();
        assert!(registry.get(&entry.id).is_err());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = Arc::new(ClusterRegistry::new(
            ClientLimits {
                connect_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            ProbePolicy::default(),
        ));
        let descriptor = ConnectionDescriptor {
            kubeconfig: Some(std::path::PathBuf::from("/nonexistent/kubeconfig")),
            context: Some("dup".into()),
            in_cluster: false,
        };
        registry.register(None, descriptor.clone()).await.unwrap();
        assert!(matches!(
            registry.register(None, descriptor).await,
            Err(Error::AlreadyExists(_))
        ));
    }
}
