//! Per-cluster client: typed + dynamic API handles, discovery cache,
//! outbound rate limiter and circuit breaker. Treated as immutable after
//! construction; reconnect builds a fresh one.

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::kinds::ResourceKind;
use crate::limiter::RateLimiter;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::ApiResource;
use kube::discovery::{Discovery, Scope};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How to reach a cluster: kubeconfig context or the in-cluster environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub in_cluster: bool,
}

impl ConnectionDescriptor {
    /// Trims names and drops empty strings so two descriptors for the same
    /// target compare equal.
    pub fn normalize(mut self) -> Self {
        self.context = self
            .context
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }

    pub fn display_name(&self) -> String {
        if self.in_cluster {
            "in-cluster".to_string()
        } else {
            self.context.clone().unwrap_or_else(|| "default".to_string())
        }
    }
}

/// Tunables for the per-cluster limiter and breaker.
#[derive(Debug, Clone, Copy)]
pub struct ClientLimits {
    pub rate_per_sec: f64,
    pub burst: u32,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientLimits {
    fn default() -> Self {
        Self {
            rate_per_sec: 20.0,
            burst: 40,
            breaker_threshold: 3,
            breaker_cooldown: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Discovery snapshot: lower-cased kind name to API resource + scope.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCache {
    by_kind: HashMap<String, (ApiResource, bool)>,
}

impl DiscoveryCache {
    pub fn from_discovery(discovery: &Discovery) -> Self {
        let mut by_kind = HashMap::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let namespaced = caps.scope == Scope::Namespaced;
                by_kind
                    .entry(ar.kind.to_lowercase())
                    .or_insert((ar, namespaced));
            }
        }
        Self { by_kind }
    }

    /// Resolves an arbitrary kind name, returning the resource and whether it
    /// is namespaced.
    pub fn resolve(&self, kind: &str) -> Option<&(ApiResource, bool)> {
        self.by_kind.get(&kind.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

pub struct ClusterClient {
    client: Client,
    discovery: DiscoveryCache,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl ClusterClient {
    /// Builds the kube client for the descriptor, runs discovery once and
    /// captures limiter + breaker. Bounded by `limits.connect_timeout`.
    pub async fn connect(descriptor: &ConnectionDescriptor, limits: ClientLimits) -> Result<Self> {
        let connect = Self::connect_inner(descriptor, limits);
        match tokio::time::timeout(limits.connect_timeout, connect).await {
            Ok(r) => r,
            Err(_) => Err(Error::DeadlineExceeded(format!(
                "connecting to {} took longer than {:?}",
                descriptor.display_name(),
                limits.connect_timeout
            ))),
        }
    }

    async fn connect_inner(
        descriptor: &ConnectionDescriptor,
        limits: ClientLimits,
    ) -> Result<Self> {
        let config = Self::build_config(descriptor).await?;
        let client = Client::try_from(config)
            .map_err(|e| Error::Internal(format!("client construction: {e}")))?;
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .map(|d| DiscoveryCache::from_discovery(&d))
            .unwrap_or_default();
        if discovery.is_empty() {
            tracing::warn!(
                target: "kcli::client",
                cluster = %descriptor.display_name(),
                "api discovery returned no groups; dynamic reads will fail until reconnect"
            );
        }
        Ok(Self {
            client,
            discovery,
            limiter: RateLimiter::new(limits.rate_per_sec, limits.burst),
            breaker: CircuitBreaker::new(limits.breaker_threshold, limits.breaker_cooldown),
        })
    }

    async fn build_config(descriptor: &ConnectionDescriptor) -> Result<Config> {
        if descriptor.in_cluster {
            return Config::incluster()
                .map_err(|e| Error::Internal(format!("in-cluster config: {e}")));
        }
        let options = KubeConfigOptions {
            context: descriptor.context.clone(),
            ..Default::default()
        };
        match &descriptor.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::InvalidArgument(format!("kubeconfig {path:?}: {e}")))?;
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| Error::InvalidArgument(format!("kubeconfig context: {e}")))
            }
            None => Config::from_kubeconfig(&options)
                .await
                .map_err(|e| Error::InvalidArgument(format!("kubeconfig context: {e}"))),
        }
    }

    /// Cheap reachability probe; returns the measured round-trip.
    pub async fn probe(&self, timeout: Duration) -> Result<Duration> {
        let started = std::time::Instant::now();
        let call = self.client.apiserver_version();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(Error::from(e)),
            Err(_) => Err(Error::DeadlineExceeded("probe timed out".into())),
        }
    }

    pub fn kube(&self) -> Client {
        self.client.clone()
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Limiter + breaker gate shared by every outbound call.
    pub async fn admit(&self) -> Result<()> {
        self.breaker.try_acquire()?;
        self.limiter.acquire().await;
        Ok(())
    }

    /// Typed ApiResource for a known kind without a discovery round-trip.
    pub fn static_resource(kind: ResourceKind) -> ApiResource {
        let (group, version) = kind.group_version();
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.as_str().to_string(),
            plural: plural_of(kind),
        }
    }
}

fn plural_of(kind: ResourceKind) -> String {
    match kind {
        ResourceKind::Ingress => "ingresses".to_string(),
        ResourceKind::NetworkPolicy => "networkpolicies".to_string(),
        ResourceKind::StorageClass => "storageclasses".to_string(),
        _ => format!("{}s", kind.as_str().to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_normalization() {
        let d = ConnectionDescriptor {
            kubeconfig: None,
            context: Some("  prod  ".into()),
            in_cluster: false,
        }
        .normalize();
        assert_eq!(d.context.as_deref(), Some("prod"));
        let empty = ConnectionDescriptor {
            context: Some("   ".into()),
            ..Default::default()
        }
        .normalize();
        assert_eq!(empty.context, None);
    }

    #[test]
    fn static_resources_have_correct_plurals() {
        let ing = ClusterClient::static_resource(ResourceKind::Ingress);
        assert_eq!(ing.plural, "ingresses");
        assert_eq!(ing.api_version, "networking.k8s.io/v1");
        let pod = ClusterClient::static_resource(ResourceKind::Pod);
        assert_eq!(pod.plural, "pods");
        assert_eq!(pod.api_version, "v1");
    }
}
