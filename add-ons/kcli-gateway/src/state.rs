//! Shared gateway state: registry, cache, hub, metrics and runtime settings.

use crate::metrics::GatewayMetrics;
use kcli_core::{
    AccessPolicy, ClusterRegistry, ResourceAccess, ResponseCache, Result, StreamHub,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bearer auth mode: `open` serves anonymously, `required` rejects requests
/// without the configured token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Required { token: String },
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub bind_addr: String,
    pub auth: AuthMode,
    pub cors_allowed_origins: Vec<String>,
    pub request_deadline: Duration,
    pub drain_deadline: Duration,
    pub cache_ttl: Duration,
    pub topology_node_ceiling: usize,
    pub overview_stream_interval: Duration,
    pub log_idle_timeout: Duration,
    pub exec_max_idle: Duration,
    pub exec_max_session: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8819".to_string(),
            auth: AuthMode::Open,
            cors_allowed_origins: Vec::new(),
            request_deadline: Duration::from_secs(30),
            drain_deadline: Duration::from_secs(15),
            cache_ttl: Duration::from_secs(30),
            topology_node_ceiling: 5000,
            overview_stream_interval: Duration::from_secs(5),
            log_idle_timeout: Duration::from_secs(300),
            exec_max_idle: Duration::from_secs(600),
            exec_max_session: Duration::from_secs(4 * 3600),
        }
    }
}

impl GatewaySettings {
    /// Environment overrides, applied over the defaults at startup.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(addr) = std::env::var("KCLI_GATEWAY_ADDR") {
            if !addr.trim().is_empty() {
                settings.bind_addr = addr.trim().to_string();
            }
        }
        if let Ok(token) = std::env::var("KCLI_GATEWAY_TOKEN") {
            if !token.trim().is_empty() {
                settings.auth = AuthMode::Required {
                    token: token.trim().to_string(),
                };
            }
        }
        if let Ok(origins) = std::env::var("KCLI_GATEWAY_CORS_ORIGINS") {
            settings.cors_allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Ok(ceiling) = std::env::var("KCLI_TOPOLOGY_NODE_CEILING") {
            if let Ok(n) = ceiling.trim().parse() {
                settings.topology_node_ceiling = n;
            }
        }
        settings
    }
}

pub struct AppState {
    pub registry: Arc<ClusterRegistry>,
    pub cache: Arc<ResponseCache>,
    pub hub: Arc<StreamHub>,
    pub metrics: GatewayMetrics,
    pub settings: GatewaySettings,
    pub access_policy: AccessPolicy,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(
        registry: Arc<ClusterRegistry>,
        cache: Arc<ResponseCache>,
        hub: Arc<StreamHub>,
        settings: GatewaySettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            cache,
            hub,
            metrics: GatewayMetrics::new(),
            settings,
            access_policy: AccessPolicy::default(),
            draining: AtomicBool::new(false),
        })
    }

    /// Access handle for a Ready cluster.
    pub async fn access(&self, cluster_id: &str) -> Result<ResourceAccess> {
        let handle = self.registry.get(cluster_id)?;
        let client = handle.client().await?;
        Ok(ResourceAccess::new(cluster_id, client, self.access_policy))
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
