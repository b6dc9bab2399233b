//! kcli-core: cluster registry and client pool, resource access, response
//! cache with watch-driven invalidation, and the event/stream hub.
//!
//! The gateway and the terminal CLI both read through this crate; neither
//! talks to a kube client directly.

pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod kinds;
pub mod limiter;
pub mod registry;
pub mod resources;
pub mod secrets;
pub mod state;

pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{CacheKey, CacheShape, CachedValue, ResponseCache};
pub use client::{ClientLimits, ClusterClient, ConnectionDescriptor, DiscoveryCache};
pub use config::{AiSection, ConfigRoot, ConfigStore, Profile};
pub use error::{with_retries, Error, Result, RetryPolicy};
pub use events::{
    DeltaOp, HubFrame, StreamHub, SubscriberFilter, SubscriberSession, WatchDelta,
};
pub use kinds::{ResourceKind, ResourceRef};
pub use limiter::RateLimiter;
pub use registry::{
    ClusterEntry, ClusterHandle, ClusterRegistry, ClusterStatus, HealthSummary, ProbePolicy,
};
pub use resources::{AccessPolicy, ListPage, ListQuery, ResourceAccess};
pub use secrets::{MemorySecretStore, OsSecretStore, SecretStore};
pub use state::{State, StateStore};
