//! Well-known resource kinds and the by-value resource key used across the
//! gateway, topology engine and CLI.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds the platform reads with typed APIs. Anything else goes through the
/// dynamic path after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Deployment,
    ReplicaSet,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
    Service,
    EndpointSlice,
    Ingress,
    NetworkPolicy,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    PersistentVolume,
    StorageClass,
    Node,
    Namespace,
    Event,
    ServiceAccount,
}

impl ResourceKind {
    pub const ALL: &'static [ResourceKind] = &[
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Job,
        ResourceKind::CronJob,
        ResourceKind::Service,
        ResourceKind::EndpointSlice,
        ResourceKind::Ingress,
        ResourceKind::NetworkPolicy,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::PersistentVolume,
        ResourceKind::StorageClass,
        ResourceKind::Node,
        ResourceKind::Namespace,
        ResourceKind::Event,
        ResourceKind::ServiceAccount,
    ];

    /// Kinds the event hub watches by default.
    pub const WATCHED: &'static [ResourceKind] = &[
        ResourceKind::Pod,
        ResourceKind::Deployment,
        ResourceKind::ReplicaSet,
        ResourceKind::StatefulSet,
        ResourceKind::DaemonSet,
        ResourceKind::Service,
        ResourceKind::Ingress,
        ResourceKind::ConfigMap,
        ResourceKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Job => "Job",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Service => "Service",
            ResourceKind::EndpointSlice => "EndpointSlice",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::NetworkPolicy => "NetworkPolicy",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::PersistentVolume => "PersistentVolume",
            ResourceKind::StorageClass => "StorageClass",
            ResourceKind::Node => "Node",
            ResourceKind::Namespace => "Namespace",
            ResourceKind::Event => "Event",
            ResourceKind::ServiceAccount => "ServiceAccount",
        }
    }

    /// API group ("" is core) and version.
    pub fn group_version(&self) -> (&'static str, &'static str) {
        match self {
            ResourceKind::Deployment
            | ResourceKind::ReplicaSet
            | ResourceKind::StatefulSet
            | ResourceKind::DaemonSet => ("apps", "v1"),
            ResourceKind::Job | ResourceKind::CronJob => ("batch", "v1"),
            ResourceKind::EndpointSlice => ("discovery.k8s.io", "v1"),
            ResourceKind::Ingress | ResourceKind::NetworkPolicy => ("networking.k8s.io", "v1"),
            ResourceKind::StorageClass => ("storage.k8s.io", "v1"),
            _ => ("", "v1"),
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(
            self,
            ResourceKind::PersistentVolume
                | ResourceKind::StorageClass
                | ResourceKind::Node
                | ResourceKind::Namespace
        )
    }

    /// Accepts singular, plural and short forms, case-insensitively.
    pub fn parse(s: &str) -> Result<Self> {
        let norm = s.trim().to_lowercase();
        let kind = match norm.as_str() {
            "pod" | "pods" | "po" => ResourceKind::Pod,
            "deployment" | "deployments" | "deploy" => ResourceKind::Deployment,
            "replicaset" | "replicasets" | "rs" => ResourceKind::ReplicaSet,
            "statefulset" | "statefulsets" | "sts" => ResourceKind::StatefulSet,
            "daemonset" | "daemonsets" | "ds" => ResourceKind::DaemonSet,
            "job" | "jobs" => ResourceKind::Job,
            "cronjob" | "cronjobs" | "cj" => ResourceKind::CronJob,
            "service" | "services" | "svc" => ResourceKind::Service,
            "endpointslice" | "endpointslices" => ResourceKind::EndpointSlice,
            "ingress" | "ingresses" | "ing" => ResourceKind::Ingress,
            "networkpolicy" | "networkpolicies" | "netpol" => ResourceKind::NetworkPolicy,
            "configmap" | "configmaps" | "cm" => ResourceKind::ConfigMap,
            "secret" | "secrets" => ResourceKind::Secret,
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
                ResourceKind::PersistentVolumeClaim
            }
            "persistentvolume" | "persistentvolumes" | "pv" => ResourceKind::PersistentVolume,
            "storageclass" | "storageclasses" | "sc" => ResourceKind::StorageClass,
            "node" | "nodes" | "no" => ResourceKind::Node,
            "namespace" | "namespaces" | "ns" => ResourceKind::Namespace,
            "event" | "events" | "ev" => ResourceKind::Event,
            "serviceaccount" | "serviceaccounts" | "sa" => ResourceKind::ServiceAccount,
            _ => return Err(Error::InvalidArgument(format!("unknown kind '{s}'"))),
        };
        Ok(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// By-value key for a single resource. `uid` is stable for the resource's
/// lifetime; (cluster, group, version, kind, namespace, name) is unique while
/// it exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub cluster: String,
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
}

impl ResourceRef {
    pub fn new(cluster: &str, kind: ResourceKind, namespace: Option<&str>, name: &str, uid: &str) -> Self {
        let (group, version) = kind.group_version();
        Self {
            cluster: cluster.to_string(),
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.as_str().to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            uid: uid.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}/{}", self.cluster, self.kind, ns, self.name),
            None => write!(f, "{}/{}/{}", self.cluster, self.kind, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!(ResourceKind::parse("po").unwrap(), ResourceKind::Pod);
        assert_eq!(ResourceKind::parse("Deployments").unwrap(), ResourceKind::Deployment);
        assert_eq!(ResourceKind::parse("svc").unwrap(), ResourceKind::Service);
        assert!(ResourceKind::parse("gizmo").is_err());
    }

    #[test]
    fn scope_classification() {
        assert!(ResourceKind::Pod.is_namespaced());
        assert!(!ResourceKind::Node.is_namespaced());
        assert!(!ResourceKind::PersistentVolume.is_namespaced());
        assert!(ResourceKind::PersistentVolumeClaim.is_namespaced());
    }

    #[test]
    fn group_versions() {
        assert_eq!(ResourceKind::Deployment.group_version(), ("apps", "v1"));
        assert_eq!(ResourceKind::Pod.group_version(), ("", "v1"));
        assert_eq!(
            ResourceKind::EndpointSlice.group_version(),
            ("discovery.k8s.io", "v1")
        );
    }
}
