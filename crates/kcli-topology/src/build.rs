//! Scoped graph construction: collect a snapshot, materialize nodes, infer
//! edges in a fixed order, validate, seed the layout.

use crate::graph::{
    Derivation, Health, OwnerInfo, Relation, TopologyEdge, TopologyGraph, TopologyNode,
};
use crate::health;
use crate::scope::{enforce_size_ceiling, TopologyScope};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kcli_core::{Error, ResourceAccess, ResourceKind, ResourceRef, Result};
use std::collections::BTreeMap;

/// Everything a build reads. Collected in one pass so a graph is a consistent
/// snapshot, and constructible by hand in tests.
#[derive(Debug, Clone, Default)]
pub struct ResourceSnapshot {
    pub namespaces: Vec<Namespace>,
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub replica_sets: Vec<ReplicaSet>,
    pub stateful_sets: Vec<StatefulSet>,
    pub daemon_sets: Vec<DaemonSet>,
    pub services: Vec<Service>,
    pub endpoint_slices: Vec<EndpointSlice>,
    pub ingresses: Vec<Ingress>,
    pub network_policies: Vec<NetworkPolicy>,
    pub config_maps: Vec<ConfigMap>,
    pub secrets: Vec<Secret>,
    pub pvcs: Vec<PersistentVolumeClaim>,
    pub pvs: Vec<PersistentVolume>,
    pub storage_classes: Vec<StorageClass>,
}

impl ResourceSnapshot {
    pub fn estimated_nodes(&self) -> usize {
        self.namespaces.len()
            + self.nodes.len()
            + self.pods.len()
            + self.deployments.len()
            + self.replica_sets.len()
            + self.stateful_sets.len()
            + self.daemon_sets.len()
            + self.services.len()
            + self.ingresses.len()
            + self.network_policies.len()
            + self.config_maps.len()
            + self.secrets.len()
            + self.pvcs.len()
            + self.pvs.len()
            + self.storage_classes.len()
    }
}

/// Lists everything the scope needs. Namespaced kinds honour the scope's
/// namespace; node/volume/class kinds are cluster-global by nature.
pub async fn collect(access: &ResourceAccess, scope: &TopologyScope) -> Result<ResourceSnapshot> {
    scope.validate()?;
    let ns = scope.namespace();
    let mut snapshot = ResourceSnapshot {
        pods: access.list_typed::<Pod>(ns).await?,
        deployments: access.list_typed::<Deployment>(ns).await?,
        replica_sets: access.list_typed::<ReplicaSet>(ns).await?,
        stateful_sets: access.list_typed::<StatefulSet>(ns).await?,
        daemon_sets: access.list_typed::<DaemonSet>(ns).await?,
        services: access.list_typed::<Service>(ns).await?,
        endpoint_slices: access.list_typed::<EndpointSlice>(ns).await?,
        ingresses: access.list_typed::<Ingress>(ns).await?,
        network_policies: access.list_typed::<NetworkPolicy>(ns).await?,
        config_maps: access.list_typed::<ConfigMap>(ns).await?,
        secrets: access.list_typed::<Secret>(ns).await?,
        pvcs: access.list_typed::<PersistentVolumeClaim>(ns).await?,
        nodes: access.list_typed_cluster::<Node>().await?,
        pvs: access.list_typed_cluster::<PersistentVolume>().await?,
        storage_classes: access.list_typed_cluster::<StorageClass>().await?,
        namespaces: access.list_typed_cluster::<Namespace>().await?,
    };
    if let Some(ns) = ns {
        snapshot
            .namespaces
            .retain(|n| n.metadata.name.as_deref() == Some(ns));
        // Keep only nodes that actually run pods from this namespace.
        let used: std::collections::BTreeSet<&str> = snapshot
            .pods
            .iter()
            .filter_map(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()))
            .collect();
        snapshot
            .nodes
            .retain(|n| n.metadata.name.as_deref().map(|name| used.contains(name)).unwrap_or(false));
    }
    Ok(snapshot)
}

pub struct TopologyBuilder {
    cluster_id: String,
    node_ceiling: usize,
}

struct EdgeSink {
    edges: Vec<TopologyEdge>,
    seen: std::collections::BTreeSet<(ResourceRef, ResourceRef, Relation, Derivation)>,
}

impl EdgeSink {
    fn new() -> Self {
        Self {
            edges: Vec::new(),
            seen: std::collections::BTreeSet::new(),
        }
    }

    fn push(
        &mut self,
        source: &ResourceRef,
        target: &ResourceRef,
        relation: Relation,
        derivation: Derivation,
        confidence: f64,
    ) {
        if source == target {
            return;
        }
        if self
            .seen
            .insert((source.clone(), target.clone(), relation, derivation))
        {
            self.edges.push(TopologyEdge {
                source: source.clone(),
                target: target.clone(),
                relation,
                derivation,
                confidence,
            });
        }
    }
}

impl TopologyBuilder {
    pub fn new(cluster_id: &str, node_ceiling: usize) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            node_ceiling: node_ceiling.max(1),
        }
    }

    /// Deterministic build: same snapshot and scope produce the same node
    /// set, edge set and layout seed.
    pub fn build(&self, scope: &TopologyScope, snapshot: &ResourceSnapshot) -> Result<TopologyGraph> {
        scope.validate()?;
        enforce_size_ceiling(scope, snapshot.estimated_nodes(), self.node_ceiling)?;

        let mut nodes: BTreeMap<ResourceRef, TopologyNode> = BTreeMap::new();
        self.materialize(snapshot, &mut nodes);

        let mut sink = EdgeSink::new();
        self.owner_edges(&nodes, &mut sink);
        self.selector_edges(snapshot, &nodes, &mut sink);
        self.endpoint_slice_edges(snapshot, &nodes, &mut sink);
        self.ingress_edges(snapshot, &nodes, &mut sink);
        self.volume_edges(snapshot, &nodes, &mut sink);
        self.network_policy_edges(snapshot, &nodes, &mut sink);
        self.scheduling_edges(snapshot, &nodes, &mut sink);
        if matches!(scope, TopologyScope::Cluster) {
            self.containment_edges(&nodes, &mut sink);
        }

        let graph = TopologyGraph::assemble(scope.clone(), nodes, sink.edges)?;

        if let TopologyScope::Resource {
            kind,
            namespace,
            name,
            hops,
        } = scope
        {
            let kind = ResourceKind::parse(kind)?;
            let centre = graph
                .nodes
                .iter()
                .map(|n| n.reference.clone())
                .find(|r| {
                    r.kind == kind.as_str()
                        && r.name == *name
                        && r.namespace.as_deref() == namespace.as_deref()
                })
                .ok_or_else(|| {
                    Error::NotFound(format!("{} '{}' not found in scope", kind.as_str(), name))
                })?;
            return graph.focus(&centre, *hops);
        }
        Ok(graph)
    }

    fn make_ref(&self, kind: ResourceKind, meta: &ObjectMeta) -> Option<ResourceRef> {
        let name = meta.name.clone()?;
        let uid = meta.uid.clone()?;
        Some(ResourceRef::new(
            &self.cluster_id,
            kind,
            meta.namespace.as_deref(),
            &name,
            &uid,
        ))
    }

    fn materialize(&self, snapshot: &ResourceSnapshot, nodes: &mut BTreeMap<ResourceRef, TopologyNode>) {
        let mut insert = |kind: ResourceKind,
                          meta: &ObjectMeta,
                          health: Health,
                          replicas: Option<crate::graph::ReplicaCounts>| {
            if let Some(reference) = self.make_ref(kind, meta) {
                nodes.insert(
                    reference.clone(),
                    TopologyNode {
                        reference,
                        labels: meta.labels.clone().unwrap_or_default(),
                        owner_refs: meta
                            .owner_references
                            .clone()
                            .unwrap_or_default()
                            .into_iter()
                            .map(|o| OwnerInfo {
                                kind: o.kind,
                                name: o.name,
                                uid: o.uid,
                            })
                            .collect(),
                        health,
                        replicas,
                    },
                );
            }
        };

        for ns in &snapshot.namespaces {
            insert(ResourceKind::Namespace, &ns.metadata, Health::Healthy, None);
        }
        for n in &snapshot.nodes {
            insert(ResourceKind::Node, &n.metadata, health::node_health(n), None);
        }
        for p in &snapshot.pods {
            insert(ResourceKind::Pod, &p.metadata, health::pod_health(p), None);
        }
        for d in &snapshot.deployments {
            insert(
                ResourceKind::Deployment,
                &d.metadata,
                health::deployment_health(d),
                Some(health::deployment_counts(d)),
            );
        }
        for r in &snapshot.replica_sets {
            insert(
                ResourceKind::ReplicaSet,
                &r.metadata,
                health::replica_set_health(r),
                Some(health::replica_set_counts(r)),
            );
        }
        for s in &snapshot.stateful_sets {
            insert(
                ResourceKind::StatefulSet,
                &s.metadata,
                health::stateful_set_health(s),
                Some(health::stateful_set_counts(s)),
            );
        }
        for d in &snapshot.daemon_sets {
            insert(
                ResourceKind::DaemonSet,
                &d.metadata,
                health::daemon_set_health(d),
                Some(health::daemon_set_counts(d)),
            );
        }
        for s in &snapshot.services {
            insert(ResourceKind::Service, &s.metadata, Health::Healthy, None);
        }
        for i in &snapshot.ingresses {
            insert(ResourceKind::Ingress, &i.metadata, Health::Healthy, None);
        }
        for n in &snapshot.network_policies {
            insert(ResourceKind::NetworkPolicy, &n.metadata, Health::Healthy, None);
        }
        for c in &snapshot.config_maps {
            insert(ResourceKind::ConfigMap, &c.metadata, Health::Healthy, None);
        }
        for s in &snapshot.secrets {
            insert(ResourceKind::Secret, &s.metadata, Health::Healthy, None);
        }
        for p in &snapshot.pvcs {
            insert(
                ResourceKind::PersistentVolumeClaim,
                &p.metadata,
                Health::Healthy,
                None,
            );
        }
        for p in &snapshot.pvs {
            insert(ResourceKind::PersistentVolume, &p.metadata, Health::Healthy, None);
        }
        for s in &snapshot.storage_classes {
            insert(ResourceKind::StorageClass, &s.metadata, Health::Healthy, None);
        }
        // EndpointSlices contribute edges, not nodes.
    }

    /// ownerRef edges, confidence 1.0.
    fn owner_edges(&self, nodes: &BTreeMap<ResourceRef, TopologyNode>, sink: &mut EdgeSink) {
        let by_uid: BTreeMap<&str, &ResourceRef> = nodes
            .values()
            .map(|n| (n.reference.uid.as_str(), &n.reference))
            .collect();
        for node in nodes.values() {
            for owner in &node.owner_refs {
                if let Some(owner_ref) = by_uid.get(owner.uid.as_str()) {
                    sink.push(
                        owner_ref,
                        &node.reference,
                        Relation::Owns,
                        Derivation::OwnerRef,
                        1.0,
                    );
                }
            }
        }
    }

    /// Label-selector match from a Service: to a workload controller whose
    /// pod template matches (selects + routes, 0.9), or straight to any
    /// matching pod that has no in-scope controller (routes, 0.9).
    fn selector_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        for svc in &snapshot.services {
            let Some(selector) = svc.spec.as_ref().and_then(|s| s.selector.clone()) else {
                continue;
            };
            if selector.is_empty() {
                continue;
            }
            let Some(svc_ref) = self.make_ref(ResourceKind::Service, &svc.metadata) else {
                continue;
            };
            if !nodes.contains_key(&svc_ref) {
                continue;
            }

            let mut matched_controller = false;
            let mut consider = |kind: ResourceKind,
                                meta: &ObjectMeta,
                                template_labels: Option<&BTreeMap<String, String>>,
                                sink: &mut EdgeSink| {
                let Some(labels) = template_labels else {
                    return;
                };
                if meta.namespace != svc.metadata.namespace {
                    return;
                }
                if !selector_matches(&selector, labels) {
                    return;
                }
                if let Some(target) = self.make_ref(kind, meta) {
                    if nodes.contains_key(&target) {
                        sink.push(
                            &svc_ref,
                            &target,
                            Relation::Selects,
                            Derivation::LabelSelector,
                            0.9,
                        );
                        sink.push(
                            &svc_ref,
                            &target,
                            Relation::Routes,
                            Derivation::LabelSelector,
                            0.9,
                        );
                        matched_controller = true;
                    }
                }
            };

            for d in &snapshot.deployments {
                consider(
                    ResourceKind::Deployment,
                    &d.metadata,
                    d.spec
                        .as_ref()
                        .and_then(|s| s.template.metadata.as_ref())
                        .and_then(|m| m.labels.as_ref()),
                    sink,
                );
            }
            for s in &snapshot.stateful_sets {
                consider(
                    ResourceKind::StatefulSet,
                    &s.metadata,
                    s.spec
                        .as_ref()
                        .and_then(|sp| sp.template.metadata.as_ref())
                        .and_then(|m| m.labels.as_ref()),
                    sink,
                );
            }
            for d in &snapshot.daemon_sets {
                consider(
                    ResourceKind::DaemonSet,
                    &d.metadata,
                    d.spec
                        .as_ref()
                        .and_then(|s| s.template.metadata.as_ref())
                        .and_then(|m| m.labels.as_ref()),
                    sink,
                );
            }

            if matched_controller {
                continue;
            }
            // Fall back to direct pod edges for selector matches with no
            // in-scope controller (orphan pods, bare pods).
            for pod in &snapshot.pods {
                if pod.metadata.namespace != svc.metadata.namespace {
                    continue;
                }
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                if !selector_matches(&selector, &labels) {
                    continue;
                }
                if let Some(pod_ref) = self.make_ref(ResourceKind::Pod, &pod.metadata) {
                    if nodes.contains_key(&pod_ref) {
                        sink.push(
                            &svc_ref,
                            &pod_ref,
                            Relation::Routes,
                            Derivation::LabelSelector,
                            0.9,
                        );
                    }
                }
            }
        }
    }

    /// EndpointSlice target references, confidence 1.0.
    fn endpoint_slice_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        let services: BTreeMap<(Option<&str>, &str), &Service> = snapshot
            .services
            .iter()
            .filter_map(|s| {
                s.metadata
                    .name
                    .as_deref()
                    .map(|name| ((s.metadata.namespace.as_deref(), name), s))
            })
            .collect();
        for slice in &snapshot.endpoint_slices {
            let Some(service_name) = slice
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("kubernetes.io/service-name"))
            else {
                continue;
            };
            let key = (slice.metadata.namespace.as_deref(), service_name.as_str());
            let Some(svc) = services.get(&key) else {
                continue;
            };
            let Some(svc_ref) = self.make_ref(ResourceKind::Service, &svc.metadata) else {
                continue;
            };
            for endpoint in &slice.endpoints {
                let Some(target) = endpoint.target_ref.as_ref() else {
                    continue;
                };
                if target.kind.as_deref() != Some("Pod") {
                    continue;
                }
                let (Some(name), Some(uid)) = (target.name.as_deref(), target.uid.as_deref())
                else {
                    continue;
                };
                let pod_ref = ResourceRef::new(
                    &self.cluster_id,
                    ResourceKind::Pod,
                    target.namespace.as_deref().or(slice.metadata.namespace.as_deref()),
                    name,
                    uid,
                );
                if nodes.contains_key(&pod_ref) && nodes.contains_key(&svc_ref) {
                    sink.push(
                        &svc_ref,
                        &pod_ref,
                        Relation::Routes,
                        Derivation::EndpointSlice,
                        1.0,
                    );
                }
            }
        }
    }

    /// Ingress backend services, confidence 1.0.
    fn ingress_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        for ing in &snapshot.ingresses {
            let Some(ing_ref) = self.make_ref(ResourceKind::Ingress, &ing.metadata) else {
                continue;
            };
            if !nodes.contains_key(&ing_ref) {
                continue;
            }
            let mut backends: Vec<String> = Vec::new();
            if let Some(spec) = &ing.spec {
                if let Some(default) = spec
                    .default_backend
                    .as_ref()
                    .and_then(|b| b.service.as_ref())
                {
                    backends.push(default.name.clone());
                }
                for rule in spec.rules.as_deref().unwrap_or_default() {
                    for path in rule
                        .http
                        .as_ref()
                        .map(|h| h.paths.as_slice())
                        .unwrap_or_default()
                    {
                        if let Some(svc) = path.backend.service.as_ref() {
                            backends.push(svc.name.clone());
                        }
                    }
                }
            }
            for backend in backends {
                let target = snapshot.services.iter().find(|s| {
                    s.metadata.name.as_deref() == Some(backend.as_str())
                        && s.metadata.namespace == ing.metadata.namespace
                });
                if let Some(svc) = target {
                    if let Some(svc_ref) = self.make_ref(ResourceKind::Service, &svc.metadata) {
                        if nodes.contains_key(&svc_ref) {
                            sink.push(
                                &ing_ref,
                                &svc_ref,
                                Relation::Routes,
                                Derivation::IngressBackend,
                                1.0,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Pod volume sources and the PVC -> PV -> StorageClass chain.
    fn volume_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        let find_named = |kind: ResourceKind, ns: Option<&str>, name: &str| -> Option<ResourceRef> {
            nodes
                .keys()
                .find(|r| {
                    r.kind == kind.as_str() && r.namespace.as_deref() == ns && r.name == name
                })
                .cloned()
        };

        for pod in &snapshot.pods {
            let Some(pod_ref) = self.make_ref(ResourceKind::Pod, &pod.metadata) else {
                continue;
            };
            if !nodes.contains_key(&pod_ref) {
                continue;
            }
            let ns = pod.metadata.namespace.as_deref();
            for volume in pod
                .spec
                .as_ref()
                .and_then(|s| s.volumes.as_deref())
                .unwrap_or_default()
            {
                if let Some(cm) = volume.config_map.as_ref().map(|c| c.name.clone()) {
                    if let Some(target) = find_named(ResourceKind::ConfigMap, ns, &cm) {
                        sink.push(&pod_ref, &target, Relation::Mounts, Derivation::VolumeMount, 1.0);
                    }
                }
                if let Some(sec) = volume.secret.as_ref().and_then(|s| s.secret_name.clone()) {
                    if let Some(target) = find_named(ResourceKind::Secret, ns, &sec) {
                        sink.push(&pod_ref, &target, Relation::Mounts, Derivation::VolumeMount, 1.0);
                    }
                }
                if let Some(claim) = volume
                    .persistent_volume_claim
                    .as_ref()
                    .map(|c| c.claim_name.clone())
                {
                    if let Some(target) = find_named(ResourceKind::PersistentVolumeClaim, ns, &claim)
                    {
                        sink.push(&pod_ref, &target, Relation::Mounts, Derivation::VolumeMount, 1.0);
                    }
                }
            }
        }

        for pvc in &snapshot.pvcs {
            let Some(pvc_ref) = self.make_ref(ResourceKind::PersistentVolumeClaim, &pvc.metadata)
            else {
                continue;
            };
            if let Some(volume_name) = pvc.spec.as_ref().and_then(|s| s.volume_name.as_deref()) {
                if let Some(pv_ref) = find_named(ResourceKind::PersistentVolume, None, volume_name) {
                    if nodes.contains_key(&pvc_ref) {
                        sink.push(&pvc_ref, &pv_ref, Relation::Binds, Derivation::Inferred, 1.0);
                    }
                }
            }
        }

        for pv in &snapshot.pvs {
            let Some(pv_ref) = self.make_ref(ResourceKind::PersistentVolume, &pv.metadata) else {
                continue;
            };
            if let Some(class) = pv.spec.as_ref().and_then(|s| s.storage_class_name.as_deref()) {
                if let Some(class_ref) = find_named(ResourceKind::StorageClass, None, class) {
                    if nodes.contains_key(&pv_ref) {
                        sink.push(&pv_ref, &class_ref, Relation::Uses, Derivation::Inferred, 1.0);
                    }
                }
            }
        }
    }

    /// NetworkPolicy pod selector matches, confidence 0.8.
    fn network_policy_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        for policy in &snapshot.network_policies {
            let Some(policy_ref) = self.make_ref(ResourceKind::NetworkPolicy, &policy.metadata)
            else {
                continue;
            };
            if !nodes.contains_key(&policy_ref) {
                continue;
            }
            let selector = policy
                .spec
                .as_ref()
                .and_then(|s| s.pod_selector.as_ref())
                .and_then(|p| p.match_labels.clone())
                .unwrap_or_default();
            for pod in &snapshot.pods {
                if pod.metadata.namespace != policy.metadata.namespace {
                    continue;
                }
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                // An empty podSelector selects every pod in the namespace.
                if !selector.is_empty() && !selector_matches(&selector, &labels) {
                    continue;
                }
                if let Some(pod_ref) = self.make_ref(ResourceKind::Pod, &pod.metadata) {
                    if nodes.contains_key(&pod_ref) {
                        sink.push(
                            &policy_ref,
                            &pod_ref,
                            Relation::Targets,
                            Derivation::LabelSelector,
                            0.8,
                        );
                    }
                }
            }
        }
    }

    /// Pod placement, confidence 1.0.
    fn scheduling_edges(
        &self,
        snapshot: &ResourceSnapshot,
        nodes: &BTreeMap<ResourceRef, TopologyNode>,
        sink: &mut EdgeSink,
    ) {
        let node_refs: BTreeMap<&str, ResourceRef> = nodes
            .keys()
            .filter(|r| r.kind == ResourceKind::Node.as_str())
            .map(|r| (r.name.as_str(), r.clone()))
            .collect();
        for pod in &snapshot.pods {
            let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
                continue;
            };
            let Some(node_ref) = node_refs.get(node_name) else {
                continue;
            };
            if let Some(pod_ref) = self.make_ref(ResourceKind::Pod, &pod.metadata) {
                if nodes.contains_key(&pod_ref) {
                    sink.push(
                        &pod_ref,
                        node_ref,
                        Relation::SchedulesOn,
                        Derivation::NodeSelector,
                        1.0,
                    );
                }
            }
        }
    }

    /// Namespace containment, cluster scope only, confidence 1.0.
    fn containment_edges(&self, nodes: &BTreeMap<ResourceRef, TopologyNode>, sink: &mut EdgeSink) {
        let namespaces: BTreeMap<&str, ResourceRef> = nodes
            .keys()
            .filter(|r| r.kind == ResourceKind::Namespace.as_str())
            .map(|r| (r.name.as_str(), r.clone()))
            .collect();
        let members: Vec<(ResourceRef, ResourceRef)> = nodes
            .keys()
            .filter_map(|r| {
                let ns = r.namespace.as_deref()?;
                namespaces.get(ns).map(|ns_ref| (ns_ref.clone(), r.clone()))
            })
            .collect();
        for (ns_ref, member) in members {
            sink.push(&ns_ref, &member, Relation::Contains, Derivation::Inferred, 1.0);
        }
    }
}

/// Every selector key/value must be present on the labels.
fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).map(|lv| lv == v).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_subset_semantics() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "api".to_string());
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "api".to_string());
        labels.insert("tier".to_string(), "web".to_string());
        assert!(selector_matches(&selector, &labels));
        selector.insert("tier".to_string(), "db".to_string());
        assert!(!selector_matches(&selector, &labels));
    }
}
