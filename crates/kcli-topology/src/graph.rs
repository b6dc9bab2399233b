//! Graph model: typed nodes and edges keyed by [`ResourceRef`], owned in one
//! structure with no pointer cycles.

use crate::scope::TopologyScope;
use chrono::{DateTime, Utc};
use kcli_core::{Error, ResourceRef, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Closed relation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    Owns,
    Selects,
    Routes,
    Mounts,
    Binds,
    Targets,
    SchedulesOn,
    Uses,
    Manages,
    Contains,
}

/// How an edge was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Derivation {
    OwnerRef,
    LabelSelector,
    VolumeMount,
    EndpointSlice,
    IngressBackend,
    NodeSelector,
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Warning,
    Critical,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaCounts {
    pub desired: i32,
    pub ready: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    #[serde(rename = "ref")]
    pub reference: ResourceRef,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub owner_refs: Vec<OwnerInfo>,
    pub health: Health,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaCounts>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub source: ResourceRef,
    pub target: ResourceRef,
    pub relation: Relation,
    pub derivation: Derivation,
    /// In [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    /// Deterministic hash of the sorted node uids.
    pub layout_seed: u64,
    pub built_at: DateTime<Utc>,
    pub scope: TopologyScope,
}

impl TopologyGraph {
    /// Assembles a validated graph: nodes and edges are sorted so two builds
    /// over the same resource set compare bit-for-bit, and the layout seed is
    /// derived from the sorted node uids.
    pub fn assemble(
        scope: TopologyScope,
        nodes: BTreeMap<ResourceRef, TopologyNode>,
        edges: Vec<TopologyEdge>,
    ) -> Result<Self> {
        let mut edges = edges;
        edges.sort_by(|a, b| {
            (&a.source, &a.target, a.relation, a.derivation).cmp(&(
                &b.source,
                &b.target,
                b.relation,
                b.derivation,
            ))
        });
        let graph = Self {
            layout_seed: seed_from_nodes(nodes.values()),
            nodes: nodes.into_values().collect(),
            edges,
            built_at: Utc::now(),
            scope,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// The structural invariants: no orphan edges, no self-loops, at most one
    /// edge per (source, target, relation, derivation), confidence in range.
    pub fn validate(&self) -> Result<()> {
        let refs: BTreeSet<&ResourceRef> = self.nodes.iter().map(|n| &n.reference).collect();
        let mut seen = BTreeSet::new();
        for edge in &self.edges {
            if edge.source == edge.target {
                return Err(Error::Internal(format!(
                    "self-loop on {} ({:?})",
                    edge.source, edge.relation
                )));
            }
            if !refs.contains(&edge.source) || !refs.contains(&edge.target) {
                return Err(Error::Internal(format!(
                    "orphan edge {} -> {} ({:?})",
                    edge.source, edge.target, edge.relation
                )));
            }
            if !(0.0..=1.0).contains(&edge.confidence) {
                return Err(Error::Internal(format!(
                    "confidence {} out of range on {} -> {}",
                    edge.confidence, edge.source, edge.target
                )));
            }
            if !seen.insert((
                edge.source.clone(),
                edge.target.clone(),
                edge.relation,
                edge.derivation,
            )) {
                return Err(Error::Internal(format!(
                    "duplicate edge {} -> {} ({:?}/{:?})",
                    edge.source, edge.target, edge.relation, edge.derivation
                )));
            }
        }
        Ok(())
    }

    pub fn node(&self, reference: &ResourceRef) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| &n.reference == reference)
    }

    pub fn edge_count_by_relation(&self, relation: Relation) -> usize {
        self.edges.iter().filter(|e| e.relation == relation).count()
    }

    /// Subgraph within `hops` of the centre node, re-seeded. Edges are walked
    /// in both directions.
    pub fn focus(&self, centre: &ResourceRef, hops: u32) -> Result<Self> {
        if self.node(centre).is_none() {
            return Err(Error::NotFound(format!("centre {centre} not in graph")));
        }
        let mut keep: BTreeSet<ResourceRef> = BTreeSet::new();
        keep.insert(centre.clone());
        let mut frontier: Vec<ResourceRef> = vec![centre.clone()];
        for _ in 0..hops.max(1) {
            let mut next = Vec::new();
            for edge in &self.edges {
                if frontier.contains(&edge.source) && keep.insert(edge.target.clone()) {
                    next.push(edge.target.clone());
                }
                if frontier.contains(&edge.target) && keep.insert(edge.source.clone()) {
                    next.push(edge.source.clone());
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        let nodes: BTreeMap<ResourceRef, TopologyNode> = self
            .nodes
            .iter()
            .filter(|n| keep.contains(&n.reference))
            .map(|n| (n.reference.clone(), n.clone()))
            .collect();
        let edges: Vec<TopologyEdge> = self
            .edges
            .iter()
            .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
            .cloned()
            .collect();
        Self::assemble(self.scope.clone(), nodes, edges)
    }
}

/// First eight bytes of SHA-256 over the sorted node uids, big-endian.
pub fn seed_from_nodes<'a, I: Iterator<Item = &'a TopologyNode>>(nodes: I) -> u64 {
    let mut uids: Vec<&str> = nodes.map(|n| n.reference.uid.as_str()).collect();
    uids.sort_unstable();
    let mut hasher = Sha256::new();
    for uid in uids {
        hasher.update(uid.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: &str, name: &str, uid: &str) -> TopologyNode {
        TopologyNode {
            reference: ResourceRef {
                cluster: "test".into(),
                group: String::new(),
                version: "v1".into(),
                kind: kind.into(),
                namespace: Some("ns".into()),
                name: name.into(),
                uid: uid.into(),
            },
            labels: BTreeMap::new(),
            owner_refs: Vec::new(),
            health: Health::Healthy,
            replicas: None,
        }
    }

    fn edge(src: &TopologyNode, tgt: &TopologyNode, relation: Relation) -> TopologyEdge {
        TopologyEdge {
            source: src.reference.clone(),
            target: tgt.reference.clone(),
            relation,
            derivation: Derivation::Inferred,
            confidence: 1.0,
        }
    }

    fn node_map(nodes: &[&TopologyNode]) -> BTreeMap<ResourceRef, TopologyNode> {
        nodes
            .iter()
            .map(|n| (n.reference.clone(), (*n).clone()))
            .collect()
    }

    #[test]
    fn orphan_edge_fails_build() {
        let a = node("Pod", "a", "u1");
        let b = node("Pod", "b", "u2");
        let out = TopologyGraph::assemble(
            TopologyScope::Cluster,
            node_map(&[&a]),
            vec![edge(&a, &b, Relation::Routes)],
        );
        assert!(matches!(out, Err(Error::Internal(_))));
    }

    #[test]
    fn self_loop_fails_build() {
        let a = node("Pod", "a", "u1");
        let out = TopologyGraph::assemble(
            TopologyScope::Cluster,
            node_map(&[&a]),
            vec![edge(&a, &a, Relation::Owns)],
        );
        assert!(out.is_err());
    }

    #[test]
    fn duplicate_edge_fails_build() {
        let a = node("Service", "a", "u1");
        let b = node("Pod", "b", "u2");
        let out = TopologyGraph::assemble(
            TopologyScope::Cluster,
            node_map(&[&a, &b]),
            vec![edge(&a, &b, Relation::Routes), edge(&a, &b, Relation::Routes)],
        );
        assert!(out.is_err());
    }

    #[test]
    fn seed_is_order_independent_and_deterministic() {
        let a = node("Pod", "a", "uid-a");
        let b = node("Pod", "b", "uid-b");
        let forward = seed_from_nodes([&a, &b].into_iter());
        let reverse = seed_from_nodes([&b, &a].into_iter());
        assert_eq!(forward, reverse);
        let different = seed_from_nodes([&a].into_iter());
        assert_ne!(forward, different);
    }

    #[test]
    fn focus_trims_beyond_hop_radius() {
        let a = node("Ingress", "a", "u1");
        let b = node("Service", "b", "u2");
        let c = node("Pod", "c", "u3");
        let d = node("Node", "d", "u4");
        let graph = TopologyGraph::assemble(
            TopologyScope::Cluster,
            node_map(&[&a, &b, &c, &d]),
            vec![
                edge(&a, &b, Relation::Routes),
                edge(&b, &c, Relation::Routes),
                edge(&c, &d, Relation::SchedulesOn),
            ],
        )
        .unwrap();

        let one_hop = graph.focus(&b.reference, 1).unwrap();
        assert_eq!(one_hop.nodes.len(), 3);
        assert!(one_hop.node(&d.reference).is_none());

        let two_hops = graph.focus(&b.reference, 2).unwrap();
        assert_eq!(two_hops.nodes.len(), 4);
    }
}
