//! kcli-topology: builds a directed relationship graph from resource
//! snapshots, with deterministic layout seeding, scoped subgraphs and
//! structural validation.

pub mod build;
pub mod graph;
pub mod health;
pub mod scope;

pub use build::{collect, ResourceSnapshot, TopologyBuilder};
pub use graph::{
    seed_from_nodes, Derivation, Health, OwnerInfo, Relation, ReplicaCounts, TopologyEdge,
    TopologyGraph, TopologyNode,
};
pub use scope::{enforce_size_ceiling, TopologyScope};
