//! End-to-end graph build over a hand-made namespace snapshot: a deployment
//! fronted by a service and an ingress, a mounted config map, three pods on
//! one node.

use kcli_topology::{Relation, ResourceSnapshot, TopologyBuilder, TopologyScope};
use serde_json::json;

fn snapshot() -> ResourceSnapshot {
    let deployment = json!({
        "metadata": {
            "name": "api", "namespace": "payments", "uid": "uid-deploy",
            "labels": {"app": "api"}
        },
        "spec": {
            "replicas": 3,
            "selector": {"matchLabels": {"app": "api"}},
            "template": {"metadata": {"labels": {"app": "api"}}}
        },
        "status": {"readyReplicas": 3}
    });
    let service = json!({
        "metadata": {"name": "api", "namespace": "payments", "uid": "uid-svc"},
        "spec": {
            "selector": {"app": "api"},
            "ports": [{"port": 80, "targetPort": 8080}]
        }
    });
    let ingress = json!({
        "metadata": {"name": "api", "namespace": "payments", "uid": "uid-ing"},
        "spec": {
            "rules": [{
                "http": {"paths": [{
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": {"service": {"name": "api", "port": {"number": 80}}}
                }]}
            }]
        }
    });
    let config_map = json!({
        "metadata": {"name": "api-cfg", "namespace": "payments", "uid": "uid-cm"}
    });
    let node = json!({
        "metadata": {"name": "n1", "uid": "uid-node"},
        "status": {"conditions": [{"type": "Ready", "status": "True"}]}
    });
    let namespace = json!({
        "metadata": {"name": "payments", "uid": "uid-ns"}
    });
    let pod = |i: u32| {
        json!({
            "metadata": {
                "name": format!("api-{i}"), "namespace": "payments", "uid": format!("uid-pod-{i}"),
                "labels": {"app": "api"},
                "ownerReferences": [{
                    "apiVersion": "apps/v1", "kind": "Deployment",
                    "name": "api", "uid": "uid-deploy"
                }]
            },
            "spec": {
                "nodeName": "n1",
                "volumes": [{"name": "cfg", "configMap": {"name": "api-cfg"}}],
                "containers": [{"name": "api", "image": "api:1"}]
            },
            "status": {
                "phase": "Running",
                "containerStatuses": [{
                    "name": "api", "ready": true, "restartCount": 0,
                    "image": "api:1", "imageID": ""
                }]
            }
        })
    };

    ResourceSnapshot {
        namespaces: vec![serde_json::from_value(namespace).unwrap()],
        nodes: vec![serde_json::from_value(node).unwrap()],
        pods: (1..=3)
            .map(|i| serde_json::from_value(pod(i)).unwrap())
            .collect(),
        deployments: vec![serde_json::from_value(deployment).unwrap()],
        services: vec![serde_json::from_value(service).unwrap()],
        ingresses: vec![serde_json::from_value(ingress).unwrap()],
        config_maps: vec![serde_json::from_value(config_map).unwrap()],
        ..Default::default()
    }
}

#[test]
fn namespace_scope_builds_the_expected_graph() {
    let builder = TopologyBuilder::new("prod", 5000);
    let scope = TopologyScope::Namespace {
        namespace: "payments".into(),
    };
    let graph = builder.build(&scope, &snapshot()).unwrap();

    assert_eq!(graph.nodes.len(), 9, "deployment, service, ingress, config map, 3 pods, node, namespace");
    assert_eq!(graph.edges.len(), 12);
    assert_eq!(graph.edge_count_by_relation(Relation::Owns), 3);
    assert_eq!(graph.edge_count_by_relation(Relation::Selects), 1);
    assert_eq!(graph.edge_count_by_relation(Relation::Routes), 2);
    assert_eq!(graph.edge_count_by_relation(Relation::Mounts), 3);
    assert_eq!(graph.edge_count_by_relation(Relation::SchedulesOn), 3);

    for edge in &graph.edges {
        match edge.relation {
            Relation::Selects => assert_eq!(edge.confidence, 0.9),
            Relation::Routes if edge.source.kind == "Service" => {
                assert_eq!(edge.confidence, 0.9)
            }
            _ => assert_eq!(edge.confidence, 1.0),
        }
    }
    graph.validate().unwrap();
}

#[test]
fn rebuild_is_deterministic() {
    let builder = TopologyBuilder::new("prod", 5000);
    let scope = TopologyScope::Namespace {
        namespace: "payments".into(),
    };
    let snap = snapshot();
    let first = builder.build(&scope, &snap).unwrap();
    let second = builder.build(&scope, &snap).unwrap();

    assert_eq!(first.layout_seed, second.layout_seed);
    let refs = |g: &kcli_topology::TopologyGraph| {
        g.nodes
            .iter()
            .map(|n| n.reference.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(refs(&first), refs(&second));
    assert_eq!(first.edges.len(), second.edges.len());
    for (a, b) in first.edges.iter().zip(second.edges.iter()) {
        assert_eq!(a, b);
    }
}

#[test]
fn resource_scope_centres_on_the_service()
{
    let builder = TopologyBuilder::new("prod", 5000);
    let scope = TopologyScope::Resource {
        kind: "Service".into(),
        namespace: Some("payments".into()),
        name: "api".into(),
        hops: 1,
    };
    let graph = builder.build(&scope, &snapshot()).unwrap();
    // One hop from the service: the ingress and the deployment.
    assert_eq!(graph.nodes.len(), 3);
    assert!(graph.nodes.iter().any(|n| n.reference.kind == "Ingress"));
    assert!(graph.nodes.iter().any(|n| n.reference.kind == "Deployment"));
}

#[test]
fn cluster_scope_over_ceiling_is_rejected() {
    let builder = TopologyBuilder::new("prod", 5);
    let out = builder.build(&TopologyScope::Cluster, &snapshot());
    assert!(matches!(
        out,
        Err(kcli_core::Error::ResourceExhausted(_))
    ));
}
