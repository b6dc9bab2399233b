//! Status-derived health per kind.
//!
//! Rules:
//! - Pod: phase Succeeded/Running with all containers ready => Healthy;
//!   Running with unready containers or Pending => Warning; Failed => Critical.
//! - Workloads (Deployment, StatefulSet, ReplicaSet, DaemonSet): ready ==
//!   desired => Healthy; 0 ready with desired > 0 => Critical; else Warning.
//! - Node: Ready condition True => Healthy, otherwise Critical.
//! - Passive kinds (Service, ConfigMap, volumes, namespaces) carry no failing
//!   status of their own and report Healthy when present.

use crate::graph::{Health, ReplicaCounts};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Node, Pod};

pub fn pod_health(pod: &Pod) -> Health {
    let Some(status) = &pod.status else {
        return Health::Unknown;
    };
    match status.phase.as_deref() {
        Some("Succeeded") => Health::Healthy,
        Some("Failed") => Health::Critical,
        Some("Pending") => Health::Warning,
        Some("Running") => {
            let all_ready = status
                .container_statuses
                .as_ref()
                .map(|cs| cs.iter().all(|c| c.ready))
                .unwrap_or(false);
            if all_ready {
                Health::Healthy
            } else {
                Health::Warning
            }
        }
        _ => Health::Unknown,
    }
}

fn replica_health(counts: ReplicaCounts) -> Health {
    if counts.desired == 0 || counts.ready >= counts.desired {
        Health::Healthy
    } else if counts.ready == 0 {
        Health::Critical
    } else {
        Health::Warning
    }
}

pub fn deployment_counts(d: &Deployment) -> ReplicaCounts {
    ReplicaCounts {
        desired: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
        ready: d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
    }
}

pub fn deployment_health(d: &Deployment) -> Health {
    replica_health(deployment_counts(d))
}

pub fn stateful_set_counts(s: &StatefulSet) -> ReplicaCounts {
    ReplicaCounts {
        desired: s.spec.as_ref().and_then(|sp| sp.replicas).unwrap_or(1),
        ready: s.status.as_ref().and_then(|st| st.ready_replicas).unwrap_or(0),
    }
}

pub fn stateful_set_health(s: &StatefulSet) -> Health {
    replica_health(stateful_set_counts(s))
}

pub fn replica_set_counts(r: &ReplicaSet) -> ReplicaCounts {
    ReplicaCounts {
        desired: r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        ready: r.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
    }
}

pub fn replica_set_health(r: &ReplicaSet) -> Health {
    replica_health(replica_set_counts(r))
}

pub fn daemon_set_counts(d: &DaemonSet) -> ReplicaCounts {
    let status = d.status.as_ref();
    ReplicaCounts {
        desired: status.map(|s| s.desired_number_scheduled).unwrap_or(0),
        ready: status.map(|s| s.number_ready).unwrap_or(0),
    }
}

pub fn daemon_set_health(d: &DaemonSet) -> Health {
    replica_health(daemon_set_counts(d))
}

pub fn node_health(node: &Node) -> Health {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True");
    match ready {
        Some(true) => Health::Healthy,
        Some(false) => Health::Critical,
        None => Health::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(phase: &str, ready: bool) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": "p", "namespace": "ns", "uid": "u"},
            "status": {
                "phase": phase,
                "containerStatuses": [{"name": "c", "ready": ready, "restartCount": 0, "image": "i", "imageID": ""}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn pod_rules() {
        assert_eq!(pod_health(&pod("Running", true)), Health::Healthy);
        assert_eq!(pod_health(&pod("Running", false)), Health::Warning);
        assert_eq!(pod_health(&pod("Pending", false)), Health::Warning);
        assert_eq!(pod_health(&pod("Failed", false)), Health::Critical);
    }

    #[test]
    fn workload_rules() {
        let d: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "d", "namespace": "ns", "uid": "u"},
            "spec": {"replicas": 3, "selector": {"matchLabels": {"app": "x"}}, "template": {}},
            "status": {"readyReplicas": 3}
        }))
        .unwrap();
        assert_eq!(deployment_health(&d), Health::Healthy);

        let degraded: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "d", "namespace": "ns", "uid": "u"},
            "spec": {"replicas": 3, "selector": {"matchLabels": {"app": "x"}}, "template": {}},
            "status": {"readyReplicas": 1}
        }))
        .unwrap();
        assert_eq!(deployment_health(&degraded), Health::Warning);

        let down: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "d", "namespace": "ns", "uid": "u"},
            "spec": {"replicas": 3, "selector": {"matchLabels": {"app": "x"}}, "template": {}},
            "status": {}
        }))
        .unwrap();
        assert_eq!(deployment_health(&down), Health::Critical);
    }

    #[test]
    fn node_rules() {
        let ready: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1", "uid": "u"},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }))
        .unwrap();
        assert_eq!(node_health(&ready), Health::Healthy);

        let not_ready: Node = serde_json::from_value(json!({
            "metadata": {"name": "n1", "uid": "u"},
            "status": {"conditions": [{"type": "Ready", "status": "False"}]}
        }))
        .unwrap();
        assert_eq!(node_health(&not_ready), Health::Critical);
    }
}
