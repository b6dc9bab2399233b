//! Build scopes and the size guard for cluster-wide builds.

use kcli_core::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum TopologyScope {
    Cluster,
    Namespace { namespace: String },
    Resource {
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        name: String,
        /// Hop radius, at least 1.
        hops: u32,
    },
}

impl TopologyScope {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            TopologyScope::Cluster => None,
            TopologyScope::Namespace { namespace } => Some(namespace),
            TopologyScope::Resource { namespace, .. } => namespace.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TopologyScope::Namespace { namespace } if namespace.trim().is_empty() => Err(
                Error::InvalidArgument("namespace scope requires a namespace".into()),
            ),
            TopologyScope::Resource { name, hops, .. } => {
                if name.trim().is_empty() {
                    return Err(Error::InvalidArgument(
                        "resource scope requires a name".into(),
                    ));
                }
                if *hops == 0 {
                    return Err(Error::InvalidArgument("hop radius must be >= 1".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Cluster-wide builds fail fast above the node ceiling; callers must narrow
/// the scope instead. The ceiling is operator-overrideable via config.
pub fn enforce_size_ceiling(scope: &TopologyScope, estimated_nodes: usize, ceiling: usize) -> Result<()> {
    if matches!(scope, TopologyScope::Cluster) && estimated_nodes > ceiling {
        return Err(Error::ResourceExhausted(format!(
            "estimated {estimated_nodes} nodes exceeds the cluster-wide ceiling of {ceiling}; \
             supply a namespace or resource-centred scope"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert!(TopologyScope::Cluster.validate().is_ok());
        assert!(TopologyScope::Namespace {
            namespace: " ".into()
        }
        .validate()
        .is_err());
        assert!(TopologyScope::Resource {
            kind: "Pod".into(),
            namespace: Some("ns".into()),
            name: "api".into(),
            hops: 0,
        }
        .validate()
        .is_err());
    }

    #[test]
    fn ceiling_applies_only_to_cluster_scope() {
        assert!(enforce_size_ceiling(&TopologyScope::Cluster, 10_000, 5000).is_err());
        assert!(enforce_size_ceiling(&TopologyScope::Cluster, 100, 5000).is_ok());
        let ns = TopologyScope::Namespace {
            namespace: "payments".into(),
        };
        assert!(enforce_size_ceiling(&ns, 10_000, 5000).is_ok());
    }
}
