//! Topology build and export endpoints.

use crate::middleware::RequestId;
use crate::routes::{err, etagged_json, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use kcli_core::{CacheKey, CacheShape, Error};
use kcli_topology::{collect, TopologyBuilder, TopologyGraph, TopologyScope};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    /// "cluster" | "namespace" | "resource"; inferred from the other
    /// parameters when omitted.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hop: Option<u32>,
}

impl TopologyQuery {
    fn to_scope(&self) -> Result<TopologyScope, Error> {
        let scope = match self.scope.as_deref() {
            Some("resource") => TopologyScope::Resource {
                kind: self
                    .kind
                    .clone()
                    .ok_or_else(|| Error::InvalidArgument("resource scope requires kind".into()))?,
                namespace: self.namespace.clone(),
                name: self
                    .name
                    .clone()
                    .ok_or_else(|| Error::InvalidArgument("resource scope requires name".into()))?,
                hops: self.hop.unwrap_or(1),
            },
            Some("namespace") => TopologyScope::Namespace {
                namespace: self.namespace.clone().ok_or_else(|| {
                    Error::InvalidArgument("namespace scope requires namespace".into())
                })?,
            },
            Some("cluster") => TopologyScope::Cluster,
            Some(other) => {
                return Err(Error::InvalidArgument(format!("unknown scope '{other}'")))
            }
            None => match (&self.name, &self.namespace) {
                (Some(name), _) => TopologyScope::Resource {
                    kind: self.kind.clone().ok_or_else(|| {
                        Error::InvalidArgument("resource scope requires kind".into())
                    })?,
                    namespace: self.namespace.clone(),
                    name: name.clone(),
                    hops: self.hop.unwrap_or(1),
                },
                (None, Some(namespace)) => TopologyScope::Namespace {
                    namespace: namespace.clone(),
                },
                (None, None) => TopologyScope::Cluster,
            },
        };
        scope.validate()?;
        Ok(scope)
    }
}

async fn build_graph(
    state: &AppState,
    cluster_id: &str,
    scope: &TopologyScope,
) -> Result<TopologyGraph, Error> {
    let access = state.access(cluster_id).await?;
    let started = std::time::Instant::now();
    let snapshot = collect(&access, scope).await?;
    let builder = TopologyBuilder::new(cluster_id, state.settings.topology_node_ceiling);
    let graph = builder.build(scope, &snapshot)?;
    state
        .metrics
        .topology_build_duration
        .with_label_values(&[cluster_id])
        .observe(started.elapsed().as_secs_f64());
    Ok(graph)
}

fn topology_cache_key(cluster_id: &str, scope: &TopologyScope) -> CacheKey {
    CacheKey {
        cluster: cluster_id.to_string(),
        namespace: scope.namespace().map(str::to_string),
        kinds: Vec::new(),
        filters: serde_json::to_string(scope).unwrap_or_default(),
        shape: CacheShape::Topology,
    }
}

pub async fn build(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
    Query(query): Query<TopologyQuery>,
    headers: axum::http::HeaderMap,
) -> ApiResult<axum::response::Response> {
    let scope = query.to_scope().map_err(|e| err(e, &rid))?;
    let key = topology_cache_key(&id, &scope);
    let value = state
        .cache
        .get_or_build(&key, state.settings.cache_ttl, || async {
            let graph = build_graph(&state, &id, &scope).await?;
            serde_json::to_value(&graph).map_err(|e| Error::Internal(format!("encode: {e}")))
        })
        .await
        .map_err(|e| err(e, &rid))?;
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    Ok(etagged_json(
        &value.fingerprint,
        if_none_match,
        value.body.clone(),
        &rid,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    /// "svg" is rendered here; "png" and "pdf" need a rasterizer and are
    /// owned by the desktop shell.
    pub format: String,
    #[serde(flatten)]
    pub query: TopologyQuery,
}

pub async fn export(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
    Json(body): Json<ExportRequest>,
) -> ApiResult<axum::response::Response> {
    match body.format.to_lowercase().as_str() {
        "svg" => {}
        "png" | "pdf" => {
            return Err(err(
                Error::FailedPrecondition(format!(
                    "{} export is not served by the gateway; request svg",
                    body.format
                )),
                &rid,
            ))
        }
        other => {
            return Err(err(
                Error::InvalidArgument(format!("unknown export format '{other}'")),
                &rid,
            ))
        }
    }
    let scope = body.query.to_scope().map_err(|e| err(e, &rid))?;
    let graph = build_graph(&state, &id, &scope)
        .await
        .map_err(|e| err(e, &rid))?;
    let svg = render_svg(&graph);
    Ok((
        [(header::CONTENT_TYPE, "image/svg+xml")],
        svg,
    )
        .into_response())
}

/// Deterministic radial layout: nodes sorted by reference, start angle from
/// the layout seed. The same graph always renders the same picture.
pub fn render_svg(graph: &TopologyGraph) -> String {
    const SIZE: f64 = 900.0;
    const MARGIN: f64 = 80.0;
    let count = graph.nodes.len().max(1) as f64;
    let radius = (SIZE / 2.0) - MARGIN;
    let centre = SIZE / 2.0;
    let start_angle = (graph.layout_seed % 360) as f64 * std::f64::consts::PI / 180.0;

    let position = |index: usize| -> (f64, f64) {
        let angle = start_angle + (index as f64 / count) * std::f64::consts::TAU;
        (centre + radius * angle.cos(), centre + radius * angle.sin())
    };
    let index_of = |reference: &kcli_core::ResourceRef| -> Option<usize> {
        graph.nodes.iter().position(|n| &n.reference == reference)
    };

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{SIZE}\" height=\"{SIZE}\" viewBox=\"0 0 {SIZE} {SIZE}\">\n"
    ));
    for edge in &graph.edges {
        let (Some(si), Some(ti)) = (index_of(&edge.source), index_of(&edge.target)) else {
            continue;
        };
        let (x1, y1) = position(si);
        let (x2, y2) = position(ti);
        svg.push_str(&format!(
            "  <line x1=\"{x1:.1}\" y1=\"{y1:.1}\" x2=\"{x2:.1}\" y2=\"{y2:.1}\" stroke=\"#8a8a8a\" stroke-width=\"1\" opacity=\"{:.2}\"/>\n",
            edge.confidence
        ));
    }
    for (i, node) in graph.nodes.iter().enumerate() {
        let (x, y) = position(i);
        let fill = match node.health {
            kcli_topology::Health::Healthy => "#2e7d32",
            kcli_topology::Health::Warning => "#f9a825",
            kcli_topology::Health::Critical => "#c62828",
            kcli_topology::Health::Unknown => "#757575",
        };
        svg.push_str(&format!(
            "  <circle cx=\"{x:.1}\" cy=\"{y:.1}\" r=\"14\" fill=\"{fill}\"/>\n"
        ));
        svg.push_str(&format!(
            "  <text x=\"{x:.1}\" y=\"{:.1}\" font-size=\"10\" text-anchor=\"middle\">{}/{}</text>\n",
            y + 26.0,
            xml_escape(&node.reference.kind),
            xml_escape(&node.reference.name)
        ));
    }
    svg.push_str("</svg>\n");
    svg
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_inference() {
        let q = TopologyQuery {
            namespace: Some("payments".into()),
            scope: None,
            kind: None,
            name: None,
            hop: None,
        };
        assert_eq!(
            q.to_scope().unwrap(),
            TopologyScope::Namespace {
                namespace: "payments".into()
            }
        );

        let q = TopologyQuery {
            namespace: Some("payments".into()),
            scope: None,
            kind: Some("Pod".into()),
            name: Some("api-1".into()),
            hop: Some(2),
        };
        match q.to_scope().unwrap() {
            TopologyScope::Resource { hops, .. } => assert_eq!(hops, 2),
            other => panic!("unexpected scope {other:?}"),
        }

        let q = TopologyQuery {
            namespace: None,
            scope: Some("warp".into()),
            kind: None,
            name: None,
            hop: None,
        };
        assert!(q.to_scope().is_err());
    }
}
