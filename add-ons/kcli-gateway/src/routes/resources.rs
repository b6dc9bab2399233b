//! Resource read/apply/delete endpoints. Cluster-scoped kinds use `-` in the
//! namespace path segment.

use crate::middleware::RequestId;
use crate::routes::{err, etagged_json, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use kcli_core::{CacheKey, CacheShape, Error, ListQuery};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListParamsQuery {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, rename = "labelSelector")]
    pub label_selector: Option<String>,
    #[serde(default, rename = "fieldSelector")]
    pub field_selector: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default, rename = "continue")]
    pub continue_token: Option<String>,
}

fn ns_segment(ns: &str) -> Option<String> {
    (ns != "-").then(|| ns.to_string())
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path((id, kind)): Path<(String, String)>,
    Query(params): Query<ListParamsQuery>,
    headers: axum::http::HeaderMap,
) -> ApiResult<axum::response::Response> {
    let query = ListQuery {
        namespace: params.namespace.clone(),
        label_selector: params.label_selector.clone(),
        field_selector: params.field_selector.clone(),
        limit: params.limit,
        continue_token: params.continue_token.clone(),
    };

    // Continuation pages are not cached; each token is a one-shot cursor.
    if query.continue_token.is_some() {
        let access = state.access(&id).await.map_err(|e| err(e, &rid))?;
        let page = access.list(&kind, &query).await.map_err(|e| err(e, &rid))?;
        return Ok(Json(serde_json::json!({
            "items": page.items,
            "continue": page.continue_token,
        }))
        .into_response());
    }

    let key = CacheKey {
        cluster: id.clone(),
        namespace: query.namespace.clone(),
        kinds: vec![kind.clone()],
        filters: format!(
            "l={};f={};n={}",
            query.label_selector.as_deref().unwrap_or(""),
            query.field_selector.as_deref().unwrap_or(""),
            query.limit.unwrap_or(0)
        ),
        shape: CacheShape::List,
    };
    let value = state
        .cache
        .get_or_build(&key, state.settings.cache_ttl, || async {
            let access = state.access(&id).await?;
            let page = access.list(&kind, &query).await?;
            Ok(serde_json::json!({
                "items": page.items,
                "continue": page.continue_token,
            }))
        })
        .await
        .map_err(|e| err(e, &rid))?;
    let if_none_match = headers
        .get(axum::http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    Ok(etagged_json(
        &value.fingerprint,
        if_none_match,
        value.body.clone(),
        &rid,
    ))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path((id, kind, ns, name)): Path<(String, String, String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let access = state.access(&id).await.map_err(|e| err(e, &rid))?;
    let obj = access
        .get(&kind, ns_segment(&ns).as_deref(), &name)
        .await
        .map_err(|e| err(e, &rid))?;
    Ok(Json(serde_json::to_value(obj).map_err(|e| {
        err(Error::Internal(format!("encode: {e}")), &rid)
    })?))
}

/// Server-side apply. The body is a single YAML or JSON document whose
/// kind/namespace/name must agree with the path.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path((id, kind, ns, name)): Path<(String, String, String, String)>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let doc: serde_json::Value = serde_yaml::from_str(&body)
        .map_err(|e| err(Error::InvalidArgument(format!("body parse: {e}")), &rid))?;
    let doc_kind = doc.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
    let doc_name = doc
        .pointer("/metadata/name")
        .and_then(|n| n.as_str())
        .unwrap_or_default();
    let kinds_agree = match (
        kcli_core::ResourceKind::parse(&kind),
        kcli_core::ResourceKind::parse(doc_kind),
    ) {
        (Ok(a), Ok(b)) => a == b,
        // Unknown (CRD) kinds fall back to a case-insensitive name check.
        _ => doc_kind.eq_ignore_ascii_case(&kind),
    };
    if !kinds_agree {
        return Err(err(
            Error::InvalidArgument(format!("body kind '{doc_kind}' does not match path '{kind}'")),
            &rid,
        ));
    }
    if doc_name != name {
        return Err(err(
            Error::InvalidArgument(format!("body name '{doc_name}' does not match path '{name}'")),
            &rid,
        ));
    }
    let access = state.access(&id).await.map_err(|e| err(e, &rid))?;
    let applied = access.apply(&body).await.map_err(|e| err(e, &rid))?;
    // The watch stream will invalidate too, but do it synchronously so an
    // immediate re-read does not serve the stale entry.
    state
        .cache
        .invalidate(&id, ns_segment(&ns).as_deref(), doc_kind);
    Ok(Json(serde_json::to_value(applied).map_err(|e| {
        err(Error::Internal(format!("encode: {e}")), &rid)
    })?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default, rename = "gracePeriod")]
    pub grace_period: Option<u32>,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path((id, kind, ns, name)): Path<(String, String, String, String)>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let access = state.access(&id).await.map_err(|e| err(e, &rid))?;
    access
        .delete(&kind, ns_segment(&ns).as_deref(), &name, query.grace_period)
        .await
        .map_err(|e| err(e, &rid))?;
    state
        .cache
        .invalidate(&id, ns_segment(&ns).as_deref(), &kind);
    Ok(Json(serde_json::json!({"deleted": name})))
}
