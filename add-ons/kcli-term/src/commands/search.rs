//! Cross-context substring search with partial-failure semantics: the search
//! succeeds when at least one context answers, and per-context failures are
//! reported inline.

use crate::commands::render_table;
use crate::runtime::Runtime;
use kcli_core::{ConnectionDescriptor, Error, ListQuery, Result};

const SEARCH_KINDS: &[&str] = &["pods", "deployments", "services", "configmaps", "ingresses"];

struct ContextHits {
    context: String,
    hits: Vec<(String, String, String)>,
    error: Option<Error>,
}

async fn search_context(rt: &Runtime, context: String, query: String, kind: Option<String>) -> ContextHits {
    let descriptor = ConnectionDescriptor {
        kubeconfig: rt.globals.kubeconfig.clone(),
        context: Some(context.clone()),
        in_cluster: false,
    };
    let access = match rt.access_for(descriptor).await {
        Ok(access) => access,
        Err(e) => {
            return ContextHits {
                context,
                hits: Vec::new(),
                error: Some(e),
            }
        }
    };
    let kinds: Vec<&str> = match &kind {
        Some(k) => vec![k.as_str()],
        None => SEARCH_KINDS.to_vec(),
    };
    let needle = query.to_lowercase();
    let mut hits = Vec::new();
    let mut error = None;
    for kind in kinds {
        match access.list_all(kind, &ListQuery::default()).await {
            Ok(items) => {
                for obj in items {
                    let name = obj.metadata.name.clone().unwrap_or_default();
                    if name.to_lowercase().contains(&needle) {
                        hits.push((
                            kind.to_string(),
                            obj.metadata.namespace.clone().unwrap_or_default(),
                            name,
                        ));
                    }
                }
            }
            Err(e) => error = Some(e),
        }
    }
    ContextHits {
        context,
        hits,
        error,
    }
}

pub async fn search(rt: &Runtime, query: &str, kind: Option<String>) -> Result<()> {
    let contexts = rt.known_contexts()?;
    if contexts.is_empty() {
        return Err(Error::FailedPrecondition("no contexts in kubeconfig".into()));
    }

    // One task per context; a slow or broken cluster only affects its own row.
    let mut tasks = Vec::new();
    for context in contexts {
        tasks.push(search_context(rt, context, query.to_string(), kind.clone()));
    }
    let results = futures_util::future::join_all(tasks).await;

    let mut rows = Vec::new();
    let mut successes = 0usize;
    for result in &results {
        match &result.error {
            Some(e) if result.hits.is_empty() => {
                rows.push(vec![
                    result.context.clone(),
                    "-".into(),
                    "-".into(),
                    "-".into(),
                    e.code().to_string(),
                ]);
            }
            _ => {
                successes += 1;
                for (kind, ns, name) in &result.hits {
                    rows.push(vec![
                        result.context.clone(),
                        kind.clone(),
                        ns.clone(),
                        name.clone(),
                        "ok".into(),
                    ]);
                }
                if result.hits.is_empty() {
                    rows.push(vec![
                        result.context.clone(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        "no matches".into(),
                    ]);
                }
            }
        }
    }

    rt.output.out(
        render_table(&["CONTEXT", "KIND", "NAMESPACE", "NAME", "STATUS"], &rows).trim_end(),
    );

    if successes == 0 {
        return Err(Error::Unavailable(
            "search failed in every context".into(),
        ));
    }
    Ok(())
}
