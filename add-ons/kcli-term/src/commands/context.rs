//! ctx / ns: context switching, context groups, namespace defaults.

use crate::commands::render_table;
use crate::runtime::Runtime;
use kcli_core::{Error, Result};

const FAILURE_WARN_WINDOW_MINUTES: i64 = 30;

pub async fn ctx(
    rt: &Runtime,
    name: Option<String>,
    save_group: bool,
    delete_group: bool,
    members: Vec<String>,
) -> Result<()> {
    let state = rt.state_store.load()?;

    let Some(name) = name else {
        // No argument: list contexts, then groups.
        let contexts = rt.known_contexts()?;
        let current = rt.context().unwrap_or_default();
        let rows: Vec<Vec<String>> = contexts
            .iter()
            .map(|c| {
                let marker = if *c == current { "*" } else { "" };
                let last_failure = state
                    .failures
                    .get(c)
                    .map(|f| f.error.clone())
                    .unwrap_or_default();
                vec![marker.to_string(), c.clone(), last_failure]
            })
            .collect();
        rt.output
            .out(render_table(&["", "CONTEXT", "LAST FAILURE"], &rows).trim_end());
        if !state.groups.is_empty() {
            rt.output.out("");
            let rows: Vec<Vec<String>> = state
                .groups
                .iter()
                .map(|(g, members)| vec![g.clone(), members.join(", ")])
                .collect();
            rt.output
                .out(render_table(&["GROUP", "MEMBERS"], &rows).trim_end());
        }
        return Ok(());
    };

    if delete_group {
        rt.state_store.update(|s| {
            s.groups.remove(&name);
        })?;
        rt.output.out(format!("group '{name}' deleted"));
        return Ok(());
    }

    if save_group {
        if members.is_empty() {
            return Err(Error::InvalidArgument(
                "--save-group requires at least one member context".into(),
            ));
        }
        let known = rt.known_contexts()?;
        for member in &members {
            if !known.contains(member) {
                return Err(Error::NotFound(format!("context '{member}'")));
            }
        }
        rt.state_store.update(|s| {
            s.groups.insert(name.clone(), members.clone());
        })?;
        rt.output
            .out(format!("group '{name}' = {}", members.join(", ")));
        return Ok(());
    }

    // A group name targets every member: show reachability per member.
    if let Some(group_members) = state.groups.get(&name).cloned() {
        let mut rows = Vec::new();
        for member in group_members {
            let descriptor = kcli_core::ConnectionDescriptor {
                kubeconfig: rt.globals.kubeconfig.clone(),
                context: Some(member.clone()),
                in_cluster: false,
            };
            let status = match rt.access_for(descriptor).await {
                Ok(_) => "reachable".to_string(),
                Err(e) => e.code().to_string(),
            };
            rows.push(vec![member, status]);
        }
        rt.output
            .out(render_table(&["CONTEXT", "STATUS"], &rows).trim_end());
        return Ok(());
    }

    // Plain context switch, with failure memory surfaced first.
    let known = rt.known_contexts()?;
    if !known.contains(&name) {
        return Err(Error::NotFound(format!("context or group '{name}'")));
    }
    if let Some(failure) = state.recent_failure(
        &name,
        chrono::Duration::minutes(FAILURE_WARN_WINDOW_MINUTES),
    ) {
        rt.output.err(format!(
            "warning: '{name}' failed {} ago: {}",
            crate::commands::format_age(Some(failure.at)),
            failure.error
        ));
    }
    let mut profile = rt.profile.clone();
    profile.context.default_context = name.clone();
    rt.config_store.save(profile)?;
    rt.state_store.update(|s| s.record_context(&name))?;
    rt.output.out(format!("switched to context '{name}'"));
    Ok(())
}

pub async fn ns(rt: &Runtime, name: Option<String>) -> Result<()> {
    match name {
        None => {
            let access = rt.access().await?;
            let namespaces = access
                .list_typed_cluster::<k8s_openapi::api::core::v1::Namespace>()
                .await?;
            let current = rt.namespace().unwrap_or_default();
            let rows: Vec<Vec<String>> = namespaces
                .iter()
                .filter_map(|n| n.metadata.name.clone())
                .map(|n| {
                    let marker = if n == current { "*" } else { "" };
                    vec![marker.to_string(), n]
                })
                .collect();
            rt.output
                .out(render_table(&["", "NAMESPACE"], &rows).trim_end());
            Ok(())
        }
        Some(name) => {
            let mut profile = rt.profile.clone();
            profile.context.default_namespace = name.clone();
            rt.config_store.save(profile)?;
            rt.output.out(format!("default namespace set to '{name}'"));
            Ok(())
        }
    }
}
