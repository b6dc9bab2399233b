//! get / describe / yaml / logs / exec.

use crate::commands::{format_age, render_table};
use crate::runtime::Runtime;
use futures_util::StreamExt;
use kcli_core::{Error, ListQuery, ResourceKind, Result};
use kube::api::DynamicObject;

fn creation_time(obj: &DynamicObject) -> Option<chrono::DateTime<chrono::Utc>> {
    obj.metadata.creation_timestamp.as_ref().map(|t| crate::commands::jiff_to_chrono(t.0))
}

/// Pod rows carry ready/status/restarts; everything else gets the generic
/// name/namespace/age columns.
fn pod_row(obj: &DynamicObject) -> Vec<String> {
    let status = &obj.data["status"];
    let phase = status["phase"].as_str().unwrap_or("Unknown").to_string();
    let empty = Vec::new();
    let containers = status["containerStatuses"].as_array().unwrap_or(&empty);
    let ready = containers.iter().filter(|c| c["ready"] == true).count();
    let restarts: i64 = containers
        .iter()
        .map(|c| c["restartCount"].as_i64().unwrap_or(0))
        .sum();
    vec![
        obj.metadata.name.clone().unwrap_or_default(),
        obj.metadata.namespace.clone().unwrap_or_default(),
        format!("{ready}/{}", containers.len()),
        phase,
        restarts.to_string(),
        format_age(creation_time(obj)),
    ]
}

pub async fn get(
    rt: &Runtime,
    kind: &str,
    name: Option<&str>,
    output: Option<&str>,
    selector: Option<&str>,
) -> Result<()> {
    let access = rt.access().await?;
    let parsed = ResourceKind::parse(kind).ok();
    let namespace = rt.namespace();

    if let Some(name) = name {
        let obj = access.get(kind, namespace.as_deref(), name).await?;
        match output.unwrap_or("yaml") {
            "json" => rt.output.out(serde_json::to_string_pretty(&obj)?),
            _ => rt.output.out(serde_yaml::to_string(&obj)?),
        }
        return Ok(());
    }

    let query = ListQuery {
        namespace: namespace.clone(),
        label_selector: selector.map(str::to_string),
        ..Default::default()
    };
    let items = access.list_all(kind, &query).await?;

    match output {
        Some("json") => {
            rt.output.out(serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        Some("yaml") => {
            rt.output.out(serde_yaml::to_string(&items)?);
            return Ok(());
        }
        _ => {}
    }

    let table = if parsed == Some(ResourceKind::Pod) {
        let rows: Vec<Vec<String>> = items.iter().map(pod_row).collect();
        render_table(
            &["NAME", "NAMESPACE", "READY", "STATUS", "RESTARTS", "AGE"],
            &rows,
        )
    } else {
        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|obj| {
                vec![
                    obj.metadata.name.clone().unwrap_or_default(),
                    obj.metadata.namespace.clone().unwrap_or_default(),
                    format_age(creation_time(obj)),
                ]
            })
            .collect();
        render_table(&["NAME", "NAMESPACE", "AGE"], &rows)
    };
    rt.output.out(table.trim_end());
    Ok(())
}

pub async fn describe(rt: &Runtime, kind: &str, name: &str) -> Result<()> {
    let access = rt.access().await?;
    let obj = access.get(kind, rt.namespace().as_deref(), name).await?;

    let mut out = String::new();
    out.push_str(&format!(
        "Name:       {}\n",
        obj.metadata.name.as_deref().unwrap_or("")
    ));
    if let Some(ns) = &obj.metadata.namespace {
        out.push_str(&format!("Namespace:  {ns}\n"));
    }
    out.push_str(&format!(
        "Created:    {}\n",
        obj.metadata
            .creation_timestamp
            .as_ref()
            .map(|t| crate::commands::jiff_to_chrono(t.0).to_rfc3339())
            .unwrap_or_else(|| "<unknown>".into())
    ));
    if let Some(labels) = &obj.metadata.labels {
        out.push_str("Labels:\n");
        for (k, v) in labels {
            out.push_str(&format!("  {k}={v}\n"));
        }
    }
    if let Some(owners) = &obj.metadata.owner_references {
        if !owners.is_empty() {
            out.push_str("Owners:\n");
            for o in owners {
                out.push_str(&format!("  {}/{}\n", o.kind, o.name));
            }
        }
    }
    if let Some(conditions) = obj.data["status"]["conditions"].as_array() {
        out.push_str("Conditions:\n");
        for c in conditions {
            out.push_str(&format!(
                "  {:<24} {:<6} {}\n",
                c["type"].as_str().unwrap_or(""),
                c["status"].as_str().unwrap_or(""),
                c["message"].as_str().unwrap_or("")
            ));
        }
    }
    rt.output.out(out.trim_end());
    Ok(())
}

pub async fn yaml(rt: &Runtime, kind: &str, name: &str) -> Result<()> {
    let access = rt.access().await?;
    let obj = access.get(kind, rt.namespace().as_deref(), name).await?;
    rt.output.out(serde_yaml::to_string(&obj)?.trim_end());
    Ok(())
}

pub async fn logs(
    rt: &Runtime,
    pod: &str,
    container: Option<String>,
    follow: bool,
    tail: Option<i64>,
) -> Result<()> {
    let namespace = rt
        .namespace()
        .ok_or_else(|| Error::InvalidArgument("logs requires a namespace (-n)".into()))?;
    let access = rt.access().await?;
    if follow {
        let stream = access
            .pod_log_stream(&namespace, pod, container, tail.or(Some(50)))
            .await?;
        let mut stream = std::pin::pin!(stream);
        while let Some(line) = stream.next().await {
            match line {
                Ok(line) => rt.output.out(line),
                Err(e) => {
                    rt.output.err(format!("log stream ended: {e}"));
                    break;
                }
            }
        }
        Ok(())
    } else {
        let text = access
            .pod_logs(&namespace, pod, container, tail.or(Some(200)))
            .await?;
        rt.output.out(text.trim_end());
        Ok(())
    }
}

/// Opens a PTY session by delegating terminal handling to the upstream CLI;
/// kcli contributes context/namespace plumbing.
pub async fn exec(
    rt: &Runtime,
    pod: &str,
    container: Option<String>,
    command: Vec<String>,
) -> Result<i32> {
    let mut args: Vec<String> = vec!["exec".into(), "-it".into(), pod.into()];
    if let Some(c) = container {
        args.push("-c".into());
        args.push(c);
    }
    if let Some(ns) = rt.namespace() {
        args.push("-n".into());
        args.push(ns);
    }
    if let Some(context) = rt.context() {
        args.push("--context".into());
        args.push(context);
    }
    args.push("--".into());
    if command.is_empty() {
        args.push("/bin/sh".into());
    } else {
        args.extend(command);
    }
    let plan = crate::passthrough::PassthroughPlan {
        program: std::env::var("KCLI_KUBECTL").unwrap_or_else(|_| "kubectl".to_string()),
        args,
        needs_confirmation: false,
        verb: "exec".into(),
    };
    crate::passthrough::run(&plan).await
}
