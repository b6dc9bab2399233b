//! restarts / events / incident aggregation.

use crate::commands::{format_age, parse_window, render_table};
use crate::runtime::Runtime;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Pod};
use kcli_core::Result;
use serde::Serialize;

fn event_time(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| crate::commands::jiff_to_chrono(t.0))
        .or_else(|| event.event_time.as_ref().map(|t| crate::commands::jiff_to_chrono(t.0)))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| crate::commands::jiff_to_chrono(t.0)))
}

#[derive(Debug, Serialize)]
struct RestartReport {
    pod: String,
    namespace: String,
    container: String,
    restarts: i32,
    last_state: String,
}

fn restart_reports(pods: &[Pod], threshold: i32, cutoff: Option<DateTime<Utc>>) -> Vec<RestartReport> {
    let mut reports = Vec::new();
    for pod in pods {
        let Some(statuses) = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref())
        else {
            continue;
        };
        for cs in statuses {
            if cs.restart_count >= threshold {
                // Containers whose last restart predates the window are old
                // news; ones with no timestamp are kept.
                let finished = cs
                    .last_state
                    .as_ref()
                    .and_then(|s| s.terminated.as_ref())
                    .and_then(|t| t.finished_at.as_ref())
                    .map(|t| crate::commands::jiff_to_chrono(t.0));
                if let (Some(cutoff), Some(finished)) = (cutoff, finished) {
                    if finished < cutoff {
                        continue;
                    }
                }
                let last_state = cs
                    .last_state
                    .as_ref()
                    .and_then(|s| s.terminated.as_ref())
                    .and_then(|t| t.reason.clone())
                    .unwrap_or_default();
                reports.push(RestartReport {
                    pod: pod.metadata.name.clone().unwrap_or_default(),
                    namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                    container: cs.name.clone(),
                    restarts: cs.restart_count,
                    last_state,
                });
            }
        }
    }
    reports.sort_by(|a, b| b.restarts.cmp(&a.restarts));
    reports
}

pub async fn restarts(rt: &Runtime, recent: &str, threshold: i32) -> Result<()> {
    let window = parse_window(recent)?;
    let access = rt.access().await?;
    let pods = access.list_typed::<Pod>(rt.namespace().as_deref()).await?;
    let reports = restart_reports(&pods, threshold.max(1), Some(Utc::now() - window));
    if reports.is_empty() {
        rt.output.out("no pods over the restart threshold");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| {
            vec![
                r.pod.clone(),
                r.namespace.clone(),
                r.container.clone(),
                r.restarts.to_string(),
                r.last_state.clone(),
            ]
        })
        .collect();
    rt.output.out(
        render_table(
            &["POD", "NAMESPACE", "CONTAINER", "RESTARTS", "LAST STATE"],
            &rows,
        )
        .trim_end(),
    );
    Ok(())
}

pub async fn events(rt: &Runtime, recent: &str, output: Option<&str>) -> Result<()> {
    let window = parse_window(recent)?;
    let access = rt.access().await?;
    let cutoff = Utc::now() - window;
    let mut events: Vec<Event> = access
        .events(rt.namespace().as_deref())
        .await?
        .into_iter()
        .filter(|e| event_time(e).map(|t| t >= cutoff).unwrap_or(false))
        .collect();
    events.sort_by_key(|e| std::cmp::Reverse(event_time(e)));

    if output == Some("json") {
        rt.output.out(serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|e| {
            vec![
                format_age(event_time(e)),
                e.type_.clone().unwrap_or_default(),
                e.reason.clone().unwrap_or_default(),
                format!(
                    "{}/{}",
                    e.involved_object.kind.clone().unwrap_or_default(),
                    e.involved_object.name.clone().unwrap_or_default()
                ),
                e.message.clone().unwrap_or_default(),
            ]
        })
        .collect();
    rt.output.out(
        render_table(&["AGE", "TYPE", "REASON", "OBJECT", "MESSAGE"], &rows).trim_end(),
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct IncidentReport {
    window: String,
    severity: String,
    restart_offenders: Vec<RestartReport>,
    warning_events: Vec<IncidentEvent>,
}

#[derive(Debug, Serialize)]
struct IncidentEvent {
    reason: String,
    object: String,
    namespace: String,
    count: i32,
    message: String,
}

/// Correlates restart counts with warning events inside the window. The
/// overall severity is `critical` when both signals fire, `warning` for one,
/// `ok` for none.
pub async fn incident(
    rt: &Runtime,
    recent: &str,
    restarts_threshold: i32,
    output: Option<&str>,
) -> Result<()> {
    let window = parse_window(recent)?;
    let access = rt.access().await?;
    let namespace = rt.namespace();
    let cutoff = Utc::now() - window;

    let pods = access.list_typed::<Pod>(namespace.as_deref()).await?;
    let restart_offenders = restart_reports(&pods, restarts_threshold.max(1), Some(cutoff));

    let warning_events: Vec<IncidentEvent> = access
        .events(namespace.as_deref())
        .await?
        .into_iter()
        .filter(|e| e.type_.as_deref() == Some("Warning"))
        .filter(|e| event_time(e).map(|t| t >= cutoff).unwrap_or(false))
        .map(|e| IncidentEvent {
            reason: e.reason.clone().unwrap_or_default(),
            object: format!(
                "{}/{}",
                e.involved_object.kind.clone().unwrap_or_default(),
                e.involved_object.name.clone().unwrap_or_default()
            ),
            namespace: e.metadata.namespace.clone().unwrap_or_default(),
            count: e.count.unwrap_or(1),
            message: e.message.clone().unwrap_or_default(),
        })
        .collect();

    let severity = match (restart_offenders.is_empty(), warning_events.is_empty()) {
        (false, false) => "critical",
        (true, true) => "ok",
        _ => "warning",
    };
    let report = IncidentReport {
        window: recent.to_string(),
        severity: severity.to_string(),
        restart_offenders,
        warning_events,
    };

    if output == Some("json") {
        rt.output.out(serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    rt.output
        .out(format!("incident window {recent}: {severity}"));
    if !report.restart_offenders.is_empty() {
        rt.output.out("\nrestart offenders:");
        let rows: Vec<Vec<String>> = report
            .restart_offenders
            .iter()
            .map(|r| {
                vec![
                    r.pod.clone(),
                    r.container.clone(),
                    r.restarts.to_string(),
                    r.last_state.clone(),
                ]
            })
            .collect();
        rt.output
            .out(render_table(&["POD", "CONTAINER", "RESTARTS", "LAST STATE"], &rows).trim_end());
    }
    if !report.warning_events.is_empty() {
        rt.output.out("\nwarning events:");
        let rows: Vec<Vec<String>> = report
            .warning_events
            .iter()
            .map(|e| {
                vec![
                    e.reason.clone(),
                    e.object.clone(),
                    e.count.to_string(),
                    e.message.clone(),
                ]
            })
            .collect();
        rt.output
            .out(render_table(&["REASON", "OBJECT", "COUNT", "MESSAGE"], &rows).trim_end());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_with_restarts(name: &str, restarts: i32) -> Pod {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "ns", "uid": name},
            "status": {"containerStatuses": [{
                "name": "main", "ready": true, "restartCount": restarts,
                "image": "i", "imageID": "",
                "lastState": {"terminated": {"reason": "OOMKilled", "exitCode": 137}}
            }]}
        }))
        .unwrap()
    }

    #[test]
    fn restart_threshold_filters_and_sorts() {
        let pods = vec![
            pod_with_restarts("calm", 0),
            pod_with_restarts("flappy", 7),
            pod_with_restarts("worse", 12),
        ];
        let reports = restart_reports(&pods, 5, None);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].pod, "worse");
        assert_eq!(reports[1].last_state, "OOMKilled");
    }

    #[test]
    fn restart_window_excludes_old_restarts() {
        let mut pod = pod_with_restarts("old", 9);
        let cs = pod
            .status
            .as_mut()
            .unwrap()
            .container_statuses
            .as_mut()
            .unwrap();
        cs[0].last_state.as_mut().unwrap().terminated.as_mut().unwrap().finished_at =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                crate::commands::chrono_to_jiff(Utc::now() - chrono::Duration::hours(48)),
            ));
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert!(restart_reports(&[pod], 5, Some(cutoff)).is_empty());
    }
}
