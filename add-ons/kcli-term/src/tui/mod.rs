//! TUI driver: terminal lifecycle, input/tick sources and effect execution.
//!
//! One consumer loop owns the [`App`]; everything else posts messages.

pub mod app;
pub mod theme;
pub mod ui;

use crate::runtime::Runtime;
use app::{App, DetailData, Effect, Msg};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture, Event};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use kcli_core::{Error, ListQuery, ResourceAccess, Result};
use kcli_topology::{TopologyBuilder, TopologyScope};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub async fn run(rt: &Runtime) -> Result<()> {
    let access = rt.access().await?;
    let namespace = rt.namespace().unwrap_or_else(|| "default".to_string());
    let context = rt
        .context()
        .unwrap_or_else(|| access.cluster_id().to_string());

    enable_raw_mode().map_err(|e| Error::Internal(format!("terminal: {e}")))?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .map_err(|e| Error::Internal(format!("terminal: {e}")))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal =
        Terminal::new(backend).map_err(|e| Error::Internal(format!("terminal: {e}")))?;

    let outcome = event_loop(rt, access, context, namespace, &mut terminal).await;

    disable_raw_mode().ok();
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .ok();
    terminal.show_cursor().ok();
    outcome
}

async fn event_loop(
    rt: &Runtime,
    access: Arc<ResourceAccess>,
    context: String,
    namespace: String,
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<()> {
    let mut app = App::new(
        context,
        namespace.clone(),
        &rt.profile.tui.theme,
        rt.profile.ai.enabled,
        rt.profile.tui.wide,
    );
    let (tx, mut rx) = mpsc::unbounded_channel::<Msg>();

    // Keystrokes come from a dedicated blocking thread.
    let stop = Arc::new(AtomicBool::new(false));
    let input_stop = Arc::clone(&stop);
    let input_tx = tx.clone();
    std::thread::spawn(move || {
        while !input_stop.load(Ordering::Relaxed) {
            if crossterm::event::poll(Duration::from_millis(120)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = crossterm::event::read() {
                    if input_tx.send(Msg::Key(key)).is_err() {
                        return;
                    }
                }
            }
        }
    });

    // Declared refresh cadence for the list views.
    let tick_tx = tx.clone();
    let refresh = Duration::from_secs(rt.profile.tui.refresh_seconds.max(1));
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(refresh);
        loop {
            interval.tick().await;
            if tick_tx.send(Msg::Tick).is_err() {
                return;
            }
        }
    });

    // Initial load.
    app.refresh_in_flight = true;
    spawn_refresh(&access, &namespace, app.kind(), tx.clone());

    let ai_profile = rt.profile.clone();
    loop {
        terminal
            .draw(|frame| ui::draw(frame, &mut app))
            .map_err(|e| Error::Internal(format!("draw: {e}")))?;

        let Some(msg) = rx.recv().await else { break };
        let effects = app.update(msg);
        let mut quit = false;
        for effect in effects {
            match effect {
                Effect::Quit => quit = true,
                Effect::RefreshRows => {
                    spawn_refresh(&access, &namespace, app.kind(), tx.clone())
                }
                Effect::LoadDetail { name, namespace } => {
                    spawn_detail(&access, app.kind(), name, namespace, tx.clone())
                }
                Effect::LoadGraph { name, namespace } => spawn_graph(
                    &access,
                    app.kind(),
                    name,
                    namespace,
                    rt.profile.performance.topology_node_ceiling,
                    tx.clone(),
                ),
                Effect::RunAi { name, namespace } => {
                    spawn_ai(&ai_profile, app.kind(), name, namespace, tx.clone())
                }
                Effect::DeleteMarked(targets) => spawn_delete(
                    &access,
                    app.kind(),
                    app.namespace.clone(),
                    targets,
                    tx.clone(),
                ),
                Effect::SaveSnapshot => {
                    app.status = match save_snapshot(&app) {
                        Ok(path) => format!("snapshot saved to {path}"),
                        Err(e) => format!("snapshot failed: {e}"),
                    };
                }
            }
        }
        if quit {
            break;
        }
    }

    stop.store(true, Ordering::Relaxed);
    ticker.abort();
    Ok(())
}

/// Writes the current (filtered) rows in the same fixed-width format the CLI
/// prints, so snapshots are reproducible.
fn save_snapshot(app: &App) -> Result<String> {
    let rows: Vec<Vec<String>> = app.visible_rows().into_iter().cloned().collect();
    let table = crate::commands::render_table(app.headers(), &rows);
    let path = format!(
        "kcli-{}-{}.txt",
        app.kind(),
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
    );
    std::fs::write(&path, table)?;
    Ok(path)
}

fn kind_singular(kind: &str) -> &str {
    kind.strip_suffix('s').unwrap_or(kind)
}

fn spawn_refresh(
    access: &Arc<ResourceAccess>,
    namespace: &str,
    kind: &'static str,
    tx: mpsc::UnboundedSender<Msg>,
) {
    let access = Arc::clone(access);
    let namespace = namespace.to_string();
    tokio::spawn(async move {
        let result = fetch_rows(&access, &namespace, kind).await;
        let _ = tx.send(Msg::Rows {
            kind: kind.to_string(),
            result,
        });
    });
}

async fn fetch_rows(
    access: &ResourceAccess,
    namespace: &str,
    kind: &str,
) -> Result<Vec<Vec<String>>> {
    use crate::commands::format_age;

    let scope_ns = match kind {
        "nodes" => None,
        _ => Some(namespace.to_string()),
    };
    let query = ListQuery {
        namespace: scope_ns,
        ..Default::default()
    };
    let items = access.list_all(kind, &query).await?;
    let rows = items
        .iter()
        .map(|obj| {
            let name = obj.metadata.name.clone().unwrap_or_default();
            let ns = obj.metadata.namespace.clone().unwrap_or_default();
            let age = format_age(obj.metadata.creation_timestamp.as_ref().map(|t| crate::commands::jiff_to_chrono(t.0)));
            let data = &obj.data;
            match kind {
                "pods" => {
                    let empty = Vec::new();
                    let containers = data["status"]["containerStatuses"]
                        .as_array()
                        .unwrap_or(&empty);
                    let ready = containers.iter().filter(|c| c["ready"] == true).count();
                    let restarts: i64 = containers
                        .iter()
                        .map(|c| c["restartCount"].as_i64().unwrap_or(0))
                        .sum();
                    vec![
                        name,
                        ns,
                        format!("{ready}/{}", containers.len()),
                        data["status"]["phase"].as_str().unwrap_or("Unknown").to_string(),
                        restarts.to_string(),
                        age,
                    ]
                }
                "deployments" => {
                    let desired = data["spec"]["replicas"].as_i64().unwrap_or(1);
                    let ready = data["status"]["readyReplicas"].as_i64().unwrap_or(0);
                    vec![name, ns, format!("{ready}/{desired}"), age]
                }
                "services" => vec![
                    name,
                    ns,
                    data["spec"]["type"].as_str().unwrap_or("ClusterIP").to_string(),
                    data["spec"]["clusterIP"].as_str().unwrap_or("").to_string(),
                    age,
                ],
                "nodes" => {
                    let ready = data["status"]["conditions"]
                        .as_array()
                        .and_then(|cs| cs.iter().find(|c| c["type"] == "Ready"))
                        .map(|c| {
                            if c["status"] == "True" {
                                "Ready"
                            } else {
                                "NotReady"
                            }
                        })
                        .unwrap_or("Unknown");
                    let version = data["status"]["nodeInfo"]["kubeletVersion"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    vec![name, ready.to_string(), version, age]
                }
                "events" => vec![
                    age,
                    data["type"].as_str().unwrap_or("").to_string(),
                    data["reason"].as_str().unwrap_or("").to_string(),
                    format!(
                        "{}/{}",
                        data["involvedObject"]["kind"].as_str().unwrap_or(""),
                        data["involvedObject"]["name"].as_str().unwrap_or("")
                    ),
                    data["message"].as_str().unwrap_or("").to_string(),
                ],
                _ => vec![name, ns, age],
            }
        })
        .collect();
    Ok(rows)
}

fn spawn_detail(
    access: &Arc<ResourceAccess>,
    kind: &'static str,
    name: String,
    namespace: String,
    tx: mpsc::UnboundedSender<Msg>,
) {
    let access = Arc::clone(access);
    tokio::spawn(async move {
        let result = load_detail(&access, kind, &name, &namespace).await;
        let _ = tx.send(Msg::Detail(Box::new(result)));
    });
}

async fn load_detail(
    access: &ResourceAccess,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Result<DetailData> {
    let ns = (!namespace.is_empty()).then_some(namespace);
    let obj = access.get(kind, ns, name).await?;
    let yaml = serde_yaml::to_string(&obj).unwrap_or_default();

    let mut overview = format!("{}/{name}\n", kind_singular(kind));
    if let Some(labels) = &obj.metadata.labels {
        overview.push_str("labels:\n");
        for (k, v) in labels {
            overview.push_str(&format!("  {k}={v}\n"));
        }
    }
    let describe = {
        let mut out = String::new();
        if let Some(conditions) = obj.data["status"]["conditions"].as_array() {
            out.push_str("conditions:\n");
            for c in conditions {
                out.push_str(&format!(
                    "  {} {} {}\n",
                    c["type"].as_str().unwrap_or(""),
                    c["status"].as_str().unwrap_or(""),
                    c["message"].as_str().unwrap_or("")
                ));
            }
        }
        out
    };
    let logs = if kind == "pods" && !namespace.is_empty() {
        access
            .pod_logs(namespace, name, None, Some(100))
            .await
            .unwrap_or_else(|e| format!("logs unavailable: {e}"))
    } else {
        String::new()
    };

    Ok(DetailData {
        name: name.to_string(),
        namespace: namespace.to_string(),
        overview,
        describe,
        yaml,
        logs,
        ai: String::new(),
    })
}

fn spawn_graph(
    access: &Arc<ResourceAccess>,
    kind: &'static str,
    name: String,
    namespace: String,
    ceiling: usize,
    tx: mpsc::UnboundedSender<Msg>,
) {
    let access = Arc::clone(access);
    tokio::spawn(async move {
        let result = load_graph(&access, kind, &name, &namespace, ceiling).await;
        let _ = tx.send(Msg::Graph(Box::new(result)));
    });
}

async fn load_graph(
    access: &ResourceAccess,
    kind: &str,
    name: &str,
    namespace: &str,
    ceiling: usize,
) -> Result<kcli_topology::TopologyGraph> {
    let scope = TopologyScope::Resource {
        kind: kind_singular(kind).to_string(),
        namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
        name: name.to_string(),
        hops: 2,
    };
    let snapshot = kcli_topology::collect(access, &scope).await?;
    TopologyBuilder::new(access.cluster_id(), ceiling).build(&scope, &snapshot)
}

fn spawn_ai(
    profile: &kcli_core::Profile,
    kind: &'static str,
    name: String,
    namespace: String,
    tx: mpsc::UnboundedSender<Msg>,
) {
    let profile = profile.clone();
    tokio::spawn(async move {
        let result = run_ai(&profile, kind, &name, &namespace).await;
        let _ = tx.send(Msg::AiResult(result));
    });
}

async fn run_ai(
    profile: &kcli_core::Profile,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Result<String> {
    use kcli_ai::{AiClient, AiSettings, PricingSource, ProviderClient, ProviderConfig, ProviderKind, UsageLedger};

    let ai = &profile.ai;
    let backend: Option<Arc<dyn kcli_ai::ChatBackend>> = if ai.provider.is_empty() {
        None
    } else {
        let kind = ProviderKind::parse(&ai.provider)?;
        Some(Arc::new(ProviderClient::new(ProviderConfig::new(
            kind,
            ai.api_key.clone(),
            (!ai.model.is_empty()).then(|| ai.model.clone()),
        ))))
    };
    let settings = AiSettings {
        enabled: ai.enabled,
        hard_budget_usd: ai.hard_budget_usd,
        soft_limit_percent: ai.soft_limit_percent,
        min_call_interval: Duration::from_millis(ai.min_call_interval_ms),
        cache_ttl: Duration::from_secs(ai.cache_ttl_secs),
        cache_max_entries: ai.cache_max_entries,
        sweep_cadence: Duration::from_secs(60),
    };
    let ledger = Arc::new(UsageLedger::open(UsageLedger::default_path())?);
    let pricing = PricingSource::new(PricingSource::default_cache_path(), None)
        .load()
        .await;
    let client = AiClient::new(backend, settings, ledger, pricing);
    let target = format!("{}/{} in namespace {}", kind_singular(kind), name, namespace);
    let answer = client.analyze(kcli_ai::AiAction::Why, &target).await;
    client.close();
    answer
}

fn spawn_delete(
    access: &Arc<ResourceAccess>,
    kind: &'static str,
    namespace: String,
    targets: Vec<String>,
    tx: mpsc::UnboundedSender<Msg>,
) {
    let access = Arc::clone(access);
    tokio::spawn(async move {
        let mut deleted = 0usize;
        let mut failure: Option<Error> = None;
        for target in &targets {
            match access
                .delete(kind, (!namespace.is_empty()).then_some(namespace.as_str()), target, None)
                .await
            {
                Ok(()) => deleted += 1,
                Err(e) => failure = Some(e),
            }
        }
        let result = match failure {
            Some(e) if deleted == 0 => Err(e),
            _ => Ok(deleted),
        };
        let _ = tx.send(Msg::DeleteDone(result));
    });
}
