//! TUI application state and the message-driven update function.
//!
//! The loop is single-threaded: keystrokes, refresh ticks and async fetch
//! results all arrive as [`Msg`] values on one channel and are applied in
//! order. Long work never runs inside the loop; it is spawned and posts its
//! result back as a message.

use crate::tui::theme;
use kcli_core::Error;
use kcli_topology::TopologyGraph;
use std::collections::BTreeSet;

/// Kinds the list view can show, cycled with the number keys.
pub const LIST_KINDS: &[(&str, &[&str])] = &[
    ("pods", &["NAME", "NAMESPACE", "READY", "STATUS", "RESTARTS", "AGE"]),
    ("deployments", &["NAME", "NAMESPACE", "READY", "AGE"]),
    ("services", &["NAME", "NAMESPACE", "TYPE", "CLUSTER-IP", "AGE"]),
    ("nodes", &["NAME", "STATUS", "VERSION", "AGE"]),
    ("events", &["AGE", "TYPE", "REASON", "OBJECT", "MESSAGE"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    List,
    Detail,
    Graph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Overview,
    Logs,
    Describe,
    Yaml,
    Ai,
}

impl DetailTab {
    pub fn next(self) -> Self {
        match self {
            DetailTab::Overview => DetailTab::Logs,
            DetailTab::Logs => DetailTab::Describe,
            DetailTab::Describe => DetailTab::Yaml,
            DetailTab::Yaml => DetailTab::Ai,
            DetailTab::Ai => DetailTab::Overview,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            DetailTab::Overview => "overview",
            DetailTab::Logs => "logs",
            DetailTab::Describe => "describe",
            DetailTab::Yaml => "yaml",
            DetailTab::Ai => "ai",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetailData {
    pub name: String,
    pub namespace: String,
    pub overview: String,
    pub describe: String,
    pub yaml: String,
    pub logs: String,
    pub ai: String,
}

/// Pending bulk action awaiting its typed confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmPrompt {
    pub expected: String,
    pub typed: String,
    pub targets: Vec<String>,
}

/// Everything that can wake the loop.
pub enum Msg {
    Key(crossterm::event::KeyEvent),
    Tick,
    Rows {
        kind: String,
        result: Result<Vec<Vec<String>>, Error>,
    },
    Detail(Box<Result<DetailData, Error>>),
    Graph(Box<Result<TopologyGraph, Error>>),
    AiResult(Result<String, Error>),
    DeleteDone(Result<usize, Error>),
}

/// Side effects the update step asks the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RefreshRows,
    LoadDetail { name: String, namespace: String },
    LoadGraph { name: String, namespace: String },
    RunAi { name: String, namespace: String },
    DeleteMarked(Vec<String>),
    SaveSnapshot,
    Quit,
}

pub struct App {
    pub kind_index: usize,
    pub rows: Vec<Vec<String>>,
    /// Column index the list is sorted by, if any.
    pub sort_column: Option<usize>,
    pub filter: String,
    pub filter_mode: bool,
    pub cursor: usize,
    pub scroll_offset: usize,
    pub marked: BTreeSet<String>,
    pub view: View,
    pub tab: DetailTab,
    pub detail: DetailData,
    pub graph: Option<TopologyGraph>,
    pub theme_index: usize,
    pub wide: bool,
    pub ai_enabled: bool,
    pub stale: bool,
    pub refresh_in_flight: bool,
    pub status: String,
    pub confirm: Option<ConfirmPrompt>,
    pub context: String,
    pub namespace: String,
}

impl App {
    pub fn new(context: String, namespace: String, theme_name: &str, ai_enabled: bool, wide: bool) -> Self {
        Self {
            kind_index: 0,
            rows: Vec::new(),
            sort_column: None,
            filter: String::new(),
            filter_mode: false,
            cursor: 0,
            scroll_offset: 0,
            marked: BTreeSet::new(),
            view: View::List,
            tab: DetailTab::Overview,
            detail: DetailData::default(),
            graph: None,
            theme_index: theme::by_name(theme_name),
            wide,
            ai_enabled,
            stale: false,
            refresh_in_flight: false,
            status: String::from("ready"),
            confirm: None,
            context,
            namespace,
        }
    }

    pub fn kind(&self) -> &'static str {
        LIST_KINDS[self.kind_index].0
    }

    pub fn headers(&self) -> &'static [&'static str] {
        LIST_KINDS[self.kind_index].1
    }

    pub fn theme(&self) -> theme::Theme {
        theme::THEMES[self.theme_index]
    }

    /// Rows surviving the substring filter, in sort order.
    pub fn visible_rows(&self) -> Vec<&Vec<String>> {
        let mut rows: Vec<&Vec<String>> = if self.filter.is_empty() {
            self.rows.iter().collect()
        } else {
            let needle = self.filter.to_lowercase();
            self.rows
                .iter()
                .filter(|r| r.iter().any(|c| c.to_lowercase().contains(&needle)))
                .collect()
        };
        if let Some(column) = self.sort_column {
            rows.sort_by(|a, b| {
                let av = a.get(column).map(String::as_str).unwrap_or("");
                let bv = b.get(column).map(String::as_str).unwrap_or("");
                // Numeric columns (restarts, counts) sort descending.
                match (av.parse::<i64>(), bv.parse::<i64>()) {
                    (Ok(an), Ok(bn)) => bn.cmp(&an),
                    _ => av.cmp(bv),
                }
            });
        }
        rows
    }

    fn selected_row_name(&self) -> Option<(String, String)> {
        // Events rows lead with age, not a name; detail and xray do not
        // apply to them.
        if self.kind() == "events" {
            return None;
        }
        let visible = self.visible_rows();
        let row = visible.get(self.cursor)?;
        let name = row.first()?.clone();
        let namespace = if self.headers().get(1) == Some(&"NAMESPACE") {
            row.get(1).cloned().unwrap_or_default()
        } else {
            String::new()
        };
        Some((name, namespace))
    }

    fn clamp_cursor(&mut self) {
        let len = self.visible_rows().len();
        if len == 0 {
            self.cursor = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
    }

    /// Applies a message; any returned effects are executed by the driver.
    pub fn update(&mut self, msg: Msg) -> Vec<Effect> {
        match msg {
            Msg::Tick => {
                // Refreshes coalesce: a tick while one is outstanding is a no-op.
                if self.refresh_in_flight || self.view != View::List {
                    Vec::new()
                } else {
                    self.refresh_in_flight = true;
                    vec![Effect::RefreshRows]
                }
            }
            Msg::Rows { kind, result } => {
                self.refresh_in_flight = false;
                if kind != self.kind() {
                    return Vec::new();
                }
                match result {
                    Ok(rows) => {
                        self.rows = rows;
                        self.stale = false;
                        self.status = format!("{} {}", self.rows.len(), self.kind());
                    }
                    Err(e) => {
                        // Keep showing the last known rows, visibly stale.
                        self.stale = true;
                        self.status = format!("refresh failed: {} ({})", e.message(), e.code());
                    }
                }
                self.clamp_cursor();
                Vec::new()
            }
            Msg::Detail(result) => {
                match *result {
                    Ok(detail) => {
                        self.detail = detail;
                        self.view = View::Detail;
                    }
                    Err(e) => self.status = format!("detail failed: {} ({})", e.message(), e.code()),
                }
                Vec::new()
            }
            Msg::Graph(result) => {
                match *result {
                    Ok(graph) => {
                        self.graph = Some(graph);
                        self.view = View::Graph;
                    }
                    Err(e) => self.status = format!("xray failed: {} ({})", e.message(), e.code()),
                }
                Vec::new()
            }
            Msg::AiResult(result) => {
                match result {
                    Ok(text) => self.detail.ai = text,
                    Err(e) => self.detail.ai = format!("{} ({})", e.message(), e.code()),
                }
                Vec::new()
            }
            Msg::DeleteDone(result) => {
                match result {
                    Ok(count) => {
                        self.status = format!("deleted {count} resources");
                        self.marked.clear();
                    }
                    Err(e) => self.status = format!("delete failed: {} ({})", e.message(), e.code()),
                }
                self.refresh_in_flight = true;
                vec![Effect::RefreshRows]
            }
            Msg::Key(key) => self.on_key(key),
        }
    }

    fn on_key(&mut self, key: crossterm::event::KeyEvent) -> Vec<Effect> {
        use crossterm::event::{KeyCode, KeyModifiers};

        // Typed confirmation captures every key until resolved.
        if let Some(confirm) = &mut self.confirm {
            match key.code {
                KeyCode::Esc => {
                    self.confirm = None;
                    self.status = "cancelled".into();
                }
                KeyCode::Enter => {
                    if confirm.typed == confirm.expected {
                        let targets = confirm.targets.clone();
                        self.confirm = None;
                        return vec![Effect::DeleteMarked(targets)];
                    }
                    self.status = format!("type '{}' to confirm", confirm.expected);
                }
                KeyCode::Backspace => {
                    confirm.typed.pop();
                }
                KeyCode::Char(c) => confirm.typed.push(c),
                _ => {}
            }
            return Vec::new();
        }

        if self.filter_mode {
            match key.code {
                KeyCode::Esc => {
                    self.filter_mode = false;
                    self.filter.clear();
                }
                KeyCode::Enter => self.filter_mode = false,
                KeyCode::Backspace => {
                    self.filter.pop();
                }
                KeyCode::Char(c) => self.filter.push(c),
                _ => {}
            }
            self.clamp_cursor();
            return Vec::new();
        }

        match (self.view, key.code) {
            (_, KeyCode::Char('q')) => return vec![Effect::Quit],
            (_, KeyCode::Char('c')) if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return vec![Effect::Quit]
            }
            (View::Detail | View::Graph, KeyCode::Esc) => {
                self.view = View::List;
            }
            (View::Detail, KeyCode::Tab) => {
                self.tab = self.tab.next();
                if self.tab == DetailTab::Ai && self.ai_enabled && self.detail.ai.is_empty() {
                    return vec![Effect::RunAi {
                        name: self.detail.name.clone(),
                        namespace: self.detail.namespace.clone(),
                    }];
                }
            }
            (View::List, KeyCode::Char('/')) => {
                self.filter_mode = true;
                self.filter.clear();
            }
            (View::List, KeyCode::Down | KeyCode::Char('j')) => {
                self.cursor += 1;
                self.clamp_cursor();
            }
            (View::List, KeyCode::Up | KeyCode::Char('k')) => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            (View::List, KeyCode::Char(' ')) => {
                if let Some((name, _)) = self.selected_row_name() {
                    if !self.marked.remove(&name) {
                        self.marked.insert(name);
                    }
                }
            }
            (View::List, KeyCode::Enter) => {
                if let Some((name, namespace)) = self.selected_row_name() {
                    return vec![Effect::LoadDetail { name, namespace }];
                }
            }
            (View::List, KeyCode::Char('x')) => {
                if let Some((name, namespace)) = self.selected_row_name() {
                    return vec![Effect::LoadGraph { name, namespace }];
                }
            }
            (View::List, KeyCode::Char('X')) => {
                if !self.marked.is_empty() {
                    self.confirm = Some(ConfirmPrompt {
                        expected: "delete".into(),
                        typed: String::new(),
                        targets: self.marked.iter().cloned().collect(),
                    });
                }
            }
            (View::List, KeyCode::Char('o')) => {
                let columns = self.headers().len();
                self.sort_column = match self.sort_column {
                    None => Some(0),
                    Some(c) if c + 1 < columns => Some(c + 1),
                    Some(_) => None,
                };
                self.clamp_cursor();
            }
            (View::List, KeyCode::Char('r')) => {
                if !self.refresh_in_flight {
                    self.refresh_in_flight = true;
                    return vec![Effect::RefreshRows];
                }
            }
            (View::List, KeyCode::Char('s')) => return vec![Effect::SaveSnapshot],
            (View::List, KeyCode::Char(c @ '1'..='5')) => {
                let index = (c as usize) - ('1' as usize);
                if index < LIST_KINDS.len() && index != self.kind_index {
                    self.kind_index = index;
                    self.rows.clear();
                    self.marked.clear();
                    self.cursor = 0;
                    self.refresh_in_flight = true;
                    return vec![Effect::RefreshRows];
                }
            }
            (_, KeyCode::Char('t')) => {
                self.theme_index = (self.theme_index + 1) % theme::THEMES.len();
            }
            (_, KeyCode::Char('w')) => self.wide = !self.wide,
            (_, KeyCode::Char('a')) => {
                self.ai_enabled = !self.ai_enabled;
                self.status = format!("ai {}", if self.ai_enabled { "on" } else { "off" });
            }
            _ => {}
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyCode, KeyEvent};

    fn app() -> App {
        let mut app = App::new("prod".into(), "payments".into(), "dark", false, false);
        app.rows = vec![
            vec!["api-1".into(), "payments".into(), "1/1".into(), "Running".into(), "0".into(), "5m".into()],
            vec!["api-2".into(), "payments".into(), "1/1".into(), "Running".into(), "0".into(), "5m".into()],
            vec!["db-1".into(), "payments".into(), "1/1".into(), "Running".into(), "0".into(), "5m".into()],
        ];
        app
    }

    #[test]
    fn tick_coalesces_while_refresh_outstanding() {
        let mut app = app();
        assert_eq!(app.update(Msg::Tick), vec![Effect::RefreshRows]);
        assert!(app.refresh_in_flight);
        assert!(app.update(Msg::Tick).is_empty());
    }

    #[test]
    fn failed_refresh_keeps_rows_and_marks_stale() {
        let mut app = app();
        app.refresh_in_flight = true;
        let effects = app.update(Msg::Rows {
            kind: "pods".into(),
            result: Err(Error::Transient("apiserver 503".into())),
        });
        assert!(effects.is_empty());
        assert!(app.stale);
        assert_eq!(app.rows.len(), 3);
        assert!(app.status.contains("Transient"));
    }

    #[test]
    fn filter_narrows_visible_rows() {
        let mut app = app();
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('/'))));
        for c in "api".chars() {
            app.update(Msg::Key(KeyEvent::from(KeyCode::Char(c))));
        }
        assert_eq!(app.visible_rows().len(), 2);
        app.update(Msg::Key(KeyEvent::from(KeyCode::Esc)));
        assert_eq!(app.visible_rows().len(), 3);
    }

    #[test]
    fn multi_select_and_typed_confirmation() {
        let mut app = app();
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char(' '))));
        app.update(Msg::Key(KeyEvent::from(KeyCode::Down)));
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char(' '))));
        assert_eq!(app.marked.len(), 2);

        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('X'))));
        assert!(app.confirm.is_some());
        // Wrong word does nothing.
        for c in "nope".chars() {
            app.update(Msg::Key(KeyEvent::from(KeyCode::Char(c))));
        }
        assert!(app.update(Msg::Key(KeyEvent::from(KeyCode::Enter))).is_empty());
        // Clear and type the expected word.
        for _ in 0..4 {
            app.update(Msg::Key(KeyEvent::from(KeyCode::Backspace)));
        }
        for c in "delete".chars() {
            app.update(Msg::Key(KeyEvent::from(KeyCode::Char(c))));
        }
        let effects = app.update(Msg::Key(KeyEvent::from(KeyCode::Enter)));
        assert!(matches!(&effects[..], [Effect::DeleteMarked(targets)] if targets.len() == 2));
    }

    #[test]
    fn sort_cycles_columns_and_orders_rows() {
        let mut app = app();
        app.rows[0][0] = "zeta".into();
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('o'))));
        assert_eq!(app.sort_column, Some(0));
        let names: Vec<&str> = app
            .visible_rows()
            .iter()
            .map(|r| r[0].as_str())
            .collect();
        assert_eq!(names, vec!["api-2", "db-1", "zeta"]);
        // Cycling past the last column turns sorting off again.
        for _ in 0..6 {
            app.update(Msg::Key(KeyEvent::from(KeyCode::Char('o'))));
        }
        assert_eq!(app.sort_column, None);
    }

    #[test]
    fn stale_rows_for_other_kind_are_ignored() {
        let mut app = app();
        let effects = app.update(Msg::Rows {
            kind: "services".into(),
            result: Ok(vec![vec!["stale".into()]]),
        });
        assert!(effects.is_empty());
        assert_eq!(app.rows.len(), 3);
    }

    #[test]
    fn theme_and_toggles_cycle() {
        let mut app = app();
        let initial = app.theme_index;
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('t'))));
        assert_ne!(app.theme_index, initial);
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('w'))));
        assert!(app.wide);
        app.update(Msg::Key(KeyEvent::from(KeyCode::Char('a'))));
        assert!(app.ai_enabled);
    }
}
