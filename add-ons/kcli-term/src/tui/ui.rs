//! Rendering for the list, detail and xray views.

use crate::tui::app::{App, ConfirmPrompt, DetailTab, View};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, Wrap};
use ratatui::Frame;

pub fn draw(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, chunks[0], app);
    match app.view {
        View::List => draw_list(frame, chunks[1], app),
        View::Detail => draw_detail(frame, chunks[1], app),
        View::Graph => draw_graph(frame, chunks[1], app),
    }
    draw_status(frame, chunks[2], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let theme = app.theme();
    let mut spans = vec![
        Span::styled("kcli ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
        Span::styled(format!("ctx:{} ", app.context), Style::default().fg(theme.text)),
        Span::styled(format!("ns:{} ", app.namespace), Style::default().fg(theme.text)),
        Span::styled(
            format!("[{}] ", app.kind()),
            Style::default().fg(theme.accent),
        ),
    ];
    if app.stale {
        spans.push(Span::styled(
            "STALE ",
            Style::default().fg(theme.warning).add_modifier(Modifier::BOLD),
        ));
    }
    if !app.filter.is_empty() || app.filter_mode {
        spans.push(Span::styled(
            format!("/{}", app.filter),
            Style::default().fg(theme.warning),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_list(frame: &mut Frame, area: Rect, app: &mut App) {
    let theme = app.theme();

    // Virtualization: only the rows inside the viewport window materialize
    // as widgets. Scroll state settles before any row borrows are taken.
    let viewport = area.height.saturating_sub(2) as usize;
    if app.cursor < app.scroll_offset {
        app.scroll_offset = app.cursor;
    } else if viewport > 0 && app.cursor >= app.scroll_offset + viewport {
        app.scroll_offset = app.cursor + 1 - viewport;
    }
    let visible = app.visible_rows();
    let window: Vec<&&Vec<String>> = visible
        .iter()
        .skip(app.scroll_offset)
        .take(viewport.max(1))
        .collect();

    let column_count = if app.wide {
        app.headers().len()
    } else {
        app.headers().len().min(5)
    };
    let header = Row::new(
        app.headers()
            .iter()
            .take(column_count)
            .map(|h| Cell::from(*h))
            .collect::<Vec<_>>(),
    )
    .style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = window
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let absolute = i + app.scroll_offset;
            let name = row.first().cloned().unwrap_or_default();
            let mut style = Style::default().fg(theme.text);
            if absolute == app.cursor {
                style = style.bg(theme.selection).add_modifier(Modifier::BOLD);
            }
            let marker = if app.marked.contains(&name) { "*" } else { " " };
            let mut cells = vec![Cell::from(marker.to_string())];
            cells.extend(
                row.iter()
                    .take(column_count)
                    .map(|c| Cell::from(c.clone())),
            );
            Row::new(cells).style(style)
        })
        .collect();

    let mut widths = vec![Constraint::Length(1)];
    widths.extend(std::iter::repeat(Constraint::Fill(1)).take(column_count));
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(theme.dim)));
    frame.render_widget(table, area);
}

fn draw_detail(frame: &mut Frame, area: Rect, app: &App) {
    let theme = app.theme();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(3)])
        .split(area);

    let tabs: Vec<Span> = [
        DetailTab::Overview,
        DetailTab::Logs,
        DetailTab::Describe,
        DetailTab::Yaml,
        DetailTab::Ai,
    ]
    .iter()
    .map(|t| {
        let style = if *t == app.tab {
            Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(theme.dim)
        };
        Span::styled(format!(" {} ", t.title()), style)
    })
    .collect();
    frame.render_widget(Paragraph::new(Line::from(tabs)), chunks[0]);

    let content = match app.tab {
        DetailTab::Overview => &app.detail.overview,
        DetailTab::Logs => &app.detail.logs,
        DetailTab::Describe => &app.detail.describe,
        DetailTab::Yaml => &app.detail.yaml,
        DetailTab::Ai => {
            if app.ai_enabled {
                &app.detail.ai
            } else {
                return frame.render_widget(
                    Paragraph::new("ai is toggled off (press 'a')")
                        .block(titled_block(&app.detail.name, theme)),
                    chunks[1],
                );
            }
        }
    };
    frame.render_widget(
        Paragraph::new(content.as_str())
            .wrap(Wrap { trim: false })
            .block(titled_block(&app.detail.name, theme)),
        chunks[1],
    );
}

fn draw_graph(frame: &mut Frame, area: Rect, app: &App) {
    let theme = app.theme();
    let Some(graph) = &app.graph else {
        frame.render_widget(Paragraph::new("no graph loaded"), area);
        return;
    };
    let mut lines = vec![Line::from(Span::styled(
        format!(
            "{} nodes, {} edges, seed {:016x}",
            graph.nodes.len(),
            graph.edges.len(),
            graph.layout_seed
        ),
        Style::default().fg(theme.dim),
    ))];
    for edge in &graph.edges {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{}/{}", edge.source.kind, edge.source.name),
                Style::default().fg(theme.text),
            ),
            Span::styled(
                format!(" -[{:?} {:.1}]-> ", edge.relation, edge.confidence),
                Style::default().fg(theme.accent),
            ),
            Span::styled(
                format!("{}/{}", edge.target.kind, edge.target.name),
                Style::default().fg(theme.text),
            ),
        ]));
    }
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(titled_block("xray", theme)),
        area,
    );
}

fn draw_status(frame: &mut Frame, area: Rect, app: &App) {
    let theme = app.theme();
    let line = match &app.confirm {
        Some(ConfirmPrompt {
            expected, typed, targets,
        }) => Line::from(Span::styled(
            format!(
                "delete {} marked: type '{expected}' and press enter ({typed})",
                targets.len()
            ),
            Style::default().fg(theme.critical).add_modifier(Modifier::BOLD),
        )),
        None => Line::from(vec![
            Span::styled(app.status.clone(), Style::default().fg(theme.dim)),
            Span::styled(
                "  q:quit /:filter o:sort space:mark enter:detail x:xray X:delete s:snapshot t:theme 1-5:kind",
                Style::default().fg(theme.dim),
            ),
        ]),
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn titled_block(title: &str, theme: crate::tui::theme::Theme) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(title.to_string())
        .border_style(Style::default().fg(theme.dim))
}
