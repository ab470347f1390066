use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap};

use crate::app::{App, FocusPane, InputMode};
use crate::filter::Facet;
use crate::graph::RenderNode;
use crate::model::{EntityKind, HealthStatus};
use crate::notify::NotificationKind;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const FOCUS_BG: Color = Color::Rgb(24, 36, 58);

pub fn render(frame: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app);
    render_body(frame, root[1], app);
    render_footer(frame, root[2], app);

    if app.mode() == InputMode::Filter {
        render_filter_panel(frame, app);
    }
    if app.show_help() {
        render_help_modal(frame, app);
    }
}

fn render_header(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    push_powerline_segment(
        &mut spans,
        format!(" ⎈ {} ", compact_text(&app.cluster().name, 32)),
        Color::White,
        PL_A,
        PL_B,
    );
    push_powerline_segment(
        &mut spans,
        format!(" ctx {} ", compact_text(app.context(), 24)),
        Color::White,
        PL_B,
        PL_C,
    );
    let loading = match app.loading_count() {
        0 => String::new(),
        count => format!("  loading {count}"),
    };
    push_powerline_segment(
        &mut spans,
        format!(
            " rev {}  zoom {}  nodes {}{loading} ",
            app.tree_revision(),
            app.viewport().zoom(),
            app.graph().visible_nodes().count()
        ),
        Color::White,
        PL_C,
        BG,
    );
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);

    let graph_block = pane_block("Topology", app.focus() == FocusPane::Graph);
    let graph_inner = graph_block.inner(columns[0]);
    app.resize_graph_pane(graph_inner.width, graph_inner.height);
    frame.render_widget(graph_block, columns[0]);
    render_graph(frame, graph_inner, app);

    if app.context_panel_open() {
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(columns[1]);
        render_list(frame, right[0], app);
        render_context_panel(frame, right[1], app);
    } else {
        render_list(frame, columns[1], app);
    }
}

fn render_graph(frame: &mut Frame, area: Rect, app: &App) {
    let focused = app.focused_node().map(|node| node.id.as_str());
    let graph = app.graph();
    let buffer = frame.buffer_mut();

    for node in graph.visible_nodes() {
        let Some((x, y)) = app.viewport().world_to_screen(node.position) else {
            continue;
        };
        let selected = app.selection().contains(&node.id);
        let mut text = format!(
            "{}{} {}",
            if selected { "●" } else { " " },
            node_glyph(node),
            node.label
        );
        if let Some(edge) = graph.edges.iter().find(|edge| edge.source == node.id) {
            let target = graph
                .node(&edge.target)
                .map(|target| target.label.as_str())
                .unwrap_or(edge.target.as_str());
            text.push_str(&format!(" ⇢ {target}"));
        }

        let mut style = Style::default().fg(health_color(node.health));
        if node.placeholder {
            style = style.fg(MUTED).add_modifier(Modifier::DIM);
        }
        if node.is_group() {
            style = style.add_modifier(Modifier::BOLD);
        }
        if focused == Some(node.id.as_str()) {
            style = style.bg(FOCUS_BG).add_modifier(Modifier::REVERSED);
        }

        let max_width = area.width.saturating_sub(x) as usize;
        buffer.set_stringn(area.x + x, area.y + y, text, max_width, style);
    }
}

fn render_list(frame: &mut Frame, area: Rect, app: &App) {
    let nodes = app.list_nodes();
    let header = Row::new(["", "Name", "Kind", "Health"].map(|header| {
        Cell::from(header).style(Style::default().add_modifier(Modifier::BOLD))
    }))
    .style(Style::default().fg(ACCENT));
    let rows = nodes.iter().map(|node| {
        let mark = if app.selection().contains(&node.id) {
            "[x]"
        } else {
            "[ ]"
        };
        Row::new(vec![
            Cell::from(mark),
            Cell::from(list_label(node)),
            Cell::from(node.kind.short_label().to_string()),
            Cell::from(node.health.label()).style(Style::default().fg(health_color(node.health))),
        ])
        .style(Style::default().fg(Color::White))
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(3),
            Constraint::Percentage(55),
            Constraint::Percentage(25),
            Constraint::Percentage(20),
        ],
    )
    .header(header)
    .block(pane_block(
        &format!("Objects ({})", nodes.len()),
        app.focus() == FocusPane::List,
    ))
    .column_spacing(1)
    .row_highlight_style(Style::default().bg(FOCUS_BG).add_modifier(Modifier::BOLD))
    .highlight_symbol("› ");

    let mut state = TableState::default();
    state.select(
        app.list_cursor()
            .and_then(|cursor| nodes.iter().position(|node| node.id == cursor)),
    );
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_context_panel(frame: &mut Frame, area: Rect, app: &App) {
    let selection = app.selection();
    let mut lines = Vec::new();
    for entry in selection.entries() {
        let line = match app.graph().node(&entry.id) {
            Some(node) => {
                let outgoing = app
                    .graph()
                    .edges
                    .iter()
                    .filter(|edge| edge.source == node.id)
                    .count();
                Line::from(vec![
                    Span::styled(
                        format!("{} ", node.label),
                        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!("{} ", entry.kind),
                        Style::default().fg(MUTED),
                    ),
                    Span::styled(
                        node.health.label(),
                        Style::default().fg(health_color(node.health)),
                    ),
                    Span::styled(
                        if outgoing > 0 {
                            format!("  {outgoing} deps")
                        } else {
                            String::new()
                        },
                        Style::default().fg(MUTED),
                    ),
                ])
            }
            None => Line::from(Span::styled(
                format!("{} (filtered out)", entry.id),
                Style::default().fg(MUTED),
            )),
        };
        lines.push(line);
    }

    let title = format!("Selection {}/{}", selection.len(), selection.limit());
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(pane_block(&title, false)),
        area,
    );
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans = Vec::new();
    match app.mode() {
        InputMode::Search => {
            let search = app.search();
            let position = if search.matches().is_empty() {
                "0/0".to_string()
            } else {
                format!("{}/{}", search.active_index() + 1, search.matches().len())
            };
            push_powerline_segment(&mut spans, " search ", Color::Black, WARN, PL_B);
            push_powerline_segment(
                &mut spans,
                format!(" /{}▏ {position} ", search.query()),
                Color::White,
                PL_B,
                BG,
            );
        }
        InputMode::Command => {
            push_powerline_segment(&mut spans, " cmd ", Color::Black, WARN, PL_B);
            push_powerline_segment(
                &mut spans,
                format!(" :{}▏ ", app.input()),
                Color::White,
                PL_B,
                BG,
            );
        }
        InputMode::Normal | InputMode::Filter => {
            let label = if app.mode() == InputMode::Filter {
                " filter "
            } else {
                " nrm "
            };
            push_powerline_segment(&mut spans, label, Color::White, PL_A, PL_B);
            let width = area.width.saturating_sub(40).max(24) as usize;
            push_powerline_segment(
                &mut spans,
                format!(" {} ", compact_text(app.status(), width)),
                Color::White,
                PL_B,
                BG,
            );
        }
    }

    if let Some(toast) = app.toasts().latest() {
        let color = match toast.notification.kind {
            NotificationKind::Error => ERROR,
            NotificationKind::Success => ACCENT,
        };
        spans.push(Span::styled(
            format!(
                " {} {}",
                toast.raised_at.format("%H:%M:%S"),
                compact_text(&toast.notification.message, 60)
            ),
            Style::default().fg(color),
        ));
    }

    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        area,
    );
}

fn render_filter_panel(frame: &mut Frame, app: &App) {
    let area = centered_rect(60, 70, frame.area());
    frame.render_widget(Clear, area);

    let active = app.filter_facet();
    let mut tabs = Vec::new();
    for facet in Facet::ALL {
        let dirty = if app.filters().is_dirty(facet) { "*" } else { "" };
        let style = if facet == active {
            Style::default().fg(Color::Black).bg(ACCENT).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(MUTED)
        };
        tabs.push(Span::styled(format!(" {}{dirty} ", facet.title()), style));
        tabs.push(Span::raw(" "));
    }

    let mut lines = vec![Line::from(tabs), Line::from("")];
    let values = app.filter_values();
    if values.is_empty() {
        lines.push(Line::from(Span::styled(
            "No values yet; expand groups to discover more",
            Style::default().fg(MUTED),
        )));
    }
    for (index, value) in values.iter().enumerate() {
        let checked = if app.filters().draft_allows(active, value) {
            "[x]"
        } else {
            "[ ]"
        };
        let style = if index == app.filter_cursor_index() {
            Style::default().bg(FOCUS_BG).fg(Color::White).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(Span::styled(format!("{checked} {value}"), style)));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "space toggle  a all  x none  Enter apply facet  A apply all  Esc discard",
        Style::default().fg(MUTED),
    )));

    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(pane_block("Filters", true)),
        area,
    );
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "kubetopo  cluster:{}  selection limit:{}",
            app.cluster().name,
            app.selection().limit()
        )),
        Line::from(""),
    ];
    for line in [
        "j/k move  g/G top/bottom  Tab switch pane  H/J/K/L pan",
        "Enter/z zoom into group (loads collapsed groups)",
        "+/- zoom  1/3/5 zoom presets  0 fit to screen",
        "Space select  x clear selection  p selection panel",
        "/ search  n/N next/previous match  Enter focus match  Esc close",
        "f filters  c hide/show containers  r refresh listing",
        ":ctx <name>  :ns <a,b>  :expand <namespace|Kind>  :q",
        "? help  q quit",
    ] {
        lines.push(Line::from(line));
    }

    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(pane_block("Help", true))
            .style(Style::default().fg(Color::White)),
        area,
    );
}

fn pane_block(title: &str, focused: bool) -> Block<'static> {
    Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL))
}

fn node_glyph(node: &RenderNode) -> &'static str {
    if node.placeholder {
        return "▸";
    }
    match node.kind {
        EntityKind::Cluster => "⎈",
        EntityKind::HierarchyGroup => "▾",
        EntityKind::Namespace | EntityKind::ClusterWideObjectGroup { .. } => "▾",
        EntityKind::Pod => "◆",
        EntityKind::Container => "·",
        EntityKind::ClusterWideObject { .. } => "◇",
    }
}

fn list_label(node: &RenderNode) -> String {
    match node.group_id.as_deref() {
        Some(group) if node.kind == EntityKind::Container => {
            let pod = group.rsplit('/').next().unwrap_or(group);
            format!("{pod}/{}", node.label)
        }
        _ => node.label.clone(),
    }
}

fn health_color(health: HealthStatus) -> Color {
    match health {
        HealthStatus::Healthy => ACCENT,
        HealthStatus::Warning => WARN,
        HealthStatus::Critical => ERROR,
        HealthStatus::Unknown => MUTED,
    }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut shortened = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    shortened.push('…');
    shortened
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{compact_text, list_label};
    use crate::graph::{Position, RenderNode};
    use crate::model::{EntityKind, HealthStatus};

    #[test]
    fn long_text_is_shortened_with_ellipsis() {
        assert_eq!(compact_text("kube-system", 20), "kube-system");
        assert_eq!(compact_text("kube-system", 5), "kube…");
    }

    #[test]
    fn container_rows_carry_their_pod_name() {
        let node = RenderNode {
            id: "container/default/web/nginx".to_string(),
            group_id: Some("pod/default/web".to_string()),
            kind: EntityKind::Container,
            label: "nginx".to_string(),
            health: HealthStatus::Healthy,
            placeholder: false,
            hidden: false,
            position: Position::default(),
            depth: 3,
        };
        assert_eq!(list_label(&node), "web/nginx");
    }
}
