use crate::app::{App, InputMode};
use crate::command::USAGE;
use crate::notifier::{Notice, NoticeLevel};
use crate::table::{ManifestTable, TableCell};
use crate::task::StartPhase;
use crate::theme;
use fgsim_core::LogLevel;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &App) {
    let area = f.size();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(45),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, layout[0]);
    render_products(f, app, layout[1]);
    render_logs(f, app, layout[2]);
    render_footer(f, app, layout[3]);

    if app.show_help {
        render_help(f, centered(area, 70, 70));
    }
    if app.state.logs.clear_pending() {
        render_confirm_clear(f, app, centered(area, 50, 20));
    } else if let Some(notice) = app.state.notices.current() {
        render_notice(f, notice, app.state.notices.len(), centered(area, 60, 30));
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let state = &app.state;
    let task_state = state.task.state();
    let phase = match state.task.phase() {
        StartPhase::Idle => "",
        StartPhase::Starting => " (starting)",
        StartPhase::Reconciling => " (syncing)",
    };
    let (link, link_color) = if state.is_connected() {
        ("connected", Color::Rgb(184, 187, 38))
    } else {
        ("disconnected", Color::Rgb(254, 128, 25))
    };
    let (config, config_color) = if state.config_valid() {
        ("valid", Color::Rgb(184, 187, 38))
    } else {
        ("invalid", Color::Rgb(254, 128, 25))
    };
    let viewer = match state.viewer() {
        Some(cmd) if state.validator.is_valid(cmd) => Span::styled(cmd.to_string(), Color::Cyan),
        Some(cmd) => Span::styled(
            format!(
                "{cmd} ({})",
                state.validator.error_message(cmd).unwrap_or("unchecked")
            ),
            Color::Rgb(254, 128, 25),
        ),
        None => Span::styled("none", theme::MUTED_STYLE),
    };

    let line = Line::from(vec![
        Span::styled("Task ", theme::HEADER_STYLE),
        Span::styled(
            format!("{task_state}{phase}"),
            Style::default()
                .fg(theme::task_state_color(task_state))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("   Hub "),
        Span::styled(link, link_color),
        Span::raw("   Config "),
        Span::styled(config, config_color),
        Span::raw("   Viewer "),
        viewer,
    ]);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("fgsim console - {}", state.base_url()));
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn cell_text(cell: &TableCell) -> String {
    match (&cell.healpix, &cell.hpx) {
        (None, _) => "-".to_string(),
        (Some(healpix), None) => format!("healpix {}", human_size(healpix.size)),
        (Some(healpix), Some(hpx)) => format!(
            "healpix {} + hpx {}",
            human_size(healpix.size),
            human_size(hpx.size)
        ),
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn render_products(f: &mut Frame, app: &App, area: Rect) {
    let Some(table) = app.state.products.table() else {
        let block = Block::default().borders(Borders::ALL).title("Products");
        let hint = Paragraph::new(Line::from(Span::styled(
            "No manifest loaded. Use :load <path>.",
            theme::MUTED_STYLE,
        )))
        .block(block);
        f.render_widget(hint, area);
        return;
    };
    render_table(f, app, &table, area);
}

fn render_table(f: &mut Frame, app: &App, table: &ManifestTable, area: Rect) {
    let header = Row::new(table.headers.iter().cloned().map(Cell::from)).style(theme::HEADER_STYLE);
    let rows = table.rows.iter().enumerate().map(|(row_index, row)| {
        let mut cells = vec![Cell::from(row.label.clone())];
        cells.extend(row.cells.iter().enumerate().map(|(col_index, cell)| {
            let mut style = Style::default();
            if !cell.is_present() {
                style = theme::MUTED_STYLE;
            } else if cell.hpx.is_some() {
                style = style.fg(Color::Rgb(184, 187, 38));
            }
            if row_index == app.selected_row && col_index == app.selected_col {
                style = theme::SELECTED_STYLE;
            }
            Cell::from(cell_text(cell)).style(style)
        }));
        Row::new(cells).style(theme::zebra_row_style(row_index))
    });

    let mut widths = vec![Constraint::Length(18)];
    let columns = table.data_columns().max(1) as u32;
    widths.extend((0..table.data_columns()).map(|_| Constraint::Ratio(1, columns)));

    let title = if app.state.products.is_local() {
        "Products (local: o open, v convert, d download)"
    } else {
        "Products (remote: v convert, d download)"
    };
    let widget = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, area);
}

fn render_logs(f: &mut Frame, app: &App, area: Rect) {
    let logs = &app.state.logs;
    let toggles: Vec<Span> = [
        ("1", LogLevel::Debug),
        ("2", LogLevel::Info),
        ("3", LogLevel::Warning),
        ("4", LogLevel::Error),
    ]
    .into_iter()
    .map(|(key, level)| {
        let label = if level == LogLevel::Error {
            "error/critical".to_string()
        } else {
            level.as_str().to_string()
        };
        let style = if logs.is_visible(level) {
            Style::default().fg(theme::level_color(level))
        } else {
            theme::MUTED_STYLE.add_modifier(Modifier::CROSSED_OUT)
        };
        Span::styled(format!(" {key}:{label} "), style)
    })
    .collect();

    let capacity = area.height.saturating_sub(2) as usize;
    let visible: Vec<_> = logs.visible().collect();
    let skip = visible.len().saturating_sub(capacity);
    let lines: Vec<Line> = visible
        .into_iter()
        .skip(skip)
        .map(|record| {
            Line::from(vec![
                Span::styled(format!("{} ", record.timestamp), theme::MUTED_STYLE),
                Span::styled(
                    format!("{:<8} ", record.level.levelname()),
                    Style::default().fg(theme::level_color(record.level)),
                ),
                Span::styled(format!("[{}] ", record.logger_name), Color::Cyan),
                Span::raw(record.message.clone()),
            ])
        })
        .collect();

    let mut title = vec![Span::raw(format!("Log ({}) ", logs.len()))];
    title.extend(toggles);
    let block = Block::default().borders(Borders::ALL).title(Line::from(title));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let line = match app.mode {
        InputMode::Command => Line::from(vec![
            Span::styled(":", Color::Yellow),
            Span::raw(app.command_line.clone()),
            Span::styled("_", Color::Yellow),
        ]),
        InputMode::Normal => {
            let start = if app.state.task.can_start() {
                Span::styled("s start", Color::Cyan)
            } else {
                Span::styled("s start", theme::MUTED_STYLE)
            };
            Line::from(vec![
                start,
                Span::raw("  r status  f fetch  c clear  1-4 levels  : command  ? help  q quit"),
            ])
        }
    };
    f.render_widget(Paragraph::new(line), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let mut text = vec![
        Line::from(Span::styled(
            "Commands",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    text.extend(USAGE.iter().map(|(usage, what)| {
        Line::from(vec![
            Span::styled(format!(":{usage:<36}"), Color::Cyan),
            Span::raw(*what),
        ])
    }));
    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), area);
}

fn render_notice(f: &mut Frame, notice: &Notice, pending: usize, area: Rect) {
    let color = match notice.level {
        NoticeLevel::Info => Color::Rgb(131, 165, 152),
        NoticeLevel::Error => Color::Rgb(254, 128, 25),
    };
    let title = match notice.code {
        Some(code) => format!("{} ({code})", notice.title),
        None => notice.title.clone(),
    };
    let mut text = vec![
        Line::from(notice.message.clone()),
        Line::from(""),
        Line::from(Span::styled(
            format!("{}  Enter to dismiss", notice.at.format("%H:%M:%S")),
            theme::MUTED_STYLE,
        )),
    ];
    if pending > 1 {
        text.push(Line::from(Span::styled(
            format!("{} more", pending - 1),
            theme::MUTED_STYLE,
        )));
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(Style::default().fg(color));
    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), area);
}

fn render_confirm_clear(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Clear log")
        .border_style(Style::default().fg(Color::Yellow));
    let text = vec![
        Line::from(format!("Drop all {} log records?", app.state.logs.len())),
        Line::from(Span::styled("y to confirm, any other key to keep", theme::MUTED_STYLE)),
    ];
    f.render_widget(Clear, area);
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
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
        .split(vertical[1])[1]
}
