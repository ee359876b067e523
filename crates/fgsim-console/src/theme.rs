use fgsim_core::{LogLevel, TaskState};
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn task_state_color(state: TaskState) -> Color {
    match state {
        TaskState::NotStarted => Color::Rgb(146, 131, 116),
        TaskState::Running => Color::Rgb(131, 165, 152),
        TaskState::Finished => Color::Rgb(184, 187, 38),
        TaskState::Anomalous => Color::Rgb(211, 134, 155),
    }
}

pub fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Debug => Color::Rgb(146, 131, 116),
        LogLevel::Info => Color::Rgb(189, 174, 147),
        LogLevel::Warning => Color::Rgb(250, 189, 47),
        LogLevel::Error => Color::Rgb(254, 128, 25),
        LogLevel::Critical => Color::Rgb(214, 93, 14),
    }
}
