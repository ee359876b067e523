use crate::actions::Action;
use crate::command::{self, Command};
use crate::notifier::{Notice, Notifier};
use crate::state::ConsoleState;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use fgsim_core::LogLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Command,
}

/// Terminal-side view state wrapped around the [`ConsoleState`] store.
pub struct App {
    pub state: ConsoleState,
    pub mode: InputMode,
    pub command_line: String,
    pub selected_row: usize,
    pub selected_col: usize,
    pub show_help: bool,
    default_task: Option<String>,
    quit: bool,
}

impl App {
    pub fn new(state: ConsoleState, default_task: Option<String>) -> Self {
        Self {
            state,
            mode: InputMode::Normal,
            command_line: String::new(),
            selected_row: 0,
            selected_col: 0,
            show_help: false,
            default_task,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Vec<Action> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return Vec::new();
        }
        if self.state.logs.clear_pending() {
            let accepted = matches!(key.code, KeyCode::Char('y') | KeyCode::Char('Y'));
            self.state.logs.confirm_clear(accepted);
            return Vec::new();
        }
        if self.mode == InputMode::Command {
            return self.handle_command_key(key);
        }
        if self.state.notices.current().is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.state.notices.dismiss();
            }
            return Vec::new();
        }
        self.handle_normal_key(key)
    }

    fn handle_command_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Esc => {
                self.mode = InputMode::Normal;
                self.command_line.clear();
                Vec::new()
            }
            KeyCode::Enter => {
                self.mode = InputMode::Normal;
                let line = std::mem::take(&mut self.command_line);
                match command::parse(&line) {
                    Ok(command) => self.execute(command),
                    Err(reason) => {
                        self.state.notices.notify(Notice::error("Command", reason));
                        Vec::new()
                    }
                }
            }
            KeyCode::Backspace => {
                if self.command_line.pop().is_none() {
                    self.mode = InputMode::Normal;
                }
                Vec::new()
            }
            KeyCode::Char(ch) => {
                self.command_line.push(ch);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Vec<Action> {
        match key.code {
            KeyCode::Char('q') => {
                self.quit = true;
                Vec::new()
            }
            KeyCode::Char(':') => {
                self.mode = InputMode::Command;
                Vec::new()
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                Vec::new()
            }
            KeyCode::Char('s') => self.state.start(self.default_task.clone(), None),
            KeyCode::Char('r') => self.state.pull_status(),
            KeyCode::Char('f') => self.state.fetch(),
            KeyCode::Char('c') => {
                self.state.logs.request_clear();
                Vec::new()
            }
            KeyCode::Char('1') => self.toggle(LogLevel::Debug),
            KeyCode::Char('2') => self.toggle(LogLevel::Info),
            KeyCode::Char('3') => self.toggle(LogLevel::Warning),
            KeyCode::Char('4') => self.toggle(LogLevel::Error),
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_row = self.selected_row.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected_row += 1;
                self.clamp_selection();
                Vec::new()
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.selected_col = self.selected_col.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.selected_col += 1;
                self.clamp_selection();
                Vec::new()
            }
            KeyCode::Char('o') => self.on_selected(|state, comp, freq| state.open(comp, freq)),
            KeyCode::Char('v') => self.on_selected(|state, comp, freq| state.convert(comp, freq)),
            KeyCode::Char('d') => {
                self.on_selected(|state, comp, freq| state.download(comp, freq, true))
            }
            _ => Vec::new(),
        }
    }

    fn toggle(&mut self, level: LogLevel) -> Vec<Action> {
        self.state.logs.toggle_visibility(level);
        Vec::new()
    }

    /// Keeps the cursor inside the current table after moves and refetches.
    pub fn clamp_selection(&mut self) {
        let Some(table) = self.state.products.table() else {
            self.selected_row = 0;
            self.selected_col = 0;
            return;
        };
        self.selected_row = self.selected_row.min(table.rows.len().saturating_sub(1));
        self.selected_col = self.selected_col.min(table.data_columns().saturating_sub(1));
    }

    fn on_selected<F>(&mut self, run: F) -> Vec<Action>
    where
        F: FnOnce(&mut ConsoleState, &str, fgsim_core::FrequencyId) -> Vec<Action>,
    {
        let selected = self
            .state
            .products
            .table()
            .and_then(|table| table.cell(self.selected_row, self.selected_col).cloned());
        match selected {
            Some(cell) => run(&mut self.state, &cell.component, cell.frequency_id),
            None => {
                self.state
                    .notices
                    .notify(Notice::error("No product selected", "load a manifest first"));
                Vec::new()
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Vec<Action> {
        match command {
            Command::Start { task, kwargs } => {
                let task = task.or_else(|| self.default_task.clone());
                self.state.start(task, kwargs)
            }
            Command::Status => self.state.pull_status(),
            Command::Load(path) => self.state.load(&path),
            Command::Fetch => self.state.fetch(),
            Command::Save { path, clobber } => self.state.save(&path, clobber),
            Command::Reset => self.state.reset(),
            Command::Convert(comp, freq) => self.state.convert(&comp, freq),
            Command::Open(comp, freq) => self.state.open(&comp, freq),
            Command::Download {
                comp_id,
                freq_id,
                hpx,
            } => self.state.download(&comp_id, freq_id, hpx),
            Command::Check(cmd) => self.state.check(&cmd),
            Command::Viewer(cmd) => self.state.set_viewer(&cmd),
            Command::Config(valid) => {
                self.state.set_config_valid(valid);
                Vec::new()
            }
            Command::Toggle(level) => self.toggle(level),
            Command::Clear => {
                self.state.logs.request_clear();
                Vec::new()
            }
            Command::Quit => {
                self.quit = true;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgsim_core::LogRecord;

    fn press(app: &mut App, code: KeyCode) -> Vec<Action> {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_line(app: &mut App, line: &str) -> Vec<Action> {
        press(app, KeyCode::Char(':'));
        for ch in line.chars() {
            press(app, KeyCode::Char(ch));
        }
        press(app, KeyCode::Enter)
    }

    #[test]
    fn command_line_issues_actions() {
        let mut app = App::new(ConsoleState::new("http://hub", true), Some("simulate".into()));
        assert_eq!(
            type_line(&mut app, "load /data/manifest.json"),
            vec![Action::LoadManifest {
                path: "/data/manifest.json".to_string()
            }]
        );
        assert_eq!(
            type_line(&mut app, "start"),
            vec![Action::Start {
                task: Some("simulate".to_string()),
                kwargs: None
            }]
        );
        assert_eq!(app.mode, InputMode::Normal);
    }

    #[test]
    fn clear_prompt_swallows_the_next_key() {
        let mut app = App::new(ConsoleState::new("", true), None);
        app.state
            .logs
            .append(LogRecord::new(LogLevel::Info, "fg21sim", "hello"));
        press(&mut app, KeyCode::Char('c'));
        assert!(press(&mut app, KeyCode::Char('q')).is_empty());
        assert!(!app.should_quit());
        assert_eq!(app.state.logs.len(), 1);

        press(&mut app, KeyCode::Char('c'));
        press(&mut app, KeyCode::Char('y'));
        assert!(app.state.logs.is_empty());
    }

    #[test]
    fn notices_block_keys_until_dismissed() {
        let mut app = App::new(ConsoleState::new("", false), None);
        assert!(press(&mut app, KeyCode::Char('s')).is_empty());
        assert!(app.state.notices.current().is_some());
        assert!(press(&mut app, KeyCode::Char('q')).is_empty());
        assert!(!app.should_quit());
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Char('q'));
        assert!(app.should_quit());
    }
}
