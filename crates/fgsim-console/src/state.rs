use crate::actions::{Action, ActionOutcome};
use crate::logs::LogStream;
use crate::notifier::{Notice, NoticeQueue, Notifier};
use crate::products::ManifestManager;
use crate::session::SessionEvent;
use crate::task::TaskController;
use crate::validator::ExecutableValidator;
use crate::LocalRejection;
use fgsim_core::{ConsoleMsg, FrequencyId, PushMsg};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Owns every piece of client state. Operations return the calls to issue;
/// completions come back through [`ConsoleState::apply_outcome`].
pub struct ConsoleState {
    pub task: TaskController,
    pub logs: LogStream,
    pub products: ManifestManager,
    pub validator: ExecutableValidator,
    pub notices: NoticeQueue,
    base_url: String,
    config_valid: bool,
    connected: bool,
    viewer: Option<String>,
}

impl ConsoleState {
    pub fn new(base_url: impl Into<String>, config_valid: bool) -> Self {
        Self {
            task: TaskController::default(),
            logs: LogStream::default(),
            products: ManifestManager::default(),
            validator: ExecutableValidator::default(),
            notices: NoticeQueue::default(),
            base_url: base_url.into(),
            config_valid,
            connected: false,
            viewer: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config_valid(&self) -> bool {
        self.config_valid
    }

    /// Fed by whatever owns the configuration form.
    pub fn set_config_valid(&mut self, valid: bool) {
        self.config_valid = valid;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    fn reject(&mut self, title: &str, rejection: LocalRejection) -> Vec<Action> {
        debug!(event = "local_rejection", action = title, reason = %rejection);
        self.notices.notify(Notice::error(title, rejection.to_string()));
        Vec::new()
    }

    fn issue(&mut self, title: &str, action: Result<Action, LocalRejection>) -> Vec<Action> {
        match action {
            Ok(action) => vec![action],
            Err(rejection) => self.reject(title, rejection),
        }
    }

    pub fn start(&mut self, task: Option<String>, kwargs: Option<Value>) -> Vec<Action> {
        let action = self.task.request_start(self.config_valid, task, kwargs);
        self.issue("Cannot start task", action)
    }

    pub fn pull_status(&self) -> Vec<Action> {
        vec![Action::PullStatus]
    }

    pub fn check(&mut self, cmd: &str) -> Vec<Action> {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            return self.reject("Cannot check command", LocalRejection::EmptyArgument("command"));
        }
        vec![self.validator.check(cmd)]
    }

    /// Sets the viewer and validates it right away.
    pub fn set_viewer(&mut self, cmd: &str) -> Vec<Action> {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            self.viewer = None;
            return Vec::new();
        }
        self.viewer = Some(cmd.to_string());
        self.check(cmd)
    }

    pub fn load(&mut self, path: &str) -> Vec<Action> {
        let action = self.products.load(path);
        self.issue("Cannot load manifest", action)
    }

    pub fn fetch(&self) -> Vec<Action> {
        vec![self.products.fetch()]
    }

    pub fn save(&mut self, path: &str, clobber: bool) -> Vec<Action> {
        let action = self.products.save(path, clobber);
        self.issue("Cannot save manifest", action)
    }

    pub fn reset(&self) -> Vec<Action> {
        vec![self.products.reset()]
    }

    pub fn convert(&mut self, comp_id: &str, freq_id: FrequencyId) -> Vec<Action> {
        let action = self.products.convert(comp_id, freq_id);
        self.issue("Cannot convert", action)
    }

    pub fn open(&mut self, comp_id: &str, freq_id: FrequencyId) -> Vec<Action> {
        let action =
            self.products
                .open(comp_id, freq_id, self.viewer.as_deref(), &self.validator);
        self.issue("Cannot open product", action)
    }

    pub fn download(&mut self, comp_id: &str, freq_id: FrequencyId, hpx: bool) -> Vec<Action> {
        let action = self
            .products
            .download(&self.base_url, comp_id, freq_id, hpx);
        self.issue("Cannot download product", action)
    }

    pub fn apply_session(&mut self, event: SessionEvent) -> Vec<Action> {
        match event {
            SessionEvent::Connected => {
                self.connected = true;
                info!(event = "session_connected");
                // Events missed while disconnected are not replayed.
                vec![Action::PullStatus, Action::FetchManifest]
            }
            SessionEvent::Disconnected => {
                self.connected = false;
                Vec::new()
            }
            SessionEvent::Push(PushMsg::Console(ConsoleMsg::Log(record))) => {
                self.logs.append(record);
                Vec::new()
            }
            SessionEvent::Push(PushMsg::Console(ConsoleMsg::Status { status })) => {
                self.task.on_push_status(status);
                Vec::new()
            }
        }
    }

    pub fn apply_outcome(&mut self, outcome: ActionOutcome) -> Vec<Action> {
        match outcome {
            ActionOutcome::Started(result) => {
                match &result {
                    Ok(reply) => self.notices.notify(Notice::info(
                        "Task finished",
                        format!(
                            "task '{}' completed in {:.1}s",
                            reply.task,
                            reply.elapsed_ms as f64 / 1000.0
                        ),
                    )),
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Task failed", err)),
                }
                vec![self.task.on_start_result(&result)]
            }
            ActionOutcome::Status(result) => {
                if let Err(err) = &result {
                    self.notices
                        .notify(Notice::from_action_error("Status unavailable", err));
                }
                self.task.on_status_pull(&result);
                Vec::new()
            }
            ActionOutcome::Loaded { path, result } => match result {
                Ok(reply) => {
                    info!(event = "manifest_loaded", path = %path);
                    self.notices.notify(Notice::info("Manifest loaded", reply.message));
                    vec![self.products.fetch()]
                }
                Err(err) => {
                    self.notices
                        .notify(Notice::from_action_error("Load failed", &err));
                    Vec::new()
                }
            },
            ActionOutcome::Fetched(result) => {
                match result {
                    Ok(reply) => self.products.on_fetched(reply),
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Fetch failed", &err)),
                }
                Vec::new()
            }
            ActionOutcome::Saved { path, result } => {
                match result {
                    Ok(_) => self
                        .notices
                        .notify(Notice::info("Manifest saved", format!("written to {path}"))),
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Save failed", &err)),
                }
                Vec::new()
            }
            ActionOutcome::Reset(result) => {
                match result {
                    Ok(reply) => {
                        self.products.on_reset();
                        self.notices.notify(Notice::info("Manifest reset", reply.message));
                    }
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Reset failed", &err)),
                }
                Vec::new()
            }
            ActionOutcome::Converted {
                comp_id,
                freq_id,
                result,
            } => {
                match result {
                    Ok(product) => {
                        let message = match &product.hpx {
                            Some(hpx) => format!("{comp_id} #{freq_id}: {}", hpx.path),
                            None => format!("{comp_id} #{freq_id}: no HPX image returned"),
                        };
                        self.products.on_converted(&comp_id, freq_id, product);
                        self.notices.notify(Notice::info("Converted", message));
                    }
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Conversion failed", &err)),
                }
                Vec::new()
            }
            ActionOutcome::Checked { cmd, result } => {
                self.validator.on_checked(&cmd, &result);
                match &result {
                    Ok(reply) => self
                        .notices
                        .notify(Notice::info("Command found", format!("{cmd}: {}", reply.path))),
                    Err(err) => {
                        warn!(event = "command_invalid", cmd = %cmd, code = err.code);
                        self.notices
                            .notify(Notice::from_action_error("Invalid command", err));
                    }
                }
                Vec::new()
            }
            ActionOutcome::Opened {
                comp_id,
                freq_id,
                result,
            } => {
                match result {
                    Ok(reply) => self.notices.notify(Notice::info(
                        "Viewer started",
                        format!("{comp_id} #{freq_id} opened (pid {})", reply.pid),
                    )),
                    Err(err) => self
                        .notices
                        .notify(Notice::from_action_error("Open failed", &err)),
                }
                Vec::new()
            }
            ActionOutcome::Downloaded { url, result } => {
                match result {
                    Ok(()) => self.notices.notify(Notice::info("Download", url)),
                    Err(err) => self.notices.notify(Notice {
                        message: format!("open {url} manually ({})", err.reason),
                        ..Notice::from_action_error("Download", &err)
                    }),
                }
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgsim_core::{LogLevel, LogRecord, TaskState, TaskStatus};

    #[test]
    fn reconnect_pulls_status_and_manifest() {
        let mut state = ConsoleState::new("http://127.0.0.1:21021", true);
        assert_eq!(
            state.apply_session(SessionEvent::Connected),
            vec![Action::PullStatus, Action::FetchManifest]
        );
        assert!(state.is_connected());
        assert!(state.apply_session(SessionEvent::Disconnected).is_empty());
        assert!(!state.is_connected());
    }

    #[test]
    fn push_events_route_to_task_and_logs() {
        let mut state = ConsoleState::new("", true);
        state.apply_session(SessionEvent::Push(PushMsg::status(TaskStatus::new(true, true))));
        assert_eq!(state.task.state(), TaskState::Anomalous);

        state.apply_session(SessionEvent::Push(PushMsg::log(LogRecord::new(
            LogLevel::Warning,
            "fg21sim",
            "slow",
        ))));
        assert_eq!(state.logs.len(), 1);
        assert!(state.notices.is_empty());
    }

    #[test]
    fn blank_check_is_rejected_locally() {
        let mut state = ConsoleState::new("", true);
        assert!(state.check("   ").is_empty());
        assert!(state.notices.current().is_some_and(Notice::is_error));
    }
}
