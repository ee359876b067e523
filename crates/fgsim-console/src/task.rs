use crate::actions::Action;
use crate::LocalRejection;
use fgsim_core::{ActionError, TaskState, TaskStatus};
use serde_json::Value;

/// Where the single allowed start request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    Idle,
    /// Start call in flight.
    Starting,
    /// Start call resolved; waiting for the status pull that settles the state.
    Reconciling,
}

#[derive(Debug)]
pub struct TaskController {
    status: TaskStatus,
    phase: StartPhase,
}

impl Default for TaskController {
    fn default() -> Self {
        Self {
            status: TaskStatus::IDLE,
            phase: StartPhase::Idle,
        }
    }
}

impl TaskController {
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn state(&self) -> TaskState {
        self.status.state()
    }

    pub fn phase(&self) -> StartPhase {
        self.phase
    }

    /// Only an in-flight start blocks the next one; a job started elsewhere is the hub's call.
    pub fn can_start(&self) -> bool {
        self.phase == StartPhase::Idle
    }

    /// Optimistically marks the task running and returns the start call.
    pub fn request_start(
        &mut self,
        config_valid: bool,
        task: Option<String>,
        kwargs: Option<Value>,
    ) -> Result<Action, LocalRejection> {
        if !config_valid {
            return Err(LocalRejection::ConfigInvalid);
        }
        if self.phase != StartPhase::Idle {
            return Err(LocalRejection::StartInFlight);
        }
        self.phase = StartPhase::Starting;
        self.status = TaskStatus::RUNNING;
        Ok(Action::Start { task, kwargs })
    }

    pub fn on_push_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    /// Success or failure, the start call is always followed by one status pull.
    pub fn on_start_result<T>(&mut self, _result: &Result<T, ActionError>) -> Action {
        self.phase = StartPhase::Reconciling;
        Action::PullStatus
    }

    pub fn on_status_pull(&mut self, result: &Result<TaskStatus, ActionError>) {
        if let Ok(status) = result {
            self.status = *status;
        }
        if self.phase == StartPhase::Reconciling {
            self.phase = StartPhase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_latest_flags() {
        let mut task = TaskController::default();
        assert_eq!(task.state(), TaskState::NotStarted);
        task.on_push_status(TaskStatus::new(true, false));
        assert_eq!(task.state(), TaskState::Running);
        task.on_push_status(TaskStatus::new(true, true));
        assert_eq!(task.state(), TaskState::Anomalous);
        task.on_push_status(TaskStatus::new(false, true));
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[test]
    fn invalid_config_is_rejected_without_side_effects() {
        let mut task = TaskController::default();
        let err = task.request_start(false, None, None).expect_err("invalid");
        assert_eq!(err, LocalRejection::ConfigInvalid);
        assert_eq!(task.state(), TaskState::NotStarted);
        assert!(task.can_start());
    }

    #[test]
    fn start_is_disabled_until_the_status_pull_lands() {
        let mut task = TaskController::default();
        let action = task.request_start(true, None, None).expect("start");
        assert_eq!(action, Action::Start { task: None, kwargs: None });
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.can_start());
        assert_eq!(
            task.request_start(true, None, None),
            Err(LocalRejection::StartInFlight)
        );

        let failed: Result<(), ActionError> = Err(ActionError::new(500, "stage 'simulate' failed"));
        assert_eq!(task.on_start_result(&failed), Action::PullStatus);
        assert_eq!(task.phase(), StartPhase::Reconciling);
        assert!(!task.can_start());

        task.on_status_pull(&Ok(TaskStatus::FINISHED));
        assert_eq!(task.state(), TaskState::Finished);
        assert!(task.can_start());
    }

    #[test]
    fn failed_pull_keeps_last_state_but_releases_start() {
        let mut task = TaskController::default();
        task.request_start(true, None, None).expect("start");
        task.on_start_result::<()>(&Ok(()));
        task.on_status_pull(&Err(ActionError::network("connection refused")));
        assert_eq!(task.phase(), StartPhase::Idle);
        assert_eq!(task.state(), TaskState::Running);
    }

    #[test]
    fn job_started_elsewhere_still_reaches_the_hub() {
        let mut task = TaskController::default();
        task.on_push_status(TaskStatus::RUNNING);
        assert!(task.can_start());
        assert_eq!(
            task.request_start(true, None, None),
            Ok(Action::Start { task: None, kwargs: None })
        );
    }
}
