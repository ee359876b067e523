use crate::error::ApiError;
use crate::push::PushHub;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use fgsim_core::actions::{ConsoleRequest, StartReply, StatusReply};
use fgsim_core::{LogLevel, LogRecord, PushMsg, TaskStatus};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const STAGES: [&str; 3] = ["preprocess", "simulate", "postprocess"];
const DEFAULT_TASK: &str = "simulate";
const HUB_LOGGER: &str = "fgsim.hub";

/// External simulation command; each stage runs it once with the stage name appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl JobSpec {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

pub struct TaskRunner {
    job: Option<JobSpec>,
    status: Mutex<TaskStatus>,
    push: Arc<PushHub>,
}

impl TaskRunner {
    pub fn new(job: Option<JobSpec>, push: Arc<PushHub>) -> Self {
        Self {
            job,
            status: Mutex::new(TaskStatus::IDLE),
            push,
        }
    }

    pub async fn status(&self) -> TaskStatus {
        *self.status.lock().await
    }

    async fn set_status(&self, status: TaskStatus) {
        *self.status.lock().await = status;
        self.push.publish(&PushMsg::status(status)).await;
    }

    async fn emit(&self, level: LogLevel, message: String) {
        self.push
            .publish(&PushMsg::log(LogRecord::new(level, HUB_LOGGER, message)))
            .await;
    }

    async fn claim(&self) -> Result<(), ApiError> {
        let mut status = self.status.lock().await;
        if status.running {
            return Err(ApiError::conflict("a task is already running"));
        }
        *status = TaskStatus::RUNNING;
        drop(status);
        self.push.publish(&PushMsg::status(TaskStatus::RUNNING)).await;
        Ok(())
    }

    /// Runs the job to completion. The job keeps running if the caller goes away.
    pub async fn start(
        self: &Arc<Self>,
        task: Option<String>,
        kwargs: Option<Value>,
    ) -> Result<StartReply, ApiError> {
        let job = self
            .job
            .clone()
            .ok_or_else(|| ApiError::unavailable("no simulation job configured"))?;
        self.claim().await?;

        let task = task
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TASK.to_string());
        let kwargs = kwargs
            .map(|value| value.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let started = Instant::now();
        let runner = self.clone();
        let task_name = task.clone();
        let handle = tokio::spawn(async move { runner.run_job(&job, &task_name, &kwargs).await });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.set_status(TaskStatus::FINISHED).await;
                Err(format!("task aborted: {err}"))
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => Ok(StartReply { task, elapsed_ms }),
            Err(reason) => Err(ApiError::internal(reason)),
        }
    }

    async fn run_job(&self, job: &JobSpec, task: &str, kwargs: &str) -> Result<(), String> {
        info!(event = "task_start", task = task, program = %job.program);
        self.emit(LogLevel::Info, format!("task '{task}' started"))
            .await;

        let mut outcome = Ok(());
        for stage in STAGES {
            if let Err(reason) = self.run_stage(job, task, kwargs, stage).await {
                outcome = Err(reason);
                break;
            }
        }

        match &outcome {
            Ok(()) => {
                info!(event = "task_finished", task = task);
                self.emit(LogLevel::Info, format!("task '{task}' finished"))
                    .await;
            }
            Err(reason) => {
                warn!(event = "task_failed", task = task, reason = %reason);
                self.emit(LogLevel::Error, format!("task '{task}' failed: {reason}"))
                    .await;
            }
        }
        self.set_status(TaskStatus::FINISHED).await;
        outcome
    }

    async fn run_stage(
        &self,
        job: &JobSpec,
        task: &str,
        kwargs: &str,
        stage: &str,
    ) -> Result<(), String> {
        info!(event = "stage_start", task = task, stage = stage);
        let mut child = Command::new(&job.program)
            .args(&job.args)
            .arg(stage)
            .env("FGSIM_TASK", task)
            .env("FGSIM_TASK_KWARGS", kwargs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| format!("cannot spawn '{}': {err}", job.program))?;

        let logger = format!("fgsim.{stage}");
        let stdout = child.stdout.take().map(|out| {
            tokio::spawn(forward_lines(
                out,
                LogLevel::Info,
                logger.clone(),
                self.push.clone(),
            ))
        });
        let stderr = child.stderr.take().map(|err| {
            tokio::spawn(forward_lines(
                err,
                LogLevel::Warning,
                logger.clone(),
                self.push.clone(),
            ))
        });

        let exit = child
            .wait()
            .await
            .map_err(|err| format!("stage '{stage}' wait failed: {err}"))?;
        for forwarder in [stdout, stderr].into_iter().flatten() {
            let _ = forwarder.await;
        }

        if exit.success() {
            info!(event = "stage_done", task = task, stage = stage);
            Ok(())
        } else {
            Err(format!("stage '{stage}' exited with {exit}"))
        }
    }
}

async fn forward_lines<R>(reader: R, fallback: LogLevel, logger: String, push: Arc<PushHub>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let record = parse_job_line(&line, fallback, &logger);
                push.publish(&PushMsg::log(record)).await;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(event = "job_output_error", logger = %logger, error = %err);
                break;
            }
        }
    }
}

/// A job line that is itself a JSON log record is forwarded as-is.
pub fn parse_job_line(line: &str, fallback: LogLevel, logger: &str) -> LogRecord {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        if let Ok(record) = serde_json::from_str::<LogRecord>(trimmed) {
            return record;
        }
    }
    LogRecord::new(fallback, logger, line.trim_end())
}

pub async fn status(State(state): State<AppState>) -> Json<StatusReply> {
    Json(StatusReply {
        status: state.runner.status().await,
    })
}

pub async fn action(
    State(state): State<AppState>,
    payload: Result<Json<ConsoleRequest>, JsonRejection>,
) -> Result<Json<StartReply>, ApiError> {
    let Json(request) = payload.map_err(|err| ApiError::bad_request(err.body_text()))?;
    match request {
        ConsoleRequest::Start { task, kwargs } => {
            let reply = state.runner.start(task, kwargs).await?;
            Ok(Json(reply))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::PushConfig;

    fn runner(job: Option<JobSpec>) -> Arc<TaskRunner> {
        Arc::new(TaskRunner::new(
            job,
            Arc::new(PushHub::new(PushConfig::default())),
        ))
    }

    fn shell_job(script: &str) -> JobSpec {
        JobSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "fgsim-job".to_string()],
        }
    }

    #[test]
    fn job_lines_prefer_embedded_records() {
        let record = parse_job_line(
            r#"{"levelname":"ERROR","asctime":"t","name":"fg21sim.sky","message":"bad map"}"#,
            LogLevel::Info,
            "fgsim.simulate",
        );
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.logger_name, "fg21sim.sky");

        let record = parse_job_line("plain output  ", LogLevel::Warning, "fgsim.simulate");
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.logger_name, "fgsim.simulate");
        assert_eq!(record.message, "plain output");
    }

    #[test]
    fn job_spec_requires_a_program() {
        assert_eq!(JobSpec::from_argv(&[]), None);
        let spec = JobSpec::from_argv(&["fg21sim".to_string(), "sim.conf".to_string()])
            .expect("spec");
        assert_eq!(spec.program, "fg21sim");
        assert_eq!(spec.args, vec!["sim.conf".to_string()]);
    }

    #[tokio::test]
    async fn start_without_job_is_unavailable_and_leaves_status_idle() {
        let runner = runner(None);
        let err = runner.start(None, None).await.expect_err("no job");
        assert_eq!(err.status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(runner.status().await, TaskStatus::IDLE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_job_runs_every_stage_and_finishes() {
        let runner = runner(Some(shell_job("echo \"stage $1\"")));
        let reply = runner
            .start(Some("test".to_string()), None)
            .await
            .expect("start");
        assert_eq!(reply.task, "test");
        assert_eq!(runner.status().await, TaskStatus::FINISHED);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_stage_reports_reason_and_still_finishes() {
        let runner = runner(Some(shell_job("[ \"$1\" != simulate ]")));
        let err = runner.start(None, None).await.expect_err("stage fails");
        assert_eq!(err.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.reason.contains("simulate"));
        assert_eq!(runner.status().await, TaskStatus::FINISHED);
    }

    #[tokio::test]
    async fn second_start_while_running_conflicts() {
        let runner = runner(Some(JobSpec {
            program: "true".to_string(),
            args: Vec::new(),
        }));
        *runner.status.lock().await = TaskStatus::RUNNING;
        let err = runner.start(None, None).await.expect_err("busy");
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
    }
}
