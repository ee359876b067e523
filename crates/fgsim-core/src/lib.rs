pub mod actions;
pub mod manifest;
pub mod push;

use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub use actions::ActionError;
pub use manifest::{Artifact, ComponentId, FrequencyAxis, FrequencyId, Product, ProductManifest};
pub use push::{ConsoleMsg, PushMsg};

/// Raw task flags as reported by the server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskStatus {
    pub running: bool,
    pub finished: bool,
}

impl TaskStatus {
    pub const IDLE: Self = Self {
        running: false,
        finished: false,
    };
    pub const RUNNING: Self = Self {
        running: true,
        finished: false,
    };
    pub const FINISHED: Self = Self {
        running: false,
        finished: true,
    };

    pub fn new(running: bool, finished: bool) -> Self {
        Self { running, finished }
    }

    pub fn state(&self) -> TaskState {
        match (self.running, self.finished) {
            (false, false) => TaskState::NotStarted,
            (true, false) => TaskState::Running,
            (false, true) => TaskState::Finished,
            (true, true) => TaskState::Anomalous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    NotStarted,
    Running,
    Finished,
    /// `running` and `finished` both set: an upstream inconsistency, never a terminal state.
    Anomalous,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::NotStarted => "not-started",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Anomalous => "anomalous",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Upper-case name used on the wire (`levelname`).
    pub fn levelname(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(format!("Unknown log level: {other}")),
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.levelname())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One log line pushed over the `console/log` route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    #[serde(rename = "levelname")]
    pub level: LogLevel,
    #[serde(rename = "asctime")]
    pub timestamp: String,
    #[serde(rename = "name")]
    pub logger_name: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            logger_name: logger_name.into(),
            message: message.into(),
        }
    }
}
