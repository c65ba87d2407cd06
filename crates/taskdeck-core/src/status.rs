/*
[INPUT]:  Status transitions reported by task implementations
[OUTPUT]: TaskStatus lifecycle enum and the injectable display-label table
[POS]:    State layer - task lifecycle vocabulary
[UPDATE]: When adding lifecycle states or display label fields
*/

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task lifecycle: `Undefined -> Waiting -> Running -> {Complete, Failed}`.
///
/// The dispatcher treats `Waiting` as "eligible to start". Concrete task
/// kinds move a freshly built task from `Undefined` to `Waiting` when it is
/// meant to be queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Undefined,
    Waiting,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Returns true for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Undefined => "undefined",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Localized display labels for each status value.
///
/// The table is owned by the host application (which may load it from its
/// localization layer); the core only reads it when computing a task's
/// display status. The default is plain English with an empty label for
/// `Undefined`, so an idle manager displays nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusLabels {
    pub undefined: String,
    pub waiting: String,
    pub running: String,
    pub complete: String,
    pub failed: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            undefined: String::new(),
            waiting: "Waiting".to_string(),
            running: "Running".to_string(),
            complete: "Complete".to_string(),
            failed: "Failed".to_string(),
        }
    }
}

impl StatusLabels {
    pub fn label(&self, status: TaskStatus) -> &str {
        match status {
            TaskStatus::Undefined => &self.undefined,
            TaskStatus::Waiting => &self.waiting,
            TaskStatus::Running => &self.running,
            TaskStatus::Complete => &self.complete,
            TaskStatus::Failed => &self.failed,
        }
    }
}
