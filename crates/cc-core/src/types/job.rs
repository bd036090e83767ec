use crate::types::enums::{JobKind, JobStatus, JobTrigger, LogLevel};
use crate::types::ids::{JobId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    pub kind: JobKind,
    pub trigger: JobTrigger,
    pub status: JobStatus,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
    /// Head commit the job was triggered for, once known.
    pub commit_hash: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<Map<String, Value>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobLogEntry {
    pub job_id: JobId,
    pub sequence: i64,
    pub level: LogLevel,
    pub step: String,
    pub message: String,
    pub metadata: Option<Value>,
    pub duration_ms: Option<i64>,
    pub at: DateTime<Utc>,
}

/// Resumable page of a job's log stream. Callers pass `latest_sequence`
/// back as the cursor for the next poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobLogPage {
    pub job_id: JobId,
    pub logs: Vec<JobLogEntry>,
    pub latest_sequence: i64,
    pub is_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewJob {
    pub project_id: ProjectId,
    pub kind: JobKind,
    pub trigger: JobTrigger,
    pub pr_number: Option<i64>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub step: String,
    pub message: String,
    pub metadata: Option<Value>,
    pub duration_ms: Option<i64>,
}

impl NewLogEntry {
    pub fn info(step: &str, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            step: step.to_string(),
            message: message.into(),
            metadata: None,
            duration_ms: None,
        }
    }

    pub fn warn(step: &str, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warn,
            ..Self::info(step, message)
        }
    }

    pub fn error(step: &str, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::info(step, message)
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobFilter {
    pub project_id: Option<ProjectId>,
    pub pr_number: Option<i64>,
    pub status: Option<Vec<JobStatus>>,
    pub limit: Option<u32>,
}
