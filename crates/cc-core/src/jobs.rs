use crate::error::JobError;
use crate::types::{Job, JobFilter, JobId, JobLogEntry, JobStatus, NewJob, NewLogEntry, ProjectId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Map<String, Value>>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: JobStatus) -> Self {
        Self {
            status,
            started_at: None,
            finished_at: None,
            result: None,
            error_message: None,
        }
    }
}

pub trait JobRepository {
    fn create(&self, input: NewJob) -> Result<Job, JobError>;
    fn get(&self, id: &JobId) -> Result<Option<Job>, JobError>;
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;
    /// Only fields set on `update` are written; unset timestamps keep their value.
    fn set_status(&self, id: &JobId, update: StatusUpdate) -> Result<Job, JobError>;
    /// Allocates the next gapless sequence number for the job.
    fn append_log(&self, job_id: &JobId, entry: NewLogEntry) -> Result<JobLogEntry, JobError>;
    fn logs_since(
        &self,
        job_id: &JobId,
        after: i64,
        limit: Option<u32>,
    ) -> Result<Vec<JobLogEntry>, JobError>;
    fn latest_sequence(&self, job_id: &JobId) -> Result<i64, JobError>;
    fn active_for_pr(&self, project_id: &ProjectId, pr_number: i64) -> Result<Vec<Job>, JobError>;
    fn set_commit_hash(&self, id: &JobId, commit_hash: &str) -> Result<(), JobError>;
    /// Non-terminal jobs whose last start (or creation, if never started)
    /// is older than `cutoff`.
    fn unfinished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, JobError>;
}
