use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, now, to_rfc3339};
use cc_core::error::JobError;
use cc_core::jobs::{JobRepository, StatusUpdate};
use cc_core::types::{
    Job, JobFilter, JobId, JobLogEntry, JobStatus, NewJob, NewLogEntry, ProjectId,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row, params, params_from_iter};

const JOB_COLUMNS: &str = "id, project_id, kind, trigger_kind, status, pr_number, branch, commit_hash, result_json, error_message, created_at, started_at, finished_at";

pub struct JobRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> JobRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn storage(err: impl std::fmt::Display) -> JobError {
    JobError::Storage {
        message: err.to_string(),
    }
}

impl<'a> JobRepository for JobRepo<'a> {
    fn create(&self, input: NewJob) -> Result<Job, JobError> {
        let job = Job {
            id: JobId::generate(),
            project_id: input.project_id,
            kind: input.kind,
            trigger: input.trigger,
            status: JobStatus::Pending,
            pr_number: input.pr_number,
            branch: input.branch,
            commit_hash: input.commit_hash,
            result: None,
            error_message: None,
            created_at: now(),
            started_at: None,
            finished_at: None,
        };
        let sql = format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL, ?9, NULL, NULL)"
        );
        self.conn
            .execute(
                &sql,
                params![
                    job.id.as_str(),
                    job.project_id.as_str(),
                    encode_enum(&job.kind).map_err(storage)?,
                    encode_enum(&job.trigger).map_err(storage)?,
                    encode_enum(&job.status).map_err(storage)?,
                    job.pr_number,
                    job.branch,
                    job.commit_hash,
                    to_rfc3339(&job.created_at),
                ],
            )
            .map_err(storage)?;
        Ok(job)
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>, JobError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query([id.as_str()]).map_err(storage)?;
        match rows.next().map_err(storage)? {
            Some(row) => Ok(Some(map_job_row(row)?)),
            None => Ok(None),
        }
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let mut sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1");
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(project_id) = &filter.project_id {
            values.push(SqlValue::Text(project_id.as_str().to_string()));
            sql.push_str(&format!(" AND project_id = ?{}", values.len()));
        }
        if let Some(pr_number) = filter.pr_number {
            values.push(SqlValue::Integer(pr_number));
            sql.push_str(&format!(" AND pr_number = ?{}", values.len()));
        }
        if let Some(statuses) = &filter.status {
            if statuses.is_empty() {
                return Ok(Vec::new());
            }
            let mut placeholders = Vec::new();
            for status in statuses {
                values.push(SqlValue::Text(encode_enum(status).map_err(storage)?));
                placeholders.push(format!("?{}", values.len()));
            }
            sql.push_str(&format!(" AND status IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            values.push(SqlValue::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query(params_from_iter(values)).map_err(storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            jobs.push(map_job_row(row)?);
        }
        Ok(jobs)
    }

    fn set_status(&self, id: &JobId, update: StatusUpdate) -> Result<Job, JobError> {
        let result_json = match &update.result {
            Some(result) => Some(encode_json(result).map_err(storage)?),
            None => None,
        };
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1, started_at = COALESCE(?2, started_at), finished_at = COALESCE(?3, finished_at), result_json = COALESCE(?4, result_json), error_message = COALESCE(?5, error_message) WHERE id = ?6",
                params![
                    encode_enum(&update.status).map_err(storage)?,
                    update.started_at.map(|value| to_rfc3339(&value)),
                    update.finished_at.map(|value| to_rfc3339(&value)),
                    result_json,
                    update.error_message,
                    id.as_str(),
                ],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(JobError::NotFound);
        }
        self.get(id)?.ok_or(JobError::NotFound)
    }

    fn append_log(&self, job_id: &JobId, entry: NewLogEntry) -> Result<JobLogEntry, JobError> {
        let sequence = self.latest_sequence(job_id)? + 1;
        let metadata_json = match &entry.metadata {
            Some(metadata) => Some(encode_json(metadata).map_err(storage)?),
            None => None,
        };
        let log = JobLogEntry {
            job_id: job_id.clone(),
            sequence,
            level: entry.level,
            step: entry.step,
            message: entry.message,
            metadata: entry.metadata,
            duration_ms: entry.duration_ms,
            at: now(),
        };
        self.conn
            .execute(
                "INSERT INTO job_logs (job_id, sequence, level, step, message, metadata_json, duration_ms, at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    log.job_id.as_str(),
                    log.sequence,
                    encode_enum(&log.level).map_err(storage)?,
                    log.step,
                    log.message,
                    metadata_json,
                    log.duration_ms,
                    to_rfc3339(&log.at),
                ],
            )
            .map_err(storage)?;
        Ok(log)
    }

    fn logs_since(
        &self,
        job_id: &JobId,
        after: i64,
        limit: Option<u32>,
    ) -> Result<Vec<JobLogEntry>, JobError> {
        let limit = limit.map_or(-1, i64::from);
        let mut stmt = self
            .conn
            .prepare("SELECT job_id, sequence, level, step, message, metadata_json, duration_ms, at FROM job_logs WHERE job_id = ?1 AND sequence > ?2 ORDER BY sequence ASC LIMIT ?3")
            .map_err(storage)?;
        let mut rows = stmt
            .query(params![job_id.as_str(), after, limit])
            .map_err(storage)?;
        let mut logs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            logs.push(map_log_row(row)?);
        }
        Ok(logs)
    }

    fn latest_sequence(&self, job_id: &JobId) -> Result<i64, JobError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM job_logs WHERE job_id = ?1",
                [job_id.as_str()],
                |row| row.get(0),
            )
            .map_err(storage)
    }

    fn active_for_pr(&self, project_id: &ProjectId, pr_number: i64) -> Result<Vec<Job>, JobError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE project_id = ?1 AND pr_number = ?2 AND kind = 'PrAnalysis' AND status IN ('Pending', 'Queued', 'Running', 'Waiting') ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt
            .query(params![project_id.as_str(), pr_number])
            .map_err(storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            jobs.push(map_job_row(row)?);
        }
        Ok(jobs)
    }

    fn set_commit_hash(&self, id: &JobId, commit_hash: &str) -> Result<(), JobError> {
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET commit_hash = ?1 WHERE id = ?2",
                params![commit_hash, id.as_str()],
            )
            .map_err(storage)?;
        if affected == 0 {
            return Err(JobError::NotFound);
        }
        Ok(())
    }

    fn unfinished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, JobError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('Pending', 'Queued', 'Running', 'Waiting') AND COALESCE(started_at, created_at) < ?1 ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(storage)?;
        let mut rows = stmt.query([to_rfc3339(&cutoff)]).map_err(storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            jobs.push(map_job_row(row)?);
        }
        Ok(jobs)
    }
}

fn map_job_row(row: &Row<'_>) -> Result<Job, JobError> {
    let id: String = row.get(0).map_err(storage)?;
    let project_id: String = row.get(1).map_err(storage)?;
    let kind: String = row.get(2).map_err(storage)?;
    let trigger: String = row.get(3).map_err(storage)?;
    let status: String = row.get(4).map_err(storage)?;
    let result_json: Option<String> = row.get(8).map_err(storage)?;
    let created_at: String = row.get(10).map_err(storage)?;
    let started_at: Option<String> = row.get(11).map_err(storage)?;
    let finished_at: Option<String> = row.get(12).map_err(storage)?;

    Ok(Job {
        id: JobId::new(id).map_err(storage)?,
        project_id: ProjectId::new(project_id).map_err(storage)?,
        kind: decode_enum(&kind).map_err(storage)?,
        trigger: decode_enum(&trigger).map_err(storage)?,
        status: decode_enum(&status).map_err(storage)?,
        pr_number: row.get(5).map_err(storage)?,
        branch: row.get(6).map_err(storage)?,
        commit_hash: row.get(7).map_err(storage)?,
        result: result_json
            .map(|value| decode_json(&value))
            .transpose()
            .map_err(storage)?,
        error_message: row.get(9).map_err(storage)?,
        created_at: from_rfc3339(&created_at).map_err(storage)?,
        started_at: started_at
            .map(|value| from_rfc3339(&value))
            .transpose()
            .map_err(storage)?,
        finished_at: finished_at
            .map(|value| from_rfc3339(&value))
            .transpose()
            .map_err(storage)?,
    })
}

fn map_log_row(row: &Row<'_>) -> Result<JobLogEntry, JobError> {
    let job_id: String = row.get(0).map_err(storage)?;
    let level: String = row.get(2).map_err(storage)?;
    let metadata_json: Option<String> = row.get(5).map_err(storage)?;
    let at: String = row.get(7).map_err(storage)?;
    Ok(JobLogEntry {
        job_id: JobId::new(job_id).map_err(storage)?,
        sequence: row.get(1).map_err(storage)?,
        level: decode_enum(&level).map_err(storage)?,
        step: row.get(3).map_err(storage)?,
        message: row.get(4).map_err(storage)?,
        metadata: metadata_json
            .map(|value| decode_json(&value))
            .transpose()
            .map_err(storage)?,
        duration_ms: row.get(6).map_err(storage)?,
        at: from_rfc3339(&at).map_err(storage)?,
    })
}
