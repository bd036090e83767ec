use crate::analyses::AnalysisRepository;
use crate::config::CommandsConfig;
use crate::error::{AnalysisError, CodeCrowError, GateError, JobError, ProjectError, RagError};
use crate::events::EventRepository;
use crate::gates::GateRepository;
use crate::jobs::{JobRepository, StatusUpdate};
use crate::locks::LockRepository;
use crate::projects::ProjectRepository;
use crate::quality_gate::{default_conditions, evaluate, GateSubject};
use crate::rag::{DeltaUpdate, RagRepository};
use crate::rate_limits::{RateDecision, RateLimitRepository};
use crate::store::Store;
use crate::types::event::EventBody;
use crate::types::{
    AnalysisId, AnalysisStatus, BranchIndexState, CodeAnalysis, CodeAnalysisIssue, ConditionId,
    CreateGateInput, DeltaId, DeltaStatus, GateEvaluation, GateId, GateMetric, Job, JobFilter,
    JobId, JobLogEntry, JobLogPage, JobStatus, NewAnalysis, NewJob, NewLogEntry, ProjectBinding,
    ProjectId, QualityGate, RagBranchIndex, RagDeltaIndex, Reconciliation, RegisterProjectInput,
    ResolutionContext, StoredAnalysis, VcsProvider, WorkspaceId,
};
use crate::validation::{
    validate_analysis_transition, validate_delta_transition, validate_job_transition,
};
use cc_events::bus::EventBus;
use cc_events::types::{EventRecord, EventSource};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};

const DEFAULT_GATE_NAME: &str = "Default";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(source: EventSource, correlation_id: Option<String>) -> Self {
        Self {
            source,
            correlation_id,
        }
    }
}

pub struct CodeCrow<S: Store> {
    store: S,
    event_bus: EventBus,
}

impl<S: Store> CodeCrow<S> {
    pub fn new(store: S, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    pub fn jobs(&self) -> JobsApi<'_, S> {
        JobsApi { core: self }
    }

    pub fn analyses(&self) -> AnalysesApi<'_, S> {
        AnalysesApi { core: self }
    }

    pub fn gates(&self) -> GatesApi<'_, S> {
        GatesApi { core: self }
    }

    pub fn rag(&self) -> RagApi<'_, S> {
        RagApi { core: self }
    }

    pub fn projects(&self) -> ProjectsApi<'_, S> {
        ProjectsApi { core: self }
    }

    pub fn rate_limits(&self) -> RateLimitsApi<'_, S> {
        RateLimitsApi { core: self }
    }

    pub fn locks(&self) -> LocksApi<'_, S> {
        LocksApi { core: self }
    }

    pub fn events(&self) -> EventsApi<'_, S> {
        EventsApi { core: self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn with_events<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, CodeCrowError>
    where
        F: FnOnce(&S) -> Result<(T, Vec<EventBody>), CodeCrowError>,
    {
        let (value, records) = self.store.with_tx(|store| {
            let (value, bodies) = f(store)?;
            let mut records = Vec::new();
            for body in bodies {
                let record = build_event_record(ctx, body)?;
                let record = store.events().append(record)?;
                records.push(record);
            }
            Ok((value, records))
        })?;
        for record in records {
            self.event_bus.publish(record);
        }
        Ok(value)
    }
}

pub struct JobsApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> JobsApi<'a, S> {
    pub fn create(&self, ctx: &RequestContext, input: NewJob) -> Result<Job, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let job = store.jobs().create(input)?;
            Ok((job.clone(), vec![EventBody::JobCreated { job }]))
        })
    }

    pub fn get(&self, id: &JobId) -> Result<Option<Job>, CodeCrowError> {
        Ok(self.core.store.jobs().get(id)?)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, CodeCrowError> {
        Ok(self.core.store.jobs().list(filter)?)
    }

    pub fn queue(&self, ctx: &RequestContext, id: &JobId) -> Result<Job, CodeCrowError> {
        self.transition(ctx, id, StatusUpdate::to(JobStatus::Queued))
    }

    pub fn start(&self, ctx: &RequestContext, id: &JobId) -> Result<Job, CodeCrowError> {
        self.transition(
            ctx,
            id,
            StatusUpdate {
                started_at: Some(Utc::now()),
                ..StatusUpdate::to(JobStatus::Running)
            },
        )
    }

    /// Parks a running job while it waits on a contended lock.
    pub fn wait(&self, ctx: &RequestContext, id: &JobId) -> Result<Job, CodeCrowError> {
        self.transition(ctx, id, StatusUpdate::to(JobStatus::Waiting))
    }

    pub fn resume(&self, ctx: &RequestContext, id: &JobId) -> Result<Job, CodeCrowError> {
        self.transition(ctx, id, StatusUpdate::to(JobStatus::Running))
    }

    pub fn complete(
        &self,
        ctx: &RequestContext,
        id: &JobId,
        result: Map<String, Value>,
    ) -> Result<Job, CodeCrowError> {
        self.transition(
            ctx,
            id,
            StatusUpdate {
                finished_at: Some(Utc::now()),
                result: Some(result),
                ..StatusUpdate::to(JobStatus::Completed)
            },
        )
    }

    pub fn fail(
        &self,
        ctx: &RequestContext,
        id: &JobId,
        error_message: &str,
    ) -> Result<Job, CodeCrowError> {
        self.transition(
            ctx,
            id,
            StatusUpdate {
                finished_at: Some(Utc::now()),
                error_message: Some(error_message.to_string()),
                ..StatusUpdate::to(JobStatus::Failed)
            },
        )
    }

    pub fn skip(&self, ctx: &RequestContext, id: &JobId, reason: &str) -> Result<Job, CodeCrowError> {
        let mut result = Map::new();
        result.insert("reason".to_string(), Value::String(reason.to_string()));
        self.transition(
            ctx,
            id,
            StatusUpdate {
                finished_at: Some(Utc::now()),
                result: Some(result),
                ..StatusUpdate::to(JobStatus::Skipped)
            },
        )
    }

    pub fn cancel(&self, ctx: &RequestContext, id: &JobId) -> Result<Job, CodeCrowError> {
        self.transition(
            ctx,
            id,
            StatusUpdate {
                finished_at: Some(Utc::now()),
                ..StatusUpdate::to(JobStatus::Cancelled)
            },
        )
    }

    /// Records `head_commit` on `current`, then cancels the non-terminal
    /// jobs for the same PR that were created before it for a different
    /// commit. Jobs for the same commit and later jobs are left running.
    pub fn cancel_superseded(
        &self,
        ctx: &RequestContext,
        current: &Job,
        pr_number: i64,
        head_commit: &str,
    ) -> Result<Vec<Job>, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            if current.commit_hash.as_deref() != Some(head_commit) {
                store.jobs().set_commit_hash(&current.id, head_commit)?;
            }
            let now = Utc::now();
            let mut cancelled = Vec::new();
            let mut events = Vec::new();
            for job in store.jobs().active_for_pr(&current.project_id, pr_number)? {
                let older = (job.created_at, job.id.as_str())
                    < (current.created_at, current.id.as_str());
                let other_commit = job
                    .commit_hash
                    .as_deref()
                    .is_some_and(|commit| commit != head_commit);
                if !older || !other_commit {
                    continue;
                }
                validate_job_transition(job.status, JobStatus::Cancelled)?;
                let updated = store.jobs().set_status(
                    &job.id,
                    StatusUpdate {
                        finished_at: Some(now),
                        error_message: Some(format!("superseded by {}", current.id)),
                        ..StatusUpdate::to(JobStatus::Cancelled)
                    },
                )?;
                events.push(EventBody::JobStatusChanged {
                    job: updated.clone(),
                    from: job.status,
                    to: JobStatus::Cancelled,
                });
                cancelled.push(updated);
            }
            Ok((cancelled, events))
        })
    }

    /// Fails jobs still non-terminal since before `cutoff`. These are jobs
    /// whose worker was lost, for example to a restart.
    pub fn fail_stale(
        &self,
        ctx: &RequestContext,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let now = Utc::now();
            let mut failed = Vec::new();
            let mut events = Vec::new();
            for job in store.jobs().unfinished_before(cutoff)? {
                validate_job_transition(job.status, JobStatus::Failed)?;
                store.jobs().append_log(
                    &job.id,
                    NewLogEntry::error("done", "job abandoned without a worker"),
                )?;
                let updated = store.jobs().set_status(
                    &job.id,
                    StatusUpdate {
                        finished_at: Some(now),
                        error_message: Some("abandoned".to_string()),
                        ..StatusUpdate::to(JobStatus::Failed)
                    },
                )?;
                events.push(EventBody::JobStatusChanged {
                    job: updated.clone(),
                    from: job.status,
                    to: JobStatus::Failed,
                });
                failed.push(updated);
            }
            Ok((failed, events))
        })
    }

    /// Sequence allocation and insert share one transaction, so concurrent
    /// writers to the same job never collide.
    pub fn append_log(&self, id: &JobId, entry: NewLogEntry) -> Result<JobLogEntry, CodeCrowError> {
        self.core.store.with_tx(|store| {
            if store.jobs().get(id)?.is_none() {
                return Err(JobError::NotFound.into());
            }
            Ok(store.jobs().append_log(id, entry)?)
        })
    }

    /// Best-effort variant of [`Self::append_log`]; a failed write is traced
    /// and otherwise ignored.
    pub fn log(&self, id: &JobId, entry: NewLogEntry) {
        if let Err(err) = self.append_log(id, entry) {
            tracing::warn!(job_id = %id, error = %err, "failed to append job log");
        }
    }

    pub fn logs_since(
        &self,
        id: &JobId,
        after: i64,
        limit: Option<u32>,
    ) -> Result<JobLogPage, CodeCrowError> {
        let jobs = self.core.store.jobs();
        let job = jobs.get(id)?.ok_or(JobError::NotFound)?;
        let logs = jobs.logs_since(id, after, limit)?;
        let latest_sequence = logs.last().map_or(after.max(0), |entry| entry.sequence);
        let is_complete =
            job.status.is_terminal() && latest_sequence >= jobs.latest_sequence(id)?;
        Ok(JobLogPage {
            job_id: id.clone(),
            logs,
            latest_sequence,
            is_complete,
        })
    }

    fn transition(
        &self,
        ctx: &RequestContext,
        id: &JobId,
        update: StatusUpdate,
    ) -> Result<Job, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let job = store.jobs().get(id)?.ok_or(JobError::NotFound)?;
            validate_job_transition(job.status, update.status)?;
            let to = update.status;
            let updated = store.jobs().set_status(id, update)?;
            let events = if job.status == to {
                Vec::new()
            } else {
                vec![EventBody::JobStatusChanged {
                    job: updated.clone(),
                    from: job.status,
                    to,
                }]
            };
            Ok((updated, events))
        })
    }
}

pub struct AnalysesApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> AnalysesApi<'a, S> {
    pub fn get(&self, id: &AnalysisId) -> Result<Option<CodeAnalysis>, CodeCrowError> {
        Ok(self.core.store.analyses().get(id)?)
    }

    pub fn lookup(
        &self,
        project_id: &ProjectId,
        fingerprint: &str,
    ) -> Result<Option<CodeAnalysis>, CodeCrowError> {
        Ok(self
            .core
            .store
            .analyses()
            .find_accepted_by_fingerprint(project_id, fingerprint)?)
    }

    pub fn lookup_by_commit(
        &self,
        project_id: &ProjectId,
        commit_hash: &str,
    ) -> Result<Option<CodeAnalysis>, CodeCrowError> {
        Ok(self
            .core
            .store
            .analyses()
            .find_accepted_by_commit(project_id, commit_hash)?)
    }

    /// Fingerprint match first, then the same commit.
    pub fn find_cached(
        &self,
        project_id: &ProjectId,
        fingerprint: Option<&str>,
        commit_hash: &str,
    ) -> Result<Option<CodeAnalysis>, CodeCrowError> {
        if let Some(fingerprint) = fingerprint
            && let Some(hit) = self.lookup(project_id, fingerprint)?
        {
            return Ok(Some(hit));
        }
        self.lookup_by_commit(project_id, commit_hash)
    }

    pub fn current_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Option<CodeAnalysis>, CodeCrowError> {
        Ok(self
            .core
            .store
            .analyses()
            .current_for_pr(project_id, pr_number)?)
    }

    pub fn unresolved_for_pr(
        &self,
        project_id: &ProjectId,
        pr_number: i64,
    ) -> Result<Vec<CodeAnalysisIssue>, CodeCrowError> {
        Ok(self
            .core
            .store
            .analyses()
            .unresolved_issues_for_pr(project_id, pr_number)?)
    }

    /// Persists an ACCEPTED analysis and, when `reconcile` is given, resolves
    /// earlier issues of that PR which the new analysis no longer reports.
    pub fn store(
        &self,
        ctx: &RequestContext,
        input: NewAnalysis,
        reconcile: Option<Reconciliation>,
    ) -> Result<StoredAnalysis, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let analysis = store.analyses().insert(input)?;
            let mut events = vec![EventBody::AnalysisStored {
                analysis_id: analysis.id.clone(),
                project_id: analysis.project_id.clone(),
                pr_number: analysis.pr_number,
                pr_version: analysis.pr_version,
                result: analysis.result,
            }];
            let mut resolved_issues = 0;
            if let Some(reconcile) = reconcile {
                let reported: HashSet<String> = analysis
                    .issues
                    .iter()
                    .map(CodeAnalysisIssue::identity_key)
                    .collect();
                let fixed: Vec<_> = store
                    .analyses()
                    .unresolved_issues_for_pr(&analysis.project_id, reconcile.pr_number)?
                    .into_iter()
                    .filter(|issue| {
                        issue.analysis_id != analysis.id
                            && !reported.contains(&issue.identity_key())
                    })
                    .map(|issue| issue.id)
                    .collect();
                if !fixed.is_empty() {
                    resolved_issues = store.analyses().resolve_issues(
                        &fixed,
                        &ResolutionContext {
                            pr_number: Some(reconcile.pr_number),
                            commit_hash: analysis.commit_hash.clone(),
                            analysis_id: analysis.id.clone(),
                            actor: reconcile.actor,
                        },
                    )?;
                    events.push(EventBody::IssuesResolved {
                        analysis_id: analysis.id.clone(),
                        count: resolved_issues,
                    });
                }
            }
            Ok((
                StoredAnalysis {
                    analysis,
                    resolved_issues,
                },
                events,
            ))
        })
    }

    /// Removes an analysis from cache eligibility.
    pub fn reject(
        &self,
        ctx: &RequestContext,
        id: &AnalysisId,
    ) -> Result<CodeAnalysis, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let analysis = store.analyses().get(id)?.ok_or(AnalysisError::NotFound)?;
            validate_analysis_transition(analysis.status, AnalysisStatus::Rejected)?;
            let updated = store
                .analyses()
                .set_status(id, AnalysisStatus::Rejected)?;
            Ok((
                updated,
                vec![EventBody::AnalysisRejected {
                    analysis_id: id.clone(),
                }],
            ))
        })
    }

    pub fn served_from_cache(
        &self,
        ctx: &RequestContext,
        job_id: &JobId,
        analysis_id: &AnalysisId,
    ) -> Result<(), CodeCrowError> {
        self.core.with_events(ctx, |_| {
            Ok((
                (),
                vec![EventBody::AnalysisServedFromCache {
                    job_id: job_id.clone(),
                    analysis_id: analysis_id.clone(),
                }],
            ))
        })
    }

    /// Re-judges a stored analysis against the project's current gate. The
    /// verdict is returned, not written back.
    pub fn reevaluate(&self, id: &AnalysisId) -> Result<GateEvaluation, CodeCrowError> {
        let analysis = self
            .core
            .store
            .analyses()
            .get(id)?
            .ok_or(AnalysisError::NotFound)?;
        let project = self
            .core
            .store
            .projects()
            .get(&analysis.project_id)?
            .ok_or(ProjectError::NotFound)?;
        let conditions = self
            .core
            .store
            .gates()
            .effective_for_project(&project.workspace_id, &project.id)?
            .map(|gate| gate.conditions)
            .unwrap_or_default();
        Ok(evaluate(&analysis.issues, &conditions))
    }
}

pub struct GatesApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> GatesApi<'a, S> {
    pub fn create(
        &self,
        ctx: &RequestContext,
        input: CreateGateInput,
    ) -> Result<QualityGate, CodeCrowError> {
        validate_gate_input(&input)?;
        self.core.with_events(ctx, |store| {
            let make_default = input.is_default;
            let gate = store.gates().add(CreateGateInput {
                is_default: false,
                ..input
            })?;
            let gate = if make_default {
                store.gates().set_default(&gate.id)?
            } else {
                gate
            };
            Ok((gate.clone(), vec![EventBody::GateAdded { gate }]))
        })
    }

    pub fn get(&self, id: &GateId) -> Result<Option<QualityGate>, CodeCrowError> {
        Ok(self.core.store.gates().get(id)?)
    }

    pub fn list(&self, workspace_id: &WorkspaceId) -> Result<Vec<QualityGate>, CodeCrowError> {
        Ok(self.core.store.gates().list(workspace_id)?)
    }

    pub fn effective(
        &self,
        workspace_id: &WorkspaceId,
        project_id: &ProjectId,
    ) -> Result<Option<QualityGate>, CodeCrowError> {
        Ok(self
            .core
            .store
            .gates()
            .effective_for_project(workspace_id, project_id)?)
    }

    pub fn set_default(
        &self,
        ctx: &RequestContext,
        id: &GateId,
    ) -> Result<QualityGate, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let gate = store.gates().set_default(id)?;
            Ok((gate.clone(), vec![EventBody::GateUpdated { gate }]))
        })
    }

    pub fn set_condition_enabled(
        &self,
        ctx: &RequestContext,
        gate_id: &GateId,
        condition_id: &ConditionId,
        enabled: bool,
    ) -> Result<QualityGate, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let gate = store
                .gates()
                .set_condition_enabled(gate_id, condition_id, enabled)?;
            Ok((gate.clone(), vec![EventBody::GateUpdated { gate }]))
        })
    }

    pub fn remove(&self, ctx: &RequestContext, id: &GateId) -> Result<(), CodeCrowError> {
        self.core.with_events(ctx, |store| {
            store.gates().remove(id)?;
            Ok(((), vec![EventBody::GateRemoved { gate_id: id.clone() }]))
        })
    }

    /// Provisions the HIGH/MEDIUM default gate for a workspace that has no
    /// gates at all. Returns the new gate, or `None` when gates exist.
    pub fn ensure_default(
        &self,
        ctx: &RequestContext,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<QualityGate>, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            if !store.gates().list(workspace_id)?.is_empty() {
                return Ok((None, Vec::new()));
            }
            let gate = store.gates().add(CreateGateInput {
                workspace_id: workspace_id.clone(),
                project_id: None,
                name: DEFAULT_GATE_NAME.to_string(),
                is_default: false,
                conditions: default_conditions(),
            })?;
            let gate = store.gates().set_default(&gate.id)?;
            Ok((Some(gate.clone()), vec![EventBody::GateAdded { gate }]))
        })
    }

    pub fn evaluate_for_project<I: GateSubject>(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        issues: &[I],
    ) -> Result<GateEvaluation, CodeCrowError> {
        self.ensure_default(ctx, &project.workspace_id)?;
        let conditions = self
            .effective(&project.workspace_id, &project.id)?
            .map(|gate| gate.conditions)
            .unwrap_or_default();
        Ok(evaluate(issues, &conditions))
    }
}

fn validate_gate_input(input: &CreateGateInput) -> Result<(), GateError> {
    if input.name.trim().is_empty() {
        return Err(GateError::InvalidInput {
            message: "gate name required".to_string(),
        });
    }
    for condition in &input.conditions {
        if condition.threshold < 0 {
            return Err(GateError::InvalidInput {
                message: "threshold must be non-negative".to_string(),
            });
        }
        let filter_missing = match condition.metric {
            GateMetric::IssuesBySeverity => condition.severity.is_none(),
            GateMetric::IssuesByCategory => condition.category.is_none(),
            GateMetric::TotalIssues => false,
        };
        if filter_missing {
            return Err(GateError::InvalidInput {
                message: format!("{:?} condition needs its filter", condition.metric),
            });
        }
    }
    Ok(())
}

pub struct RagApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> RagApi<'a, S> {
    pub fn get_branch_index(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<Option<RagBranchIndex>, CodeCrowError> {
        Ok(self.core.store.rag().get_branch_index(project_id, branch)?)
    }

    pub fn branch_state(
        &self,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<BranchIndexState, CodeCrowError> {
        let rag = self.core.store.rag();
        Ok(BranchIndexState {
            index: rag.get_branch_index(project_id, branch)?,
            deltas: rag.list_deltas(project_id, branch)?,
        })
    }

    pub fn get_delta(&self, id: &DeltaId) -> Result<Option<RagDeltaIndex>, CodeCrowError> {
        Ok(self.core.store.rag().get_delta(id)?)
    }

    pub fn record_branch_commit(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
        commit_hash: &str,
        deleted_files: &BTreeSet<String>,
        indexed_files: &BTreeMap<String, i64>,
    ) -> Result<RagBranchIndex, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let index = store.rag().record_branch_commit(
                project_id,
                branch,
                commit_hash,
                deleted_files,
                indexed_files,
            )?;
            Ok((
                index,
                vec![EventBody::BranchIndexUpdated {
                    project_id: project_id.clone(),
                    branch: branch.to_string(),
                    commit_hash: commit_hash.to_string(),
                }],
            ))
        })
    }

    /// Records a new base-branch commit and flips its READY deltas to STALE
    /// in the same transaction.
    pub fn advance_base(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
        commit_hash: &str,
        deleted_files: &BTreeSet<String>,
        indexed_files: &BTreeMap<String, i64>,
    ) -> Result<(RagBranchIndex, Vec<RagDeltaIndex>), CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let index = store.rag().record_branch_commit(
                project_id,
                branch,
                commit_hash,
                deleted_files,
                indexed_files,
            )?;
            let stale = store.rag().mark_stale_by_base(project_id, branch)?;
            let mut events = vec![EventBody::BranchIndexUpdated {
                project_id: project_id.clone(),
                branch: branch.to_string(),
                commit_hash: commit_hash.to_string(),
            }];
            if !stale.is_empty() {
                events.push(stale_event(project_id, branch, stale.len()));
            }
            Ok(((index, stale), events))
        })
    }

    pub fn mark_stale_if_base_advanced(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        base_branch: &str,
    ) -> Result<Vec<RagDeltaIndex>, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let stale = store.rag().mark_stale_by_base(project_id, base_branch)?;
            let events = if stale.is_empty() {
                Vec::new()
            } else {
                vec![stale_event(project_id, base_branch, stale.len())]
            };
            Ok((stale, events))
        })
    }

    pub fn create_delta(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
        base_branch: &str,
        base_commit: &str,
    ) -> Result<RagDeltaIndex, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let delta = store
                .rag()
                .create_delta(project_id, branch, base_branch, base_commit)?;
            Ok((delta.clone(), vec![EventBody::DeltaCreated { delta }]))
        })
    }

    /// Lands a CREATING delta. The base branch's indexed commit is re-read
    /// first: if it moved while indexing ran, the delta lands in STALE.
    /// Otherwise older READY deltas of the branch go STALE and this one
    /// becomes the branch's single READY delta.
    pub fn finish_delta(
        &self,
        ctx: &RequestContext,
        id: &DeltaId,
        delta_commit: &str,
        chunk_count: i64,
        file_count: i64,
    ) -> Result<RagDeltaIndex, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let delta = store.rag().get_delta(id)?.ok_or(RagError::DeltaNotFound)?;
            let base_commit = store
                .rag()
                .get_branch_index(&delta.project_id, &delta.base_branch)?
                .map(|index| index.commit_hash);
            let target = if base_commit.as_deref() == Some(delta.base_commit.as_str()) {
                DeltaStatus::Ready
            } else {
                DeltaStatus::Stale
            };
            validate_delta_transition(delta.status, target)?;

            let mut events = Vec::new();
            if target == DeltaStatus::Ready {
                for old in store
                    .rag()
                    .supersede_ready(&delta.project_id, &delta.branch, id)?
                {
                    events.push(EventBody::DeltaStatusChanged {
                        delta: old,
                        from: DeltaStatus::Ready,
                        to: DeltaStatus::Stale,
                    });
                }
            }
            let updated = store.rag().update_delta(
                id,
                DeltaUpdate {
                    delta_commit: Some(delta_commit.to_string()),
                    chunk_count: Some(chunk_count),
                    file_count: Some(file_count),
                    ..DeltaUpdate::to(target)
                },
            )?;
            events.push(EventBody::DeltaStatusChanged {
                delta: updated.clone(),
                from: delta.status,
                to: target,
            });
            Ok((updated, events))
        })
    }

    pub fn fail_delta(
        &self,
        ctx: &RequestContext,
        id: &DeltaId,
        error_message: &str,
    ) -> Result<RagDeltaIndex, CodeCrowError> {
        self.transition_delta(
            ctx,
            id,
            DeltaUpdate {
                error_message: Some(error_message.to_string()),
                ..DeltaUpdate::to(DeltaStatus::Failed)
            },
        )
    }

    pub fn transition_delta(
        &self,
        ctx: &RequestContext,
        id: &DeltaId,
        update: DeltaUpdate,
    ) -> Result<RagDeltaIndex, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let delta = store.rag().get_delta(id)?.ok_or(RagError::DeltaNotFound)?;
            validate_delta_transition(delta.status, update.status)?;
            let to = update.status;
            let updated = store.rag().update_delta(id, update)?;
            Ok((
                updated.clone(),
                vec![EventBody::DeltaStatusChanged {
                    delta: updated,
                    from: delta.status,
                    to,
                }],
            ))
        })
    }

    pub fn touch_delta(&self, id: &DeltaId) -> Result<(), CodeCrowError> {
        Ok(self.core.store.rag().touch_delta(id, Utc::now())?)
    }

    /// Removes the branch row and its deltas. Absent rows are a no-op.
    pub fn delete_branch(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<u64, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let removed = store.rag().delete_branch(project_id, branch)?;
            let events = if removed == 0 {
                Vec::new()
            } else {
                vec![EventBody::BranchIndexDeleted {
                    project_id: project_id.clone(),
                    branch: branch.to_string(),
                }]
            };
            Ok((removed, events))
        })
    }

    /// First housekeeping step: READY deltas idle since `idle_before` and
    /// STALE/FAILED deltas untouched since `stale_before` become ARCHIVED.
    pub fn archive_inactive(
        &self,
        ctx: &RequestContext,
        idle_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let mut archived = Vec::new();
            for delta in store.rag().find_archivable(idle_before, stale_before)? {
                validate_delta_transition(delta.status, DeltaStatus::Archived)?;
                archived.push(
                    store
                        .rag()
                        .update_delta(&delta.id, DeltaUpdate::to(DeltaStatus::Archived))?,
                );
            }
            let events = if archived.is_empty() {
                Vec::new()
            } else {
                vec![EventBody::DeltasArchived {
                    count: archived.len() as u64,
                }]
            };
            Ok((archived, events))
        })
    }

    pub fn find_purgeable(
        &self,
        archived_before: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, CodeCrowError> {
        Ok(self.core.store.rag().find_purgeable(archived_before)?)
    }

    /// Second housekeeping step: physical removal of ARCHIVED rows.
    pub fn delete_deltas(&self, ctx: &RequestContext, ids: &[DeltaId]) -> Result<u64, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            for id in ids {
                store.rag().delete_delta(id)?;
            }
            let count = ids.len() as u64;
            let events = if count == 0 {
                Vec::new()
            } else {
                vec![EventBody::DeltasPurged { count }]
            };
            Ok((count, events))
        })
    }
}

fn stale_event(project_id: &ProjectId, base_branch: &str, count: usize) -> EventBody {
    EventBody::DeltasMarkedStale {
        project_id: project_id.clone(),
        base_branch: base_branch.to_string(),
        count: count as u64,
    }
}

pub struct ProjectsApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> ProjectsApi<'a, S> {
    pub fn register(
        &self,
        ctx: &RequestContext,
        input: RegisterProjectInput,
    ) -> Result<ProjectBinding, CodeCrowError> {
        if input.repo_full_name.trim().is_empty() {
            return Err(ProjectError::InvalidInput {
                message: "repository name required".to_string(),
            }
            .into());
        }
        if input
            .default_branch
            .as_deref()
            .is_some_and(|branch| branch.trim().is_empty())
        {
            return Err(ProjectError::InvalidInput {
                message: "default branch must not be empty".to_string(),
            }
            .into());
        }
        self.core.with_events(ctx, |store| {
            let project = store.projects().register(input)?;
            Ok((
                project.clone(),
                vec![EventBody::ProjectRegistered { project }],
            ))
        })
    }

    pub fn get(&self, id: &ProjectId) -> Result<Option<ProjectBinding>, CodeCrowError> {
        Ok(self.core.store.projects().get(id)?)
    }

    pub fn find_by_repo(
        &self,
        provider: VcsProvider,
        repo_full_name: &str,
    ) -> Result<Option<ProjectBinding>, CodeCrowError> {
        Ok(self
            .core
            .store
            .projects()
            .find_by_repo(provider, repo_full_name)?)
    }

    pub fn set_active(
        &self,
        ctx: &RequestContext,
        id: &ProjectId,
        active: bool,
    ) -> Result<ProjectBinding, CodeCrowError> {
        self.core.with_events(ctx, |store| {
            let project = store.projects().set_active(id, active)?;
            Ok((
                project,
                vec![EventBody::ProjectActivationChanged {
                    project_id: id.clone(),
                    active,
                }],
            ))
        })
    }
}

pub struct RateLimitsApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> RateLimitsApi<'a, S> {
    /// Counts one comment command against the project's current window.
    pub fn consume(
        &self,
        project_id: &ProjectId,
        config: &CommandsConfig,
    ) -> Result<RateDecision, CodeCrowError> {
        self.core.store.with_tx(|store| {
            Ok(store.rate_limits().try_consume(
                project_id,
                Utc::now(),
                config.window_secs,
                config.max_per_window,
            )?)
        })
    }

    pub fn purge(&self, before: DateTime<Utc>) -> Result<u64, CodeCrowError> {
        Ok(self.core.store.rate_limits().purge(before)?)
    }
}

pub struct LocksApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> LocksApi<'a, S> {
    pub fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<bool, CodeCrowError> {
        let now = Utc::now();
        self.core
            .store
            .with_tx(|store| Ok(store.locks().try_acquire(key, owner, now, now + lease)?))
    }

    pub fn release(&self, key: &str, owner: &str) -> Result<bool, CodeCrowError> {
        Ok(self.core.store.locks().release(key, owner)?)
    }

    pub fn holder(&self, key: &str) -> Result<Option<String>, CodeCrowError> {
        Ok(self.core.store.locks().holder(key, Utc::now())?)
    }

    pub fn purge_expired(&self) -> Result<u64, CodeCrowError> {
        Ok(self.core.store.locks().purge_expired(Utc::now())?)
    }
}

pub struct EventsApi<'a, S: Store> {
    core: &'a CodeCrow<S>,
}

impl<'a, S: Store> EventsApi<'a, S> {
    pub fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, CodeCrowError> {
        self.core.store.events().list(after, limit)
    }
}

fn build_event_record(ctx: &RequestContext, body: EventBody) -> Result<EventRecord, CodeCrowError> {
    let value = serde_json::to_value(body).map_err(|err| CodeCrowError::Internal {
        message: err.to_string(),
    })?;
    Ok(EventRecord {
        id: String::new(),
        seq: 0,
        at: Utc::now(),
        correlation_id: ctx.correlation_id.clone(),
        source: ctx.source,
        body: value,
    })
}
