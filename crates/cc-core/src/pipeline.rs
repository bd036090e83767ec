//! Webhook router and analysis orchestrator.
//!
//! `route` validates a normalized event against the project binding and
//! records a queued job; `process` then runs the job to a terminal state.
//! Ignored events never create a job. Every failure inside `process` ends in
//! a FAILED or SKIPPED job rather than an error escaping to the caller.

use crate::branch_patterns::branch_matches;
use crate::codecrow::{CodeCrow, RequestContext};
use crate::collaborators::{Collaborators, VcsClient};
use crate::config::CodeCrowConfig;
use crate::error::{AnalysisError, CodeCrowError, JobError, LockError, ProjectError, WebhookError};
use crate::fingerprint::{changed_paths, fingerprint};
use crate::indexer::{IndexOutcome, RagIndexer};
use crate::lock::{AnalysisLock, LockGuard, LockKey};
use crate::provider::CoreProvider;
use crate::report;
use crate::retry::with_retry;
use crate::types::{
    AnalysisId, AnalysisResult, CodeAnalysis, CommandKind, ContextHit,
    DeltaStatus, EventKind, Job, JobId, JobKind, JobStatus, JobTrigger, NewAnalysis, NewJob,
    NewLogEntry, NormalizedEvent, ProjectBinding, Reconciliation,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

const CANCEL_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Ignored { reason: String },
    Accepted { job: Job },
}

fn ignored(reason: &str) -> RouteDecision {
    RouteDecision::Ignored {
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Analyzed {
        analysis_id: AnalysisId,
        result: AnalysisResult,
        pr_version: Option<i64>,
        cached: bool,
        resolved_issues: u64,
    },
    Indexed {
        branch: String,
        commit: String,
        chunks: i64,
        delta_status: Option<DeltaStatus>,
    },
    Replied {
        command: CommandKind,
        comment_id: String,
    },
    Cleaned {
        branch: String,
        removed: u64,
    },
    Skipped {
        reason: String,
    },
    Cancelled,
    Failed {
        message: String,
    },
}

impl PipelineOutcome {
    fn skipped(reason: &str) -> Self {
        Self::Skipped {
            reason: reason.to_string(),
        }
    }

    fn to_result(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Pull request coordinates, either straight from the event or fetched from
/// the provider for comment events that carry only the PR number.
#[derive(Debug, Clone)]
struct PrTarget {
    number: i64,
    source_branch: String,
    target_branch: String,
    head_commit: String,
}

struct Analyzed {
    analysis: CodeAnalysis,
    cached: bool,
    resolved_issues: u64,
}

pub struct Orchestrator<P: CoreProvider> {
    provider: Arc<P>,
    collaborators: Collaborators,
    lock: AnalysisLock<P>,
    indexer: RagIndexer<P>,
    config: Arc<CodeCrowConfig>,
}

impl<P: CoreProvider> Clone for Orchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            collaborators: self.collaborators.clone(),
            lock: self.lock.clone(),
            indexer: self.indexer.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: CoreProvider> Orchestrator<P> {
    pub fn new(provider: Arc<P>, collaborators: Collaborators, config: Arc<CodeCrowConfig>) -> Self {
        let lock = AnalysisLock::new(Arc::clone(&provider), config.lock.clone());
        let indexer = RagIndexer::new(
            Arc::clone(&provider),
            collaborators.clone(),
            lock.clone(),
            config.rag.clone(),
            config.vcs.retry(),
        );
        Self {
            provider,
            collaborators,
            lock,
            indexer,
            config,
        }
    }

    pub fn indexer(&self) -> &RagIndexer<P> {
        &self.indexer
    }

    pub fn lock(&self) -> &AnalysisLock<P> {
        &self.lock
    }

    fn core(&self) -> Result<CodeCrow<P::Store>, CodeCrowError> {
        self.provider.open()
    }

    /// Validates the event and records a QUEUED job for it. Events for
    /// unbound or inactive projects, disabled features, unmatched branches
    /// and rate-limited commands are ignored without creating a job.
    pub fn route(
        &self,
        ctx: &RequestContext,
        event: &NormalizedEvent,
    ) -> Result<RouteDecision, CodeCrowError> {
        let core = self.core()?;
        let Some(project) = core
            .projects()
            .find_by_repo(event.provider, &event.repo_full_name)?
        else {
            tracing::debug!(repo = %event.repo_full_name, "no project bound to repository");
            return Ok(ignored("no project bound to repository"));
        };
        if !project.active {
            return Ok(ignored("project binding inactive"));
        }
        if matches!(
            event.kind,
            EventKind::PullRequestUpdated | EventKind::PullRequestMerged | EventKind::CommentCommand
        ) && event.pr_number.is_none()
        {
            return Err(WebhookError::Malformed {
                message: "pull request number missing".to_string(),
            }
            .into());
        }

        let branch_allowed = |branch: Option<&str>| {
            branch.is_none_or(|branch| branch_matches(branch, &project.branch_patterns))
        };
        let (kind, branch) = match event.kind {
            EventKind::PullRequestUpdated => {
                if !project.pr_analysis_enabled {
                    return Ok(ignored("pull request analysis disabled"));
                }
                if !branch_allowed(event.routing_branch()) {
                    return Ok(ignored("target branch not configured for analysis"));
                }
                (JobKind::PrAnalysis, event.source_branch.clone())
            }
            EventKind::PullRequestMerged => {
                if !project.branch_analysis_enabled {
                    return Ok(ignored("branch analysis disabled"));
                }
                if !branch_allowed(event.routing_branch()) {
                    return Ok(ignored("target branch not configured for analysis"));
                }
                (JobKind::BranchAnalysis, event.target_branch.clone())
            }
            EventKind::Push => {
                if !project.rag_enabled {
                    return Ok(ignored("RAG indexing disabled"));
                }
                (JobKind::RagIndex, event.source_branch.clone())
            }
            EventKind::BranchDeleted => {
                if !project.rag_enabled {
                    return Ok(ignored("RAG indexing disabled"));
                }
                if event.source_branch.as_deref() == Some(project.default_branch.as_str()) {
                    return Ok(ignored("default branch is never cleaned up"));
                }
                (JobKind::BranchCleanup, event.source_branch.clone())
            }
            EventKind::CommentCommand => {
                if !project.commands_enabled || !self.config.commands.enabled {
                    return Ok(ignored("comment commands disabled"));
                }
                if event.comment.is_none() {
                    return Err(WebhookError::Malformed {
                        message: "comment event without directive".to_string(),
                    }
                    .into());
                }
                if !branch_allowed(event.routing_branch()) {
                    return Ok(ignored("target branch not configured for analysis"));
                }
                let decision = core
                    .rate_limits()
                    .consume(&project.id, &self.config.commands)?;
                if !decision.allowed {
                    tracing::info!(
                        project_id = %project.id,
                        count = decision.count,
                        "comment command rate limited"
                    );
                    return Ok(ignored("comment command rate limit reached"));
                }
                (JobKind::Command, event.source_branch.clone())
            }
        };

        let job = core.jobs().create(
            ctx,
            NewJob {
                project_id: project.id.clone(),
                kind,
                trigger: JobTrigger::Webhook,
                pr_number: event.pr_number,
                branch,
                commit_hash: event.commit_hash.clone(),
            },
        )?;
        let job = core.jobs().queue(ctx, &job.id)?;
        tracing::info!(job_id = %job.id, project_id = %project.id, kind = ?kind, "job queued");
        Ok(RouteDecision::Accepted { job })
    }

    /// Runs a routed job to a terminal state and reports how it ended.
    pub async fn process(
        &self,
        ctx: &RequestContext,
        job: &Job,
        event: &NormalizedEvent,
    ) -> PipelineOutcome {
        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            project_id = %job.project_id,
            kind = ?job.kind
        );
        async {
            let started = Instant::now();
            let outcome = match self.run(ctx, job, event).await {
                Ok(outcome) => outcome,
                Err(err) => classify(err),
            };
            self.finalize(ctx, &job.id, &outcome, started.elapsed());
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        job: &Job,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let project = self
            .core()?
            .projects()
            .get(&job.project_id)?
            .ok_or(ProjectError::NotFound)?;
        let job = self.core()?.jobs().start(ctx, &job.id)?;
        self.log(&job.id, NewLogEntry::info("start", format!("{:?} started", job.kind)));

        match job.kind {
            JobKind::PrAnalysis => {
                let vcs = self.collaborators.vcs(project.provider)?;
                let pr = self.resolve_pr(vcs.as_ref(), &project, event).await?;
                self.core()?
                    .jobs()
                    .cancel_superseded(ctx, &job, pr.number, &pr.head_commit)?;
                self.analyze_pull_request(ctx, &job, &project, vcs.as_ref(), &pr, event, None)
                    .await
            }
            JobKind::Command => self.run_command(ctx, &job, &project, event).await,
            JobKind::BranchAnalysis => self.reconcile_branch(ctx, &job, &project, event).await,
            JobKind::RagIndex => self.index_push(ctx, &project, event).await,
            JobKind::BranchCleanup => self.cleanup_branch(ctx, &project, event).await,
        }
    }

    fn finalize(
        &self,
        ctx: &RequestContext,
        job_id: &JobId,
        outcome: &PipelineOutcome,
        elapsed: Duration,
    ) {
        let duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        let transition = self.core().and_then(|core| {
            let jobs = core.jobs();
            match outcome {
                PipelineOutcome::Cancelled => {
                    jobs.log(
                        job_id,
                        NewLogEntry::warn("done", "job cancelled").with_duration_ms(duration_ms),
                    );
                    Ok(())
                }
                PipelineOutcome::Skipped { reason } => {
                    jobs.log(
                        job_id,
                        NewLogEntry::info("done", format!("skipped: {reason}"))
                            .with_duration_ms(duration_ms),
                    );
                    jobs.skip(ctx, job_id, reason).map(|_| ())
                }
                PipelineOutcome::Failed { message } => {
                    jobs.log(
                        job_id,
                        NewLogEntry::error("done", message.clone()).with_duration_ms(duration_ms),
                    );
                    jobs.fail(ctx, job_id, message).map(|_| ())
                }
                _ => {
                    jobs.log(
                        job_id,
                        NewLogEntry::info("done", "completed").with_duration_ms(duration_ms),
                    );
                    jobs.complete(ctx, job_id, outcome.to_result()).map(|_| ())
                }
            }
        });
        if let Err(err) = transition {
            tracing::error!(job_id = %job_id, error = %err, "failed to record job outcome");
        }
    }

    fn log(&self, job_id: &JobId, entry: NewLogEntry) {
        match self.core() {
            Ok(core) => core.jobs().log(job_id, entry),
            Err(err) => tracing::warn!(job_id = %job_id, error = %err, "failed to open store for job log"),
        }
    }

    fn is_cancelled(&self, job_id: &JobId) -> Result<bool, CodeCrowError> {
        Ok(self
            .core()?
            .jobs()
            .get(job_id)?
            .is_some_and(|job| job.status == JobStatus::Cancelled))
    }

    /// Drives `call` while polling the job; `None` means the job was
    /// cancelled and the in-flight call was abandoned.
    async fn unless_cancelled<T, F>(&self, job_id: &JobId, call: F) -> Result<Option<T>, CodeCrowError>
    where
        F: Future<Output = Result<T, CodeCrowError>>,
    {
        tokio::pin!(call);
        let mut ticker = tokio::time::interval(CANCEL_POLL);
        ticker.tick().await;
        loop {
            tokio::select! {
                result = &mut call => return result.map(Some),
                _ = ticker.tick() => {
                    if self.is_cancelled(job_id)? {
                        tracing::info!(job_id = %job_id, "job cancelled; abandoning in-flight call");
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Takes the lock, parking the job in WAITING while the key is contended.
    /// A wait that runs out surfaces as [`LockError::Timeout`].
    async fn acquire_for_job(
        &self,
        ctx: &RequestContext,
        job_id: &JobId,
        key: &LockKey,
        wait: Duration,
    ) -> Result<LockGuard<P>, CodeCrowError> {
        if let Some(guard) = self.lock.try_acquire(key)? {
            return Ok(guard);
        }
        self.core()?.jobs().wait(ctx, job_id)?;
        self.log(job_id, NewLogEntry::info("lock", format!("waiting for {key}")));
        let guard = self.lock.acquire(key, wait).await?;
        self.core()?.jobs().resume(ctx, job_id)?;
        Ok(guard)
    }

    async fn resolve_pr(
        &self,
        vcs: &dyn VcsClient,
        project: &ProjectBinding,
        event: &NormalizedEvent,
    ) -> Result<PrTarget, CodeCrowError> {
        let number = event.pr_number.ok_or_else(|| WebhookError::Malformed {
            message: "pull request number missing".to_string(),
        })?;
        if let (Some(source), Some(target), Some(head)) = (
            &event.source_branch,
            &event.target_branch,
            &event.commit_hash,
        ) {
            return Ok(PrTarget {
                number,
                source_branch: source.clone(),
                target_branch: target.clone(),
                head_commit: head.clone(),
            });
        }
        let meta = with_retry(&self.config.vcs.retry(), "vcs", || {
            vcs.get_pull_request_meta(project, number)
        })
        .await?;
        Ok(PrTarget {
            number,
            source_branch: meta.source_branch,
            target_branch: meta.target_branch,
            head_commit: meta.head_commit,
        })
    }

    async fn context_for(
        &self,
        project: &ProjectBinding,
        branch: &str,
        diff: &str,
    ) -> Vec<ContextHit> {
        if !project.rag_enabled {
            return Vec::new();
        }
        let query = changed_paths(diff).join("\n");
        if query.is_empty() {
            return Vec::new();
        }
        match self
            .indexer
            .query_context(project, branch, &query, self.config.rag.context_limit)
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(project_id = %project.id, branch, error = %err, "RAG context unavailable");
                Vec::new()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn analyze_pull_request(
        &self,
        ctx: &RequestContext,
        job: &Job,
        project: &ProjectBinding,
        vcs: &dyn VcsClient,
        pr: &PrTarget,
        event: &NormalizedEvent,
        placeholder: Option<(&str, bool)>,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let vcs_policy = self.config.vcs.retry();
        let diff = with_retry(&vcs_policy, "vcs", || vcs.get_pr_diff(project, pr.number)).await?;
        let Some(fingerprint) = fingerprint(&diff) else {
            return Ok(PipelineOutcome::skipped("diff has no changed lines"));
        };
        self.log(
            &job.id,
            NewLogEntry::info("diff", format!("fetched diff ({} bytes)", diff.len()))
                .with_metadata(serde_json::json!({ "fingerprint": fingerprint })),
        );

        let key = LockKey::analysis(&project.id, &fingerprint);
        let guard = self
            .acquire_for_job(ctx, &job.id, &key, self.lock.default_wait())
            .await?;
        let analyzed = self
            .analyze_locked(ctx, job, project, pr, &diff, &fingerprint, event)
            .await;
        guard.release()?;
        let Some(analyzed) = analyzed? else {
            return Ok(PipelineOutcome::Cancelled);
        };

        if self.is_cancelled(&job.id)? {
            return Ok(PipelineOutcome::Cancelled);
        }
        if !analyzed.cached
            && let Some(current) = self
                .core()?
                .analyses()
                .current_for_pr(&project.id, pr.number)?
            && current.pr_version > analyzed.analysis.pr_version
        {
            return Ok(PipelineOutcome::skipped("a newer analysis exists for this pull request"));
        }

        let (detailed, placeholder_id) = match placeholder {
            Some((comment_id, detailed)) => (detailed, Some(comment_id)),
            None => (true, None),
        };
        let body = report::render_analysis(&analyzed.analysis, analyzed.cached, detailed);
        match placeholder_id {
            Some(comment_id) => {
                with_retry(&vcs_policy, "vcs", || {
                    vcs.update_comment(project, pr.number, comment_id, &body)
                })
                .await?;
            }
            None => {
                with_retry(&vcs_policy, "vcs", || vcs.post_comment(project, pr.number, &body))
                    .await?;
            }
        }
        self.log(&job.id, NewLogEntry::info("post", "report posted"));

        Ok(PipelineOutcome::Analyzed {
            analysis_id: analyzed.analysis.id,
            result: analyzed.analysis.result,
            pr_version: analyzed.analysis.pr_version,
            cached: analyzed.cached,
            resolved_issues: analyzed.resolved_issues,
        })
    }

    /// The critical section: cache lookup, AI run on a miss, gate, persist.
    #[allow(clippy::too_many_arguments)]
    async fn analyze_locked(
        &self,
        ctx: &RequestContext,
        job: &Job,
        project: &ProjectBinding,
        pr: &PrTarget,
        diff: &str,
        fingerprint: &str,
        event: &NormalizedEvent,
    ) -> Result<Option<Analyzed>, CodeCrowError> {
        let cached = self
            .core()
            .and_then(|core| {
                core.analyses()
                    .find_cached(&project.id, Some(fingerprint), &pr.head_commit)
            })
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "cache lookup failed; recomputing");
                None
            });
        if let Some(hit) = cached {
            self.core()?
                .analyses()
                .served_from_cache(ctx, &job.id, &hit.id)?;
            self.log(
                &job.id,
                NewLogEntry::info("cache", format!("served from cache ({})", hit.id)),
            );
            return Ok(Some(Analyzed {
                analysis: hit,
                cached: true,
                resolved_issues: 0,
            }));
        }

        let context = self.context_for(project, &pr.source_branch, diff).await;
        let ai = Arc::clone(self.collaborators.ai());
        let started = Instant::now();
        let issues = self
            .unless_cancelled(&job.id, async {
                with_retry(&self.config.ai, "ai", || ai.run_analysis(diff, &context))
                    .await
                    .map_err(CodeCrowError::from)
            })
            .await?;
        let Some(issues) = issues else {
            return Ok(None);
        };
        self.log(
            &job.id,
            NewLogEntry::info("ai", format!("{} issues reported", issues.len()))
                .with_duration_ms(i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)),
        );

        let evaluation = self
            .core()?
            .gates()
            .evaluate_for_project(ctx, project, &issues)?;
        self.log(
            &job.id,
            NewLogEntry::info("gate", format!("quality gate {:?}", evaluation.result)),
        );
        let stored = self.core()?.analyses().store(
            ctx,
            NewAnalysis {
                project_id: project.id.clone(),
                commit_hash: pr.head_commit.clone(),
                pr_number: Some(pr.number),
                branch: Some(pr.source_branch.clone()),
                diff_fingerprint: Some(fingerprint.to_string()),
                result: evaluation.result,
                issues,
            },
            Some(Reconciliation {
                pr_number: pr.number,
                actor: event.actor.clone(),
            }),
        )?;
        Ok(Some(Analyzed {
            analysis: stored.analysis,
            cached: false,
            resolved_issues: stored.resolved_issues,
        }))
    }

    async fn run_command(
        &self,
        ctx: &RequestContext,
        job: &Job,
        project: &ProjectBinding,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let directive = event.comment.as_ref().ok_or_else(|| WebhookError::Malformed {
                message: "comment event without directive".to_string(),
            })?;
        if directive.command == CommandKind::Ask && directive.args.is_none() {
            return Ok(PipelineOutcome::skipped("ask needs a question"));
        }
        let vcs = self.collaborators.vcs(project.provider)?;
        let vcs = vcs.as_ref();
        let pr = self.resolve_pr(vcs, project, event).await?;
        if !branch_matches(&pr.target_branch, &project.branch_patterns) {
            return Ok(PipelineOutcome::skipped("target branch not configured for analysis"));
        }

        let vcs_policy = self.config.vcs.retry();
        let placeholder = report::placeholder(directive.command);
        let comment_id = with_retry(&vcs_policy, "vcs", || {
            vcs.post_comment(project, pr.number, &placeholder)
        })
        .await?;

        match directive.command {
            CommandKind::Analyze | CommandKind::Review => {
                let detailed = directive.command == CommandKind::Review;
                self.analyze_pull_request(
                    ctx,
                    job,
                    project,
                    vcs,
                    &pr,
                    event,
                    Some((&comment_id, detailed)),
                )
                .await
            }
            CommandKind::Summarize | CommandKind::Ask => {
                let diff =
                    with_retry(&vcs_policy, "vcs", || vcs.get_pr_diff(project, pr.number)).await?;
                let ai = Arc::clone(self.collaborators.ai());
                let body = match (directive.command, directive.args.as_deref()) {
                    (CommandKind::Ask, Some(question)) => {
                        let context = self.context_for(project, &pr.source_branch, &diff).await;
                        self.unless_cancelled(&job.id, async {
                            with_retry(&self.config.ai, "ai", || ai.ask(question, &diff, &context))
                                .await
                                .map_err(CodeCrowError::from)
                        })
                        .await?
                        .map(|answer| report::render_answer(question, &answer))
                    }
                    _ => self
                        .unless_cancelled(&job.id, async {
                            with_retry(&self.config.ai, "ai", || ai.summarize(&diff))
                                .await
                                .map_err(CodeCrowError::from)
                        })
                        .await?
                        .map(|summary| report::render_summary(&summary)),
                };
                let Some(body) = body else {
                    return Ok(PipelineOutcome::Cancelled);
                };
                with_retry(&vcs_policy, "vcs", || {
                    vcs.update_comment(project, pr.number, &comment_id, &body)
                })
                .await?;
                Ok(PipelineOutcome::Replied {
                    command: directive.command,
                    comment_id,
                })
            }
        }
    }

    /// Re-runs analysis on the merged commit so issues the merge fixed are
    /// marked resolved on the originating PR.
    async fn reconcile_branch(
        &self,
        ctx: &RequestContext,
        job: &Job,
        project: &ProjectBinding,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let (Some(pr_number), Some(branch)) = (event.pr_number, event.target_branch.clone())
        else {
            return Err(WebhookError::Malformed {
                message: "merge event without pull request or target branch".to_string(),
            }
            .into());
        };
        let Some(commit) = event.merge_commit.clone().or_else(|| event.commit_hash.clone())
        else {
            return Ok(PipelineOutcome::skipped("merge reported no commit"));
        };

        // Base indexing holds the branch key for up to the indexing timeout.
        let key = LockKey::branch(&project.id, &branch);
        let wait = Duration::from_secs(self.config.rag.indexing_timeout_secs);
        let guard = self.acquire_for_job(ctx, &job.id, &key, wait).await?;
        let outcome = self
            .reconcile_locked(ctx, job, project, &branch, &commit, pr_number, event)
            .await;
        guard.release()?;
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_locked(
        &self,
        ctx: &RequestContext,
        job: &Job,
        project: &ProjectBinding,
        branch: &str,
        commit: &str,
        pr_number: i64,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let existing = self
            .core()?
            .analyses()
            .lookup_by_commit(&project.id, commit)?
            .filter(|analysis| analysis.pr_number.is_none());
        if let Some(existing) = existing {
            return Ok(PipelineOutcome::Analyzed {
                analysis_id: existing.id,
                result: existing.result,
                pr_version: None,
                cached: true,
                resolved_issues: 0,
            });
        }

        let vcs = self.collaborators.vcs(project.provider)?;
        let diff = with_retry(&self.config.vcs.retry(), "vcs", || {
            vcs.get_commit_diff(project, commit)
        })
        .await?;
        let context = self.context_for(project, branch, &diff).await;
        let ai = Arc::clone(self.collaborators.ai());
        let issues = self
            .unless_cancelled(&job.id, async {
                with_retry(&self.config.ai, "ai", || ai.run_analysis(&diff, &context))
                    .await
                    .map_err(CodeCrowError::from)
            })
            .await?;
        let Some(issues) = issues else {
            return Ok(PipelineOutcome::Cancelled);
        };
        let evaluation = self
            .core()?
            .gates()
            .evaluate_for_project(ctx, project, &issues)?;
        let stored = self.core()?.analyses().store(
            ctx,
            NewAnalysis {
                project_id: project.id.clone(),
                commit_hash: commit.to_string(),
                pr_number: None,
                branch: Some(branch.to_string()),
                diff_fingerprint: None,
                result: evaluation.result,
                issues,
            },
            Some(Reconciliation {
                pr_number,
                actor: event.actor.clone(),
            }),
        )?;
        self.log(
            &job.id,
            NewLogEntry::info(
                "reconcile",
                format!("{} issues resolved on PR #{pr_number}", stored.resolved_issues),
            ),
        );
        Ok(PipelineOutcome::Analyzed {
            analysis_id: stored.analysis.id,
            result: stored.analysis.result,
            pr_version: None,
            cached: false,
            resolved_issues: stored.resolved_issues,
        })
    }

    async fn index_push(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let (Some(branch), Some(commit)) = (&event.source_branch, &event.commit_hash) else {
            return Err(WebhookError::Malformed {
                message: "push without branch or commit".to_string(),
            }
            .into());
        };
        let outcome = self.indexer.sync_branch(ctx, project, branch, commit).await?;
        let (chunks, delta_status) = match outcome {
            IndexOutcome::Unchanged => (0, None),
            IndexOutcome::BaseUpdated { index, .. } => (index.chunk_count, None),
            IndexOutcome::Delta(delta) => (delta.chunk_count, Some(delta.status)),
        };
        Ok(PipelineOutcome::Indexed {
            branch: branch.clone(),
            commit: commit.clone(),
            chunks,
            delta_status,
        })
    }

    async fn cleanup_branch(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        event: &NormalizedEvent,
    ) -> Result<PipelineOutcome, CodeCrowError> {
        let Some(branch) = &event.source_branch else {
            return Err(WebhookError::Malformed {
                message: "branch deletion without branch".to_string(),
            }
            .into());
        };
        let removed = self
            .indexer
            .delete_branch_index(ctx, &project.id, branch)
            .await?;
        Ok(PipelineOutcome::Cleaned {
            branch: branch.clone(),
            removed,
        })
    }
}

/// Maps an error that escaped a job into its terminal outcome.
fn classify(err: CodeCrowError) -> PipelineOutcome {
    match err {
        CodeCrowError::Lock(LockError::Timeout { .. }) => {
            PipelineOutcome::skipped("analysis already in progress")
        }
        CodeCrowError::Analysis(AnalysisError::Duplicate) => {
            PipelineOutcome::skipped("analysis already processed")
        }
        CodeCrowError::Job(JobError::InvalidTransition {
            from: JobStatus::Cancelled,
            ..
        }) => PipelineOutcome::Cancelled,
        err => {
            tracing::warn!(error = %err, "job failed");
            PipelineOutcome::Failed {
                message: err.to_string(),
            }
        }
    }
}
