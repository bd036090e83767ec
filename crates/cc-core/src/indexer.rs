//! RAG delta index manager: keeps the base-branch index current, builds
//! per-branch delta overlays, answers context queries over base + delta and
//! drives archive/purge housekeeping.

use crate::chunker::chunk_file;
use crate::codecrow::RequestContext;
use crate::collaborators::{Collaborators, VcsClient};
use crate::config::{RagConfig, RetryConfig};
use crate::error::{CodeCrowError, CollaboratorError};
use crate::lock::{AnalysisLock, LockKey};
use crate::provider::CoreProvider;
use crate::retry::with_retry;
use crate::types::{
    ChangedFile, ContextHit, DeltaStatus, IndexScope, ProjectBinding, ProjectId, RagBranchIndex,
    RagDeltaIndex,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The base index already points at the requested commit.
    Unchanged,
    BaseUpdated {
        index: RagBranchIndex,
        stale_deltas: usize,
    },
    /// A delta finished; its status is READY, or STALE when the base moved
    /// while it was being built.
    Delta(RagDeltaIndex),
}

pub struct RagIndexer<P: CoreProvider> {
    provider: Arc<P>,
    collaborators: Collaborators,
    lock: AnalysisLock<P>,
    config: RagConfig,
    call_policy: RetryConfig,
}

impl<P: CoreProvider> Clone for RagIndexer<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            collaborators: self.collaborators.clone(),
            lock: self.lock.clone(),
            config: self.config.clone(),
            call_policy: self.call_policy,
        }
    }
}

struct IndexedFiles {
    chunks: i64,
    files: i64,
    deleted: BTreeSet<String>,
    per_file: BTreeMap<String, i64>,
}

impl<P: CoreProvider> RagIndexer<P> {
    pub fn new(
        provider: Arc<P>,
        collaborators: Collaborators,
        lock: AnalysisLock<P>,
        config: RagConfig,
        call_policy: RetryConfig,
    ) -> Self {
        Self {
            provider,
            collaborators,
            lock,
            config,
            call_policy,
        }
    }

    fn indexing_timeout(&self) -> Duration {
        Duration::from_secs(self.config.indexing_timeout_secs)
    }

    /// Routes a pushed commit: the default branch updates the base index,
    /// any other branch gets a fresh delta.
    pub async fn sync_branch(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        branch: &str,
        head: &str,
    ) -> Result<IndexOutcome, CodeCrowError> {
        if branch == project.default_branch {
            self.update_branch_index(ctx, project, head).await
        } else {
            self.create_delta(ctx, project, branch, head).await
        }
    }

    /// Incrementally re-indexes the default branch at `head`. Deleted files
    /// become tombstones, then every READY delta based on the branch goes
    /// STALE in the same transaction that records the new commit.
    pub async fn update_branch_index(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        head: &str,
    ) -> Result<IndexOutcome, CodeCrowError> {
        let key = LockKey::branch(&project.id, &project.default_branch);
        let guard = self.lock.acquire(&key, self.indexing_timeout()).await?;
        let outcome = match tokio::time::timeout(
            self.indexing_timeout(),
            self.index_base(ctx, project, head),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CollaboratorError::Timeout { service: "rag" }.into()),
        };
        guard.release()?;
        outcome
    }

    async fn index_base(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        head: &str,
    ) -> Result<IndexOutcome, CodeCrowError> {
        let branch = project.default_branch.as_str();
        let existing = self.provider.open()?.rag().get_branch_index(&project.id, branch)?;
        if existing
            .as_ref()
            .is_some_and(|index| index.commit_hash == head)
        {
            return Ok(IndexOutcome::Unchanged);
        }
        let vcs = self.collaborators.vcs(project.provider)?;
        let changed = match &existing {
            Some(previous) => {
                with_retry(&self.call_policy, "vcs", || {
                    vcs.compare(project, &previous.commit_hash, head)
                })
                .await?
            }
            None => with_retry(&self.call_policy, "vcs", || vcs.list_files(project, head))
                .await?
                .into_iter()
                .map(|path| ChangedFile {
                    path,
                    deleted: false,
                })
                .collect(),
        };
        let scope = IndexScope::Branch {
            project_id: project.id.clone(),
            branch: branch.to_string(),
        };
        let indexed = self
            .index_files(vcs.as_ref(), project, &scope, &changed, head)
            .await?;
        let (index, stale) = self.provider.open()?.rag().advance_base(
            ctx,
            &project.id,
            branch,
            head,
            &indexed.deleted,
            &indexed.per_file,
        )?;
        tracing::info!(
            project_id = %project.id,
            branch,
            commit = head,
            chunks = indexed.chunks,
            stale_deltas = stale.len(),
            "base index updated"
        );
        Ok(IndexOutcome::BaseUpdated {
            index,
            stale_deltas: stale.len(),
        })
    }

    /// Builds a delta for `branch` at `head` covering only the files changed
    /// against the base branch's indexed commit. Pushes to the same branch
    /// queue behind the branch lock; each landed delta supersedes the last.
    pub async fn create_delta(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        branch: &str,
        head: &str,
    ) -> Result<IndexOutcome, CodeCrowError> {
        let key = LockKey::branch(&project.id, branch);
        let guard = self.lock.acquire(&key, self.indexing_timeout()).await?;
        let outcome = self.build_delta(ctx, project, branch, head).await;
        guard.release()?;
        outcome
    }

    async fn build_delta(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
        branch: &str,
        head: &str,
    ) -> Result<IndexOutcome, CodeCrowError> {
        let base = self.base_index(ctx, project).await?;
        let delta = self.provider.open()?.rag().create_delta(
            ctx,
            &project.id,
            branch,
            &base.branch,
            &base.commit_hash,
        )?;
        let scope = IndexScope::Delta {
            project_id: project.id.clone(),
            delta_id: delta.id.clone(),
        };
        let built = tokio::time::timeout(self.indexing_timeout(), async {
            let vcs = self.collaborators.vcs(project.provider)?;
            let changed = with_retry(&self.call_policy, "vcs", || {
                vcs.compare(project, &base.commit_hash, head)
            })
            .await?;
            self.index_files(vcs.as_ref(), project, &scope, &changed, head)
                .await
        })
        .await
        .unwrap_or(Err(CollaboratorError::Timeout { service: "rag" }.into()));

        let indexed = match built {
            Ok(indexed) => indexed,
            Err(err) => {
                tracing::warn!(delta_id = %delta.id, branch, error = %err, "delta indexing failed");
                if let Err(fail_err) =
                    self.provider
                        .open()?
                        .rag()
                        .fail_delta(ctx, &delta.id, &err.to_string())
                {
                    tracing::warn!(delta_id = %delta.id, error = %fail_err, "failed to mark delta failed");
                }
                if let Err(drop_err) = self.collaborators.vectors().delete_scope(&scope).await {
                    tracing::debug!(delta_id = %delta.id, error = %drop_err, "vector cleanup failed");
                }
                return Err(err);
            }
        };

        let core = self.provider.open()?;
        core.rag().record_branch_commit(
            ctx,
            &project.id,
            branch,
            head,
            &indexed.deleted,
            &indexed.per_file,
        )?;
        let landed = core.rag().finish_delta(
            ctx,
            &delta.id,
            head,
            indexed.chunks,
            indexed.files,
        )?;
        tracing::info!(
            delta_id = %landed.id,
            branch,
            status = ?landed.status,
            chunks = indexed.chunks,
            files = indexed.files,
            "delta landed"
        );
        Ok(IndexOutcome::Delta(landed))
    }

    /// Base index for deltas; a project whose default branch was never
    /// indexed gets its base built first.
    async fn base_index(
        &self,
        ctx: &RequestContext,
        project: &ProjectBinding,
    ) -> Result<RagBranchIndex, CodeCrowError> {
        let existing = self
            .provider
            .open()?
            .rag()
            .get_branch_index(&project.id, &project.default_branch)?;
        if let Some(index) = existing {
            return Ok(index);
        }
        let vcs = self.collaborators.vcs(project.provider)?;
        let base_head = with_retry(&self.call_policy, "vcs", || {
            vcs.branch_head(project, &project.default_branch)
        })
        .await?;
        self.update_branch_index(ctx, project, &base_head).await?;
        self.provider
            .open()?
            .rag()
            .get_branch_index(&project.id, &project.default_branch)?
            .ok_or_else(|| CodeCrowError::Internal {
                message: "base index missing after bootstrap".to_string(),
            })
    }

    async fn index_files(
        &self,
        vcs: &dyn VcsClient,
        project: &ProjectBinding,
        scope: &IndexScope,
        changed: &[ChangedFile],
        commit: &str,
    ) -> Result<IndexedFiles, CodeCrowError> {
        let mut indexed = IndexedFiles {
            chunks: 0,
            files: 0,
            deleted: BTreeSet::new(),
            per_file: BTreeMap::new(),
        };
        for file in changed {
            if file.deleted {
                indexed.deleted.insert(file.path.clone());
                continue;
            }
            let content = with_retry(&self.call_policy, "vcs", || {
                vcs.get_file_content(project, &file.path, commit)
            })
            .await?;
            let Some(content) = content else {
                indexed.deleted.insert(file.path.clone());
                continue;
            };
            let chunks = chunk_file(
                &file.path,
                &content,
                self.config.chunk_lines,
                self.config.chunk_overlap,
            );
            indexed
                .per_file
                .insert(file.path.clone(), chunks.len() as i64);
            if chunks.is_empty() {
                continue;
            }
            with_retry(&self.call_policy, "rag", || {
                self.collaborators.vectors().index_chunks(scope, &chunks)
            })
            .await?;
            indexed.chunks += chunks.len() as i64;
            indexed.files += 1;
        }
        Ok(indexed)
    }

    /// Drops the branch's vectors and rows. Repeated deliveries are no-ops.
    pub async fn delete_branch_index(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<u64, CodeCrowError> {
        let key = LockKey::branch(project_id, branch);
        let guard = self.lock.acquire(&key, self.indexing_timeout()).await?;
        let outcome = self.drop_branch(ctx, project_id, branch).await;
        guard.release()?;
        outcome
    }

    async fn drop_branch(
        &self,
        ctx: &RequestContext,
        project_id: &ProjectId,
        branch: &str,
    ) -> Result<u64, CodeCrowError> {
        let state = self.provider.open()?.rag().branch_state(project_id, branch)?;
        let mut scopes = vec![IndexScope::Branch {
            project_id: project_id.clone(),
            branch: branch.to_string(),
        }];
        scopes.extend(state.deltas.iter().map(|delta| IndexScope::Delta {
            project_id: project_id.clone(),
            delta_id: delta.id.clone(),
        }));
        for scope in &scopes {
            with_retry(&self.call_policy, "rag", || {
                self.collaborators.vectors().delete_scope(scope)
            })
            .await?;
        }
        let removed = self
            .provider
            .open()?
            .rag()
            .delete_branch(ctx, project_id, branch)?;
        tracing::info!(project_id = %project_id, branch, removed, "branch index deleted");
        Ok(removed)
    }

    /// Context for `branch`: base-branch hits overlaid with the branch's
    /// READY delta (or newest STALE one). Paths the delta covers shadow their
    /// base-branch hits. Base tombstones only hide base hits, and never for a
    /// file the branch indexed itself; the branch's own tombstones hide hits
    /// from both sources.
    pub async fn query_context(
        &self,
        project: &ProjectBinding,
        branch: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContextHit>, CodeCrowError> {
        let (base, overlay) = {
            let core = self.provider.open()?;
            let base = core
                .rag()
                .branch_state(&project.id, &project.default_branch)?;
            let overlay = if branch == project.default_branch {
                None
            } else {
                Some(core.rag().branch_state(&project.id, branch)?)
            };
            (base, overlay)
        };

        let branch_index = overlay.as_ref().and_then(|state| state.index.as_ref());
        let branch_hides = |path: &str| branch_index.is_some_and(|index| index.is_tombstoned(path));
        let base_hides = |path: &str| {
            base.index
                .as_ref()
                .is_some_and(|index| index.is_tombstoned(path))
                && !branch_index.is_some_and(|index| index.has_indexed(path))
        };
        let delta = overlay
            .as_ref()
            .and_then(|state| pick_delta(&state.deltas))
            .cloned();

        let vectors = self.collaborators.vectors();
        let mut hits = Vec::new();
        let mut shadowed = HashSet::new();
        if let Some(delta) = &delta {
            let scope = IndexScope::Delta {
                project_id: project.id.clone(),
                delta_id: delta.id.clone(),
            };
            let delta_hits = vectors.query(&scope, query, limit).await?;
            shadowed.extend(delta_hits.iter().map(|hit| hit.path.clone()));
            hits.extend(delta_hits.into_iter().filter(|hit| !branch_hides(hit.path.as_str())));
            self.provider.open()?.rag().touch_delta(&delta.id)?;
        }
        if base.index.is_some() {
            let scope = IndexScope::Branch {
                project_id: project.id.clone(),
                branch: project.default_branch.clone(),
            };
            hits.extend(
                vectors
                    .query(&scope, query, limit)
                    .await?
                    .into_iter()
                    .filter(|hit| {
                        !shadowed.contains(&hit.path)
                            && !base_hides(hit.path.as_str())
                            && !branch_hides(hit.path.as_str())
                    }),
            );
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Marks idle and long-stale deltas ARCHIVED.
    pub fn archive_inactive(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<RagDeltaIndex>, CodeCrowError> {
        let idle_before = now - ChronoDuration::days(self.config.retention_days);
        let stale_before = now - ChronoDuration::hours(self.config.stale_grace_hours);
        self.provider
            .open()?
            .rag()
            .archive_inactive(ctx, idle_before, stale_before)
    }

    /// Deletes ARCHIVED deltas older than the purge horizon, vectors first.
    /// A delta whose vectors could not be dropped stays for the next run.
    pub async fn purge_archived(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<u64, CodeCrowError> {
        let archived_before = now - ChronoDuration::days(self.config.purge_after_days);
        let candidates = self.provider.open()?.rag().find_purgeable(archived_before)?;
        let mut purged = Vec::new();
        for delta in candidates {
            let scope = IndexScope::Delta {
                project_id: delta.project_id.clone(),
                delta_id: delta.id.clone(),
            };
            match self.collaborators.vectors().delete_scope(&scope).await {
                Ok(()) => purged.push(delta.id),
                Err(err) => {
                    tracing::warn!(delta_id = %delta.id, error = %err, "vector purge failed");
                }
            }
        }
        self.provider.open()?.rag().delete_deltas(ctx, &purged)
    }
}

fn pick_delta(deltas: &[RagDeltaIndex]) -> Option<&RagDeltaIndex> {
    deltas
        .iter()
        .filter(|delta| delta.status == DeltaStatus::Ready)
        .max_by_key(|delta| delta.created_at)
        .or_else(|| {
            deltas
                .iter()
                .filter(|delta| delta.status == DeltaStatus::Stale)
                .max_by_key(|delta| delta.created_at)
        })
}
