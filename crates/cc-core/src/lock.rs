//! Keyed analysis lock backed by the durable lease table, so exclusion holds
//! across processes and survives restarts.

use crate::config::LockConfig;
use crate::error::{CodeCrowError, LockError};
use crate::provider::CoreProvider;
use crate::types::ProjectId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use ulid::Ulid;

const MAX_LEASE_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// PR and commit analyses: different fingerprints run in parallel.
    pub fn analysis(project_id: &ProjectId, fingerprint: &str) -> Self {
        Self(format!("analysis:{project_id}:{fingerprint}"))
    }

    /// Branch reconciliation, indexing and cleanup.
    pub fn branch(project_id: &ProjectId, branch: &str) -> Self {
        Self(format!("branch:{project_id}:{branch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct AnalysisLock<P: CoreProvider> {
    provider: Arc<P>,
    config: LockConfig,
}

impl<P: CoreProvider> Clone for AnalysisLock<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
        }
    }
}

impl<P: CoreProvider> AnalysisLock<P> {
    pub fn new(provider: Arc<P>, config: LockConfig) -> Self {
        Self { provider, config }
    }

    /// Single attempt; `None` means another owner holds an unexpired lease.
    pub fn try_acquire(&self, key: &LockKey) -> Result<Option<LockGuard<P>>, CodeCrowError> {
        let owner = Ulid::new().to_string();
        let lease = chrono::Duration::seconds(self.config.lease_secs.min(MAX_LEASE_SECS) as i64);
        let acquired = self
            .provider
            .open()?
            .locks()
            .try_acquire(key.as_str(), &owner, lease)?;
        if acquired {
            tracing::debug!(key = %key, "lock acquired");
            Ok(Some(LockGuard {
                provider: Arc::clone(&self.provider),
                key: key.clone(),
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Polls until the lock is free or `wait` elapses, then fails with
    /// [`LockError::Timeout`].
    pub async fn acquire(
        &self,
        key: &LockKey,
        wait: Duration,
    ) -> Result<LockGuard<P>, CodeCrowError> {
        let deadline = Instant::now() + wait;
        let poll = Duration::from_millis(self.config.poll_ms.max(1));
        loop {
            if let Some(guard) = self.try_acquire(key)? {
                return Ok(guard);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::info!(key = %key, "lock wait timed out");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                }
                .into());
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Bounded wait from the configured `wait_ms`.
    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.config.wait_ms)
    }
}

/// Held lease. Released explicitly with [`LockGuard::release`] or on drop,
/// whichever comes first; an unreleased lease also expires on its own.
pub struct LockGuard<P: CoreProvider> {
    provider: Arc<P>,
    key: LockKey,
    owner: String,
    released: bool,
}

impl<P: CoreProvider> LockGuard<P> {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn release(mut self) -> Result<(), CodeCrowError> {
        self.released = true;
        self.release_inner()
    }

    fn release_inner(&self) -> Result<(), CodeCrowError> {
        let released = self
            .provider
            .open()?
            .locks()
            .release(self.key.as_str(), &self.owner)?;
        if !released {
            tracing::warn!(key = %self.key, "lock lease lost before release");
        }
        Ok(())
    }
}

impl<P: CoreProvider> Drop for LockGuard<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.release_inner() {
            tracing::warn!(key = %self.key, error = %err, "failed to release lock");
        }
    }
}
