//! PolicyRegistry — concurrency-safe store of job scaling policies.
//!
//! One reader/writer lock guards a plain ordered map of job id → group
//! policies. Every operation here is a read-modify-write that must not
//! interleave with a concurrent reader's snapshot or another writer's
//! structural change, so the lock wraps each operation whole. The
//! evaluator additionally acquires the lock directly (exclusive for the
//! recommendation step, which mutates policy observations; shared for the
//! per-group gating phase) through `lock_exclusive`/`lock_shared`.
//!
//! Invariant: a job key is never present with an empty policy list — the
//! last group removed from a job removes the job entry too.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::policy::{GroupScalingPolicy, PolicyError};

/// Job id → group policies, in first-seen group order.
pub type PolicyMap = BTreeMap<String, Vec<GroupScalingPolicy>>;

/// Concurrency-safe registry of job scaling policies.
#[derive(Default)]
pub struct PolicyRegistry {
    inner: RwLock<PolicyMap>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update the policy for `(job, group)` from watcher metadata.
    ///
    /// An existing group's configuration is overwritten in place (identity
    /// and current observation preserved); a new group is appended to the
    /// job's list, creating the job entry if needed.
    pub async fn upsert_group_policy(
        &self,
        job: &str,
        group: &str,
        meta: &HashMap<String, String>,
    ) -> Result<(), PolicyError> {
        let incoming = GroupScalingPolicy::from_meta(group, meta)?;
        let mut map = self.inner.write().await;
        let groups = map.entry(job.to_string()).or_default();
        match groups.iter_mut().find(|p| p.group_name == group) {
            Some(existing) => {
                existing.update_from(&incoming);
                debug!(%job, %group, "group scaling policy updated");
            }
            None => {
                groups.push(incoming);
                debug!(%job, %group, "group scaling policy added");
            }
        }
        Ok(())
    }

    /// Remove the policy for `(job, group)`, deleting the job entry when its
    /// last group goes. No-op if job or group is untracked.
    pub async fn remove_group_policy(&self, job: &str, group: &str) {
        let mut map = self.inner.write().await;
        if let Some(groups) = map.get_mut(job) {
            groups.retain(|p| p.group_name != group);
            if groups.is_empty() {
                map.remove(job);
            }
            debug!(%job, %group, "group scaling policy removed");
        }
    }

    /// Remove a job and all its group policies. No-op if untracked.
    pub async fn remove_job_policy(&self, job: &str) {
        let mut map = self.inner.write().await;
        if map.remove(job).is_some() {
            debug!(%job, "job scaling policies removed");
        }
    }

    /// Drop tracked groups for `job` that are absent from `live` — the set
    /// of group names the orchestrator currently reports for the job. Heals
    /// registry entries that predate a group's removal from the job spec.
    pub async fn reconcile_orphans(&self, job: &str, live: &[String]) {
        let mut map = self.inner.write().await;
        if let Some(groups) = map.get_mut(job) {
            let before = groups.len();
            groups.retain(|p| live.iter().any(|name| *name == p.group_name));
            let dropped = before - groups.len();
            if dropped > 0 {
                debug!(%job, dropped, "orphaned group policies removed");
            }
            if groups.is_empty() {
                map.remove(job);
            }
        }
    }

    /// Snapshot of tracked job ids, in map order.
    pub async fn jobs(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Number of tracked jobs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no jobs are tracked.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Acquire the registry exclusively. Held across the orchestrator's
    /// recommendation step, which mutates policy observations in place;
    /// downgrade the guard for the read-only per-group phase.
    pub async fn lock_exclusive(&self) -> RwLockWriteGuard<'_, PolicyMap> {
        self.inner.write().await
    }

    /// Acquire the registry shared, for read-only traversal.
    pub async fn lock_shared(&self) -> RwLockReadGuard<'_, PolicyMap> {
        self.inner.read().await
    }
}
