//! Persisted scaling-event state for a single scalable resource.

use serde::{Deserialize, Serialize};

/// Kind of resource a state record (or a failure notification) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A job task-group.
    #[default]
    Job,
    /// A worker node in the cluster.
    Node,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Job => write!(f, "job"),
            ResourceType::Node => write!(f, "node"),
        }
    }
}

/// Last-scaling-event record for one job task-group.
///
/// Read at the start of each group's evaluation and written back once the
/// group has passed the failsafe and cooldown gates. The failsafe fields
/// track consecutive failed scaling attempts; once `failsafe_mode` is set,
/// further scaling is suppressed until an operator resets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScalingState {
    /// Name of the resource this record tracks (the group name).
    pub resource_name: String,
    pub resource_type: ResourceType,
    /// Storage key, `{root}/state/jobs/{job}/{group}`.
    pub state_path: String,
    /// Unix timestamp (seconds) of the last applied scaling event.
    pub last_scaling_event: u64,
    /// Consecutive failed scaling attempts since the last success.
    pub failure_count: u32,
    /// Unix timestamp (seconds) of the most recent failure.
    pub last_failure: u64,
    /// When set, the failsafe circuit breaker has tripped.
    pub failsafe_mode: bool,
}

impl ScalingState {
    /// Build the state record for a job task-group, with the storage key
    /// rooted at `root`.
    pub fn for_job_group(root: &str, job: &str, group: &str) -> Self {
        Self {
            resource_name: group.to_string(),
            resource_type: ResourceType::Job,
            state_path: Self::job_group_path(root, job, group),
            ..Self::default()
        }
    }

    /// Storage key for a job task-group's state record.
    pub fn job_group_path(root: &str, job: &str, group: &str) -> String {
        format!("{root}/state/jobs/{job}/{group}")
    }

    /// Record a failed scaling attempt.
    pub fn record_failure(&mut self, now: u64) {
        self.failure_count += 1;
        self.last_failure = now;
    }

    /// Clear failsafe mode and the failure counters.
    pub fn reset_failsafe(&mut self) {
        self.failsafe_mode = false;
        self.failure_count = 0;
        self.last_failure = 0;
    }
}
