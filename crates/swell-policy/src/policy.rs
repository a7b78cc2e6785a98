//! Per-task-group scaling policy.
//!
//! The durable configuration is set by the metadata-ingestion watcher and
//! compared for equality; the observed state is recomputed by the
//! orchestrator every cycle and excluded from equality and serialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cooldown applied when the metadata does not specify one.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Errors raised while parsing policy metadata.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid value {value:?} for policy key {key:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid bounds for group {group:?}: min {min} exceeds max {max}")]
    InvalidBounds { group: String, min: u64, max: u64 },
}

/// Recommendation outcome for a group, recomputed each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Out,
    In,
    #[default]
    None,
}

impl std::fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleDirection::Out => write!(f, "out"),
            ScaleDirection::In => write!(f, "in"),
            ScaleDirection::None => write!(f, "none"),
        }
    }
}

/// Snapshot of a group's task resource allocation, as reported by the
/// orchestrator's recommendation step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskAllocation {
    /// Total CPU allocated to the group's tasks, in MHz.
    pub total_cpu_mhz: f64,
    /// Total memory allocated to the group's tasks, in MB.
    pub total_memory_mb: f64,
    /// CPU utilization as a percentage of the allocation.
    pub cpu_percent: f64,
    /// Memory utilization as a percentage of the allocation.
    pub memory_percent: f64,
}

/// Transient per-cycle observation attached to a policy.
///
/// Never part of policy equality or serialization; a freshly deserialized
/// policy starts with a default observation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedState {
    pub direction: ScaleDirection,
    /// Which metric drove the recommendation ("cpu", "memory", ...).
    pub scaling_metric: String,
    pub tasks: TaskAllocation,
}

/// Scaling configuration and last-computed observation for one task-group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupScalingPolicy {
    /// Group name, unique within its job's policy list.
    pub group_name: String,
    /// Minimum seconds between successive scaling events.
    pub cooldown: u64,
    pub enabled: bool,
    pub min: u64,
    pub max: u64,
    /// Scale-in thresholds (utilization percentages, 0–100).
    pub scale_in_cpu: f64,
    pub scale_in_mem: f64,
    /// Scale-out thresholds (utilization percentages, 0–100).
    pub scale_out_cpu: f64,
    pub scale_out_mem: f64,
    /// Notification routing key for failure alerts.
    pub uid: String,
    /// Observation recomputed each cycle by the orchestrator.
    #[serde(skip)]
    pub observed: ObservedState,
}

impl GroupScalingPolicy {
    /// A policy for `group` with default values set.
    pub fn new(group: &str) -> Self {
        Self {
            group_name: group.to_string(),
            cooldown: DEFAULT_COOLDOWN_SECS,
            enabled: false,
            min: 0,
            max: 0,
            scale_in_cpu: 0.0,
            scale_in_mem: 0.0,
            scale_out_cpu: 0.0,
            scale_out_mem: 0.0,
            uid: String::new(),
            observed: ObservedState::default(),
        }
    }

    /// Parse a recognized metadata key set into a policy for `group`.
    ///
    /// Recognized keys: `enabled`, `max`, `min`, `cooldown`, `scalein_mem`,
    /// `scalein_cpu`, `scaleout_mem`, `scaleout_cpu`, `notification_uid`.
    /// Unrecognized keys are ignored; `cooldown` defaults to 60 seconds.
    pub fn from_meta(group: &str, meta: &HashMap<String, String>) -> Result<Self, PolicyError> {
        let mut policy = Self::new(group);
        for (key, value) in meta {
            match key.as_str() {
                "enabled" => policy.enabled = parse(key, value)?,
                "max" => policy.max = parse(key, value)?,
                "min" => policy.min = parse(key, value)?,
                "cooldown" => policy.cooldown = parse(key, value)?,
                "scalein_mem" => policy.scale_in_mem = parse(key, value)?,
                "scalein_cpu" => policy.scale_in_cpu = parse(key, value)?,
                "scaleout_mem" => policy.scale_out_mem = parse(key, value)?,
                "scaleout_cpu" => policy.scale_out_cpu = parse(key, value)?,
                "notification_uid" => policy.uid = value.clone(),
                _ => {}
            }
        }
        if policy.min > policy.max {
            return Err(PolicyError::InvalidBounds {
                group: group.to_string(),
                min: policy.min,
                max: policy.max,
            });
        }
        Ok(policy)
    }

    /// Overwrite this policy's durable configuration in place, keeping the
    /// current observation untouched.
    pub fn update_from(&mut self, other: &GroupScalingPolicy) {
        self.cooldown = other.cooldown;
        self.enabled = other.enabled;
        self.min = other.min;
        self.max = other.max;
        self.scale_in_cpu = other.scale_in_cpu;
        self.scale_in_mem = other.scale_in_mem;
        self.scale_out_cpu = other.scale_out_cpu;
        self.scale_out_mem = other.scale_out_mem;
        self.uid = other.uid.clone();
    }
}

/// Equality over the durable configuration only; the per-cycle observation
/// never participates.
impl PartialEq for GroupScalingPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.group_name == other.group_name
            && self.cooldown == other.cooldown
            && self.enabled == other.enabled
            && self.min == other.min
            && self.max == other.max
            && self.scale_in_cpu == other.scale_in_cpu
            && self.scale_in_mem == other.scale_in_mem
            && self.scale_out_cpu == other.scale_out_cpu
            && self.scale_out_mem == other.scale_out_mem
            && self.uid == other.uid
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PolicyError> {
    value.parse().map_err(|_| PolicyError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
