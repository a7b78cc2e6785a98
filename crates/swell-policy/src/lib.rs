//! swell-policy — scaling policy model and registry.
//!
//! A `GroupScalingPolicy` holds one task-group's scaling configuration
//! (bounds, thresholds, cooldown, enable flag) plus the observation the
//! orchestrator recomputes every evaluation cycle. The `PolicyRegistry`
//! tracks job → ordered group-policy lists behind a single reader/writer
//! lock so that the ingestion watcher's upserts and the evaluator's
//! read phase never interleave mid-mutation.

pub mod policy;
pub mod registry;

pub use policy::{GroupScalingPolicy, ObservedState, PolicyError, ScaleDirection, TaskAllocation};
pub use registry::{PolicyMap, PolicyRegistry};
