//! swell-autoscale — the policy-gated autoscaling decision loop.
//!
//! Each cycle walks the policy registry one job at a time, asks the
//! orchestrator for a scaling recommendation, and gates every group
//! through persisted failsafe and cooldown state before applying a scale.
//!
//! # Per-group decision flow
//!
//! ```text
//! read state → failsafe check ──blocked──▶ stop (nothing persisted)
//!                   │pass
//!             cooldown check ──within────▶ stop (nothing persisted)
//!                   │pass
//!              direction? ── Out/In + enabled ──▶ apply scale
//!                   │          Out/In + disabled ▶ log only
//!                   │          None ────────────▶ no-op
//!              persist state
//! ```
//!
//! Every branch terminates within one cycle; the only cross-cycle state is
//! what the state store persists. Jobs that disappear upstream self-heal
//! out of the registry; any other collaborator failure skips the job until
//! the next cycle.

pub mod client;
pub mod evaluator;
pub mod failsafe;

pub use client::{HttpOrchestrator, OrchestratorClient, OrchestratorError};
pub use evaluator::{EvaluatorConfig, ScalingEvaluator};
pub use failsafe::FailsafeGuard;
