//! swell-state — embedded scaling-event state store.
//!
//! Backed by [redb](https://docs.rs/redb), persists the last-scaling-event
//! record for each job task-group so that cooldown and failsafe decisions
//! survive restarts. Supports on-disk and in-memory backends (the latter
//! for testing).
//!
//! Records are keyed by their state path, `{root}/state/jobs/{job}/{group}`,
//! and JSON-serialized into redb's `&[u8]` value column.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::{ResourceType, ScalingState};
