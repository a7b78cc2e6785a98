//! swell-notify — failure-notification boundary.
//!
//! Defines the context shape the autoscaling core attaches to failure
//! alerts and the `Notifier` trait delivery backends implement. Delivery
//! mechanics live behind the trait; the core only produces contexts.

pub mod context;
pub mod notifier;

pub use context::FailureContext;
pub use notifier::{LogNotifier, MemoryNotifier, Notifier};
