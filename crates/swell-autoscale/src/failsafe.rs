//! Failsafe circuit breaker.
//!
//! Blocks further scaling for a resource once its persisted state shows
//! repeated failed attempts. Tripping is sticky: the mode flag is written
//! back to the state store and a single notification is emitted, and the
//! resource stays suppressed until the state is reset.

use std::sync::Arc;

use tracing::{info, warn};

use swell_notify::{FailureContext, Notifier};
use swell_state::{ScalingState, StateStore};

/// Circuit breaker over persisted scaling state.
pub struct FailsafeGuard {
    store: StateStore,
    notifier: Arc<dyn Notifier>,
}

impl FailsafeGuard {
    pub fn new(store: StateStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Whether scaling may proceed for the resource behind `state`.
    ///
    /// Returns false when the resource is already in failsafe mode, or when
    /// `state.failure_count` has reached `threshold` — in which case the
    /// mode is set, persisted, and announced through the notifier exactly
    /// once.
    pub async fn check(
        &self,
        state: &mut ScalingState,
        threshold: u32,
        ctx: &FailureContext,
    ) -> bool {
        if state.failsafe_mode {
            return false;
        }
        if state.failure_count >= threshold {
            state.failsafe_mode = true;
            if let Err(e) = self.store.persist_state(state) {
                warn!(
                    resource = %ctx.resource_id,
                    error = %e,
                    "failed to persist failsafe mode"
                );
            }
            let message = format!(
                "scaling failsafe engaged for {} after {} consecutive failures",
                ctx.resource_id, state.failure_count
            );
            self.notifier.notify(ctx, &message).await;
            warn!(resource = %ctx.resource_id, "failsafe mode engaged");
            return false;
        }
        true
    }

    /// Clear failsafe mode and failure counters, persisting the reset.
    pub async fn reset(&self, state: &mut ScalingState) -> Result<(), swell_state::StateError> {
        state.reset_failsafe();
        self.store.persist_state(state)?;
        info!(resource = %state.resource_name, "failsafe mode reset");
        Ok(())
    }
}
