//! Notifier trait and built-in backends.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::context::FailureContext;

/// Delivery backend for failure alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` for the resource described by `ctx`.
    async fn notify(&self, ctx: &FailureContext, message: &str);
}

/// Notifier that emits alerts as tracing warnings. The default backend when
/// no external alerting is wired up.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, ctx: &FailureContext, message: &str) {
        warn!(
            alert_key = %ctx.alert_key,
            resource = %ctx.resource_id,
            resource_type = %ctx.resource_type,
            message,
            "failure notification"
        );
    }
}

/// Notifier that captures alerts in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    delivered: Mutex<Vec<(FailureContext, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts delivered so far.
    pub async fn delivered(&self) -> Vec<(FailureContext, String)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, ctx: &FailureContext, message: &str) {
        self.delivered
            .lock()
            .await
            .push((ctx.clone(), message.to_string()));
    }
}
