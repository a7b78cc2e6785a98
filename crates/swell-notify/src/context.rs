//! Failure-notification context.

use swell_state::ResourceType;

/// Context attached to a failure alert so downstream routing can identify
/// the affected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureContext {
    /// Routing key from the policy's `notification_uid`.
    pub alert_key: String,
    /// `{job}/{group}` for task-group resources.
    pub resource_id: String,
    pub resource_type: ResourceType,
}

impl FailureContext {
    /// Context for a job task-group.
    pub fn for_group(alert_key: &str, job: &str, group: &str) -> Self {
        Self {
            alert_key: alert_key.to_string(),
            resource_id: format!("{job}/{group}"),
            resource_type: ResourceType::Job,
        }
    }
}
