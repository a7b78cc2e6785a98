//! Orchestrator client boundary.
//!
//! The evaluator only sees the `OrchestratorClient` trait and its typed
//! error taxonomy. A purged job surfaces as `OrchestratorError::NotFound`
//! (a variant, never a message substring) so the registry can self-heal.
//! `HttpOrchestrator` is a thin JSON shim over that contract; richer
//! orchestrator integrations implement the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use swell_policy::{GroupScalingPolicy, TaskAllocation};
use swell_state::ScalingState;

/// Errors from orchestrator calls, classified so callers never parse
/// message text.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The job no longer exists upstream.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Any other orchestrator failure; retried next cycle.
    #[error("orchestrator error: {0}")]
    Api(String),

    /// A collaborator call exceeded its deadline.
    #[error("orchestrator call timed out: {0}")]
    Timeout(String),
}

/// Orchestrator operations the scaling evaluator depends on.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Whether the job is currently mid-deployment. Scaling during a
    /// rollout is unsafe, so a true result skips the job for this cycle.
    async fn is_job_in_deployment(&self, job: &str) -> Result<bool, OrchestratorError>;

    /// Compute a scaling recommendation for the job, filling each policy's
    /// observed direction, metric, and task-allocation snapshot in place.
    async fn evaluate_job_scaling(
        &self,
        job: &str,
        policies: &mut [GroupScalingPolicy],
    ) -> Result<(), OrchestratorError>;

    /// Apply the recommended scale for one group. Updates
    /// `state.last_scaling_event` on success.
    async fn apply_group_scale(
        &self,
        job: &str,
        policy: &GroupScalingPolicy,
        state: &mut ScalingState,
    ) -> Result<(), OrchestratorError>;
}

// ── HTTP shim ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DeploymentStatus {
    in_deployment: bool,
}

/// One group's recommendation as returned by the orchestrator.
#[derive(Deserialize)]
struct GroupRecommendation {
    group: String,
    direction: swell_policy::ScaleDirection,
    #[serde(default)]
    scaling_metric: String,
    #[serde(default)]
    tasks: TaskAllocation,
}

#[derive(Serialize)]
struct ScaleRequest<'a> {
    direction: swell_policy::ScaleDirection,
    min: u64,
    max: u64,
    uid: &'a str,
}

/// JSON-over-HTTP orchestrator client.
pub struct HttpOrchestrator {
    http: reqwest::Client,
    base_url: String,
}

impl HttpOrchestrator {
    /// Client for an orchestrator API rooted at `base_url`
    /// (e.g. `http://127.0.0.1:4646`).
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn job_url(&self, job: &str, suffix: &str) -> String {
        format!("{}/v1/job/{job}/{suffix}", self.base_url)
    }

    /// Map a non-success response to the error taxonomy.
    async fn classify(job: &str, response: reqwest::Response) -> OrchestratorError {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return OrchestratorError::NotFound(job.to_string());
        }
        let body = response.text().await.unwrap_or_default();
        OrchestratorError::Api(format!("{status}: {body}"))
    }
}

#[async_trait]
impl OrchestratorClient for HttpOrchestrator {
    async fn is_job_in_deployment(&self, job: &str) -> Result<bool, OrchestratorError> {
        let url = self.job_url(job, "deployment-status");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OrchestratorError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::classify(job, response).await);
        }
        let status: DeploymentStatus = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Api(e.to_string()))?;
        Ok(status.in_deployment)
    }

    async fn evaluate_job_scaling(
        &self,
        job: &str,
        policies: &mut [GroupScalingPolicy],
    ) -> Result<(), OrchestratorError> {
        let url = self.job_url(job, "scaling-recommendation");
        let response = self
            .http
            .post(&url)
            .json(&policies.iter().collect::<Vec<_>>())
            .send()
            .await
            .map_err(|e| OrchestratorError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::classify(job, response).await);
        }
        let recommendations: Vec<GroupRecommendation> = response
            .json()
            .await
            .map_err(|e| OrchestratorError::Api(e.to_string()))?;

        for rec in recommendations {
            if let Some(policy) = policies.iter_mut().find(|p| p.group_name == rec.group) {
                policy.observed.direction = rec.direction;
                policy.observed.scaling_metric = rec.scaling_metric;
                policy.observed.tasks = rec.tasks;
                debug!(
                    %job,
                    group = %policy.group_name,
                    direction = %policy.observed.direction,
                    "recommendation received"
                );
            }
        }
        Ok(())
    }

    async fn apply_group_scale(
        &self,
        job: &str,
        policy: &GroupScalingPolicy,
        state: &mut ScalingState,
    ) -> Result<(), OrchestratorError> {
        let url = self.job_url(job, &format!("group/{}/scale", policy.group_name));
        let request = ScaleRequest {
            direction: policy.observed.direction,
            min: policy.min,
            max: policy.max,
            uid: &policy.uid,
        };
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::Api(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::classify(job, response).await);
        }
        state.last_scaling_event = crate::evaluator::epoch_secs();
        debug!(%job, group = %policy.group_name, "scale applied");
        Ok(())
    }
}
