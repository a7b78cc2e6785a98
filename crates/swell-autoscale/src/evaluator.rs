//! ScalingEvaluator — drives one evaluation cycle over all tracked jobs.
//!
//! Jobs are evaluated sequentially. The orchestrator's recommendation step
//! runs under the registry's exclusive lock because it mutates policy
//! observations in place; the guard is then downgraded so the per-group
//! gating phase holds only a shared lock. A job reported gone upstream is
//! removed from the registry on the spot — the ingestion watcher never
//! hears about purged jobs, so the registry must self-heal here.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use swell_notify::{FailureContext, Notifier};
use swell_policy::{GroupScalingPolicy, PolicyRegistry, ScaleDirection};
use swell_state::{ScalingState, StateStore};

use crate::client::{OrchestratorClient, OrchestratorError};
use crate::failsafe::FailsafeGuard;

/// Evaluator tunables.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Key prefix for state records, `{state_root}/state/jobs/...`.
    pub state_root: String,
    /// Consecutive failures before the failsafe trips.
    pub failsafe_threshold: u32,
    /// Deadline applied to each orchestrator call.
    pub collaborator_timeout: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            state_root: "swell".to_string(),
            failsafe_threshold: 1,
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}

/// The autoscaling control loop.
pub struct ScalingEvaluator {
    registry: Arc<PolicyRegistry>,
    store: StateStore,
    client: Arc<dyn OrchestratorClient>,
    failsafe: FailsafeGuard,
    config: EvaluatorConfig,
}

impl ScalingEvaluator {
    pub fn new(
        registry: Arc<PolicyRegistry>,
        store: StateStore,
        client: Arc<dyn OrchestratorClient>,
        notifier: Arc<dyn Notifier>,
        config: EvaluatorConfig,
    ) -> Self {
        let failsafe = FailsafeGuard::new(store.clone(), notifier);
        Self {
            registry,
            store,
            client,
            failsafe,
            config,
        }
    }

    /// Run a single evaluation pass over all tracked jobs.
    ///
    /// Jobs mid-deployment are skipped and retried next cycle; evaluation
    /// failures are contained to the failing job.
    pub async fn run_cycle(&self) {
        let jobs = self.registry.jobs().await;
        debug!(jobs = jobs.len(), "evaluation cycle starting");

        for job in jobs {
            let guard = self
                .with_timeout("deployment-status", self.client.is_job_in_deployment(&job))
                .await;
            match guard {
                Ok(true) => {
                    debug!(%job, "job is mid-deployment, skipping scaling evaluation");
                }
                Ok(false) => self.evaluate_job(&job).await,
                Err(OrchestratorError::NotFound(_)) => {
                    info!(%job, "job no longer exists, removing scaling policies");
                    self.registry.remove_job_policy(&job).await;
                }
                Err(e) => {
                    warn!(%job, error = %e, "deployment status check failed, skipping job");
                }
            }
        }
    }

    /// Evaluate one job: recommendation under the exclusive lock, then the
    /// per-group gates under a shared lock.
    pub async fn evaluate_job(&self, job: &str) {
        let mut map = self.registry.lock_exclusive().await;
        let Some(policies) = map.get_mut(job) else {
            warn!(%job, "job missing from policy registry, skipping evaluation");
            return;
        };

        let result = self
            .with_timeout(
                "scaling-recommendation",
                self.client.evaluate_job_scaling(job, policies.as_mut_slice()),
            )
            .await;
        match result {
            Ok(()) => {}
            Err(OrchestratorError::NotFound(_)) => {
                // A purged job is never reported by the ingestion watcher,
                // so the registry entry has to go here.
                map.remove(job);
                info!(%job, "job no longer exists, scaling policies removed");
                return;
            }
            Err(e) => {
                warn!(%job, error = %e, "scaling recommendation failed");
                return;
            }
        }

        // Writers block until the read phase finishes; new readers don't.
        let map = map.downgrade();
        let Some(policies) = map.get(job) else {
            return;
        };
        for policy in policies {
            self.evaluate_group(job, policy).await;
        }
    }

    /// Gate one group through failsafe and cooldown, then apply or log the
    /// recommended scale and persist the group's state.
    async fn evaluate_group(&self, job: &str, policy: &GroupScalingPolicy) {
        let group = policy.group_name.as_str();
        let ctx = FailureContext::for_group(&policy.uid, job, group);

        let mut state = ScalingState::for_job_group(&self.config.state_root, job, group);
        if let Err(e) = self.store.read_state(&mut state, true) {
            warn!(%job, %group, error = %e, "failed to load scaling state");
            return;
        }

        if !self
            .failsafe
            .check(&mut state, self.config.failsafe_threshold, &ctx)
            .await
        {
            warn!(%job, %group, "group is in failsafe mode, scaling suppressed");
            return;
        }

        let now = epoch_secs();
        let cutoff = now.saturating_sub(policy.cooldown);
        if state.last_scaling_event >= cutoff {
            debug!(
                %job,
                %group,
                cooldown_secs = policy.cooldown,
                "scaling cooldown threshold not reached"
            );
            return;
        }

        match policy.observed.direction {
            ScaleDirection::Out | ScaleDirection::In => {
                if policy.enabled {
                    debug!(
                        %job,
                        %group,
                        direction = %policy.observed.direction,
                        metric = %policy.observed.scaling_metric,
                        "scaling enabled, requesting operation"
                    );
                    let applied = self
                        .with_timeout(
                            "group-scale",
                            self.client.apply_group_scale(job, policy, &mut state),
                        )
                        .await;
                    match applied {
                        Ok(()) => {
                            info!(
                                %job,
                                %group,
                                direction = %policy.observed.direction,
                                "scaling operation submitted"
                            );
                        }
                        Err(e) => {
                            warn!(%job, %group, error = %e, "scaling operation failed");
                            state.record_failure(now);
                        }
                    }
                } else {
                    debug!(
                        %job,
                        %group,
                        direction = %policy.observed.direction,
                        "scaling disabled; operation would have been requested"
                    );
                }
            }
            ScaleDirection::None => {}
        }

        // Persisted for every group that cleared both gates, whether or not
        // a scale was applied.
        if let Err(e) = self.store.persist_state(&state) {
            warn!(%job, %group, error = %e, "failed to persist scaling state");
        }
    }

    /// Run evaluation cycles on an interval until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "scaling evaluator started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    info!("scaling evaluator shutting down");
                    break;
                }
            }
        }
    }

    async fn with_timeout<T>(
        &self,
        op: &str,
        fut: impl Future<Output = Result<T, OrchestratorError>>,
    ) -> Result<T, OrchestratorError> {
        match tokio::time::timeout(self.config.collaborator_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                error!(%op, "orchestrator call exceeded deadline");
                Err(OrchestratorError::Timeout(op.to_string()))
            }
        }
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use async_trait::async_trait;
    use swell_notify::MemoryNotifier;
    use tokio::sync::Mutex;

    enum MockFailure {
        NotFound,
        Api,
    }

    /// Scripted orchestrator for evaluator tests.
    #[derive(Default)]
    struct MockOrchestrator {
        in_deployment: bool,
        evaluate_failure: Option<MockFailure>,
        scale_fails: bool,
        /// Group name → recommended direction (None when absent).
        directions: HashMap<String, ScaleDirection>,
        evaluate_calls: Mutex<Vec<String>>,
        scale_calls: Mutex<Vec<(String, String)>>,
    }

    impl MockOrchestrator {
        fn recommending(group: &str, direction: ScaleDirection) -> Self {
            let mut mock = Self::default();
            mock.directions.insert(group.to_string(), direction);
            mock
        }
    }

    #[async_trait]
    impl OrchestratorClient for MockOrchestrator {
        async fn is_job_in_deployment(&self, _job: &str) -> Result<bool, OrchestratorError> {
            Ok(self.in_deployment)
        }

        async fn evaluate_job_scaling(
            &self,
            job: &str,
            policies: &mut [GroupScalingPolicy],
        ) -> Result<(), OrchestratorError> {
            self.evaluate_calls.lock().await.push(job.to_string());
            match self.evaluate_failure {
                Some(MockFailure::NotFound) => {
                    return Err(OrchestratorError::NotFound(job.to_string()));
                }
                Some(MockFailure::Api) => {
                    return Err(OrchestratorError::Api("boom".to_string()));
                }
                None => {}
            }
            for policy in policies {
                policy.observed.direction = self
                    .directions
                    .get(&policy.group_name)
                    .copied()
                    .unwrap_or(ScaleDirection::None);
            }
            Ok(())
        }

        async fn apply_group_scale(
            &self,
            job: &str,
            policy: &GroupScalingPolicy,
            state: &mut ScalingState,
        ) -> Result<(), OrchestratorError> {
            self.scale_calls
                .lock()
                .await
                .push((job.to_string(), policy.group_name.clone()));
            if self.scale_fails {
                return Err(OrchestratorError::Api("scale rejected".to_string()));
            }
            state.last_scaling_event = epoch_secs();
            Ok(())
        }
    }

    fn enabled_meta() -> HashMap<String, String> {
        let mut meta = HashMap::new();
        meta.insert("enabled".to_string(), "true".to_string());
        meta.insert("min".to_string(), "2".to_string());
        meta.insert("max".to_string(), "10".to_string());
        meta.insert("scaleout_cpu".to_string(), "80".to_string());
        meta.insert("scaleout_mem".to_string(), "80".to_string());
        meta.insert("scalein_cpu".to_string(), "20".to_string());
        meta.insert("scalein_mem".to_string(), "20".to_string());
        meta.insert("notification_uid".to_string(), "ELS1".to_string());
        meta
    }

    struct Harness {
        registry: Arc<PolicyRegistry>,
        store: StateStore,
        notifier: Arc<MemoryNotifier>,
        client: Arc<MockOrchestrator>,
        evaluator: ScalingEvaluator,
    }

    async fn harness(mock: MockOrchestrator, meta: HashMap<String, String>) -> Harness {
        let registry = Arc::new(PolicyRegistry::new());
        registry
            .upsert_group_policy("example", "cache", &meta)
            .await
            .unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let notifier = Arc::new(MemoryNotifier::new());
        let client = Arc::new(mock);
        let evaluator = ScalingEvaluator::new(
            registry.clone(),
            store.clone(),
            client.clone(),
            notifier.clone(),
            EvaluatorConfig::default(),
        );
        Harness {
            registry,
            store,
            notifier,
            client,
            evaluator,
        }
    }

    fn stored_state(store: &StateStore) -> Option<ScalingState> {
        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        match store.read_state(&mut state, false) {
            Ok(()) => Some(state),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn scale_out_applies_and_persists() {
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;

        h.evaluator.run_cycle().await;

        let calls = h.client.scale_calls.lock().await;
        assert_eq!(calls.as_slice(), &[("example".to_string(), "cache".to_string())]);
        let state = stored_state(&h.store).expect("state persisted");
        assert!(state.last_scaling_event > 0);
    }

    #[tokio::test]
    async fn no_direction_still_persists_state() {
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::None),
            enabled_meta(),
        )
        .await;

        h.evaluator.run_cycle().await;

        assert!(h.client.scale_calls.lock().await.is_empty());
        // Both gates passed, so the (unchanged) state was still written.
        assert!(stored_state(&h.store).is_some());
    }

    #[tokio::test]
    async fn disabled_policy_never_scales_but_persists() {
        let mut meta = enabled_meta();
        meta.insert("enabled".to_string(), "false".to_string());
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            meta,
        )
        .await;

        h.evaluator.run_cycle().await;

        assert!(h.client.scale_calls.lock().await.is_empty());
        assert!(stored_state(&h.store).is_some());
    }

    #[tokio::test]
    async fn within_cooldown_blocks_and_leaves_state_untouched() {
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;

        let recent = epoch_secs() - 10;
        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        state.last_scaling_event = recent;
        h.store.persist_state(&state).unwrap();

        h.evaluator.run_cycle().await;

        assert!(h.client.scale_calls.lock().await.is_empty());
        assert_eq!(stored_state(&h.store).unwrap().last_scaling_event, recent);
    }

    #[tokio::test]
    async fn cooldown_boundary() {
        // 61 seconds ago with a 60s cooldown: eligible.
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;
        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        state.last_scaling_event = epoch_secs() - 61;
        h.store.persist_state(&state).unwrap();

        h.evaluator.run_cycle().await;
        assert_eq!(h.client.scale_calls.lock().await.len(), 1);

        // 59 seconds ago: still inside the window.
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;
        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        state.last_scaling_event = epoch_secs() - 59;
        h.store.persist_state(&state).unwrap();

        h.evaluator.run_cycle().await;
        assert!(h.client.scale_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn failsafe_blocks_without_persisting_new_state() {
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;

        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        state.failsafe_mode = true;
        state.last_scaling_event = 1234;
        h.store.persist_state(&state).unwrap();

        h.evaluator.run_cycle().await;

        assert!(h.client.scale_calls.lock().await.is_empty());
        assert_eq!(stored_state(&h.store).unwrap().last_scaling_event, 1234);
        // Already tripped: no fresh notification.
        assert!(h.notifier.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn prior_failure_trips_failsafe_and_notifies() {
        let h = harness(
            MockOrchestrator::recommending("cache", ScaleDirection::Out),
            enabled_meta(),
        )
        .await;

        let mut state = ScalingState::for_job_group("swell", "example", "cache");
        state.record_failure(epoch_secs());
        h.store.persist_state(&state).unwrap();

        h.evaluator.run_cycle().await;

        assert!(h.client.scale_calls.lock().await.is_empty());
        let stored = stored_state(&h.store).unwrap();
        assert!(stored.failsafe_mode);
        let delivered = h.notifier.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0.resource_id, "example/cache");
    }

    #[tokio::test]
    async fn failed_scale_records_failure() {
        let mut mock = MockOrchestrator::recommending("cache", ScaleDirection::Out);
        mock.scale_fails = true;
        let h = harness(mock, enabled_meta()).await;

        h.evaluator.run_cycle().await;

        let stored = stored_state(&h.store).unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.last_scaling_event, 0);

        // Next cycle: the recorded failure meets the default threshold.
        h.evaluator.run_cycle().await;
        assert!(stored_state(&h.store).unwrap().failsafe_mode);
        assert_eq!(h.client.scale_calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn job_gone_self_heals_registry() {
        let mut mock = MockOrchestrator::recommending("cache", ScaleDirection::Out);
        mock.evaluate_failure = Some(MockFailure::NotFound);
        let h = harness(mock, enabled_meta()).await;

        h.evaluator.run_cycle().await;

        assert!(h.registry.is_empty().await);
        assert!(h.client.scale_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transient_error_keeps_registry_and_state() {
        let mut mock = MockOrchestrator::recommending("cache", ScaleDirection::Out);
        mock.evaluate_failure = Some(MockFailure::Api);
        let h = harness(mock, enabled_meta()).await;

        h.evaluator.run_cycle().await;

        assert_eq!(h.registry.jobs().await, vec!["example"]);
        assert!(h.client.scale_calls.lock().await.is_empty());
        assert!(stored_state(&h.store).is_none());
    }

    #[tokio::test]
    async fn mid_deployment_job_is_skipped() {
        let mut mock = MockOrchestrator::recommending("cache", ScaleDirection::Out);
        mock.in_deployment = true;
        let h = harness(mock, enabled_meta()).await;

        h.evaluator.run_cycle().await;

        assert!(h.client.evaluate_calls.lock().await.is_empty());
        assert!(h.client.scale_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn groups_evaluate_in_sequence_order() {
        let mut mock = MockOrchestrator::default();
        mock.directions.insert("cache".to_string(), ScaleDirection::Out);
        mock.directions.insert("web".to_string(), ScaleDirection::In);
        let registry = Arc::new(PolicyRegistry::new());
        registry
            .upsert_group_policy("example", "cache", &enabled_meta())
            .await
            .unwrap();
        registry
            .upsert_group_policy("example", "web", &enabled_meta())
            .await
            .unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let client = Arc::new(mock);
        let evaluator = ScalingEvaluator::new(
            registry.clone(),
            store.clone(),
            client.clone(),
            Arc::new(MemoryNotifier::new()),
            EvaluatorConfig::default(),
        );

        evaluator.run_cycle().await;

        let calls = client.scale_calls.lock().await;
        assert_eq!(
            calls.as_slice(),
            &[
                ("example".to_string(), "cache".to_string()),
                ("example".to_string(), "web".to_string()),
            ]
        );
    }
}
