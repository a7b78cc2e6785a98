//! swelld — the Swell autoscaling daemon.
//!
//! Assembles the subsystems and runs the evaluation loop:
//! - State store (redb)
//! - Policy registry, optionally seeded from a TOML policy file
//! - Orchestrator HTTP client
//! - Scaling evaluator
//!
//! # Usage
//!
//! ```text
//! swelld run --orchestrator-addr http://127.0.0.1:4646 \
//!     --data-dir /var/lib/swell --policies policies.toml
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::info;

use swell_autoscale::{EvaluatorConfig, HttpOrchestrator, ScalingEvaluator};
use swell_notify::LogNotifier;
use swell_policy::PolicyRegistry;
use swell_state::StateStore;

#[derive(Parser)]
#[command(name = "swelld", about = "Swell autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the evaluation loop.
    Run {
        /// Base URL of the orchestrator API.
        #[arg(long, default_value = "http://127.0.0.1:4646")]
        orchestrator_addr: String,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/swell")]
        data_dir: PathBuf,

        /// Key prefix for state records.
        #[arg(long, default_value = "swell")]
        state_root: String,

        /// Seconds between evaluation cycles.
        #[arg(long, default_value = "30")]
        evaluation_interval: u64,

        /// Seconds before an orchestrator call is abandoned.
        #[arg(long, default_value = "30")]
        collaborator_timeout: u64,

        /// TOML file of job scaling policies to seed the registry with.
        #[arg(long)]
        policies: Option<PathBuf>,
    },
}

/// Policy seed file: `[jobs.<job>.groups.<group>]` tables of string
/// metadata, the same key set the ingestion watcher supplies.
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    jobs: BTreeMap<String, JobPolicies>,
}

#[derive(Debug, Deserialize)]
struct JobPolicies {
    #[serde(default)]
    groups: BTreeMap<String, HashMap<String, String>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,swelld=debug,swell=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            orchestrator_addr,
            data_dir,
            state_root,
            evaluation_interval,
            collaborator_timeout,
            policies,
        } => {
            run_daemon(
                &orchestrator_addr,
                &data_dir,
                state_root,
                evaluation_interval,
                collaborator_timeout,
                policies.as_deref(),
            )
            .await
        }
    }
}

async fn run_daemon(
    orchestrator_addr: &str,
    data_dir: &std::path::Path,
    state_root: String,
    evaluation_interval: u64,
    collaborator_timeout: u64,
    policy_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    info!("swell daemon starting");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("swell.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Arc::new(PolicyRegistry::new());
    if let Some(path) = policy_file {
        let seeded = seed_policies(&registry, path).await?;
        info!(%seeded, path = ?path, "policy registry seeded");
    }

    let client = Arc::new(HttpOrchestrator::new(orchestrator_addr));
    let notifier = Arc::new(LogNotifier);
    let evaluator = ScalingEvaluator::new(
        registry,
        store,
        client,
        notifier,
        EvaluatorConfig {
            state_root,
            failsafe_threshold: 1,
            collaborator_timeout: Duration::from_secs(collaborator_timeout),
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_secs(evaluation_interval);
    let evaluator_handle = tokio::spawn(async move {
        evaluator.run(interval, shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    evaluator_handle.await?;

    info!("swell daemon stopped");
    Ok(())
}

/// Load a TOML policy file into the registry through the same upsert
/// contract the ingestion watcher uses. Returns the number of group
/// policies loaded.
async fn seed_policies(registry: &PolicyRegistry, path: &std::path::Path) -> anyhow::Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading policy file {}", path.display()))?;
    let file: PolicyFile = toml::from_str(&raw)
        .with_context(|| format!("parsing policy file {}", path.display()))?;

    let mut count = 0;
    for (job, job_policies) in &file.jobs {
        for (group, meta) in &job_policies.groups {
            registry
                .upsert_group_policy(job, group, meta)
                .await
                .with_context(|| format!("policy for {job}/{group}"))?;
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
[jobs.example.groups.cache]
enabled = "true"
min = "2"
max = "10"
scaleout_cpu = "80"
scaleout_mem = "80"
scalein_cpu = "20"
scalein_mem = "20"
notification_uid = "ELS1"

[jobs.example.groups.web]
enabled = "false"
min = "1"
max = "4"
cooldown = "120"
"#;

    #[tokio::test]
    async fn seed_policies_loads_groups() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let registry = PolicyRegistry::new();
        let seeded = seed_policies(&registry, file.path()).await.unwrap();
        assert_eq!(seeded, 2);
        assert_eq!(registry.jobs().await, vec!["example"]);

        let map = registry.lock_shared().await;
        let groups = map.get("example").unwrap();
        let cache = groups.iter().find(|p| p.group_name == "cache").unwrap();
        assert!(cache.enabled);
        assert_eq!(cache.max, 10);
        let web = groups.iter().find(|p| p.group_name == "web").unwrap();
        assert!(!web.enabled);
        assert_eq!(web.cooldown, 120);
    }

    #[tokio::test]
    async fn seed_policies_rejects_bad_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[jobs.example.groups.cache]\nmax = \"lots\"\n")
            .unwrap();

        let registry = PolicyRegistry::new();
        assert!(seed_policies(&registry, file.path()).await.is_err());
    }
}
