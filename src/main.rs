//! ecs-deploy - Deploy services and migrations to a cluster control plane
//!
//! This is the main CLI entry point for ecs-deploy.

use clap::Parser;
use ecs_deploy::config::{ConfigLoader, EnvironmentConfig};
use ecs_deploy::control::{HttpControlApi, StabilityWaiter};
use ecs_deploy::deploy::{DeployReport, Deployer, DeploymentKind, DeploymentRequest, ExitRule};
use ecs_deploy::error::{DeployError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// ecs-deploy - register a task definition and roll it out
#[derive(Parser)]
#[command(name = "ecs-deploy")]
#[command(version)]
#[command(about = "Deploy a service or run a migration task on a cluster control plane", long_about = None)]
struct Cli {
    /// Directory holding the deploy file for the service
    #[arg(long)]
    dir: PathBuf,

    /// Type of deployment
    #[arg(long = "type", value_enum)]
    kind: DeploymentKind,

    /// Environment file (defaults to environment.json next to the deploy directory)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Control plane endpoint, overriding the environment file
    #[arg(long)]
    endpoint: Option<String>,

    /// Seconds between oneshot task polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Maximum number of oneshot task polls
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Oneshot exit codes that fail without waiting out the poll budget
    #[arg(long, value_enum)]
    exit_rule: Option<ExitRule>,

    /// Give up on the whole deployment after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the resolved deployment and exit without deploying
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(Some(report)) => {
            let revision = report.revision();
            match report {
                DeployReport::Service { ref outcome, .. } => info!(
                    service = %outcome.service_name,
                    action = %outcome.action,
                    revision = %revision.task_definition_arn,
                    "Deploy success"
                ),
                DeployReport::Migration { ref oneshot, .. } => info!(
                    task_arn = %oneshot.task_arn,
                    stopped_at = ?oneshot.stopped_at.map(|t| t.to_rfc3339()),
                    revision = %revision.task_definition_arn,
                    "Deploy success"
                ),
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!(kind = e.kind(), retryable = e.is_retryable(), "Deployment failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<Option<DeployReport>> {
    let dir = clean_dir(&cli.dir)?;
    info!("config dir: {}", dir.display());

    let mut env = ConfigLoader::load_environment(&dir, cli.env_file.as_deref())?;
    apply_overrides(&mut env, &cli);
    env.validate()?;

    let request = ConfigLoader::load_deploy(&dir, &env)?.into_request(cli.kind)?;

    if cli.dry_run {
        print!("{}", serde_yaml::to_string(&request)?);
        return Ok(None);
    }

    let cancel = CancellationToken::new();
    watch_for_cancellation(cancel.clone(), cli.timeout.map(Duration::from_secs));

    let client_config = env.control.client_config();
    let waiter = StabilityWaiter::new(client_config.stabilize).with_cancellation(cancel.clone());
    let api = HttpControlApi::new(client_config)?.with_waiter(waiter);

    let deployer = Deployer::new(Arc::new(api), env.cluster.clone())
        .with_oneshot_policy(env.control.oneshot_policy())
        .with_exit_rule(env.control.exit_rule)
        .with_cancellation(cancel);

    match request {
        DeploymentRequest::Service { ref service, .. } => {
            info!(cluster = %service.cluster, service = %service.service_name, "Deploying service...")
        }
        DeploymentRequest::Migration { ref task } => {
            info!(cluster = %env.cluster, family = %task.family, "Deploying migration...")
        }
    }

    deployer.deploy(&request).await.map(Some)
}

fn clean_dir(dir: &Path) -> Result<PathBuf> {
    if dir.as_os_str().is_empty() {
        return Err(DeployError::InvalidConfig("dir cannot be blank".to_string()));
    }

    let dir = dir.canonicalize()?;
    if !dir.is_dir() {
        return Err(DeployError::InvalidConfig(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(dir)
}

fn apply_overrides(env: &mut EnvironmentConfig, cli: &Cli) {
    if let Some(ref endpoint) = cli.endpoint {
        env.control.endpoint = Some(endpoint.clone());
    }
    if let Some(interval) = cli.poll_interval {
        env.control.oneshot.interval_secs = interval;
    }
    if let Some(attempts) = cli.max_attempts {
        env.control.oneshot.max_attempts = attempts;
    }
    if let Some(rule) = cli.exit_rule {
        env.control.exit_rule = rule;
    }
}

/// Cancel on Ctrl-C or once the overall deadline passes
fn watch_for_cancellation(cancel: CancellationToken, deadline: Option<Duration>) {
    tokio::spawn(async move {
        let expired = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("interrupted, cancelling deployment"),
            _ = expired => warn!("deadline reached, cancelling deployment"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}
