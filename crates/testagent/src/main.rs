// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! testagent: chaos injection and self-verifying workloads for a database cluster.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use testagent_chaos::{ActionRegistry, ActionSnapshot, ChaosMonkey};
use testagent_cluster::ClusterView;
use testagent_core::config::MAX_CHAOS_LEVEL;
use testagent_core::{
    ChaosConfig, Config, Event, Failure, FailureCollector, LogFormat, LoggingConfig,
};
use testagent_workload::{plan_by_name, HttpTransport, TestStatus, Transport, WorkloadRunner};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod cluster;

use cli::{ActionsArgs, Cli, Commands, OutputFormat, RunArgs};
use cluster::StaticCluster;

/// Events included in the final report.
const REPORT_EVENTS: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Actions(args) => list_actions(args),
        Commands::Version => {
            println!("testagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Everything printed when a run ends.
#[derive(Debug, Serialize)]
struct Report {
    chaos_level: u8,
    actions: Vec<ActionSnapshot>,
    events: Vec<Event>,
    workloads: Vec<TestStatus>,
    failures: Vec<Failure>,
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args.config, args.chaos_level, &args.plans)?;

    init_logging(&config.logging)?;

    if config.metrics.enabled {
        let metrics_addr: std::net::SocketAddr =
            format!("{}:{}", config.metrics.bind, config.metrics.port)
                .parse()
                .context("Invalid metrics bind address")?;

        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
            .context("Failed to install Prometheus exporter")?;

        info!("Metrics endpoint listening on http://{}/metrics", metrics_addr);
    }

    info!(
        machines = config.cluster.machines.len(),
        coordinators = config.cluster.coordinators.len(),
        chaos_level = config.chaos.level,
        plans = ?config.workload.plans,
        "Starting testagent"
    );

    let cluster: Arc<dyn ClusterView> =
        Arc::new(StaticCluster::new(&config.cluster).context("Failed to build cluster view")?);
    let monkey = ChaosMonkey::new(cluster, config.chaos.clone());
    if config.chaos.level > 0 {
        monkey.start().context("Failed to start chaos monkey")?;
    }

    let listener = Arc::new(FailureCollector::new());
    let mut runners = Vec::with_capacity(config.workload.plans.len());
    if !config.workload.plans.is_empty() {
        let transport: Arc<dyn Transport> = Arc::new(
            HttpTransport::new(
                config.cluster.coordinators.clone(),
                config.cluster.username.clone(),
                config.cluster.password.clone(),
            )
            .context("Failed to build workload transport")?,
        );
        for name in &config.workload.plans {
            let plan = plan_by_name(name, &config.workload)?;
            runners.push(WorkloadRunner::spawn(
                plan,
                Arc::clone(&transport),
                &config.workload,
                listener.clone(),
            ));
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    ticker.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => log_status(&monkey, &runners),
        }
    }

    info!("Stopping chaos monkey and workloads");
    monkey.stop().await;
    for runner in &runners {
        runner.stop().await;
    }

    let report = Report {
        chaos_level: monkey.level(),
        actions: monkey.actions(),
        events: monkey.recent_events(REPORT_EVENTS),
        workloads: runners.iter().map(WorkloadRunner::status).collect(),
        failures: listener.failures(),
    };
    print_report(&report, args.format)?;

    if !report.failures.is_empty() {
        bail!("{} failures reported", report.failures.len());
    }
    Ok(())
}

/// Loads the configuration file and applies command line overrides.
fn load_config(path: &Path, chaos_level: Option<u8>, plans: &[String]) -> Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(level) = chaos_level {
        config.chaos.level = level;
    }
    if !plans.is_empty() {
        config.workload.plans = plans.to_vec();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(fmt_layer.json()).init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}

fn log_status(monkey: &ChaosMonkey, runners: &[WorkloadRunner]) {
    let actions = monkey.actions();
    info!(
        state = ?monkey.state(),
        level = monkey.level(),
        succeeded = actions.iter().map(|a| a.succeeded).sum::<u64>(),
        failed = actions.iter().map(|a| a.failed).sum::<u64>(),
        skipped = actions.iter().map(|a| a.skipped).sum::<u64>(),
        "Chaos status"
    );
    for runner in runners {
        let status = runner.status();
        let succeeded: u64 = status.counters.iter().map(|c| c.succeeded).sum();
        if status.failures > 0 {
            warn!(
                test = %status.name,
                state = %status.state,
                succeeded,
                failures = status.failures,
                "Workload status"
            );
        } else {
            info!(test = %status.name, state = %status.state, succeeded, "Workload status");
        }
    }
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!("Chaos level {}", report.chaos_level);
            println!(
                "{:<10} {:<30} {:>9} {:>7} {:>8}",
                "ID", "ACTION", "SUCCEEDED", "FAILED", "SKIPPED"
            );
            for action in &report.actions {
                println!(
                    "{:<10} {:<30} {:>9} {:>7} {:>8}",
                    action.id, action.name, action.succeeded, action.failed, action.skipped
                );
            }

            println!("\nRecent events:");
            for event in &report.events {
                println!("  {}", event);
            }

            for workload in &report.workloads {
                println!(
                    "\nWorkload {} ({}), {} failures",
                    workload.name, workload.state, workload.failures
                );
                for counter in &workload.counters {
                    println!(
                        "  {:<20} {:>8} ok {:>6} failed",
                        counter.name, counter.succeeded, counter.failed
                    );
                }
            }

            if !report.failures.is_empty() {
                println!("\nFailures:");
                for failure in &report.failures {
                    let timestamp = failure.timestamp.to_rfc3339();
                    println!("  {} [{}] {}", timestamp, failure.test, failure.message);
                }
            }
        }
    }
    Ok(())
}

fn list_actions(args: ActionsArgs) -> Result<()> {
    let level = args.level.unwrap_or(MAX_CHAOS_LEVEL);
    let config = ChaosConfig::default().level(level);
    config.validate().context("Invalid chaos level")?;
    let actions = ActionRegistry::new(&config).list();

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&actions)?),
        OutputFormat::Text => {
            println!("{:<10} {:<6} {:<8} NAME", "ID", "LEVEL", "ENABLED");
            for action in &actions {
                println!(
                    "{:<10} {:<6} {:<8} {}",
                    action.id, action.level, action.enabled, action.name
                );
            }
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
