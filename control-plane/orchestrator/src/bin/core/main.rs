//! The Core Agent: wires the configuration, the persistent store, the quota
//! subsystem and the notifier into a registry, restores the records persisted
//! by a previous run, and keeps the volume service alive until shutdown.

use clap::Parser;
use orchestrator::{
    backend::ConnectorProperties,
    controller::registry::{CoreConfig, CopyOptions, Registry},
    notify::LogNotifier,
    quota::MemQuotas,
    volume::Service,
};
use std::{collections::HashMap, sync::Arc};
use tracing_subscriber::EnvFilter;

/// The Cli arguments for this binary.
#[derive(Debug, Parser)]
#[command(name = "core", version)]
pub(crate) struct CliArgs {
    /// The timeout for store operations.
    #[clap(long, default_value = "30s")]
    store_timeout: humantime::Duration,

    /// The period at which a pending volume creation is polled.
    #[clap(long, default_value = "500ms")]
    create_poll_period: humantime::Duration,

    /// The bound on the number of polls of a pending volume creation.
    #[clap(long, default_value = "60")]
    create_poll_tries: u32,

    /// The block size handed to the generic copy engine.
    #[clap(long, default_value = "1M")]
    copy_block_size: String,

    /// ionice class arguments for the copy utility, eg `-c3`.
    #[clap(long)]
    copy_ionice: Option<String>,

    /// The host name reported in this agent's connector properties.
    #[clap(long, default_value = "core-agent")]
    connector_host: String,

    /// Per-resource quota limits, as `resource=limit` pairs.
    #[clap(long, value_parser = parse_quota_limit, value_delimiter = ',')]
    quota_limit: Vec<(String, i64)>,
}

fn parse_quota_limit(value: &str) -> Result<(String, i64), String> {
    let (resource, limit) = value
        .split_once('=')
        .ok_or_else(|| format!("Invalid quota limit '{value}': expected resource=limit"))?;
    let limit = limit
        .parse()
        .map_err(|error| format!("Invalid quota limit '{value}': {error}"))?;
    Ok((resource.to_string(), limit))
}

impl CliArgs {
    fn args() -> Self {
        CliArgs::parse()
    }
}

#[tokio::main(worker_threads = 2)]
async fn main() {
    let cli_args = CliArgs::args();
    init_tracing();
    tracing::info!(?cli_args, "Starting the core agent");

    let config = CoreConfig {
        store_timeout: cli_args.store_timeout.into(),
        create_poll_period: cli_args.create_poll_period.into(),
        create_poll_tries: cli_args.create_poll_tries,
        copy: CopyOptions {
            block_size: cli_args.copy_block_size.clone(),
            ionice: cli_args.copy_ionice.clone(),
            throttle: None,
        },
        connector: ConnectorProperties::for_host(cli_args.connector_host.clone()),
    };

    let quotas = Arc::new(MemQuotas::new(HashMap::from_iter(cli_args.quota_limit)));
    let registry = Registry::new(
        config,
        memstor::MemStore::new(),
        quotas,
        Arc::new(LogNotifier::default()),
    );
    registry.start().await;

    let service = Service::new(registry);
    tracing::info!("Volume service ready");

    // backend drivers register through `Registry::register_backend`; the
    // transport surface wiring them up is deployment specific and out of
    // this binary's hands
    shutdown_signal().await;
    drop(service);
    tracing::info!("Shutting down");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Waits until the process receives a shutdown: either TERM or INT.
async fn shutdown_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("to listen for SIGTERM");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
