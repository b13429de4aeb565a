use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use senseye::{
    actors::scheduler::SchedulerHandle,
    alerts::AlertManager,
    config::{Config, UserConfig, read_config_file},
    coordinator::FleetCoordinator,
    mailer::{LogNotifier, Notifier, SmtpNotifier},
    node::NodeClient,
    provision::{ensure_admin, seed_inventory},
    storage::open_backend,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("senseye", LevelFilter::TRACE),
        ("senseye_hub", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to load config from {}", args.file))?;

    let store = open_backend(&config.storage())
        .await
        .context("failed to open storage")?;

    match store.health_check().await {
        Ok(status) if status.healthy => debug!("storage ready: {}", status.message),
        Ok(status) => warn!("storage reports problems: {}", status.message),
        Err(e) => warn!("storage health check failed: {e}"),
    }

    if let Some(inventory) = &config.inventory {
        seed_inventory(store.as_ref(), inventory).await;
    }

    let admin = config.admin.clone().or_else(UserConfig::admin_from_env);
    if let Err(e) = ensure_admin(store.as_ref(), admin.as_ref()).await {
        error!("failed to create administrator: {e}");
    }

    let alerts = AlertManager::new(store.clone(), notifier(&config));
    let coordinator = FleetCoordinator::new(
        store.clone(),
        NodeClient::new(config.node_timeout()),
        alerts,
        config.max_concurrent_polls,
    );

    let scheduler = SchedulerHandle::spawn(coordinator, config.interval());
    info!("hub started, polling every {:?}", config.interval());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    if let Err(e) = scheduler.shutdown().await {
        warn!("scheduler already stopped: {e:#}");
    }
    if let Err(e) = store.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}

fn notifier(config: &Config) -> Arc<dyn Notifier> {
    let Some(smtp) = &config.smtp else {
        warn!("no mail server configured, alerts are only logged");
        return Arc::new(LogNotifier);
    };

    match SmtpNotifier::new(smtp) {
        Ok(notifier) => {
            debug!("sending alerts through {}:{}", smtp.server, smtp.port);
            Arc::new(notifier)
        }
        Err(e) => {
            error!("invalid mail server configuration, alerts are only logged: {e}");
            Arc::new(LogNotifier)
        }
    }
}
