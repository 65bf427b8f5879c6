//! Fleet Simulator CLI
//!
//! Streams synthetic telemetry for every entity in a fleet file until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use fleet_simulator::{
    FleetConfig, HttpPublisher, HttpRouteProvider, LogPublisher, NatsPublisher, PublishScheduler,
    Publisher, PublisherKind, RetryPolicy, RetryingPublisher, RouteBuilder, RouteProvider,
    SchedulerOptions, SimulatedEntity, SimulatorConfig, StraightLineRouter, tick_interval_from_secs,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fleet-simulator")]
#[command(about = "Simulate fleet telemetry for ships, trucks and freezers")]
struct Args {
    /// Fleet file (JSON); the built-in fleet is used when omitted
    #[arg(short, long)]
    fleet: Option<PathBuf>,

    /// Log packets instead of publishing them
    #[arg(long)]
    dry_run: bool,

    /// Print the fleet and exit
    #[arg(long)]
    list: bool,

    /// Only simulate these device ids (repeatable)
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Override every entity's tick interval, in seconds
    #[arg(long)]
    tick_secs: Option<f64>,

    /// Stop each entity after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Simulated seconds per wall-clock second (overrides TIME_SCALE)
    #[arg(long)]
    time_scale: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let config = SimulatorConfig::from_env()?;
    init_tracing(&config);

    info!(version = fleet_simulator::VERSION, "Starting fleet simulator");

    let mut fleet = match &args.fleet {
        Some(path) => FleetConfig::from_path(path)?,
        None => FleetConfig::builtin()?,
    };
    fleet.retain_devices(&args.devices);
    fleet.engine.validate()?;

    if args.list {
        print_fleet(&fleet);
        return Ok(());
    }

    let (specs, rejected) = fleet.validated_entities();
    if specs.is_empty() {
        bail!("no valid entities to simulate ({} rejected)", rejected.len());
    }

    let builder = route_builder(&config, &fleet)?;
    let mut entities = Vec::with_capacity(specs.len());
    for spec in &specs {
        entities.push(SimulatedEntity::build(spec, &builder, fleet.engine.motion).await);
    }

    let publisher = build_publisher(&config, args.dry_run).await?;

    let tick_override = args
        .tick_secs
        .map(|secs| {
            tick_interval_from_secs(secs).with_context(|| format!("--tick-secs must be between 1 ms and 1 day, got {secs}"))
        })
        .transpose()?;
    let time_scale = args.time_scale.unwrap_or(config.time_scale);
    if !(time_scale > 0.0 && time_scale.is_finite()) {
        bail!("--time-scale must be positive, got {time_scale}");
    }

    let options = SchedulerOptions {
        time_scale,
        max_ticks: args.max_ticks,
        tick_override,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let summaries = PublishScheduler::new(publisher, options)
        .run(entities, shutdown_rx)
        .await;

    let failures: u64 = summaries.iter().map(|s| s.failures).sum();
    let ticks: u64 = summaries.iter().map(|s| s.ticks).sum();
    info!(entities = summaries.len(), ticks, failures, "Simulator shut down");
    Ok(())
}

fn init_tracing(config: &SimulatorConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn route_builder(config: &SimulatorConfig, fleet: &FleetConfig) -> Result<RouteBuilder> {
    let fallback = StraightLineRouter::new(fleet.engine.straight_line_spacing_km);
    let provider: Arc<dyn RouteProvider> = match &config.routing_url {
        Some(url) => {
            info!(url = %url, "using routing service");
            let timeout = Duration::from_secs(fleet.engine.routing_timeout_secs);
            Arc::new(HttpRouteProvider::new(url.clone(), timeout).context("building routing client")?)
        }
        None => Arc::new(fallback),
    };
    Ok(RouteBuilder::new(provider, fallback, fleet.engine.thinning()))
}

async fn build_publisher(config: &SimulatorConfig, dry_run: bool) -> Result<Arc<dyn Publisher>> {
    let kind = if dry_run { PublisherKind::Log } else { config.publisher };
    let policy = RetryPolicy {
        max_attempts: config.publish_max_attempts,
        backoff: config.publish_backoff,
        timeout: config.publish_timeout,
    };

    let inner: Arc<dyn Publisher> = match kind {
        PublisherKind::Log => return Ok(Arc::new(LogPublisher::new(config.topic_prefix.clone()))),
        PublisherKind::Http => {
            let Some(endpoint) = &config.http_endpoint else {
                bail!("HTTP_ENDPOINT is required for the http publisher");
            };
            info!(endpoint = %endpoint, "publishing over HTTP");
            Arc::new(HttpPublisher::new(
                endpoint,
                config.http_auth_token.clone(),
                config.publish_timeout,
            )?)
        }
        PublisherKind::Nats => Arc::new(NatsPublisher::connect(&config.nats_url, config.topic_prefix.clone()).await?),
    };
    Ok(Arc::new(RetryingPublisher::new(inner, policy)))
}

fn print_fleet(fleet: &FleetConfig) {
    println!("{:<18} {:<8} {:<24} {:>9} {:>6}  NAME", "DEVICE", "KIND", "FAULT", "KM/H", "WPTS");
    for entity in &fleet.entities {
        println!(
            "{:<18} {:<8} {:<24} {:>9.1} {:>6}  {}",
            entity.device_id,
            entity.kind,
            entity.fault.as_deref().unwrap_or("normal"),
            entity.cruise_speed_kmh(),
            entity.waypoints.len(),
            entity.name.as_deref().unwrap_or("-"),
        );
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
