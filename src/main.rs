//! Player position-sharing demo
//!
//! Runs several simulated players against an in-process broker:
//! - every player broadcasts its position once per frame
//! - the throttle caps what actually reaches the broker
//! - the first player logs everyone else's positions

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use playerlink::client::PositionUpdate;
use playerlink::config::{AppConfig, ClientConfig};
use playerlink::network::{spawn_event_handler, ClientEvent, EventKind, LocalBroker};
use playerlink::telemetry::{init_logging, init_metrics};
use playerlink::PlayerClient;

/// Position-sharing client demo over an in-process broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; defaults are used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override log level
    #[arg(long)]
    log_level: Option<String>,

    /// Identity of the first player
    #[arg(long)]
    client_id: Option<String>,

    /// Number of simulated players
    #[arg(long)]
    players: Option<usize>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Log every inbound message
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }
    if let Some(client_id) = args.client_id {
        config.client.client_id = client_id;
    }
    if let Some(players) = args.players {
        config.simulation.players = players;
    }
    if args.duration_secs.is_some() {
        config.simulation.duration_secs = args.duration_secs;
    }
    if args.verbose {
        config.client.verbose = true;
    }
    config.client.validate()?;
    anyhow::ensure!(config.simulation.players > 0, "players must be positive");

    let _log_guard = init_logging(&config.telemetry)?;
    info!("Starting playerlink v{}", env!("CARGO_PKG_VERSION"));

    if config.telemetry.enable_metrics {
        init_metrics(config.telemetry.metrics_port)?;
    }

    let broker = LocalBroker::new();
    let factory = Arc::new(broker.clone());

    let mut players = Vec::with_capacity(config.simulation.players);
    for index in 0..config.simulation.players {
        let client_config = player_config(&config.client, index);
        let player = PlayerClient::builder(client_config, factory.clone())
            .on_failure(|failure| warn!("Player could not connect: {}", failure))
            .build()?;
        players.push(player);
    }

    let observer = players[0].clone();
    let observer_id = observer.client_id().to_string();
    let received = spawn_event_handler(observer.events(), EventKind::Received, move |event| {
        let observer_id = observer_id.clone();
        async move {
            if let ClientEvent::Received { client_id, data, .. } = event {
                info!("[{}] {} at {}", observer_id, client_id, data);
            }
        }
    });

    let mut sent_counts: HashMap<String, Arc<AtomicU64>> = HashMap::new();
    let mut handlers = vec![received];
    for player in &players {
        let counter = Arc::new(AtomicU64::new(0));
        sent_counts.insert(player.client_id().to_string(), counter.clone());
        handlers.push(spawn_event_handler(player.events(), EventKind::Sent, move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));
        player.init()?;
    }

    let frame = Duration::from_secs_f64(1.0 / config.simulation.frame_rate_hz as f64);
    let movers: Vec<_> = players
        .iter()
        .enumerate()
        .map(|(index, player)| tokio::spawn(run_player(player.clone(), index, frame)))
        .collect();

    let deadline = config.simulation.duration_secs.map(Duration::from_secs);
    match deadline {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => info!("Simulation finished after {:?}", limit),
                result = signal::ctrl_c() => log_shutdown(result),
            }
        }
        None => log_shutdown(signal::ctrl_c().await),
    }

    for task in movers.into_iter().chain(handlers) {
        task.abort();
    }

    let mut ids: Vec<_> = sent_counts.keys().cloned().collect();
    ids.sort();
    for id in ids {
        let sent = sent_counts[&id].load(Ordering::Relaxed);
        info!("{} sent {} messages", id, sent);
    }

    info!("playerlink stopped");
    Ok(())
}

fn player_config(base: &ClientConfig, index: usize) -> ClientConfig {
    let mut config = base.clone();
    if index > 0 {
        config.client_id = format!("{}-{}", base.client_id, index);
    }
    config
}

/// Walk a circle, broadcasting every frame
async fn run_player(player: PlayerClient, index: usize, frame: Duration) {
    let mut ticker = tokio::time::interval(frame);
    let radius = 10.0 + index as f64 * 5.0;
    let mut angle: f64 = 0.0;

    loop {
        ticker.tick().await;
        angle += 0.05;
        let update = PositionUpdate::new(radius * angle.cos(), radius * angle.sin());
        if let Err(e) = player.broadcast_positions(&update) {
            error!("Failed to encode position for {}: {}", player.client_id(), e);
        }
    }
}

fn log_shutdown(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Shutdown signal received, gracefully stopping..."),
        Err(err) => error!("Error listening for shutdown signal: {}", err),
    }
}
