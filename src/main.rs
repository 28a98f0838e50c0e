use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tzsync::config::Config;
use tzsync::models::TimezoneRegistry;
use tzsync::services::definitions_service::load_definitions;
use tzsync::sim::{PeerHandle, PeerRuntime, SimHost};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tzsync=debug,info".into()),
        )
        .init();

    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let sim_peers = match config.sim_peers() {
        Ok(peers) if !peers.is_empty() => peers,
        Ok(_) => {
            error!("No simulated peers configured");
            return;
        }
        Err(e) => {
            error!("Failed to parse simulated peers: {}", e);
            return;
        }
    };

    info!(
        "Starting {} session with {} peers ({})",
        config.sync_variant,
        sim_peers.len(),
        config.environment
    );

    let (definitions_tx, definitions_rx) = watch::channel(Arc::new(TimezoneRegistry::default()));
    tokio::spawn(load_definitions(config.definition_sources(), definitions_tx));

    let host = SimHost::spawn();
    if config.sim_publish_failures > 0 {
        host.fail_next_publishes(config.sim_publish_failures);
    }

    let mut peers: Vec<PeerHandle> = Vec::new();
    for sim_peer in sim_peers {
        match PeerRuntime::spawn(
            &host,
            &sim_peer.name,
            sim_peer.zone,
            config.sync_variant,
            config.timings(),
            definitions_rx.clone(),
            config.network_offset(),
        )
        .await
        {
            Some(handle) => peers.push(handle),
            None => error!("Failed to join peer {}", sim_peer.name),
        }
    }

    let duration = Duration::from_secs(config.sim_duration_secs);
    if let Some(name) = &config.sim_leave {
        tokio::time::sleep(duration / 2).await;
        match peers.iter().position(|p| &p.peer.display_name == name) {
            Some(index) => {
                let leaving = peers.remove(index);
                info!("Peer {} leaving", leaving.peer);
                leaving.leave();
            }
            None => warn!("No simulated peer named {}", name),
        }
        tokio::time::sleep(duration - duration / 2).await;
    } else {
        tokio::time::sleep(duration).await;
    }

    if let Some(snapshot) = host.snapshot().await {
        info!(
            "Session owner {:?} after {} publishes, blob {}",
            snapshot.owner, snapshot.publishes, snapshot.blob
        );
    }
    for handle in &peers {
        let state = handle.state();
        info!("{} sees {} entries", handle.peer, state.view.len());
        for shown in &state.displays {
            info!(
                "  [{}] {} at {:?}: {}",
                shown.slot,
                shown.display_name,
                shown.position,
                shown.clock.replace('\n', " | ")
            );
        }
    }
}
