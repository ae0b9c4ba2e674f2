mod area;
mod bans;
mod catalog;
mod config;
mod connection;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bans::BanStore;
use config::ServerConfig;
use connection::ConnectionHandler;
use tracing::{error, info};
use tsu_net::{NetConfig, NetServer};

fn parse_addr(ip: &str, port: u16) -> SocketAddr {
    match format!("{ip}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address {ip}:{port}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Arc::new(match ServerConfig::load("server.toml") {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load server.toml: {e}");
            std::process::exit(1);
        }
    });

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let tcp_addr = parse_addr(config.server.bind_ip(), config.server.port);
    let ws_addr = config
        .websocket
        .enabled
        .then(|| parse_addr(config.server.bind_ip(), config.websocket.port));

    let (mut server, mut events, server_handle) =
        match NetServer::bind(NetConfig { tcp_addr, ws_addr }).await {
            Ok(bound) => bound,
            Err(e) => {
                error!("Failed to bind listeners: {e}");
                std::process::exit(1);
            }
        };

    info!("AO clients on tcp {tcp_addr}");
    match ws_addr {
        Some(addr) => info!("Web clients on websocket {addr}"),
        None => info!("Websocket listener disabled"),
    }
    info!(
        "\"{}\" open for {} players in {} areas",
        config.server.hostname,
        config.server.playerlimit,
        config.areas.len()
    );
    if config.server.modpass.is_empty() {
        info!("No modpass set, /login is disabled");
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Handle Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let bans = BanStore::load(&config.bans.file);
    info!("{} bans loaded from {}", bans.len(), config.bans.file);
    let mut shutdown_rx_handler = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut handler = ConnectionHandler::new(server_handle, config, bans);
        let mut tick_interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(e) => handler.handle_event(e, Instant::now()),
                        None => break,
                    }
                }
                _ = tick_interval.tick() => {
                    handler.tick(Instant::now());
                }
                _ = shutdown_rx_handler.changed() => {
                    if *shutdown_rx_handler.borrow() {
                        info!("Closing with {} clients connected", handler.player_count());
                        break;
                    }
                }
            }
        }
    });

    server.run(shutdown_rx).await;
    info!("Server shut down.");
}
