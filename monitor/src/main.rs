use axum::{routing::get, Router};
use monitor::aggregator::{shared, BinStore};
use monitor::commands::CommandSimulator;
use monitor::config::{Config, TransportKind};
use monitor::transport::{CommandTransport, MqttCommandTransport, SimulatedLink};
use monitor::{demo, ingest, metrics, mqtt, rest};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting smart bin monitor");
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Command transport: {:?}, latency {:?}",
        config.command_transport, config.command_latency
    );

    metrics::init_metrics();

    let mut bin_store = BinStore::new(config.aggregator.clone());
    if config.seed_demo_bins {
        if let Err(e) = demo::seed_demo_bins(&mut bin_store) {
            error!("Failed to seed demo bins: {}", e);
            std::process::exit(1);
        }
    }
    let store = shared(bin_store);

    let client_id = format!("monitor-{}", uuid::Uuid::new_v4());
    let (client, eventloop) = mqtt::connect(&config.mqtt_broker, config.mqtt_port, &client_id);

    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let transport: Box<dyn CommandTransport> = match config.command_transport {
        TransportKind::Simulated => {
            let link_rng = StdRng::seed_from_u64(rng.gen());
            match SimulatedLink::with_success_rate(link_rng, config.command_success_rate) {
                Ok(link) => Box::new(link),
                Err(e) => {
                    error!("Invalid command link: {}", e);
                    std::process::exit(1);
                }
            }
        }
        TransportKind::Mqtt => Box::new(MqttCommandTransport::new(client.clone())),
    };
    let simulator = Arc::new(
        CommandSimulator::new(store.clone(), transport, rng).with_latency(config.command_latency),
    );

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let subscription = mqtt::FeedSubscription::spawn_mqtt(client, eventloop, tx);

    let ingest_store = store.clone();
    let ingest_handle = tokio::spawn(async move {
        ingest::run_ingest(rx, ingest_store, REPORT_INTERVAL).await;
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(simulator));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = ingest_handle => {
            error!("Ingest task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    subscription.unsubscribe().await;
    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
