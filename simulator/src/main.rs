mod device;

use clap::Parser;
use device::{led_band, CommandMessage, Device};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated smart bins publishing sensor readings over MQTT
#[derive(Debug, Parser)]
#[command(name = "simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Number of bins to simulate
    #[arg(long, env = "DEVICES", default_value_t = 5)]
    devices: usize,

    /// Sample period of every sensor
    #[arg(long, env = "INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,

    /// Upper bound on how much clearance a bin loses per sample
    #[arg(long, env = "FILL_RATE_CM", default_value_t = 1.5)]
    fill_rate_cm: f64,

    /// Seed for reproducible runs
    #[arg(long, env = "SEED")]
    seed: Option<u64>,
}

type Devices = Arc<Mutex<Vec<Device>>>;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting smart bin simulator");
    info!(
        "Broker: {}:{}, Devices: {}, Interval: {}ms",
        args.broker, args.port, args.devices, args.interval_ms
    );

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let devices: Devices = Arc::new(Mutex::new(
        (0..args.devices)
            .map(|i| Device::new(format!("bin{:03}", i + 1), i, &mut rng))
            .collect(),
    ));

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    if let Err(e) = client.subscribe("devices/+/command", QoS::AtLeastOnce).await {
        error!("Failed to subscribe to command topic: {}", e);
    }

    // Eventloop handler doubles as the firmware's command listener
    let command_client = client.clone();
    let command_devices = devices.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Replies are published from their own task; awaiting them here
                    // would stall the loop that flushes them
                    tokio::spawn(handle_command(
                        command_client.clone(),
                        command_devices.clone(),
                        publish.topic,
                        publish.payload.to_vec(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("Connected to MQTT broker, starting to publish readings");

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut rounds = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal after {} rounds", rounds);
                break;
            }
        }

        let snapshot: Vec<Device> = {
            let mut devices = devices.lock().await;
            for device in devices.iter_mut() {
                device.tick(&mut rng, args.fill_rate_cm);
            }
            devices.clone()
        };

        for device in &snapshot {
            publish_device(&client, device).await;
        }

        rounds += 1;
        if rounds % 30 == 0 {
            info!("Published {} rounds for {} devices", rounds, snapshot.len());
        }
    }
}

async fn publish_device(client: &AsyncClient, device: &Device) {
    publish_json(client, &device.id, "ultrasonic", &device.ultrasonic()).await;
    publish_json(client, &device.id, "bmp", &device.bmp()).await;
    publish_json(client, &device.id, "gps", &device.gps()).await;
    debug!(
        "{} at {:.2} cm, bin is {}",
        device.id,
        device.distance_cm,
        led_band(device.distance_cm)
    );
}

async fn publish_json<T: Serialize>(client: &AsyncClient, device_id: &str, group: &str, value: &T) {
    let topic = format!("devices/{}/{}", device_id, group);
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to serialize {} snapshot: {}", group, e);
            return;
        }
    };

    if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
        warn!("Failed to publish to {}: {}", topic, e);
    }
}

async fn handle_command(client: AsyncClient, devices: Devices, topic: String, payload: Vec<u8>) {
    let Some(device_id) = topic
        .strip_prefix("devices/")
        .and_then(|rest| rest.strip_suffix("/command"))
    else {
        return;
    };

    let command: CommandMessage = match serde_json::from_slice(&payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Ignoring malformed command for {}: {}", device_id, e);
            return;
        }
    };

    let snapshot = {
        let mut devices = devices.lock().await;
        let Some(device) = devices.iter_mut().find(|d| d.id == device_id) else {
            warn!("Command for unknown device {}", device_id);
            return;
        };

        match command.kind.as_str() {
            "compress" => {
                device.compress();
                info!(
                    "{} compressed ({}), clearance now {:.2} cm",
                    device_id,
                    command.id.as_deref().unwrap_or("-"),
                    device.distance_cm
                );
            }
            "status" => info!("{} status requested", device_id),
            other => {
                warn!("Unknown command '{}' for {}", other, device_id);
                return;
            }
        }
        device.clone()
    };

    publish_device(&client, &snapshot).await;
}
