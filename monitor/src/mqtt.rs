use crate::errors::{Error, Result};
use crate::metrics::READINGS_TOTAL;
use crate::model::SensorReading;
use crate::validate::{parse_topic, readings_from_payload, FeedGroup};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Topics carrying one field group each, keyed by device id
pub const FEED_TOPICS: [&str; 3] = [
    "devices/+/ultrasonic",
    "devices/+/bmp",
    "devices/+/gps",
];

pub fn connect(broker: &str, port: u16, client_id: &str) -> (AsyncClient, EventLoop) {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    AsyncClient::new(mqtt_options, 10000)
}

/// Handle on a running reading stream.
///
/// Dropping it or calling [`FeedSubscription::unsubscribe`] aborts the task
/// driving the stream, so no further readings are delivered.
pub struct FeedSubscription {
    handle: JoinHandle<()>,
    client: Option<AsyncClient>,
}

impl FeedSubscription {
    /// Subscribe to every feed topic and forward readings into `tx`
    pub fn spawn_mqtt(
        client: AsyncClient,
        eventloop: EventLoop,
        tx: mpsc::Sender<SensorReading>,
    ) -> Self {
        let feed_client = client.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_feed(feed_client, eventloop, tx).await {
                error!("MQTT feed failed: {}", e);
            }
        });
        Self {
            handle,
            client: Some(client),
        }
    }

    /// Replay a fixed list of readings, one per `interval`
    pub fn spawn_replay(
        readings: Vec<SensorReading>,
        interval: Duration,
        tx: mpsc::Sender<SensorReading>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for reading in readings {
                ticker.tick().await;
                if tx.send(reading).await.is_err() {
                    debug!("Replay receiver closed");
                    break;
                }
            }
        });
        Self {
            handle,
            client: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn unsubscribe(self) {
        if let Some(client) = &self.client {
            for topic in FEED_TOPICS {
                if let Err(e) = client.unsubscribe(topic).await {
                    warn!("Failed to unsubscribe from {}: {}", topic, e);
                }
            }
        }
        self.handle.abort();
        info!("Feed unsubscribed");
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn run_feed(
    client: AsyncClient,
    mut eventloop: EventLoop,
    tx: mpsc::Sender<SensorReading>,
) -> Result<()> {
    for topic in FEED_TOPICS {
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(Error::Mqtt)?;
        info!("Subscribed to {} with QoS 1", topic);
    }

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    // Parse failures are final and a send only fails once the consumer is gone
                    if let Err(e) = process_message(&publish.topic, &publish.payload, &tx).await {
                        warn!("Dropped message on {}: {}", publish.topic, e);
                        if matches!(e, Error::ChannelSend) && tx.is_closed() {
                            info!("Reading consumer gone, stopping feed");
                            return Ok(());
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Decode one snapshot and queue the readings it carries
async fn process_message(
    topic: &str,
    payload: &[u8],
    tx: &mpsc::Sender<SensorReading>,
) -> Result<()> {
    let Some((bin_id, group)) = parse_topic(topic) else {
        debug!("Ignoring message on unrelated topic {}", topic);
        return Ok(());
    };
    READINGS_TOTAL.with_label_values(&[group.as_str()]).inc();

    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let readings = readings_from_payload(bin_id, group, &value)?;

    for reading in readings {
        forward(reading, group, tx).await?;
    }
    Ok(())
}

async fn forward(
    reading: SensorReading,
    group: FeedGroup,
    tx: &mpsc::Sender<SensorReading>,
) -> Result<()> {
    match tx.try_send(reading) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(reading)) => {
            debug!("Channel full on {} reading, using blocking send", group.as_str());
            tx.send(reading).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot forward reading");
            Err(Error::ChannelSend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_message_valid() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);
            let payload = br#"{"temperature": 22.4, "pressure": 1013.1}"#;

            assert!(process_message("devices/bin001/bmp", payload, &tx).await.is_ok());

            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert_eq!(first.kind(), "temperature");
            assert_eq!(second.kind(), "pressure");
            assert_eq!(second.bin_id(), "bin001");
        });
    }

    #[test]
    fn test_process_message_invalid_json() {
        tokio_test::block_on(async {
            let (tx, _rx) = mpsc::channel(10);
            let payload = b"invalid json";

            let result = process_message("devices/bin001/gps", payload, &tx).await;
            assert!(matches!(result, Err(Error::Json(_))));
        });
    }

    #[test]
    fn test_process_message_unrelated_topic() {
        tokio_test::block_on(async {
            let (tx, mut rx) = mpsc::channel(10);

            assert!(process_message("devices/bin001/command", b"{}", &tx)
                .await
                .is_ok());
            drop(tx);
            assert!(rx.recv().await.is_none());
        });
    }

    #[test]
    fn test_process_message_closed_channel() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(10);
            drop(rx);

            let received = READINGS_TOTAL.with_label_values(&["ultrasonic"]);
            let before = received.get();

            let result =
                process_message("devices/bin001/ultrasonic", br#"{"distance_cm": 12}"#, &tx).await;
            assert!(matches!(result, Err(Error::ChannelSend)));
            assert_eq!(received.get() - before, 1.0);
        });
    }

    #[tokio::test]
    async fn test_replay_stops_after_unsubscribe() {
        let (tx, mut rx) = mpsc::channel(10);
        let readings: Vec<SensorReading> = (0..100)
            .map(|i| SensorReading::Distance {
                bin_id: "bin001".to_string(),
                distance_cm: i as f64 / 10.0,
            })
            .collect();

        let subscription = FeedSubscription::spawn_replay(readings, Duration::from_millis(5), tx);
        assert!(rx.recv().await.is_some());
        subscription.unsubscribe().await;

        // Drain whatever was already queued; the sender is dropped with the task
        let mut remaining = 0;
        while rx.recv().await.is_some() {
            remaining += 1;
        }
        assert!(remaining < 99);
    }
}
