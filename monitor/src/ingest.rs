use crate::aggregator::SharedStore;
use crate::errors::Error;
use crate::metrics::{READINGS_APPLIED_TOTAL, READINGS_DROPPED_TOTAL};
use crate::model::SensorReading;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Running totals of one ingest loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub applied: u64,
    pub dropped: u64,
}

/// Merge readings into the store until the channel closes.
///
/// Each reading is applied under its own lock so command resolution and the
/// HTTP surface interleave with the feed. Returns the final totals.
pub async fn run_ingest(
    mut rx: mpsc::Receiver<SensorReading>,
    store: SharedStore,
    report_every: Duration,
) -> IngestStats {
    info!("Starting ingest loop, reporting every {:?}", report_every);

    let mut stats = IngestStats::default();
    let mut last_reported = stats;
    let mut ticker = interval(report_every);

    loop {
        tokio::select! {
            reading = rx.recv() => {
                match reading {
                    Some(reading) => apply_reading(&store, &reading, &mut stats).await,
                    None => {
                        info!(
                            "Reading channel closed after {} applied, {} dropped",
                            stats.applied, stats.dropped
                        );
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                if stats != last_reported {
                    let bins = store.lock().await.len();
                    info!(
                        "Ingested {} readings ({} dropped) across {} bins",
                        stats.applied, stats.dropped, bins
                    );
                    last_reported = stats;
                }
            }
        }
    }

    stats
}

async fn apply_reading(store: &SharedStore, reading: &SensorReading, stats: &mut IngestStats) {
    let result = store.lock().await.apply(reading);

    match result {
        Ok(()) => {
            stats.applied += 1;
            READINGS_APPLIED_TOTAL.inc();
            debug!("Applied {} reading for {}", reading.kind(), reading.bin_id());
        }
        Err(Error::MissingBin(bin_id)) => {
            stats.dropped += 1;
            READINGS_DROPPED_TOTAL.inc();
            warn!("Dropping {} reading for unknown bin {}", reading.kind(), bin_id);
        }
        Err(e) => {
            stats.dropped += 1;
            READINGS_DROPPED_TOTAL.inc();
            warn!("Skipping {} reading: {}", reading.kind(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{shared, AggregatorConfig, BinStore};
    use crate::model::{BinStatus, Location};

    #[tokio::test]
    async fn test_ingest_merges_field_groups() {
        let store = shared(BinStore::new(AggregatorConfig::default()));
        let (tx, rx) = mpsc::channel(16);

        let readings = vec![
            SensorReading::Distance {
                bin_id: "esp32_combined_01".to_string(),
                distance_cm: 6.0,
            },
            SensorReading::Temperature {
                bin_id: "esp32_combined_01".to_string(),
                celsius: 24.1,
            },
            SensorReading::Pressure {
                bin_id: "esp32_combined_01".to_string(),
                hpa: 1012.8,
            },
            SensorReading::Gps {
                bin_id: "esp32_combined_01".to_string(),
                location: Location {
                    latitude: 40.7228,
                    longitude: -74.016,
                },
            },
            // Arrives for a bin that never reported distance
            SensorReading::Temperature {
                bin_id: "ghost".to_string(),
                celsius: 20.0,
            },
        ];
        for reading in readings {
            tx.send(reading).await.unwrap();
        }
        drop(tx);

        let stats = run_ingest(rx, store.clone(), Duration::from_secs(60)).await;
        assert_eq!(stats, IngestStats { applied: 4, dropped: 1 });

        let store = store.lock().await;
        assert_eq!(store.len(), 1);
        let bin = store.get("esp32_combined_01").unwrap();
        assert_eq!(bin.status, Some(BinStatus::Full));
        assert_eq!(bin.temperature, Some(24.1));
        assert_eq!(bin.pressure, Some(1012.8));
        assert!(bin.location.is_some());
    }
}
