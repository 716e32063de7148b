use crate::aggregator::SharedStore;
use crate::errors::{Error, Result};
use crate::metrics::{COMMANDS_FAILED_TOTAL, COMMANDS_SENT_TOTAL};
use crate::model::{Bin, BinStatus, Command, CommandKind, CommandStatus, GarbageLevel, LevelUnit};
use crate::transport::CommandTransport;
use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Round-trip delay of the simulated SMS link
pub const DEFAULT_LATENCY_MS: u64 = 1500;

const COMPRESSION_FACTOR: f64 = 0.6;
const MIN_COMPRESSED_PERCENT: f64 = 5.0;

const TEMPERATURE_JITTER: f64 = 1.0;
const PRESSURE_JITTER: f64 = 2.5;
const LEVEL_JITTER: f64 = 10.0;

/// Simulator with its transport chosen at start-up
pub type DynSimulator = CommandSimulator<Box<dyn CommandTransport>, StdRng>;

/// Random offsets applied by a status refresh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub temperature: f64,
    pub pressure: f64,
    pub level: f64,
}

impl Jitter {
    pub fn sample(rng: &mut impl Rng) -> Self {
        Self {
            temperature: rng.gen_range(-TEMPERATURE_JITTER..=TEMPERATURE_JITTER),
            pressure: rng.gen_range(-PRESSURE_JITTER..=PRESSURE_JITTER),
            level: rng.gen_range(-LEVEL_JITTER..=LEVEL_JITTER),
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Level after the compactor has run.
///
/// Percentage bins lose 40% of their fill but never drop under 5%. Clearance
/// bins get the same treatment applied to the filled depth.
pub fn compressed_level(level: GarbageLevel, max_distance_cm: f64) -> GarbageLevel {
    let value = match level.unit {
        LevelUnit::Percentage => (level.value * COMPRESSION_FACTOR).max(MIN_COMPRESSED_PERCENT),
        LevelUnit::Cm => {
            let depth = (max_distance_cm - level.value).max(0.0);
            let floor = max_distance_cm * MIN_COMPRESSED_PERCENT / 100.0;
            max_distance_cm - (depth * COMPRESSION_FACTOR).max(floor)
        }
    };
    GarbageLevel {
        value,
        unit: level.unit,
    }
}

/// Issues compress / status commands over a transport and applies their
/// effect to the store once they resolve.
pub struct CommandSimulator<T, R> {
    store: SharedStore,
    transport: Mutex<T>,
    rng: Mutex<R>,
    latency: Duration,
}

impl<T, R> CommandSimulator<T, R>
where
    T: CommandTransport,
    R: Rng + Send,
{
    pub fn new(store: SharedStore, transport: T, rng: R) -> Self {
        Self {
            store,
            transport: Mutex::new(transport),
            rng: Mutex::new(rng),
            latency: Duration::from_millis(DEFAULT_LATENCY_MS),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Send one command and wait for it to resolve.
    ///
    /// The store is not locked while the simulated link is in flight, so
    /// readings keep flowing. A failed delivery comes back as a command in
    /// the `Failed` state; only an unknown bin is an error.
    pub async fn send_command(&self, bin_id: &str, kind: CommandKind) -> Result<Command> {
        if !self.store.lock().await.contains(bin_id) {
            warn!("Dropping {} command for unknown bin {}", kind.as_str(), bin_id);
            return Err(Error::MissingBin(bin_id.to_string()));
        }

        let pending = Command::pending(bin_id, kind);
        debug!("Command {} ({}) pending for {}", pending.id, kind.as_str(), bin_id);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let status = {
            let mut transport = self.transport.lock().await;
            transport.deliver(&pending)
        };
        let command = pending.resolve(status);

        let jitter = match (kind, status) {
            (CommandKind::Status, CommandStatus::Sent) => {
                let mut rng = self.rng.lock().await;
                Some(Jitter::sample(&mut *rng))
            }
            _ => None,
        };

        let mut store = self.store.lock().await;
        match status {
            CommandStatus::Sent => {
                COMMANDS_SENT_TOTAL.inc();
                info!("Command {} sent to {}", kind.as_str(), bin_id);
                let max_distance = store.config().max_distance_cm;
                // The bin may have been reset while the command was in flight
                let applied = match jitter {
                    Some(jitter) => store.update(bin_id, |bin| refresh(bin, jitter, max_distance)),
                    None => store.update(bin_id, |bin| compress(bin, max_distance)),
                };
                if let Err(e) = applied {
                    warn!("Command {} resolved without a bin: {}", command.id, e);
                }
            }
            _ => {
                COMMANDS_FAILED_TOTAL.inc();
                warn!("Command {} to {} failed", kind.as_str(), bin_id);
            }
        }
        store.record_command(command.clone());

        Ok(command)
    }
}

fn compress(bin: &mut Bin, max_distance_cm: f64) {
    let fillable = matches!(bin.status, Some(BinStatus::Half) | Some(BinStatus::Full));
    if let (true, Some(level)) = (fillable, bin.garbage_level) {
        bin.garbage_level = Some(compressed_level(level, max_distance_cm));
    }
}

fn refresh(bin: &mut Bin, jitter: Jitter, max_distance_cm: f64) {
    if let Some(t) = bin.temperature {
        bin.temperature = Some(round_tenth(t + jitter.temperature));
    }
    if let Some(p) = bin.pressure {
        bin.pressure = Some(round_tenth(p + jitter.pressure));
    }
    if let Some(level) = bin.garbage_level {
        let value = match level.unit {
            LevelUnit::Percentage => (level.value + jitter.level).clamp(0.0, 100.0),
            // Jitter scales to the bin depth and clearance never exceeds it
            LevelUnit::Cm => {
                let offset = jitter.level / 100.0 * max_distance_cm;
                (level.value + offset).clamp(0.0, max_distance_cm)
            }
        };
        bin.garbage_level = Some(GarbageLevel {
            value,
            unit: level.unit,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{shared, AggregatorConfig, BinStore};
    use crate::model::NewBin;
    use crate::transport::SimulatedLink;
    use rand::SeedableRng;

    fn store_with_level(level: f64) -> SharedStore {
        let mut store = BinStore::new(AggregatorConfig::default());
        store
            .add_bin(NewBin {
                id: Some("bin003".to_string()),
                garbage_level: Some(level),
                temperature: Some(26.3),
                pressure: Some(1011.5),
                ..NewBin::default()
            })
            .unwrap();
        shared(store)
    }

    fn simulator(
        store: SharedStore,
        success_rate: f64,
    ) -> CommandSimulator<SimulatedLink<StdRng>, StdRng> {
        let link = SimulatedLink::with_success_rate(StdRng::seed_from_u64(3), success_rate).unwrap();
        CommandSimulator::new(store, link, StdRng::seed_from_u64(9)).with_latency(Duration::ZERO)
    }

    #[test]
    fn test_compressed_level_percentage() {
        let level = GarbageLevel {
            value: 95.0,
            unit: LevelUnit::Percentage,
        };
        assert!((compressed_level(level, 40.0).value - 57.0).abs() < 1e-9);

        let low = GarbageLevel {
            value: 6.0,
            unit: LevelUnit::Percentage,
        };
        assert_eq!(compressed_level(low, 40.0).value, 5.0);
    }

    #[test]
    fn test_compressed_level_cm() {
        let level = GarbageLevel {
            value: 5.0,
            unit: LevelUnit::Cm,
        };
        // 35 cm of garbage shrinks to 21 cm
        assert!((compressed_level(level, 40.0).value - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let jitter = Jitter::sample(&mut rng);
            assert!(jitter.temperature.abs() <= TEMPERATURE_JITTER);
            assert!(jitter.pressure.abs() <= PRESSURE_JITTER);
            assert!(jitter.level.abs() <= LEVEL_JITTER);
        }
    }

    #[tokio::test]
    async fn test_compress_success() {
        let store = store_with_level(95.0);
        let sim = simulator(store.clone(), 1.0);

        let command = sim.send_command("bin003", CommandKind::Compress).await.unwrap();
        assert_eq!(command.status, CommandStatus::Sent);

        let store = store.lock().await;
        let bin = store.get("bin003").unwrap();
        let level = bin.garbage_level.unwrap();
        assert!((level.value - 57.0).abs() < 1e-9);
        assert_eq!(bin.status, Some(BinStatus::Half));
        assert_eq!(store.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_compress_failure_leaves_bin() {
        let store = store_with_level(95.0);
        let sim = simulator(store.clone(), 0.0);

        let command = sim.send_command("bin003", CommandKind::Compress).await.unwrap();
        assert_eq!(command.status, CommandStatus::Failed);

        let store = store.lock().await;
        let bin = store.get("bin003").unwrap();
        assert_eq!(bin.garbage_level.unwrap().value, 95.0);
        assert_eq!(bin.status, Some(BinStatus::Full));
        assert_eq!(store.commands().recent()[0].status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_compress_empty_bin_is_noop() {
        let store = store_with_level(20.0);
        let sim = simulator(store.clone(), 1.0);

        sim.send_command("bin003", CommandKind::Compress).await.unwrap();

        let store = store.lock().await;
        assert_eq!(store.get("bin003").unwrap().garbage_level.unwrap().value, 20.0);
    }

    #[tokio::test]
    async fn test_status_refresh_perturbs_within_bounds() {
        let store = store_with_level(50.0);
        let sim = simulator(store.clone(), 1.0);

        sim.send_command("bin003", CommandKind::Status).await.unwrap();

        let store = store.lock().await;
        let bin = store.get("bin003").unwrap();
        assert!((bin.temperature.unwrap() - 26.3).abs() <= 1.05);
        assert!((bin.pressure.unwrap() - 1011.5).abs() <= 2.55);
        let level = bin.garbage_level.unwrap().value;
        assert!((40.0..=60.0).contains(&level));
        assert_eq!(bin.status, bin.garbage_level.as_ref().map(crate::aggregator::derive_status));
    }

    #[tokio::test]
    async fn test_status_refresh_keeps_cm_clearance_inside_bin() {
        let mut store = BinStore::new(AggregatorConfig::default());
        store
            .add_bin(NewBin {
                id: Some("bin004".to_string()),
                unit: LevelUnit::Cm,
                garbage_level: Some(39.0),
                ..NewBin::default()
            })
            .unwrap();
        let store = shared(store);
        let sim = simulator(store.clone(), 1.0);

        for _ in 0..50 {
            sim.send_command("bin004", CommandKind::Status).await.unwrap();
            let store = store.lock().await;
            let level = store.get("bin004").unwrap().garbage_level.unwrap();
            assert_eq!(level.unit, LevelUnit::Cm);
            assert!((0.0..=40.0).contains(&level.value), "clearance {}", level.value);
        }
    }

    #[tokio::test]
    async fn test_status_refresh_leaves_placeholders() {
        let mut store = BinStore::new(AggregatorConfig::default());
        store
            .add_bin(NewBin {
                id: Some("bin005".to_string()),
                ..NewBin::default()
            })
            .unwrap();
        let store = shared(store);
        let sim = simulator(store.clone(), 1.0);

        let command = sim.send_command("bin005", CommandKind::Status).await.unwrap();
        assert_eq!(command.status, CommandStatus::Sent);

        let store = store.lock().await;
        let bin = store.get("bin005").unwrap();
        assert!(bin.temperature.is_none());
        assert!(bin.pressure.is_none());
        assert!(bin.garbage_level.is_none());
        assert!(bin.status.is_none());
    }

    #[tokio::test]
    async fn test_unknown_bin() {
        let store = store_with_level(50.0);
        let sim = simulator(store.clone(), 1.0);

        let result = sim.send_command("bin404", CommandKind::Compress).await;
        assert!(matches!(result, Err(Error::MissingBin(_))));
        assert!(store.lock().await.commands().is_empty());
    }
}
