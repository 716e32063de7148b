use crate::errors::{Error, Result};
use crate::log::EventLog;
use crate::metrics::{ALERTS_TOTAL, BINS_TRACKED};
use crate::validate::validate_new_bin;
use crate::model::{
    Alert, Bin, BinStatus, Command, CommandStatus, GarbageLevel, LevelUnit, Location, NewBin,
    SensorReading,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Sensor-to-garbage distance of an empty bin
pub const DEFAULT_MAX_DISTANCE_CM: f64 = 40.0;

const HALF_PERCENT: f64 = 30.0;
const FULL_PERCENT: f64 = 80.0;
const EMPTY_CLEARANCE_CM: f64 = 10.0;
const FULL_CLEARANCE_CM: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub max_distance_cm: f64,
    /// Create a bin on its first distance reading instead of dropping it
    pub auto_register: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_distance_cm: DEFAULT_MAX_DISTANCE_CM,
            auto_register: true,
        }
    }
}

/// Store handle shared between the feed, command and HTTP tasks
pub type SharedStore = Arc<Mutex<BinStore>>;

pub fn shared(store: BinStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Classify a fill level into its status tier
pub fn derive_status(level: &GarbageLevel) -> BinStatus {
    match level.unit {
        LevelUnit::Percentage => {
            if level.value < HALF_PERCENT {
                BinStatus::Empty
            } else if level.value < FULL_PERCENT {
                BinStatus::Half
            } else {
                BinStatus::Full
            }
        }
        // Clearance shrinks as the bin fills
        LevelUnit::Cm => {
            if level.value > EMPTY_CLEARANCE_CM {
                BinStatus::Empty
            } else if level.value > FULL_CLEARANCE_CM {
                BinStatus::Half
            } else {
                BinStatus::Full
            }
        }
    }
}

/// Convert an ultrasonic clearance into a fill percentage in [0, 100]
pub fn fill_percentage(distance_cm: f64, max_distance_cm: f64) -> f64 {
    (((max_distance_cm - distance_cm) / max_distance_cm) * 100.0).clamp(0.0, 100.0)
}

/// Sensor values the aggregator accepts; zero counts as "no reading"
fn usable(value: f64) -> bool {
    value.is_finite() && value != 0.0
}

/// In-memory state of every known bin plus the command and alert logs.
///
/// Each `apply_*` call is one read-modify-write of a single field group;
/// callers sharing a store across tasks hold the lock for exactly one call.
#[derive(Debug, Default)]
pub struct BinStore {
    config: AggregatorConfig,
    bins: HashMap<String, Bin>,
    order: Vec<String>,
    commands: EventLog<Command>,
    alerts: EventLog<Alert>,
}

impl BinStore {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Drop all bins and logs, keeping the configuration
    pub fn reset(&mut self) {
        self.bins.clear();
        self.order.clear();
        self.commands.clear();
        self.alerts.clear();
        BINS_TRACKED.set(0.0);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, bin_id: &str) -> Option<&Bin> {
        self.bins.get(bin_id)
    }

    pub fn contains(&self, bin_id: &str) -> bool {
        self.bins.contains_key(bin_id)
    }

    /// Bins in the order they were added
    pub fn bins(&self) -> impl Iterator<Item = &Bin> {
        self.order.iter().filter_map(|id| self.bins.get(id))
    }

    pub fn commands(&self) -> &EventLog<Command> {
        &self.commands
    }

    pub fn alerts(&self) -> &EventLog<Alert> {
        &self.alerts
    }

    pub(crate) fn record_command(&mut self, command: Command) {
        self.commands.append(command);
    }

    /// Log an alert for the bin's current state as if it went out at `sent_at`
    pub(crate) fn backfill_alert(&mut self, bin_id: &str, sent_at: DateTime<Utc>) -> Result<()> {
        let bin = self
            .bins
            .get(bin_id)
            .ok_or_else(|| Error::MissingBin(bin_id.to_string()))?;
        let mut alert = build_alert(bin, bin.status.unwrap_or(BinStatus::Empty));
        alert.sent_at = sent_at;
        self.alerts.append(alert);
        Ok(())
    }

    pub fn add_bin(&mut self, new_bin: NewBin) -> Result<&Bin> {
        validate_new_bin(&new_bin, self.config.max_distance_cm)?;

        let id = match new_bin.id {
            Some(id) if self.bins.contains_key(&id) => return Err(Error::DuplicateBin(id)),
            Some(id) => id,
            None => self.next_bin_id(),
        };

        let name = new_bin
            .name
            .unwrap_or_else(|| format!("Bin {}", self.order.len() + 1));
        let garbage_level = new_bin.garbage_level.map(|value| GarbageLevel {
            value,
            unit: new_bin.unit,
        });

        let bin = Bin {
            id: id.clone(),
            name,
            unit: new_bin.unit,
            status: garbage_level.as_ref().map(derive_status),
            garbage_level,
            temperature: new_bin.temperature.filter(|v| usable(*v)),
            pressure: new_bin.pressure.filter(|v| usable(*v)),
            location: new_bin.location,
            last_updated: Utc::now(),
            installation_date: new_bin.installation_date,
            zone: new_bin.zone,
            notes: new_bin.notes,
        };

        info!("Added bin {} ({})", bin.id, bin.name);
        self.order.push(id.clone());
        self.bins.insert(id.clone(), bin);
        BINS_TRACKED.set(self.order.len() as f64);

        self.bins
            .get(&id)
            .ok_or_else(|| Error::MissingBin(id.clone()))
    }

    /// Route a feed reading to the matching field-group update
    pub fn apply(&mut self, reading: &SensorReading) -> Result<()> {
        match reading {
            SensorReading::Distance {
                bin_id,
                distance_cm,
            } => self.apply_distance_reading(bin_id, *distance_cm).map(|_| ()),
            SensorReading::Temperature { bin_id, celsius } => {
                self.apply_temperature_reading(bin_id, *celsius)
            }
            SensorReading::Pressure { bin_id, hpa } => self.apply_pressure_reading(bin_id, *hpa),
            SensorReading::Gps { bin_id, location } => {
                self.apply_gps_reading(bin_id, location.latitude, location.longitude)
            }
        }
    }

    pub fn apply_distance_reading(&mut self, bin_id: &str, distance_cm: f64) -> Result<BinStatus> {
        if !distance_cm.is_finite() || distance_cm < 0.0 {
            return Err(Error::MalformedReading(format!(
                "distance {} cm for bin {}",
                distance_cm, bin_id
            )));
        }

        if !self.bins.contains_key(bin_id) {
            if !self.config.auto_register {
                return Err(Error::MissingBin(bin_id.to_string()));
            }
            self.add_bin(NewBin {
                id: Some(bin_id.to_string()),
                ..NewBin::default()
            })?;
        }

        let max_distance = self.config.max_distance_cm;
        self.update(bin_id, |bin| {
            let value = match bin.unit {
                LevelUnit::Percentage => fill_percentage(distance_cm, max_distance),
                LevelUnit::Cm => distance_cm,
            };
            bin.garbage_level = Some(GarbageLevel {
                value,
                unit: bin.unit,
            });
        })
        .and_then(|status| status.ok_or_else(|| Error::MissingBin(bin_id.to_string())))
    }

    pub fn apply_temperature_reading(&mut self, bin_id: &str, celsius: f64) -> Result<()> {
        self.ensure_known(bin_id)?;
        if !usable(celsius) {
            return Err(Error::MalformedReading(format!(
                "temperature {} for bin {}",
                celsius, bin_id
            )));
        }
        self.update(bin_id, |bin| bin.temperature = Some(celsius))
            .map(|_| ())
    }

    pub fn apply_pressure_reading(&mut self, bin_id: &str, hpa: f64) -> Result<()> {
        self.ensure_known(bin_id)?;
        if !usable(hpa) {
            return Err(Error::MalformedReading(format!(
                "pressure {} for bin {}",
                hpa, bin_id
            )));
        }
        self.update(bin_id, |bin| bin.pressure = Some(hpa)).map(|_| ())
    }

    pub fn apply_gps_reading(&mut self, bin_id: &str, latitude: f64, longitude: f64) -> Result<()> {
        self.ensure_known(bin_id)?;
        if !usable(latitude) || !usable(longitude) {
            return Err(Error::MalformedReading(format!(
                "gps fix ({}, {}) for bin {}",
                latitude, longitude, bin_id
            )));
        }
        self.update(bin_id, |bin| {
            bin.location = Some(Location {
                latitude,
                longitude,
            })
        })
        .map(|_| ())
    }

    /// Mutate one bin, then re-derive its status and raise an alert when it
    /// climbs into a fuller tier. Returns the status after the update.
    pub(crate) fn update<F>(&mut self, bin_id: &str, mutate: F) -> Result<Option<BinStatus>>
    where
        F: FnOnce(&mut Bin),
    {
        let bin = self
            .bins
            .get_mut(bin_id)
            .ok_or_else(|| Error::MissingBin(bin_id.to_string()))?;

        let previous = bin.status;
        mutate(bin);
        bin.status = bin.garbage_level.as_ref().map(derive_status);
        bin.last_updated = Utc::now();

        let current = bin.status;
        if current != previous {
            debug!("Bin {} status {:?} -> {:?}", bin_id, previous, current);
        }

        let alert = match current {
            Some(status) if status != BinStatus::Empty && current > previous => {
                Some(build_alert(bin, status))
            }
            _ => None,
        };
        if let Some(alert) = alert {
            info!("Alert: {}", alert.message);
            ALERTS_TOTAL.inc();
            self.alerts.append(alert);
        }

        Ok(current)
    }

    fn ensure_known(&self, bin_id: &str) -> Result<()> {
        if self.bins.contains_key(bin_id) {
            Ok(())
        } else {
            Err(Error::MissingBin(bin_id.to_string()))
        }
    }

    fn next_bin_id(&self) -> String {
        let mut n = self.order.len() + 1;
        loop {
            let candidate = format!("bin{:03}", n);
            if !self.bins.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn build_alert(bin: &Bin, status: BinStatus) -> Alert {
    let tier = match status {
        BinStatus::Full => "is full",
        BinStatus::Half => "is half full",
        BinStatus::Empty => "is empty",
    };
    let level = match bin.garbage_level {
        Some(GarbageLevel {
            value,
            unit: LevelUnit::Percentage,
        }) => format!("{:.0}%", value),
        Some(GarbageLevel {
            value,
            unit: LevelUnit::Cm,
        }) => format!("{:.0} cm", value),
        None => "unknown".to_string(),
    };
    let place = match bin.location {
        Some(loc) => format!("{:.3}°N, {:.3}°E", loc.latitude, loc.longitude),
        None => "unknown location".to_string(),
    };

    Alert {
        id: Uuid::new_v4(),
        bin_id: bin.id.clone(),
        bin_name: bin.name.clone(),
        message: format!("{} {} - {} garbage level at {}", bin.name, tier, level, place),
        sent_at: Utc::now(),
        status: CommandStatus::Sent,
    }
}
