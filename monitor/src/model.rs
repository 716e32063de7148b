use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a bin reports its fill level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LevelUnit {
    /// Derived fill percentage, 0 = empty, 100 = full
    #[default]
    Percentage,
    /// Raw clearance between sensor and garbage, larger = emptier
    Cm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarbageLevel {
    pub value: f64,
    pub unit: LevelUnit,
}

/// Coarse fill tier used for colouring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinStatus {
    Empty,
    Half,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Current view of one bin. Sensor fields stay `None` until their first reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bin {
    pub id: String,
    pub name: String,
    pub unit: LevelUnit,
    pub garbage_level: Option<GarbageLevel>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub location: Option<Location>,
    pub status: Option<BinStatus>,
    pub last_updated: DateTime<Utc>,
    pub installation_date: Option<DateTime<Utc>>,
    pub zone: Option<String>,
    pub notes: Option<String>,
}

/// Fields accepted by the add-bin action; anything omitted becomes a placeholder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewBin {
    pub id: Option<String>,
    pub name: Option<String>,
    pub unit: LevelUnit,
    pub garbage_level: Option<f64>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub location: Option<Location>,
    pub installation_date: Option<DateTime<Utc>>,
    pub zone: Option<String>,
    pub notes: Option<String>,
}

/// One field-group update from the sensor feed
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Distance { bin_id: String, distance_cm: f64 },
    Temperature { bin_id: String, celsius: f64 },
    Pressure { bin_id: String, hpa: f64 },
    Gps { bin_id: String, location: Location },
}

impl SensorReading {
    pub fn bin_id(&self) -> &str {
        match self {
            SensorReading::Distance { bin_id, .. }
            | SensorReading::Temperature { bin_id, .. }
            | SensorReading::Pressure { bin_id, .. }
            | SensorReading::Gps { bin_id, .. } => bin_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SensorReading::Distance { .. } => "distance",
            SensorReading::Temperature { .. } => "temperature",
            SensorReading::Pressure { .. } => "pressure",
            SensorReading::Gps { .. } => "gps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Compress,
    /// Request a fresh set of readings from the bin
    Status,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Compress => "compress",
            CommandKind::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub bin_id: String,
    pub status: CommandStatus,
    pub sent_at: DateTime<Utc>,
}

impl Command {
    pub fn pending(bin_id: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            bin_id: bin_id.into(),
            status: CommandStatus::Pending,
            sent_at: Utc::now(),
        }
    }

    /// Terminal copy of a pending command
    pub fn resolve(&self, status: CommandStatus) -> Self {
        Self {
            status,
            sent_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Notification raised when a bin climbs into a fuller tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub bin_id: String,
    pub bin_name: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: CommandStatus,
}

/// Anything kept in a time-ordered log
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
    fn bin_id(&self) -> &str;
}

impl Timestamped for Command {
    fn timestamp(&self) -> DateTime<Utc> {
        self.sent_at
    }

    fn bin_id(&self) -> &str {
        &self.bin_id
    }
}

impl Timestamped for Alert {
    fn timestamp(&self) -> DateTime<Utc> {
        self.sent_at
    }

    fn bin_id(&self) -> &str {
        &self.bin_id
    }
}

/// REST API list wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}
