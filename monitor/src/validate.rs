use crate::errors::{Error, Result};
use crate::model::{LevelUnit, Location, NewBin, SensorReading};
use serde_json::Value;

const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 100.0;
const PRESSURE_MIN: f64 = 300.0;
const PRESSURE_MAX: f64 = 1100.0;
const DISTANCE_MAX: f64 = 400.0;
const NAME_MIN_CHARS: usize = 2;

/// Feed channel a topic belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedGroup {
    Ultrasonic,
    Bmp,
    Gps,
}

impl FeedGroup {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "ultrasonic" => Some(FeedGroup::Ultrasonic),
            "bmp" => Some(FeedGroup::Bmp),
            "gps" => Some(FeedGroup::Gps),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedGroup::Ultrasonic => "ultrasonic",
            FeedGroup::Bmp => "bmp",
            FeedGroup::Gps => "gps",
        }
    }
}

/// Split `devices/<bin_id>/<group>` into its parts
pub fn parse_topic(topic: &str) -> Option<(&str, FeedGroup)> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("devices"), Some(bin_id), Some(group), None) if !bin_id.is_empty() => {
            FeedGroup::from_segment(group).map(|g| (bin_id, g))
        }
        _ => None,
    }
}

/// Read a number that may arrive as a JSON number or a numeric string
pub fn numeric(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Non-zero variant of [`numeric`]; zero means the sensor had nothing to say
fn present(value: Option<&Value>) -> Option<f64> {
    numeric(value).filter(|v| *v != 0.0)
}

/// Turn one snapshot payload into the readings it carries.
///
/// Fields that are missing, zero or non-numeric are skipped so a sparse
/// payload never erases a known value. A payload that yields nothing at all
/// is reported as malformed.
pub fn readings_from_payload(
    bin_id: &str,
    group: FeedGroup,
    payload: &Value,
) -> Result<Vec<SensorReading>> {
    let mut readings = Vec::new();

    match group {
        FeedGroup::Ultrasonic => {
            if let Some(distance_cm) = numeric(payload.get("distance_cm")) {
                validate_distance(distance_cm)?;
                readings.push(SensorReading::Distance {
                    bin_id: bin_id.to_string(),
                    distance_cm,
                });
            }
        }
        FeedGroup::Bmp => {
            if let Some(celsius) = present(payload.get("temperature")) {
                validate_temperature(celsius)?;
                readings.push(SensorReading::Temperature {
                    bin_id: bin_id.to_string(),
                    celsius,
                });
            }
            if let Some(hpa) = present(payload.get("pressure")) {
                validate_pressure(hpa)?;
                readings.push(SensorReading::Pressure {
                    bin_id: bin_id.to_string(),
                    hpa,
                });
            }
        }
        FeedGroup::Gps => {
            let latitude = present(payload.get("latitude"));
            let longitude = present(payload.get("longitude"));
            if let (Some(latitude), Some(longitude)) = (latitude, longitude) {
                validate_location(latitude, longitude)?;
                readings.push(SensorReading::Gps {
                    bin_id: bin_id.to_string(),
                    location: Location {
                        latitude,
                        longitude,
                    },
                });
            }
        }
    }

    if readings.is_empty() {
        return Err(Error::MalformedReading(format!(
            "no usable {} fields for bin {}",
            group.as_str(),
            bin_id
        )));
    }

    Ok(readings)
}

fn validate_distance(distance_cm: f64) -> Result<()> {
    if !(0.0..=DISTANCE_MAX).contains(&distance_cm) {
        return Err(Error::MalformedReading(format!(
            "Distance {} out of range [0, {}]",
            distance_cm, DISTANCE_MAX
        )));
    }
    Ok(())
}

fn validate_temperature(celsius: f64) -> Result<()> {
    if !(TEMP_MIN..=TEMP_MAX).contains(&celsius) {
        return Err(Error::MalformedReading(format!(
            "Temperature {} out of range [{}, {}]",
            celsius, TEMP_MIN, TEMP_MAX
        )));
    }
    Ok(())
}

fn validate_pressure(hpa: f64) -> Result<()> {
    if !(PRESSURE_MIN..=PRESSURE_MAX).contains(&hpa) {
        return Err(Error::MalformedReading(format!(
            "Pressure {} out of range [{}, {}]",
            hpa, PRESSURE_MIN, PRESSURE_MAX
        )));
    }
    Ok(())
}

/// Reject bins registered with a blank name, impossible coordinates or a
/// level outside what the bin's unit can hold
pub fn validate_new_bin(new_bin: &NewBin, max_distance_cm: f64) -> Result<()> {
    if let Some(name) = &new_bin.name {
        if name.trim().chars().count() < NAME_MIN_CHARS {
            return Err(Error::MalformedReading(format!(
                "Bin name '{}' shorter than {} characters",
                name, NAME_MIN_CHARS
            )));
        }
    }

    if let Some(location) = &new_bin.location {
        validate_location(location.latitude, location.longitude)?;
    }

    if let Some(level) = new_bin.garbage_level {
        let max = match new_bin.unit {
            LevelUnit::Percentage => 100.0,
            LevelUnit::Cm => max_distance_cm,
        };
        if !(0.0..=max).contains(&level) {
            return Err(Error::MalformedReading(format!(
                "Garbage level {} out of range [0, {}]",
                level, max
            )));
        }
    }
    Ok(())
}

fn validate_location(latitude: f64, longitude: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::MalformedReading(format!(
            "Location ({}, {}) out of range",
            latitude, longitude
        )));
    }
    Ok(())
}
