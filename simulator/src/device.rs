use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Ultrasonic reading of an empty bin
pub const EMPTY_DISTANCE_CM: f64 = 40.0;
/// The sensor stops resolving anything closer than this
pub const MIN_DISTANCE_CM: f64 = 2.0;

const COMPRESSION_FACTOR: f64 = 0.6;
const BASE_LATITUDE: f64 = 40.7128;
const BASE_LONGITUDE: f64 = -74.0060;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltrasonicSnapshot {
    pub distance_cm: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmpSnapshot {
    pub temperature: f64,
    pub pressure: f64,
    pub timestamp: DateTime<Utc>,
}

/// GPS fixes go out as strings, the way the firmware's NMEA parser emits them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsSnapshot {
    pub latitude: String,
    pub longitude: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

/// LED band the bin's front panel would light for a distance
pub fn led_band(distance_cm: f64) -> &'static str {
    if distance_cm > 40.0 {
        "empty"
    } else if distance_cm > 30.0 {
        "25% full"
    } else if distance_cm > 20.0 {
        "50% full"
    } else if distance_cm > 10.0 {
        "75% full"
    } else {
        "full"
    }
}

/// One simulated bin: ultrasonic sensor, BMP180 and a fixed GPS fix
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub distance_cm: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Device {
    pub fn new(id: String, index: usize, rng: &mut impl Rng) -> Self {
        Self {
            id,
            distance_cm: rng.gen_range(30.0..EMPTY_DISTANCE_CM),
            temperature: rng.gen_range(20.0..30.0),
            pressure: rng.gen_range(1005.0..1020.0),
            latitude: BASE_LATITUDE + index as f64 * 0.01,
            longitude: BASE_LONGITUDE - index as f64 * 0.01,
        }
    }

    /// Advance one sample period: garbage piles up, weather drifts
    pub fn tick(&mut self, rng: &mut impl Rng, fill_rate_cm: f64) {
        if fill_rate_cm > 0.0 {
            self.distance_cm =
                (self.distance_cm - rng.gen_range(0.0..fill_rate_cm)).max(MIN_DISTANCE_CM);
        }
        self.temperature = (self.temperature + rng.gen_range(-0.2..0.2)).clamp(15.0, 35.0);
        self.pressure = (self.pressure + rng.gen_range(-0.3..0.3)).clamp(990.0, 1030.0);
    }

    /// Run the compactor: the filled depth shrinks by 40%
    pub fn compress(&mut self) {
        let depth = (EMPTY_DISTANCE_CM - self.distance_cm).max(0.0);
        self.distance_cm = EMPTY_DISTANCE_CM - depth * COMPRESSION_FACTOR;
    }

    pub fn ultrasonic(&self) -> UltrasonicSnapshot {
        UltrasonicSnapshot {
            distance_cm: (self.distance_cm * 100.0).round() / 100.0,
            timestamp: Utc::now(),
        }
    }

    pub fn bmp(&self) -> BmpSnapshot {
        BmpSnapshot {
            temperature: (self.temperature * 100.0).round() / 100.0,
            pressure: (self.pressure * 100.0).round() / 100.0,
            timestamp: Utc::now(),
        }
    }

    pub fn gps(&self) -> GpsSnapshot {
        GpsSnapshot {
            latitude: format!("{:.6}", self.latitude),
            longitude: format!("{:.6}", self.longitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_tick_fills_but_never_below_minimum() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut device = Device::new("bin001".to_string(), 0, &mut rng);

        let start = device.distance_cm;
        for _ in 0..1000 {
            device.tick(&mut rng, 1.5);
        }
        assert!(device.distance_cm < start);
        assert!(device.distance_cm >= MIN_DISTANCE_CM);
        assert!((15.0..=35.0).contains(&device.temperature));
    }

    #[test]
    fn test_compress_frees_depth() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut device = Device::new("bin001".to_string(), 0, &mut rng);
        device.distance_cm = 5.0;

        device.compress();
        assert!((device.distance_cm - 19.0).abs() < 1e-9);
    }

    #[test]
    fn test_led_bands() {
        assert_eq!(led_band(45.0), "empty");
        assert_eq!(led_band(35.0), "25% full");
        assert_eq!(led_band(20.0), "75% full");
        assert_eq!(led_band(10.0), "full");
    }

    #[test]
    fn test_gps_as_strings() {
        let mut rng = StdRng::seed_from_u64(4);
        let device = Device::new("bin002".to_string(), 1, &mut rng);
        let gps = device.gps();
        assert_eq!(gps.latitude, "40.722800");
        assert_eq!(gps.longitude, "-74.016000");
    }
}
