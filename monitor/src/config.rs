use crate::aggregator::{AggregatorConfig, DEFAULT_MAX_DISTANCE_CM};
use crate::commands::DEFAULT_LATENCY_MS;
use crate::errors::{Error, Result};
use crate::transport::DEFAULT_SUCCESS_RATE;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Lossy in-process link, no hardware required
    Simulated,
    /// Publish to the bin's command topic on the broker
    Mqtt,
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(TransportKind::Simulated),
            "mqtt" => Ok(TransportKind::Mqtt),
            other => Err(Error::Config(format!("unknown command transport '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub http_addr: String,
    pub channel_capacity: usize,
    pub aggregator: AggregatorConfig,
    pub command_latency: Duration,
    pub command_success_rate: f64,
    pub command_transport: TransportKind,
    pub rng_seed: Option<u64>,
    /// Start with the dashboard fixture bins instead of an empty store
    pub seed_demo_bins: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let command_success_rate = parse_or(&lookup, "COMMAND_SUCCESS_RATE", DEFAULT_SUCCESS_RATE);
        if !(0.0..=1.0).contains(&command_success_rate) {
            return Err(Error::Config(format!(
                "COMMAND_SUCCESS_RATE {} outside [0, 1]",
                command_success_rate
            )));
        }

        let max_distance_cm = parse_or(&lookup, "MAX_DISTANCE_CM", DEFAULT_MAX_DISTANCE_CM);
        if !(max_distance_cm.is_finite() && max_distance_cm > 0.0) {
            return Err(Error::Config(format!(
                "MAX_DISTANCE_CM {} must be positive",
                max_distance_cm
            )));
        }

        let channel_capacity = parse_or(&lookup, "CHANNEL_CAPACITY", 10_000);
        if channel_capacity == 0 {
            return Err(Error::Config("CHANNEL_CAPACITY must be at least 1".to_string()));
        }

        let command_transport = match lookup("COMMAND_TRANSPORT") {
            Some(value) => value.parse()?,
            None => TransportKind::Simulated,
        };

        Ok(Self {
            mqtt_broker: lookup("MQTT_BROKER").unwrap_or_else(|| "localhost".to_string()),
            mqtt_port: parse_or(&lookup, "MQTT_PORT", 1883),
            http_addr: lookup("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            channel_capacity,
            aggregator: AggregatorConfig {
                max_distance_cm,
                auto_register: parse_or(&lookup, "AUTO_REGISTER_BINS", true),
            },
            command_latency: Duration::from_millis(parse_or(
                &lookup,
                "COMMAND_LATENCY_MS",
                DEFAULT_LATENCY_MS,
            )),
            command_success_rate,
            command_transport,
            rng_seed: lookup("RNG_SEED").and_then(|v| v.parse().ok()),
            seed_demo_bins: parse_or(&lookup, "SEED_DEMO_BINS", false),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={}", key, raw);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mqtt_broker, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.aggregator.max_distance_cm, 40.0);
        assert!(config.aggregator.auto_register);
        assert_eq!(config.command_latency, Duration::from_millis(1500));
        assert_eq!(config.command_success_rate, 0.8);
        assert_eq!(config.command_transport, TransportKind::Simulated);
        assert_eq!(config.rng_seed, None);
        assert!(!config.seed_demo_bins);
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let config = config_from(&[
            ("MQTT_PORT", "not-a-port"),
            ("COMMAND_LATENCY_MS", "0"),
            ("AUTO_REGISTER_BINS", "false"),
            ("COMMAND_TRANSPORT", "MQTT"),
            ("RNG_SEED", "42"),
            ("SEED_DEMO_BINS", "true"),
        ])
        .unwrap();
        assert_eq!(config.mqtt_port, 1883);
        assert!(config.command_latency.is_zero());
        assert!(!config.aggregator.auto_register);
        assert_eq!(config.command_transport, TransportKind::Mqtt);
        assert_eq!(config.rng_seed, Some(42));
        assert!(config.seed_demo_bins);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("COMMAND_SUCCESS_RATE", "1.2")]).is_err());
        assert!(config_from(&[("MAX_DISTANCE_CM", "-3")]).is_err());
        assert!(config_from(&[("COMMAND_TRANSPORT", "pigeon")]).is_err());
        assert!(config_from(&[("CHANNEL_CAPACITY", "0")]).is_err());
        assert!(config_from(&[("MAX_DISTANCE_CM", "NaN")]).is_err());
        assert!(config_from(&[("MAX_DISTANCE_CM", "inf")]).is_err());
    }
}
