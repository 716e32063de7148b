//! Smart waste bin monitor.
//!
//! Merges independently arriving sensor readings (ultrasonic distance, BMP
//! temperature and pressure, GPS) into per-bin records, classifies each bin
//! as empty / half / full, and simulates compress and status-refresh
//! commands over an unreliable link.
//!
//! - [`aggregator`] - bin store and status derivation
//! - [`commands`] - command simulator and its effect on bins
//! - [`transport`] - outbound command delivery
//! - [`mqtt`] / [`ingest`] - sensor feed adapter and the loop applying it
//! - [`rest`] - HTTP surface for dashboards

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod demo;
pub mod errors;
pub mod ingest;
pub mod log;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod transport;
pub mod validate;

pub use aggregator::{derive_status, BinStore, SharedStore};
pub use commands::CommandSimulator;
pub use errors::{Error, Result};
