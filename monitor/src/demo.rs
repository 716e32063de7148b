use crate::aggregator::BinStore;
use crate::errors::Result;
use crate::model::{LevelUnit, Location, NewBin};
use chrono::{Duration, TimeZone, Utc};
use tracing::info;

struct DemoBin {
    id: &'static str,
    name: &'static str,
    level: f64,
    unit: LevelUnit,
    temperature: f64,
    pressure: f64,
    latitude: f64,
    longitude: f64,
    installed: (i32, u32, u32),
    zone: &'static str,
    notes: &'static str,
}

const DEMO_BINS: [DemoBin; 5] = [
    DemoBin {
        id: "bin001",
        name: "City Center Bin 1",
        level: 25.0,
        unit: LevelUnit::Percentage,
        temperature: 22.5,
        pressure: 1013.2,
        latitude: 40.7128,
        longitude: -74.0060,
        installed: (2023, 1, 15),
        zone: "Downtown",
        notes: "Located near the main entrance of City Hall.",
    },
    DemoBin {
        id: "bin002",
        name: "Park Area Bin 2",
        level: 75.0,
        unit: LevelUnit::Percentage,
        temperature: 24.1,
        pressure: 1012.8,
        latitude: 40.7228,
        longitude: -74.0160,
        installed: (2023, 2, 22),
        zone: "Central Park",
        notes: "High traffic area, may need more frequent collection.",
    },
    DemoBin {
        id: "bin003",
        name: "Shopping Mall Bin 3",
        level: 95.0,
        unit: LevelUnit::Percentage,
        temperature: 26.3,
        pressure: 1011.5,
        latitude: 40.7328,
        longitude: -74.0260,
        installed: (2023, 3, 10),
        zone: "Retail District",
        notes: "Located near food court, mostly food waste.",
    },
    DemoBin {
        id: "bin004",
        name: "Residential Block 4",
        level: 12.0,
        unit: LevelUnit::Cm,
        temperature: 21.8,
        pressure: 1013.9,
        latitude: 40.7428,
        longitude: -74.0360,
        installed: (2023, 4, 5),
        zone: "Residential Area",
        notes: "Mixed waste collection point.",
    },
    DemoBin {
        id: "bin005",
        name: "School Zone Bin 5",
        level: 5.0,
        unit: LevelUnit::Cm,
        temperature: 23.4,
        pressure: 1012.1,
        latitude: 40.7528,
        longitude: -74.0460,
        installed: (2023, 5, 20),
        zone: "Education District",
        notes: "Recycling bin for paper and plastic.",
    },
];

/// Alert history as (bin, minutes ago)
const DEMO_ALERTS: [(&str, i64); 4] = [
    ("bin003", 30),
    ("bin002", 3 * 60),
    ("bin005", 24 * 60),
    ("bin001", 48 * 60),
];

/// Fill an empty store with the five dashboard fixture bins and a short
/// alert history
pub fn seed_demo_bins(store: &mut BinStore) -> Result<()> {
    for demo in &DEMO_BINS {
        let (year, month, day) = demo.installed;
        store.add_bin(NewBin {
            id: Some(demo.id.to_string()),
            name: Some(demo.name.to_string()),
            unit: demo.unit,
            garbage_level: Some(demo.level),
            temperature: Some(demo.temperature),
            pressure: Some(demo.pressure),
            location: Some(Location {
                latitude: demo.latitude,
                longitude: demo.longitude,
            }),
            installation_date: Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single(),
            zone: Some(demo.zone.to_string()),
            notes: Some(demo.notes.to_string()),
        })?;
    }

    let now = Utc::now();
    for (bin_id, minutes_ago) in DEMO_ALERTS {
        store.backfill_alert(bin_id, now - Duration::minutes(minutes_ago))?;
    }

    info!(
        "Seeded {} demo bins with {} alerts",
        store.len(),
        store.alerts().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::model::BinStatus;

    #[test]
    fn test_seeded_fixture() {
        let mut store = BinStore::new(AggregatorConfig::default());
        seed_demo_bins(&mut store).unwrap();

        let statuses: Vec<_> = store.bins().map(|b| b.status).collect();
        assert_eq!(
            statuses,
            vec![
                Some(BinStatus::Empty),
                Some(BinStatus::Half),
                Some(BinStatus::Full),
                Some(BinStatus::Empty),
                Some(BinStatus::Full),
            ]
        );

        let order: Vec<_> = store
            .alerts()
            .recent()
            .iter()
            .map(|a| a.bin_id.clone())
            .collect();
        assert_eq!(order, vec!["bin003", "bin002", "bin005", "bin001"]);
        assert!(store.alerts().recent()[0]
            .message
            .starts_with("Shopping Mall Bin 3 is full - 95%"));
    }

    #[test]
    fn test_seeding_twice_conflicts() {
        let mut store = BinStore::new(AggregatorConfig::default());
        seed_demo_bins(&mut store).unwrap();
        assert!(seed_demo_bins(&mut store).is_err());
    }
}
