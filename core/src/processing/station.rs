use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};

/// A station and the storage target its uploads land in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationEntry {
    pub station_id: String,
    pub storage_target: String,
}

/// Known stations, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationRegistry {
    stations: BTreeMap<String, StationEntry>,
}

impl StationRegistry {
    pub fn new(entries: impl IntoIterator<Item = StationEntry>) -> Self {
        Self {
            stations: entries
                .into_iter()
                .map(|entry| (entry.station_id.clone(), entry))
                .collect(),
        }
    }

    pub fn insert(&mut self, entry: StationEntry) {
        self.stations.insert(entry.station_id.clone(), entry);
    }

    pub fn storage_target(&self, station_id: &str) -> CoreResult<&str> {
        self.stations
            .get(station_id)
            .map(|entry| entry.storage_target.as_str())
            .ok_or_else(|| CoreError::UnknownStation(station_id.to_string()))
    }

    pub fn stations(&self) -> impl Iterator<Item = &StationEntry> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stations_are_an_error() {
        let registry = StationRegistry::new([StationEntry {
            station_id: "a".into(),
            storage_target: "west".into(),
        }]);
        assert_eq!(registry.storage_target("a").unwrap(), "west");
        assert!(matches!(
            registry.storage_target("b"),
            Err(CoreError::UnknownStation(id)) if id == "b"
        ));
    }
}
