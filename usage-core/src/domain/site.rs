use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::station::assign;
use super::StationState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteAttributes {
    pub name: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteDocument {
    #[serde(flatten)]
    pub attributes: SiteAttributes,
    #[serde(default)]
    pub stations: Vec<String>,
}

impl SiteDocument {
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "street_address",
        "city",
        "state",
        "zip_code",
        "timezone",
        "stations",
    ];
}

/// A physical site and the stations it hosts.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteState {
    id: String,
    attributes: SiteAttributes,
    stations: HashMap<String, StationState>,
    station_refs: BTreeSet<String>,
    dirty: bool,
    last_seen_cycle: u64,
}

impl SiteState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: SiteAttributes::default(),
            stations: HashMap::new(),
            station_refs: BTreeSet::new(),
            dirty: false,
            last_seen_cycle: 0,
        }
    }

    pub fn from_document(id: impl Into<String>, doc: SiteDocument) -> Self {
        Self {
            id: id.into(),
            attributes: doc.attributes,
            stations: HashMap::new(),
            station_refs: doc.stations.into_iter().collect(),
            dirty: false,
            last_seen_cycle: 0,
        }
    }

    pub fn to_document(&self) -> SiteDocument {
        SiteDocument {
            attributes: self.attributes.clone(),
            stations: self.station_refs.iter().cloned().collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &SiteAttributes {
        &self.attributes
    }

    pub fn timezone(&self) -> Option<&str> {
        self.attributes.timezone.as_deref()
    }

    pub fn update(&mut self, new: SiteAttributes) -> bool {
        let SiteAttributes {
            name,
            street_address,
            city,
            state,
            zip_code,
            timezone,
        } = new;
        let a = &mut self.attributes;

        let mut changed = false;
        changed |= assign(&mut a.name, name);
        changed |= assign(&mut a.street_address, street_address);
        changed |= assign(&mut a.city, city);
        changed |= assign(&mut a.state, state);
        changed |= assign(&mut a.zip_code, zip_code);
        changed |= assign(&mut a.timezone, timezone);

        if changed {
            self.dirty = true;
        }
        changed
    }

    pub fn station(&self, id: &str) -> Option<&StationState> {
        self.stations.get(id)
    }

    pub fn station_mut(&mut self, id: &str) -> Option<&mut StationState> {
        self.stations.get_mut(id)
    }

    pub fn stations(&self) -> impl Iterator<Item = &StationState> {
        self.stations.values()
    }

    pub fn stations_mut(&mut self) -> impl Iterator<Item = &mut StationState> {
        self.stations.values_mut()
    }

    pub fn insert_station(&mut self, station: StationState) -> &mut StationState {
        if self.station_refs.insert(station.id().to_string()) {
            self.dirty = true;
        }
        let id = station.id().to_string();
        self.stations.entry(id).or_insert(station)
    }

    /// Detach a station that now reports under another site. Dropping the
    /// reference marks this site dirty.
    pub fn take_station(&mut self, id: &str) -> Option<StationState> {
        let station = self.stations.remove(id)?;
        if self.station_refs.remove(id) {
            self.dirty = true;
        }
        Some(station)
    }

    /// Evict stale meters, then stations that are stale, clean and empty.
    /// Returns `(stations, meters)` dropped.
    pub fn evict(&mut self, cutoff: u64) -> (usize, usize) {
        let mut meters = 0;
        for station in self.stations.values_mut() {
            meters += station.evict_meters(cutoff);
        }
        let before = self.stations.len();
        self.stations.retain(|_, s| {
            s.is_dirty() || s.last_seen_cycle() >= cutoff || s.meter_count() > 0
        });
        (before - self.stations.len(), meters)
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn last_seen_cycle(&self) -> u64 {
        self.last_seen_cycle
    }

    pub fn touch(&mut self, cycle: u64) {
        self.last_seen_cycle = cycle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_station_drops_the_reference() {
        let mut site = SiteState::new("s-1");
        site.insert_station(StationState::new("st-1"));
        site.mark_clean();

        let taken = site.take_station("st-1").unwrap();
        assert_eq!(taken.id(), "st-1");
        assert!(site.is_dirty());
        assert!(site.to_document().stations.is_empty());
        assert!(site.take_station("st-1").is_none());
    }

    #[test]
    fn update_and_station_refs() {
        let mut site = SiteState::new("s-1");
        assert!(site.update(SiteAttributes {
            name: Some("Mall".into()),
            city: Some("Fresno".into()),
            ..Default::default()
        }));
        site.mark_clean();

        site.insert_station(StationState::new("st-1"));
        assert!(site.is_dirty());
        site.mark_clean();

        // Re-inserting an existing station keeps the first instance.
        site.station_mut("st-1").unwrap().touch(4);
        site.insert_station(StationState::new("st-1"));
        assert!(!site.is_dirty());
        assert_eq!(site.station("st-1").unwrap().last_seen_cycle(), 4);
    }

    #[test]
    fn evict_drops_empty_stale_stations() {
        let mut site = SiteState::new("s-1");
        site.insert_station(StationState::new("st-old")).touch(1);
        site.insert_station(StationState::new("st-new")).touch(10);

        assert_eq!(site.evict(5), (1, 0));
        assert!(site.station("st-old").is_none());
        assert_eq!(site.to_document().stations.len(), 2);
    }
}
