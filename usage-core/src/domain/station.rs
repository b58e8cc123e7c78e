use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::MeterState;

/// Descriptive fields of a station, as carried by the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationAttributes {
    pub name: Option<String>,
    pub status: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// IANA zone identifier.
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationDocument {
    #[serde(flatten)]
    pub attributes: StationAttributes,
    #[serde(default)]
    pub meters: Vec<String>,
}

impl StationDocument {
    /// Fields read back when a station is loaded.
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "status",
        "street_address",
        "city",
        "state",
        "zip_code",
        "timezone",
        "meters",
    ];
}

/// Assign `value` into `slot` if different. Returns whether it changed.
pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationState {
    id: String,
    attributes: StationAttributes,
    meters: HashMap<String, MeterState>,
    /// Meter ids the persisted document lists, including evicted ones.
    meter_refs: BTreeSet<String>,
    dirty: bool,
    last_seen_cycle: u64,
}

impl StationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: StationAttributes::default(),
            meters: HashMap::new(),
            meter_refs: BTreeSet::new(),
            dirty: false,
            last_seen_cycle: 0,
        }
    }

    pub fn from_document(id: impl Into<String>, doc: StationDocument) -> Self {
        Self {
            id: id.into(),
            attributes: doc.attributes,
            meters: HashMap::new(),
            meter_refs: doc.meters.into_iter().collect(),
            dirty: false,
            last_seen_cycle: 0,
        }
    }

    pub fn to_document(&self) -> StationDocument {
        StationDocument {
            attributes: self.attributes.clone(),
            meters: self.meter_refs.iter().cloned().collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attributes(&self) -> &StationAttributes {
        &self.attributes
    }

    pub fn timezone(&self) -> Option<&str> {
        self.attributes.timezone.as_deref()
    }

    /// Field-by-field reconcile. Returns true if anything changed.
    pub fn update(&mut self, new: StationAttributes) -> bool {
        let StationAttributes {
            name,
            status,
            street_address,
            city,
            state,
            zip_code,
            timezone,
        } = new;
        let a = &mut self.attributes;

        let mut changed = false;
        changed |= assign(&mut a.name, name);
        changed |= assign(&mut a.status, status);
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

    pub fn meter(&self, id: &str) -> Option<&MeterState> {
        self.meters.get(id)
    }

    pub fn meter_mut(&mut self, id: &str) -> Option<&mut MeterState> {
        self.meters.get_mut(id)
    }

    pub fn meters(&self) -> impl Iterator<Item = &MeterState> {
        self.meters.values()
    }

    /// Adopt a meter. A meter the persisted document did not list makes the
    /// station dirty.
    pub fn insert_meter(&mut self, meter: MeterState) -> &mut MeterState {
        if self.meter_refs.insert(meter.id().to_string()) {
            self.dirty = true;
        }
        let id = meter.id().to_string();
        self.meters.entry(id).or_insert(meter)
    }

    /// Drop in-memory meters last seen before `cutoff` that have nothing
    /// unwritten. Their ids stay referenced. Returns how many were dropped.
    pub fn evict_meters(&mut self, cutoff: u64) -> usize {
        let before = self.meters.len();
        self.meters
            .retain(|_, m| m.is_dirty() || m.last_seen_cycle() >= cutoff);
        before - self.meters.len()
    }

    pub fn meter_count(&self) -> usize {
        self.meters.len()
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

    fn attrs(name: &str, status: &str) -> StationAttributes {
        StationAttributes {
            name: Some(name.to_string()),
            status: Some(status.to_string()),
            city: Some("Oakland".to_string()),
            timezone: Some("America/Los_Angeles".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn update_sets_dirty_only_on_change() {
        let mut s = StationState::new("st-1");
        assert!(s.update(attrs("Lot A", "active")));
        assert!(s.is_dirty());
        s.mark_clean();

        assert!(!s.update(attrs("Lot A", "active")));
        assert!(!s.is_dirty());

        assert!(s.update(attrs("Lot A", "offline")));
        assert_eq!(s.attributes().status.as_deref(), Some("offline"));
        assert!(s.is_dirty());
    }

    #[test]
    fn timezone_compared_by_identifier() {
        let mut s = StationState::new("st-1");
        s.update(attrs("Lot A", "active"));
        s.mark_clean();

        // Same offset, different zone.
        let mut other = attrs("Lot A", "active");
        other.timezone = Some("America/Vancouver".to_string());
        assert!(s.update(other));
    }

    #[test]
    fn new_meter_reference_dirties_station() {
        let doc = StationDocument {
            attributes: attrs("Lot A", "active"),
            meters: vec!["m-1".to_string()],
        };
        let mut s = StationState::from_document("st-1", doc);

        s.insert_meter(MeterState::new("m-1"));
        assert!(!s.is_dirty());

        s.insert_meter(MeterState::new("m-2"));
        assert!(s.is_dirty());
        assert_eq!(s.to_document().meters, vec!["m-1".to_string(), "m-2".to_string()]);
    }

    #[test]
    fn eviction_keeps_dirty_and_recent_meters() {
        let mut s = StationState::new("st-1");
        s.insert_meter(MeterState::new("old")).touch(1);
        s.insert_meter(MeterState::new("recent")).touch(9);

        let mut dirty = MeterState::new("dirty");
        dirty.apply(Some("idle"), Some("available"), time::macros::datetime!(2024-01-01 00:00:00 UTC), None);
        s.insert_meter(dirty).touch(1);

        assert_eq!(s.evict_meters(5), 1);
        assert!(s.meter("old").is_none());
        assert!(s.meter("recent").is_some());
        assert!(s.meter("dirty").is_some());
        assert!(s.to_document().meters.contains(&"old".to_string()));
    }

    #[test]
    fn document_flattens_attributes() {
        let mut s = StationState::new("st-1");
        s.update(attrs("Lot A", "active"));
        s.insert_meter(MeterState::new("m-1"));

        let json = serde_json::to_value(s.to_document()).unwrap();
        assert_eq!(json["name"], "Lot A");
        assert_eq!(json["timezone"], "America/Los_Angeles");
        assert_eq!(json["meters"], serde_json::json!(["m-1"]));
    }
}
