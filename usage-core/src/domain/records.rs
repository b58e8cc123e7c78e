//! Inbound snapshot records, as published by the public sites feed.
//!
//! Every field is optional and leniently typed: a value of the wrong shape
//! reads as absent. Child arrays stay raw so each child can be rejected on
//! its own; the reconciler decides what a missing identifier or child array
//! means.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

use super::{SiteAttributes, StationAttributes};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub street_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub zip_code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient")]
    pub stations: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StationRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub street_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub zip_code: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient")]
    pub meters: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeterRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub oem_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub availability: Option<String>,
}

/// GeoJSON point.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "lenient")]
    pub coordinates: Option<Vec<f64>>,
}

/// `(lat, lon)` of a record, from GeoJSON `[lon, lat]` order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self.coordinates.as_deref() {
            Some([lon, lat, ..]) => Some(Coordinates { lat: *lat, lon: *lon }),
            _ => None,
        }
    }
}

impl SiteRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.location.as_ref().and_then(Location::coordinates)
    }

    pub fn attributes(&self, timezone: Option<String>) -> SiteAttributes {
        SiteAttributes {
            name: self.name.clone(),
            street_address: self.street_address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip_code.clone(),
            timezone,
        }
    }
}

impl StationRecord {
    pub fn coordinates(&self) -> Option<Coordinates> {
        self.location.as_ref().and_then(Location::coordinates)
    }

    pub fn attributes(&self, timezone: Option<String>) -> StationAttributes {
        StationAttributes {
            name: self.name.clone(),
            status: self.status.clone(),
            street_address: self.street_address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip_code.clone(),
            timezone,
        }
    }
}

/// Accept text published as a string or a number; blanks and anything else
/// are treated as absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A value that does not fit `T` reads as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_ids_and_zip_codes_become_strings() {
        let site: SiteRecord = serde_json::from_value(json!({
            "id": 1234,
            "zip_code": 94607,
            "stations": []
        }))
        .unwrap();
        assert_eq!(site.id.as_deref(), Some("1234"));
        assert_eq!(site.zip_code.as_deref(), Some("94607"));
    }

    #[test]
    fn blank_or_odd_ids_are_absent() {
        let meter: MeterRecord = serde_json::from_value(json!({ "oem_id": "  " })).unwrap();
        assert!(meter.oem_id.is_none());
        let meter: MeterRecord = serde_json::from_value(json!({ "oem_id": { "x": 1 } })).unwrap();
        assert!(meter.oem_id.is_none());
        let meter: MeterRecord = serde_json::from_value(json!({})).unwrap();
        assert!(meter.oem_id.is_none());
    }

    #[test]
    fn coordinates_are_lon_lat() {
        let station: StationRecord = serde_json::from_value(json!({
            "id": "st-1",
            "location": { "type": "Point", "coordinates": [-122.27, 37.80] },
            "meters": []
        }))
        .unwrap();
        assert_eq!(
            station.coordinates(),
            Some(Coordinates { lat: 37.80, lon: -122.27 })
        );
    }

    #[test]
    fn missing_child_array_is_none() {
        let station: StationRecord = serde_json::from_value(json!({ "id": "st-1" })).unwrap();
        assert!(station.meters.is_none());
    }

    #[test]
    fn wrongly_typed_fields_read_as_absent() {
        let station: StationRecord = serde_json::from_value(json!({
            "id": "st-1",
            "name": ["not", "text"],
            "status": 3,
            "location": { "coordinates": ["east", "north"] },
            "meters": "none"
        }))
        .unwrap();
        assert_eq!(station.id.as_deref(), Some("st-1"));
        assert!(station.name.is_none());
        assert_eq!(station.status.as_deref(), Some("3"));
        assert!(station.coordinates().is_none());
        assert!(station.meters.is_none());
    }

    #[test]
    fn child_entries_stay_raw() {
        let site: SiteRecord = serde_json::from_value(json!({
            "id": "s-1",
            "location": "somewhere",
            "stations": [7, { "id": "st-1" }]
        }))
        .unwrap();
        assert!(site.location.is_none());
        assert_eq!(site.stations.map(|s| s.len()), Some(2));
    }

    #[test]
    fn non_object_record_is_rejected() {
        assert!(serde_json::from_value::<MeterRecord>(json!("m-1")).is_err());
    }
}
