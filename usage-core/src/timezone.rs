//! Zone identifiers and local-calendar conversion.
//!
//! Coordinate lookup is pluggable through [`TimezoneResolver`]; conversion
//! from UTC to a zone's wall clock uses the bundled IANA database.

use std::collections::HashMap;

pub use jiff::tz::TimeZone;
use time::{OffsetDateTime, UtcOffset};

/// Maps a coordinate to an IANA zone identifier such as `America/Chicago`.
pub trait TimezoneResolver: Send + Sync {
    fn timezone_for(&self, lat: f64, lon: f64) -> Option<String>;
}

/// Resolver that answers every coordinate with one configured zone (or none).
#[derive(Debug, Clone, Default)]
pub struct FixedZoneResolver {
    zone: Option<String>,
}

impl FixedZoneResolver {
    pub fn new(zone: Option<String>) -> Self {
        Self { zone }
    }
}

impl TimezoneResolver for FixedZoneResolver {
    fn timezone_for(&self, _lat: f64, _lon: f64) -> Option<String> {
        self.zone.clone()
    }
}

/// Convert a UTC instant to the wall clock of `zone`. Without a zone the
/// instant is passed through unchanged.
pub fn local_time(at: OffsetDateTime, zone: Option<&TimeZone>) -> OffsetDateTime {
    let Some(tz) = zone else {
        return at;
    };
    let Ok(ts) = jiff::Timestamp::from_second(at.unix_timestamp()) else {
        return at;
    };
    match UtcOffset::from_whole_seconds(tz.to_offset(ts).seconds()) {
        Ok(offset) => at.to_offset(offset),
        Err(_) => at,
    }
}

/// Memoised identifier → zone lookups. Unknown identifiers are remembered as
/// `None` so a bad id is only looked up once.
#[derive(Debug, Default)]
pub struct ZoneCache {
    zones: HashMap<String, Option<TimeZone>>,
}

impl ZoneCache {
    pub fn get(&mut self, id: &str) -> Option<&TimeZone> {
        self.zones
            .entry(id.to_string())
            .or_insert_with(|| TimeZone::get(id).ok())
            .as_ref()
    }
}
