//! Snapshot reconciliation: walk one feed snapshot, bring the working set up
//! to date, and write back every entity that changed.

use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use usage_core::{
    anomaly::{Anomaly, RecordLevel},
    db::{load, save, Collection, DocumentStore, StoreError},
    domain::{
        status::is_reported_unknown, Coordinates, MeterDocument, MeterRecord, MeterState, SiteDocument,
        SiteRecord, SiteState, StationDocument, StationRecord, StationState,
    },
    timezone::{TimeZone, TimezoneResolver, ZoneCache},
};

/// One polling cycle's payload: the raw site records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub sites: Vec<Value>,
}

/// In-memory sites, stations and meters known to this process.
#[derive(Debug, Default)]
pub struct WorkingSet {
    sites: HashMap<String, SiteState>,
    /// meter id → (site id, station id)
    meter_index: HashMap<String, (String, String)>,
    cycle: u64,
    zones: ZoneCache,
}

pub type SharedWorkingSet = Arc<RwLock<WorkingSet>>;

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedWorkingSet {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Number of snapshots reconciled so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn site(&self, id: &str) -> Option<&SiteState> {
        self.sites.get(id)
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteState> {
        self.sites.values()
    }

    pub fn meter(&self, id: &str) -> Option<&MeterState> {
        let (site_id, station_id) = self.meter_index.get(id)?;
        self.sites.get(site_id)?.station(station_id)?.meter(id)
    }

    /// Meters with an in-use episode currently open.
    pub fn meters_in_use(&self) -> Vec<&MeterState> {
        let mut meters: Vec<&MeterState> = self
            .sites
            .values()
            .flat_map(|site| site.stations())
            .flat_map(|station| station.meters())
            .filter(|m| m.is_in_use())
            .collect();
        meters.sort_by(|a, b| a.id().cmp(b.id()));
        meters
    }

    /// `(sites, stations, meters)` held in memory.
    pub fn len(&self) -> (usize, usize, usize) {
        let stations = self.sites.values().map(SiteState::station_count).sum();
        (self.sites.len(), stations, self.meter_index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Outcome of one [`NetworkReconciler::ingest`] call.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub cycle: u64,
    pub sites_seen: usize,
    pub stations_seen: usize,
    pub meters_seen: usize,
    pub sites_written: usize,
    pub stations_written: usize,
    pub meters_written: usize,
    pub load_failures: usize,
    pub write_failures: usize,
    pub evicted_sites: usize,
    pub evicted_stations: usize,
    pub evicted_meters: usize,
    pub anomalies: Vec<Anomaly>,
}

impl IngestReport {
    pub fn documents_written(&self) -> usize {
        self.sites_written + self.stations_written + self.meters_written
    }

    pub fn count(&self, kind: &str) -> usize {
        self.anomalies.iter().filter(|a| a.kind() == kind).count()
    }

    fn malformed(&mut self, level: RecordLevel, parent: Option<&str>, reason: &str, record: &dyn std::fmt::Debug) {
        let anomaly = Anomaly::malformed(level, parent, reason);
        tracing::warn!(%anomaly, record = ?record, "skipping malformed record");
        self.anomalies.push(anomaly);
    }
}

/// Drives snapshot reconciliation against a document store.
pub struct NetworkReconciler<S, R> {
    store: S,
    resolver: R,
    /// Cycles an unseen entity stays in memory; 0 keeps everything.
    retention_cycles: u64,
}

impl<S, R> NetworkReconciler<S, R>
where
    S: DocumentStore,
    R: TimezoneResolver,
{
    pub fn new(store: S, resolver: R, retention_cycles: u64) -> Self {
        Self {
            store,
            resolver,
            retention_cycles,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconcile one snapshot observed at `observed_at`.
    ///
    /// Never fails as a whole: malformed records, unreadable documents and
    /// failed writes are counted in the report and the batch continues.
    pub async fn ingest(&self, set: &mut WorkingSet, snapshot: &Snapshot, observed_at: OffsetDateTime) -> IngestReport {
        set.cycle += 1;
        let mut report = IngestReport {
            cycle: set.cycle,
            ..Default::default()
        };

        for raw in &snapshot.sites {
            match serde_json::from_value::<SiteRecord>(raw.clone()) {
                Ok(record) => self.ingest_site(set, record, observed_at, &mut report).await,
                Err(e) => report.malformed(RecordLevel::Site, None, &e.to_string(), raw),
            }
        }

        self.sweep(set, &mut report);
        report
    }

    async fn ingest_site(&self, set: &mut WorkingSet, record: SiteRecord, at: OffsetDateTime, report: &mut IngestReport) {
        let Some(site_id) = record.id.clone() else {
            report.malformed(RecordLevel::Site, None, "missing 'id'", &record);
            return;
        };
        report.sites_seen += 1;

        let cycle = set.cycle;
        let WorkingSet {
            sites,
            meter_index,
            zones,
            ..
        } = set;

        if !sites.contains_key(&site_id) {
            let loaded = match load::<SiteDocument, _>(&self.store, Collection::Sites, &site_id, Some(SiteDocument::FIELDS)).await {
                Ok(Some(doc)) => SiteState::from_document(&site_id, doc),
                Ok(None) => SiteState::new(&site_id),
                Err(e) => {
                    self.load_failed(Collection::Sites, &site_id, &e, report);
                    return;
                }
            };
            sites.insert(site_id.clone(), loaded);
        }
        let stations: Option<Vec<(&Value, Result<StationRecord, serde_json::Error>)>> =
            record.stations.as_deref().map(|raw| {
                raw.iter()
                    .map(|v| (v, serde_json::from_value::<StationRecord>(v.clone())))
                    .collect()
            });
        for (_, parsed) in stations.iter().flatten() {
            if let Some(station_id) = parsed.as_ref().ok().and_then(|r| r.id.as_deref()) {
                relocate_station(sites, meter_index, &site_id, station_id);
            }
        }

        let Some(site) = sites.get_mut(&site_id) else {
            return;
        };
        site.touch(cycle);

        let site_zone = self.zone_for(record.coordinates(), zones).ok();
        site.update(record.attributes(site_zone.clone()));

        match stations {
            Some(stations) => {
                for (raw, parsed) in stations {
                    match parsed {
                        Ok(station_record) => {
                            self.ingest_station(
                                site,
                                &station_record,
                                site_zone.as_deref(),
                                zones,
                                meter_index,
                                cycle,
                                at,
                                report,
                            )
                            .await
                        }
                        Err(e) => report.malformed(RecordLevel::Station, Some(&site_id), &e.to_string(), raw),
                    }
                }
            }
            None => report.malformed(RecordLevel::Site, Some(&site_id), "'stations' array not found", &record),
        }

        if site.is_dirty() {
            match save(&self.store, Collection::Sites, &site_id, &site.to_document()).await {
                Ok(()) => {
                    site.mark_clean();
                    report.sites_written += 1;
                }
                Err(e) => self.write_failed(Collection::Sites, &site_id, &e, report),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingest_station(
        &self,
        site: &mut SiteState,
        record: &StationRecord,
        site_zone: Option<&str>,
        zones: &mut ZoneCache,
        meter_index: &mut HashMap<String, (String, String)>,
        cycle: u64,
        at: OffsetDateTime,
        report: &mut IngestReport,
    ) {
        let Some(station_id) = record.id.clone() else {
            report.malformed(RecordLevel::Station, Some(site.id()), "missing 'id'", record);
            return;
        };
        report.stations_seen += 1;

        if site.station(&station_id).is_none() {
            let loaded =
                match load::<StationDocument, _>(&self.store, Collection::Stations, &station_id, Some(StationDocument::FIELDS)).await {
                    Ok(Some(doc)) => StationState::from_document(&station_id, doc),
                    Ok(None) => StationState::new(&station_id),
                    Err(e) => {
                        self.load_failed(Collection::Stations, &station_id, &e, report);
                        return;
                    }
                };
            site.insert_station(loaded);
        }
        let site_id = site.id().to_string();
        let Some(station) = site.station_mut(&station_id) else {
            return;
        };
        station.touch(cycle);

        let station_zone = match self.zone_for(record.coordinates(), zones) {
            Ok(zone) => Some(zone),
            Err(reason) => match site_zone {
                Some(zone) => Some(zone.to_string()),
                None => {
                    let anomaly = Anomaly::TimezoneResolution {
                        level: RecordLevel::Station,
                        id: station_id.clone(),
                        reason,
                    };
                    tracing::debug!(%anomaly, "falling back to UTC");
                    report.anomalies.push(anomaly);
                    None
                }
            },
        };
        station.update(record.attributes(station_zone));
        let zone = station.timezone().and_then(|id| zones.get(id)).cloned();

        match &record.meters {
            Some(meters) => {
                for raw in meters {
                    let meter_record = match serde_json::from_value::<MeterRecord>(raw.clone()) {
                        Ok(meter_record) => meter_record,
                        Err(e) => {
                            report.malformed(RecordLevel::Meter, Some(&station_id), &e.to_string(), raw);
                            continue;
                        }
                    };
                    let Some(meter_id) = meter_record.oem_id.clone() else {
                        report.malformed(RecordLevel::Meter, Some(&station_id), "missing 'oem_id'", &meter_record);
                        continue;
                    };
                    report.meters_seen += 1;

                    if station.meter(&meter_id).is_none() {
                        let Some(loaded) = self.load_meter(&meter_id, report).await else {
                            continue;
                        };
                        station.insert_meter(loaded);
                        meter_index.insert(meter_id.clone(), (site_id.clone(), station_id.clone()));
                    }
                    let Some(meter) = station.meter_mut(&meter_id) else {
                        continue;
                    };
                    meter.touch(cycle);
                    self.apply_meter(meter, &meter_record, at, zone.as_ref(), report).await;
                }
            }
            None => report.malformed(RecordLevel::Station, Some(&site_id), "'meters' array not found", record),
        }

        if station.is_dirty() {
            match save(&self.store, Collection::Stations, &station_id, &station.to_document()).await {
                Ok(()) => {
                    station.mark_clean();
                    report.stations_written += 1;
                }
                Err(e) => self.write_failed(Collection::Stations, &station_id, &e, report),
            }
        }
    }

    async fn load_meter(&self, meter_id: &str, report: &mut IngestReport) -> Option<MeterState> {
        match load::<MeterDocument, _>(&self.store, Collection::Meters, meter_id, None).await {
            Ok(Some(doc)) => match MeterState::from_document(meter_id, doc) {
                Ok(meter) => Some(meter),
                Err(e) => {
                    // The next write replaces the unreadable document.
                    tracing::warn!(meter_id, error = %e, "discarding unreadable meter document");
                    Some(MeterState::new(meter_id))
                }
            },
            Ok(None) => Some(MeterState::new(meter_id)),
            Err(e) => {
                self.load_failed(Collection::Meters, meter_id, &e, report);
                None
            }
        }
    }

    async fn apply_meter(
        &self,
        meter: &mut MeterState,
        record: &MeterRecord,
        at: OffsetDateTime,
        zone: Option<&TimeZone>,
        report: &mut IngestReport,
    ) {
        let (state, availability) = (record.state.as_deref(), record.availability.as_deref());
        if is_reported_unknown(state, availability) {
            tracing::debug!(meter_id = %meter.id(), ?state, ?availability, "feed reports meter data unusable");
        }

        let transition = meter.apply(state, availability, at, zone);
        if let Some(secs) = transition.closed_charging {
            tracing::debug!(meter_id = %meter.id(), duration_secs = secs, "charge episode closed");
        }
        report.anomalies.extend(transition.anomalies);

        if meter.is_dirty() {
            match save(&self.store, Collection::Meters, meter.id(), &meter.to_document()).await {
                Ok(()) => {
                    meter.mark_clean();
                    report.meters_written += 1;
                }
                Err(e) => self.write_failed(Collection::Meters, meter.id(), &e, report),
            }
        }
    }

    /// Zone id for a coordinate, or why there is none.
    fn zone_for(&self, coordinates: Option<Coordinates>, zones: &mut ZoneCache) -> Result<String, String> {
        let Coordinates { lat, lon } = coordinates.ok_or_else(|| "no coordinates".to_string())?;
        let id = self
            .resolver
            .timezone_for(lat, lon)
            .ok_or_else(|| format!("no zone for ({lat}, {lon})"))?;
        if zones.get(&id).is_some() {
            Ok(id)
        } else {
            Err(format!("unknown zone id '{id}'"))
        }
    }

    fn load_failed(&self, collection: Collection, id: &str, err: &StoreError, report: &mut IngestReport) {
        tracing::error!(collection = collection.as_str(), id, error = %err, "document load failed, skipping subtree this cycle");
        report.load_failures += 1;
    }

    fn write_failed(&self, collection: Collection, id: &str, err: &StoreError, report: &mut IngestReport) {
        tracing::error!(collection = collection.as_str(), id, error = %err, "document write failed, will retry next cycle");
        report.write_failures += 1;
    }

    /// Drop entities unseen for `retention_cycles`. Only clean entities are
    /// dropped; their documents reload on the next sighting.
    fn sweep(&self, set: &mut WorkingSet, report: &mut IngestReport) {
        if self.retention_cycles == 0 || set.cycle <= self.retention_cycles {
            return;
        }
        let cutoff = set.cycle - self.retention_cycles;

        for site in set.sites.values_mut() {
            let (stations, meters) = site.evict(cutoff);
            report.evicted_stations += stations;
            report.evicted_meters += meters;
        }
        let before = set.sites.len();
        set.sites
            .retain(|_, s| s.is_dirty() || s.last_seen_cycle() >= cutoff || s.station_count() > 0);
        report.evicted_sites = before - set.sites.len();

        if report.evicted_meters > 0 || report.evicted_stations > 0 || report.evicted_sites > 0 {
            let sites = &set.sites;
            set.meter_index.retain(|meter_id, (site_id, station_id)| {
                sites
                    .get(site_id)
                    .and_then(|s| s.station(station_id))
                    .and_then(|s| s.meter(meter_id))
                    .is_some()
            });
            tracing::info!(
                cutoff,
                sites = report.evicted_sites,
                stations = report.evicted_stations,
                meters = report.evicted_meters,
                "evicted stale entities from working set"
            );
        }
    }
}

/// Move a station the feed now lists under `site_id` out of whichever other
/// in-memory site still holds it, meters included.
fn relocate_station(
    sites: &mut HashMap<String, SiteState>,
    meter_index: &mut HashMap<String, (String, String)>,
    site_id: &str,
    station_id: &str,
) {
    if sites.get(site_id).map_or(true, |site| site.station(station_id).is_some()) {
        return;
    }
    let Some((previous, station)) = sites
        .iter_mut()
        .filter(|(id, _)| id.as_str() != site_id)
        .find_map(|(id, site)| site.take_station(station_id).map(|station| (id.clone(), station)))
    else {
        return;
    };

    tracing::info!(station_id, from = %previous, to = site_id, "station moved to another site");
    for meter in station.meters() {
        meter_index.insert(meter.id().to_string(), (site_id.to_string(), station_id.to_string()));
    }
    if let Some(site) = sites.get_mut(site_id) {
        site.insert_station(station);
    }
}
