use jiff::tz::TimeZone;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::running_stat::EpisodeError;
use super::{classify, truncate_to_second, ChargeCategory, DocumentError, RunningStat, StatDocument, UsageHistogram};
use crate::anomaly::{Anomaly, Episode};
use crate::timezone::local_time;

/// Live statistics for one charging meter.
///
/// A meter only starts tracking once it has been seen idle ("anchored"), so
/// that the first episode it measures has a known beginning.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterState {
    id: String,
    state: Option<String>,
    availability: Option<String>,
    anchored: bool,
    charging_stat: RunningStat,
    stopped_stat: RunningStat,
    usage: UsageHistogram,
    dirty: bool,
    last_seen_cycle: u64,
}

/// Persisted form of a [`MeterState`], stored under the meter id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterDocument {
    pub state: Option<String>,
    pub availability: Option<String>,
    /// Older documents lack this; a stored pair implies it.
    #[serde(default)]
    pub anchored: bool,
    #[serde(default)]
    pub charging_stat: StatDocument,
    #[serde(default)]
    pub stopped_stat: StatDocument,
    #[serde(default)]
    pub weekly_usage: Vec<u64>,
    #[serde(default = "no_slot")]
    pub last_slot: i32,
}

fn no_slot() -> i32 {
    -1
}

/// What a single [`MeterState::apply`] call did.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// False when the update was discarded because the meter is not anchored.
    pub applied: bool,
    pub from: ChargeCategory,
    pub to: ChargeCategory,
    pub closed_charging: Option<i64>,
    pub closed_stopped: Option<i64>,
    pub slot_counted: bool,
    pub anomalies: Vec<Anomaly>,
}

impl MeterState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: None,
            availability: None,
            anchored: false,
            charging_stat: RunningStat::default(),
            stopped_stat: RunningStat::default(),
            usage: UsageHistogram::default(),
            dirty: false,
            last_seen_cycle: 0,
        }
    }

    pub fn from_document(id: impl Into<String>, doc: MeterDocument) -> Result<Self, DocumentError> {
        let usage = if doc.weekly_usage.is_empty() {
            UsageHistogram::default()
        } else {
            UsageHistogram::from_counts(doc.weekly_usage, doc.last_slot)?
        };
        let anchored = doc.anchored || doc.state.is_some() || doc.availability.is_some();
        Ok(Self {
            id: id.into(),
            anchored,
            state: doc.state,
            availability: doc.availability,
            charging_stat: RunningStat::from_document(&doc.charging_stat),
            stopped_stat: RunningStat::from_document(&doc.stopped_stat),
            usage,
            dirty: false,
            last_seen_cycle: 0,
        })
    }

    pub fn to_document(&self) -> MeterDocument {
        MeterDocument {
            state: self.state.clone(),
            availability: self.availability.clone(),
            anchored: self.anchored,
            charging_stat: self.charging_stat.to_document(),
            stopped_stat: self.stopped_stat.to_document(),
            weekly_usage: self.usage.counts().to_vec(),
            last_slot: self.usage.last_slot_touched(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn availability(&self) -> Option<&str> {
        self.availability.as_deref()
    }

    pub fn category(&self) -> ChargeCategory {
        classify(self.state(), self.availability())
    }

    pub fn charging_stat(&self) -> &RunningStat {
        &self.charging_stat
    }

    pub fn stopped_stat(&self) -> &RunningStat {
        &self.stopped_stat
    }

    pub fn usage(&self) -> &UsageHistogram {
        &self.usage
    }

    /// Anchored from the first idle observation on. A later record with no
    /// status pair does not undo it.
    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// A charging (in-use) episode is currently open.
    pub fn is_in_use(&self) -> bool {
        self.charging_stat.is_open()
    }

    /// Seconds the open in-use episode has lasted at `now`; 0 if none.
    pub fn charge_duration(&self, now: OffsetDateTime) -> i64 {
        self.charging_stat
            .episode_start()
            .map(|start| (truncate_to_second(now) - start).whole_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Call only after the document has been written.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn last_seen_cycle(&self) -> u64 {
        self.last_seen_cycle
    }

    pub fn touch(&mut self, cycle: u64) {
        self.last_seen_cycle = cycle;
    }

    /// Apply one observed status at `at` (UTC), bucketing usage in `zone`.
    pub fn apply(
        &mut self,
        new_state: Option<&str>,
        new_availability: Option<&str>,
        at: OffsetDateTime,
        zone: Option<&TimeZone>,
    ) -> Transition {
        let from = self.category();
        let to = classify(new_state, new_availability);
        let mut t = Transition {
            applied: false,
            from,
            to,
            closed_charging: None,
            closed_stopped: None,
            slot_counted: false,
            anomalies: Vec::new(),
        };

        if !self.anchored && to != ChargeCategory::Idle {
            return t;
        }
        t.applied = true;

        let at = truncate_to_second(at);
        let mut mutated = !self.anchored;
        self.anchored = true;

        match (from.is_in_use(), to.is_in_use()) {
            (false, true) => mutated |= self.open(Episode::Charging, at, &mut t),
            (true, false) => {
                t.closed_charging = self.close(Episode::Charging, at, &mut t);
                mutated |= t.closed_charging.is_some();
            }
            _ => {}
        }

        let was_stopped = from == ChargeCategory::InUseStopped;
        let is_stopped = to == ChargeCategory::InUseStopped;
        match (was_stopped, is_stopped) {
            (false, true) => mutated |= self.open(Episode::Stopped, at, &mut t),
            (true, false) => {
                t.closed_stopped = self.close(Episode::Stopped, at, &mut t);
                mutated |= t.closed_stopped.is_some();
            }
            _ => {}
        }

        t.slot_counted = self.usage.record(local_time(at, zone), to);
        mutated |= t.slot_counted;

        if self.state.as_deref() != new_state {
            self.state = new_state.map(str::to_string);
            mutated = true;
        }
        if self.availability.as_deref() != new_availability {
            self.availability = new_availability.map(str::to_string);
            mutated = true;
        }

        if mutated {
            self.dirty = true;
        }
        t
    }

    fn stat_mut(&mut self, episode: Episode) -> &mut RunningStat {
        match episode {
            Episode::Charging => &mut self.charging_stat,
            Episode::Stopped => &mut self.stopped_stat,
        }
    }

    fn open(&mut self, episode: Episode, at: OffsetDateTime, t: &mut Transition) -> bool {
        match self.stat_mut(episode).open(at) {
            Ok(()) => true,
            Err(e) => {
                self.report(episode, e, t);
                false
            }
        }
    }

    fn close(&mut self, episode: Episode, at: OffsetDateTime, t: &mut Transition) -> Option<i64> {
        match self.stat_mut(episode).close(at) {
            Ok(duration) => Some(duration),
            Err(e) => {
                self.report(episode, e, t);
                None
            }
        }
    }

    fn report(&self, episode: Episode, err: EpisodeError, t: &mut Transition) {
        let detail = match err {
            EpisodeError::AlreadyOpen(_) => "opened while already open",
            EpisodeError::NotOpen => "closed without a recorded start",
        };
        let anomaly = Anomaly::DataIntegrity {
            meter_id: self.id.clone(),
            episode,
            detail,
        };
        tracing::warn!(
            meter_id = %self.id,
            %anomaly,
            dump = %self.dump(),
            "data integrity anomaly"
        );
        t.anomalies.push(anomaly);
    }

    /// Full state as JSON, for anomaly reports.
    pub fn dump(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "category": self.category(),
            "dirty": self.dirty,
            "last_seen_cycle": self.last_seen_cycle,
            "document": self.to_document(),
        })
    }
}
