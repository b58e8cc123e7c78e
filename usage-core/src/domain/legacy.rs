use serde::Deserialize;

use super::{DocumentError, MeterDocument, StatDocument, UsageHistogram};

/// Per-meter statistics from the earlier flat-file export.
///
/// Weekly usage there was kept per minute (7 × 1440). Episode starts were
/// never exported, so imported meters begin with no open episode.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMeterStats {
    pub charge_cnt: u64,
    pub avg_charge_duration: f64,
    pub in_use_idle_cnt: u64,
    pub in_use_idle_avg_duration: f64,
    pub weekly_usage: Vec<u64>,
}

impl LegacyMeterStats {
    pub fn into_document(self) -> Result<MeterDocument, DocumentError> {
        let usage = UsageHistogram::from_minute_counts(&self.weekly_usage)?;
        Ok(MeterDocument {
            state: None,
            availability: None,
            anchored: false,
            charging_stat: StatDocument {
                start: None,
                cnt: self.charge_cnt,
                avg: self.avg_charge_duration,
            },
            stopped_stat: StatDocument {
                start: None,
                cnt: self.in_use_idle_cnt,
                avg: self.in_use_idle_avg_duration,
            },
            weekly_usage: usage.counts().to_vec(),
            last_slot: usage.last_slot_touched(),
        })
    }
}
