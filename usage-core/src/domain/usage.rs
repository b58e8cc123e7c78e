use time::OffsetDateTime;

use super::{ChargeCategory, DocumentError};

pub const DAYS_PER_WEEK: usize = 7;
pub const SLOTS_PER_DAY: usize = 144;
pub const SLOT_MINUTES: usize = 10;
pub const WEEKLY_SLOTS: usize = DAYS_PER_WEEK * SLOTS_PER_DAY;
pub const WEEKLY_MINUTES: usize = DAYS_PER_WEEK * SLOTS_PER_DAY * SLOT_MINUTES;

const NO_SLOT: i32 = -1;

/// Weekly popularity histogram: 7 days × 144 ten-minute slots, Monday first,
/// in the meter's local calendar.
///
/// This is a sampling count. Each polling cycle that lands in a slot not yet
/// touched while the meter is in use adds one, so the resolution is bounded
/// by the polling cadence rather than by in-use seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageHistogram {
    weekly_usage: Vec<u64>,
    last_slot_touched: i32,
}

impl Default for UsageHistogram {
    fn default() -> Self {
        Self {
            weekly_usage: vec![0; WEEKLY_SLOTS],
            last_slot_touched: NO_SLOT,
        }
    }
}

/// Slot index of a local wall-clock time.
pub fn slot_index(local: OffsetDateTime) -> usize {
    let day = local.weekday().number_days_from_monday() as usize;
    let minute_of_day = local.hour() as usize * 60 + local.minute() as usize;
    day * SLOTS_PER_DAY + minute_of_day / SLOT_MINUTES
}

impl UsageHistogram {
    pub fn from_counts(weekly_usage: Vec<u64>, last_slot_touched: i32) -> Result<Self, DocumentError> {
        if weekly_usage.len() != WEEKLY_SLOTS {
            return Err(DocumentError::WeeklyUsageLength(weekly_usage.len()));
        }
        if !(NO_SLOT..WEEKLY_SLOTS as i32).contains(&last_slot_touched) {
            return Err(DocumentError::SlotOutOfRange(last_slot_touched));
        }
        Ok(Self {
            weekly_usage,
            last_slot_touched,
        })
    }

    /// Fold a per-minute weekly array (7 × 1440) into ten-minute slots, taking
    /// the busiest minute of each window.
    pub fn from_minute_counts(minutes: &[u64]) -> Result<Self, DocumentError> {
        if minutes.len() != WEEKLY_MINUTES {
            return Err(DocumentError::LegacyUsageLength(minutes.len()));
        }
        let weekly_usage = minutes
            .chunks(SLOT_MINUTES)
            .map(|window| window.iter().copied().max().unwrap_or(0))
            .collect();
        Ok(Self {
            weekly_usage,
            last_slot_touched: NO_SLOT,
        })
    }

    /// Count an observation. Returns true if a slot was incremented.
    pub fn record(&mut self, local: OffsetDateTime, category: ChargeCategory) -> bool {
        if !category.is_in_use() {
            return false;
        }
        let slot = slot_index(local);
        if slot as i32 == self.last_slot_touched {
            return false;
        }
        self.weekly_usage[slot] += 1;
        self.last_slot_touched = slot as i32;
        true
    }

    pub fn counts(&self) -> &[u64] {
        &self.weekly_usage
    }

    pub fn last_slot_touched(&self) -> i32 {
        self.last_slot_touched
    }

    /// The 144 slots of one day, 0 = Monday.
    pub fn day(&self, day: usize) -> Option<&[u64]> {
        (day < DAYS_PER_WEEK).then(|| &self.weekly_usage[day * SLOTS_PER_DAY..(day + 1) * SLOTS_PER_DAY])
    }
}
