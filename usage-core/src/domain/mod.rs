pub mod legacy;
pub mod meter;
pub mod records;
pub mod running_stat;
pub mod site;
pub mod station;
pub mod status;
pub mod usage;

pub use meter::{MeterDocument, MeterState, Transition};
pub use records::{Coordinates, Location, MeterRecord, SiteRecord, StationRecord};
pub use running_stat::{RunningStat, StatDocument};
pub use site::{SiteAttributes, SiteDocument, SiteState};
pub use station::{StationAttributes, StationDocument, StationState};
pub use status::{classify, ChargeCategory};
pub use usage::UsageHistogram;

use time::OffsetDateTime;

/// A persisted document that cannot be turned back into in-memory state.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("weekly usage has {0} slots, expected 1008")]
    WeeklyUsageLength(usize),
    #[error("legacy weekly usage has {0} minutes, expected 10080")]
    LegacyUsageLength(usize),
    #[error("last touched slot {0} out of range")]
    SlotOutOfRange(i32),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Drop sub-second precision. Every statistic and persisted timestamp is
/// derived from a truncated value.
pub fn truncate_to_second(at: OffsetDateTime) -> OffsetDateTime {
    at - time::Duration::nanoseconds(i64::from(at.nanosecond()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn truncate_to_second_drops_fraction() {
        let at = datetime!(2024-03-04 10:15:30.987 UTC);
        assert_eq!(truncate_to_second(at), datetime!(2024-03-04 10:15:30 UTC));
    }
}
