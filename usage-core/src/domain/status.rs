use serde::Serialize;

/// Semantic charging state derived from a raw `(state, availability)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeCategory {
    Idle,
    InUseCharging,
    InUseStopped,
    Invalid,
}

impl ChargeCategory {
    /// Charging and stopped-while-plugged-in both count as "in use".
    pub fn is_in_use(self) -> bool {
        matches!(self, Self::InUseCharging | Self::InUseStopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InUseCharging => "in_use_charging",
            Self::InUseStopped => "in_use_stopped",
            Self::Invalid => "invalid",
        }
    }
}

const IDLE: &[(&str, &str)] = &[("idle", "available"), ("pluggedout", "available")];
const CHARGING: &[(&str, &str)] = &[("charging", "in use"), ("pluggedin", "plugged in...")];
const STOPPED: &[(&str, &str)] = &[("chargestopped", "in use")];

/// Pairs the feed uses to flag stale or corrupt meter data.
const REPORTED_UNKNOWN: &[(&str, &str)] = &[("old data", "unknown"), ("bad data", "unknown")];

fn member(table: &[(&str, &str)], state: &str, availability: &str) -> bool {
    table
        .iter()
        .any(|(s, a)| s.eq_ignore_ascii_case(state) && a.eq_ignore_ascii_case(availability))
}

/// Classify a raw status pair. Total: anything unrecognised is `Invalid`,
/// including a pair with either side missing.
pub fn classify(state: Option<&str>, availability: Option<&str>) -> ChargeCategory {
    let (Some(state), Some(availability)) = (state, availability) else {
        return ChargeCategory::Invalid;
    };
    let (state, availability) = (state.trim(), availability.trim());

    if member(IDLE, state, availability) {
        ChargeCategory::Idle
    } else if member(CHARGING, state, availability) {
        ChargeCategory::InUseCharging
    } else if member(STOPPED, state, availability) {
        ChargeCategory::InUseStopped
    } else {
        ChargeCategory::Invalid
    }
}

/// True when the feed itself marks the meter's data as unusable, as opposed
/// to a pair we simply do not recognise.
pub fn is_reported_unknown(state: Option<&str>, availability: Option<&str>) -> bool {
    match (state, availability) {
        (Some(s), Some(a)) => member(REPORTED_UNKNOWN, s.trim(), a.trim()),
        _ => false,
    }
}
