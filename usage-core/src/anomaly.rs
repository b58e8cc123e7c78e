use std::fmt;

/// Which entity level a malformed record was found at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLevel {
    Site,
    Station,
    Meter,
}

impl fmt::Display for RecordLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordLevel::Site => write!(f, "site"),
            RecordLevel::Station => write!(f, "station"),
            RecordLevel::Meter => write!(f, "meter"),
        }
    }
}

/// Tracked episode kinds on a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Episode {
    Charging,
    Stopped,
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Episode::Charging => write!(f, "charging"),
            Episode::Stopped => write!(f, "stopped"),
        }
    }
}

/// Non-fatal conditions surfaced while reconciling a snapshot.
///
/// None of these abort a batch. The offending subtree or statistic is
/// skipped and the next polling cycle gets another chance.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// Inbound record missing its identifier or its child array.
    #[error("malformed {level} record{}: {reason}", under(.parent))]
    MalformedRecord {
        level: RecordLevel,
        parent: Option<String>,
        reason: String,
    },

    /// Episode opened twice or closed without a start.
    #[error("meter {meter_id}: {episode} episode {detail}")]
    DataIntegrity {
        meter_id: String,
        episode: Episode,
        detail: &'static str,
    },

    /// No zone could be resolved; local time falls back to UTC.
    #[error("{level} {id}: timezone unresolved ({reason}), using UTC")]
    TimezoneResolution {
        level: RecordLevel,
        id: String,
        reason: String,
    },
}

fn under(parent: &Option<String>) -> String {
    parent.as_ref().map(|p| format!(" under {p}")).unwrap_or_default()
}

impl Anomaly {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::MalformedRecord { .. } => "malformed_record",
            Anomaly::DataIntegrity { .. } => "data_integrity",
            Anomaly::TimezoneResolution { .. } => "timezone_resolution",
        }
    }

    pub fn malformed(level: RecordLevel, parent: Option<&str>, reason: impl Into<String>) -> Self {
        Anomaly::MalformedRecord {
            level,
            parent: parent.map(str::to_string),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_message_names_parent() {
        let a = Anomaly::malformed(RecordLevel::Station, Some("site-7"), "missing 'id'");
        assert_eq!(a.to_string(), "malformed station record under site-7: missing 'id'");
        assert_eq!(a.kind(), "malformed_record");
    }

    #[test]
    fn malformed_record_without_parent() {
        let a = Anomaly::malformed(RecordLevel::Site, None, "not an object");
        assert_eq!(a.to_string(), "malformed site record: not an object");
    }
}
