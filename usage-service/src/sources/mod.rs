pub mod http_snapshot;
pub mod snapshot_file;

pub use http_snapshot::HttpSnapshotSource;
pub use snapshot_file::SnapshotFileSource;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// One line of a snapshot recording: the raw site array and when it was
/// fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub sites: Vec<Value>,
}
