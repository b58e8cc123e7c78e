pub mod pipeline;
pub mod config;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod observability;
pub mod metrics_server;
pub mod reconciler;
pub mod store;

pub use pipeline::{Envelope, Pipeline};
pub use reconciler::{IngestReport, NetworkReconciler, SharedWorkingSet, Snapshot, WorkingSet};
