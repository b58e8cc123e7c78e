pub mod anomaly;
pub mod db;
pub mod domain;
pub mod timezone;

pub use anomaly::Anomaly;
pub use domain::{
    ChargeCategory, MeterState, RunningStat, SiteState, StationState, UsageHistogram,
};
