use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::truncate_to_second;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeError {
    #[error("already open since {0}")]
    AlreadyOpen(OffsetDateTime),
    #[error("closed without a recorded start")]
    NotOpen,
}

/// Incremental mean over closed episode durations, plus the start of the
/// episode currently open (if any).
///
/// `count` and `mean` only move when an episode closes. The mean is the
/// exact running average `mean' = mean + (d - mean) / count'`, so no sum of
/// durations is ever held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningStat {
    episode_start: Option<OffsetDateTime>,
    count: u64,
    mean: f64,
}

/// Persisted form of a [`RunningStat`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatDocument {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(default)]
    pub cnt: u64,
    #[serde(default)]
    pub avg: f64,
}

impl RunningStat {
    pub fn episode_start(&self) -> Option<OffsetDateTime> {
        self.episode_start
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn is_open(&self) -> bool {
        self.episode_start.is_some()
    }

    /// Start an episode. An already-open episode keeps its original start.
    pub fn open(&mut self, at: OffsetDateTime) -> Result<(), EpisodeError> {
        if let Some(since) = self.episode_start {
            return Err(EpisodeError::AlreadyOpen(since));
        }
        self.episode_start = Some(truncate_to_second(at));
        Ok(())
    }

    /// Close the open episode and fold its duration (whole seconds) into the
    /// mean. Returns the duration.
    pub fn close(&mut self, at: OffsetDateTime) -> Result<i64, EpisodeError> {
        let start = self.episode_start.take().ok_or(EpisodeError::NotOpen)?;
        let duration = (truncate_to_second(at) - start).whole_seconds().max(0);

        self.count += 1;
        self.mean += (duration as f64 - self.mean) / self.count as f64;

        Ok(duration)
    }

    pub fn to_document(&self) -> StatDocument {
        StatDocument {
            start: self.episode_start,
            cnt: self.count,
            avg: self.mean,
        }
    }

    pub fn from_document(doc: &StatDocument) -> Self {
        Self {
            episode_start: doc.start.map(truncate_to_second),
            count: doc.cnt,
            mean: if doc.cnt == 0 { 0.0 } else { doc.avg },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn close_after(stat: &mut RunningStat, base: OffsetDateTime, secs: i64) {
        stat.open(base).unwrap();
        stat.close(base + Duration::seconds(secs)).unwrap();
    }

    #[test]
    fn running_mean_matches_batch_mean_for_any_order() {
        let base = datetime!(2024-01-01 00:00:00 UTC);
        let durations = [2520_i64, 60, 7200, 1, 999, 3600, 45];

        let batch = durations.iter().sum::<i64>() as f64 / durations.len() as f64;

        for rotation in 0..durations.len() {
            let mut stat = RunningStat::default();
            let mut order = durations.to_vec();
            order.rotate_left(rotation);
            if rotation % 2 == 1 {
                order.reverse();
            }
            for d in order {
                close_after(&mut stat, base, d);
            }
            assert_eq!(stat.count(), durations.len() as u64);
            assert!((stat.mean() - batch).abs() < 1e-9, "rotation {rotation}");
        }
    }

    #[test]
    fn open_twice_keeps_first_start() {
        let mut stat = RunningStat::default();
        let first = datetime!(2024-01-01 08:00:00 UTC);
        stat.open(first).unwrap();

        let err = stat.open(datetime!(2024-01-01 09:00:00 UTC)).unwrap_err();
        assert_eq!(err, EpisodeError::AlreadyOpen(first));
        assert_eq!(stat.episode_start(), Some(first));
    }

    #[test]
    fn close_without_open_leaves_numbers_alone() {
        let mut stat = RunningStat::default();
        close_after(&mut stat, datetime!(2024-01-01 00:00:00 UTC), 100);

        let err = stat.close(datetime!(2024-01-02 00:00:00 UTC)).unwrap_err();
        assert_eq!(err, EpisodeError::NotOpen);
        assert_eq!(stat.count(), 1);
        assert_eq!(stat.mean(), 100.0);
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let mut stat = RunningStat::default();
        stat.open(datetime!(2024-01-01 00:00:00.900 UTC)).unwrap();
        let d = stat.close(datetime!(2024-01-01 00:00:10.100 UTC)).unwrap();
        assert_eq!(d, 10);
    }

    #[test]
    fn clock_going_backwards_clamps_to_zero() {
        let mut stat = RunningStat::default();
        stat.open(datetime!(2024-01-01 00:10:00 UTC)).unwrap();
        let d = stat.close(datetime!(2024-01-01 00:00:00 UTC)).unwrap();
        assert_eq!(d, 0);
        assert_eq!(stat.count(), 1);
    }

    #[test]
    fn document_keeps_open_episode() {
        let mut stat = RunningStat::default();
        close_after(&mut stat, datetime!(2024-01-01 00:00:00 UTC), 300);
        stat.open(datetime!(2024-01-01 01:00:00 UTC)).unwrap();

        let restored = RunningStat::from_document(&stat.to_document());
        assert_eq!(restored, stat);
    }
}
