use chrono::prelude::*;
use std::time::Duration;

/// 2024-01-01T00:00:00Z in milliseconds.
pub const DEFAULT_EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// Generators read the clock once per attempt. Implement this to drive a
/// generator from a mocked time source.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// What a generator does when the clock reports a time before the last
/// issued bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPolicy {
    /// Fail immediately with [`Error::ClockRegression`].
    ///
    /// [`Error::ClockRegression`]: crate::Error::ClockRegression
    #[default]
    Fail,
    /// Sleep until the clock catches up, failing once `max_wait` has elapsed.
    Wait { max_wait: Duration },
}

/// Converts a `DateTime<Utc>` to milliseconds since the Unix epoch.
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}
