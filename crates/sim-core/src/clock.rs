//! # Simulated clock
//!
//! Simulated time is independent of wall-clock time. It starts at a configured
//! instant and only ever moves forward, one fixed granularity step at a time,
//! when the scheduler runs a time-advancing tick.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use parking_lot::RwLock;

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%A %B %-d";
const DATE_TIME_FORMAT: &str = "%A %B %-d %H:%M";

/// A shared handle to the simulated clock.
///
/// Cloning is cheap; all clones observe the same time. Only the scheduler
/// should call [`SimClock::advance`].
#[derive(Debug, Clone)]
pub struct SimClock {
    start: NaiveDateTime,
    granularity_minutes: u32,
    now: Arc<RwLock<NaiveDateTime>>,
}

impl SimClock {
    pub fn new(start: NaiveDateTime, granularity_minutes: u32) -> Self {
        Self {
            start,
            granularity_minutes: granularity_minutes.max(1),
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> NaiveDateTime {
        *self.now.read()
    }

    /// The instant the run started at.
    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Time of day the run started at. Reflective moments fire here.
    pub fn day_start(&self) -> NaiveTime {
        self.start.time()
    }

    /// Simulated minutes added by one time-advancing tick.
    pub fn granularity_minutes(&self) -> u32 {
        self.granularity_minutes
    }

    pub fn granularity(&self) -> Duration {
        Duration::minutes(i64::from(self.granularity_minutes))
    }

    /// Move simulated time forward by one granularity step and return the new time.
    pub fn advance(&self) -> NaiveDateTime {
        let mut now = self.now.write();
        *now += self.granularity();
        *now
    }

    /// Simulated time elapsed since the run started.
    pub fn elapsed(&self) -> Duration {
        self.now() - self.start
    }

    /// Whole simulated hours elapsed since the run started. Memory timestamps use this unit.
    pub fn elapsed_hours(&self) -> i64 {
        self.elapsed().num_hours()
    }

    /// Index of the current granularity slot within the hour.
    pub fn slot_in_hour(&self) -> usize {
        (self.now().minute() / self.granularity_minutes) as usize
    }

    pub fn is_midnight(&self) -> bool {
        self.now().time() == NaiveTime::MIN
    }

    /// e.g. `07:30`
    pub fn time_string(&self) -> String {
        self.now().format(TIME_FORMAT).to_string()
    }

    /// e.g. `Friday January 13`
    pub fn date_string(&self) -> String {
        self.now().format(DATE_FORMAT).to_string()
    }

    /// The date `day_offset` days from now, e.g. tomorrow's date for next-day planning.
    pub fn date_string_offset(&self, day_offset: i64) -> String {
        (self.now() + Duration::days(day_offset))
            .format(DATE_FORMAT)
            .to_string()
    }

    /// e.g. `Friday January 13 07:30`
    pub fn date_time_string(&self) -> String {
        self.now().format(DATE_TIME_FORMAT).to_string()
    }
}
