use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static HOUR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2})").expect("hour prefix pattern is valid"));

/// An agent's plan: one entry per hour of the day, and one entry per
/// granularity slot of the current hour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub day: Vec<String>,
    pub hour: Vec<String>,
}

impl Plan {
    /// Parse a day plan whose lines start with an hour number (`"8:00) Work"`).
    ///
    /// Hours before the first listed hour and after the last one are filled
    /// with sleep so the plan always covers the whole day.
    pub fn from_daily(text: &str) -> Self {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let first = lines.first().and_then(|l| extract_hour(l));
        let last = lines.last().and_then(|l| extract_hour(l));

        let mut day = Vec::with_capacity(24);
        if let Some(first) = first {
            day.extend((0..first.min(24)).map(sleep_entry));
        }
        day.extend(lines.iter().map(|l| l.to_string()));
        if let Some(last) = last {
            day.extend((last + 1..24).map(sleep_entry));
        }

        Self { day, hour: Vec::new() }
    }

    /// Replace the hourly plan with one entry per non-empty line of `text`.
    pub fn with_hourly(mut self, text: &str) -> Self {
        self.hour = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        self
    }

    /// The planned action for a granularity slot of the current hour, if the
    /// hourly plan covers it.
    pub fn action_for_slot(&self, slot: usize) -> Option<&str> {
        self.hour.get(slot).map(String::as_str)
    }

    /// The day plan entry for an hour of the day.
    pub fn entry_for_hour(&self, hour: u32) -> Option<&str> {
        self.day.get(hour as usize).map(String::as_str)
    }

    pub fn has_day_plan(&self) -> bool {
        !self.day.is_empty()
    }
}

fn extract_hour(line: &str) -> Option<u32> {
    HOUR_PREFIX
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn sleep_entry(hour: u32) -> String {
    format!("{hour}:00) Sleep")
}
