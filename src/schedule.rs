//! Per-day VM usage windows

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Daily start/end time for lab VMs, in half-hour steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    /// Build a window from `(hour, minute)` pairs.
    pub fn from_hm(start: (u32, u32), end: (u32, u32)) -> Result<Self> {
        let parse = |(h, m): (u32, u32)| {
            NaiveTime::from_hms_opt(h, m, 0)
                .ok_or_else(|| Error::Validation(format!("invalid time {:02}:{:02}", h, m)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn validate(&self) -> Result<()> {
        for t in [self.start, self.end] {
            if t.minute() % 30 != 0 || t.second() != 0 || t.nanosecond() != 0 {
                return Err(Error::Validation(format!(
                    "time {} is not on a half-hour boundary",
                    t.format("%H:%M")
                )));
            }
        }
        if self.start >= self.end {
            return Err(Error::Validation(format!(
                "window start {} must be before end {}",
                self.start.format("%H:%M"),
                self.end.format("%H:%M")
            )));
        }
        Ok(())
    }
}

impl Default for TimeWindow {
    /// 09:00 to 18:00
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Resolved window for a single calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub window: TimeWindow,
    /// False when the window comes from the default rather than an explicit entry.
    pub explicit: bool,
}

/// Every date in `[start, end]`, inclusive. Empty when `end < start`.
pub fn dates_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    dates
}

/// Explicit per-date windows; dates without an entry fall back to a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindows {
    entries: BTreeMap<NaiveDate, TimeWindow>,
}

impl DayWindows {
    pub fn get(&self, date: NaiveDate) -> Option<TimeWindow> {
        self.entries.get(&date).copied()
    }

    pub fn window_for(&self, date: NaiveDate, default: TimeWindow) -> TimeWindow {
        self.get(date).unwrap_or(default)
    }

    pub fn set(&mut self, date: NaiveDate, window: TimeWindow) -> Result<()> {
        window.validate()?;
        self.entries.insert(date, window);
        Ok(())
    }

    /// Copy one date's window onto every date in the range.
    pub fn apply_to_all(&mut self, source: NaiveDate, range: (NaiveDate, NaiveDate), default: TimeWindow) {
        let window = self.window_for(source, default);
        for date in dates_between(range.0, range.1) {
            self.entries.insert(date, window);
        }
    }

    /// Drop entries outside `[start, end]`.
    pub fn retain_range(&mut self, start: NaiveDate, end: NaiveDate) {
        self.entries.retain(|d, _| *d >= start && *d <= end);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One entry per date in the range.
    pub fn resolve(&self, start: NaiveDate, end: NaiveDate, default: TimeWindow) -> Vec<DaySchedule> {
        dates_between(start, end)
            .into_iter()
            .map(|date| match self.get(date) {
                Some(window) => DaySchedule { date, window, explicit: true },
                None => DaySchedule { date, window: default, explicit: false },
            })
            .collect()
    }
}
