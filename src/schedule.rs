// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication update windows.
//!
//! An agreement only sends changes inside its window. The wire form is
//! `HHMM-HHMM D+`: a same-day time range (no wraparound past midnight)
//! followed by one to seven distinct weekday digits, `0` being Sunday.
//!
//! Two sentinels exist: [`ScheduleWindow::ALWAYS`] (`0000-2359 0123456`) and
//! [`ScheduleWindow::NEVER`] (`2358-2359 0`). The latter is what pausing an
//! agreement falls back to on nodes without an enabled flag.
//!
//! Parsing is purely local, so an invalid window never reaches a node.

use crate::error::{Result, TopologyError};
use std::fmt;
use std::str::FromStr;

/// A validated replication window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleWindow {
    start_hour: u8,
    start_minute: u8,
    end_hour: u8,
    end_minute: u8,
    /// Bit `n` set means weekday `n` is included.
    days: u8,
}

const ALL_DAYS: u8 = 0b0111_1111;

impl ScheduleWindow {
    pub const ALWAYS: ScheduleWindow = ScheduleWindow {
        start_hour: 0,
        start_minute: 0,
        end_hour: 23,
        end_minute: 59,
        days: ALL_DAYS,
    };

    pub const NEVER: ScheduleWindow = ScheduleWindow {
        start_hour: 23,
        start_minute: 58,
        end_hour: 23,
        end_minute: 59,
        days: 0b0000_0001,
    };

    pub fn parse(interval: &str) -> Result<Self> {
        let mut parts = interval.split_whitespace();
        let (range, days) = match (parts.next(), parts.next(), parts.next()) {
            (Some(range), Some(days), None) => (range, days),
            _ => {
                return Err(TopologyError::invalid_schedule(
                    interval,
                    "expected \"HHMM-HHMM D+\"",
                ))
            }
        };

        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| TopologyError::invalid_schedule(interval, "missing '-' in time range"))?;
        let (start_hour, start_minute) = parse_hhmm(interval, start)?;
        let (end_hour, end_minute) = parse_hhmm(interval, end)?;

        if (start_hour, start_minute) > (end_hour, end_minute) {
            return Err(TopologyError::invalid_schedule(
                interval,
                "start time is after end time",
            ));
        }

        Ok(Self {
            start_hour,
            start_minute,
            end_hour,
            end_minute,
            days: parse_days(interval, days)?,
        })
    }

    pub fn is_always(&self) -> bool {
        *self == Self::ALWAYS
    }

    pub fn is_never(&self) -> bool {
        *self == Self::NEVER
    }

    /// Weekdays covered by the window, ascending.
    pub fn days(&self) -> impl Iterator<Item = u8> + '_ {
        (0..7u8).filter(move |d| self.days & (1 << d) != 0)
    }

    /// Whether the window is open at the given weekday and time of day.
    pub fn contains(&self, weekday: u8, hour: u8, minute: u8) -> bool {
        weekday < 7
            && self.days & (1 << weekday) != 0
            && (self.start_hour, self.start_minute) <= (hour, minute)
            && (hour, minute) <= (self.end_hour, self.end_minute)
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl FromStr for ScheduleWindow {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ScheduleWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{:02}-{:02}{:02} ",
            self.start_hour, self.start_minute, self.end_hour, self.end_minute
        )?;
        for d in self.days() {
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

fn parse_hhmm(interval: &str, s: &str) -> Result<(u8, u8)> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TopologyError::invalid_schedule(
            interval,
            format!("time {:?} is not four digits", s),
        ));
    }
    let hour = s[..2].parse::<u8>().map_err(|e| TopologyError::invalid_schedule(interval, e.to_string()))?;
    let minute = s[2..].parse::<u8>().map_err(|e| TopologyError::invalid_schedule(interval, e.to_string()))?;
    if hour > 23 {
        return Err(TopologyError::invalid_schedule(
            interval,
            format!("hour {} out of range 00-23", hour),
        ));
    }
    if minute > 59 {
        return Err(TopologyError::invalid_schedule(
            interval,
            format!("minute {} out of range 00-59", minute),
        ));
    }
    Ok((hour, minute))
}

fn parse_days(interval: &str, s: &str) -> Result<u8> {
    if s.is_empty() || s.len() > 7 {
        return Err(TopologyError::invalid_schedule(
            interval,
            "day list must have 1 to 7 digits",
        ));
    }
    let mut mask = 0u8;
    for c in s.chars() {
        let day = match c {
            '0'..='6' => c as u8 - b'0',
            _ => {
                return Err(TopologyError::invalid_schedule(
                    interval,
                    format!("day {:?} out of range 0-6", c),
                ))
            }
        };
        if mask & (1 << day) != 0 {
            return Err(TopologyError::invalid_schedule(
                interval,
                format!("day {} listed twice", day),
            ));
        }
        mask |= 1 << day;
    }
    Ok(mask)
}
