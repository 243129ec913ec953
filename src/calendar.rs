use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::model::{CalendarOverride, OverrideKind, WeeklySchedule};

/// Opening hours `[start, end)` for a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Outcome of resolving a resource's calendar for one date.
///
/// When the day is closed, `start_time`/`end_time` carry the fallback hours so
/// callers can still lay out the slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingDay {
    pub is_working: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl WorkingDay {
    pub fn hours(&self) -> DayHours {
        DayHours {
            start: self.start_time,
            end: self.end_time,
        }
    }
}

/// 0 = Monday .. 6 = Sunday, matching `ScheduleEntry::day_of_week`.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

/// Resolve whether a resource is open on `date`.
///
/// Campus-wide overrides win over the weekly schedule:
/// - `WorkingDay` opens the day, using the schedule's hours for that weekday
///   when an entry exists (even a closed one), else `fallback`.
/// - `Holiday` closes the day.
/// - No override: the weekly entry decides; a missing entry means closed.
pub fn resolve(
    schedule: &WeeklySchedule,
    calendar_override: Option<&CalendarOverride>,
    date: NaiveDate,
    fallback: DayHours,
) -> WorkingDay {
    let entry = schedule.entry(weekday_index(date));
    let closed = WorkingDay {
        is_working: false,
        start_time: fallback.start,
        end_time: fallback.end,
    };

    match calendar_override.map(|o| o.kind) {
        Some(OverrideKind::Holiday) => closed,
        Some(OverrideKind::WorkingDay) => match entry {
            Some(e) => WorkingDay {
                is_working: true,
                start_time: e.start_time,
                end_time: e.end_time,
            },
            None => WorkingDay {
                is_working: true,
                ..closed
            },
        },
        None => match entry {
            Some(e) if e.is_working => WorkingDay {
                is_working: true,
                start_time: e.start_time,
                end_time: e.end_time,
            },
            _ => closed,
        },
    }
}
