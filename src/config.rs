use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveTime;
use tracing::warn;

use crate::calendar::DayHours;
use crate::model::{ScheduleEntry, WeeklySchedule};

/// Weekly schedule seeded onto every new resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSchedule {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    /// 0 = Monday .. 6 = Sunday.
    pub working_days: Vec<u8>,
}

impl Default for DefaultSchedule {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(19, 0, 0).unwrap_or(NaiveTime::MIN),
            working_days: vec![0, 1, 2, 3, 4],
        }
    }
}

impl DefaultSchedule {
    /// Hours used for the slot grid of closed days and for working-day
    /// overrides on resources lacking an entry.
    pub fn hours(&self) -> DayHours {
        DayHours {
            start: self.day_start,
            end: self.day_end,
        }
    }

    pub fn seed(&self) -> WeeklySchedule {
        WeeklySchedule::partial(
            (0..7)
                .map(|day| ScheduleEntry {
                    day_of_week: day,
                    start_time: self.day_start,
                    end_time: self.day_end,
                    is_working: self.working_days.contains(&day),
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub journal_file: String,
    /// Appends after which `Engine::compact_if_needed` rewrites the journal.
    pub compact_threshold: u64,
    pub default_schedule: DefaultSchedule,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            journal_file: "campus.journal".into(),
            compact_threshold: 1000,
            default_schedule: DefaultSchedule::default(),
        }
    }
}

impl EngineConfig {
    /// Read `CAMPUS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let schedule = DefaultSchedule {
            day_start: env_or("CAMPUS_DAY_START", defaults.default_schedule.day_start, parse_time),
            day_end: env_or("CAMPUS_DAY_END", defaults.default_schedule.day_end, parse_time),
            working_days: env_or(
                "CAMPUS_WORKING_DAYS",
                defaults.default_schedule.working_days.clone(),
                parse_days,
            ),
        };
        let schedule = if schedule.day_start < schedule.day_end {
            schedule
        } else {
            warn!(
                "CAMPUS_DAY_START {} is not before CAMPUS_DAY_END {}, using defaults",
                schedule.day_start, schedule.day_end
            );
            DefaultSchedule {
                working_days: schedule.working_days,
                ..DefaultSchedule::default()
            }
        };

        Self {
            data_dir: std::env::var("CAMPUS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            journal_file: std::env::var("CAMPUS_JOURNAL_FILE").unwrap_or(defaults.journal_file),
            compact_threshold: env_or("CAMPUS_COMPACT_THRESHOLD", defaults.compact_threshold, |s| {
                u64::from_str(s).ok()
            }),
            default_schedule: schedule,
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_file)
    }
}

fn env_or<T>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match std::env::var(key) {
        Ok(raw) => match parse(raw.trim()) {
            Some(v) => v,
            None => {
                warn!("ignoring invalid {key}={raw:?}");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

fn parse_days(s: &str) -> Option<Vec<u8>> {
    let mut days = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: u8 = part.parse().ok()?;
        if day > 6 {
            return None;
        }
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_unstable();
    Some(days)
}
