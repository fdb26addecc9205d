//! Translation of frequency descriptors into cron recurrence rules.
//!
//! Expressions use the six-field form understood by the `cron` crate
//! (`sec min hour day-of-month month day-of-week`) and are evaluated in the
//! rule's timezone.
//!
//! `alternative` uses a day-of-month step (`1/2`), so it fires on odd days of
//! the month and drifts at month boundaries (the 31st is followed by the 1st).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;

use crate::automation::types::{AutoPostingConfig, Frequency};
use crate::config::DEFAULT_TIMEZONE;
use crate::error::ScheduleError;

/// Interval used by [`Frequency::TestInterval`].
pub const TEST_INTERVAL_SECS: u32 = 30;

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Optional inputs that only some frequencies consult.
#[derive(Debug, Clone, Default)]
pub struct ScheduleExtras {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: Option<u8>,
    pub custom_times: Vec<String>,
    pub timezone: Option<String>,
}

impl From<&AutoPostingConfig> for ScheduleExtras {
    fn from(config: &AutoPostingConfig) -> Self {
        Self {
            day_of_week: config.day_of_week,
            custom_times: config.custom_times.clone(),
            timezone: config.timezone.clone(),
        }
    }
}

/// A compiled, timezone-aware recurrence.
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    expression: String,
    timezone: Tz,
    schedule: CronSchedule,
}

impl RecurrenceRule {
    pub(crate) fn new(expression: String, timezone: Tz) -> Result<Self, ScheduleError> {
        let schedule = CronSchedule::from_str(&expression).map_err(|e| ScheduleError::Cron {
            expression: expression.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expression,
            timezone,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First fire strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The next `count` fires after `after`, in the rule's timezone.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Tz>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .take(count)
            .collect()
    }
}

impl PartialEq for RecurrenceRule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.timezone == other.timezone
    }
}

impl Eq for RecurrenceRule {}

/// Compiles posting schedules against a fallback timezone.
#[derive(Debug, Clone)]
pub struct ScheduleCompiler {
    default_timezone: Tz,
}

impl Default for ScheduleCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl ScheduleCompiler {
    pub fn new(default_timezone: &str) -> Self {
        let default_timezone = default_timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(
                timezone = default_timezone,
                "Unknown default timezone, using {}",
                DEFAULT_TIMEZONE
            );
            chrono_tz::Asia::Kolkata
        });
        Self { default_timezone }
    }

    pub fn default_timezone(&self) -> Tz {
        self.default_timezone
    }

    /// Compile the schedule of an auto-posting config.
    pub fn compile_posting(
        &self,
        config: &AutoPostingConfig,
    ) -> Result<RecurrenceRule, ScheduleError> {
        self.compile(&config.schedule, &config.frequency, &ScheduleExtras::from(config))
    }

    /// Compile `HH:MM` plus a frequency into a recurrence rule.
    pub fn compile(
        &self,
        schedule_time: &str,
        frequency: &Frequency,
        extras: &ScheduleExtras,
    ) -> Result<RecurrenceRule, ScheduleError> {
        let timezone = self.resolve_timezone(extras.timezone.as_deref());

        let expression = match frequency {
            Frequency::Daily => {
                let (hour, minute) = parse_time_of_day(schedule_time)?;
                format!("0 {minute} {hour} * * *")
            }
            Frequency::Alternative => {
                let (hour, minute) = parse_time_of_day(schedule_time)?;
                format!("0 {minute} {hour} 1/2 * *")
            }
            Frequency::Weekly => {
                let (hour, minute) = parse_time_of_day(schedule_time)?;
                let day = weekday_name(extras.day_of_week);
                format!("0 {minute} {hour} * * {day}")
            }
            Frequency::TwiceWeekly => {
                let (hour, minute) = parse_time_of_day(schedule_time)?;
                format!("0 {minute} {hour} * * Mon,Thu")
            }
            Frequency::Custom => {
                // Only the first custom time is honoured.
                let first = extras
                    .custom_times
                    .first()
                    .ok_or(ScheduleError::MissingCustomTimes)?;
                let (hour, minute) = parse_time_of_day(first)?;
                format!("0 {minute} {hour} * * *")
            }
            Frequency::TestInterval => format!("0/{TEST_INTERVAL_SECS} * * * * *"),
            Frequency::Unsupported(raw) => {
                return Err(ScheduleError::UnsupportedFrequency(raw.clone()));
            }
        };

        RecurrenceRule::new(expression, timezone)
    }

    fn resolve_timezone(&self, name: Option<&str>) -> Tz {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                tracing::warn!(
                    timezone = name,
                    fallback = %self.default_timezone,
                    "Unknown schedule timezone, using fallback"
                );
                self.default_timezone
            }),
            None => self.default_timezone,
        }
    }
}

/// Parse `HH:MM` (24h). Single-digit hours are accepted.
pub fn parse_time_of_day(raw: &str) -> Result<(u32, u32), ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(raw.to_string());

    let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if minute.len() != 2 || hour.is_empty() || hour.len() > 2 || !digits(hour) || !digits(minute) {
        return Err(invalid());
    }
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn weekday_name(day_of_week: Option<u8>) -> &'static str {
    match day_of_week {
        Some(day) if (day as usize) < WEEKDAY_NAMES.len() => WEEKDAY_NAMES[day as usize],
        Some(day) => {
            tracing::warn!(day_of_week = day, "Day of week out of range, using Monday");
            "Mon"
        }
        None => "Mon",
    }
}
