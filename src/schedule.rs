//! Recurring run descriptors and next-run calculation.
//!
//! All times are UTC. Weekday numbers run 1..=7 starting at Sunday.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_CUSTOM_INTERVAL_MINUTES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Schedule {
    Hourly {
        minute: u32,
    },
    Daily {
        hour: u32,
        minute: u32,
    },
    Weekly {
        days: Vec<u32>,
        hour: u32,
        minute: u32,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        interval_minutes: u32,
    },
    Cron {
        expression: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("minute must be 0-59, got {0}")]
    Minute(u32),
    #[error("hour must be 0-23, got {0}")]
    Hour(u32),
    #[error("weekday must be 1-7, got {0}")]
    Weekday(u32),
    #[error("custom interval must be at least {MIN_CUSTOM_INTERVAL_MINUTES} minutes, got {0}")]
    Interval(u32),
    #[error("invalid cron expression '{0}': {1}")]
    Cron(String, String),
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Self::Hourly { minute } => check_minute(*minute),
            Self::Daily { hour, minute } => {
                check_hour(*hour)?;
                check_minute(*minute)
            }
            Self::Weekly { days, hour, minute } => {
                if let Some(day) = days.iter().find(|d| !(1..=7).contains(*d)) {
                    return Err(ScheduleError::Weekday(*day));
                }
                check_hour(*hour)?;
                check_minute(*minute)
            }
            Self::Custom { interval_minutes } => {
                if *interval_minutes < MIN_CUSTOM_INTERVAL_MINUTES {
                    return Err(ScheduleError::Interval(*interval_minutes));
                }
                Ok(())
            }
            Self::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// The first fire time strictly after `after`, or `None` when the
    /// schedule can never fire.
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Hourly { minute } => {
                let candidate = at(after.date_naive(), after.hour(), *minute)?;
                if candidate > after {
                    Some(candidate)
                } else {
                    Some(candidate + Duration::hours(1))
                }
            }
            Self::Daily { hour, minute } => {
                let candidate = at(after.date_naive(), *hour, *minute)?;
                if candidate > after {
                    Some(candidate)
                } else {
                    Some(candidate + Duration::days(1))
                }
            }
            Self::Weekly { days, hour, minute } => (0..=7).find_map(|offset| {
                let date = after.date_naive() + Duration::days(offset);
                let weekday = date.weekday().number_from_sunday();
                if !days.contains(&weekday) {
                    return None;
                }
                at(date, *hour, *minute).filter(|candidate| *candidate > after)
            }),
            Self::Custom { interval_minutes } => {
                let minutes = (*interval_minutes).max(MIN_CUSTOM_INTERVAL_MINUTES);
                Some(after + Duration::minutes(i64::from(minutes)))
            }
            Self::Cron { expression } => parse_cron(expression).ok()?.after(&after).next(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Hourly { minute } => format!("Every hour at :{minute:02}"),
            Self::Daily { hour, minute } => format!("Daily at {hour:02}:{minute:02}"),
            Self::Weekly { days, hour, minute } => {
                let names: Vec<&str> = days.iter().filter_map(|d| weekday_name(*d)).collect();
                format!("{} at {hour:02}:{minute:02}", names.join(", "))
            }
            Self::Custom { interval_minutes } => format!("Every {interval_minutes} minutes"),
            Self::Cron { expression } => format!("Cron: {expression}"),
        }
    }
}

fn check_minute(minute: u32) -> Result<(), ScheduleError> {
    if minute > 59 {
        return Err(ScheduleError::Minute(minute));
    }
    Ok(())
}

fn check_hour(hour: u32) -> Result<(), ScheduleError> {
    if hour > 23 {
        return Err(ScheduleError::Hour(hour));
    }
    Ok(())
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Accepts the usual five-field form as well as the crate's native
/// seconds-first form.
fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ScheduleError::Cron(expression.to_string(), e.to_string()))
}

fn weekday_name(day: u32) -> Option<&'static str> {
    const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    NAMES.get(day.checked_sub(1)? as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_hourly_next_run() {
        let schedule = Schedule::Hourly { minute: 30 };
        assert_eq!(
            schedule.next_run(utc(2024, 3, 1, 10, 15)),
            Some(utc(2024, 3, 1, 10, 30))
        );
        assert_eq!(
            schedule.next_run(utc(2024, 3, 1, 10, 30)),
            Some(utc(2024, 3, 1, 11, 30))
        );
    }

    #[test]
    fn test_daily_rolls_over_midnight() {
        let schedule = Schedule::Daily { hour: 2, minute: 0 };
        assert_eq!(
            schedule.next_run(utc(2024, 12, 31, 23, 0)),
            Some(utc(2025, 1, 1, 2, 0))
        );
    }

    #[test]
    fn test_weekly_next_run() {
        // 2024-03-01 is a Friday; 2 = Monday.
        let schedule = Schedule::Weekly {
            days: vec![2],
            hour: 9,
            minute: 0,
        };
        assert_eq!(
            schedule.next_run(utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 4, 9, 0))
        );

        // Same weekday, later time today.
        let friday = Schedule::Weekly {
            days: vec![6],
            hour: 18,
            minute: 0,
        };
        assert_eq!(
            friday.next_run(utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 1, 18, 0))
        );
        // Same weekday, time already passed: one week later.
        assert_eq!(
            friday.next_run(utc(2024, 3, 1, 19, 0)),
            Some(utc(2024, 3, 8, 18, 0))
        );
    }

    #[test]
    fn test_weekly_without_days_never_fires() {
        let schedule = Schedule::Weekly {
            days: vec![],
            hour: 9,
            minute: 0,
        };
        assert_eq!(schedule.next_run(utc(2024, 3, 1, 12, 0)), None);
    }

    #[test]
    fn test_custom_interval_has_floor() {
        let schedule = Schedule::Custom {
            interval_minutes: 1,
        };
        assert!(schedule.validate().is_err());
        assert_eq!(
            schedule.next_run(utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 1, 12, 5))
        );
    }

    #[test]
    fn test_cron_five_field_expression() {
        let schedule = Schedule::Cron {
            expression: "15 3 * * *".into(),
        };
        assert!(schedule.validate().is_ok());
        assert_eq!(
            schedule.next_run(utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 2, 3, 15))
        );
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let schedule = Schedule::Cron {
            expression: "not a cron".into(),
        };
        assert!(matches!(schedule.validate(), Err(ScheduleError::Cron(..))));
        assert_eq!(schedule.next_run(utc(2024, 3, 1, 12, 0)), None);
    }

    #[test]
    fn test_validate_ranges() {
        assert_eq!(
            Schedule::Hourly { minute: 60 }.validate(),
            Err(ScheduleError::Minute(60))
        );
        assert_eq!(
            Schedule::Daily { hour: 24, minute: 0 }.validate(),
            Err(ScheduleError::Hour(24))
        );
        assert_eq!(
            Schedule::Weekly {
                days: vec![0],
                hour: 1,
                minute: 0
            }
            .validate(),
            Err(ScheduleError::Weekday(0))
        );
    }

    #[test]
    fn test_describe() {
        let schedule = Schedule::Weekly {
            days: vec![2, 4],
            hour: 7,
            minute: 5,
        };
        assert_eq!(schedule.describe(), "Mon, Wed at 07:05");
    }

    #[test]
    fn test_serde_shape() {
        let schedule = Schedule::Custom {
            interval_minutes: 15,
        };
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(value["type"], "custom");
        assert_eq!(value["intervalMinutes"], 15);
    }
}
