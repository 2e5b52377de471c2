//! Window schedules
//!
//! Per-tenant, per-rail scheduling rules and the pure local-time arithmetic
//! behind `is_open` and `next_window`. Holiday gating is applied by the
//! manager, which owns the calendar.

use crate::config::WindowSettings;
use crate::types::{Rail, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How often a rail accepts submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowFrequency {
    /// Always open
    #[serde(rename = "realtime")]
    Realtime,
    /// Top of every business hour until cutoff
    #[serde(rename = "hourly")]
    Hourly,
    /// Four scheduled windows per day
    #[serde(rename = "4_per_day")]
    FourPerDay,
    /// Once a day
    #[serde(rename = "daily")]
    Daily,
    /// Arbitrary scheduled windows
    #[serde(rename = "custom")]
    Custom,
}

impl WindowFrequency {
    /// Uses the scheduled time list as window starts
    pub fn is_scheduled(&self) -> bool {
        matches!(self, WindowFrequency::FourPerDay | WindowFrequency::Custom)
    }
}

impl fmt::Display for WindowFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WindowFrequency::Realtime => "realtime",
            WindowFrequency::Hourly => "hourly",
            WindowFrequency::FourPerDay => "4_per_day",
            WindowFrequency::Daily => "daily",
            WindowFrequency::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Scheduling rules for one tenant on one rail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementWindowConfig {
    /// Tenant
    pub tenant_id: TenantId,

    /// Rail
    pub rail: Rail,

    /// Frequency
    pub frequency: WindowFrequency,

    /// Window start times, "HH:MM" local
    pub scheduled_times: Vec<String>,

    /// Absolute cutoff hour, local
    pub cutoff_hour: Option<u32>,

    /// Absolute cutoff minute, local
    pub cutoff_minute: Option<u32>,

    /// IANA timezone name
    pub timezone: String,

    /// Smallest batch worth submitting
    pub min_batch_amount: Decimal,

    /// Largest number of transfers per batch
    pub max_batch_size: u32,

    /// Inactive configs fall back to the rail default
    pub active: bool,
}

impl SettlementWindowConfig {
    /// Built-in rules for a rail; never persisted unless saved explicitly
    pub fn default_for(tenant_id: TenantId, rail: Rail) -> Self {
        let (frequency, times, cutoff, tz): (_, &[&str], _, _) = match rail {
            Rail::CircleUsdc | Rail::VisaDirect | Rail::MastercardSend => {
                (WindowFrequency::Realtime, &[], None, "UTC")
            }
            Rail::Pix => (WindowFrequency::Realtime, &[], None, "America/Sao_Paulo"),
            Rail::Spei => (WindowFrequency::Realtime, &[], None, "America/Mexico_City"),
            Rail::Ach => (
                WindowFrequency::FourPerDay,
                &["08:00", "11:00", "14:00", "16:30"],
                None,
                "America/New_York",
            ),
            Rail::Wire => (WindowFrequency::Daily, &["09:00"], Some(18), "America/New_York"),
            Rail::Sepa => (WindowFrequency::Hourly, &[], Some(16), "Europe/Berlin"),
        };

        Self {
            tenant_id,
            rail,
            frequency,
            scheduled_times: times.iter().map(|t| t.to_string()).collect(),
            cutoff_hour: cutoff,
            cutoff_minute: cutoff.map(|_| 0),
            timezone: tz.to_string(),
            min_batch_amount: Decimal::ZERO,
            max_batch_size: 1000,
            active: true,
        }
    }

    /// Check times, cutoff and timezone
    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.timezone)?;
        for time in &self.scheduled_times {
            parse_hhmm(time)?;
        }
        if self.frequency.is_scheduled() && self.scheduled_times.is_empty() {
            return Err(Error::InvalidWindowConfig(format!(
                "{} frequency requires scheduled times",
                self.frequency
            )));
        }
        if let Some(hour) = self.cutoff_hour {
            if hour > 23 {
                return Err(Error::InvalidWindowConfig(format!("cutoff hour {} out of range", hour)));
            }
        }
        if let Some(minute) = self.cutoff_minute {
            if minute > 59 {
                return Err(Error::InvalidWindowConfig(format!(
                    "cutoff minute {} out of range",
                    minute
                )));
            }
        }
        Ok(())
    }
}

/// Parse "HH:MM"
pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| Error::InvalidWindowConfig(format!("Invalid time format '{}': {}", value, e)))
}

/// Look up an IANA timezone
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>().map_err(|_| Error::Timezone(name.to_string()))
}

/// Civil time in `tz` to an instant; DST gaps resolve to the first valid instant after
pub fn to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Validated, parsed form of a config
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSchedule {
    pub frequency: WindowFrequency,
    pub tz: Tz,
    times: Vec<NaiveTime>,
    cutoff: Option<NaiveTime>,
    start: NaiveTime,
    default_cutoff: NaiveTime,
    daily_time: NaiveTime,
    window: Duration,
}

fn hour(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h.min(23), 0, 0).unwrap_or(NaiveTime::MIN)
}

impl ResolvedSchedule {
    pub fn new(config: &SettlementWindowConfig, settings: &WindowSettings) -> Result<Self> {
        config.validate()?;
        let mut times = config
            .scheduled_times
            .iter()
            .map(|t| parse_hhmm(t))
            .collect::<Result<Vec<_>>>()?;
        times.sort();
        times.dedup();

        let cutoff = config.cutoff_hour.and_then(|h| {
            NaiveTime::from_hms_opt(h, config.cutoff_minute.unwrap_or(0), 0)
        });

        let schedule = Self {
            frequency: config.frequency,
            tz: parse_timezone(&config.timezone)?,
            daily_time: times
                .first()
                .copied()
                .map(Ok)
                .unwrap_or_else(|| parse_hhmm(&settings.default_daily_time))?,
            times,
            cutoff,
            start: hour(settings.business_day_start_hour),
            default_cutoff: hour(settings.default_cutoff_hour),
            window: Duration::minutes(settings.scheduled_window_minutes),
        };
        schedule.check_opens()?;
        Ok(schedule)
    }

    /// Reject rules under which the rail would never open
    fn check_opens(&self) -> Result<()> {
        let (first_open, cutoff) = match self.frequency {
            WindowFrequency::Realtime => return Ok(()),
            WindowFrequency::Hourly => (self.start, self.effective_cutoff()),
            WindowFrequency::Daily => (self.daily_time, self.effective_cutoff()),
            WindowFrequency::FourPerDay | WindowFrequency::Custom => match (self.times.first(), self.cutoff) {
                (Some(first), Some(cutoff)) => (*first, cutoff),
                _ => return Ok(()),
            },
        };
        if first_open >= cutoff {
            return Err(Error::InvalidWindowConfig(format!(
                "{} window opening at {} never precedes cutoff {}",
                self.frequency,
                first_open.format("%H:%M"),
                cutoff.format("%H:%M")
            )));
        }
        Ok(())
    }

    /// Hour the business day restarts after a holiday
    pub fn day_start(&self) -> NaiveTime {
        self.start
    }

    fn effective_cutoff(&self) -> NaiveTime {
        self.cutoff.unwrap_or(self.default_cutoff)
    }

    /// Scheduled starts that are not already past the absolute cutoff
    fn usable_times(&self) -> Vec<NaiveTime> {
        match self.cutoff {
            Some(cutoff) => {
                let usable: Vec<_> = self.times.iter().copied().filter(|t| *t < cutoff).collect();
                if usable.is_empty() {
                    self.times.clone()
                } else {
                    usable
                }
            }
            None => self.times.clone(),
        }
    }

    /// Open at local civil time, ignoring holidays
    pub fn is_open_local(&self, local: NaiveDateTime) -> bool {
        if self.frequency == WindowFrequency::Realtime {
            return true;
        }
        let t = local.time();
        if let Some(cutoff) = self.cutoff {
            if t >= cutoff {
                return false;
            }
        }
        match self.frequency {
            WindowFrequency::Realtime => true,
            WindowFrequency::Hourly => t >= self.start && t < self.effective_cutoff(),
            WindowFrequency::Daily => t < self.effective_cutoff(),
            WindowFrequency::FourPerDay | WindowFrequency::Custom => {
                self.containing_slot(local).is_some()
            }
        }
    }

    /// Start of the scheduled slot containing `local`, including slots opened before midnight
    fn containing_slot(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = local.date();
        let days = [today.pred_opt(), Some(today)];
        days.iter()
            .flatten()
            .flat_map(|day| self.times.iter().map(move |t| day.and_time(*t)))
            .find(|start| local >= *start && local < *start + self.window)
    }

    /// When the window open at `local` closes
    pub fn close_of_open_window(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.is_open_local(local) {
            return None;
        }
        let cutoff_today = self.cutoff.map(|c| local.date().and_time(c));
        let close = match self.frequency {
            WindowFrequency::Realtime => return None,
            WindowFrequency::Hourly | WindowFrequency::Daily => {
                local.date().and_time(self.effective_cutoff())
            }
            WindowFrequency::FourPerDay | WindowFrequency::Custom => {
                self.containing_slot(local)? + self.window
            }
        };
        Some(match cutoff_today {
            Some(c) if c > local && c < close => c,
            _ => close,
        })
    }

    /// Next batch instant after `from`; `inclusive` admits `from` itself
    pub fn next_window_local(&self, from: NaiveDateTime, inclusive: bool) -> NaiveDateTime {
        let date = from.date();
        let tomorrow = next_day(date);
        match self.frequency {
            WindowFrequency::Realtime => from,
            WindowFrequency::Hourly => {
                let on_the_hour = from.minute() == 0 && from.second() == 0 && from.nanosecond() == 0;
                let candidate = if inclusive && on_the_hour {
                    from
                } else {
                    truncate_to_hour(from) + Duration::hours(1)
                };
                if candidate.time() < self.start {
                    candidate.date().and_time(self.start)
                } else if candidate.time() >= self.effective_cutoff() {
                    next_day(candidate.date()).and_time(self.start)
                } else {
                    candidate
                }
            }
            WindowFrequency::FourPerDay | WindowFrequency::Custom => {
                let times = self.usable_times();
                let now = from.time();
                let next = times
                    .iter()
                    .find(|t| if inclusive { **t >= now } else { **t > now });
                match (next, times.first()) {
                    (Some(t), _) => date.and_time(*t),
                    (None, Some(first)) => tomorrow.and_time(*first),
                    (None, None) => tomorrow.and_time(self.daily_time),
                }
            }
            WindowFrequency::Daily => {
                let now = from.time();
                let today_ok = if inclusive {
                    now <= self.daily_time
                } else {
                    now < self.daily_time
                };
                if today_ok {
                    date.and_time(self.daily_time)
                } else {
                    tomorrow.and_time(self.daily_time)
                }
            }
        }
    }
}

fn truncate_to_hour(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(hour(dt.hour()))
}

pub(crate) fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn config(frequency: WindowFrequency, times: &[&str], cutoff: Option<u32>) -> SettlementWindowConfig {
        let mut cfg = SettlementWindowConfig::default_for(TenantId::new("t"), Rail::Ach);
        cfg.frequency = frequency;
        cfg.scheduled_times = times.iter().map(|t| t.to_string()).collect();
        cfg.cutoff_hour = cutoff;
        cfg.cutoff_minute = None;
        cfg.timezone = "UTC".to_string();
        cfg
    }

    fn resolved(cfg: &SettlementWindowConfig) -> ResolvedSchedule {
        ResolvedSchedule::new(cfg, &WindowSettings::default()).unwrap()
    }

    #[test]
    fn test_hourly_cutoff() {
        let s = resolved(&config(WindowFrequency::Hourly, &[], Some(17)));
        assert!(s.is_open_local(at(16, 59)));
        assert!(!s.is_open_local(at(17, 5)));
        assert!(!s.is_open_local(at(7, 59)));
        assert!(s.is_open_local(at(8, 0)));
    }

    #[test]
    fn test_scheduled_window_length() {
        let s = resolved(&config(WindowFrequency::FourPerDay, &["06:00", "12:00", "18:00", "23:50"], None));
        assert!(s.is_open_local(at(12, 0)));
        assert!(s.is_open_local(at(12, 29)));
        assert!(!s.is_open_local(at(12, 30)));
        assert!(!s.is_open_local(at(9, 0)));
        // 23:50 slot spills past midnight
        assert!(s.is_open_local(at(0, 10)));
    }

    #[test]
    fn test_absolute_cutoff_overrides_frequency() {
        let mut cfg = config(WindowFrequency::Custom, &["10:00", "16:45"], Some(16));
        cfg.cutoff_minute = Some(50);
        let s = resolved(&cfg);
        assert!(s.is_open_local(at(16, 49)));
        assert!(!s.is_open_local(at(16, 50)));
    }

    #[test]
    fn test_hourly_next_window() {
        let s = resolved(&config(WindowFrequency::Hourly, &[], Some(17)));
        assert_eq!(s.next_window_local(at(10, 20), false), at(11, 0));
        assert_eq!(s.next_window_local(at(6, 0), false), at(8, 0));
        let next = s.next_window_local(at(16, 10), false);
        assert_eq!(next, at(8, 0) + Duration::days(1));
        assert_eq!(s.next_window_local(at(8, 0), true), at(8, 0));
    }

    #[test]
    fn test_scheduled_next_window_wraps() {
        let s = resolved(&config(WindowFrequency::FourPerDay, &["06:00", "12:00", "18:00", "22:00"], None));
        assert_eq!(s.next_window_local(at(12, 0), false), at(18, 0));
        assert_eq!(s.next_window_local(at(11, 59), false), at(12, 0));
        assert_eq!(s.next_window_local(at(22, 30), false), at(6, 0) + Duration::days(1));
    }

    #[test]
    fn test_daily_next_window() {
        let s = resolved(&config(WindowFrequency::Daily, &[], Some(17)));
        assert_eq!(s.next_window_local(at(7, 0), false), at(9, 0));
        assert_eq!(s.next_window_local(at(9, 0), false), at(9, 0) + Duration::days(1));
    }

    #[test]
    fn test_close_of_open_window() {
        let s = resolved(&config(WindowFrequency::Custom, &["12:00"], None));
        assert_eq!(s.close_of_open_window(at(12, 10)), Some(at(12, 30)));
        assert_eq!(s.close_of_open_window(at(13, 0)), None);

        let s = resolved(&config(WindowFrequency::Hourly, &[], Some(17)));
        assert_eq!(s.close_of_open_window(at(9, 0)), Some(at(17, 0)));
    }

    #[test]
    fn test_validation() {
        assert!(config(WindowFrequency::Custom, &[], None).validate().is_err());
        assert!(config(WindowFrequency::Daily, &["25:00"], None).validate().is_err());
        let mut cfg = config(WindowFrequency::Daily, &[], None);
        cfg.timezone = "Mars/Olympus".to_string();
        assert!(matches!(cfg.validate(), Err(Error::Timezone(_))));
    }

    #[test]
    fn test_rejects_schedules_that_never_open() {
        let settings = WindowSettings::default();
        let never = |cfg: &SettlementWindowConfig| {
            matches!(ResolvedSchedule::new(cfg, &settings), Err(Error::InvalidWindowConfig(_)))
        };

        assert!(never(&config(WindowFrequency::Daily, &["09:00"], Some(8))));
        assert!(never(&config(WindowFrequency::Daily, &["09:00"], Some(9))));
        assert!(never(&config(WindowFrequency::Hourly, &[], Some(8))));
        assert!(never(&config(WindowFrequency::Hourly, &[], Some(6))));
        assert!(never(&config(WindowFrequency::Custom, &["12:00", "15:00"], Some(11))));

        assert!(!never(&config(WindowFrequency::Daily, &["07:30"], Some(8))));
        assert!(!never(&config(WindowFrequency::Hourly, &[], Some(9))));
        assert!(!never(&config(WindowFrequency::Custom, &["10:00", "15:00"], Some(11))));
        assert!(!never(&config(WindowFrequency::FourPerDay, &["06:00", "12:00"], None)));
    }

    #[test]
    fn test_to_utc_uses_tz_database() {
        let tz = parse_timezone("America/Sao_Paulo").unwrap();
        let utc = to_utc(tz, at(9, 0));
        assert_eq!(utc.hour(), 12);
    }
}
