//! Banking holiday calendar entries

use crate::types::Rail;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full or partial closure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Closure {
    /// Closed all day
    FullDay,
    /// Closed between `start` and `end` local time
    Partial {
        /// Closure start
        start: NaiveTime,
        /// Closure end (exclusive)
        end: NaiveTime,
    },
}

/// A banking holiday in one country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    /// Holiday ID
    pub id: Uuid,
    /// ISO country code
    pub country: String,
    /// Local date
    pub date: NaiveDate,
    /// Display name
    pub name: String,
    /// Rails closed; empty means every rail
    pub affected_rails: Vec<Rail>,
    /// Closure shape
    pub closure: Closure,
}

impl Holiday {
    /// Full-day holiday affecting every rail in `country`
    pub fn new(country: impl Into<String>, date: NaiveDate, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            country: country.into().to_uppercase(),
            date,
            name: name.into(),
            affected_rails: Vec::new(),
            closure: Closure::FullDay,
        }
    }

    /// Restrict to specific rails
    pub fn for_rails(mut self, rails: Vec<Rail>) -> Self {
        self.affected_rails = rails;
        self
    }

    /// Make this a partial closure
    pub fn partial(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.closure = Closure::Partial { start, end };
        self
    }

    /// Whether the holiday concerns `rail`
    pub fn applies_to(&self, rail: Rail) -> bool {
        self.affected_rails.is_empty() || self.affected_rails.contains(&rail)
    }

    /// Whether `rail` is closed at local time `time` on this date
    pub fn blocks(&self, rail: Rail, time: NaiveTime) -> bool {
        if !self.applies_to(rail) {
            return false;
        }
        match self.closure {
            Closure::FullDay => true,
            Closure::Partial { start, end } => time >= start && time < end,
        }
    }

    /// Whether the whole business day is lost
    pub fn is_full_day(&self) -> bool {
        matches!(self.closure, Closure::FullDay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_full_day_blocks_all_rails() {
        let day = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        let holiday = Holiday::new("us", day, "Christmas Day");
        assert_eq!(holiday.country, "US");
        assert!(holiday.blocks(Rail::Ach, time(12, 0)));
        assert!(holiday.blocks(Rail::Wire, time(0, 0)));
    }

    #[test]
    fn test_partial_closure_and_rail_filter() {
        let day = NaiveDate::from_ymd_opt(2026, 11, 27).unwrap();
        let holiday = Holiday::new("US", day, "Day after Thanksgiving")
            .for_rails(vec![Rail::Wire])
            .partial(time(13, 0), time(23, 59));

        assert!(!holiday.is_full_day());
        assert!(!holiday.blocks(Rail::Ach, time(14, 0)));
        assert!(!holiday.blocks(Rail::Wire, time(12, 59)));
        assert!(holiday.blocks(Rail::Wire, time(13, 0)));
    }
}
