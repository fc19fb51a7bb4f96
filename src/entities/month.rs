// 📅 Month Key - the (year, month) partition every page of the grid lives in
//
// Stored as the first day of the month so that it is always a valid calendar
// month and orders chronologically for free.

use crate::errors::ExpenseError;
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey(NaiveDate);

impl MonthKey {
    /// Build a key from a year and a 1-based month
    pub fn new(year: i32, month: u32) -> Result<Self, ExpenseError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(MonthKey)
            .ok_or(ExpenseError::InvalidMonth { year, month })
    }

    /// Month a date falls in
    pub fn of(date: NaiveDate) -> Self {
        // Day 1 exists in every month chrono can represent
        MonthKey(date.with_day(1).unwrap_or(date))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// Grid-state id, e.g. "2024-3"
    pub fn id(&self) -> String {
        format!("{}-{}", self.year(), self.month())
    }

    pub fn checked_add_months(&self, months: u32) -> Option<Self> {
        self.0.checked_add_months(Months::new(months)).map(MonthKey)
    }

    pub fn checked_sub_months(&self, months: u32) -> Option<Self> {
        self.0.checked_sub_months(Months::new(months)).map(MonthKey)
    }

    /// Same as `checked_add_months`, reported as a domain error
    pub fn add_months(&self, months: u32) -> Result<Self, ExpenseError> {
        self.checked_add_months(months)
            .ok_or_else(|| ExpenseError::DateOutOfRange {
                from: self.id(),
                months,
            })
    }

    pub fn next(&self) -> Option<Self> {
        self.checked_add_months(1)
    }

    pub fn previous(&self) -> Option<Self> {
        self.checked_sub_months(1)
    }

    pub fn next_year(&self) -> Option<Self> {
        self.checked_add_months(12)
    }

    pub fn previous_year(&self) -> Option<Self> {
        self.checked_sub_months(12)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%B %Y"))
    }
}
