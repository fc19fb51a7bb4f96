// 🧾 Expense Entity - one row of the month grid
//
// "The id is IDENTITY (never changes), everything else is a VALUE"
//
// - year/month are denormalized from date and drive the per-month queries
// - people maps person id -> amount; a missing key means nothing was entered
// - the four installment fields are either all set or all empty

use super::month::MonthKey;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amount per person id. `None` is a cell the user cleared.
pub type PeopleValues = BTreeMap<String, Option<f64>>;

// ============================================================================
// INSTALLMENT TAG
// ============================================================================

/// Chain membership of an expense, only available when fully tagged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentTag {
    /// Shared by every member of the chain
    pub installment_id: String,

    /// Position within the chain (1-based)
    pub installment: u32,

    /// Total chain length
    pub quantity: u32,

    /// True only for the anchor
    pub is_first: bool,
}

// ============================================================================
// EXPENSE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    /// Stable identity (UUID)
    pub id: String,

    pub date: NaiveDate,

    /// Free text, may end with an installment marker like "3/12"
    pub description: String,

    #[serde(default)]
    pub people: PeopleValues,

    pub year: i32,
    pub month: u32,

    // ========================================================================
    // INSTALLMENT CHAIN (all four or none)
    // ========================================================================
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installment_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installment: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installment_quantity: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_first_installment: Option<bool>,
}

impl Expense {
    /// Create a new, untagged expense with a fresh UUID
    pub fn new(date: NaiveDate, description: impl Into<String>) -> Self {
        Expense {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            description: description.into(),
            people: PeopleValues::new(),
            year: date.year(),
            month: date.month(),
            installment_id: None,
            installment: None,
            installment_quantity: None,
            is_first_installment: None,
        }
    }

    /// Empty row dated on the first day of the month
    pub fn blank(month: MonthKey) -> Self {
        Expense::new(month.first_day(), "")
    }

    pub fn with_person(mut self, person_id: impl Into<String>, amount: Option<f64>) -> Self {
        self.people.insert(person_id.into(), amount);
        self
    }

    pub fn month_key(&self) -> MonthKey {
        MonthKey::of(self.date)
    }

    /// Move the expense to another date, keeping year/month in sync
    pub fn set_date(&mut self, date: NaiveDate) {
        self.date = date;
        self.year = date.year();
        self.month = date.month();
    }

    /// Re-derive year/month from the date (after a raw field edit)
    pub fn sync_partition(&mut self) {
        self.year = self.date.year();
        self.month = self.date.month();
    }

    /// True iff all four installment fields are present
    pub fn is_installment(&self) -> bool {
        self.installment_tag().is_some()
    }

    /// Tagged, but not the anchor of its chain
    pub fn is_follower(&self) -> bool {
        matches!(self.installment_tag(), Some(tag) if !tag.is_first)
    }

    /// Chain membership, `None` unless fully tagged
    pub fn installment_tag(&self) -> Option<InstallmentTag> {
        match (
            &self.installment_id,
            self.installment,
            self.installment_quantity,
            self.is_first_installment,
        ) {
            (Some(id), Some(installment), Some(quantity), Some(is_first)) => Some(InstallmentTag {
                installment_id: id.clone(),
                installment,
                quantity,
                is_first,
            }),
            _ => None,
        }
    }

    /// Set all four installment fields at once
    pub fn set_installment_tag(&mut self, tag: InstallmentTag) {
        self.installment_id = Some(tag.installment_id);
        self.installment = Some(tag.installment);
        self.installment_quantity = Some(tag.quantity);
        self.is_first_installment = Some(tag.is_first);
    }

    /// Detach from any chain (clears all four fields)
    pub fn clear_installment(&mut self) {
        self.installment_id = None;
        self.installment = None;
        self.installment_quantity = None;
        self.is_first_installment = None;
    }

    /// Sum of every person's amount on this row
    pub fn total(&self) -> f64 {
        self.people.values().map(|v| v.unwrap_or(0.0)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_expense_creation_derives_partition() {
        let expense = Expense::new(date(2024, 3, 15), "Groceries");

        assert!(!expense.id.is_empty());
        assert_eq!(expense.year, 2024);
        assert_eq!(expense.month, 3);
        assert!(!expense.is_installment());
        assert!(expense.people.is_empty());
    }

    #[test]
    fn test_set_date_keeps_year_month_consistent() {
        let mut expense = Expense::new(date(2024, 12, 31), "Dinner");
        expense.set_date(date(2025, 1, 2));

        assert_eq!(expense.year, 2025);
        assert_eq!(expense.month, 1);
        assert_eq!(expense.month_key(), MonthKey::new(2025, 1).unwrap());
    }

    #[test]
    fn test_partial_tag_is_not_installment() {
        let mut expense = Expense::new(date(2024, 1, 1), "Rent");
        expense.installment_id = Some("chain".to_string());
        expense.installment = Some(1);

        assert!(!expense.is_installment());
        assert!(expense.installment_tag().is_none());

        expense.installment_quantity = Some(3);
        expense.is_first_installment = Some(true);
        assert!(expense.is_installment());
        assert!(!expense.is_follower());
    }

    #[test]
    fn test_tag_roundtrip_and_clear() {
        let mut expense = Expense::new(date(2024, 1, 1), "TV 2/10");
        let tag = InstallmentTag {
            installment_id: "abc".to_string(),
            installment: 2,
            quantity: 10,
            is_first: false,
        };
        expense.set_installment_tag(tag.clone());

        assert_eq!(expense.installment_tag(), Some(tag));
        assert!(expense.is_follower());

        expense.clear_installment();
        assert_eq!(expense.installment_id, None);
        assert_eq!(expense.installment, None);
        assert_eq!(expense.installment_quantity, None);
        assert_eq!(expense.is_first_installment, None);
    }

    #[test]
    fn test_total_ignores_cleared_cells() {
        let expense = Expense::new(date(2024, 1, 1), "Market")
            .with_person("a", Some(10.5))
            .with_person("b", None)
            .with_person("c", Some(4.5));

        assert_eq!(expense.total(), 15.0);
    }

    #[test]
    fn test_serde_uses_camel_case_and_iso_date() {
        let expense = Expense::new(date(2024, 5, 1), "Gas").with_person("p1", Some(20.0));
        let json = serde_json::to_value(&expense).unwrap();

        assert_eq!(json["date"], "2024-05-01");
        assert_eq!(json["people"]["p1"], 20.0);
        assert!(json.get("installmentId").is_none());

        let back: Expense = serde_json::from_value(json).unwrap();
        assert_eq!(back, expense);
    }
}
