// 🔁 Person-Value Propagation - carry amount edits forward along a chain
//
// Changing what a person pays on one installment changes it for every later
// installment of the same chain. Earlier installments are history and stay.

use crate::entities::{Expense, PeopleValues};
use crate::store::ExpenseStore;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub expense_id: String,

    /// Person entries that differed from the stored record
    pub changed: PeopleValues,

    /// Later chain members that received the changed entries
    pub propagated: usize,
}

/// Person entries of `edited` whose value differs from `stored`.
/// An entry dropped from `edited` counts as cleared (`None`).
/// Without a stored record every entry counts as changed.
pub fn changed_people(stored: Option<&Expense>, edited: &Expense) -> PeopleValues {
    let Some(stored) = stored else {
        return edited.people.clone();
    };

    let mut changed: PeopleValues = edited
        .people
        .iter()
        .filter(|(person, value)| stored.people.get(*person) != Some(value))
        .map(|(person, value)| (person.clone(), *value))
        .collect();
    for person in stored.people.keys() {
        if !edited.people.contains_key(person) {
            changed.insert(person.clone(), None);
        }
    }
    changed
}

/// Store `edited` and merge its changed person entries into every member of
/// its chain dated in a strictly later month. One undo step.
pub fn propagate(store: &mut ExpenseStore, edited: &Expense) -> PropagationReport {
    let stored = store.get(&edited.id);
    if stored.is_none() {
        warn!("Expense {} is not in the store, propagating anyway", edited.id);
    }
    let changed = changed_people(stored.as_ref(), edited);

    let mut report = PropagationReport {
        expense_id: edited.id.clone(),
        changed: changed.clone(),
        propagated: 0,
    };

    let chain_id = match &edited.installment_id {
        Some(id) => id.clone(),
        None => {
            store.put(edited.clone());
            return report;
        }
    };

    let edited_month = edited.month_key();
    let record = edited.clone();
    report.propagated = store.apply("update people", |d| {
        d.put(record);
        if changed.is_empty() {
            return 0;
        }
        d.update_where(
            |e| {
                e.installment_id.as_deref() == Some(chain_id.as_str())
                    && e.id != edited.id
                    && e.month_key() > edited_month
            },
            |e| {
                for (person, value) in &changed {
                    e.people.insert(person.clone(), *value);
                }
            },
        )
    });

    debug!(
        "Propagated {} person value(s) of {} to {} later installment(s)",
        report.changed.len(),
        edited.id,
        report.propagated
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MonthKey;
    use crate::reconciliation::ReconciliationEngine;
    use chrono::NaiveDate;

    /// Store with the chain "Rent 1/3" (Jan..Mar 2024) plus one unrelated row
    fn setup() -> (ExpenseStore, String, Vec<Expense>) {
        let mut store = ExpenseStore::new();
        let rent = Expense::new(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), "Rent")
            .with_person("p", Some(10.0))
            .with_person("q", Some(3.0));
        let other = Expense::new(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), "Other")
            .with_person("p", Some(1.0));
        store.add_many(vec![rent.clone(), other]);

        let report = ReconciliationEngine::new()
            .reconcile(&mut store, MonthKey::new(2024, 1).unwrap(), &rent, "Rent 1/3")
            .unwrap();
        let chain_id = report.installment_id.unwrap();

        let mut members = store.query(|e| e.installment_id.as_deref() == Some(chain_id.as_str()));
        members.sort_by_key(|e| e.installment);
        (store, chain_id, members)
    }

    fn amount(store: &ExpenseStore, id: &str, person: &str) -> Option<f64> {
        store.get(id).and_then(|e| e.people.get(person).copied().flatten())
    }

    #[test]
    fn test_anchor_change_reaches_later_installments_scenario_e() {
        let (mut store, _, members) = setup();
        let mut anchor = members[0].clone();
        anchor.people.insert("p".to_string(), Some(20.0));

        let report = propagate(&mut store, &anchor);

        assert_eq!(report.propagated, 2);
        for member in &members {
            assert_eq!(amount(&store, &member.id, "p"), Some(20.0), "{}", member.description);
            assert_eq!(amount(&store, &member.id, "q"), Some(3.0), "unchanged entry kept");
        }
    }

    #[test]
    fn test_earlier_installments_are_untouched() {
        let (mut store, _, members) = setup();
        let mut middle = members[1].clone();
        middle.people.insert("p".to_string(), Some(7.0));

        let report = propagate(&mut store, &middle);

        assert_eq!(report.propagated, 1);
        assert_eq!(amount(&store, &members[0].id, "p"), Some(10.0));
        assert_eq!(amount(&store, &members[1].id, "p"), Some(7.0));
        assert_eq!(amount(&store, &members[2].id, "p"), Some(7.0));
    }

    #[test]
    fn test_only_changed_entries_are_merged() {
        let (mut store, _, members) = setup();
        // The last installment was adjusted by hand for q
        store.update(&members[2].id, |e| {
            e.people.insert("q".to_string(), Some(99.0));
        });

        let mut anchor = store.get(&members[0].id).unwrap();
        anchor.people.insert("p".to_string(), Some(15.0));
        anchor.people.insert("new".to_string(), None);
        let report = propagate(&mut store, &anchor);

        assert_eq!(report.changed.len(), 2);
        assert_eq!(amount(&store, &members[2].id, "p"), Some(15.0));
        assert_eq!(amount(&store, &members[2].id, "q"), Some(99.0));
        assert!(store.get(&members[2].id).unwrap().people.contains_key("new"));
    }

    #[test]
    fn test_removed_entry_is_cleared_on_later_installments() {
        let (mut store, _, members) = setup();
        let mut anchor = members[0].clone();
        anchor.people.remove("q");

        let report = propagate(&mut store, &anchor);

        assert_eq!(report.changed.get("q"), Some(&None));
        assert_eq!(report.propagated, 2);
        assert!(!store.get(&members[0].id).unwrap().people.contains_key("q"));
        for member in &members[1..] {
            assert_eq!(amount(&store, &member.id, "q"), None, "{}", member.description);
            assert_eq!(amount(&store, &member.id, "p"), Some(10.0));
        }
    }

    #[test]
    fn test_unchained_expense_is_plain_update() {
        let (mut store, _, members) = setup();
        let mut other = store.query(|e| e.description == "Other")[0].clone();
        other.people.insert("p".to_string(), Some(50.0));

        let report = propagate(&mut store, &other);

        assert_eq!(report.propagated, 0);
        assert_eq!(amount(&store, &other.id, "p"), Some(50.0));
        assert_eq!(amount(&store, &members[1].id, "p"), Some(10.0));
    }

    #[test]
    fn test_propagation_is_one_undo_step() {
        let (mut store, _, members) = setup();
        let mut anchor = members[0].clone();
        anchor.people.insert("p".to_string(), Some(30.0));
        propagate(&mut store, &anchor);

        assert!(store.undo());
        for member in &members {
            assert_eq!(amount(&store, &member.id, "p"), Some(10.0));
        }
    }

    #[test]
    fn test_unchanged_people_record_nothing() {
        let (mut store, _, members) = setup();
        let steps = store.history().entries().len();

        let report = propagate(&mut store, &members[0]);

        assert!(report.changed.is_empty());
        assert_eq!(report.propagated, 0);
        assert_eq!(store.history().entries().len(), steps);
    }
}
