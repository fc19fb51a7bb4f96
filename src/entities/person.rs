// 👤 Person Entity - one amount column of the grid
//
// Columns are plain data: a Person list plus a pure mapping to column
// descriptors. Adding/removing a person is an ordinary registry call.

use super::expense::Expense;
use crate::errors::ExpenseError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// People every new workspace starts with
pub const DEFAULT_PEOPLE: [&str; 2] = ["Karina", "Guilherme"];

/// Default width of a person column, in pixels
pub const PERSON_COLUMN_WIDTH: u16 = 150;

// ============================================================================
// PERSON ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Stable identity (UUID), used as the key of `Expense::people`
    pub id: String,

    /// Display name (header of the column)
    pub name: String,
}

impl Person {
    pub fn new(name: impl Into<String>) -> Self {
        Person {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

// ============================================================================
// COLUMN DESCRIPTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Date,
    Text,
    Currency,
}

/// What the grid needs to render one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub field: String,
    pub header_name: String,
    pub kind: ColumnKind,
    pub width: Option<u16>,
    pub flex: Option<u16>,
    pub editable: bool,
}

/// Date and description columns shown before the people
pub fn default_column_descriptors() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor {
            field: "date".to_string(),
            header_name: "Date".to_string(),
            kind: ColumnKind::Date,
            width: Some(150),
            flex: None,
            editable: true,
        },
        ColumnDescriptor {
            field: "description".to_string(),
            header_name: "Description".to_string(),
            kind: ColumnKind::Text,
            width: None,
            flex: Some(1),
            editable: true,
        },
    ]
}

/// Column for one person
pub fn column_descriptor(person: &Person) -> ColumnDescriptor {
    ColumnDescriptor {
        field: person.id.clone(),
        header_name: person.name.clone(),
        kind: ColumnKind::Currency,
        width: Some(PERSON_COLUMN_WIDTH),
        flex: None,
        editable: true,
    }
}

// ============================================================================
// PERSON REGISTRY
// ============================================================================

/// Ordered list of people (column order)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRegistry {
    people: Vec<Person>,
}

impl PersonRegistry {
    /// Empty registry (used when loading from storage)
    pub fn new() -> Self {
        PersonRegistry { people: Vec::new() }
    }

    /// Registry seeded with one person per name
    pub fn with_names<S: AsRef<str>>(names: &[S]) -> Self {
        PersonRegistry {
            people: names.iter().map(|n| Person::new(n.as_ref())).collect(),
        }
    }

    /// Registry with the default people
    pub fn with_defaults() -> Self {
        Self::with_names(&DEFAULT_PEOPLE)
    }

    pub fn from_people(people: Vec<Person>) -> Self {
        PersonRegistry { people }
    }

    /// Append a person at the end
    pub fn add(&mut self, name: impl Into<String>) -> Person {
        let person = Person::new(name);
        self.people.push(person.clone());
        person
    }

    /// Insert a person right after `after_id` (or at the end if unknown)
    pub fn add_after(&mut self, after_id: &str, name: impl Into<String>) -> Person {
        let person = Person::new(name);
        match self.people.iter().position(|p| p.id == after_id) {
            Some(index) => self.people.insert(index + 1, person.clone()),
            None => self.people.push(person.clone()),
        }
        person
    }

    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> Result<(), ExpenseError> {
        let person = self
            .people
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ExpenseError::PersonNotFound(id.to_string()))?;
        person.name = name.into();
        Ok(())
    }

    /// Remove a person; the last one can never be removed
    pub fn remove(&mut self, id: &str) -> Result<Person, ExpenseError> {
        let index = self
            .people
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ExpenseError::PersonNotFound(id.to_string()))?;
        if self.people.len() <= 1 {
            return Err(ExpenseError::LastPerson);
        }
        Ok(self.people.remove(index))
    }

    pub fn find(&self, id: &str) -> Option<&Person> {
        self.people.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[Person] {
        &self.people
    }

    pub fn count(&self) -> usize {
        self.people.len()
    }

    /// Date, description, then one column per person
    pub fn column_descriptors(&self) -> Vec<ColumnDescriptor> {
        let mut columns = default_column_descriptors();
        columns.extend(self.people.iter().map(column_descriptor));
        columns
    }
}

/// Per-person sums over a set of rows (the pinned totals row)
///
/// Every registered person is present (0 when empty); amounts for ids that are
/// no longer registered are still summed under their id.
pub fn people_totals(expenses: &[Expense], people: &[Person]) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, f64> =
        people.iter().map(|p| (p.id.clone(), 0.0)).collect();

    for expense in expenses {
        for (person_id, value) in &expense.people {
            *totals.entry(person_id.clone()).or_insert(0.0) += value.unwrap_or(0.0);
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_registry_defaults() {
        let registry = PersonRegistry::with_defaults();

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.all()[0].name, "Karina");
        assert_eq!(registry.all()[1].name, "Guilherme");
        assert_ne!(registry.all()[0].id, registry.all()[1].id);
    }

    #[test]
    fn test_add_after_keeps_column_order() {
        let mut registry = PersonRegistry::with_names(&["A", "C"]);
        let first_id = registry.all()[0].id.clone();

        registry.add_after(&first_id, "B");
        let names: Vec<&str> = registry.all().iter().map(|p| p.name.as_str()).collect();

        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_rename_and_unknown_person() {
        let mut registry = PersonRegistry::with_names(&["A"]);
        let id = registry.all()[0].id.clone();

        registry.rename(&id, "Alice").unwrap();
        assert_eq!(registry.find(&id).unwrap().name, "Alice");

        assert_eq!(
            registry.rename("missing", "X"),
            Err(ExpenseError::PersonNotFound("missing".to_string()))
        );
    }

    #[test]
    fn test_last_person_cannot_be_removed() {
        let mut registry = PersonRegistry::with_names(&["A", "B"]);
        let a = registry.all()[0].id.clone();
        let b = registry.all()[1].id.clone();

        assert_eq!(registry.remove(&a).unwrap().name, "A");
        assert_eq!(registry.remove(&b), Err(ExpenseError::LastPerson));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_column_descriptors_follow_people() {
        let registry = PersonRegistry::with_names(&["A", "B"]);
        let columns = registry.column_descriptors();

        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0].kind, ColumnKind::Date);
        assert_eq!(columns[1].field, "description");
        assert_eq!(columns[2].field, registry.all()[0].id);
        assert_eq!(columns[3].header_name, "B");
        assert_eq!(columns[3].width, Some(PERSON_COLUMN_WIDTH));
    }

    #[test]
    fn test_people_totals() {
        let registry = PersonRegistry::with_names(&["A", "B", "C"]);
        let [a, b, c] = [0, 1, 2].map(|i| registry.all()[i].id.clone());
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();

        let expenses = vec![
            Expense::new(day, "1").with_person(&a, Some(10.0)).with_person(&b, None),
            Expense::new(day, "2").with_person(&a, Some(5.0)).with_person(&b, Some(2.5)),
            Expense::new(day, "3").with_person("ghost", Some(1.0)),
        ];

        let totals = people_totals(&expenses, registry.all());
        assert_eq!(totals[&a], 15.0);
        assert_eq!(totals[&b], 2.5);
        assert_eq!(totals[&c], 0.0);
        assert_eq!(totals["ghost"], 1.0);
    }
}
