use crate::entities::{Expense, GridState, Person};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::{info, warn};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything that survives a restart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    /// In grid order
    pub expenses: Vec<Expense>,

    /// In column order
    pub people: Vec<Person>,

    pub grid_states: Vec<GridState>,
}

// ============================================================================
// FLAT EXPENSE RECORD (CSV row / SQLite row)
// ============================================================================

/// Expense flattened to plain columns
///
/// - date is ISO `YYYY-MM-DD`
/// - people is a JSON object `{"<person id>": amount | null}`
/// - year/month are not stored, they are derived from the date on load
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExpenseRecord {
    #[serde(rename = "Id", default)]
    pub id: String,

    #[serde(rename = "Date")]
    pub date: String,

    #[serde(rename = "Description")]
    pub description: String,

    #[serde(rename = "People", default)]
    pub people: String,

    #[serde(rename = "Installment_Id", default)]
    pub installment_id: Option<String>,

    #[serde(rename = "Installment", default)]
    pub installment: Option<u32>,

    #[serde(rename = "Installment_Quantity", default)]
    pub installment_quantity: Option<u32>,

    #[serde(rename = "Is_First_Installment", default)]
    pub is_first_installment: Option<bool>,
}

impl ExpenseRecord {
    pub fn from_expense(expense: &Expense) -> Result<Self> {
        Ok(ExpenseRecord {
            id: expense.id.clone(),
            date: expense.date.format("%Y-%m-%d").to_string(),
            description: expense.description.clone(),
            people: serde_json::to_string(&expense.people)
                .context("Failed to serialize people")?,
            installment_id: expense.installment_id.clone(),
            installment: expense.installment,
            installment_quantity: expense.installment_quantity,
            is_first_installment: expense.is_first_installment,
        })
    }

    /// Rebuild the expense. A missing id gets a fresh UUID and a partially
    /// tagged row is detached from its chain.
    pub fn into_expense(self) -> Result<Expense> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid date {:?} (expected YYYY-MM-DD)", self.date))?;

        let mut expense = Expense::new(date, self.description);
        if !self.id.trim().is_empty() {
            expense.id = self.id.trim().to_string();
        }

        if !self.people.trim().is_empty() {
            expense.people = serde_json::from_str(&self.people)
                .with_context(|| format!("Invalid people JSON for expense {}", expense.id))?;
        }

        expense.installment_id = self.installment_id.filter(|id| !id.is_empty());
        expense.installment = self.installment;
        expense.installment_quantity = self.installment_quantity;
        expense.is_first_installment = self.is_first_installment;

        let any_tag = expense.installment_id.is_some()
            || expense.installment.is_some()
            || expense.installment_quantity.is_some()
            || expense.is_first_installment.is_some();
        if any_tag && !expense.is_installment() {
            warn!("Expense {} is partially tagged, detaching it", expense.id);
            expense.clear_installment();
        }

        Ok(expense)
    }
}

// ============================================================================
// SQLITE
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Expenses (position = row order in the grid)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            people TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            installment_id TEXT,
            installment INTEGER,
            installment_quantity INTEGER,
            is_first_installment INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS people (
            id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            name TEXT NOT NULL
        )",
        [],
    )?;

    // Grid state is opaque to the queries, stored as JSON
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grid_states (
            id TEXT PRIMARY KEY,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_month ON expenses(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_installment ON expenses(installment_id)",
        [],
    )?;

    Ok(())
}

/// Replace the stored state with `state`, atomically
pub fn save_state(conn: &mut Connection, state: &PersistedState) -> Result<()> {
    let tx = conn.transaction().context("Failed to start transaction")?;

    tx.execute("DELETE FROM expenses", [])?;
    tx.execute("DELETE FROM people", [])?;
    tx.execute("DELETE FROM grid_states", [])?;

    {
        let mut insert = tx.prepare(
            "INSERT INTO expenses (
                id, position, date, description, people, year, month,
                installment_id, installment, installment_quantity, is_first_installment
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for (position, expense) in state.expenses.iter().enumerate() {
            let record = ExpenseRecord::from_expense(expense)?;
            insert
                .execute(params![
                    record.id,
                    position as i64,
                    record.date,
                    record.description,
                    record.people,
                    expense.year,
                    expense.month,
                    record.installment_id,
                    record.installment,
                    record.installment_quantity,
                    record.is_first_installment,
                ])
                .with_context(|| format!("Failed to insert expense {}", expense.id))?;
        }

        let mut insert = tx.prepare("INSERT INTO people (id, position, name) VALUES (?1, ?2, ?3)")?;
        for (position, person) in state.people.iter().enumerate() {
            insert.execute(params![person.id, position as i64, person.name])?;
        }

        let mut insert = tx.prepare(
            "INSERT INTO grid_states (id, year, month, data) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for grid_state in &state.grid_states {
            let data = serde_json::to_string(grid_state)?;
            insert.execute(params![grid_state.id, grid_state.year, grid_state.month, data])?;
        }
    }

    tx.commit().context("Failed to commit state")?;
    info!(
        "Saved {} expenses, {} people, {} grid states",
        state.expenses.len(),
        state.people.len(),
        state.grid_states.len()
    );
    Ok(())
}

pub fn load_state(conn: &Connection) -> Result<PersistedState> {
    let mut stmt = conn.prepare(
        "SELECT id, date, description, people,
                installment_id, installment, installment_quantity, is_first_installment
         FROM expenses
         ORDER BY position",
    )?;
    let records = stmt
        .query_map([], |row| {
            Ok(ExpenseRecord {
                id: row.get(0)?,
                date: row.get(1)?,
                description: row.get(2)?,
                people: row.get(3)?,
                installment_id: row.get(4)?,
                installment: row.get(5)?,
                installment_quantity: row.get(6)?,
                is_first_installment: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let expenses = records
        .into_iter()
        .map(ExpenseRecord::into_expense)
        .collect::<Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT id, name FROM people ORDER BY position")?;
    let people = stmt
        .query_map([], |row| {
            Ok(Person {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare("SELECT id, data FROM grid_states ORDER BY year, month")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let grid_states = rows
        .into_iter()
        .map(|(id, data)| {
            serde_json::from_str(&data).with_context(|| format!("Invalid grid state {}", id))
        })
        .collect::<Result<Vec<GridState>>>()?;

    info!(
        "Loaded {} expenses, {} people, {} grid states",
        expenses.len(),
        people.len(),
        grid_states.len()
    );

    Ok(PersistedState {
        expenses,
        people,
        grid_states,
    })
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// CSV
// ============================================================================

pub fn load_csv(csv_path: &Path) -> Result<Vec<Expense>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut expenses = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let record: ExpenseRecord = result.context("Failed to deserialize expense")?;
        // Line 1 is the header
        let expense = record
            .into_expense()
            .with_context(|| format!("Invalid expense on line {}", index + 2))?;
        expenses.push(expense);
    }

    Ok(expenses)
}

pub fn write_csv(csv_path: &Path, expenses: &[Expense]) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(csv_path).context("Failed to create CSV file")?;

    for expense in expenses {
        wtr.serialize(ExpenseRecord::from_expense(expense)?)
            .with_context(|| format!("Failed to write expense {}", expense.id))?;
    }
    wtr.flush().context("Failed to flush CSV file")?;

    Ok(expenses.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{ColumnState, FocusedCell, InstallmentTag, MonthKey};
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Two people, a plain row, a two-installment chain, one grid state
    fn create_test_state() -> PersistedState {
        let karina = Person::new("Karina");
        let guilherme = Person::new("Guilherme");

        let plain = Expense::new(date(2024, 1, 15), "Market")
            .with_person(&karina.id, Some(120.5))
            .with_person(&guilherme.id, None);

        let mut anchor = Expense::new(date(2024, 1, 1), "TV 1/2").with_person(&karina.id, Some(300.0));
        let mut follower = Expense::new(date(2024, 2, 1), "TV 2/2").with_person(&karina.id, Some(300.0));
        for (expense, installment) in [(&mut anchor, 1), (&mut follower, 2)] {
            expense.set_installment_tag(InstallmentTag {
                installment_id: "chain-1".to_string(),
                installment,
                quantity: 2,
                is_first: installment == 1,
            });
        }

        let january = MonthKey::new(2024, 1).unwrap();
        let mut grid_state = GridState::empty(january);
        grid_state.columns_state = Some(vec![ColumnState::new("description", Some(320))]);
        grid_state.focused_cell = Some(FocusedCell {
            row_index: 1,
            col_id: karina.id.clone(),
        });

        PersistedState {
            expenses: vec![follower, plain, anchor],
            people: vec![karina, guilherme],
            grid_states: vec![grid_state],
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let state = create_test_state();

        save_state(&mut conn, &state).unwrap();
        let loaded = load_state(&conn).unwrap();

        assert_eq!(loaded, state, "Expenses, people and grid states should survive a save");
        assert_eq!(verify_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let mut conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let mut state = create_test_state();
        save_state(&mut conn, &state).unwrap();

        state.expenses.truncate(1);
        state.people.reverse();
        save_state(&mut conn, &state).unwrap();

        let loaded = load_state(&conn).unwrap();
        assert_eq!(loaded.expenses.len(), 1, "Deleted expenses should not come back");
        assert_eq!(loaded.people[0].name, "Guilherme", "Column order should be kept");
    }

    #[test]
    fn test_empty_database_loads_empty_state() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        // Running the setup twice must be harmless
        setup_database(&conn).unwrap();

        assert_eq!(load_state(&conn).unwrap(), PersistedState::default());
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expenses.csv");
        let state = create_test_state();

        let written = write_csv(&path, &state.expenses).unwrap();
        let loaded = load_csv(&path).unwrap();

        assert_eq!(written, 3);
        assert_eq!(loaded, state.expenses);
    }

    #[test]
    fn test_csv_minimal_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Date,Description").unwrap();
        writeln!(file, "2024-03-05,Coffee").unwrap();
        writeln!(file, "2024-12-31,Rent 1/3").unwrap();

        let expenses = load_csv(file.path()).unwrap();

        assert_eq!(expenses.len(), 2);
        assert!(!expenses[0].id.is_empty(), "Missing ids should be generated");
        assert_ne!(expenses[0].id, expenses[1].id);
        assert_eq!((expenses[1].year, expenses[1].month), (2024, 12));
        assert!(expenses[0].people.is_empty());
        assert!(!expenses[1].is_installment(), "Markers are only expanded on edit");
    }

    #[test]
    fn test_csv_invalid_date_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Date,Description").unwrap();
        writeln!(file, "2024-01-01,Ok").unwrap();
        writeln!(file, "31/01/2024,Wrong format").unwrap();

        let error = load_csv(file.path()).unwrap_err();
        assert!(
            format!("{:#}", error).contains("line 3"),
            "Error should point at the bad line: {:#}",
            error
        );
    }

    #[test]
    fn test_partial_tag_is_detached_on_load() {
        let record = ExpenseRecord {
            id: "x".to_string(),
            date: "2024-01-01".to_string(),
            description: "Broken 1/3".to_string(),
            people: String::new(),
            installment_id: Some("chain".to_string()),
            installment: Some(1),
            installment_quantity: None,
            is_first_installment: Some(true),
        };

        let expense = record.into_expense().unwrap();

        assert_eq!(expense.id, "x");
        assert_eq!(expense.installment_id, None);
        assert_eq!(expense.installment, None);
        assert_eq!(expense.is_first_installment, None);
    }
}
