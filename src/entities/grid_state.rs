// 🗂️ Grid State - per-month view state (column layout, filters, focused cell)
//
// One record per month ever visited, keyed by "{year}-{month}". Created lazily,
// updated on interaction, never deleted.

use super::month::MonthKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Layout of one column as the grid reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnState {
    pub col_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default)]
    pub hide: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_index: Option<u32>,
}

impl ColumnState {
    pub fn new(col_id: impl Into<String>, width: Option<u32>) -> Self {
        ColumnState {
            col_id: col_id.into(),
            width,
            hide: false,
            pinned: None,
            sort: None,
            sort_index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusedCell {
    pub row_index: usize,
    pub col_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridState {
    /// "{year}-{month}"
    pub id: String,
    pub year: i32,
    pub month: u32,

    /// Filter model, opaque to the core
    #[serde(default)]
    pub filter: Option<serde_json::Value>,

    /// Column order is the order of this list
    #[serde(default)]
    pub columns_state: Option<Vec<ColumnState>>,

    #[serde(default)]
    pub focused_cell: Option<FocusedCell>,
}

impl GridState {
    pub fn empty(month: MonthKey) -> Self {
        GridState {
            id: month.id(),
            year: month.year(),
            month: month.month(),
            filter: None,
            columns_state: None,
            focused_cell: None,
        }
    }
}

// ============================================================================
// GRID STATE STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GridStateStore {
    states: BTreeMap<String, GridState>,
}

impl GridStateStore {
    pub fn new() -> Self {
        GridStateStore {
            states: BTreeMap::new(),
        }
    }

    /// Rebuild from persisted records
    pub fn from_states(states: Vec<GridState>) -> Self {
        GridStateStore {
            states: states.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    fn entry(&mut self, month: MonthKey) -> &mut GridState {
        self.states
            .entry(month.id())
            .or_insert_with(|| GridState::empty(month))
    }

    pub fn upsert_column_layout(&mut self, month: MonthKey, layout: Vec<ColumnState>) {
        self.entry(month).columns_state = Some(layout);
    }

    pub fn upsert_filter(&mut self, month: MonthKey, filter: Option<serde_json::Value>) {
        self.entry(month).filter = filter;
    }

    pub fn upsert_focused_cell(&mut self, month: MonthKey, cell: Option<FocusedCell>) {
        self.entry(month).focused_cell = cell;
    }

    /// Create the record with `default_layout` unless the month was visited before.
    /// Returns true when a record was created.
    pub fn ensure_exists(&mut self, month: MonthKey, default_layout: Vec<ColumnState>) -> bool {
        if self.states.contains_key(&month.id()) {
            return false;
        }
        self.upsert_column_layout(month, default_layout);
        true
    }

    pub fn select_state(&self, month: MonthKey) -> Option<&GridState> {
        self.states.get(&month.id())
    }

    pub fn all(&self) -> impl Iterator<Item = &GridState> {
        self.states.values()
    }

    pub fn count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn march() -> MonthKey {
        MonthKey::new(2024, 3).unwrap()
    }

    #[test]
    fn test_upserts_create_record_lazily() {
        let mut store = GridStateStore::new();
        assert!(store.select_state(march()).is_none());

        store.upsert_filter(march(), Some(json!({"description": {"filter": "rent"}})));
        let state = store.select_state(march()).unwrap();

        assert_eq!(state.id, "2024-3");
        assert_eq!(state.year, 2024);
        assert_eq!(state.month, 3);
        assert!(state.columns_state.is_none());
        assert!(state.filter.is_some());
    }

    #[test]
    fn test_upserts_keep_other_fields() {
        let mut store = GridStateStore::new();
        store.upsert_column_layout(march(), vec![ColumnState::new("date", Some(120))]);
        store.upsert_focused_cell(
            march(),
            Some(FocusedCell {
                row_index: 4,
                col_id: "description".to_string(),
            }),
        );

        let state = store.select_state(march()).unwrap();
        assert_eq!(state.columns_state.as_ref().unwrap()[0].width, Some(120));
        assert_eq!(state.focused_cell.as_ref().unwrap().row_index, 4);

        store.upsert_focused_cell(march(), None);
        assert!(store.select_state(march()).unwrap().focused_cell.is_none());
        assert!(store.select_state(march()).unwrap().columns_state.is_some());
    }

    #[test]
    fn test_ensure_exists_is_noop_for_visited_month() {
        let mut store = GridStateStore::new();
        let custom = vec![ColumnState::new("description", Some(400))];
        let default = vec![ColumnState::new("description", Some(200))];

        assert!(store.ensure_exists(march(), custom.clone()));
        assert!(!store.ensure_exists(march(), default));

        let state = store.select_state(march()).unwrap();
        assert_eq!(state.columns_state.as_ref(), Some(&custom));
        assert_eq!(store.count(), 1);
    }
}
