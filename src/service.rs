// 🧮 Expense Service - what the month grid talks to
//
// Owns the expense store, the people (columns) and the per-month grid states,
// and turns grid events into store batches:
//
//   description committed  → ReconciliationEngine
//   person value committed → propagation
//   row moved / deleted / inserted → plain store batches
//
// People and grid states are not part of the undo history; only expenses are.

use crate::config::Config;
use crate::db::PersistedState;
use crate::debounce::Debouncer;
use crate::entities::{
    ColumnDescriptor, ColumnState, Expense, FocusedCell, GridState, GridStateStore, MonthKey,
    Person, PersonRegistry, people_totals,
};
use crate::errors::ExpenseError;
use crate::propagation::{propagate, PropagationReport};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::store::{ExpenseStore, SubscriptionId};
use chrono::Days;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::time::Instant;

pub struct ExpenseService {
    store: ExpenseStore,
    people: PersonRegistry,
    grid_states: GridStateStore,
    engine: ReconciliationEngine,
    layouts: Debouncer<MonthKey, Vec<ColumnState>>,
}

impl ExpenseService {
    /// Empty workspace with the configured default people
    pub fn new(config: &Config) -> Self {
        ExpenseService {
            store: ExpenseStore::with_history_limit(config.history_limit),
            people: PersonRegistry::with_names(&config.default_people),
            grid_states: GridStateStore::new(),
            engine: ReconciliationEngine::with_max_installments(config.max_installments),
            layouts: Debouncer::new(config.layout_debounce()),
        }
    }

    /// Workspace restored from storage; no people stored means default people
    pub fn from_state(config: &Config, state: PersistedState) -> Self {
        let people = if state.people.is_empty() {
            PersonRegistry::with_names(&config.default_people)
        } else {
            PersonRegistry::from_people(state.people)
        };

        ExpenseService {
            store: ExpenseStore::from_expenses(state.expenses, config.history_limit),
            people,
            grid_states: GridStateStore::from_states(state.grid_states),
            engine: ReconciliationEngine::with_max_installments(config.max_installments),
            layouts: Debouncer::new(config.layout_debounce()),
        }
    }

    /// Everything to persist. Pending column layouts are flushed first.
    pub fn to_state(&mut self) -> PersistedState {
        self.flush_all_layouts();
        PersistedState {
            expenses: self.store.snapshot().as_ref().clone(),
            people: self.people.all().to_vec(),
            grid_states: self.grid_states.all().cloned().collect(),
        }
    }

    pub fn store(&self) -> &ExpenseStore {
        &self.store
    }

    pub fn people(&self) -> &PersonRegistry {
        &self.people
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Rows of one month, in grid order
    pub fn select_month(&self, month: MonthKey) -> Vec<Expense> {
        let (year, month) = (month.year(), month.month());
        self.store.query(|e| e.year == year && e.month == month)
    }

    /// Call `callback` with the month's rows after every committed change
    pub fn subscribe_month<F>(&mut self, month: MonthKey, mut callback: F) -> SubscriptionId
    where
        F: FnMut(&[Expense]) + Send + 'static,
    {
        let (year, month) = (month.year(), month.month());
        self.store.subscribe(move |snapshot| {
            let rows: Vec<Expense> = snapshot
                .iter()
                .filter(|e| e.year == year && e.month == month)
                .cloned()
                .collect();
            callback(&rows);
        })
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Pinned totals row: sum per person for the month
    pub fn month_totals(&self, month: MonthKey) -> BTreeMap<String, f64> {
        people_totals(&self.select_month(month), self.people.all())
    }

    pub fn column_descriptors(&self) -> Vec<ColumnDescriptor> {
        self.people.column_descriptors()
    }

    /// Layout of a month never visited before
    pub fn default_layout(&self) -> Vec<ColumnState> {
        self.column_descriptors()
            .into_iter()
            .map(|c| ColumnState::new(c.field, c.width.map(u32::from)))
            .collect()
    }

    // ========================================================================
    // GRID EVENTS
    // ========================================================================

    pub fn on_description_committed(
        &mut self,
        month: MonthKey,
        expense: &Expense,
        new_description: &str,
    ) -> Result<ReconciliationReport, ExpenseError> {
        self.engine
            .reconcile(&mut self.store, month, expense, new_description)
    }

    pub fn on_person_value_committed(
        &mut self,
        month: MonthKey,
        expense: &Expense,
    ) -> PropagationReport {
        debug!("Person value committed on {} ({})", expense.id, month.id());
        propagate(&mut self.store, expense)
    }

    /// Any other cell edit (the date). Year/month follow the new date.
    pub fn on_row_updated(&mut self, expense: &Expense) -> bool {
        let mut expense = expense.clone();
        expense.sync_partition();
        self.store.put(expense)
    }

    /// Drag `from_id` onto `to_id`. Followers stay where their anchor put them.
    pub fn on_row_moved(&mut self, month: MonthKey, from_id: &str, to_id: &str) -> bool {
        if let Some(from) = self.store.get(from_id) {
            if from.is_follower() {
                warn!("Refusing to move follower installment {}", from_id);
                return false;
            }
        }
        debug!("Move {} → {} in {}", from_id, to_id, month.id());
        self.store.reorder(from_id, to_id)
    }

    /// Delete rows. Followers are not cascaded, but when an anchor goes its
    /// surviving followers are detached into plain rows in the same batch, so
    /// no chain is ever left without an anchor.
    pub fn on_row_deleted<S: AsRef<str>>(&mut self, month: MonthKey, ids: &[S]) -> usize {
        let (removed, detached) = self.store.apply("delete rows", |d| {
            let orphaned: Vec<String> = ids
                .iter()
                .filter_map(|id| d.get(id.as_ref()))
                .filter(|e| e.is_installment() && !e.is_follower())
                .filter_map(|e| e.installment_id.clone())
                .collect();

            let removed = d.delete(ids.iter().map(|id| id.as_ref()));
            let detached = if orphaned.is_empty() {
                0
            } else {
                d.update_where(
                    |e| matches!(&e.installment_id, Some(id) if orphaned.contains(id)),
                    |e| e.clear_installment(),
                )
            };
            (removed, detached)
        });

        if detached > 0 {
            info!("Detached {} installment(s) whose anchor was deleted", detached);
        }
        debug!("Deleted {} row(s) in {}", removed, month.id());
        removed
    }

    /// Blank row placed before the month's row at `at_index`, or appended when
    /// the month has fewer rows
    pub fn on_row_inserted(&mut self, month: MonthKey, at_index: usize) -> Expense {
        let blank = Expense::blank(month);
        let row = blank.clone();
        let (year, month_number) = (month.year(), month.month());

        self.store.apply("insert row", |d| {
            let target = d
                .iter()
                .filter(|e| e.year == year && e.month == month_number)
                .nth(at_index)
                .map(|e| e.id.clone());
            match target.and_then(|id| d.position(&id)) {
                Some(index) => d.insert_at(index, row),
                None => d.add(row),
            }
        });
        blank
    }

    pub fn append_blank_row(&mut self, month: MonthKey) -> Expense {
        let blank = Expense::blank(month);
        self.store.apply("append row", |d| d.add(blank.clone()));
        blank
    }

    /// `count` rows "This is a description N", one per day from the 1st
    pub fn generate_sample_month(&mut self, month: MonthKey, count: usize) -> usize {
        let rows: Vec<Expense> = (0..count)
            .filter_map(|index| {
                let date = month.first_day().checked_add_days(Days::new(index as u64))?;
                let mut row = Expense::blank(month);
                row.set_date(date);
                row.description = format!("This is a description {}", index + 1);
                Some(row)
            })
            .collect();

        let added = self.store.apply("sample data", |d| d.add_many(rows));
        info!("Generated {} sample rows for {}", added, month);
        added
    }

    pub fn undo(&mut self) -> bool {
        self.store.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.store.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.store.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.store.can_redo()
    }

    // ========================================================================
    // PEOPLE (COLUMNS)
    // ========================================================================

    pub fn add_person(&mut self, name: &str) -> Person {
        self.people.add(name)
    }

    pub fn add_person_after(&mut self, after_id: &str, name: &str) -> Person {
        self.people.add_after(after_id, name)
    }

    pub fn rename_person(&mut self, id: &str, name: &str) -> Result<(), ExpenseError> {
        self.people.rename(id, name)
    }

    /// Remove a column. Amounts already entered for the person are kept.
    pub fn remove_person(&mut self, id: &str) -> Result<Person, ExpenseError> {
        self.people.remove(id)
    }

    // ========================================================================
    // GRID STATE
    // ========================================================================

    pub fn select_grid_state(&self, month: MonthKey) -> Option<&GridState> {
        self.grid_states.select_state(month)
    }

    pub fn ensure_grid_state(&mut self, month: MonthKey, default_layout: Vec<ColumnState>) -> bool {
        self.grid_states.ensure_exists(month, default_layout)
    }

    pub fn upsert_column_layout(&mut self, month: MonthKey, layout: Vec<ColumnState>) {
        self.grid_states.upsert_column_layout(month, layout);
    }

    pub fn upsert_filter(&mut self, month: MonthKey, filter: Option<serde_json::Value>) {
        self.grid_states.upsert_filter(month, filter);
    }

    pub fn upsert_focused_cell(&mut self, month: MonthKey, cell: Option<FocusedCell>) {
        self.grid_states.upsert_focused_cell(month, cell);
    }

    /// Column resize/drag event; persisted once the month has been quiet
    pub fn queue_column_layout(&mut self, month: MonthKey, layout: Vec<ColumnState>, now: Instant) {
        self.layouts.push(month, layout, now);
    }

    /// Persist the layouts whose quiet window elapsed, returns how many
    pub fn flush_layouts(&mut self, now: Instant) -> usize {
        let ready = self.layouts.flush_expired(now);
        let count = ready.len();
        for (month, layout) in ready {
            self.grid_states.upsert_column_layout(month, layout);
        }
        count
    }

    pub fn flush_all_layouts(&mut self) -> usize {
        let pending = self.layouts.flush_all();
        let count = pending.len();
        for (month, layout) in pending {
            self.grid_states.upsert_column_layout(month, layout);
        }
        count
    }

    /// Leaving `from` for `to`: remember where the cursor was, make sure `to`
    /// has a grid state, and return it
    pub fn on_month_changed(
        &mut self,
        from: MonthKey,
        to: MonthKey,
        focused_cell: Option<FocusedCell>,
        default_layout: Vec<ColumnState>,
    ) -> GridState {
        self.flush_all_layouts();
        self.grid_states.upsert_focused_cell(from, focused_cell);
        self.grid_states.ensure_exists(to, default_layout);
        debug!("Month changed {} → {}", from, to);

        self.grid_states
            .select_state(to)
            .cloned()
            .unwrap_or_else(|| GridState::empty(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::ChainDecision;
    use chrono::NaiveDate;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn month(y: i32, m: u32) -> MonthKey {
        MonthKey::new(y, m).unwrap()
    }

    fn service() -> ExpenseService {
        ExpenseService::new(&Config::default())
    }

    fn descriptions(rows: &[Expense]) -> Vec<&str> {
        rows.iter().map(|e| e.description.as_str()).collect()
    }

    /// January rows "a", "b", "c" with a February row between "a" and "b"
    fn interleaved() -> ExpenseService {
        let mut service = service();
        let jan = |d: &str| Expense::new(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), d);
        let feb = Expense::new(NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(), "feb");
        service
            .store
            .add_many(vec![jan("a"), feb, jan("b"), jan("c")]);
        service
    }

    #[test]
    fn test_new_service_has_default_people() {
        let service = service();
        let names: Vec<&str> = service.people().all().iter().map(|p| p.name.as_str()).collect();

        assert_eq!(names, vec!["Karina", "Guilherme"]);
        assert_eq!(service.column_descriptors().len(), 4);
        assert_eq!(service.default_layout()[2].width, Some(150));
    }

    #[test]
    fn test_row_inserted_before_month_row() {
        let mut service = interleaved();

        let blank = service.on_row_inserted(month(2024, 1), 1);

        let rows = service.select_month(month(2024, 1));
        assert_eq!(descriptions(&rows), vec!["a", "", "b", "c"]);
        assert_eq!(rows[1].id, blank.id);
        assert_eq!(blank.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        // In the whole collection the blank row lands right before "b"
        let all = service.store().snapshot();
        assert_eq!(all[2].id, blank.id);
    }

    #[test]
    fn test_row_inserted_past_the_end_appends() {
        let mut service = interleaved();

        service.on_row_inserted(month(2024, 1), 10);
        service.append_blank_row(month(2024, 2));

        assert_eq!(descriptions(&service.select_month(month(2024, 1))), vec!["a", "b", "c", ""]);
        assert_eq!(descriptions(&service.select_month(month(2024, 2))), vec!["feb", ""]);
    }

    #[test]
    fn test_description_commit_expands_into_later_months() {
        let mut service = interleaved();
        let a = service.select_month(month(2024, 1))[0].clone();

        let report = service
            .on_description_committed(month(2024, 1), &a, "a 1/3")
            .unwrap();

        assert_eq!(report.created, 2);
        assert_eq!(descriptions(&service.select_month(month(2024, 2))), vec!["feb", "a 2/3"]);
        assert_eq!(descriptions(&service.select_month(month(2024, 3))), vec!["a 3/3"]);

        assert!(service.undo());
        assert!(service.select_month(month(2024, 3)).is_empty());
        assert!(service.redo());
        assert_eq!(service.select_month(month(2024, 3)).len(), 1);
    }

    #[test]
    fn test_person_value_commit_propagates() {
        let mut service = interleaved();
        let person = service.people().all()[0].id.clone();
        let a = service.select_month(month(2024, 1))[0].clone();
        service.on_description_committed(month(2024, 1), &a, "a 1/2").unwrap();

        let mut anchor = service.select_month(month(2024, 1))[0].clone();
        anchor.people.insert(person.clone(), Some(42.0));
        let report = service.on_person_value_committed(month(2024, 1), &anchor);

        assert_eq!(report.propagated, 1);
        assert_eq!(service.month_totals(month(2024, 2))[&person], 42.0);
    }

    #[test]
    fn test_follower_rows_cannot_be_moved() {
        let mut service = interleaved();
        let a = service.select_month(month(2024, 1))[0].clone();
        service.on_description_committed(month(2024, 1), &a, "a 1/2").unwrap();
        let february = service.select_month(month(2024, 2));
        let follower = february.iter().find(|e| e.is_follower()).unwrap();

        assert!(!service.on_row_moved(month(2024, 2), &follower.id, &february[0].id));
        assert!(service.on_row_moved(month(2024, 2), &february[0].id, &follower.id));
        assert_eq!(descriptions(&service.select_month(month(2024, 2))), vec!["a 2/2", "feb"]);
    }

    #[test]
    fn test_row_updated_moves_partition() {
        let mut service = interleaved();
        let mut c = service.select_month(month(2024, 1))[2].clone();
        c.date = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();

        assert!(service.on_row_updated(&c));

        assert_eq!(service.select_month(month(2024, 1)).len(), 2);
        assert_eq!(descriptions(&service.select_month(month(2024, 2))), vec!["feb", "c"]);
    }

    #[test]
    fn test_row_deleted() {
        let mut service = interleaved();
        let ids: Vec<String> = service
            .select_month(month(2024, 1))
            .iter()
            .take(2)
            .map(|e| e.id.clone())
            .collect();

        assert_eq!(service.on_row_deleted(month(2024, 1), &ids), 2);
        assert_eq!(descriptions(&service.select_month(month(2024, 1))), vec!["c"]);
        assert!(service.undo());
        assert_eq!(service.select_month(month(2024, 1)).len(), 3);
    }

    #[test]
    fn test_deleting_anchor_detaches_its_followers() {
        let mut service = interleaved();
        let a = service.select_month(month(2024, 1))[0].clone();
        service
            .on_description_committed(month(2024, 1), &a, "a 1/3")
            .unwrap();

        assert_eq!(service.on_row_deleted(month(2024, 1), &[a.id.as_str()]), 1);

        let survivors = service.store().query(|e| e.description.starts_with("a "));
        assert_eq!(survivors.len(), 2, "followers are not cascaded");
        for row in &survivors {
            assert!(row.installment_id.is_none(), "{} still tagged", row.description);
            assert!(row.installment.is_none());
            assert!(row.installment_quantity.is_none());
            assert!(row.is_first_installment.is_none());
        }

        // The former followers can be edited like any other row
        let orphan = service.select_month(month(2024, 2))[1].clone();
        let report = service
            .on_description_committed(month(2024, 2), &orphan, "Y")
            .unwrap();
        assert_eq!(report.decisions, vec![ChainDecision::PlainUpdate]);

        // Delete and detach were one step
        assert!(service.undo());
        assert!(service.undo());
        let chain = service.store().query(|e| e.installment_id.is_some());
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.iter().filter(|e| !e.is_follower()).count(), 1);
    }

    #[test]
    fn test_deleting_follower_keeps_chain_tagged() {
        let mut service = interleaved();
        let a = service.select_month(month(2024, 1))[0].clone();
        service
            .on_description_committed(month(2024, 1), &a, "a 1/3")
            .unwrap();
        let last = service.select_month(month(2024, 3))[0].clone();

        service.on_row_deleted(month(2024, 3), &[last.id]);

        let chain = service.store().query(|e| e.installment_id.is_some());
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().any(|e| e.id == a.id && !e.is_follower()));
    }

    #[test]
    fn test_subscribe_month_sees_only_its_rows() {
        let mut service = interleaved();
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        service.subscribe_month(month(2024, 2), move |rows| {
            sink.lock()
                .unwrap()
                .push(rows.iter().map(|e| e.description.clone()).collect());
        });

        service.append_blank_row(month(2024, 2));
        service.append_blank_row(month(2024, 5));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2, "one notification per committed batch");
        assert_eq!(seen[0], vec!["feb", ""]);
        assert_eq!(seen[1], vec!["feb", ""]);
    }

    #[test]
    fn test_sample_month() {
        let mut service = service();

        assert_eq!(service.generate_sample_month(month(2024, 2), 3), 3);

        let rows = service.select_month(month(2024, 2));
        assert_eq!(descriptions(&rows)[2], "This is a description 3");
        assert_eq!(rows[2].date, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());
    }

    #[test]
    fn test_month_change_records_focus_and_keeps_custom_layout() {
        let mut service = service();
        let (jan, feb) = (month(2024, 1), month(2024, 2));
        let default = service.default_layout();
        service.ensure_grid_state(jan, default.clone());
        service.upsert_column_layout(feb, vec![ColumnState::new("description", Some(500))]);

        let cell = FocusedCell {
            row_index: 3,
            col_id: "description".to_string(),
        };
        let state = service.on_month_changed(jan, feb, Some(cell.clone()), default);

        assert_eq!(state.columns_state.unwrap()[0].width, Some(500));
        assert_eq!(service.select_grid_state(jan).unwrap().focused_cell, Some(cell));
    }

    #[test]
    fn test_column_layout_is_debounced() {
        let mut service = service();
        let jan = month(2024, 1);
        let start = Instant::now();

        service.queue_column_layout(jan, vec![ColumnState::new("date", Some(100))], start);
        service.queue_column_layout(jan, vec![ColumnState::new("date", Some(180))], start);
        assert_eq!(service.flush_layouts(start), 0);
        assert!(service.select_grid_state(jan).is_none());

        assert_eq!(service.flush_layouts(start + Duration::from_millis(300)), 1);
        let layout = service.select_grid_state(jan).unwrap().columns_state.clone().unwrap();
        assert_eq!(layout[0].width, Some(180));
    }

    #[test]
    fn test_state_roundtrip_flushes_pending_layouts() {
        let config = Config::default();
        let mut service = interleaved();
        service.queue_column_layout(month(2024, 1), service.default_layout(), Instant::now());

        let state = service.to_state();
        assert_eq!(state.grid_states.len(), 1);

        let restored = ExpenseService::from_state(&config, state.clone());
        assert_eq!(restored.store().len(), 4);
        assert_eq!(restored.people().all(), state.people.as_slice());
        assert!(!restored.can_undo(), "loading is not undoable");
    }

    #[test]
    fn test_people_management() {
        let mut service = service();
        let first = service.people().all()[0].id.clone();
        let added = service.add_person_after(&first, "Ana");

        assert_eq!(service.people().all()[1].id, added.id);
        service.rename_person(&added.id, "Ana Maria").unwrap();
        assert_eq!(service.column_descriptors()[3].header_name, "Ana Maria");

        service.remove_person(&first).unwrap();
        service.remove_person(&added.id).unwrap();
        let last = service.people().all()[0].id.clone();
        assert_eq!(service.remove_person(&last), Err(ExpenseError::LastPerson));
    }
}
