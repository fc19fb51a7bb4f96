// 🗃️ Expense Store - the authoritative, ordered collection of expenses
//
// Mutations run against a Draft (a private copy). Committing a draft:
//   1. compares it with the current collection (no change → nothing happens)
//   2. records one history entry (before, after)
//   3. swaps in the new immutable snapshot
//   4. calls every subscriber once with that snapshot
//
// So a multi-step batch is a single undo step and subscribers never observe a
// half-applied batch. A batch whose closure fails is dropped without a trace.

use crate::entities::Expense;
use crate::history::History;
use log::{debug, warn};
use std::convert::Infallible;
use std::sync::Arc;

/// Immutable view of the whole collection
pub type Snapshot = Arc<Vec<Expense>>;

pub type SubscriptionId = u64;

type Subscriber = Box<dyn FnMut(&Snapshot) + Send>;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

// ============================================================================
// DRAFT
// ============================================================================

/// Working copy handed to a transaction closure
pub struct Draft {
    entities: Vec<Expense>,
}

impl Draft {
    pub fn get(&self, id: &str) -> Option<&Expense> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entities.iter().position(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expense> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Append an expense. Ids are unique: a duplicate id is ignored.
    pub fn add(&mut self, expense: Expense) -> bool {
        if self.get(&expense.id).is_some() {
            warn!("Ignoring duplicate expense id {}", expense.id);
            return false;
        }
        self.entities.push(expense);
        true
    }

    /// Append several expenses, returns how many were added
    pub fn add_many<I: IntoIterator<Item = Expense>>(&mut self, expenses: I) -> usize {
        let mut added = 0;
        for expense in expenses {
            if self.add(expense) {
                added += 1;
            }
        }
        added
    }

    /// Insert at `index` (clamped to the end)
    pub fn insert_at(&mut self, index: usize, expense: Expense) -> bool {
        if self.get(&expense.id).is_some() {
            warn!("Ignoring duplicate expense id {}", expense.id);
            return false;
        }
        let index = index.min(self.entities.len());
        self.entities.insert(index, expense);
        true
    }

    /// Update one record in place; false if the id is unknown
    pub fn update<F: FnOnce(&mut Expense)>(&mut self, id: &str, updater: F) -> bool {
        match self.entities.iter_mut().find(|e| e.id == id) {
            Some(expense) => {
                updater(expense);
                true
            }
            None => false,
        }
    }

    /// Replace the record with the same id; false if the id is unknown
    pub fn put(&mut self, expense: Expense) -> bool {
        match self.entities.iter_mut().find(|e| e.id == expense.id) {
            Some(slot) => {
                *slot = expense;
                true
            }
            None => false,
        }
    }

    /// Update every record matching `predicate`, returns how many matched
    pub fn update_where<P, F>(&mut self, predicate: P, mut updater: F) -> usize
    where
        P: Fn(&Expense) -> bool,
        F: FnMut(&mut Expense),
    {
        let mut count = 0;
        for expense in self.entities.iter_mut().filter(|e| predicate(e)) {
            updater(expense);
            count += 1;
        }
        count
    }

    /// Delete by id(s), returns how many were removed
    pub fn delete<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<S> = ids.into_iter().collect();
        self.delete_where(|e| ids.iter().any(|id| id.as_ref() == e.id))
    }

    /// Delete every record matching `predicate`
    pub fn delete_where<P: Fn(&Expense) -> bool>(&mut self, predicate: P) -> usize {
        let before = self.entities.len();
        self.entities.retain(|e| !predicate(e));
        before - self.entities.len()
    }

    /// Move the record `from_id` to the index currently held by `to_id`.
    /// No-op (false) when either id is unknown.
    pub fn reorder(&mut self, from_id: &str, to_id: &str) -> bool {
        let (from, to) = match (self.position(from_id), self.position(to_id)) {
            (Some(from), Some(to)) => (from, to),
            _ => return false,
        };
        let expense = self.entities.remove(from);
        self.entities.insert(to, expense);
        true
    }
}

// ============================================================================
// EXPENSE STORE
// ============================================================================

pub struct ExpenseStore {
    entities: Snapshot,
    history: History<Snapshot>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: SubscriptionId,
}

impl ExpenseStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(limit: usize) -> Self {
        ExpenseStore {
            entities: Arc::new(Vec::new()),
            history: History::new(limit),
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    /// Store preloaded with `expenses` (not undoable)
    pub fn from_expenses(expenses: Vec<Expense>, history_limit: usize) -> Self {
        let mut store = Self::with_history_limit(history_limit);
        store.entities = Arc::new(expenses);
        store
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entities)
    }

    pub fn get(&self, id: &str) -> Option<Expense> {
        self.entities.iter().find(|e| e.id == id).cloned()
    }

    /// Records matching `filter`, in store order
    pub fn query<F: Fn(&Expense) -> bool>(&self, filter: F) -> Vec<Expense> {
        self.entities.iter().filter(|e| filter(e)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Run a batch of mutations as one undoable unit.
    ///
    /// If `batch` returns an error nothing is applied.
    pub fn transaction<T, E, F>(&mut self, label: &str, batch: F) -> Result<T, E>
    where
        F: FnOnce(&mut Draft) -> Result<T, E>,
    {
        let mut draft = Draft {
            entities: self.entities.as_ref().clone(),
        };
        let value = batch(&mut draft)?;
        self.commit(label, draft.entities);
        Ok(value)
    }

    /// Infallible variant of `transaction`
    pub fn apply<T, F>(&mut self, label: &str, batch: F) -> T
    where
        F: FnOnce(&mut Draft) -> T,
    {
        match self.transaction::<T, Infallible, _>(label, |draft| Ok(batch(draft))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    pub fn add(&mut self, expense: Expense) -> bool {
        self.apply("add expense", |d| d.add(expense))
    }

    pub fn add_many(&mut self, expenses: Vec<Expense>) -> usize {
        self.apply("add expenses", |d| d.add_many(expenses))
    }

    pub fn insert_at(&mut self, index: usize, expense: Expense) -> bool {
        self.apply("insert expense", |d| d.insert_at(index, expense))
    }

    pub fn update<F: FnOnce(&mut Expense)>(&mut self, id: &str, updater: F) -> bool {
        self.apply("update expense", |d| d.update(id, updater))
    }

    pub fn put(&mut self, expense: Expense) -> bool {
        self.apply("update expense", |d| d.put(expense))
    }

    pub fn update_where<P, F>(&mut self, predicate: P, updater: F) -> usize
    where
        P: Fn(&Expense) -> bool,
        F: FnMut(&mut Expense),
    {
        self.apply("update expenses", |d| d.update_where(predicate, updater))
    }

    pub fn delete<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.apply("delete expenses", |d| d.delete(ids))
    }

    pub fn delete_where<P: Fn(&Expense) -> bool>(&mut self, predicate: P) -> usize {
        self.apply("delete expenses", |d| d.delete_where(predicate))
    }

    pub fn reorder(&mut self, from_id: &str, to_id: &str) -> bool {
        self.apply("move expense", |d| d.reorder(from_id, to_id))
    }

    /// Replace the whole collection and forget the history (used after loading)
    pub fn reset(&mut self, expenses: Vec<Expense>) {
        self.history.clear();
        self.entities = Arc::new(expenses);
        self.publish();
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Restore the state before the last batch; false if there is nothing to undo
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(state) => {
                debug!("Undo → {} expenses", state.len());
                self.entities = state;
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Re-apply the last undone batch; false if there is nothing to redo
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(state) => {
                debug!("Redo → {} expenses", state.len());
                self.entities = state;
                self.publish();
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &History<Snapshot> {
        &self.history
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Call `callback` with every new snapshot
    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        before != self.subscribers.len()
    }

    fn commit(&mut self, label: &str, entities: Vec<Expense>) {
        if entities == *self.entities {
            debug!("{}: no changes", label);
            return;
        }

        let before = Arc::clone(&self.entities);
        let after = Arc::new(entities);
        debug!("{}: {} → {} expenses", label, before.len(), after.len());

        self.history.record(label, before, Arc::clone(&after));
        self.entities = after;
        self.publish();
    }

    fn publish(&mut self) {
        let snapshot = Arc::clone(&self.entities);
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&snapshot);
        }
    }
}

impl Default for ExpenseStore {
    fn default() -> Self {
        Self::new()
    }
}
