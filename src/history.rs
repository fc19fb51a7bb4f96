// ⏪ History - reversible command log
//
// Every committed batch is one entry holding the full state before and after.
// Undo restores `before`, redo restores `after`, and recording a new entry
// drops whatever could still be redone.
//
// Generic over the state so it knows nothing about expenses or chains.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct HistoryEntry<S> {
    /// What the user did ("new installment chain", "move row", ...)
    pub label: String,

    /// When the batch was committed
    pub recorded_at: DateTime<Utc>,

    before: S,
    after: S,
}

impl<S> HistoryEntry<S> {
    pub fn before(&self) -> &S {
        &self.before
    }

    pub fn after(&self) -> &S {
        &self.after
    }
}

#[derive(Debug, Clone)]
pub struct History<S> {
    past: Vec<HistoryEntry<S>>,
    future: Vec<HistoryEntry<S>>,

    /// Maximum number of undo steps kept (0 = unlimited)
    limit: usize,
}

impl<S: Clone> History<S> {
    pub fn new(limit: usize) -> Self {
        History {
            past: Vec::new(),
            future: Vec::new(),
            limit,
        }
    }

    /// Record a committed batch
    pub fn record(&mut self, label: impl Into<String>, before: S, after: S) {
        self.future.clear();
        self.past.push(HistoryEntry {
            label: label.into(),
            recorded_at: Utc::now(),
            before,
            after,
        });

        if self.limit > 0 && self.past.len() > self.limit {
            let overflow = self.past.len() - self.limit;
            self.past.drain(..overflow);
        }
    }

    /// Step back; returns the state to restore, or None at the oldest entry
    pub fn undo(&mut self) -> Option<S> {
        let entry = self.past.pop()?;
        let state = entry.before.clone();
        self.future.push(entry);
        Some(state)
    }

    /// Step forward; returns the state to restore, or None at the newest entry
    pub fn redo(&mut self) -> Option<S> {
        let entry = self.future.pop()?;
        let state = entry.after.clone();
        self.past.push(entry);
        Some(state)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Label of the entry the next undo would revert
    pub fn undo_label(&self) -> Option<&str> {
        self.past.last().map(|e| e.label.as_str())
    }

    pub fn redo_label(&self) -> Option<&str> {
        self.future.last().map(|e| e.label.as_str())
    }

    pub fn entries(&self) -> &[HistoryEntry<S>] {
        &self.past
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
