// ⚖️ Reconciliation Engine - keep installment chains consistent
//
// When the description of an expense is committed, the trailing "i/q" marker
// says what its chain should look like:
//
//   no marker, no chain  → plain update
//   no marker, chain     → detach: followers deleted, anchor untagged
//   marker, no chain     → new chain: anchor at i, followers i+1..q
//   marker, chain        → resize to q (shrink/grow), then shift to i
//                          (forward/backward), then relabel every member
//
// The engine only computes the new chain; the store applies it as one batch.

use crate::entities::{Expense, InstallmentTag, MonthKey};
use crate::errors::ExpenseError;
use crate::parser::{parse_installments, InstallmentMarker};
use crate::store::ExpenseStore;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest chain a single commit may create (100 years of monthly payments)
pub const DEFAULT_MAX_INSTALLMENTS: u32 = 1200;

// ============================================================================
// CHAIN DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainDecision {
    /// Description stored as typed, no chain involved
    PlainUpdate,

    /// Marker removed from an anchor: followers deleted, anchor untagged
    MarkerRemoved,

    /// First marker on an untagged expense
    NewChain { installment: u32, quantity: u32 },

    /// Same numbers, only the descriptions were rewritten
    Relabel,

    /// Quantity lowered
    Shrink { from: u32, to: u32 },

    /// Quantity raised
    Grow { from: u32, to: u32 },

    /// Anchor moved to a later installment number
    ShiftForward { by: u32 },

    /// Anchor moved to an earlier installment number
    ShiftBackward { by: u32 },

    /// The edited expense is no longer in the store
    ChainMissing,
}

impl ChainDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainDecision::PlainUpdate => "plain update",
            ChainDecision::MarkerRemoved => "marker removed",
            ChainDecision::NewChain { .. } => "new chain",
            ChainDecision::Relabel => "relabel",
            ChainDecision::Shrink { .. } => "shrink",
            ChainDecision::Grow { .. } => "grow",
            ChainDecision::ShiftForward { .. } => "shift forward",
            ChainDecision::ShiftBackward { .. } => "shift backward",
            ChainDecision::ChainMissing => "chain missing",
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub expense_id: String,

    /// Chain the expense belongs to after the commit
    pub installment_id: Option<String>,

    /// Usually one; a resize combined with a shift yields two
    pub decisions: Vec<ChainDecision>,

    pub created: usize,
    pub updated: usize,
    pub removed: usize,
}

impl ReconciliationReport {
    fn new(expense_id: &str, decision: ChainDecision) -> Self {
        ReconciliationReport {
            expense_id: expense_id.to_string(),
            installment_id: None,
            decisions: vec![decision],
            created: 0,
            updated: 0,
            removed: 0,
        }
    }

    /// True when nothing in the store changed
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.removed == 0
    }

    pub fn summary(&self) -> String {
        let decisions: Vec<&str> = self.decisions.iter().map(|d| d.as_str()).collect();
        format!(
            "Expense {}: {} ({} created, {} updated, {} removed)",
            self.expense_id,
            decisions.join(" + "),
            self.created,
            self.updated,
            self.removed
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Markers asking for more installments than this are refused
    pub max_installments: u32,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            max_installments: DEFAULT_MAX_INSTALLMENTS,
        }
    }

    pub fn with_max_installments(max_installments: u32) -> Self {
        ReconciliationEngine { max_installments }
    }

    /// Only anchors and untagged expenses accept description edits
    pub fn is_description_editable(expense: &Expense) -> bool {
        !expense.is_follower()
    }

    /// Whether the chain of `expense` still has its anchor in the store
    fn has_anchor(store: &ExpenseStore, expense: &Expense) -> bool {
        let Some(chain_id) = expense.installment_id.as_deref() else {
            return false;
        };
        store.snapshot().iter().any(|e| {
            e.installment_id.as_deref() == Some(chain_id) && e.is_first_installment == Some(true)
        })
    }

    /// Commit `new_description` on `expense` (its pre-edit value) and bring its
    /// chain in line with the marker, as a single undoable batch.
    ///
    /// `context` is the month page the edit happened on; generated followers
    /// are dated from it.
    pub fn reconcile(
        &self,
        store: &mut ExpenseStore,
        context: MonthKey,
        expense: &Expense,
        new_description: &str,
    ) -> Result<ReconciliationReport, ExpenseError> {
        let mut current = expense.clone();
        if expense.is_follower() {
            if Self::has_anchor(store, expense) {
                return Err(ExpenseError::FollowerNotEditable {
                    id: expense.id.clone(),
                });
            }
            warn!("Follower {} has no anchor left, editing it as a plain row", expense.id);
            current.clear_installment();
        }

        let marker = parse_installments(new_description);
        if let Some(marker) = &marker {
            if marker.quantity > self.max_installments {
                return Err(ExpenseError::TooManyInstallments {
                    quantity: marker.quantity,
                    max: self.max_installments,
                });
            }
        }

        let mut edited = current.clone();
        edited.description = new_description.to_string();

        if store.get(&edited.id).is_none() {
            warn!("Expense {} is not in the store, nothing to reconcile", edited.id);
            return Ok(ReconciliationReport::new(&edited.id, ChainDecision::ChainMissing));
        }

        let report = match (current.installment_tag(), marker) {
            (None, None) => self.plain_update(store, edited),
            (Some(tag), None) => self.remove_chain(store, edited, &tag),
            (None, Some(marker)) => self.create_chain(store, context, edited, &marker)?,
            (Some(tag), Some(marker)) => self.update_chain(store, context, edited, &tag, &marker)?,
        };

        debug!("{}", report.summary());
        Ok(report)
    }

    fn plain_update(&self, store: &mut ExpenseStore, mut edited: Expense) -> ReconciliationReport {
        // A partially tagged row is not in any chain; make that explicit
        edited.clear_installment();

        let mut report = ReconciliationReport::new(&edited.id, ChainDecision::PlainUpdate);
        report.updated = usize::from(store.get(&edited.id).as_ref() != Some(&edited));
        store.put(edited);
        report
    }

    fn remove_chain(
        &self,
        store: &mut ExpenseStore,
        mut edited: Expense,
        tag: &InstallmentTag,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport::new(&edited.id, ChainDecision::MarkerRemoved);
        edited.clear_installment();

        let anchor_id = edited.id.clone();
        let chain_id = tag.installment_id.clone();
        report.removed = store.apply("remove installments", |d| {
            let removed = d.delete_where(|e| {
                e.installment_id.as_deref() == Some(chain_id.as_str()) && e.id != anchor_id
            });
            d.put(edited);
            removed
        });
        report.updated = 1;
        report
    }

    fn create_chain(
        &self,
        store: &mut ExpenseStore,
        context: MonthKey,
        mut edited: Expense,
        marker: &InstallmentMarker,
    ) -> Result<ReconciliationReport, ExpenseError> {
        let installment_id = uuid::Uuid::new_v4().to_string();
        let (first, quantity) = (marker.installment, marker.quantity);

        edited.description = marker.label(first);
        edited.set_installment_tag(InstallmentTag {
            installment_id: installment_id.clone(),
            installment: first,
            quantity,
            is_first: true,
        });

        let mut followers = Vec::new();
        for position in first + 1..=quantity {
            let month = context.add_months(position - first)?;
            followers.push(follower(&edited, &installment_id, marker, position, month));
        }

        let mut report = ReconciliationReport::new(
            &edited.id,
            ChainDecision::NewChain {
                installment: first,
                quantity,
            },
        );
        report.installment_id = Some(installment_id);
        report.updated = 1;
        report.created = followers.len();

        store.apply("new installment chain", |d| {
            d.put(edited);
            d.add_many(followers);
        });
        Ok(report)
    }

    fn update_chain(
        &self,
        store: &mut ExpenseStore,
        context: MonthKey,
        mut edited: Expense,
        tag: &InstallmentTag,
        marker: &InstallmentMarker,
    ) -> Result<ReconciliationReport, ExpenseError> {
        let chain_id = tag.installment_id.clone();
        let (current, current_quantity) = (tag.installment, tag.quantity);
        let (target, quantity) = (marker.installment, marker.quantity);

        // ---- collect the surviving followers by position --------------------
        let mut originals: BTreeMap<String, Expense> = BTreeMap::new();
        let mut followers: BTreeMap<u32, Expense> = BTreeMap::new();
        let mut removed: Vec<String> = Vec::new();

        let snapshot = store.snapshot();
        for member in snapshot
            .iter()
            .filter(|e| e.installment_id.as_deref() == Some(chain_id.as_str()) && e.id != edited.id)
        {
            originals.insert(member.id.clone(), member.clone());
            match member.installment {
                Some(p)
                    if member.is_follower()
                        && p > current
                        && p <= current_quantity
                        && !followers.contains_key(&p) =>
                {
                    followers.insert(p, member.clone());
                }
                _ => {
                    warn!("Dropping stray member {} of chain {}", member.id, chain_id);
                    removed.push(member.id.clone());
                }
            }
        }

        let missing = (current + 1..=current_quantity)
            .filter(|p| !followers.contains_key(p))
            .count();
        if missing > 0 {
            warn!("Chain {} lost {} follower(s), regenerating", chain_id, missing);
        }

        // ---- resize ---------------------------------------------------------
        let mut decisions = Vec::new();
        if quantity < current_quantity {
            decisions.push(ChainDecision::Shrink {
                from: current_quantity,
                to: quantity,
            });
            let dropped = followers.split_off(&(quantity + 1));
            removed.extend(dropped.into_values().map(|e| e.id));
        } else if quantity > current_quantity {
            decisions.push(ChainDecision::Grow {
                from: current_quantity,
                to: quantity,
            });
        }

        // ---- shift ----------------------------------------------------------
        let mut continue_from: Option<MonthKey> = None;
        if target > current {
            let by = target - current;
            decisions.push(ChainDecision::ShiftForward { by });
            let mut shifted = BTreeMap::new();
            for (p, member) in followers {
                if p + by > quantity {
                    removed.push(member.id);
                } else {
                    shifted.insert(p + by, member);
                }
            }
            followers = shifted;
        } else if target < current {
            let by = current - target;
            decisions.push(ChainDecision::ShiftBackward { by });
            continue_from = followers
                .values()
                .map(|e| e.month_key())
                .chain(std::iter::once(edited.month_key()))
                .max();
            followers = followers.into_iter().map(|(p, e)| (p - by, e)).collect();
        }

        if decisions.is_empty() {
            decisions.push(ChainDecision::Relabel);
        }

        // ---- relabel the anchor and the survivors ---------------------------
        edited.description = marker.label(target);
        edited.set_installment_tag(InstallmentTag {
            installment_id: chain_id.clone(),
            installment: target,
            quantity,
            is_first: true,
        });

        for (p, member) in followers.iter_mut() {
            member.description = marker.label(*p);
            member.set_installment_tag(InstallmentTag {
                installment_id: chain_id.clone(),
                installment: *p,
                quantity,
                is_first: false,
            });
        }

        // ---- fill every position the chain does not cover yet ---------------
        let mut created = Vec::new();
        for p in target + 1..=quantity {
            if followers.contains_key(&p) {
                continue;
            }
            let month = match continue_from {
                Some(last) => {
                    let next = last.add_months(1)?;
                    continue_from = Some(next);
                    next
                }
                None => context.add_months(p - target)?,
            };
            created.push(follower(&edited, &chain_id, marker, p, month));
        }

        // ---- diff and apply -------------------------------------------------
        let changed: Vec<Expense> = followers
            .into_values()
            .filter(|e| originals.get(&e.id) != Some(e))
            .collect();

        let anchor_changed = store.get(&edited.id).as_ref() != Some(&edited);

        let mut report = ReconciliationReport::new(&edited.id, ChainDecision::Relabel);
        report.decisions = decisions;
        report.installment_id = Some(chain_id);
        report.created = created.len();
        report.updated = changed.len() + usize::from(anchor_changed);
        report.removed = removed.len();

        store.apply("update installment chain", |d| {
            d.put(edited);
            for member in changed {
                d.put(member);
            }
            d.delete(&removed);
            d.add_many(created);
        });
        Ok(report)
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// New follower of `anchor` at `position`, dated on the first day of `month`
fn follower(
    anchor: &Expense,
    installment_id: &str,
    marker: &InstallmentMarker,
    position: u32,
    month: MonthKey,
) -> Expense {
    let mut expense = Expense::new(month.first_day(), marker.label(position));
    expense.people = anchor.people.clone();
    expense.set_installment_tag(InstallmentTag {
        installment_id: installment_id.to_string(),
        installment: position,
        quantity: marker.quantity,
        is_first: false,
    });
    expense
}

// ============================================================================
// TESTS
// ============================================================================
