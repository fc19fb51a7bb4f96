// ⚠️ Domain errors
//
// Parser misses are not errors (they are `None`), and neither are unknown ids in
// reorder/delete. What remains are the commits the core refuses outright.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpenseError {
    /// Only the first installment of a chain can be edited by description
    #[error("expense {id} is a follower installment; edit the first installment instead")]
    FollowerNotEditable { id: String },

    #[error("invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },

    /// Advancing a date left chrono's supported range
    #[error("date out of range: {from} + {months} month(s)")]
    DateOutOfRange { from: String, months: u32 },

    #[error("{quantity} installments requested, at most {max} allowed")]
    TooManyInstallments { quantity: u32, max: u32 },

    #[error("person not found: {0}")]
    PersonNotFound(String),

    #[error("cannot remove the last person")]
    LastPerson,
}
