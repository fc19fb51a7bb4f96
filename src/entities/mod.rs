// Entity Models
// "Identity persists, values change"
//
// - Expense: one grid row (UUID identity, optional installment chain)
// - Person: one amount column
// - GridState: per-month view state
// - MonthKey: the (year, month) partition

pub mod expense;
pub mod grid_state;
pub mod month;
pub mod person;

pub use expense::{Expense, InstallmentTag, PeopleValues};
pub use grid_state::{ColumnState, FocusedCell, GridState, GridStateStore};
pub use month::MonthKey;
pub use person::{
    column_descriptor, default_column_descriptors, people_totals, ColumnDescriptor, ColumnKind,
    Person, PersonRegistry, DEFAULT_PEOPLE,
};
