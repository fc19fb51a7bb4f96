// Expense Grid - Core Library
// Exposes all modules for use in CLI, TUI, API server, and tests

pub mod config;
pub mod db;
pub mod debounce;
pub mod entities;
pub mod errors;
pub mod history;
pub mod parser;         // Installment markers ("Rent 2/12")
pub mod propagation;    // Person values flow to later installments
pub mod reconciliation; // Installment chain expansion / resize / shift
pub mod service;        // Grid-facing facade
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    load_csv, load_state, open_database, save_state, setup_database, verify_count, write_csv,
    ExpenseRecord, PersistedState,
};
pub use debounce::Debouncer;
pub use entities::{
    column_descriptor, people_totals, ColumnDescriptor, ColumnKind, ColumnState, Expense,
    FocusedCell, GridState, GridStateStore, InstallmentTag, MonthKey, PeopleValues, Person,
    PersonRegistry,
};
pub use errors::ExpenseError;
pub use history::{History, HistoryEntry};
pub use parser::{parse_installments, InstallmentMarker};
pub use propagation::{propagate, PropagationReport};
pub use reconciliation::{ChainDecision, ReconciliationEngine, ReconciliationReport};
pub use service::ExpenseService;
pub use store::{Draft, ExpenseStore, Snapshot, SubscriptionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
