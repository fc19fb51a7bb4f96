// ⚙️ Configuration - JSON file + environment overrides
//
// Every field has a default, so a missing file or a partial file is fine.
// Environment variables win over the file:
//
//   EXPENSE_GRID_DB              → database_path
//   EXPENSE_GRID_HISTORY_LIMIT   → history_limit
//   EXPENSE_GRID_BIND            → bind_address

use crate::entities::DEFAULT_PEOPLE;
use crate::reconciliation::DEFAULT_MAX_INSTALLMENTS;
use crate::store::DEFAULT_HISTORY_LIMIT;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE: &str = "EXPENSE_GRID_DB";
pub const ENV_HISTORY_LIMIT: &str = "EXPENSE_GRID_HISTORY_LIMIT";
pub const ENV_BIND: &str = "EXPENSE_GRID_BIND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file holding expenses, people and grid states
    pub database_path: PathBuf,

    /// Undo steps kept in memory (0 = unlimited)
    pub history_limit: usize,

    /// Quiet window before a column layout change is persisted
    pub layout_debounce_ms: u64,

    /// Longest installment chain a description may ask for
    pub max_installments: u32,

    /// People created when the database has none
    pub default_people: Vec<String>,

    /// HTTP server address
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("expenses.db"),
            history_limit: DEFAULT_HISTORY_LIMIT,
            layout_debounce_ms: 250,
            max_installments: DEFAULT_MAX_INSTALLMENTS,
            default_people: DEFAULT_PEOPLE.iter().map(|s| s.to_string()).collect(),
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    /// Read `path` (if given), then apply the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key → value source (the environment in production)
    pub fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }

        if let Some(limit) = lookup(ENV_HISTORY_LIMIT) {
            match limit.trim().parse() {
                Ok(limit) => self.history_limit = limit,
                Err(_) => warn!("Ignoring {}={:?}: not a number", ENV_HISTORY_LIMIT, limit),
            }
        }

        if let Some(bind) = lookup(ENV_BIND) {
            self.bind_address = bind;
        }
    }

    pub fn layout_debounce(&self) -> Duration {
        Duration::from_millis(self.layout_debounce_ms)
    }
}
