// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use expense_grid::{
    load_csv, load_state, open_database, save_state, verify_count, write_csv, Config,
    ExpenseService, MonthKey, PersistedState,
};

const USAGE: &str = "\
Usage: expense-grid [--config <file>] [command]

Commands:
  (none)                                 open the month grid (TUI)
  import <csv>                           append expenses from a CSV file
  export <csv>                           write every expense to a CSV file
  seed <year> <month> [count]            add sample rows to a month
  month <year> <month>                   print a month and its totals
  describe <year> <month> <row> <text>   commit a description (row is 1-based)";

fn main() -> Result<()> {
    env_logger::init();

    let mut args: Vec<String> = env::args().skip(1).collect();

    // --config <file> may come first
    let config_path = if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a file path\n\n{}", USAGE);
        }
        let path = PathBuf::from(args.remove(1));
        args.remove(0);
        Some(path)
    } else {
        None
    };
    let config = Config::load(config_path.as_deref())?;

    match args.first().map(String::as_str) {
        None => run_ui_mode(&config)?,
        Some("import") => run_import(&config, path_arg(&args, 1)?)?,
        Some("export") => run_export(&config, path_arg(&args, 1)?)?,
        Some("seed") => {
            let month = month_args(&args)?;
            let count = match args.get(3) {
                Some(raw) => raw.parse().with_context(|| format!("Invalid count: {}", raw))?,
                None => 10,
            };
            run_seed(&config, month, count)?
        }
        Some("month") => run_month(&config, month_args(&args)?)?,
        Some("describe") => {
            let month = month_args(&args)?;
            let row: usize = args
                .get(3)
                .context("Missing row number")?
                .parse()
                .context("Invalid row number")?;
            let description = args[4..].join(" ");
            run_describe(&config, month, row, &description)?
        }
        Some("help") | Some("--help") | Some("-h") => println!("{}", USAGE),
        Some(other) => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }

    Ok(())
}

fn path_arg(args: &[String], index: usize) -> Result<&Path> {
    args.get(index)
        .map(Path::new)
        .with_context(|| format!("Missing file path\n\n{}", USAGE))
}

fn month_args(args: &[String]) -> Result<MonthKey> {
    let year: i32 = args
        .get(1)
        .context("Missing year")?
        .parse()
        .context("Invalid year")?;
    let month: u32 = args
        .get(2)
        .context("Missing month")?
        .parse()
        .context("Invalid month")?;
    Ok(MonthKey::new(year, month)?)
}

/// Open the configured database and load everything in it
fn open_workspace(config: &Config) -> Result<(Connection, PersistedState)> {
    let conn = open_database(&config.database_path)?;
    let state = load_state(&conn)?;
    Ok((conn, state))
}

fn save_service(conn: &mut Connection, service: &mut ExpenseService) -> Result<()> {
    save_state(conn, &service.to_state())?;
    Ok(())
}

fn run_import(config: &Config, csv_path: &Path) -> Result<()> {
    println!("🗄️  Expense Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSV
    println!("\n📂 Loading CSV...");
    let imported = load_csv(csv_path)?;
    println!("✓ Loaded {} expenses from CSV", imported.len());

    // 2. Open database
    println!("\n🔧 Opening database...");
    let (mut conn, mut state) = open_workspace(config)?;
    println!("✓ Database ready with WAL mode ({} expenses)", state.expenses.len());

    // 3. Append, skipping ids already stored
    println!("\n💾 Inserting expenses...");
    let mut known: HashSet<String> = state.expenses.iter().map(|e| e.id.clone()).collect();
    let before = state.expenses.len();
    for expense in imported {
        if known.insert(expense.id.clone()) {
            state.expenses.push(expense);
        }
    }
    let added = state.expenses.len() - before;
    save_state(&mut conn, &state)?;

    // 4. Verify count
    println!("\n🔍 Verifying database...");
    let count = verify_count(&conn)?;
    println!("✓ Added {} expenses, database contains {}", added, count);

    if count != state.expenses.len() as i64 {
        bail!(
            "Database holds {} expenses, expected {}",
            count,
            state.expenses.len()
        );
    }

    println!("\n✅ Import complete");
    Ok(())
}

fn run_export(config: &Config, csv_path: &Path) -> Result<()> {
    let (_conn, state) = open_workspace(config)?;
    let written = write_csv(csv_path, &state.expenses)?;
    println!("✓ Exported {} expenses to {:?}", written, csv_path);
    Ok(())
}

fn run_seed(config: &Config, month: MonthKey, count: usize) -> Result<()> {
    let (mut conn, state) = open_workspace(config)?;
    let mut service = ExpenseService::from_state(config, state);

    let added = service.generate_sample_month(month, count);
    save_service(&mut conn, &mut service)?;

    println!("✓ Added {} sample rows to {}", added, month);
    Ok(())
}

fn run_month(config: &Config, month: MonthKey) -> Result<()> {
    let (_conn, state) = open_workspace(config)?;
    let service = ExpenseService::from_state(config, state);

    let rows = service.select_month(month);
    let people = service.people().all();

    println!("📅 {}", month);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for (index, expense) in rows.iter().enumerate() {
        let amounts: Vec<String> = people
            .iter()
            .map(|person| match expense.people.get(&person.id).copied().flatten() {
                Some(amount) => format!("{}: {:.2}", person.name, amount),
                None => format!("{}: -", person.name),
            })
            .collect();
        let marker = if expense.is_follower() { "↳" } else { " " };
        println!(
            "{:>3} {} {}  {:<40} {}",
            index + 1,
            marker,
            expense.date,
            expense.description,
            amounts.join("  ")
        );
    }

    if rows.is_empty() {
        println!("   (no expenses)");
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let totals = service.month_totals(month);
    for person in people {
        let total = totals.get(&person.id).copied().unwrap_or(0.0);
        println!("   {:<20} {:>10.2}", person.name, total);
    }

    Ok(())
}

fn run_describe(config: &Config, month: MonthKey, row: usize, description: &str) -> Result<()> {
    let (mut conn, state) = open_workspace(config)?;
    let mut service = ExpenseService::from_state(config, state);

    let rows = service.select_month(month);
    let expense = row
        .checked_sub(1)
        .and_then(|index| rows.get(index))
        .with_context(|| format!("{} has no row {}", month, row))?;

    let report = service.on_description_committed(month, expense, description)?;
    save_service(&mut conn, &mut service)?;

    println!("✓ {}", report.summary());
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &Config) -> Result<()> {
    println!("🖥️  Loading Expense Grid...\n");

    let (mut conn, state) = open_workspace(config)?;
    println!("✓ Loaded {} expenses", state.expenses.len());
    println!("Starting UI... (Press 'q' to quit)\n");

    let month = ui::App::current_month().context("Today is outside the supported range")?;
    let service = ExpenseService::from_state(config, state);

    // Create and run app
    let mut app = ui::App::new(service, month);
    ui::run_ui(&mut app)?;

    save_service(&mut conn, &mut app.service)?;
    println!("\n✅ Saved to {:?}", config.database_path);

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &Config) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin expense-server --features server");
    std::process::exit(1);
}
