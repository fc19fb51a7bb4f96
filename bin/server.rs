// Expense Grid - Web Server
// REST API over the month grid, with Axum

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use expense_grid::{
    load_state, open_database, save_state, ColumnDescriptor, ColumnState, Config, Expense,
    ExpenseError, ExpenseService, FocusedCell, GridState, MonthKey, PeopleValues, Person,
};
use log::{error, info};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<ExpenseService>>,
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// One month page of the grid
#[derive(Serialize)]
struct MonthResponse {
    year: i32,
    month: u32,
    title: String,
    columns: Vec<ColumnDescriptor>,
    expenses: Vec<Expense>,
    totals: BTreeMap<String, f64>,
    grid_state: Option<GridState>,
}

#[derive(Deserialize)]
struct InsertRequest {
    /// Month row to insert before; appended when absent
    index: Option<usize>,
}

#[derive(Deserialize)]
struct DescriptionRequest {
    description: String,
}

#[derive(Deserialize)]
struct PeopleRequest {
    people: PeopleValues,
}

#[derive(Deserialize)]
struct MoveRequest {
    from_id: String,
    to_id: String,
}

#[derive(Deserialize)]
struct DeleteRequest {
    ids: Vec<String>,
}

/// Only the fields present are applied; an explicit `null` clears
#[derive(Deserialize)]
struct GridStatePatch {
    columns_state: Option<Vec<ColumnState>>,
    #[serde(default, deserialize_with = "present")]
    filter: Option<Option<serde_json::Value>>,
    #[serde(default, deserialize_with = "present")]
    focused_cell: Option<Option<FocusedCell>>,
}

/// Tells `"field": null` (Some(None)) apart from a missing field (None)
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct PersonRequest {
    name: String,
    after_id: Option<String>,
}

// ============================================================================
// Helpers
// ============================================================================

/// A panicked handler must not take the whole API down
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

fn month_key(year: i32, month: u32) -> Result<MonthKey, Response> {
    MonthKey::new(year, month).map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

fn status_for(err: &ExpenseError) -> StatusCode {
    match err {
        ExpenseError::FollowerNotEditable { .. } | ExpenseError::LastPerson => StatusCode::CONFLICT,
        ExpenseError::PersonNotFound(_) => StatusCode::NOT_FOUND,
        ExpenseError::InvalidMonth { .. } => StatusCode::BAD_REQUEST,
        ExpenseError::TooManyInstallments { .. } | ExpenseError::DateOutOfRange { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

/// Write the whole workspace to SQLite
fn persist(state: &AppState, service: &mut ExpenseService) {
    let snapshot = service.to_state();
    let mut conn = lock(&state.db);
    if let Err(e) = save_state(&mut conn, &snapshot) {
        error!("Error saving state: {:#}", e);
    }
}

fn month_response(service: &ExpenseService, month: MonthKey) -> MonthResponse {
    MonthResponse {
        year: month.year(),
        month: month.month(),
        title: month.to_string(),
        columns: service.column_descriptors(),
        expenses: service.select_month(month),
        totals: service.month_totals(month),
        grid_state: service.select_grid_state(month).cloned(),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/months/:year/:month - Rows, columns, totals and view state
async fn get_month(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let layout = service.default_layout();
    if service.ensure_grid_state(month, layout) {
        persist(&state, &mut service);
    }

    (StatusCode::OK, Json(ApiResponse::ok(month_response(&service, month)))).into_response()
}

/// POST /api/months/:year/:month/expenses - Insert a blank row
async fn insert_expense(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    Json(request): Json<InsertRequest>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let expense = match request.index {
        Some(index) => service.on_row_inserted(month, index),
        None => service.append_blank_row(month),
    };
    persist(&state, &mut service);

    (StatusCode::CREATED, Json(ApiResponse::ok(expense))).into_response()
}

/// PUT /api/months/:year/:month/expenses/:id/description - Commit a description
async fn update_description(
    State(state): State<AppState>,
    Path((year, month, id)): Path<(i32, u32, String)>,
    Json(request): Json<DescriptionRequest>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let Some(expense) = service.store().get(&id) else {
        return error_response(StatusCode::NOT_FOUND, format!("expense not found: {}", id));
    };

    match service.on_description_committed(month, &expense, &request.description) {
        Ok(report) => {
            info!("{}", report.summary());
            persist(&state, &mut service);
            (StatusCode::OK, Json(ApiResponse::ok(report))).into_response()
        }
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

/// PUT /api/months/:year/:month/expenses/:id/people - Commit person amounts
async fn update_people(
    State(state): State<AppState>,
    Path((year, month, id)): Path<(i32, u32, String)>,
    Json(request): Json<PeopleRequest>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let Some(mut expense) = service.store().get(&id) else {
        return error_response(StatusCode::NOT_FOUND, format!("expense not found: {}", id));
    };
    expense.people = request.people;

    let report = service.on_person_value_committed(month, &expense);
    persist(&state, &mut service);

    (StatusCode::OK, Json(ApiResponse::ok(report))).into_response()
}

/// POST /api/months/:year/:month/move - Drag a row onto another
async fn move_expense(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    Json(request): Json<MoveRequest>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let moved = service.on_row_moved(month, &request.from_id, &request.to_id);
    if moved {
        persist(&state, &mut service);
    }

    (StatusCode::OK, Json(ApiResponse::ok(moved))).into_response()
}

/// DELETE /api/months/:year/:month/expenses - Delete rows by id
async fn delete_expenses(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    Json(request): Json<DeleteRequest>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    let removed = service.on_row_deleted(month, &request.ids);
    if removed > 0 {
        persist(&state, &mut service);
    }

    (StatusCode::OK, Json(ApiResponse::ok(removed))).into_response()
}

/// POST /api/undo
async fn undo(State(state): State<AppState>) -> Response {
    let mut service = lock(&state.service);
    let undone = service.undo();
    if undone {
        persist(&state, &mut service);
    }
    (StatusCode::OK, Json(ApiResponse::ok(undone))).into_response()
}

/// POST /api/redo
async fn redo(State(state): State<AppState>) -> Response {
    let mut service = lock(&state.service);
    let redone = service.redo();
    if redone {
        persist(&state, &mut service);
    }
    (StatusCode::OK, Json(ApiResponse::ok(redone))).into_response()
}

/// GET /api/months/:year/:month/grid-state
async fn get_grid_state(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let service = lock(&state.service);

    let grid_state = service
        .select_grid_state(month)
        .cloned()
        .unwrap_or_else(|| GridState::empty(month));
    (StatusCode::OK, Json(ApiResponse::ok(grid_state))).into_response()
}

/// PUT /api/months/:year/:month/grid-state - Column layouts are debounced
async fn put_grid_state(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    Json(patch): Json<GridStatePatch>,
) -> Response {
    let month = match month_key(year, month) {
        Ok(month) => month,
        Err(response) => return response,
    };
    let mut service = lock(&state.service);

    if let Some(layout) = patch.columns_state {
        service.queue_column_layout(month, layout, Instant::now());
    }
    if let Some(filter) = patch.filter {
        service.upsert_filter(month, filter);
    }
    if let Some(cell) = patch.focused_cell {
        service.upsert_focused_cell(month, cell);
    }

    (StatusCode::ACCEPTED, Json(ApiResponse::ok(true))).into_response()
}

/// GET /api/people - Columns in order
async fn get_people(State(state): State<AppState>) -> Response {
    let service = lock(&state.service);
    let people: Vec<Person> = service.people().all().to_vec();
    (StatusCode::OK, Json(ApiResponse::ok(people))).into_response()
}

/// POST /api/people - Add a column (after `after_id` when given)
async fn add_person(
    State(state): State<AppState>,
    Json(request): Json<PersonRequest>,
) -> Response {
    let mut service = lock(&state.service);

    let person = match &request.after_id {
        Some(after_id) => service.add_person_after(after_id, &request.name),
        None => service.add_person(&request.name),
    };
    persist(&state, &mut service);

    (StatusCode::CREATED, Json(ApiResponse::ok(person))).into_response()
}

/// PUT /api/people/:id - Rename a column
async fn rename_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PersonRequest>,
) -> Response {
    let mut service = lock(&state.service);

    match service.rename_person(&id, &request.name) {
        Ok(()) => {
            persist(&state, &mut service);
            (StatusCode::OK, Json(ApiResponse::ok(true))).into_response()
        }
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

/// DELETE /api/people/:id - Remove a column (never the last one)
async fn delete_person(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut service = lock(&state.service);

    match service.remove_person(&id) {
        Ok(person) => {
            persist(&state, &mut service);
            (StatusCode::OK, Json(ApiResponse::ok(person))).into_response()
        }
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("🌐 Expense Grid - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Optional config file as the only argument
    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = Config::load(config_path.as_deref()).expect("Failed to load config");

    let conn = open_database(&config.database_path).expect("Failed to open database");
    let persisted = load_state(&conn).expect("Failed to load state");
    println!("✓ Database opened: {:?}", config.database_path);
    println!("✓ Loaded {} expenses", persisted.expenses.len());

    // Create shared state
    let state = AppState {
        service: Arc::new(Mutex::new(ExpenseService::from_state(&config, persisted))),
        db: Arc::new(Mutex::new(conn)),
    };

    // Persist debounced column layouts once their quiet window elapsed
    let flusher = state.clone();
    let window = config.layout_debounce();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(window);
        loop {
            interval.tick().await;
            let mut service = lock(&flusher.service);
            if service.flush_layouts(Instant::now()) > 0 {
                persist(&flusher, &mut service);
            }
        }
    });

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/months/:year/:month", get(get_month))
        .route(
            "/months/:year/:month/expenses",
            post(insert_expense).delete(delete_expenses),
        )
        .route(
            "/months/:year/:month/expenses/:id/description",
            put(update_description),
        )
        .route("/months/:year/:month/expenses/:id/people", put(update_people))
        .route("/months/:year/:month/move", post(move_expense))
        .route(
            "/months/:year/:month/grid-state",
            get(get_grid_state).put(put_grid_state),
        )
        .route("/undo", post(undo))
        .route("/redo", post(redo))
        .route("/people", get(get_people).post(add_person))
        .route("/people/:id", put(rename_person).delete(delete_person))
        .with_state(state.clone());

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://{}", config.bind_address);
    println!("   API: http://{}/api/health", config.bind_address);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
