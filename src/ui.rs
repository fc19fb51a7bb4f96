use anyhow::Result;
use chrono::{Datelike, Local};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use expense_grid::{Expense, ExpenseService, FocusedCell, MonthKey};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::time::{Duration, Instant};

pub struct App {
    pub service: ExpenseService,
    pub month: MonthKey,
    pub rows: Vec<Expense>,
    pub state: TableState,
    pub show_detail: bool,

    /// Description being typed (Some while editing)
    pub input: Option<String>,

    /// Last outcome shown in the status bar
    pub message: Option<String>,
}

impl App {
    pub fn new(service: ExpenseService, month: MonthKey) -> Self {
        let mut app = Self {
            service,
            month,
            rows: Vec::new(),
            state: TableState::default(),
            show_detail: false,
            input: None,
            message: None,
        };
        let layout = app.service.default_layout();
        app.service.ensure_grid_state(month, layout);
        app.refresh();
        app.restore_focus();
        app
    }

    /// Month the TUI opens on
    pub fn current_month() -> Option<MonthKey> {
        let today = Local::now().date_naive();
        MonthKey::new(today.year(), today.month()).ok()
    }

    /// Reload the month's rows, keeping the selection in range
    pub fn refresh(&mut self) {
        self.rows = self.service.select_month(self.month);
        let selected = match (self.state.selected(), self.rows.len()) {
            (_, 0) => None,
            (Some(i), len) => Some(i.min(len - 1)),
            (None, _) => Some(0),
        };
        self.state.select(selected);
    }

    fn restore_focus(&mut self) {
        let focused = self
            .service
            .select_grid_state(self.month)
            .and_then(|s| s.focused_cell.as_ref())
            .map(|c| c.row_index);
        if let Some(index) = focused {
            if index < self.rows.len() {
                self.state.select(Some(index));
            }
        }
    }

    pub fn selected_expense(&self) -> Option<&Expense> {
        self.state.selected().and_then(|i| self.rows.get(i))
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    // ========================================================================
    // MONTH NAVIGATION
    // ========================================================================

    pub fn go_to_month(&mut self, to: MonthKey) {
        let focused = self.state.selected().map(|row_index| FocusedCell {
            row_index,
            col_id: "description".to_string(),
        });
        let layout = self.service.default_layout();
        self.service.on_month_changed(self.month, to, focused, layout);

        self.month = to;
        self.state.select(None);
        self.refresh();
        self.restore_focus();
    }

    pub fn next_month(&mut self) {
        if let Some(to) = self.month.next() {
            self.go_to_month(to);
        }
    }

    pub fn previous_month(&mut self) {
        if let Some(to) = self.month.previous() {
            self.go_to_month(to);
        }
    }

    // ========================================================================
    // EDITS
    // ========================================================================

    pub fn undo(&mut self) {
        self.message = Some(if self.service.undo() { "Undone" } else { "Nothing to undo" }.to_string());
        self.refresh();
    }

    pub fn redo(&mut self) {
        self.message = Some(if self.service.redo() { "Redone" } else { "Nothing to redo" }.to_string());
        self.refresh();
    }

    pub fn append_row(&mut self) {
        self.service.append_blank_row(self.month);
        self.refresh();
        self.state.select(Some(self.rows.len().saturating_sub(1)));
    }

    pub fn delete_selected(&mut self) {
        if let Some(expense) = self.selected_expense() {
            let id = expense.id.clone();
            self.service.on_row_deleted(self.month, &[id]);
            self.refresh();
        }
    }

    /// Swap the selected row with the one below (or above)
    pub fn move_selected(&mut self, down: bool) {
        let Some(i) = self.state.selected() else {
            return;
        };
        let target = if down { i + 1 } else { i.wrapping_sub(1) };
        let (Some(from), Some(to)) = (self.rows.get(i), self.rows.get(target)) else {
            return;
        };
        let (from, to) = (from.id.clone(), to.id.clone());

        if self.service.on_row_moved(self.month, &from, &to) {
            self.refresh();
            self.state.select(Some(target));
        } else {
            self.message = Some("Follower installments move with their first installment".to_string());
        }
    }

    /// Start typing a new description for the selected row
    pub fn begin_edit(&mut self) {
        match self.selected_expense() {
            Some(expense) if expense.is_follower() => {
                self.message = Some("Edit the first installment instead".to_string());
            }
            Some(expense) => self.input = Some(expense.description.clone()),
            None => {}
        }
    }

    pub fn commit_edit(&mut self) {
        let (Some(description), Some(expense)) = (self.input.take(), self.selected_expense().cloned())
        else {
            return;
        };

        self.message = Some(
            match self
                .service
                .on_description_committed(self.month, &expense, &description)
            {
                Ok(report) => report.summary(),
                Err(err) => err.to_string(),
            },
        );
        self.refresh();
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;
        app.service.flush_layouts(Instant::now());

        // Poll so pending layout writes get flushed while idle
        if !event::poll(Duration::from_millis(250))? {
            continue;
        }

        if let Event::Key(key) = event::read()? {
            if handle_key(app, key) {
                return Ok(());
            }
        }
    }
}

/// Apply one key press; true means quit
fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    if let Some(input) = app.input.as_mut() {
        match key.code {
            KeyCode::Enter => app.commit_edit(),
            KeyCode::Esc => app.input = None,
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) => input.push(c),
            _ => {}
        }
        return false;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return true,
        KeyCode::Enter => app.toggle_detail(),
        KeyCode::Char('e') => app.begin_edit(),
        KeyCode::Right => app.next_month(),
        KeyCode::Left => app.previous_month(),
        KeyCode::Down | KeyCode::Char('j') => app.next(),
        KeyCode::Up | KeyCode::Char('k') => app.previous(),
        KeyCode::Char('J') => app.move_selected(true),
        KeyCode::Char('K') => app.move_selected(false),
        KeyCode::Char('u') => app.undo(),
        KeyCode::Char('r') => app.redo(),
        KeyCode::Char('n') => app.append_row(),
        KeyCode::Char('d') => app.delete_selected(),
        _ => {}
    }
    false
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with month navigation
            Constraint::Length(3), // Totals (pinned row)
            Constraint::Min(0),    // Month grid
            Constraint::Length(3), // Status bar / input line
        ])
        .split(f.size());

    render_header(f, chunks[0], app);
    render_totals(f, chunks[1], app);

    if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(65), // Grid
                Constraint::Percentage(35), // Detail panel
            ])
            .split(chunks[2]);

        render_table(f, content_chunks[0], app);
        render_detail_panel(f, content_chunks[1], app);
    } else {
        render_table(f, chunks[2], app);
    }

    render_status_bar(f, chunks[3], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let history_style = |enabled: bool| {
        if enabled {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::DarkGray)
        }
    };

    let spans = vec![
        Span::styled("◀ ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            app.month.to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        ),
        Span::styled(" ▶", Style::default().fg(Color::DarkGray)),
        Span::raw("  |  "),
        Span::styled(
            format!("Rows: {}", app.rows.len()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  |  "),
        Span::styled("undo", history_style(app.service.can_undo())),
        Span::raw(" "),
        Span::styled("redo", history_style(app.service.can_redo())),
    ];

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_totals(f: &mut Frame, area: Rect, app: &App) {
    let totals = app.service.month_totals(app.month);

    let mut spans = vec![Span::styled(
        "Totals ",
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )];
    for person in app.service.people().all() {
        let total = totals.get(&person.id).copied().unwrap_or(0.0);
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(format!("{}: ", person.name), Style::default().fg(Color::White)));
        spans.push(Span::styled(format!("{:.2}", total), Style::default().fg(Color::Green)));
    }

    let bar = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::White)));

    f.render_widget(bar, area);
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let people = app.service.people().all().to_vec();

    let mut headers = vec!["Date".to_string(), "Description".to_string()];
    headers.extend(people.iter().map(|p| p.name.clone()));

    let header_cells = headers.into_iter().map(|h| {
        Cell::from(h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.rows.iter().map(|expense| {
        // Anchors stand out, followers are read-only
        let color = if expense.is_follower() {
            Color::DarkGray
        } else if expense.is_installment() {
            Color::Cyan
        } else {
            Color::White
        };

        let mut cells = vec![
            Cell::from(expense.date.format("%d/%m").to_string()),
            Cell::from(truncate(&expense.description, 40)).style(Style::default().fg(color)),
        ];
        for person in &people {
            let amount = expense.people.get(&person.id).copied().flatten();
            cells.push(Cell::from(
                amount.map(|a| format!("{:.2}", a)).unwrap_or_default(),
            ));
        }

        Row::new(cells).height(1)
    });

    let mut widths = vec![Constraint::Length(7), Constraint::Min(20)];
    widths.extend(people.iter().map(|_| Constraint::Length(14)));

    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::White))
                .title(format!(" {} ", app.month)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let label = |text: &str| Span::styled(text.to_string(), Style::default().fg(Color::Yellow));

    let lines = match app.selected_expense() {
        Some(expense) => {
            let mut lines = vec![
                Line::from(vec![label("Date: "), Span::raw(expense.date.to_string())]),
                Line::from(vec![label("Description: "), Span::raw(expense.description.clone())]),
                Line::from(vec![label("Total: "), Span::raw(format!("{:.2}", expense.total()))]),
                Line::from(""),
            ];
            match expense.installment_tag() {
                Some(tag) => {
                    lines.push(Line::from(vec![
                        label("Installment: "),
                        Span::raw(format!("{} of {}", tag.installment, tag.quantity)),
                    ]));
                    lines.push(Line::from(vec![
                        label("Role: "),
                        Span::raw(if tag.is_first { "first (editable)" } else { "follower" }),
                    ]));
                    lines.push(Line::from(vec![label("Chain: "), Span::raw(tag.installment_id)]));
                }
                None => lines.push(Line::from(Span::styled(
                    "Not an installment",
                    Style::default().fg(Color::DarkGray),
                ))),
            }
            lines
        }
        None => vec![Line::from("No row selected")],
    };

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Details "),
    );

    f.render_widget(panel, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let key = |k: &str| Span::styled(k.to_string(), Style::default().fg(Color::Yellow));

    let spans = if let Some(input) = &app.input {
        vec![
            Span::styled(" Description: ", Style::default().fg(Color::Cyan)),
            Span::raw(input.clone()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
            Span::raw("  ("),
            key("Enter"),
            Span::raw(" commit, "),
            key("Esc"),
            Span::raw(" cancel)"),
        ]
    } else {
        let mut spans = vec![];
        if let Some(message) = &app.message {
            spans.push(Span::styled(format!(" {} ", message), Style::default().fg(Color::Green)));
            spans.push(Span::raw("| "));
        }
        for (k, action) in [
            ("←/→", " Month | "),
            ("e", " Edit | "),
            ("n", " New | "),
            ("d", " Delete | "),
            ("J/K", " Move | "),
            ("u/r", " Undo/Redo | "),
        ] {
            spans.push(key(k));
            spans.push(Span::raw(action));
        }
        spans.push(Span::styled("q", Style::default().fg(Color::Red)));
        spans.push(Span::raw(" Quit"));
        spans
    };

    let status_bar = Paragraph::new(vec![Line::from(spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
