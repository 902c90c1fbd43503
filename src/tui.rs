use crate::api::{DashboardApi, RankedSecurity};
use crate::filters::{FilterPatch, ReferenceData};
use crate::store::{load_reference_data, spawn_dispatch, Dashboard, Dispatch, FetchOutcome, FetchState};
use crate::widgets::{
    adjacent_pnl_tab, format_metric, format_dollars, format_millions, format_tick_date,
    pnl_tab_index, pnl_tab_labels, select_pnl_tab, AccountMultiSelect, DateField, DateRangeInput,
    SecuritySelect, NO_DATA,
};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, List, ListItem, ListState,
        Paragraph, Row, Table, Tabs, Wrap,
    },
    Frame, Terminal,
};
use std::collections::HashSet;
use std::io::{self, Stdout};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Filters,
    MetricCards,
    Chart,
    TopDown,
    BottomUp,
    Help,
}

impl Component {
    /// Returns all available components
    pub fn all() -> Vec<Component> {
        vec![
            Component::Filters,
            Component::MetricCards,
            Component::Chart,
            Component::TopDown,
            Component::BottomUp,
            Component::Help,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Filters => "filters",
            Component::MetricCards => "metric_cards",
            Component::Chart => "chart",
            Component::TopDown => "top_down",
            Component::BottomUp => "bottom_up",
            Component::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Component::Filters => "Security, date range and account filters",
            Component::MetricCards => "Total, realized, unrealized gains, interest and dividends",
            Component::Chart => "P/L time series with type tabs",
            Component::TopDown => "Securities ranked from the top",
            Component::BottomUp => "Securities ranked from the bottom",
            Component::Help => "Keyboard shortcuts",
        }
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filters" => Ok(Component::Filters),
            "metric_cards" => Ok(Component::MetricCards),
            "chart" => Ok(Component::Chart),
            "top_down" => Ok(Component::TopDown),
            "bottom_up" => Ok(Component::BottomUp),
            "help" => Ok(Component::Help),
            _ => Err(format!("Unknown component: '{s}'")),
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DisabledComponents {
    disabled: HashSet<Component>,
}

impl DisabledComponents {
    pub fn new(disabled_list: Vec<String>) -> Self {
        let mut disabled = HashSet::new();

        for component_str in disabled_list {
            match Component::from_str(&component_str) {
                Ok(component) => {
                    disabled.insert(component);
                }
                Err(err) => tracing::warn!("{err}"),
            }
        }

        DisabledComponents { disabled }
    }

    pub fn is_disabled(&self, component: Component) -> bool {
        self.disabled.contains(&component)
    }
}

/// Messages delivered to the UI loop by background tasks.
#[derive(Debug)]
pub enum AppEvent {
    Reference(ReferenceData),
    Fetched(FetchOutcome),
    Refreshed(Result<serde_json::Value, String>),
}

impl From<FetchOutcome> for AppEvent {
    fn from(outcome: FetchOutcome) -> Self {
        AppEvent::Fetched(outcome)
    }
}

/// The filter control that receives keyboard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Security,
    StartDate,
    EndDate,
    Accounts,
    PnlTabs,
}

impl Focus {
    fn all() -> &'static [Focus] {
        &[
            Focus::Security,
            Focus::StartDate,
            Focus::EndDate,
            Focus::Accounts,
            Focus::PnlTabs,
        ]
    }

    fn cycle(self, forward: bool) -> Focus {
        let focuses = Focus::all();
        let index = focuses.iter().position(|&f| f == self).unwrap_or(0);
        if forward {
            focuses[(index + 1) % focuses.len()]
        } else {
            focuses[(index + focuses.len() - 1) % focuses.len()]
        }
    }
}

/// Screen regions for one frame. Disabled components get no region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DashboardLayout {
    pub security: Option<Rect>,
    pub start_date: Option<Rect>,
    pub end_date: Option<Rect>,
    pub accounts: Option<Rect>,
    pub cards: Option<Rect>,
    pub pnl_tabs: Option<Rect>,
    pub chart: Option<Rect>,
    pub top_down: Option<Rect>,
    pub bottom_up: Option<Rect>,
    pub help: Option<Rect>,
}

impl DashboardLayout {
    pub fn new(area: Rect, disabled: &DisabledComponents) -> Self {
        let mut layout = DashboardLayout::default();

        let mut rows: Vec<(Option<Component>, Constraint)> = Vec::new();
        if !disabled.is_disabled(Component::Filters) {
            rows.push((Some(Component::Filters), Constraint::Length(3)));
        }
        if !disabled.is_disabled(Component::MetricCards) {
            rows.push((Some(Component::MetricCards), Constraint::Length(3)));
        }
        rows.push((None, Constraint::Min(0)));
        if !disabled.is_disabled(Component::Help) {
            rows.push((Some(Component::Help), Constraint::Length(1)));
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(rows.iter().map(|(_, c)| *c).collect::<Vec<_>>())
            .split(area);

        for ((component, _), chunk) in rows.iter().zip(chunks.iter()) {
            match component {
                Some(Component::Filters) => {
                    let filters = Layout::default()
                        .direction(Direction::Horizontal)
                        .constraints([
                            Constraint::Percentage(25),
                            Constraint::Percentage(17),
                            Constraint::Percentage(18),
                            Constraint::Percentage(40),
                        ])
                        .split(*chunk);
                    layout.security = Some(filters[0]);
                    layout.start_date = Some(filters[1]);
                    layout.end_date = Some(filters[2]);
                    layout.accounts = Some(filters[3]);
                }
                Some(Component::MetricCards) => layout.cards = Some(*chunk),
                Some(Component::Help) => layout.help = Some(*chunk),
                _ => layout.split_body(*chunk, disabled),
            }
        }
        layout
    }

    fn split_body(&mut self, body: Rect, disabled: &DisabledComponents) {
        let mut columns: Vec<(Component, Constraint)> = Vec::new();
        if !disabled.is_disabled(Component::Chart) {
            columns.push((Component::Chart, Constraint::Percentage(50)));
        }
        if !disabled.is_disabled(Component::TopDown) {
            columns.push((Component::TopDown, Constraint::Percentage(25)));
        }
        if !disabled.is_disabled(Component::BottomUp) {
            columns.push((Component::BottomUp, Constraint::Percentage(25)));
        }
        if columns.is_empty() {
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(columns.iter().map(|(_, c)| *c).collect::<Vec<_>>())
            .split(body);
        for ((component, _), chunk) in columns.iter().zip(chunks.iter()) {
            match component {
                Component::Chart => {
                    let chart = Layout::default()
                        .direction(Direction::Vertical)
                        .constraints([Constraint::Length(3), Constraint::Min(0)])
                        .split(*chunk);
                    self.pnl_tabs = Some(chart[0]);
                    self.chart = Some(chart[1]);
                }
                Component::TopDown => self.top_down = Some(*chunk),
                _ => self.bottom_up = Some(*chunk),
            }
        }
    }
}

// Region hanging below `anchor`, `rows` lines tall plus borders, clipped to `bounds`.
fn dropdown_area(anchor: Rect, rows: usize, bounds: Rect) -> Rect {
    let y = anchor.bottom();
    let available = bounds.bottom().saturating_sub(y);
    let height = (rows as u16).saturating_add(2).min(available);
    Rect::new(anchor.x, y, anchor.width, height)
}

// First visible row so that `cursor` stays on screen.
fn list_offset(cursor: usize, visible_rows: usize) -> usize {
    if visible_rows == 0 {
        0
    } else {
        cursor.saturating_sub(visible_rows - 1)
    }
}

// List rows of a bordered popup, below `header_rows` lines of other content.
fn popup_list_area(popup: Rect, header_rows: u16) -> Rect {
    let inner = Block::default().borders(Borders::ALL).inner(popup);
    let header = header_rows.min(inner.height);
    Rect {
        y: inner.y + header,
        height: inner.height - header,
        ..inner
    }
}

// Item index under the pointer, for a list drawn in `list` with the
// offset `list_offset` gives.
fn list_row_at(list: Rect, cursor: usize, column: u16, row: u16) -> Option<usize> {
    if !list.contains(Position::new(column, row)) {
        return None;
    }
    Some(list_offset(cursor, list.height as usize) + (row - list.y) as usize)
}

const TAB_PADDING: &str = " ";
const TAB_DIVIDER: &str = "|";

// Tab drawn at the pointer. Mirrors how `Tabs` lays out titles:
// padding, label, padding, then a divider before the next one.
fn tab_at(tabs: Rect, labels: &[&str], column: u16, row: u16) -> Option<usize> {
    let inner = Block::default().borders(Borders::ALL).inner(tabs);
    if !inner.contains(Position::new(column, row)) {
        return None;
    }
    let padding = 2 * TAB_PADDING.len() as u16;
    let mut x = inner.x;
    for (index, label) in labels.iter().enumerate() {
        let width = label.chars().count() as u16 + padding;
        if column >= x && column < x.saturating_add(width) {
            return Some(index);
        }
        x = x.saturating_add(width + TAB_DIVIDER.len() as u16);
    }
    None
}

const SECURITY_ROWS: usize = 10;
const KEY_HELP: &str =
    "Tab: focus | Enter: open/edit | h/l: step | 1-3: P/L type | r: refresh | g: reload | q: quit";

pub struct App {
    pub dashboard: Dashboard,
    pub security: SecuritySelect,
    pub accounts: AccountMultiSelect,
    pub dates: DateRangeInput,
    pub focus: Focus,
    pub should_quit: bool,
    pub error_message: Option<String>,
    pub status: Option<String>,
    pub disabled_components: DisabledComponents,
    pub screen: Rect,
    api: Arc<dyn DashboardApi>,
    sender: mpsc::UnboundedSender<AppEvent>,
    receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl App {
    pub fn new(
        api: Arc<dyn DashboardApi>,
        dashboard: Dashboard,
        disabled_components: DisabledComponents,
    ) -> App {
        let (sender, receiver) = mpsc::unbounded_channel();
        App {
            dashboard,
            security: SecuritySelect::default(),
            accounts: AccountMultiSelect::default(),
            dates: DateRangeInput::default(),
            focus: Focus::Security,
            should_quit: false,
            error_message: None,
            status: None,
            disabled_components,
            screen: Rect::new(0, 0, 120, 40),
            api,
            sender,
            receiver,
        }
    }

    pub fn layout(&self) -> DashboardLayout {
        DashboardLayout::new(self.screen, &self.disabled_components)
    }

    /// Loads reference data in the background; the first full dispatch
    /// follows once it arrives.
    pub fn start_bootstrap(&self) {
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let reference = load_reference_data(api.as_ref()).await;
            let _ = sender.send(AppEvent::Reference(reference));
        });
    }

    /// Drains every pending background message without blocking.
    pub fn try_receive_updates(&mut self) -> bool {
        let mut received = false;
        while let Ok(event) = self.receiver.try_recv() {
            self.handle_event(event);
            received = true;
        }
        received
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Reference(reference) => {
                let first_load = !self.dashboard.is_bootstrapped();
                let dispatch = self.dashboard.load_reference(reference);
                if first_load {
                    let reference = self.dashboard.reference();
                    self.security = SecuritySelect::new(
                        reference.securities.clone(),
                        self.dashboard.filters().security.clone(),
                    );
                    self.accounts = AccountMultiSelect::new(reference.accounts.clone());
                }
                if !self.dashboard.is_bootstrapped() {
                    self.status = Some("No accounts or securities available".to_string());
                }
                self.run_dispatch(dispatch);
            }
            AppEvent::Fetched(outcome) => {
                self.dashboard.apply(outcome);
            }
            AppEvent::Refreshed(result) => {
                self.status = Some(match result {
                    Ok(_) => "Dataset refreshed, press g to reload".to_string(),
                    Err(e) => format!("Refresh failed: {e}"),
                });
            }
        }
    }

    fn run_dispatch(&self, dispatch: Option<Dispatch>) {
        if let Some(dispatch) = dispatch {
            spawn_dispatch(Arc::clone(&self.api), dispatch, self.sender.clone());
        }
    }

    /// Merges a widget patch into the store and runs the fetches it calls for.
    pub fn emit(&mut self, patch: FilterPatch) {
        let dispatch = self.dashboard.apply_patch(patch);
        self.run_dispatch(dispatch);
    }

    fn select_tab(&mut self, label: &str) {
        match select_pnl_tab(label) {
            Ok(patch) => self.emit(patch),
            Err(e) => tracing::warn!("{e}"),
        }
    }

    /// Fire-and-forget dataset rebuild. Filters and results stay as they are.
    pub fn refresh_dataset(&mut self) {
        self.status = Some("Refreshing dataset...".to_string());
        let api = Arc::clone(&self.api);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = api.refresh_dataset().await.map_err(|e| {
                tracing::error!("Error refreshing dataset: {e}");
                e.to_string()
            });
            if result.is_ok() {
                tracing::info!("Dataset refresh requested");
            }
            let _ = sender.send(AppEvent::Refreshed(result));
        });
    }

    /// Full dispatch with the current filters.
    pub fn reload(&mut self) {
        self.emit(FilterPatch::default());
    }

    fn security_popup(&self) -> Option<Rect> {
        let anchor = self.layout().security?;
        let rows = self.security.visible().len().min(SECURITY_ROWS) + 1;
        Some(dropdown_area(anchor, rows, self.screen))
    }

    fn accounts_popup(&self) -> Option<Rect> {
        let anchor = self.layout().accounts?;
        Some(dropdown_area(anchor, self.accounts.options().len() + 1, self.screen))
    }

    fn open_security(&mut self) {
        if let (Some(anchor), Some(popup)) = (self.layout().security, self.security_popup()) {
            self.security.toggle(anchor.union(popup));
        }
    }

    fn open_accounts(&mut self) {
        if let (Some(anchor), Some(popup)) = (self.layout().accounts, self.accounts_popup()) {
            self.accounts.toggle_open(anchor.union(popup));
        }
    }

    // The security list shrinks and grows with the query; the inside
    // region must follow what is on screen.
    fn track_dropdown_areas(&mut self) {
        let layout = self.layout();
        if let (Some(anchor), Some(popup)) = (layout.security, self.security_popup()) {
            self.security.track_area(anchor.union(popup));
        }
        if let (Some(anchor), Some(popup)) = (layout.accounts, self.accounts_popup()) {
            self.accounts.track_area(anchor.union(popup));
        }
    }

    fn activate_focus(&mut self) {
        let filters = self.dashboard.filters();
        match self.focus {
            Focus::Security => self.open_security(),
            Focus::Accounts => self.open_accounts(),
            Focus::StartDate => {
                let current = filters.start_date;
                self.dates.set_focus(DateField::Start);
                self.dates.begin_edit(current);
            }
            Focus::EndDate => {
                let current = filters.end_date;
                self.dates.set_focus(DateField::End);
                self.dates.begin_edit(current);
            }
            Focus::PnlTabs => {}
        }
    }

    fn step(&mut self, forward: bool) {
        let filters = self.dashboard.filters();
        let (start, end) = (filters.start_date, filters.end_date);
        match self.focus {
            Focus::PnlTabs => {
                let label = adjacent_pnl_tab(filters.pnl_type, forward);
                self.select_tab(label);
            }
            Focus::StartDate | Focus::EndDate => {
                self.dates.set_focus(if self.focus == Focus::StartDate {
                    DateField::Start
                } else {
                    DateField::End
                });
                let days = if forward { 1 } else { -1 };
                if let Some(patch) = self.dates.shift(days, start, end) {
                    self.emit(patch);
                }
            }
            Focus::Security | Focus::Accounts => {}
        }
    }

    pub fn handle_key(&mut self, code: KeyCode) {
        if self.error_message.is_some() {
            self.error_message = None;
            return;
        }

        if self.security.is_open() {
            match code {
                KeyCode::Esc => self.security.close(),
                KeyCode::Enter => {
                    if let Some(patch) = self.security.select_highlighted() {
                        self.emit(patch);
                    }
                }
                KeyCode::Up => self.security.move_cursor(false),
                KeyCode::Down => self.security.move_cursor(true),
                KeyCode::Backspace => self.security.pop_char(),
                KeyCode::Char(c) => self.security.push_char(c),
                _ => {}
            }
            return;
        }

        if self.accounts.is_open() {
            match code {
                KeyCode::Esc | KeyCode::Char('q') => self.accounts.close(),
                KeyCode::Up | KeyCode::Char('k') => self.accounts.move_cursor(false),
                KeyCode::Down | KeyCode::Char('j') => self.accounts.move_cursor(true),
                KeyCode::Enter | KeyCode::Char(' ') => {
                    if let Some(patch) = self.accounts.toggle_at_cursor() {
                        self.emit(patch);
                    }
                }
                _ => {}
            }
            return;
        }

        if self.dates.is_editing() {
            match code {
                KeyCode::Esc => self.dates.cancel(),
                KeyCode::Enter => {
                    let filters = self.dashboard.filters();
                    let (start, end) = (filters.start_date, filters.end_date);
                    match self.dates.commit(start, end) {
                        Ok(patch) => self.emit(patch),
                        Err(e) => {
                            tracing::warn!("Rejected date input: {e}");
                            self.error_message = Some(e.to_string());
                        }
                    }
                }
                KeyCode::Backspace => self.dates.pop_char(),
                KeyCode::Char(c) => self.dates.push_char(c),
                _ => {}
            }
            return;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => self.focus = self.focus.cycle(true),
            KeyCode::BackTab => self.focus = self.focus.cycle(false),
            KeyCode::Enter | KeyCode::Char(' ') => self.activate_focus(),
            KeyCode::Char('h') | KeyCode::Left => self.step(false),
            KeyCode::Char('l') | KeyCode::Right => self.step(true),
            KeyCode::Char(c @ '1'..='3') => {
                let labels = pnl_tab_labels();
                if let Some(label) = labels.get(c as usize - '1' as usize) {
                    self.select_tab(label);
                }
            }
            KeyCode::Char('r') => self.refresh_dataset(),
            KeyCode::Char('g') => self.reload(),
            _ => {}
        }
    }

    pub fn handle_pointer_down(&mut self, column: u16, row: u16) {
        self.track_dropdown_areas();
        let layout = self.layout();
        let position = Position::new(column, row);
        let hit = |area: Option<Rect>| area.is_some_and(|a| a.contains(position));

        // a click on an open dropdown's trigger closes it
        if self.security.is_open() && hit(layout.security) {
            self.security.close();
            return;
        }
        if self.accounts.is_open() && hit(layout.accounts) {
            self.accounts.close();
            return;
        }

        if self.security.is_open() {
            let picked = self
                .security_popup()
                .and_then(|popup| {
                    list_row_at(popup_list_area(popup, 1), self.security.cursor(), column, row)
                })
                .and_then(|index| self.security.visible().get(index).cloned());
            match picked {
                Some(item) => {
                    let patch = self.security.select(&item);
                    self.emit(patch);
                }
                None => {
                    self.security.pointer_down(column, row);
                }
            }
            return;
        }

        if self.accounts.is_open() {
            let index = self.accounts_popup().and_then(|popup| {
                list_row_at(popup_list_area(popup, 0), self.accounts.cursor(), column, row)
            });
            let patch = match index {
                // row 0 is "Select all"
                Some(0) => Some(self.accounts.set_all(!self.accounts.all_selected())),
                Some(index) => self
                    .accounts
                    .options()
                    .get(index - 1)
                    .cloned()
                    .map(|option| self.accounts.toggle(&option)),
                None => None,
            };
            match patch {
                Some(patch) => self.emit(patch),
                None => {
                    self.accounts.pointer_down(column, row);
                }
            }
            return;
        }

        if hit(layout.security) {
            self.focus = Focus::Security;
            self.open_security();
        } else if hit(layout.accounts) {
            self.focus = Focus::Accounts;
            self.open_accounts();
        } else if hit(layout.start_date) {
            self.focus = Focus::StartDate;
            self.activate_focus();
        } else if hit(layout.end_date) {
            self.focus = Focus::EndDate;
            self.activate_focus();
        } else if let Some(tabs) = layout.pnl_tabs {
            let labels = pnl_tab_labels();
            if let Some(label) = tab_at(tabs, &labels, column, row).and_then(|i| labels.get(i)) {
                self.focus = Focus::PnlTabs;
                self.select_tab(label);
            }
        }
    }
}

pub async fn run_tui(
    api: Arc<dyn DashboardApi>,
    dashboard: Dashboard,
    disabled_components: Vec<String>,
) -> eyre::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let disabled = DisabledComponents::new(disabled_components);
    let mut app = App::new(api, dashboard, disabled);
    app.start_bootstrap();

    let res = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!("Dashboard loop failed: {err}");
        return Err(err.into());
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        let size = terminal.size()?;
        app.screen = Rect::new(0, 0, size.width, size.height);
        terminal.draw(|f| ui(f, app))?;

        // Apply results from background fetches (non-blocking)
        app.try_receive_updates();

        if crossterm::event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(key.code),
                Event::Mouse(mouse) => {
                    if let MouseEventKind::Down(MouseButton::Left) = mouse.kind {
                        app.handle_pointer_down(mouse.column, mouse.row);
                    }
                }
                _ => {}
            }
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let layout = app.layout();

    render_filters(f, &layout, app);
    if let Some(area) = layout.cards {
        render_metric_cards(f, area, app);
    }
    if let (Some(tabs), Some(chart)) = (layout.pnl_tabs, layout.chart) {
        render_chart(f, tabs, chart, app);
    }
    let rankings = app.dashboard.rankings();
    if let Some(area) = layout.top_down {
        let items = rankings.value().map(|r| r.top_down.as_slice());
        render_ranking(f, area, "Top down", Color::Green, items, rankings);
    }
    if let Some(area) = layout.bottom_up {
        let items = rankings.value().map(|r| r.bottom_up.as_slice());
        render_ranking(f, area, "Bottom up", Color::Red, items, rankings);
    }
    if let Some(area) = layout.help {
        render_help(f, area, app);
    }

    if app.security.is_open() {
        render_security_dropdown(f, app);
    }
    if app.accounts.is_open() {
        render_accounts_dropdown(f, app);
    }
    if let Some(error) = &app.error_message {
        render_error_popup(f, error);
    }
}

fn focus_style(app: &App, focus: Focus) -> Style {
    if app.focus == focus {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

// Title suffix for a result slot that is in flight or failed
fn state_marker<T>(state: &FetchState<T>) -> &'static str {
    match state {
        FetchState::Loading { .. } => " (loading)",
        FetchState::Failed { .. } => " (failed)",
        _ => "",
    }
}

fn render_filters(f: &mut Frame, layout: &DashboardLayout, app: &App) {
    let filters = app.dashboard.filters();

    if let Some(area) = layout.security {
        let security = Paragraph::new(app.security.label().to_string())
            .block(Block::default().borders(Borders::ALL).title("Security"))
            .style(focus_style(app, Focus::Security));
        f.render_widget(security, area);
    }

    let date_fields = [
        (layout.start_date, Focus::StartDate, DateField::Start, "Start", filters.start_date),
        (layout.end_date, Focus::EndDate, DateField::End, "End", filters.end_date),
    ];
    for (area, focus, field, title, value) in date_fields {
        let Some(area) = area else { continue };
        let text = match app.dates.buffer() {
            Some(buffer) if app.dates.focus() == field && app.focus == focus => {
                format!("{buffer}_")
            }
            _ => value.map(|d| d.to_string()).unwrap_or_default(),
        };
        let input = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .style(focus_style(app, focus));
        f.render_widget(input, area);
    }

    if let Some(area) = layout.accounts {
        let accounts = Paragraph::new(app.accounts.summary())
            .block(Block::default().borders(Borders::ALL).title("Accounts"))
            .style(focus_style(app, Focus::Accounts));
        f.render_widget(accounts, area);
    }
}

fn render_metric_cards(f: &mut Frame, area: Rect, app: &App) {
    let state = app.dashboard.metrics();
    let metrics = state.value();
    let cards = [
        ("Total Gains", metrics.and_then(|m| m.total_gains)),
        ("Realized Gains", metrics.and_then(|m| m.realized_gains)),
        ("Unrealized Gains", metrics.and_then(|m| m.unrealized_gains)),
        ("Interest", metrics.and_then(|m| m.interest)),
        ("Dividends", metrics.and_then(|m| m.dividends)),
    ];

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 5); 5])
        .split(area);

    let marker = state_marker(state);
    for ((title, value), chunk) in cards.iter().zip(chunks.iter()) {
        let text = format_metric(*value);
        let color = match value {
            Some(v) if *v < 0.0 => Color::Red,
            Some(v) if *v > 0.0 => Color::Green,
            _ => Color::Gray,
        };
        let card = Paragraph::new(text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("{title}{marker}")),
            )
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center);
        f.render_widget(card, *chunk);
    }
}

fn render_chart(f: &mut Frame, tabs_area: Rect, area: Rect, app: &App) {
    let selected = app.dashboard.filters().pnl_type;
    let titles: Vec<Line> = pnl_tab_labels()
        .into_iter()
        .map(|label| Line::from(Span::raw(label)))
        .collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title("P/L Type"))
        .style(focus_style(app, Focus::PnlTabs))
        .highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .padding(TAB_PADDING, TAB_PADDING)
        .divider(TAB_DIVIDER)
        .select(pnl_tab_index(selected));
    f.render_widget(tabs, tabs_area);

    let state = app.dashboard.series();
    let title = format!("P/L over time{}", state_marker(state));
    let Some(series) = state.value().filter(|s| !s.is_empty()) else {
        render_no_data(f, area, &title);
        return;
    };

    let points = series.points();
    let data: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, (_, value))| (i as f64, value.trunc()))
        .collect();

    let (mut y_min, mut y_max) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, y)| {
            (lo.min(*y), hi.max(*y))
        });
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }
    let x_max = (data.len().saturating_sub(1)).max(1) as f64;

    let x_labels: Vec<String> = match (points.first(), points.get(points.len() / 2), points.last()) {
        (Some(first), Some(mid), Some(last)) => vec![
            format_tick_date(first.0),
            format_tick_date(mid.0),
            format_tick_date(last.0),
        ],
        _ => Vec::new(),
    };
    let y_labels = vec![
        format_millions(y_min),
        format_millions((y_min + y_max) / 2.0),
        format_millions(y_max),
    ];

    let dataset = Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Cyan))
        .data(&data);

    let chart = Chart::new(vec![dataset])
        .block(Block::default().borders(Borders::ALL).title(title))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([0.0, x_max])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels(y_labels),
        );
    f.render_widget(chart, area);
}

fn render_ranking<T>(
    f: &mut Frame,
    area: Rect,
    title: &str,
    accent: Color,
    items: Option<&[RankedSecurity]>,
    state: &FetchState<T>,
) {
    let title = format!("{title}{}", state_marker(state));
    let Some(items) = items.filter(|items| !items.is_empty()) else {
        render_no_data(f, area, &title);
        return;
    };

    let header = Row::new(vec![
        Cell::from("Ticker").style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Cell::from("Value").style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
    ])
    .bottom_margin(1);

    let rows = items.iter().map(|item| {
        let color = if item.value < 0.0 { Color::Red } else { Color::White };
        Row::new(vec![
            Cell::from(item.security.clone()),
            Cell::from(format_dollars(item.value)).style(Style::default().fg(color)),
        ])
    });

    let table = Table::new(rows, [Constraint::Percentage(45), Constraint::Percentage(55)])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(accent))
                .title(title),
        );
    f.render_widget(table, area);
}

fn render_no_data(f: &mut Frame, area: Rect, title: &str) {
    let placeholder = Paragraph::new(NO_DATA)
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center);
    f.render_widget(placeholder, area);
}

fn render_help(f: &mut Frame, area: Rect, app: &App) {
    let activity = if !app.dashboard.is_bootstrapped() && app.status.is_none() {
        Some("Loading reference data...")
    } else if app.dashboard.is_loading() {
        Some("Loading...")
    } else {
        None
    };
    let text = activity
        .map(str::to_string)
        .into_iter()
        .chain(app.status.clone())
        .chain(std::iter::once(KEY_HELP.to_string()))
        .collect::<Vec<_>>()
        .join(" | ");
    let help = Paragraph::new(text).style(Style::default().fg(Color::Cyan));
    f.render_widget(help, area);
}

fn render_security_dropdown(f: &mut Frame, app: &App) {
    let Some(area) = app.security_popup() else {
        return;
    };
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Search ");
    let inner = block.inner(area);
    f.render_widget(block, area);

    let query = Paragraph::new(format!("> {}_", app.security.query()))
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD));
    f.render_widget(query, Rect { height: inner.height.min(1), ..inner });

    let items: Vec<ListItem> = app
        .security
        .visible()
        .iter()
        .map(|s| ListItem::new(s.clone()))
        .collect();
    let list = List::new(items).highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );
    let list_area = popup_list_area(area, 1);
    let mut state = ListState::default()
        .with_offset(list_offset(app.security.cursor(), list_area.height as usize))
        .with_selected(Some(app.security.cursor()));
    f.render_stateful_widget(list, list_area, &mut state);
}

fn render_accounts_dropdown(f: &mut Frame, app: &App) {
    let Some(area) = app.accounts_popup() else {
        return;
    };
    f.render_widget(Clear, area);

    let checkbox = |checked: bool| if checked { "[x]" } else { "[ ]" };
    let mut items = vec![ListItem::new(format!(
        "{} Select all",
        checkbox(app.accounts.all_selected())
    ))];
    items.extend(app.accounts.options().iter().map(|option| {
        ListItem::new(format!(
            "{} {option}",
            checkbox(app.accounts.is_selected(option))
        ))
    }));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(
            " Accounts {}/{} ",
            app.accounts.selected().len(),
            app.accounts.options().len()
        ));
    f.render_widget(block, area);

    let list = List::new(items).highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );
    let list_area = popup_list_area(area, 0);
    let mut state = ListState::default()
        .with_offset(list_offset(app.accounts.cursor(), list_area.height as usize))
        .with_selected(Some(app.accounts.cursor()));
    f.render_stateful_widget(list, list_area, &mut state);
}

fn render_error_popup(f: &mut Frame, error: &str) {
    let popup_area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, popup_area);

    let error_paragraph = Paragraph::new(error)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Error")
                .style(Style::default().fg(Color::Red)),
        )
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(error_paragraph, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
