//! Filter widgets: state machines that turn key and pointer input into
//! [`FilterPatch`]es. They never touch the store themselves.

use crate::error::ValidationError;
use crate::filters::{parse_date, AccountId, FilterPatch, PnlType, SecurityId};
use chrono::{Days, NaiveDate};
use ratatui::layout::{Position, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropdownState {
    Closed,
    Open,
}

/// Pointer subscription held by an open dropdown. Pointer-down events are
/// routed to the dropdown only while it holds one; closing drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerSubscription {
    area: Rect,
}

impl PointerSubscription {
    pub fn is_outside(&self, column: u16, row: u16) -> bool {
        !self.area.contains(Position::new(column, row))
    }
}

#[derive(Debug, Clone, Default)]
struct Dropdown {
    subscription: Option<PointerSubscription>,
}

impl Dropdown {
    fn state(&self) -> DropdownState {
        if self.subscription.is_some() {
            DropdownState::Open
        } else {
            DropdownState::Closed
        }
    }

    fn open(&mut self, area: Rect) {
        self.subscription = Some(PointerSubscription { area });
    }

    fn close(&mut self) {
        self.subscription = None;
    }

    // no-op while closed
    fn track_area(&mut self, area: Rect) {
        if let Some(subscription) = &mut self.subscription {
            subscription.area = area;
        }
    }

    /// Returns true when the click landed outside and closed the dropdown.
    fn pointer_down(&mut self, column: u16, row: u16) -> bool {
        match self.subscription {
            Some(sub) if sub.is_outside(column, row) => {
                self.close();
                true
            }
            _ => false,
        }
    }
}

/// Case-insensitive substring match, always against the full list.
pub fn filter_candidates(candidates: &[SecurityId], query: &str) -> Vec<SecurityId> {
    let needle = query.to_lowercase();
    candidates
        .iter()
        .filter(|c| c.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Searchable single-select for the security filter.
#[derive(Debug, Clone, Default)]
pub struct SecuritySelect {
    candidates: Vec<SecurityId>,
    visible: Vec<SecurityId>,
    query: String,
    cursor: usize,
    label: Option<SecurityId>,
    dropdown: Dropdown,
}

impl SecuritySelect {
    pub fn new(candidates: Vec<SecurityId>, label: Option<SecurityId>) -> Self {
        SecuritySelect {
            visible: candidates.clone(),
            candidates,
            label,
            ..Default::default()
        }
    }

    pub fn state(&self) -> DropdownState {
        self.dropdown.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == DropdownState::Open
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("Select security")
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn visible(&self) -> &[SecurityId] {
        &self.visible
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Opens the list; `area` is the on-screen region that counts as inside.
    pub fn open(&mut self, area: Rect) {
        self.dropdown.open(area);
    }

    pub fn close(&mut self) {
        self.dropdown.close();
        self.set_query("");
    }

    /// Moves the inside region of an open list, e.g. after the query
    /// shrank it.
    pub fn track_area(&mut self, area: Rect) {
        self.dropdown.track_area(area);
    }

    /// Trigger: Closed → Open, Open → Closed.
    pub fn toggle(&mut self, area: Rect) {
        if self.is_open() {
            self.close();
        } else {
            self.open(area);
        }
    }

    pub fn pointer_down(&mut self, column: u16, row: u16) -> bool {
        let closed = self.dropdown.pointer_down(column, row);
        if closed {
            self.set_query("");
        }
        closed
    }

    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.visible = filter_candidates(&self.candidates, &self.query);
        self.cursor = 0;
    }

    pub fn push_char(&mut self, c: char) {
        let query = format!("{}{c}", self.query);
        self.set_query(&query);
    }

    pub fn pop_char(&mut self) {
        let mut query = self.query.clone();
        query.pop();
        self.set_query(&query);
    }

    pub fn move_cursor(&mut self, down: bool) {
        if down {
            if self.cursor + 1 < self.visible.len() {
                self.cursor += 1;
            }
        } else {
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    /// Sets the label, closes and clears the query.
    pub fn select(&mut self, item: &str) -> FilterPatch {
        self.label = Some(item.to_string());
        self.close();
        FilterPatch::security(item)
    }

    pub fn select_highlighted(&mut self) -> Option<FilterPatch> {
        let item = self.visible.get(self.cursor)?.clone();
        Some(self.select(&item))
    }
}

/// Multi-select for the account filter. Starts with every option selected.
#[derive(Debug, Clone, Default)]
pub struct AccountMultiSelect {
    options: Vec<AccountId>,
    selected: Vec<AccountId>,
    // row 0 is "Select all"
    cursor: usize,
    dropdown: Dropdown,
}

impl AccountMultiSelect {
    pub fn new(options: Vec<AccountId>) -> Self {
        AccountMultiSelect {
            selected: options.clone(),
            options,
            ..Default::default()
        }
    }

    pub fn options(&self) -> &[AccountId] {
        &self.options
    }

    pub fn selected(&self) -> &[AccountId] {
        &self.selected
    }

    pub fn is_selected(&self, option: &str) -> bool {
        self.selected.iter().any(|s| s == option)
    }

    pub fn all_selected(&self) -> bool {
        self.selected.len() == self.options.len()
    }

    pub fn summary(&self) -> String {
        if self.selected.is_empty() {
            "Select accounts".to_string()
        } else {
            self.selected.join(", ")
        }
    }

    pub fn state(&self) -> DropdownState {
        self.dropdown.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == DropdownState::Open
    }

    pub fn toggle_open(&mut self, area: Rect) {
        if self.is_open() {
            self.dropdown.close();
        } else {
            self.dropdown.open(area);
        }
    }

    pub fn close(&mut self) {
        self.dropdown.close();
    }

    pub fn track_area(&mut self, area: Rect) {
        self.dropdown.track_area(area);
    }

    pub fn pointer_down(&mut self, column: u16, row: u16) -> bool {
        self.dropdown.pointer_down(column, row)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn move_cursor(&mut self, down: bool) {
        if down {
            if self.cursor < self.options.len() {
                self.cursor += 1;
            }
        } else {
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    /// "Select all" checkbox: checked selects every option, unchecked none.
    pub fn set_all(&mut self, checked: bool) -> FilterPatch {
        self.selected = if checked {
            self.options.clone()
        } else {
            Vec::new()
        };
        FilterPatch::accounts(self.selected.clone())
    }

    /// Removes a selected option or appends an unselected one. The patch
    /// always carries the whole new selection.
    pub fn toggle(&mut self, option: &str) -> FilterPatch {
        if self.is_selected(option) {
            self.selected.retain(|s| s != option);
        } else {
            self.selected.push(option.to_string());
        }
        FilterPatch::accounts(self.selected.clone())
    }

    pub fn toggle_at_cursor(&mut self) -> Option<FilterPatch> {
        if self.cursor == 0 {
            let checked = !self.all_selected();
            return Some(self.set_all(checked));
        }
        let option = self.options.get(self.cursor - 1)?.clone();
        Some(self.toggle(&option))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Start,
    End,
}

/// New start date paired with the current end date.
pub fn change_start(start: NaiveDate, current_end: Option<NaiveDate>) -> FilterPatch {
    FilterPatch {
        start_date: Some(start),
        end_date: current_end,
        ..Default::default()
    }
}

/// New end date paired with the current start date.
pub fn change_end(end: NaiveDate, current_start: Option<NaiveDate>) -> FilterPatch {
    FilterPatch {
        start_date: current_start,
        end_date: Some(end),
        ..Default::default()
    }
}

/// Date range inputs. Values always come from the store; the only local
/// state is the text buffer of an edit in progress.
#[derive(Debug, Clone)]
pub struct DateRangeInput {
    focus: DateField,
    buffer: Option<String>,
}

impl Default for DateRangeInput {
    fn default() -> Self {
        DateRangeInput {
            focus: DateField::Start,
            buffer: None,
        }
    }
}

impl DateRangeInput {
    pub fn focus(&self) -> DateField {
        self.focus
    }

    pub fn set_focus(&mut self, field: DateField) {
        self.focus = field;
    }

    pub fn buffer(&self) -> Option<&str> {
        self.buffer.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn begin_edit(&mut self, current: Option<NaiveDate>) {
        self.buffer = Some(current.map(|d| d.to_string()).unwrap_or_default());
    }

    pub fn cancel(&mut self) {
        self.buffer = None;
    }

    pub fn push_char(&mut self, c: char) {
        if let Some(buffer) = &mut self.buffer {
            if c.is_ascii_digit() || c == '-' {
                buffer.push(c);
            }
        }
    }

    pub fn pop_char(&mut self) {
        if let Some(buffer) = &mut self.buffer {
            buffer.pop();
        }
    }

    /// Parses the buffer and emits the patch for the focused field. The
    /// edit ends either way.
    pub fn commit(
        &mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<FilterPatch, ValidationError> {
        let buffer = self.buffer.take().unwrap_or_default();
        let date = parse_date(&buffer)?;
        Ok(match self.focus {
            DateField::Start => change_start(date, end),
            DateField::End => change_end(date, start),
        })
    }

    /// Moves the focused date by `days`; `None` before the store has dates.
    pub fn shift(
        &self,
        days: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Option<FilterPatch> {
        let step = |date: NaiveDate| {
            if days >= 0 {
                date.checked_add_days(Days::new(days.unsigned_abs()))
            } else {
                date.checked_sub_days(Days::new(days.unsigned_abs()))
            }
        };
        match self.focus {
            DateField::Start => Some(change_start(step(start?)?, end)),
            DateField::End => Some(change_end(step(end?)?, start)),
        }
    }
}

/// Tab labels for the three P/L types, in display order.
pub fn pnl_tab_labels() -> Vec<&'static str> {
    PnlType::all().iter().map(|t| t.label()).collect()
}

/// Clicking a tab: map its label to a P/L type patch.
pub fn select_pnl_tab(label: &str) -> Result<FilterPatch, ValidationError> {
    PnlType::from_label(label).map(FilterPatch::pnl_type)
}

pub fn pnl_tab_index(selected: Option<PnlType>) -> usize {
    selected
        .and_then(|s| PnlType::all().iter().position(|t| *t == s))
        .unwrap_or(0)
}

pub fn adjacent_pnl_tab(selected: Option<PnlType>, forward: bool) -> &'static str {
    let tabs = PnlType::all();
    let index = pnl_tab_index(selected);
    let next = if forward {
        (index + 1) % tabs.len()
    } else {
        (index + tabs.len() - 1) % tabs.len()
    };
    tabs[next].label()
}

pub const NO_DATA: &str = "No Data";

/// Metric card value. Absent and zero both read "No Data".
pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) if v != 0.0 && !v.is_nan() => format_dollars(v),
        _ => NO_DATA.to_string(),
    }
}

/// Truncates toward zero and groups thousands: `1234567.9` → `$1,234,567`.
pub fn format_dollars(value: f64) -> String {
    let truncated = value.trunc() as i64;
    let digits = truncated.unsigned_abs().to_string();
    let grouped = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    if truncated < 0 {
        format!("$-{grouped}")
    } else {
        format!("${grouped}")
    }
}

/// Chart axis label in millions, e.g. `1.25M`.
pub fn format_millions(value: f64) -> String {
    format!("{:.2}M", value / 1_000_000.0)
}

/// Chart axis date label, `MM/DD`.
pub fn format_tick_date(date: NaiveDate) -> String {
    date.format("%m/%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn popup() -> Rect {
        Rect::new(10, 5, 20, 8)
    }

    #[test]
    fn test_security_search_is_case_insensitive() {
        let mut select = SecuritySelect::new(strings(&["FOO", "BAR", "BARN"]), None);
        select.open(popup());
        for c in "bar".chars() {
            select.push_char(c);
        }
        assert_eq!(select.visible(), strings(&["BAR", "BARN"]).as_slice());

        select.set_query("");
        assert_eq!(select.visible(), strings(&["FOO", "BAR", "BARN"]).as_slice());
    }

    #[test]
    fn test_security_search_recomputes_from_full_list() {
        let mut select = SecuritySelect::new(strings(&["FOO", "BAR", "BARN"]), None);
        select.open(popup());
        select.set_query("barn");
        assert_eq!(select.visible(), strings(&["BARN"]).as_slice());
        select.pop_char();
        select.pop_char();
        assert_eq!(select.visible(), strings(&["BAR", "BARN"]).as_slice());
    }

    #[test]
    fn test_security_selection_closes_and_clears() {
        let mut select = SecuritySelect::new(strings(&["FOO", "BAR", "BARN"]), Some("FOO".into()));
        assert_eq!(select.state(), DropdownState::Closed);
        select.toggle(popup());
        assert_eq!(select.state(), DropdownState::Open);
        select.set_query("ba");
        select.move_cursor(true);

        let patch = select.select_highlighted().unwrap();
        assert_eq!(patch, FilterPatch::security("BARN"));
        assert_eq!(select.label(), "BARN");
        assert_eq!(select.state(), DropdownState::Closed);
        assert_eq!(select.query(), "");
        assert_eq!(select.visible().len(), 3);
    }

    #[test]
    fn test_security_outside_click_closes() {
        let mut select = SecuritySelect::new(strings(&["FOO"]), None);
        // closed dropdowns hold no subscription
        assert!(!select.pointer_down(0, 0));

        select.open(popup());
        select.set_query("f");
        assert!(!select.pointer_down(12, 6));
        assert!(select.is_open());
        assert!(select.pointer_down(0, 0));
        assert!(!select.is_open());
        assert_eq!(select.query(), "");
    }

    #[test]
    fn test_outside_click_uses_tracked_area() {
        let mut select = SecuritySelect::new(strings(&["FOO", "BAR"]), None);
        select.track_area(popup());
        assert!(!select.is_open());

        select.open(popup());
        select.set_query("foo");
        select.track_area(Rect::new(10, 5, 20, 4));
        // row 10 was inside the old region only
        assert!(select.pointer_down(12, 10));
        assert!(!select.is_open());

        let mut accounts = AccountMultiSelect::new(strings(&["A"]));
        accounts.toggle_open(popup());
        accounts.track_area(Rect::new(10, 5, 20, 3));
        assert!(!accounts.pointer_down(11, 6));
        assert!(accounts.pointer_down(11, 9));
    }

    #[test]
    fn test_accounts_start_all_selected() {
        let select = AccountMultiSelect::new(strings(&["A", "B", "C"]));
        assert!(select.all_selected());
        assert_eq!(select.summary(), "A, B, C");
    }

    #[test]
    fn test_accounts_select_all() {
        let mut select = AccountMultiSelect::new(strings(&["A", "B", "C"]));
        assert_eq!(select.set_all(false), FilterPatch::accounts(vec![]));
        assert_eq!(select.summary(), "Select accounts");
        assert_eq!(
            select.set_all(true),
            FilterPatch::accounts(strings(&["A", "B", "C"]))
        );
    }

    #[test]
    fn test_accounts_toggle_appends() {
        let mut select = AccountMultiSelect::new(strings(&["A", "B", "C"]));
        assert_eq!(select.toggle("B"), FilterPatch::accounts(strings(&["A", "C"])));
        assert!(!select.all_selected());
        assert_eq!(
            select.toggle("B"),
            FilterPatch::accounts(strings(&["A", "C", "B"]))
        );
        assert!(select.all_selected());
    }

    #[test]
    fn test_accounts_cursor_rows() {
        let mut select = AccountMultiSelect::new(strings(&["A", "B"]));
        // row 0 unticks "Select all"
        assert_eq!(select.toggle_at_cursor(), Some(FilterPatch::accounts(vec![])));
        select.move_cursor(true);
        select.move_cursor(true);
        select.move_cursor(true);
        assert_eq!(select.cursor(), 2);
        assert_eq!(select.toggle_at_cursor(), Some(FilterPatch::accounts(strings(&["B"]))));
    }

    #[test]
    fn test_date_edit_emits_both_dates() {
        let start = Some(date(2024, 1, 1));
        let end = Some(date(2024, 12, 20));
        let mut input = DateRangeInput::default();

        input.begin_edit(start);
        for _ in 0..2 {
            input.pop_char();
        }
        input.push_char('1');
        input.push_char('5');
        assert_eq!(
            input.commit(start, end),
            Ok(FilterPatch::date_range(date(2024, 1, 15), date(2024, 12, 20)))
        );

        input.set_focus(DateField::End);
        input.begin_edit(end);
        input.cancel();
        input.begin_edit(None);
        for c in "2023-06-30".chars() {
            input.push_char(c);
        }
        // end before start is not rejected
        assert_eq!(
            input.commit(start, end),
            Ok(FilterPatch::date_range(date(2024, 1, 1), date(2023, 6, 30)))
        );
    }

    #[test]
    fn test_date_edit_rejects_garbage() {
        let mut input = DateRangeInput::default();
        input.begin_edit(None);
        for c in "2024-99".chars() {
            input.push_char(c);
        }
        assert!(input.commit(None, None).is_err());
        assert!(!input.is_editing());
    }

    #[test]
    fn test_date_shift() {
        let mut input = DateRangeInput::default();
        let start = Some(date(2024, 1, 1));
        let end = Some(date(2024, 12, 20));
        assert_eq!(
            input.shift(-1, start, end),
            Some(FilterPatch::date_range(date(2023, 12, 31), date(2024, 12, 20)))
        );
        input.set_focus(DateField::End);
        assert_eq!(
            input.shift(11, start, end),
            Some(FilterPatch::date_range(date(2024, 1, 1), date(2024, 12, 31)))
        );
        assert_eq!(input.shift(1, start, None), None);
    }

    #[test]
    fn test_pnl_tabs() {
        assert_eq!(
            pnl_tab_labels(),
            vec!["Total", "Realized Total", "Unrealized Total"]
        );
        assert_eq!(
            select_pnl_tab("Realized Total"),
            Ok(FilterPatch::pnl_type(PnlType::RealizedTotal))
        );
        assert_eq!(pnl_tab_index(Some(PnlType::UnrealizedTotal)), 2);
        assert_eq!(adjacent_pnl_tab(Some(PnlType::UnrealizedTotal), true), "Total");
        assert_eq!(adjacent_pnl_tab(None, false), "Unrealized Total");
    }

    #[test]
    fn test_zero_metric_reads_no_data() {
        assert_eq!(format_metric(Some(0.0)), "No Data");
        assert_eq!(format_metric(None), "No Data");
        assert_eq!(format_metric(Some(1234567.89)), "$1,234,567");
        assert_eq!(format_metric(Some(-1500.5)), "$-1,500");
        assert_eq!(format_metric(Some(0.4)), "$0");
    }

    #[test]
    fn test_axis_formatting() {
        assert_eq!(format_millions(1_250_000.0), "1.25M");
        assert_eq!(format_tick_date(date(2024, 3, 7)), "03/07");
    }
}
