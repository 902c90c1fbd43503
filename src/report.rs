//! Non-interactive output: one-shot snapshots printed as tables.

use crate::api::{DashboardApi, MetricsResult, RankingResult, SeriesResult};
use crate::filters::{DateRange, FilterPatch};
use crate::store::{execute, load_reference_data, Dashboard, FetchState};
use crate::widgets::{format_dollars, format_metric, NO_DATA};
use colored::Colorize;
use comfy_table::{
    presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table,
};

/// Bootstraps a dashboard, applies `overrides` on top of the default filters
/// and runs a single full dispatch with the result.
pub async fn snapshot(
    api: &dyn DashboardApi,
    range: DateRange,
    overrides: FilterPatch,
) -> eyre::Result<Dashboard> {
    let mut dashboard = Dashboard::new(range);
    let reference = load_reference_data(api).await;

    let bootstrap = dashboard.load_reference(reference);
    if bootstrap.is_none() {
        eyre::bail!("No accounts or securities available, cannot build default filters");
    }

    if overrides.is_empty() {
        tracing::info!("No overrides given, reporting the default filters");
    }
    // the bootstrap dispatch is superseded before it runs
    let Some(dispatch) = dashboard.fetch_all(overrides) else {
        eyre::bail!("Filters incomplete after applying overrides");
    };
    for outcome in execute(api, &dispatch).await {
        dashboard.apply(outcome);
    }
    Ok(dashboard)
}

fn state_note<T>(state: &FetchState<T>) -> Option<String> {
    state.error().map(|e| format!("failed: {e}"))
}

fn value_cell(value: f64) -> Cell {
    let color = if value < 0.0 { TColor::Red } else { TColor::Green };
    Cell::new(format_dollars(value))
        .fg(color)
        .set_alignment(CellAlignment::Right)
}

pub fn metrics_table(state: &FetchState<MetricsResult>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);

    let metrics = state.value();
    let cards = [
        ("Total Gains", metrics.and_then(|m| m.total_gains)),
        ("Realized Gains", metrics.and_then(|m| m.realized_gains)),
        ("Unrealized Gains", metrics.and_then(|m| m.unrealized_gains)),
        ("Interest", metrics.and_then(|m| m.interest)),
        ("Dividends", metrics.and_then(|m| m.dividends)),
    ];

    table.set_header(
        cards
            .iter()
            .map(|(title, _)| Cell::new(title).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table.add_row(
        cards
            .iter()
            .map(|(_, value)| {
                let text = format_metric(*value);
                let color = match value {
                    _ if text == NO_DATA => TColor::Grey,
                    Some(v) if *v < 0.0 => TColor::Red,
                    _ => TColor::Green,
                };
                Cell::new(text)
                    .fg(color)
                    .set_alignment(CellAlignment::Right)
            })
            .collect::<Vec<_>>(),
    );
    if let Some(note) = state_note(state) {
        table.add_row(vec![Cell::new(note).fg(TColor::Red)]);
    }
    table
}

pub fn rankings_table(state: &FetchState<RankingResult>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(80)
        .set_header(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Top down").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
            Cell::new("Bottom up").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

    let Some(rankings) = state.value() else {
        table.add_row(vec![Cell::new(NO_DATA).fg(TColor::Grey)]);
        if let Some(note) = state_note(state) {
            table.add_row(vec![Cell::new(note).fg(TColor::Red)]);
        }
        return table;
    };

    let rows = rankings.top_down.len().max(rankings.bottom_up.len());
    if rows == 0 {
        table.add_row(vec![Cell::new(NO_DATA).fg(TColor::Grey)]);
    }
    for i in 0..rows {
        let mut row = vec![Cell::new(i + 1)];
        for side in [&rankings.top_down, &rankings.bottom_up] {
            match side.get(i) {
                Some(item) => {
                    row.push(Cell::new(&item.security));
                    row.push(value_cell(item.value));
                }
                None => {
                    row.push(Cell::new(""));
                    row.push(Cell::new(""));
                }
            }
        }
        table.add_row(row);
    }
    table
}

/// One-line summary of the series: point count, first and last value.
pub fn series_summary(state: &FetchState<SeriesResult>) -> String {
    let points = state.value().map(|s| s.points()).unwrap_or_default();
    match (points.first(), points.last()) {
        (Some(first), Some(last)) => format!(
            "{} points, {} {} .. {} {}",
            points.len(),
            first.0,
            format_dollars(first.1),
            last.0,
            format_dollars(last.1)
        ),
        _ => NO_DATA.to_string(),
    }
}

pub fn print_snapshot(dashboard: &Dashboard) {
    if let Some(filters) = dashboard.filters().snapshot() {
        println!(
            "{} {} | {} .. {} | {} | {}",
            "Filters:".bold(),
            filters.security.cyan(),
            filters.start_date,
            filters.end_date,
            filters.pnl_type,
            filters.accounts.join(", ")
        );
    }
    println!("{}", metrics_table(dashboard.metrics()));
    println!(
        "{} {}",
        "Series:".bold(),
        series_summary(dashboard.series())
    );
    println!("{}", rankings_table(dashboard.rankings()));
}

pub fn print_reference(title: &str, items: &[String]) {
    println!("{} ({})", title.bold().underline(), items.len());
    if items.is_empty() {
        println!("  {}", NO_DATA.dimmed());
    }
    for item in items {
        println!("  {item}");
    }
}

pub fn print_refresh(reply: &serde_json::Value) {
    println!("{}", "Dataset refresh requested".green().bold());
    if !reply.is_null() {
        println!("{reply}");
    }
}
